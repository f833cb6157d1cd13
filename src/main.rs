mod cli;
mod prompt;
mod session;

use std::path::Path;

use anyhow::Context;
use clap::Parser;
use keel_core::Config;
use keel_scheduler::{CallOutcome, CallResult, QueueEvent};
use keel_tools::ToolCallRequest;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::cli::{Cli, Command};
use crate::session::Session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config_path = cli::resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)?;
    let mut session = Session::build(&cli, &config).await?;

    let result = match &cli.command {
        Command::Run { batch } => run_batch(&mut session, batch).await,
        Command::Check { command } => check(&session, command),
        Command::Tools => {
            for def in session.registry.definitions() {
                println!("{:<6} {}", def.id, def.description);
            }
            Ok(())
        }
    };
    session.cleanup();
    result
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// One entry of a batch file.
#[derive(Debug, Deserialize)]
struct BatchCall {
    #[serde(default)]
    id: Option<String>,
    tool: String,
    #[serde(default)]
    input: serde_json::Value,
}

/// Parse a batch file: a JSON array of `{ "tool", "input", "id"? }`, in the
/// order results should be delivered.
fn parse_batch(content: &str, turn_id: &str) -> anyhow::Result<Vec<ToolCallRequest>> {
    let calls: Vec<BatchCall> = serde_json::from_str(content)
        .context("batch file must be a JSON array of tool calls")?;
    Ok(calls
        .into_iter()
        .enumerate()
        .map(|(index, call)| ToolCallRequest {
            tool_use_id: call.id.unwrap_or_else(|| format!("call_{index}")),
            tool_id: call.tool,
            input: call.input,
            index,
            turn_id: turn_id.to_owned(),
        })
        .collect())
}

async fn run_batch(session: &mut Session, path: &Path) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read batch file {}", path.display()))?;
    let requests = parse_batch(&content, &session.id)?;

    let cancel = session.ctx.cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received interrupt, cancelling batch");
        cancel.cancel();
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                QueueEvent::Progress { index, text, .. } => eprintln!("[{index}] {text}"),
                QueueEvent::Finalized(result) => println!("{}", render(&result)),
                QueueEvent::State { .. } => {}
            }
        }
    });

    let report = session
        .queue
        .run_batch(requests, &mut session.ctx, tx)
        .await?;
    printer.await.context("result printer stopped")?;

    tracing::info!(
        completed = report.completed(),
        failed = report.failed(),
        cancelled = report.cancelled(),
        "batch done"
    );
    Ok(())
}

fn render(result: &CallResult) -> serde_json::Value {
    let mut line = json!({
        "index": result.index,
        "id": result.tool_use_id,
        "tool": result.tool_id,
        "status": result.outcome.state().as_str(),
    });
    match &result.outcome {
        CallOutcome::Completed(output) => line["output"] = json!(output.summary),
        CallOutcome::Failed(failure) => {
            line["error"] = json!(failure.message);
            line["kind"] = json!(failure.kind);
        }
        CallOutcome::Cancelled => {}
    }
    if let Some(decision) = &result.decision {
        line["decision"] = json!(decision.behavior());
    }
    line
}

fn check(session: &Session, command: &str) -> anyhow::Result<()> {
    let tool = session
        .registry
        .get("bash")
        .context("bash tool is not registered")?;
    let input = json!({ "command": command });
    let snapshot = session.ctx.snapshot();
    tool.validate_input(&input, &snapshot)
        .context("invalid command")?;

    let decision = session.engine.evaluate(tool.as_ref(), &input, &snapshot);
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}
