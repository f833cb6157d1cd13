//! Shell command analysis and the `bash` tool.

pub mod access;
pub mod classify;
pub mod parse;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::config::ShellConfig;
use crate::context::ContextSnapshot;
use crate::executor::{
    BoxFuture, PermissionTarget, ToolContext, ToolDescriptor, ToolError, ToolOutput,
    ValidationError, deserialize_params, truncate_tool_output, validate_params,
};
use crate::registry::ToolDef;
use crate::sandbox::SandboxCommandBuilder;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BashParams {
    /// The bash command to execute
    pub command: String,
    /// Timeout in seconds, overriding the configured default
    pub timeout: Option<u64>,
}

/// Runs commands with the configured shell, inside `bwrap` when the call's
/// sandbox policy is enabled and a wrapper is available.
#[derive(Debug)]
pub struct ShellTool {
    timeout: Duration,
    shell_path: PathBuf,
    sandbox: Option<SandboxCommandBuilder>,
}

impl ShellTool {
    #[must_use]
    pub fn new(config: &ShellConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout),
            shell_path: PathBuf::from(&config.shell_path),
            sandbox: None,
        }
    }

    #[must_use]
    pub fn with_sandbox(mut self, builder: SandboxCommandBuilder) -> Self {
        self.sandbox = Some(builder);
        self
    }

    /// Argv that runs `command` for a call observing `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Sandbox`] when the policy cannot be expressed as
    /// `bwrap` arguments.
    pub fn command_argv(
        &self,
        command: &str,
        snapshot: &ContextSnapshot,
    ) -> Result<Vec<String>, ToolError> {
        let policy = snapshot.sandbox_for_call();
        match &self.sandbox {
            Some(builder) if policy.enabled => {
                let home = snapshot.home_dir.as_deref().unwrap_or(Path::new("/"));
                Ok(builder.build(command, &policy, &snapshot.cwd, home, &self.shell_path)?)
            }
            _ => Ok(vec![
                self.shell_path.display().to_string(),
                "-c".to_owned(),
                command.to_owned(),
            ]),
        }
    }
}

impl ToolDescriptor for ShellTool {
    fn id(&self) -> &'static str {
        "bash"
    }

    fn definition(&self) -> ToolDef {
        ToolDef {
            id: "bash",
            description: "Execute a shell command",
            schema: schemars::schema_for!(BashParams),
        }
    }

    fn validate_input(
        &self,
        input: &serde_json::Value,
        _ctx: &ContextSnapshot,
    ) -> Result<(), ValidationError> {
        let params: BashParams = validate_params(input)?;
        if params.command.trim().is_empty() {
            return Err(ValidationError::new(
                ValidationError::INVALID_INPUT,
                "command must not be empty",
            ));
        }
        if params.timeout == Some(0) {
            return Err(ValidationError::new(
                ValidationError::INVALID_INPUT,
                "timeout must be at least one second",
            ));
        }
        Ok(())
    }

    fn is_read_only(&self, input: &serde_json::Value) -> bool {
        command_of(input).is_some_and(access::is_read_only_command)
    }

    fn needs_permissions(&self, _input: &serde_json::Value) -> bool {
        true
    }

    fn permission_target(&self, input: &serde_json::Value) -> PermissionTarget {
        PermissionTarget::Command(command_of(input).unwrap_or_default().to_owned())
    }

    fn summarize(&self, input: &serde_json::Value) -> String {
        command_of(input).unwrap_or_default().to_owned()
    }

    fn execute<'a>(
        &'a self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'a, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let params: BashParams = deserialize_params(&input)?;
            let argv = self.command_argv(&params.command, &ctx.snapshot)?;
            if let Some(builder) = &self.sandbox {
                tokio::fs::create_dir_all(builder.session_tmp_dir()).await?;
            }
            let timeout = params.timeout.map_or(self.timeout, Duration::from_secs);

            tracing::debug!(tool_use_id = %ctx.tool_use_id, argv = ?argv, "spawning shell command");
            let out = run_streaming(&argv, &ctx, timeout).await?;
            Ok(ToolOutput::new(
                "bash",
                truncate_tool_output(&format!("$ {}\n{out}", params.command)),
            ))
        })
    }
}

fn command_of(input: &serde_json::Value) -> Option<&str> {
    input.get("command").and_then(serde_json::Value::as_str)
}

fn forward_lines<R>(reader: R, prefix: &'static str, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = String::new();
        while reader.read_line(&mut buf).await.unwrap_or(0) > 0 {
            let _ = tx.send(format!("{prefix}{buf}")).await;
            buf.clear();
        }
    });
}

async fn run_streaming(
    argv: &[String],
    ctx: &ToolContext,
    timeout: Duration,
) -> Result<String, ToolError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ToolError::InvalidParams {
            message: "empty command line".to_owned(),
        })?;

    let mut child = Command::new(program)
        .args(args)
        .current_dir(&ctx.snapshot.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
    if let Some(stdout) = child.stdout.take() {
        forward_lines(stdout, "", line_tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        forward_lines(stderr, "[stderr] ", line_tx);
    }

    let mut combined = String::new();
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        tokio::select! {
            line = line_rx.recv() => {
                match line {
                    Some(chunk) => {
                        ctx.progress(chunk.trim_end()).await;
                        combined.push_str(&chunk);
                    }
                    None => break,
                }
            }
            () = tokio::time::sleep_until(deadline) => {
                let _ = child.kill().await;
                return Err(ToolError::Timeout { timeout_secs: timeout.as_secs() });
            }
            () = ctx.cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(ToolError::Cancelled);
            }
        }
    }

    let status = child.wait().await?;
    if combined.is_empty() {
        combined.push_str("(no output)");
    }
    if !status.success() {
        let code = status
            .code()
            .map_or_else(|| "signal".to_owned(), |c| c.to_string());
        combined = format!("{}\n[exit code {code}]", combined.trim_end());
    }
    Ok(combined)
}
