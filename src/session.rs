//! Wiring for one CLI session: context, tools, engine and queue.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use keel_core::{Config, DenyAllPrompter, PermissionEngine, PermissionPrompter};
use keel_scheduler::ToolUseQueue;
use keel_tools::{
    AuditLogger, ExecutionContext, SandboxCommandBuilder, ShellTool, ToolRegistry, file_tools,
};

use crate::cli::Cli;
use crate::prompt::TerminalPrompter;

pub(crate) struct Session {
    pub(crate) id: String,
    pub(crate) ctx: ExecutionContext,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) engine: Arc<PermissionEngine>,
    pub(crate) queue: ToolUseQueue,
    tmp_dir: PathBuf,
}

impl Session {
    /// # Errors
    ///
    /// Fails when the working directory cannot be resolved or the audit log
    /// cannot be opened.
    pub(crate) async fn build(cli: &Cli, config: &Config) -> anyhow::Result<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        let cwd = match &cli.cwd {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("failed to read current directory")?,
        };
        let cwd = std::fs::canonicalize(&cwd)
            .with_context(|| format!("working directory {} is not accessible", cwd.display()))?;

        let mut permissions = config.permission_context();
        if let Some(mode) = cli.mode_override() {
            permissions.mode = mode;
        }

        let mut sandbox = config.sandbox_policy();
        let wrapper = if sandbox.enabled && !cli.no_sandbox {
            find_wrapper(&config.tools.sandbox.wrapper_path)
        } else {
            None
        };
        if sandbox.enabled && wrapper.is_none() {
            if !cli.no_sandbox {
                tracing::warn!(
                    wrapper = %config.tools.sandbox.wrapper_path,
                    "sandbox wrapper not found, shell commands will need approval"
                );
            }
            sandbox.enabled = false;
        }

        let tmp_dir = std::env::temp_dir().join(format!("keel-{id}"));
        let mut shell = ShellTool::new(&config.tools.shell);
        if let Some(wrapper) = wrapper {
            tracing::info!(wrapper = %wrapper.display(), "sandboxing shell commands");
            shell = shell.with_sandbox(SandboxCommandBuilder::new(wrapper, &tmp_dir));
        }
        let mut registry = ToolRegistry::new().with_tool(shell);
        for tool in file_tools() {
            registry.register(tool);
        }
        let registry = Arc::new(registry);
        let engine = Arc::new(PermissionEngine::from_config(&config.tools.shell));

        let prompter: Arc<dyn PermissionPrompter> = if std::io::stdin().is_terminal() {
            Arc::new(TerminalPrompter)
        } else {
            tracing::info!("stdin is not a terminal, calls needing approval are denied");
            Arc::new(DenyAllPrompter)
        };
        let mut queue = ToolUseQueue::new(Arc::clone(&registry), Arc::clone(&engine), prompter)
            .with_max_concurrency(config.scheduler.max_concurrency)
            .with_chunk_buffer(config.scheduler.chunk_buffer);
        if config.tools.audit.enabled {
            let audit = AuditLogger::from_config(&config.tools.audit)
                .await
                .context("failed to open audit log")?;
            queue = queue.with_audit(Arc::new(audit));
        }

        tracing::info!(
            session = %id,
            cwd = %cwd.display(),
            mode = %permissions.mode,
            sandbox = sandbox.enabled,
            "session ready"
        );
        let ctx = ExecutionContext::new(cwd)
            .with_permissions(permissions)
            .with_sandbox(sandbox);

        Ok(Self {
            id,
            ctx,
            registry,
            engine,
            queue,
            tmp_dir,
        })
    }

    /// Remove the session temp dir shared with sandboxed commands.
    pub(crate) fn cleanup(&self) {
        if self.tmp_dir.exists()
            && let Err(e) = std::fs::remove_dir_all(&self.tmp_dir)
        {
            tracing::warn!(path = %self.tmp_dir.display(), "failed to remove session dir: {e}");
        }
    }
}

/// Locate the sandbox wrapper. Paths are taken as is; bare names are looked
/// up on `PATH`.
fn find_wrapper(wrapper: &str) -> Option<PathBuf> {
    let candidate = Path::new(wrapper);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(wrapper))
        .find(|p| p.is_file())
}
