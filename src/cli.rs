use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use keel_tools::PermissionMode;

#[derive(Debug, Parser)]
#[command(
    name = "keel",
    version,
    about = "Run agent tool calls behind a permission engine and a bwrap sandbox"
)]
pub(crate) struct Cli {
    /// Config file; falls back to `KEEL_CONFIG`, then config/default.toml
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,

    /// Directory tool calls run in and resolve relative paths against
    #[arg(long, global = true)]
    pub(crate) cwd: Option<PathBuf>,

    /// Session permission mode, overriding the config file
    #[arg(long, global = true)]
    pub(crate) permission_mode: Option<PermissionMode>,

    /// Same as `--permission-mode bypass-permissions`
    #[arg(long, global = true, conflicts_with = "permission_mode")]
    pub(crate) dangerously_skip_permissions: bool,

    /// Run shell commands without bwrap even when it is available
    #[arg(long, global = true)]
    pub(crate) no_sandbox: bool,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Execute a JSON batch of tool calls and print results in request order
    Run {
        #[arg(long)]
        batch: PathBuf,
    },
    /// Print the permission decision for a shell command without running it
    Check { command: String },
    /// List the registered tools
    Tools,
}

impl Cli {
    /// Mode requested on the command line, if any.
    pub(crate) fn mode_override(&self) -> Option<PermissionMode> {
        if self.dangerously_skip_permissions {
            Some(PermissionMode::BypassPermissions)
        } else {
            self.permission_mode
        }
    }
}

pub(crate) fn resolve_config_path(flag: Option<&Path>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("KEEL_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}
