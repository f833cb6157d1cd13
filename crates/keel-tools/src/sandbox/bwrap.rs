use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::SandboxPolicy;
use super::paths::{absolutize, has_glob_meta};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SandboxError {
    #[error("`{path}` is both writable and denied by the sandbox policy")]
    ConflictingRule { path: String },

    #[error("sandbox path `{path}` must be absolute")]
    RelativePath { path: String },
}

/// Builds a `bwrap` argv that confines a shell command to a [`SandboxPolicy`].
///
/// The root filesystem is mounted read-only and each write allow entry is
/// bound writable on top. Denied directories are masked with read-only tmpfs
/// mounts and denied files with `/dev/null`. Denied paths that do not exist
/// are skipped, since `bwrap` would create them on the host. The only
/// filesystem access is a `stat` of each denied path, so the same inputs and
/// the same tree always yield the same argv.
#[derive(Debug, Clone)]
pub struct SandboxCommandBuilder {
    wrapper: PathBuf,
    session_tmp_dir: PathBuf,
}

impl SandboxCommandBuilder {
    #[must_use]
    pub fn new(wrapper: impl Into<PathBuf>, session_tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            wrapper: wrapper.into(),
            session_tmp_dir: session_tmp_dir.into(),
        }
    }

    #[must_use]
    pub fn session_tmp_dir(&self) -> &Path {
        &self.session_tmp_dir
    }

    /// # Errors
    ///
    /// Returns [`SandboxError::RelativePath`] when `cwd`, `home_dir` or the
    /// session temp dir is relative, and [`SandboxError::ConflictingRule`] when
    /// the same path is both writable and denied.
    pub fn build(
        &self,
        cmd: &str,
        policy: &SandboxPolicy,
        cwd: &Path,
        home_dir: &Path,
        shell_path: &Path,
    ) -> Result<Vec<String>, SandboxError> {
        for path in [cwd, home_dir, self.session_tmp_dir.as_path()] {
            if !path.is_absolute() {
                return Err(SandboxError::RelativePath {
                    path: path.display().to_string(),
                });
            }
        }

        let mounts = |rules: &[String]| -> BTreeSet<PathBuf> {
            rules
                .iter()
                .filter(|r| {
                    let literal = !has_glob_meta(r);
                    if !literal {
                        tracing::debug!(rule = %r, "glob rule cannot be mounted, enforced by path checks only");
                    }
                    literal
                })
                .map(|r| absolutize(r, cwd, Some(home_dir)))
                .collect()
        };
        let writable = mounts(&policy.write.allow_only);
        let write_denied = mounts(&policy.write.deny_within_allow);
        let read_denied = mounts(&policy.read.deny_only);

        if let Some(path) = writable
            .iter()
            .find(|p| write_denied.contains(*p) || read_denied.contains(*p))
        {
            return Err(SandboxError::ConflictingRule {
                path: path.display().to_string(),
            });
        }

        let mut argv = vec![
            self.wrapper.display().to_string(),
            "--die-with-parent".into(),
            "--unshare-ipc".into(),
        ];
        if !policy.enable_weaker_nested_sandbox {
            push_all(&mut argv, &["--unshare-pid", "--new-session"]);
        }
        if policy.needs_network_restriction {
            argv.push("--unshare-net".into());
        }
        push_all(&mut argv, &["--ro-bind", "/", "/"]);
        if policy.enable_weaker_nested_sandbox {
            push_all(&mut argv, &["--dev-bind", "/dev", "/dev", "--ro-bind", "/proc", "/proc"]);
        } else {
            push_all(&mut argv, &["--dev", "/dev", "--proc", "/proc"]);
        }

        for path in &writable {
            let p = path.display().to_string();
            argv.extend(["--bind-try".into(), p.clone(), p]);
        }
        for path in &write_denied {
            if writable.iter().any(|w| path.starts_with(w)) {
                mask(&mut argv, path);
            } else {
                tracing::debug!(path = %path.display(), "write carve-out outside writable tree, already read-only");
            }
        }
        for path in &read_denied {
            mask(&mut argv, path);
        }

        let tmp = self.session_tmp_dir.display().to_string();
        argv.extend([
            "--bind".into(),
            tmp.clone(),
            tmp.clone(),
            "--setenv".into(),
            "TMPDIR".into(),
            tmp,
            "--chdir".into(),
            cwd.display().to_string(),
            "--".into(),
            shell_path.display().to_string(),
            "-c".into(),
            cmd.to_owned(),
        ]);
        Ok(argv)
    }
}

fn push_all(argv: &mut Vec<String>, items: &[&str]) {
    argv.extend(items.iter().map(|s| (*s).to_owned()));
}

fn mask(argv: &mut Vec<String>, path: &Path) {
    let p = path.display().to_string();
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => {
            argv.extend(["--tmpfs".into(), p.clone(), "--remount-ro".into(), p]);
        }
        Ok(_) => argv.extend(["--ro-bind".into(), "/dev/null".into(), p]),
        Err(e) => tracing::debug!(path = %p, error = %e, "denied path is not present, nothing to mask"),
    }
}
