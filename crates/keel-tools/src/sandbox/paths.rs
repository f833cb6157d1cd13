//! Path resolution and read/write rule matching.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use glob::{MatchOptions, Pattern};
use serde::Serialize;

use super::SandboxPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    /// Matched a read deny rule.
    ReadDenied { rule: String },
    /// Not inside any write allow rule.
    OutsideWriteAllow,
    /// Inside the write allow-list but matched a carve-out.
    WriteDenied { rule: String },
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadDenied { rule } => write!(f, "reading is denied by `{rule}`"),
            Self::OutsideWriteAllow => f.write_str("outside the writable directories"),
            Self::WriteDenied { rule } => write!(f, "writing is denied by `{rule}`"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("`{requested}` ({}) is blocked: {kind}", .path.display())]
pub struct PathViolation {
    /// Path as the tool received it.
    pub requested: String,
    /// Absolute, symlink-resolved form.
    pub path: PathBuf,
    pub kind: ViolationKind,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
enum Matcher {
    Tree(PathBuf),
    Glob(Pattern),
}

impl Matcher {
    fn matches(&self, path: &Path) -> bool {
        match self {
            Self::Tree(root) => path.starts_with(root),
            Self::Glob(pattern) => path
                .ancestors()
                .any(|a| pattern.matches_path_with(a, MATCH_OPTIONS)),
        }
    }
}

#[derive(Debug, Clone)]
struct Rule {
    source: String,
    matcher: Matcher,
}

/// Checks paths against a [`SandboxPolicy`].
///
/// Reads are allowed unless a `deny_only` rule matches. Writes must fall
/// inside an `allow_only` rule and outside every `deny_within_allow` rule.
/// Directory rules match at component boundaries, so `/home/user` does not
/// cover `/home/userevil`.
#[derive(Debug, Clone)]
pub struct PathValidator {
    cwd: PathBuf,
    home: Option<PathBuf>,
    read_deny: Vec<Rule>,
    write_allow: Vec<Rule>,
    write_deny: Vec<Rule>,
}

impl PathValidator {
    #[must_use]
    pub fn new(policy: &SandboxPolicy, cwd: &Path, home: Option<&Path>) -> Self {
        let compile = |rules: &[String]| {
            rules
                .iter()
                .filter_map(|r| compile_rule(r, cwd, home))
                .collect::<Vec<_>>()
        };
        Self {
            cwd: cwd.to_path_buf(),
            home: home.map(Path::to_path_buf),
            read_deny: compile(&policy.read.deny_only),
            write_allow: compile(&policy.write.allow_only),
            write_deny: compile(&policy.write.deny_within_allow),
        }
    }

    /// Absolute, normalized, symlink-resolved form of `raw`.
    #[must_use]
    pub fn resolve(&self, raw: &str) -> PathBuf {
        resolve_path(raw, &self.cwd, self.home.as_deref())
    }

    /// Check one path, returning its resolved form.
    ///
    /// # Errors
    ///
    /// Returns [`PathViolation`] when the policy refuses the access.
    pub fn check(&self, raw: &str, mode: AccessMode) -> Result<PathBuf, PathViolation> {
        let path = self.resolve(raw);
        let violation = |kind| PathViolation {
            requested: raw.to_owned(),
            path: path.clone(),
            kind,
        };
        match mode {
            AccessMode::Read => {
                if let Some(rule) = self.read_deny.iter().find(|r| r.matcher.matches(&path)) {
                    return Err(violation(ViolationKind::ReadDenied {
                        rule: rule.source.clone(),
                    }));
                }
            }
            AccessMode::Write => {
                if !self.write_allow.iter().any(|r| r.matcher.matches(&path)) {
                    return Err(violation(ViolationKind::OutsideWriteAllow));
                }
                if let Some(rule) = self.write_deny.iter().find(|r| r.matcher.matches(&path)) {
                    return Err(violation(ViolationKind::WriteDenied {
                        rule: rule.source.clone(),
                    }));
                }
            }
        }
        Ok(path)
    }

    /// Check every path, stopping at the first violation.
    ///
    /// # Errors
    ///
    /// Returns the first [`PathViolation`] in input order.
    pub fn validate<S: AsRef<str>>(&self, paths: &[S], mode: AccessMode) -> Result<(), PathViolation> {
        for raw in paths {
            self.check(raw.as_ref(), mode)?;
        }
        Ok(())
    }
}

fn compile_rule(rule: &str, cwd: &Path, home: Option<&Path>) -> Option<Rule> {
    let absolute = absolutize(rule, cwd, home);
    let matcher = if has_glob_meta(rule) {
        let mut prefix = PathBuf::new();
        let mut rest = PathBuf::new();
        for component in absolute.components() {
            let part = component.as_os_str();
            if rest.as_os_str().is_empty() && !has_glob_meta(&part.to_string_lossy()) {
                prefix.push(part);
            } else {
                rest.push(part);
            }
        }
        let literal = Pattern::escape(&resolve_components(&prefix).to_string_lossy());
        let joined = format!(
            "{}/{}",
            literal.trim_end_matches('/'),
            rest.to_string_lossy()
        );
        match Pattern::new(&joined) {
            Ok(pattern) => Matcher::Glob(pattern),
            Err(e) => {
                tracing::warn!(rule, error = %e, "invalid sandbox glob, skipping");
                return None;
            }
        }
    } else {
        Matcher::Tree(resolve_components(&absolute))
    };
    Some(Rule {
        source: rule.to_owned(),
        matcher,
    })
}

pub(crate) fn has_glob_meta(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Resolve `raw` against `cwd` (expanding `~`) and follow symlinks one
/// component at a time, so a `..` after a link climbs out of the link's
/// target rather than out of the link's directory.
#[must_use]
pub fn resolve_path(raw: &str, cwd: &Path, home: Option<&Path>) -> PathBuf {
    resolve_components(&expand(raw, cwd, home))
}

/// Lexical resolution only: `~` expansion, joining with `cwd`, and removal
/// of `.`/`..` components. Never touches the filesystem.
pub(crate) fn absolutize(raw: &str, cwd: &Path, home: Option<&Path>) -> PathBuf {
    normalize(&expand(raw, cwd, home))
}

fn expand(raw: &str, cwd: &Path, home: Option<&Path>) -> PathBuf {
    let expanded = match (raw, home) {
        ("~", Some(home)) => home.to_path_buf(),
        (_, Some(home)) if raw.starts_with("~/") => home.join(&raw[2..]),
        _ => PathBuf::from(raw),
    };
    if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// The existing prefix is canonicalized after every pushed name, so `out`
/// is always the real location before the next `..` is applied. Names past
/// the first missing one are kept as written.
fn resolve_components(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => {
                out.push(name);
                if let Ok(real) = out.canonicalize() {
                    out = real;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
