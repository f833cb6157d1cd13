use std::path::{Path, PathBuf};
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::context::{ContextModifier, ContextSnapshot};
use crate::executor::{
    BoxFuture, PermissionTarget, ToolContext, ToolDescriptor, ToolError, ToolOutput,
    ValidationError, deserialize_params, truncate_tool_output, validate_params,
};
use crate::registry::ToolDef;
use crate::sandbox::AccessMode;

const IGNORED_DIRS: &[&str] = &[".git", "target", "node_modules", ".hg"];
const GREP_LIMIT: usize = 100;
const GLOB_LIMIT: usize = 500;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadParams {
    /// File path, absolute or relative to the working directory
    pub path: String,
    /// Number of lines to skip
    pub offset: Option<usize>,
    /// Maximum number of lines to return
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteParams {
    /// File path to create or overwrite
    pub path: String,
    /// Full file content
    pub content: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EditParams {
    /// File path to edit
    pub path: String,
    /// Exact text to replace
    pub old_string: String,
    /// Replacement text
    pub new_string: String,
    /// Replace every occurrence instead of requiring a unique match
    #[serde(default)]
    pub replace_all: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GlobParams {
    /// Glob pattern such as `src/**/*.rs`
    pub pattern: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GrepParams {
    /// Regular expression to search for
    pub pattern: String,
    /// File or directory to search, defaults to the working directory
    pub path: Option<String>,
    /// Defaults to true
    pub case_sensitive: Option<bool>,
}

/// All file tools, ready to register.
#[must_use]
pub fn file_tools() -> Vec<Arc<dyn ToolDescriptor>> {
    vec![
        Arc::new(ReadTool),
        Arc::new(WriteTool),
        Arc::new(EditTool),
        Arc::new(GlobTool),
        Arc::new(GrepTool),
    ]
}

fn path_param(input: &serde_json::Value) -> Option<&str> {
    input.get("path").and_then(serde_json::Value::as_str)
}

fn check_path(ctx: &ToolContext, raw: &str, mode: AccessMode) -> Result<PathBuf, ToolError> {
    Ok(ctx.snapshot.path_validator().check(raw, mode)?)
}

fn modified_at(path: &Path) -> Option<std::time::SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Refuse to overwrite a file that changed on disk after it was last read.
fn check_not_stale(raw: &str, ctx: &ContextSnapshot) -> Result<(), ValidationError> {
    let path = ctx.resolve(raw);
    let (Some(read_at), Some(modified)) = (ctx.last_read(&path), modified_at(&path)) else {
        return Ok(());
    };
    if modified > read_at {
        return Err(ValidationError::new(
            ValidationError::STALE_FILE,
            format!("{raw} was modified since it was last read; read it again before writing"),
        ));
    }
    Ok(())
}

fn record_write(path: PathBuf) -> Option<ContextModifier> {
    modified_at(&path).map(|modified| ContextModifier::RecordFileRead { path, modified })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadTool;

impl ToolDescriptor for ReadTool {
    fn id(&self) -> &'static str {
        "read"
    }

    fn definition(&self) -> ToolDef {
        ToolDef {
            id: "read",
            description: "Read file contents with line numbers",
            schema: schemars::schema_for!(ReadParams),
        }
    }

    fn validate_input(
        &self,
        input: &serde_json::Value,
        _ctx: &ContextSnapshot,
    ) -> Result<(), ValidationError> {
        validate_params::<ReadParams>(input).map(drop)
    }

    fn is_read_only(&self, _input: &serde_json::Value) -> bool {
        true
    }

    fn needs_permissions(&self, _input: &serde_json::Value) -> bool {
        true
    }

    fn permission_target(&self, input: &serde_json::Value) -> PermissionTarget {
        PermissionTarget::Paths {
            read: path_param(input).map(str::to_owned).into_iter().collect(),
            write: Vec::new(),
        }
    }

    fn summarize(&self, input: &serde_json::Value) -> String {
        path_param(input).unwrap_or_default().to_owned()
    }

    fn execute<'a>(
        &'a self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'a, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let params: ReadParams = deserialize_params(&input)?;
            let path = check_path(&ctx, &params.path, AccessMode::Read)?;
            let content = tokio::fs::read_to_string(&path).await?;
            let modified = tokio::fs::metadata(&path).await?.modified()?;

            let offset = params.offset.unwrap_or(0);
            let selected: Vec<String> = content
                .lines()
                .skip(offset)
                .take(params.limit.unwrap_or(usize::MAX))
                .enumerate()
                .map(|(i, line)| format!("{:>4}\t{line}", offset + i + 1))
                .collect();

            Ok(
                ToolOutput::new("read", truncate_tool_output(&selected.join("\n")))
                    .with_modifier(ContextModifier::RecordFileRead { path, modified }),
            )
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteTool;

impl ToolDescriptor for WriteTool {
    fn id(&self) -> &'static str {
        "write"
    }

    fn definition(&self) -> ToolDef {
        ToolDef {
            id: "write",
            description: "Create or overwrite a file",
            schema: schemars::schema_for!(WriteParams),
        }
    }

    fn validate_input(
        &self,
        input: &serde_json::Value,
        ctx: &ContextSnapshot,
    ) -> Result<(), ValidationError> {
        let params: WriteParams = validate_params(input)?;
        check_not_stale(&params.path, ctx)
    }

    fn is_read_only(&self, _input: &serde_json::Value) -> bool {
        false
    }

    fn permission_target(&self, input: &serde_json::Value) -> PermissionTarget {
        PermissionTarget::Paths {
            read: Vec::new(),
            write: path_param(input).map(str::to_owned).into_iter().collect(),
        }
    }

    fn summarize(&self, input: &serde_json::Value) -> String {
        path_param(input).unwrap_or_default().to_owned()
    }

    fn execute<'a>(
        &'a self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'a, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let params: WriteParams = deserialize_params(&input)?;
            let path = check_path(&ctx, &params.path, AccessMode::Write)?;

            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &params.content).await?;

            let mut output = ToolOutput::new(
                "write",
                format!("Wrote {} bytes to {}", params.content.len(), params.path),
            );
            output.context_modifiers.extend(record_write(path));
            Ok(output)
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EditTool;

impl ToolDescriptor for EditTool {
    fn id(&self) -> &'static str {
        "edit"
    }

    fn definition(&self) -> ToolDef {
        ToolDef {
            id: "edit",
            description: "Replace an exact string in a file",
            schema: schemars::schema_for!(EditParams),
        }
    }

    fn validate_input(
        &self,
        input: &serde_json::Value,
        ctx: &ContextSnapshot,
    ) -> Result<(), ValidationError> {
        let params: EditParams = validate_params(input)?;
        if params.old_string == params.new_string {
            return Err(ValidationError::new(
                ValidationError::INVALID_INPUT,
                "old_string and new_string are identical",
            ));
        }
        check_not_stale(&params.path, ctx)
    }

    fn is_read_only(&self, _input: &serde_json::Value) -> bool {
        false
    }

    fn permission_target(&self, input: &serde_json::Value) -> PermissionTarget {
        PermissionTarget::Paths {
            read: Vec::new(),
            write: path_param(input).map(str::to_owned).into_iter().collect(),
        }
    }

    fn summarize(&self, input: &serde_json::Value) -> String {
        path_param(input).unwrap_or_default().to_owned()
    }

    fn execute<'a>(
        &'a self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'a, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let params: EditParams = deserialize_params(&input)?;
            let path = check_path(&ctx, &params.path, AccessMode::Write)?;

            let content = tokio::fs::read_to_string(&path).await?;
            let occurrences = content.matches(&params.old_string).count();
            if occurrences == 0 {
                return Err(ToolError::InvalidParams {
                    message: format!("old_string not found in {}", params.path),
                });
            }
            if occurrences > 1 && !params.replace_all {
                return Err(ToolError::InvalidParams {
                    message: format!(
                        "old_string occurs {occurrences} times in {}; add context or set replace_all",
                        params.path
                    ),
                });
            }

            let new_content = if params.replace_all {
                content.replace(&params.old_string, &params.new_string)
            } else {
                content.replacen(&params.old_string, &params.new_string, 1)
            };
            tokio::fs::write(&path, &new_content).await?;

            let mut output = ToolOutput::new("edit", format!("Edited {}", params.path));
            output.context_modifiers.extend(record_write(path));
            Ok(output)
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GlobTool;

impl ToolDescriptor for GlobTool {
    fn id(&self) -> &'static str {
        "glob"
    }

    fn definition(&self) -> ToolDef {
        ToolDef {
            id: "glob",
            description: "Find files matching a glob pattern",
            schema: schemars::schema_for!(GlobParams),
        }
    }

    fn validate_input(
        &self,
        input: &serde_json::Value,
        _ctx: &ContextSnapshot,
    ) -> Result<(), ValidationError> {
        let params: GlobParams = validate_params(input)?;
        glob::Pattern::new(&params.pattern)
            .map(drop)
            .map_err(|e| ValidationError::new(ValidationError::INVALID_INPUT, e.to_string()))
    }

    fn is_read_only(&self, _input: &serde_json::Value) -> bool {
        true
    }

    fn needs_permissions(&self, _input: &serde_json::Value) -> bool {
        false
    }

    fn summarize(&self, input: &serde_json::Value) -> String {
        input
            .get("pattern")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_owned()
    }

    fn execute<'a>(
        &'a self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'a, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let params: GlobParams = deserialize_params(&input)?;
            let pattern = if Path::new(&params.pattern).is_absolute() {
                params.pattern.clone()
            } else {
                ctx.snapshot.cwd.join(&params.pattern).display().to_string()
            };
            let validator = ctx.snapshot.path_validator();

            let matches = tokio::task::spawn_blocking(move || -> Result<Vec<String>, ToolError> {
                let paths = glob::glob(&pattern).map_err(|e| ToolError::InvalidParams {
                    message: e.to_string(),
                })?;
                Ok(paths
                    .filter_map(Result::ok)
                    .filter(|p| {
                        validator
                            .check(&p.display().to_string(), AccessMode::Read)
                            .is_ok()
                    })
                    .take(GLOB_LIMIT)
                    .map(|p| p.display().to_string())
                    .collect())
            })
            .await
            .map_err(std::io::Error::other)??;

            Ok(ToolOutput::new(
                "glob",
                if matches.is_empty() {
                    format!("No files matching: {}", params.pattern)
                } else {
                    matches.join("\n")
                },
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GrepTool;

impl GrepTool {
    fn build_regex(params: &GrepParams) -> Result<regex::Regex, regex::Error> {
        regex::RegexBuilder::new(&params.pattern)
            .case_insensitive(!params.case_sensitive.unwrap_or(true))
            .build()
    }
}

impl ToolDescriptor for GrepTool {
    fn id(&self) -> &'static str {
        "grep"
    }

    fn definition(&self) -> ToolDef {
        ToolDef {
            id: "grep",
            description: "Search file contents with a regular expression",
            schema: schemars::schema_for!(GrepParams),
        }
    }

    fn validate_input(
        &self,
        input: &serde_json::Value,
        _ctx: &ContextSnapshot,
    ) -> Result<(), ValidationError> {
        let params: GrepParams = validate_params(input)?;
        Self::build_regex(&params)
            .map(drop)
            .map_err(|e| ValidationError::new(ValidationError::INVALID_INPUT, e.to_string()))
    }

    fn is_read_only(&self, _input: &serde_json::Value) -> bool {
        true
    }

    fn needs_permissions(&self, _input: &serde_json::Value) -> bool {
        true
    }

    fn permission_target(&self, input: &serde_json::Value) -> PermissionTarget {
        PermissionTarget::Paths {
            read: vec![path_param(input).unwrap_or(".").to_owned()],
            write: Vec::new(),
        }
    }

    fn summarize(&self, input: &serde_json::Value) -> String {
        input
            .get("pattern")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_owned()
    }

    fn execute<'a>(
        &'a self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'a, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let params: GrepParams = deserialize_params(&input)?;
            let regex = Self::build_regex(&params).map_err(|e| ToolError::InvalidParams {
                message: e.to_string(),
            })?;
            let root = check_path(&ctx, params.path.as_deref().unwrap_or("."), AccessMode::Read)?;
            let validator = ctx.snapshot.path_validator();

            let results = tokio::task::spawn_blocking(move || {
                let mut results = Vec::new();
                let mut readable = |p: &Path| {
                    validator
                        .check(&p.display().to_string(), AccessMode::Read)
                        .is_ok()
                };
                grep_recursive(&root, &regex, &mut readable, &mut results);
                results
            })
            .await
            .map_err(std::io::Error::other)?;

            Ok(ToolOutput::new(
                "grep",
                if results.is_empty() {
                    format!("No matches for: {}", params.pattern)
                } else {
                    truncate_tool_output(&results.join("\n"))
                },
            ))
        })
    }
}

fn grep_recursive(
    path: &Path,
    regex: &regex::Regex,
    readable: &mut dyn FnMut(&Path) -> bool,
    results: &mut Vec<String>,
) {
    if results.len() >= GREP_LIMIT || !readable(path) {
        return;
    }
    if path.is_file() {
        if let Ok(content) = std::fs::read_to_string(path) {
            for (i, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    results.push(format!("{}:{}: {line}", path.display(), i + 1));
                    if results.len() >= GREP_LIMIT {
                        return;
                    }
                }
            }
        }
    } else if let Ok(entries) = std::fs::read_dir(path) {
        let mut entries: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        entries.sort();
        for p in entries {
            let name = p.file_name().and_then(|n| n.to_str());
            if name.is_some_and(|n| n.starts_with('.') || IGNORED_DIRS.contains(&n)) {
                continue;
            }
            grep_recursive(&p, regex, readable, results);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::executor::{FailureKind, ToolFailure};
    use crate::sandbox::{ReadRestrictions, SandboxPolicy, WriteRestrictions};
    use std::fs;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn context(dir: &Path) -> ExecutionContext {
        let cwd = dir.canonicalize().unwrap();
        ExecutionContext::new(cwd)
            .with_home_dir(None)
            .with_sandbox(SandboxPolicy {
                enabled: true,
                read: ReadRestrictions {
                    deny_only: vec!["secrets".into()],
                },
                write: WriteRestrictions {
                    allow_only: vec![".".into()],
                    deny_within_allow: vec!["locked".into()],
                },
                ..SandboxPolicy::default()
            })
    }

    async fn run(
        tool: &dyn ToolDescriptor,
        ctx: &ExecutionContext,
        input: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let (tx, _rx) = mpsc::channel(16);
        let tool_ctx = ToolContext::new("t1", CancellationToken::new(), ctx.snapshot(), tx);
        tool.execute(input, tool_ctx).await
    }

    #[tokio::test]
    async fn read_numbers_lines_and_records_mtime() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a\nb\nc\nd\n").unwrap();
        let ctx = context(dir.path());

        let out = run(&ReadTool, &ctx, serde_json::json!({"path": "a.txt", "offset": 1, "limit": 2}))
            .await
            .unwrap();
        assert_eq!(out.summary, "   2\tb\n   3\tc");
        assert!(matches!(
            &out.context_modifiers[..],
            [ContextModifier::RecordFileRead { path, .. }] if path.ends_with("a.txt")
        ));
    }

    #[tokio::test]
    async fn read_denied_path_is_a_permission_failure() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("secrets")).unwrap();
        fs::write(dir.path().join("secrets/key"), "k").unwrap();
        let ctx = context(dir.path());

        let err = run(&ReadTool, &ctx, serde_json::json!({"path": "secrets/key"}))
            .await
            .unwrap_err();
        assert_eq!(ToolFailure::from(err).kind, FailureKind::PermissionDenied);
    }

    #[tokio::test]
    async fn write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let out = run(
            &WriteTool,
            &ctx,
            serde_json::json!({"path": "out/new.txt", "content": "hello world"}),
        )
        .await
        .unwrap();
        assert!(out.summary.contains("11 bytes"));
        assert_eq!(fs::read_to_string(dir.path().join("out/new.txt")).unwrap(), "hello world");
        assert_eq!(out.context_modifiers.len(), 1);
    }

    #[tokio::test]
    async fn write_creates_a_fresh_file_in_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        run(&WriteTool, &ctx, serde_json::json!({"path": "fresh.txt", "content": "new"}))
            .await
            .unwrap();
        let written = dir.path().join("fresh.txt");
        assert!(written.is_file());
        assert_eq!(fs::read_to_string(written).unwrap(), "new");
    }

    #[tokio::test]
    async fn write_outside_allow_and_into_carve_out_fail() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let outside = tempfile::tempdir().unwrap();
        let target = outside.path().join("escape.txt");

        let err = run(
            &WriteTool,
            &ctx,
            serde_json::json!({"path": target.display().to_string(), "content": "x"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::SandboxViolation(_)));
        assert!(!target.exists());

        let err = run(&WriteTool, &ctx, serde_json::json!({"path": "locked/a", "content": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SandboxViolation(_)));
    }

    #[tokio::test]
    async fn edit_requires_unique_match() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("e.txt"), "foo bar foo").unwrap();
        let ctx = context(dir.path());

        let err = run(
            &EditTool,
            &ctx,
            serde_json::json!({"path": "e.txt", "old_string": "foo", "new_string": "qux"}),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("2 times"));

        run(
            &EditTool,
            &ctx,
            serde_json::json!({"path": "e.txt", "old_string": "bar", "new_string": "baz"}),
        )
        .await
        .unwrap();
        run(
            &EditTool,
            &ctx,
            serde_json::json!({"path": "e.txt", "old_string": "foo", "new_string": "x", "replace_all": true}),
        )
        .await
        .unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("e.txt")).unwrap(), "x baz x");
    }

    #[tokio::test]
    async fn edit_missing_string_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("e.txt"), "foo").unwrap();
        let ctx = context(dir.path());
        let err = run(
            &EditTool,
            &ctx,
            serde_json::json!({"path": "e.txt", "old_string": "nope", "new_string": "x"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams { .. }));
    }

    #[tokio::test]
    async fn stale_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("s.txt");
        fs::write(&file, "v1").unwrap();
        let mut ctx = context(dir.path());

        let out = run(&ReadTool, &ctx, serde_json::json!({"path": "s.txt"})).await.unwrap();
        for m in out.context_modifiers {
            ctx.apply(m);
        }
        let input = serde_json::json!({"path": "s.txt", "content": "v2"});
        assert!(WriteTool.validate_input(&input, &ctx.snapshot()).is_ok());

        let later = filetime::FileTime::from_unix_time(4_000_000_000, 0);
        filetime::set_file_mtime(&file, later).unwrap();
        let err = WriteTool.validate_input(&input, &ctx.snapshot()).unwrap_err();
        assert_eq!(err.error_code, ValidationError::STALE_FILE);
    }

    #[test]
    fn edit_identical_strings_is_invalid() {
        let ctx = ExecutionContext::new("/work").snapshot();
        let err = EditTool
            .validate_input(
                &serde_json::json!({"path": "a", "old_string": "x", "new_string": "x"}),
                &ctx,
            )
            .unwrap_err();
        assert_eq!(err.error_code, ValidationError::INVALID_INPUT);
    }

    #[test]
    fn missing_params_fail_validation() {
        let ctx = ExecutionContext::new("/work").snapshot();
        for tool in file_tools() {
            let err = tool.validate_input(&serde_json::json!({}), &ctx).unwrap_err();
            assert_eq!(err.error_code, ValidationError::INVALID_INPUT, "{}", tool.id());
        }
    }

    #[test]
    fn flags() {
        let input = serde_json::json!({"path": "a"});
        assert!(ReadTool.is_concurrency_safe(&input));
        assert!(GrepTool.is_read_only(&input));
        assert!(!WriteTool.is_concurrency_safe(&input));
        assert!(EditTool.needs_permissions(&input));
        assert!(!GlobTool.needs_permissions(&input));
        assert_eq!(
            WriteTool.permission_target(&input),
            PermissionTarget::Paths {
                read: vec![],
                write: vec!["a".into()]
            }
        );
    }

    #[tokio::test]
    async fn glob_skips_denied_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "").unwrap();
        fs::create_dir(dir.path().join("secrets")).unwrap();
        fs::write(dir.path().join("secrets/b.rs"), "").unwrap();
        let ctx = context(dir.path());

        let out = run(&GlobTool, &ctx, serde_json::json!({"pattern": "**/*.rs"}))
            .await
            .unwrap();
        assert!(out.summary.contains("a.rs"));
        assert!(!out.summary.contains("b.rs"));
    }

    #[tokio::test]
    async fn grep_finds_matches() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("t.txt"), "hello world\nfoo bar\nHello again\n").unwrap();
        let ctx = context(dir.path());

        let out = run(&GrepTool, &ctx, serde_json::json!({"pattern": "hello", "case_sensitive": false}))
            .await
            .unwrap();
        assert!(out.summary.contains("hello world"));
        assert!(out.summary.contains("Hello again"));
        assert!(!out.summary.contains("foo bar"));
    }

    #[test]
    fn grep_invalid_regex_fails_validation() {
        let ctx = ExecutionContext::new("/work").snapshot();
        let err = GrepTool
            .validate_input(&serde_json::json!({"pattern": "("}), &ctx)
            .unwrap_err();
        assert_eq!(err.error_code, ValidationError::INVALID_INPUT);
    }
}
