//! What a simple command runs and which paths it touches.

use super::parse::{SubcommandSpan, Word, pipelines, split};

/// Commands that run another command given as their arguments.
const WRAPPERS: &[&str] = &[
    "command", "env", "nice", "nohup", "stdbuf", "time", "timeout", "xargs",
];

const READ_ONLY: &[&str] = &[
    "basename", "cat", "cmp", "column", "comm", "cut", "date", "df", "diff", "dirname", "du",
    "echo", "false", "fd", "file", "grep", "head", "id", "jq", "less", "ls", "md5sum", "nl",
    "printenv", "printf", "pwd", "readlink", "realpath", "rg", "sha256sum", "sleep", "sort",
    "stat", "tail", "test", "tr", "tree", "true", "uname", "uniq", "wc", "which", "whoami",
];

const READ_ONLY_GIT: &[&str] = &[
    "blame", "cat-file", "describe", "diff", "grep", "log", "ls-files", "ls-tree", "rev-parse",
    "shortlog", "show", "status",
];

const FIND_ACTIONS: &[&str] = &[
    "-delete", "-exec", "-execdir", "-fls", "-fprint", "-fprint0", "-fprintf", "-ok", "-okdir",
];

const DISCARD_TARGETS: &[&str] = &["/dev/null", "/dev/stdout", "/dev/stderr"];

/// Basename of an executable word: `/usr/bin/git` is `git`.
#[must_use]
pub fn basename(word: &str) -> &str {
    word.rsplit('/').next().unwrap_or(word)
}

/// Executables a span runs, outermost first: `timeout 5 git log` yields
/// `["timeout", "git"]`.
#[must_use]
pub fn executables(span: &SubcommandSpan) -> Vec<String> {
    let mut out = Vec::new();
    walk(span.command_words(), &mut |name, _| out.push(name.to_owned()));
    out
}

fn innermost(span: &SubcommandSpan) -> Option<(String, &[Word])> {
    let mut last = None;
    walk(span.command_words(), &mut |name, args| {
        last = Some((name.to_owned(), args));
    });
    last
}

fn walk<'a>(words: &'a [Word], visit: &mut dyn FnMut(&str, &'a [Word])) {
    let mut i = 0;
    while let Some(word) = words.get(i) {
        let name = basename(&word.value);
        visit(name, &words[i + 1..]);
        if !WRAPPERS.contains(&name) {
            return;
        }
        i += 1;
        while let Some(arg) = words.get(i) {
            let v = arg.value.as_str();
            if option_takes_value(name, v) {
                i += 2;
            } else if v.starts_with('-')
                || v.starts_with(|c: char| c.is_ascii_digit())
                || (name == "env" && v.contains('='))
            {
                i += 1;
            } else {
                break;
            }
        }
    }
}

fn option_takes_value(wrapper: &str, option: &str) -> bool {
    matches!(
        (wrapper, option),
        ("xargs", "-I" | "-n" | "-P" | "-L" | "-d" | "-E" | "-s" | "-a")
            | ("env", "-u" | "-C" | "-S")
            | ("timeout", "-k" | "-s")
            | ("nice", "-n")
    )
}

/// True when the span can only read: every executable it runs is read-only
/// and output goes nowhere but the terminal or `/dev/null`.
#[must_use]
pub fn is_read_only(span: &SubcommandSpan) -> bool {
    if span
        .output_targets()
        .any(|t| !DISCARD_TARGETS.contains(&t))
    {
        return false;
    }
    let Some((name, args)) = innermost(span) else {
        return true;
    };
    let chain = executables(span);
    let wrappers_ok = chain[..chain.len() - 1]
        .iter()
        .all(|w| w != "xargs" || READ_ONLY.contains(&name.as_str()));
    wrappers_ok && command_is_read_only(&name, args)
}

fn command_is_read_only(name: &str, args: &[Word]) -> bool {
    let mut values = args.iter().map(|w| w.value.as_str());
    match name {
        "find" => !values.any(|a| FIND_ACTIONS.contains(&a)),
        "sed" => !values.any(|a| a.starts_with("-i") || a.starts_with("--in-place")),
        "git" => git_subcommand(args).is_some_and(|sub| READ_ONLY_GIT.contains(&sub)),
        "env" => true,
        _ => READ_ONLY.contains(&name),
    }
}

fn git_subcommand(args: &[Word]) -> Option<&str> {
    let mut values = args.iter().map(|w| w.value.as_str());
    while let Some(arg) = values.next() {
        match arg {
            "-C" | "-c" | "--git-dir" | "--work-tree" => {
                values.next();
            }
            _ if arg.starts_with('-') => {}
            _ => return Some(arg),
        }
    }
    None
}

/// True when `command` parses and every sub-command in it is read-only.
#[must_use]
pub fn is_read_only_command(command: &str) -> bool {
    let Ok(spans) = split(command) else {
        return false;
    };
    let groups = pipelines(&spans);
    !groups.is_empty()
        && groups
            .iter()
            .flat_map(|p| p.segments.iter())
            .all(|s| is_read_only(s))
}

/// Paths a sub-command reads and writes, as written (unresolved).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathAccess {
    pub read: Vec<String>,
    pub write: Vec<String>,
}

#[must_use]
pub fn accessed_paths(span: &SubcommandSpan) -> PathAccess {
    let mut access = PathAccess::default();
    access.write.extend(
        span.output_targets()
            .filter(|t| !DISCARD_TARGETS.contains(t) && !t.starts_with("/dev/fd/"))
            .map(str::to_owned),
    );
    access
        .read
        .extend(span.input_sources().map(str::to_owned));

    let Some((name, args)) = innermost(span) else {
        return access;
    };
    let operands: Vec<&str> = args
        .iter()
        .map(|w| w.value.as_str())
        .filter(|a| !a.starts_with('-'))
        .collect();
    let owned = |items: &[&str]| items.iter().map(|s| (*s).to_owned()).collect::<Vec<_>>();

    match name.as_str() {
        "rm" | "rmdir" | "mkdir" | "touch" | "unlink" | "shred" | "truncate" | "tee" | "mv" => {
            access.write.extend(owned(&operands));
        }
        "cp" | "install" | "ln" => {
            if let Some((last, sources)) = operands.split_last() {
                access.read.extend(owned(sources));
                access.write.push((*last).to_owned());
            }
        }
        "chmod" | "chown" | "chgrp" => {
            access.write.extend(owned(operands.get(1..).unwrap_or_default()));
        }
        "sed" if !command_is_read_only(&name, args) => {
            let has_script_flag = args.iter().any(|w| w.value == "-e" || w.value == "-f");
            let files = if has_script_flag {
                &operands[..]
            } else {
                operands.get(1..).unwrap_or_default()
            };
            access.write.extend(owned(files));
        }
        _ => {
            access
                .read
                .extend(operands.iter().filter(|a| looks_like_path(a)).map(|s| (*s).to_owned()));
        }
    }
    access
}

fn looks_like_path(arg: &str) -> bool {
    if arg.contains("://") {
        return false;
    }
    arg == "."
        || arg == ".."
        || arg.starts_with('/')
        || arg.starts_with('~')
        || arg.contains('/')
}
