//! Shell word tokenizer.
//!
//! Splits a command line into shell-style words while respecting single
//! quotes, double quotes, ANSI-C `$'...'` quotes and backslash escapes. This is an approximation of
//! POSIX word splitting: there is no expansion, and quote characters are
//! kept in the emitted words so callers can still tell that a word was
//! quoted. Use [`strip_quotes`] when the unquoted text is needed.
//!
//! [`QuoteState`] is the quote/escape tracker shared with the decomposer's
//! operator scan, so every component agrees on what is "inside quotes".

use std::ops::Range;

use tracing::{Level, instrument};

/// The quoting context a character was read in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Quote {
    #[default]
    None,
    Single,
    Double,
    /// `$'...'`, where a backslash escapes the next character.
    AnsiC,
}

/// How a single character should be treated, as decided by [`QuoteState::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Unquoted, unescaped character. Operators and whitespace only count here.
    Plain,
    /// Character inside a quoted span.
    Quoted(Quote),
    /// A backslash that escapes the next character.
    Escape,
    /// The character following an escaping backslash.
    Escaped,
    /// A quote character opening a span.
    Open(Quote),
    /// A quote character closing a span.
    Close(Quote),
}

/// Incremental quote and escape tracker.
///
/// Feed characters in order with the following character as lookahead.
/// Unterminated quotes simply stay open until the input ends.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuoteState {
    quote: Quote,
    escaped: bool,
    /// The previous character was an unquoted `$` directly before `'`.
    ansi_c_open: bool,
}

impl QuoteState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The quote span currently open, if any.
    pub fn quote(&self) -> Quote {
        self.quote
    }

    /// Returns true when the next character would be read inside quotes.
    pub fn in_quotes(&self) -> bool {
        self.quote != Quote::None
    }

    /// Classify `ch` and advance the state.
    pub fn step(&mut self, ch: char, next: Option<char>) -> Step {
        if self.escaped {
            self.escaped = false;
            return Step::Escaped;
        }

        match self.quote {
            Quote::Single => {
                // No escapes inside single quotes.
                if ch == '\'' {
                    self.quote = Quote::None;
                    Step::Close(Quote::Single)
                } else {
                    Step::Quoted(Quote::Single)
                }
            }
            Quote::AnsiC => match ch {
                '\\' if next.is_some() => {
                    self.escaped = true;
                    Step::Escape
                }
                '\'' => {
                    self.quote = Quote::None;
                    Step::Close(Quote::AnsiC)
                }
                _ => Step::Quoted(Quote::AnsiC),
            },
            Quote::Double => match ch {
                '\\' if matches!(next, Some('"' | '\\' | '$' | '`')) => {
                    self.escaped = true;
                    Step::Escape
                }
                '"' => {
                    self.quote = Quote::None;
                    Step::Close(Quote::Double)
                }
                _ => Step::Quoted(Quote::Double),
            },
            Quote::None => match ch {
                '\\' if next.is_some() => {
                    self.escaped = true;
                    Step::Escape
                }
                '$' if next == Some('\'') => {
                    self.ansi_c_open = true;
                    Step::Open(Quote::AnsiC)
                }
                '\'' if self.ansi_c_open => {
                    self.ansi_c_open = false;
                    self.quote = Quote::AnsiC;
                    Step::Open(Quote::AnsiC)
                }
                '\'' => {
                    self.quote = Quote::Single;
                    Step::Open(Quote::Single)
                }
                '"' => {
                    self.quote = Quote::Double;
                    Step::Open(Quote::Double)
                }
                _ => Step::Plain,
            },
        }
    }
}

/// A word produced by [`tokenize_spans`], with its byte range in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    /// The word text, quotes retained.
    pub text: String,
    /// Byte range of the word in the original command string.
    pub span: Range<usize>,
}

impl Word {
    /// The word with quote delimiters removed.
    pub fn unquoted(&self) -> String {
        strip_quotes(&self.text)
    }
}

/// Split a command into shell words.
///
/// ```rust
/// use hookguard_core::shell::tokenize;
///
/// assert_eq!(tokenize("git commit -m 'a b'"), vec!["git", "commit", "-m", "'a b'"]);
/// assert_eq!(tokenize(r"touch a\ b"), vec!["touch", "a b"]);
/// ```
#[instrument(level = Level::TRACE)]
pub fn tokenize(command: &str) -> Vec<String> {
    tokenize_spans(command).into_iter().map(|w| w.text).collect()
}

/// Split a command into shell words, keeping each word's byte range.
///
/// The spans let callers slice "everything from word N onwards" out of the
/// original string without re-joining tokens.
#[instrument(level = Level::TRACE)]
pub fn tokenize_spans(command: &str) -> Vec<Word> {
    let mut words = Vec::new();
    let mut state = QuoteState::new();
    let mut current: Option<(usize, String)> = None;

    let mut chars = command.char_indices().peekable();
    while let Some((pos, ch)) = chars.next() {
        let next = chars.peek().map(|&(_, c)| c);
        let quote_before = state.quote();
        let step = state.step(ch, next);

        if step == Step::Plain && ch.is_whitespace() {
            if let Some((start, text)) = current.take() {
                words.push(Word {
                    text,
                    span: start..pos,
                });
            }
            continue;
        }

        let (_, text) = current.get_or_insert_with(|| (pos, String::new()));
        match step {
            Step::Escape => {
                // An escaped quote or space is emitted without its backslash.
                if !(quote_before == Quote::None && escapes_delimiter(next)) {
                    text.push(ch);
                }
            }
            _ => text.push(ch),
        }
    }

    if let Some((start, text)) = current {
        words.push(Word {
            text,
            span: start..command.len(),
        });
    }

    words
}

fn escapes_delimiter(next: Option<char>) -> bool {
    matches!(next, Some(c) if c == '\'' || c == '"' || c.is_whitespace())
}

/// Remove quote delimiters from a word.
///
/// Backslash-escaped double quotes inside a double-quoted span lose their
/// backslash, as do `\'` and `\\` inside `$'...'`. Every other character is
/// kept as written.
#[instrument(level = Level::TRACE)]
pub fn strip_quotes(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut state = QuoteState::new();
    let mut chars = word.chars().peekable();

    while let Some(ch) = chars.next() {
        let next = chars.peek().copied();
        let quote_before = state.quote();
        match state.step(ch, next) {
            Step::Open(_) | Step::Close(_) => {}
            Step::Escape if quote_before == Quote::Double => {}
            Step::Escape if quote_before == Quote::AnsiC && matches!(next, Some('\'' | '\\')) => {}
            _ => out.push(ch),
        }
    }

    out
}

/// Returns true if the word contains a quoted span.
pub fn is_quoted(word: &str) -> bool {
    let mut state = QuoteState::new();
    let mut chars = word.chars().peekable();
    while let Some(ch) = chars.next() {
        let next = chars.peek().copied();
        if matches!(state.step(ch, next), Step::Open(_)) {
            return true;
        }
    }
    false
}

/// The last path component of a command word (`/usr/bin/sed` → `sed`).
pub fn command_basename(word: &str) -> &str {
    word.rsplit('/').next().unwrap_or(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tokenize_plain_words() {
        assert_eq!(tokenize("ls -la  /tmp"), vec!["ls", "-la", "/tmp"]);
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_tokenize_keeps_quotes() {
        assert_eq!(
            tokenize(r#"echo "hello world" 'a && b'"#),
            vec!["echo", "\"hello world\"", "'a && b'"]
        );
    }

    #[test]
    fn test_tokenize_adjacent_quoted_spans_form_one_word() {
        assert_eq!(tokenize(r#"echo foo"bar baz"'q'"#), vec!["echo", "foo\"bar baz\"'q'"]);
    }

    #[test]
    fn test_tokenize_escaped_space_and_quote() {
        assert_eq!(tokenize(r"cat my\ file.txt"), vec!["cat", "my file.txt"]);
        assert_eq!(tokenize(r#"echo \"hi"#), vec!["echo", "\"hi"]);
    }

    #[test]
    fn test_tokenize_keeps_other_backslashes() {
        assert_eq!(
            tokenize(r"find . -exec rm {} \;"),
            vec!["find", ".", "-exec", "rm", "{}", r"\;"]
        );
    }

    #[test]
    fn test_tokenize_single_quotes_are_literal() {
        assert_eq!(tokenize(r"echo 'a\ b'"), vec!["echo", r"'a\ b'"]);
    }

    #[test]
    fn test_tokenize_ansi_c_quote_escapes() {
        assert_eq!(
            tokenize(r"echo $'\'' ; rm -rf x"),
            vec!["echo", r"$'\''", ";", "rm", "-rf", "x"]
        );
        assert_eq!(tokenize(r"printf $'a b\n'"), vec!["printf", r"$'a b\n'"]);
        // Only an unquoted `$` opens an ANSI-C span.
        assert_eq!(tokenize(r#"echo "$'x" y"#), vec!["echo", r#""$'x""#, "y"]);
    }

    #[test]
    fn test_strip_ansi_c_quotes() {
        assert_eq!(strip_quotes(r"$'it\'s'"), "it's");
        assert_eq!(strip_quotes(r"$'a\nb'"), r"a\nb");
        assert!(is_quoted(r"$'x'"));
    }

    #[test]
    fn test_tokenize_unterminated_quote() {
        assert_eq!(tokenize("echo 'unterminated and more"), vec![
            "echo",
            "'unterminated and more"
        ]);
        assert_eq!(tokenize("echo \"open"), vec!["echo", "\"open"]);
    }

    #[test]
    fn test_tokenize_spans_slice_original() {
        let cmd = "timeout 30   rm -rf '/tmp/x y'";
        let words = tokenize_spans(cmd);
        assert_eq!(words.len(), 5);
        assert_eq!(&cmd[words[2].span.start..], "rm -rf '/tmp/x y'");
        assert_eq!(&cmd[words[4].span.clone()], "'/tmp/x y'");
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("'a b'"), "a b");
        assert_eq!(strip_quotes("\"*.txt\""), "*.txt");
        assert_eq!(strip_quotes(r#""say \"hi\"""#), "say \"hi\"");
        assert_eq!(strip_quotes("''"), "");
        assert_eq!(strip_quotes("plain"), "plain");
    }

    #[test]
    fn test_is_quoted() {
        assert!(is_quoted("'x'"));
        assert!(is_quoted("a\"b\""));
        assert!(!is_quoted("abc"));
    }

    #[test]
    fn test_command_basename() {
        assert_eq!(command_basename("/usr/bin/sed"), "sed");
        assert_eq!(command_basename("sed"), "sed");
    }

    proptest! {
        #[test]
        fn tokenize_never_panics_and_spans_are_in_bounds(cmd in ".{0,64}") {
            for word in tokenize_spans(&cmd) {
                prop_assert!(word.span.start < word.span.end);
                prop_assert!(word.span.end <= cmd.len());
                prop_assert!(cmd.is_char_boundary(word.span.start));
            }
        }
    }
}
