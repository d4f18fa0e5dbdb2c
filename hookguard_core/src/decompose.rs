//! Compound command decomposition.
//!
//! A command line such as `cd app && timeout 30 npm test | tee log` is
//! reduced to the list of atomic commands it would run:
//!
//! 1. split on `&&`, `||`, `;`, `|`, `|&`, a lone `&` and newlines, using a
//!    quote-aware scan (operators inside quotes or substitutions never split);
//! 2. unwrap known wrappers (`timeout`, `time`, `npx`, `xargs`, `find -exec`,
//!    `sudo`, `env`, ...) so the wrapped command is evaluated too;
//! 3. recurse into `$(...)`, backtick and `<(...)` substitutions.
//!
//! The wrapper line itself is always kept next to what it wraps, so a
//! compound command is only as permitted as its least permitted part.

use tracing::{Level, instrument, trace};

use crate::shell::{Quote, QuoteState, Step, Word, command_basename, tokenize_spans};

/// Maximum nesting depth for substitutions and wrappers.
const MAX_DEPTH: usize = 8;

/// Decompose a command line into its atomic commands.
///
/// The result is never empty: if nothing else is found it holds the trimmed
/// input. The main command of each segment precedes the commands derived from
/// it; duplicates keep their first position.
///
/// ```rust
/// use hookguard_core::decompose::decompose;
///
/// assert_eq!(decompose("ls -la && rm -rf x"), vec!["ls -la", "rm -rf x"]);
/// assert_eq!(decompose("echo 'a && b'"), vec!["echo 'a && b'"]);
/// ```
#[instrument(level = Level::TRACE)]
pub fn decompose(command: &str) -> Vec<String> {
    let mut out = Vec::new();
    collect(command, 0, &mut out);
    if out.is_empty() {
        out.push(command.trim().to_string());
    }
    trace!(units = ?out, "decomposed command");
    out
}

fn collect(command: &str, depth: usize, out: &mut Vec<String>) {
    if depth > MAX_DEPTH {
        push_unique(out, command.trim());
        return;
    }

    for segment in split_operators(command) {
        push_unique(out, &segment);
        expand_wrappers(&segment, depth, out);
        for inner in extract_substitutions(&segment) {
            collect(&inner, depth + 1, out);
        }
    }
}

fn expand_wrappers(command: &str, depth: usize, out: &mut Vec<String>) {
    if depth > MAX_DEPTH {
        return;
    }
    for inner in unwrap_wrapper(command) {
        push_unique(out, &inner);
        expand_wrappers(&inner, depth + 1, out);
    }
}

fn push_unique(out: &mut Vec<String>, unit: &str) {
    if !unit.is_empty() && !out.iter().any(|u| u == unit) {
        out.push(unit.to_string());
    }
}

/// Split a command line on control operators that appear outside quotes and
/// substitutions. Segments are trimmed and empty ones dropped.
#[instrument(level = Level::TRACE)]
pub fn split_operators(command: &str) -> Vec<String> {
    let chars: Vec<(usize, char)> = command.char_indices().collect();
    let mut segments = Vec::new();
    let mut state = QuoteState::new();
    let mut seg_start = 0usize;
    let mut prev: Option<char> = None;

    let mut i = 0;
    while i < chars.len() {
        let (pos, ch) = chars[i];
        let next = chars.get(i + 1).map(|&(_, c)| c);
        let step = state.step(ch, next);

        // Substitution bodies are skipped whole; their quoting is independent
        // of the surrounding text.
        if opens_substitution(step, ch, next) {
            i = matching_paren(&chars, i + 2) + 1;
            prev = Some(')');
            continue;
        }
        if can_substitute(step) && ch == '`' {
            i = closing_backtick(&chars, i + 1) + 1;
            prev = Some('`');
            continue;
        }

        if step == Step::Plain {
            let op_len = operator_len(ch, next, prev);
            if op_len > 0 {
                push_segment(&mut segments, &command[seg_start..pos]);
                i += op_len;
                seg_start = chars.get(i).map_or(command.len(), |&(p, _)| p);
                prev = Some(ch);
                continue;
            }
        }

        prev = Some(ch);
        i += 1;
    }
    if seg_start < command.len() {
        push_segment(&mut segments, &command[seg_start..]);
    }

    segments
}

/// Command substitution happens unquoted and inside double quotes.
fn can_substitute(step: Step) -> bool {
    matches!(step, Step::Plain | Step::Quoted(Quote::Double))
}

/// `$(`, or an unquoted `<(` / `>(` process substitution.
fn opens_substitution(step: Step, ch: char, next: Option<char>) -> bool {
    next == Some('(')
        && ((can_substitute(step) && ch == '$') || (step == Step::Plain && matches!(ch, '<' | '>')))
}

/// Length in chars of the control operator starting at `ch`, or 0.
fn operator_len(ch: char, next: Option<char>, prev: Option<char>) -> usize {
    match (ch, next) {
        ('&', Some('&')) | ('|', Some('|')) | ('|', Some('&')) => 2,
        ('|', _) | (';', _) | ('\n', _) => 1,
        // `>&`, `<&` and `&>` are redirects, not background operators.
        ('&', Some('>')) => 0,
        ('&', _) if matches!(prev, Some('>' | '<')) => 0,
        ('&', _) => 1,
        _ => 0,
    }
}

fn push_segment(segments: &mut Vec<String>, raw: &str) {
    let segment = trim_grouping(raw.trim());
    if !segment.is_empty() {
        segments.push(segment.to_string());
    }
}

/// Strip subshell/group punctuation left over from splitting, e.g. the `(`
/// of `(cd app && make)` or a dangling `}`.
fn trim_grouping(mut segment: &str) -> &str {
    loop {
        let before = segment;
        if let Some(rest) = segment.strip_prefix('(') {
            segment = rest.trim_start();
        } else if let Some(rest) = segment.strip_prefix('{')
            && (rest.is_empty() || rest.starts_with(char::is_whitespace))
        {
            segment = rest.trim_start();
        }
        if segment.ends_with(')') && paren_balance(segment) < 0 {
            segment = segment[..segment.len() - 1].trim_end();
        } else if segment == "}" {
            segment = "";
        } else if let Some(rest) = segment.strip_suffix(" }") {
            segment = rest.trim_end();
        }
        if segment == before {
            return segment;
        }
    }
}

/// Unquoted `(` minus unquoted `)`.
fn paren_balance(s: &str) -> isize {
    let mut state = QuoteState::new();
    let mut balance = 0isize;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        let next = chars.peek().copied();
        if state.step(ch, next) == Step::Plain {
            match ch {
                '(' => balance += 1,
                ')' => balance -= 1,
                _ => {}
            }
        }
    }
    balance
}

/// Inner texts of the top-level `$(...)`, backtick, `<(...)` and `>(...)`
/// substitutions in `command`. Single-quoted text is never substituted. An
/// arithmetic `$((...))` is not a command itself, but substitutions nested in
/// it are still returned.
#[instrument(level = Level::TRACE)]
pub fn extract_substitutions(command: &str) -> Vec<String> {
    let chars: Vec<(usize, char)> = command.char_indices().collect();
    let byte_at = |idx: usize| chars.get(idx).map_or(command.len(), |&(p, _)| p);
    let mut found = Vec::new();
    let mut state = QuoteState::new();

    let mut i = 0;
    while i < chars.len() {
        let (_, ch) = chars[i];
        let next = chars.get(i + 1).map(|&(_, c)| c);
        let step = state.step(ch, next);

        if opens_substitution(step, ch, next) {
            let arithmetic = ch == '$' && chars.get(i + 2).map(|&(_, c)| c) == Some('(');
            let body_end = matching_paren(&chars, i + 2);
            let body = &command[byte_at(i + 2)..byte_at(body_end)];
            if arithmetic {
                found.extend(extract_substitutions(body));
            } else {
                push_inner(&mut found, body);
            }
            i = body_end + 1;
            continue;
        }

        if can_substitute(step) && ch == '`' {
            let body_end = closing_backtick(&chars, i + 1);
            push_inner(&mut found, &command[byte_at(i + 1)..byte_at(body_end)]);
            i = body_end + 1;
            continue;
        }

        i += 1;
    }

    found
}

fn push_inner(found: &mut Vec<String>, inner: &str) {
    let inner = inner.trim();
    if !inner.is_empty() {
        found.push(inner.to_string());
    }
}

/// Index of the unescaped backtick closing a span whose body starts at
/// `start`, or `chars.len()` when it is unterminated.
fn closing_backtick(chars: &[(usize, char)], start: usize) -> usize {
    let mut j = start;
    while j < chars.len() {
        if chars[j].1 == '`' && (j == 0 || chars[j - 1].1 != '\\') {
            return j;
        }
        j += 1;
    }
    chars.len()
}

/// Index of the `)` closing a substitution whose body starts at `start`, or
/// `chars.len()` when it is unterminated.
fn matching_paren(chars: &[(usize, char)], start: usize) -> usize {
    let mut state = QuoteState::new();
    let mut depth = 1usize;
    let mut j = start;
    while j < chars.len() {
        let ch = chars[j].1;
        let next = chars.get(j + 1).map(|&(_, c)| c);
        if state.step(ch, next) == Step::Plain {
            match ch {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return j;
                    }
                }
                _ => {}
            }
        }
        j += 1;
    }
    chars.len()
}

/// The commands a wrapper invocation runs on behalf of the caller.
///
/// Returns an empty list when `command` is not a recognized wrapper.
#[instrument(level = Level::TRACE)]
pub fn unwrap_wrapper(command: &str) -> Vec<String> {
    let words = tokenize_spans(command);
    let Some(first) = words.first() else {
        return Vec::new();
    };

    let mut inner = Vec::new();
    let name = first.unquoted();
    let rest_at = if is_env_assignment(&first.text) {
        Some(skip_assignments(&words, 0))
    } else {
        wrapped_command_index(command_basename(&name), &words)
    };
    if let Some(idx) = rest_at
        && let Some(word) = words.get(idx)
    {
        inner.push(command[word.span.start..].trim().to_string());
    }

    inner.extend(exec_commands(command, &words));
    inner.retain(|c| !c.is_empty() && c != command);
    inner
}

/// Index of the first word of the command a wrapper runs.
fn wrapped_command_index(wrapper: &str, words: &[Word]) -> Option<usize> {
    match wrapper {
        "timeout" => skip_timeout(words),
        "time" => skip_flags(words, 1, &[]),
        "npx" | "pnpx" | "bunx" => skip_flags(words, 1, &["-p", "--package"]),
        "xargs" => skip_flags(words, 1, &["-n", "-I", "-P", "-L", "-d", "-s", "-E", "-a"]),
        "nohup" => Some(1),
        "nice" => skip_flags(words, 1, &["-n"]),
        "env" => skip_flags(words, 1, &["-u", "-C", "-S"]).map(|i| skip_assignments(words, i)),
        "sudo" => skip_flags(
            words,
            1,
            &["-u", "-g", "-h", "-C", "-D", "-p", "-r", "-t", "-U"],
        ),
        "command" => match words.get(1).map(|w| w.text.as_str()) {
            // `command -v foo` looks a command up rather than running it.
            Some("-v" | "-V") => None,
            _ => skip_flags(words, 1, &[]),
        },
        _ => None,
    }
}

/// `timeout [opts] DURATION CMD...`
fn skip_timeout(words: &[Word]) -> Option<usize> {
    let idx = skip_flags(words, 1, &["-s", "-k", "--signal", "--kill-after"])?;
    // The duration itself.
    words.get(idx)?;
    Some(idx + 1)
}

/// Skip `-x` style options starting at `idx`; options in `with_value` also
/// consume the following word. `--` ends the options.
fn skip_flags(words: &[Word], mut idx: usize, with_value: &[&str]) -> Option<usize> {
    while let Some(word) = words.get(idx) {
        let text = word.text.as_str();
        if text == "--" {
            return Some(idx + 1);
        }
        if !text.starts_with('-') || text == "-" {
            return Some(idx);
        }
        idx += if with_value.contains(&text) { 2 } else { 1 };
    }
    None
}

fn skip_assignments(words: &[Word], mut idx: usize) -> usize {
    while words.get(idx).is_some_and(|w| is_env_assignment(&w.text)) {
        idx += 1;
    }
    idx
}

/// `NAME=value` shell variable assignment.
pub(crate) fn is_env_assignment(word: &str) -> bool {
    let Some((name, _)) = word.split_once('=') else {
        return false;
    };
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Commands run through `find -exec` style actions.
fn exec_commands(command: &str, words: &[Word]) -> Vec<String> {
    let mut found = Vec::new();
    let mut i = 0;
    while i < words.len() {
        if matches!(
            words[i].text.as_str(),
            "-exec" | "-execdir" | "-ok" | "-okdir"
        ) {
            let start = i + 1;
            let mut end = start;
            while end < words.len() && !is_exec_terminator(&words[end].text) {
                end += 1;
            }
            if end > start {
                let text = &command[words[start].span.start..words[end - 1].span.end];
                found.push(text.trim().to_string());
            }
            i = end + 1;
            continue;
        }
        i += 1;
    }
    found
}

fn is_exec_terminator(word: &str) -> bool {
    matches!(word, ";" | "\\;" | "';'" | "\";\"" | "+")
}
