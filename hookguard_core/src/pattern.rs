//! Permission pattern parsing and matching.
//!
//! ## Pattern Format
//!
//! - `ToolName` - matches every use of a tool
//! - `Bash(prefix:*)` - command starts with the prefix words
//! - `Bash(command)` - exact command
//! - `Read(glob)` (and the other path tools) - gitignore-style path glob
//! - `ToolName(spec)` - exact match of the tool's primary input
//!
//! ```rust
//! use hookguard_core::pattern::{Pattern, UnitInput};
//!
//! let pattern = Pattern::parse("Bash(git status:*)").unwrap();
//! assert!(pattern.matches("Bash", &UnitInput::command("git status --short")));
//! assert!(!pattern.matches("Bash", &UnitInput::command("git statuses")));
//!
//! let pattern = Pattern::parse("Read(src/**)").unwrap();
//! assert!(pattern.matches("Read", &UnitInput::path("src/a/b.ts")));
//! ```

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{Level, instrument, warn};

use crate::decompose::is_env_assignment;
use crate::error::{PatternError, Result};
use crate::shell::{QuoteState, Step, command_basename, strip_quotes, tokenize};

/// Tools whose primary input is a file system path.
pub const PATH_TOOLS: &[&str] = &[
    "Read",
    "Write",
    "Edit",
    "MultiEdit",
    "NotebookEdit",
    "Glob",
    "Grep",
    "LS",
];

/// Returns true if the tool takes a path as its primary input.
pub fn is_path_tool(tool: &str) -> bool {
    PATH_TOOLS.contains(&tool)
}

/// A parsed permission pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatternKind {
    /// Bare tool name; every use of the tool.
    Tool(String),
    /// `Bash(prefix:*)`.
    BashPrefix(String),
    /// `Bash(command)`.
    BashExact(String),
    /// A path tool with a gitignore-style glob.
    PathGlob { tool: String, glob: String },
    /// Any other tool with a spec.
    Literal { tool: String, spec: String },
}

/// A permission pattern, parsed once, with the text it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    source: String,
    kind: PatternKind,
}

/// The input of one unit under evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitInput<'a> {
    /// Shell command (Bash units).
    pub command: Option<&'a str>,
    /// File system path (path tools) or other primary input.
    pub path: Option<&'a str>,
    /// Home directory used for `~` expansion.
    pub home_dir: Option<&'a str>,
}

impl<'a> UnitInput<'a> {
    pub fn command(command: &'a str) -> Self {
        Self {
            command: Some(command),
            ..Self::default()
        }
    }

    pub fn path(path: &'a str) -> Self {
        Self {
            path: Some(path),
            ..Self::default()
        }
    }

    pub fn with_home(mut self, home_dir: Option<&'a str>) -> Self {
        self.home_dir = home_dir;
        self
    }
}

impl Pattern {
    /// Parses a pattern string.
    ///
    /// Fails on empty strings, a missing tool name and unbalanced
    /// parentheses. Path globs are compiled once here to reject globs that
    /// can never match.
    #[instrument(level = Level::TRACE)]
    pub fn parse(s: &str) -> Result<Self> {
        let source = s.trim();
        if source.is_empty() {
            return Err(PatternError::Empty);
        }

        let Some(paren_start) = source.find('(') else {
            if source.contains(')') {
                return Err(PatternError::Malformed(source.to_string()));
            }
            return Ok(Self {
                source: source.to_string(),
                kind: PatternKind::Tool(source.to_string()),
            });
        };

        if !source.ends_with(')') {
            return Err(PatternError::Malformed(source.to_string()));
        }
        let tool = source[..paren_start].trim();
        if tool.is_empty() {
            return Err(PatternError::MissingTool(source.to_string()));
        }
        let spec = &source[paren_start + 1..source.len() - 1];
        if !parens_balanced(spec) {
            return Err(PatternError::Malformed(source.to_string()));
        }

        let spec = spec.trim();
        let kind = if spec.is_empty() {
            PatternKind::Tool(tool.to_string())
        } else if tool == "Bash" {
            match spec.strip_suffix(":*") {
                Some(prefix) if prefix.trim().is_empty() => PatternKind::Tool(tool.to_string()),
                Some(prefix) => PatternKind::BashPrefix(prefix.trim().to_string()),
                None => PatternKind::BashExact(spec.to_string()),
            }
        } else if is_path_tool(tool) {
            compile_glob(spec.strip_prefix('!').unwrap_or(spec), None)?;
            PatternKind::PathGlob {
                tool: tool.to_string(),
                glob: spec.to_string(),
            }
        } else {
            PatternKind::Literal {
                tool: tool.to_string(),
                spec: spec.to_string(),
            }
        };

        Ok(Self {
            source: source.to_string(),
            kind,
        })
    }

    /// The text this pattern was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn kind(&self) -> &PatternKind {
        &self.kind
    }

    /// The tool this pattern applies to.
    pub fn tool(&self) -> &str {
        match &self.kind {
            PatternKind::Tool(tool) => tool,
            PatternKind::BashPrefix(_) | PatternKind::BashExact(_) => "Bash",
            PatternKind::PathGlob { tool, .. } | PatternKind::Literal { tool, .. } => tool,
        }
    }

    /// The text inside the parentheses, if any.
    pub fn spec(&self) -> Option<&str> {
        match &self.kind {
            PatternKind::Tool(_) => None,
            PatternKind::BashPrefix(spec)
            | PatternKind::BashExact(spec)
            | PatternKind::PathGlob { glob: spec, .. }
            | PatternKind::Literal { spec, .. } => Some(spec),
        }
    }

    /// Returns true if this pattern matches the given tool and input.
    #[instrument(level = Level::TRACE, skip(self), fields(pattern = %self.source))]
    pub fn matches(&self, tool: &str, input: &UnitInput<'_>) -> bool {
        match &self.kind {
            PatternKind::Tool(name) => tool_name_matches(name, tool),
            PatternKind::BashPrefix(prefix) => {
                tool == "Bash" && input.command.is_some_and(|c| prefix_matches(prefix, c))
            }
            PatternKind::BashExact(command) => {
                tool == "Bash" && input.command.is_some_and(|c| c.trim() == command)
            }
            PatternKind::PathGlob { tool: name, glob } => {
                name == tool
                    && input
                        .path
                        .is_some_and(|p| glob_matches(glob, p, input.home_dir))
            }
            PatternKind::Literal { tool: name, spec } => {
                name == tool && input.path.or(input.command).is_some_and(|v| v == spec)
            }
        }
    }

    /// Like [`Pattern::matches`], but a Bash prefix also matches when its
    /// words appear anywhere in the command, as in `ssh host rm -rf x` for
    /// `Bash(rm:*)`. Used for deny lists only.
    pub fn matches_denied(&self, tool: &str, input: &UnitInput<'_>) -> bool {
        if let PatternKind::BashPrefix(prefix) = &self.kind
            && tool == "Bash"
            && input.command.is_some_and(|c| prefix_within(prefix, c))
        {
            return true;
        }
        self.matches(tool, input)
    }
}

impl FromStr for Pattern {
    type Err = PatternError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Pattern::parse(s)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for Pattern {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Pattern::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// String-level convenience: parse `pattern` and match it. Invalid patterns
/// never match.
#[instrument(level = Level::TRACE)]
pub fn matches(pattern: &str, tool: &str, input: &UnitInput<'_>) -> bool {
    Pattern::parse(pattern).is_ok_and(|p| p.matches(tool, input))
}

/// An ordered list of parsed patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternList {
    patterns: Vec<Pattern>,
}

impl PatternList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse each string, skipping empty and invalid entries.
    #[instrument(level = Level::TRACE, skip(items))]
    pub fn from_strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        for item in items {
            let item = item.as_ref();
            if item.trim().is_empty() {
                continue;
            }
            match Pattern::parse(item) {
                Ok(pattern) => list.push(pattern),
                Err(err) => warn!(pattern = item, error = %err, "skipping invalid permission pattern"),
            }
        }
        list
    }

    /// Appends a pattern unless an identical one is present.
    pub fn push(&mut self, pattern: Pattern) {
        if !self.patterns.contains(&pattern) {
            self.patterns.push(pattern);
        }
    }

    /// The first pattern matching the tool and input.
    #[instrument(level = Level::TRACE, skip(self))]
    pub fn find_match(&self, tool: &str, input: &UnitInput<'_>) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.matches(tool, input))
    }

    /// The first pattern matching under the broader deny rule of
    /// [`Pattern::matches_denied`].
    #[instrument(level = Level::TRACE, skip(self))]
    pub fn find_deny_match(&self, tool: &str, input: &UnitInput<'_>) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.matches_denied(tool, input))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.iter()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl FromIterator<Pattern> for PatternList {
    fn from_iter<T: IntoIterator<Item = Pattern>>(iter: T) -> Self {
        let mut list = Self::new();
        for pattern in iter {
            list.push(pattern);
        }
        list
    }
}

fn parens_balanced(s: &str) -> bool {
    let mut depth = 0i32;
    for ch in s.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// `mcp__server` matches every tool of that server.
fn tool_name_matches(name: &str, tool: &str) -> bool {
    if name == tool {
        return true;
    }
    name.starts_with("mcp__")
        && tool
            .strip_prefix(name)
            .is_some_and(|rest| rest.starts_with("__"))
}

// ---------------------------------------------------------------------------
// Bash prefixes
// ---------------------------------------------------------------------------

/// Word-boundary prefix match, looking through transparent wrappers.
fn prefix_matches(prefix: &str, command: &str) -> bool {
    let command = command.trim().trim_start_matches('&').trim_start();
    let prefix_words = tokenize(prefix);
    let words = tokenize(command);
    if prefix_words.is_empty() {
        return false;
    }

    let mut start = 0;
    while start < words.len() {
        if words[start..].starts_with(&prefix_words) {
            return true;
        }
        match transparent_prefix_len(&words[start..]) {
            0 => return false,
            n => start += n,
        }
    }
    false
}

/// The prefix's words appear as consecutive whole words of the command.
fn prefix_within(prefix: &str, command: &str) -> bool {
    let prefix_words: Vec<String> = tokenize(prefix).iter().map(|w| strip_quotes(w)).collect();
    let words: Vec<String> = tokenize(command).iter().map(|w| strip_quotes(w)).collect();
    !prefix_words.is_empty() && words.windows(prefix_words.len()).any(|w| w == prefix_words)
}

/// Number of leading words that only wrap the real command.
fn transparent_prefix_len(words: &[String]) -> usize {
    let Some(first) = words.first() else {
        return 0;
    };
    if is_env_assignment(first) {
        return 1;
    }
    let skip_dashed = |from: usize| {
        from + words[from..]
            .iter()
            .take_while(|w| w.starts_with('-'))
            .count()
    };
    match command_basename(first) {
        "time" | "nohup" | "npx" | "pnpx" | "bunx" | "env" => skip_dashed(1),
        "nice" => match words.get(1).map(String::as_str) {
            Some("-n") => 3.min(words.len()),
            Some(w) if w.starts_with('-') => 2,
            _ => 1,
        },
        "timeout" => {
            let mut i = 1;
            while let Some(word) = words.get(i) {
                if word == "-s" || word == "-k" || word == "--signal" || word == "--kill-after" {
                    i += 2;
                } else if word.starts_with('-') {
                    i += 1;
                } else {
                    break;
                }
            }
            // The duration.
            (i + 1).min(words.len())
        }
        _ => 0,
    }
}

// ---------------------------------------------------------------------------
// Path globs
// ---------------------------------------------------------------------------

/// Gitignore-style glob match of `path`.
///
/// `~` in both the glob and the path expands to `home_dir` when given. `.`
/// and `..` segments in the path are resolved first, so `src/../../etc/x`
/// is matched as `../etc/x` and never as a path under `src`.
#[instrument(level = Level::TRACE)]
pub fn glob_matches(glob: &str, path: &str, home_dir: Option<&str>) -> bool {
    let (negated, glob) = match glob.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, glob),
    };
    let path = clean_path(&expand_home(path.trim(), home_dir));
    let matched = if glob == "**" {
        true
    } else {
        match compile_glob(glob, home_dir) {
            Ok(re) => re.is_match(&path),
            Err(err) => {
                warn!(glob, error = %err, "glob failed to compile");
                false
            }
        }
    };
    matched != negated
}

/// Lexically resolve `.` and `..` segments.
///
/// `..` at the root of an absolute path stays at the root. A relative path
/// keeps the leading `..` segments it cannot resolve, and an unexpanded
/// leading `~` is never popped.
pub fn clean_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&"..") => parts.push(".."),
                Some(&"~") if parts.len() == 1 => parts.push(".."),
                Some(_) => {
                    parts.pop();
                }
                None if absolute => {}
                None => parts.push(".."),
            },
            _ => parts.push(segment),
        }
    }

    let mut cleaned = parts.join("/");
    if absolute {
        cleaned.insert(0, '/');
    } else if cleaned.is_empty() && !path.is_empty() {
        cleaned.push('.');
    }
    if path.ends_with('/') && !cleaned.ends_with('/') && cleaned != "." {
        cleaned.push('/');
    }
    cleaned
}

fn normalize_glob(glob: &str, home_dir: Option<&str>) -> String {
    let glob = expand_home(glob.trim(), home_dir);
    let mut glob = glob.as_str();
    while let Some(rest) = glob.strip_prefix("./") {
        glob = rest;
    }
    glob.to_string()
}

pub(crate) fn expand_home(s: &str, home_dir: Option<&str>) -> String {
    match home_dir {
        Some(home) if s == "~" => home.trim_end_matches('/').to_string(),
        Some(home) => match s.strip_prefix("~/") {
            Some(rest) => format!("{}/{}", home.trim_end_matches('/'), rest),
            None => s.to_string(),
        },
        None => s.to_string(),
    }
}

fn compile_glob(glob: &str, home_dir: Option<&str>) -> Result<Regex> {
    let expanded = normalize_glob(glob, home_dir);
    let (anchored, body) = match expanded.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, expanded.as_str()),
    };

    // Trailing `/` and `/**` both mean "this directory and below".
    let (body, below) = match body.strip_suffix("/**").or_else(|| body.strip_suffix('/')) {
        Some(stem) => (stem, true),
        None => (body, false),
    };

    let core = translate_glob(body);
    let tail = if below { "(?:/.*)?" } else { "" };
    let regex = if anchored {
        if body.is_empty() {
            "^/.*$".to_string()
        } else {
            format!("^/{core}{tail}$")
        }
    } else if body == ".." || body.starts_with("../") {
        // Relative to the directory above, so it only matches from the start.
        format!("^{core}{tail}$")
    } else if below || body.contains('/') || body.contains('.') {
        format!("(?:^|/){core}{tail}$")
    } else {
        // A bare name matches any one segment.
        format!("(?:^|/){core}(?:/|$)")
    };

    Regex::new(&regex).map_err(|err| PatternError::InvalidGlob {
        glob: glob.to_string(),
        reason: err.to_string(),
    })
}

/// Translate glob syntax to a regex fragment.
fn translate_glob(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2);
    let mut braces = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let segment_start = i == 0 || chars[i - 1] == '/';
                if segment_start && chars.get(i + 2) == Some(&'/') {
                    // `**/`: zero or more directories.
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => match chars[i + 1..].iter().position(|&c| c == ']') {
                Some(len) if len > 0 => {
                    out.push('[');
                    for (n, &c) in chars[i + 1..i + 1 + len].iter().enumerate() {
                        match c {
                            '!' if n == 0 => out.push('^'),
                            '\\' | '[' => {
                                out.push('\\');
                                out.push(c);
                            }
                            _ => out.push(c),
                        }
                    }
                    out.push(']');
                    i += len + 2;
                    continue;
                }
                _ => out.push_str(r"\["),
            },
            '{' => {
                braces += 1;
                out.push_str("(?:");
            }
            ',' if braces > 0 => out.push('|'),
            '}' if braces > 0 => {
                braces -= 1;
                out.push(')');
            }
            _ => out.push_str(&regex::escape(ch.encode_utf8(&mut [0u8; 4]))),
        }
        i += 1;
    }

    out
}

// ---------------------------------------------------------------------------
// Built-in safe commands
// ---------------------------------------------------------------------------

/// Absolute roots `find` may never search.
const SYSTEM_ROOTS: &[&str] = &[
    "/etc", "/proc", "/sys", "/dev", "/var/log", "/usr", "/bin", "/sbin",
];

/// Commands that are safe without any allow pattern.
///
/// Returns the name of the rule that applied.
#[instrument(level = Level::TRACE)]
pub fn builtin_safe(command: &str, home_dir: Option<&str>) -> Option<&'static str> {
    if writes_through_redirect(command) {
        return None;
    }
    let words: Vec<String> = tokenize(command.trim())
        .iter()
        .map(|w| strip_quotes(w))
        .collect();
    let first = words.first()?;
    match first.as_str() {
        "sleep" if words.len() > 1 && words[1..].iter().all(|w| is_duration(w)) => Some("sleep"),
        "find" if is_find_safe(&words[1..], home_dir) => Some("find"),
        _ => None,
    }
}

/// Redirect targets that never change a file.
const HARMLESS_TARGETS: &[&str] = &["/dev/null", "/dev/stdout", "/dev/stderr"];

/// Returns true if any unquoted `>` in `command` (`>`, `>>`, `>|`, `N>`,
/// `&>`) sends output somewhere other than a harmless device or another file
/// descriptor (`2>&1`).
fn writes_through_redirect(command: &str) -> bool {
    let mut state = QuoteState::new();
    let mut chars = command.char_indices().peekable();
    while let Some((pos, ch)) = chars.next() {
        let next = chars.peek().map(|&(_, c)| c);
        if state.step(ch, next) != Step::Plain || ch != '>' {
            continue;
        }

        let mut rest = &command[pos + 1..];
        if let Some(r) = rest.strip_prefix(['>', '|']) {
            rest = r;
        }
        if let Some(fd) = rest.strip_prefix('&') {
            let fd_len = fd
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '-')
                .count();
            if fd_len > 0 {
                continue;
            }
            rest = fd;
        }

        let target = tokenize(rest).first().map(|w| strip_quotes(w));
        if !target.is_some_and(|t| HARMLESS_TARGETS.contains(&t.as_str())) {
            return true;
        }
    }
    false
}

fn is_duration(word: &str) -> bool {
    let number = word
        .strip_suffix(['s', 'm', 'h', 'd'])
        .unwrap_or(word);
    !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit() || c == '.')
        && number.parse::<f64>().is_ok()
}

/// Returns true if a `find` invocation (arguments after `find`) only reads.
pub fn is_find_safe(args: &[String], home_dir: Option<&str>) -> bool {
    let mut i = 0;
    while let Some(arg) = args.get(i) {
        match arg.as_str() {
            "-delete" | "-execdir" | "-okdir" | "-fprint" | "-fprint0" | "-fprintf" | "-fls" => {
                return false;
            }
            "-exec" | "-ok" => {
                let end = args[i + 1..]
                    .iter()
                    .position(|a| a == ";" || a == "\\;" || a == "+")
                    .map_or(args.len(), |p| i + 1 + p);
                let exec = &args[i + 1..end];
                match exec.first().map(|w| command_basename(w)) {
                    Some("rm" | "rmdir" | "mv" | "shred" | "unlink") => return false,
                    Some("cp") if exec.iter().any(|a| a.starts_with("/dev/")) => return false,
                    _ => {}
                }
                i = end;
            }
            _ => {}
        }
        i += 1;
    }

    search_roots(args).all(|root| is_safe_root(root, home_dir))
}

/// Leading non-expression arguments of a `find` invocation.
fn search_roots(args: &[String]) -> impl Iterator<Item = &str> {
    args.iter()
        .map(String::as_str)
        .skip_while(|a| matches!(*a, "-H" | "-L" | "-P"))
        .take_while(|a| !a.starts_with('-') && *a != "(" && *a != "!" && *a != "\\(")
}

fn is_safe_root(root: &str, home_dir: Option<&str>) -> bool {
    if root == "~" || root.starts_with("~/") {
        return true;
    }
    if !root.starts_with('/') {
        return true;
    }
    let within = |base: &str| {
        let base = base.trim_end_matches('/');
        root == base || root.starts_with(&format!("{base}/"))
    };
    if SYSTEM_ROOTS.iter().any(|r| within(r)) {
        return false;
    }
    within("/tmp") || home_dir.is_some_and(|home| !home.trim_end_matches('/').is_empty() && within(home))
}
