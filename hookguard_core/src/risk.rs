//! Risk scoring for patterns and evaluated units.
//!
//! A risk is scored on three axes: the **scope** a pattern covers, the
//! **operation** the tool performs, and the sensitivity of the **target**.
//! [`combine`] folds the axes into one [`RiskLevel`]. Levels are
//! informational; they never change a verdict.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{Level, instrument};

use crate::decision::EvaluationContext;
use crate::pattern::{Pattern, PatternKind, UnitInput, is_path_tool};
use crate::shell::{command_basename, strip_quotes, tokenize};

/// Ordered risk levels, lowest first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Minimal => "minimal",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskCategory {
    Target,
    Scope,
    Operation,
}

/// One scored axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub category: RiskCategory,
    pub reason: String,
    /// Whether narrowing the pattern could lower the level.
    pub mitigation_possible: bool,
}

impl RiskAssessment {
    fn new(level: RiskLevel, category: RiskCategory, reason: impl Into<String>) -> Self {
        Self {
            level,
            category,
            reason: reason.into(),
            mitigation_possible: !(level == RiskLevel::Critical && category == RiskCategory::Target),
        }
    }
}

/// All three axes for one pattern, plus the combined level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskProfile {
    pub pattern: String,
    pub scope: RiskAssessment,
    pub operation: RiskAssessment,
    pub target: RiskAssessment,
    pub level: RiskLevel,
    pub auto_approve: bool,
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

const PRIVATE_KEY_EXTENSIONS: &[&str] = &[".key", ".pem", ".pfx", ".p12"];
const SSH_KEY_NAMES: &[&str] = &["id_rsa", "id_dsa", "id_ecdsa", "id_ed25519"];

/// Sensitivity of a path, or of the most sensitive word of a command.
#[instrument(level = Level::TRACE)]
pub fn assess_target(target: &str) -> RiskAssessment {
    tokenize(target)
        .iter()
        .map(|word| assess_path(&strip_quotes(word)))
        .max_by_key(|a| a.level)
        .unwrap_or_else(|| RiskAssessment::new(RiskLevel::Minimal, RiskCategory::Target, "empty target"))
}

fn assess_path(path: &str) -> RiskAssessment {
    let critical = |reason| RiskAssessment::new(RiskLevel::Critical, RiskCategory::Target, reason);
    let basename = command_basename(path.trim_end_matches('/'));

    if SSH_KEY_NAMES.iter().any(|k| basename.starts_with(k)) && !basename.ends_with(".pub") {
        return critical("SSH private key");
    }
    let in_ssh_dir = path.contains(".ssh/") || path.ends_with(".ssh");
    if in_ssh_dir
        && !basename.ends_with(".pub")
        && !matches!(basename, "known_hosts" | "config" | "authorized_keys")
    {
        return critical("SSH key material");
    }
    if path.contains(".gnupg") {
        return critical("GPG keyring");
    }
    if path.contains(".aws/credentials") {
        return critical("AWS credentials");
    }
    if matches!(path, "/etc/shadow" | "/etc/passwd" | "/etc/sudoers") {
        return critical("system account database");
    }
    if PRIVATE_KEY_EXTENSIONS.iter().any(|ext| basename.ends_with(ext)) {
        return critical("private key or certificate bundle");
    }
    if basename.starts_with(".env") {
        return RiskAssessment::new(RiskLevel::High, RiskCategory::Target, "environment secrets file");
    }
    RiskAssessment::new(RiskLevel::Minimal, RiskCategory::Target, "no sensitive target")
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

const SYSTEM_DIRS: &[&str] = &["/etc", "/usr"];
const GLOB_CHARS: &[char] = &['*', '?', '[', '{'];

/// How much of the file system a path glob covers.
#[instrument(level = Level::TRACE)]
pub fn assess_scope(glob: &str, cwd: Option<&str>, home_dir: Option<&str>) -> RiskAssessment {
    let scope = |level, reason| RiskAssessment::new(level, RiskCategory::Scope, reason);
    let glob = glob.trim().trim_start_matches('!');
    let home = home_dir.map(|h| h.trim_end_matches('/')).filter(|h| !h.is_empty());
    let cwd = cwd.map(|c| c.trim_end_matches('/')).filter(|c| !c.is_empty());

    // Relative to home, when the glob is rooted there.
    let under_home = glob
        .strip_prefix("~/")
        .or_else(|| home.and_then(|h| glob.strip_prefix(h)?.strip_prefix('/')));

    if matches!(glob, "/" | "/*" | "/**")
        || SYSTEM_DIRS
            .iter()
            .any(|d| glob == *d || glob.starts_with(&format!("{d}/")))
    {
        return scope(RiskLevel::Critical, "system directory");
    }
    if matches!(glob, "~" | "~/" | "~/*" | "~/**")
        || home.is_some_and(|h| glob == h)
        || matches!(under_home, Some("" | "*" | "**"))
    {
        return scope(RiskLevel::Critical, "unrestricted home directory");
    }
    if matches!(glob, "**" | "**/*" | "*" | "../**" | "../*") {
        return scope(RiskLevel::High, "whole workspace");
    }
    if let Some(rest) = under_home
        && let Some(dir) = rest.strip_suffix("/**")
    {
        let is_cwd = cwd.is_some_and(|c| home.is_some_and(|h| c == format!("{h}/{dir}")));
        if !dir.contains('/') && !dir.contains(GLOB_CHARS) && !is_cwd {
            return scope(RiskLevel::High, "every project in a workspace directory");
        }
    }
    if matches!(glob, "./**" | "./*")
        || cwd.is_some_and(|c| glob == format!("{c}/**"))
        || under_home
            .and_then(|rest| rest.strip_suffix("/**"))
            .is_some_and(|dir| dir.contains('/') && !dir.contains(GLOB_CHARS))
    {
        return scope(RiskLevel::Medium, "whole project");
    }
    if !glob.contains(GLOB_CHARS) {
        return scope(RiskLevel::Minimal, "single path");
    }
    let relative = !glob.starts_with('/') && !glob.starts_with('~') && !glob.starts_with("..");
    if relative || cwd.is_some_and(|c| glob.starts_with(&format!("{c}/"))) {
        return scope(RiskLevel::Low, "wildcard path inside the project");
    }
    scope(RiskLevel::Low, "wildcard path")
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

const READ_ONLY_COMMANDS: &[&str] = &[
    "ls", "cat", "head", "tail", "less", "grep", "rg", "fd", "find", "pwd", "echo", "wc", "which",
    "whoami", "date", "tree", "file", "stat", "du", "df", "diff", "sort", "uniq", "jq", "printenv",
];
const READ_ONLY_GIT: &[&str] = &["status", "log", "diff", "show", "branch", "blame", "remote"];
const BUILD_COMMANDS: &[&str] = &[
    "cargo", "rustc", "npm", "pnpm", "yarn", "bun", "node", "make", "cmake", "go", "pip", "uv",
    "poetry", "python", "python3", "mvn", "gradle", "tsc", "pytest", "jest", "vitest", "dotnet",
];

/// What a pattern lets the tool do.
#[instrument(level = Level::TRACE)]
pub fn assess_operation(pattern: &Pattern) -> RiskAssessment {
    match pattern.kind() {
        PatternKind::Tool(tool) if tool == "Bash" => RiskAssessment::new(
            RiskLevel::High,
            RiskCategory::Operation,
            "unrestricted shell access",
        ),
        PatternKind::BashPrefix(command) | PatternKind::BashExact(command) => {
            assess_command(command)
        }
        _ => assess_tool(pattern.tool()),
    }
}

fn assess_tool(tool: &str) -> RiskAssessment {
    let (level, reason) = match tool {
        "Read" | "Glob" | "LS" | "Grep" => (RiskLevel::Minimal, "read-only tool"),
        "Edit" | "MultiEdit" | "NotebookEdit" => (RiskLevel::Medium, "modifies existing files"),
        "Write" => (RiskLevel::High, "creates or overwrites files"),
        "Bash" => (RiskLevel::High, "arbitrary shell command"),
        _ => (RiskLevel::Medium, "unclassified tool"),
    };
    RiskAssessment::new(level, RiskCategory::Operation, reason)
}

/// Operation risk of a shell command or command prefix.
pub fn assess_command(command: &str) -> RiskAssessment {
    let op = |level, reason| RiskAssessment::new(level, RiskCategory::Operation, reason);
    let words: Vec<String> = tokenize(command).iter().map(|w| strip_quotes(w)).collect();
    let Some(first) = words.first().map(|w| command_basename(w)) else {
        return op(RiskLevel::High, "arbitrary shell command");
    };
    let second = words.get(1).map(String::as_str);

    if first == "rm" && matches!(second, Some("-rf" | "-fr")) {
        return op(RiskLevel::Critical, "recursive forced delete");
    }
    if matches!(first, "sudo" | "dd") || first == "mkfs" || first.starts_with("mkfs.") {
        return op(RiskLevel::Critical, "destructive or privileged command");
    }
    if READ_ONLY_COMMANDS.contains(&first)
        || (first == "git" && second.is_some_and(|s| READ_ONLY_GIT.contains(&s)))
    {
        return op(RiskLevel::Low, "read-only command");
    }
    if BUILD_COMMANDS.contains(&first) {
        return op(RiskLevel::Medium, "build or package command");
    }
    op(RiskLevel::High, "arbitrary shell command")
}

// ---------------------------------------------------------------------------
// Combination
// ---------------------------------------------------------------------------

/// Fold the three axes into one level.
///
/// Any critical axis, or two high axes, is critical. A single high axis, or
/// two medium axes, is high. Never lower than the highest axis except that
/// an all-minimal triple scores `Low`.
#[instrument(level = Level::TRACE)]
pub fn combine(scope: RiskLevel, operation: RiskLevel, target: RiskLevel) -> RiskLevel {
    let levels = [scope, operation, target];
    let count = |level: RiskLevel| levels.iter().filter(|&&l| l == level).count();

    if count(RiskLevel::Critical) > 0 || count(RiskLevel::High) >= 2 {
        RiskLevel::Critical
    } else if count(RiskLevel::High) == 1 || count(RiskLevel::Medium) >= 2 {
        RiskLevel::High
    } else if count(RiskLevel::Medium) == 1 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Only minimal and low risks are approved without review.
pub fn should_auto_approve(level: RiskLevel) -> bool {
    level <= RiskLevel::Low
}

/// Score an allow pattern on every axis.
#[instrument(level = Level::TRACE, skip(ctx))]
pub fn assess_pattern(pattern: &Pattern, ctx: &EvaluationContext) -> RiskProfile {
    let cwd = ctx.cwd_str();
    let home = ctx.home_str();
    let scope_of = |level, reason| RiskAssessment::new(level, RiskCategory::Scope, reason);

    let (scope, target) = match pattern.kind() {
        PatternKind::PathGlob { glob, .. } => (assess_scope(glob, cwd, home), assess_target(glob)),
        PatternKind::Tool(tool) if is_path_tool(tool) => (
            scope_of(RiskLevel::Critical, "every path on the system"),
            assess_target(""),
        ),
        PatternKind::Tool(tool) if tool == "Bash" => {
            (scope_of(RiskLevel::High, "any command"), assess_target(""))
        }
        PatternKind::Tool(_) => (scope_of(RiskLevel::Medium, "every use of the tool"), assess_target("")),
        PatternKind::BashPrefix(prefix) => (
            scope_of(RiskLevel::Low, "commands with a fixed prefix"),
            assess_target(prefix),
        ),
        PatternKind::BashExact(command) => (
            scope_of(RiskLevel::Minimal, "a single command"),
            assess_target(command),
        ),
        PatternKind::Literal { spec, .. } => {
            (scope_of(RiskLevel::Minimal, "a single input"), assess_target(spec))
        }
    };
    let operation = assess_operation(pattern);
    let level = combine(scope.level, operation.level, target.level);

    RiskProfile {
        pattern: pattern.source().to_string(),
        scope,
        operation,
        target,
        level,
        auto_approve: should_auto_approve(level),
    }
}

/// Combined risk of one evaluated unit.
#[instrument(level = Level::TRACE)]
pub fn assess_unit(tool: &str, input: &UnitInput<'_>, cwd: Option<&str>) -> RiskLevel {
    if tool == "Bash" {
        let command = input.command.unwrap_or_default();
        return combine(
            RiskLevel::Minimal,
            assess_command(command).level,
            assess_target(command).level,
        );
    }
    let path = input.path.unwrap_or_default();
    let scope = if is_path_tool(tool) {
        assess_scope(path, cwd, input.home_dir).level
    } else {
        RiskLevel::Minimal
    };
    combine(scope, assess_tool(tool).level, assess_target(path).level)
}

#[cfg(test)]
mod tests {
    use super::*;

    use RiskLevel::*;

    const HOME: Option<&str> = Some("/home/dev");
    const CWD: Option<&str> = Some("/home/dev/code/proj");

    #[test]
    fn test_levels_are_ordered() {
        assert!(Minimal < Low && Low < Medium && Medium < High && High < Critical);
        assert_eq!(serde_json::to_string(&Critical).unwrap(), "\"critical\"");
        assert_eq!(High.to_string(), "high");
    }

    #[test]
    fn test_combine() {
        assert_eq!(combine(Low, Low, Critical), Critical);
        assert_eq!(combine(High, High, Low), Critical);
        assert_eq!(combine(Medium, Medium, Low), High);
        assert_eq!(combine(Low, High, Minimal), High);
        assert_eq!(combine(Minimal, Medium, Low), Medium);
        assert_eq!(combine(Minimal, Minimal, Minimal), Low);
    }

    #[test]
    fn test_combine_never_below_max() {
        let all = [Minimal, Low, Medium, High, Critical];
        for a in all {
            for b in all {
                for c in all {
                    assert!(combine(a, b, c) >= a.max(b).max(c));
                }
            }
        }
    }

    #[test]
    fn test_should_auto_approve() {
        assert!(should_auto_approve(Minimal));
        assert!(should_auto_approve(Low));
        assert!(!should_auto_approve(Medium));
        assert!(!should_auto_approve(Critical));
    }

    #[test]
    fn test_target_secrets() {
        assert_eq!(assess_target("~/.ssh/id_rsa").level, Critical);
        assert_eq!(assess_target("~/.ssh/id_ed25519.pub").level, Minimal);
        assert_eq!(assess_target("/home/dev/.gnupg/secring.gpg").level, Critical);
        assert_eq!(assess_target("~/.aws/credentials").level, Critical);
        assert_eq!(assess_target("/etc/shadow").level, Critical);
        assert_eq!(assess_target("certs/server.pem").level, Critical);
        assert_eq!(assess_target("bundle.p12").level, Critical);
        assert_eq!(assess_target(".env.production").level, High);
        assert_eq!(assess_target("src/main.rs").level, Minimal);
    }

    #[test]
    fn test_target_command_takes_max_word() {
        assert_eq!(assess_target("cat .env").level, High);
        assert_eq!(assess_target("scp ~/.ssh/id_rsa host:").level, Critical);
        assert_eq!(assess_target("ls -la").level, Minimal);
    }

    #[test]
    fn test_scope_critical() {
        assert_eq!(assess_scope("/", CWD, HOME).level, Critical);
        assert_eq!(assess_scope("/**", CWD, HOME).level, Critical);
        assert_eq!(assess_scope("/etc/**", CWD, HOME).level, Critical);
        assert_eq!(assess_scope("/usr/local/bin/*", CWD, HOME).level, Critical);
        assert_eq!(assess_scope("~", CWD, HOME).level, Critical);
        assert_eq!(assess_scope("~/**", CWD, HOME).level, Critical);
        assert_eq!(assess_scope("/home/dev/**", CWD, HOME).level, Critical);
    }

    #[test]
    fn test_scope_high() {
        assert_eq!(assess_scope("**", CWD, HOME).level, High);
        assert_eq!(assess_scope("**/*", CWD, HOME).level, High);
        assert_eq!(assess_scope("*", CWD, HOME).level, High);
        assert_eq!(assess_scope("../**", CWD, HOME).level, High);
        assert_eq!(assess_scope("~/code/**", CWD, HOME).level, High);
    }

    #[test]
    fn test_scope_medium() {
        assert_eq!(assess_scope("./**", CWD, HOME).level, Medium);
        assert_eq!(assess_scope("/home/dev/code/proj/**", CWD, HOME).level, Medium);
        assert_eq!(assess_scope("~/code/proj/**", CWD, HOME).level, Medium);
        assert_eq!(assess_scope("~/code/other/**", CWD, HOME).level, Medium);
    }

    #[test]
    fn test_scope_low_and_minimal() {
        assert_eq!(assess_scope("src/main.rs", CWD, HOME).level, Minimal);
        assert_eq!(assess_scope("/opt/app/config.toml", CWD, HOME).level, Minimal);
        assert_eq!(assess_scope("src/**", CWD, HOME).level, Low);
        assert_eq!(assess_scope("/home/dev/code/proj/src/*.rs", CWD, HOME).level, Low);
        assert_eq!(assess_scope("/opt/**", CWD, HOME).level, Low);
    }

    #[test]
    fn test_operation() {
        let op = |s: &str| assess_operation(&Pattern::parse(s).unwrap()).level;
        assert_eq!(op("Read(**)"), Minimal);
        assert_eq!(op("Grep"), Minimal);
        assert_eq!(op("Edit(src/**)"), Medium);
        assert_eq!(op("Write(src/**)"), High);
        assert_eq!(op("Bash"), High);
        assert_eq!(op("Bash(rm -rf:*)"), Critical);
        assert_eq!(op("Bash(sudo:*)"), Critical);
        assert_eq!(op("Bash(mkfs.ext4:*)"), Critical);
        assert_eq!(op("Bash(git status:*)"), Low);
        assert_eq!(op("Bash(ls:*)"), Low);
        assert_eq!(op("Bash(cargo test:*)"), Medium);
        assert_eq!(op("Bash(curl:*)"), High);
        assert_eq!(op("WebFetch"), Medium);
    }

    #[test]
    fn test_assess_pattern() {
        let ctx = EvaluationContext::new("/home/dev/code/proj").with_home("/home/dev");

        let profile = assess_pattern(&Pattern::parse("Bash(git status:*)").unwrap(), &ctx);
        assert_eq!(profile.level, Low);
        assert!(profile.auto_approve);

        let profile = assess_pattern(&Pattern::parse("Read(src/**)").unwrap(), &ctx);
        assert_eq!(profile.level, Low);
        assert!(profile.auto_approve);

        let profile = assess_pattern(&Pattern::parse("Write(**)").unwrap(), &ctx);
        assert_eq!(profile.level, Critical);
        assert!(!profile.auto_approve);

        let profile = assess_pattern(&Pattern::parse("Read(~/.ssh/**)").unwrap(), &ctx);
        assert_eq!(profile.level, Critical);
        assert_eq!(profile.pattern, "Read(~/.ssh/**)");
    }

    #[test]
    fn test_assess_unit() {
        assert_eq!(assess_unit("Bash", &UnitInput::command("ls -la"), CWD), Low);
        assert_eq!(assess_unit("Bash", &UnitInput::command("cat ~/.ssh/id_rsa"), CWD), Critical);
        assert_eq!(assess_unit("Bash", &UnitInput::command("curl example.com"), CWD), High);
        assert_eq!(
            assess_unit("Read", &UnitInput::path("src/main.rs").with_home(HOME), CWD),
            Low
        );
        assert_eq!(
            assess_unit("Edit", &UnitInput::path(".env").with_home(HOME), CWD),
            High
        );
    }
}
