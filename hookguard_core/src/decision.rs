//! Folding per-unit outcomes into a single allow/deny/ask decision.
//!
//! ```rust
//! use hookguard_core::dangerous::NoDangerousCommands;
//! use hookguard_core::decision::{EvaluationContext, ToolRequest, Verdict, evaluate};
//!
//! let ctx = EvaluationContext::new("/work/proj")
//!     .with_allow(["Bash(ls:*)"])
//!     .with_deny(["Bash(rm:*)"]);
//!
//! let record = evaluate(&ToolRequest::bash("ls -la && rm -rf x"), &ctx, &NoDangerousCommands).unwrap();
//! assert_eq!(record.decision.verdict, Verdict::Deny);
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{Level, debug, info, instrument};

use crate::dangerous::DangerousCommandCheck;
use crate::decompose::decompose;
use crate::pattern::{PatternList, UnitInput, builtin_safe, clean_path, expand_home, is_path_tool};
use crate::risk::{RiskLevel, assess_unit};
use crate::sed::parse_in_place_edit;

/// Everything an evaluation depends on besides the request itself.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub cwd: PathBuf,
    pub home_dir: Option<PathBuf>,
    pub allow: PatternList,
    pub deny: PatternList,
}

impl EvaluationContext {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            ..Self::default()
        }
    }

    pub fn with_home(mut self, home_dir: impl Into<PathBuf>) -> Self {
        self.home_dir = Some(home_dir.into());
        self
    }

    pub fn with_allow<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allow = PatternList::from_strings(patterns);
        self
    }

    pub fn with_deny<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.deny = PatternList::from_strings(patterns);
        self
    }

    pub fn cwd_str(&self) -> Option<&str> {
        self.cwd.to_str().filter(|s| !s.is_empty())
    }

    pub fn home_str(&self) -> Option<&str> {
        self.home_dir.as_deref().and_then(Path::to_str)
    }
}

/// A proposed tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
}

/// Input keys holding the primary input of non-Bash tools, in lookup order.
const PRIMARY_INPUT_KEYS: &[&str] = &["file_path", "path", "notebook_path", "url"];

impl ToolRequest {
    pub fn new(tool_name: impl Into<String>, tool_input: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_input,
        }
    }

    pub fn bash(command: impl Into<String>) -> Self {
        Self::new("Bash", serde_json::json!({ "command": command.into() }))
    }

    pub fn command(&self) -> Option<&str> {
        self.tool_input.get("command").and_then(Value::as_str)
    }

    /// The path (or URL) a non-Bash tool acts on.
    pub fn primary_input(&self) -> Option<&str> {
        PRIMARY_INPUT_KEYS
            .iter()
            .find_map(|key| self.tool_input.get(*key).and_then(Value::as_str))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Deny,
    Ask,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Allow => "allow",
            Verdict::Deny => "deny",
            Verdict::Ask => "ask",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub reason: String,
}

impl Decision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Allow,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Deny,
            reason: reason.into(),
        }
    }

    pub fn ask(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Ask,
            reason: reason.into(),
        }
    }
}

/// Why a unit was resolved the way it was.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitOutcome {
    Denied { pattern: String },
    Allowed { pattern: String },
    BuiltinSafe { rule: String },
    Dangerous { reason: String },
    ManualReview { reason: String },
    NoMatch,
}

impl UnitOutcome {
    pub fn verdict(&self) -> Verdict {
        match self {
            UnitOutcome::Denied { .. } | UnitOutcome::Dangerous { .. } => Verdict::Deny,
            UnitOutcome::ManualReview { .. } | UnitOutcome::NoMatch => Verdict::Ask,
            UnitOutcome::Allowed { .. } | UnitOutcome::BuiltinSafe { .. } => Verdict::Allow,
        }
    }
}

/// The outcome for one atomic command or path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitResult {
    pub unit: String,
    pub outcome: UnitOutcome,
    pub risk: RiskLevel,
}

impl UnitResult {
    /// Human-readable explanation naming the pattern or rule involved.
    pub fn describe(&self) -> String {
        let unit = &self.unit;
        match &self.outcome {
            UnitOutcome::Denied { pattern } => format!("denied by {pattern} (matched \"{unit}\")"),
            UnitOutcome::Allowed { pattern } => format!("allowed by {pattern} (matched \"{unit}\")"),
            UnitOutcome::BuiltinSafe { rule } => format!("built-in safe {rule} command \"{unit}\""),
            UnitOutcome::Dangerous { reason } => format!("dangerous command \"{unit}\": {reason}"),
            UnitOutcome::ManualReview { reason } => {
                format!("\"{unit}\" requires manual review: {reason}")
            }
            UnitOutcome::NoMatch => format!("no allow pattern matches \"{unit}\""),
        }
    }
}

/// The structured result of one evaluation, as handed to the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionRecord {
    pub tool_name: String,
    pub decision: Decision,
    pub units: Vec<UnitResult>,
}

impl DecisionRecord {
    /// The highest risk across all units.
    pub fn max_risk(&self) -> RiskLevel {
        self.units.iter().map(|u| u.risk).max().unwrap_or_default()
    }
}

/// Evaluate a tool request against the context's allow and deny lists.
///
/// Returns `None` when the request has nothing to evaluate (no command for
/// Bash, no path for other tools).
#[instrument(level = Level::TRACE, skip(ctx, checker))]
pub fn evaluate<C>(
    request: &ToolRequest,
    ctx: &EvaluationContext,
    checker: &C,
) -> Option<DecisionRecord>
where
    C: DangerousCommandCheck + ?Sized,
{
    let tool = request.tool_name.as_str();
    let units = if tool == "Bash" {
        let command = request.command()?.trim();
        if command.is_empty() {
            return None;
        }
        evaluate_command(command, ctx, checker)
    } else {
        let input = request.primary_input()?.trim();
        if input.is_empty() {
            return None;
        }
        vec![evaluate_path(tool, input, ctx)]
    };

    let decision = aggregate(&units);
    info!(
        tool,
        verdict = %decision.verdict,
        reason = %decision.reason,
        units = units.len(),
        "evaluated tool request"
    );
    Some(DecisionRecord {
        tool_name: tool.to_string(),
        decision,
        units,
    })
}

fn evaluate_command<C>(command: &str, ctx: &EvaluationContext, checker: &C) -> Vec<UnitResult>
where
    C: DangerousCommandCheck + ?Sized,
{
    let parts = decompose(command);
    let mut units = Vec::with_capacity(parts.len() + 1);

    // Some constructs (fork bombs) only look dangerous before splitting.
    let whole = checker.check(command);
    if whole.is_dangerous && !parts.iter().any(|p| p == command) {
        units.push(UnitResult {
            unit: command.to_string(),
            outcome: UnitOutcome::Dangerous {
                reason: whole.reason.unwrap_or_else(|| "dangerous command".into()),
            },
            risk: RiskLevel::Critical,
        });
    }

    for part in parts {
        let result = evaluate_bash_unit(&part, ctx, checker);
        debug!(unit = %result.unit, outcome = ?result.outcome, risk = %result.risk, "evaluated unit");
        units.push(result);
    }
    units
}

fn evaluate_bash_unit<C>(unit: &str, ctx: &EvaluationContext, checker: &C) -> UnitResult
where
    C: DangerousCommandCheck + ?Sized,
{
    let input = UnitInput::command(unit).with_home(ctx.home_str());
    let risk = assess_unit("Bash", &input, ctx.cwd_str());
    UnitResult {
        unit: unit.to_string(),
        outcome: bash_outcome(unit, &input, ctx, checker),
        risk,
    }
}

fn bash_outcome<C>(
    unit: &str,
    input: &UnitInput<'_>,
    ctx: &EvaluationContext,
    checker: &C,
) -> UnitOutcome
where
    C: DangerousCommandCheck + ?Sized,
{
    let danger = checker.check(unit);
    if danger.is_dangerous {
        return UnitOutcome::Dangerous {
            reason: danger.reason.unwrap_or_else(|| "dangerous command".into()),
        };
    }
    if let Some(pattern) = ctx.deny.find_deny_match("Bash", input) {
        return UnitOutcome::Denied {
            pattern: pattern.source().to_string(),
        };
    }

    let edit = parse_in_place_edit(unit);
    if edit.is_sed_in_place {
        for target in &edit.target_files {
            if let Some(pattern) = match_path("Edit", target, &ctx.deny, ctx) {
                return UnitOutcome::Denied { pattern };
            }
        }
    }

    if danger.requires_manual_review {
        return UnitOutcome::ManualReview {
            reason: danger
                .reason
                .unwrap_or_else(|| "command requires review".into()),
        };
    }
    if let Some(rule) = builtin_safe(unit, ctx.home_str()) {
        return UnitOutcome::BuiltinSafe {
            rule: rule.to_string(),
        };
    }
    if let Some(pattern) = ctx.allow.find_match("Bash", input) {
        return UnitOutcome::Allowed {
            pattern: pattern.source().to_string(),
        };
    }

    // Edit patterns only cover the targets, so the script must not run
    // commands or touch other files.
    if edit.is_confined_to_targets() {
        let mut patterns: Vec<String> = Vec::new();
        for target in &edit.target_files {
            let Some(pattern) = match_path("Edit", target, &ctx.allow, ctx) else {
                return UnitOutcome::NoMatch;
            };
            if !patterns.contains(&pattern) {
                patterns.push(pattern);
            }
        }
        return UnitOutcome::Allowed {
            pattern: patterns.join(", "),
        };
    }

    UnitOutcome::NoMatch
}

fn evaluate_path(tool: &str, path: &str, ctx: &EvaluationContext) -> UnitResult {
    let outcome = if let Some(pattern) = match_path(tool, path, &ctx.deny, ctx) {
        UnitOutcome::Denied { pattern }
    } else if let Some(pattern) = match_path(tool, path, &ctx.allow, ctx) {
        UnitOutcome::Allowed { pattern }
    } else {
        UnitOutcome::NoMatch
    };
    let input = UnitInput::path(path).with_home(ctx.home_str());
    let risk = assess_unit(tool, &input, ctx.cwd_str());
    debug!(tool, path, outcome = ?outcome, risk = %risk, "evaluated path");
    UnitResult {
        unit: path.to_string(),
        outcome,
        risk,
    }
}

/// The first pattern in `list` matching any candidate form of `path`.
fn match_path(tool: &str, path: &str, list: &PatternList, ctx: &EvaluationContext) -> Option<String> {
    let candidates = if is_path_tool(tool) {
        path_candidates(path, &ctx.cwd, ctx.home_str())
    } else {
        vec![path.to_string()]
    };
    candidates.iter().find_map(|candidate| {
        let input = UnitInput::path(candidate).with_home(ctx.home_str());
        list.find_match(tool, &input)
            .map(|p| p.source().to_string())
    })
}

/// The cleaned path, plus its cwd-relative form (absolute paths inside
/// `cwd`) or its absolute form (relative paths). `~` is expanded first and
/// `.`/`..` segments are resolved, so no candidate can climb out of a
/// directory while still looking like it is inside it.
fn path_candidates(path: &str, cwd: &Path, home_dir: Option<&str>) -> Vec<String> {
    let path = expand_home(path.trim(), home_dir);
    let cleaned = clean_path(&path);
    let mut candidates = vec![cleaned.clone()];
    if cwd.as_os_str().is_empty() || path.starts_with('~') {
        return candidates;
    }

    let cwd = clean_path(&cwd.to_string_lossy());
    let extra = if path.starts_with('/') {
        Path::new(&cleaned)
            .strip_prefix(&cwd)
            .ok()
            .map(|rel| rel.to_string_lossy().into_owned())
            .filter(|rel| !rel.is_empty())
    } else {
        Some(clean_path(&format!("{}/{}", cwd.trim_end_matches('/'), path)))
    };
    if let Some(extra) = extra
        && !candidates.contains(&extra)
    {
        candidates.push(extra);
    }
    candidates
}

fn aggregate(units: &[UnitResult]) -> Decision {
    if let Some(unit) = units.iter().find(|u| u.outcome.verdict() == Verdict::Deny) {
        return Decision::deny(unit.describe());
    }
    if let Some(unit) = units.iter().find(|u| u.outcome.verdict() == Verdict::Ask) {
        return Decision::ask(unit.describe());
    }
    let reasons: Vec<String> = units.iter().map(UnitResult::describe).collect();
    Decision::allow(reasons.join("; "))
}
