use std::io::{Read, Write};

use hookguard_core::{Decision, ToolRequest, Verdict};
use serde::{Deserialize, Serialize};

/// The hook input received from Claude Code via stdin.
///
/// `tool_name`, `tool_input` and `cwd` drive the evaluation. Payloads for any
/// other `hook_event_name` pass through, and the session fields go to the
/// audit log.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub transcript_path: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub permission_mode: String,
    #[serde(default)]
    pub hook_event_name: String,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
    #[serde(default)]
    pub tool_use_id: String,
}

impl HookInput {
    /// Parse from any reader (for testability)
    pub fn from_reader(reader: impl Read) -> anyhow::Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Parse from stdin (convenience wrapper for production)
    pub fn from_stdin() -> anyhow::Result<Self> {
        Self::from_reader(std::io::stdin().lock())
    }

    /// Returns true unless the payload names an event other than PreToolUse.
    pub fn is_pre_tool_use(&self) -> bool {
        self.hook_event_name.is_empty() || self.hook_event_name == "PreToolUse"
    }

    /// The tool invocation to evaluate.
    pub fn to_request(&self) -> ToolRequest {
        ToolRequest::new(self.tool_name.clone(), self.tool_input.clone())
    }
}

/// Hook-specific output for PreToolUse
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreToolUseOutput {
    pub hook_event_name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision_reason: Option<String>,
}

/// The complete hook output sent to Claude Code via stdout
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput {
    #[serde(rename = "continue")]
    pub should_continue: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<PreToolUseOutput>,
}

impl HookOutput {
    fn with_verdict(verdict: Verdict, reason: Option<String>) -> Self {
        Self {
            should_continue: true,
            hook_specific_output: Some(PreToolUseOutput {
                hook_event_name: "PreToolUse",
                permission_decision: Some(verdict),
                permission_decision_reason: reason,
            }),
        }
    }

    /// Create an "allow" response - bypasses permission system
    pub fn allow(reason: Option<String>) -> Self {
        Self::with_verdict(Verdict::Allow, reason)
    }

    /// Create a "deny" response - prevents tool execution
    pub fn deny(reason: String) -> Self {
        Self::with_verdict(Verdict::Deny, Some(reason))
    }

    /// Create an "ask" response - prompts user for confirmation
    pub fn ask(reason: Option<String>) -> Self {
        Self::with_verdict(Verdict::Ask, reason)
    }

    /// No opinion; Claude Code applies its own permission rules.
    pub fn pass_through() -> Self {
        Self {
            should_continue: true,
            hook_specific_output: None,
        }
    }

    pub fn from_decision(decision: &Decision) -> Self {
        let reason = decision.reason.clone();
        match decision.verdict {
            Verdict::Allow => Self::allow(Some(reason)),
            Verdict::Deny => Self::deny(reason),
            Verdict::Ask => Self::ask(Some(reason)),
        }
    }

    /// Write response to any writer (for testability)
    pub fn write_to(&self, mut writer: impl Write) -> anyhow::Result<()> {
        serde_json::to_writer(&mut writer, self)?;
        writeln!(writer)?;
        Ok(())
    }

    /// Write response to stdout (convenience wrapper for production)
    pub fn write_stdout(&self) -> anyhow::Result<()> {
        self.write_to(std::io::stdout().lock())
    }
}

/// Exit codes for hook responses
pub mod exit_code {
    /// Blocking error - stderr message fed to Claude
    pub const BLOCKING_ERROR: i32 = 2;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_hook_json() -> &'static str {
        r#"{
            "session_id": "test-session",
            "transcript_path": "/tmp/transcript.jsonl",
            "cwd": "/home/user/project",
            "permission_mode": "default",
            "hook_event_name": "PreToolUse",
            "tool_name": "Bash",
            "tool_input": {"command": "git status", "timeout": 120000},
            "tool_use_id": "toolu_01ABC"
        }"#
    }

    fn written(output: &HookOutput) -> serde_json::Value {
        let mut buf = Vec::new();
        output.write_to(&mut buf).unwrap();
        serde_json::from_slice(&buf).unwrap()
    }

    #[test]
    fn test_parse_hook_input() {
        let input = HookInput::from_reader(sample_hook_json().as_bytes()).unwrap();
        assert_eq!(input.session_id, "test-session");
        assert_eq!(input.tool_name, "Bash");
        assert_eq!(input.cwd, "/home/user/project");
        assert_eq!(input.to_request().command(), Some("git status"));
        assert_eq!(input.tool_use_id, "toolu_01ABC");
        assert!(input.is_pre_tool_use());
    }

    #[test]
    fn test_other_events_are_not_pre_tool_use() {
        let input = HookInput::from_reader(
            r#"{"hook_event_name": "PostToolUse", "tool_name": "Bash"}"#.as_bytes(),
        )
        .unwrap();
        assert!(!input.is_pre_tool_use());
        assert!(HookInput::default().is_pre_tool_use());
    }

    #[test]
    fn test_parse_minimal_hook_input() {
        let input = HookInput::from_reader(r#"{"tool_name": "Read"}"#.as_bytes()).unwrap();
        assert_eq!(input.tool_name, "Read");
        assert!(input.tool_input.is_null());
        assert!(input.to_request().primary_input().is_none());
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(HookInput::from_reader("not json".as_bytes()).is_err());
    }

    #[test]
    fn test_output_allow() {
        let json = written(&HookOutput::allow(Some("Safe command".into())));
        assert_eq!(json["continue"], true);
        assert_eq!(json["hookSpecificOutput"]["hookEventName"], "PreToolUse");
        assert_eq!(json["hookSpecificOutput"]["permissionDecision"], "allow");
        assert_eq!(
            json["hookSpecificOutput"]["permissionDecisionReason"],
            "Safe command"
        );
    }

    #[test]
    fn test_output_deny_and_ask() {
        let json = written(&HookOutput::deny("nope".into()));
        assert_eq!(json["hookSpecificOutput"]["permissionDecision"], "deny");

        let json = written(&HookOutput::ask(None));
        assert_eq!(json["hookSpecificOutput"]["permissionDecision"], "ask");
        assert!(json["hookSpecificOutput"].get("permissionDecisionReason").is_none());
    }

    #[test]
    fn test_output_pass_through() {
        assert_eq!(written(&HookOutput::pass_through()), json!({"continue": true}));
    }

    #[test]
    fn test_output_from_decision() {
        let output = HookOutput::from_decision(&Decision::deny("denied by Bash(rm:*)"));
        assert_eq!(output, HookOutput::deny("denied by Bash(rm:*)".into()));
        let output = HookOutput::from_decision(&Decision::ask("no allow pattern matches"));
        assert_eq!(output, HookOutput::ask(Some("no allow pattern matches".into())));
    }
}
