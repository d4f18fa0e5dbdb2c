use std::path::PathBuf;

use anyhow::{Context, Result};
use hookguard_core::{BuiltinDangerousCommands, evaluate};
use tracing::{Level, debug, info, instrument};

use crate::audit::{AuditSource, log_decision};
use crate::cli::HooksCmd;
use crate::hooks::{HookInput, HookOutput};
use crate::settings::{PathResolver, SettingsLoader};

impl HooksCmd {
    #[instrument(level = Level::TRACE, skip(self))]
    pub fn run(&self) -> Result<()> {
        let output = match self {
            Self::PreToolUse => {
                let input = HookInput::from_stdin().context("failed to parse PreToolUse input")?;
                let loader = SettingsLoader::new(PathResolver::new().starting_at(hook_cwd(&input)));
                pre_tool_use(&input, &loader)
            }
        };
        output
            .write_stdout()
            .context("failed to write hook response")
    }
}

/// The directory the tool call was issued from.
fn hook_cwd(input: &HookInput) -> PathBuf {
    if input.cwd.is_empty() {
        std::env::current_dir().unwrap_or_default()
    } else {
        PathBuf::from(&input.cwd)
    }
}

/// Decide a PreToolUse request against the settings `loader` finds.
#[instrument(level = Level::TRACE, skip(input, loader), fields(tool = %input.tool_name))]
pub fn pre_tool_use(input: &HookInput, loader: &SettingsLoader) -> HookOutput {
    if !input.is_pre_tool_use() {
        debug!(event = %input.hook_event_name, "not a PreToolUse event, passing through");
        return HookOutput::pass_through();
    }
    let settings = loader.load();
    let home = loader.resolver().home_dir();
    let ctx = settings.evaluation_context(&hook_cwd(input), home.as_deref());

    let Some(record) = evaluate(&input.to_request(), &ctx, &BuiltinDangerousCommands) else {
        debug!(tool = %input.tool_name, "nothing to evaluate, passing through");
        return HookOutput::pass_through();
    };

    info!(
        tool = %record.tool_name,
        decision = %record.decision.verdict,
        max_risk = %record.max_risk(),
        "hook decision"
    );
    log_decision(
        &settings.audit_config(),
        AuditSource {
            session_id: &input.session_id,
            tool_use_id: &input.tool_use_id,
            permission_mode: &input.permission_mode,
            transcript_path: &input.transcript_path,
            cwd: &input.cwd,
            tool_input: Some(&input.tool_input),
        },
        &record,
    );
    HookOutput::from_decision(&record.decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        home: TempDir,
        project: TempDir,
    }

    impl Fixture {
        fn new(settings: serde_json::Value) -> Self {
            let home = TempDir::new().unwrap();
            let project = TempDir::new().unwrap();
            let claude = project.path().join(".claude");
            std::fs::create_dir_all(&claude).unwrap();
            std::fs::write(claude.join("settings.json"), settings.to_string()).unwrap();
            Self { home, project }
        }

        fn loader(&self) -> SettingsLoader {
            SettingsLoader::new(
                PathResolver::new()
                    .with_home(self.home.path())
                    .with_project(self.project.path())
                    .with_system_settings(self.home.path().join("managed.json")),
            )
        }

        fn input(&self, tool_name: &str, tool_input: serde_json::Value) -> HookInput {
            serde_json::from_value(json!({
                "session_id": "test",
                "cwd": self.project.path(),
                "hook_event_name": "PreToolUse",
                "tool_use_id": "toolu_test",
                "tool_name": tool_name,
                "tool_input": tool_input,
            }))
            .unwrap()
        }

        fn decide(&self, tool_name: &str, tool_input: serde_json::Value) -> serde_json::Value {
            let output = pre_tool_use(&self.input(tool_name, tool_input), &self.loader());
            serde_json::to_value(output).unwrap()
        }
    }

    fn decision(output: &serde_json::Value) -> &str {
        output["hookSpecificOutput"]["permissionDecision"]
            .as_str()
            .unwrap_or("none")
    }

    #[test]
    fn test_allowed_command() {
        let fx = Fixture::new(json!({"permissions": {"allow": ["Bash(git status:*)"]}}));
        let out = fx.decide("Bash", json!({"command": "git status -s"}));
        assert_eq!(out["continue"], true);
        assert_eq!(decision(&out), "allow");
        assert_eq!(out["hookSpecificOutput"]["hookEventName"], "PreToolUse");
    }

    #[test]
    fn test_deny_in_compound_command_wins() {
        let fx = Fixture::new(json!({
            "permissions": {"allow": ["Bash(ls:*)"], "deny": ["Bash(rm:*)"]}
        }));
        let out = fx.decide("Bash", json!({"command": "ls -la && rm -rf x"}));
        assert_eq!(decision(&out), "deny");
        let reason = out["hookSpecificOutput"]["permissionDecisionReason"]
            .as_str()
            .unwrap();
        assert!(reason.contains("Bash(rm:*)"), "{reason}");
    }

    #[test]
    fn test_unmatched_command_asks() {
        let fx = Fixture::new(json!({"permissions": {"allow": ["Bash(git status:*)"]}}));
        let out = fx.decide("Bash", json!({"command": "docker build ."}));
        assert_eq!(decision(&out), "ask");
    }

    #[test]
    fn test_dangerous_command_is_denied_without_patterns() {
        let fx = Fixture::new(json!({"permissions": {"allow": ["Bash"]}}));
        let out = fx.decide("Bash", json!({"command": "rm -rf /"}));
        assert_eq!(decision(&out), "deny");
    }

    #[test]
    fn test_read_deny_pattern() {
        let fx = Fixture::new(json!({
            "permissions": {"allow": ["Read(src/**)"], "deny": ["Read(.env)"]}
        }));
        let env = fx.project.path().join(".env");
        assert_eq!(decision(&fx.decide("Read", json!({"file_path": env}))), "deny");
        assert_eq!(
            decision(&fx.decide("Read", json!({"file_path": "src/lib.rs"}))),
            "allow"
        );
    }

    #[test]
    fn test_nothing_to_evaluate_passes_through() {
        let fx = Fixture::new(json!({}));
        assert_eq!(fx.decide("Bash", json!({})), json!({"continue": true}));
        assert_eq!(fx.decide("Bash", json!({"command": "   "})), json!({"continue": true}));
        assert_eq!(fx.decide("Task", json!({"prompt": "hi"})), json!({"continue": true}));
    }

    #[test]
    fn test_audit_entry_written_when_enabled() {
        let fx = Fixture::new(json!({}));
        let audit_path = fx.home.path().join("audit.jsonl");
        let local = fx.project.path().join(".claude").join("settings.local.json");
        std::fs::write(
            &local,
            json!({"audit": {"enabled": true, "path": audit_path}}).to_string(),
        )
        .unwrap();

        fx.decide("Bash", json!({"command": "make test"}));

        let contents = std::fs::read_to_string(Path::new(&audit_path)).unwrap();
        let entry: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(entry["tool_name"], "Bash");
        assert_eq!(entry["decision"], "ask");
        assert_eq!(entry["session_id"], "test");
        assert_eq!(entry["tool_use_id"], "toolu_test");
    }

    #[test]
    fn test_other_hook_events_pass_through() {
        let fx = Fixture::new(json!({"permissions": {"deny": ["Bash(rm:*)"]}}));
        let mut input = fx.input("Bash", json!({"command": "rm x"}));
        input.hook_event_name = "PostToolUse".into();
        let output = pre_tool_use(&input, &fx.loader());
        assert_eq!(output, HookOutput::pass_through());
    }
}
