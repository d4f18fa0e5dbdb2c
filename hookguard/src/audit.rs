//! Structured audit logging for hook decisions.
//!
//! Writes JSON Lines entries to `~/.hookguard/audit.jsonl` (configurable via
//! the `audit` settings key). Each entry records the tool invocation, the
//! decision and the per-unit results.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use hookguard_core::{DecisionRecord, RiskLevel, UnitResult, Verdict};
use serde::Serialize;
use tracing::{Level, debug, instrument, warn};

/// Longest tool-input summary kept in an entry, in bytes.
const SUMMARY_LIMIT: usize = 200;

/// A single audit log entry.
#[derive(Debug, Serialize)]
struct AuditEntry<'a> {
    /// Unix timestamp with millisecond precision (e.g. `1706123456.789`).
    timestamp: String,
    session_id: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    tool_use_id: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    permission_mode: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    transcript_path: &'a str,
    cwd: &'a str,
    tool_name: &'a str,
    /// Summary of the tool input (truncated for large inputs).
    tool_input_summary: String,
    decision: Verdict,
    reason: &'a str,
    max_risk: RiskLevel,
    units: &'a [UnitResult],
}

/// Where audit entries go, resolved from settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditConfig {
    pub enabled: bool,
    /// Path to the audit log file. Defaults to `~/.hookguard/audit.jsonl`.
    pub path: Option<PathBuf>,
}

impl AuditConfig {
    /// Resolve the audit log path.
    pub fn log_path(&self) -> PathBuf {
        if let Some(ref path) = self.path {
            path.clone()
        } else {
            dirs::home_dir()
                .map(|h| h.join(".hookguard").join("audit.jsonl"))
                .unwrap_or_else(|| PathBuf::from("audit.jsonl"))
        }
    }
}

/// Session details from the hook payload that accompany a record.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditSource<'a> {
    pub session_id: &'a str,
    pub tool_use_id: &'a str,
    pub permission_mode: &'a str,
    pub transcript_path: &'a str,
    pub cwd: &'a str,
    pub tool_input: Option<&'a serde_json::Value>,
}

/// Append an audit log entry for a decision when auditing is enabled.
///
/// Failures are logged and otherwise ignored; auditing never blocks a hook.
#[instrument(level = Level::TRACE, skip(config, source, record))]
pub fn log_decision(config: &AuditConfig, source: AuditSource<'_>, record: &DecisionRecord) {
    if !config.enabled {
        return;
    }

    let entry = AuditEntry {
        timestamp: unix_timestamp(),
        session_id: source.session_id,
        tool_use_id: source.tool_use_id,
        permission_mode: source.permission_mode,
        transcript_path: source.transcript_path,
        cwd: source.cwd,
        tool_name: &record.tool_name,
        tool_input_summary: source.tool_input.map(summarize).unwrap_or_default(),
        decision: record.decision.verdict,
        reason: &record.decision.reason,
        max_risk: record.max_risk(),
        units: &record.units,
    };

    let path = config.log_path();
    match append_entry(&path, &entry) {
        Ok(()) => debug!(path = %path.display(), "wrote audit entry"),
        Err(e) => warn!(error = %e, path = %path.display(), "Failed to write audit log entry"),
    }
}

fn summarize(tool_input: &serde_json::Value) -> String {
    let input_str = tool_input.to_string();
    if input_str.len() <= SUMMARY_LIMIT {
        return input_str;
    }
    let truncate_at = input_str
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= SUMMARY_LIMIT)
        .last()
        .unwrap_or(0);
    format!("{}...", &input_str[..truncate_at])
}

fn unix_timestamp() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:03}", duration.as_secs(), duration.subsec_millis())
}

fn append_entry(path: &Path, entry: &AuditEntry) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let json = serde_json::to_string(entry).map_err(std::io::Error::other)?;
    writeln!(file, "{}", json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookguard_core::{BuiltinDangerousCommands, EvaluationContext, ToolRequest, evaluate};
    use serde_json::json;
    use tempfile::TempDir;

    fn record(command: &str) -> DecisionRecord {
        let ctx = EvaluationContext::new("/work").with_allow(["Bash(ls:*)"]);
        evaluate(&ToolRequest::bash(command), &ctx, &BuiltinDangerousCommands).unwrap()
    }

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_log_decision_appends_jsonl() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        let config = AuditConfig {
            enabled: true,
            path: Some(path.clone()),
        };
        let input = json!({"command": "ls -la && docker ps"});
        let source = AuditSource {
            session_id: "s-1",
            tool_use_id: "toolu_1",
            permission_mode: "default",
            cwd: "/work",
            tool_input: Some(&input),
            ..AuditSource::default()
        };

        log_decision(&config, source, &record("ls -la && docker ps"));
        log_decision(&config, source, &record("ls"));

        let entries = read_lines(&path);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["tool_name"], "Bash");
        assert_eq!(entries[0]["session_id"], "s-1");
        assert_eq!(entries[0]["tool_use_id"], "toolu_1");
        assert_eq!(entries[0]["permission_mode"], "default");
        assert!(entries[0].get("transcript_path").is_none());
        assert_eq!(entries[0]["decision"], "ask");
        assert_eq!(entries[0]["units"].as_array().unwrap().len(), 2);
        assert_eq!(entries[0]["units"][0]["outcome"]["kind"], "allowed");
        assert_eq!(entries[1]["decision"], "allow");
        assert!(entries[1]["timestamp"].as_str().unwrap().contains('.'));
    }

    #[test]
    fn test_disabled_config_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let config = AuditConfig {
            enabled: false,
            path: Some(path.clone()),
        };
        log_decision(&config, AuditSource::default(), &record("ls"));
        assert!(!path.exists());
    }

    #[test]
    fn test_unwritable_path_does_not_panic() {
        let dir = TempDir::new().unwrap();
        let config = AuditConfig {
            enabled: true,
            // A directory cannot be opened for appending.
            path: Some(dir.path().to_path_buf()),
        };
        log_decision(&config, AuditSource::default(), &record("ls"));
    }

    #[test]
    fn test_summary_is_truncated() {
        let long = json!({"command": "x".repeat(500)});
        let summary = summarize(&long);
        assert!(summary.ends_with("..."));
        assert!(summary.len() <= SUMMARY_LIMIT + 3);
        assert_eq!(summarize(&json!({"command": "ls"})), r#"{"command":"ls"}"#);
    }

    #[test]
    fn test_default_log_path() {
        let config = AuditConfig::default();
        assert!(config.log_path().ends_with("audit.jsonl"));
    }
}
