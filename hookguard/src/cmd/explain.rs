use anyhow::{Context, Result};
use hookguard_core::{BuiltinDangerousCommands, DecisionRecord, ToolRequest, evaluate};
use serde_json::json;
use tracing::{Level, instrument};

use crate::settings::{PathResolver, SettingsLoader};

/// Canonical tool name and the `tool_input` key its input goes under.
fn tool_field(tool: &str) -> (String, &'static str) {
    match tool.to_lowercase().as_str() {
        "bash" => ("Bash".into(), "command"),
        "read" => ("Read".into(), "file_path"),
        "write" => ("Write".into(), "file_path"),
        "edit" => ("Edit".into(), "file_path"),
        "multiedit" => ("MultiEdit".into(), "file_path"),
        "notebookedit" => ("NotebookEdit".into(), "notebook_path"),
        "glob" => ("Glob".into(), "path"),
        "grep" => ("Grep".into(), "path"),
        "ls" => ("LS".into(), "path"),
        "webfetch" => ("WebFetch".into(), "url"),
        _ => (tool.to_string(), "file_path"),
    }
}

/// Build the request `hookguard explain <tool> <input>` describes.
pub fn request_for(tool: &str, input: &str) -> ToolRequest {
    let (tool_name, field) = tool_field(tool);
    ToolRequest::new(tool_name, json!({ field: input }))
}

/// Explain how a tool invocation would be decided, unit by unit.
#[instrument(level = Level::TRACE)]
pub fn run(tool: &str, input: &str, json_output: bool) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to read the current directory")?;
    let loader = SettingsLoader::new(PathResolver::new().starting_at(&cwd));
    let settings = loader.load();
    let home = loader.resolver().home_dir();
    let ctx = settings.evaluation_context(&cwd, home.as_deref());

    let request = request_for(tool, input);
    let record = evaluate(&request, &ctx, &BuiltinDangerousCommands);

    if json_output {
        let value = match &record {
            Some(record) => serde_json::to_value(record)?,
            None => json!({"tool_name": request.tool_name, "decision": null}),
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print!("{}", render(&request, record.as_ref()));
    }
    Ok(())
}

fn render(request: &ToolRequest, record: Option<&DecisionRecord>) -> String {
    let Some(record) = record else {
        return format!(
            "{}: nothing to evaluate, Claude Code decides\n",
            request.tool_name
        );
    };

    let mut out = format!(
        "{}: {} ({})\n",
        record.tool_name, record.decision.verdict, record.decision.reason
    );
    out.push_str(&format!("max risk: {}\n", record.max_risk()));
    for unit in &record.units {
        out.push_str(&format!(
            "  [{}] {} (risk: {})\n",
            unit.outcome.verdict(),
            unit.describe(),
            unit.risk
        ));
    }
    out
}
