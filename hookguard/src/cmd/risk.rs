use anyhow::{Context, Result};
use hookguard_core::risk::assess_pattern;
use hookguard_core::{EvaluationContext, RiskProfile};
use tracing::{Level, instrument};

use crate::settings::{PathResolver, SettingsLoader};

/// Assess every allow pattern in the context.
pub fn profiles(ctx: &EvaluationContext) -> Vec<RiskProfile> {
    ctx.allow.iter().map(|p| assess_pattern(p, ctx)).collect()
}

/// Score the configured allow patterns and flag those needing review.
#[instrument(level = Level::TRACE)]
pub fn run(json_output: bool) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to read the current directory")?;
    let loader = SettingsLoader::new(PathResolver::new().starting_at(&cwd));
    let settings = loader.load();
    let home = loader.resolver().home_dir();
    let ctx = settings.evaluation_context(&cwd, home.as_deref());

    let profiles = profiles(&ctx);
    if json_output {
        println!("{}", serde_json::to_string_pretty(&profiles)?);
    } else {
        print!("{}", render(&profiles));
    }
    Ok(())
}

fn render(profiles: &[RiskProfile]) -> String {
    if profiles.is_empty() {
        return "No allow patterns configured.\n".to_string();
    }

    let mut out = String::new();
    for profile in profiles {
        let flag = if profile.auto_approve { "ok    " } else { "REVIEW" };
        out.push_str(&format!("{flag} {:<8} {}\n", profile.level, profile.pattern));
        for axis in [&profile.scope, &profile.operation, &profile.target] {
            out.push_str(&format!(
                "         {:?}: {} ({})\n",
                axis.category, axis.level, axis.reason
            ));
        }
    }
    let flagged = profiles.iter().filter(|p| !p.auto_approve).count();
    out.push_str(&format!(
        "{flagged} of {} patterns need review\n",
        profiles.len()
    ));
    out
}
