use clap::{Parser, Subcommand};

use crate::version::version_long;

#[derive(Parser, Debug)]
#[command(name = "hookguard")]
#[command(version = version_long())]
#[command(about = "Allow, deny or escalate coding-agent tool calls before they run")]
pub struct Cli {
    /// Mirror debug logs to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum HooksCmd {
    /// Handle PreToolUse hook - called before a tool is executed
    #[command(name = "pre-tool-use")]
    PreToolUse,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Claude Code hook handlers
    #[command(subcommand)]
    Hook(HooksCmd),

    /// Show how a tool invocation would be decided
    Explain {
        /// Tool name (e.g. "Bash", "Read", "edit")
        tool: String,
        /// The command for Bash, otherwise the file path or URL
        input: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Score every configured allow pattern for risk
    Risk {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
