//! Dangerous-command detection.
//!
//! Runs before any allow or deny pattern is consulted. A dangerous command is
//! denied outright; a command that needs manual review is escalated to `ask`
//! even when an allow pattern would match it.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{Level, instrument, warn};

use crate::shell::{command_basename, strip_quotes, tokenize};

/// Result of checking one atomic command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DangerCheck {
    pub is_dangerous: bool,
    pub requires_manual_review: bool,
    pub reason: Option<String>,
}

impl DangerCheck {
    pub fn safe() -> Self {
        Self::default()
    }

    pub fn dangerous(reason: impl Into<String>) -> Self {
        Self {
            is_dangerous: true,
            requires_manual_review: false,
            reason: Some(reason.into()),
        }
    }

    pub fn review(reason: impl Into<String>) -> Self {
        Self {
            is_dangerous: false,
            requires_manual_review: true,
            reason: Some(reason.into()),
        }
    }
}

/// Classifies atomic commands as dangerous, review-worthy or neither.
pub trait DangerousCommandCheck {
    fn check(&self, command: &str) -> DangerCheck;
}

/// A checker that never flags anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDangerousCommands;

impl DangerousCommandCheck for NoDangerousCommands {
    fn check(&self, _command: &str) -> DangerCheck {
        DangerCheck::safe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
    Deny,
    Review,
}

struct DangerRule {
    name: &'static str,
    regex: &'static str,
    reason: &'static str,
    severity: Severity,
}

const RULES: &[DangerRule] = &[
    DangerRule {
        name: "mkfs",
        regex: r"(?:^|\s)mkfs(?:\.[a-z0-9]+)?(?:\s|$)",
        reason: "mkfs formats a file system",
        severity: Severity::Deny,
    },
    DangerRule {
        name: "dd-device",
        regex: r"(?:^|\s)dd\s.*\bof=/dev/(?:sd|hd|vd|xvd|nvme|disk|mmcblk|mapper/|md)",
        reason: "dd writing onto a block device",
        severity: Severity::Deny,
    },
    DangerRule {
        name: "redirect-device",
        regex: r">\s*/dev/(?:sd|hd|vd|xvd|nvme|disk|mmcblk|mapper/|md)",
        reason: "redirect onto a block device",
        severity: Severity::Deny,
    },
    DangerRule {
        name: "fork-bomb",
        regex: r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
        reason: "fork bomb",
        severity: Severity::Deny,
    },
    DangerRule {
        name: "chmod-root",
        regex: r"\bch(?:mod|own)\s+(?:\S+\s+)*(?:-[a-zA-Z]*R[a-zA-Z]*|--recursive)\s+(?:\S+\s+)*/(?:\*)?(?:\s|$)",
        reason: "recursive permission change on the root directory",
        severity: Severity::Deny,
    },
    DangerRule {
        name: "git-push-force",
        regex: r"\bgit\s+push\b.*(?:\s--force(?:\s|$)|\s-[a-zA-Z]*f[a-zA-Z]*(?:\s|$)|\s\+\S)",
        reason: "force push can destroy remote history",
        severity: Severity::Review,
    },
    DangerRule {
        name: "git-reset-hard",
        regex: r"\bgit\s+reset\s+(?:\S+\s+)*--hard\b",
        reason: "git reset --hard destroys uncommitted changes",
        severity: Severity::Review,
    },
    DangerRule {
        name: "git-clean-force",
        regex: r"\bgit\s+clean\s+(?:\S+\s+)*-[a-zA-Z]*f",
        reason: "git clean -f removes untracked files",
        severity: Severity::Review,
    },
    DangerRule {
        name: "git-branch-force-delete",
        regex: r"\bgit\s+branch\s+(?:\S+\s+)*-D\b",
        reason: "git branch -D deletes without a merge check",
        severity: Severity::Review,
    },
    DangerRule {
        name: "git-stash-drop",
        regex: r"\bgit\s+stash\s+(?:drop|clear)\b",
        reason: "dropping stashes loses saved changes",
        severity: Severity::Review,
    },
];

static COMPILED_RULES: LazyLock<Vec<(&'static DangerRule, Regex)>> = LazyLock::new(|| {
    RULES
        .iter()
        .filter_map(|rule| match Regex::new(rule.regex) {
            Ok(re) => Some((rule, re)),
            Err(err) => {
                warn!(rule = rule.name, error = %err, "failed to compile danger rule");
                None
            }
        })
        .collect()
});

/// `rm -rf` targets that wipe a root or home directory.
const ROOT_TARGETS: &[&str] = &[
    "/", "/*", "~", "~/", "~/*", "*", ".", "..", "$HOME", "$HOME/", "$HOME/*", "${HOME}",
];

/// The built-in rule set.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinDangerousCommands;

impl DangerousCommandCheck for BuiltinDangerousCommands {
    #[instrument(level = Level::TRACE, skip(self))]
    fn check(&self, command: &str) -> DangerCheck {
        let words: Vec<String> = tokenize(command).iter().map(|w| strip_quotes(w)).collect();
        let Some(first) = words.first().map(|w| command_basename(w)) else {
            return DangerCheck::safe();
        };

        if first == "rm" && is_recursive_force(&words[1..]) {
            if rm_targets(&words[1..]).any(|t| ROOT_TARGETS.contains(&t)) {
                return DangerCheck::dangerous("rm -rf on a root or home directory");
            }
            return DangerCheck::review("rm -rf deletes recursively without confirmation");
        }

        if let Some(script) = inline_script(first, &words[1..]) {
            return self.check(&script);
        }

        let text = rule_text(&words);
        let mut review = None;
        for (rule, re) in COMPILED_RULES.iter() {
            if !re.is_match(&text) {
                continue;
            }
            match rule.severity {
                Severity::Deny => return DangerCheck::dangerous(rule.reason),
                Severity::Review if review.is_none() => review = Some(rule.reason),
                Severity::Review => {}
            }
        }
        if let Some(reason) = review {
            return DangerCheck::review(reason);
        }

        if first == "sudo" {
            return DangerCheck::review("sudo runs with elevated privileges");
        }
        DangerCheck::safe()
    }
}

/// The unquoted words joined by single spaces. Whitespace inside a word
/// becomes `_`, so quoted prose such as a commit message cannot line up with
/// a rule that expects separate command words.
fn rule_text(words: &[String]) -> String {
    words
        .iter()
        .map(|w| w.replace(char::is_whitespace, "_"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// The script run by `sh -c <script>` (and other shells) or `eval <words>`.
fn inline_script(first: &str, args: &[String]) -> Option<String> {
    match first {
        "sh" | "bash" | "zsh" | "dash" | "ksh" => {
            let pos = args.iter().position(|a| a == "-c")?;
            args.get(pos + 1).cloned()
        }
        "eval" if !args.is_empty() => Some(args.join(" ")),
        _ => None,
    }
}

fn is_recursive_force(args: &[String]) -> bool {
    let flags = || {
        args.iter()
            .take_while(|a| *a != "--")
            .filter(|a| a.starts_with('-'))
    };
    let short = |c: char| flags().any(|a| !a.starts_with("--") && a.contains(c));
    let recursive = short('r') || short('R') || flags().any(|a| a == "--recursive");
    let force = short('f') || flags().any(|a| a == "--force");
    recursive && force
}

fn rm_targets(args: &[String]) -> impl Iterator<Item = &str> {
    let mut after_dashes = false;
    args.iter().filter_map(move |arg| {
        if after_dashes {
            return Some(arg.as_str());
        }
        if arg == "--" {
            after_dashes = true;
            return None;
        }
        (!arg.starts_with('-')).then_some(arg.as_str())
    })
}
