//! # hookguard core
//!
//! Decides whether a shell command or tool invocation proposed by a coding
//! agent is allowed, denied, or needs review.
//!
//! ## Overview
//!
//! 1. Compound commands are split into atomic units ([`decompose`]), looking
//!    through wrappers such as `timeout` and `xargs` and into `$(...)`
//!    substitutions.
//! 2. Each unit is checked by a [`DangerousCommandCheck`], then against the
//!    deny list and the allow list ([`pattern`]). `sed -i` targets are
//!    checked against `Edit(...)` patterns ([`sed`]).
//! 3. Every unit is scored for risk ([`risk`]).
//! 4. [`decision::evaluate`] folds the units into one verdict: any deny wins,
//!    any unresolved unit asks, otherwise allow.
//!
//! Evaluation is pure: no I/O, no environment reads, no state between calls.
//!
//! ## Example
//!
//! ```rust
//! use hookguard_core::{BuiltinDangerousCommands, EvaluationContext, ToolRequest, Verdict, evaluate};
//!
//! let ctx = EvaluationContext::new("/work/proj")
//!     .with_home("/home/dev")
//!     .with_allow(["Bash(git status:*)", "Read(src/**)"]);
//!
//! let record = evaluate(&ToolRequest::bash("git status -s"), &ctx, &BuiltinDangerousCommands).unwrap();
//! assert_eq!(record.decision.verdict, Verdict::Allow);
//!
//! let record = evaluate(&ToolRequest::bash("docker build ."), &ctx, &BuiltinDangerousCommands).unwrap();
//! assert_eq!(record.decision.verdict, Verdict::Ask);
//! ```

pub mod dangerous;
pub mod decision;
pub mod decompose;
pub mod error;
pub mod pattern;
pub mod risk;
pub mod sed;
pub mod shell;

pub use dangerous::{BuiltinDangerousCommands, DangerCheck, DangerousCommandCheck, NoDangerousCommands};
pub use decision::{
    Decision, DecisionRecord, EvaluationContext, ToolRequest, UnitOutcome, UnitResult, Verdict,
    evaluate,
};
pub use decompose::decompose;
pub use error::{PatternError, Result};
pub use pattern::{Pattern, PatternKind, PatternList, UnitInput};
pub use risk::{RiskAssessment, RiskCategory, RiskLevel, RiskProfile};
pub use sed::{SedInPlaceParseResult, parse_in_place_edit};
pub use shell::tokenize;
