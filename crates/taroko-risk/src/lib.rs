//! taroko-risk
//!
//! The pre-trade veto pipeline and the go-live eligibility gate.
//!
//! [`RiskGatekeeper`] evaluates an ordered list of checks; the first failing
//! check wins and every refusal names its [`VetoSource`]. Exits bypass the
//! blackout, news, and LLM checks (they reduce risk); emergency flatten
//! bypasses every check. A daily-loss breach is **fatal** — the engine
//! responds by flattening everything, pausing, and notifying.

mod gatekeeper;
mod golive;
mod types;

pub use gatekeeper::{BlackoutWindow, RiskGatekeeper};
pub use golive::{evaluate_golive, GoLiveDecision, GoLiveReport, SimRecord};
pub use types::{CheckKind, RiskDecision, RiskInput, Severity};
