use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taroko_schemas::VetoSource;

/// How bad a refusal is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warn,
    Fatal,
}

/// What kind of order the check is gating.
///
/// - `Entry` runs the full pipeline.
/// - `Exit` bypasses blackout, news, and LLM vetoes (risk-reducing).
/// - `Emergency` bypasses everything; the decision is recorded, never
///   enforced (an emergency flatten must not be blockable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Entry,
    Exit,
    Emergency,
}

/// The inputs a single check evaluation needs. Realized-loss figures are
/// computed by the engine from the ledger and the trade table; the
/// gatekeeper itself holds only flags and caches.
#[derive(Debug, Clone)]
pub struct RiskInput {
    pub now: DateTime<Utc>,
    pub symbol: String,
    pub kind: CheckKind,
    /// Realized P&L for the Taipei trade day, micros (losses negative).
    pub daily_realized_micros: i64,
    /// Realized P&L for the rolling week (Monday start), micros.
    pub weekly_realized_micros: i64,
}

/// The outcome of one gatekeeper evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub allow: bool,
    /// The failing check, when refused.
    pub source: Option<VetoSource>,
    pub reason: String,
    pub severity: Severity,
}

impl RiskDecision {
    pub fn allowed() -> Self {
        Self {
            allow: true,
            source: None,
            reason: "allowed".to_string(),
            severity: Severity::Info,
        }
    }

    pub fn refused(source: VetoSource, reason: impl Into<String>, severity: Severity) -> Self {
        Self {
            allow: false,
            source: Some(source),
            reason: reason.into(),
            severity,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}
