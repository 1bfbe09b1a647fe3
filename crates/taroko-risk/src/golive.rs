//! Go-live eligibility gate.
//!
//! `/confirmlive` promotes the engine from simulation to live orders only
//! when the simulated record clears every threshold. The evaluation
//! produces a pass/fail decision plus the list of reasons, so the chat
//! reply can say exactly why a request was rejected.

use taroko_config::RiskSettings;

/// The simulated track record the gate evaluates.
#[derive(Debug, Clone, PartialEq)]
pub struct SimRecord {
    pub total_trades: i64,
    pub win_rate_pct: f64,
    /// Historical max drawdown as a positive percent.
    pub max_drawdown_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoLiveDecision {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GoLiveReport {
    pub decision: GoLiveDecision,
    pub reasons: Vec<String>,
}

impl GoLiveReport {
    pub fn passed(&self) -> bool {
        self.decision == GoLiveDecision::Pass
    }
}

/// Evaluate the simulated record against the go-live thresholds.
pub fn evaluate_golive(record: &SimRecord, settings: &RiskSettings) -> GoLiveReport {
    let mut reasons = Vec::new();

    if record.total_trades < settings.golive_min_trades {
        reasons.push(format!(
            "simulated trades below threshold: {} < {}",
            record.total_trades, settings.golive_min_trades
        ));
    }
    if record.win_rate_pct < settings.golive_min_win_rate_pct {
        reasons.push(format!(
            "win rate below threshold: {:.1}% < {:.1}%",
            record.win_rate_pct, settings.golive_min_win_rate_pct
        ));
    }
    if record.max_drawdown_pct > settings.golive_max_drawdown_pct {
        reasons.push(format!(
            "max drawdown above threshold: {:.1}% > {:.1}%",
            record.max_drawdown_pct, settings.golive_max_drawdown_pct
        ));
    }

    let decision = if reasons.is_empty() {
        GoLiveDecision::Pass
    } else {
        GoLiveDecision::Fail
    };

    GoLiveReport { decision, reasons }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RiskSettings {
        RiskSettings::default()
    }

    #[test]
    fn clean_record_passes() {
        let r = evaluate_golive(
            &SimRecord {
                total_trades: 30,
                win_rate_pct: 52.0,
                max_drawdown_pct: 8.0,
            },
            &settings(),
        );
        assert!(r.passed());
        assert!(r.reasons.is_empty());
    }

    #[test]
    fn too_few_trades_fails_with_reason() {
        let r = evaluate_golive(
            &SimRecord {
                total_trades: 5,
                win_rate_pct: 60.0,
                max_drawdown_pct: 5.0,
            },
            &settings(),
        );
        assert!(!r.passed());
        assert_eq!(r.reasons.len(), 1);
        assert!(r.reasons[0].contains("simulated trades"));
    }

    #[test]
    fn every_failing_threshold_is_reported() {
        let r = evaluate_golive(
            &SimRecord {
                total_trades: 3,
                win_rate_pct: 20.0,
                max_drawdown_pct: 40.0,
            },
            &settings(),
        );
        assert_eq!(r.reasons.len(), 3);
    }

    #[test]
    fn thresholds_are_inclusive() {
        let s = settings();
        let r = evaluate_golive(
            &SimRecord {
                total_trades: s.golive_min_trades,
                win_rate_pct: s.golive_min_win_rate_pct,
                max_drawdown_pct: s.golive_max_drawdown_pct,
            },
            &s,
        );
        assert!(r.passed());
    }
}
