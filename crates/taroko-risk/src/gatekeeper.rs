use chrono::{DateTime, NaiveDate, Utc};
use taroko_config::RiskSettings;
use taroko_schemas::{f64_to_micros, session, VetoSource};
use tracing::warn;

use crate::types::{CheckKind, RiskDecision, RiskInput, Severity};

/// One earnings-blackout interval for a symbol (inclusive dates).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlackoutWindow {
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// The ordered pre-trade veto pipeline.
///
/// Evaluation order (first refusal wins; every check is logged):
/// 1. Operator pause flag.
/// 2. Earnings blackout for the symbol (cached; TTL-refreshed).
/// 3. Daily realized loss breaker — fatal.
/// 4. Rolling weekly realized loss breaker — pause until next Monday.
/// 5. Cached news veto — entries only.
/// 6. Recent LLM `BLOCK` insight — entries only.
pub struct RiskGatekeeper {
    settings: RiskSettings,
    paused: bool,
    /// Weekly-breaker pause: refuses entries until this Taipei date.
    paused_until: Option<NaiveDate>,
    news_veto: bool,
    /// (symbol, when) of the last LLM BLOCK recommendation.
    llm_block: Option<(String, DateTime<Utc>)>,
    blackouts: Vec<BlackoutWindow>,
    blackouts_refreshed_at: Option<DateTime<Utc>>,
}

impl RiskGatekeeper {
    pub fn new(settings: RiskSettings) -> Self {
        Self {
            settings,
            paused: false,
            paused_until: None,
            news_veto: false,
            llm_block: None,
            blackouts: Vec::new(),
            blackouts_refreshed_at: None,
        }
    }

    // -----------------------------------------------------------------------
    // Flag mutation (command dispatcher / scheduler)
    // -----------------------------------------------------------------------

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        if !paused {
            self.paused_until = None;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_news_veto(&mut self, veto: bool) {
        self.news_veto = veto;
    }

    pub fn note_llm_block(&mut self, symbol: impl Into<String>, at: DateTime<Utc>) {
        self.llm_block = Some((symbol.into(), at));
    }

    /// Replace the blackout cache (called after a DB refresh).
    pub fn set_blackouts(&mut self, windows: Vec<BlackoutWindow>, refreshed_at: DateTime<Utc>) {
        self.blackouts = windows;
        self.blackouts_refreshed_at = Some(refreshed_at);
    }

    /// The cache is refreshed at most every `blackout_refresh_ttl_days`.
    pub fn blackouts_need_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.blackouts_refreshed_at {
            None => true,
            Some(at) => (now - at).num_days() >= self.settings.blackout_refresh_ttl_days,
        }
    }

    pub fn settings(&self) -> &RiskSettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    /// Run the ordered pipeline. Emergency requests are never refused; the
    /// decision still carries the first matching reason for the audit trail.
    pub fn check(&mut self, inp: &RiskInput) -> RiskDecision {
        let decision = self.evaluate(inp);
        if !decision.allow {
            warn!(
                symbol = %inp.symbol,
                source = ?decision.source,
                severity = ?decision.severity,
                "risk veto: {}",
                decision.reason
            );
            if inp.kind == CheckKind::Emergency {
                // Emergency flatten is unblockable; surface the finding only.
                return RiskDecision {
                    allow: true,
                    ..decision
                };
            }
        }
        decision
    }

    fn evaluate(&mut self, inp: &RiskInput) -> RiskDecision {
        let is_entry = inp.kind == CheckKind::Entry;

        // 1) Operator pause. Exits remain allowed — they reduce risk.
        if self.paused && is_entry {
            return RiskDecision::refused(VetoSource::Pause, "engine paused by operator", Severity::Warn);
        }

        // 2) Earnings blackout (entries only).
        if is_entry {
            let today = session::trade_date(inp.now);
            if let Some(w) = self
                .blackouts
                .iter()
                .find(|w| w.symbol == inp.symbol && w.start <= today && today <= w.end)
            {
                return RiskDecision::refused(
                    VetoSource::Blackout,
                    format!("earnings blackout {}..{} for {}", w.start, w.end, w.symbol),
                    Severity::Warn,
                );
            }
        }

        // 3) Daily realized loss breaker — fatal, triggers emergency shutdown.
        let daily_limit_micros = f64_to_micros(self.settings.daily_loss_limit);
        if daily_limit_micros > 0 && inp.daily_realized_micros < -daily_limit_micros {
            return RiskDecision::refused(
                VetoSource::DailyLimit,
                format!(
                    "daily realized loss {} breaches limit {}",
                    inp.daily_realized_micros, -daily_limit_micros
                ),
                Severity::Fatal,
            );
        }

        // 4) Rolling weekly loss breaker — pause until next Monday.
        let weekly_limit_micros = f64_to_micros(self.settings.weekly_loss_limit);
        if weekly_limit_micros > 0 && inp.weekly_realized_micros < -weekly_limit_micros {
            let today = session::trade_date(inp.now);
            let until = self
                .paused_until
                .unwrap_or_else(|| session::next_monday(today));
            self.paused_until = Some(until);
            if is_entry {
                return RiskDecision::refused(
                    VetoSource::WeeklyLimit,
                    format!("weekly realized loss breached; paused until {until}"),
                    Severity::Warn,
                );
            }
        }
        // A previously set weekly pause keeps refusing entries until it lapses.
        if let Some(until) = self.paused_until {
            let today = session::trade_date(inp.now);
            if today >= until {
                self.paused_until = None;
            } else if is_entry {
                return RiskDecision::refused(
                    VetoSource::WeeklyLimit,
                    format!("weekly loss pause active until {until}"),
                    Severity::Warn,
                );
            }
        }

        // 5) Cached news veto — refuses entries, allows exits.
        if is_entry && self.news_veto {
            return RiskDecision::refused(
                VetoSource::News,
                "negative news veto active",
                Severity::Warn,
            );
        }

        // 6) Recent LLM BLOCK on this symbol — entries only.
        if is_entry {
            if let Some((sym, at)) = &self.llm_block {
                let age_min = (inp.now - *at).num_minutes();
                if sym == &inp.symbol && age_min < self.settings.llm_block_window_min {
                    return RiskDecision::refused(
                        VetoSource::Llm,
                        format!("LLM BLOCK on {sym} {age_min} minutes ago"),
                        Severity::Warn,
                    );
                }
            }
        }

        RiskDecision::allowed()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use taroko_schemas::MICROS_SCALE;

    fn now() -> DateTime<Utc> {
        // Tuesday 2025-06-03 10:00 Taipei.
        Utc.with_ymd_and_hms(2025, 6, 3, 2, 0, 0).unwrap()
    }

    fn entry(daily: i64, weekly: i64) -> RiskInput {
        RiskInput {
            now: now(),
            symbol: "2454.TW".to_string(),
            kind: CheckKind::Entry,
            daily_realized_micros: daily,
            weekly_realized_micros: weekly,
        }
    }

    fn gk() -> RiskGatekeeper {
        RiskGatekeeper::new(RiskSettings::default())
    }

    #[test]
    fn clean_state_allows() {
        let mut g = gk();
        let d = g.check(&entry(0, 0));
        assert!(d.allow);
        assert_eq!(d.source, None);
    }

    #[test]
    fn pause_refuses_entries_but_not_exits() {
        let mut g = gk();
        g.set_paused(true);
        assert!(!g.check(&entry(0, 0)).allow);

        let mut exit = entry(0, 0);
        exit.kind = CheckKind::Exit;
        assert!(g.check(&exit).allow);
    }

    #[test]
    fn blackout_refuses_entry_allows_exit() {
        let mut g = gk();
        g.set_blackouts(
            vec![BlackoutWindow {
                symbol: "2454.TW".to_string(),
                start: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2025, 6, 5).unwrap(),
            }],
            now(),
        );
        let d = g.check(&entry(0, 0));
        assert_eq!(d.source, Some(VetoSource::Blackout));

        let mut exit = entry(0, 0);
        exit.kind = CheckKind::Exit;
        assert!(g.check(&exit).allow);
    }

    #[test]
    fn blackout_for_other_symbol_is_ignored() {
        let mut g = gk();
        g.set_blackouts(
            vec![BlackoutWindow {
                symbol: "2330.TW".to_string(),
                start: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2025, 6, 5).unwrap(),
            }],
            now(),
        );
        assert!(g.check(&entry(0, 0)).allow);
    }

    #[test]
    fn daily_breach_is_fatal_and_preempts_signal() {
        let mut g = gk();
        // default limit 4500 → -5000 breaches
        let d = g.check(&entry(-5_000 * MICROS_SCALE, -5_000 * MICROS_SCALE));
        assert!(!d.allow);
        assert_eq!(d.source, Some(VetoSource::DailyLimit));
        assert!(d.is_fatal());
    }

    #[test]
    fn daily_exactly_at_limit_is_not_breached() {
        let mut g = gk();
        let d = g.check(&entry(-4_500 * MICROS_SCALE, 0));
        assert!(d.allow);
    }

    #[test]
    fn weekly_breach_pauses_until_next_monday() {
        let mut g = gk();
        let d = g.check(&entry(0, -13_000 * MICROS_SCALE));
        assert!(!d.allow);
        assert_eq!(d.source, Some(VetoSource::WeeklyLimit));
        assert_eq!(d.severity, Severity::Warn);

        // Still refused later in the week even if the loss figure recovers.
        let d2 = g.check(&entry(0, 0));
        assert_eq!(d2.source, Some(VetoSource::WeeklyLimit));

        // The following Monday the pause lapses.
        let mut monday = entry(0, 0);
        monday.now = Utc.with_ymd_and_hms(2025, 6, 9, 2, 0, 0).unwrap();
        assert!(g.check(&monday).allow);
    }

    #[test]
    fn daily_preempts_weekly_and_news() {
        let mut g = gk();
        g.set_news_veto(true);
        let d = g.check(&entry(-9_999 * MICROS_SCALE, -99_999 * MICROS_SCALE));
        assert_eq!(d.source, Some(VetoSource::DailyLimit));
    }

    #[test]
    fn news_veto_blocks_entries_only() {
        let mut g = gk();
        g.set_news_veto(true);
        assert_eq!(g.check(&entry(0, 0)).source, Some(VetoSource::News));

        let mut exit = entry(0, 0);
        exit.kind = CheckKind::Exit;
        assert!(g.check(&exit).allow);
    }

    #[test]
    fn recent_llm_block_vetoes_entry_then_ages_out() {
        let mut g = gk();
        g.note_llm_block("2454.TW", now() - chrono::Duration::minutes(10));
        assert_eq!(g.check(&entry(0, 0)).source, Some(VetoSource::Llm));

        g.note_llm_block("2454.TW", now() - chrono::Duration::minutes(31));
        assert!(g.check(&entry(0, 0)).allow);
    }

    #[test]
    fn llm_block_on_other_symbol_is_ignored() {
        let mut g = gk();
        g.note_llm_block("2330.TW", now());
        assert!(g.check(&entry(0, 0)).allow);
    }

    #[test]
    fn emergency_is_never_refused() {
        let mut g = gk();
        g.set_paused(true);
        g.set_news_veto(true);
        let mut em = entry(-9_999 * MICROS_SCALE, 0);
        em.kind = CheckKind::Emergency;
        let d = g.check(&em);
        assert!(d.allow);
        // The finding is still surfaced for the audit trail.
        assert_eq!(d.source, Some(VetoSource::DailyLimit));
    }

    #[test]
    fn blackout_refresh_ttl() {
        let mut g = gk();
        assert!(g.blackouts_need_refresh(now()));
        g.set_blackouts(vec![], now());
        assert!(!g.blackouts_need_refresh(now() + chrono::Duration::days(6)));
        assert!(g.blackouts_need_refresh(now() + chrono::Duration::days(7)));
    }
}
