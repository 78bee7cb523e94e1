// src/core/risk.rs
use crate::config::RiskConfig;
use crate::types::{RiskStatus, SignalAction, StrategySignal, TradingCycleResult};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use tracing::warn;

pub const REASON_DAILY_LOSS_LIMIT: &str = "daily loss limit exceeded";
pub const REASON_LOSS_STREAK: &str = "consecutive loss limit exceeded";
pub const NOTE_MANUAL_HALT: &str = "manual_halt";

/// Per-day risk state. Reset wholesale on the first cycle of a new trading
/// day in the controller's time zone.
#[derive(Debug, Clone)]
pub struct RiskState {
    pub trading_day: NaiveDate,
    pub starting_equity: Decimal,
    pub realized_pnl: Decimal,
    pub consecutive_losses: u32,
    pub halted: bool,
    pub last_halt_reason: Option<String>,
}

impl RiskState {
    fn new(trading_day: NaiveDate, starting_equity: Decimal) -> Self {
        Self {
            trading_day,
            starting_equity,
            realized_pnl: Decimal::ZERO,
            consecutive_losses: 0,
            halted: false,
            last_halt_reason: None,
        }
    }
}

/// Tracks the daily loss limit and the consecutive-loss constraint. Once
/// halted, a trading day stays halted; only the day rollover clears it.
pub struct RiskController {
    params: RiskConfig,
    timezone: Tz,
    state: Option<RiskState>,
}

impl RiskController {
    pub fn new(params: RiskConfig, timezone: Tz) -> Self {
        Self {
            params,
            timezone,
            state: None,
        }
    }

    /// Rolls the state over when `now` falls on a new local trading day,
    /// snapshotting `current_equity` as the day's starting equity.
    pub fn ensure_trading_day(&mut self, now: DateTime<Utc>, current_equity: Decimal) {
        let trading_day = now.with_timezone(&self.timezone).date_naive();
        if let Some(state) = &self.state {
            if state.trading_day == trading_day {
                return;
            }
        }
        self.state = Some(RiskState::new(trading_day, current_equity));
    }

    /// Checks whether a signal may execute. Returns the block reason when it
    /// must be treated as a forced Hold; the caller must not place an order
    /// (nor apply an execution) for a blocked signal.
    pub fn evaluate_signal(
        &mut self,
        signal: &StrategySignal,
        current_equity: Decimal,
    ) -> Option<String> {
        self.ensure_trading_day(signal.timestamp, current_equity);
        let limit = self.daily_loss_limit();
        let max_losses = self.params.max_consecutive_losses;
        let state = self.state.as_mut()?;
        if state.halted {
            return Some(
                state
                    .last_halt_reason
                    .clone()
                    .unwrap_or_else(|| "trading halted by risk controls".to_string()),
            );
        }
        if signal.action == SignalAction::Hold {
            return None;
        }
        if let Some(limit) = limit {
            if state.realized_pnl <= -limit {
                state.halted = true;
                state.last_halt_reason = Some(REASON_DAILY_LOSS_LIMIT.to_string());
                return state.last_halt_reason.clone();
            }
        }
        if max_losses > 0 && state.consecutive_losses >= max_losses {
            state.halted = true;
            state.last_halt_reason = Some(REASON_LOSS_STREAK.to_string());
            return state.last_halt_reason.clone();
        }
        None
    }

    /// Folds a finished cycle into the day's totals and re-checks the halt
    /// conditions.
    pub fn record_cycle(&mut self, result: &TradingCycleResult, current_equity: Decimal) {
        self.ensure_trading_day(result.signal.timestamp, current_equity);
        let limit = self.daily_loss_limit();
        let max_losses = self.params.max_consecutive_losses;
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if result.pnl != Decimal::ZERO {
            state.realized_pnl += result.pnl;
            if result.pnl < Decimal::ZERO {
                state.consecutive_losses += 1;
            } else {
                state.consecutive_losses = 0;
            }
        }
        if result.notes.as_deref() == Some(NOTE_MANUAL_HALT) {
            state.halted = true;
            state.last_halt_reason = Some(
                result
                    .error
                    .clone()
                    .unwrap_or_else(|| "manual halt requested".to_string()),
            );
            return;
        }
        if let Some(limit) = limit {
            if state.realized_pnl <= -limit {
                if !state.halted {
                    warn!(
                        realized_pnl = %state.realized_pnl,
                        limit = %limit,
                        "daily loss limit breached; halting"
                    );
                }
                state.halted = true;
                state.last_halt_reason = Some(REASON_DAILY_LOSS_LIMIT.to_string());
                return;
            }
        }
        if max_losses > 0 && state.consecutive_losses >= max_losses {
            if !state.halted {
                warn!(
                    losses = state.consecutive_losses,
                    "consecutive loss limit breached; halting"
                );
            }
            state.halted = true;
            state.last_halt_reason = Some(format!(
                "{} consecutive losses reached the limit",
                state.consecutive_losses
            ));
        }
    }

    /// Manual kill switch for the current day.
    pub fn halt(&mut self, reason: impl Into<String>, current_equity: Decimal) {
        self.ensure_trading_day(Utc::now(), current_equity);
        if let Some(state) = self.state.as_mut() {
            state.halted = true;
            state.last_halt_reason = Some(reason.into());
        }
    }

    pub fn is_halted(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.halted)
    }

    pub fn status(&self) -> RiskStatus {
        match &self.state {
            Some(state) => RiskStatus {
                trading_day: Some(state.trading_day),
                starting_equity: state.starting_equity,
                realized_pnl: state.realized_pnl,
                consecutive_losses: state.consecutive_losses,
                halted: state.halted,
                halt_reason: state.last_halt_reason.clone(),
                daily_loss_limit: self.daily_loss_limit(),
            },
            None => RiskStatus {
                trading_day: None,
                starting_equity: Decimal::ZERO,
                realized_pnl: Decimal::ZERO,
                consecutive_losses: 0,
                halted: false,
                halt_reason: None,
                daily_loss_limit: None,
            },
        }
    }

    /// An absolute limit takes precedence over the percentage of starting
    /// equity. Neither configured means no loss-limit halt condition.
    fn daily_loss_limit(&self) -> Option<Decimal> {
        let state = self.state.as_ref()?;
        if let Some(value) = self.params.daily_loss_limit_value {
            if value > Decimal::ZERO {
                return Some(value);
            }
        }
        if self.params.daily_loss_limit_pct > Decimal::ZERO
            && state.starting_equity > Decimal::ZERO
        {
            return Some(state.starting_equity * self.params.daily_loss_limit_pct);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StrategySignal;
    use chrono::TimeZone;
    use chrono_tz::Asia::Seoul;
    use rust_decimal_macros::dec;

    fn controller(params: RiskConfig) -> RiskController {
        RiskController::new(params, Seoul)
    }

    fn buy_signal(at: DateTime<Utc>) -> StrategySignal {
        StrategySignal {
            market: "BTC_KRW".to_string(),
            action: SignalAction::Buy,
            price: dec!(100),
            timestamp: at,
            reason: "test".to_string(),
            confidence: Decimal::ONE,
        }
    }

    fn cycle_with_pnl(pnl: Decimal, at: DateTime<Utc>) -> TradingCycleResult {
        let mut result =
            TradingCycleResult::from_signal(StrategySignal::hold("BTC_KRW", dec!(100), at, "test"));
        result.pnl = pnl;
        result
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap()
    }

    #[test]
    fn loss_limit_halts_and_blocks_next_signal() {
        let params = RiskConfig {
            daily_loss_limit_value: Some(dec!(10)),
            max_consecutive_losses: 1,
            ..RiskConfig::default()
        };
        let mut risk = controller(params);

        risk.record_cycle(&cycle_with_pnl(dec!(-20), noon()), dec!(500000));
        assert!(risk.is_halted());

        let reason = risk
            .evaluate_signal(&buy_signal(noon()), dec!(500000))
            .expect("buy must be blocked after the halt");
        assert_eq!(reason, REASON_DAILY_LOSS_LIMIT);
    }

    #[test]
    fn streak_counts_only_strict_losses() {
        let params = RiskConfig {
            daily_loss_limit_value: None,
            daily_loss_limit_pct: Decimal::ZERO,
            max_consecutive_losses: 3,
            ..RiskConfig::default()
        };
        let mut risk = controller(params);
        let equity = dec!(1000);

        risk.record_cycle(&cycle_with_pnl(dec!(-1), noon()), equity);
        risk.record_cycle(&cycle_with_pnl(Decimal::ZERO, noon()), equity);
        assert_eq!(risk.status().consecutive_losses, 1);

        risk.record_cycle(&cycle_with_pnl(dec!(2), noon()), equity);
        assert_eq!(risk.status().consecutive_losses, 0);

        risk.record_cycle(&cycle_with_pnl(dec!(-1), noon()), equity);
        risk.record_cycle(&cycle_with_pnl(dec!(-1), noon()), equity);
        assert!(!risk.is_halted());
        risk.record_cycle(&cycle_with_pnl(dec!(-1), noon()), equity);
        assert!(risk.is_halted());
        assert!(risk
            .status()
            .halt_reason
            .unwrap()
            .contains("consecutive losses"));
    }

    #[test]
    fn streak_halt_blocks_the_next_signal() {
        let params = RiskConfig {
            daily_loss_limit_value: None,
            daily_loss_limit_pct: Decimal::ZERO,
            max_consecutive_losses: 2,
            ..RiskConfig::default()
        };
        let mut risk = controller(params);
        risk.record_cycle(&cycle_with_pnl(dec!(-1), noon()), dec!(1000));
        risk.record_cycle(&cycle_with_pnl(dec!(-1), noon()), dec!(1000));
        assert!(risk.is_halted());

        let reason = risk
            .evaluate_signal(&buy_signal(noon()), dec!(1000))
            .expect("halted controller must block the buy");
        assert!(reason.contains("consecutive losses"));
    }

    #[test]
    fn hold_signals_skip_the_checks() {
        let params = RiskConfig {
            daily_loss_limit_value: Some(dec!(1)),
            ..RiskConfig::default()
        };
        let mut risk = controller(params);
        let hold = StrategySignal::hold("BTC_KRW", dec!(100), noon(), "test");
        assert!(risk.evaluate_signal(&hold, dec!(1000)).is_none());
    }

    #[test]
    fn manual_halt_note_forces_halt() {
        let mut risk = controller(RiskConfig::default());
        let mut result = cycle_with_pnl(Decimal::ZERO, noon());
        result.notes = Some(NOTE_MANUAL_HALT.to_string());
        result.error = Some("operator stop".to_string());

        risk.record_cycle(&result, dec!(1000));

        assert!(risk.is_halted());
        assert_eq!(risk.status().halt_reason.as_deref(), Some("operator stop"));
    }

    #[test]
    fn day_rollover_resets_state() {
        let params = RiskConfig {
            daily_loss_limit_value: Some(dec!(10)),
            ..RiskConfig::default()
        };
        let mut risk = controller(params);
        risk.record_cycle(&cycle_with_pnl(dec!(-20), noon()), dec!(500000));
        assert!(risk.is_halted());
        assert_eq!(risk.status().starting_equity, dec!(500000));

        let next_day = noon() + chrono::Duration::days(1);
        risk.ensure_trading_day(next_day, dec!(480000));

        let status = risk.status();
        assert!(!status.halted);
        assert_eq!(status.consecutive_losses, 0);
        assert_eq!(status.realized_pnl, Decimal::ZERO);
        assert_eq!(status.starting_equity, dec!(480000));
    }

    #[test]
    fn pct_limit_derives_from_starting_equity() {
        let params = RiskConfig {
            daily_loss_limit_value: None,
            daily_loss_limit_pct: dec!(0.05),
            ..RiskConfig::default()
        };
        let mut risk = controller(params);
        risk.ensure_trading_day(noon(), dec!(1000000));
        assert_eq!(risk.status().daily_loss_limit, Some(dec!(50000.00)));
    }
}
