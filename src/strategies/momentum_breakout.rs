// src/strategies/momentum_breakout.rs
use crate::config::StrategyConfig;
use crate::strategies::traits::Strategy;
use crate::types::{Candle, Position, SignalAction, StrategySignal};
use anyhow::{ensure, Result};
use rust_decimal::Decimal;

pub const REASON_INSUFFICIENT_DATA: &str = "insufficient data";
pub const REASON_COOLDOWN: &str = "cooldown active";
pub const REASON_POST_EXIT_COOLDOWN: &str = "post-exit cooldown";
pub const REASON_NO_BREAKOUT: &str = "breakout condition not met";
pub const REASON_TAKE_PROFIT: &str = "take-profit reached";
pub const REASON_STOP_LOSS: &str = "stop-loss triggered";
pub const REASON_TREND_BROKEN: &str = "trend broken";
pub const REASON_HOLDING: &str = "holding position";

/// Enters when the close clears the lookback high with volume confirmation,
/// exits on take-profit, stop-loss or a trailing stop.
pub struct MomentumBreakoutStrategy {
    lookback: usize,
    volume_window: usize,
    breakout_buffer: Decimal,
    volume_multiplier: Decimal,
    stop_loss_pct: Decimal,
    take_profit_pct: Decimal,
    trailing_stop_pct: Decimal,
    cooldown_bars: usize,
    last_buy_bar: Option<usize>,
    last_sell_bar: Option<usize>,
}

impl MomentumBreakoutStrategy {
    pub fn new(config: StrategyConfig) -> Result<Self> {
        ensure!(config.lookback >= 3, "lookback must be at least 3");
        ensure!(config.volume_window >= 1, "volume_window must be at least 1");
        Ok(Self {
            lookback: config.lookback,
            volume_window: config.volume_window,
            breakout_buffer: config.breakout_buffer,
            volume_multiplier: config.volume_multiplier,
            stop_loss_pct: config.stop_loss_pct,
            take_profit_pct: config.take_profit_pct,
            trailing_stop_pct: config.trailing_stop_pct,
            cooldown_bars: config.cooldown_bars,
            last_buy_bar: None,
            last_sell_bar: None,
        })
    }

    fn in_cooldown(&self, last_bar: Option<usize>, bar_index: usize) -> bool {
        match last_bar {
            Some(bar) => bar_index.saturating_sub(bar) <= self.cooldown_bars,
            None => false,
        }
    }

    fn average_volume(&self, candles: &[Candle]) -> Decimal {
        let start = candles.len().saturating_sub(self.volume_window);
        let window = &candles[start..];
        if window.is_empty() {
            return Decimal::ZERO;
        }
        let total: Decimal = window.iter().map(|candle| candle.volume).sum();
        total / Decimal::from(window.len())
    }

    fn compute_confidence(&self, price: Decimal, threshold: Decimal) -> Decimal {
        if threshold <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        if self.breakout_buffer <= Decimal::ZERO {
            return Decimal::ONE;
        }
        let diff = price - threshold;
        if diff <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let scaled = diff / (threshold * self.breakout_buffer);
        scaled.min(Decimal::ONE)
    }

    fn evaluate_entry(&mut self, candles: &[Candle]) -> StrategySignal {
        let latest = &candles[candles.len() - 1];
        let bar_index = candles.len();
        if self.in_cooldown(self.last_buy_bar, bar_index) {
            return StrategySignal::hold(
                latest.market.clone(),
                latest.close,
                latest.timestamp,
                REASON_COOLDOWN,
            );
        }
        if self.in_cooldown(self.last_sell_bar, bar_index) {
            return StrategySignal::hold(
                latest.market.clone(),
                latest.close,
                latest.timestamp,
                REASON_POST_EXIT_COOLDOWN,
            );
        }

        // Lookback window excludes the latest candle: breaking the current
        // bar's own high is not a breakout.
        let window = &candles[candles.len() - (self.lookback + 1)..candles.len() - 1];
        let highest_high = window
            .iter()
            .map(|candle| candle.high)
            .max()
            .unwrap_or(Decimal::ZERO);
        let threshold = highest_high * (Decimal::ONE + self.breakout_buffer);
        let avg_volume = self.average_volume(candles);
        let volume_ok =
            avg_volume == Decimal::ZERO || latest.volume >= avg_volume * self.volume_multiplier;

        if latest.close >= threshold && volume_ok {
            let confidence = self.compute_confidence(latest.close, threshold);
            self.last_buy_bar = Some(bar_index);
            return StrategySignal {
                market: latest.market.clone(),
                action: SignalAction::Buy,
                price: latest.close,
                timestamp: latest.timestamp,
                reason: format!("{}-bar high breakout", self.lookback),
                confidence,
            };
        }
        StrategySignal::hold(
            latest.market.clone(),
            latest.close,
            latest.timestamp,
            REASON_NO_BREAKOUT,
        )
    }

    fn evaluate_exit(&mut self, candles: &[Candle], position: &Position) -> StrategySignal {
        let latest = &candles[candles.len() - 1];
        let bar_index = candles.len();

        let profit_target = position.average_price * (Decimal::ONE + self.take_profit_pct);
        if latest.close >= profit_target {
            self.last_sell_bar = Some(bar_index);
            return self.sell_signal(latest, REASON_TAKE_PROFIT, Decimal::ONE);
        }

        let loss_limit = position.average_price * (Decimal::ONE - self.stop_loss_pct);
        if latest.close <= loss_limit {
            self.last_sell_bar = Some(bar_index);
            return self.sell_signal(latest, REASON_STOP_LOSS, Decimal::ONE);
        }

        let highest_since_entry = candles
            .iter()
            .filter(|candle| candle.timestamp >= position.opened_at)
            .map(|candle| candle.high)
            .max()
            .unwrap_or(latest.high);
        let trailing_stop = highest_since_entry * (Decimal::ONE - self.trailing_stop_pct);
        if latest.close <= trailing_stop {
            self.last_sell_bar = Some(bar_index);
            return self.sell_signal(latest, REASON_TREND_BROKEN, Decimal::new(5, 1));
        }

        if self.in_cooldown(self.last_sell_bar, bar_index) {
            return StrategySignal::hold(
                latest.market.clone(),
                latest.close,
                latest.timestamp,
                REASON_POST_EXIT_COOLDOWN,
            );
        }
        StrategySignal::hold(
            latest.market.clone(),
            latest.close,
            latest.timestamp,
            REASON_HOLDING,
        )
    }

    fn sell_signal(&self, latest: &Candle, reason: &str, confidence: Decimal) -> StrategySignal {
        StrategySignal {
            market: latest.market.clone(),
            action: SignalAction::Sell,
            price: latest.close,
            timestamp: latest.timestamp,
            reason: reason.to_string(),
            confidence,
        }
    }
}

impl Strategy for MomentumBreakoutStrategy {
    fn name(&self) -> &str {
        "momentum_breakout"
    }

    fn evaluate(
        &mut self,
        candles: &[Candle],
        position: Option<&Position>,
    ) -> Result<StrategySignal> {
        ensure!(!candles.is_empty(), "at least one candle is required");
        let latest = &candles[candles.len() - 1];
        if candles.len() <= self.lookback {
            return Ok(StrategySignal::hold(
                latest.market.clone(),
                latest.close,
                latest.timestamp,
                REASON_INSUFFICIENT_DATA,
            ));
        }
        match position {
            None => Ok(self.evaluate_entry(candles)),
            Some(position) => Ok(self.evaluate_exit(candles, position)),
        }
    }

    fn reset(&mut self) {
        self.last_buy_bar = None;
        self.last_sell_bar = None;
    }
}
