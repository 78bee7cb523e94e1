// src/core/engine.rs
use crate::config::RiskConfig;
use crate::connectors::traits::{ClientError, ExchangeClient};
use crate::core::portfolio::PortfolioState;
use crate::core::risk::RiskController;
use crate::strategies::traits::Strategy;
use crate::types::{
    OrderExecution, OrderSide, Position, RiskStatus, SignalAction, StrategySignal,
    TradingCycleResult,
};
use crate::utils::precision::truncate_units;
use anyhow::{ensure, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const NOTE_RISK_HALT: &str = "risk_halt";
pub const REASON_ORDER_TOO_SMALL: &str = "insufficient order size";
pub const REASON_NO_POSITION: &str = "no position to sell";
pub const REASON_EMPTY_POSITION: &str = "held quantity is zero";

/// Runs the strategy against one market and turns its signals into orders.
///
/// A cycle is strictly sequential; the caller guarantees at most one runs at
/// a time. `run_cycle` never propagates an error: every outcome, including
/// failures, is folded into a `TradingCycleResult` and recorded against the
/// risk controller.
pub struct TradingEngine {
    client: Arc<dyn ExchangeClient>,
    strategy: Box<dyn Strategy>,
    portfolio: PortfolioState,
    risk: RiskController,
    params: RiskConfig,
    market: String,
    interval: String,
    candle_count: usize,
    last_result: Option<TradingCycleResult>,
}

impl TradingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        strategy: Box<dyn Strategy>,
        portfolio: PortfolioState,
        risk: RiskController,
        market: &str,
        candle_interval: &str,
        candle_count: usize,
        params: RiskConfig,
    ) -> Result<Self> {
        ensure!(candle_count >= 10, "candle_count must be at least 10");
        params.validate()?;
        Ok(Self {
            client,
            strategy,
            portfolio,
            risk,
            params,
            market: market.to_uppercase(),
            interval: candle_interval.to_string(),
            candle_count,
            last_result: None,
        })
    }

    /// One full pass: fetch -> decide -> (maybe) submit -> record.
    pub async fn run_cycle(&mut self) -> TradingCycleResult {
        let (base, quote) = self.split_market();

        let candles = match self
            .client
            .get_candles(&self.market, &self.interval, self.candle_count)
            .await
        {
            Ok(candles) => candles,
            Err(err) => return self.abort_cycle(format!("candle fetch failed: {err}")),
        };
        let balance = match self.client.get_balance(&base, &quote).await {
            Ok(balance) => balance,
            Err(err) => return self.abort_cycle(format!("balance fetch failed: {err}")),
        };
        self.portfolio.update_from_balance(&balance);

        let position = self.portfolio.position(&self.market).cloned();
        let signal = match self.strategy.evaluate(&candles, position.as_ref()) {
            Ok(signal) => signal,
            Err(err) => return self.abort_cycle(format!("strategy evaluation failed: {err}")),
        };
        info!(
            strategy = self.strategy.name(),
            action = ?signal.action,
            price = %signal.price,
            confidence = %signal.confidence,
            reason = %signal.reason,
            "strategy signal"
        );

        let equity = self.portfolio.total_equity();
        if let Some(reason) = self.risk.evaluate_signal(&signal, equity) {
            warn!(%reason, "signal blocked by risk controls");
            let hold =
                StrategySignal::hold(self.market.clone(), signal.price, signal.timestamp, reason);
            let mut result = TradingCycleResult::from_signal(hold);
            result.notes = Some(NOTE_RISK_HALT.to_string());
            return self.finish(result);
        }

        let result = match signal.action {
            SignalAction::Buy => self.handle_buy(signal, &base, &quote).await,
            SignalAction::Sell => self.handle_sell(signal, &base, &quote, position).await,
            SignalAction::Hold => TradingCycleResult::from_signal(signal),
        };
        self.finish(result)
    }

    async fn handle_buy(
        &mut self,
        signal: StrategySignal,
        base: &str,
        quote: &str,
    ) -> TradingCycleResult {
        let units = self.calculate_order_units(signal.price);
        if units <= Decimal::ZERO {
            let hold = StrategySignal::hold(
                self.market.clone(),
                signal.price,
                signal.timestamp,
                REASON_ORDER_TOO_SMALL,
            );
            return TradingCycleResult::from_signal(hold);
        }
        match self
            .execute_with_retry(base, quote, OrderSide::Buy, units, signal.price)
            .await
        {
            Ok(execution) => self.settle(signal, execution),
            Err(err) => TradingCycleResult::with_error(signal, err.to_string()),
        }
    }

    async fn handle_sell(
        &mut self,
        signal: StrategySignal,
        base: &str,
        quote: &str,
        position: Option<Position>,
    ) -> TradingCycleResult {
        let Some(position) = position else {
            let hold = StrategySignal::hold(
                self.market.clone(),
                signal.price,
                signal.timestamp,
                REASON_NO_POSITION,
            );
            return TradingCycleResult::from_signal(hold);
        };
        if position.quantity <= Decimal::ZERO {
            let hold = StrategySignal::hold(
                self.market.clone(),
                signal.price,
                signal.timestamp,
                REASON_EMPTY_POSITION,
            );
            return TradingCycleResult::from_signal(hold);
        }
        match self
            .execute_with_retry(base, quote, OrderSide::Sell, position.quantity, signal.price)
            .await
        {
            Ok(execution) => self.settle(signal, execution),
            Err(err) => TradingCycleResult::with_error(signal, err.to_string()),
        }
    }

    fn settle(&mut self, signal: StrategySignal, execution: OrderExecution) -> TradingCycleResult {
        match self.portfolio.apply_execution(&execution) {
            Ok(pnl) => TradingCycleResult {
                signal,
                execution: Some(execution),
                pnl,
                error: None,
                notes: None,
            },
            Err(err) => {
                // A confirmed fill the ledger cannot absorb means the sizing
                // upstream was wrong; surface it instead of swallowing.
                error!(%err, order_id = %execution.order_id, "ledger rejected a confirmed execution");
                TradingCycleResult {
                    signal,
                    execution: Some(execution),
                    pnl: Decimal::ZERO,
                    error: Some(err.to_string()),
                    notes: None,
                }
            }
        }
    }

    /// Blind resubmission with identical parameters; there is no order-status
    /// reconciliation between attempts.
    async fn execute_with_retry(
        &self,
        base: &str,
        quote: &str,
        side: OrderSide,
        units: Decimal,
        price: Decimal,
    ) -> Result<OrderExecution, ClientError> {
        let mut attempts: u32 = 0;
        loop {
            match self
                .client
                .place_order(base, side, units, price, quote)
                .await
            {
                Ok(execution) => return Ok(execution),
                Err(err) => {
                    attempts += 1;
                    if attempts > self.params.order_retry_limit {
                        return Err(err);
                    }
                    warn!(attempt = attempts, %err, "order submission failed; retrying");
                    tokio::time::sleep(Duration::from_secs_f64(self.params.order_retry_delay_secs))
                        .await;
                }
            }
        }
    }

    fn calculate_order_units(&self, price: Decimal) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let cash = self.portfolio.available_cash();
        if cash <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let reserve = cash * self.params.min_cash_reserve_pct;
        let mut investable = (cash - reserve).min(cash * self.params.max_allocation_pct);
        if let Some(max) = self.params.max_order_value {
            investable = investable.min(max);
        }
        if investable < self.params.min_order_value {
            return Decimal::ZERO;
        }
        truncate_units(investable / price)
    }

    fn split_market(&self) -> (String, String) {
        match self.market.split_once('_') {
            Some((base, quote)) => (base.to_string(), quote.to_string()),
            None => (self.market.clone(), "KRW".to_string()),
        }
    }

    fn abort_cycle(&mut self, error: String) -> TradingCycleResult {
        error!(%error, "trading cycle aborted");
        let hold = StrategySignal::hold(
            self.market.clone(),
            Decimal::ZERO,
            Utc::now(),
            "cycle aborted",
        );
        self.finish(TradingCycleResult::with_error(hold, error))
    }

    fn finish(&mut self, result: TradingCycleResult) -> TradingCycleResult {
        let equity = self.portfolio.total_equity();
        self.risk.record_cycle(&result, equity);
        self.last_result = Some(result.clone());
        result
    }

    /// Operator kill switch; stays in force until the day rolls over.
    pub fn halt(&mut self, reason: impl Into<String>) {
        let equity = self.portfolio.total_equity();
        self.risk.halt(reason, equity);
    }

    pub fn risk_status(&self) -> RiskStatus {
        self.risk.status()
    }

    pub fn last_result(&self) -> Option<&TradingCycleResult> {
        self.last_result.as_ref()
    }
}
