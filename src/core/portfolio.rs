// src/core/portfolio.rs
use crate::types::{BalanceSnapshot, OrderExecution, OrderSide, Position};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;

/// Ledger consistency failures. These indicate a sizing bug upstream, not a
/// recoverable market condition; the failed call leaves the ledger untouched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortfolioError {
    #[error("insufficient cash: need {required}, have {available}")]
    InsufficientCash {
        required: Decimal,
        available: Decimal,
    },
    #[error("no open position for {0}")]
    NoPosition(String),
    #[error("sell of {requested} exceeds held quantity {held}")]
    OverSell { requested: Decimal, held: Decimal },
}

/// Cash balance plus one position per market, reconciled against exchange
/// balance snapshots and mutated by confirmed executions.
#[derive(Debug, Default)]
pub struct PortfolioState {
    cash: Decimal,
    positions: HashMap<String, Position>,
    last_updated: Option<DateTime<Utc>>,
}

impl PortfolioState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cash(cash: Decimal) -> Self {
        Self {
            cash,
            ..Self::default()
        }
    }

    pub fn position(&self, market: &str) -> Option<&Position> {
        self.positions.get(market)
    }

    /// Used by tests and state restoration to seed a known position.
    pub fn set_position(&mut self, position: Position) {
        self.positions.insert(position.market.clone(), position);
    }

    /// Resynchronizes cash and position quantity from an exchange balance
    /// response. The reported last price is a market quote, not a cost basis,
    /// so an existing position's average price is never overwritten.
    pub fn update_from_balance(&mut self, balance: &BalanceSnapshot) {
        self.cash = balance.available_quote;
        let market = format!(
            "{}_{}",
            balance.currency.to_uppercase(),
            balance.quote_currency.to_uppercase()
        );
        if balance.total_currency <= Decimal::ZERO {
            self.positions.remove(&market);
        } else {
            match self.positions.get_mut(&market) {
                Some(position) => {
                    position.quantity = balance.total_currency;
                }
                None => {
                    self.positions.insert(
                        market.clone(),
                        Position {
                            market,
                            quantity: balance.total_currency,
                            average_price: balance.last_price.unwrap_or(Decimal::ZERO),
                            opened_at: Utc::now(),
                        },
                    );
                }
            }
        }
        self.last_updated = Some(Utc::now());
    }

    /// Applies a confirmed execution and returns the realized pnl (zero for
    /// buys). Errors leave the ledger unchanged.
    pub fn apply_execution(
        &mut self,
        execution: &OrderExecution,
    ) -> Result<Decimal, PortfolioError> {
        if execution.executed_units <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        let realized = match execution.side {
            OrderSide::Buy => {
                self.apply_buy(execution)?;
                Decimal::ZERO
            }
            OrderSide::Sell => self.apply_sell(execution)?,
        };
        self.last_updated = Some(execution.created_at);
        Ok(realized)
    }

    fn apply_buy(&mut self, execution: &OrderExecution) -> Result<(), PortfolioError> {
        let cost = execution.price * execution.executed_units + execution.fee;
        if self.cash < cost {
            return Err(PortfolioError::InsufficientCash {
                required: cost,
                available: self.cash,
            });
        }
        self.cash -= cost;
        match self.positions.get_mut(&execution.market) {
            Some(position) => {
                let total_qty = position.quantity + execution.executed_units;
                let weighted_cost = position.average_price * position.quantity
                    + execution.price * execution.executed_units;
                position.quantity = total_qty;
                position.average_price = weighted_cost / total_qty;
            }
            None => {
                self.positions.insert(
                    execution.market.clone(),
                    Position {
                        market: execution.market.clone(),
                        quantity: execution.executed_units,
                        average_price: execution.price,
                        opened_at: execution.created_at,
                    },
                );
            }
        }
        Ok(())
    }

    fn apply_sell(&mut self, execution: &OrderExecution) -> Result<Decimal, PortfolioError> {
        let position = self
            .positions
            .get_mut(&execution.market)
            .ok_or_else(|| PortfolioError::NoPosition(execution.market.clone()))?;
        if execution.executed_units > position.quantity {
            return Err(PortfolioError::OverSell {
                requested: execution.executed_units,
                held: position.quantity,
            });
        }
        let revenue = execution.price * execution.executed_units - execution.fee;
        let cost_basis = position.average_price * execution.executed_units;
        let realized = revenue - cost_basis;
        self.cash += revenue;
        if execution.executed_units == position.quantity {
            self.positions.remove(&execution.market);
        } else {
            position.quantity -= execution.executed_units;
        }
        Ok(realized)
    }

    /// Notional value of all open positions at their average cost.
    pub fn total_exposure(&self) -> Decimal {
        self.positions
            .values()
            .map(|position| position.average_price * position.quantity)
            .sum()
    }

    pub fn available_cash(&self) -> Decimal {
        self.cash
    }

    pub fn total_equity(&self) -> Decimal {
        self.cash + self.total_exposure()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn execution(side: OrderSide, price: Decimal, units: Decimal, fee: Decimal) -> OrderExecution {
        OrderExecution {
            order_id: "order-1".to_string(),
            market: "BTC_KRW".to_string(),
            side,
            price,
            ordered_units: units,
            executed_units: units,
            fee,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn balance(total: Decimal, available_quote: Decimal, last_price: Option<Decimal>) -> BalanceSnapshot {
        BalanceSnapshot {
            currency: "BTC".to_string(),
            quote_currency: "KRW".to_string(),
            total_currency: total,
            in_use_currency: Decimal::ZERO,
            available_currency: total,
            total_quote: available_quote,
            in_use_quote: Decimal::ZERO,
            available_quote,
            last_price,
        }
    }

    #[test]
    fn buy_then_sell_conserves_money() {
        let mut portfolio = PortfolioState::with_cash(dec!(1000000));

        let pnl = portfolio
            .apply_execution(&execution(OrderSide::Buy, dec!(100), dec!(10), dec!(5)))
            .unwrap();
        assert_eq!(pnl, Decimal::ZERO);
        assert_eq!(portfolio.available_cash(), dec!(998995));
        assert_eq!(portfolio.total_exposure(), dec!(1000));
        assert_eq!(portfolio.total_equity(), dec!(999995));

        let pnl = portfolio
            .apply_execution(&execution(OrderSide::Sell, dec!(120), dec!(10), dec!(6)))
            .unwrap();
        // (120 - 100) * 10 - 6
        assert_eq!(pnl, dec!(194));
        assert_eq!(portfolio.available_cash(), dec!(1000189));
        assert!(portfolio.position("BTC_KRW").is_none());
        assert_eq!(portfolio.total_exposure(), Decimal::ZERO);
    }

    #[test]
    fn buy_merges_into_weighted_average() {
        let mut portfolio = PortfolioState::with_cash(dec!(100000));
        portfolio
            .apply_execution(&execution(OrderSide::Buy, dec!(100), dec!(1), Decimal::ZERO))
            .unwrap();
        portfolio
            .apply_execution(&execution(OrderSide::Buy, dec!(200), dec!(1), Decimal::ZERO))
            .unwrap();

        let position = portfolio.position("BTC_KRW").unwrap();
        assert_eq!(position.quantity, dec!(2));
        assert_eq!(position.average_price, dec!(150));
    }

    #[test]
    fn partial_sell_keeps_average_price() {
        let mut portfolio = PortfolioState::with_cash(dec!(100000));
        portfolio
            .apply_execution(&execution(OrderSide::Buy, dec!(100), dec!(4), Decimal::ZERO))
            .unwrap();
        let pnl = portfolio
            .apply_execution(&execution(OrderSide::Sell, dec!(110), dec!(1), Decimal::ZERO))
            .unwrap();

        assert_eq!(pnl, dec!(10));
        let position = portfolio.position("BTC_KRW").unwrap();
        assert_eq!(position.quantity, dec!(3));
        assert_eq!(position.average_price, dec!(100));
    }

    #[test]
    fn zero_executed_units_is_a_noop() {
        let mut portfolio = PortfolioState::with_cash(dec!(1000));
        let mut exec = execution(OrderSide::Buy, dec!(100), dec!(1), Decimal::ZERO);
        exec.executed_units = Decimal::ZERO;

        let pnl = portfolio.apply_execution(&exec).unwrap();

        assert_eq!(pnl, Decimal::ZERO);
        assert_eq!(portfolio.available_cash(), dec!(1000));
        assert!(portfolio.position("BTC_KRW").is_none());
    }

    #[test]
    fn insufficient_cash_leaves_state_unchanged() {
        let mut portfolio = PortfolioState::with_cash(dec!(500));

        let err = portfolio
            .apply_execution(&execution(OrderSide::Buy, dec!(100), dec!(10), dec!(1)))
            .unwrap_err();

        assert!(matches!(err, PortfolioError::InsufficientCash { .. }));
        assert_eq!(portfolio.available_cash(), dec!(500));
        assert!(portfolio.position("BTC_KRW").is_none());
    }

    #[test]
    fn over_sell_leaves_state_unchanged() {
        let mut portfolio = PortfolioState::with_cash(dec!(100000));
        portfolio
            .apply_execution(&execution(OrderSide::Buy, dec!(100), dec!(1), Decimal::ZERO))
            .unwrap();

        let err = portfolio
            .apply_execution(&execution(OrderSide::Sell, dec!(100), dec!(2), Decimal::ZERO))
            .unwrap_err();

        assert!(matches!(err, PortfolioError::OverSell { .. }));
        assert_eq!(portfolio.position("BTC_KRW").unwrap().quantity, dec!(1));
        assert_eq!(portfolio.available_cash(), dec!(99900));
    }

    #[test]
    fn sell_without_position_fails() {
        let mut portfolio = PortfolioState::with_cash(dec!(100000));
        let err = portfolio
            .apply_execution(&execution(OrderSide::Sell, dec!(100), dec!(1), Decimal::ZERO))
            .unwrap_err();
        assert_eq!(err, PortfolioError::NoPosition("BTC_KRW".to_string()));
    }

    #[test]
    fn balance_sync_creates_and_removes_positions() {
        let mut portfolio = PortfolioState::new();

        portfolio.update_from_balance(&balance(dec!(2), dec!(900000), Some(dec!(130))));
        assert_eq!(portfolio.available_cash(), dec!(900000));
        let position = portfolio.position("BTC_KRW").unwrap();
        assert_eq!(position.quantity, dec!(2));
        assert_eq!(position.average_price, dec!(130));

        portfolio.update_from_balance(&balance(Decimal::ZERO, dec!(950000), None));
        assert!(portfolio.position("BTC_KRW").is_none());
        assert_eq!(portfolio.available_cash(), dec!(950000));
    }

    #[test]
    fn balance_sync_never_touches_average_price() {
        let mut portfolio = PortfolioState::new();
        portfolio.set_position(Position {
            market: "BTC_KRW".to_string(),
            quantity: dec!(1),
            average_price: dec!(100),
            opened_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        });

        portfolio.update_from_balance(&balance(dec!(3), dec!(500000), Some(dec!(999))));

        let position = portfolio.position("BTC_KRW").unwrap();
        assert_eq!(position.quantity, dec!(3));
        assert_eq!(position.average_price, dec!(100));
    }
}
