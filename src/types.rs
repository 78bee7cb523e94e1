// src/types.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Bithumb wire value ("bid" buys, "ask" sells).
    pub fn as_api_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "bid",
            OrderSide::Sell => "ask",
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, OrderSide::Buy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

/// One candlestick. Slices handed to a strategy are ordered oldest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub market: String,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub close: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
}

/// Ticker snapshot from the websocket feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub market: String,
    pub price: Decimal,
    pub change_rate_24h: Decimal,
    pub volume_24h: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Decision emitted by a strategy for the current cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySignal {
    pub market: String,
    pub action: SignalAction,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub confidence: Decimal,
}

impl StrategySignal {
    pub fn hold(
        market: impl Into<String>,
        price: Decimal,
        timestamp: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            market: market.into(),
            action: SignalAction::Hold,
            price,
            timestamp,
            reason: reason.into(),
            confidence: Decimal::ZERO,
        }
    }
}

/// Held quantity and cost basis for one market. Owned by the portfolio;
/// the average price is a local accounting fact derived from fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub market: String,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub opened_at: DateTime<Utc>,
}

/// Exchange balance response for one currency against its quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub currency: String,
    pub quote_currency: String,
    pub total_currency: Decimal,
    pub in_use_currency: Decimal,
    pub available_currency: Decimal,
    pub total_quote: Decimal,
    pub in_use_quote: Decimal,
    pub available_quote: Decimal,
    pub last_price: Option<Decimal>,
}

/// Result of a submitted order as reported by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderExecution {
    pub order_id: String,
    pub market: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub ordered_units: Decimal,
    pub executed_units: Decimal,
    pub fee: Decimal,
    pub created_at: DateTime<Utc>,
}

impl OrderExecution {
    pub fn is_filled(&self) -> bool {
        self.executed_units > Decimal::ZERO && self.executed_units >= self.ordered_units
    }
}

/// The unit of record for one run of the trading loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingCycleResult {
    pub signal: StrategySignal,
    pub execution: Option<OrderExecution>,
    pub pnl: Decimal,
    pub error: Option<String>,
    pub notes: Option<String>,
}

impl TradingCycleResult {
    pub fn from_signal(signal: StrategySignal) -> Self {
        Self {
            signal,
            execution: None,
            pnl: Decimal::ZERO,
            error: None,
            notes: None,
        }
    }

    pub fn with_error(signal: StrategySignal, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::from_signal(signal)
        }
    }
}

/// Read-only view of the risk controller for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct RiskStatus {
    pub trading_day: Option<chrono::NaiveDate>,
    pub starting_equity: Decimal,
    pub realized_pnl: Decimal,
    pub consecutive_losses: u32,
    pub halted: bool,
    pub halt_reason: Option<String>,
    pub daily_loss_limit: Option<Decimal>,
}
