// src/connectors/traits.rs
use crate::types::{BalanceSnapshot, Candle, OrderExecution, OrderSide};
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

/// Transport and exchange-side failures surfaced by a client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("exchange api error [{status}]: {message}")]
    Api { status: String, message: String },
    #[error("api key and secret are not configured")]
    MissingCredentials,
    #[error("unexpected response payload: {0}")]
    InvalidPayload(String),
}

/// Exchange operations the trading engine depends on. Retry is owned by the
/// caller, not the client.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// At most `count` most-recent candles, oldest-first.
    async fn get_candles(
        &self,
        market: &str,
        interval: &str,
        count: usize,
    ) -> Result<Vec<Candle>, ClientError>;

    async fn get_balance(
        &self,
        currency: &str,
        quote_currency: &str,
    ) -> Result<BalanceSnapshot, ClientError>;

    /// Places a limit order and reports what the exchange says was filled.
    async fn place_order(
        &self,
        currency: &str,
        side: OrderSide,
        units: Decimal,
        price: Decimal,
        quote_currency: &str,
    ) -> Result<OrderExecution, ClientError>;

    async fn cancel_order(
        &self,
        order_id: &str,
        currency: &str,
        side: OrderSide,
        quote_currency: &str,
    ) -> Result<bool, ClientError>;
}
