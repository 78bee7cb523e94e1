// src/connectors/bithumb.rs
use crate::config::ExchangeConfig;
use crate::connectors::traits::{ClientError, ExchangeClient};
use crate::types::{BalanceSnapshot, Candle, OrderExecution, OrderSide};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha512;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

type HmacSha512 = Hmac<Sha512>;

const STATUS_OK: &str = "0000";

/// REST client for the Bithumb Open API.
///
/// Public endpoints are plain GETs; private endpoints are form-encoded POSTs
/// signed with `base64(hmac_sha512(secret, "endpoint\0body\0nonce"))`. The
/// signed bytes and the request body must be the identical encoding, so the
/// body is urlencoded once and reused for both.
pub struct BithumbClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
}

impl BithumbClient {
    pub fn new(config: &ExchangeConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(config.http_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
        })
    }

    async fn public_get(&self, path: &str) -> Result<Value, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "public request");
        let payload: Value = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        check_status(payload)
    }

    async fn private_post(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<Value, ClientError> {
        let api_key = self.api_key.as_deref().ok_or(ClientError::MissingCredentials)?;
        let api_secret = self
            .api_secret
            .as_deref()
            .ok_or(ClientError::MissingCredentials)?;

        let mut pairs: Vec<(&str, &str)> = vec![("endpoint", endpoint)];
        pairs.extend(params.iter().map(|(key, value)| (*key, value.as_str())));
        let body = serde_urlencoded::to_string(&pairs)
            .map_err(|err| ClientError::InvalidPayload(err.to_string()))?;
        let nonce = Utc::now().timestamp_millis().to_string();
        let signature = sign_request(api_secret, endpoint, &body, &nonce);

        debug!(%endpoint, "private request");
        let payload: Value = self
            .http
            .post(format!("{}{}", self.base_url, endpoint))
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header("Api-Key", api_key)
            .header("Api-Sign", signature)
            .header("Api-Nonce", nonce)
            .body(body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        check_status(payload)
    }
}

#[async_trait]
impl ExchangeClient for BithumbClient {
    async fn get_candles(
        &self,
        market: &str,
        interval: &str,
        count: usize,
    ) -> Result<Vec<Candle>, ClientError> {
        if count == 0 {
            return Err(ClientError::InvalidPayload(
                "candle count must be positive".to_string(),
            ));
        }
        let payload = self
            .public_get(&format!("/public/candlestick/{market}/{interval}"))
            .await?;
        let rows = payload
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ClientError::InvalidPayload("candlestick data is not an array".to_string())
            })?;
        let start = rows.len().saturating_sub(count);
        rows[start..]
            .iter()
            .map(|row| parse_candle_row(market, row))
            .collect()
    }

    async fn get_balance(
        &self,
        currency: &str,
        quote_currency: &str,
    ) -> Result<BalanceSnapshot, ClientError> {
        let params = [
            ("currency", currency.to_uppercase()),
            ("payment_currency", quote_currency.to_uppercase()),
        ];
        let payload = self.private_post("/info/balance", &params).await?;
        let data = payload.get("data").and_then(Value::as_object).ok_or_else(|| {
            ClientError::InvalidPayload("balance data is not an object".to_string())
        })?;
        parse_balance(currency, quote_currency, data)
    }

    async fn place_order(
        &self,
        currency: &str,
        side: OrderSide,
        units: Decimal,
        price: Decimal,
        quote_currency: &str,
    ) -> Result<OrderExecution, ClientError> {
        let params = [
            ("order_currency", currency.to_uppercase()),
            ("payment_currency", quote_currency.to_uppercase()),
            ("type", side.as_api_str().to_string()),
            ("units", units.to_string()),
            ("price", price.to_string()),
        ];
        let payload = self.private_post("/trade/place", &params).await?;
        parse_execution(currency, quote_currency, side, units, price, &payload, Utc::now())
    }

    async fn cancel_order(
        &self,
        order_id: &str,
        currency: &str,
        side: OrderSide,
        quote_currency: &str,
    ) -> Result<bool, ClientError> {
        let params = [
            ("order_id", order_id.to_string()),
            ("order_currency", currency.to_uppercase()),
            ("payment_currency", quote_currency.to_uppercase()),
            ("type", side.as_api_str().to_string()),
        ];
        let payload = self.private_post("/trade/cancel", &params).await?;
        Ok(payload.get("status").and_then(Value::as_str) == Some(STATUS_OK))
    }
}

fn sign_request(secret: &str, endpoint: &str, encoded_body: &str, nonce: &str) -> String {
    let auth_payload = format!("{endpoint}\0{encoded_body}\0{nonce}");
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(auth_payload.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Non-"0000" statuses are API errors even on HTTP 200.
fn check_status(payload: Value) -> Result<Value, ClientError> {
    match payload.get("status").and_then(Value::as_str) {
        Some(status) if status != STATUS_OK => Err(ClientError::Api {
            status: status.to_string(),
            message: payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        }),
        _ => Ok(payload),
    }
}

/// Numeric fields arrive as strings or bare numbers depending on the endpoint.
fn parse_decimal(value: &Value) -> Result<Decimal, ClientError> {
    let text = match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        other => {
            return Err(ClientError::InvalidPayload(format!(
                "expected a numeric field, got {other}"
            )))
        }
    };
    Decimal::from_str(&text)
        .map_err(|err| ClientError::InvalidPayload(format!("bad decimal {text:?}: {err}")))
}

fn parse_timestamp_ms(value: &Value) -> Result<DateTime<Utc>, ClientError> {
    let millis = match value {
        Value::String(text) => text
            .parse::<i64>()
            .map_err(|_| ClientError::InvalidPayload(format!("bad timestamp {text:?}")))?,
        Value::Number(number) => number
            .as_i64()
            .ok_or_else(|| ClientError::InvalidPayload(format!("bad timestamp {number}")))?,
        other => {
            return Err(ClientError::InvalidPayload(format!(
                "expected a timestamp, got {other}"
            )))
        }
    };
    match Utc.timestamp_millis_opt(millis) {
        chrono::LocalResult::Single(at) => Ok(at),
        _ => Err(ClientError::InvalidPayload(format!(
            "timestamp {millis} is out of range"
        ))),
    }
}

// Candlestick rows are [timestamp_ms, open, close, high, low, volume, value].
fn parse_candle_row(market: &str, row: &Value) -> Result<Candle, ClientError> {
    let fields = row.as_array().filter(|fields| fields.len() >= 7).ok_or_else(|| {
        ClientError::InvalidPayload("candlestick row is not a 7-element array".to_string())
    })?;
    Ok(Candle {
        market: market.to_string(),
        timestamp: parse_timestamp_ms(&fields[0])?,
        open: parse_decimal(&fields[1])?,
        close: parse_decimal(&fields[2])?,
        high: parse_decimal(&fields[3])?,
        low: parse_decimal(&fields[4])?,
        volume: parse_decimal(&fields[5])?,
        quote_volume: parse_decimal(&fields[6])?,
    })
}

fn parse_balance(
    currency: &str,
    quote_currency: &str,
    data: &serde_json::Map<String, Value>,
) -> Result<BalanceSnapshot, ClientError> {
    let field = |key: String| -> Result<Decimal, ClientError> {
        data.get(&key).map(parse_decimal).unwrap_or(Ok(Decimal::ZERO))
    };
    let cur = currency.to_lowercase();
    let quote = quote_currency.to_lowercase();
    Ok(BalanceSnapshot {
        currency: currency.to_uppercase(),
        quote_currency: quote_currency.to_uppercase(),
        total_currency: field(format!("total_{cur}"))?,
        in_use_currency: field(format!("in_use_{cur}"))?,
        available_currency: field(format!("available_{cur}"))?,
        total_quote: field(format!("total_{quote}"))?,
        in_use_quote: field(format!("in_use_{quote}"))?,
        available_quote: field(format!("available_{quote}"))?,
        last_price: data.get("xcoin_last").map(parse_decimal).transpose()?,
    })
}

fn parse_execution(
    currency: &str,
    quote_currency: &str,
    side: OrderSide,
    requested_units: Decimal,
    requested_price: Decimal,
    payload: &Value,
    created_at: DateTime<Utc>,
) -> Result<OrderExecution, ClientError> {
    let empty = serde_json::Map::new();
    let data = payload.get("data").and_then(Value::as_object).unwrap_or(&empty);
    let order_id = data
        .get("order_id")
        .or_else(|| payload.get("order_id"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ClientError::InvalidPayload("order response carries no order_id".to_string())
        })?;
    let ordered_units = data
        .get("units")
        .map(parse_decimal)
        .unwrap_or(Ok(requested_units))?;
    let remaining = data
        .get("units_remaining")
        .map(parse_decimal)
        .unwrap_or(Ok(Decimal::ZERO))?;
    let executed_units = (ordered_units - remaining).max(Decimal::ZERO);
    let fee = data.get("fee").map(parse_decimal).unwrap_or(Ok(Decimal::ZERO))?;
    let price = data
        .get("price")
        .map(parse_decimal)
        .unwrap_or(Ok(requested_price))?;
    Ok(OrderExecution {
        order_id: order_id.to_string(),
        market: format!(
            "{}_{}",
            currency.to_uppercase(),
            quote_currency.to_uppercase()
        ),
        side,
        price,
        ordered_units,
        executed_units,
        fee,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn signature_matches_known_vector() {
        let pairs = [("endpoint", "/info/balance"), ("order_currency", "BTC")];
        let body = serde_urlencoded::to_string(pairs).unwrap();
        assert_eq!(body, "endpoint=%2Finfo%2Fbalance&order_currency=BTC");
        assert_eq!(
            sign_request("secret", "/info/balance", &body, "12345"),
            "rhyeFxgxGMQGoOcAlKEu/aY31x2ldArSq6Wczt1UHR+S1J2udYfA7I1s4cWNUo1DIKJDIvZg94xfMyvFjVlRIw=="
        );
    }

    #[test]
    fn non_zero_status_is_an_api_error() {
        let payload = json!({"status": "5500", "message": "Invalid Parameter"});
        let err = check_status(payload).unwrap_err();
        match err {
            ClientError::Api { status, message } => {
                assert_eq!(status, "5500");
                assert_eq!(message, "Invalid Parameter");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parses_candle_rows_with_mixed_field_types() {
        let row = json!(["1700000000000", "100", 105, "110", "95", "1.5", "150"]);
        let candle = parse_candle_row("BTC_KRW", &row).unwrap();
        assert_eq!(candle.market, "BTC_KRW");
        assert_eq!(candle.open, dec!(100));
        assert_eq!(candle.close, dec!(105));
        assert_eq!(candle.high, dec!(110));
        assert_eq!(candle.volume, dec!(1.5));
        assert_eq!(candle.timestamp.timestamp_millis(), 1_700_000_000_000);

        let short = json!(["1700000000000", "100"]);
        assert!(parse_candle_row("BTC_KRW", &short).is_err());
    }

    #[test]
    fn parses_balance_with_dynamic_keys() {
        let payload = json!({
            "total_krw": "1000000",
            "in_use_krw": "100000",
            "available_krw": "900000",
            "total_btc": "0.5",
            "in_use_btc": "0.1",
            "available_btc": "0.4",
            "xcoin_last": "35000000",
        });
        let balance =
            parse_balance("BTC", "KRW", payload.as_object().unwrap()).unwrap();
        assert_eq!(balance.currency, "BTC");
        assert_eq!(balance.available_currency, dec!(0.4));
        assert_eq!(balance.available_quote, dec!(900000));
        assert_eq!(balance.last_price, Some(dec!(35000000)));
    }

    #[test]
    fn missing_balance_keys_default_to_zero() {
        let payload = json!({"total_krw": "500"});
        let balance = parse_balance("ETH", "KRW", payload.as_object().unwrap()).unwrap();
        assert_eq!(balance.total_quote, dec!(500));
        assert_eq!(balance.total_currency, Decimal::ZERO);
        assert_eq!(balance.last_price, None);
    }

    #[test]
    fn parses_full_fill_execution() {
        let payload = json!({
            "status": "0000",
            "data": {
                "order_id": "A0001",
                "units": "0.1",
                "units_remaining": "0",
                "price": "1000000",
                "fee": "1000",
            },
        });
        let execution = parse_execution(
            "BTC",
            "KRW",
            OrderSide::Buy,
            dec!(0.1),
            dec!(1000000),
            &payload,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(execution.order_id, "A0001");
        assert_eq!(execution.market, "BTC_KRW");
        assert_eq!(execution.executed_units, dec!(0.1));
        assert_eq!(execution.fee, dec!(1000));
        assert!(execution.is_filled());
    }

    #[test]
    fn partial_fill_never_reports_negative_units() {
        let payload = json!({
            "status": "0000",
            "data": {"order_id": "A0002", "units": "1", "units_remaining": "1.5"},
        });
        let execution = parse_execution(
            "BTC",
            "KRW",
            OrderSide::Sell,
            dec!(1),
            dec!(100),
            &payload,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(execution.executed_units, Decimal::ZERO);
        assert!(!execution.is_filled());
    }

    #[test]
    fn order_response_without_id_is_rejected() {
        let payload = json!({"status": "0000", "data": {}});
        let err = parse_execution(
            "BTC",
            "KRW",
            OrderSide::Buy,
            dec!(1),
            dec!(100),
            &payload,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ClientError::InvalidPayload(_)));
    }
}
