// src/connectors/messages.rs
use crate::types::TickerSnapshot;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Subscription request for the public ticker stream.
#[derive(Debug, Serialize)]
pub struct TickerSubscription {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub symbols: Vec<String>,
    #[serde(rename = "tickTypes")]
    pub tick_types: Vec<&'static str>,
}

impl TickerSubscription {
    pub fn new(markets: &[String]) -> Self {
        Self {
            kind: "ticker",
            symbols: markets.iter().map(|market| market.to_uppercase()).collect(),
            tick_types: vec!["24H"],
        }
    }
}

#[derive(Debug, Deserialize)]
struct WsEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    content: Option<TickerContent>,
}

// The stream also carries status frames ({"status":"0000",...}) and frames
// with partially populated content; anything incomplete is dropped.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerContent {
    symbol: Option<String>,
    close_price: Option<String>,
    chg_rate: Option<String>,
    volume: Option<String>,
    date: Option<String>,
    time: Option<String>,
}

/// Parses one raw frame into a snapshot, or `None` for frames that are not
/// complete ticker updates.
pub fn parse_ticker_frame(text: &str) -> Option<TickerSnapshot> {
    let envelope: WsEnvelope = serde_json::from_str(text).ok()?;
    if envelope.kind.as_deref() != Some("ticker") {
        return None;
    }
    let content = envelope.content?;
    let market = content.symbol?;
    let price = Decimal::from_str(content.close_price?.trim()).ok()?;
    let volume = Decimal::from_str(content.volume?.trim()).ok()?;
    let change = content
        .chg_rate
        .as_deref()
        .and_then(|raw| Decimal::from_str(raw.trim()).ok())
        .unwrap_or(Decimal::ZERO);
    let timestamp = content
        .time
        .as_deref()
        .or(content.date.as_deref())
        .map(parse_epoch)
        .unwrap_or_else(Utc::now);
    Some(TickerSnapshot {
        market: market.to_uppercase(),
        price,
        change_rate_24h: change,
        volume_24h: volume,
        timestamp,
    })
}

/// Epoch values arrive in seconds or milliseconds; more than ten digits
/// means milliseconds. Anything unparseable falls back to the receive time.
fn parse_epoch(raw: &str) -> DateTime<Utc> {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(value) = trimmed.parse::<i64>() {
            let result = if trimmed.len() > 10 {
                Utc.timestamp_millis_opt(value)
            } else {
                Utc.timestamp_opt(value, 0)
            };
            if let chrono::LocalResult::Single(at) = result {
                return at;
            }
        }
    }
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn subscription_serializes_with_wire_field_names() {
        let subscription = TickerSubscription::new(&["btc_krw".to_string()]);
        let json = serde_json::to_string(&subscription).unwrap();
        assert_eq!(
            json,
            r#"{"type":"ticker","symbols":["BTC_KRW"],"tickTypes":["24H"]}"#
        );
    }

    #[test]
    fn parses_a_complete_ticker_frame() {
        let frame = r#"{
            "type": "ticker",
            "content": {
                "symbol": "BTC_KRW",
                "closePrice": "35000000",
                "chgRate": "1.25",
                "volume": "42.5",
                "time": "1700000000000"
            }
        }"#;
        let snapshot = parse_ticker_frame(frame).unwrap();
        assert_eq!(snapshot.market, "BTC_KRW");
        assert_eq!(snapshot.price, dec!(35000000));
        assert_eq!(snapshot.change_rate_24h, dec!(1.25));
        assert_eq!(snapshot.volume_24h, dec!(42.5));
        assert_eq!(snapshot.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn drops_status_and_incomplete_frames() {
        assert!(parse_ticker_frame(r#"{"status":"0000","resmsg":"Connected"}"#).is_none());
        assert!(parse_ticker_frame(r#"{"type":"transaction","content":{}}"#).is_none());
        assert!(parse_ticker_frame(
            r#"{"type":"ticker","content":{"symbol":"BTC_KRW","volume":"1"}}"#
        )
        .is_none());
        assert!(parse_ticker_frame("not json").is_none());
    }

    #[test]
    fn missing_change_rate_defaults_to_zero() {
        let frame = r#"{
            "type": "ticker",
            "content": {"symbol": "eth_krw", "closePrice": "100", "volume": "2"}
        }"#;
        let snapshot = parse_ticker_frame(frame).unwrap();
        assert_eq!(snapshot.market, "ETH_KRW");
        assert_eq!(snapshot.change_rate_24h, Decimal::ZERO);
    }

    #[test]
    fn epoch_seconds_and_millis_are_both_accepted() {
        assert_eq!(parse_epoch("1700000000").timestamp(), 1_700_000_000);
        assert_eq!(
            parse_epoch("1700000000000").timestamp_millis(),
            1_700_000_000_000
        );
    }
}
