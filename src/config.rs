// src/config.rs

use chrono::NaiveTime;
use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    #[serde(default = "default_volume_window")]
    pub volume_window: usize,
    #[serde(default = "default_breakout_buffer")]
    pub breakout_buffer: Decimal,
    #[serde(default = "default_volume_multiplier")]
    pub volume_multiplier: Decimal,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: Decimal,
    #[serde(default = "default_trailing_stop_pct")]
    pub trailing_stop_pct: Decimal,
    #[serde(default = "default_cooldown_bars")]
    pub cooldown_bars: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            lookback: default_lookback(),
            volume_window: default_volume_window(),
            breakout_buffer: default_breakout_buffer(),
            volume_multiplier: default_volume_multiplier(),
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            trailing_stop_pct: default_trailing_stop_pct(),
            cooldown_bars: default_cooldown_bars(),
        }
    }
}

/// Order sizing and daily loss limits. Validated before the engine is built.
#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    #[serde(default = "default_max_allocation_pct")]
    pub max_allocation_pct: Decimal,
    #[serde(default = "default_min_cash_reserve_pct")]
    pub min_cash_reserve_pct: Decimal,
    #[serde(default = "default_min_order_value")]
    pub min_order_value: Decimal,
    #[serde(default)]
    pub max_order_value: Option<Decimal>,
    #[serde(default = "default_daily_loss_limit_pct")]
    pub daily_loss_limit_pct: Decimal,
    #[serde(default)]
    pub daily_loss_limit_value: Option<Decimal>,
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
    #[serde(default = "default_order_retry_limit")]
    pub order_retry_limit: u32,
    #[serde(default = "default_order_retry_delay")]
    pub order_retry_delay_secs: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_allocation_pct: default_max_allocation_pct(),
            min_cash_reserve_pct: default_min_cash_reserve_pct(),
            min_order_value: default_min_order_value(),
            max_order_value: None,
            daily_loss_limit_pct: default_daily_loss_limit_pct(),
            daily_loss_limit_value: None,
            max_consecutive_losses: default_max_consecutive_losses(),
            order_retry_limit: default_order_retry_limit(),
            order_retry_delay_secs: default_order_retry_delay(),
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_allocation_pct <= Decimal::ZERO || self.max_allocation_pct > Decimal::ONE {
            return Err(ConfigError::Message(
                "max_allocation_pct must be within (0, 1]".into(),
            ));
        }
        if self.min_cash_reserve_pct < Decimal::ZERO || self.min_cash_reserve_pct >= Decimal::ONE {
            return Err(ConfigError::Message(
                "min_cash_reserve_pct must be within [0, 1)".into(),
            ));
        }
        if self.min_order_value < Decimal::ZERO {
            return Err(ConfigError::Message(
                "min_order_value must not be negative".into(),
            ));
        }
        if let Some(max) = self.max_order_value {
            if max <= Decimal::ZERO {
                return Err(ConfigError::Message(
                    "max_order_value must be positive when set".into(),
                ));
            }
        }
        if self.daily_loss_limit_pct < Decimal::ZERO {
            return Err(ConfigError::Message(
                "daily_loss_limit_pct must not be negative".into(),
            ));
        }
        if let Some(value) = self.daily_loss_limit_value {
            if value < Decimal::ZERO {
                return Err(ConfigError::Message(
                    "daily_loss_limit_value must not be negative".into(),
                ));
            }
        }
        if self.order_retry_delay_secs < 0.0 {
            return Err(ConfigError::Message(
                "order_retry_delay_secs must not be negative".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_market")]
    pub market: String,
    #[serde(default = "default_candle_interval")]
    pub candle_interval: String,
    #[serde(default = "default_candle_count")]
    pub candle_count: usize,
    #[serde(default = "default_trading_interval")]
    pub trading_interval_secs: u64,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_daily_report_time")]
    pub daily_report_time: String,
    pub slack_webhook_url: Option<String>,
    #[serde(default = "default_websocket_enabled")]
    pub websocket_enabled: bool,
    #[serde(default = "default_journal_path")]
    pub journal_path: Option<String>,
    #[serde(default)]
    pub exchange: Option<ExchangeConfig>,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub risk: RiskConfig,
}

impl AppConfig {
    /// Loads `Settings.toml` (optional) overlaid with `BEOMBONG_`-prefixed
    /// environment variables, then validates the result.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("Settings").required(false))
            .add_source(Environment::with_prefix("BEOMBONG").separator("__"));

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.market.trim().is_empty() {
            return Err(ConfigError::Message("market must not be empty".into()));
        }
        if self.candle_interval.trim().is_empty() {
            return Err(ConfigError::Message(
                "candle_interval must not be empty".into(),
            ));
        }
        if self.candle_count < 10 {
            return Err(ConfigError::Message(
                "candle_count must be at least 10".into(),
            ));
        }
        if self.trading_interval_secs < 30 {
            return Err(ConfigError::Message(
                "trading_interval_secs must be at least 30".into(),
            ));
        }
        self.parse_timezone()?;
        self.parse_daily_report_time()?;
        if self.strategy.lookback < 3 {
            return Err(ConfigError::Message("lookback must be at least 3".into()));
        }
        if self.strategy.volume_window < 1 {
            return Err(ConfigError::Message(
                "volume_window must be at least 1".into(),
            ));
        }
        self.risk.validate()
    }

    pub fn parse_timezone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Message(format!("unknown timezone: {}", self.timezone)))
    }

    pub fn parse_daily_report_time(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(&self.daily_report_time, "%H:%M").map_err(|_| {
            ConfigError::Message(format!(
                "daily_report_time must be HH:MM, got {}",
                self.daily_report_time
            ))
        })
    }

    pub fn exchange(&self) -> ExchangeConfig {
        self.exchange.clone().unwrap_or_else(|| ExchangeConfig {
            base_url: default_base_url(),
            ws_url: default_ws_url(),
            api_key: None,
            api_secret: None,
            http_timeout_secs: default_http_timeout(),
        })
    }
}

fn default_base_url() -> String {
    "https://api.bithumb.com".to_string()
}

fn default_ws_url() -> String {
    "wss://pubwss.bithumb.com/pub/ws".to_string()
}

fn default_http_timeout() -> f64 {
    10.0
}

fn default_market() -> String {
    "BTC_KRW".to_string()
}

fn default_candle_interval() -> String {
    "1h".to_string()
}

fn default_candle_count() -> usize {
    60
}

fn default_trading_interval() -> u64 {
    300
}

fn default_timezone() -> String {
    "Asia/Seoul".to_string()
}

fn default_daily_report_time() -> String {
    "08:30".to_string()
}

fn default_websocket_enabled() -> bool {
    true
}

fn default_journal_path() -> Option<String> {
    Some("beombong-journal.jsonl".to_string())
}

fn default_lookback() -> usize {
    20
}

fn default_volume_window() -> usize {
    10
}

fn default_breakout_buffer() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_volume_multiplier() -> Decimal {
    Decimal::new(12, 1) // 1.2
}

fn default_stop_loss_pct() -> Decimal {
    Decimal::new(2, 2) // 0.02
}

fn default_take_profit_pct() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_trailing_stop_pct() -> Decimal {
    Decimal::new(15, 3) // 0.015
}

fn default_cooldown_bars() -> usize {
    3
}

fn default_max_allocation_pct() -> Decimal {
    Decimal::new(3, 1) // 0.3
}

fn default_min_cash_reserve_pct() -> Decimal {
    Decimal::new(1, 1) // 0.1
}

fn default_min_order_value() -> Decimal {
    Decimal::new(5000, 0)
}

fn default_daily_loss_limit_pct() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_max_consecutive_losses() -> u32 {
    3
}

fn default_order_retry_limit() -> u32 {
    2
}

fn default_order_retry_delay() -> f64 {
    1.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn parse(toml: &str) -> Result<AppConfig, ConfigError> {
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn defaults_are_valid() {
        let config = parse("").expect("empty config should fall back to defaults");
        assert_eq!(config.market, "BTC_KRW");
        assert_eq!(config.strategy.lookback, 20);
        assert_eq!(config.risk.max_consecutive_losses, 3);
        assert!(config.parse_timezone().is_ok());
    }

    #[test]
    fn rejects_small_candle_count() {
        let err = parse("candle_count = 5").unwrap_err();
        assert!(err.to_string().contains("candle_count"));
    }

    #[test]
    fn rejects_allocation_outside_unit_interval() {
        let err = parse("[risk]\nmax_allocation_pct = \"1.5\"").unwrap_err();
        assert!(err.to_string().contains("max_allocation_pct"));
    }

    #[test]
    fn rejects_unknown_timezone() {
        let err = parse("timezone = \"Mars/Olympus\"").unwrap_err();
        assert!(err.to_string().contains("timezone"));
    }
}
