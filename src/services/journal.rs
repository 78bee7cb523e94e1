// src/services/journal.rs
use crate::types::{SignalAction, TradingCycleResult};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const RECENT_CAPACITY: usize = 50;

/// Outcome bucket for one journal line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    Error,
    Skipped,
    Placed,
    Filled,
}

impl CycleStatus {
    fn from_result(result: &TradingCycleResult) -> Self {
        if result.error.is_some() {
            return Self::Error;
        }
        match &result.execution {
            None => Self::Skipped,
            Some(execution) if execution.executed_units <= Decimal::ZERO => Self::Placed,
            Some(_) => Self::Filled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub run_at: DateTime<Utc>,
    pub market: String,
    pub action: SignalAction,
    pub price: Decimal,
    pub status: CycleStatus,
    pub pnl: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl JournalEntry {
    fn from_result(result: &TradingCycleResult) -> Self {
        Self {
            run_at: result.signal.timestamp,
            market: result.signal.market.clone(),
            action: result.signal.action,
            price: result.signal.price,
            status: CycleStatus::from_result(result),
            pnl: result.pnl,
            error: result.error.clone(),
            notes: result.notes.clone(),
        }
    }
}

/// Aggregate of one local trading day, over every cycle journaled that day.
#[derive(Debug, Clone, Serialize)]
pub struct DailyPerformance {
    pub trade_date: NaiveDate,
    pub realized_pnl: Decimal,
    pub trade_count: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub best_trade: Option<Decimal>,
    pub worst_trade: Option<Decimal>,
}

impl DailyPerformance {
    pub fn format_report(&self) -> String {
        let win_rate = if self.trade_count > 0 {
            self.winning_trades as f64 / self.trade_count as f64 * 100.0
        } else {
            0.0
        };
        let mut lines = vec![
            format!("* Trade date: {}", self.trade_date),
            format!("* Realized pnl: {} KRW", self.realized_pnl.round_dp(0)),
            format!(
                "* Cycles: {} (won {} / lost {})",
                self.trade_count, self.winning_trades, self.losing_trades
            ),
            format!("* Win rate: {win_rate:.1}%"),
        ];
        if let Some(best) = self.best_trade {
            lines.push(format!("* Best trade: {} KRW", best.round_dp(0)));
        }
        if let Some(worst) = self.worst_trade {
            lines.push(format!("* Worst trade: {} KRW", worst.round_dp(0)));
        }
        lines.join("\n")
    }
}

/// Append-only JSONL record of every trading cycle, with a bounded in-memory
/// tail for status queries. A journal without a path keeps the tail only.
pub struct CycleJournal {
    path: Option<PathBuf>,
    recent: Mutex<VecDeque<JournalEntry>>,
}

impl CycleJournal {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_CAPACITY)),
        }
    }

    pub async fn record(&self, result: &TradingCycleResult) -> Result<JournalEntry> {
        let entry = JournalEntry::from_result(result);
        {
            let mut recent = self.recent.lock().await;
            if recent.len() == RECENT_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(entry.clone());
        }
        if let Some(path) = &self.path {
            let mut line = serde_json::to_string(&entry)?;
            line.push('\n');
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .with_context(|| format!("cannot open journal {}", path.display()))?;
            file.write_all(line.as_bytes()).await?;
        }
        Ok(entry)
    }

    pub async fn recent(&self) -> Vec<JournalEntry> {
        self.recent.lock().await.iter().cloned().collect()
    }

    /// Aggregates the journal for one local calendar day. Reads the file when
    /// one is configured so restarts do not lose the morning's cycles.
    pub async fn daily_performance(
        &self,
        trade_date: NaiveDate,
        timezone: Tz,
    ) -> Result<DailyPerformance> {
        let entries = match &self.path {
            Some(path) if tokio::fs::try_exists(path).await.unwrap_or(false) => {
                let raw = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("cannot read journal {}", path.display()))?;
                raw.lines()
                    .filter(|line| !line.trim().is_empty())
                    .filter_map(|line| serde_json::from_str::<JournalEntry>(line).ok())
                    .collect()
            }
            _ => self.recent().await,
        };
        Ok(aggregate(trade_date, timezone, &entries))
    }
}

fn aggregate(trade_date: NaiveDate, timezone: Tz, entries: &[JournalEntry]) -> DailyPerformance {
    let mut performance = DailyPerformance {
        trade_date,
        realized_pnl: Decimal::ZERO,
        trade_count: 0,
        winning_trades: 0,
        losing_trades: 0,
        best_trade: None,
        worst_trade: None,
    };
    for entry in entries {
        if entry.run_at.with_timezone(&timezone).date_naive() != trade_date {
            continue;
        }
        performance.trade_count += 1;
        performance.realized_pnl += entry.pnl;
        if entry.pnl > Decimal::ZERO {
            performance.winning_trades += 1;
        } else if entry.pnl < Decimal::ZERO {
            performance.losing_trades += 1;
        }
        performance.best_trade = Some(match performance.best_trade {
            Some(best) => best.max(entry.pnl),
            None => entry.pnl,
        });
        performance.worst_trade = Some(match performance.worst_trade {
            Some(worst) => worst.min(entry.pnl),
            None => entry.pnl,
        });
    }
    performance
}
