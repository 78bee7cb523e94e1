// src/runtime/orchestrator.rs
use crate::core::engine::TradingEngine;
use crate::services::journal::CycleJournal;
use crate::services::notifier::SlackNotifier;
use crate::types::{RiskStatus, SignalAction, TradingCycleResult};
use chrono::{NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

const REPORT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
pub struct OrchestratorStatus {
    pub last_result: Option<TradingCycleResult>,
    pub risk: RiskStatus,
    pub last_error: Option<String>,
}

/// Drives the engine on a fixed interval and fans results out to the journal
/// and notifier.
///
/// Cycles are serialized through the engine mutex. A trigger that fires while
/// the previous cycle is still running is dropped, never queued, so a slow
/// exchange cannot stack up concurrent order flows.
pub struct TradingOrchestrator {
    engine: Mutex<TradingEngine>,
    journal: CycleJournal,
    notifier: SlackNotifier,
    timezone: Tz,
    cycle_interval: Duration,
    report_time: NaiveTime,
    last_report_day: StdMutex<Option<NaiveDate>>,
    last_error: StdMutex<Option<String>>,
}

impl TradingOrchestrator {
    pub fn new(
        engine: TradingEngine,
        journal: CycleJournal,
        notifier: SlackNotifier,
        timezone: Tz,
        cycle_interval: Duration,
        report_time: NaiveTime,
    ) -> Self {
        Self {
            engine: Mutex::new(engine),
            journal,
            notifier,
            timezone,
            cycle_interval,
            report_time,
            last_report_day: StdMutex::new(None),
            last_error: StdMutex::new(None),
        }
    }

    /// Main loop; returns when the shutdown signal flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.cycle_interval.as_secs(),
            report_time = %self.report_time,
            "orchestrator started"
        );
        let mut cycle_timer = tokio::time::interval(self.cycle_interval);
        cycle_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut report_timer = tokio::time::interval(REPORT_POLL_INTERVAL);
        report_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cycle_timer.tick() => {
                    let orchestrator = Arc::clone(&self);
                    tokio::spawn(async move {
                        orchestrator.execute_cycle().await;
                    });
                }
                _ = report_timer.tick() => {
                    self.maybe_send_daily_report().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("orchestrator stopped");
    }

    /// Runs one cycle unless another is already in flight, in which case the
    /// trigger is dropped.
    pub async fn execute_cycle(&self) -> Option<TradingCycleResult> {
        let Ok(mut engine) = self.engine.try_lock() else {
            warn!("previous trading cycle still in flight; trigger dropped");
            return None;
        };
        let result = engine.run_cycle().await;
        drop(engine);

        if let Err(err) = self.journal.record(&result).await {
            error!(%err, "cycle could not be journaled");
        }
        if let Err(err) = self.notify_result(&result).await {
            error!(%err, "cycle notification failed");
        }
        *self.last_error.lock().expect("last_error lock poisoned") = result.error.clone();
        Some(result)
    }

    async fn notify_result(&self, result: &TradingCycleResult) -> anyhow::Result<()> {
        match notification_text(result) {
            Some(text) => self.notifier.send(&text).await,
            None => Ok(()),
        }
    }

    async fn maybe_send_daily_report(&self) {
        let now = Utc::now().with_timezone(&self.timezone);
        if now.time() < self.report_time {
            return;
        }
        let today = now.date_naive();
        {
            let mut last = self.last_report_day.lock().expect("report lock poisoned");
            if *last == Some(today) {
                return;
            }
            *last = Some(today);
        }
        match self.journal.daily_performance(today, self.timezone).await {
            Ok(performance) => {
                let report = format!("Daily performance report\n{}", performance.format_report());
                if let Err(err) = self.notifier.send(&report).await {
                    error!(%err, "daily report notification failed");
                }
            }
            Err(err) => error!(%err, "daily report aggregation failed"),
        }
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let engine = self.engine.lock().await;
        OrchestratorStatus {
            last_result: engine.last_result().cloned(),
            risk: engine.risk_status(),
            last_error: self
                .last_error
                .lock()
                .expect("last_error lock poisoned")
                .clone(),
        }
    }
}

/// Human-readable outcome line, or `None` for quiet holds.
fn notification_text(result: &TradingCycleResult) -> Option<String> {
    if let Some(error) = &result.error {
        return Some(format!("order failed: {error}"));
    }
    let Some(execution) = &result.execution else {
        if result.signal.action == SignalAction::Hold {
            return None;
        }
        return Some(format!("order skipped: {}", result.signal.reason));
    };
    let side = if execution.side.is_buy() { "buy" } else { "sell" };
    let pnl_text = if result.pnl != Decimal::ZERO {
        format!(" / realized pnl {} KRW", result.pnl.round_dp(0))
    } else {
        String::new()
    };
    Some(format!(
        "{} {side} {} @ {} KRW{pnl_text}",
        execution.market, execution.executed_units, execution.price
    ))
}
