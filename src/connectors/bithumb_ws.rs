// src/connectors/bithumb_ws.rs
use crate::connectors::messages::{parse_ticker_frame, TickerSubscription};
use crate::types::TickerSnapshot;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};
use url::Url;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Streams live ticker snapshots from the public websocket.
///
/// The stream is informational; the trading cycle polls REST candles on its
/// own schedule and keeps running if the socket drops. The collector
/// reconnects forever until the shutdown signal flips.
pub struct BithumbWsCollector {
    ws_url: Url,
    markets: Vec<String>,
}

impl BithumbWsCollector {
    pub fn new(ws_url: &str, markets: Vec<String>) -> Result<Self> {
        let ws_url = Url::parse(ws_url).context("invalid websocket url")?;
        Ok(Self {
            ws_url,
            markets: markets.into_iter().map(|market| market.to_uppercase()).collect(),
        })
    }

    /// Spawns the collector task. Snapshots flow into `sender`; dropping the
    /// receiver stops the task at the next frame.
    pub fn spawn(
        self,
        sender: mpsc::Sender<TickerSnapshot>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                if let Err(err) = self.run_connection(&sender, &mut shutdown).await {
                    warn!(%err, "ticker stream dropped; reconnecting");
                }
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    _ = shutdown.changed() => {}
                }
            }
            info!("ticker collector stopped");
        })
    }

    async fn run_connection(
        &self,
        sender: &mpsc::Sender<TickerSnapshot>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (ws_stream, _) = connect_async(self.ws_url.as_str()).await?;
        info!(markets = ?self.markets, "ticker stream connected");
        let (mut write, mut read) = ws_stream.split();

        let subscription = TickerSubscription::new(&self.markets);
        write
            .send(Message::Text(serde_json::to_string(&subscription)?))
            .await?;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
                message = read.next() => {
                    let Some(message) = message else {
                        anyhow::bail!("stream closed by peer");
                    };
                    match message? {
                        Message::Text(text) => {
                            if let Some(snapshot) = parse_ticker_frame(&text) {
                                if sender.send(snapshot).await.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                        Message::Ping(payload) => {
                            write.send(Message::Pong(payload)).await?;
                        }
                        Message::Close(_) => anyhow::bail!("server closed the stream"),
                        _ => {}
                    }
                }
            }
        }
    }
}
