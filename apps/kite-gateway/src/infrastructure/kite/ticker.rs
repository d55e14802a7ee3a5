//! Kite Ticker WebSocket Feed
//!
//! Implements [`MarketFeed`] over the Kite Ticker stream
//! (`wss://ws.kite.trade?api_key=…&access_token=…`).
//!
//! One `KiteTicker` is one logical connection bound to one access token.
//! `start` spawns the connection task; the task reconnects with backoff and
//! replays the full subscription set after every connect. `subscribe` and
//! `unsubscribe` update that set and forward a command to the live socket.
//!
//! Members are resolved to numeric instrument tokens: numeric members pass
//! through, `EXCHANGE:SYMBOL` members are looked up in the instrument dump
//! of that exchange (fetched once per exchange and cached). Members that do
//! not resolve are logged and skipped.
//!
//! Several members can resolve to one token (`NSE:INFY` and `408065`). A
//! token stays subscribed upstream while any member still holds it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::codec::{Frame, TickerCommand, TickerText, decode_frame};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{BrokerApi, FeedConnector, FeedError, MarketFeed, TickSender};
use crate::domain::session::AccessToken;
use crate::domain::subscription::Member;
use crate::domain::tick::{TickBatch, TickMode};
use crate::infrastructure::config::TickerSettings;
use crate::infrastructure::metrics;

/// Longest wait for the close frame to be written on shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one connection attempt.
#[derive(Debug, thiserror::Error)]
pub enum TickerError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Command could not be encoded.
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),

    /// No frame (not even a heartbeat) within the read timeout.
    #[error("no data for {0:?}")]
    Idle(std::time::Duration),

    /// Server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Reconnection attempts exhausted.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

// =============================================================================
// Connector
// =============================================================================

/// Binds a [`KiteTicker`] to each new access token.
pub struct KiteTickerConnector {
    base_url: Url,
    api_key: String,
    settings: TickerSettings,
    broker: Arc<dyn BrokerApi>,
}

impl KiteTickerConnector {
    /// Create a connector.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::Command` if `ticker_url` is not a valid URL.
    pub fn new(
        ticker_url: &str,
        api_key: impl Into<String>,
        settings: TickerSettings,
        broker: Arc<dyn BrokerApi>,
    ) -> Result<Self, FeedError> {
        let base_url = Url::parse(ticker_url).map_err(|e| FeedError::Command {
            message: format!("invalid ticker URL {ticker_url:?}: {e}"),
        })?;
        Ok(Self {
            base_url,
            api_key: api_key.into(),
            settings,
            broker,
        })
    }

    fn connection_url(&self, token: &AccessToken) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("api_key", &self.api_key)
            .append_pair("access_token", token.expose());
        url
    }
}

impl FeedConnector for KiteTickerConnector {
    fn bind(&self, token: &AccessToken, sender: TickSender) -> Arc<dyn MarketFeed> {
        Arc::new(KiteTicker::new(
            self.connection_url(token),
            self.settings.clone(),
            Arc::clone(&self.broker),
            token.clone(),
            sender,
        ))
    }
}

// =============================================================================
// Ticker
// =============================================================================

struct TickerShared {
    url: Url,
    settings: TickerSettings,
    sender: TickSender,
    cancel: CancellationToken,
    /// Upstream tokens and the members holding each.
    subscribed: parking_lot::RwLock<BTreeMap<u32, BTreeSet<Member>>>,
}

/// One ticker connection.
pub struct KiteTicker {
    shared: Arc<TickerShared>,
    broker: Arc<dyn BrokerApi>,
    token: AccessToken,
    started: AtomicBool,
    command_tx: mpsc::UnboundedSender<TickerCommand>,
    command_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<TickerCommand>>>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    resolved: tokio::sync::Mutex<HashMap<Member, u32>>,
    dumps: tokio::sync::Mutex<HashMap<String, HashMap<String, u32>>>,
}

impl KiteTicker {
    fn new(
        url: Url,
        settings: TickerSettings,
        broker: Arc<dyn BrokerApi>,
        token: AccessToken,
        sender: TickSender,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(TickerShared {
                url,
                settings,
                sender,
                cancel: CancellationToken::new(),
                subscribed: parking_lot::RwLock::new(BTreeMap::new()),
            }),
            broker,
            token,
            started: AtomicBool::new(false),
            command_tx,
            command_rx: parking_lot::Mutex::new(Some(command_rx)),
            task: parking_lot::Mutex::new(None),
            resolved: tokio::sync::Mutex::new(HashMap::new()),
            dumps: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Instrument tokens currently subscribed upstream.
    #[must_use]
    pub fn subscribed_tokens(&self) -> BTreeSet<u32> {
        self.shared.subscribed.read().keys().copied().collect()
    }

    async fn resolve(&self, members: &[Member]) -> Result<Vec<(Member, u32)>, FeedError> {
        let mut resolved = self.resolved.lock().await;
        let mut out = Vec::with_capacity(members.len());

        for member in members {
            if let Some(token) = resolved.get(member) {
                out.push((member.clone(), *token));
                continue;
            }

            let token = if let Ok(numeric) = member.parse::<u32>() {
                Some(numeric)
            } else if let Some((exchange, symbol)) = member.split_once(':') {
                self.lookup(exchange, symbol).await?
            } else {
                None
            };

            match token {
                Some(token) => {
                    resolved.insert(member.clone(), token);
                    out.push((member.clone(), token));
                }
                None => tracing::warn!(member = %member, "No instrument token for member, skipping"),
            }
        }

        Ok(out)
    }

    async fn lookup(&self, exchange: &str, symbol: &str) -> Result<Option<u32>, FeedError> {
        let mut dumps = self.dumps.lock().await;
        if !dumps.contains_key(exchange) {
            let instruments = self
                .broker
                .instruments(&self.token, Some(exchange.to_string()))
                .await
                .map_err(|e| FeedError::Resolve {
                    message: e.to_string(),
                })?;
            let by_symbol = instruments
                .into_iter()
                .map(|i| (i.tradingsymbol, i.instrument_token))
                .collect();
            dumps.insert(exchange.to_string(), by_symbol);
        }
        Ok(dumps
            .get(exchange)
            .and_then(|by_symbol| by_symbol.get(symbol))
            .copied())
    }

    fn ensure_open(&self) -> Result<(), FeedError> {
        if self.shared.cancel.is_cancelled() {
            Err(FeedError::Closed)
        } else {
            Ok(())
        }
    }

    fn send_command(&self, command: TickerCommand) {
        // The receiver lives as long as the connection task; commands sent
        // before `start` wait in the channel and are superseded by the
        // full replay on connect.
        let _ = self.command_tx.send(command);
    }
}

#[async_trait]
impl MarketFeed for KiteTicker {
    async fn start(&self) -> Result<(), FeedError> {
        self.ensure_open()?;
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let Some(command_rx) = self.command_rx.lock().take() else {
            return Ok(());
        };

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            if let Err(e) = shared.run(command_rx).await {
                tracing::error!(error = %e, "Kite ticker stopped");
            }
            metrics::set_ticker_connected(false);
        });
        *self.task.lock() = Some(handle);

        tracing::info!("Kite ticker started");
        Ok(())
    }

    async fn subscribe(&self, members: &[Member]) -> Result<(), FeedError> {
        self.ensure_open()?;
        let resolved = self.resolve(members).await?;

        let tokens: Vec<u32> = {
            let mut subscribed = self.shared.subscribed.write();
            let mut added = BTreeSet::new();
            for (member, token) in resolved {
                let holders = subscribed.entry(token).or_default();
                if holders.is_empty() {
                    added.insert(token);
                }
                holders.insert(member);
            }
            added.into_iter().collect()
        };
        if tokens.is_empty() {
            return Ok(());
        }

        self.send_command(TickerCommand::Subscribe(tokens.clone()));
        self.send_command(TickerCommand::Mode(TickMode::Full, tokens));
        Ok(())
    }

    async fn unsubscribe(&self, members: &[Member]) -> Result<(), FeedError> {
        self.ensure_open()?;
        let released: Vec<(Member, u32)> = {
            let resolved = self.resolved.lock().await;
            members
                .iter()
                .filter_map(|member| resolved.get(member).map(|token| (member.clone(), *token)))
                .collect()
        };

        let tokens: Vec<u32> = {
            let mut subscribed = self.shared.subscribed.write();
            let mut dropped = BTreeSet::new();
            for (member, token) in released {
                if let Some(holders) = subscribed.get_mut(&token) {
                    holders.remove(&member);
                    if holders.is_empty() {
                        subscribed.remove(&token);
                        dropped.insert(token);
                    }
                }
            }
            dropped.into_iter().collect()
        };
        if tokens.is_empty() {
            return Ok(());
        }

        self.send_command(TickerCommand::Unsubscribe(tokens));
        Ok(())
    }

    async fn shutdown(&self) {
        self.shared.cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "Kite ticker task ended abnormally");
        }
        tracing::info!("Kite ticker shut down");
    }
}

impl Drop for KiteTicker {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

// =============================================================================
// Connection Loop
// =============================================================================

impl TickerShared {
    async fn run(
        &self,
        mut commands: mpsc::UnboundedReceiver<TickerCommand>,
    ) -> Result<(), TickerError> {
        let mut reconnect_policy = ReconnectPolicy::new(ReconnectConfig::from(&self.settings));

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            match self.connect_and_run(&mut commands, &mut reconnect_policy).await {
                Ok(()) => {
                    tracing::info!("Kite ticker connection closed");
                    return Ok(());
                }
                Err(e) => {
                    metrics::set_ticker_connected(false);
                    tracing::warn!(error = %e, "Kite ticker connection error");

                    let Some(delay) = reconnect_policy.next_delay() else {
                        return Err(TickerError::MaxReconnectAttemptsExceeded);
                    };
                    metrics::record_reconnect();
                    tracing::info!(
                        attempt = reconnect_policy.attempt_count(),
                        delay_ms = delay.as_millis(),
                        "Reconnecting to Kite ticker"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn connect_and_run(
        &self,
        commands: &mut mpsc::UnboundedReceiver<TickerCommand>,
        reconnect_policy: &mut ReconnectPolicy,
    ) -> Result<(), TickerError> {
        tracing::info!(host = ?self.url.host_str(), "Connecting to Kite ticker");

        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(self.url.as_str()) => result?,
        };
        let (mut write, mut read) = ws_stream.split();

        reconnect_policy.reset();
        metrics::set_ticker_connected(true);

        // Anything queued while disconnected is covered by the replay.
        while commands.try_recv().is_ok() {}

        let tokens: Vec<u32> = self.subscribed.read().keys().copied().collect();
        if !tokens.is_empty() {
            tracing::info!(count = tokens.len(), "Restoring ticker subscriptions");
            write
                .send(Message::Text(TickerCommand::Subscribe(tokens.clone()).to_json()?.into()))
                .await?;
            write
                .send(Message::Text(
                    TickerCommand::Mode(TickMode::Full, tokens).to_json()?.into(),
                ))
                .await?;
        }

        let read_timeout = self.settings.read_timeout;
        let idle = tokio::time::sleep(read_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    send_close(&mut write, CLOSE_TIMEOUT).await;
                    return Ok(());
                }
                () = &mut idle => {
                    return Err(TickerError::Idle(read_timeout));
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        return Ok(());
                    };
                    tracing::debug!(?command, "Sending ticker command");
                    write.send(Message::Text(command.to_json()?.into())).await?;
                }
                msg = read.next() => {
                    idle.as_mut().reset(tokio::time::Instant::now() + read_timeout);
                    match msg {
                        Some(Ok(Message::Binary(data))) => self.publish(&data),
                        Some(Ok(Message::Text(text))) => log_text(&text),
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Kite ticker sent close frame");
                            return Err(TickerError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(TickerError::ConnectionClosed),
                    }
                }
            }
        }
    }

    fn publish(&self, data: &[u8]) {
        let started = Instant::now();
        match decode_frame(data) {
            Ok(Frame::Heartbeat) => tracing::trace!("Ticker heartbeat"),
            Ok(Frame::Ticks(ticks)) if ticks.is_empty() => {}
            Ok(Frame::Ticks(ticks)) => {
                metrics::record_tick_batch(ticks.len());
                let receivers = self
                    .sender
                    .send(Arc::new(TickBatch::new(ticks)))
                    .unwrap_or(0);
                tracing::trace!(receivers, "Published tick batch");
                metrics::record_decode_duration(started.elapsed());
            }
            Err(e) => tracing::warn!(error = %e, bytes = data.len(), "Dropping malformed ticker frame"),
        }
    }
}

/// Write a close frame, giving up after `timeout` on a stalled socket.
///
/// Returns whether the frame was written.
async fn send_close<S>(write: &mut S, timeout: Duration) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(timeout, write.send(Message::Close(None))).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Failed to send ticker close frame");
            false
        }
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis(), "Timed out sending ticker close frame");
            false
        }
    }
}

fn log_text(text: &str) {
    match serde_json::from_str::<TickerText>(text) {
        Ok(message) if message.kind == "error" => {
            tracing::warn!(data = %message.data, "Kite ticker error message");
        }
        Ok(message) => tracing::debug!(kind = %message.kind, "Kite ticker text message"),
        Err(_) => tracing::debug!(text, "Unrecognized ticker text message"),
    }
}

// =============================================================================
// Tests
// =============================================================================
