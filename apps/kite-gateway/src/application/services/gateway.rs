//! Gateway Service
//!
//! The process-wide context object: broker session, subscription registry,
//! the single vendor feed and the tick hub it publishes into. HTTP handlers
//! share one instance through `Arc`.
//!
//! # State machine
//!
//! ```text
//! Unauthenticated --authenticate--> Authenticated(empty)
//! Authenticated(empty) --subscribe--> Authenticated(subscribed)
//! Authenticated(subscribed) --unsubscribe_all--> Authenticated(empty)
//! Authenticated(*) --authenticate--> Authenticated(empty), old feed shut down
//! ```
//!
//! `authenticate`, `subscribe` and `unsubscribe_all` run one at a time: the
//! feed lock is held across the vendor calls of each. Session reads never
//! take that lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::market_hours::MarketPhase;
use crate::application::ports::{
    BrokerApi, BrokerError, Candle, FeedConnector, FeedError, HistoricalQuery, Instrument,
    MarketFeed, MfSip,
};
use crate::domain::session::{AccessToken, Session, SessionStore, SessionSummary};
use crate::domain::subscription::{
    Member, MemberError, SubscriptionClass, SubscriptionEntry, SubscriptionRegistry,
    SubscriptionStats, format_fund_members, format_stock_members,
};
use crate::domain::tick::TickBatch;
use crate::infrastructure::broadcast::SharedTickHub;
use crate::infrastructure::metrics;

/// Instrument whose last price is reported with the market status.
pub const MARKET_INDEX: &str = "NSE:NIFTY 50";

// =============================================================================
// Errors
// =============================================================================

/// Upstream failure behind a gateway operation.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Broker REST call failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),
    /// Tick feed command failed.
    #[error(transparent)]
    Feed(#[from] FeedError),
}

/// Gateway operation error.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No session, or the vendor rejected the access token.
    #[error("not authenticated with the broker")]
    Unauthorized,

    /// The request token exchange failed.
    #[error("authentication failed")]
    AuthFailure(#[source] BrokerError),

    /// The request is missing or has unusable parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The member list was empty or malformed.
    #[error("invalid members: {0}")]
    InvalidMembers(#[from] MemberError),

    /// A looked-up resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The vendor call failed.
    #[error("upstream request failed")]
    Upstream(#[from] UpstreamError),
}

impl From<BrokerError> for GatewayError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Unauthorized { .. } => Self::Unauthorized,
            BrokerError::NotFound { what } => Self::NotFound(what),
            other => Self::Upstream(UpstreamError::Broker(other)),
        }
    }
}

impl From<FeedError> for GatewayError {
    fn from(err: FeedError) -> Self {
        Self::Upstream(UpstreamError::Feed(err))
    }
}

// =============================================================================
// Subscription Request / Handle
// =============================================================================

/// Members requested for one subscription class, before formatting.
#[derive(Debug, Clone)]
pub enum SubscriptionRequest {
    /// Stock symbols, bare or exchange-prefixed.
    Stocks {
        /// Symbols as sent by the client.
        symbols: Vec<String>,
        /// Exchange for bare symbols, instead of the configured default.
        exchange: Option<String>,
    },
    /// Mutual fund identifiers.
    MutualFunds {
        /// Fund identifiers as sent by the client.
        fund_ids: Vec<String>,
    },
}

impl SubscriptionRequest {
    /// Class the request registers.
    #[must_use]
    pub const fn class(&self) -> SubscriptionClass {
        match self {
            Self::Stocks { .. } => SubscriptionClass::Stocks,
            Self::MutualFunds { .. } => SubscriptionClass::MutualFunds,
        }
    }

    fn format(&self, default_exchange: &str) -> Result<BTreeSet<Member>, MemberError> {
        match self {
            Self::Stocks { symbols, exchange } => {
                let exchange = exchange
                    .as_deref()
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .unwrap_or(default_exchange);
                format_stock_members(symbols, exchange)
            }
            Self::MutualFunds { fund_ids } => format_fund_members(fund_ids),
        }
    }
}

/// A live subscription: a consumer of the shared tick channel that stops
/// yielding once revoked.
///
/// Every handle receives every batch the feed publishes, whatever its
/// members.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: Uuid,
    class: SubscriptionClass,
    members: BTreeSet<Member>,
    receiver: broadcast::Receiver<Arc<TickBatch>>,
    revoked: CancellationToken,
}

impl SubscriptionHandle {
    /// Handle ID (matches the registry entry).
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Subscription class.
    #[must_use]
    pub const fn class(&self) -> SubscriptionClass {
        self.class
    }

    /// Formatted members of the subscription.
    #[must_use]
    pub const fn members(&self) -> &BTreeSet<Member> {
        &self.members
    }

    /// Whether the handle was replaced, dropped by `unsubscribe_all`, or
    /// invalidated by re-authentication.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.revoked.is_cancelled()
    }

    /// Wait for the next batch.
    ///
    /// Returns `None` once the handle is revoked or the hub is gone. A
    /// receiver that fell behind skips the batches it missed.
    pub async fn next_batch(&mut self) -> Option<Arc<TickBatch>> {
        loop {
            tokio::select! {
                biased;

                () = self.revoked.cancelled() => return None,

                result = self.receiver.recv() => match result {
                    Ok(batch) => return Some(batch),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            subscription_id = %self.id,
                            class = %self.class,
                            skipped,
                            "Subscription lagged, skipping missed tick batches"
                        );
                        metrics::record_lagged_batches(self.class, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }
}

// =============================================================================
// Market Status
// =============================================================================

/// Exchange session state plus the benchmark index price.
#[derive(Debug, Clone, Serialize)]
pub struct MarketStatus {
    /// Exchange the status refers to.
    pub exchange: &'static str,
    /// Current trading phase.
    pub phase: MarketPhase,
    /// Whether continuous trading is running.
    pub is_open: bool,
    /// Benchmark index.
    pub index: &'static str,
    /// Last price of the benchmark index.
    pub index_last_price: Option<Decimal>,
    /// When the status was computed.
    pub checked_at: DateTime<Utc>,
}

// =============================================================================
// Gateway Service
// =============================================================================

#[derive(Default)]
struct FeedState {
    feed: Option<Arc<dyn MarketFeed>>,
    handles: HashMap<SubscriptionClass, CancellationToken>,
}

impl FeedState {
    fn revoke_all(&mut self) {
        for (_, token) in self.handles.drain() {
            token.cancel();
        }
    }
}

/// Session and subscription context shared by every request.
pub struct GatewayService {
    broker: Arc<dyn BrokerApi>,
    connector: Arc<dyn FeedConnector>,
    hub: SharedTickHub,
    session: SessionStore,
    registry: SubscriptionRegistry,
    default_exchange: String,
    state: Mutex<FeedState>,
}

impl std::fmt::Debug for GatewayService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayService")
            .field("session", &self.session)
            .field("registry", &self.registry)
            .field("default_exchange", &self.default_exchange)
            .finish_non_exhaustive()
    }
}

impl GatewayService {
    /// Create an unauthenticated service.
    #[must_use]
    pub fn new(
        broker: Arc<dyn BrokerApi>,
        connector: Arc<dyn FeedConnector>,
        hub: SharedTickHub,
        default_exchange: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            connector,
            hub,
            session: SessionStore::new(),
            registry: SubscriptionRegistry::new(),
            default_exchange: default_exchange.into(),
            state: Mutex::new(FeedState::default()),
        }
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Exchange a request token and start a fresh session.
    ///
    /// On success every live handle is revoked, the previous feed is shut
    /// down, the registry is cleared and a new idle feed is bound to the
    /// new access token. On failure nothing changes.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for a blank token, `AuthFailure` if the vendor
    /// rejects the exchange.
    pub async fn authenticate(&self, request_token: &str) -> Result<SessionSummary, GatewayError> {
        let request_token = request_token.trim();
        if request_token.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "request_token is required".to_string(),
            ));
        }

        let mut state = self.state.lock().await;

        let grant = match self.broker.generate_session(request_token).await {
            Ok(grant) => grant,
            Err(e) => {
                tracing::warn!(error = %e, "Request token exchange failed");
                metrics::record_authentication(false);
                return Err(GatewayError::AuthFailure(e));
            }
        };

        state.revoke_all();
        if let Some(previous) = state.feed.take() {
            previous.shutdown().await;
        }
        let dropped = self.registry.clear();

        let session = Session {
            user_id: grant.user_id,
            user_name: grant.user_name,
            access_token: grant.access_token,
            login_time: grant.login_time.unwrap_or_else(Utc::now),
        };
        let summary = SessionSummary::from(&session);
        state.feed = Some(
            self.connector
                .bind(&session.access_token, self.hub.sender()),
        );
        let replaced = self.session.replace(session).is_some();

        for class in SubscriptionClass::all() {
            metrics::set_active_members(*class, 0);
        }
        metrics::record_authentication(true);

        tracing::info!(
            user_id = %summary.user_id,
            replaced_session = replaced,
            dropped_subscriptions = dropped.len(),
            "Broker session established"
        );

        Ok(summary)
    }

    /// Whether a session is installed.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    /// Public view of the current session.
    #[must_use]
    pub fn session(&self) -> Option<SessionSummary> {
        self.session.summary()
    }

    fn require_token(&self) -> Result<AccessToken, GatewayError> {
        self.session.access_token().ok_or(GatewayError::Unauthorized)
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Register the members of one class, replacing its previous entry.
    ///
    /// # Errors
    ///
    /// `Unauthorized` without a session, `InvalidMembers` for an empty or
    /// malformed list, `Upstream` if the feed rejects the change. The
    /// registry is unchanged on every error.
    pub async fn subscribe(
        &self,
        request: SubscriptionRequest,
    ) -> Result<SubscriptionHandle, GatewayError> {
        self.require_token()?;
        let class = request.class();
        let members = request.format(&self.default_exchange)?;

        let mut state = self.state.lock().await;
        let feed = state.feed.clone().ok_or(GatewayError::Unauthorized)?;

        feed.start().await.inspect_err(|e| {
            metrics::record_upstream_error("feed_start");
            tracing::error!(error = %e, "Failed to start tick feed");
        })?;

        let changes = self.registry.plan(class, &members);
        let added: Vec<Member> = changes.subscribe.into_iter().collect();
        let removed: Vec<Member> = changes.unsubscribe.into_iter().collect();

        if !added.is_empty() {
            feed.subscribe(&added).await.inspect_err(|e| {
                metrics::record_upstream_error("feed_subscribe");
                tracing::error!(class = %class, error = %e, "Upstream subscribe failed");
            })?;
        }

        if !removed.is_empty()
            && let Err(e) = feed.unsubscribe(&removed).await
        {
            metrics::record_upstream_error("feed_unsubscribe");
            tracing::error!(class = %class, error = %e, "Upstream unsubscribe failed");
            if !added.is_empty()
                && let Err(rollback) = feed.unsubscribe(&added).await
            {
                tracing::warn!(error = %rollback, "Failed to roll back upstream subscribe");
            }
            return Err(e.into());
        }

        let entry = SubscriptionEntry::new(class, members);
        let revoked = CancellationToken::new();
        let handle = SubscriptionHandle {
            id: entry.id,
            class,
            members: entry.members.clone(),
            receiver: self.hub.subscribe(),
            revoked: revoked.clone(),
        };

        let member_count = entry.members.len();
        let previous = self.registry.replace(entry);
        if let Some(old) = state.handles.insert(class, revoked) {
            old.cancel();
        }
        metrics::set_active_members(class, member_count);

        tracing::info!(
            class = %class,
            subscription_id = %handle.id,
            members = member_count,
            added = added.len(),
            removed = removed.len(),
            replaced = previous.is_some(),
            "Subscription registered"
        );

        Ok(handle)
    }

    /// Drop every subscription of every class.
    ///
    /// No-op when nothing is registered.
    ///
    /// # Errors
    ///
    /// `Upstream` if the feed rejects the change; the registry is unchanged.
    pub async fn unsubscribe_all(&self) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        if self.registry.is_empty() {
            return Ok(());
        }

        let members: Vec<Member> = self.registry.all_members().into_iter().collect();
        if let Some(feed) = state.feed.as_ref()
            && !members.is_empty()
        {
            feed.unsubscribe(&members).await.inspect_err(|e| {
                metrics::record_upstream_error("feed_unsubscribe");
                tracing::error!(error = %e, "Upstream unsubscribe-all failed");
            })?;
        }

        state.revoke_all();
        let dropped = self.registry.clear();
        for class in SubscriptionClass::all() {
            metrics::set_active_members(*class, 0);
        }

        tracing::info!(
            classes = dropped.len(),
            members = members.len(),
            "All subscriptions removed"
        );
        Ok(())
    }

    /// Snapshot of the registry.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionEntry> {
        self.registry.entries()
    }

    /// Registered class and member counts.
    #[must_use]
    pub fn subscription_stats(&self) -> SubscriptionStats {
        self.registry.stats()
    }

    /// Number of live tick receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.hub.receiver_count()
    }

    /// Revoke every handle and close the feed.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.revoke_all();
        if let Some(feed) = state.feed.take() {
            feed.shutdown().await;
        }
    }

    // =========================================================================
    // Broker Pass-through
    // =========================================================================

    /// Vendor login URL.
    ///
    /// # Errors
    ///
    /// `Upstream` if the URL cannot be built.
    pub fn login_url(&self) -> Result<String, GatewayError> {
        self.broker
            .login_url()
            .map_err(|e| GatewayError::Upstream(UpstreamError::Broker(e)))
    }

    /// Instrument dump, optionally for one exchange.
    ///
    /// # Errors
    ///
    /// `Unauthorized` without a session, `Upstream` on vendor failure.
    pub async fn instruments(&self, exchange: Option<&str>) -> Result<Vec<Instrument>, GatewayError> {
        let token = self.require_token()?;
        let exchange = exchange.map(str::to_ascii_uppercase);
        Ok(self.broker.instruments(&token, exchange).await?)
    }

    /// Look up an instrument by `SYMBOL` or `EXCHANGE:SYMBOL`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the exchange does not list the symbol.
    pub async fn find_instrument(&self, symbol: &str) -> Result<Instrument, GatewayError> {
        let token = self.require_token()?;
        let (exchange, tradingsymbol) = split_symbol(symbol, &self.default_exchange)?;

        self.broker
            .instruments(&token, Some(exchange.clone()))
            .await?
            .into_iter()
            .find(|i| i.tradingsymbol.eq_ignore_ascii_case(&tradingsymbol))
            .ok_or_else(|| GatewayError::NotFound(format!("{exchange}:{tradingsymbol}")))
    }

    /// SIPs registered for one fund.
    ///
    /// # Errors
    ///
    /// `Unauthorized` without a session, `Upstream` on vendor failure.
    pub async fn fund_sips(&self, fund_id: &str) -> Result<Vec<MfSip>, GatewayError> {
        let token = self.require_token()?;
        let fund_id = fund_id.trim();
        Ok(self
            .broker
            .mf_sips(&token)
            .await?
            .into_iter()
            .filter(|sip| sip.tradingsymbol.eq_ignore_ascii_case(fund_id))
            .collect())
    }

    /// Historical candles of a symbol.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` when the range is missing, `NotFound` for an
    /// unknown symbol.
    pub async fn historical(
        &self,
        symbol: &str,
        from: Option<&str>,
        to: Option<&str>,
        interval: Option<&str>,
    ) -> Result<Vec<Candle>, GatewayError> {
        let token = self.require_token()?;
        let (Some(from), Some(to)) = (non_blank(from), non_blank(to)) else {
            return Err(GatewayError::InvalidRequest(
                "from and to are required".to_string(),
            ));
        };

        let instrument = self.find_instrument(symbol).await?;
        let query = HistoricalQuery {
            instrument_token: instrument.instrument_token,
            interval: non_blank(interval).unwrap_or("day").to_string(),
            from: from.to_string(),
            to: to.to_string(),
        };
        Ok(self.broker.historical(&token, &query).await?)
    }

    /// Exchange session state and the benchmark index price.
    ///
    /// # Errors
    ///
    /// `Unauthorized` without a session, `Upstream` on vendor failure.
    pub async fn market_status(&self) -> Result<MarketStatus, GatewayError> {
        let token = self.require_token()?;
        let prices = self
            .broker
            .ltp(&token, &[MARKET_INDEX.to_string()])
            .await?;

        let now = Utc::now();
        let phase = MarketPhase::at(now);
        Ok(MarketStatus {
            exchange: "NSE",
            phase,
            is_open: phase.is_open(),
            index: MARKET_INDEX,
            index_last_price: prices.get(MARKET_INDEX).map(|p| p.last_price),
            checked_at: now,
        })
    }
}

/// Split `SYMBOL` or `EXCHANGE:SYMBOL` into upper-cased parts.
fn split_symbol(symbol: &str, default_exchange: &str) -> Result<(String, String), GatewayError> {
    let symbol = symbol.trim().to_ascii_uppercase();
    let (exchange, tradingsymbol) = match symbol.split_once(':') {
        Some((exchange, tradingsymbol)) => (exchange.to_string(), tradingsymbol.to_string()),
        None => (default_exchange.to_string(), symbol.clone()),
    };
    if exchange.is_empty() || tradingsymbol.is_empty() || !symbol.is_ascii() {
        return Err(GatewayError::InvalidRequest(format!(
            "symbol {symbol:?} is malformed"
        )));
    }
    Ok((exchange, tradingsymbol))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_unauthorized_maps_to_unauthorized() {
        let err: GatewayError = BrokerError::Unauthorized {
            message: "expired".to_string(),
        }
        .into();
        assert!(matches!(err, GatewayError::Unauthorized));
    }

    #[test]
    fn broker_not_found_maps_to_not_found() {
        let err: GatewayError = BrokerError::NotFound {
            what: "NSE:NOPE".to_string(),
        }
        .into();
        assert!(matches!(err, GatewayError::NotFound(what) if what == "NSE:NOPE"));
    }

    #[test]
    fn broker_network_maps_to_upstream() {
        let err: GatewayError = BrokerError::Network {
            message: "reset".to_string(),
        }
        .into();
        assert!(matches!(
            err,
            GatewayError::Upstream(UpstreamError::Broker(_))
        ));
    }

    #[test]
    fn stock_request_uses_exchange_override() {
        let request = SubscriptionRequest::Stocks {
            symbols: vec!["tcs".to_string()],
            exchange: Some("bse".to_string()),
        };
        let members = request.format("NSE").unwrap();
        assert_eq!(members, BTreeSet::from(["BSE:TCS".to_string()]));
    }

    #[test]
    fn blank_exchange_override_falls_back_to_default() {
        let request = SubscriptionRequest::Stocks {
            symbols: vec!["tcs".to_string()],
            exchange: Some("  ".to_string()),
        };
        let members = request.format("NSE").unwrap();
        assert_eq!(members, BTreeSet::from(["NSE:TCS".to_string()]));
    }

    #[test]
    fn fund_request_class() {
        let request = SubscriptionRequest::MutualFunds {
            fund_ids: vec!["INF109K01VQ1".to_string()],
        };
        assert_eq!(request.class(), SubscriptionClass::MutualFunds);
    }

    #[test]
    fn split_symbol_applies_default_exchange() {
        assert_eq!(
            split_symbol(" infy ", "NSE").unwrap(),
            ("NSE".to_string(), "INFY".to_string())
        );
        assert_eq!(
            split_symbol("bse:tcs", "NSE").unwrap(),
            ("BSE".to_string(), "TCS".to_string())
        );
    }

    #[test]
    fn split_symbol_rejects_malformed() {
        for symbol in ["NSE:", ":INFY", "straße", "  "] {
            assert!(
                matches!(split_symbol(symbol, "NSE"), Err(GatewayError::InvalidRequest(_))),
                "{symbol:?} accepted"
            );
        }
    }

    #[test]
    fn non_blank_filters_whitespace() {
        assert_eq!(non_blank(Some(" 2024-01-01 ")), Some("2024-01-01"));
        assert_eq!(non_blank(Some("   ")), None);
        assert_eq!(non_blank(None), None);
    }
}
