//! Shared test doubles: a mocked broker and a recording feed connector.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use mockall::mock;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use kite_gateway::application::ports::{
    Candle, HistoricalQuery, Instrument, LastPrice, MfSip, SessionGrant,
};
use kite_gateway::{
    AccessToken, BrokerApi, BrokerError, FeedConnector, FeedError, GatewayService, MarketFeed,
    Member, SubscriptionRequest, Tick, TickBatch, TickHub, TickMode, TickSender,
};

// =============================================================================
// Test Doubles
// =============================================================================

mock! {
    pub Broker {}

    #[async_trait]
    impl BrokerApi for Broker {
        fn login_url(&self) -> Result<String, BrokerError>;
        async fn generate_session(&self, request_token: &str) -> Result<SessionGrant, BrokerError>;
        async fn instruments(
            &self,
            token: &AccessToken,
            exchange: Option<String>,
        ) -> Result<Vec<Instrument>, BrokerError>;
        async fn mf_sips(&self, token: &AccessToken) -> Result<Vec<MfSip>, BrokerError>;
        async fn historical(
            &self,
            token: &AccessToken,
            query: &HistoricalQuery,
        ) -> Result<Vec<Candle>, BrokerError>;
        async fn ltp(
            &self,
            token: &AccessToken,
            instruments: &[String],
        ) -> Result<HashMap<String, LastPrice>, BrokerError>;
    }
}

/// Calls seen by one bound feed.
#[derive(Default)]
pub struct FeedLog {
    pub token: Mutex<Option<String>>,
    pub starts: AtomicUsize,
    pub subscribed: Mutex<Vec<Vec<Member>>>,
    pub unsubscribed: Mutex<Vec<Vec<Member>>>,
    pub shutdowns: AtomicUsize,
    pub fail_subscribe: AtomicBool,
    pub fail_unsubscribe: AtomicBool,
}

pub struct RecordingFeed {
    pub log: Arc<FeedLog>,
}

#[async_trait]
impl MarketFeed for RecordingFeed {
    async fn start(&self) -> Result<(), FeedError> {
        self.log.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, members: &[Member]) -> Result<(), FeedError> {
        if self.log.fail_subscribe.load(Ordering::SeqCst) {
            return Err(FeedError::Command {
                message: "socket closed".to_string(),
            });
        }
        self.log.subscribed.lock().push(members.to_vec());
        Ok(())
    }

    async fn unsubscribe(&self, members: &[Member]) -> Result<(), FeedError> {
        if self.log.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(FeedError::Command {
                message: "socket closed".to_string(),
            });
        }
        self.log.unsubscribed.lock().push(members.to_vec());
        Ok(())
    }

    async fn shutdown(&self) {
        self.log.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingConnector {
    feeds: Mutex<Vec<Arc<FeedLog>>>,
}

impl RecordingConnector {
    pub fn bound(&self) -> usize {
        self.feeds.lock().len()
    }

    pub fn feed(&self, index: usize) -> Arc<FeedLog> {
        Arc::clone(&self.feeds.lock()[index])
    }

    pub fn latest(&self) -> Arc<FeedLog> {
        Arc::clone(self.feeds.lock().last().unwrap())
    }
}

impl FeedConnector for RecordingConnector {
    fn bind(&self, token: &AccessToken, _sender: TickSender) -> Arc<dyn MarketFeed> {
        let log = Arc::new(FeedLog::default());
        *log.token.lock() = Some(token.expose().to_string());
        self.feeds.lock().push(Arc::clone(&log));
        Arc::new(RecordingFeed { log })
    }
}

// =============================================================================
// Helpers
// =============================================================================

pub struct Harness {
    pub service: Arc<GatewayService>,
    pub connector: Arc<RecordingConnector>,
    pub hub: Arc<TickHub>,
}

pub fn grant(token: &str) -> SessionGrant {
    SessionGrant {
        user_id: "AB1234".to_string(),
        user_name: Some("Test User".to_string()),
        access_token: AccessToken::new(token),
        login_time: None,
    }
}

pub fn harness(broker: MockBroker) -> Harness {
    let connector = Arc::new(RecordingConnector::default());
    let hub = Arc::new(TickHub::new(16));
    let service = Arc::new(GatewayService::new(
        Arc::new(broker),
        Arc::clone(&connector) as Arc<dyn FeedConnector>,
        Arc::clone(&hub),
        "NSE",
    ));
    Harness {
        service,
        connector,
        hub,
    }
}

/// Broker that accepts any request token, issuing `access-1`, `access-2`, ...
pub fn accepting_broker() -> MockBroker {
    let mut broker = MockBroker::new();
    let issued = AtomicUsize::new(0);
    broker.expect_generate_session().returning(move |_| {
        let n = issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(grant(&format!("access-{n}")))
    });
    broker
}

pub fn stocks(symbols: &[&str]) -> SubscriptionRequest {
    SubscriptionRequest::Stocks {
        symbols: symbols.iter().map(ToString::to_string).collect(),
        exchange: None,
    }
}

pub fn funds(ids: &[&str]) -> SubscriptionRequest {
    SubscriptionRequest::MutualFunds {
        fund_ids: ids.iter().map(ToString::to_string).collect(),
    }
}

pub fn members(items: &[&str]) -> BTreeSet<Member> {
    items.iter().map(ToString::to_string).collect()
}

pub fn batch(token: u32) -> TickBatch {
    TickBatch::new(vec![Tick {
        instrument_token: token,
        mode: TickMode::Full,
        last_price: Decimal::new(150_025, 2),
    }])
}

/// INFY on NSE as it appears in the instrument dump.
pub fn infy() -> Instrument {
    Instrument {
        instrument_token: 408_065,
        exchange_token: 1594,
        tradingsymbol: "INFY".to_string(),
        name: "INFOSYS".to_string(),
        last_price: Decimal::ZERO,
        expiry: None,
        strike: Decimal::ZERO,
        tick_size: Decimal::new(5, 2),
        lot_size: 1,
        instrument_type: "EQ".to_string(),
        segment: "NSE".to_string(),
        exchange: "NSE".to_string(),
    }
}
