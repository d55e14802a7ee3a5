//! Session and Subscription Integration Tests
//!
//! Drives `GatewayService` through authentication, subscription
//! replacement, fan-out and re-authentication against a mocked broker and a
//! recording feed.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::timeout;

use common::{
    MockBroker, accepting_broker, batch, funds, grant, harness, infy, members, stocks,
};
use kite_gateway::application::ports::LastPrice;
use kite_gateway::{BrokerError, GatewayError, Member, SubscriptionClass};

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn subscribe_without_session_is_unauthorized() {
    let h = harness(MockBroker::new());

    let err = h.service.subscribe(stocks(&["INFY"])).await.unwrap_err();

    assert!(matches!(err, GatewayError::Unauthorized));
    assert!(h.service.subscriptions().is_empty());
    assert_eq!(h.connector.bound(), 0);
}

#[tokio::test]
async fn blank_request_token_never_reaches_vendor() {
    let mut broker = MockBroker::new();
    broker.expect_generate_session().never();
    let h = harness(broker);

    let err = h.service.authenticate("   ").await.unwrap_err();

    assert!(matches!(err, GatewayError::InvalidRequest(_)));
    assert!(!h.service.is_authenticated());
}

#[tokio::test]
async fn rejected_exchange_leaves_session_unset() {
    let mut broker = MockBroker::new();
    broker.expect_generate_session().times(1).returning(|_| {
        Err(BrokerError::Api {
            error_type: "TokenException".to_string(),
            message: "Token is invalid or has expired.".to_string(),
        })
    });
    let h = harness(broker);

    let err = h.service.authenticate("req-token").await.unwrap_err();

    assert!(matches!(err, GatewayError::AuthFailure(_)));
    assert!(!h.service.is_authenticated());
    assert!(h.service.session().is_none());
    assert_eq!(h.connector.bound(), 0);
}

#[tokio::test]
async fn authentication_binds_feed_to_new_token() {
    let mut broker = MockBroker::new();
    broker
        .expect_generate_session()
        .withf(|token| token == "req-token")
        .times(1)
        .returning(|_| Ok(grant("access-1")));
    let h = harness(broker);

    let summary = h.service.authenticate(" req-token ").await.unwrap();

    assert_eq!(summary.user_id, "AB1234");
    assert!(h.service.is_authenticated());
    assert_eq!(h.connector.bound(), 1);
    assert_eq!(
        h.connector.latest().token.lock().as_deref(),
        Some("access-1")
    );
    // Binding alone does not connect.
    assert_eq!(h.connector.latest().starts.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Subscriptions
// =============================================================================

#[tokio::test]
async fn empty_member_list_is_invalid() {
    let h = harness(accepting_broker());
    h.service.authenticate("req").await.unwrap();

    let err = h.service.subscribe(stocks(&[])).await.unwrap_err();

    assert!(matches!(err, GatewayError::InvalidMembers(_)));
    assert!(h.service.subscriptions().is_empty());
}

#[tokio::test]
async fn last_write_wins_per_class() {
    let h = harness(accepting_broker());
    h.service.authenticate("req").await.unwrap();

    let first = h.service.subscribe(stocks(&["infy", "TCS"])).await.unwrap();
    let second = h
        .service
        .subscribe(stocks(&["TCS", "wipro"]))
        .await
        .unwrap();

    let entries = h.service.subscriptions();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].class, SubscriptionClass::Stocks);
    assert_eq!(entries[0].members, members(&["NSE:TCS", "NSE:WIPRO"]));
    assert_eq!(entries[0].id, second.id());

    assert!(first.is_revoked());
    assert!(!second.is_revoked());

    let feed = h.connector.latest();
    assert_eq!(
        *feed.subscribed.lock(),
        vec![
            vec!["NSE:INFY".to_string(), "NSE:TCS".to_string()],
            vec!["NSE:WIPRO".to_string()],
        ]
    );
    assert_eq!(*feed.unsubscribed.lock(), vec![vec!["NSE:INFY".to_string()]]);
    assert_eq!(h.connector.bound(), 1);
}

#[tokio::test]
async fn classes_are_independent() {
    let h = harness(accepting_broker());
    h.service.authenticate("req").await.unwrap();

    h.service.subscribe(stocks(&["INFY"])).await.unwrap();
    h.service
        .subscribe(funds(&["inf109k01vq1"]))
        .await
        .unwrap();

    let entries = h.service.subscriptions();
    assert_eq!(entries.len(), 2);
    let stats = h.service.subscription_stats();
    assert_eq!(stats.class_count, 2);
    assert_eq!(stats.member_count, 2);
}

#[tokio::test]
async fn every_handle_receives_every_batch() {
    let h = harness(accepting_broker());
    h.service.authenticate("req").await.unwrap();

    let mut stock_handle = h.service.subscribe(stocks(&["INFY"])).await.unwrap();
    let mut fund_handle = h
        .service
        .subscribe(funds(&["INF109K01VQ1"]))
        .await
        .unwrap();
    assert_eq!(h.service.receiver_count(), 2);

    // Token unrelated to either member set still reaches both.
    h.hub.publish(batch(738_561)).unwrap();

    let a = timeout(Duration::from_secs(1), stock_handle.next_batch())
        .await
        .unwrap()
        .unwrap();
    let b = timeout(Duration::from_secs(1), fund_handle.next_batch())
        .await
        .unwrap()
        .unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.ticks[0].instrument_token, 738_561);
}

#[tokio::test]
async fn replaced_handle_stops_yielding() {
    let h = harness(accepting_broker());
    h.service.authenticate("req").await.unwrap();

    let mut old = h.service.subscribe(stocks(&["INFY"])).await.unwrap();
    let _new = h.service.subscribe(stocks(&["TCS"])).await.unwrap();
    h.hub.publish(batch(1)).unwrap();

    let next = timeout(Duration::from_secs(1), old.next_batch()).await.unwrap();
    assert!(next.is_none());
}

#[tokio::test]
async fn repeated_subscribe_delivers_each_batch_once() {
    let h = harness(accepting_broker());
    h.service.authenticate("req").await.unwrap();

    let first = h.service.subscribe(stocks(&["INFY"])).await.unwrap();
    drop(first);
    let mut live = h
        .service
        .subscribe(stocks(&["INFY", "TCS"]))
        .await
        .unwrap();

    // Both calls reach the one bound feed; the feed keeps `start` idempotent.
    assert_eq!(h.connector.bound(), 1);
    assert_eq!(h.connector.latest().starts.load(Ordering::SeqCst), 2);
    assert_eq!(h.service.receiver_count(), 1);

    h.hub.publish(batch(408_065)).unwrap();

    let received = timeout(Duration::from_secs(1), live.next_batch())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.ticks[0].instrument_token, 408_065);
    assert!(
        timeout(Duration::from_millis(50), live.next_batch())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn upstream_subscribe_failure_keeps_registry() {
    let h = harness(accepting_broker());
    h.service.authenticate("req").await.unwrap();
    let existing = h.service.subscribe(stocks(&["INFY"])).await.unwrap();

    h.connector
        .latest()
        .fail_subscribe
        .store(true, Ordering::SeqCst);
    let err = h.service.subscribe(stocks(&["TCS"])).await.unwrap_err();

    assert!(matches!(err, GatewayError::Upstream(_)));
    let entries = h.service.subscriptions();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].members, members(&["NSE:INFY"]));
    assert_eq!(entries[0].id, existing.id());
    assert!(!existing.is_revoked());
}

#[tokio::test]
async fn upstream_unsubscribe_failure_rolls_back_additions() {
    let h = harness(accepting_broker());
    h.service.authenticate("req").await.unwrap();
    h.service.subscribe(stocks(&["INFY"])).await.unwrap();

    let feed = h.connector.latest();
    feed.fail_unsubscribe.store(true, Ordering::SeqCst);
    let err = h.service.subscribe(stocks(&["TCS"])).await.unwrap_err();

    assert!(matches!(err, GatewayError::Upstream(_)));
    assert_eq!(
        h.service.subscriptions()[0].members,
        members(&["NSE:INFY"])
    );
}

// =============================================================================
// Unsubscribe / Re-authentication
// =============================================================================

#[tokio::test]
async fn unsubscribe_all_on_empty_registry_is_noop() {
    let h = harness(accepting_broker());
    h.service.authenticate("req").await.unwrap();

    h.service.unsubscribe_all().await.unwrap();

    assert!(h.connector.latest().unsubscribed.lock().is_empty());
}

#[tokio::test]
async fn unsubscribe_all_drops_every_member() {
    let h = harness(accepting_broker());
    h.service.authenticate("req").await.unwrap();
    let mut stock_handle = h.service.subscribe(stocks(&["INFY"])).await.unwrap();
    let fund_handle = h
        .service
        .subscribe(funds(&["INF109K01VQ1"]))
        .await
        .unwrap();

    h.service.unsubscribe_all().await.unwrap();

    assert!(h.service.subscriptions().is_empty());
    assert!(fund_handle.is_revoked());
    let next = timeout(Duration::from_secs(1), stock_handle.next_batch())
        .await
        .unwrap();
    assert!(next.is_none());

    let unsubscribed = h.connector.latest().unsubscribed.lock().clone();
    let last: BTreeSet<Member> = unsubscribed.last().unwrap().iter().cloned().collect();
    assert_eq!(last, members(&["INF109K01VQ1", "NSE:INFY"]));
}

#[tokio::test]
async fn unsubscribe_all_failure_keeps_registry() {
    let h = harness(accepting_broker());
    h.service.authenticate("req").await.unwrap();
    let handle = h.service.subscribe(stocks(&["INFY"])).await.unwrap();

    h.connector
        .latest()
        .fail_unsubscribe
        .store(true, Ordering::SeqCst);
    let err = h.service.unsubscribe_all().await.unwrap_err();

    assert!(matches!(err, GatewayError::Upstream(_)));
    assert_eq!(h.service.subscriptions().len(), 1);
    assert!(!handle.is_revoked());
}

#[tokio::test]
async fn reauthentication_resets_state() {
    let h = harness(accepting_broker());
    h.service.authenticate("first").await.unwrap();
    let handle = h.service.subscribe(stocks(&["INFY"])).await.unwrap();

    h.service.authenticate("second").await.unwrap();

    assert!(handle.is_revoked());
    assert!(h.service.subscriptions().is_empty());
    assert_eq!(h.connector.bound(), 2);
    assert_eq!(h.connector.feed(0).shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(h.connector.feed(1).shutdowns.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.connector.feed(1).token.lock().as_deref(),
        Some("access-2")
    );
}

#[tokio::test]
async fn shutdown_closes_feed_and_revokes_handles() {
    let h = harness(accepting_broker());
    h.service.authenticate("req").await.unwrap();
    let handle = h.service.subscribe(stocks(&["INFY"])).await.unwrap();

    h.service.shutdown().await;

    assert!(handle.is_revoked());
    assert_eq!(h.connector.latest().shutdowns.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Broker Pass-through
// =============================================================================

#[tokio::test]
async fn find_instrument_uses_default_exchange() {
    let mut broker = accepting_broker();
    broker
        .expect_instruments()
        .withf(|_, exchange| exchange.as_deref() == Some("NSE"))
        .returning(|_, _| Ok(vec![infy()]));
    let h = harness(broker);
    h.service.authenticate("req").await.unwrap();

    let found = h.service.find_instrument("infy").await.unwrap();
    assert_eq!(found.instrument_token, 408_065);

    let missing = h.service.find_instrument("NSE:NOPE").await.unwrap_err();
    assert!(matches!(missing, GatewayError::NotFound(what) if what == "NSE:NOPE"));
}

#[tokio::test]
async fn historical_requires_a_range() {
    let mut broker = accepting_broker();
    broker.expect_historical().never();
    let h = harness(broker);
    h.service.authenticate("req").await.unwrap();

    let err = h
        .service
        .historical("INFY", Some("2024-01-01"), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidRequest(_)));
}

#[tokio::test]
async fn historical_defaults_to_daily_candles() {
    let mut broker = accepting_broker();
    broker
        .expect_instruments()
        .returning(|_, _| Ok(vec![infy()]));
    broker
        .expect_historical()
        .withf(|_, q| q.instrument_token == 408_065 && q.interval == "day")
        .times(1)
        .returning(|_, _| Ok(Vec::new()));
    let h = harness(broker);
    h.service.authenticate("req").await.unwrap();

    let candles = h
        .service
        .historical("INFY", Some("2024-01-01"), Some("2024-01-31"), None)
        .await
        .unwrap();
    assert!(candles.is_empty());
}

#[tokio::test]
async fn expired_token_maps_to_unauthorized() {
    let mut broker = accepting_broker();
    broker.expect_mf_sips().returning(|_| {
        Err(BrokerError::Unauthorized {
            message: "Incorrect `api_key` or `access_token`.".to_string(),
        })
    });
    let h = harness(broker);
    h.service.authenticate("req").await.unwrap();

    let err = h.service.fund_sips("INF109K01VQ1").await.unwrap_err();
    assert!(matches!(err, GatewayError::Unauthorized));
}

#[tokio::test]
async fn market_status_reports_index_price() {
    let mut broker = accepting_broker();
    broker.expect_ltp().returning(|_, instruments| {
        Ok(instruments
            .iter()
            .map(|key| {
                (
                    key.clone(),
                    LastPrice {
                        instrument_token: 256_265,
                        last_price: Decimal::new(2_345_010, 2),
                    },
                )
            })
            .collect())
    });
    let h = harness(broker);
    h.service.authenticate("req").await.unwrap();

    let status = h.service.market_status().await.unwrap();
    assert_eq!(status.index, "NSE:NIFTY 50");
    assert_eq!(status.index_last_price, Some(Decimal::new(2_345_010, 2)));
    assert_eq!(status.is_open, status.phase.is_open());
}
