//! NSE Listing Service Integration Tests
//!
//! Serves the listing CSV from `wiremock` and drives both the scraper and
//! the listing router.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kite_gateway::{
    Environment, ListingError, ListingScraper, ListingsConfig, ListingsState, ServerSettings,
    listings_router,
};

const CSV: &str = "SYMBOL,NAME OF COMPANY, SERIES, DATE OF LISTING, PAID UP VALUE, MARKET LOT, ISIN NUMBER, FACE VALUE
20MICRONS,20 Microns Limited,EQ,06-OCT-2008,5,1,INE144J01027,5
RELIANCE,Reliance Industries Limited,EQ,29-NOV-1995,10,1,INE002A01018,10
TCS,Tata Consultancy Services Limited,EQ,25-AUG-2004,1,1,INE467B01029,1
";

async fn csv_server(status: u16, expected_calls: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/EQUITY_L.csv"))
        .and(header_exists("user-agent"))
        .respond_with(ResponseTemplate::new(status).set_body_string(CSV))
        .expect(expected_calls)
        .mount(&server)
        .await;
    server
}

fn config(server: &MockServer, cache_ttl: Duration) -> ListingsConfig {
    ListingsConfig {
        environment: Environment::Production,
        server: ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: Vec::new(),
        },
        csv_url: format!("{}/EQUITY_L.csv", server.uri()),
        cache_ttl,
        http_timeout: Duration::from_secs(5),
    }
}

async fn get_json(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

// =============================================================================
// Scraper
// =============================================================================

#[tokio::test]
async fn cached_rows_are_reused_within_ttl() {
    let server = csv_server(200, 1).await;
    let scraper = ListingScraper::new(&config(&server, Duration::from_secs(300))).unwrap();

    let first = scraper.all().await.unwrap();
    let second = scraper.all().await.unwrap();

    assert_eq!(first.len(), 3);
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn expired_cache_refetches() {
    let server = csv_server(200, 2).await;
    let scraper = ListingScraper::new(&config(&server, Duration::ZERO)).unwrap();

    scraper.all().await.unwrap();
    scraper.all().await.unwrap();
}

#[tokio::test]
async fn search_matches_symbol_or_name() {
    let server = csv_server(200, 1).await;
    let scraper = ListingScraper::new(&config(&server, Duration::from_secs(300))).unwrap();

    let by_name = scraper.search("consultancy").await.unwrap();
    assert_eq!(by_name.len(), 1);
    assert_eq!(by_name[0].symbol, "TCS");

    let by_symbol = scraper.search("reli").await.unwrap();
    assert_eq!(by_symbol[0].isin, "INE002A01018");

    assert!(matches!(
        scraper.search("  ").await,
        Err(ListingError::BlankQuery)
    ));
}

#[tokio::test]
async fn upstream_error_status_is_reported() {
    let server = csv_server(503, 1).await;
    let scraper = ListingScraper::new(&config(&server, Duration::from_secs(300))).unwrap();

    assert!(matches!(
        scraper.all().await,
        Err(ListingError::Status(503))
    ));
}

// =============================================================================
// Routes
// =============================================================================

fn app(server: &MockServer) -> axum::Router {
    let scraper = ListingScraper::new(&config(server, Duration::from_secs(300))).unwrap();
    listings_router(
        ListingsState {
            scraper: Arc::new(scraper),
            expose_details: false,
        },
        &[],
    )
}

#[tokio::test]
async fn routes_serve_listings() {
    let server = csv_server(200, 1).await;
    let app = app(&server);

    let (status, body) = get_json(&app, "/instruments").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 3);

    let (status, body) = get_json(&app, "/instruments/search?q=micro").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["symbol"], "20MICRONS");

    let (status, body) = get_json(&app, "/instruments/reliance").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Reliance Industries Limited");
    assert_eq!(body["face_value"], 10);
}

#[tokio::test]
async fn route_errors_map_to_statuses() {
    let server = csv_server(200, 1).await;
    let app = app(&server);

    let (status, body) = get_json(&app, "/instruments/search").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_REQUEST");

    let (status, body) = get_json(&app, "/instruments/NOPE").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");
}

#[tokio::test]
async fn failed_fetch_is_upstream_error() {
    let server = csv_server(500, 1).await;
    let app = app(&server);

    let (status, body) = get_json(&app, "/instruments").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "UPSTREAM_ERROR");
}

#[tokio::test]
async fn liveness_probe() {
    let server = MockServer::start().await;
    let app = app(&server);

    let response = app
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
