//! Gateway routes.
//!
//! Thin handlers over [`GatewayService`]: extract, call, reshape. Errors
//! are mapped once through [`ApiError`].

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, RawQuery, State};
use axum::response::Redirect;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::cors::cors_layer;
use super::error::ApiError;
use super::forwarder::spawn_forwarder;
use crate::application::ports::{Candle, Instrument, MfSip};
use crate::application::services::{
    GatewayError, GatewayService, MarketStatus, SubscriptionRequest,
};
use crate::domain::session::SessionSummary;
use crate::domain::subscription::{Member, SubscriptionClass, SubscriptionEntry};
use crate::infrastructure::health::{HealthState, health_router};

// =============================================================================
// State
// =============================================================================

/// Shared state of the gateway routes.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Session and subscription context.
    pub service: Arc<GatewayService>,
    /// Redirect URL registered with the vendor app.
    pub redirect_url: String,
    /// Frontend the OAuth callback forwards to.
    pub frontend_url: String,
    /// Include error source chains in responses.
    pub expose_details: bool,
}

impl AppState {
    fn fail(&self, err: &GatewayError) -> ApiError {
        ApiError::from_gateway(err, self.expose_details)
    }
}

/// Build the gateway router, including health and metrics routes.
pub fn gateway_router(state: AppState, version: &str, cors_origins: &[String]) -> Router {
    let health = Arc::new(HealthState::new(version, Arc::clone(&state.service)));

    Router::new()
        .route("/authenticate", post(authenticate))
        .route("/login", get(login))
        .route("/callback", get(callback))
        .route("/session", get(session))
        .route("/instruments", get(all_instruments))
        .route("/instruments/{exchange}", get(exchange_instruments))
        .route("/instrument/{symbol}", get(instrument))
        .route("/subscribe/{class}", post(subscribe))
        .route("/unsubscribe", post(unsubscribe))
        .route("/subscriptions", get(subscriptions))
        .route("/mutual-funds/{fund_id}/sip", get(fund_sips))
        .route("/historical/{symbol}", get(historical))
        .route("/market-status", get(market_status))
        .with_state(Arc::new(state))
        .merge(health_router(health))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

type Shared = State<Arc<AppState>>;

// =============================================================================
// Session
// =============================================================================

#[derive(Debug, Deserialize)]
struct AuthenticateRequest {
    #[serde(default)]
    request_token: String,
}

#[derive(Debug, Serialize)]
struct AuthenticateResponse {
    status: &'static str,
    session: SessionSummary,
}

async fn authenticate(
    State(state): Shared,
    payload: Result<Json<AuthenticateRequest>, JsonRejection>,
) -> Result<Json<AuthenticateResponse>, ApiError> {
    let Json(request) = payload?;
    let session = state
        .service
        .authenticate(&request.request_token)
        .await
        .map_err(|e| state.fail(&e))?;

    Ok(Json(AuthenticateResponse {
        status: "authenticated",
        session,
    }))
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    login_url: String,
    redirect_url: String,
}

async fn login(State(state): Shared) -> Result<Json<LoginResponse>, ApiError> {
    let login_url = state.service.login_url().map_err(|e| state.fail(&e))?;
    Ok(Json(LoginResponse {
        login_url,
        redirect_url: state.redirect_url.clone(),
    }))
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    request_token: Option<String>,
    status: Option<String>,
}

async fn callback(
    State(state): Shared,
    Query(params): Query<CallbackParams>,
    RawQuery(query): RawQuery,
) -> Result<Redirect, ApiError> {
    let mut target = url::Url::parse(&state.frontend_url)
        .map_err(|e| ApiError::internal(format!("invalid FRONTEND_URL: {e}")))?;
    target.set_query(query.as_deref());

    tracing::info!(
        status = params.status.as_deref().unwrap_or("unknown"),
        has_request_token = params.request_token.is_some(),
        "Login callback received"
    );

    Ok(Redirect::temporary(target.as_str()))
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<SessionSummary>,
}

async fn session(State(state): Shared) -> Json<SessionResponse> {
    let session = state.service.session();
    Json(SessionResponse {
        authenticated: session.is_some(),
        session,
    })
}

// =============================================================================
// Instruments
// =============================================================================

#[derive(Debug, Serialize)]
struct InstrumentsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    exchange: Option<String>,
    count: usize,
    instruments: Vec<Instrument>,
}

async fn all_instruments(State(state): Shared) -> Result<Json<InstrumentsResponse>, ApiError> {
    let instruments = state
        .service
        .instruments(None)
        .await
        .map_err(|e| state.fail(&e))?;
    Ok(Json(InstrumentsResponse {
        exchange: None,
        count: instruments.len(),
        instruments,
    }))
}

async fn exchange_instruments(
    State(state): Shared,
    Path(exchange): Path<String>,
) -> Result<Json<InstrumentsResponse>, ApiError> {
    let instruments = state
        .service
        .instruments(Some(&exchange))
        .await
        .map_err(|e| state.fail(&e))?;
    Ok(Json(InstrumentsResponse {
        exchange: Some(exchange.to_ascii_uppercase()),
        count: instruments.len(),
        instruments,
    }))
}

async fn instrument(
    State(state): Shared,
    Path(symbol): Path<String>,
) -> Result<Json<Instrument>, ApiError> {
    state
        .service
        .find_instrument(&symbol)
        .await
        .map(Json)
        .map_err(|e| state.fail(&e))
}

// =============================================================================
// Subscriptions
// =============================================================================

#[derive(Debug, Deserialize)]
struct SubscribeBody {
    #[serde(default)]
    symbols: Vec<String>,
    exchange: Option<String>,
    #[serde(default)]
    fund_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SubscribeResponse {
    subscription_id: Uuid,
    class: SubscriptionClass,
    members: BTreeSet<Member>,
}

async fn subscribe(
    State(state): Shared,
    Path(class): Path<String>,
    payload: Result<Json<SubscribeBody>, JsonRejection>,
) -> Result<Json<SubscribeResponse>, ApiError> {
    let class = SubscriptionClass::from_path(&class)
        .ok_or_else(|| ApiError::not_found(format!("unknown subscription class {class:?}")))?;
    let Json(body) = payload?;

    let request = match class {
        SubscriptionClass::Stocks => SubscriptionRequest::Stocks {
            symbols: body.symbols,
            exchange: body.exchange,
        },
        SubscriptionClass::MutualFunds => SubscriptionRequest::MutualFunds {
            fund_ids: body.fund_ids,
        },
    };

    let handle = state
        .service
        .subscribe(request)
        .await
        .map_err(|e| state.fail(&e))?;

    let response = SubscribeResponse {
        subscription_id: handle.id(),
        class: handle.class(),
        members: handle.members().clone(),
    };
    drop(spawn_forwarder(handle));

    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct UnsubscribeResponse {
    status: &'static str,
}

async fn unsubscribe(State(state): Shared) -> Result<Json<UnsubscribeResponse>, ApiError> {
    state
        .service
        .unsubscribe_all()
        .await
        .map_err(|e| state.fail(&e))?;
    Ok(Json(UnsubscribeResponse {
        status: "unsubscribed",
    }))
}

#[derive(Debug, Serialize)]
struct SubscriptionsResponse {
    subscriptions: Vec<SubscriptionEntry>,
    tick_receivers: usize,
}

async fn subscriptions(State(state): Shared) -> Json<SubscriptionsResponse> {
    Json(SubscriptionsResponse {
        subscriptions: state.service.subscriptions(),
        tick_receivers: state.service.receiver_count(),
    })
}

// =============================================================================
// Market Data
// =============================================================================

#[derive(Debug, Serialize)]
struct SipsResponse {
    fund_id: String,
    sips: Vec<MfSip>,
}

async fn fund_sips(
    State(state): Shared,
    Path(fund_id): Path<String>,
) -> Result<Json<SipsResponse>, ApiError> {
    let sips = state
        .service
        .fund_sips(&fund_id)
        .await
        .map_err(|e| state.fail(&e))?;
    Ok(Json(SipsResponse { fund_id, sips }))
}

#[derive(Debug, Deserialize)]
struct HistoricalParams {
    from: Option<String>,
    to: Option<String>,
    interval: Option<String>,
}

#[derive(Debug, Serialize)]
struct HistoricalResponse {
    symbol: String,
    candles: Vec<Candle>,
}

async fn historical(
    State(state): Shared,
    Path(symbol): Path<String>,
    Query(params): Query<HistoricalParams>,
) -> Result<Json<HistoricalResponse>, ApiError> {
    let candles = state
        .service
        .historical(
            &symbol,
            params.from.as_deref(),
            params.to.as_deref(),
            params.interval.as_deref(),
        )
        .await
        .map_err(|e| state.fail(&e))?;
    Ok(Json(HistoricalResponse { symbol, candles }))
}

async fn market_status(State(state): Shared) -> Result<Json<MarketStatus>, ApiError> {
    state
        .service
        .market_status()
        .await
        .map(Json)
        .map_err(|e| state.fail(&e))
}
