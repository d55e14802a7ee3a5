//! Listing service routes.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use super::cors::cors_layer;
use super::error::ApiError;
use crate::infrastructure::health::{liveness_handler, metrics_handler};
use crate::infrastructure::listings::{Listing, ListingError, ListingScraper};

/// Shared state of the listing routes.
pub struct ListingsState {
    /// Cached CSV source.
    pub scraper: Arc<ListingScraper>,
    /// Include error source chains in responses.
    pub expose_details: bool,
}

impl ListingsState {
    fn fail(&self, err: &ListingError) -> ApiError {
        ApiError::from_listing(err, self.expose_details)
    }
}

/// Build the listing router.
pub fn listings_router(state: ListingsState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/instruments", get(all))
        .route("/instruments/search", get(search))
        .route("/instruments/{symbol}", get(find))
        .with_state(Arc::new(state))
        .route("/healthz", get(liveness_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

type Shared = State<Arc<ListingsState>>;

#[derive(Debug, Serialize)]
struct ListingsResponse {
    count: usize,
    instruments: Vec<Listing>,
}

async fn all(State(state): Shared) -> Result<Json<ListingsResponse>, ApiError> {
    let rows = state.scraper.all().await.map_err(|e| state.fail(&e))?;
    Ok(Json(ListingsResponse {
        count: rows.len(),
        instruments: rows.as_ref().clone(),
    }))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    query: String,
    count: usize,
    results: Vec<Listing>,
}

async fn search(
    State(state): Shared,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let results = state
        .scraper
        .search(&params.q)
        .await
        .map_err(|e| state.fail(&e))?;
    Ok(Json(SearchResponse {
        query: params.q.trim().to_string(),
        count: results.len(),
        results,
    }))
}

async fn find(
    State(state): Shared,
    Path(symbol): Path<String>,
) -> Result<Json<Listing>, ApiError> {
    state
        .scraper
        .find(&symbol)
        .await
        .map(Json)
        .map_err(|e| state.fail(&e))
}
