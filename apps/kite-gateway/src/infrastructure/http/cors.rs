//! CORS policy from `CORS_ORIGINS`.

use axum::http::{HeaderValue, Method, header};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Build the CORS layer. An empty list (or one with no valid origins)
/// allows any origin.
#[must_use]
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

    let allow_origin = if parsed.is_empty() {
        if !origins.is_empty() {
            tracing::warn!("CORS_ORIGINS contains no valid origins, allowing any");
        }
        AllowOrigin::any()
    } else {
        tracing::info!(origins = parsed.len(), "CORS restricted to configured origins");
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
}
