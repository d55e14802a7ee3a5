//! NSE Equity Listing Scraper
//!
//! Fetches the public NSE equity listing CSV, parses it and keeps the rows
//! for a short TTL. The archive host rejects requests without a browser
//! `User-Agent`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::infrastructure::config::ListingsConfig;
use crate::infrastructure::metrics;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

// =============================================================================
// Types
// =============================================================================

/// One listed security.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Trading symbol.
    #[serde(rename(deserialize = "SYMBOL"))]
    pub symbol: String,
    /// Company name.
    #[serde(rename(deserialize = "NAME OF COMPANY"))]
    pub name: String,
    /// Series (`EQ`, `BE`, ...).
    #[serde(rename(deserialize = "SERIES"))]
    pub series: String,
    /// Listing date as published (`06-OCT-2008`).
    #[serde(rename(deserialize = "DATE OF LISTING"))]
    pub date_of_listing: String,
    /// Paid-up value.
    #[serde(rename(deserialize = "PAID UP VALUE"))]
    pub paid_up_value: u64,
    /// Market lot.
    #[serde(rename(deserialize = "MARKET LOT"))]
    pub market_lot: u64,
    /// ISIN.
    #[serde(rename(deserialize = "ISIN NUMBER"))]
    pub isin: String,
    /// Face value.
    #[serde(rename(deserialize = "FACE VALUE"))]
    pub face_value: u64,
}

/// Listing errors.
#[derive(Debug, thiserror::Error)]
pub enum ListingError {
    /// The CSV could not be downloaded.
    #[error("failed to fetch listing CSV: {0}")]
    Fetch(String),

    /// The CSV host answered with an error status.
    #[error("listing CSV request returned HTTP {0}")]
    Status(u16),

    /// The CSV could not be parsed.
    #[error("failed to parse listing CSV: {0}")]
    Parse(#[from] csv::Error),

    /// Search query was blank.
    #[error("query must not be blank")]
    BlankQuery,

    /// No listing with that symbol.
    #[error("no listing for symbol {0}")]
    NotFound(String),
}

/// Parse the listing CSV. Header names and fields are trimmed.
///
/// # Errors
///
/// Returns an error if a row does not match the expected columns.
pub fn parse_listings(body: &str) -> Result<Vec<Listing>, ListingError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());
    Ok(reader.deserialize().collect::<Result<Vec<Listing>, _>>()?)
}

// =============================================================================
// Scraper
// =============================================================================

struct CachedListings {
    fetched_at: Instant,
    rows: Arc<Vec<Listing>>,
}

/// Cached listing source.
pub struct ListingScraper {
    http: Client,
    url: String,
    ttl: Duration,
    cache: tokio::sync::Mutex<Option<CachedListings>>,
}

impl ListingScraper {
    /// Create a scraper.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ListingsConfig) -> Result<Self, ListingError> {
        let http = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .map_err(|e| ListingError::Fetch(e.to_string()))?;

        Ok(Self {
            http,
            url: config.csv_url.clone(),
            ttl: config.cache_ttl,
            cache: tokio::sync::Mutex::new(None),
        })
    }

    /// All listings, refetched once the cache is older than the TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if the CSV cannot be fetched or parsed.
    pub async fn all(&self) -> Result<Arc<Vec<Listing>>, ListingError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref()
            && cached.fetched_at.elapsed() < self.ttl
        {
            return Ok(Arc::clone(&cached.rows));
        }

        let rows = Arc::new(self.fetch().await.inspect_err(|e| {
            metrics::record_listing_fetch(false);
            tracing::error!(url = %self.url, error = %e, "Listing fetch failed");
        })?);
        metrics::record_listing_fetch(true);
        tracing::info!(count = rows.len(), "Listing CSV refreshed");

        *cache = Some(CachedListings {
            fetched_at: Instant::now(),
            rows: Arc::clone(&rows),
        });
        Ok(rows)
    }

    /// Listings whose symbol or name contains `query`, ignoring case.
    ///
    /// # Errors
    ///
    /// `BlankQuery` for a blank query, otherwise fetch errors.
    pub async fn search(&self, query: &str) -> Result<Vec<Listing>, ListingError> {
        let needle = query.trim().to_uppercase();
        if needle.is_empty() {
            return Err(ListingError::BlankQuery);
        }

        Ok(self
            .all()
            .await?
            .iter()
            .filter(|l| {
                l.symbol.to_uppercase().contains(&needle) || l.name.to_uppercase().contains(&needle)
            })
            .cloned()
            .collect())
    }

    /// Listing with exactly this symbol, ignoring case.
    ///
    /// # Errors
    ///
    /// `NotFound` if no row matches, otherwise fetch errors.
    pub async fn find(&self, symbol: &str) -> Result<Listing, ListingError> {
        let symbol = symbol.trim();
        self.all()
            .await?
            .iter()
            .find(|l| l.symbol.eq_ignore_ascii_case(symbol))
            .cloned()
            .ok_or_else(|| ListingError::NotFound(symbol.to_uppercase()))
    }

    async fn fetch(&self) -> Result<Vec<Listing>, ListingError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ListingError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ListingError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ListingError::Fetch(e.to_string()))?;
        parse_listings(&body)
    }
}

// =============================================================================
// Tests
// =============================================================================
