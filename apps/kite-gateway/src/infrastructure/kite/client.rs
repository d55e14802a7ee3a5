//! Kite Connect REST Client
//!
//! Implements [`BrokerApi`] over the Kite Connect v3 HTTP API.
//!
//! Every call carries `X-Kite-Version: 3`; authenticated calls add
//! `Authorization: token {api_key}:{access_token}`. JSON responses come
//! wrapped in an envelope:
//!
//! ```json
//! {"status": "success", "data": {}}
//! {"status": "error", "message": "...", "error_type": "TokenException"}
//! ```
//!
//! The instrument dump is the exception: it is a CSV body.
//!
//! Requests are not retried.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use url::Url;

use crate::application::ports::{
    BrokerApi, BrokerError, Candle, HistoricalQuery, Instrument, LastPrice, MfSip, SessionGrant,
};
use crate::application::services::IST;
use crate::domain::session::AccessToken;
use crate::infrastructure::config::{Credentials, KiteSettings};

const KITE_VERSION: &str = "3";

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionData {
    user_id: String,
    #[serde(default)]
    user_name: Option<String>,
    access_token: String,
    #[serde(default)]
    login_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoricalData {
    candles: Vec<(String, Decimal, Decimal, Decimal, Decimal, u64)>,
}

// =============================================================================
// Checksum
// =============================================================================

/// Token exchange checksum: hex SHA-256 of `api_key + request_token + api_secret`.
#[must_use]
pub fn session_checksum(api_key: &str, request_token: &str, api_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hasher.update(request_token.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Vendor timestamps are IST wall-clock time without an offset.
fn parse_ist_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .and_then(|naive| IST.from_local_datetime(&naive).single())
        .map(|ist| ist.with_timezone(&Utc))
}

// =============================================================================
// Client
// =============================================================================

/// Kite Connect REST client.
#[derive(Debug, Clone)]
pub struct KiteClient {
    http: Client,
    api_url: String,
    login_url: String,
    credentials: Credentials,
}

impl KiteClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Config` if an endpoint is not a valid URL or
    /// the HTTP client cannot be built.
    pub fn new(settings: &KiteSettings, credentials: Credentials) -> Result<Self, BrokerError> {
        for endpoint in [&settings.api_url, &settings.login_url] {
            Url::parse(endpoint).map_err(|e| BrokerError::Config {
                message: format!("invalid endpoint {endpoint:?}: {e}"),
            })?;
        }

        let http = Client::builder()
            .timeout(settings.http_timeout)
            .build()
            .map_err(|e| BrokerError::Config {
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            login_url: settings.login_url.clone(),
            credentials,
        })
    }

    /// Create a client whose REST and login endpoints live under `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Config` if `base_url` is not a valid URL.
    pub fn with_base_url(base_url: &str, credentials: Credentials) -> Result<Self, BrokerError> {
        let settings = KiteSettings {
            api_url: base_url.to_string(),
            login_url: format!("{}/connect/login", base_url.trim_end_matches('/')),
            ticker_url: String::new(),
            http_timeout: Duration::from_secs(5),
        };
        Self::new(&settings, credentials)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_url)
    }

    fn get(&self, path: &str, token: &AccessToken) -> RequestBuilder {
        self.http
            .get(self.url(path))
            .header("X-Kite-Version", KITE_VERSION)
            .header(
                "Authorization",
                format!("token {}:{}", self.credentials.api_key(), token.expose()),
            )
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        path: &str,
    ) -> Result<T, BrokerError> {
        let body = self.send_raw(request, path).await?;
        let envelope: Envelope<T> =
            serde_json::from_str(&body).map_err(|e| BrokerError::Decode {
                message: format!("{path}: {e}"),
            })?;

        match (envelope.status.as_str(), envelope.data) {
            ("success", Some(data)) => Ok(data),
            _ => Err(BrokerError::Api {
                error_type: envelope
                    .error_type
                    .unwrap_or_else(|| "GeneralException".to_string()),
                message: envelope
                    .message
                    .unwrap_or_else(|| "response carried no data".to_string()),
            }),
        }
    }

    /// Send a request and return the body of a 2xx response.
    async fn send_raw(&self, request: RequestBuilder, path: &str) -> Result<String, BrokerError> {
        let response = request.send().await.map_err(|e| {
            tracing::warn!(path, error = %e, "Kite request failed");
            BrokerError::Network {
                message: e.to_string(),
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| BrokerError::Network {
            message: e.to_string(),
        })?;

        if status.is_success() {
            return Ok(body);
        }

        let error: ErrorEnvelope = serde_json::from_str(&body).unwrap_or(ErrorEnvelope {
            message: Some(body),
            error_type: None,
        });
        let message = error
            .message
            .unwrap_or_else(|| status.as_u16().to_string());
        let error_type = error
            .error_type
            .unwrap_or_else(|| "GeneralException".to_string());

        tracing::warn!(
            path,
            status = status.as_u16(),
            error_type = %error_type,
            message = %message,
            "Kite API error"
        );

        Err(match status {
            StatusCode::FORBIDDEN => BrokerError::Unauthorized { message },
            _ if error_type == "TokenException" => BrokerError::Unauthorized { message },
            StatusCode::NOT_FOUND => BrokerError::NotFound { what: message },
            _ => BrokerError::Api {
                error_type,
                message,
            },
        })
    }
}

#[async_trait]
impl BrokerApi for KiteClient {
    fn login_url(&self) -> Result<String, BrokerError> {
        Url::parse_with_params(
            &self.login_url,
            &[("v", KITE_VERSION), ("api_key", self.credentials.api_key())],
        )
        .map(String::from)
        .map_err(|e| BrokerError::Config {
            message: e.to_string(),
        })
    }

    async fn generate_session(&self, request_token: &str) -> Result<SessionGrant, BrokerError> {
        let checksum = session_checksum(
            self.credentials.api_key(),
            request_token,
            self.credentials.api_secret(),
        );
        let request = self
            .http
            .post(self.url("/session/token"))
            .header("X-Kite-Version", KITE_VERSION)
            .form(&[
                ("api_key", self.credentials.api_key()),
                ("request_token", request_token),
                ("checksum", checksum.as_str()),
            ]);

        let data: SessionData = self.send_json(request, "/session/token").await?;
        Ok(SessionGrant {
            user_id: data.user_id,
            user_name: data.user_name,
            access_token: AccessToken::new(data.access_token),
            login_time: data.login_time.as_deref().and_then(parse_ist_timestamp),
        })
    }

    async fn instruments(
        &self,
        token: &AccessToken,
        exchange: Option<String>,
    ) -> Result<Vec<Instrument>, BrokerError> {
        let path = exchange.map_or_else(
            || "/instruments".to_string(),
            |exchange| format!("/instruments/{exchange}"),
        );
        let body = self.send_raw(self.get(&path, token), &path).await?;

        let mut reader = csv::Reader::from_reader(body.as_bytes());
        let instruments = reader
            .deserialize()
            .collect::<Result<Vec<Instrument>, _>>()
            .map_err(|e| BrokerError::Decode {
                message: format!("{path}: {e}"),
            })?;

        tracing::debug!(path = %path, count = instruments.len(), "Fetched instrument dump");
        Ok(instruments)
    }

    async fn mf_sips(&self, token: &AccessToken) -> Result<Vec<MfSip>, BrokerError> {
        self.send_json(self.get("/mf/sips", token), "/mf/sips").await
    }

    async fn historical(
        &self,
        token: &AccessToken,
        query: &HistoricalQuery,
    ) -> Result<Vec<Candle>, BrokerError> {
        let path = format!(
            "/instruments/historical/{}/{}",
            query.instrument_token, query.interval
        );
        let request = self
            .get(&path, token)
            .query(&[("from", query.from.as_str()), ("to", query.to.as_str())]);

        let data: HistoricalData = self.send_json(request, &path).await?;
        Ok(data
            .candles
            .into_iter()
            .map(|(timestamp, open, high, low, close, volume)| Candle {
                timestamp,
                open,
                high,
                low,
                close,
                volume,
            })
            .collect())
    }

    async fn ltp(
        &self,
        token: &AccessToken,
        instruments: &[String],
    ) -> Result<HashMap<String, LastPrice>, BrokerError> {
        let query: Vec<(&str, &str)> = instruments.iter().map(|i| ("i", i.as_str())).collect();
        let request = self.get("/quote/ltp", token).query(&query);
        self.send_json(request, "/quote/ltp").await
    }
}

// =============================================================================
// Tests
// =============================================================================
