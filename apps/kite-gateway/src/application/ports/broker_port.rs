//! Broker Port (Driven Port)
//!
//! Interface for the brokerage REST API: login, token exchange, instrument
//! dump and market data lookups.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::session::AccessToken;

/// Result of a successful request-token exchange.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    /// Vendor user ID.
    pub user_id: String,
    /// Display name.
    pub user_name: Option<String>,
    /// Long-lived access token.
    pub access_token: AccessToken,
    /// Login time, when reported.
    pub login_time: Option<DateTime<Utc>>,
}

/// One row of the vendor instrument dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Numeric token used on the ticker.
    pub instrument_token: u32,
    /// Exchange-assigned token.
    pub exchange_token: u32,
    /// Trading symbol (e.g. `INFY`).
    pub tradingsymbol: String,
    /// Company or contract name.
    #[serde(default)]
    pub name: String,
    /// Last traded price at dump time.
    #[serde(with = "rust_decimal::serde::str")]
    pub last_price: Decimal,
    /// Expiry date for derivatives.
    #[serde(default)]
    pub expiry: Option<NaiveDate>,
    /// Strike price for options.
    #[serde(with = "rust_decimal::serde::str")]
    pub strike: Decimal,
    /// Minimum price increment.
    #[serde(with = "rust_decimal::serde::str")]
    pub tick_size: Decimal,
    /// Lot size.
    pub lot_size: u32,
    /// Instrument type (`EQ`, `FUT`, `CE`, `PE`).
    pub instrument_type: String,
    /// Segment (`NSE`, `NFO-OPT`, ...).
    pub segment: String,
    /// Exchange (`NSE`, `BSE`, `NFO`, ...).
    pub exchange: String,
}

impl Instrument {
    /// `EXCHANGE:SYMBOL` key.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.exchange, self.tradingsymbol)
    }
}

/// A registered systematic investment plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MfSip {
    /// SIP identifier.
    pub sip_id: String,
    /// Fund ISIN.
    pub tradingsymbol: String,
    /// Fund name.
    #[serde(default)]
    pub fund: String,
    /// `ACTIVE`, `PAUSED`, ...
    #[serde(default)]
    pub status: String,
    /// Amount per instalment.
    #[serde(default)]
    pub instalment_amount: f64,
    /// `monthly`, `weekly`, ...
    #[serde(default)]
    pub frequency: String,
    /// Instalments remaining (-1 = perpetual).
    #[serde(default)]
    pub instalments: i64,
    /// Next instalment date.
    #[serde(default)]
    pub next_instalment: Option<String>,
}

/// One historical candle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candle {
    /// Candle open time as reported by the vendor.
    pub timestamp: String,
    /// Open.
    pub open: Decimal,
    /// High.
    pub high: Decimal,
    /// Low.
    pub low: Decimal,
    /// Close.
    pub close: Decimal,
    /// Volume.
    pub volume: u64,
}

/// Last traded price of one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastPrice {
    /// Numeric token.
    pub instrument_token: u32,
    /// Last traded price.
    pub last_price: Decimal,
}

/// Historical data query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalQuery {
    /// Numeric token of the instrument.
    pub instrument_token: u32,
    /// Candle interval (`minute`, `5minute`, `day`, ...).
    pub interval: String,
    /// Range start (`yyyy-mm-dd` or `yyyy-mm-dd hh:mm:ss`).
    pub from: String,
    /// Range end.
    pub to: String,
}

/// Broker port error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// The access token was rejected or the request was forbidden.
    #[error("Broker rejected credentials: {message}")]
    Unauthorized {
        /// Error details.
        message: String,
    },

    /// The vendor answered with an error envelope.
    #[error("Broker API error ({error_type}): {message}")]
    Api {
        /// Vendor error class (`InputException`, `GeneralException`, ...).
        error_type: String,
        /// Error details.
        message: String,
    },

    /// Requested resource does not exist.
    #[error("Not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// Network or transport failure.
    #[error("Broker connection error: {message}")]
    Network {
        /// Error details.
        message: String,
    },

    /// Response body could not be decoded.
    #[error("Failed to decode broker response: {message}")]
    Decode {
        /// Error details.
        message: String,
    },

    /// Client configuration is unusable (bad endpoint URL).
    #[error("Broker client misconfigured: {message}")]
    Config {
        /// Error details.
        message: String,
    },
}

/// Port for the brokerage REST API.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Login page URL the user is sent to.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be built from configuration.
    fn login_url(&self) -> Result<String, BrokerError>;

    /// Exchange a request token for a session.
    async fn generate_session(&self, request_token: &str) -> Result<SessionGrant, BrokerError>;

    /// Instrument dump, optionally for one exchange.
    async fn instruments(
        &self,
        token: &AccessToken,
        exchange: Option<String>,
    ) -> Result<Vec<Instrument>, BrokerError>;

    /// Registered mutual fund SIPs.
    async fn mf_sips(&self, token: &AccessToken) -> Result<Vec<MfSip>, BrokerError>;

    /// Historical candles.
    async fn historical(
        &self,
        token: &AccessToken,
        query: &HistoricalQuery,
    ) -> Result<Vec<Candle>, BrokerError>;

    /// Last traded prices keyed by the `EXCHANGE:SYMBOL` that was asked for.
    async fn ltp(
        &self,
        token: &AccessToken,
        instruments: &[String],
    ) -> Result<HashMap<String, LastPrice>, BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_key_joins_exchange_and_symbol() {
        let instrument = Instrument {
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
        };
        assert_eq!(instrument.key(), "NSE:INFY");
    }

    #[test]
    fn broker_error_display() {
        let err = BrokerError::Api {
            error_type: "InputException".to_string(),
            message: "invalid token".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Broker API error (InputException): invalid token"
        );
    }
}
