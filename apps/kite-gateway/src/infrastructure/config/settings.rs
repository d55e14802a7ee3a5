//! Gateway Configuration Settings
//!
//! Configuration types for both services, loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Default Kite Connect REST endpoint.
pub const DEFAULT_KITE_API_URL: &str = "https://api.kite.trade";

/// Default Kite Connect login endpoint.
pub const DEFAULT_KITE_LOGIN_URL: &str = "https://kite.zerodha.com/connect/login";

/// Default Kite Ticker WebSocket endpoint.
pub const DEFAULT_KITE_TICKER_URL: &str = "wss://ws.kite.trade";

/// Default NSE equity listing CSV.
pub const DEFAULT_LISTINGS_CSV_URL: &str =
    "https://archives.nseindia.com/content/equities/EQUITY_L.csv";

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Local development (error details are exposed).
    Development,
    /// Production.
    #[default]
    Production,
}

impl Environment {
    /// Parse environment from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Self::Development,
            _ => Self::Production,
        }
    }

    /// Check if this is the development environment.
    #[must_use]
    pub const fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

/// Kite Connect API credentials.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
        }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the API secret.
    #[must_use]
    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Allowed CORS origins (empty = any).
    pub cors_origins: Vec<String>,
}

impl ServerSettings {
    /// Socket address string for binding.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn from_env(default_port: u16) -> Self {
        Self {
            host: std::env::var("HOST")
                .ok()
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_env_u16("PORT", default_port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// Vendor endpoint settings.
#[derive(Debug, Clone)]
pub struct KiteSettings {
    /// REST base URL.
    pub api_url: String,
    /// Login page URL.
    pub login_url: String,
    /// Ticker WebSocket URL.
    pub ticker_url: String,
    /// REST request timeout.
    pub http_timeout: Duration,
}

impl Default for KiteSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_KITE_API_URL.to_string(),
            login_url: DEFAULT_KITE_LOGIN_URL.to_string(),
            ticker_url: DEFAULT_KITE_TICKER_URL.to_string(),
            http_timeout: Duration::from_secs(10),
        }
    }
}

/// Ticker connection settings.
#[derive(Debug, Clone)]
pub struct TickerSettings {
    /// Capacity of the tick broadcast channel (batches).
    pub channel_capacity: usize,
    /// Silence on the socket before the connection is considered dead.
    /// The vendor sends a heartbeat every second.
    pub read_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for TickerSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            read_timeout: Duration::from_secs(10),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 50,
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Deployment environment.
    pub environment: Environment,
    /// API credentials.
    pub credentials: Credentials,
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Vendor endpoints.
    pub kite: KiteSettings,
    /// Ticker connection settings.
    pub ticker: TickerSettings,
    /// Redirect URL registered with the vendor app.
    pub redirect_url: String,
    /// Frontend the OAuth callback forwards to.
    pub frontend_url: String,
    /// Exchange prefixed to bare stock symbols.
    pub default_exchange: String,
}

impl GatewayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = required_env("KITE_API_KEY")?;
        let api_secret = required_env("KITE_API_SECRET")?;

        let environment = std::env::var("APP_ENV")
            .map(|s| Environment::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let server = ServerSettings::from_env(3000);

        let kite = KiteSettings {
            api_url: env_or("KITE_API_URL", DEFAULT_KITE_API_URL),
            login_url: env_or("KITE_LOGIN_URL", DEFAULT_KITE_LOGIN_URL),
            ticker_url: env_or("KITE_TICKER_URL", DEFAULT_KITE_TICKER_URL),
            http_timeout: parse_env_duration_secs(
                "KITE_HTTP_TIMEOUT_SECS",
                KiteSettings::default().http_timeout,
            ),
        };

        let defaults = TickerSettings::default();
        let ticker = TickerSettings {
            channel_capacity: parse_env_usize("TICK_CHANNEL_CAPACITY", defaults.channel_capacity)
                .max(1),
            read_timeout: defaults.read_timeout,
            reconnect_delay_initial: parse_env_duration_millis(
                "TICKER_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "TICKER_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: defaults.reconnect_delay_multiplier,
            max_reconnect_attempts: parse_env_u32(
                "TICKER_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
        };

        let redirect_url = std::env::var("REDIRECT_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| format!("http://{}:{}/callback", server.host, server.port));

        let default_exchange = env_or("DEFAULT_EXCHANGE", "NSE").to_ascii_uppercase();
        if default_exchange.is_empty() || !default_exchange.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ConfigError::Invalid {
                key: "DEFAULT_EXCHANGE".to_string(),
                reason: "must be an exchange code such as NSE".to_string(),
            });
        }

        Ok(Self {
            environment,
            credentials: Credentials::new(api_key, api_secret),
            server,
            kite,
            ticker,
            redirect_url,
            frontend_url: env_or("FRONTEND_URL", "http://localhost:5173"),
            default_exchange,
        })
    }
}

/// Listing service configuration.
#[derive(Debug, Clone)]
pub struct ListingsConfig {
    /// Deployment environment.
    pub environment: Environment,
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// CSV source.
    pub csv_url: String,
    /// How long a fetched listing is served before refetching.
    pub cache_ttl: Duration,
    /// Fetch timeout.
    pub http_timeout: Duration,
}

impl ListingsConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            environment: std::env::var("APP_ENV")
                .map(|s| Environment::from_str_case_insensitive(&s))
                .unwrap_or_default(),
            server: ServerSettings::from_env(3001),
            csv_url: env_or("LISTINGS_CSV_URL", DEFAULT_LISTINGS_CSV_URL),
            cache_ttl: parse_env_duration_secs("LISTINGS_CACHE_TTL_SECS", Duration::from_secs(300)),
            http_timeout: parse_env_duration_secs("LISTINGS_HTTP_TIMEOUT_SECS", Duration::from_secs(15)),
        }
    }
}

/// Load `.env` from the working directory or the nearest ancestor that has
/// one. Variables already set in the environment win.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unusable value.
    #[error("environment variable {key} is invalid: {reason}")]
    Invalid {
        /// Variable name.
        key: String,
        /// Why it was rejected.
        reason: String,
    },
}

fn required_env(key: &str) -> Result<String, ConfigError> {
    let value = std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
