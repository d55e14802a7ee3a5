//! Session Store
//!
//! Holds the broker session for the process. A session is installed by a
//! successful token exchange and replaced wholesale by the next one; there
//! is no renewal or expiry here. Every protected operation reads it.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

// =============================================================================
// Access Token
// =============================================================================

/// Long-lived vendor access token.
///
/// `Debug` redacts the value so sessions can be logged safely.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a raw token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the raw token for request signing.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

// =============================================================================
// Session
// =============================================================================

/// An authenticated broker session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Vendor user ID.
    pub user_id: String,
    /// Display name of the user, when the vendor returns one.
    pub user_name: Option<String>,
    /// Token used to sign REST calls and the ticker connection.
    pub access_token: AccessToken,
    /// Login time reported by the vendor, or the local time of the exchange.
    pub login_time: DateTime<Utc>,
}

/// Public view of a session (no token).
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    /// Vendor user ID.
    pub user_id: String,
    /// Display name of the user.
    pub user_name: Option<String>,
    /// Login time.
    pub login_time: DateTime<Utc>,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            user_id: session.user_id.clone(),
            user_name: session.user_name.clone(),
            login_time: session.login_time,
        }
    }
}

// =============================================================================
// Session Store
// =============================================================================

/// Process-wide session slot.
#[derive(Debug, Default)]
pub struct SessionStore {
    current: RwLock<Option<Session>>,
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a session is installed.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.current.read().is_some()
    }

    /// Get the current access token, if any.
    #[must_use]
    pub fn access_token(&self) -> Option<AccessToken> {
        self.current
            .read()
            .as_ref()
            .map(|session| session.access_token.clone())
    }

    /// Get a public summary of the current session.
    #[must_use]
    pub fn summary(&self) -> Option<SessionSummary> {
        self.current.read().as_ref().map(SessionSummary::from)
    }

    /// Install a session, returning the one it replaced.
    pub fn replace(&self, session: Session) -> Option<Session> {
        self.current.write().replace(session)
    }
}

// =============================================================================
// Tests
// =============================================================================
