//! Subscription Registry
//!
//! Domain types for the real-time subscriptions held by the gateway.
//!
//! # Design
//!
//! The registry keeps at most one entry per subscription class. Writing a
//! class replaces its entry entirely: the previous members are discarded,
//! never merged. Upstream changes are planned against every class so that
//! a symbol still held by another class is not dropped from the vendor
//! connection.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

// =============================================================================
// Types
// =============================================================================

/// A formatted instrument identifier (`NSE:INFY`, or a fund identifier).
pub type Member = String;

/// Subscription class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SubscriptionClass {
    /// Exchange-listed stocks.
    #[serde(rename = "stocks")]
    Stocks,
    /// Mutual funds.
    #[serde(rename = "mutualFunds")]
    MutualFunds,
}

impl SubscriptionClass {
    /// Get all subscription classes.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Stocks, Self::MutualFunds]
    }

    /// Registry key of the class.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            Self::Stocks => "stocks",
            Self::MutualFunds => "mutualFunds",
        }
    }

    /// Parse the class from its URL path segment.
    #[must_use]
    pub fn from_path(segment: &str) -> Option<Self> {
        match segment {
            "stocks" => Some(Self::Stocks),
            "mutual-funds" => Some(Self::MutualFunds),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubscriptionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

// =============================================================================
// Member Formatting
// =============================================================================

/// Reasons a member list is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemberError {
    /// No members were given.
    #[error("at least one member is required")]
    Empty,
    /// A member was blank after trimming.
    #[error("member at position {0} is blank")]
    Blank(usize),
    /// A member contains characters outside the allowed set.
    #[error("member {0:?} is malformed")]
    Malformed(String),
}

/// Format stock symbols as exchange-prefixed members.
///
/// Bare symbols get `default_exchange`; prefixed ones keep their exchange.
///
/// # Errors
///
/// Returns `MemberError` if the list is empty or any symbol is blank or
/// malformed.
pub fn format_stock_members<S: AsRef<str>>(
    symbols: &[S],
    default_exchange: &str,
) -> Result<BTreeSet<Member>, MemberError> {
    if symbols.is_empty() {
        return Err(MemberError::Empty);
    }

    let mut members = BTreeSet::new();
    for (position, raw) in symbols.iter().enumerate() {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(MemberError::Blank(position));
        }

        let upper = trimmed.to_ascii_uppercase();
        let (exchange, symbol) = match upper.split_once(':') {
            Some((exchange, symbol)) => (exchange.to_string(), symbol.to_string()),
            None => (default_exchange.to_ascii_uppercase(), upper.clone()),
        };

        let exchange_ok = !exchange.is_empty() && exchange.chars().all(|c| c.is_ascii_uppercase());
        let symbol_ok = !symbol.is_empty()
            && symbol
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || "&-_.".contains(c));

        if !exchange_ok || !symbol_ok {
            return Err(MemberError::Malformed(trimmed.to_string()));
        }

        members.insert(format!("{exchange}:{symbol}"));
    }

    Ok(members)
}

/// Format mutual fund identifiers as members.
///
/// # Errors
///
/// Returns `MemberError` if the list is empty or any identifier is blank or
/// not alphanumeric.
pub fn format_fund_members<S: AsRef<str>>(fund_ids: &[S]) -> Result<BTreeSet<Member>, MemberError> {
    if fund_ids.is_empty() {
        return Err(MemberError::Empty);
    }

    let mut members = BTreeSet::new();
    for (position, raw) in fund_ids.iter().enumerate() {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(MemberError::Blank(position));
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(MemberError::Malformed(trimmed.to_string()));
        }
        members.insert(trimmed.to_ascii_uppercase());
    }

    Ok(members)
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Changes to upstream subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Members to subscribe to.
    pub subscribe: BTreeSet<Member>,
    /// Members to unsubscribe from.
    pub unsubscribe: BTreeSet<Member>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

// =============================================================================
// Subscription Entry
// =============================================================================

/// The registered subscription of one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionEntry {
    /// Subscription class.
    pub class: SubscriptionClass,
    /// Formatted members.
    pub members: BTreeSet<Member>,
    /// ID of the handle serving this entry.
    pub id: Uuid,
    /// When the entry was registered.
    pub created_at: DateTime<Utc>,
}

impl SubscriptionEntry {
    /// Create an entry with a fresh ID.
    #[must_use]
    pub fn new(class: SubscriptionClass, members: BTreeSet<Member>) -> Self {
        Self {
            class,
            members,
            id: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Last-write-wins map from subscription class to its entry.
///
/// # Example
///
/// ```rust
/// use std::collections::BTreeSet;
/// use kite_gateway::domain::subscription::{
///     SubscriptionClass, SubscriptionEntry, SubscriptionRegistry,
/// };
///
/// let registry = SubscriptionRegistry::new();
/// let first = BTreeSet::from(["NSE:RELIANCE".to_string(), "NSE:TCS".to_string()]);
/// registry.replace(SubscriptionEntry::new(SubscriptionClass::Stocks, first));
///
/// let second = BTreeSet::from(["NSE:INFY".to_string()]);
/// let changes = registry.plan(SubscriptionClass::Stocks, &second);
/// assert!(changes.unsubscribe.contains("NSE:TCS"));
///
/// registry.replace(SubscriptionEntry::new(SubscriptionClass::Stocks, second.clone()));
/// assert_eq!(registry.get(SubscriptionClass::Stocks).unwrap().members, second);
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<BTreeMap<SubscriptionClass, SubscriptionEntry>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Plan the upstream changes for replacing `class` with `members`.
    ///
    /// Members already held by any class are not re-subscribed. Members of
    /// the replaced entry are unsubscribed unless the new set or another
    /// class still holds them.
    #[must_use]
    pub fn plan(&self, class: SubscriptionClass, members: &BTreeSet<Member>) -> SubscriptionChanges {
        let entries = self.entries.read();

        let held_elsewhere: BTreeSet<&Member> = entries
            .values()
            .filter(|entry| entry.class != class)
            .flat_map(|entry| entry.members.iter())
            .collect();
        let previous = entries.get(&class).map(|entry| &entry.members);

        let subscribe = members
            .iter()
            .filter(|m| !held_elsewhere.contains(m) && !previous.is_some_and(|p| p.contains(*m)))
            .cloned()
            .collect();

        let unsubscribe = previous
            .into_iter()
            .flatten()
            .filter(|m| !members.contains(*m) && !held_elsewhere.contains(m))
            .cloned()
            .collect();

        SubscriptionChanges {
            subscribe,
            unsubscribe,
        }
    }

    /// Register an entry, returning the one it replaced.
    pub fn replace(&self, entry: SubscriptionEntry) -> Option<SubscriptionEntry> {
        self.entries.write().insert(entry.class, entry)
    }

    /// Get the entry of a class.
    #[must_use]
    pub fn get(&self, class: SubscriptionClass) -> Option<SubscriptionEntry> {
        self.entries.read().get(&class).cloned()
    }

    /// Snapshot of every entry, ordered by class.
    #[must_use]
    pub fn entries(&self) -> Vec<SubscriptionEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Every member across every class.
    #[must_use]
    pub fn all_members(&self) -> BTreeSet<Member> {
        self.entries
            .read()
            .values()
            .flat_map(|entry| entry.members.iter().cloned())
            .collect()
    }

    /// Whether no class is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove every entry, returning them.
    pub fn clear(&self) -> Vec<SubscriptionEntry> {
        std::mem::take(&mut *self.entries.write())
            .into_values()
            .collect()
    }

    /// Get statistics for the registry.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let entries = self.entries.read();
        SubscriptionStats {
            class_count: entries.len(),
            member_count: entries.values().map(|entry| entry.members.len()).sum(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubscriptionStats {
    /// Number of subscribed classes.
    pub class_count: usize,
    /// Number of members across all classes.
    pub member_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
