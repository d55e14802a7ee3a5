//! Application Layer - Use cases and port definitions.
//!
//! The gateway service orchestrates the session and subscription domain
//! against the vendor ports.

/// Port interfaces for the vendor REST API and tick feed.
pub mod ports;

/// Application services for session, subscription and market status.
pub mod services;
