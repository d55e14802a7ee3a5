//! Domain Layer - Session, subscription and tick types.
//!
//! This layer holds the state the gateway keeps between requests with no
//! knowledge of HTTP or of the vendor wire protocols.

/// Broker session and access token.
pub mod session;

/// Subscription classes, member formatting and the subscription registry.
pub mod subscription;

/// Opaque tick records delivered by the vendor feed.
pub mod tick;
