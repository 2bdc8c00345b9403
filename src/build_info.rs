//! Static information that is determined at build time.

/// Client ID sent to brokers when the user does not specify one.
///
/// Newer redpanda versions fail to parse requests without a client ID, so one is always sent.
pub const DEFAULT_CLIENT_ID: &str = env!("CARGO_PKG_NAME");
