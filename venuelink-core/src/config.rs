//! Connector configuration

use std::time::Duration;

/// Venue API credential pair.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Access id / API key, sent in the venue's credential header.
    pub access_key: String,
    /// Shared secret used to sign authenticated requests.
    pub secret_key: String,
}

/// Connector configuration with documented defaults.
///
/// Defaults target Binance spot; every field is plain configuration, not
/// business logic baked into the runtime.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Base URL for REST calls.
    pub rest_host: String,
    /// Base URL for the streaming transport.
    pub stream_host: String,
    /// Optional credentials; without them only public endpoints work.
    pub credentials: Option<Credentials>,
    /// Order-book depth requested on snapshots and stream subscriptions.
    /// Must be one of the venue's allowed limits.
    pub depth_limit: u32,
    /// Symbol directory time-to-live (default 60 s).
    pub symbol_ttl: Duration,
    /// Pull-mode depth entry time-to-live (default 1 s).
    pub depth_ttl: Duration,
    /// Pull-mode account state time-to-live (default 60 s).
    pub account_ttl: Duration,
    /// Delay before a dropped streaming connection is re-dialed (default 1 s).
    pub reconnect_delay: Duration,
    /// REST request timeout (default 10 s); the in-flight call is cancelled.
    pub request_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            rest_host: "https://api.binance.com".to_string(),
            stream_host: "wss://stream.binance.com:9443".to_string(),
            credentials: None,
            depth_limit: 20,
            symbol_ttl: Duration::from_millis(60_000),
            depth_ttl: Duration::from_millis(1_000),
            account_ttl: Duration::from_millis(60_000),
            reconnect_delay: Duration::from_millis(1_000),
            request_timeout: Duration::from_millis(10_000),
        }
    }
}

impl ConnectorConfig {
    pub fn with_credentials(mut self, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        });
        self
    }
}
