//! Venue adapter capability set

use async_trait::async_trait;
use std::collections::HashMap;

use crate::errors::ConnectorResult;
use crate::types::{AssetBalance, BookUpdate, DecodedFrame, VenueSymbol};

/// Capability set a concrete venue must supply. The generic runtime is
/// written strictly against this trait, never against a concrete venue.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Depth limits the venue accepts for snapshots and subscriptions.
    fn allowed_depth_limits(&self) -> &[u32];

    /// Whether this instance can open a private account stream.
    fn supports_account_stream(&self) -> bool;

    /// Full symbol listing from the venue.
    async fn list_symbols(&self) -> ConnectorResult<Vec<VenueSymbol>>;

    /// One REST order-book snapshot.
    async fn fetch_depth_snapshot(&self, venue_symbol: &str, limit: u32)
        -> ConnectorResult<BookUpdate>;

    /// Signed balance snapshot.
    async fn fetch_account_snapshot(&self) -> ConnectorResult<HashMap<String, AssetBalance>>;

    /// URL opening the public market-data channel already carrying
    /// `venue_symbols`, when the venue supports subscribe-by-URL.
    fn public_channel_url(&self, venue_symbols: &[String], depth_limit: u32) -> String;

    /// URL for the private channel. May itself perform a REST handshake,
    /// e.g. obtaining a listen key.
    async fn private_channel_url(&self) -> ConnectorResult<String>;

    /// Subscribe frame announcing `venue_symbols` on an open connection.
    fn build_subscribe_frame(&self, venue_symbols: &[String], depth_limit: u32) -> String;

    /// Decode one inbound frame. Heartbeats and acks decode to
    /// [`DecodedFrame::Ignore`]; an `Err` discards the single frame only.
    fn decode_frame(&self, raw: &str) -> ConnectorResult<DecodedFrame>;
}
