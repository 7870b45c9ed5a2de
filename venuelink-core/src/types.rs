//! Connector data types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// Normalized trading pair, uppercase `BASE-QUOTE`, independent of the
/// venue's symbol spelling.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair(String);

impl Pair {
    pub fn new(base: &str, quote: &str) -> Self {
        Self(format!(
            "{}-{}",
            base.trim().to_uppercase(),
            quote.trim().to_uppercase()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of the symbol directory.
#[derive(Clone, Debug)]
pub struct SymbolEntry {
    pub pair: Pair,
    /// Venue-specific identifier, e.g. `BTCUSDT`.
    pub venue_symbol: String,
    pub last_refreshed: u64,
}

/// The full symbol directory. Replaced wholesale on each successful
/// refresh; `last_refreshed` is stamped only then, so a failed refresh
/// leaves the prior directory intact.
#[derive(Clone, Debug, Default)]
pub struct SymbolDirectory {
    pub last_refreshed: u64,
    pub entries: HashMap<Pair, SymbolEntry>,
    /// Reverse index used to route inbound stream frames.
    pub by_venue_symbol: HashMap<String, Pair>,
}

/// Symbol listing row as reported by the venue.
#[derive(Clone, Debug)]
pub struct VenueSymbol {
    pub base_asset: String,
    pub quote_asset: String,
    pub venue_symbol: String,
}

/// `(price, quantity)` book level.
pub type PriceLevel = (f64, f64);

/// Both sides of an order book, always carried together so cache updates
/// replace asks and bids atomically as a pair.
#[derive(Clone, Debug, Default)]
pub struct BookUpdate {
    pub asks: Vec<PriceLevel>,
    pub bids: Vec<PriceLevel>,
}

/// How a cache entry is kept current.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshMode {
    /// Refreshed synchronously on query when stale.
    Pull,
    /// Updated by inbound stream frames; query never triggers REST. Set
    /// once at subscribe time and never reverts.
    Push,
}

/// Point-in-time order book view returned to consumers.
#[derive(Clone, Debug, Default)]
pub struct DepthSnapshot {
    pub last_updated: u64,
    pub asks: Vec<PriceLevel>,
    pub bids: Vec<PriceLevel>,
}

/// Free / locked balance of one asset.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AssetBalance {
    pub free: f64,
    pub locked: f64,
}

/// Streamed balance change; replaces the named asset only.
#[derive(Clone, Debug)]
pub struct BalanceDelta {
    pub asset: String,
    pub free: f64,
    pub locked: f64,
}

/// Streamed order lifecycle event.
#[derive(Clone, Debug)]
pub struct OrderEvent {
    pub venue_symbol: String,
    pub order_id: String,
    pub side: String,
    pub status: String,
    pub price: f64,
    pub quantity: f64,
    pub filled_quantity: f64,
    pub timestamp: u64,
}

/// Result of decoding one inbound stream frame.
#[derive(Clone, Debug)]
pub enum DecodedFrame {
    Depth {
        venue_symbol: String,
        book: BookUpdate,
    },
    Balances(Vec<BalanceDelta>),
    Order(OrderEvent),
    /// Heartbeat, subscription ack, or anything unroutable.
    Ignore,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_normalization() {
        assert_eq!(Pair::new("btc", "usdt").as_str(), "BTC-USDT");
        assert_eq!(Pair::new("BTC", "USDT"), Pair::new("btc", "Usdt"));
        assert_eq!(Pair::new(" eth ", "btc").to_string(), "ETH-BTC");
    }
}
