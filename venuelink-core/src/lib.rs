//! Venue Connector Library
//!
//! A unified REST + streaming view over a trading venue. Symbols, depth,
//! and account balances are cached locally; each cache starts out polled
//! over REST and switches to stream-driven updates once the caller
//! subscribes. Stream channels reconnect on their own, and callers consume
//! updates through event handlers or plain query calls.

pub mod account;
pub mod adapter;
pub mod binance;
pub mod config;
pub mod connector;
pub mod depth;
pub mod errors;
pub mod events;
pub mod signer;
pub mod stream;
pub mod symbols;
pub mod transport;
pub mod types;

// Re-export main types for easy access
pub use adapter::VenueAdapter;
pub use binance::BinanceAdapter;
pub use config::{ConnectorConfig, Credentials};
pub use connector::Connector;
pub use errors::{ConnectorError, ConnectorResult};
pub use events::{ConnectorEvent, EventKind};
pub use stream::{ConnectionState, StreamMetrics};
pub use types::{
    AssetBalance, BalanceDelta, BookUpdate, DepthSnapshot, OrderEvent, Pair, RefreshMode,
    VenueSymbol,
};
