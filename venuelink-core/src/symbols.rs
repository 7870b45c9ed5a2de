//! Symbol directory cache

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::adapter::VenueAdapter;
use crate::errors::{ConnectorError, ConnectorResult};
use crate::types::{now_millis, Pair, SymbolDirectory, SymbolEntry};

/// Time-to-live cache over the venue's symbol listing.
///
/// The directory is replaced wholesale on a successful refresh; a failed
/// refresh leaves the prior entries intact and is only logged; the
/// contract tolerates staleness over unavailability. At most one refresh
/// runs at a time; concurrent callers coalesce on the gate.
pub struct SymbolCache {
    directory: RwLock<SymbolDirectory>,
    refresh_gate: Mutex<()>,
    ttl: Duration,
}

impl SymbolCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            directory: RwLock::new(SymbolDirectory::default()),
            refresh_gate: Mutex::new(()),
            ttl,
        }
    }

    fn is_stale(&self) -> bool {
        let last = self.directory.read().last_refreshed;
        now_millis().saturating_sub(last) > self.ttl.as_millis() as u64
    }

    /// Refresh the directory if its TTL has lapsed.
    pub async fn ensure_fresh(&self, adapter: &dyn VenueAdapter) {
        if !self.is_stale() {
            return;
        }
        let _gate = self.refresh_gate.lock().await;
        // A waiter that lost the race finds a fresh directory here.
        if !self.is_stale() {
            return;
        }
        match adapter.list_symbols().await {
            Ok(listing) => {
                let stamped = now_millis();
                let mut entries = HashMap::with_capacity(listing.len());
                let mut by_venue_symbol = HashMap::with_capacity(listing.len());
                for symbol in listing {
                    let pair = Pair::new(&symbol.base_asset, &symbol.quote_asset);
                    by_venue_symbol.insert(symbol.venue_symbol.clone(), pair.clone());
                    entries.insert(
                        pair.clone(),
                        SymbolEntry {
                            pair,
                            venue_symbol: symbol.venue_symbol,
                            last_refreshed: stamped,
                        },
                    );
                }
                debug!("symbol directory refreshed: {} pairs", entries.len());
                *self.directory.write() = SymbolDirectory {
                    last_refreshed: stamped,
                    entries,
                    by_venue_symbol,
                };
            }
            Err(e) => {
                warn!("symbol refresh failed, serving stale directory: {}", e);
            }
        }
    }

    /// Resolve a normalized pair to its directory entry, refreshing first
    /// when stale.
    pub async fn resolve(
        &self,
        adapter: &dyn VenueAdapter,
        base: &str,
        quote: &str,
    ) -> ConnectorResult<SymbolEntry> {
        self.ensure_fresh(adapter).await;
        let pair = Pair::new(base, quote);
        self.directory
            .read()
            .entries
            .get(&pair)
            .cloned()
            .ok_or_else(|| ConnectorError::UnknownSymbol {
                symbol: pair.to_string(),
            })
    }

    /// Whole directory, refreshed first when stale.
    pub async fn all(&self, adapter: &dyn VenueAdapter) -> SymbolDirectory {
        self.ensure_fresh(adapter).await;
        self.directory.read().clone()
    }

    /// Reverse lookup for stream routing. No refresh: frames for symbols
    /// not yet in the directory are dropped by the caller.
    pub fn pair_for_venue_symbol(&self, venue_symbol: &str) -> Option<Pair> {
        self.directory.read().by_venue_symbol.get(venue_symbol).cloned()
    }

    /// Forward lookup without refresh; used when re-deriving stream
    /// subscriptions from cache state.
    pub fn venue_symbol(&self, pair: &Pair) -> Option<String> {
        self.directory
            .read()
            .entries
            .get(pair)
            .map(|e| e.venue_symbol.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BookUpdate, DecodedFrame, VenueSymbol};
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct ListingAdapter {
        calls: AtomicU64,
        fail: AtomicBool,
    }

    impl ListingAdapter {
        fn new() -> Self {
            Self {
                calls: AtomicU64::new(0),
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl VenueAdapter for ListingAdapter {
        fn name(&self) -> &str {
            "mock"
        }
        fn allowed_depth_limits(&self) -> &[u32] {
            &[20]
        }
        fn supports_account_stream(&self) -> bool {
            false
        }
        async fn list_symbols(&self) -> ConnectorResult<Vec<VenueSymbol>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ConnectorError::Transport {
                    message: "boom".to_string(),
                });
            }
            Ok(vec![
                VenueSymbol {
                    base_asset: "BTC".to_string(),
                    quote_asset: "USDT".to_string(),
                    venue_symbol: "BTCUSDT".to_string(),
                },
                VenueSymbol {
                    base_asset: "ETH".to_string(),
                    quote_asset: "USDT".to_string(),
                    venue_symbol: "ETHUSDT".to_string(),
                },
            ])
        }
        async fn fetch_depth_snapshot(&self, _: &str, _: u32) -> ConnectorResult<BookUpdate> {
            unreachable!()
        }
        async fn fetch_account_snapshot(
            &self,
        ) -> ConnectorResult<StdHashMap<String, crate::types::AssetBalance>> {
            unreachable!()
        }
        fn public_channel_url(&self, _: &[String], _: u32) -> String {
            unreachable!()
        }
        async fn private_channel_url(&self) -> ConnectorResult<String> {
            unreachable!()
        }
        fn build_subscribe_frame(&self, _: &[String], _: u32) -> String {
            unreachable!()
        }
        fn decode_frame(&self, _: &str) -> ConnectorResult<DecodedFrame> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_resolve_hits_network_once_within_ttl() {
        let adapter = ListingAdapter::new();
        let cache = SymbolCache::new(Duration::from_millis(60_000));

        let entry = cache.resolve(&adapter, "btc", "usdt").await.unwrap();
        assert_eq!(entry.pair.as_str(), "BTC-USDT");
        assert_eq!(entry.venue_symbol, "BTCUSDT");

        cache.resolve(&adapter, "ETH", "USDT").await.unwrap();
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_pair_is_an_error() {
        let adapter = ListingAdapter::new();
        let cache = SymbolCache::new(Duration::from_millis(60_000));
        let err = cache.resolve(&adapter, "DOGE", "USDT").await.unwrap_err();
        assert!(matches!(err, ConnectorError::UnknownSymbol { symbol } if symbol == "DOGE-USDT"));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_prior_entries() {
        let adapter = ListingAdapter::new();
        let cache = SymbolCache::new(Duration::from_millis(0));

        cache.resolve(&adapter, "BTC", "USDT").await.unwrap();
        let stamped = cache.all(&adapter).await.last_refreshed;

        adapter.fail.store(true, Ordering::SeqCst);
        let entry = cache.resolve(&adapter, "BTC", "USDT").await.unwrap();
        assert_eq!(entry.venue_symbol, "BTCUSDT");
        // Failure must not move the refresh stamp.
        assert_eq!(cache.directory.read().last_refreshed, stamped);
    }

    #[tokio::test]
    async fn test_reverse_index_round_trips() {
        let adapter = ListingAdapter::new();
        let cache = SymbolCache::new(Duration::from_millis(60_000));
        let directory = cache.all(&adapter).await;
        for (pair, entry) in &directory.entries {
            assert_eq!(
                cache.pair_for_venue_symbol(&entry.venue_symbol).as_ref(),
                Some(pair)
            );
            assert_eq!(cache.venue_symbol(pair).as_deref(), Some(entry.venue_symbol.as_str()));
        }
    }
}
