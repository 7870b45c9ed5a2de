//! Per-symbol order-book cache

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

use crate::adapter::VenueAdapter;
use crate::errors::ConnectorResult;
use crate::types::{now_millis, BookUpdate, DepthSnapshot, Pair, PriceLevel, RefreshMode, SymbolEntry};

/// One cached order book. The entry doubles as the subscription record:
/// `mode == Push` means the pair is announced on the public channel.
#[derive(Clone, Debug)]
pub struct DepthEntry {
    pub mode: RefreshMode,
    pub last_updated: u64,
    pub asks: Vec<PriceLevel>,
    pub bids: Vec<PriceLevel>,
}

impl DepthEntry {
    fn empty(mode: RefreshMode) -> Self {
        Self {
            mode,
            last_updated: 0,
            asks: Vec::new(),
            bids: Vec::new(),
        }
    }
}

/// Depth cache with dual refresh strategies.
///
/// Pull entries refresh synchronously through the venue adapter when their
/// TTL lapses; Push entries reflect the latest streamed book, however old.
/// Asks and bids are always replaced together under the map's shard lock,
/// so readers see either the pre- or post-update book, never a torn one.
pub struct DepthCache {
    entries: DashMap<Pair, DepthEntry>,
    inflight: DashMap<Pair, Arc<Mutex<()>>>,
    ttl: Duration,
}

impl DepthCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            inflight: DashMap::new(),
            ttl,
        }
    }

    pub fn snapshot(&self, pair: &Pair) -> Option<DepthSnapshot> {
        self.entries.get(pair).map(|e| DepthSnapshot {
            last_updated: e.last_updated,
            asks: e.asks.clone(),
            bids: e.bids.clone(),
        })
    }

    pub fn mode(&self, pair: &Pair) -> Option<RefreshMode> {
        self.entries.get(pair).map(|e| e.mode)
    }

    /// Flip a pair to Push mode, creating the entry if needed. Mode never
    /// reverts; the streamed book takes over from here.
    pub fn mark_push(&self, pair: &Pair) {
        match self.entries.get_mut(pair) {
            Some(mut entry) => entry.mode = RefreshMode::Push,
            None => {
                self.entries
                    .insert(pair.clone(), DepthEntry::empty(RefreshMode::Push));
            }
        }
    }

    /// Pairs currently subscribed, re-derived on every (re)connect.
    pub fn push_pairs(&self) -> Vec<Pair> {
        self.entries
            .iter()
            .filter(|e| e.mode == RefreshMode::Push)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Apply a stream-sourced book; both sides replaced atomically.
    pub fn apply_push(&self, pair: &Pair, book: BookUpdate) {
        let now = now_millis();
        match self.entries.get_mut(pair) {
            Some(mut entry) => {
                entry.last_updated = now;
                entry.asks = book.asks;
                entry.bids = book.bids;
            }
            None => {
                // First frame won the race against mark_push.
                self.entries.insert(
                    pair.clone(),
                    DepthEntry {
                        mode: RefreshMode::Push,
                        last_updated: now,
                        asks: book.asks,
                        bids: book.bids,
                    },
                );
            }
        }
    }

    fn needs_pull_refresh(&self, pair: &Pair) -> bool {
        match self.entries.get(pair) {
            Some(entry) => {
                entry.mode == RefreshMode::Pull
                    && now_millis().saturating_sub(entry.last_updated) > self.ttl.as_millis() as u64
            }
            None => false,
        }
    }

    fn apply_pull(&self, pair: &Pair, book: BookUpdate) {
        if let Some(mut entry) = self.entries.get_mut(pair) {
            // A subscribe may have raced the REST refresh; the streamed
            // book owns a Push entry.
            if entry.mode != RefreshMode::Pull {
                return;
            }
            entry.last_updated = now_millis();
            entry.asks = book.asks;
            entry.bids = book.bids;
        }
    }

    /// Return the book for `entry`'s pair, refreshing a stale Pull entry
    /// synchronously first. A refresh failure is logged and the stale (or
    /// empty) book is served. At most one refresh runs per pair; callers
    /// that raced it coalesce rather than issuing redundant calls.
    pub async fn get_or_refresh(
        &self,
        adapter: &dyn VenueAdapter,
        entry: &SymbolEntry,
        limit: u32,
    ) -> ConnectorResult<DepthSnapshot> {
        let pair = &entry.pair;
        self.entries
            .entry(pair.clone())
            .or_insert_with(|| DepthEntry::empty(RefreshMode::Pull));

        if self.needs_pull_refresh(pair) {
            let gate = self
                .inflight
                .entry(pair.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            let _held = gate.lock().await;
            if self.needs_pull_refresh(pair) {
                match adapter.fetch_depth_snapshot(&entry.venue_symbol, limit).await {
                    Ok(book) => self.apply_pull(pair, book),
                    Err(e) => warn!("depth refresh for {} failed, serving stale book: {}", pair, e),
                }
            }
        }

        Ok(self.snapshot(pair).unwrap_or_default())
    }
}
