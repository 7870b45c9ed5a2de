//! Cached account state

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

use crate::adapter::VenueAdapter;
use crate::errors::ConnectorResult;
use crate::types::{now_millis, AssetBalance, BalanceDelta, RefreshMode};

/// Balances and refresh bookkeeping; single instance per connector.
#[derive(Clone, Debug)]
pub struct AccountState {
    pub mode: RefreshMode,
    pub last_updated: u64,
    pub balances: HashMap<String, AssetBalance>,
}

impl Default for AccountState {
    fn default() -> Self {
        Self {
            mode: RefreshMode::Pull,
            last_updated: 0,
            balances: HashMap::new(),
        }
    }
}

/// Account cache: REST snapshot bootstrap, then streaming deltas once the
/// private channel flips it to Push. Deltas merge additively; each one
/// replaces only the named assets.
pub struct AccountCache {
    state: RwLock<AccountState>,
    refresh_gate: Mutex<()>,
    ttl: Duration,
}

impl AccountCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: RwLock::new(AccountState::default()),
            refresh_gate: Mutex::new(()),
            ttl,
        }
    }

    pub fn mode(&self) -> RefreshMode {
        self.state.read().mode
    }

    /// Mode never reverts once Push.
    pub fn mark_push(&self) {
        self.state.write().mode = RefreshMode::Push;
    }

    fn needs_refresh(&self) -> bool {
        let state = self.state.read();
        state.mode == RefreshMode::Pull
            && now_millis().saturating_sub(state.last_updated) > self.ttl.as_millis() as u64
    }

    /// Replace the whole balance map from a REST snapshot, preserving mode.
    pub fn replace(&self, balances: HashMap<String, AssetBalance>) {
        let mut state = self.state.write();
        state.last_updated = now_millis();
        state.balances = balances;
    }

    /// Merge streamed deltas; assets not named are left untouched.
    pub fn apply_deltas(&self, deltas: &[BalanceDelta]) {
        let mut state = self.state.write();
        state.last_updated = now_millis();
        for delta in deltas {
            state.balances.insert(
                delta.asset.clone(),
                AssetBalance {
                    free: delta.free,
                    locked: delta.locked,
                },
            );
        }
    }

    /// Refresh the snapshot when Pull-mode and stale. Transient transport
    /// failures are absorbed into staleness; configuration and capability
    /// errors surface to the caller.
    pub async fn ensure_fresh(&self, adapter: &dyn VenueAdapter) -> ConnectorResult<()> {
        if !self.needs_refresh() {
            return Ok(());
        }
        let _gate = self.refresh_gate.lock().await;
        if !self.needs_refresh() {
            return Ok(());
        }
        match adapter.fetch_account_snapshot().await {
            Ok(balances) => self.replace(balances),
            Err(e) if e.is_transient() => {
                warn!("account refresh failed, serving stale balances: {}", e);
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    pub fn balances(&self) -> HashMap<String, AssetBalance> {
        self.state.read().balances.clone()
    }

    pub fn balance(&self, asset: &str) -> Option<AssetBalance> {
        self.state.read().balances.get(asset).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(assets: &[(&str, f64, f64)]) -> HashMap<String, AssetBalance> {
        assets
            .iter()
            .map(|(a, free, locked)| {
                (
                    a.to_string(),
                    AssetBalance {
                        free: *free,
                        locked: *locked,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_deltas_replace_only_named_assets() {
        let cache = AccountCache::new(Duration::from_millis(60_000));
        cache.replace(snapshot(&[("BTC", 1.0, 0.0), ("ETH", 10.0, 2.0)]));

        cache.apply_deltas(&[BalanceDelta {
            asset: "BTC".to_string(),
            free: 0.5,
            locked: 0.5,
        }]);

        assert_eq!(
            cache.balance("BTC"),
            Some(AssetBalance {
                free: 0.5,
                locked: 0.5
            })
        );
        // ETH untouched by a delta naming only BTC.
        assert_eq!(
            cache.balance("ETH"),
            Some(AssetBalance {
                free: 10.0,
                locked: 2.0
            })
        );
    }

    #[test]
    fn test_snapshot_replaces_wholesale() {
        let cache = AccountCache::new(Duration::from_millis(60_000));
        cache.replace(snapshot(&[("BTC", 1.0, 0.0)]));
        cache.replace(snapshot(&[("ETH", 3.0, 0.0)]));
        assert_eq!(cache.balance("BTC"), None);
        assert_eq!(cache.balances().len(), 1);
    }

    #[test]
    fn test_mode_is_sticky() {
        let cache = AccountCache::new(Duration::from_millis(0));
        assert_eq!(cache.mode(), RefreshMode::Pull);
        assert!(cache.needs_refresh());
        cache.mark_push();
        assert_eq!(cache.mode(), RefreshMode::Push);
        // Push-mode state is never refreshed synchronously, even past TTL.
        assert!(!cache.needs_refresh());
    }
}
