//! Connector facade

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::account::AccountCache;
use crate::adapter::VenueAdapter;
use crate::config::ConnectorConfig;
use crate::depth::DepthCache;
use crate::errors::{ConnectorError, ConnectorResult};
use crate::events::{ConnectorEvent, EventDispatcher, EventKind};
use crate::stream::{
    ChannelDriver, ChannelKind, ConnectionState, StreamChannel, StreamDialer, StreamMetrics,
    WsDialer,
};
use crate::symbols::SymbolCache;
use crate::types::{AssetBalance, DecodedFrame, DepthSnapshot, SymbolDirectory, SymbolEntry};

/// Unified view of one venue's market data and account state.
///
/// Query paths are served from the caches, hitting the network only when
/// an entry's TTL has lapsed; subscribe paths keep at most one public and
/// one private streaming connection alive across drops.
pub struct Connector {
    config: ConnectorConfig,
    adapter: Arc<dyn VenueAdapter>,
    dialer: Arc<dyn StreamDialer>,
    symbols: Arc<SymbolCache>,
    depth: Arc<DepthCache>,
    account: Arc<AccountCache>,
    events: Arc<EventDispatcher>,
    public: Mutex<Option<StreamChannel>>,
    private: Mutex<Option<StreamChannel>>,
}

impl Connector {
    pub fn new(config: ConnectorConfig, adapter: Arc<dyn VenueAdapter>) -> Self {
        Self::with_dialer(config, adapter, Arc::new(WsDialer))
    }

    /// Construction seam for tests: swap the wire dialer.
    pub fn with_dialer(
        config: ConnectorConfig,
        adapter: Arc<dyn VenueAdapter>,
        dialer: Arc<dyn StreamDialer>,
    ) -> Self {
        Self {
            symbols: Arc::new(SymbolCache::new(config.symbol_ttl)),
            depth: Arc::new(DepthCache::new(config.depth_ttl)),
            account: Arc::new(AccountCache::new(config.account_ttl)),
            events: Arc::new(EventDispatcher::new()),
            public: Mutex::new(None),
            private: Mutex::new(None),
            config,
            adapter,
            dialer,
        }
    }

    /// Register the single handler for an event category; overwrites any
    /// previous registration.
    pub fn on(&self, kind: EventKind, handler: impl Fn(ConnectorEvent) + Send + Sync + 'static) {
        self.events.on(kind, handler);
    }

    /// The whole symbol directory, refreshed when stale.
    pub async fn query_symbols(&self) -> SymbolDirectory {
        self.symbols.all(&*self.adapter).await
    }

    /// One directory entry, refreshed when stale.
    pub async fn query_symbol(&self, base: &str, quote: &str) -> ConnectorResult<SymbolEntry> {
        self.symbols.resolve(&*self.adapter, base, quote).await
    }

    /// Current order book for a pair. Pull-mode entries past their TTL
    /// refresh synchronously first; Push-mode entries return the latest
    /// streamed book without touching REST.
    pub async fn query_depth(&self, base: &str, quote: &str) -> ConnectorResult<DepthSnapshot> {
        let entry = self.symbols.resolve(&*self.adapter, base, quote).await?;
        self.depth
            .get_or_refresh(&*self.adapter, &entry, self.config.depth_limit)
            .await
    }

    /// Switch a pair to streamed depth. Resolves once the subscribe frame
    /// is queued (or the channel task is spawned), not once data arrives.
    /// Re-subscribing an already-subscribed pair is a no-op at the frame
    /// level.
    pub async fn subscribe_depth(&self, base: &str, quote: &str) -> ConnectorResult<()> {
        self.validate_depth_limit()?;
        let entry = self.symbols.resolve(&*self.adapter, base, quote).await?;

        let already_push = self.depth.mode(&entry.pair) == Some(crate::types::RefreshMode::Push);
        self.depth.mark_push(&entry.pair);

        let mut public = self.public.lock().await;
        match public.as_ref() {
            None => {
                info!("opening public channel for {}", entry.pair);
                let driver = Arc::new(PublicDriver {
                    adapter: self.adapter.clone(),
                    symbols: self.symbols.clone(),
                    depth: self.depth.clone(),
                    router: self.router(),
                    depth_limit: self.config.depth_limit,
                });
                *public = Some(StreamChannel::spawn(
                    ChannelKind::Public,
                    driver,
                    self.dialer.clone(),
                    self.config.reconnect_delay,
                ));
            }
            Some(channel) => {
                if already_push {
                    debug!("{} already subscribed", entry.pair);
                } else {
                    let frame = self
                        .adapter
                        .build_subscribe_frame(&[entry.venue_symbol.clone()], self.config.depth_limit);
                    // Connection-level failures here feed the reconnect
                    // policy; they are not the subscriber's problem.
                    if let Err(e) = channel.send(frame) {
                        warn!("subscribe frame for {} not sent: {}", entry.pair, e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Open the private channel: balance snapshot once over REST, then
    /// streaming deltas keep the account current.
    pub async fn subscribe_account(&self) -> ConnectorResult<()> {
        if !self.adapter.supports_account_stream() {
            return Err(ConnectorError::Unsupported {
                capability: "account streaming".to_string(),
            });
        }

        let mut private = self.private.lock().await;
        if private.is_some() {
            return Ok(());
        }

        self.account.mark_push();
        info!("opening private channel");
        let driver = Arc::new(PrivateDriver {
            adapter: self.adapter.clone(),
            account: self.account.clone(),
            router: self.router(),
        });
        *private = Some(StreamChannel::spawn(
            ChannelKind::Private,
            driver,
            self.dialer.clone(),
            self.config.reconnect_delay,
        ));
        Ok(())
    }

    /// All cached balances, snapshot-refreshed when Pull-mode and stale.
    pub async fn query_assets(
        &self,
    ) -> ConnectorResult<std::collections::HashMap<String, AssetBalance>> {
        self.account.ensure_fresh(&*self.adapter).await?;
        Ok(self.account.balances())
    }

    /// One asset's balance, if known.
    pub async fn query_asset(&self, asset: &str) -> ConnectorResult<Option<AssetBalance>> {
        self.account.ensure_fresh(&*self.adapter).await?;
        Ok(self.account.balance(asset))
    }

    pub async fn channel_state(&self, kind: ChannelKind) -> Option<ConnectionState> {
        self.channel(kind).await.map(|c| c.state())
    }

    pub async fn stream_metrics(&self, kind: ChannelKind) -> Option<StreamMetrics> {
        self.channel(kind).await.map(|c| c.metrics())
    }

    async fn channel(&self, kind: ChannelKind) -> Option<StreamChannelView> {
        let guard = match kind {
            ChannelKind::Public => self.public.lock().await,
            ChannelKind::Private => self.private.lock().await,
        };
        guard.as_ref().map(|c| StreamChannelView {
            state: c.state(),
            metrics: c.metrics(),
        })
    }

    /// Intentional teardown of all connections; no reconnects fire.
    pub async fn destroy(&self) {
        if let Some(channel) = self.public.lock().await.take() {
            channel.shutdown();
        }
        if let Some(channel) = self.private.lock().await.take() {
            channel.shutdown();
        }
        info!("connector destroyed");
    }

    fn router(&self) -> Arc<FrameRouter> {
        Arc::new(FrameRouter {
            symbols: self.symbols.clone(),
            depth: self.depth.clone(),
            account: self.account.clone(),
            events: self.events.clone(),
        })
    }

    fn validate_depth_limit(&self) -> ConnectorResult<()> {
        let allowed = self.adapter.allowed_depth_limits();
        if allowed.contains(&self.config.depth_limit) {
            Ok(())
        } else {
            Err(ConnectorError::Configuration {
                message: format!(
                    "depth limit {} not in venue's allowed set {:?}",
                    self.config.depth_limit, allowed
                ),
            })
        }
    }
}

struct StreamChannelView {
    state: ConnectionState,
    metrics: StreamMetrics,
}

impl StreamChannelView {
    fn state(&self) -> ConnectionState {
        self.state
    }
    fn metrics(&self) -> StreamMetrics {
        self.metrics
    }
}

/// Routes decoded frames to the caches and the dispatcher. Shared by both
/// channel drivers; routing is by frame type, not by channel.
struct FrameRouter {
    symbols: Arc<SymbolCache>,
    depth: Arc<DepthCache>,
    account: Arc<AccountCache>,
    events: Arc<EventDispatcher>,
}

impl FrameRouter {
    /// Returns whether the frame reached a cache or handler.
    fn route(&self, frame: DecodedFrame) -> bool {
        match frame {
            DecodedFrame::Depth { venue_symbol, book } => {
                let Some(pair) = self.symbols.pair_for_venue_symbol(&venue_symbol) else {
                    debug!("dropping depth frame for unmapped symbol {}", venue_symbol);
                    return false;
                };
                self.depth.apply_push(&pair, book);
                if let Some(depth) = self.depth.snapshot(&pair) {
                    self.events.emit(EventKind::Depth, ConnectorEvent::Depth { pair, depth });
                }
                true
            }
            DecodedFrame::Balances(deltas) => {
                self.account.apply_deltas(&deltas);
                self.events.emit(EventKind::Balance, ConnectorEvent::Balance { deltas });
                true
            }
            DecodedFrame::Order(event) => {
                self.events.emit(EventKind::Order, ConnectorEvent::Order { event });
                true
            }
            DecodedFrame::Ignore => {
                debug!("unroutable frame dropped");
                false
            }
        }
    }
}

/// Public market-data channel behavior: the URL and the on-open subscribe
/// frame are re-derived from the Push-mode depth entries every connect.
struct PublicDriver {
    adapter: Arc<dyn VenueAdapter>,
    symbols: Arc<SymbolCache>,
    depth: Arc<DepthCache>,
    router: Arc<FrameRouter>,
    depth_limit: u32,
}

impl PublicDriver {
    fn push_venue_symbols(&self) -> Vec<String> {
        self.depth
            .push_pairs()
            .iter()
            .filter_map(|pair| self.symbols.venue_symbol(pair))
            .collect()
    }
}

#[async_trait::async_trait]
impl ChannelDriver for PublicDriver {
    async fn connect_url(&self) -> ConnectorResult<String> {
        let symbols = self.push_venue_symbols();
        Ok(self.adapter.public_channel_url(&symbols, self.depth_limit))
    }

    async fn on_open(&self) -> ConnectorResult<Vec<String>> {
        let symbols = self.push_venue_symbols();
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        // Re-announcement of the whole Push set; harmless on venues whose
        // connect URL already carries the streams.
        Ok(vec![self.adapter.build_subscribe_frame(&symbols, self.depth_limit)])
    }

    fn handle_frame(&self, raw: &str) -> ConnectorResult<bool> {
        let frame = self.adapter.decode_frame(raw)?;
        Ok(self.router.route(frame))
    }
}

/// Private channel behavior: every (re)connect runs a fresh listen-key
/// handshake and re-pulls the balance snapshot, so reconnection is
/// idempotent with respect to cache state.
struct PrivateDriver {
    adapter: Arc<dyn VenueAdapter>,
    account: Arc<AccountCache>,
    router: Arc<FrameRouter>,
}

#[async_trait::async_trait]
impl ChannelDriver for PrivateDriver {
    async fn connect_url(&self) -> ConnectorResult<String> {
        self.adapter.private_channel_url().await
    }

    async fn on_open(&self) -> ConnectorResult<Vec<String>> {
        match self.adapter.fetch_account_snapshot().await {
            Ok(balances) => self.account.replace(balances),
            // Stale balances until the stream repairs them beats tearing
            // the fresh connection down.
            Err(e) if e.is_transient() => {
                warn!("account snapshot failed on open, keeping stale balances: {}", e);
            }
            Err(e) => return Err(e),
        }
        Ok(Vec::new())
    }

    fn handle_frame(&self, raw: &str) -> ConnectorResult<bool> {
        let frame = self.adapter.decode_frame(raw)?;
        Ok(self.router.route(frame))
    }
}
