//! Streaming connection lifecycle

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::errors::{ConnectorError, ConnectorResult};

/// Logical channel, at most one live connection each.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Public,
    Private,
}

/// Connection lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Per-channel frame counters, readable at any time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamMetrics {
    pub frames_received: u64,
    pub frames_routed: u64,
    pub decode_errors: u64,
    pub reconnects: u64,
}

#[derive(Default)]
struct MetricsInner {
    frames_received: AtomicU64,
    frames_routed: AtomicU64,
    decode_errors: AtomicU64,
    reconnects: AtomicU64,
}

impl MetricsInner {
    fn snapshot(&self) -> StreamMetrics {
        StreamMetrics {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_routed: self.frames_routed.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// One inbound event from the wire.
#[derive(Debug)]
pub enum LinkEvent {
    Text(String),
    Ping(Vec<u8>),
    Closed,
}

/// A single full-duplex text-frame connection.
#[async_trait]
pub trait StreamLink: Send {
    async fn send_text(&mut self, frame: String) -> ConnectorResult<()>;

    async fn send_pong(&mut self, payload: Vec<u8>) -> ConnectorResult<()>;

    /// Next inbound event; `Closed` once the peer hangs up.
    async fn next_event(&mut self) -> ConnectorResult<LinkEvent>;

    async fn close(&mut self) -> ConnectorResult<()>;
}

/// Dials persistent connections. Mocked in tests to script connects,
/// frames, and drops.
#[async_trait]
pub trait StreamDialer: Send + Sync {
    async fn dial(&self, url: &str) -> ConnectorResult<Box<dyn StreamLink>>;
}

/// Production dialer over tokio-tungstenite.
pub struct WsDialer;

#[async_trait]
impl StreamDialer for WsDialer {
    async fn dial(&self, url: &str) -> ConnectorResult<Box<dyn StreamLink>> {
        url::Url::parse(url).map_err(|e| ConnectorError::Configuration {
            message: format!("invalid stream url {}: {}", url, e),
        })?;
        let (ws, _) = connect_async(url).await?;
        Ok(Box::new(WsLink { inner: ws }))
    }
}

struct WsLink {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl StreamLink for WsLink {
    async fn send_text(&mut self, frame: String) -> ConnectorResult<()> {
        self.inner.send(Message::Text(frame)).await.map_err(Into::into)
    }

    async fn send_pong(&mut self, payload: Vec<u8>) -> ConnectorResult<()> {
        self.inner.send(Message::Pong(payload)).await.map_err(Into::into)
    }

    async fn next_event(&mut self) -> ConnectorResult<LinkEvent> {
        while let Some(message) = self.inner.next().await {
            match message? {
                Message::Text(text) => return Ok(LinkEvent::Text(text)),
                Message::Ping(payload) => return Ok(LinkEvent::Ping(payload)),
                Message::Close(frame) => {
                    debug!("close frame received: {:?}", frame);
                    return Ok(LinkEvent::Closed);
                }
                // Binary and pong frames are not part of the venue protocol.
                _ => continue,
            }
        }
        Ok(LinkEvent::Closed)
    }

    async fn close(&mut self) -> ConnectorResult<()> {
        self.inner.close(None).await.map_err(Into::into)
    }
}

/// Per-channel behavior supplied by the connector core. Everything a
/// reconnect needs is re-derived from current cache state, so the channel
/// task carries no replay log.
#[async_trait]
pub trait ChannelDriver: Send + Sync {
    /// URL for this (re)connect attempt; private channels may run a REST
    /// handshake here.
    async fn connect_url(&self) -> ConnectorResult<String>;

    /// On-open hook: frames announcing current subscriptions, plus any
    /// state bootstrap. An error closes the connection before steady state.
    async fn on_open(&self) -> ConnectorResult<Vec<String>>;

    /// Decode and route one inbound frame. Returns whether the frame was
    /// routed anywhere; heartbeats and acks decode but route nowhere. An
    /// error discards the frame only; the connection stays open.
    fn handle_frame(&self, raw: &str) -> ConnectorResult<bool>;
}

enum ControlFrame {
    Send(String),
    Shutdown,
}

/// Handle to one channel's background task.
///
/// The task owns the connection and self-heals: a peer- or network-
/// initiated drop schedules a re-dial after the configured delay, while
/// [`StreamChannel::shutdown`] sets the intentional flag first so no
/// reconnect fires.
pub struct StreamChannel {
    kind: ChannelKind,
    state: Arc<RwLock<ConnectionState>>,
    intentional: Arc<AtomicBool>,
    control: mpsc::UnboundedSender<ControlFrame>,
    metrics: Arc<MetricsInner>,
    _task: JoinHandle<()>,
}

impl StreamChannel {
    pub fn spawn(
        kind: ChannelKind,
        driver: Arc<dyn ChannelDriver>,
        dialer: Arc<dyn StreamDialer>,
        reconnect_delay: Duration,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));
        let intentional = Arc::new(AtomicBool::new(false));
        let metrics = Arc::new(MetricsInner::default());

        let task = tokio::spawn(run_channel(
            kind,
            driver,
            dialer,
            reconnect_delay,
            state.clone(),
            intentional.clone(),
            metrics.clone(),
            control_rx,
        ));

        Self {
            kind,
            state,
            intentional,
            control: control_tx,
            metrics,
            _task: task,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn metrics(&self) -> StreamMetrics {
        self.metrics.snapshot()
    }

    /// Queue a frame for the write half. Fails only if the task is gone;
    /// frames queued while the connection is down are dropped, since
    /// subscriptions are re-derived on reconnect anyway.
    pub fn send(&self, frame: String) -> ConnectorResult<()> {
        self.control
            .send(ControlFrame::Send(frame))
            .map_err(|_| ConnectorError::Transport {
                message: "stream channel task is gone".to_string(),
            })
    }

    /// Intentional teardown: mark the close as caller-initiated before
    /// signalling, so the task closes the link and exits without
    /// scheduling a reconnect.
    pub fn shutdown(&self) {
        self.intentional.store(true, Ordering::SeqCst);
        let _ = self.control.send(ControlFrame::Shutdown);
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_channel(
    kind: ChannelKind,
    driver: Arc<dyn ChannelDriver>,
    dialer: Arc<dyn StreamDialer>,
    reconnect_delay: Duration,
    state: Arc<RwLock<ConnectionState>>,
    intentional: Arc<AtomicBool>,
    metrics: Arc<MetricsInner>,
    mut control: mpsc::UnboundedReceiver<ControlFrame>,
) {
    let mut first_attempt = true;
    'reconnect: loop {
        if intentional.load(Ordering::SeqCst) {
            break;
        }
        if !first_attempt {
            metrics.reconnects.fetch_add(1, Ordering::Relaxed);
            // Wait out the delay without going deaf to shutdown.
            let delay = tokio::time::sleep(reconnect_delay);
            tokio::pin!(delay);
            loop {
                tokio::select! {
                    _ = &mut delay => break,
                    message = control.recv() => match message {
                        Some(ControlFrame::Shutdown) | None => break 'reconnect,
                        // Dropped: the reconnect re-derives subscriptions.
                        Some(ControlFrame::Send(_)) => {}
                    },
                }
            }
        }
        first_attempt = false;

        *state.write() = ConnectionState::Connecting;
        let url = match driver.connect_url().await {
            Ok(url) => url,
            Err(e) => {
                error!("{:?} channel handshake failed: {}", kind, e);
                *state.write() = ConnectionState::Disconnected;
                continue;
            }
        };
        let mut link = match dialer.dial(&url).await {
            Ok(link) => link,
            Err(e) => {
                error!("{:?} channel connect failed: {}", kind, e);
                *state.write() = ConnectionState::Disconnected;
                continue;
            }
        };
        if intentional.load(Ordering::SeqCst) {
            let _ = link.close().await;
            break;
        }

        // On-open hook; a failure here closes before steady state.
        let open_ok = match driver.on_open().await {
            Ok(frames) => {
                let mut sent_all = true;
                for frame in frames {
                    if let Err(e) = link.send_text(frame).await {
                        error!("{:?} channel subscribe failed: {}", kind, e);
                        sent_all = false;
                        break;
                    }
                }
                sent_all
            }
            Err(e) => {
                error!("{:?} channel on-open hook failed: {}", kind, e);
                false
            }
        };
        if !open_ok {
            let _ = link.close().await;
            *state.write() = ConnectionState::Disconnected;
            continue;
        }

        *state.write() = ConnectionState::Open;
        info!("{:?} channel open", kind);

        loop {
            tokio::select! {
                message = control.recv() => match message {
                    Some(ControlFrame::Send(frame)) => {
                        if let Err(e) = link.send_text(frame).await {
                            warn!("{:?} channel send failed: {}", kind, e);
                            break;
                        }
                    }
                    Some(ControlFrame::Shutdown) | None => {
                        *state.write() = ConnectionState::Closing;
                        let _ = link.close().await;
                        break 'reconnect;
                    }
                },
                event = link.next_event() => match event {
                    Ok(LinkEvent::Text(text)) => {
                        metrics.frames_received.fetch_add(1, Ordering::Relaxed);
                        match driver.handle_frame(&text) {
                            Ok(true) => {
                                metrics.frames_routed.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(false) => {}
                            Err(e) => {
                                // Decode failures are isolated to the frame.
                                metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
                                warn!("{:?} channel dropping frame: {}", kind, e);
                            }
                        }
                    }
                    Ok(LinkEvent::Ping(payload)) => {
                        if let Err(e) = link.send_pong(payload).await {
                            warn!("{:?} channel pong failed: {}", kind, e);
                            break;
                        }
                    }
                    Ok(LinkEvent::Closed) => {
                        warn!("{:?} channel closed by peer", kind);
                        break;
                    }
                    Err(e) => {
                        error!("{:?} channel error: {}", kind, e);
                        break;
                    }
                },
            }
        }

        *state.write() = ConnectionState::Disconnected;
        if intentional.load(Ordering::SeqCst) {
            break;
        }
        warn!(
            "{:?} channel dropped, reconnecting in {} ms",
            kind,
            reconnect_delay.as_millis()
        );
    }
    *state.write() = ConnectionState::Disconnected;
    debug!("{:?} channel task exiting", kind);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::collections::VecDeque;

    struct ScriptLink {
        events: tokio::sync::mpsc::UnboundedReceiver<LinkEvent>,
        sent: Arc<PlMutex<Vec<String>>>,
    }

    #[async_trait]
    impl StreamLink for ScriptLink {
        async fn send_text(&mut self, frame: String) -> ConnectorResult<()> {
            self.sent.lock().push(frame);
            Ok(())
        }
        async fn send_pong(&mut self, _: Vec<u8>) -> ConnectorResult<()> {
            Ok(())
        }
        async fn next_event(&mut self) -> ConnectorResult<LinkEvent> {
            match self.events.recv().await {
                Some(event) => Ok(event),
                None => Ok(LinkEvent::Closed),
            }
        }
        async fn close(&mut self) -> ConnectorResult<()> {
            Ok(())
        }
    }

    /// Handle the test keeps for each dialed connection.
    struct LinkProbe {
        inject: tokio::sync::mpsc::UnboundedSender<LinkEvent>,
        sent: Arc<PlMutex<Vec<String>>>,
    }

    #[derive(Default)]
    struct ScriptDialer {
        dialed: PlMutex<Vec<String>>,
        probes: PlMutex<VecDeque<Arc<LinkProbe>>>,
    }

    impl ScriptDialer {
        fn dial_count(&self) -> usize {
            self.dialed.lock().len()
        }
        fn latest_probe(&self) -> Arc<LinkProbe> {
            self.probes.lock().back().cloned().expect("no connection dialed")
        }
    }

    #[async_trait]
    impl StreamDialer for ScriptDialer {
        async fn dial(&self, url: &str) -> ConnectorResult<Box<dyn StreamLink>> {
            self.dialed.lock().push(url.to_string());
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            let sent = Arc::new(PlMutex::new(Vec::new()));
            self.probes.lock().push_back(Arc::new(LinkProbe {
                inject: tx,
                sent: sent.clone(),
            }));
            Ok(Box::new(ScriptLink { events: rx, sent }))
        }
    }

    struct CountingDriver {
        frames: Arc<PlMutex<Vec<String>>>,
    }

    #[async_trait]
    impl ChannelDriver for CountingDriver {
        async fn connect_url(&self) -> ConnectorResult<String> {
            Ok("wss://example/ws".to_string())
        }
        async fn on_open(&self) -> ConnectorResult<Vec<String>> {
            Ok(vec!["subscribe".to_string()])
        }
        fn handle_frame(&self, raw: &str) -> ConnectorResult<bool> {
            if raw == "bad" {
                return Err(ConnectorError::Decode {
                    message: "bad frame".to_string(),
                });
            }
            if raw == "ack" {
                return Ok(false);
            }
            self.frames.lock().push(raw.to_string());
            Ok(true)
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn spawn_counting(
        dialer: &Arc<ScriptDialer>,
        delay: Duration,
    ) -> (StreamChannel, Arc<PlMutex<Vec<String>>>) {
        let frames = Arc::new(PlMutex::new(Vec::new()));
        let channel = StreamChannel::spawn(
            ChannelKind::Public,
            Arc::new(CountingDriver {
                frames: frames.clone(),
            }),
            dialer.clone(),
            delay,
        );
        (channel, frames)
    }

    #[tokio::test]
    async fn test_open_sends_subscribe_and_routes_frames() {
        let dialer = Arc::new(ScriptDialer::default());
        let (channel, frames) = spawn_counting(&dialer, Duration::from_millis(10));
        settle().await;

        assert_eq!(channel.state(), ConnectionState::Open);
        let probe = dialer.latest_probe();
        assert_eq!(probe.sent.lock().clone(), vec!["subscribe".to_string()]);

        probe.inject.send(LinkEvent::Text("one".to_string())).unwrap();
        probe.inject.send(LinkEvent::Text("two".to_string())).unwrap();
        settle().await;

        assert_eq!(frames.lock().clone(), vec!["one", "two"]);
        assert_eq!(channel.metrics().frames_routed, 2);
        channel.shutdown();
    }

    #[tokio::test]
    async fn test_unroutable_frames_count_as_received_only() {
        let dialer = Arc::new(ScriptDialer::default());
        let (channel, frames) = spawn_counting(&dialer, Duration::from_millis(10));
        settle().await;

        let probe = dialer.latest_probe();
        probe.inject.send(LinkEvent::Text("ack".to_string())).unwrap();
        probe.inject.send(LinkEvent::Text("data".to_string())).unwrap();
        settle().await;

        let metrics = channel.metrics();
        assert_eq!(metrics.frames_received, 2);
        assert_eq!(metrics.frames_routed, 1);
        assert_eq!(metrics.decode_errors, 0);
        assert_eq!(frames.lock().clone(), vec!["data"]);
        channel.shutdown();
    }

    #[tokio::test]
    async fn test_decode_error_keeps_connection_open() {
        let dialer = Arc::new(ScriptDialer::default());
        let (channel, frames) = spawn_counting(&dialer, Duration::from_millis(10));
        settle().await;

        let probe = dialer.latest_probe();
        probe.inject.send(LinkEvent::Text("bad".to_string())).unwrap();
        probe.inject.send(LinkEvent::Text("good".to_string())).unwrap();
        settle().await;

        assert_eq!(channel.state(), ConnectionState::Open);
        assert_eq!(frames.lock().clone(), vec!["good"]);
        assert_eq!(channel.metrics().decode_errors, 1);
        assert_eq!(dialer.dial_count(), 1);
        channel.shutdown();
    }

    #[tokio::test]
    async fn test_peer_close_schedules_reconnect() {
        let dialer = Arc::new(ScriptDialer::default());
        let (channel, _frames) = spawn_counting(&dialer, Duration::from_millis(10));
        settle().await;
        assert_eq!(dialer.dial_count(), 1);

        dialer.latest_probe().inject.send(LinkEvent::Closed).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(dialer.dial_count(), 2);
        assert_eq!(channel.state(), ConnectionState::Open);
        assert_eq!(channel.metrics().reconnects, 1);
        // The new connection is re-announced, not replayed.
        assert_eq!(
            dialer.latest_probe().sent.lock().clone(),
            vec!["subscribe".to_string()]
        );
        channel.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_suppresses_reconnect() {
        let dialer = Arc::new(ScriptDialer::default());
        let (channel, _frames) = spawn_counting(&dialer, Duration::from_millis(10));
        settle().await;

        channel.shutdown();
        dialer.latest_probe().inject.send(LinkEvent::Closed).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(dialer.dial_count(), 1);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }
}
