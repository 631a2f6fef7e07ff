//! Live price overlay: a Socket.IO client for the `/chart` namespace.
//!
//! ## Lifecycle
//!
//! [`LiveFeed`] owns the connection. Nothing connects until the first
//! [`LiveFeed::subscribe`]; when the last [`Subscription`] is dropped the
//! connection task is cancelled and the socket closed. [`LiveFeed::shutdown`]
//! closes it regardless of outstanding subscriptions.
//!
//! ## Reconnection
//!
//! A lost connection is retried at a fixed delay up to the configured number of
//! attempts. The budget resets only once the namespace has been joined; a
//! socket that upgrades but never joins still uses up an attempt. When the
//! budget runs out, or the server rejects or disconnects the namespace,
//! subscribers get [`LiveEvent::Closed`] and the task ends.

pub mod book;
pub mod protocol;

use crate::api::normalize;
use crate::config::SocketConfig;
use crate::error::ChartError;
use crate::models::{LivePrice, MetricsUpdated, PriceUpdated};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_retry::strategy::FixedInterval;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use self::book::PriceBook;
use self::protocol::{EnginePacket, SocketPacket};

pub const PRICE_UPDATED: &str = "priceUpdated";
pub const METRICS_UPDATED: &str = "metricsUpdated";

/// Heartbeat window used until the server's handshake says otherwise.
const DEFAULT_HEARTBEAT_MS: u64 = 45_000;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// Namespace joined.
    Connected,
    /// Normalized `priceUpdated` tick, already merged into the price book.
    Price(LivePrice),
    /// Server recomputed its metrics; callers may refetch.
    Metrics(MetricsUpdated),
    /// Link lost; a reconnect follows.
    Disconnected,
    /// No further reconnects will be attempted.
    Closed,
}

// ── Feed ──────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Running {
    subscribers: usize,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

struct FeedInner {
    url: Url,
    config: SocketConfig,
    book: Arc<PriceBook>,
    events: broadcast::Sender<LiveEvent>,
    running: Mutex<Running>,
}

impl FeedInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, Running> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self) {
        let mut running = self.lock();
        running.subscribers = running.subscribers.saturating_sub(1);
        if running.subscribers == 0 {
            if let Some(cancel) = running.cancel.take() {
                debug!("Last live subscriber left, closing socket");
                cancel.cancel();
            }
            running.task = None;
        }
    }
}

/// Owned Socket.IO connection shared by any number of subscribers.
#[derive(Clone)]
pub struct LiveFeed {
    inner: Arc<FeedInner>,
}

impl LiveFeed {
    pub fn new(base_url: &str, config: SocketConfig) -> Result<Self, ChartError> {
        let url = protocol::socket_url(base_url)?;
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Ok(Self {
            inner: Arc::new(FeedInner {
                url,
                config,
                book: Arc::new(PriceBook::new()),
                events,
                running: Mutex::new(Running::default()),
            }),
        })
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn prices(&self) -> Arc<PriceBook> {
        Arc::clone(&self.inner.book)
    }

    /// Register interest; the first subscriber opens the connection.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self) -> Subscription {
        let mut running = self.inner.lock();
        let events = self.inner.events.subscribe();
        running.subscribers += 1;

        let alive = running.task.as_ref().is_some_and(|t| !t.is_finished());
        if !alive {
            if let Some(stale) = running.cancel.take() {
                stale.cancel();
            }
            let cancel = CancellationToken::new();
            let task = tokio::spawn(run_connection(
                self.inner.url.clone(),
                self.inner.config.clone(),
                Arc::clone(&self.inner.book),
                self.inner.events.clone(),
                cancel.clone(),
            ));
            info!("Opening live feed {}", self.inner.url);
            running.cancel = Some(cancel);
            running.task = Some(task);
        }

        Subscription {
            events,
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers
    }

    /// True while the connection task is alive.
    pub fn is_running(&self) -> bool {
        self.inner
            .lock()
            .task
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Close the socket now and wait for the connection task to finish.
    pub async fn shutdown(&self) {
        let (cancel, task) = {
            let mut running = self.inner.lock();
            (running.cancel.take(), running.task.take())
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Live feed task ended abnormally: {}", e);
            }
        }
    }
}

/// One consumer's handle on the feed. Dropping it releases the connection.
pub struct Subscription {
    events: broadcast::Receiver<LiveEvent>,
    inner: Arc<FeedInner>,
}

impl Subscription {
    #[cfg(test)]
    pub async fn recv(&mut self) -> Result<LiveEvent, broadcast::error::RecvError> {
        self.events.recv().await
    }

    pub fn events_mut(&mut self) -> &mut broadcast::Receiver<LiveEvent> {
        &mut self.events
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.release();
    }
}

// ── Connection task ───────────────────────────────────────────────────────────

enum SessionEnd {
    Cancelled,
    Lost,
    Kicked,
}

async fn run_connection(
    url: Url,
    config: SocketConfig,
    book: Arc<PriceBook>,
    events: broadcast::Sender<LiveEvent>,
    cancel: CancellationToken,
) {
    let delay = Duration::from_millis(config.reconnection_delay_ms);
    let budget = || FixedInterval::new(delay).take(config.reconnection_attempts);
    let mut retries = budget();
    let mut attempt = 0usize;

    loop {
        attempt += 1;
        debug!("Socket connect attempt {} to {}", attempt, url);

        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            res = connect_once(&url) => res,
        };

        let lost = match connected {
            Ok(ws) => {
                let mut joined = false;
                let end = drive_session(ws, &config.namespace, &book, &events, &cancel, &mut joined).await;
                if joined {
                    // Only a joined namespace counts as a successful connect.
                    retries = budget();
                    attempt = 0;
                }
                match end {
                    Ok(SessionEnd::Cancelled) => {
                        debug!("Live feed closed by owner");
                        return;
                    }
                    Ok(SessionEnd::Kicked) => {
                        info!("Server closed namespace {}", config.namespace);
                        let _ = events.send(LiveEvent::Closed);
                        return;
                    }
                    Ok(SessionEnd::Lost) => "connection lost".to_string(),
                    Err(e) => e.to_string(),
                }
            }
            Err(e) => e.to_string(),
        };

        let Some(wait) = retries.next() else {
            warn!(
                "Giving up on live feed after {} retries: {}",
                config.reconnection_attempts, lost
            );
            let _ = events.send(LiveEvent::Closed);
            return;
        };
        warn!("Live feed: {}, reconnecting in {:?}", lost, wait);
        let _ = events.send(LiveEvent::Disconnected);

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

async fn connect_once(url: &Url) -> Result<WsStream, ChartError> {
    let (ws, resp) = tokio_tungstenite::connect_async(url.as_str()).await?;
    debug!("Socket upgraded: {}", resp.status());
    Ok(ws)
}

async fn drive_session(
    ws: WsStream,
    namespace: &str,
    book: &PriceBook,
    events: &broadcast::Sender<LiveEvent>,
    cancel: &CancellationToken,
    joined: &mut bool,
) -> Result<SessionEnd, ChartError> {
    let (mut write, mut read) = ws.split();

    let mut heartbeat = Duration::from_millis(DEFAULT_HEARTBEAT_MS);
    let deadline = tokio::time::sleep(heartbeat);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Text(protocol::disconnect(namespace).into())).await;
                let _ = write.send(Message::Close(None)).await;
                return Ok(SessionEnd::Cancelled);
            }
            _ = &mut deadline => {
                return Err(ChartError::Protocol(format!("no ping within {:?}", heartbeat)));
            }
            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(SessionEnd::Lost),
                };

                let txt = match msg {
                    Message::Text(txt) => txt,
                    Message::Ping(payload) => {
                        write.send(Message::Pong(payload)).await?;
                        continue;
                    }
                    Message::Close(frame) => {
                        debug!("Socket close frame: {:?}", frame);
                        return Ok(SessionEnd::Lost);
                    }
                    _ => continue,
                };

                let packet = match protocol::decode(txt.as_str()) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Dropping undecodable frame: {}", e);
                        continue;
                    }
                };

                match packet {
                    EnginePacket::Open(open) => {
                        heartbeat = Duration::from_millis(open.heartbeat_ms());
                        deadline.as_mut().reset(Instant::now() + heartbeat);
                        debug!("Engine.IO open sid={}", open.sid);
                        write.send(Message::Text(protocol::connect(namespace).into())).await?;
                    }
                    EnginePacket::Ping(payload) => {
                        deadline.as_mut().reset(Instant::now() + heartbeat);
                        let pong = protocol::encode(&EnginePacket::Pong(payload));
                        write.send(Message::Text(pong.into())).await?;
                    }
                    EnginePacket::Close => return Ok(SessionEnd::Lost),
                    EnginePacket::Socket(packet) if packet.nsp() == namespace => {
                        *joined |= matches!(packet, SocketPacket::Connect { .. });
                        if let Some(end) = on_socket_packet(packet, book, events)? {
                            return Ok(end);
                        }
                    }
                    other => debug!("Ignoring frame {:?}", other),
                }
            }
        }
    }
}

fn on_socket_packet(
    packet: SocketPacket,
    book: &PriceBook,
    events: &broadcast::Sender<LiveEvent>,
) -> Result<Option<SessionEnd>, ChartError> {
    match packet {
        SocketPacket::Connect { .. } => {
            info!("chart socket connected");
            let _ = events.send(LiveEvent::Connected);
        }
        SocketPacket::ConnectError { data, .. } => {
            warn!("Namespace rejected: {:?}", data);
            return Ok(Some(SessionEnd::Kicked));
        }
        SocketPacket::Disconnect { .. } => return Ok(Some(SessionEnd::Kicked)),
        SocketPacket::Event { name, args, .. } => {
            if let Some(event) = dispatch_event(&name, args, book) {
                let _ = events.send(event);
            }
        }
        SocketPacket::Ack { .. } => {}
    }
    Ok(None)
}

/// Turn a namespace event into a [`LiveEvent`], merging price ticks into `book`.
pub fn dispatch_event(name: &str, mut args: Vec<Value>, book: &PriceBook) -> Option<LiveEvent> {
    let payload = if args.is_empty() { Value::Null } else { args.swap_remove(0) };

    match name {
        PRICE_UPDATED => {
            let tick = serde_json::from_value::<PriceUpdated>(payload)
                .map_err(ChartError::from)
                .and_then(normalize::live_price);
            match tick {
                Ok(tick) => {
                    book.apply(tick.clone());
                    Some(LiveEvent::Price(tick))
                }
                Err(e) => {
                    warn!("Bad {} payload: {}", PRICE_UPDATED, e);
                    None
                }
            }
        }
        METRICS_UPDATED => {
            let metrics = serde_json::from_value::<MetricsUpdated>(payload).unwrap_or_default();
            Some(LiveEvent::Metrics(metrics))
        }
        other => {
            debug!("Unhandled event '{}'", other);
            None
        }
    }
}
