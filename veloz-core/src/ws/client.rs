//! Per-venue WebSocket client (C4, §4.4).
//!
//! Framing, the RFC 6455 handshake, client-side masking, and fragment
//! reassembly are handled by `tokio-tungstenite`; this module supplies the
//! venue-agnostic parts the spec calls out: idle-ping/pong liveness,
//! exponential-backoff reconnect, and resubscribe-on-reconnect. Venue wire
//! formats differ, so subscribe-message encoding and event decoding are
//! delegated to a `MarketCodec` the owner supplies.

use crate::model::{MarketEvent, MarketEventType, SymbolId, Venue};
use crate::ws::backoff::{BackoffConfig, ExponentialBackoff};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

/// Venue-specific subscribe encoding and event decoding. `WsClient` calls
/// into this but owns no venue knowledge itself.
pub trait MarketCodec: Send + Sync {
    fn subscribe_message(&self, symbol: &SymbolId, event_type: MarketEventType) -> Message;
    fn unsubscribe_message(&self, symbol: &SymbolId, event_type: MarketEventType) -> Message;
    fn decode(&self, message: &Message) -> Option<MarketEvent>;
}

#[derive(Debug, Clone)]
pub struct WsClientConfig {
    pub venue: Venue,
    pub url: Url,
    pub backoff: BackoffConfig,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

/// Readable concurrently per §4.4 ("Counters: `reconnect_count`,
/// `last_message_time`, `message_count` are readable concurrently").
#[derive(Default)]
pub struct WsCounters {
    reconnect_count: AtomicU64,
    message_count: AtomicU64,
    last_message_time_ns: AtomicI64,
}

impl WsCounters {
    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    pub fn last_message_time_ns(&self) -> i64 {
        self.last_message_time_ns.load(Ordering::Relaxed)
    }
}

enum ClientCommand {
    Subscribe(SymbolId, MarketEventType),
    Unsubscribe(SymbolId, MarketEventType),
    Shutdown,
}

/// Owner-side handle. Dropping it does not stop the background task; call
/// `shutdown` explicitly.
pub struct WsClient {
    cmd_tx: mpsc::UnboundedSender<ClientCommand>,
    counters: Arc<WsCounters>,
    task: tokio::task::JoinHandle<()>,
}

impl WsClient {
    /// Spawns the connect/read/reconnect loop as a background task. `on_event`
    /// runs on the task for every decoded `MarketEvent`.
    pub fn spawn<F>(config: WsClientConfig, codec: Arc<dyn MarketCodec>, on_event: F) -> Self
    where
        F: Fn(MarketEvent) + Send + Sync + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(WsCounters::default());
        let task_counters = Arc::clone(&counters);
        let task = tokio::spawn(Self::run_loop(config, codec, Arc::new(on_event), cmd_rx, task_counters));
        Self { cmd_tx, counters, task }
    }

    pub fn subscribe(&self, symbol: SymbolId, event_type: MarketEventType) {
        let _ = self.cmd_tx.send(ClientCommand::Subscribe(symbol, event_type));
    }

    pub fn unsubscribe(&self, symbol: SymbolId, event_type: MarketEventType) {
        let _ = self.cmd_tx.send(ClientCommand::Unsubscribe(symbol, event_type));
    }

    pub fn counters(&self) -> Arc<WsCounters> {
        Arc::clone(&self.counters)
    }

    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(ClientCommand::Shutdown);
        let _ = self.task.await;
    }

    async fn run_loop(
        config: WsClientConfig,
        codec: Arc<dyn MarketCodec>,
        on_event: Arc<dyn Fn(MarketEvent) + Send + Sync>,
        mut cmd_rx: mpsc::UnboundedReceiver<ClientCommand>,
        counters: Arc<WsCounters>,
    ) {
        let mut backoff = ExponentialBackoff::new(config.backoff.clone());
        let mut subscriptions: Vec<(SymbolId, MarketEventType)> = Vec::new();

        'reconnect: loop {
            info!(venue = %config.venue, url = %config.url, "connecting websocket");
            let connected = tokio_tungstenite::connect_async(config.url.as_str()).await;

            let stream = match connected {
                Ok((stream, _response)) => stream,
                Err(e) => {
                    warn!(venue = %config.venue, error = %e, "websocket connect failed");
                    let delay = backoff.next_delay();
                    tokio::time::sleep(delay).await;
                    continue 'reconnect;
                }
            };

            counters.reconnect_count.fetch_add(1, Ordering::Relaxed);
            backoff.reset();
            let (mut write, mut read) = stream.split();

            for (symbol, event_type) in &subscriptions {
                let _ = write.send(codec.subscribe_message(symbol, *event_type)).await;
            }

            let mut ping_timer = tokio::time::interval(config.ping_interval);
            let mut awaiting_pong = false;
            let mut pong_deadline = tokio::time::sleep(config.pong_timeout);
            tokio::pin!(pong_deadline);

            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        match cmd {
                            Some(ClientCommand::Subscribe(symbol, event_type)) => {
                                let _ = write.send(codec.subscribe_message(&symbol, event_type)).await;
                                subscriptions.push((symbol, event_type));
                            }
                            Some(ClientCommand::Unsubscribe(symbol, event_type)) => {
                                let _ = write.send(codec.unsubscribe_message(&symbol, event_type)).await;
                                subscriptions.retain(|(s, t)| !(*s == symbol && *t == event_type));
                            }
                            Some(ClientCommand::Shutdown) | None => {
                                let _ = write.send(Message::Close(None)).await;
                                return;
                            }
                        }
                    }
                    _ = ping_timer.tick() => {
                        if awaiting_pong {
                            warn!(venue = %config.venue, "missed pong within liveness window, reconnecting");
                            break;
                        }
                        let _ = write.send(Message::Ping(Vec::new())).await;
                        awaiting_pong = true;
                        pong_deadline.as_mut().reset(tokio::time::Instant::now() + config.pong_timeout);
                    }
                    _ = &mut pong_deadline, if awaiting_pong => {
                        warn!(venue = %config.venue, "pong timed out, reconnecting");
                        break;
                    }
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Pong(_))) => {
                                awaiting_pong = false;
                            }
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = write.send(Message::Pong(payload)).await;
                            }
                            Some(Ok(Message::Close(frame))) => {
                                let (code, reason) = frame
                                    .map(|f| (u16::from(f.code), f.reason.to_string()))
                                    .unwrap_or((1000, String::new()));
                                warn!(venue = %config.venue, code, reason = %reason, "remote closed websocket");
                                break;
                            }
                            Some(Ok(other)) => {
                                counters.message_count.fetch_add(1, Ordering::Relaxed);
                                counters.last_message_time_ns.store(now_ns(), Ordering::Relaxed);
                                if let Some(event) = codec.decode(&other) {
                                    on_event(event);
                                }
                            }
                            Some(Err(e)) => {
                                warn!(venue = %config.venue, error = %e, "websocket read error");
                                break;
                            }
                            None => {
                                debug!(venue = %config.venue, "websocket stream ended");
                                break;
                            }
                        }
                    }
                }
            }

            let delay = backoff.next_delay();
            tokio::time::sleep(delay).await;
        }
    }
}

fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
