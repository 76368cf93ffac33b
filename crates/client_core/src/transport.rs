use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use shared::protocol::{ClientFrame, EventEnvelope};
use tokio::{
    net::TcpStream,
    sync::{mpsc, Notify},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::ClientError;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(45);
const RECONNECT_BASE: Duration = Duration::from_millis(500);
const RECONNECT_CAP: Duration = Duration::from_secs(30);
const OUTBOUND_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: String,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            heartbeat_timeout: HEARTBEAT_TIMEOUT,
            reconnect_base: RECONNECT_BASE,
            reconnect_cap: RECONNECT_CAP,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&EventEnvelope) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`EventTransport::on`]; pass back to `off` to
/// unsubscribe. Removing an already-removed handle is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: u64,
    event_type: String,
}

/// Ordered multi-map from event type to handlers. Handlers for one event
/// type fire in registration order; a failing handler is logged and does not
/// block its siblings.
#[derive(Default)]
pub struct HandlerRegistry {
    next_id: u64,
    handlers: HashMap<String, Vec<(u64, EventHandler)>>,
}

impl HandlerRegistry {
    pub fn on(&mut self, event_type: &str, handler: EventHandler) -> SubscriptionHandle {
        self.next_id += 1;
        let id = self.next_id;
        self.handlers
            .entry(event_type.to_string())
            .or_default()
            .push((id, handler));
        SubscriptionHandle {
            id,
            event_type: event_type.to_string(),
        }
    }

    pub fn off(&mut self, handle: &SubscriptionHandle) {
        if let Some(list) = self.handlers.get_mut(&handle.event_type) {
            list.retain(|(id, _)| *id != handle.id);
            if list.is_empty() {
                self.handlers.remove(&handle.event_type);
            }
        }
    }

    fn handlers_for(&self, event_type: &str) -> Vec<(u64, EventHandler)> {
        self.handlers
            .get(event_type)
            .map(|list| {
                list.iter()
                    .map(|(id, handler)| (*id, Arc::clone(handler)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn dispatch(&self, envelope: &EventEnvelope) {
        for (id, handler) in self.handlers_for(&envelope.event_type) {
            if let Err(err) = handler(envelope) {
                warn!(
                    event_type = %envelope.event_type,
                    handler_id = id,
                    "event handler failed: {err:#}"
                );
            }
        }
    }
}

struct TransportShared {
    registry: Mutex<HandlerRegistry>,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    connected: AtomicBool,
    closed: AtomicBool,
    close_notify: Notify,
}

/// Cheap clonable sender for components that publish outbound frames but do
/// not own the connection.
#[derive(Clone)]
pub struct TransportHandle {
    shared: Arc<TransportShared>,
}

/// Seam for outbound publishing so components can be tested without a
/// live connection.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: &ClientFrame) -> Result<(), ClientError>;
}

impl TransportHandle {
    pub fn send(&self, frame: &ClientFrame) -> Result<(), ClientError> {
        let text =
            serde_json::to_string(frame).map_err(|err| ClientError::SendFailed(err.to_string()))?;
        let guard = self.shared.outbound.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(ClientError::NotConnected);
        };
        tx.try_send(Message::Text(text)).map_err(|err| match err {
            mpsc::error::TrySendError::Closed(_) => ClientError::NotConnected,
            mpsc::error::TrySendError::Full(_) => {
                ClientError::SendFailed("outbound queue full".into())
            }
        })
    }
}

impl FrameSink for TransportHandle {
    fn send_frame(&self, frame: &ClientFrame) -> Result<(), ClientError> {
        self.send(frame)
    }
}

/// Owns the single logical websocket connection. Subscribers register typed
/// handlers by event name; reconnection with capped exponential backoff and
/// heartbeating run internally until `close()`.
pub struct EventTransport {
    config: TransportConfig,
    shared: Arc<TransportShared>,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl EventTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            shared: Arc::new(TransportShared {
                registry: Mutex::new(HandlerRegistry::default()),
                outbound: Mutex::new(None),
                connected: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                close_notify: Notify::new(),
            }),
            runner: Mutex::new(None),
        }
    }

    pub fn handle(&self) -> TransportHandle {
        TransportHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn on<F>(&self, event_type: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(&EventEnvelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.registry.lock().on(event_type, Arc::new(handler))
    }

    pub fn off(&self, handle: &SubscriptionHandle) {
        self.shared.registry.lock().off(handle);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn send(&self, frame: &ClientFrame) -> Result<(), ClientError> {
        self.handle().send(frame)
    }

    /// Starts the connection loop. Idempotent: a second call while the loop
    /// is running does nothing, so there is never more than one socket.
    pub fn connect(&self) {
        let mut runner = self.runner.lock();
        if runner.is_some() {
            debug!("transport already running; ignoring duplicate connect");
            return;
        }
        self.shared.closed.store(false, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        *runner = Some(tokio::spawn(run_loop(shared, config)));
    }

    /// Stops the connection loop, the reader, the heartbeat, and any pending
    /// reconnect timer.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.close_notify.notify_waiters();
        *self.shared.outbound.lock() = None;
        self.shared.connected.store(false, Ordering::SeqCst);
        if let Some(task) = self.runner.lock().take() {
            task.abort();
        }
    }

    pub async fn wait_until_connected(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.is_connected() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.is_connected()
    }
}

async fn run_loop(shared: Arc<TransportShared>, config: TransportConfig) {
    let mut attempt: u32 = 0;
    loop {
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }
        match connect_async(&config.url).await {
            Ok((stream, _)) => {
                attempt = 0;
                info!(url = %config.url, "transport connected");
                shared.connected.store(true, Ordering::SeqCst);
                run_connection(&shared, &config, stream).await;
                shared.connected.store(false, Ordering::SeqCst);
                *shared.outbound.lock() = None;
                if shared.closed.load(Ordering::SeqCst) {
                    break;
                }
                warn!("transport disconnected");
            }
            Err(err) => {
                warn!(url = %config.url, "websocket connect failed: {err}");
            }
        }
        attempt = attempt.saturating_add(1);
        let delay = reconnect_delay(attempt, config.reconnect_base, config.reconnect_cap);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        tokio::select! {
            _ = shared.close_notify.notified() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    info!("transport closed");
}

async fn run_connection(
    shared: &Arc<TransportShared>,
    config: &TransportConfig,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
) {
    let (mut write, mut read) = stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_DEPTH);
    *shared.outbound.lock() = Some(out_tx.clone());

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if write.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // an interval's first tick completes immediately
    heartbeat.tick().await;
    let mut last_inbound = Instant::now();

    loop {
        tokio::select! {
            _ = shared.close_notify.notified() => break,
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    last_inbound = Instant::now();
                    match EventEnvelope::from_json(&text) {
                        Ok(envelope) => dispatch(shared, &envelope),
                        Err(err) => warn!("invalid inbound frame: {err}"),
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    last_inbound = Instant::now();
                    let _ = out_tx.try_send(Message::Pong(data));
                }
                Some(Ok(Message::Pong(_))) => {
                    last_inbound = Instant::now();
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("websocket receive failed: {err}");
                    break;
                }
            },
            _ = heartbeat.tick() => {
                if last_inbound.elapsed() > config.heartbeat_timeout {
                    warn!("no inbound traffic within heartbeat timeout; forcing reconnect");
                    break;
                }
                let frame = ClientFrame::Heartbeat { sent_at: Utc::now() };
                match serde_json::to_string(&frame) {
                    Ok(text) => {
                        if out_tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!("failed to encode heartbeat: {err}"),
                }
            }
        }
    }

    writer.abort();
}

fn dispatch(shared: &Arc<TransportShared>, envelope: &EventEnvelope) {
    // clone the handler list out so handlers may call on/off re-entrantly
    let handlers = {
        let registry = shared.registry.lock();
        registry.handlers_for(&envelope.event_type)
    };
    for (id, handler) in handlers {
        if let Err(err) = handler(envelope) {
            warn!(
                event_type = %envelope.event_type,
                handler_id = id,
                "event handler failed: {err:#}"
            );
        }
    }
}

/// Deterministic backoff component: doubles per attempt up to the cap.
pub(crate) fn reconnect_backoff(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << shift).min(cap)
}

fn reconnect_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let backoff = reconnect_backoff(attempt, base, cap);
    let jitter_ms = backoff.as_millis() as u64 / 4;
    if jitter_ms == 0 {
        return backoff;
    }
    backoff + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
