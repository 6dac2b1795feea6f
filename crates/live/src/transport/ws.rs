//! WebSocket transport implementation.
//!
//! Maintains a single socket to the realtime endpoint with automatic
//! reconnect and capped exponential backoff. After every (re)connect the
//! joined rooms are replayed and a fresh presence snapshot is requested,
//! so presence state can be rebuilt without gaps after a drop.
//!
//! Frames are JSON text envelopes: `{"event": <name>, "payload": <object>}`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use stallside_core::OrderId;

use crate::error::AppError;
use crate::transport::{EventBus, LiveEvent, Transport};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Transport over a WebSocket connection.
#[derive(Clone)]
pub struct WsTransport {
    inner: Arc<WsInner>,
}

struct WsInner {
    url: Url,
    bus: EventBus,
    rooms: Mutex<HashSet<OrderId>>,
    sender: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    running: AtomicBool,
    shutdown: AtomicBool,
}

impl WsTransport {
    /// Create a transport for the given socket endpoint. No connection is
    /// made until [`Transport::connect`] is called.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            inner: Arc::new(WsInner {
                url,
                bus: EventBus::new(),
                rooms: Mutex::new(HashSet::new()),
                sender: Mutex::new(None),
                running: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
            }),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<(), AppError> {
        self.inner.shutdown.store(false, Ordering::SeqCst);
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let inner = self.inner.clone();
        tokio::spawn(run_loop(inner));
        Ok(())
    }

    async fn disconnect(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        let sender = {
            let Ok(mut guard) = self.inner.sender.lock() else {
                return;
            };
            guard.take()
        };
        if let Some(tx) = sender {
            let _ = tx.send(Message::Close(None));
        }
    }

    async fn join(&self, room: OrderId) -> Result<(), AppError> {
        if let Ok(mut rooms) = self.inner.rooms.lock() {
            rooms.insert(room);
        }
        // Fire-and-forget: if offline, the room is replayed on reconnect.
        let _ = self
            .inner
            .queue_frame(&serde_json::json!({"event": "join", "payload": {"room": room}}));
        Ok(())
    }

    async fn leave(&self, room: OrderId) -> Result<(), AppError> {
        if let Ok(mut rooms) = self.inner.rooms.lock() {
            rooms.remove(&room);
        }
        let _ = self
            .inner
            .queue_frame(&serde_json::json!({"event": "leave", "payload": {"room": room}}));
        Ok(())
    }

    async fn emit(&self, event: LiveEvent) -> Result<(), AppError> {
        let envelope = event.to_envelope()?;
        self.inner.queue_frame(&envelope)
    }

    fn events(&self) -> EventBus {
        self.inner.bus.clone()
    }
}

impl WsInner {
    /// Queue a frame on the current connection's writer.
    fn queue_frame(&self, envelope: &Value) -> Result<(), AppError> {
        let Ok(guard) = self.sender.lock() else {
            return Err(AppError::Transport("transport state poisoned".into()));
        };
        match guard.as_ref() {
            Some(tx) => tx
                .send(Message::text(envelope.to_string()))
                .map_err(|_| AppError::Transport("realtime channel closed".into())),
            None => Err(AppError::Transport("realtime channel not connected".into())),
        }
    }

    /// Replay joined rooms and request a presence snapshot after (re)connect.
    fn replay_session_state(&self) {
        let rooms: Vec<OrderId> = self
            .rooms
            .lock()
            .map(|rooms| rooms.iter().copied().collect())
            .unwrap_or_default();
        for room in rooms {
            let _ = self.queue_frame(&serde_json::json!({"event": "join", "payload": {"room": room}}));
        }
        let _ = self.queue_frame(&serde_json::json!({"event": "presence:request", "payload": {}}));
    }

    /// Decode one inbound frame and publish it on the bus.
    fn handle_frame(&self, text: &str) {
        match decode_frame(text) {
            Ok(Some(event)) => self.bus.publish(&event),
            Ok(None) => debug!("ignoring unknown realtime event"),
            Err(e) => warn!(error = %e, "failed to decode realtime frame"),
        }
    }
}

/// Parse a wire envelope into a typed event.
fn decode_frame(text: &str) -> Result<Option<LiveEvent>, AppError> {
    let mut envelope: Value =
        serde_json::from_str(text).map_err(|e| AppError::Transport(e.to_string()))?;
    let Some(name) = envelope.get("event").and_then(Value::as_str).map(String::from) else {
        return Err(AppError::Transport("frame has no event name".into()));
    };
    let payload = envelope
        .get_mut("payload")
        .map(Value::take)
        .unwrap_or(Value::Null);
    LiveEvent::from_envelope(&name, payload)
}

/// Connection loop: connect, pump frames, reconnect with backoff.
async fn run_loop(inner: Arc<WsInner>) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }

        let stream = match connect_async(inner.url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                warn!(error = %e, "realtime connect failed, retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };

        info!("realtime channel connected");
        backoff = INITIAL_BACKOFF;

        let (mut sink, mut read) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        if let Ok(mut guard) = inner.sender.lock() {
            *guard = Some(tx);
        }
        inner.replay_session_state();

        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
        });

        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => inner.handle_frame(text.as_str()),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "realtime channel read failed");
                    break;
                }
            }
        }

        writer.abort();
        if let Ok(mut guard) = inner.sender.lock() {
            *guard = None;
        }

        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }
        warn!("realtime channel disconnected, reconnecting in {backoff:?}");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }

    inner.running.store(false, Ordering::SeqCst);
}
