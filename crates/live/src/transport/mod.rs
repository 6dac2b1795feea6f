//! Realtime transport: the channel contract and the typed event bus.
//!
//! All components share one transport instance and communicate only through
//! events published on its [`EventBus`]. Room scoping is the server's
//! responsibility; the bus fans every inbound event out to all subscribers
//! of that event kind.

pub mod event;
pub mod ws;

pub use event::{
    CancellationEvent, EventKind, LiveEvent, OrderEvent, PresenceEvent, PresenceSnapshotEvent,
    ReadReceiptEvent, TypingEvent,
};
pub use ws::WsTransport;

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tracing::error;

use stallside_core::OrderId;

use crate::error::AppError;

/// The bidirectional, room-based event channel.
///
/// Implementations own reconnection; after a forced reconnect the server
/// re-delivers the presence snapshot so client state can be rebuilt.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish (or re-establish) the channel. Idempotent: calling while
    /// already connected is a no-op.
    async fn connect(&self) -> Result<(), AppError>;

    /// Tear the channel down and stop reconnecting.
    async fn disconnect(&self);

    /// Scope event delivery to a conversation. Fire-and-forget: delivery
    /// may begin slightly after this resolves.
    async fn join(&self, room: OrderId) -> Result<(), AppError>;

    /// Stop receiving events for a conversation.
    async fn leave(&self, room: OrderId) -> Result<(), AppError>;

    /// Publish an event to the channel.
    async fn emit(&self, event: LiveEvent) -> Result<(), AppError>;

    /// The bus inbound events are fanned out on.
    fn events(&self) -> EventBus;
}

type Handler = Arc<dyn Fn(&LiveEvent) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    next_token: u64,
    handlers: HashMap<EventKind, Vec<(u64, Handler)>>,
}

/// Fan-out registry for inbound events.
///
/// Cheaply cloneable; clones share the same registry.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind.
    ///
    /// The returned [`Subscription`] unsubscribes when dropped; holding it
    /// is what keeps the handler alive. Dropping it on conversation or
    /// session teardown is required, or stale handlers double-fire on the
    /// next open.
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&LiveEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let token = {
            let Ok(mut inner) = self.inner.lock() else {
                return Subscription {
                    bus: Weak::new(),
                    kind,
                    token: 0,
                };
            };
            let token = inner.next_token;
            inner.next_token += 1;
            inner
                .handlers
                .entry(kind)
                .or_default()
                .push((token, Arc::new(handler)));
            token
        };

        Subscription {
            bus: Arc::downgrade(&self.inner),
            kind,
            token,
        }
    }

    /// Fan an event out to every subscriber of its kind.
    ///
    /// Each handler invocation is isolated: a panicking handler is logged
    /// and does not affect its siblings or the caller.
    pub fn publish(&self, event: &LiveEvent) {
        let handlers: Vec<Handler> = {
            let Ok(inner) = self.inner.lock() else {
                return;
            };
            inner
                .handlers
                .get(&event.kind())
                .map(|entries| entries.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(kind = ?event.kind(), "event handler panicked");
            }
        }
    }

    /// Number of live subscriptions for an event kind.
    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.handlers.get(&kind).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

/// Guard for a registered handler; dropping it unsubscribes.
pub struct Subscription {
    bus: Weak<Mutex<BusInner>>,
    kind: EventKind,
    token: u64,
}

impl Subscription {
    /// Explicitly unsubscribe.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade()
            && let Ok(mut inner) = bus.lock()
            && let Some(entries) = inner.handlers.get_mut(&self.kind)
        {
            entries.retain(|(token, _)| *token != self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use stallside_core::UserId;

    fn online_event(user: i32) -> LiveEvent {
        LiveEvent::UserOnline(PresenceEvent {
            user_id: UserId::new(user),
        })
    }

    #[test]
    fn test_publish_reaches_all_subscribers_of_kind() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_a = hits.clone();
        let _sub_a = bus.subscribe(EventKind::UserOnline, move |_| {
            hits_a.fetch_add(1, Ordering::SeqCst);
        });
        let hits_b = hits.clone();
        let _sub_b = bus.subscribe(EventKind::UserOnline, move |_| {
            hits_b.fetch_add(1, Ordering::SeqCst);
        });
        let hits_c = hits.clone();
        let _sub_c = bus.subscribe(EventKind::UserOffline, move |_| {
            hits_c.fetch_add(10, Ordering::SeqCst);
        });

        bus.publish(&online_event(1));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_a = hits.clone();
        let sub = bus.subscribe(EventKind::UserOnline, move |_| {
            hits_a.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(&online_event(1));
        assert_eq!(bus.subscriber_count(EventKind::UserOnline), 1);

        sub.cancel();
        bus.publish(&online_event(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(EventKind::UserOnline), 0);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_siblings() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let _sub_panics = bus.subscribe(EventKind::UserOnline, |_| {
            panic!("handler blew up");
        });
        let hits_b = hits.clone();
        let _sub_ok = bus.subscribe(EventKind::UserOnline, move |_| {
            hits_b.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&online_event(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // The bus stays usable afterwards
        bus.publish(&online_event(2));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
