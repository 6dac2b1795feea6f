//! Notification dispatcher.
//!
//! Converts inbound lifecycle and messaging events into visible and
//! audible alerts. Alerts flow through a FIFO queue with a fixed delay
//! between items so a burst never overlaps. Events for the conversation
//! the user is currently viewing are suppressed entirely; the open view
//! consumes them directly (and the messaging engine silently marks them
//! read).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use stallside_core::{OrderId, UserId};

use crate::messaging::ViewContext;
use crate::transport::{EventBus, EventKind, LiveEvent, Subscription};

/// Fixed spacing between queued alerts.
pub const ALERT_SPACING: Duration = Duration::from_millis(500);

/// Which sound accompanies an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundKind {
    /// A new chat message arrived.
    Message,
    /// An order changed state.
    Order,
}

/// A user-facing alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Short headline.
    pub title: String,
    /// One-line detail.
    pub body: String,
    /// The conversation the alert pertains to, if any.
    pub order_id: Option<OrderId>,
    /// Sound to play alongside.
    pub sound: SoundKind,
}

/// Rendering and sound playback, implemented by the host UI.
pub trait AlertSink: Send + Sync {
    /// Show the alert.
    fn render(&self, alert: &Alert);
    /// Play the accompanying sound.
    fn play(&self, sound: SoundKind);
}

struct DispatcherInner {
    worker: Mutex<Option<JoinHandle<()>>>,
    _subs: Vec<Subscription>,
}

/// Serialized alert delivery for one session.
pub struct NotificationDispatcher {
    inner: Arc<DispatcherInner>,
}

impl NotificationDispatcher {
    /// Create a dispatcher and start its delivery worker.
    #[must_use]
    pub fn new(
        me: UserId,
        sink: Arc<dyn AlertSink>,
        view: ViewContext,
        bus: &EventBus,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Alert>();
        let worker = tokio::spawn(deliver(rx, sink));

        let mut subs = Vec::new();
        for kind in [
            EventKind::OrderNew,
            EventKind::OrderUpdated,
            EventKind::OrderCancelled,
            EventKind::MessageReceived,
        ] {
            let tx = tx.clone();
            let view = view.clone();
            subs.push(bus.subscribe(kind, move |event| {
                let Some(alert) = build_alert(event, me) else {
                    return;
                };
                // The open view consumes its own events directly.
                if let Some(order_id) = alert.order_id
                    && view.is_viewing(order_id)
                {
                    debug!(order_id = %order_id, "alert suppressed, conversation open");
                    return;
                }
                let _ = tx.send(alert);
            }));
        }

        Self {
            inner: Arc::new(DispatcherInner {
                worker: Mutex::new(Some(worker)),
                _subs: subs,
            }),
        }
    }

    /// Stop the delivery worker and unsubscribe.
    pub fn close(&self) {
        if let Ok(mut worker) = self.inner.worker.lock()
            && let Some(handle) = worker.take()
        {
            handle.abort();
        }
    }
}

/// Build the alert for an event, or `None` when it should not alert at
/// all (events the session's own user caused).
fn build_alert(event: &LiveEvent, me: UserId) -> Option<Alert> {
    match event {
        LiveEvent::OrderNew(order) => Some(Alert {
            title: "New order".to_string(),
            body: format!("Order #{} was placed", order.order_id),
            order_id: Some(order.order_id),
            sound: SoundKind::Order,
        }),
        LiveEvent::OrderUpdated(order) => Some(Alert {
            title: "Order update".to_string(),
            body: format!("Order #{} is now {}", order.order_id, order.status),
            order_id: Some(order.order_id),
            sound: SoundKind::Order,
        }),
        LiveEvent::OrderCancelled(cancellation) => Some(Alert {
            title: "Order cancelled".to_string(),
            body: format!(
                "Order #{} was cancelled: {}",
                cancellation.order_id, cancellation.reason
            ),
            order_id: Some(cancellation.order_id),
            sound: SoundKind::Order,
        }),
        LiveEvent::MessageReceived(message) => {
            if message.sender_id == me {
                // Echo of this session's own send.
                return None;
            }
            Some(Alert {
                title: "New message".to_string(),
                body: preview(&message.body),
                order_id: Some(message.order_id),
                sound: SoundKind::Message,
            })
        }
        _ => None,
    }
}

/// Truncate a message body for the alert line.
fn preview(body: &str) -> String {
    const MAX: usize = 80;
    if body.chars().count() <= MAX {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX).collect();
        format!("{cut}…")
    }
}

/// Queue worker: render one alert at a time with fixed spacing, so a
/// burst of events never overlaps alerts.
async fn deliver(mut rx: mpsc::UnboundedReceiver<Alert>, sink: Arc<dyn AlertSink>) {
    while let Some(alert) = rx.recv().await {
        sink.render(&alert);
        sink.play(alert.sound);
        tokio::time::sleep(ALERT_SPACING).await;
    }
}
