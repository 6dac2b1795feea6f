//! Session wiring.
//!
//! One [`LiveSession`] per authenticated participant owns the transport
//! and the four components built on it. Components never call each other;
//! they coordinate through events on the shared transport bus (plus the
//! open-conversation view context the dispatcher reads for suppression).

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use stallside_core::UserId;

use crate::api::{
    ApiClient, HttpMessageApi, HttpOrderApi, HttpProofUploader, MessageApi, OrderApi,
    ProofUploader,
};
use crate::config::LiveConfig;
use crate::error::AppError;
use crate::messaging::{MessagingEngine, ViewContext};
use crate::notify::{AlertSink, NotificationDispatcher};
use crate::orders::OrderLifecycle;
use crate::presence::PresenceTracker;
use crate::transport::{Transport, WsTransport};

struct SessionInner {
    me: UserId,
    transport: Arc<dyn Transport>,
    presence: PresenceTracker,
    messaging: MessagingEngine,
    orders: OrderLifecycle,
    notifications: NotificationDispatcher,
}

/// A participant's live session: transport, presence, messaging, order
/// lifecycle and notifications, wired together.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct LiveSession {
    inner: Arc<SessionInner>,
}

impl LiveSession {
    /// Connect a production session: HTTP persistence clients plus the
    /// WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot start.
    pub async fn connect(
        config: &LiveConfig,
        me: UserId,
        sink: Arc<dyn AlertSink>,
    ) -> Result<Self, AppError> {
        let client = ApiClient::new(config);
        let transport: Arc<dyn Transport> = Arc::new(WsTransport::new(config.socket_url.clone()));
        Self::assemble(
            me,
            transport,
            Arc::new(HttpOrderApi::new(client.clone())),
            Arc::new(HttpMessageApi::new(client.clone())),
            Arc::new(HttpProofUploader::new(client)),
            sink,
            config.presence_timeout,
        )
        .await
    }

    /// Wire a session from explicit collaborators. Used directly by tests
    /// and by hosts that bring their own transport or persistence.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot start.
    pub async fn assemble(
        me: UserId,
        transport: Arc<dyn Transport>,
        order_api: Arc<dyn OrderApi>,
        message_api: Arc<dyn MessageApi>,
        uploader: Arc<dyn ProofUploader>,
        sink: Arc<dyn AlertSink>,
        presence_timeout: Duration,
    ) -> Result<Self, AppError> {
        transport.connect().await?;
        let bus = transport.events();

        let presence = PresenceTracker::new(&bus, presence_timeout);
        let view = ViewContext::new();
        let messaging = MessagingEngine::new(me, message_api, transport.clone(), view.clone());
        let orders = OrderLifecycle::new(order_api, uploader, transport.clone());
        let notifications = NotificationDispatcher::new(me, sink, view, &bus);

        info!(user_id = %me, "live session started");
        Ok(Self {
            inner: Arc::new(SessionInner {
                me,
                transport,
                presence,
                messaging,
                orders,
                notifications,
            }),
        })
    }

    /// The authenticated participant.
    #[must_use]
    pub fn me(&self) -> UserId {
        self.inner.me
    }

    /// Wait for the initial presence snapshot (bounded). Call before the
    /// first presence-dependent frame renders.
    pub async fn ready(&self) {
        self.inner.presence.wait_ready().await;
    }

    /// The presence tracker.
    #[must_use]
    pub fn presence(&self) -> &PresenceTracker {
        &self.inner.presence
    }

    /// The messaging engine.
    #[must_use]
    pub fn messaging(&self) -> &MessagingEngine {
        &self.inner.messaging
    }

    /// The order lifecycle manager.
    #[must_use]
    pub fn orders(&self) -> &OrderLifecycle {
        &self.inner.orders
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Tear the session down: flush typing, unsubscribe everything and
    /// disconnect the transport.
    pub async fn close(&self) {
        self.inner.messaging.close().await;
        self.inner.notifications.close();
        self.inner.transport.disconnect().await;
        info!(user_id = %self.inner.me, "live session closed");
    }
}
