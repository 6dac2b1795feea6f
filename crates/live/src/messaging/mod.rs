//! Per-conversation messaging engine.
//!
//! One conversation (keyed by its order) is open at a time. Sends are
//! optimistic: the message appears immediately as `Pending`, is replaced
//! in place by the acknowledged copy on success, and is removed on failure
//! so the user can retry with their draft intact. Duplicate delivery of an
//! acknowledged message (the transport echoing the sender's own send back)
//! is suppressed by server-id comparison under the same lock that owns the
//! message list, so the echo and the acknowledgment may arrive in either
//! order.

mod cache;
mod typing;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, instrument, warn};

use stallside_core::{ClientMessageId, MessageId, OrderId, UserId};

use crate::api::{MessageApi, MessagePage};
use crate::error::AppError;
use crate::models::{ChatMessage, ConversationSummary, Delivery, StoredMessage};
use crate::transport::{EventKind, LiveEvent, Subscription, Transport, TypingEvent};

use cache::{FIRST_PAGE_TTL, FirstPageCache};
use typing::{TYPING_IDLE, TypingSignal};

/// Messages fetched per page.
pub const PAGE_SIZE: u32 = 50;

/// Delay before an inbound message on the open conversation is silently
/// marked read.
const READ_MARK_DELAY: Duration = Duration::from_secs(1);

/// Which conversation the user currently has open.
///
/// Written by the messaging engine on open/close, read by the notification
/// dispatcher for suppression decisions.
#[derive(Clone, Default)]
pub struct ViewContext {
    inner: Arc<Mutex<Option<OrderId>>>,
}

impl ViewContext {
    /// Create an empty view context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&self, order_id: Option<OrderId>) {
        if let Ok(mut current) = self.inner.lock() {
            *current = order_id;
        }
    }

    /// The currently open conversation, if any.
    #[must_use]
    pub fn current(&self) -> Option<OrderId> {
        self.inner.lock().map(|current| *current).unwrap_or(None)
    }

    /// Whether the given conversation is the open one.
    #[must_use]
    pub fn is_viewing(&self, order_id: OrderId) -> bool {
        self.current() == Some(order_id)
    }
}

/// Snapshot of the open conversation returned by [`MessagingEngine::open`].
#[derive(Debug, Clone)]
pub struct ConversationView {
    pub order_id: OrderId,
    /// Messages in ascending chronological order.
    pub messages: Vec<ChatMessage>,
    /// Whether older messages can be fetched with
    /// [`MessagingEngine::load_older`].
    pub has_more: bool,
}

/// Result of a "load more" fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OlderPage {
    /// How many messages were prepended.
    pub prepended: usize,
    /// Whether yet older messages remain.
    pub has_more: bool,
}

/// Unread counters, re-queried rather than locally decremented so they
/// stay consistent with reads on other devices.
#[derive(Debug, Clone)]
pub struct UnreadBadges {
    /// Per-conversation summaries.
    pub conversations: Vec<ConversationSummary>,
    /// Global unread badge.
    pub total_unread: u32,
}

/// Compute the scroll offset that keeps the viewport anchored after
/// prepending older messages: the content grew above the fold, so the
/// scroll position moves down by exactly the growth.
#[must_use]
pub fn anchored_scroll_top(prev_scroll_top: f64, prev_height: f64, new_height: f64) -> f64 {
    prev_scroll_top + (new_height - prev_height)
}

struct ActiveConversation {
    order_id: OrderId,
    messages: Vec<ChatMessage>,
    has_more: bool,
    typing: TypingSignal,
    typing_peers: HashSet<UserId>,
    // Dropped with the conversation, which unsubscribes the handlers.
    _subs: Vec<Subscription>,
}

struct EngineInner {
    me: UserId,
    api: Arc<dyn MessageApi>,
    transport: Arc<dyn Transport>,
    cache: FirstPageCache,
    view: ViewContext,
    active: Mutex<Option<ActiveConversation>>,
}

/// The messaging engine. Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct MessagingEngine {
    inner: Arc<EngineInner>,
}

impl MessagingEngine {
    /// Create an engine for the given participant.
    #[must_use]
    pub fn new(
        me: UserId,
        api: Arc<dyn MessageApi>,
        transport: Arc<dyn Transport>,
        view: ViewContext,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                me,
                api,
                transport,
                cache: FirstPageCache::new(FIRST_PAGE_TTL),
                view,
                active: Mutex::new(None),
            }),
        }
    }

    /// Open a conversation: join its room, load the newest page (served
    /// from a short-lived cache on rapid navigation) and mark everything
    /// read.
    ///
    /// # Errors
    ///
    /// Returns an error if the first page cannot be loaded.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn open(&self, order_id: OrderId) -> Result<ConversationView, AppError> {
        self.close().await;

        if let Err(e) = self.inner.transport.join(order_id).await {
            debug!(error = %e, "room join deferred until reconnect");
        }

        // Subscribe before fetching so nothing lands in the gap.
        let subs = self.register_handlers(order_id);
        {
            let Ok(mut active) = self.inner.active.lock() else {
                return Err(AppError::Transport("conversation state poisoned".into()));
            };
            *active = Some(ActiveConversation {
                order_id,
                messages: Vec::new(),
                has_more: false,
                typing: TypingSignal::default(),
                typing_peers: HashSet::new(),
                _subs: subs,
            });
        }
        self.inner.view.set(Some(order_id));

        let page = match self.inner.cache.get(order_id).await {
            Some(page) => page,
            None => match self.inner.api.list(order_id, PAGE_SIZE, 0).await {
                Ok(page) => {
                    self.inner.cache.insert(order_id, page.clone()).await;
                    page
                }
                Err(e) => {
                    // Unwind the half-opened conversation before surfacing.
                    self.close().await;
                    return Err(e);
                }
            },
        };

        // Opening marks the conversation read; badges are refreshed by
        // re-query, not decremented locally.
        if let Err(e) = self.inner.api.mark_read(order_id).await {
            warn!(error = %e, "failed to mark conversation read");
        }

        let (messages, has_more) = self.merge_first_page(order_id, &page);
        Ok(ConversationView {
            order_id,
            messages,
            has_more,
        })
    }

    /// Close the open conversation: flush the typing indicator, leave the
    /// room and drop the event subscriptions.
    pub async fn close(&self) {
        let closing = {
            let Ok(mut active) = self.inner.active.lock() else {
                return;
            };
            active.take()
        };
        let Some(conversation) = closing else {
            return;
        };
        self.inner.view.set(None);

        // Best-effort: never leave a stuck "is typing" behind.
        if conversation.typing.flush() {
            self.emit_typing(conversation.order_id, false).await;
        }
        if let Err(e) = self.inner.transport.leave(conversation.order_id).await {
            debug!(error = %e, "room leave dropped");
        }
    }

    /// Send a message on the open conversation.
    ///
    /// The message is inserted as `Pending` immediately; on success the
    /// acknowledged copy takes its place and is also pushed over the
    /// transport for the other party. On failure the optimistic entry is
    /// removed and the error is returned so the caller can offer a retry
    /// with the draft intact.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty body or no open conversation, or
    /// the underlying API error on send failure.
    #[instrument(skip(self, body))]
    pub async fn send(&self, body: &str) -> Result<MessageId, AppError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(AppError::validation("message body cannot be empty"));
        }
        let Some(order_id) = self.inner.view.current() else {
            return Err(AppError::validation("no conversation is open"));
        };

        let client_id = ClientMessageId::generate();
        let optimistic = ChatMessage {
            delivery: Delivery::Pending { client_id },
            order_id,
            sender_id: self.inner.me,
            body: body.to_string(),
            attachment: None,
            created_at: chrono::Utc::now(),
            read: false,
        };
        self.with_conversation(order_id, |conv| conv.messages.push(optimistic));

        match self.inner.api.send(order_id, body).await {
            Ok(stored) => {
                self.reconcile(order_id, client_id, &stored);
                self.inner.cache.invalidate(order_id).await;
                if let Err(e) = self
                    .inner
                    .transport
                    .emit(LiveEvent::MessageReceived(stored.clone()))
                    .await
                {
                    warn!(error = %e, "failed to push message to the other party");
                }
                debug!(message_id = %stored.id, "message acknowledged");
                Ok(stored.id)
            }
            Err(e) => {
                self.with_conversation(order_id, |conv| {
                    conv.messages.retain(|m| m.client_id() != Some(client_id));
                });
                Err(e)
            }
        }
    }

    /// Fetch the next page of strictly older messages and prepend it.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if no conversation is open, or the underlying
    /// API error.
    pub async fn load_older(&self) -> Result<OlderPage, AppError> {
        let (order_id, offset, has_more) = {
            let Ok(active) = self.inner.active.lock() else {
                return Err(AppError::Transport("conversation state poisoned".into()));
            };
            let Some(conv) = active.as_ref() else {
                return Err(AppError::validation("no conversation is open"));
            };
            let acknowledged = conv
                .messages
                .iter()
                .filter(|m| !m.delivery.is_pending())
                .count();
            (
                conv.order_id,
                u32::try_from(acknowledged).unwrap_or(u32::MAX),
                conv.has_more,
            )
        };
        if !has_more {
            return Ok(OlderPage {
                prepended: 0,
                has_more: false,
            });
        }

        let page = self.inner.api.list(order_id, PAGE_SIZE, offset).await?;

        let mut prepended = 0;
        let mut page_has_more = page.has_more;
        self.with_conversation(order_id, |conv| {
            // Concurrent arrivals shift the offset window; drop anything
            // already present.
            let older: Vec<ChatMessage> = page
                .messages
                .iter()
                .filter(|stored| {
                    !conv
                        .messages
                        .iter()
                        .any(|m| m.server_id() == Some(stored.id))
                })
                .cloned()
                .map(ChatMessage::from)
                .collect();
            prepended = older.len();
            conv.messages.splice(0..0, older);
            conv.has_more = page.has_more;
            page_has_more = conv.has_more;
        });

        Ok(OlderPage {
            prepended,
            has_more: page_has_more,
        })
    }

    /// Record a keystroke in the open conversation's input.
    ///
    /// Emits start-typing once per burst and arms the idle timer that
    /// emits stop-typing. Failures are swallowed; typing is best-effort.
    pub async fn keystroke(&self) {
        let armed = {
            let Ok(active) = self.inner.active.lock() else {
                return;
            };
            active.as_ref().map(|conv| {
                let (emit_start, generation) = conv.typing.keystroke();
                (conv.order_id, emit_start, generation, conv.typing.clone())
            })
        };
        let Some((order_id, emit_start, generation, typing)) = armed else {
            return;
        };

        if emit_start {
            self.emit_typing(order_id, true).await;
        }

        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(TYPING_IDLE).await;
            if typing.idle_elapsed(generation) {
                engine.emit_typing(order_id, false).await;
            }
        });
    }

    /// The input lost focus; flush a pending stop-typing immediately.
    pub async fn input_blurred(&self) {
        let flushed = {
            let Ok(active) = self.inner.active.lock() else {
                return;
            };
            active
                .as_ref()
                .map(|conv| (conv.order_id, conv.typing.flush()))
        };
        if let Some((order_id, true)) = flushed {
            self.emit_typing(order_id, false).await;
        }
    }

    /// Re-query unread counters for every conversation.
    ///
    /// # Errors
    ///
    /// Returns the underlying API error.
    pub async fn refresh_unread(&self) -> Result<UnreadBadges, AppError> {
        let conversations = self.inner.api.conversations().await?;
        let total_unread = conversations.iter().map(|c| c.unread).sum();
        Ok(UnreadBadges {
            conversations,
            total_unread,
        })
    }

    /// Snapshot of the open conversation's messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner
            .active
            .lock()
            .ok()
            .and_then(|active| active.as_ref().map(|conv| conv.messages.clone()))
            .unwrap_or_default()
    }

    /// Whether the other party is currently typing in the open
    /// conversation.
    #[must_use]
    pub fn peer_typing(&self) -> bool {
        self.inner
            .active
            .lock()
            .ok()
            .and_then(|active| active.as_ref().map(|conv| !conv.typing_peers.is_empty()))
            .unwrap_or(false)
    }

    /// The currently open conversation, if any.
    #[must_use]
    pub fn open_order(&self) -> Option<OrderId> {
        self.inner.view.current()
    }

    // =========================================================================
    // Internal
    // =========================================================================

    fn with_conversation(&self, order_id: OrderId, f: impl FnOnce(&mut ActiveConversation)) {
        if let Ok(mut active) = self.inner.active.lock()
            && let Some(conv) = active.as_mut().filter(|c| c.order_id == order_id)
        {
            f(conv);
        }
    }

    /// Merge the fetched first page with anything a subscription appended
    /// while the fetch was in flight.
    fn merge_first_page(&self, order_id: OrderId, page: &MessagePage) -> (Vec<ChatMessage>, bool) {
        let mut snapshot = (
            page.messages
                .iter()
                .cloned()
                .map(ChatMessage::from)
                .collect::<Vec<_>>(),
            page.has_more,
        );
        self.with_conversation(order_id, |conv| {
            let mut merged: Vec<ChatMessage> =
                page.messages.iter().cloned().map(ChatMessage::from).collect();
            for existing in conv.messages.drain(..) {
                let duplicate = existing
                    .server_id()
                    .is_some_and(|id| merged.iter().any(|m| m.server_id() == Some(id)));
                if !duplicate {
                    merged.push(existing);
                }
            }
            conv.messages = merged;
            conv.has_more = page.has_more;
            snapshot = (conv.messages.clone(), conv.has_more);
        });
        snapshot
    }

    /// Replace the optimistic entry with the acknowledged copy, in place.
    /// If the transport echo was applied first, drop the optimistic entry
    /// instead; either order leaves the logical send appearing exactly
    /// once.
    fn reconcile(&self, order_id: OrderId, client_id: ClientMessageId, stored: &StoredMessage) {
        self.with_conversation(order_id, |conv| {
            if conv
                .messages
                .iter()
                .any(|m| m.server_id() == Some(stored.id))
            {
                conv.messages.retain(|m| m.client_id() != Some(client_id));
                return;
            }
            if let Some(entry) = conv
                .messages
                .iter_mut()
                .find(|m| m.client_id() == Some(client_id))
            {
                *entry = ChatMessage::from(stored.clone());
            } else {
                conv.messages.push(ChatMessage::from(stored.clone()));
            }
        });
    }

    async fn handle_incoming(&self, stored: StoredMessage) {
        let appended = {
            let Ok(mut active) = self.inner.active.lock() else {
                return;
            };
            let Some(conv) = active.as_mut().filter(|c| c.order_id == stored.order_id) else {
                return;
            };
            if conv
                .messages
                .iter()
                .any(|m| m.server_id() == Some(stored.id))
            {
                // Echo of a send we already reconciled.
                false
            } else if stored.sender_id == self.inner.me
                && conv
                    .messages
                    .iter()
                    .any(|m| m.delivery.is_pending() && m.body == stored.body)
            {
                // Echo raced ahead of the acknowledgment; reconcile will
                // place the acknowledged copy.
                false
            } else {
                conv.messages.push(ChatMessage::from(stored.clone()));
                true
            }
        };
        if !appended {
            return;
        }

        self.inner.cache.invalidate(stored.order_id).await;

        if stored.sender_id != self.inner.me {
            // The open view consumed the message directly; mark it read
            // after a short delay.
            let engine = self.clone();
            let order_id = stored.order_id;
            tokio::spawn(async move {
                tokio::time::sleep(READ_MARK_DELAY).await;
                if engine.inner.view.is_viewing(order_id)
                    && let Err(e) = engine.inner.api.mark_read(order_id).await
                {
                    debug!(error = %e, "silent read-mark failed");
                }
            });
        }
    }

    fn register_handlers(&self, order_id: OrderId) -> Vec<Subscription> {
        let bus = self.inner.transport.events();

        let weak = Arc::downgrade(&self.inner);
        let message_sub = bus.subscribe(EventKind::MessageReceived, move |event| {
            let LiveEvent::MessageReceived(stored) = event else {
                return;
            };
            if stored.order_id != order_id {
                return;
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let engine = MessagingEngine { inner };
            let stored = stored.clone();
            tokio::spawn(async move {
                engine.handle_incoming(stored).await;
            });
        });

        let weak = Arc::downgrade(&self.inner);
        let typing_sub = bus.subscribe(EventKind::Typing, move |event| {
            let LiveEvent::Typing(typing) = event else {
                return;
            };
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if typing.order_id != order_id || typing.user_id == inner.me {
                return;
            }
            let Ok(mut active) = inner.active.lock() else {
                return;
            };
            if let Some(conv) = active.as_mut().filter(|c| c.order_id == order_id) {
                if typing.started {
                    conv.typing_peers.insert(typing.user_id);
                } else {
                    conv.typing_peers.remove(&typing.user_id);
                }
            }
        });

        let weak = Arc::downgrade(&self.inner);
        let receipt_sub = bus.subscribe(EventKind::MessageReadReceipt, move |event| {
            let LiveEvent::MessageReadReceipt(receipt) = event else {
                return;
            };
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if receipt.order_id != order_id || receipt.reader_id == inner.me {
                return;
            }
            let Ok(mut active) = inner.active.lock() else {
                return;
            };
            if let Some(conv) = active.as_mut().filter(|c| c.order_id == order_id) {
                for message in conv
                    .messages
                    .iter_mut()
                    .filter(|m| m.sender_id == inner.me)
                {
                    message.read = true;
                }
            }
        });

        vec![message_sub, typing_sub, receipt_sub]
    }

    async fn emit_typing(&self, order_id: OrderId, started: bool) {
        let event = LiveEvent::Typing(TypingEvent {
            order_id,
            user_id: self.inner.me,
            started,
        });
        // Best-effort; a dropped typing signal is never surfaced.
        if let Err(e) = self.inner.transport.emit(event).await {
            debug!(error = %e, "typing signal dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::testing::{LoopTransport, MemoryMessages};
    use stallside_core::UserId;

    const ME: UserId = UserId::new(1);
    const PEER: UserId = UserId::new(2);
    const ORDER: OrderId = OrderId::new(9);

    fn engine_with(
        api: &Arc<MemoryMessages>,
        transport: &Arc<LoopTransport>,
    ) -> MessagingEngine {
        MessagingEngine::new(ME, api.clone(), transport.clone(), ViewContext::new())
    }

    /// Let spawned handler tasks run to completion.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    fn typing_events(transport: &LoopTransport) -> Vec<bool> {
        transport
            .emitted()
            .into_iter()
            .filter_map(|event| match event {
                LiveEvent::Typing(t) => Some(t.started),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_open_loads_newest_page_and_marks_read() {
        let api = MemoryMessages::new(ME);
        api.seed(ORDER, PEER, 3);
        let transport = LoopTransport::new();
        let engine = engine_with(&api, &transport);

        let view = engine.open(ORDER).await.expect("open");
        assert_eq!(view.messages.len(), 3);
        assert!(!view.has_more);
        assert!(view.messages.iter().all(|m| !m.delivery.is_pending()));
        assert_eq!(api.mark_read_calls(), 1);
        assert_eq!(engine.open_order(), Some(ORDER));
    }

    #[tokio::test]
    async fn test_rapid_reopen_is_served_from_cache() {
        let api = MemoryMessages::new(ME);
        api.seed(ORDER, PEER, 2);
        let transport = LoopTransport::new();
        let engine = engine_with(&api, &transport);

        engine.open(ORDER).await.expect("first open");
        engine.close().await;
        engine.open(ORDER).await.expect("second open");
        assert_eq!(api.list_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_is_optimistic_then_acknowledged() {
        let api = MemoryMessages::gated(ME);
        let transport = LoopTransport::new();
        let engine = engine_with(&api, &transport);
        engine.open(ORDER).await.expect("open");

        let sender = engine.clone();
        let send = tokio::spawn(async move { sender.send("hello there").await });
        settle().await;

        // Exactly one pending entry while the send is in flight.
        let in_flight = engine.messages();
        assert_eq!(in_flight.len(), 1);
        assert!(in_flight[0].delivery.is_pending());

        api.release_send();
        let id = send.await.expect("join").expect("send");

        let settled = engine.messages();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].server_id(), Some(id));

        // The acknowledged message was pushed for the other party.
        assert!(
            transport
                .emitted()
                .iter()
                .any(|e| matches!(e, LiveEvent::MessageReceived(m) if m.id == id))
        );
    }

    #[tokio::test]
    async fn test_failed_send_rolls_back() {
        let api = MemoryMessages::new(ME);
        api.fail_next_send();
        let transport = LoopTransport::new();
        let engine = engine_with(&api, &transport);
        engine.open(ORDER).await.expect("open");

        let err = engine.send("does not go through").await.expect_err("fails");
        assert!(matches!(err, AppError::Api(_)));
        assert!(engine.messages().is_empty());
    }

    #[tokio::test]
    async fn test_empty_body_is_rejected() {
        let api = MemoryMessages::new(ME);
        let transport = LoopTransport::new();
        let engine = engine_with(&api, &transport);
        engine.open(ORDER).await.expect("open");

        let err = engine.send("   ").await.expect_err("empty");
        assert!(matches!(err, AppError::Validation(_)));
        assert!(engine.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_echo_is_suppressed() {
        let api = MemoryMessages::new(ME);
        let transport = LoopTransport::new();
        let engine = engine_with(&api, &transport);
        engine.open(ORDER).await.expect("open");

        engine.send("only once").await.expect("send");
        let acked = engine.messages();
        assert_eq!(acked.len(), 1);
        let stored = api.stored(ORDER);

        // The server echoes the sender's own message back into the room.
        transport.inject(&LiveEvent::MessageReceived(stored[0].clone()));
        settle().await;

        assert_eq!(engine.messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_arriving_before_acknowledgment() {
        let api = MemoryMessages::gated(ME);
        let transport = LoopTransport::new();
        let engine = engine_with(&api, &transport);
        engine.open(ORDER).await.expect("open");

        let sender = engine.clone();
        let send = tokio::spawn(async move { sender.send("raced").await });
        settle().await;

        // Echo lands while the HTTP acknowledgment is still gated.
        let echo = StoredMessage {
            id: stallside_core::MessageId::new(1),
            order_id: ORDER,
            sender_id: ME,
            body: "raced".to_string(),
            attachment: None,
            created_at: chrono::Utc::now(),
            read: false,
        };
        transport.inject(&LiveEvent::MessageReceived(echo));
        settle().await;

        api.release_send();
        send.await.expect("join").expect("send");

        let settled = engine.messages();
        assert_eq!(settled.len(), 1);
        assert!(!settled[0].delivery.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_peer_message_marks_read_after_delay() {
        let api = MemoryMessages::new(ME);
        let transport = LoopTransport::new();
        let engine = engine_with(&api, &transport);
        engine.open(ORDER).await.expect("open");
        let baseline = api.mark_read_calls();

        let incoming = StoredMessage {
            id: stallside_core::MessageId::new(77),
            order_id: ORDER,
            sender_id: PEER,
            body: "fresh".to_string(),
            attachment: None,
            created_at: chrono::Utc::now(),
            read: false,
        };
        transport.inject(&LiveEvent::MessageReceived(incoming));
        settle().await;
        assert_eq!(engine.messages().len(), 1);

        tokio::time::sleep(READ_MARK_DELAY + Duration::from_millis(50)).await;
        assert_eq!(api.mark_read_calls(), baseline + 1);
    }

    #[tokio::test]
    async fn test_pagination_prepends_older_pages_in_order() {
        let api = MemoryMessages::new(ME);
        api.seed(ORDER, PEER, 120);
        let transport = LoopTransport::new();
        let engine = engine_with(&api, &transport);

        // Newest page: m71..m120.
        let view = engine.open(ORDER).await.expect("open");
        assert_eq!(view.messages.len(), 50);
        assert!(view.has_more);
        assert_eq!(view.messages[0].body, "m71");
        assert_eq!(view.messages[49].body, "m120");

        // Skipping the 50 newest returns the next 50 older, ascending.
        let older = engine.load_older().await.expect("page two");
        assert_eq!(older, OlderPage { prepended: 50, has_more: true });
        let messages = engine.messages();
        assert_eq!(messages[0].body, "m21");
        assert_eq!(messages[49].body, "m70");
        assert_eq!(messages[50].body, "m71");

        let oldest = engine.load_older().await.expect("page three");
        assert_eq!(oldest, OlderPage { prepended: 20, has_more: false });
        let messages = engine.messages();
        assert_eq!(messages.len(), 120);
        assert_eq!(messages[0].body, "m1");
        assert_eq!(messages[119].body, "m120");

        // Exhausted: no further fetch happens.
        let done = engine.load_older().await.expect("exhausted");
        assert_eq!(done, OlderPage { prepended: 0, has_more: false });
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_debounce_one_start_one_stop() {
        let api = MemoryMessages::new(ME);
        let transport = LoopTransport::new();
        let engine = engine_with(&api, &transport);
        engine.open(ORDER).await.expect("open");

        engine.keystroke().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        engine.keystroke().await;
        engine.keystroke().await;

        tokio::time::sleep(TYPING_IDLE + Duration::from_millis(100)).await;
        assert_eq!(typing_events(&transport), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_flushes_typing_stop() {
        let api = MemoryMessages::new(ME);
        let transport = LoopTransport::new();
        let engine = engine_with(&api, &transport);
        engine.open(ORDER).await.expect("open");

        engine.keystroke().await;
        engine.close().await;
        assert_eq!(typing_events(&transport), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_typing_indicator() {
        let api = MemoryMessages::new(ME);
        let transport = LoopTransport::new();
        let engine = engine_with(&api, &transport);
        engine.open(ORDER).await.expect("open");

        transport.inject(&LiveEvent::Typing(TypingEvent {
            order_id: ORDER,
            user_id: PEER,
            started: true,
        }));
        assert!(engine.peer_typing());

        transport.inject(&LiveEvent::Typing(TypingEvent {
            order_id: ORDER,
            user_id: PEER,
            started: false,
        }));
        assert!(!engine.peer_typing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_unsubscribes_handlers() {
        let api = MemoryMessages::new(ME);
        let transport = LoopTransport::new();
        let engine = engine_with(&api, &transport);
        let bus = transport.events();

        engine.open(ORDER).await.expect("open");
        assert_eq!(bus.subscriber_count(EventKind::MessageReceived), 1);

        engine.close().await;
        assert_eq!(bus.subscriber_count(EventKind::MessageReceived), 0);

        // A late event after close is dropped, not applied.
        let late = StoredMessage {
            id: stallside_core::MessageId::new(5),
            order_id: ORDER,
            sender_id: PEER,
            body: "late".to_string(),
            attachment: None,
            created_at: chrono::Utc::now(),
            read: false,
        };
        transport.inject(&LiveEvent::MessageReceived(late));
        settle().await;
        assert!(engine.messages().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_unread_requeries() {
        let api = MemoryMessages::new(ME);
        api.seed(ORDER, PEER, 2);
        api.seed(OrderId::new(10), PEER, 3);
        let transport = LoopTransport::new();
        let engine = engine_with(&api, &transport);

        let badges = engine.refresh_unread().await.expect("badges");
        assert_eq!(badges.total_unread, 5);
        assert_eq!(badges.conversations.len(), 2);
    }

    #[test]
    fn test_anchored_scroll_top() {
        // 400px of older messages were prepended; the viewport stays put.
        let adjusted = anchored_scroll_top(120.0, 1000.0, 1400.0);
        assert!((adjusted - 520.0).abs() < f64::EPSILON);
    }
}
