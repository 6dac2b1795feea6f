//! Integration test harness for Stallside live sessions.
//!
//! Wires two (or more) [`LiveSession`]s through an in-memory hub that
//! plays the server's role in event routing, together with shared
//! in-memory order and message stores. No network, no database: the
//! harness exercises the live core end to end with the collaborators the
//! real backend would provide.
//!
//! # Routing rules
//!
//! The hub mirrors the hosted relay: messaging events (`message_received`,
//! `typing`, `message_read_receipt`) are delivered to everyone connected,
//! including the sender (the echo the engine must suppress); order events
//! go to everyone but the sender; presence events are synthesized by the
//! hub itself on connect/disconnect, with a bulk snapshot delivered to
//! each client after it connects.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use stallside_core::{
    CurrencyCode, DeliveryMethod, MessageId, OrderId, OrderStatus, Party, Price, ProductId,
    UserId,
};
use stallside_live::api::{
    MessageApi, MessagePage, OrderApi, OrderDraft, OrderFilter, ProofUploader,
};
use stallside_live::error::AppError;
use stallside_live::models::{
    ConversationSummary, DeliveryDetails, LineItemRating, Order, OrderItem, ProofRef,
    StoredMessage,
};
use stallside_live::notify::{Alert, AlertSink, SoundKind};
use stallside_live::session::LiveSession;
use stallside_live::transport::{
    EventBus, LiveEvent, PresenceEvent, PresenceSnapshotEvent, Transport,
};

/// Presence snapshot wait used by harness sessions.
pub const TEST_PRESENCE_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Hub transport
// =============================================================================

#[derive(Default)]
struct HubState {
    clients: HashMap<UserId, ClientHandle>,
}

struct ClientHandle {
    bus: EventBus,
    connected: bool,
}

/// In-memory stand-in for the realtime relay.
#[derive(Clone, Default)]
pub struct LocalHub {
    state: Arc<Mutex<HubState>>,
}

impl LocalHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport endpoint for one participant.
    #[must_use]
    pub fn transport(&self, user_id: UserId) -> Arc<HubTransport> {
        Arc::new(HubTransport {
            hub: self.state.clone(),
            me: user_id,
            bus: EventBus::new(),
        })
    }
}

/// One participant's endpoint on the [`LocalHub`].
pub struct HubTransport {
    hub: Arc<Mutex<HubState>>,
    me: UserId,
    bus: EventBus,
}

#[async_trait]
impl Transport for HubTransport {
    async fn connect(&self) -> Result<(), AppError> {
        let (snapshot, peer_buses) = {
            let mut state = self.hub.lock().unwrap();
            let handle = state.clients.entry(self.me).or_insert_with(|| ClientHandle {
                bus: self.bus.clone(),
                connected: false,
            });
            if handle.connected {
                return Ok(());
            }
            handle.connected = true;

            let snapshot: Vec<UserId> = state
                .clients
                .iter()
                .filter(|(_, c)| c.connected)
                .map(|(user, _)| *user)
                .collect();
            let peers: Vec<EventBus> = state
                .clients
                .iter()
                .filter(|(user, c)| c.connected && **user != self.me)
                .map(|(_, c)| c.bus.clone())
                .collect();
            (snapshot, peers)
        };

        for bus in peer_buses {
            bus.publish(&LiveEvent::UserOnline(PresenceEvent { user_id: self.me }));
        }

        // The snapshot lands after the session has finished subscribing,
        // as it does over a real socket.
        let own_bus = self.bus.clone();
        tokio::spawn(async move {
            own_bus.publish(&LiveEvent::InitialOnlineUsers(PresenceSnapshotEvent {
                user_ids: snapshot,
            }));
        });
        Ok(())
    }

    async fn disconnect(&self) {
        let peer_buses: Vec<EventBus> = {
            let mut state = self.hub.lock().unwrap();
            let Some(handle) = state.clients.get_mut(&self.me) else {
                return;
            };
            if !handle.connected {
                return;
            }
            handle.connected = false;
            state
                .clients
                .iter()
                .filter(|(user, c)| c.connected && **user != self.me)
                .map(|(_, c)| c.bus.clone())
                .collect()
        };
        for bus in peer_buses {
            bus.publish(&LiveEvent::UserOffline(PresenceEvent { user_id: self.me }));
        }
    }

    async fn join(&self, _room: OrderId) -> Result<(), AppError> {
        Ok(())
    }

    async fn leave(&self, _room: OrderId) -> Result<(), AppError> {
        Ok(())
    }

    async fn emit(&self, event: LiveEvent) -> Result<(), AppError> {
        let echo_to_sender = matches!(
            event,
            LiveEvent::MessageReceived(_)
                | LiveEvent::Typing(_)
                | LiveEvent::MessageReadReceipt(_)
        );
        let targets: Vec<EventBus> = {
            let state = self.hub.lock().unwrap();
            state
                .clients
                .iter()
                .filter(|(_, c)| c.connected)
                .filter(|(user, _)| echo_to_sender || **user != self.me)
                .map(|(_, c)| c.bus.clone())
                .collect()
        };
        for bus in targets {
            bus.publish(&event);
        }
        Ok(())
    }

    fn events(&self) -> EventBus {
        self.bus.clone()
    }
}

// =============================================================================
// Shared persistence
// =============================================================================

/// Order store shared by every session in a test.
#[derive(Default)]
pub struct SharedOrderStore {
    orders: Mutex<HashMap<OrderId, Order>>,
    next_id: AtomicI32,
}

impl SharedOrderStore {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            orders: Mutex::new(HashMap::new()),
            next_id: AtomicI32::new(1),
        })
    }

    /// Direct read access, for asserting persisted state.
    #[must_use]
    pub fn get(&self, id: OrderId) -> Option<Order> {
        self.orders.lock().unwrap().get(&id).cloned()
    }

    fn mutate(
        &self,
        id: OrderId,
        f: impl FnOnce(&mut Order) -> Result<(), AppError>,
    ) -> Result<Order, AppError> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("order {id}")))?;
        f(order)?;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }
}

/// One participant's view of the shared order store.
pub struct HubOrderApi {
    store: Arc<SharedOrderStore>,
    caller: UserId,
}

impl HubOrderApi {
    #[must_use]
    pub fn new(store: Arc<SharedOrderStore>, caller: UserId) -> Arc<Self> {
        Arc::new(Self { store, caller })
    }
}

#[async_trait]
impl OrderApi for HubOrderApi {
    async fn create(&self, draft: OrderDraft) -> Result<Order, AppError> {
        let id = OrderId::new(self.store.next_id.fetch_add(1, Ordering::SeqCst));
        let order = Order {
            id,
            buyer_id: self.caller,
            seller_id: draft.seller_id,
            items: draft.items,
            delivery: draft.delivery,
            status: OrderStatus::Pending,
            seller_confirmed: false,
            buyer_confirmed: false,
            seller_proof: None,
            buyer_proof: None,
            cancellation_reason: None,
            ratings: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.store.orders.lock().unwrap().insert(id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: OrderId) -> Result<Order, AppError> {
        self.store
            .get(id)
            .ok_or_else(|| AppError::NotFound(format!("order {id}")))
    }

    async fn list(&self, filter: OrderFilter) -> Result<Vec<Order>, AppError> {
        let orders = self.store.orders.lock().unwrap();
        let mut matching: Vec<Order> = orders
            .values()
            .filter(|order| match filter.role {
                Some(Party::Buyer) => order.buyer_id == self.caller,
                Some(Party::Seller) => order.seller_id == self.caller,
                None => order.buyer_id == self.caller || order.seller_id == self.caller,
            })
            .filter(|order| filter.status.is_none_or(|status| order.status == status))
            .cloned()
            .collect();
        matching.sort_by_key(|order| order.id);
        Ok(matching)
    }

    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<Order, AppError> {
        self.store.mutate(id, |order| match status {
            OrderStatus::Confirmed => order.confirm(),
            OrderStatus::Ready => order.mark_ready(),
            _ => Err(AppError::Api(format!(
                "status {status} is not reachable via update"
            ))),
        })
    }

    async fn confirm_delivery(
        &self,
        id: OrderId,
        party: Party,
        proof: Option<ProofRef>,
    ) -> Result<Order, AppError> {
        self.store.mutate(id, |order| {
            match party {
                Party::Seller => order.complete_delivery(proof)?,
                Party::Buyer => order.confirm_receipt(proof)?,
            };
            Ok(())
        })
    }

    async fn cancel(&self, id: OrderId, reason: &str) -> Result<Order, AppError> {
        self.store.mutate(id, |order| order.cancel(reason))
    }

    async fn rate(&self, id: OrderId, ratings: &[LineItemRating]) -> Result<Order, AppError> {
        self.store.mutate(id, |order| order.rate(ratings.to_vec()))
    }

    async fn report_issue(&self, id: OrderId, _description: &str) -> Result<(), AppError> {
        let order = self.get(id).await?;
        if order.status != OrderStatus::Completed {
            return Err(AppError::invalid_state("report an issue for", order.status));
        }
        Ok(())
    }
}

/// Message store shared by every session in a test.
#[derive(Default)]
pub struct SharedMessageStore {
    messages: Mutex<HashMap<OrderId, Vec<StoredMessage>>>,
    next_id: AtomicI32,
}

impl SharedMessageStore {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(HashMap::new()),
            next_id: AtomicI32::new(1),
        })
    }

    /// Direct read access, for asserting persisted state.
    #[must_use]
    pub fn stored(&self, order_id: OrderId) -> Vec<StoredMessage> {
        self.messages
            .lock()
            .unwrap()
            .get(&order_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// One participant's view of the shared message store.
pub struct HubMessageApi {
    store: Arc<SharedMessageStore>,
    caller: UserId,
}

impl HubMessageApi {
    #[must_use]
    pub fn new(store: Arc<SharedMessageStore>, caller: UserId) -> Arc<Self> {
        Arc::new(Self { store, caller })
    }
}

#[async_trait]
impl MessageApi for HubMessageApi {
    async fn list(
        &self,
        order_id: OrderId,
        limit: u32,
        offset: u32,
    ) -> Result<MessagePage, AppError> {
        let messages = self.store.stored(order_id);
        let total = messages.len();
        let end = total.saturating_sub(offset as usize);
        let start = end.saturating_sub(limit as usize);
        Ok(MessagePage {
            messages: messages.get(start..end).unwrap_or_default().to_vec(),
            has_more: start > 0,
        })
    }

    async fn send(&self, order_id: OrderId, body: &str) -> Result<StoredMessage, AppError> {
        let id = MessageId::new(self.store.next_id.fetch_add(1, Ordering::SeqCst));
        let stored = StoredMessage {
            id,
            order_id,
            sender_id: self.caller,
            body: body.to_string(),
            attachment: None,
            created_at: Utc::now(),
            read: false,
        };
        self.store
            .messages
            .lock()
            .unwrap()
            .entry(order_id)
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn mark_read(&self, order_id: OrderId) -> Result<(), AppError> {
        let mut messages = self.store.messages.lock().unwrap();
        if let Some(conversation) = messages.get_mut(&order_id) {
            for message in conversation
                .iter_mut()
                .filter(|m| m.sender_id != self.caller)
            {
                message.read = true;
            }
        }
        Ok(())
    }

    async fn conversations(&self) -> Result<Vec<ConversationSummary>, AppError> {
        let messages = self.store.messages.lock().unwrap();
        let mut summaries: Vec<ConversationSummary> = messages
            .iter()
            .map(|(order_id, conversation)| {
                let unread = conversation
                    .iter()
                    .filter(|m| m.sender_id != self.caller && !m.read)
                    .count();
                let last = conversation.last();
                ConversationSummary {
                    order_id: *order_id,
                    unread: u32::try_from(unread).unwrap(),
                    last_message: last.map(|m| m.body.clone()),
                    last_message_at: last.map(|m| m.created_at),
                }
            })
            .collect();
        summaries.sort_by_key(|s| s.order_id);
        Ok(summaries)
    }
}

// =============================================================================
// Upload and alert doubles
// =============================================================================

/// Uploader returning deterministic references.
#[derive(Default)]
pub struct StaticUploader {
    uploads: AtomicUsize,
}

impl StaticUploader {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ProofUploader for StaticUploader {
    async fn upload(&self, _image: &[u8]) -> Result<ProofRef, AppError> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ProofRef::new(format!("proofs/it-{n}.jpg")))
    }
}

/// Alert sink recording what the user would have seen and heard.
#[derive(Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
    sounds: Mutex<Vec<SoundKind>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn rendered(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    #[must_use]
    pub fn played(&self) -> Vec<SoundKind> {
        self.sounds.lock().unwrap().clone()
    }
}

impl AlertSink for RecordingSink {
    fn render(&self, alert: &Alert) {
        self.alerts.lock().unwrap().push(alert.clone());
    }

    fn play(&self, sound: SoundKind) {
        self.sounds.lock().unwrap().push(sound);
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Everything a multi-session test needs: one hub, shared stores, and a
/// way to bring sessions up.
pub struct Harness {
    pub hub: LocalHub,
    pub orders: Arc<SharedOrderStore>,
    pub messages: Arc<SharedMessageStore>,
}

impl Harness {
    #[must_use]
    pub fn new() -> Self {
        Self {
            hub: LocalHub::new(),
            orders: SharedOrderStore::new(),
            messages: SharedMessageStore::new(),
        }
    }

    /// Start a connected session for one participant.
    pub async fn session(&self, user_id: UserId) -> (LiveSession, Arc<RecordingSink>) {
        let sink = RecordingSink::new();
        let session = LiveSession::assemble(
            user_id,
            self.hub.transport(user_id),
            HubOrderApi::new(self.orders.clone(), user_id),
            HubMessageApi::new(self.messages.clone(), user_id),
            StaticUploader::new(),
            sink.clone(),
            TEST_PRESENCE_TIMEOUT,
        )
        .await
        .expect("session assembles");
        (session, sink)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// A draft for a small pickup order.
#[must_use]
pub fn market_draft(seller_id: UserId) -> OrderDraft {
    OrderDraft {
        seller_id,
        items: vec![
            OrderItem {
                product_id: ProductId::new(100),
                name: "Heirloom tomatoes".to_string(),
                quantity: 2,
                unit_price: Price::from_minor_units(450, CurrencyCode::USD),
            },
            OrderItem {
                product_id: ProductId::new(101),
                name: "Fresh basil".to_string(),
                quantity: 1,
                unit_price: Price::from_minor_units(250, CurrencyCode::USD),
            },
        ],
        delivery: DeliveryDetails {
            method: DeliveryMethod::Pickup,
            address: None,
            coordinates: None,
        },
    }
}
