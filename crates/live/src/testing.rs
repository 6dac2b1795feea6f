//! In-memory test doubles for the unit tests in this crate.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Semaphore;

use stallside_core::{
    CurrencyCode, DeliveryMethod, MessageId, OrderId, OrderStatus, Party, Price, ProductId,
    UserId,
};

use crate::api::{MessageApi, MessagePage, OrderApi, OrderDraft, OrderFilter, ProofUploader};
use crate::error::AppError;
use crate::models::{
    ConversationSummary, DeliveryDetails, LineItemRating, Order, OrderItem, ProofRef,
    StoredMessage,
};
use crate::notify::{Alert, AlertSink, SoundKind};
use crate::transport::{EventBus, LiveEvent, Transport};

// =============================================================================
// Transport
// =============================================================================

/// Transport double: records emitted events, lets tests inject inbound
/// ones, and tracks room membership.
pub(crate) struct LoopTransport {
    bus: EventBus,
    emitted: Mutex<Vec<LiveEvent>>,
    rooms: Mutex<HashSet<OrderId>>,
}

impl LoopTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            bus: EventBus::new(),
            emitted: Mutex::new(Vec::new()),
            rooms: Mutex::new(HashSet::new()),
        })
    }

    /// Deliver an inbound event as if the server pushed it.
    pub(crate) fn inject(&self, event: &LiveEvent) {
        self.bus.publish(event);
    }

    pub(crate) fn emitted(&self) -> Vec<LiveEvent> {
        self.emitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for LoopTransport {
    async fn connect(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn join(&self, room: OrderId) -> Result<(), AppError> {
        self.rooms.lock().unwrap().insert(room);
        Ok(())
    }

    async fn leave(&self, room: OrderId) -> Result<(), AppError> {
        self.rooms.lock().unwrap().remove(&room);
        Ok(())
    }

    async fn emit(&self, event: LiveEvent) -> Result<(), AppError> {
        self.emitted.lock().unwrap().push(event);
        Ok(())
    }

    fn events(&self) -> EventBus {
        self.bus.clone()
    }
}

// =============================================================================
// Message persistence
// =============================================================================

/// In-memory `MessageApi` with call counters and scripted failures.
pub(crate) struct MemoryMessages {
    caller: UserId,
    store: Mutex<HashMap<OrderId, Vec<StoredMessage>>>,
    next_id: AtomicI32,
    list_calls: AtomicUsize,
    mark_read_calls: AtomicUsize,
    fail_next_send: AtomicBool,
    send_gate: Semaphore,
}

impl MemoryMessages {
    pub(crate) fn new(caller: UserId) -> Arc<Self> {
        Arc::new(Self::build(caller, Semaphore::MAX_PERMITS))
    }

    /// A variant whose `send` blocks until [`Self::release_send`] is
    /// called, to observe in-flight optimistic state.
    pub(crate) fn gated(caller: UserId) -> Arc<Self> {
        Arc::new(Self::build(caller, 0))
    }

    fn build(caller: UserId, permits: usize) -> Self {
        Self {
            caller,
            store: Mutex::new(HashMap::new()),
            next_id: AtomicI32::new(1),
            list_calls: AtomicUsize::new(0),
            mark_read_calls: AtomicUsize::new(0),
            fail_next_send: AtomicBool::new(false),
            send_gate: Semaphore::new(permits),
        }
    }

    pub(crate) fn release_send(&self) {
        self.send_gate.add_permits(1);
    }

    pub(crate) fn fail_next_send(&self) {
        self.fail_next_send.store(true, Ordering::SeqCst);
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_read_calls(&self) -> usize {
        self.mark_read_calls.load(Ordering::SeqCst)
    }

    /// Seed `count` unread messages from `from`, bodies `m1..mN`, with
    /// ascending timestamps.
    pub(crate) fn seed(&self, order_id: OrderId, from: UserId, count: usize) {
        let base = Utc::now();
        let mut store = self.store.lock().unwrap();
        let messages = store.entry(order_id).or_default();
        for i in 1..=count {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            messages.push(StoredMessage {
                id: MessageId::new(id),
                order_id,
                sender_id: from,
                body: format!("m{i}"),
                attachment: None,
                created_at: base + ChronoDuration::seconds(i64::try_from(i).unwrap()),
                read: false,
            });
        }
    }

    pub(crate) fn stored(&self, order_id: OrderId) -> Vec<StoredMessage> {
        self.store
            .lock()
            .unwrap()
            .get(&order_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageApi for MemoryMessages {
    async fn list(
        &self,
        order_id: OrderId,
        limit: u32,
        offset: u32,
    ) -> Result<MessagePage, AppError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let messages = self.stored(order_id);
        let total = messages.len();
        let end = total.saturating_sub(offset as usize);
        let start = end.saturating_sub(limit as usize);
        Ok(MessagePage {
            messages: messages.get(start..end).unwrap_or_default().to_vec(),
            has_more: start > 0,
        })
    }

    async fn send(&self, order_id: OrderId, body: &str) -> Result<StoredMessage, AppError> {
        self.send_gate.acquire().await.expect("send gate").forget();
        if self.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(AppError::Api("injected send failure".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stored = StoredMessage {
            id: MessageId::new(id),
            order_id,
            sender_id: self.caller,
            body: body.to_string(),
            attachment: None,
            created_at: Utc::now(),
            read: false,
        };
        self.store
            .lock()
            .unwrap()
            .entry(order_id)
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn mark_read(&self, order_id: OrderId) -> Result<(), AppError> {
        self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
        let mut store = self.store.lock().unwrap();
        if let Some(messages) = store.get_mut(&order_id) {
            for message in messages.iter_mut().filter(|m| m.sender_id != self.caller) {
                message.read = true;
            }
        }
        Ok(())
    }

    async fn conversations(&self) -> Result<Vec<ConversationSummary>, AppError> {
        let store = self.store.lock().unwrap();
        let mut summaries: Vec<ConversationSummary> = store
            .iter()
            .map(|(order_id, messages)| {
                let unread = messages
                    .iter()
                    .filter(|m| m.sender_id != self.caller && !m.read)
                    .count();
                let last = messages.last();
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
// Order persistence
// =============================================================================

/// In-memory `OrderApi` that applies the same transition rules the
/// backend enforces.
pub(crate) struct MemoryOrders {
    caller: UserId,
    orders: Mutex<HashMap<OrderId, Order>>,
    next_id: AtomicI32,
}

impl MemoryOrders {
    pub(crate) fn new(caller: UserId) -> Arc<Self> {
        Arc::new(Self {
            caller,
            orders: Mutex::new(HashMap::new()),
            next_id: AtomicI32::new(1),
        })
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

#[async_trait]
impl OrderApi for MemoryOrders {
    async fn create(&self, draft: OrderDraft) -> Result<Order, AppError> {
        let id = OrderId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
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
        self.orders.lock().unwrap().insert(id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: OrderId) -> Result<Order, AppError> {
        self.orders
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("order {id}")))
    }

    async fn list(&self, filter: OrderFilter) -> Result<Vec<Order>, AppError> {
        let orders = self.orders.lock().unwrap();
        let mut matching: Vec<Order> = orders
            .values()
            .filter(|order| match filter.role {
                Some(Party::Buyer) => order.buyer_id == self.caller,
                Some(Party::Seller) => order.seller_id == self.caller,
                None => true,
            })
            .filter(|order| filter.status.is_none_or(|status| order.status == status))
            .cloned()
            .collect();
        matching.sort_by_key(|order| order.id);
        Ok(matching)
    }

    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<Order, AppError> {
        self.mutate(id, |order| match status {
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
        self.mutate(id, |order| {
            match party {
                Party::Seller => order.complete_delivery(proof)?,
                Party::Buyer => order.confirm_receipt(proof)?,
            };
            Ok(())
        })
    }

    async fn cancel(&self, id: OrderId, reason: &str) -> Result<Order, AppError> {
        self.mutate(id, |order| order.cancel(reason))
    }

    async fn rate(&self, id: OrderId, ratings: &[LineItemRating]) -> Result<Order, AppError> {
        self.mutate(id, |order| order.rate(ratings.to_vec()))
    }

    async fn report_issue(&self, id: OrderId, _description: &str) -> Result<(), AppError> {
        let order = self.get(id).await?;
        if order.status != OrderStatus::Completed {
            return Err(AppError::invalid_state("report an issue for", order.status));
        }
        Ok(())
    }
}

/// A draft for a two-item pickup order.
pub(crate) fn sample_draft(seller_id: UserId) -> OrderDraft {
    OrderDraft {
        seller_id,
        items: vec![
            OrderItem {
                product_id: ProductId::new(100),
                name: "Sourdough loaf".to_string(),
                quantity: 2,
                unit_price: Price::from_minor_units(650, CurrencyCode::USD),
            },
            OrderItem {
                product_id: ProductId::new(101),
                name: "Wildflower honey".to_string(),
                quantity: 1,
                unit_price: Price::from_minor_units(1200, CurrencyCode::USD),
            },
        ],
        delivery: DeliveryDetails {
            method: DeliveryMethod::Pickup,
            address: None,
            coordinates: None,
        },
    }
}

// =============================================================================
// Upload and alerts
// =============================================================================

/// Uploader double returning deterministic references.
pub(crate) struct StaticUploader {
    uploads: AtomicUsize,
}

impl StaticUploader {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            uploads: AtomicUsize::new(0),
        })
    }

    pub(crate) fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProofUploader for StaticUploader {
    async fn upload(&self, _image: &[u8]) -> Result<ProofRef, AppError> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ProofRef::new(format!("proofs/test-{n}.jpg")))
    }
}

/// Alert sink double recording renders and sounds.
pub(crate) struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
    sounds: Mutex<Vec<SoundKind>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            alerts: Mutex::new(Vec::new()),
            sounds: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn rendered(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    pub(crate) fn played(&self) -> Vec<SoundKind> {
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
