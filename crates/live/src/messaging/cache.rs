//! Short-lived cache for conversation first pages.
//!
//! Only the newest page is cached, for thirty seconds, to avoid redundant
//! reloads when the user flips between conversations quickly. Any send or
//! inbound message invalidates the conversation's entry.

use std::time::Duration;

use moka::future::Cache;

use stallside_core::OrderId;

use crate::api::MessagePage;

/// How long a cached first page stays valid.
pub(crate) const FIRST_PAGE_TTL: Duration = Duration::from_secs(30);

pub(crate) struct FirstPageCache {
    cache: Cache<OrderId, MessagePage>,
}

impl FirstPageCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder().max_capacity(64).time_to_live(ttl).build(),
        }
    }

    pub(crate) async fn get(&self, order_id: OrderId) -> Option<MessagePage> {
        self.cache.get(&order_id).await
    }

    pub(crate) async fn insert(&self, order_id: OrderId, page: MessagePage) {
        self.cache.insert(order_id, page).await;
    }

    pub(crate) async fn invalidate(&self, order_id: OrderId) {
        self.cache.invalidate(&order_id).await;
    }
}
