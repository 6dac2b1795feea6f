//! Order persistence API.

use async_trait::async_trait;
use serde::Serialize;

use stallside_core::{OrderId, OrderStatus, Party, UserId};

use crate::error::AppError;
use crate::models::{DeliveryDetails, LineItemRating, Order, OrderItem, ProofRef};

use super::ApiClient;

/// What the checkout flow hands the core to create an order.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDraft {
    /// The selling participant.
    pub seller_id: UserId,
    /// Ordered line items.
    pub items: Vec<OrderItem>,
    /// Handover details.
    pub delivery: DeliveryDetails,
}

/// Filters for listing orders.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderFilter {
    /// Restrict to orders where the caller is on this side.
    pub role: Option<Party>,
    /// Restrict to a single status.
    pub status: Option<OrderStatus>,
}

/// The consumed order persistence interface.
///
/// The backend identifies the caller from the bearer token; party checks
/// beyond that happen server-side.
#[async_trait]
pub trait OrderApi: Send + Sync {
    /// Create an order in `pending`.
    async fn create(&self, draft: OrderDraft) -> Result<Order, AppError>;

    /// Fetch one order.
    async fn get(&self, id: OrderId) -> Result<Order, AppError>;

    /// List the caller's orders.
    async fn list(&self, filter: OrderFilter) -> Result<Vec<Order>, AppError>;

    /// Persist a plain status transition.
    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<Order, AppError>;

    /// Persist one party's delivery attestation.
    async fn confirm_delivery(
        &self,
        id: OrderId,
        party: Party,
        proof: Option<ProofRef>,
    ) -> Result<Order, AppError>;

    /// Persist a cancellation.
    async fn cancel(&self, id: OrderId, reason: &str) -> Result<Order, AppError>;

    /// Persist the buyer's ratings.
    async fn rate(&self, id: OrderId, ratings: &[LineItemRating]) -> Result<Order, AppError>;

    /// File a post-completion issue report.
    async fn report_issue(&self, id: OrderId, description: &str) -> Result<(), AppError>;
}

/// `OrderApi` over the hosted REST backend.
#[derive(Clone)]
pub struct HttpOrderApi {
    client: ApiClient,
}

impl HttpOrderApi {
    /// Create an order API over the shared client.
    #[must_use]
    pub const fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OrderApi for HttpOrderApi {
    async fn create(&self, draft: OrderDraft) -> Result<Order, AppError> {
        self.client.post("orders", &draft).await
    }

    async fn get(&self, id: OrderId) -> Result<Order, AppError> {
        self.client.get(&format!("orders/{id}"), &[]).await
    }

    async fn list(&self, filter: OrderFilter) -> Result<Vec<Order>, AppError> {
        let mut query = Vec::new();
        if let Some(role) = filter.role {
            query.push(("role", role.to_string()));
        }
        if let Some(status) = filter.status {
            query.push(("status", status.to_string()));
        }
        self.client.get("orders", &query).await
    }

    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<Order, AppError> {
        self.client
            .post(
                &format!("orders/{id}/status"),
                &serde_json::json!({"status": status}),
            )
            .await
    }

    async fn confirm_delivery(
        &self,
        id: OrderId,
        party: Party,
        proof: Option<ProofRef>,
    ) -> Result<Order, AppError> {
        self.client
            .post(
                &format!("orders/{id}/confirm"),
                &serde_json::json!({"party": party, "proof": proof}),
            )
            .await
    }

    async fn cancel(&self, id: OrderId, reason: &str) -> Result<Order, AppError> {
        self.client
            .post(
                &format!("orders/{id}/cancel"),
                &serde_json::json!({"reason": reason}),
            )
            .await
    }

    async fn rate(&self, id: OrderId, ratings: &[LineItemRating]) -> Result<Order, AppError> {
        self.client
            .post(
                &format!("orders/{id}/rating"),
                &serde_json::json!({"ratings": ratings}),
            )
            .await
    }

    async fn report_issue(&self, id: OrderId, description: &str) -> Result<(), AppError> {
        self.client
            .post_empty(
                &format!("orders/{id}/issues"),
                &serde_json::json!({"description": description}),
            )
            .await
    }
}
