//! Order lifecycle service.
//!
//! Drives the order state machine against the persistence API and
//! publishes a typed event on the transport after every successful
//! transition, so the other party's client stays synchronized. Local
//! validation happens before any network call, and a failed call leaves
//! the caller's order untouched.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use stallside_core::{OrderId, OrderStatus, Party};

use crate::api::{OrderApi, OrderDraft, OrderFilter, ProofUploader};
use crate::error::AppError;
use crate::models::{Completion, LineItemRating, Order};
use crate::transport::{CancellationEvent, LiveEvent, OrderEvent, Transport};

struct LifecycleInner {
    api: Arc<dyn OrderApi>,
    uploader: Arc<dyn ProofUploader>,
    transport: Arc<dyn Transport>,
}

/// The order lifecycle manager. Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct OrderLifecycle {
    inner: Arc<LifecycleInner>,
}

impl OrderLifecycle {
    /// Create a lifecycle manager over the given collaborators.
    #[must_use]
    pub fn new(
        api: Arc<dyn OrderApi>,
        uploader: Arc<dyn ProofUploader>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            inner: Arc::new(LifecycleInner {
                api,
                uploader,
                transport,
            }),
        }
    }

    /// Create an order in `pending` from the checkout flow's draft.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty draft, or the underlying API
    /// error.
    #[instrument(skip(self, draft))]
    pub async fn place(&self, draft: OrderDraft) -> Result<Order, AppError> {
        if draft.items.is_empty() {
            return Err(AppError::validation("an order needs at least one item"));
        }
        let order = self.inner.api.create(draft).await?;
        info!(order_id = %order.id, "order placed");
        self.emit(LiveEvent::OrderNew(OrderEvent::from(&order))).await;
        Ok(order)
    }

    /// Fetch one order.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the order does not exist.
    pub async fn fetch(&self, id: OrderId) -> Result<Order, AppError> {
        self.inner.api.get(id).await
    }

    /// List the caller's orders.
    ///
    /// # Errors
    ///
    /// Returns the underlying API error.
    pub async fn list(&self, filter: OrderFilter) -> Result<Vec<Order>, AppError> {
        self.inner.api.list(filter).await
    }

    /// Seller accepts the order: `pending → confirmed`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the order is not pending.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn seller_confirm(&self, order: &mut Order) -> Result<(), AppError> {
        let mut next = order.clone();
        next.confirm()?;
        let saved = self
            .inner
            .api
            .update_status(order.id, OrderStatus::Confirmed)
            .await?;
        *order = saved;
        info!("order confirmed by seller");
        self.emit(LiveEvent::OrderUpdated(OrderEvent::from(&*order)))
            .await;
        Ok(())
    }

    /// Seller marks the order prepared: `confirmed → ready`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the order is not confirmed.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn seller_mark_ready(&self, order: &mut Order) -> Result<(), AppError> {
        let mut next = order.clone();
        next.mark_ready()?;
        let saved = self
            .inner
            .api
            .update_status(order.id, OrderStatus::Ready)
            .await?;
        *order = saved;
        info!("order marked ready");
        self.emit(LiveEvent::OrderUpdated(OrderEvent::from(&*order)))
            .await;
        Ok(())
    }

    /// Seller attests delivery with a mandatory proof photo.
    ///
    /// Completes the order if the buyer had already confirmed receipt.
    /// Attesting twice is a no-op that fires no second event.
    ///
    /// # Errors
    ///
    /// Returns `Validation` without a proof image, `InvalidState` outside
    /// `ready`, or the underlying upload/API error.
    #[instrument(skip(self, order, proof_image), fields(order_id = %order.id))]
    pub async fn complete_delivery(
        &self,
        order: &mut Order,
        proof_image: Option<&[u8]>,
    ) -> Result<Completion, AppError> {
        if order.status != OrderStatus::Ready {
            return Err(AppError::invalid_state("complete delivery for", order.status));
        }
        if order.seller_confirmed {
            debug!("seller already attested delivery");
            return Ok(Completion::AlreadyConfirmed);
        }
        let Some(image) = proof_image else {
            return Err(AppError::validation("a delivery proof photo is required"));
        };

        // Everything local is legal; now pay for the upload.
        let proof = self.inner.uploader.upload(image).await?;
        let mut next = order.clone();
        let outcome = next.complete_delivery(Some(proof.clone()))?;
        let saved = self
            .inner
            .api
            .confirm_delivery(order.id, Party::Seller, Some(proof))
            .await?;
        *order = saved;
        info!(status = %order.status, "seller attested delivery");
        self.emit(LiveEvent::OrderUpdated(OrderEvent::from(&*order)))
            .await;
        Ok(outcome)
    }

    /// Buyer attests receipt; the proof photo is optional.
    ///
    /// Completes the order if the seller had already attested delivery.
    /// Attesting twice is a no-op that fires no second event.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` outside `ready`, or the underlying
    /// upload/API error.
    #[instrument(skip(self, order, proof_image), fields(order_id = %order.id))]
    pub async fn confirm_receipt(
        &self,
        order: &mut Order,
        proof_image: Option<&[u8]>,
    ) -> Result<Completion, AppError> {
        if order.status == OrderStatus::Ready && order.buyer_confirmed {
            debug!("buyer already confirmed receipt");
            return Ok(Completion::AlreadyConfirmed);
        }
        if order.status != OrderStatus::Ready {
            return Err(AppError::invalid_state("confirm receipt for", order.status));
        }

        let proof = match proof_image {
            Some(image) => Some(self.inner.uploader.upload(image).await?),
            None => None,
        };
        let mut next = order.clone();
        let outcome = next.confirm_receipt(proof.clone())?;
        let saved = self
            .inner
            .api
            .confirm_delivery(order.id, Party::Buyer, proof)
            .await?;
        *order = saved;
        info!(status = %order.status, "buyer confirmed receipt");
        self.emit(LiveEvent::OrderUpdated(OrderEvent::from(&*order)))
            .await;
        Ok(outcome)
    }

    /// Cancel a pending order, usable by either party.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty reason or `InvalidState` outside
    /// `pending`.
    #[instrument(skip(self, order, reason), fields(order_id = %order.id))]
    pub async fn cancel(&self, order: &mut Order, reason: &str) -> Result<(), AppError> {
        let mut next = order.clone();
        next.cancel(reason)?;
        let saved = self.inner.api.cancel(order.id, reason.trim()).await?;
        *order = saved;
        info!("order cancelled");
        self.emit(LiveEvent::OrderCancelled(CancellationEvent {
            order_id: order.id,
            reason: reason.trim().to_string(),
        }))
        .await;
        Ok(())
    }

    /// Attach the buyer's per-line-item ratings after completion.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the order is not completed or already
    /// rated, or `Validation` for out-of-range ratings.
    #[instrument(skip(self, order, ratings), fields(order_id = %order.id))]
    pub async fn rate(
        &self,
        order: &mut Order,
        ratings: Vec<LineItemRating>,
    ) -> Result<(), AppError> {
        let mut next = order.clone();
        next.rate(ratings.clone())?;
        let saved = self.inner.api.rate(order.id, &ratings).await?;
        *order = saved;
        info!("order rated");
        Ok(())
    }

    /// File an issue report on a completed order. An independent side
    /// channel: the status never changes, disputes are resolved manually.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the order is not completed or
    /// `Validation` for an empty description.
    #[instrument(skip(self, order, description), fields(order_id = %order.id))]
    pub async fn report_issue(&self, order: &Order, description: &str) -> Result<(), AppError> {
        if order.status != OrderStatus::Completed {
            return Err(AppError::invalid_state("report an issue for", order.status));
        }
        let description = description.trim();
        if description.is_empty() {
            return Err(AppError::validation("an issue description is required"));
        }
        self.inner.api.report_issue(order.id, description).await?;
        info!("issue reported");
        Ok(())
    }

    /// Publish a lifecycle event. The transition is already persisted, so
    /// a transport failure is logged rather than surfaced.
    async fn emit(&self, event: LiveEvent) {
        if let Err(e) = self.inner.transport.emit(event).await {
            warn!(error = %e, "failed to publish order event");
        }
    }
}
