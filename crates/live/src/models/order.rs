//! Order domain model and its transition rules.
//!
//! Completion requires both parties to independently attest: the seller
//! cannot mark an order done without photographic proof, and the buyer's
//! confirmation is the dispute-resolution anchor. The two attestations may
//! arrive in either order; repeating one is a no-op.
//!
//! Every transition method validates first and only mutates on success, so
//! a returned error leaves the order untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stallside_core::{
    CurrencyCode, DeliveryMethod, OrderId, OrderStatus, Party, Price, ProductId, UserId,
};

use crate::error::AppError;

/// Opaque reference to an uploaded proof-of-delivery image.
///
/// The core never inspects image bytes; this is whatever storable reference
/// the upload collaborator returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProofRef(String);

impl ProofRef {
    /// Wrap a storage reference returned by the uploader.
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// The underlying storage reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A single ordered line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Product being purchased.
    pub product_id: ProductId,
    /// Display name at the time of purchase.
    pub name: String,
    /// Quantity ordered.
    pub quantity: u32,
    /// Unit price at the time of purchase.
    pub unit_price: Price,
}

impl OrderItem {
    /// Total for this line item.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.unit_price.line_total(self.quantity)
    }
}

/// Buyer-supplied rating for one line item, set only after completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemRating {
    /// The rated product.
    pub product_id: ProductId,
    /// 1-5 stars.
    pub stars: u8,
    /// Optional free-form comment.
    pub comment: Option<String>,
}

/// Geographic point for drop-off delivery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// How and where the order changes hands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryDetails {
    /// Pickup at the stall or drop-off at the buyer's address.
    pub method: DeliveryMethod,
    /// Delivery address, for drop-off orders.
    pub address: Option<String>,
    /// Delivery coordinates, for drop-off orders.
    pub coordinates: Option<Coordinates>,
}

/// Outcome of one party's delivery attestation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// This party had already attested; nothing changed and no event fires.
    AlreadyConfirmed,
    /// Attestation recorded; the other party has not yet confirmed.
    AwaitingOther,
    /// Both parties have now attested; the order is completed.
    Completed,
}

/// A single buyer-seller transaction and its fulfillment status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Unique order ID.
    pub id: OrderId,
    /// The purchasing participant.
    pub buyer_id: UserId,
    /// The selling participant.
    pub seller_id: UserId,
    /// Ordered line items.
    pub items: Vec<OrderItem>,
    /// Handover details.
    pub delivery: DeliveryDetails,
    /// Current fulfillment status.
    pub status: OrderStatus,
    /// Seller has attested delivery.
    pub seller_confirmed: bool,
    /// Buyer has attested receipt.
    pub buyer_confirmed: bool,
    /// Seller's delivery proof; required for the seller attestation.
    pub seller_proof: Option<ProofRef>,
    /// Buyer's receipt proof; always optional.
    pub buyer_proof: Option<ProofRef>,
    /// Why the order was cancelled, when it was.
    pub cancellation_reason: Option<String>,
    /// Per-line-item ratings; empty until the buyer rates.
    pub ratings: Vec<LineItemRating>,
    /// When the order was created.
    pub created_at: DateTime<Utc>,
    /// When the order was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Computed total across all line items.
    #[must_use]
    pub fn total(&self) -> Price {
        let currency = self
            .items
            .first()
            .map_or(CurrencyCode::default(), |item| {
                item.unit_price.currency_code
            });
        self.items.iter().fold(
            Price::from_minor_units(0, currency),
            |acc, item| Price::new(acc.amount + item.line_total().amount, currency),
        )
    }

    /// Which side of this order the given user is on, if any.
    #[must_use]
    pub fn participant(&self, user_id: UserId) -> Option<Party> {
        if user_id == self.buyer_id {
            Some(Party::Buyer)
        } else if user_id == self.seller_id {
            Some(Party::Seller)
        } else {
            None
        }
    }

    /// Whether the buyer has already rated this order.
    #[must_use]
    pub fn is_rated(&self) -> bool {
        !self.ratings.is_empty()
    }

    /// Completion is consistent: `completed` exactly when both parties have
    /// attested, and no attestation exists on a pending or cancelled order.
    #[must_use]
    pub fn completion_consistent(&self) -> bool {
        let both = self.seller_confirmed && self.buyer_confirmed;
        let flags_allowed = !matches!(
            self.status,
            OrderStatus::Pending | OrderStatus::Cancelled
        ) || (!self.seller_confirmed && !self.buyer_confirmed);
        (self.status == OrderStatus::Completed) == both && flags_allowed
    }

    /// Seller accepts the order: `pending → confirmed`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the order is not pending.
    pub fn confirm(&mut self) -> Result<(), AppError> {
        if self.status != OrderStatus::Pending {
            return Err(AppError::invalid_state("confirm", self.status));
        }
        self.status = OrderStatus::Confirmed;
        Ok(())
    }

    /// Seller marks the order prepared: `confirmed → ready`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the order is not confirmed.
    pub fn mark_ready(&mut self) -> Result<(), AppError> {
        if self.status != OrderStatus::Confirmed {
            return Err(AppError::invalid_state("mark ready", self.status));
        }
        self.status = OrderStatus::Ready;
        Ok(())
    }

    /// Seller attests delivery. Requires a delivery proof.
    ///
    /// If the buyer had already confirmed receipt, this completes the order.
    /// Repeating the attestation is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the order is not ready, or `Validation`
    /// if the proof is missing.
    pub fn complete_delivery(&mut self, proof: Option<ProofRef>) -> Result<Completion, AppError> {
        if self.status != OrderStatus::Ready {
            return Err(AppError::invalid_state("complete delivery for", self.status));
        }
        if self.seller_confirmed {
            return Ok(Completion::AlreadyConfirmed);
        }
        let Some(proof) = proof else {
            return Err(AppError::validation("a delivery proof photo is required"));
        };
        self.seller_confirmed = true;
        self.seller_proof = Some(proof);
        if self.buyer_confirmed {
            self.status = OrderStatus::Completed;
            Ok(Completion::Completed)
        } else {
            Ok(Completion::AwaitingOther)
        }
    }

    /// Buyer attests receipt. The proof is optional.
    ///
    /// If the seller had already attested delivery, this completes the
    /// order. Repeating the attestation is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the order is not ready.
    pub fn confirm_receipt(&mut self, proof: Option<ProofRef>) -> Result<Completion, AppError> {
        if self.status != OrderStatus::Ready {
            return Err(AppError::invalid_state("confirm receipt for", self.status));
        }
        if self.buyer_confirmed {
            return Ok(Completion::AlreadyConfirmed);
        }
        self.buyer_confirmed = true;
        self.buyer_proof = proof;
        if self.seller_confirmed {
            self.status = OrderStatus::Completed;
            Ok(Completion::Completed)
        } else {
            Ok(Completion::AwaitingOther)
        }
    }

    /// Cancel the order: `pending → cancelled`, usable by either party.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the order is not pending, or `Validation`
    /// if the reason is empty.
    pub fn cancel(&mut self, reason: &str) -> Result<(), AppError> {
        if self.status != OrderStatus::Pending {
            return Err(AppError::invalid_state("cancel", self.status));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::validation("a cancellation reason is required"));
        }
        self.status = OrderStatus::Cancelled;
        self.cancellation_reason = Some(reason.to_string());
        Ok(())
    }

    /// Attach the buyer's ratings, once, after completion.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the order is not completed or was already
    /// rated, or `Validation` if a rating is out of range or references a
    /// product not on the order.
    pub fn rate(&mut self, ratings: Vec<LineItemRating>) -> Result<(), AppError> {
        if self.status != OrderStatus::Completed {
            return Err(AppError::invalid_state("rate", self.status));
        }
        if self.is_rated() {
            return Err(AppError::invalid_state("rate again", self.status));
        }
        if ratings.is_empty() {
            return Err(AppError::validation("at least one rating is required"));
        }
        for rating in &ratings {
            if !(1..=5).contains(&rating.stars) {
                return Err(AppError::validation(format!(
                    "rating must be between 1 and 5 stars, got {}",
                    rating.stars
                )));
            }
            if !self.items.iter().any(|i| i.product_id == rating.product_id) {
                return Err(AppError::validation(format!(
                    "product {} is not part of this order",
                    rating.product_id
                )));
            }
        }
        self.ratings = ratings;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_order() -> Order {
        Order {
            id: OrderId::new(1),
            buyer_id: UserId::new(10),
            seller_id: UserId::new(20),
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
            status: OrderStatus::Pending,
            seller_confirmed: false,
            buyer_confirmed: false,
            seller_proof: None,
            buyer_proof: None,
            cancellation_reason: None,
            ratings: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn ready_order() -> Order {
        let mut order = test_order();
        order.confirm().expect("confirm");
        order.mark_ready().expect("mark ready");
        order
    }

    #[test]
    fn test_total_sums_line_items() {
        let order = test_order();
        assert_eq!(order.total().to_string(), "25.00 USD");
    }

    #[test]
    fn test_happy_path_seller_first() {
        let mut order = ready_order();

        let outcome = order
            .complete_delivery(Some(ProofRef::new("proofs/1.jpg")))
            .expect("seller attests");
        assert_eq!(outcome, Completion::AwaitingOther);
        assert!(order.seller_confirmed);
        assert_eq!(order.status, OrderStatus::Ready);

        let outcome = order.confirm_receipt(None).expect("buyer attests");
        assert_eq!(outcome, Completion::Completed);
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.completion_consistent());
    }

    #[test]
    fn test_happy_path_buyer_first() {
        let mut order = ready_order();

        let outcome = order.confirm_receipt(None).expect("buyer attests");
        assert_eq!(outcome, Completion::AwaitingOther);
        assert_eq!(order.status, OrderStatus::Ready);

        let outcome = order
            .complete_delivery(Some(ProofRef::new("proofs/1.jpg")))
            .expect("seller attests");
        assert_eq!(outcome, Completion::Completed);
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.completion_consistent());
    }

    #[test]
    fn test_seller_completion_requires_proof() {
        let mut order = ready_order();
        let err = order.complete_delivery(None).expect_err("no proof");
        assert!(matches!(err, AppError::Validation(_)));
        assert!(!order.seller_confirmed);
        assert_eq!(order.status, OrderStatus::Ready);
    }

    #[test]
    fn test_double_attestation_is_noop() {
        let mut order = ready_order();
        order
            .complete_delivery(Some(ProofRef::new("proofs/1.jpg")))
            .expect("first attestation");
        let outcome = order
            .complete_delivery(Some(ProofRef::new("proofs/2.jpg")))
            .expect("second attestation");
        assert_eq!(outcome, Completion::AlreadyConfirmed);
        // The original proof is kept
        assert_eq!(order.seller_proof, Some(ProofRef::new("proofs/1.jpg")));

        order.confirm_receipt(None).expect("buyer attests");
        let outcome = order.confirm_receipt(None).expect("buyer repeats");
        assert_eq!(outcome, Completion::AlreadyConfirmed);
        assert_eq!(order.status, OrderStatus::Completed);
    }

    #[test]
    fn test_attestation_rejected_before_ready() {
        let mut order = test_order();
        let err = order
            .complete_delivery(Some(ProofRef::new("proofs/1.jpg")))
            .expect_err("pending order");
        assert!(matches!(err, AppError::InvalidState { .. }));

        let err = order.confirm_receipt(None).expect_err("pending order");
        assert!(matches!(err, AppError::InvalidState { .. }));
        assert!(order.completion_consistent());
    }

    #[test]
    fn test_cancel_only_from_pending() {
        let mut order = test_order();
        order.cancel("seller never showed up").expect("cancel pending");
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(
            order.cancellation_reason.as_deref(),
            Some("seller never showed up")
        );

        for mut order in [ready_order(), {
            let mut o = test_order();
            o.confirm().expect("confirm");
            o
        }] {
            let err = order.cancel("too late").expect_err("not pending");
            assert!(matches!(err, AppError::InvalidState { .. }));
        }
    }

    #[test]
    fn test_cancel_requires_reason() {
        let mut order = test_order();
        let err = order.cancel("   ").expect_err("blank reason");
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[test]
    fn test_rate_only_after_completion() {
        let mut order = ready_order();
        let rating = LineItemRating {
            product_id: ProductId::new(100),
            stars: 5,
            comment: None,
        };
        let err = order.rate(vec![rating.clone()]).expect_err("not completed");
        assert!(matches!(err, AppError::InvalidState { .. }));

        order
            .complete_delivery(Some(ProofRef::new("proofs/1.jpg")))
            .expect("seller attests");
        order.confirm_receipt(None).expect("buyer attests");

        order.rate(vec![rating.clone()]).expect("rate completed");
        assert!(order.is_rated());

        let err = order.rate(vec![rating]).expect_err("already rated");
        assert!(matches!(err, AppError::InvalidState { .. }));
    }

    #[test]
    fn test_rate_validates_stars_and_products() {
        let mut order = ready_order();
        order
            .complete_delivery(Some(ProofRef::new("proofs/1.jpg")))
            .expect("seller attests");
        order.confirm_receipt(None).expect("buyer attests");

        let err = order
            .rate(vec![LineItemRating {
                product_id: ProductId::new(100),
                stars: 6,
                comment: None,
            }])
            .expect_err("six stars");
        assert!(matches!(err, AppError::Validation(_)));

        let err = order
            .rate(vec![LineItemRating {
                product_id: ProductId::new(999),
                stars: 4,
                comment: None,
            }])
            .expect_err("unknown product");
        assert!(matches!(err, AppError::Validation(_)));
        assert!(!order.is_rated());
    }

    #[test]
    fn test_participant() {
        let order = test_order();
        assert_eq!(order.participant(UserId::new(10)), Some(Party::Buyer));
        assert_eq!(order.participant(UserId::new(20)), Some(Party::Seller));
        assert_eq!(order.participant(UserId::new(30)), None);
    }
}
