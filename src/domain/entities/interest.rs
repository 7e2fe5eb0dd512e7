use super::product::Product;
use super::user::User;
use crate::domain::errors::DomainError;
use crate::domain::value_objects::{Money, Quantity};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

text_enum! {
    /// Lifecycle of a buyer's offer.
    ///
    /// `interested -> seller_confirmed -> deal_confirmed`, with `rejected`
    /// and `cancelled` as side exits. The last three are terminal.
    pub enum InterestStatus as "interest status" {
        Interested => "interested",
        SellerConfirmed => "seller_confirmed",
        DealConfirmed => "deal_confirmed",
        Rejected => "rejected",
        Cancelled => "cancelled",
    }
}

impl InterestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InterestStatus::DealConfirmed | InterestStatus::Rejected | InterestStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: InterestStatus) -> bool {
        use InterestStatus::*;
        matches!(
            (self, next),
            (Interested, SellerConfirmed)
                | (Interested, Rejected)
                | (SellerConfirmed, Rejected)
                | (Interested, Cancelled)
                | (SellerConfirmed, Cancelled)
                | (SellerConfirmed, DealConfirmed)
        )
    }
}

text_enum! {
    /// Offer price relative to the listed amount.
    pub enum OfferArrow as "offer direction" {
        Up => "up",
        Down => "down",
        Equal => "equal",
    }
}

/// One status change in an interest's negotiation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationEntry {
    pub action: String,
    pub from_status: InterestStatus,
    pub to_status: InterestStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Interest {
    pub id: i64,
    pub transaction_id: String,
    pub product_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub snapshot_amount: Money,
    pub snapshot_quantity: Quantity,
    pub buyer_offered_amount: Money,
    pub buyer_required_quantity: Quantity,
    pub loading_from: Option<String>,
    pub loading_to: Option<String>,
    pub delivery_date: NaiveDate,
    pub buyer_remark: Option<String>,
    pub seller_remark: Option<String>,
    pub superadmin_remark: Option<String>,
    pub is_active: bool,
    pub status: InterestStatus,
    pub deal_confirmed_at: Option<DateTime<Utc>>,
    pub negotiation_history: Vec<NegotiationEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Interest {
    /// Move to `next`, logging the change. Rejection and cancellation
    /// also retire the interest.
    pub fn transition(&mut self, next: InterestStatus, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                entity: "interest",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.negotiation_history.push(NegotiationEntry {
            action: format!("status_changed_to_{}", next),
            from_status: self.status,
            to_status: next,
            timestamp: now,
        });
        self.status = next;
        match next {
            InterestStatus::Rejected | InterestStatus::Cancelled => self.is_active = false,
            InterestStatus::DealConfirmed => self.deal_confirmed_at = Some(now),
            InterestStatus::Interested | InterestStatus::SellerConfirmed => {}
        }
        self.updated_at = now;
        Ok(())
    }

    /// Seller (or admin) accepts a fresh offer.
    pub fn accept(&mut self, remark: Option<String>, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status != InterestStatus::Interested {
            return Err(DomainError::invalid(format!(
                "Cannot approve interest with status {}.",
                self.status
            )));
        }
        self.transition(InterestStatus::SellerConfirmed, now)?;
        self.seller_remark = remark;
        Ok(())
    }

    /// Seller (or admin) declines a fresh offer.
    pub fn reject(&mut self, remark: Option<String>, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status != InterestStatus::Interested {
            return Err(DomainError::invalid(
                "Only interested requests can be rejected.",
            ));
        }
        self.transition(InterestStatus::Rejected, now)?;
        self.seller_remark = remark;
        Ok(())
    }

    /// Buyer withdraws the offer before the deal is confirmed.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::invalid(format!(
                "Cannot cancel interest with status {}.",
                self.status
            )));
        }
        self.transition(InterestStatus::Cancelled, now)
    }

    /// Admin closes the deal on a seller-confirmed offer.
    pub fn confirm_deal(&mut self, remark: Option<String>, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status != InterestStatus::SellerConfirmed {
            return Err(DomainError::invalid(
                "Only seller-confirmed interest can be confirmed as deal.",
            ));
        }
        self.transition(InterestStatus::DealConfirmed, now)?;
        self.superadmin_remark = remark;
        Ok(())
    }

    /// Rejection caused by a sibling offer winning the deal.
    pub fn reject_as_superseded(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(InterestStatus::Rejected, now)
    }

    pub fn is_open(&self) -> bool {
        self.is_active && !self.status.is_terminal()
    }

    pub fn offer_arrow(&self, listed: &Money) -> OfferArrow {
        match self.buyer_offered_amount.compare_to(listed) {
            Ordering::Greater => OfferArrow::Up,
            Ordering::Less => OfferArrow::Down,
            Ordering::Equal => OfferArrow::Equal,
        }
    }
}

/// What a buyer submits when expressing interest.
#[derive(Debug, Clone)]
pub struct InterestOffer {
    pub buyer_offered_amount: Money,
    pub buyer_required_quantity: Quantity,
    pub delivery_date: Option<NaiveDate>,
    pub loading_from: Option<String>,
    pub loading_to: Option<String>,
    pub buyer_remark: Option<String>,
}

/// A validated interest ready to be stored.
#[derive(Debug, Clone)]
pub struct NewInterest {
    pub transaction_id: String,
    pub product_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub snapshot_amount: Money,
    pub snapshot_quantity: Quantity,
    pub buyer_offered_amount: Money,
    pub buyer_required_quantity: Quantity,
    pub loading_from: Option<String>,
    pub loading_to: Option<String>,
    pub delivery_date: NaiveDate,
    pub buyer_remark: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewInterest {
    /// Validate `offer` against the listing and snapshot the listing's
    /// price and remaining stock.
    pub fn from_offer(
        product: &Product,
        buyer: &User,
        offer: InterestOffer,
        transaction_id: String,
        now: DateTime<Utc>,
    ) -> Result<NewInterest, DomainError> {
        if buyer.id == product.seller_id {
            return Err(DomainError::invalid(
                "Seller cannot show interest in own product.",
            ));
        }
        product.ensure_open_for_interest()?;
        if !offer.buyer_offered_amount.is_positive() {
            return Err(DomainError::invalid(
                "Offered amount must be greater than 0.",
            ));
        }
        if !offer.buyer_required_quantity.is_positive() {
            return Err(DomainError::invalid(
                "Required quantity must be greater than 0.",
            ));
        }
        let delivery_date = offer
            .delivery_date
            .ok_or_else(|| DomainError::invalid("Delivery date is required."))?;
        product.ensure_quantity_available(&offer.buyer_required_quantity)?;

        Ok(NewInterest {
            transaction_id,
            product_id: product.id,
            buyer_id: buyer.id,
            seller_id: product.seller_id,
            snapshot_amount: product.amount.clone(),
            snapshot_quantity: product.remaining_quantity.clone(),
            buyer_offered_amount: offer.buyer_offered_amount,
            buyer_required_quantity: offer.buyer_required_quantity,
            loading_from: trimmed(offer.loading_from),
            loading_to: trimmed(offer.loading_to),
            delivery_date,
            buyer_remark: trimmed(offer.buyer_remark),
            created_at: now,
        })
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
