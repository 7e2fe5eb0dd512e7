//! Authorization guards shared by every use case.
//!
//! Each guard returns `DomainError::PermissionDenied` carrying the message
//! shown to the caller.

use crate::domain::entities::{Contract, Interest, Product, User};
use crate::domain::errors::DomainError;

/// What a caller is trying to do with an interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterestAction {
    Accept,
    Reject,
    Cancel,
}

pub fn require_admin(user: &User, message: &str) -> Result<(), DomainError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(DomainError::denied(message))
    }
}

pub fn require_super_admin(user: &User, message: &str) -> Result<(), DomainError> {
    if user.is_super_admin() {
        Ok(())
    } else {
        Err(DomainError::denied(message))
    }
}

pub fn require_buyer(user: &User) -> Result<(), DomainError> {
    if user.is_buyer() {
        Ok(())
    } else {
        Err(DomainError::denied("Only buyers can show interest."))
    }
}

pub fn require_seller_or_admin(user: &User) -> Result<(), DomainError> {
    if user.is_seller() || user.is_admin() {
        Ok(())
    } else {
        Err(DomainError::denied(
            "Only admin or seller can perform this action.",
        ))
    }
}

/// Admins manage every listing, sellers only their own.
pub fn require_product_owner(user: &User, product: &Product) -> Result<(), DomainError> {
    if user.is_admin() || (user.is_seller() && product.seller_id == user.id) {
        Ok(())
    } else {
        Err(DomainError::denied("You can only manage your own products."))
    }
}

pub fn require_interest_party(
    user: &User,
    interest: &Interest,
    action: InterestAction,
) -> Result<(), DomainError> {
    if user.is_admin() {
        return Ok(());
    }
    match action {
        InterestAction::Accept if interest.seller_id == user.id => Ok(()),
        InterestAction::Accept => Err(DomainError::denied(
            "You can only accept interests on your own products.",
        )),
        InterestAction::Reject if interest.seller_id == user.id => Ok(()),
        InterestAction::Reject => Err(DomainError::denied(
            "You can only manage offers on your own products.",
        )),
        InterestAction::Cancel if interest.buyer_id == user.id => Ok(()),
        InterestAction::Cancel => Err(DomainError::denied("You can only cancel your own offers.")),
    }
}

pub fn require_contract_party(user: &User, contract: &Contract) -> Result<(), DomainError> {
    if user.is_admin() || contract.buyer_id == user.id || contract.seller_id == user.id {
        Ok(())
    } else {
        Err(DomainError::denied("Permission denied."))
    }
}
