use super::interest::Interest;
use super::product::Product;
use crate::domain::errors::DomainError;
use crate::domain::value_objects::{Money, Quantity, Unit};
use chrono::{DateTime, Utc};
use serde::Serialize;

text_enum! {
    pub enum ContractStatus as "contract status" {
        Active => "active",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

impl ContractStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ContractStatus::Active)
    }
}

/// Record of a confirmed deal. Everything except `status` and
/// `admin_remark` is frozen at confirmation time.
#[derive(Debug, Clone, Serialize)]
pub struct Contract {
    pub id: i64,
    pub contract_id: String,
    pub interest_id: i64,
    pub product_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub deal_amount: Money,
    pub deal_quantity: Quantity,
    pub amount_unit: Unit,
    pub quantity_unit: Unit,
    pub loading_from: String,
    pub loading_to: String,
    pub buyer_remark: Option<String>,
    pub seller_remark: Option<String>,
    pub admin_remark: Option<String>,
    pub status: ContractStatus,
    pub confirmed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    /// Apply an admin update. Returns whether anything changed.
    pub fn update(
        &mut self,
        status: Option<ContractStatus>,
        admin_remark: Option<String>,
    ) -> Result<bool, DomainError> {
        let mut changed = false;
        if let Some(next) = status {
            if next != self.status {
                if self.status.is_terminal() {
                    return Err(DomainError::InvalidTransition {
                        entity: "contract",
                        from: self.status.to_string(),
                        to: next.to_string(),
                    });
                }
                self.status = next;
                changed = true;
            }
        }
        if let Some(remark) = admin_remark {
            let remark = Some(remark.trim().to_string()).filter(|r| !r.is_empty());
            if remark != self.admin_remark {
                self.admin_remark = remark;
                changed = true;
            }
        }
        Ok(changed)
    }
}

#[derive(Debug, Clone)]
pub struct NewContract {
    pub contract_id: String,
    pub interest_id: i64,
    pub product_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub deal_amount: Money,
    pub deal_quantity: Quantity,
    pub amount_unit: Unit,
    pub quantity_unit: Unit,
    pub loading_from: String,
    pub loading_to: String,
    pub buyer_remark: Option<String>,
    pub seller_remark: Option<String>,
    pub admin_remark: Option<String>,
    pub confirmed_at: DateTime<Utc>,
}

impl NewContract {
    /// Snapshot a confirmed interest. Loading details fall back to the
    /// listing's window when the buyer gave none.
    pub fn from_confirmation(
        contract_id: String,
        interest: &Interest,
        product: &Product,
        confirmed_at: DateTime<Utc>,
    ) -> NewContract {
        NewContract {
            contract_id,
            interest_id: interest.id,
            product_id: product.id,
            buyer_id: interest.buyer_id,
            seller_id: interest.seller_id,
            deal_amount: interest.buyer_offered_amount.clone(),
            deal_quantity: interest.buyer_required_quantity.clone(),
            amount_unit: product.amount_unit,
            quantity_unit: product.quantity_unit,
            loading_from: interest
                .loading_from
                .clone()
                .unwrap_or_else(|| product.loading_from.format("%Y-%m-%d").to_string()),
            loading_to: interest
                .loading_to
                .clone()
                .unwrap_or_else(|| product.loading_to.format("%Y-%m-%d").to_string()),
            buyer_remark: interest.buyer_remark.clone(),
            seller_remark: interest.seller_remark.clone(),
            admin_remark: interest.superadmin_remark.clone(),
            confirmed_at,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::contract;
    use super::*;
    use crate::domain::entities::interest::fixtures::interest;
    use crate::domain::entities::product::fixtures::product;

    #[test]
    fn test_snapshot_falls_back_to_listing_window() {
        let p = product(1, 10, "100");
        let mut i = interest(5, &p, 20, "25");
        i.loading_from = Some("Latur".into());
        let draft = NewContract::from_confirmation("CNT-1".into(), &i, &p, Utc::now());
        assert_eq!(draft.loading_from, "Latur");
        assert_eq!(draft.loading_to, "2025-03-10");
        assert_eq!(draft.deal_amount, i.buyer_offered_amount);
        assert_eq!(draft.deal_quantity, i.buyer_required_quantity);
        assert_eq!(draft.interest_id, 5);
    }

    #[test]
    fn test_update_status_and_remark() {
        let p = product(1, 10, "100");
        let i = interest(5, &p, 20, "25");
        let mut c = contract(1, &i, &p);
        assert!(c
            .update(Some(ContractStatus::Completed), Some("delivered".into()))
            .unwrap());
        assert_eq!(c.status, ContractStatus::Completed);
        assert_eq!(c.admin_remark.as_deref(), Some("delivered"));
        assert!(!c.update(Some(ContractStatus::Completed), None).unwrap());
    }

    #[test]
    fn test_terminal_status_is_final() {
        let p = product(1, 10, "100");
        let i = interest(5, &p, 20, "25");
        let mut c = contract(1, &i, &p);
        c.update(Some(ContractStatus::Cancelled), None).unwrap();
        assert!(c.update(Some(ContractStatus::Active), None).is_err());
        assert!(c.update(None, Some("note".into())).unwrap());
    }
}
