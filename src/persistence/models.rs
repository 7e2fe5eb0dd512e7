//! Database Models
//!
//! Row shapes as stored in SQLite, plus conversion into domain entities.
//! Enum and decimal columns are plain text here and parsed on the way out.

use super::DatabaseError;
use crate::domain::entities::{Contract, Interest, NegotiationEntry, Product, User};
use crate::domain::services::notifications::{EmailMessage, NotificationKind};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt::Display;
use std::str::FromStr;

fn column<T>(table: &str, name: &str, raw: &str) -> Result<T, DatabaseError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>().map_err(|e| {
        DatabaseError::CorruptRow(format!("{}.{} = '{}': {}", table, name, raw, e))
    })
}

/// User record in database
#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub mobile: String,
    pub full_name: Option<String>,
    pub company_name: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub kyc_status: String,
    pub kyc_rejection_reason: Option<String>,
    pub account_status: String,
    pub suspension_reason: Option<String>,
    pub buyer_public_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = DatabaseError;

    fn try_from(r: UserRecord) -> Result<Self, Self::Error> {
        Ok(User {
            id: r.id,
            role: column("users", "role", &r.role)?,
            kyc_status: column("users", "kyc_status", &r.kyc_status)?,
            account_status: column("users", "account_status", &r.account_status)?,
            username: r.username,
            email: r.email,
            mobile: r.mobile,
            full_name: r.full_name,
            company_name: r.company_name,
            kyc_rejection_reason: r.kyc_rejection_reason,
            suspension_reason: r.suspension_reason,
            buyer_public_id: r.buyer_public_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// Create user input
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub username: String,
    pub email: String,
    pub mobile: String,
    pub full_name: Option<String>,
    pub company_name: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub kyc_status: String,
    pub buyer_public_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Bearer session record. Only the token digest is stored.
#[derive(Debug, Clone, FromRow)]
pub struct AuthTokenRecord {
    pub token_hash: String,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Product record in database
#[derive(Debug, Clone, FromRow)]
pub struct ProductRecord {
    pub id: i64,
    pub seller_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub amount: String,
    pub amount_unit: String,
    pub original_quantity: String,
    pub remaining_quantity: String,
    pub quantity_unit: String,
    pub loading_from: NaiveDate,
    pub loading_to: NaiveDate,
    pub loading_location: String,
    pub remark: Option<String>,
    pub is_active: bool,
    pub deal_status: String,
    pub status: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRecord> for Product {
    type Error = DatabaseError;

    fn try_from(r: ProductRecord) -> Result<Self, Self::Error> {
        Ok(Product {
            id: r.id,
            seller_id: r.seller_id,
            amount: column("products", "amount", &r.amount)?,
            amount_unit: column("products", "amount_unit", &r.amount_unit)?,
            original_quantity: column("products", "original_quantity", &r.original_quantity)?,
            remaining_quantity: column("products", "remaining_quantity", &r.remaining_quantity)?,
            quantity_unit: column("products", "quantity_unit", &r.quantity_unit)?,
            deal_status: column("products", "deal_status", &r.deal_status)?,
            status: column("products", "status", &r.status)?,
            title: r.title,
            description: r.description,
            category: r.category,
            loading_from: r.loading_from,
            loading_to: r.loading_to,
            loading_location: r.loading_location,
            remark: r.remark,
            is_active: r.is_active,
            version: r.version,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// Interest record in database
#[derive(Debug, Clone, FromRow)]
pub struct InterestRecord {
    pub id: i64,
    pub transaction_id: String,
    pub product_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub snapshot_amount: String,
    pub snapshot_quantity: String,
    pub buyer_offered_amount: String,
    pub buyer_required_quantity: String,
    pub loading_from: Option<String>,
    pub loading_to: Option<String>,
    pub delivery_date: NaiveDate,
    pub buyer_remark: Option<String>,
    pub seller_remark: Option<String>,
    pub superadmin_remark: Option<String>,
    pub is_active: bool,
    pub status: String,
    pub deal_confirmed_at: Option<DateTime<Utc>>,
    pub negotiation_history: String, // JSON array
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<InterestRecord> for Interest {
    type Error = DatabaseError;

    fn try_from(r: InterestRecord) -> Result<Self, Self::Error> {
        let negotiation_history: Vec<NegotiationEntry> =
            serde_json::from_str(&r.negotiation_history).map_err(|e| {
                DatabaseError::CorruptRow(format!("interests.negotiation_history #{}: {}", r.id, e))
            })?;
        Ok(Interest {
            id: r.id,
            snapshot_amount: column("interests", "snapshot_amount", &r.snapshot_amount)?,
            snapshot_quantity: column("interests", "snapshot_quantity", &r.snapshot_quantity)?,
            buyer_offered_amount: column(
                "interests",
                "buyer_offered_amount",
                &r.buyer_offered_amount,
            )?,
            buyer_required_quantity: column(
                "interests",
                "buyer_required_quantity",
                &r.buyer_required_quantity,
            )?,
            status: column("interests", "status", &r.status)?,
            negotiation_history,
            transaction_id: r.transaction_id,
            product_id: r.product_id,
            buyer_id: r.buyer_id,
            seller_id: r.seller_id,
            loading_from: r.loading_from,
            loading_to: r.loading_to,
            delivery_date: r.delivery_date,
            buyer_remark: r.buyer_remark,
            seller_remark: r.seller_remark,
            superadmin_remark: r.superadmin_remark,
            is_active: r.is_active,
            deal_confirmed_at: r.deal_confirmed_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// Contract record in database
#[derive(Debug, Clone, FromRow)]
pub struct ContractRecord {
    pub id: i64,
    pub contract_id: String,
    pub interest_id: i64,
    pub product_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub deal_amount: String,
    pub deal_quantity: String,
    pub amount_unit: String,
    pub quantity_unit: String,
    pub loading_from: String,
    pub loading_to: String,
    pub buyer_remark: Option<String>,
    pub seller_remark: Option<String>,
    pub admin_remark: Option<String>,
    pub status: String,
    pub confirmed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ContractRecord> for Contract {
    type Error = DatabaseError;

    fn try_from(r: ContractRecord) -> Result<Self, Self::Error> {
        Ok(Contract {
            id: r.id,
            deal_amount: column("contracts", "deal_amount", &r.deal_amount)?,
            deal_quantity: column("contracts", "deal_quantity", &r.deal_quantity)?,
            amount_unit: column("contracts", "amount_unit", &r.amount_unit)?,
            quantity_unit: column("contracts", "quantity_unit", &r.quantity_unit)?,
            status: column("contracts", "status", &r.status)?,
            contract_id: r.contract_id,
            interest_id: r.interest_id,
            product_id: r.product_id,
            buyer_id: r.buyer_id,
            seller_id: r.seller_id,
            loading_from: r.loading_from,
            loading_to: r.loading_to,
            buyer_remark: r.buyer_remark,
            seller_remark: r.seller_remark,
            admin_remark: r.admin_remark,
            confirmed_at: r.confirmed_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// Outbox row
#[derive(Debug, Clone, FromRow)]
pub struct NotificationRecord {
    pub id: i64,
    pub kind: String,
    pub subject: String,
    pub body: String,
    pub recipients: String, // JSON array
    pub status: String,     // "pending", "sent" or "failed"
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl NotificationRecord {
    pub fn message(&self) -> Result<EmailMessage, DatabaseError> {
        let kind: NotificationKind = column("notifications", "kind", &self.kind)?;
        let recipients: Vec<String> = serde_json::from_str(&self.recipients).map_err(|e| {
            DatabaseError::CorruptRow(format!("notifications.recipients #{}: {}", self.id, e))
        })?;
        Ok(EmailMessage {
            kind,
            subject: self.subject.clone(),
            body: self.body.clone(),
            recipients,
        })
    }
}

/// Audit log record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLogRecord {
    pub id: i64,
    pub actor_id: Option<i64>,
    pub action: String,
    pub entity: String,
    pub entity_id: Option<i64>,
    pub details: String, // JSON string
    pub created_at: DateTime<Utc>,
}

/// Create audit log entry input
#[derive(Debug, Clone)]
pub struct CreateAuditEntry {
    pub actor_id: Option<i64>,
    pub action: String,
    pub entity: String,
    pub entity_id: Option<i64>,
    pub details: serde_json::Value,
}

impl CreateAuditEntry {
    pub fn new(actor_id: i64, action: &str, entity: &str, entity_id: i64) -> Self {
        Self {
            actor_id: Some(actor_id),
            action: action.to_string(),
            entity: entity.to_string(),
            entity_id: Some(entity_id),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}
