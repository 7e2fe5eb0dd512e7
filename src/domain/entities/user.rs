use crate::domain::errors::DomainError;
use chrono::{DateTime, Utc};
use serde::Serialize;

text_enum! {
    /// Marketplace role. One role per account; `both_sellerandbuyer`
    /// carries the rights of both trading sides.
    pub enum Role as "role" {
        SuperAdmin => "super_admin",
        Admin => "admin",
        Buyer => "buyer",
        Seller => "seller",
        Transporter => "transporter",
        SellerAndBuyer => "both_sellerandbuyer",
    }
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::SuperAdmin | Role::Admin)
    }

    pub fn is_super_admin(&self) -> bool {
        matches!(self, Role::SuperAdmin)
    }

    pub fn is_seller(&self) -> bool {
        matches!(self, Role::Seller | Role::SellerAndBuyer)
    }

    pub fn is_buyer(&self) -> bool {
        matches!(self, Role::Buyer | Role::SellerAndBuyer)
    }

    /// Roles a user may pick when signing up. Admin roles are never
    /// self-assigned.
    pub fn from_registration(raw: &str) -> Result<Role, DomainError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buyer" => Ok(Role::Buyer),
            "seller" => Ok(Role::Seller),
            "both" | "both_sellerandbuyer" => Ok(Role::SellerAndBuyer),
            "transporter" => Ok(Role::Transporter),
            _ => Err(DomainError::invalid("Invalid role selected.")),
        }
    }
}

text_enum! {
    pub enum KycStatus as "KYC status" {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

text_enum! {
    pub enum AccountStatus as "account status" {
        Active => "active",
        Deactive => "deactive",
        Suspended => "suspended",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub mobile: String,
    pub full_name: Option<String>,
    pub company_name: Option<String>,
    pub role: Role,
    pub kyc_status: KycStatus,
    pub kyc_rejection_reason: Option<String>,
    pub account_status: AccountStatus,
    pub suspension_reason: Option<String>,
    pub buyer_public_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    pub fn is_super_admin(&self) -> bool {
        self.role.is_super_admin()
    }

    pub fn is_seller(&self) -> bool {
        self.role.is_seller()
    }

    pub fn is_buyer(&self) -> bool {
        self.role.is_buyer()
    }

    /// Whether the account may trade: express interest, accept, reject.
    ///
    /// Admins are never blocked. Everyone else needs an active account
    /// and an approved KYC.
    pub fn ensure_can_transact(&self) -> Result<(), DomainError> {
        if self.is_admin() {
            return Ok(());
        }
        match self.account_status {
            AccountStatus::Suspended => {
                return Err(DomainError::ActionBlocked(
                    "Your account has been suspended.".to_string(),
                ))
            }
            AccountStatus::Deactive => {
                return Err(DomainError::ActionBlocked(
                    "Your account has been deactivated. Please contact admin.".to_string(),
                ))
            }
            AccountStatus::Active => {}
        }
        match self.kyc_status {
            KycStatus::Pending => Err(DomainError::ActionBlocked(
                "Your KYC is pending. You cannot perform any action.".to_string(),
            )),
            KycStatus::Rejected => Err(DomainError::ActionBlocked(format!(
                "Your KYC was rejected. Reason: {}",
                reason_or_default(self.kyc_rejection_reason.as_deref())
            ))),
            KycStatus::Approved => Ok(()),
        }
    }

    /// Deactivated and suspended accounts cannot open a session.
    pub fn ensure_can_log_in(&self) -> Result<(), DomainError> {
        match self.account_status {
            AccountStatus::Active => Ok(()),
            AccountStatus::Deactive => Err(DomainError::ActionBlocked(
                "Your account has been deactivated. Please contact admin.".to_string(),
            )),
            AccountStatus::Suspended => Err(DomainError::ActionBlocked(format!(
                "Your account has been suspended. Reason: {}",
                reason_or_default(self.suspension_reason.as_deref())
            ))),
        }
    }

    /// Record an admin KYC decision. Only approve or reject are decisions.
    pub fn decide_kyc(
        &mut self,
        decision: KycStatus,
        reason: Option<String>,
    ) -> Result<(), DomainError> {
        match decision {
            KycStatus::Approved => {
                self.kyc_status = KycStatus::Approved;
                self.kyc_rejection_reason = None;
                Ok(())
            }
            KycStatus::Rejected => {
                self.kyc_status = KycStatus::Rejected;
                self.kyc_rejection_reason = non_blank(reason);
                Ok(())
            }
            KycStatus::Pending => Err(DomainError::invalid(
                "KYC status must be approved or rejected.",
            )),
        }
    }

    /// Move the account to `status`. Returns whether anything changed.
    pub fn set_account_status(&mut self, status: AccountStatus, reason: Option<String>) -> bool {
        let reason = match status {
            AccountStatus::Suspended => non_blank(reason),
            AccountStatus::Active | AccountStatus::Deactive => None,
        };
        let changed = self.account_status != status || self.suspension_reason != reason;
        self.account_status = status;
        self.suspension_reason = reason;
        changed
    }

    /// Public buyer code shown to sellers instead of the buyer's identity.
    pub fn buyer_display_id(&self) -> String {
        self.buyer_public_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("BUYER-{:04}", self.id))
    }

    pub fn seller_pseudonym(&self) -> String {
        format!("SELLER-{:04}", self.id)
    }

    pub fn actor_code(&self) -> String {
        format!("USR{:05}", self.id)
    }

    /// Company name when set, otherwise the username.
    pub fn trading_name(&self) -> &str {
        self.company_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.username)
    }
}

pub(crate) fn reason_or_default(reason: Option<&str>) -> &str {
    reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("Not specified")
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
