//! Plain-text email templates for workflow and account events.
//!
//! Templates only build messages. Persisting them to the outbox and
//! delivering them is the application layer's job.

use crate::domain::entities::{AccountStatus, Contract, Interest, KycStatus, Product, User};
use crate::domain::entities::user::reason_or_default;
use crate::domain::value_objects::Quantity;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

const BRAND: &str = "Agro Broker";

text_enum! {
    pub enum NotificationKind as "notification kind" {
        InterestSubmitted => "interest_submitted",
        SellerConfirmed => "seller_confirmed",
        DealConfirmedBuyer => "deal_confirmed_buyer",
        DealConfirmedSeller => "deal_confirmed_seller",
        ContractMemo => "contract_memo",
        KycApproved => "kyc_approved",
        KycRejected => "kyc_rejected",
        AccountSuspended => "account_suspended",
        AccountActivated => "account_activated",
        PasswordChanged => "password_changed",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub kind: NotificationKind,
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
}

impl EmailMessage {
    /// `None` when nobody would receive it.
    fn to(
        kind: NotificationKind,
        subject: impl Into<String>,
        body: String,
        recipients: Vec<String>,
    ) -> Option<EmailMessage> {
        let mut recipients: Vec<String> = recipients
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        recipients.sort();
        recipients.dedup();
        if recipients.is_empty() {
            return None;
        }
        Some(EmailMessage {
            kind,
            subject: subject.into(),
            body,
            recipients,
        })
    }
}

/// Email copy parameterized by the operator's company name and signature.
#[derive(Debug, Clone)]
pub struct NotificationTemplates {
    company_name: String,
    signature: String,
}

impl NotificationTemplates {
    pub fn new(company_name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            company_name: company_name.into(),
            signature: signature.into(),
        }
    }

    /// Memo to admins when a buyer submits an offer.
    pub fn interest_submitted(
        &self,
        product: &Product,
        seller: &User,
        buyer: &User,
        interest: &Interest,
        admin_emails: Vec<String>,
        dated: NaiveDate,
    ) -> Option<EmailMessage> {
        let body = format!(
            "INTERESTED MESSAGE\n\n\
             Dated : {}\n\
             Seller : {}\n\
             Buyer : {}\n\
             Item : {}\n\
             Qty : {}\n\
             Rate : {}\n\
             Condition : {}\n{}",
            dated.format("%d/%m/%Y"),
            seller_memo_name(seller, product),
            buyer_memo_name(buyer),
            product.title,
            memo_quantity(&interest.buyer_required_quantity),
            interest.buyer_offered_amount,
            interest.buyer_remark.as_deref().unwrap_or("N/A"),
            self.signature,
        );
        EmailMessage::to(
            NotificationKind::InterestSubmitted,
            "INTERESTED MESSAGE",
            body,
            admin_emails,
        )
    }

    /// Tells the buyer the seller accepted and admin approval is pending.
    pub fn seller_confirmed(
        &self,
        product: &Product,
        seller: &User,
        buyer: &User,
    ) -> Option<EmailMessage> {
        let body = format!(
            "Dear Buyer,\n\n\
             The seller has accepted your offer. Your request is now pending Super Admin approval.\n\n\
             Product: {}\n\
             Seller: {}\n\
             Amount: {}\n\
             Loading Location: {}\n{}",
            product.title, seller.username, product.amount, product.loading_location, self.signature,
        );
        EmailMessage::to(
            NotificationKind::SellerConfirmed,
            format!("{} - Seller Confirmed Your Interest", BRAND),
            body,
            vec![buyer.email.clone()],
        )
    }

    /// Confirmation to both parties, each seeing the counterpart's contact.
    pub fn deal_confirmed(
        &self,
        product: &Product,
        seller: &User,
        buyer: &User,
    ) -> Vec<EmailMessage> {
        let product_details = format!(
            "Product Title: {}\nCategory: {}\nAmount: {}\nLoading Location: {}",
            product.title, product.category, product.amount, product.loading_location
        );
        let seller_details = format!(
            "Seller Name: {}\nSeller Phone: {}\nSeller Email: {}",
            seller.username,
            or_dash(&seller.mobile),
            or_dash(&seller.email)
        );
        let buyer_details = format!(
            "Buyer Name: {}\nBuyer Phone: {}\nBuyer Email: {}",
            buyer.username,
            or_dash(&buyer.mobile),
            or_dash(&buyer.email)
        );
        let subject = format!("{} - Deal Confirmed Successfully", BRAND);

        let to_buyer = EmailMessage::to(
            NotificationKind::DealConfirmedBuyer,
            subject.clone(),
            format!(
                "Dear Buyer,\n\nYour deal has been confirmed successfully.\n\n\
                 Product Details:\n{}\n\nSeller Details:\n{}\n\n\
                 Thank you for using {}.{}",
                product_details, seller_details, BRAND, self.signature
            ),
            vec![buyer.email.clone()],
        );
        let to_seller = EmailMessage::to(
            NotificationKind::DealConfirmedSeller,
            subject,
            format!(
                "Dear Seller,\n\nYour deal has been confirmed successfully.\n\n\
                 Buyer Details:\n{}\n\nProduct Details:\n{}\n\n\
                 Thank you for using {}.{}",
                buyer_details, product_details, BRAND, self.signature
            ),
            vec![seller.email.clone()],
        );
        to_buyer.into_iter().chain(to_seller).collect()
    }

    /// Deal memo to admins, referenced by contract id and date.
    pub fn contract_memo(
        &self,
        contract: &Contract,
        product: &Product,
        seller: &User,
        buyer: &User,
        admin_emails: Vec<String>,
        dated: NaiveDate,
    ) -> Option<EmailMessage> {
        let loading_dates = match (
            memo_date(&contract.loading_from),
            memo_date(&contract.loading_to),
        ) {
            (Some(from), Some(to)) => format!("{} To {}", from, to),
            _ => "N/A".to_string(),
        };
        let body = format!(
            "{}\n\n\
             Ref No : {} : {}\n\
             Seller : {}\n\
             Buyer : {}\n\
             Item : {}\n\
             Qty : {}\n\
             Rate : {}\n\
             Loading From {}\n\
             Condition : {}\n{}",
            self.company_name,
            contract.contract_id,
            dated.format("%d/%m/%Y"),
            seller_memo_name(seller, product),
            buyer_memo_name(buyer),
            product.title,
            memo_quantity(&contract.deal_quantity),
            contract.deal_amount,
            loading_dates,
            contract.buyer_remark.as_deref().unwrap_or("N/A"),
            self.signature,
        );
        EmailMessage::to(
            NotificationKind::ContractMemo,
            format!("{} - Deal Confirmed", self.company_name),
            body,
            admin_emails,
        )
    }

    /// Outcome of an admin KYC review. Pending produces no email.
    pub fn kyc_decision(&self, user: &User) -> Option<EmailMessage> {
        match user.kyc_status {
            KycStatus::Approved => EmailMessage::to(
                NotificationKind::KycApproved,
                format!("{} - KYC Approved", BRAND),
                format!(
                    "Dear User,\n\nYour KYC verification has been approved successfully.\n\
                     You can now access all eligible dashboard actions.{}",
                    self.signature
                ),
                vec![user.email.clone()],
            ),
            KycStatus::Rejected => EmailMessage::to(
                NotificationKind::KycRejected,
                format!("{} - KYC Rejected", BRAND),
                format!(
                    "Dear User,\n\nYour KYC verification was rejected after review.\n\
                     Reason: {}\nPlease update your details and submit again.{}",
                    reason_or_default(user.kyc_rejection_reason.as_deref()),
                    self.signature
                ),
                vec![user.email.clone()],
            ),
            KycStatus::Pending => None,
        }
    }

    /// Suspension and reactivation notices. Deactivation is silent.
    pub fn account_status_changed(&self, user: &User) -> Option<EmailMessage> {
        match user.account_status {
            AccountStatus::Suspended => EmailMessage::to(
                NotificationKind::AccountSuspended,
                format!("{} - Account Suspended", BRAND),
                format!(
                    "Dear User,\n\nYour {} account has been suspended.\nReason: {}\n\
                     Please contact the admin/support team for further assistance.{}",
                    BRAND,
                    reason_or_default(user.suspension_reason.as_deref()),
                    self.signature
                ),
                vec![user.email.clone()],
            ),
            AccountStatus::Active => EmailMessage::to(
                NotificationKind::AccountActivated,
                format!("{} - Account Activated", BRAND),
                format!(
                    "Dear User,\n\nYour {} account has been activated again.\n\
                     You can now continue using the platform.{}",
                    BRAND, self.signature
                ),
                vec![user.email.clone()],
            ),
            AccountStatus::Deactive => None,
        }
    }

    pub fn password_changed(&self, user: &User) -> Option<EmailMessage> {
        EmailMessage::to(
            NotificationKind::PasswordChanged,
            format!("{} - Password Changed Confirmation", BRAND),
            format!(
                "Dear User,\n\nYour account password has been changed successfully.\n\
                 If you did not perform this action, please contact support immediately.{}",
                self.signature
            ),
            vec![user.email.clone()],
        )
    }
}

/// `"250.00k 2.50q"`: kilograms and the quintal equivalent.
pub fn memo_quantity(quantity: &Quantity) -> String {
    format!("{}k {}q", quantity, quantity.per_hundred())
}

fn seller_memo_name(seller: &User, product: &Product) -> String {
    let origin = product
        .loading_location
        .split(" -> ")
        .next()
        .map(str::trim)
        .unwrap_or("");
    if origin.is_empty() {
        seller.trading_name().to_string()
    } else {
        format!("{}, {}", seller.trading_name(), origin)
    }
}

fn buyer_memo_name(buyer: &User) -> String {
    format!("{} ({}) Pvt Ltd", buyer.trading_name(), buyer.username)
}

/// Re-render ISO dates as `dd/mm/YYYY`; free text passes through.
fn memo_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    Some(
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(|d| d.format("%d/%m/%Y").to_string())
            .unwrap_or_else(|_| raw.to_string()),
    )
}

fn or_dash(value: &str) -> &str {
    if value.trim().is_empty() {
        "-"
    } else {
        value
    }
}
