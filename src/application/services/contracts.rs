//! Contract browsing, admin edits and CSV export.

use super::{acquire, begin, commit, load_product, load_user};
use crate::application::state::AppState;
use crate::domain::entities::{Contract, ContractStatus, Product, User};
use crate::domain::errors::DomainError;
use crate::domain::services::access::{require_admin, require_contract_party};
use crate::domain::value_objects::{Money, Quantity, Unit};
use crate::persistence::contract_repository::{ContractQuery, ContractRepository, DEFAULT_PAGE_SIZE};
use crate::persistence::models::CreateAuditEntry;
use crate::persistence::repository::AuditLogRepository;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use tracing::info;

const CSV_HEADERS: [&str; 10] = [
    "Contract ID",
    "Product",
    "Buyer",
    "Seller",
    "Deal Amount",
    "Quantity",
    "Loading From",
    "Loading To",
    "Confirmed Date",
    "Status",
];

/// Contact details of a contract party, shown to admins only.
#[derive(Debug, Clone, Serialize)]
pub struct PartyContact {
    pub username: String,
    pub full_name: Option<String>,
    pub company_name: Option<String>,
    pub email: String,
    pub mobile: String,
}

impl From<&User> for PartyContact {
    fn from(user: &User) -> Self {
        PartyContact {
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            company_name: user.company_name.clone(),
            email: user.email.clone(),
            mobile: user.mobile.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractView {
    pub id: i64,
    pub contract_id: String,
    pub interest_id: i64,
    pub product_id: i64,
    pub product_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_id: Option<i64>,
    pub buyer_display_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_id: Option<i64>,
    pub seller_display_id: String,
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
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_contact: Option<PartyContact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_contact: Option<PartyContact>,
}

/// One page of contracts.
#[derive(Debug, Clone, Serialize)]
pub struct ContractListing {
    pub contracts: Vec<ContractView>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

/// Listing filters as given by the caller.
#[derive(Debug, Clone, Default)]
pub struct ContractFilter {
    pub status: Option<ContractStatus>,
    pub seller_id: Option<i64>,
    pub buyer_id: Option<i64>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl ContractFilter {
    /// Non-admins only ever see contracts they are a party to.
    fn scoped_to(&self, actor: &User) -> ContractQuery {
        ContractQuery {
            party_id: (!actor.is_admin()).then_some(actor.id),
            status: self.status,
            seller_id: self.seller_id,
            buyer_id: self.buyer_id,
            search: self.search.clone(),
        }
    }
}

/// Caches the rows a contract view refers to.
struct ViewBuilder<'a> {
    viewer: &'a User,
    with_contacts: bool,
    products: HashMap<i64, Product>,
    users: HashMap<i64, User>,
}

impl<'a> ViewBuilder<'a> {
    fn new(viewer: &'a User, with_contacts: bool) -> Self {
        Self {
            viewer,
            with_contacts,
            products: HashMap::new(),
            users: HashMap::new(),
        }
    }

    async fn load(&mut self, conn: &mut SqliteConnection, contract: &Contract) -> Result<(), DomainError> {
        if !self.products.contains_key(&contract.product_id) {
            let product = load_product(conn, contract.product_id).await?;
            self.products.insert(product.id, product);
        }
        for party in [contract.buyer_id, contract.seller_id] {
            if !self.users.contains_key(&party) {
                let user = load_user(conn, party).await?;
                self.users.insert(user.id, user);
            }
        }
        Ok(())
    }

    async fn view(&mut self, conn: &mut SqliteConnection, contract: Contract) -> Result<ContractView, DomainError> {
        self.load(conn, &contract).await?;
        let missing = || DomainError::Internal(format!("contract {} refers to missing rows", contract.id));
        let product = self.products.get(&contract.product_id).ok_or_else(missing)?;
        let buyer = self.users.get(&contract.buyer_id).ok_or_else(missing)?;
        let seller = self.users.get(&contract.seller_id).ok_or_else(missing)?;

        let admin = self.viewer.is_admin();
        Ok(ContractView {
            id: contract.id,
            product_title: product.title.clone(),
            buyer_id: (admin || self.viewer.id == buyer.id).then_some(buyer.id),
            buyer_display_id: buyer.buyer_display_id(),
            seller_id: (admin || self.viewer.id == seller.id).then_some(seller.id),
            seller_display_id: seller.seller_pseudonym(),
            buyer_contact: self.with_contacts.then(|| PartyContact::from(buyer)),
            seller_contact: self.with_contacts.then(|| PartyContact::from(seller)),
            contract_id: contract.contract_id,
            interest_id: contract.interest_id,
            product_id: contract.product_id,
            deal_amount: contract.deal_amount,
            deal_quantity: contract.deal_quantity,
            amount_unit: contract.amount_unit,
            quantity_unit: contract.quantity_unit,
            loading_from: contract.loading_from,
            loading_to: contract.loading_to,
            buyer_remark: contract.buyer_remark,
            seller_remark: contract.seller_remark,
            admin_remark: contract.admin_remark,
            status: contract.status,
            confirmed_at: contract.confirmed_at,
            updated_at: contract.updated_at,
        })
    }

    /// Party name as written in exports.
    fn export_name(&self, id: i64) -> String {
        self.users
            .get(&id)
            .map(|u| u.trading_name().to_string())
            .unwrap_or_default()
    }
}

/// Contracts visible to the caller, newest confirmation first.
pub async fn list_contracts(
    state: &AppState,
    actor: &User,
    filter: ContractFilter,
) -> Result<ContractListing, DomainError> {
    let mut conn = acquire(&state.pool).await?;
    let page = ContractRepository::new(&mut conn)
        .page(
            &filter.scoped_to(actor),
            filter.page.unwrap_or(1),
            filter.per_page.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;

    let total_pages = page.total_pages();
    let mut builder = ViewBuilder::new(actor, false);
    let mut contracts = Vec::with_capacity(page.contracts.len());
    for contract in page.contracts {
        contracts.push(builder.view(&mut conn, contract).await?);
    }

    Ok(ContractListing {
        contracts,
        total: page.total,
        page: page.page,
        per_page: page.per_page,
        total_pages,
    })
}

/// One contract. Admins also get both parties' contact details.
pub async fn get_contract(state: &AppState, actor: &User, id: i64) -> Result<ContractView, DomainError> {
    let mut conn = acquire(&state.pool).await?;
    let contract = load_contract(&mut conn, id).await?;
    require_contract_party(actor, &contract)?;
    ViewBuilder::new(actor, actor.is_admin())
        .view(&mut conn, contract)
        .await
}

/// Admin change of status and remark. Completed and cancelled contracts
/// keep their status.
pub async fn update_contract(
    state: &AppState,
    actor: &User,
    id: i64,
    status: Option<ContractStatus>,
    admin_remark: Option<String>,
) -> Result<ContractView, DomainError> {
    require_admin(actor, "Only admin can update contracts.")?;

    let mut tx = begin(&state.pool).await?;
    let mut contract = load_contract(&mut tx, id).await?;
    let previous = contract.status;
    if contract.update(status, admin_remark)? {
        ContractRepository::new(&mut tx).save(&mut contract).await?;
        AuditLogRepository::new(&mut tx)
            .log(
                CreateAuditEntry::new(actor.id, "contract_updated", "contract", contract.id).with_details(
                    json!({
                        "from_status": previous,
                        "to_status": contract.status,
                        "admin_remark": contract.admin_remark,
                    }),
                ),
            )
            .await?;
        info!(
            "{} updated contract {} ({} -> {})",
            actor.actor_code(),
            contract.contract_id,
            previous,
            contract.status
        );
    }
    let view = ViewBuilder::new(actor, true).view(&mut tx, contract).await?;
    commit(tx).await?;
    Ok(view)
}

/// Matching contracts as CSV, for admins.
pub async fn export_contracts_csv(
    state: &AppState,
    actor: &User,
    filter: ContractFilter,
) -> Result<String, DomainError> {
    require_admin(actor, "Only admin can export contracts.")?;

    let mut conn = acquire(&state.pool).await?;
    let contracts = ContractRepository::new(&mut conn)
        .all(&filter.scoped_to(actor))
        .await?;

    let mut builder = ViewBuilder::new(actor, false);
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADERS).map_err(csv_failed)?;
    for contract in contracts {
        builder.load(&mut conn, &contract).await?;
        let product = builder
            .products
            .get(&contract.product_id)
            .map(|p| p.title.clone())
            .unwrap_or_default();
        writer
            .write_record([
                contract.contract_id.clone(),
                product,
                builder.export_name(contract.buyer_id),
                builder.export_name(contract.seller_id),
                contract.deal_amount.to_string(),
                format!("{} {}", contract.deal_quantity, contract.quantity_unit),
                contract.loading_from.clone(),
                contract.loading_to.clone(),
                contract.confirmed_at.format("%Y-%m-%d %H:%M").to_string(),
                contract.status.to_string(),
            ])
            .map_err(csv_failed)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| DomainError::Internal(format!("Failed to finish CSV: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| DomainError::Internal(format!("CSV is not UTF-8: {}", e)))
}

async fn load_contract(conn: &mut SqliteConnection, id: i64) -> Result<Contract, DomainError> {
    ContractRepository::new(conn)
        .get(id)
        .await?
        .ok_or(DomainError::not_found("Contract"))
}

fn csv_failed(e: csv::Error) -> DomainError {
    DomainError::Internal(format!("Failed to write CSV: {}", e))
}
