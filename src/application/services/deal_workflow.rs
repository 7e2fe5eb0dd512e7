//! Interest negotiation and deal confirmation.
//!
//! Every operation runs in one SQLite transaction. Stock is only ever
//! written through the product's version check, so two confirmations
//! racing for the same listing cannot both deduct from the same snapshot:
//! the loser gets a conflict, is retried, and then sees the new stock.

use super::{acquire, begin, commit, enqueue, load_product, load_user, with_retries};
use crate::application::state::AppState;
use crate::domain::entities::{
    Contract, Interest, InterestOffer, InterestStatus, NegotiationEntry, NewContract, NewInterest,
    OfferArrow, Product, User,
};
use crate::domain::errors::DomainError;
use crate::domain::services::access::{
    require_admin, require_buyer, require_interest_party, require_product_owner,
    require_seller_or_admin, InterestAction,
};
use crate::domain::services::identifiers;
use crate::domain::value_objects::{Money, Quantity};
use crate::persistence::contract_repository::ContractRepository;
use crate::persistence::interest_repository::{InterestQuery, InterestRepository};
use crate::persistence::models::CreateAuditEntry;
use crate::persistence::product_repository::ProductRepository;
use crate::persistence::repository::{AuditLogRepository, UserRepository};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use tracing::info;

/// An offer as shown to one viewer.
///
/// Party ids are only included for admins and for the party themselves;
/// everyone else sees the pseudonymous display ids.
#[derive(Debug, Clone, Serialize)]
pub struct OfferView {
    pub id: i64,
    pub transaction_id: String,
    pub product_id: i64,
    pub product_title: String,
    pub listed_amount: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_id: Option<i64>,
    pub buyer_display_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_id: Option<i64>,
    pub seller_display_id: String,
    pub buyer_offered_amount: Money,
    pub buyer_required_quantity: Quantity,
    pub offer_arrow: OfferArrow,
    pub delivery_date: NaiveDate,
    pub loading_from: Option<String>,
    pub loading_to: Option<String>,
    pub buyer_remark: Option<String>,
    pub seller_remark: Option<String>,
    pub superadmin_remark: Option<String>,
    pub status: InterestStatus,
    pub is_active: bool,
    pub deal_confirmed_at: Option<DateTime<Utc>>,
    pub negotiation_history: Vec<NegotiationEntry>,
    pub created_at: DateTime<Utc>,
}

impl OfferView {
    fn new(viewer: &User, interest: Interest, product: &Product, buyer: &User) -> OfferView {
        let sees_buyer = viewer.is_admin() || viewer.id == interest.buyer_id;
        let sees_seller = viewer.is_admin() || viewer.id == interest.seller_id;
        OfferView {
            id: interest.id,
            product_id: interest.product_id,
            product_title: product.title.clone(),
            listed_amount: product.amount.clone(),
            buyer_id: sees_buyer.then_some(interest.buyer_id),
            buyer_display_id: buyer.buyer_display_id(),
            seller_id: sees_seller.then_some(interest.seller_id),
            seller_display_id: format!("SELLER-{:04}", interest.seller_id),
            offer_arrow: interest.offer_arrow(&product.amount),
            transaction_id: interest.transaction_id,
            buyer_offered_amount: interest.buyer_offered_amount,
            buyer_required_quantity: interest.buyer_required_quantity,
            delivery_date: interest.delivery_date,
            loading_from: interest.loading_from,
            loading_to: interest.loading_to,
            buyer_remark: interest.buyer_remark,
            seller_remark: interest.seller_remark,
            superadmin_remark: interest.superadmin_remark,
            status: interest.status,
            is_active: interest.is_active,
            deal_confirmed_at: interest.deal_confirmed_at,
            negotiation_history: interest.negotiation_history,
            created_at: interest.created_at,
        }
    }
}

/// Result of confirming a deal.
#[derive(Debug, Clone, Serialize)]
pub struct Confirmation {
    pub contract: Contract,
    pub interest: Interest,
    pub remaining_quantity: Quantity,
    /// The contract already existed; nothing was deducted this time.
    pub already_confirmed: bool,
}

/// A buyer places an offer on a listing.
pub async fn express_interest(
    state: &AppState,
    actor: &User,
    product_id: i64,
    offer: InterestOffer,
) -> Result<Interest, DomainError> {
    require_buyer(actor)?;
    actor.ensure_can_transact()?;

    let interest = with_retries("express_interest", state.config.max_transition_retries, || {
        express_once(state, actor, product_id, offer.clone())
    })
    .await?;

    state.outbox_wake.notify_one();
    info!(
        "{} offered {} for {} on product {} ({})",
        actor.actor_code(),
        interest.buyer_offered_amount,
        interest.buyer_required_quantity,
        product_id,
        interest.transaction_id
    );
    Ok(interest)
}

async fn express_once(
    state: &AppState,
    actor: &User,
    product_id: i64,
    offer: InterestOffer,
) -> Result<Interest, DomainError> {
    let now = Utc::now();
    let mut tx = begin(&state.pool).await?;

    let product = load_product(&mut tx, product_id).await?;
    let seller = load_user(&mut tx, product.seller_id).await?;
    let transaction_id = identifiers::transaction_id(now.date_naive(), &mut rand::thread_rng());
    let draft = NewInterest::from_offer(&product, actor, offer, transaction_id, now)?;
    let interest = InterestRepository::new(&mut tx).create(&draft).await?;

    let admins = UserRepository::new(&mut tx).admin_emails().await?;
    let memo = state.templates.interest_submitted(
        &product,
        &seller,
        actor,
        &interest,
        admins,
        now.date_naive(),
    );
    enqueue(&mut tx, memo, now).await?;

    audit(
        &mut tx,
        CreateAuditEntry::new(actor.id, "interest_created", "interest", interest.id).with_details(
            json!({
                "product_id": product.id,
                "amount": interest.buyer_offered_amount,
                "quantity": interest.buyer_required_quantity,
            }),
        ),
    )
    .await?;

    commit(tx).await?;
    Ok(interest)
}

/// The seller (or an admin) accepts an offer. The buyer is told that
/// admin approval is pending.
pub async fn accept_interest(
    state: &AppState,
    actor: &User,
    product_id: i64,
    interest_id: i64,
    remark: Option<String>,
) -> Result<Interest, DomainError> {
    require_seller_or_admin(actor)?;
    actor.ensure_can_transact()?;

    let interest = with_retries("accept_interest", state.config.max_transition_retries, || {
        accept_once(state, actor, product_id, interest_id, remark.clone())
    })
    .await?;

    state.outbox_wake.notify_one();
    info!("{} accepted interest {}", actor.actor_code(), interest.transaction_id);
    Ok(interest)
}

async fn accept_once(
    state: &AppState,
    actor: &User,
    product_id: i64,
    interest_id: i64,
    remark: Option<String>,
) -> Result<Interest, DomainError> {
    let now = Utc::now();
    let mut tx = begin(&state.pool).await?;

    let mut product = load_product(&mut tx, product_id).await?;
    require_product_owner(actor, &product)?;
    let mut interest = load_interest(&mut tx, product_id, interest_id).await?;
    require_interest_party(actor, &interest, InterestAction::Accept)?;

    let previous = interest.status;
    interest.accept(remark, now)?;
    InterestRepository::new(&mut tx)
        .save_transition(&interest, previous)
        .await?;

    product.sync_deal_status(true);
    ProductRepository::new(&mut tx).save(&mut product).await?;

    let seller = load_user(&mut tx, product.seller_id).await?;
    let buyer = load_user(&mut tx, interest.buyer_id).await?;
    enqueue(
        &mut tx,
        state.templates.seller_confirmed(&product, &seller, &buyer),
        now,
    )
    .await?;

    audit(
        &mut tx,
        CreateAuditEntry::new(actor.id, "interest_accepted", "interest", interest.id)
            .with_details(json!({ "remark": interest.seller_remark })),
    )
    .await?;

    commit(tx).await?;
    Ok(interest)
}

/// The seller (or an admin) declines a fresh offer.
pub async fn reject_interest(
    state: &AppState,
    actor: &User,
    product_id: i64,
    interest_id: i64,
    remark: Option<String>,
) -> Result<Interest, DomainError> {
    require_seller_or_admin(actor)?;
    actor.ensure_can_transact()?;

    let interest = with_retries("reject_interest", state.config.max_transition_retries, || {
        reject_once(state, actor, product_id, interest_id, remark.clone())
    })
    .await?;

    info!("{} rejected interest {}", actor.actor_code(), interest.transaction_id);
    Ok(interest)
}

async fn reject_once(
    state: &AppState,
    actor: &User,
    product_id: i64,
    interest_id: i64,
    remark: Option<String>,
) -> Result<Interest, DomainError> {
    let now = Utc::now();
    let mut tx = begin(&state.pool).await?;

    let product = load_product(&mut tx, product_id).await?;
    require_product_owner(actor, &product)?;
    let mut interest = load_interest(&mut tx, product_id, interest_id).await?;
    require_interest_party(actor, &interest, InterestAction::Reject)?;

    let previous = interest.status;
    interest.reject(remark, now)?;
    InterestRepository::new(&mut tx)
        .save_transition(&interest, previous)
        .await?;
    resync_deal_status(&mut tx, product).await?;

    audit(
        &mut tx,
        CreateAuditEntry::new(actor.id, "interest_rejected", "interest", interest.id)
            .with_details(json!({ "remark": interest.seller_remark })),
    )
    .await?;

    commit(tx).await?;
    Ok(interest)
}

/// The buyer withdraws an open offer. Admins may cancel any offer.
pub async fn cancel_interest(
    state: &AppState,
    actor: &User,
    product_id: i64,
    interest_id: i64,
) -> Result<Interest, DomainError> {
    let interest = with_retries("cancel_interest", state.config.max_transition_retries, || {
        cancel_once(state, actor, product_id, interest_id)
    })
    .await?;

    info!("{} cancelled interest {}", actor.actor_code(), interest.transaction_id);
    Ok(interest)
}

async fn cancel_once(
    state: &AppState,
    actor: &User,
    product_id: i64,
    interest_id: i64,
) -> Result<Interest, DomainError> {
    let now = Utc::now();
    let mut tx = begin(&state.pool).await?;

    let product = load_product(&mut tx, product_id).await?;
    let mut interest = load_interest(&mut tx, product_id, interest_id).await?;
    require_interest_party(actor, &interest, InterestAction::Cancel)?;

    let previous = interest.status;
    interest.cancel(now)?;
    InterestRepository::new(&mut tx)
        .save_transition(&interest, previous)
        .await?;
    resync_deal_status(&mut tx, product).await?;

    audit(
        &mut tx,
        CreateAuditEntry::new(actor.id, "interest_cancelled", "interest", interest.id)
            .with_details(json!({ "from_status": previous })),
    )
    .await?;

    commit(tx).await?;
    Ok(interest)
}

/// Admin turns a seller-confirmed offer into a contract.
///
/// Deducts the offer's quantity from stock, rejects every other open offer
/// on the listing and queues the deal emails. Confirming an interest that
/// already has a contract returns that contract, only recording the new
/// remark.
pub async fn confirm_deal(
    state: &AppState,
    actor: &User,
    product_id: i64,
    interest_id: i64,
    admin_remark: Option<String>,
) -> Result<Confirmation, DomainError> {
    require_admin(actor, "Only admin can confirm deals.")?;

    let confirmation = with_retries("confirm_deal", state.config.max_transition_retries, || {
        confirm_once(state, actor, product_id, interest_id, admin_remark.clone())
    })
    .await?;

    if confirmation.already_confirmed {
        info!(
            "Interest {} already confirmed as {}",
            confirmation.interest.transaction_id, confirmation.contract.contract_id
        );
    } else {
        state.outbox_wake.notify_one();
        info!(
            "{} confirmed {} as {} ({} remaining)",
            actor.actor_code(),
            confirmation.interest.transaction_id,
            confirmation.contract.contract_id,
            confirmation.remaining_quantity
        );
    }
    Ok(confirmation)
}

async fn confirm_once(
    state: &AppState,
    actor: &User,
    product_id: i64,
    interest_id: i64,
    admin_remark: Option<String>,
) -> Result<Confirmation, DomainError> {
    let now = Utc::now();
    let mut tx = begin(&state.pool).await?;

    let mut interest = load_interest(&mut tx, product_id, interest_id).await?;
    let mut product = load_product(&mut tx, product_id).await?;

    if let Some(contract) = ContractRepository::new(&mut tx)
        .find_by_interest(interest.id)
        .await?
    {
        if let Some(remark) = non_blank(admin_remark) {
            interest.superadmin_remark = Some(remark);
            interest.updated_at = now;
            InterestRepository::new(&mut tx)
                .save_admin_remark(&interest)
                .await?;
        }
        commit(tx).await?;
        return Ok(Confirmation {
            contract,
            interest,
            remaining_quantity: product.remaining_quantity,
            already_confirmed: true,
        });
    }

    let previous = interest.status;
    interest.confirm_deal(non_blank(admin_remark), now)?;
    product.ensure_quantity_available(&interest.buyer_required_quantity)?;
    product.apply_sale(&interest.buyer_required_quantity);
    ProductRepository::new(&mut tx).save(&mut product).await?;
    InterestRepository::new(&mut tx)
        .save_transition(&interest, previous)
        .await?;

    let contract_id = identifiers::contract_id(now.date_naive(), &mut rand::thread_rng());
    let contract = ContractRepository::new(&mut tx)
        .create(&NewContract::from_confirmation(contract_id, &interest, &product, now))
        .await?;

    let mut superseded = Vec::new();
    let siblings = InterestRepository::new(&mut tx)
        .open_for_product(product.id)
        .await?;
    for mut sibling in siblings.into_iter().filter(|s| s.id != interest.id) {
        let from = sibling.status;
        sibling.reject_as_superseded(now)?;
        InterestRepository::new(&mut tx)
            .save_transition(&sibling, from)
            .await?;
        superseded.push(sibling.id);
    }

    let buyer = load_user(&mut tx, interest.buyer_id).await?;
    let seller = load_user(&mut tx, interest.seller_id).await?;
    let admins = UserRepository::new(&mut tx).admin_emails().await?;
    let mut messages = state.templates.deal_confirmed(&product, &seller, &buyer);
    messages.extend(state.templates.contract_memo(
        &contract,
        &product,
        &seller,
        &buyer,
        admins,
        now.date_naive(),
    ));
    enqueue(&mut tx, messages, now).await?;

    audit(
        &mut tx,
        CreateAuditEntry::new(actor.id, "deal_confirmed", "contract", contract.id).with_details(
            json!({
                "contract_id": contract.contract_id,
                "interest_id": interest.id,
                "quantity": contract.deal_quantity,
                "remaining_quantity": product.remaining_quantity,
                "superseded_interests": superseded,
            }),
        ),
    )
    .await?;

    commit(tx).await?;
    Ok(Confirmation {
        contract,
        interest,
        remaining_quantity: product.remaining_quantity,
        already_confirmed: false,
    })
}

/// Open offers on one listing, for its owner or an admin.
pub async fn list_product_interests(
    state: &AppState,
    actor: &User,
    product_id: i64,
) -> Result<Vec<OfferView>, DomainError> {
    require_seller_or_admin(actor)?;
    let mut conn = acquire(&state.pool).await?;

    let product = load_product(&mut conn, product_id).await?;
    require_product_owner(actor, &product)?;
    let interests = InterestRepository::new(&mut conn)
        .open_for_product(product_id)
        .await?;

    let mut products = HashMap::from([(product.id, product)]);
    render_offers(&mut conn, actor, interests, &mut products).await
}

/// Offers visible to the caller: placed as buyer, received as seller, or
/// every offer for admins. Newest first.
pub async fn list_offers(
    state: &AppState,
    actor: &User,
    status: Option<InterestStatus>,
) -> Result<Vec<OfferView>, DomainError> {
    let mut conn = acquire(&state.pool).await?;
    let mut repo = InterestRepository::new(&mut conn);

    let mut interests = if actor.is_admin() {
        repo.list(&InterestQuery {
            status,
            ..InterestQuery::default()
        })
        .await?
    } else {
        let mut found = Vec::new();
        if actor.is_buyer() {
            found.extend(
                repo.list(&InterestQuery {
                    buyer_id: Some(actor.id),
                    status,
                    ..InterestQuery::default()
                })
                .await?,
            );
        }
        if actor.is_seller() {
            found.extend(
                repo.list(&InterestQuery {
                    seller_id: Some(actor.id),
                    status,
                    ..InterestQuery::default()
                })
                .await?,
            );
        }
        found
    };
    interests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    interests.dedup_by_key(|i| i.id);

    render_offers(&mut conn, actor, interests, &mut HashMap::new()).await
}

async fn render_offers(
    conn: &mut SqliteConnection,
    viewer: &User,
    interests: Vec<Interest>,
    products: &mut HashMap<i64, Product>,
) -> Result<Vec<OfferView>, DomainError> {
    let mut buyers: HashMap<i64, User> = HashMap::new();
    let mut views = Vec::with_capacity(interests.len());
    for interest in interests {
        if !products.contains_key(&interest.product_id) {
            let product = load_product(conn, interest.product_id).await?;
            products.insert(product.id, product);
        }
        if !buyers.contains_key(&interest.buyer_id) {
            let buyer = load_user(conn, interest.buyer_id).await?;
            buyers.insert(buyer.id, buyer);
        }
        let (Some(product), Some(buyer)) =
            (products.get(&interest.product_id), buyers.get(&interest.buyer_id))
        else {
            continue;
        };
        views.push(OfferView::new(viewer, interest, product, buyer));
    }
    Ok(views)
}

/// An interest, provided it belongs to `product_id`.
async fn load_interest(
    conn: &mut SqliteConnection,
    product_id: i64,
    interest_id: i64,
) -> Result<Interest, DomainError> {
    InterestRepository::new(conn)
        .get(interest_id)
        .await?
        .filter(|i| i.product_id == product_id)
        .ok_or(DomainError::not_found("Interest"))
}

/// Recompute the listing's deal status after an offer left the running.
async fn resync_deal_status(conn: &mut SqliteConnection, mut product: Product) -> Result<(), DomainError> {
    let has_seller_confirmed = InterestRepository::new(conn)
        .has_open_seller_confirmed(product.id)
        .await?;
    let before = product.deal_status;
    product.sync_deal_status(has_seller_confirmed);
    if product.deal_status != before {
        ProductRepository::new(conn).save(&mut product).await?;
    }
    Ok(())
}

async fn audit(conn: &mut SqliteConnection, entry: CreateAuditEntry) -> Result<(), DomainError> {
    AuditLogRepository::new(conn).log(entry).await?;
    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::state::{file_backed_state, test_state};
    use crate::domain::entities::{AccountStatus, DealStatus, Role};
    use std::sync::Arc;
    use tokio::sync::Barrier;
    use crate::persistence::notification_repository::NotificationRepository;
    use crate::persistence::product_repository::test_support::{seed_product, seed_user};

    struct Market {
        state: AppState,
        admin: User,
        seller: User,
        buyer: User,
        other_buyer: User,
        product: Product,
    }

    async fn market(quantity: &str) -> Market {
        market_in(test_state().await, quantity).await
    }

    async fn market_in(state: AppState, quantity: &str) -> Market {
        let mut conn = state.pool.acquire().await.unwrap();
        let admin = seed_user(&mut conn, "admin", Role::Admin).await;
        let seller = seed_user(&mut conn, "seller", Role::Seller).await;
        let buyer = seed_user(&mut conn, "buyer", Role::Buyer).await;
        let other_buyer = seed_user(&mut conn, "trader", Role::SellerAndBuyer).await;
        let product = seed_product(&mut conn, seller, quantity).await;
        let market = Market {
            admin: load_user(&mut conn, admin).await.unwrap(),
            seller: load_user(&mut conn, seller).await.unwrap(),
            buyer: load_user(&mut conn, buyer).await.unwrap(),
            other_buyer: load_user(&mut conn, other_buyer).await.unwrap(),
            product,
            state: state.clone(),
        };
        drop(conn);
        market
    }

    fn offer(amount: &str, quantity: &str) -> InterestOffer {
        InterestOffer {
            buyer_offered_amount: Money::parse(amount).unwrap(),
            buyer_required_quantity: Quantity::parse(quantity).unwrap(),
            delivery_date: NaiveDate::from_ymd_opt(2025, 3, 20),
            loading_from: None,
            loading_to: None,
            buyer_remark: Some("Bilty on arrival".into()),
        }
    }

    async fn product(state: &AppState, id: i64) -> Product {
        let mut conn = state.pool.acquire().await.unwrap();
        load_product(&mut conn, id).await.unwrap()
    }

    async fn queued_kinds(state: &AppState) -> Vec<String> {
        let mut conn = state.pool.acquire().await.unwrap();
        let mut kinds: Vec<String> = NotificationRepository::new(&mut conn)
            .recent(50)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.kind)
            .collect();
        kinds.sort();
        kinds
    }

    #[tokio::test]
    async fn test_express_interest_queues_admin_memo() {
        let m = market("100").await;
        let interest = express_interest(&m.state, &m.buyer, m.product.id, offer("95", "30"))
            .await
            .unwrap();

        assert_eq!(interest.status, InterestStatus::Interested);
        assert_eq!(interest.seller_id, m.seller.id);
        assert_eq!(interest.snapshot_amount, m.product.amount);
        assert!(interest.transaction_id.starts_with("INT-"));
        assert_eq!(queued_kinds(&m.state).await, vec!["interest_submitted"]);
    }

    #[tokio::test]
    async fn test_express_interest_guards() {
        let m = market("100").await;

        let err = express_interest(&m.state, &m.seller, m.product.id, offer("95", "10"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::PermissionDenied(_)));

        let err = express_interest(&m.state, &m.buyer, m.product.id, offer("95", "101"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Only 100.00 kg available.");

        let err = express_interest(&m.state, &m.buyer, 9999, offer("95", "10"))
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::not_found("Product"));

        let mut suspended = m.buyer.clone();
        suspended.set_account_status(AccountStatus::Suspended, Some("fraud".into()));
        let err = express_interest(&m.state, &suspended, m.product.id, offer("95", "10"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ActionBlocked(_)));
    }

    #[tokio::test]
    async fn test_seller_cannot_offer_on_own_listing() {
        let m = market("100").await;
        let mut conn = m.state.pool.acquire().await.unwrap();
        let own = seed_product(&mut conn, m.other_buyer.id, "10").await;
        drop(conn);

        let err = express_interest(&m.state, &m.other_buyer, own.id, offer("95", "5"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Seller cannot show interest in own product.");
    }

    #[tokio::test]
    async fn test_accept_then_cancel_resyncs_deal_status() {
        let m = market("100").await;
        let interest = express_interest(&m.state, &m.buyer, m.product.id, offer("95", "30"))
            .await
            .unwrap();

        let err = accept_interest(&m.state, &m.other_buyer, m.product.id, interest.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::PermissionDenied(_)));

        let accepted = accept_interest(
            &m.state,
            &m.seller,
            m.product.id,
            interest.id,
            Some("OK at 95".into()),
        )
        .await
        .unwrap();
        assert_eq!(accepted.status, InterestStatus::SellerConfirmed);
        assert_eq!(accepted.negotiation_history.len(), 1);
        assert_eq!(
            product(&m.state, m.product.id).await.deal_status,
            DealStatus::SellerConfirmed
        );
        assert!(queued_kinds(&m.state).await.contains(&"seller_confirmed".to_string()));

        let err = cancel_interest(&m.state, &m.other_buyer, m.product.id, interest.id)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "You can only cancel your own offers.");

        let cancelled = cancel_interest(&m.state, &m.buyer, m.product.id, interest.id)
            .await
            .unwrap();
        assert_eq!(cancelled.status, InterestStatus::Cancelled);
        assert!(!cancelled.is_active);
        assert_eq!(
            product(&m.state, m.product.id).await.deal_status,
            DealStatus::Available
        );
    }

    #[tokio::test]
    async fn test_reject_only_fresh_offers() {
        let m = market("100").await;
        let interest = express_interest(&m.state, &m.buyer, m.product.id, offer("80", "10"))
            .await
            .unwrap();

        let rejected = reject_interest(&m.state, &m.seller, m.product.id, interest.id, Some("Too low".into()))
            .await
            .unwrap();
        assert_eq!(rejected.status, InterestStatus::Rejected);
        assert_eq!(rejected.seller_remark.as_deref(), Some("Too low"));

        let err = reject_interest(&m.state, &m.seller, m.product.id, interest.id, None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Only interested requests can be rejected.");
    }

    #[tokio::test]
    async fn test_interest_must_belong_to_product() {
        let m = market("100").await;
        let interest = express_interest(&m.state, &m.buyer, m.product.id, offer("95", "10"))
            .await
            .unwrap();
        let mut conn = m.state.pool.acquire().await.unwrap();
        let other = seed_product(&mut conn, m.seller.id, "10").await;
        drop(conn);

        let err = accept_interest(&m.state, &m.seller, other.id, interest.id, None)
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::not_found("Interest"));
    }

    #[tokio::test]
    async fn test_confirm_deal_creates_contract_and_rejects_siblings() {
        let m = market("100").await;
        let winner = express_interest(&m.state, &m.buyer, m.product.id, offer("98", "40"))
            .await
            .unwrap();
        let loser = express_interest(&m.state, &m.other_buyer, m.product.id, offer("97", "20"))
            .await
            .unwrap();
        accept_interest(&m.state, &m.seller, m.product.id, winner.id, None)
            .await
            .unwrap();

        let err = confirm_deal(&m.state, &m.seller, m.product.id, winner.id, None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Only admin can confirm deals.");

        let err = confirm_deal(&m.state, &m.admin, m.product.id, loser.id, None)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Only seller-confirmed interest can be confirmed as deal."
        );

        let confirmation = confirm_deal(
            &m.state,
            &m.admin,
            m.product.id,
            winner.id,
            Some("Approved".into()),
        )
        .await
        .unwrap();
        assert!(!confirmation.already_confirmed);
        assert_eq!(confirmation.interest.status, InterestStatus::DealConfirmed);
        assert!(confirmation.interest.deal_confirmed_at.is_some());
        assert_eq!(confirmation.contract.deal_amount, Money::parse("98").unwrap());
        assert_eq!(confirmation.contract.deal_quantity, Quantity::parse("40").unwrap());
        assert_eq!(confirmation.contract.admin_remark.as_deref(), Some("Approved"));
        assert_eq!(confirmation.contract.loading_from, "2025-03-01");
        assert_eq!(confirmation.remaining_quantity, Quantity::parse("60").unwrap());

        let listing = product(&m.state, m.product.id).await;
        assert_eq!(listing.remaining_quantity, Quantity::parse("60").unwrap());
        assert_eq!(listing.deal_status, DealStatus::PartiallySold);

        let mut conn = m.state.pool.acquire().await.unwrap();
        let loser = InterestRepository::new(&mut conn).get(loser.id).await.unwrap().unwrap();
        assert_eq!(loser.status, InterestStatus::Rejected);
        assert!(!loser.is_active);
        drop(conn);

        let kinds = queued_kinds(&m.state).await;
        for kind in ["contract_memo", "deal_confirmed_buyer", "deal_confirmed_seller"] {
            assert!(kinds.contains(&kind.to_string()), "missing {}", kind);
        }
    }

    #[tokio::test]
    async fn test_confirm_deal_is_idempotent() {
        let m = market("100").await;
        let interest = express_interest(&m.state, &m.buyer, m.product.id, offer("95", "30"))
            .await
            .unwrap();
        accept_interest(&m.state, &m.seller, m.product.id, interest.id, None)
            .await
            .unwrap();

        let first = confirm_deal(&m.state, &m.admin, m.product.id, interest.id, None)
            .await
            .unwrap();
        let second = confirm_deal(
            &m.state,
            &m.admin,
            m.product.id,
            interest.id,
            Some("Late note".into()),
        )
        .await
        .unwrap();

        assert!(second.already_confirmed);
        assert_eq!(first.contract.contract_id, second.contract.contract_id);
        assert_eq!(second.interest.superadmin_remark.as_deref(), Some("Late note"));
        assert_eq!(
            product(&m.state, m.product.id).await.remaining_quantity,
            Quantity::parse("70").unwrap()
        );
    }

    #[tokio::test]
    async fn test_selling_everything_takes_listing_out_of_stock() {
        let m = market("50").await;
        let interest = express_interest(&m.state, &m.buyer, m.product.id, offer("100", "50"))
            .await
            .unwrap();
        accept_interest(&m.state, &m.admin, m.product.id, interest.id, None)
            .await
            .unwrap();
        confirm_deal(&m.state, &m.admin, m.product.id, interest.id, None)
            .await
            .unwrap();

        let listing = product(&m.state, m.product.id).await;
        assert!(listing.remaining_quantity.is_zero());
        assert_eq!(listing.deal_status, DealStatus::OutOfStock);
        assert!(!listing.is_active);

        let err = express_interest(&m.state, &m.other_buyer, m.product.id, offer("100", "1"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "This product is no longer available.");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_confirmations_never_oversell() {
        let dir = tempfile::tempdir().unwrap();
        let m = market_in(file_backed_state(dir.path(), 8).await, "100").await;

        let mut interest_ids = Vec::new();
        for n in 0..8 {
            let buyer = {
                let mut conn = m.state.pool.acquire().await.unwrap();
                let id = seed_user(&mut conn, &format!("buyer-{}", n), Role::Buyer).await;
                load_user(&mut conn, id).await.unwrap()
            };
            let interest = express_interest(&m.state, &buyer, m.product.id, offer("95", "20"))
                .await
                .unwrap();
            accept_interest(&m.state, &m.seller, m.product.id, interest.id, None)
                .await
                .unwrap();
            interest_ids.push(interest.id);
        }

        let start = Arc::new(Barrier::new(interest_ids.len()));
        let handles: Vec<_> = interest_ids
            .into_iter()
            .map(|interest_id| {
                let state = m.state.clone();
                let admin = m.admin.clone();
                let start = start.clone();
                let product_id = m.product.id;
                tokio::spawn(async move {
                    start.wait().await;
                    confirm_deal(&state, &admin, product_id, interest_id, None).await
                })
            })
            .collect();

        let mut confirmed = 0;
        let mut refused = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(confirmation) => {
                    assert!(!confirmation.already_confirmed);
                    confirmed += 1;
                }
                Err(e) => refused.push(e.to_string()),
            }
        }
        assert_eq!(confirmed, 1);
        assert_eq!(refused.len(), 7);
        for message in &refused {
            assert_eq!(message, "Only seller-confirmed interest can be confirmed as deal.");
        }

        let listing = product(&m.state, m.product.id).await;
        assert_eq!(listing.remaining_quantity, Quantity::parse("80").unwrap());

        let mut conn = m.state.pool.acquire().await.unwrap();
        let (contracts,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM contracts")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(contracts, 1);
    }

    #[tokio::test]
    async fn test_offer_views_mask_buyer_for_sellers() {
        let m = market("100").await;
        express_interest(&m.state, &m.buyer, m.product.id, offer("105", "10"))
            .await
            .unwrap();

        let seller_view = list_product_interests(&m.state, &m.seller, m.product.id)
            .await
            .unwrap();
        assert_eq!(seller_view.len(), 1);
        assert_eq!(seller_view[0].buyer_id, None);
        assert_eq!(seller_view[0].buyer_display_id, format!("BUYER-{:04}", m.buyer.id));
        assert_eq!(seller_view[0].offer_arrow, OfferArrow::Up);

        let admin_view = list_offers(&m.state, &m.admin, None).await.unwrap();
        assert_eq!(admin_view[0].buyer_id, Some(m.buyer.id));

        let buyer_view = list_offers(&m.state, &m.buyer, Some(InterestStatus::Interested))
            .await
            .unwrap();
        assert_eq!(buyer_view.len(), 1);
        assert_eq!(buyer_view[0].seller_id, None);
        assert_eq!(buyer_view[0].seller_display_id, format!("SELLER-{:04}", m.seller.id));

        let none = list_offers(&m.state, &m.buyer, Some(InterestStatus::Rejected))
            .await
            .unwrap();
        assert!(none.is_empty());

        let err = list_product_interests(&m.state, &m.buyer, m.product.id)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::PermissionDenied(_)));
    }
}
