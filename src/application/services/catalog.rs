//! Product listings: creation, browsing, edits and stock.

use super::{acquire, begin, commit, load_product, load_user, with_retries};
use crate::application::state::AppState;
use crate::domain::entities::{NewProduct, Product, ProductChanges, StockMode, User};
use crate::domain::errors::DomainError;
use crate::domain::services::access::{require_product_owner, require_seller_or_admin};
use crate::domain::value_objects::{Money, Quantity};
use crate::persistence::interest_repository::InterestRepository;
use crate::persistence::models::CreateAuditEntry;
use crate::persistence::product_repository::{ProductQuery, ProductRepository};
use crate::persistence::repository::AuditLogRepository;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use sqlx::SqliteConnection;
use tracing::info;

/// A listing with its current bidding activity.
#[derive(Debug, Clone, Serialize)]
pub struct ProductView {
    #[serde(flatten)]
    pub product: Product,
    pub seller_display_id: String,
    pub highest_bid: Option<Money>,
    pub interested_count: i64,
}

/// Optional narrowing of a product listing.
#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    pub category: Option<String>,
    pub search: Option<String>,
}

/// Create a listing.
///
/// Sellers list for themselves. Admins must name the seller, who has to
/// hold a seller role.
pub async fn create_product(
    state: &AppState,
    actor: &User,
    on_behalf_of: Option<i64>,
    mut draft: NewProduct,
) -> Result<Product, DomainError> {
    let mut tx = begin(&state.pool).await?;

    draft.seller_id = if actor.is_admin() {
        let seller_id = on_behalf_of.ok_or_else(|| DomainError::invalid("Seller is required."))?;
        let seller = load_user(&mut tx, seller_id).await?;
        if !seller.is_seller() {
            return Err(DomainError::invalid("Selected user is not a seller."));
        }
        seller.id
    } else if actor.is_seller() {
        actor.ensure_can_transact()?;
        actor.id
    } else {
        return Err(DomainError::denied("Only sellers can add products."));
    };
    draft.validate()?;

    let product = ProductRepository::new(&mut tx)
        .create(&draft, Utc::now())
        .await?;
    audit(
        &mut tx,
        CreateAuditEntry::new(actor.id, "product_created", "product", product.id).with_details(
            json!({
                "seller_id": product.seller_id,
                "quantity": product.original_quantity,
                "amount": product.amount,
            }),
        ),
    )
    .await?;
    commit(tx).await?;

    info!(
        "{} listed product {} '{}' for seller {}",
        actor.actor_code(),
        product.id,
        product.title,
        product.seller_id
    );
    Ok(product)
}

/// A single listing. Hidden listings are only visible to their owner and
/// admins.
pub async fn get_product(state: &AppState, actor: &User, id: i64) -> Result<ProductView, DomainError> {
    let mut conn = acquire(&state.pool).await?;
    let product = load_product(&mut conn, id).await?;
    let owns = actor.is_admin() || product.seller_id == actor.id;
    if !owns && !product.is_active {
        return Err(DomainError::not_found("Product"));
    }
    with_bids(&mut conn, product).await
}

/// Listings visible to the caller: every listing for admins, their own
/// for sellers, open listings from others for buyers.
pub async fn list_products(
    state: &AppState,
    actor: &User,
    filter: ProductFilter,
) -> Result<Vec<ProductView>, DomainError> {
    let mut conn = acquire(&state.pool).await?;
    let base = ProductQuery {
        category: filter.category,
        search: filter.search,
        ..ProductQuery::default()
    };

    let mut products = Vec::new();
    {
        let mut repo = ProductRepository::new(&mut conn);
        if actor.is_admin() {
            products = repo.list(&base).await?;
        } else {
            if actor.is_seller() {
                products.extend(
                    repo.list(&ProductQuery {
                        seller_id: Some(actor.id),
                        ..base.clone()
                    })
                    .await?,
                );
            }
            if actor.is_buyer() {
                products.extend(
                    repo.list(&ProductQuery {
                        exclude_seller_id: Some(actor.id),
                        only_open: true,
                        ..base.clone()
                    })
                    .await?,
                );
            }
        }
    }
    products.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

    let mut views = Vec::with_capacity(products.len());
    for product in products {
        views.push(with_bids(&mut conn, product).await?);
    }
    Ok(views)
}

/// Edit descriptive fields and price.
pub async fn update_product(
    state: &AppState,
    actor: &User,
    id: i64,
    changes: ProductChanges,
) -> Result<Product, DomainError> {
    require_seller_or_admin(actor)?;
    let product = with_retries("update_product", state.config.max_transition_retries, || {
        modify(state, actor, id, "product_updated", changes.clone(), |product, changes| {
            product.apply_changes(changes)
        })
    })
    .await?;
    info!("{} updated product {}", actor.actor_code(), id);
    Ok(product)
}

/// Show or hide a listing. A listing without stock cannot be shown.
pub async fn toggle_product(state: &AppState, actor: &User, id: i64) -> Result<Product, DomainError> {
    require_seller_or_admin(actor)?;
    let product = with_retries("toggle_product", state.config.max_transition_retries, || {
        modify(state, actor, id, "product_toggled", (), |product, ()| {
            if !product.is_active && product.remaining_quantity.is_zero() {
                return Err(DomainError::invalid("Product is out of stock."));
            }
            product.is_active = !product.is_active;
            Ok(())
        })
    })
    .await?;
    info!(
        "{} {} product {}",
        actor.actor_code(),
        if product.is_active { "activated" } else { "deactivated" },
        id
    );
    Ok(product)
}

/// Add to, or overwrite, a listing's stock.
pub async fn update_stock(
    state: &AppState,
    actor: &User,
    id: i64,
    mode: Option<&str>,
    quantity: Quantity,
) -> Result<Product, DomainError> {
    require_seller_or_admin(actor)?;
    let mode = StockMode::parse_lenient(mode)?;

    let product = with_retries("update_stock", state.config.max_transition_retries, || {
        restock_once(state, actor, id, mode, quantity.clone())
    })
    .await?;
    info!(
        "{} set stock of product {} to {} ({})",
        actor.actor_code(),
        id,
        product.remaining_quantity,
        mode
    );
    Ok(product)
}

async fn restock_once(
    state: &AppState,
    actor: &User,
    id: i64,
    mode: StockMode,
    quantity: Quantity,
) -> Result<Product, DomainError> {
    let mut tx = begin(&state.pool).await?;
    let mut product = load_product(&mut tx, id).await?;
    require_product_owner(actor, &product)?;

    let before = product.remaining_quantity.clone();
    product.apply_stock_update(mode, quantity)?;
    let has_seller_confirmed = InterestRepository::new(&mut tx)
        .has_open_seller_confirmed(product.id)
        .await?;
    product.sync_deal_status(has_seller_confirmed);
    ProductRepository::new(&mut tx).save(&mut product).await?;

    audit(
        &mut tx,
        CreateAuditEntry::new(actor.id, "stock_updated", "product", product.id).with_details(json!({
            "mode": mode,
            "before": before,
            "after": product.remaining_quantity,
        })),
    )
    .await?;
    commit(tx).await?;
    Ok(product)
}

/// Remove a listing. Listings with contracts are kept for the record.
pub async fn delete_product(state: &AppState, actor: &User, id: i64) -> Result<(), DomainError> {
    require_seller_or_admin(actor)?;
    let mut tx = begin(&state.pool).await?;
    let product = load_product(&mut tx, id).await?;
    require_product_owner(actor, &product)?;

    let mut repo = ProductRepository::new(&mut tx);
    if repo.has_contracts(id).await? {
        return Err(DomainError::invalid(
            "Cannot delete a product that has contracts.",
        ));
    }
    if !repo.delete(id).await? {
        return Err(DomainError::not_found("Product"));
    }
    audit(
        &mut tx,
        CreateAuditEntry::new(actor.id, "product_deleted", "product", id)
            .with_details(json!({ "title": product.title })),
    )
    .await?;
    commit(tx).await?;

    info!("{} deleted product {}", actor.actor_code(), id);
    Ok(())
}

/// Load, check ownership, apply `change` and save under the version check.
async fn modify<A, F>(
    state: &AppState,
    actor: &User,
    id: i64,
    action: &str,
    args: A,
    change: F,
) -> Result<Product, DomainError>
where
    F: FnOnce(&mut Product, A) -> Result<(), DomainError>,
{
    let mut tx = begin(&state.pool).await?;
    let mut product = load_product(&mut tx, id).await?;
    require_product_owner(actor, &product)?;

    change(&mut product, args)?;
    ProductRepository::new(&mut tx).save(&mut product).await?;
    audit(
        &mut tx,
        CreateAuditEntry::new(actor.id, action, "product", product.id)
            .with_details(json!({ "version": product.version, "is_active": product.is_active })),
    )
    .await?;
    commit(tx).await?;
    Ok(product)
}

async fn with_bids(conn: &mut SqliteConnection, product: Product) -> Result<ProductView, DomainError> {
    let bids = InterestRepository::new(conn).bid_summary(product.id).await?;
    Ok(ProductView {
        seller_display_id: format!("SELLER-{:04}", product.seller_id),
        product,
        highest_bid: bids.highest_bid,
        interested_count: bids.interested_count,
    })
}

async fn audit(conn: &mut SqliteConnection, entry: CreateAuditEntry) -> Result<(), DomainError> {
    AuditLogRepository::new(conn).log(entry).await?;
    Ok(())
}
