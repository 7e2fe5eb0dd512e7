use super::{success, ApiJson, ApiPath, ApiQuery, ApiResult};
use crate::application::services::catalog::{self, ProductFilter};
use crate::application::state::AppState;
use crate::auth::CurrentUser;
use crate::domain::entities::{NewProduct, ProductChanges};
use crate::domain::value_objects::{Money, Quantity, Unit};
use axum::extract::State;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct ProductListQuery {
    pub category: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    /// Required when an admin lists on behalf of a seller.
    pub seller_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub amount: Money,
    pub amount_unit: Option<Unit>,
    pub quantity: Quantity,
    pub quantity_unit: Option<Unit>,
    pub loading_from: NaiveDate,
    pub loading_to: NaiveDate,
    pub loading_location: Option<String>,
    pub remark: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProductRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub amount: Option<Money>,
    pub amount_unit: Option<Unit>,
    pub quantity_unit: Option<Unit>,
    pub loading_from: Option<NaiveDate>,
    pub loading_to: Option<NaiveDate>,
    pub loading_location: Option<String>,
    pub remark: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StockRequest {
    /// `add` (default) or `replace`.
    pub mode: Option<String>,
    pub quantity: Quantity,
}

pub async fn list_products(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiQuery(query): ApiQuery<ProductListQuery>,
) -> ApiResult {
    let filter = ProductFilter {
        category: query.category,
        search: query.search,
    };
    let products = catalog::list_products(&state, &actor, filter).await?;
    Ok(success(json!({ "count": products.len(), "products": products })))
}

pub async fn create_product(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiJson(req): ApiJson<CreateProductRequest>,
) -> ApiResult {
    let draft = NewProduct {
        seller_id: actor.id,
        title: req.title,
        description: req.description,
        category: req.category,
        amount: req.amount,
        amount_unit: req.amount_unit.unwrap_or(Unit::Kg),
        quantity: req.quantity,
        quantity_unit: req.quantity_unit.unwrap_or(Unit::Kg),
        loading_from: req.loading_from,
        loading_to: req.loading_to,
        loading_location: req.loading_location,
        remark: req.remark,
        is_active: req.is_active.unwrap_or(true),
    };
    let product = catalog::create_product(&state, &actor, req.seller_id, draft).await?;
    Ok(success(json!({ "message": "Product added.", "product": product })))
}

pub async fn get_product(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult {
    let product = catalog::get_product(&state, &actor, id).await?;
    Ok(success(json!({ "product": product })))
}

pub async fn update_product(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateProductRequest>,
) -> ApiResult {
    let changes = ProductChanges {
        title: req.title,
        description: req.description,
        category: req.category,
        amount: req.amount,
        amount_unit: req.amount_unit,
        quantity_unit: req.quantity_unit,
        loading_from: req.loading_from,
        loading_to: req.loading_to,
        loading_location: req.loading_location,
        remark: req.remark,
    };
    let product = catalog::update_product(&state, &actor, id, changes).await?;
    Ok(success(json!({ "message": "Product updated.", "product": product })))
}

pub async fn toggle_product(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult {
    let product = catalog::toggle_product(&state, &actor, id).await?;
    let message = if product.is_active {
        "Product activated."
    } else {
        "Product deactivated."
    };
    Ok(success(json!({ "message": message, "product": product })))
}

pub async fn update_stock(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<StockRequest>,
) -> ApiResult {
    let product =
        catalog::update_stock(&state, &actor, id, req.mode.as_deref(), req.quantity).await?;
    Ok(success(json!({
        "message": "Stock updated.",
        "remaining_quantity": product.remaining_quantity,
        "product": product,
    })))
}

pub async fn delete_product(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult {
    catalog::delete_product(&state, &actor, id).await?;
    Ok(success(json!({ "message": "Product deleted." })))
}
