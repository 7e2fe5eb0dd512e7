use super::{success, ApiJson, ApiPath, ApiQuery, ApiResult, OptionalJson};
use crate::application::services::deal_workflow;
use crate::application::state::AppState;
use crate::auth::CurrentUser;
use crate::domain::entities::{Interest, InterestOffer, InterestStatus};
use crate::domain::value_objects::{Money, Quantity};
use axum::extract::State;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct InterestRequest {
    pub buyer_offered_amount: Money,
    pub buyer_required_quantity: Quantity,
    pub delivery_date: Option<NaiveDate>,
    pub loading_from: Option<String>,
    pub loading_to: Option<String>,
    pub buyer_remark: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RemarkRequest {
    pub remark: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OfferListQuery {
    pub status: Option<InterestStatus>,
}

/// The caller's view of an interest after a transition. Party ids are left
/// out; listings carry the masked views.
fn summary(interest: &Interest) -> Value {
    json!({
        "id": interest.id,
        "transaction_id": interest.transaction_id,
        "product_id": interest.product_id,
        "status": interest.status,
        "buyer_offered_amount": interest.buyer_offered_amount,
        "buyer_required_quantity": interest.buyer_required_quantity,
        "delivery_date": interest.delivery_date,
        "updated_at": interest.updated_at,
    })
}

pub async fn express_interest(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(product_id): ApiPath<i64>,
    ApiJson(req): ApiJson<InterestRequest>,
) -> ApiResult {
    let offer = InterestOffer {
        buyer_offered_amount: req.buyer_offered_amount,
        buyer_required_quantity: req.buyer_required_quantity,
        delivery_date: req.delivery_date,
        loading_from: req.loading_from,
        loading_to: req.loading_to,
        buyer_remark: req.buyer_remark,
    };
    let interest = deal_workflow::express_interest(&state, &actor, product_id, offer).await?;
    Ok(success(json!({
        "message": "Interest submitted.",
        "interest": summary(&interest),
    })))
}

pub async fn list_product_interests(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(product_id): ApiPath<i64>,
) -> ApiResult {
    let interests = deal_workflow::list_product_interests(&state, &actor, product_id).await?;
    Ok(success(json!({ "count": interests.len(), "interests": interests })))
}

pub async fn accept_interest(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath((product_id, interest_id)): ApiPath<(i64, i64)>,
    OptionalJson(body): OptionalJson<RemarkRequest>,
) -> ApiResult {
    let remark = body.and_then(|req| req.remark);
    let interest =
        deal_workflow::accept_interest(&state, &actor, product_id, interest_id, remark).await?;
    Ok(success(json!({
        "message": "Interest accepted. Waiting for admin confirmation.",
        "interest": summary(&interest),
    })))
}

pub async fn reject_interest(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath((product_id, interest_id)): ApiPath<(i64, i64)>,
    OptionalJson(body): OptionalJson<RemarkRequest>,
) -> ApiResult {
    let remark = body.and_then(|req| req.remark);
    let interest =
        deal_workflow::reject_interest(&state, &actor, product_id, interest_id, remark).await?;
    Ok(success(json!({
        "message": "Interest rejected.",
        "interest": summary(&interest),
    })))
}

pub async fn cancel_interest(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath((product_id, interest_id)): ApiPath<(i64, i64)>,
) -> ApiResult {
    let interest = deal_workflow::cancel_interest(&state, &actor, product_id, interest_id).await?;
    Ok(success(json!({
        "message": "Interest cancelled.",
        "interest": summary(&interest),
    })))
}

pub async fn confirm_deal(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath((product_id, interest_id)): ApiPath<(i64, i64)>,
    OptionalJson(body): OptionalJson<RemarkRequest>,
) -> ApiResult {
    let remark = body.and_then(|req| req.remark);
    let confirmation =
        deal_workflow::confirm_deal(&state, &actor, product_id, interest_id, remark).await?;
    let message = if confirmation.already_confirmed {
        "Deal was already confirmed."
    } else {
        "Deal confirmed and contract created."
    };
    Ok(success(json!({
        "message": message,
        "contract": confirmation.contract,
        "interest": confirmation.interest,
        "remaining_quantity": confirmation.remaining_quantity,
    })))
}

pub async fn list_offers(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiQuery(query): ApiQuery<OfferListQuery>,
) -> ApiResult {
    let offers = deal_workflow::list_offers(&state, &actor, query.status).await?;
    Ok(success(json!({ "count": offers.len(), "offers": offers })))
}
