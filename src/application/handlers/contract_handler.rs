use super::{success, ApiJson, ApiPath, ApiQuery, ApiResult};
use crate::application::error::ApiError;
use crate::application::services::contracts::{self, ContractFilter};
use crate::application::state::AppState;
use crate::auth::CurrentUser;
use crate::domain::entities::ContractStatus;
use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Default, Deserialize)]
pub struct ContractListQuery {
    pub status: Option<ContractStatus>,
    pub seller_id: Option<i64>,
    pub buyer_id: Option<i64>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl From<ContractListQuery> for ContractFilter {
    fn from(query: ContractListQuery) -> Self {
        ContractFilter {
            status: query.status,
            seller_id: query.seller_id,
            buyer_id: query.buyer_id,
            search: query.search,
            page: query.page,
            per_page: query.per_page,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateContractRequest {
    pub status: Option<ContractStatus>,
    pub admin_remark: Option<String>,
}

pub async fn list_contracts(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiQuery(query): ApiQuery<ContractListQuery>,
) -> ApiResult {
    let listing = contracts::list_contracts(&state, &actor, query.into()).await?;
    Ok(success(json!(listing)))
}

pub async fn get_contract(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult {
    let contract = contracts::get_contract(&state, &actor, id).await?;
    Ok(success(json!({ "contract": contract })))
}

pub async fn update_contract(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateContractRequest>,
) -> ApiResult {
    let contract =
        contracts::update_contract(&state, &actor, id, req.status, req.admin_remark).await?;
    Ok(success(json!({ "message": "Contract updated.", "contract": contract })))
}

pub async fn export_contracts(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiQuery(query): ApiQuery<ContractListQuery>,
) -> Result<Response, ApiError> {
    let csv = contracts::export_contracts_csv(&state, &actor, query.into()).await?;
    let disposition = format!(
        "attachment; filename=\"contracts-{}.csv\"",
        Utc::now().format("%Y%m%d-%H%M%S")
    );
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    )
        .into_response())
}
