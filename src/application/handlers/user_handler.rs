use super::auth_handler::RegisterRequest;
use super::{success, ApiJson, ApiPath, ApiQuery, ApiResult};
use crate::application::services::accounts::{self, ProfileChanges};
use crate::application::state::AppState;
use crate::auth::CurrentUser;
use crate::domain::entities::{AccountStatus, KycStatus, Role};
use axum::extract::State;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct KycDecisionRequest {
    pub status: KycStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AccountStatusRequest {
    pub status: AccountStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileRequest {
    pub email: Option<String>,
    pub mobile: Option<String>,
    pub full_name: Option<String>,
    pub company_name: Option<String>,
}

impl From<ProfileRequest> for ProfileChanges {
    fn from(req: ProfileRequest) -> Self {
        ProfileChanges {
            email: req.email,
            mobile: req.mobile,
            full_name: req.full_name,
            company_name: req.company_name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(flatten)]
    pub profile: ProfileRequest,
    pub role: Option<Role>,
}

pub async fn me(CurrentUser(user): CurrentUser) -> ApiResult {
    Ok(success(json!({ "user": user })))
}

pub async fn update_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(req): ApiJson<ProfileRequest>,
) -> ApiResult {
    let user = accounts::update_profile(&state, &user, req.into()).await?;
    Ok(success(json!({ "message": "Profile updated successfully.", "user": user })))
}

pub async fn list_users(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiQuery(query): ApiQuery<UserListQuery>,
) -> ApiResult {
    let users = accounts::list_users(&state, &actor, query.role).await?;
    Ok(success(json!({ "count": users.len(), "users": users })))
}

/// Admins may assign any role here, including `admin` and `super_admin`.
pub async fn create_user(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult {
    let role: Role = req.role.parse()?;
    let user = accounts::create_user(&state, &actor, req.into(), role).await?;
    Ok(success(json!({ "message": "User created.", "user": user })))
}

pub async fn decide_kyc(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(user_id): ApiPath<i64>,
    ApiJson(req): ApiJson<KycDecisionRequest>,
) -> ApiResult {
    let user = accounts::decide_kyc(&state, &actor, user_id, req.status, req.reason).await?;
    Ok(success(json!({
        "message": format!("KYC {}.", user.kyc_status),
        "user": user,
    })))
}

pub async fn set_account_status(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(user_id): ApiPath<i64>,
    ApiJson(req): ApiJson<AccountStatusRequest>,
) -> ApiResult {
    let user =
        accounts::set_account_status(&state, &actor, user_id, req.status, req.reason).await?;
    Ok(success(json!({
        "message": format!("Account is now {}.", user.account_status),
        "user": user,
    })))
}

pub async fn update_user(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(user_id): ApiPath<i64>,
    ApiJson(req): ApiJson<UpdateUserRequest>,
) -> ApiResult {
    let user =
        accounts::update_user(&state, &actor, user_id, req.profile.into(), req.role).await?;
    Ok(success(json!({ "message": "User updated.", "user": user })))
}
