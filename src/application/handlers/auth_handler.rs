use super::{success, ApiJson, ApiResult};
use crate::application::services::accounts::{self, AccountDraft};
use crate::application::state::AppState;
use crate::auth::{bearer_token, CurrentUser};
use axum::{extract::State, http::HeaderMap};
use serde::Deserialize;
use serde_json::json;
use zeroize::Zeroizing;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub mobile: String,
    pub password: String,
    pub role: String,
    pub full_name: Option<String>,
    pub company_name: Option<String>,
}

impl From<RegisterRequest> for AccountDraft {
    fn from(req: RegisterRequest) -> Self {
        AccountDraft {
            username: req.username,
            email: req.email,
            mobile: req.mobile,
            password: Zeroizing::new(req.password),
            full_name: req.full_name,
            company_name: req.company_name,
        }
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    /// Mobile number or username.
    pub login: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult {
    let role = req.role.clone();
    let user = accounts::register(&state, req.into(), &role).await?;
    Ok(success(json!({
        "message": "Registration successful. Your KYC is pending review.",
        "user": user,
    })))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult {
    let password = Zeroizing::new(req.password);
    let session = accounts::login(&state, &req.login, &password).await?;
    Ok(success(json!({
        "token": session.token,
        "expires_at": session.expires_at,
        "user": session.user,
    })))
}

pub async fn logout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
) -> ApiResult {
    let token = bearer_token(&headers)?;
    accounts::logout(&state, &user, token).await?;
    Ok(success(json!({ "message": "Logged out." })))
}

/// Other sessions of the account are signed out; this one stays valid.
pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    ApiJson(req): ApiJson<ChangePasswordRequest>,
) -> ApiResult {
    let token = bearer_token(&headers)?;
    let old_password = Zeroizing::new(req.old_password);
    let new_password = Zeroizing::new(req.new_password);
    let revoked =
        accounts::change_password(&state, &user, token, &old_password, &new_password).await?;
    Ok(success(json!({
        "message": "Password changed successfully.",
        "revoked_sessions": revoked,
    })))
}
