//! Sign-up, sessions and admin account management.

use super::{acquire, begin, commit, enqueue, load_user, with_retries};
use crate::application::state::AppState;
use crate::auth::{issue_token, token_digest, AuthError};
use crate::domain::entities::{AccountStatus, KycStatus, Role, User};
use crate::domain::errors::DomainError;
use crate::domain::services::access::{require_admin, require_super_admin};
use crate::domain::services::identifiers;
use crate::persistence::models::{CreateAuditEntry, CreateUser};
use crate::persistence::repository::{AuditLogRepository, AuthTokenRepository, UserRepository};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use zeroize::Zeroizing;

const MIN_PASSWORD_LENGTH: usize = 8;

/// Identity fields shared by self sign-up and admin-created accounts.
#[derive(Clone)]
pub struct AccountDraft {
    pub username: String,
    pub email: String,
    pub mobile: String,
    pub password: Zeroizing<String>,
    pub full_name: Option<String>,
    pub company_name: Option<String>,
}

impl AccountDraft {
    fn validate(&self) -> Result<(), DomainError> {
        if self.username.trim().is_empty() {
            return Err(DomainError::invalid("Username is required."));
        }
        if self.mobile.trim().is_empty() {
            return Err(DomainError::invalid("Mobile number is required."));
        }
        validate_email(self.email.trim())?;
        validate_password(&self.password)
    }
}

fn validate_password(password: &str) -> Result<(), DomainError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(DomainError::invalid(format!(
            "Password must be at least {} characters.",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), DomainError> {
    if email.is_empty() || !email.contains('@') {
        return Err(DomainError::invalid("Enter a valid email address."));
    }
    Ok(())
}

/// Contact and display details a user may edit. `None` keeps the current
/// value; a blank name clears it.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub email: Option<String>,
    pub mobile: Option<String>,
    pub full_name: Option<String>,
    pub company_name: Option<String>,
}

impl ProfileChanges {
    fn apply(self, user: &mut User) -> Result<(), DomainError> {
        if let Some(email) = self.email {
            let email = email.trim();
            validate_email(email)?;
            user.email = email.to_string();
        }
        if let Some(mobile) = self.mobile {
            let mobile = mobile.trim();
            if mobile.is_empty() {
                return Err(DomainError::invalid("Mobile number is required."));
            }
            user.mobile = mobile.to_string();
        }
        if let Some(name) = self.full_name {
            user.full_name = non_blank(Some(name));
        }
        if let Some(name) = self.company_name {
            user.company_name = non_blank(Some(name));
        }
        Ok(())
    }
}

/// A newly opened session. `token` is only ever shown here.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

/// Self sign-up. Accounts start with a pending KYC.
pub async fn register(state: &AppState, draft: AccountDraft, role: &str) -> Result<User, DomainError> {
    let role = Role::from_registration(role)?;
    draft.validate()?;
    let password_hash = hash_password(state, &draft.password).await?;

    let user = with_retries("register", state.config.max_transition_retries, || {
        create_account(state, None, &draft, &password_hash, role, KycStatus::Pending)
    })
    .await?;
    info!("Registered {} as {}", user.actor_code(), user.role);
    Ok(user)
}

/// Admin-created account. Only a super admin may create admins.
///
/// The creating admin vouches for the account, so its KYC starts approved.
pub async fn create_user(
    state: &AppState,
    actor: &User,
    draft: AccountDraft,
    role: Role,
) -> Result<User, DomainError> {
    require_admin(actor, "Only admin can create users.")?;
    if role.is_admin() {
        require_super_admin(actor, "Only super admin can create admin users.")?;
    }
    draft.validate()?;
    let password_hash = hash_password(state, &draft.password).await?;

    let user = with_retries("create_user", state.config.max_transition_retries, || {
        create_account(state, Some(actor), &draft, &password_hash, role, KycStatus::Approved)
    })
    .await?;
    info!("{} created {} as {}", actor.actor_code(), user.actor_code(), user.role);
    Ok(user)
}

async fn hash_password(state: &AppState, password: &str) -> Result<String, DomainError> {
    state
        .hasher
        .hash_blocking(password)
        .await
        .map_err(|e| DomainError::Internal(e.to_string()))
}

fn identity_taken(field: &str) -> DomainError {
    DomainError::invalid(match field {
        "username" => "Username already taken.",
        "mobile" => "Mobile number already registered.",
        _ => "Email already registered.",
    })
}

async fn create_account(
    state: &AppState,
    actor: Option<&User>,
    draft: &AccountDraft,
    password_hash: &str,
    role: Role,
    kyc_status: KycStatus,
) -> Result<User, DomainError> {
    let now = Utc::now();
    let username = draft.username.trim().to_string();
    let mobile = draft.mobile.trim().to_string();
    let email = draft.email.trim().to_string();

    let mut tx = begin(&state.pool).await?;
    let taken = UserRepository::new(&mut tx)
        .taken_identities(&username, &mobile, &email, None)
        .await?;
    if let Some(field) = taken.first() {
        return Err(identity_taken(field));
    }

    let buyer_public_id = role
        .is_buyer()
        .then(|| identifiers::buyer_public_id(now.date_naive(), &mut rand::thread_rng()));

    let user = UserRepository::new(&mut tx)
        .create(CreateUser {
            username,
            email,
            mobile,
            full_name: non_blank(draft.full_name.clone()),
            company_name: non_blank(draft.company_name.clone()),
            password_hash: password_hash.to_string(),
            role: role.as_str().to_string(),
            kyc_status: kyc_status.as_str().to_string(),
            buyer_public_id,
            created_at: now,
        })
        .await?;

    let actor_id = actor.map_or(user.id, |a| a.id);
    AuditLogRepository::new(&mut tx)
        .log(
            CreateAuditEntry::new(actor_id, "user_created", "user", user.id)
                .with_details(json!({ "role": user.role, "kyc_status": user.kyc_status })),
        )
        .await?;
    commit(tx).await?;
    Ok(user)
}

/// Open a session by mobile number or username.
pub async fn login(state: &AppState, login: &str, password: &str) -> Result<Session, AuthError> {
    let found = {
        let mut conn = acquire(&state.pool).await?;
        UserRepository::new(&mut conn)
            .find_for_login(login.trim())
            .await?
    };
    let (user, hash) = found.unzip();
    let verified = state.hasher.verify_blocking(password, hash).await;
    let user = match user {
        Some(user) if verified => user,
        Some(user) => {
            warn!("Failed login for {}", user.actor_code());
            return Err(AuthError::InvalidCredentials);
        }
        None => {
            warn!("Failed login for unknown account");
            return Err(AuthError::InvalidCredentials);
        }
    };
    user.ensure_can_log_in()
        .map_err(|e| AuthError::Blocked(e.to_string()))?;

    let now = Utc::now();
    let issued = issue_token();
    let expires_at = now + Duration::hours(state.config.token_ttl_hours);
    let mut conn = acquire(&state.pool).await?;
    AuthTokenRepository::new(&mut conn)
        .insert(&issued.digest, user.id, now, expires_at)
        .await?;

    info!("{} logged in", user.actor_code());
    Ok(Session {
        token: issued.token,
        expires_at,
        user,
    })
}

/// Revoke the session behind `token`.
pub async fn logout(state: &AppState, user: &User, token: &str) -> Result<(), AuthError> {
    let mut conn = acquire(&state.pool).await?;
    if AuthTokenRepository::new(&mut conn)
        .revoke(&token_digest(token), Utc::now())
        .await?
    {
        info!("{} logged out", user.actor_code());
    }
    Ok(())
}

/// Replace the caller's password after re-checking the current one.
///
/// Every other session of the account is revoked; the one making the
/// request stays open. Returns how many sessions were closed.
pub async fn change_password(
    state: &AppState,
    user: &User,
    current_token: &str,
    old_password: &str,
    new_password: &str,
) -> Result<u64, DomainError> {
    validate_password(new_password)?;
    if old_password == new_password {
        return Err(DomainError::invalid(
            "New password must be different from the old password.",
        ));
    }

    let stored = {
        let mut conn = acquire(&state.pool).await?;
        UserRepository::new(&mut conn).password_hash(user.id).await?
    };
    if !state.hasher.verify_blocking(old_password, stored).await {
        warn!("Rejected password change for {}: wrong old password", user.actor_code());
        return Err(DomainError::invalid("Old password is incorrect."));
    }
    let password_hash = hash_password(state, new_password).await?;

    let now = Utc::now();
    let mut tx = begin(&state.pool).await?;
    UserRepository::new(&mut tx)
        .save_password_hash(user.id, &password_hash, now)
        .await?;
    let revoked = AuthTokenRepository::new(&mut tx)
        .revoke_others(user.id, &token_digest(current_token), now)
        .await?;
    enqueue(&mut tx, state.templates.password_changed(user), now).await?;
    AuditLogRepository::new(&mut tx)
        .log(
            CreateAuditEntry::new(user.id, "password_changed", "user", user.id)
                .with_details(json!({ "revoked_sessions": revoked })),
        )
        .await?;
    commit(tx).await?;

    state.outbox_wake.notify_one();
    info!("{} changed their password ({} other sessions revoked)", user.actor_code(), revoked);
    Ok(revoked)
}

/// Edit the caller's own contact details.
pub async fn update_profile(
    state: &AppState,
    user: &User,
    changes: ProfileChanges,
) -> Result<User, DomainError> {
    let updated = with_retries("update_profile", state.config.max_transition_retries, || {
        save_account(state, user, user.id, changes.clone(), None)
    })
    .await?;
    info!("{} updated their profile", updated.actor_code());
    Ok(updated)
}

/// Admin edit of another account's details and role.
///
/// Granting an admin role, or editing an admin, needs a super admin.
/// Nobody changes their own role.
pub async fn update_user(
    state: &AppState,
    actor: &User,
    user_id: i64,
    changes: ProfileChanges,
    role: Option<Role>,
) -> Result<User, DomainError> {
    require_admin(actor, "Only admin can edit users.")?;
    if role.is_some_and(|r| r.is_admin()) {
        require_super_admin(actor, "Only super admin can assign admin roles.")?;
    }
    if actor.id == user_id && role.is_some_and(|r| r != actor.role) {
        return Err(DomainError::denied("You cannot change your own role."));
    }

    let updated = with_retries("update_user", state.config.max_transition_retries, || {
        save_account(state, actor, user_id, changes.clone(), role)
    })
    .await?;
    info!("{} edited {} ({})", actor.actor_code(), updated.actor_code(), updated.role);
    Ok(updated)
}

async fn save_account(
    state: &AppState,
    actor: &User,
    user_id: i64,
    changes: ProfileChanges,
    role: Option<Role>,
) -> Result<User, DomainError> {
    let now = Utc::now();
    let mut tx = begin(&state.pool).await?;
    let mut user = load_user(&mut tx, user_id).await?;
    if actor.id != user.id && user.is_admin() {
        require_super_admin(actor, "Only super admin can change admin accounts.")?;
    }

    let before = user.clone();
    changes.apply(&mut user)?;
    if let Some(role) = role {
        user.role = role;
        if role.is_buyer() && user.buyer_public_id.is_none() {
            user.buyer_public_id = Some(identifiers::buyer_public_id(
                now.date_naive(),
                &mut rand::thread_rng(),
            ));
        }
    }

    let taken = UserRepository::new(&mut tx)
        .taken_identities(&user.username, &user.mobile, &user.email, Some(user.id))
        .await?;
    if let Some(field) = taken.first() {
        return Err(identity_taken(field));
    }

    UserRepository::new(&mut tx).save_profile(&user).await?;
    AuditLogRepository::new(&mut tx)
        .log(
            CreateAuditEntry::new(actor.id, "user_updated", "user", user.id).with_details(json!({
                "email_changed": before.email != user.email,
                "mobile_changed": before.mobile != user.mobile,
                "previous_role": before.role,
                "role": user.role,
            })),
        )
        .await?;
    commit(tx).await?;
    Ok(user)
}

/// Accounts for the admin user list.
pub async fn list_users(state: &AppState, actor: &User, role: Option<Role>) -> Result<Vec<User>, DomainError> {
    require_admin(actor, "Only admin can view users.")?;
    let mut conn = acquire(&state.pool).await?;
    Ok(UserRepository::new(&mut conn).list(role).await?)
}

/// Approve or reject a user's KYC and tell them.
pub async fn decide_kyc(
    state: &AppState,
    actor: &User,
    user_id: i64,
    decision: KycStatus,
    reason: Option<String>,
) -> Result<User, DomainError> {
    require_admin(actor, "Only admin can review KYC.")?;
    let now = Utc::now();

    let mut tx = begin(&state.pool).await?;
    let mut user = load_user(&mut tx, user_id).await?;
    user.decide_kyc(decision, reason)?;
    UserRepository::new(&mut tx).save_status(&user).await?;
    enqueue(&mut tx, state.templates.kyc_decision(&user), now).await?;
    AuditLogRepository::new(&mut tx)
        .log(
            CreateAuditEntry::new(actor.id, "kyc_decided", "user", user.id).with_details(json!({
                "kyc_status": user.kyc_status,
                "reason": user.kyc_rejection_reason,
            })),
        )
        .await?;
    commit(tx).await?;

    state.outbox_wake.notify_one();
    info!("{} set KYC of {} to {}", actor.actor_code(), user.actor_code(), user.kyc_status);
    Ok(user)
}

/// Activate, deactivate or suspend an account.
///
/// Leaving `active` revokes every open session of the account. Only a
/// super admin may change another admin's status, and nobody their own.
pub async fn set_account_status(
    state: &AppState,
    actor: &User,
    user_id: i64,
    status: AccountStatus,
    reason: Option<String>,
) -> Result<User, DomainError> {
    require_admin(actor, "Only admin can change account status.")?;
    if actor.id == user_id {
        return Err(DomainError::denied("You cannot change your own account status."));
    }
    let now = Utc::now();

    let mut tx = begin(&state.pool).await?;
    let mut user = load_user(&mut tx, user_id).await?;
    if user.is_admin() {
        require_super_admin(actor, "Only super admin can change admin accounts.")?;
    }
    if !user.set_account_status(status, reason) {
        return Ok(user);
    }

    UserRepository::new(&mut tx).save_status(&user).await?;
    let revoked = if status == AccountStatus::Active {
        0
    } else {
        AuthTokenRepository::new(&mut tx)
            .revoke_all_for_user(user.id, now)
            .await?
    };
    enqueue(&mut tx, state.templates.account_status_changed(&user), now).await?;
    AuditLogRepository::new(&mut tx)
        .log(
            CreateAuditEntry::new(actor.id, "account_status_changed", "user", user.id).with_details(
                json!({
                    "account_status": user.account_status,
                    "reason": user.suspension_reason,
                    "revoked_sessions": revoked,
                }),
            ),
        )
        .await?;
    commit(tx).await?;

    state.outbox_wake.notify_one();
    info!(
        "{} set account status of {} to {} ({} sessions revoked)",
        actor.actor_code(),
        user.actor_code(),
        user.account_status,
        revoked
    );
    Ok(user)
}

/// Create the configured super admin when the database has no admin yet.
pub async fn bootstrap_super_admin(state: &AppState) -> Result<Option<User>, DomainError> {
    let Some(admin) = state.config.bootstrap_admin.clone() else {
        return Ok(None);
    };

    let existing = {
        let mut conn = acquire(&state.pool).await?;
        UserRepository::new(&mut conn).count_admins().await?
    };
    if existing > 0 {
        return Ok(None);
    }

    let draft = AccountDraft {
        username: admin.username,
        email: admin.email,
        mobile: admin.mobile,
        password: admin.password,
        full_name: None,
        company_name: None,
    };
    draft.validate()?;
    let password_hash = hash_password(state, &draft.password).await?;
    let user = create_account(
        state,
        None,
        &draft,
        &password_hash,
        Role::SuperAdmin,
        KycStatus::Approved,
    )
    .await?;
    info!("Created bootstrap super admin {} ({})", user.username, user.actor_code());
    Ok(Some(user))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
