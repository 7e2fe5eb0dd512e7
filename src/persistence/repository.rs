//! Database Repository
//!
//! Data access for accounts, sessions and the audit log.
//!
//! Repositories borrow a connection rather than the pool, so the same code
//! runs on a pooled connection or inside an open transaction
//! (`UserRepository::new(&mut tx)`).

use super::models::*;
use super::{query_failed, DatabaseError};
use crate::domain::entities::{Role, User};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

/// User repository
pub struct UserRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> UserRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Create a new user
    pub async fn create(&mut self, user: CreateUser) -> Result<User, DatabaseError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (
                username, email, mobile, full_name, company_name, password_hash,
                role, kyc_status, account_status, buyer_public_id, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'active', ?9, ?10, ?10)
            RETURNING *
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.mobile)
        .bind(&user.full_name)
        .bind(&user.company_name)
        .bind(&user.password_hash)
        .bind(&user.role)
        .bind(&user.kyc_status)
        .bind(&user.buyer_public_id)
        .bind(user.created_at)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to create user", e))?;

        debug!("Created user: {} ({})", record.id, record.role);
        User::try_from(record)
    }

    /// Get user by ID
    pub async fn get(&mut self, id: i64) -> Result<Option<User>, DatabaseError> {
        let record = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(|e| query_failed("Failed to get user", e))?;

        record.map(User::try_from).transpose()
    }

    /// Look up by mobile number or username, returning the stored hash too.
    pub async fn find_for_login(
        &mut self,
        login: &str,
    ) -> Result<Option<(User, String)>, DatabaseError> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT * FROM users WHERE mobile = ?1 OR username = ?1 ORDER BY id LIMIT 1",
        )
        .bind(login)
        .fetch_optional(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to look up login", e))?;

        match record {
            Some(record) => {
                let hash = record.password_hash.clone();
                Ok(Some((User::try_from(record)?, hash)))
            }
            None => Ok(None),
        }
    }

    /// Which of username, mobile and email are already taken, ignoring
    /// `except` (the account being edited).
    pub async fn taken_identities(
        &mut self,
        username: &str,
        mobile: &str,
        email: &str,
        except: Option<i64>,
    ) -> Result<Vec<&'static str>, DatabaseError> {
        let (u, m, e): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(username = ?1), 0),
                COALESCE(SUM(mobile = ?2), 0),
                COALESCE(SUM(lower(email) = lower(?3)), 0)
            FROM users
            WHERE ?4 IS NULL OR id != ?4
            "#,
        )
        .bind(username)
        .bind(mobile)
        .bind(email)
        .bind(except)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to check identities", e))?;

        let mut taken = Vec::new();
        if u > 0 {
            taken.push("username");
        }
        if m > 0 {
            taken.push("mobile");
        }
        if e > 0 {
            taken.push("email");
        }
        Ok(taken)
    }

    /// Emails of active admin accounts, the recipients of workflow memos.
    pub async fn admin_emails(&mut self) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT email FROM users
            WHERE role IN ('admin', 'super_admin')
              AND account_status = 'active'
              AND email <> ''
            ORDER BY email
            "#,
        )
        .fetch_all(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to list admin emails", e))?;

        Ok(rows.into_iter().map(|(email,)| email).collect())
    }

    pub async fn count_admins(&mut self) -> Result<i64, DatabaseError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM users WHERE role IN ('admin', 'super_admin')")
                .fetch_one(&mut *self.conn)
                .await
                .map_err(|e| query_failed("Failed to count admins", e))?;
        Ok(count)
    }

    /// List users, newest first, optionally restricted to one role.
    pub async fn list(&mut self, role: Option<Role>) -> Result<Vec<User>, DatabaseError> {
        let records = sqlx::query_as::<_, UserRecord>(
            "SELECT * FROM users WHERE (?1 IS NULL OR role = ?1) ORDER BY id DESC",
        )
        .bind(role.map(|r| r.as_str()))
        .fetch_all(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to list users", e))?;

        records.into_iter().map(User::try_from).collect()
    }

    /// Persist KYC and account status fields.
    pub async fn save_status(&mut self, user: &User) -> Result<(), DatabaseError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE users
            SET kyc_status = ?1, kyc_rejection_reason = ?2,
                account_status = ?3, suspension_reason = ?4, updated_at = ?5
            WHERE id = ?6
            "#,
        )
        .bind(user.kyc_status.as_str())
        .bind(&user.kyc_rejection_reason)
        .bind(user.account_status.as_str())
        .bind(&user.suspension_reason)
        .bind(Utc::now())
        .bind(user.id)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to update user status", e))?
        .rows_affected();

        if rows_affected == 0 {
            return Err(DatabaseError::QueryError(format!("User not found: {}", user.id)));
        }

        debug!("Updated status of user {}", user.id);
        Ok(())
    }

    /// Persist contact details, display names, role and buyer id.
    pub async fn save_profile(&mut self, user: &User) -> Result<(), DatabaseError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE users
            SET email = ?1, mobile = ?2, full_name = ?3, company_name = ?4,
                role = ?5, buyer_public_id = ?6, updated_at = ?7
            WHERE id = ?8
            "#,
        )
        .bind(&user.email)
        .bind(&user.mobile)
        .bind(&user.full_name)
        .bind(&user.company_name)
        .bind(user.role.as_str())
        .bind(&user.buyer_public_id)
        .bind(Utc::now())
        .bind(user.id)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to update user profile", e))?
        .rows_affected();

        if rows_affected == 0 {
            return Err(DatabaseError::QueryError(format!("User not found: {}", user.id)));
        }

        debug!("Updated profile of user {}", user.id);
        Ok(())
    }

    pub async fn save_password_hash(
        &mut self,
        user_id: i64,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let rows_affected =
            sqlx::query("UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE id = ?3")
                .bind(password_hash)
                .bind(now)
                .bind(user_id)
                .execute(&mut *self.conn)
                .await
                .map_err(|e| query_failed("Failed to update password", e))?
                .rows_affected();

        if rows_affected == 0 {
            return Err(DatabaseError::QueryError(format!("User not found: {}", user_id)));
        }
        Ok(())
    }

    /// The stored hash alone, for re-checking a signed-in user's password.
    pub async fn password_hash(&mut self, user_id: i64) -> Result<Option<String>, DatabaseError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT password_hash FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(|e| query_failed("Failed to load password hash", e))?;
        Ok(row.map(|(hash,)| hash))
    }
}

/// Bearer session repository
pub struct AuthTokenRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> AuthTokenRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    pub async fn insert(
        &mut self,
        token_hash: &str,
        user_id: i64,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO auth_tokens (token_hash, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(token_hash)
        .bind(user_id)
        .bind(created_at)
        .bind(expires_at)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to store session", e))?;

        debug!("Issued session for user {}", user_id);
        Ok(())
    }

    pub async fn get(&mut self, token_hash: &str) -> Result<Option<AuthTokenRecord>, DatabaseError> {
        sqlx::query_as::<_, AuthTokenRecord>("SELECT * FROM auth_tokens WHERE token_hash = ?1")
            .bind(token_hash)
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(|e| query_failed("Failed to get session", e))
    }

    /// Returns whether a live session was revoked.
    pub async fn revoke(&mut self, token_hash: &str, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let rows_affected = sqlx::query(
            "UPDATE auth_tokens SET revoked_at = ?1 WHERE token_hash = ?2 AND revoked_at IS NULL",
        )
        .bind(now)
        .bind(token_hash)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to revoke session", e))?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    /// Revoke every session of a user, e.g. on suspension.
    pub async fn revoke_all_for_user(
        &mut self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let rows_affected = sqlx::query(
            "UPDATE auth_tokens SET revoked_at = ?1 WHERE user_id = ?2 AND revoked_at IS NULL",
        )
        .bind(now)
        .bind(user_id)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to revoke sessions", e))?
        .rows_affected();

        Ok(rows_affected)
    }

    /// Revoke every open session of `user_id` except the one behind
    /// `keep_hash`.
    pub async fn revoke_others(
        &mut self,
        user_id: i64,
        keep_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE auth_tokens SET revoked_at = ?1
            WHERE user_id = ?2 AND token_hash != ?3 AND revoked_at IS NULL
            "#,
        )
        .bind(now)
        .bind(user_id)
        .bind(keep_hash)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to revoke sessions", e))?
        .rows_affected();

        Ok(rows_affected)
    }
}

/// Audit log repository
pub struct AuditLogRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> AuditLogRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Log an audit event
    pub async fn log(&mut self, entry: CreateAuditEntry) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (actor_id, action, entity, entity_id, details, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(entry.actor_id)
        .bind(&entry.action)
        .bind(&entry.entity)
        .bind(entry.entity_id)
        .bind(entry.details.to_string())
        .bind(Utc::now())
        .execute(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to log audit event", e))?;

        debug!("Logged audit event: {} {}", entry.action, entry.entity);
        Ok(())
    }

    /// Events for one entity, oldest first.
    pub async fn for_entity(
        &mut self,
        entity: &str,
        entity_id: i64,
    ) -> Result<Vec<AuditLogRecord>, DatabaseError> {
        sqlx::query_as::<_, AuditLogRecord>(
            "SELECT * FROM audit_log WHERE entity = ?1 AND entity_id = ?2 ORDER BY id",
        )
        .bind(entity)
        .bind(entity_id)
        .fetch_all(&mut *self.conn)
        .await
        .map_err(|e| query_failed("Failed to get audit events", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::test_pool;
    use chrono::Duration;

    fn new_user(username: &str, mobile: &str, role: Role) -> CreateUser {
        CreateUser {
            username: username.to_string(),
            email: format!("{}@example.com", username),
            mobile: mobile.to_string(),
            full_name: None,
            company_name: None,
            password_hash: "salt$hash".to_string(),
            role: role.as_str().to_string(),
            kyc_status: "approved".to_string(),
            buyer_public_id: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_find_user() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = UserRepository::new(&mut conn);

        let user = repo.create(new_user("ravi", "9000000001", Role::Seller)).await.unwrap();
        assert_eq!(user.role, Role::Seller);

        let by_mobile = repo.find_for_login("9000000001").await.unwrap().unwrap();
        assert_eq!(by_mobile.0.id, user.id);
        assert_eq!(by_mobile.1, "salt$hash");
        let by_name = repo.find_for_login("ravi").await.unwrap().unwrap();
        assert_eq!(by_name.0.id, user.id);
        assert!(repo.find_for_login("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_mobile_is_reported() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = UserRepository::new(&mut conn);

        let first = repo.create(new_user("a", "9000000001", Role::Buyer)).await.unwrap();
        let taken = repo.taken_identities("b", "9000000001", "A@example.com", None).await.unwrap();
        assert_eq!(taken, vec!["mobile", "email"]);
        let own = repo
            .taken_identities("a", "9000000001", "a@example.com", Some(first.id))
            .await
            .unwrap();
        assert!(own.is_empty());

        let err = repo.create(new_user("b", "9000000001", Role::Buyer)).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_admin_emails_skip_inactive() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = UserRepository::new(&mut conn);

        repo.create(new_user("boss", "1", Role::SuperAdmin)).await.unwrap();
        let mut admin = repo.create(new_user("ops", "2", Role::Admin)).await.unwrap();
        repo.create(new_user("seller", "3", Role::Seller)).await.unwrap();

        assert_eq!(repo.admin_emails().await.unwrap().len(), 2);
        admin.set_account_status(crate::domain::entities::AccountStatus::Suspended, None);
        repo.save_status(&admin).await.unwrap();
        assert_eq!(repo.admin_emails().await.unwrap(), vec!["boss@example.com".to_string()]);
        assert_eq!(repo.count_admins().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_session_revocation() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let user = UserRepository::new(&mut conn)
            .create(new_user("ravi", "9", Role::Buyer))
            .await
            .unwrap();

        let mut tokens = AuthTokenRepository::new(&mut conn);
        let now = Utc::now();
        tokens.insert("digest", user.id, now, now + Duration::hours(1)).await.unwrap();
        assert!(tokens.get("digest").await.unwrap().unwrap().revoked_at.is_none());
        assert!(tokens.revoke("digest", now).await.unwrap());
        assert!(!tokens.revoke("digest", now).await.unwrap());
        assert!(tokens.get("digest").await.unwrap().unwrap().revoked_at.is_some());

        for digest in ["current", "laptop", "phone"] {
            tokens.insert(digest, user.id, now, now + Duration::hours(1)).await.unwrap();
        }
        assert_eq!(tokens.revoke_others(user.id, "current", now).await.unwrap(), 2);
        assert!(tokens.get("current").await.unwrap().unwrap().revoked_at.is_none());
        assert!(tokens.get("phone").await.unwrap().unwrap().revoked_at.is_some());
    }

    #[tokio::test]
    async fn test_profile_and_password_updates() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = UserRepository::new(&mut conn);

        let mut user = repo.create(new_user("ravi", "9000000001", Role::Buyer)).await.unwrap();
        user.mobile = "9000000002".into();
        user.company_name = Some("Ravi Pulses".into());
        user.role = Role::SellerAndBuyer;
        repo.save_profile(&user).await.unwrap();

        let (stored, hash) = repo.find_for_login("9000000002").await.unwrap().unwrap();
        assert_eq!(stored.company_name.as_deref(), Some("Ravi Pulses"));
        assert_eq!(stored.role, Role::SellerAndBuyer);
        assert_eq!(hash, "salt$hash");

        repo.save_password_hash(user.id, "new$hash", Utc::now()).await.unwrap();
        assert_eq!(repo.password_hash(user.id).await.unwrap().as_deref(), Some("new$hash"));
        assert!(repo.password_hash(user.id + 1).await.unwrap().is_none());
        assert!(repo.save_password_hash(user.id + 1, "x", Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_audit_log() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let mut audit = AuditLogRepository::new(&mut conn);

        audit
            .log(
                CreateAuditEntry::new(1, "deal_confirmed", "interest", 42)
                    .with_details(serde_json::json!({"contract_id": "CNT-1"})),
            )
            .await
            .unwrap();

        let events = audit.for_entity("interest", 42).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, "deal_confirmed");
        assert!(events[0].details.contains("CNT-1"));
    }
}
