use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::models::{AdminAction, RefreshTokenRecord, RevocationReason, User};
use crate::error::{AppError, AuthError, DatabaseError};

/// Identity persistence. Email uniqueness is case-insensitive; `insert_user`
/// surfaces a collision as `DuplicateEmail`.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn insert_user(&self, user: &User) -> Result<User, AppError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;
    async fn set_banned(&self, id: Uuid, banned: bool) -> Result<User, AppError>;
}

/// Refresh token ledger rows. `revoke_if_active` is the single conditional
/// update that decides rotation races: exactly one caller per identifier
/// observes `true`.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), AppError>;
    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, AppError>;
    async fn revoke_if_active(
        &self,
        token_hash: &str,
        reason: RevocationReason,
        ip: Option<&str>,
    ) -> Result<bool, AppError>;
    async fn mark_replaced(&self, token_hash: &str, successor_hash: &str) -> Result<(), AppError>;
    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        reason: RevocationReason,
        ip: Option<&str>,
    ) -> Result<u64, AppError>;
    async fn delete_expired_tokens(&self) -> Result<u64, AppError>;
}

/// Append-only audit log of privileged actions.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn record_admin_action(&self, action: &AdminAction) -> Result<(), AppError>;
    async fn recent_admin_actions(&self, limit: i64) -> Result<Vec<AdminAction>, AppError>;
}

pub trait Store: CredentialStore + RefreshTokenStore + AuditStore {}

impl<T: CredentialStore + RefreshTokenStore + AuditStore> Store for T {}

pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn new_with_options(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::ConnectionError(e.to_string())))?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(|e| AppError::Database(DatabaseError::QueryError(e.to_string())))?;
        Ok(())
    }
}

fn map_unique_violation(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return AppError::Auth(AuthError::DuplicateEmail);
        }
    }
    err.into()
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn insert_user(&self, user: &User) -> Result<User, AppError> {
        let created = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, name, password_hash, role, is_banned, provider, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.is_banned)
        .bind(user.provider)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(map_unique_violation)?;

        Ok(created)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(user)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(user)
    }

    async fn set_banned(&self, id: Uuid, banned: bool) -> Result<User, AppError> {
        let user = sqlx::query_as::<_, User>(
            "UPDATE users SET is_banned = $2, updated_at = $3 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(banned)
        .bind(Utc::now())
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or(AppError::Database(DatabaseError::NotFound))?;

        Ok(user)
    }
}

#[async_trait]
impl RefreshTokenStore for PgStore {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens
                (token_hash, user_id, created_by_ip, user_agent, is_revoked, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&record.token_hash)
        .bind(record.user_id)
        .bind(&record.created_by_ip)
        .bind(&record.user_agent)
        .bind(record.is_revoked)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, AppError> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            "SELECT * FROM refresh_tokens WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(record)
    }

    async fn revoke_if_active(
        &self,
        token_hash: &str,
        reason: RevocationReason,
        ip: Option<&str>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_revoked = TRUE, revoked_at = $2, revoked_by_ip = $3, revoked_reason = $4
            WHERE token_hash = $1 AND is_revoked = FALSE
            "#,
        )
        .bind(token_hash)
        .bind(Utc::now())
        .bind(ip)
        .bind(reason)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_replaced(&self, token_hash: &str, successor_hash: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE refresh_tokens SET replaced_by = $2 WHERE token_hash = $1")
            .bind(token_hash)
            .bind(successor_hash)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        reason: RevocationReason,
        ip: Option<&str>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_revoked = TRUE, revoked_at = $2, revoked_by_ip = $3, revoked_reason = $4
            WHERE user_id = $1 AND is_revoked = FALSE
            "#,
        )
        .bind(user_id)
        .bind(Utc::now())
        .bind(ip)
        .bind(reason)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired_tokens(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
            .bind(Utc::now())
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn record_admin_action(&self, action: &AdminAction) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO admin_actions (id, admin_id, action, target_user, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(action.id)
        .bind(action.admin_id)
        .bind(&action.action)
        .bind(action.target_user)
        .bind(&action.metadata)
        .bind(action.created_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn recent_admin_actions(&self, limit: i64) -> Result<Vec<AdminAction>, AppError> {
        let actions = sqlx::query_as::<_, AdminAction>(
            "SELECT * FROM admin_actions ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(actions)
    }
}
