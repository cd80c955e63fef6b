//! In-memory store used by the test suites and DB-less development.
//!
//! Mirrors the Postgres semantics that matter to the auth core: duplicate
//! emails are rejected case-insensitively and `revoke_if_active` admits a
//! single winner per token identifier.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::{AdminAction, RefreshTokenRecord, RevocationReason, User};
use crate::db::store::{AuditStore, CredentialStore, RefreshTokenStore};
use crate::error::{AppError, AuthError, DatabaseError};

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, User>>,
    tokens: RwLock<HashMap<String, RefreshTokenRecord>>,
    actions: RwLock<Vec<AdminAction>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<User, AppError> {
        let mut users = self.users.write().await;
        let collision = users
            .values()
            .any(|u| u.email.to_lowercase() == user.email.to_lowercase());
        if collision {
            return Err(AppError::Auth(AuthError::DuplicateEmail));
        }
        users.insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.email.to_lowercase() == email.to_lowercase())
            .cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn set_banned(&self, id: Uuid, banned: bool) -> Result<User, AppError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or(AppError::Database(DatabaseError::NotFound))?;
        user.is_banned = banned;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), AppError> {
        self.tokens
            .write()
            .await
            .insert(record.token_hash.clone(), record.clone());
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, AppError> {
        Ok(self.tokens.read().await.get(token_hash).cloned())
    }

    async fn revoke_if_active(
        &self,
        token_hash: &str,
        reason: RevocationReason,
        ip: Option<&str>,
    ) -> Result<bool, AppError> {
        let mut tokens = self.tokens.write().await;
        match tokens.get_mut(token_hash) {
            Some(record) if !record.is_revoked => {
                record.is_revoked = true;
                record.revoked_at = Some(Utc::now());
                record.revoked_by_ip = ip.map(str::to_string);
                record.revoked_reason = Some(reason);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_replaced(&self, token_hash: &str, successor_hash: &str) -> Result<(), AppError> {
        let mut tokens = self.tokens.write().await;
        if let Some(record) = tokens.get_mut(token_hash) {
            record.replaced_by = Some(successor_hash.to_string());
        }
        Ok(())
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        reason: RevocationReason,
        ip: Option<&str>,
    ) -> Result<u64, AppError> {
        let mut tokens = self.tokens.write().await;
        let mut revoked = 0;
        for record in tokens.values_mut() {
            if record.user_id == user_id && !record.is_revoked {
                record.is_revoked = true;
                record.revoked_at = Some(Utc::now());
                record.revoked_by_ip = ip.map(str::to_string);
                record.revoked_reason = Some(reason);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn delete_expired_tokens(&self) -> Result<u64, AppError> {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        let now = Utc::now();
        tokens.retain(|_, record| record.expires_at >= now);
        Ok((before - tokens.len()) as u64)
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn record_admin_action(&self, action: &AdminAction) -> Result<(), AppError> {
        self.actions.write().await.push(action.clone());
        Ok(())
    }

    async fn recent_admin_actions(&self, limit: i64) -> Result<Vec<AdminAction>, AppError> {
        let actions = self.actions.read().await;
        let mut recent: Vec<AdminAction> = actions.clone();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(limit as usize);
        Ok(recent)
    }
}
