use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "auth_provider", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Local,
    Federated,
}

/// Why a ledger row was revoked. `Rotated` is the normal single-use path;
/// `ReuseDetected` marks the theft signal that collapses a lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "revocation_reason", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    Rotated,
    Expired,
    ReuseDetected,
    UserLogout,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    /// None for federated-only accounts.
    pub password_hash: Option<String>,
    pub role: Role,
    pub is_banned: bool,
    pub provider: Provider,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: String, email: String, password_hash: Option<String>, provider: Provider) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            name,
            password_hash,
            role: Role::User,
            is_banned: false,
            provider,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Client-facing projection of a user. Constructed explicitly so the
/// password hash can never be serialized by accident.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_banned: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            is_banned: user.is_banned,
            created_at: user.created_at,
        }
    }
}

/// One issued refresh token. Rows linked through `replaced_by` form the
/// rotation chain of a single login session; the key is a fingerprint of the
/// server-generated identifier, never the bearer value the client holds.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RefreshTokenRecord {
    pub token_hash: String,
    pub user_id: Uuid,
    pub created_by_ip: Option<String>,
    pub user_agent: Option<String>,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by_ip: Option<String>,
    pub revoked_reason: Option<RevocationReason>,
    pub replaced_by: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn new(
        token_hash: String,
        user_id: Uuid,
        created_by_ip: Option<String>,
        user_agent: Option<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token_hash,
            user_id,
            created_by_ip,
            user_agent,
            is_revoked: false,
            revoked_at: None,
            revoked_by_ip: None,
            revoked_reason: None,
            replaced_by: None,
            expires_at,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Append-only audit record for privileged admin actions.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AdminAction {
    pub id: Uuid,
    pub admin_id: Uuid,
    pub action: String,
    pub target_user: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl AdminAction {
    pub fn new(
        admin_id: Uuid,
        action: &str,
        target_user: Option<Uuid>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            admin_id,
            action: action.to_string(),
            target_user,
            metadata,
            created_at: Utc::now(),
        }
    }
}
