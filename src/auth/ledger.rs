use base64::{engine::general_purpose, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::token::RefreshTokenCodec;
use crate::db::models::{RefreshTokenRecord, RevocationReason};
use crate::db::store::{RefreshTokenStore, Store};
use crate::error::AppError;

const TOKEN_ID_BYTES: usize = 40;

/// Request metadata recorded against ledger rows.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// A freshly issued refresh token, ready for cookie delivery.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub bearer: String,
    pub expires_at: DateTime<Utc>,
    pub(crate) token_hash: String,
}

/// Outcome of presenting a bearer value for rotation.
///
/// `Reused` is the theft signal: the identifier was valid once but has
/// already been consumed (or never existed for this user), so the whole
/// lineage has been revoked by the time the caller sees it. `Invalid` is a
/// bearer that never verified at all and deliberately does NOT revoke
/// anything: a garbled cookie must not become a mass-revocation lever.
#[derive(Debug)]
pub enum Rotation {
    Rotated {
        token: IssuedRefreshToken,
        user_id: Uuid,
    },
    Reused {
        user_id: Uuid,
    },
    Expired,
    Invalid,
}

fn generate_token_id() -> String {
    let mut bytes = [0u8; TOKEN_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// At-rest fingerprint of a token identifier; the raw identifier never
/// touches the ledger.
fn fingerprint(token_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token_id.as_bytes());
    general_purpose::STANDARD.encode(hasher.finalize())
}

/// Persistent ledger of refresh tokens: one row per issued token, chained by
/// `replaced_by` into session lineages, rotated single-use.
pub struct RefreshTokenLedger {
    store: Arc<dyn Store>,
    codec: RefreshTokenCodec,
}

impl RefreshTokenLedger {
    pub fn new(store: Arc<dyn Store>, codec: RefreshTokenCodec) -> Self {
        Self { store, codec }
    }

    /// Mint a new refresh token for a user: persist the ledger row, then wrap
    /// the identifier into a signed bearer value.
    pub async fn create_token(
        &self,
        user_id: Uuid,
        meta: &ClientMeta,
    ) -> Result<IssuedRefreshToken, AppError> {
        let token_id = generate_token_id();
        let token_hash = fingerprint(&token_id);
        let expires_at = Utc::now() + self.codec.expiry();

        let record = RefreshTokenRecord::new(
            token_hash.clone(),
            user_id,
            meta.ip.clone(),
            meta.user_agent.clone(),
            expires_at,
        );
        self.store.insert_refresh_token(&record).await?;

        let bearer = self.codec.encode(user_id, &token_id, expires_at)?;

        Ok(IssuedRefreshToken {
            bearer,
            expires_at,
            token_hash,
        })
    }

    /// Rotate a presented bearer value.
    ///
    /// The old record is claimed through a conditional revoke before the
    /// successor is minted, so two concurrent presentations of the same
    /// identifier cannot both succeed; the loser falls through to the reuse
    /// branch.
    pub async fn rotate_token(&self, bearer: &str, meta: &ClientMeta) -> Result<Rotation, AppError> {
        let (user_id, token_id) = match self.codec.decode(bearer) {
            Ok(decoded) => decoded,
            Err(_) => return Ok(Rotation::Invalid),
        };
        let token_hash = fingerprint(&token_id);

        let record = self.store.find_refresh_token(&token_hash).await?;

        let record = match record {
            Some(r) if r.user_id == user_id && !r.is_revoked => r,
            _ => {
                // Valid signature but the ledger row is gone, revoked, or
                // belongs to someone else: the identifier was already
                // consumed. Collapse every active session of this user.
                return self.handle_reuse(user_id, meta).await;
            }
        };

        if record.is_expired() {
            self.store
                .revoke_if_active(&token_hash, RevocationReason::Expired, meta.ip.as_deref())
                .await?;
            info!("Refresh token expired for user {}", user_id);
            return Ok(Rotation::Expired);
        }

        let won = self
            .store
            .revoke_if_active(&token_hash, RevocationReason::Rotated, meta.ip.as_deref())
            .await?;
        if !won {
            // A concurrent rotation consumed this identifier first.
            return self.handle_reuse(user_id, meta).await;
        }

        let token = self.create_token(user_id, meta).await?;
        self.store.mark_replaced(&token_hash, &token.token_hash).await?;

        Ok(Rotation::Rotated { token, user_id })
    }

    async fn handle_reuse(&self, user_id: Uuid, meta: &ClientMeta) -> Result<Rotation, AppError> {
        let revoked = self
            .revoke_by_user_id(user_id, RevocationReason::ReuseDetected, meta)
            .await?;
        warn!(
            "Refresh token reuse detected for user {}; revoked {} active token(s)",
            user_id, revoked
        );
        Ok(Rotation::Reused { user_id })
    }

    /// Revoke every non-revoked token belonging to a user. Used on logout
    /// and theft detection.
    pub async fn revoke_by_user_id(
        &self,
        user_id: Uuid,
        reason: RevocationReason,
        meta: &ClientMeta,
    ) -> Result<u64, AppError> {
        self.store
            .revoke_all_for_user(user_id, reason, meta.ip.as_deref())
            .await
    }

    /// Best-effort owner lookup for logout bookkeeping. Never touches the
    /// ledger; `None` means the bearer could not be attributed.
    pub fn user_id_from_token(&self, bearer: &str) -> Option<Uuid> {
        self.codec.decode_owner(bearer)
    }

    /// Drop rows past their expiry. Correctness never depends on this;
    /// expiry is enforced lazily during rotation.
    pub async fn delete_expired(&self) -> Result<u64, AppError> {
        self.store.delete_expired_tokens().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    fn ledger() -> RefreshTokenLedger {
        let store = Arc::new(MemoryStore::new());
        RefreshTokenLedger::new(
            store,
            RefreshTokenCodec::new("test_refresh_secret".to_string(), 7),
        )
    }

    #[tokio::test]
    async fn test_rotation_invalidates_predecessor() {
        let ledger = ledger();
        let user_id = Uuid::new_v4();
        let meta = ClientMeta::default();

        let first = ledger.create_token(user_id, &meta).await.unwrap();

        let rotated = ledger.rotate_token(&first.bearer, &meta).await.unwrap();
        assert!(matches!(rotated, Rotation::Rotated { .. }));

        // Presenting the consumed bearer again is the reuse signal.
        let replay = ledger.rotate_token(&first.bearer, &meta).await.unwrap();
        assert!(matches!(replay, Rotation::Reused { user_id: u } if u == user_id));
    }

    #[tokio::test]
    async fn test_garbled_bearer_is_invalid_not_reuse() {
        let ledger = ledger();
        let user_id = Uuid::new_v4();
        let meta = ClientMeta::default();

        let token = ledger.create_token(user_id, &meta).await.unwrap();

        let outcome = ledger.rotate_token("garbage.cookie.value", &meta).await.unwrap();
        assert!(matches!(outcome, Rotation::Invalid));

        // The legitimate token must still rotate: no collateral revocation.
        let rotated = ledger.rotate_token(&token.bearer, &meta).await.unwrap();
        assert!(matches!(rotated, Rotation::Rotated { .. }));
    }

    #[tokio::test]
    async fn test_reuse_collapses_every_active_token() {
        let ledger = ledger();
        let user_id = Uuid::new_v4();
        let meta = ClientMeta::default();

        let device_a = ledger.create_token(user_id, &meta).await.unwrap();
        let device_b = ledger.create_token(user_id, &meta).await.unwrap();

        let rotated = ledger.rotate_token(&device_a.bearer, &meta).await.unwrap();
        let successor = match rotated {
            Rotation::Rotated { token, .. } => token,
            other => panic!("expected rotation, got {:?}", other),
        };

        // Replaying the consumed token collapses the lineage.
        let replay = ledger.rotate_token(&device_a.bearer, &meta).await.unwrap();
        assert!(matches!(replay, Rotation::Reused { .. }));

        // Both the other device's token and the fresh successor are dead now.
        let b_outcome = ledger.rotate_token(&device_b.bearer, &meta).await.unwrap();
        assert!(matches!(b_outcome, Rotation::Reused { .. }));
        let successor_outcome = ledger.rotate_token(&successor.bearer, &meta).await.unwrap();
        assert!(matches!(successor_outcome, Rotation::Reused { .. }));
    }

    #[tokio::test]
    async fn test_expired_record_yields_expired() {
        let store = Arc::new(MemoryStore::new());
        let codec = RefreshTokenCodec::new("test_refresh_secret".to_string(), 7);
        let ledger = RefreshTokenLedger::new(store.clone(), codec);
        let user_id = Uuid::new_v4();
        let meta = ClientMeta::default();

        let token = ledger.create_token(user_id, &meta).await.unwrap();

        // Backdate the stored row past expiry while the bearer stays valid.
        {
            let record = store
                .find_refresh_token(&token.token_hash)
                .await
                .unwrap()
                .unwrap();
            let mut stale = record.clone();
            stale.expires_at = Utc::now() - chrono::Duration::seconds(5);
            store.insert_refresh_token(&stale).await.unwrap();
        }

        let outcome = ledger.rotate_token(&token.bearer, &meta).await.unwrap();
        assert!(matches!(outcome, Rotation::Expired));

        let record = store
            .find_refresh_token(&token.token_hash)
            .await
            .unwrap()
            .unwrap();
        assert!(record.is_revoked);
        assert_eq!(record.revoked_reason, Some(RevocationReason::Expired));
    }

    #[tokio::test]
    async fn test_rotation_links_successor() {
        let ledger = ledger();
        let user_id = Uuid::new_v4();
        let meta = ClientMeta {
            ip: Some("203.0.113.7".to_string()),
            user_agent: Some("test-agent".to_string()),
        };

        let first = ledger.create_token(user_id, &meta).await.unwrap();
        let rotated = ledger.rotate_token(&first.bearer, &meta).await.unwrap();

        let successor = match rotated {
            Rotation::Rotated { token, .. } => token,
            other => panic!("expected rotation, got {:?}", other),
        };

        let old = ledger
            .store
            .find_refresh_token(&first.token_hash)
            .await
            .unwrap()
            .unwrap();
        assert!(old.is_revoked);
        assert_eq!(old.revoked_reason, Some(RevocationReason::Rotated));
        assert_eq!(old.replaced_by.as_deref(), Some(successor.token_hash.as_str()));
        assert_eq!(old.revoked_by_ip.as_deref(), Some("203.0.113.7"));
    }
}
