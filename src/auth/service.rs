use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::federated::FederatedVerifier;
use crate::auth::ledger::{ClientMeta, IssuedRefreshToken, RefreshTokenLedger, Rotation};
use crate::auth::token::{AccessTokenSigner, RefreshTokenCodec};
use crate::config::Settings;
use crate::db::models::{Provider, PublicUser, RevocationReason, User};
use crate::db::store::{CredentialStore, Store};
use crate::error::{AppError, AuthError};

/// Result of a successful register/login: everything the transport layer
/// needs to answer the client and set the refresh cookie.
pub struct AuthSession {
    pub user: PublicUser,
    pub access_token: String,
    pub expires_in: i64,
    pub refresh: IssuedRefreshToken,
    /// True when the flow created the account (register, or a federated
    /// first login). Maps to 201.
    pub created: bool,
}

/// Result of a successful refresh rotation.
pub struct RefreshedSession {
    pub access_token: String,
    pub expires_in: i64,
    pub refresh: IssuedRefreshToken,
}

pub struct AuthService {
    store: Arc<dyn Store>,
    signer: AccessTokenSigner,
    ledger: RefreshTokenLedger,
    federated: FederatedVerifier,
    /// Hash verified against when no account (or no password) matches, so
    /// lookup misses cost the same as mismatches.
    fallback_hash: String,
}

impl AuthService {
    pub fn new(store: Arc<dyn Store>, settings: &Settings) -> Result<Self, AppError> {
        let signer = AccessTokenSigner::new(
            settings.auth.access_secret.clone(),
            settings.auth.access_expiry_minutes,
        );
        let codec = RefreshTokenCodec::new(
            settings.auth.refresh_secret.clone(),
            settings.auth.refresh_expiry_days,
        );
        let ledger = RefreshTokenLedger::new(store.clone(), codec);
        let federated = FederatedVerifier::from_settings(settings);

        let fallback_hash = bcrypt::hash("booktrack.fallback", bcrypt::DEFAULT_COST)
            .map_err(|e| AppError::Internal(format!("Failed to prime password hasher: {}", e)))?;

        Ok(Self {
            store,
            signer,
            ledger,
            federated,
            fallback_hash,
        })
    }

    pub fn ledger(&self) -> &RefreshTokenLedger {
        &self.ledger
    }

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        meta: &ClientMeta,
    ) -> Result<AuthSession, AppError> {
        if self.store.find_user_by_email(email).await?.is_some() {
            return Err(AuthError::DuplicateEmail.into());
        }

        let hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;

        let user = User::new(
            name.to_string(),
            email.to_string(),
            Some(hash),
            Provider::Local,
        );
        let user = self.store.insert_user(&user).await?;
        info!("Registered user {}", user.id);

        self.issue_session(user, true, meta).await
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        meta: &ClientMeta,
    ) -> Result<AuthSession, AppError> {
        let user = self.store.find_user_by_email(email).await?;

        let password_ok = self.verify_password(
            password,
            user.as_ref().and_then(|u| u.password_hash.as_deref()),
        );
        let user = match user {
            Some(user) if password_ok => user,
            _ => return Err(AuthError::InvalidCredentials.into()),
        };

        // Ban status is disclosed distinctly from bad credentials; accepted
        // trade-off so banned users get an actionable message.
        if user.is_banned {
            return Err(AuthError::AccountBanned.into());
        }

        info!("Login successful for user {}", user.id);
        self.issue_session(user, false, meta).await
    }

    /// Login with a federated ID token: verify the assertion, then find or
    /// create the account. Federated-only accounts carry no password hash.
    pub async fn login_federated(
        &self,
        assertion: &str,
        meta: &ClientMeta,
    ) -> Result<AuthSession, AppError> {
        let identity = self.federated.verify(assertion).await?;

        let (user, created) = match self.store.find_user_by_email(&identity.email).await? {
            Some(user) => (user, false),
            None => {
                let name = identity
                    .name
                    .unwrap_or_else(|| identity.email.clone());
                let user = User::new(name, identity.email, None, Provider::Federated);
                let user = self.store.insert_user(&user).await?;
                info!("Created federated user {}", user.id);
                (user, true)
            }
        };

        if user.is_banned {
            return Err(AuthError::AccountBanned.into());
        }

        self.issue_session(user, created, meta).await
    }

    /// Exchange a refresh bearer for a new token pair via ledger rotation.
    /// Every non-rotated outcome is terminal for the session: the caller
    /// clears the cookie and the client must log in again.
    pub async fn refresh(
        &self,
        bearer: &str,
        meta: &ClientMeta,
    ) -> Result<RefreshedSession, AppError> {
        match self.ledger.rotate_token(bearer, meta).await? {
            Rotation::Rotated { token, user_id } => self.finish_refresh(token, user_id).await,
            Rotation::Reused { .. } => Err(AuthError::SuspiciousActivity.into()),
            Rotation::Expired | Rotation::Invalid => Err(AuthError::InvalidRefreshToken.into()),
        }
    }

    async fn finish_refresh(
        &self,
        token: IssuedRefreshToken,
        user_id: Uuid,
    ) -> Result<RefreshedSession, AppError> {
        let user = match self.store.find_user_by_id(user_id).await? {
            Some(user) => user,
            None => {
                warn!("Refresh rotation for vanished user {}", user_id);
                return Err(AuthError::InvalidRefreshToken.into());
            }
        };

        // Ban enforcement is lazy: the row still rotates, but a banned owner
        // never receives the new pair.
        if user.is_banned {
            return Err(AuthError::AccountBanned.into());
        }

        let access_token = self.signer.issue(user.id, user.role)?;

        Ok(RefreshedSession {
            access_token,
            expires_in: self.signer.expires_in_secs(),
            refresh: token,
        })
    }

    /// Session-wide logout: revokes every active refresh token of the
    /// presenting user, not just the presented one. Decode is best-effort;
    /// an unattributable bearer just means nothing to revoke.
    pub async fn logout(&self, bearer: Option<&str>, meta: &ClientMeta) -> Result<(), AppError> {
        if let Some(user_id) = bearer.and_then(|b| self.ledger.user_id_from_token(b)) {
            let revoked = self
                .ledger
                .revoke_by_user_id(user_id, RevocationReason::UserLogout, meta)
                .await?;
            info!("Logout revoked {} token(s) for user {}", revoked, user_id);
        }
        Ok(())
    }

    /// Resolve the caller of a request from its access token: verify the
    /// signature, load the account, enforce the ban flag. Verification
    /// detail is logged server-side only.
    pub async fn authenticate_access(&self, token: &str) -> Result<User, AppError> {
        let verified = self.signer.verify(token).map_err(|e| {
            warn!("Access token rejected: {}", e);
            AuthError::Unauthenticated
        })?;

        let user = self
            .store
            .find_user_by_id(verified.id)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        if user.is_banned {
            return Err(AuthError::AccountBanned.into());
        }

        Ok(user)
    }

    fn verify_password(&self, candidate: &str, stored: Option<&str>) -> bool {
        let hash = stored.unwrap_or(&self.fallback_hash);
        let matched = bcrypt::verify(candidate, hash).unwrap_or(false);
        matched && stored.is_some()
    }

    async fn issue_session(
        &self,
        user: User,
        created: bool,
        meta: &ClientMeta,
    ) -> Result<AuthSession, AppError> {
        let access_token = self.signer.issue(user.id, user.role)?;
        let refresh = self.ledger.create_token(user.id, meta).await?;

        Ok(AuthSession {
            user: PublicUser::from(&user),
            access_token,
            expires_in: self.signer.expires_in_secs(),
            refresh,
            created,
        })
    }
}
