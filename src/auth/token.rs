use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::Role;
use crate::error::{AppError, AuthError};

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String, // User ID
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// Verified identity carried by an access token. No store lookup is involved
/// in producing this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedAccess {
    pub id: Uuid,
    pub role: Role,
}

/// Stateless signer/verifier for short-lived access tokens.
pub struct AccessTokenSigner {
    secret: String,
    expiry: Duration,
}

impl AccessTokenSigner {
    pub fn new(secret: String, expiry_minutes: i64) -> Self {
        Self {
            secret,
            expiry: Duration::minutes(expiry_minutes),
        }
    }

    pub fn expires_in_secs(&self) -> i64 {
        self.expiry.num_seconds()
    }

    pub fn issue(&self, user_id: Uuid, role: Role) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: user_id.to_string(),
            role,
            iat: now.timestamp(),
            exp: (now + self.expiry).timestamp(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("Failed to sign access token: {}", e)))
    }

    pub fn verify(&self, token: &str) -> Result<VerifiedAccess, AuthError> {
        let data = decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
            _ => AuthError::InvalidToken,
        })?;

        let id = Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::InvalidToken)?;

        Ok(VerifiedAccess {
            id,
            role: data.claims.role,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String, // User ID
    pub jti: String, // Ledger token identifier
    pub iat: i64,
    pub exp: i64,
}

/// Signs and opens refresh bearer values. The bearer wraps the opaque ledger
/// identifier plus the owning user id, under a secret distinct from the
/// access-token secret.
pub struct RefreshTokenCodec {
    secret: String,
    expiry: Duration,
}

impl RefreshTokenCodec {
    pub fn new(secret: String, expiry_days: i64) -> Self {
        Self {
            secret,
            expiry: Duration::days(expiry_days),
        }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    pub fn encode(
        &self,
        user_id: Uuid,
        token_id: &str,
        expires_at: chrono::DateTime<Utc>,
    ) -> Result<String, AppError> {
        let claims = RefreshClaims {
            sub: user_id.to_string(),
            jti: token_id.to_string(),
            iat: Utc::now().timestamp(),
            exp: expires_at.timestamp(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("Failed to sign refresh token: {}", e)))
    }

    /// Opens a bearer value, returning the owning user and the embedded
    /// ledger identifier. Any failure (bad signature, expired, missing or
    /// malformed claims) is a plain `InvalidRefreshToken`; a garbled bearer
    /// must never count as a reuse signal.
    pub fn decode(&self, bearer: &str) -> Result<(Uuid, String), AuthError> {
        let data = decode::<RefreshClaims>(
            bearer,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|_| AuthError::InvalidRefreshToken)?;

        if data.claims.jti.is_empty() {
            return Err(AuthError::InvalidRefreshToken);
        }

        let user_id =
            Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::InvalidRefreshToken)?;

        Ok((user_id, data.claims.jti))
    }

    /// Best-effort owner lookup for logout bookkeeping. Signature is still
    /// required; expiry is not, so logging out with a stale cookie still
    /// revokes the lineage.
    pub fn decode_owner(&self, bearer: &str) -> Option<Uuid> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;

        let data = decode::<RefreshClaims>(
            bearer,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .ok()?;

        Uuid::parse_str(&data.claims.sub).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> AccessTokenSigner {
        AccessTokenSigner::new("test_access_secret".to_string(), 15)
    }

    fn codec() -> RefreshTokenCodec {
        RefreshTokenCodec::new("test_refresh_secret".to_string(), 7)
    }

    #[test]
    fn test_access_token_round_trip() {
        let user_id = Uuid::new_v4();
        let token = signer().issue(user_id, Role::Admin).unwrap();
        let verified = signer().verify(&token).unwrap();

        assert_eq!(verified.id, user_id);
        assert_eq!(verified.role, Role::Admin);
    }

    #[test]
    fn test_access_token_rejects_tampering() {
        let token = signer().issue(Uuid::new_v4(), Role::User).unwrap();
        let mut tampered = token.clone();
        let last = if tampered.ends_with('x') { 'y' } else { 'x' };
        tampered.pop();
        tampered.push(last);

        assert_eq!(signer().verify(&tampered), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_access_token_rejects_wrong_secret() {
        let token = signer().issue(Uuid::new_v4(), Role::User).unwrap();
        let other = AccessTokenSigner::new("another_secret".to_string(), 15);

        assert_eq!(other.verify(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_access_token_expires() {
        // Expiry far enough in the past to clear the default leeway.
        let expired = AccessTokenSigner::new("test_access_secret".to_string(), -5);
        let token = expired.issue(Uuid::new_v4(), Role::User).unwrap();

        assert_eq!(signer().verify(&token), Err(AuthError::ExpiredToken));
    }

    #[test]
    fn test_refresh_bearer_round_trip() {
        let user_id = Uuid::new_v4();
        let expires_at = Utc::now() + Duration::days(7);
        let bearer = codec().encode(user_id, "token-id-1", expires_at).unwrap();

        let (decoded_user, jti) = codec().decode(&bearer).unwrap();
        assert_eq!(decoded_user, user_id);
        assert_eq!(jti, "token-id-1");
    }

    #[test]
    fn test_refresh_bearer_not_valid_as_access_token() {
        let bearer = codec()
            .encode(Uuid::new_v4(), "token-id-2", Utc::now() + Duration::days(7))
            .unwrap();

        // Different secret, different claim shape: must not verify.
        assert!(signer().verify(&bearer).is_err());
    }

    #[test]
    fn test_decode_owner_ignores_expiry() {
        let user_id = Uuid::new_v4();
        let expired_at = Utc::now() - Duration::days(1);
        let bearer = codec().encode(user_id, "token-id-3", expired_at).unwrap();

        assert!(codec().decode(&bearer).is_err());
        assert_eq!(codec().decode_owner(&bearer), Some(user_id));
    }

    #[test]
    fn test_decode_owner_requires_signature() {
        assert_eq!(codec().decode_owner("not-a-token"), None);
    }
}
