use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::Settings;
use crate::error::{AppError, AuthError};

const KEY_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kid: String,
    n: String,
    e: String,
}

#[derive(Debug, Deserialize)]
struct FederatedClaims {
    email: Option<String>,
    name: Option<String>,
}

/// Identity asserted by a verified federated ID token.
#[derive(Debug, Clone)]
pub struct FederatedIdentity {
    pub email: String,
    pub name: Option<String>,
}

struct CachedKeys {
    keys: Vec<Jwk>,
    fetched_at: Instant,
}

/// Verifies federated ID tokens against the identity provider's published
/// key set. Keys are fetched over HTTPS and cached; a token naming an
/// unknown key forces one refetch before it is rejected.
pub struct FederatedVerifier {
    client_id: Option<String>,
    issuers: Vec<String>,
    jwks_url: String,
    http: reqwest::Client,
    cache: RwLock<Option<CachedKeys>>,
}

impl FederatedVerifier {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            client_id: settings.federated.client_id.clone(),
            issuers: settings
                .federated
                .issuers
                .split(',')
                .map(|i| i.trim().to_string())
                .filter(|i| !i.is_empty())
                .collect(),
            jwks_url: settings.federated.jwks_url.clone(),
            http: reqwest::Client::new(),
            cache: RwLock::new(None),
        }
    }

    /// Verify an assertion: RS256 signature against the provider key set,
    /// expected audience and issuer, and a present email claim.
    pub async fn verify(&self, assertion: &str) -> Result<FederatedIdentity, AppError> {
        let client_id = self
            .client_id
            .as_ref()
            .ok_or(AuthError::IdentityProviderUnavailable)?;

        let header =
            decode_header(assertion).map_err(|_| AuthError::InvalidFederatedToken)?;
        let kid = header.kid.ok_or(AuthError::InvalidFederatedToken)?;

        let jwk = self.key_for(&kid).await?;
        let decoding_key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|_| AuthError::InvalidFederatedToken)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[client_id]);
        validation.set_issuer(&self.issuers);

        let data = decode::<FederatedClaims>(assertion, &decoding_key, &validation)
            .map_err(|e| {
                warn!("Federated token verification failed: {}", e);
                AuthError::InvalidFederatedToken
            })?;

        let email = data
            .claims
            .email
            .filter(|e| !e.is_empty())
            .ok_or(AuthError::InvalidFederatedToken)?;

        Ok(FederatedIdentity {
            email,
            name: data.claims.name,
        })
    }

    async fn key_for(&self, kid: &str) -> Result<Jwk, AppError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < KEY_CACHE_TTL {
                    if let Some(jwk) = cached.keys.iter().find(|k| k.kid == kid) {
                        return Ok(jwk.clone());
                    }
                }
            }
        }

        // Cache miss or rotated provider keys: refetch once.
        let keys = self.fetch_keys().await?;
        let jwk = keys.iter().find(|k| k.kid == kid).cloned();

        let mut cache = self.cache.write().await;
        *cache = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });

        jwk.ok_or_else(|| AuthError::InvalidFederatedToken.into())
    }

    async fn fetch_keys(&self) -> Result<Vec<Jwk>, AppError> {
        let set: JwkSet = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to fetch provider keys: {}", e)))?
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Invalid provider key set: {}", e)))?;

        Ok(set.keys)
    }
}
