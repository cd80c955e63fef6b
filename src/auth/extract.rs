//! Authorization gate: typed request extractors resolving the caller from
//! the bearer access token, plus role gating for privileged routes.

use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use futures::future::LocalBoxFuture;

use crate::auth::ledger::ClientMeta;
use crate::db::models::{Role, User};
use crate::error::{AppError, AuthError};
use crate::AppState;

/// The access token travels only in the Authorization header, never in a
/// cookie.
fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Request metadata recorded against ledger writes.
pub fn client_meta(req: &HttpRequest) -> ClientMeta {
    ClientMeta {
        ip: req
            .connection_info()
            .realip_remote_addr()
            .map(str::to_string),
        user_agent: req
            .headers()
            .get("User-Agent")
            .and_then(|h| h.to_str().ok())
            .map(str::to_string),
    }
}

async fn resolve_user(req: HttpRequest) -> Result<User, AppError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .cloned()
        .ok_or_else(|| AppError::Internal("Application state not configured".to_string()))?;

    let token = bearer_token(&req).ok_or(AuthError::Unauthenticated)?;
    state.auth.authenticate_access(&token).await
}

/// Extractor for routes that require a logged-in caller. Fails 401 when the
/// token is absent/invalid or the account vanished, 403 when it is banned.
pub struct AuthenticatedUser(pub User);

impl FromRequest for AuthenticatedUser {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let req = req.clone();
        Box::pin(async move { resolve_user(req).await.map(AuthenticatedUser) })
    }
}

/// Extractor for routes that adapt to an optional caller. Never fails: a
/// missing, invalid or banned identity simply yields `None`; banned users
/// browse such routes as anonymous visitors.
pub struct MaybeUser(pub Option<User>);

impl FromRequest for MaybeUser {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let req = req.clone();
        Box::pin(async move { Ok(MaybeUser(resolve_user(req).await.ok())) })
    }
}

/// Role gate for an already-resolved caller.
pub fn require_role(user: &User, allowed: &[Role]) -> Result<(), AppError> {
    if allowed.contains(&user.role) {
        Ok(())
    } else {
        Err(AuthError::Forbidden.into())
    }
}

/// Extractor for admin-only routes: `AuthenticatedUser` plus the admin role.
pub struct AdminUser(pub User);

impl FromRequest for AdminUser {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let req = req.clone();
        Box::pin(async move {
            let user = resolve_user(req).await?;
            require_role(&user, &[Role::Admin])?;
            Ok(AdminUser(user))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::db::models::Provider;

    fn user_with_role(role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            email: "u@example.com".to_string(),
            name: "U".to_string(),
            password_hash: None,
            role,
            is_banned: false,
            provider: Provider::Local,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_bearer_token_extraction() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer abc.def.ghi"))
            .to_http_request();
        assert_eq!(bearer_token(&req), Some("abc.def.ghi".to_string()));

        let req = TestRequest::default()
            .insert_header(("Authorization", "Basic abc"))
            .to_http_request();
        assert_eq!(bearer_token(&req), None);

        let req = TestRequest::default().to_http_request();
        assert_eq!(bearer_token(&req), None);
    }

    #[test]
    fn test_require_role() {
        let admin = user_with_role(Role::Admin);
        let user = user_with_role(Role::User);

        assert!(require_role(&admin, &[Role::Admin]).is_ok());
        assert!(require_role(&user, &[Role::User, Role::Admin]).is_ok());

        let err = require_role(&user, &[Role::Admin]).unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::Forbidden)));
    }
}
