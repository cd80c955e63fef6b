use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::auth::cookie::{clear_refresh_cookie, refresh_cookie};
use crate::auth::extract::{client_meta, AuthenticatedUser};
use crate::auth::service::AuthSession;
use crate::db::models::PublicUser;
use crate::error::{AppError, AuthError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct FederatedLoginRequest {
    pub credential: String,
}

fn validate_registration(body: &RegisterRequest) -> Result<(), AppError> {
    if body.name.trim().is_empty() {
        return Err(AppError::Validation("Name is required".to_string()));
    }
    if !body.email.contains('@') {
        return Err(AppError::Validation("Valid email is required".to_string()));
    }
    if body.password.len() < 6 {
        return Err(AppError::Validation(
            "Password must be at least 6 characters".to_string(),
        ));
    }
    Ok(())
}

fn session_response(state: &AppState, session: AuthSession) -> HttpResponse {
    let (mut builder, message) = if session.created {
        (HttpResponse::Created(), "Registration successful.")
    } else {
        (HttpResponse::Ok(), "Login successful.")
    };

    builder
        .cookie(refresh_cookie(&state.config, &session.refresh))
        .json(json!({
            "status": "success",
            "message": message,
            "data": {
                "user": session.user,
                "accessToken": session.access_token,
                "expiresIn": session.expires_in,
            }
        }))
}

pub async fn register(
    req: HttpRequest,
    body: web::Json<RegisterRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!("Received registration request for email: {}", body.email);
    validate_registration(&body)?;

    let meta = client_meta(&req);
    match state
        .auth
        .register(body.name.trim(), &body.email, &body.password, &meta)
        .await
    {
        Ok(session) => Ok(session_response(&state, session)),
        Err(e) => {
            error!("Registration failed for email: {}: {}", body.email, e);
            Err(e)
        }
    }
}

pub async fn login(
    req: HttpRequest,
    body: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!("Received login request for email: {}", body.email);

    let meta = client_meta(&req);
    match state.auth.login(&body.email, &body.password, &meta).await {
        Ok(session) => Ok(session_response(&state, session)),
        Err(e) => {
            error!("Login failed for email: {}: {}", body.email, e);
            Err(e)
        }
    }
}

pub async fn login_federated(
    req: HttpRequest,
    body: web::Json<FederatedLoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!("Received federated login request");

    let meta = client_meta(&req);
    match state.auth.login_federated(&body.credential, &meta).await {
        Ok(session) => Ok(session_response(&state, session)),
        Err(e) => {
            error!("Federated login failed: {}", e);
            Err(e)
        }
    }
}

/// Exchange the refresh cookie for a new token pair. Every failure after a
/// cookie was presented clears it; reuse detection, expiry, ban and plain
/// invalidity all force a fresh login.
pub async fn refresh(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let bearer = req
        .cookie(&state.config.auth.cookie_name)
        .map(|c| c.value().to_string());

    let bearer = match bearer {
        Some(value) => value,
        None => {
            let (status, body) = AppError::from(AuthError::NoRefreshToken).client_payload();
            return HttpResponse::build(status).json(body);
        }
    };

    let meta = client_meta(&req);
    match state.auth.refresh(&bearer, &meta).await {
        Ok(session) => HttpResponse::Ok()
            .cookie(refresh_cookie(&state.config, &session.refresh))
            .json(json!({
                "status": "success",
                "message": "Token refreshed.",
                "data": {
                    "accessToken": session.access_token,
                    "expiresIn": session.expires_in,
                }
            })),
        Err(e) => {
            warn!("Refresh failed: {}", e);
            let (status, body) = e.client_payload();
            HttpResponse::build(status)
                .cookie(clear_refresh_cookie(&state.config))
                .json(body)
        }
    }
}

/// Logout always clears the cookie, whether or not the presented token could
/// be attributed to a user.
pub async fn logout(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let bearer = req
        .cookie(&state.config.auth.cookie_name)
        .map(|c| c.value().to_string());
    let meta = client_meta(&req);

    match state.auth.logout(bearer.as_deref(), &meta).await {
        Ok(()) => HttpResponse::Ok()
            .cookie(clear_refresh_cookie(&state.config))
            .json(json!({
                "status": "success",
                "message": "Logged out successfully.",
            })),
        Err(e) => {
            error!("Logout failed: {}", e);
            let (status, body) = e.client_payload();
            HttpResponse::build(status)
                .cookie(clear_refresh_cookie(&state.config))
                .json(body)
        }
    }
}

pub async fn me(user: AuthenticatedUser) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "data": { "user": PublicUser::from(&user.0) }
    })))
}
