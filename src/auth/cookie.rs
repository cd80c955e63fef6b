use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use chrono::Utc;

use crate::auth::ledger::IssuedRefreshToken;
use crate::config::Settings;

/// Centralised attributes for the refresh cookie.
///
/// The deployed frontend lives on a different domain than the API, so the
/// cookie must survive credentialed cross-site requests: HttpOnly always,
/// Secure + SameSite=None in production, SameSite=Lax in development where
/// everything is localhost.
fn build(settings: &Settings, value: String, max_age: CookieDuration) -> Cookie<'static> {
    let mut builder = Cookie::build(settings.auth.cookie_name.clone(), value)
        .http_only(true)
        .secure(settings.is_production())
        .same_site(if settings.is_production() {
            SameSite::None
        } else {
            SameSite::Lax
        })
        .path("/")
        .max_age(max_age);

    if settings.is_production() {
        if let Some(domain) = &settings.auth.cookie_domain {
            builder = builder.domain(domain.clone());
        }
    }

    builder.finish()
}

/// Cookie carrying a freshly issued refresh bearer; Max-Age mirrors the
/// token's own expiry.
pub fn refresh_cookie(settings: &Settings, token: &IssuedRefreshToken) -> Cookie<'static> {
    let remaining = (token.expires_at - Utc::now()).num_seconds().max(0);
    build(settings, token.bearer.clone(), CookieDuration::seconds(remaining))
}

/// Clears the refresh cookie by re-issuing it empty with Max-Age 0.
pub fn clear_refresh_cookie(settings: &Settings) -> Cookie<'static> {
    build(settings, String::new(), CookieDuration::ZERO)
}
