pub mod admin;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;

use actix_web::HttpResponse;
use std::sync::Arc;
use std::time::Duration;

pub use config::Settings;
pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;

pub use auth::{AuthService, AuthenticatedUser, MaybeUser};
pub use db::{MemoryStore, PgStore, PublicUser, Store, User};

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub store: Arc<dyn Store>,
    pub auth: Arc<AuthService>,
}

impl AppState {
    /// Connect to Postgres, run migrations and assemble the service graph.
    pub async fn new(config: Settings) -> Result<Self> {
        let store = PgStore::new_with_options(
            &config.database.url,
            config.database.max_connections,
            Duration::from_secs(5),
        )
        .await?;
        store.migrate().await?;

        Self::with_store(config, Arc::new(store))
    }

    /// Assemble the state over any store implementation. Tests and DB-less
    /// development use this with `MemoryStore`.
    pub fn with_store(config: Settings, store: Arc<dyn Store>) -> Result<Self> {
        let auth = Arc::new(AuthService::new(store.clone(), &config)?);

        Ok(Self {
            config: Arc::new(config),
            store,
            auth,
        })
    }
}
