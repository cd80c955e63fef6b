use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use booktrack_server::admin::{audit_logs, toggle_ban};
use booktrack_server::auth::handlers::{login, login_federated, logout, me, refresh, register};
use booktrack_server::{health_check, AppError, AppState, Settings};
use dotenv::dotenv;
use std::net::TcpListener;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[actix_web::main]
async fn main() -> booktrack_server::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();

    // Load configuration
    let config = Settings::new()?;
    info!("Configuration loaded successfully");

    info!(
        "Starting server at {}:{}",
        config.server.host, config.server.port
    );

    // Initialize application state
    let state = AppState::new(config.clone()).await?;
    let state = web::Data::new(state);

    // Periodically drop expired ledger rows. Expiry is enforced lazily on
    // rotation; this only keeps the table small.
    let gc_state = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            match gc_state.auth.ledger().delete_expired().await {
                Ok(removed) if removed > 0 => {
                    info!("Removed {} expired refresh token(s)", removed)
                }
                Ok(_) => {}
                Err(e) => warn!("Refresh token cleanup failed: {}", e),
            }
        }
    });

    // Create and bind TCP listener
    let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))?;

    let allowed_origins = config.allowed_origins();

    // Start HTTP server
    HttpServer::new(move || {
        // Credential-based auth needs a strict, explicit origin allow-list.
        let mut cors = Cors::default()
            .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE"])
            .allowed_headers(vec!["Authorization", "Content-Type"])
            .supports_credentials()
            .max_age(3600);
        for origin in &allowed_origins {
            cors = cors.allowed_origin(origin);
        }

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .route("/health", web::get().to(health_check))
            .route("/auth/register", web::post().to(register))
            .route("/auth/login", web::post().to(login))
            .route("/auth/login/federated", web::post().to(login_federated))
            .route("/auth/refresh", web::post().to(refresh))
            .route("/auth/logout", web::post().to(logout))
            .route("/auth/me", web::get().to(me))
            .route("/admin/users/{id}/ban", web::patch().to(toggle_ban))
            .route("/admin/audit-logs", web::get().to(audit_logs))
    })
    .listen(listener)?
    .workers(config.server.workers as usize)
    .run()
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(())
}
