//! Privileged admin operations on user accounts. Every mutation here is
//! recorded in the append-only audit log.

use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::auth::extract::AdminUser;
use crate::db::models::{AdminAction, PublicUser, Role};
use crate::db::store::{AuditStore, CredentialStore};
use crate::error::{AppError, DatabaseError};
use crate::AppState;

/// `PATCH /admin/users/{id}/ban`: toggle the ban flag.
///
/// Enforcement is lazy by design: existing tokens keep rotating, but every
/// authenticated request and refresh re-reads the flag, so the ban lands on
/// the target's next round trip.
pub async fn toggle_ban(
    admin: AdminUser,
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let admin = admin.0;
    let target_id = path.into_inner();

    if target_id == admin.id {
        return Err(AppError::Validation("You cannot ban yourself.".to_string()));
    }

    let target = state
        .store
        .find_user_by_id(target_id)
        .await?
        .ok_or(AppError::Database(DatabaseError::NotFound))?;

    if target.role == Role::Admin {
        return Err(AppError::Validation("Cannot ban another admin".to_string()));
    }

    let previous_status = target.is_banned;
    let updated = state.store.set_banned(target_id, !previous_status).await?;

    let action = AdminAction::new(
        admin.id,
        if updated.is_banned { "BAN_USER" } else { "UNBAN_USER" },
        Some(updated.id),
        Some(json!({ "previousStatus": previous_status })),
    );
    state.store.record_admin_action(&action).await?;

    info!(
        "Admin {} set banned={} on user {}",
        admin.id, updated.is_banned, updated.id
    );

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "data": { "user": PublicUser::from(&updated) }
    })))
}

/// `GET /admin/audit-logs`: the 50 most recent privileged actions.
pub async fn audit_logs(
    _admin: AdminUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let logs = state.store.recent_admin_actions(50).await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "results": logs.len(),
        "data": { "logs": logs }
    })))
}
