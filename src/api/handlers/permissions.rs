use crate::AppState;
use crate::api::error::AppError;
use crate::services::permissions::Action;
use crate::utils::auth::Claims;
use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct PermissionCheckRequest {
    pub asset_id: String,
    /// read, write, delete, share or import
    #[schema(value_type = String)]
    pub action: Action,
}

#[derive(Serialize, ToSchema)]
pub struct PermissionCheckResponse {
    pub allowed: bool,
    pub reason: Option<String>,
    /// Machine-readable reason, e.g. `not_owner`
    pub reason_kind: Option<String>,
}

/// Ask whether the caller may perform an action on an asset
#[utoipa::path(
    post,
    path = "/permissions/check",
    request_body = PermissionCheckRequest,
    responses(
        (status = 200, description = "Decision", body = PermissionCheckResponse),
        (status = 404, description = "Asset not found")
    ),
    security(("jwt" = [])),
    tag = "access"
)]
pub async fn check_permission(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<PermissionCheckRequest>,
) -> Result<Json<PermissionCheckResponse>, AppError> {
    let result = state
        .directory
        .check(&claims.sub, &payload.asset_id, payload.action)
        .await?;

    let reason_kind = result
        .reason
        .as_ref()
        .and_then(|r| serde_json::to_value(r).ok())
        .and_then(|v| v.get("kind").and_then(|k| k.as_str()).map(str::to_string));

    Ok(Json(PermissionCheckResponse {
        allowed: result.allowed,
        reason: result.reason.map(|r| r.to_string()),
        reason_kind,
    }))
}
