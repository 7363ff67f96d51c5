use crate::AppState;
use crate::api::error::AppError;
use crate::services::broker::CapabilityAction;
use crate::utils::auth::Claims;
use axum::{
    Extension, Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct IssueCapabilityRequest {
    /// read, download or thumbnail
    #[schema(value_type = String)]
    pub action: CapabilityAction,
    /// Clamped to 60..=900 seconds
    pub ttl_seconds: Option<i64>,
}

#[derive(Serialize, ToSchema)]
pub struct CapabilityResponse {
    pub token: String,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[utoipa::path(
    post,
    path = "/assets/{id}/capabilities",
    request_body = IssueCapabilityRequest,
    params(("id" = String, Path, description = "Asset ID")),
    responses(
        (status = 200, description = "Capability issued", body = CapabilityResponse),
        (status = 403, description = "Permission denied"),
        (status = 404, description = "Asset not found")
    ),
    security(("jwt" = [])),
    tag = "access"
)]
pub async fn issue_capability(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(asset_id): Path<String>,
    Json(payload): Json<IssueCapabilityRequest>,
) -> Result<Json<CapabilityResponse>, AppError> {
    let ttl = payload
        .ttl_seconds
        .unwrap_or(state.config.capability_default_ttl_secs);

    let capability = state
        .broker
        .issue_for_asset(&claims.sub, &asset_id, payload.action, ttl)
        .await?;

    let url = format!(
        "/proxy/{}?{}",
        capability.provider_file_id,
        serde_urlencoded::to_string([
            ("token", capability.token.as_str()),
            ("action", payload.action.as_str()),
        ])
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    );

    Ok(Json(CapabilityResponse {
        token: capability.token,
        url,
        expires_at: capability.expires_at,
    }))
}
