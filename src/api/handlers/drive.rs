use crate::AppState;
use crate::api::error::AppError;
use crate::services::credentials::ConnectionStatus;
use crate::utils::auth::Claims;
use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DriveCallbackParams {
    pub code: Option<String>,
    /// Signed state issued with the consent URL
    pub state: Option<String>,
    /// Set by the provider when the user declines consent
    pub error: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ConsentResponse {
    pub consent_url: String,
}

#[utoipa::path(
    get,
    path = "/drive/connect",
    responses((status = 200, description = "OAuth consent URL", body = ConsentResponse)),
    security(("jwt" = [])),
    tag = "drive"
)]
pub async fn connect_drive(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ConsentResponse>, AppError> {
    let consent_url = state.credentials.consent_url(&claims.sub)?;
    Ok(Json(ConsentResponse { consent_url }))
}

/// OAuth callback (public; the signed state identifies the user)
#[utoipa::path(
    get,
    path = "/drive/callback",
    params(DriveCallbackParams),
    responses(
        (status = 200, description = "Drive connected"),
        (status = 400, description = "Consent declined or state invalid")
    ),
    tag = "drive"
)]
pub async fn drive_callback(
    State(state): State<AppState>,
    Query(params): Query<DriveCallbackParams>,
) -> Result<Json<ConnectionStatus>, AppError> {
    if let Some(error) = params.error {
        return Err(AppError::BadRequest(format!("consent declined: {}", error)));
    }
    let (Some(code), Some(consent_state)) = (params.code, params.state) else {
        return Err(AppError::BadRequest("code and state are required".to_string()));
    };

    let user_id = state.credentials.verify_consent_state(&consent_state)?;
    state.credentials.connect(&user_id, &code).await?;

    Ok(Json(state.credentials.status(&user_id).await?))
}

#[utoipa::path(
    get,
    path = "/drive/connection",
    responses((status = 200, description = "Connection status")),
    security(("jwt" = [])),
    tag = "drive"
)]
pub async fn connection_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ConnectionStatus>, AppError> {
    Ok(Json(state.credentials.status(&claims.sub).await?))
}

/// Revoke at Drive, then forget the stored credentials
#[utoipa::path(
    delete,
    path = "/drive/connection",
    responses(
        (status = 204, description = "Disconnected"),
        (status = 503, description = "Revocation failed; credentials kept")
    ),
    security(("jwt" = [])),
    tag = "drive"
)]
pub async fn disconnect_drive(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, AppError> {
    state.credentials.disconnect(&claims.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}
