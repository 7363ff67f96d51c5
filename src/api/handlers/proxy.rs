use crate::AppState;
use crate::api::error::AppError;
use crate::services::broker::CapabilityAction;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use utoipa::IntoParams;

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProxyQuery {
    /// Capability token
    pub token: Option<String>,
    /// read or download (default read)
    pub action: Option<String>,
}

/// Keep header-safe characters only
fn disposition_filename(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .filter(|c| *c != '"' && *c != '\\')
        .collect()
}

/// Stream a Drive file through a capability token. Public: the token is
/// the credential.
#[utoipa::path(
    get,
    path = "/proxy/{provider_file_id}",
    params(
        ("provider_file_id" = String, Path, description = "Drive file ID"),
        ProxyQuery
    ),
    responses(
        (status = 200, description = "File bytes, streamed"),
        (status = 401, description = "Missing, invalid, expired or consumed token"),
        (status = 403, description = "Token not valid for this file or action"),
        (status = 503, description = "Drive unavailable")
    ),
    tag = "access"
)]
pub async fn proxy_file(
    State(state): State<AppState>,
    Path(provider_file_id): Path<String>,
    Query(query): Query<ProxyQuery>,
) -> Result<Response, AppError> {
    let action = match query.action.as_deref() {
        None => CapabilityAction::Read,
        Some(raw) => raw.parse::<CapabilityAction>().map_err(AppError::BadRequest)?,
    };

    let grant = state
        .broker
        .consume(query.token.as_deref(), &provider_file_id, action)
        .await?;
    let file = state.broker.proxy(grant).await?;

    let disposition = match action {
        CapabilityAction::Download => "attachment",
        _ => "inline",
    };
    let content_disposition = format!(
        "{}; filename=\"{}\"",
        disposition,
        disposition_filename(&file.filename)
    );

    let mut response = Body::from_stream(file.body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&file.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Ok(value) = HeaderValue::from_str(&content_disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(size) = file.size {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    }
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, no-store"),
    );

    Ok(response)
}
