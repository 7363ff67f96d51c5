use crate::AppState;
use crate::api::error::AppError;
use crate::services::audit::{AuditAction, AuditEntry};
use crate::services::errors::AccessError;
use crate::services::permissions::Action;
use crate::services::thumbnails::{RasterGenerator, RasterOrigin, Thumbnail, ThumbnailSize};
use crate::utils::auth::Claims;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ThumbnailQuery {
    /// small, medium or large (default small)
    pub size: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct InvalidateResponse {
    pub removed: u64,
}

#[utoipa::path(
    get,
    path = "/assets/{id}/thumbnail",
    params(("id" = String, Path, description = "Asset ID"), ThumbnailQuery),
    responses(
        (status = 200, description = "PNG preview"),
        (status = 404, description = "No thumbnail for this type (body names an icon)")
    ),
    security(("jwt" = [])),
    tag = "thumbnails"
)]
pub async fn get_thumbnail(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(asset_id): Path<String>,
    Query(query): Query<ThumbnailQuery>,
) -> Result<Response, AppError> {
    let size = match query.size.as_deref() {
        None => ThumbnailSize::default(),
        Some(raw) => raw.parse::<ThumbnailSize>().map_err(AppError::BadRequest)?,
    };

    let asset = match state
        .directory
        .authorize(&claims.sub, &asset_id, Action::Read)
        .await
    {
        Ok(asset) => asset,
        Err(e) => {
            state
                .audit
                .record(
                    AuditEntry::failure(AuditAction::ThumbnailRead, e.code())
                        .user(claims.sub.as_str())
                        .metadata(serde_json::json!({ "asset_id": asset_id })),
                )
                .await;
            return Err(e.into());
        }
    };

    let origin = match (&asset.storage_key, &asset.provider_file_id) {
        (Some(key), _) => RasterOrigin::Local {
            storage: state.storage.clone(),
            key: key.clone(),
        },
        (None, Some(provider_file_id)) => RasterOrigin::Drive {
            broker: state.broker.clone(),
            user_id: claims.sub.clone(),
            provider_file_id: provider_file_id.clone(),
        },
        (None, None) => {
            return Err(AccessError::NoThumbnail { icon: "file" }.into());
        }
    };
    let generator = RasterGenerator::new(asset.mime_type.clone(), origin);

    let thumbnail = state
        .thumbnails
        .get_or_generate(&asset.id, size, &asset.source_version, &generator)
        .await?;

    match thumbnail {
        Thumbnail::Image {
            bytes,
            content_type,
            ..
        } => Ok((
            [
                (header::CONTENT_TYPE, content_type),
                (
                    header::CACHE_CONTROL,
                    "private, max-age=86400".to_string(),
                ),
            ],
            bytes,
        )
            .into_response()),
        Thumbnail::Icon(icon) => Err(AccessError::NoThumbnail { icon }.into()),
    }
}

#[utoipa::path(
    delete,
    path = "/assets/{id}/thumbnail",
    params(("id" = String, Path, description = "Asset ID")),
    responses(
        (status = 200, description = "Cached previews removed", body = InvalidateResponse),
        (status = 403, description = "Permission denied")
    ),
    security(("jwt" = [])),
    tag = "thumbnails"
)]
pub async fn invalidate_thumbnail(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(asset_id): Path<String>,
) -> Result<Json<InvalidateResponse>, AppError> {
    state
        .directory
        .authorize(&claims.sub, &asset_id, Action::Write)
        .await?;

    let removed = state.thumbnails.invalidate(&asset_id).await?;
    Ok(Json(InvalidateResponse { removed }))
}
