use crate::api::error::AppError;
use crate::utils::auth::{Claims, validate_jwt};
use crate::{AppState, entities::prelude::Users};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use sea_orm::EntityTrait;
use serde::Deserialize;
use tracing::debug;

/// Query fallback for `<img src>` thumbnails. Named apart from the
/// capability `token` that `/proxy` reads.
#[derive(Deserialize)]
struct SessionQuery {
    access_token: Option<String>,
}

fn session_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string);

    bearer.or_else(|| {
        serde_urlencoded::from_str::<SessionQuery>(query.unwrap_or_default())
            .ok()
            .and_then(|q| q.access_token)
    })
}

async fn authenticate(state: &AppState, token: &str) -> Result<Claims, AppError> {
    let claims = validate_jwt(token, &state.config.jwt_secret).map_err(|e| {
        debug!("Rejected session token: {}", e);
        AppError::Unauthenticated("invalid or expired session")
    })?;

    // Tokens outlive deleted users.
    Users::find_by_id(claims.sub.as_str())
        .one(&state.db)
        .await?
        .ok_or(AppError::Unauthenticated("unknown user"))?;

    Ok(claims)
}

/// Resolves the caller's `Claims` from `Authorization: Bearer <jwt>` or
/// `?access_token=<jwt>` and stores them as a request extension.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = session_token(req.headers(), req.uri().query())
        .ok_or(AppError::Unauthenticated("missing session token"))?;
    let claims = authenticate(&state, &token).await?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
