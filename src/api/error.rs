use crate::services::errors::AccessError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    /// No usable API session on a protected route
    #[error("Unauthenticated: {0}")]
    Unauthenticated(&'static str),
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::Access(err.into())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Access(err.into())
    }
}

/// HTTP status for each access failure
pub fn status_for(err: &AccessError) -> StatusCode {
    match err {
        AccessError::AuthRequired { .. }
        | AccessError::TokenRefreshFailed { .. }
        | AccessError::MissingToken
        | AccessError::InvalidToken
        | AccessError::TokenExpired
        | AccessError::TokenConsumed => StatusCode::UNAUTHORIZED,
        AccessError::TokenFileMismatch
        | AccessError::ActionNotPermitted
        | AccessError::PermissionDenied(_)
        | AccessError::ProviderAccessDenied => StatusCode::FORBIDDEN,
        AccessError::ProviderFileNotFound
        | AccessError::NoThumbnail { .. }
        | AccessError::AssetNotFound
        | AccessError::UserNotFound => StatusCode::NOT_FOUND,
        AccessError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        AccessError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        AccessError::CredentialDecrypt(_)
        | AccessError::Database(_)
        | AccessError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = match self {
            AppError::BadRequest(msg) => {
                let body = Json(json!({ "error": msg, "code": "INVALID_REQUEST" }));
                return (StatusCode::BAD_REQUEST, body).into_response();
            }
            AppError::Unauthenticated(reason) => {
                let body = Json(json!({ "error": reason, "code": "UNAUTHENTICATED" }));
                return (StatusCode::UNAUTHORIZED, body).into_response();
            }
            AppError::Access(err) => err,
        };

        let status = status_for(&err);
        let message = match &err {
            AccessError::CredentialDecrypt(e) => {
                tracing::error!("Credential vault cannot decrypt stored tokens: {}", e);
                "Internal Server Error".to_string()
            }
            AccessError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                "Internal Server Error".to_string()
            }
            AccessError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };

        let mut body = json!({
            "error": message,
            "code": err.code(),
        });
        match &err {
            AccessError::AuthRequired { consent_url }
            | AccessError::TokenRefreshFailed { consent_url } => {
                body["consent_url"] = json!(consent_url);
            }
            AccessError::PermissionDenied(reason) => {
                body["reason"] = json!(reason);
            }
            AccessError::NoThumbnail { icon } => {
                body["icon"] = json!(icon);
            }
            _ => {}
        }
        if err.is_retryable() {
            body["retryable"] = json!(true);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::permissions::DenyReason;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&AccessError::TokenConsumed), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&AccessError::TokenFileMismatch), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(&AccessError::PermissionDenied(DenyReason::AssetDeleted)),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&AccessError::UpstreamUnavailable("502".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&AccessError::NoThumbnail { icon: "file-pdf" }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&AccessError::InvalidRequest("x".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_body_carries_code_and_extras() {
        use http_body_util::BodyExt;

        let response = AppError::from(AccessError::AuthRequired {
            consent_url: "https://accounts.example/consent".to_string(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "AUTH_REQUIRED");
        assert_eq!(body["consent_url"], "https://accounts.example/consent");
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        use http_body_util::BodyExt;

        let response =
            AppError::from(anyhow::anyhow!("connection string postgres://secret")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(!String::from_utf8_lossy(&bytes).contains("secret"));
    }
}
