use crate::services::permissions::DenyReason;
use crate::services::providers::ProviderError;
use crate::services::vault::VaultError;
use thiserror::Error;

/// Every failure the access core surfaces to callers. Each variant maps to
/// one stable code; callers match on the variant, never on the message.
#[derive(Error, Debug)]
pub enum AccessError {
    #[error("Drive is not connected for this user")]
    AuthRequired { consent_url: String },

    #[error("Drive credentials could not be refreshed; re-consent required")]
    TokenRefreshFailed { consent_url: String },

    #[error("Access token missing")]
    MissingToken,

    #[error("Access token invalid")]
    InvalidToken,

    #[error("Access token expired")]
    TokenExpired,

    #[error("Access token already used")]
    TokenConsumed,

    #[error("Access token is bound to a different file")]
    TokenFileMismatch,

    #[error("Access token does not permit this action")]
    ActionNotPermitted,

    #[error("Permission denied: {0}")]
    PermissionDenied(DenyReason),

    #[error("File not found in Drive")]
    ProviderFileNotFound,

    #[error("Drive denied access to the file")]
    ProviderAccessDenied,

    #[error("Drive is unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("No thumbnail available")]
    NoThumbnail { icon: &'static str },

    #[error("Asset not found")]
    AssetNotFound,

    #[error("User not found")]
    UserNotFound,

    #[error("Stored credentials could not be decrypted")]
    CredentialDecrypt(#[source] VaultError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AccessError {
    pub fn code(&self) -> &'static str {
        match self {
            AccessError::AuthRequired { .. } => "AUTH_REQUIRED",
            AccessError::TokenRefreshFailed { .. } => "TOKEN_REFRESH_FAILED",
            AccessError::MissingToken => "MISSING_TOKEN",
            AccessError::InvalidToken => "INVALID_TOKEN",
            AccessError::TokenExpired => "TOKEN_EXPIRED",
            AccessError::TokenConsumed => "TOKEN_CONSUMED",
            AccessError::TokenFileMismatch => "TOKEN_FILE_MISMATCH",
            AccessError::ActionNotPermitted => "ACTION_NOT_PERMITTED",
            AccessError::PermissionDenied(_) => "PERMISSION_DENIED",
            AccessError::ProviderFileNotFound => "PROVIDER_FILE_NOT_FOUND",
            AccessError::ProviderAccessDenied => "PROVIDER_ACCESS_DENIED",
            AccessError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            AccessError::NoThumbnail { .. } => "NO_THUMBNAIL",
            AccessError::AssetNotFound => "ASSET_NOT_FOUND",
            AccessError::UserNotFound => "USER_NOT_FOUND",
            AccessError::CredentialDecrypt(_) => "CREDENTIAL_DECRYPT_FAILED",
            AccessError::InvalidRequest(_) => "INVALID_REQUEST",
            AccessError::Database(_) | AccessError::Internal(_) => "INTERNAL",
        }
    }

    /// Upstream outages are the only class a caller may retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AccessError::UpstreamUnavailable(_))
    }
}

impl From<ProviderError> for AccessError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound => AccessError::ProviderFileNotFound,
            ProviderError::AccessDenied => AccessError::ProviderAccessDenied,
            ProviderError::InvalidGrant(msg) => AccessError::InvalidRequest(msg),
            ProviderError::Unavailable(msg) => AccessError::UpstreamUnavailable(msg),
            ProviderError::Unexpected(msg) => AccessError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_map_structurally() {
        assert_eq!(
            AccessError::from(ProviderError::NotFound).code(),
            "PROVIDER_FILE_NOT_FOUND"
        );
        assert_eq!(
            AccessError::from(ProviderError::AccessDenied).code(),
            "PROVIDER_ACCESS_DENIED"
        );
        let outage = AccessError::from(ProviderError::Unavailable("502".into()));
        assert_eq!(outage.code(), "UPSTREAM_UNAVAILABLE");
        assert!(outage.is_retryable());
        assert!(!AccessError::TokenConsumed.is_retryable());
    }
}
