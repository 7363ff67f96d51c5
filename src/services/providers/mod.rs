use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

pub mod google_drive;

/// Typed provider failures, derived from the HTTP status of the upstream call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("file not found")]
    NotFound,

    #[error("access denied by provider")]
    AccessDenied,

    /// Authorization code or refresh token rejected (`invalid_grant`)
    #[error("grant rejected: {0}")]
    InvalidGrant(String),

    /// 5xx, timeouts and transport failures
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected provider response: {0}")]
    Unexpected(String),
}

/// RFC 6749 error response body
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    error_description: Option<String>,
}

impl ProviderError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let oauth = serde_json::from_str::<OAuthErrorBody>(body).ok();
        match status {
            StatusCode::NOT_FOUND => ProviderError::NotFound,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::AccessDenied,
            StatusCode::BAD_REQUEST => match oauth {
                Some(OAuthErrorBody {
                    error,
                    error_description,
                }) if error == "invalid_grant" => {
                    ProviderError::InvalidGrant(error_description.unwrap_or(error))
                }
                _ => ProviderError::Unexpected(format!("HTTP {} - {}", status, body)),
            },
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                ProviderError::Unavailable(format!("HTTP {}", s))
            }
            s => ProviderError::Unexpected(format!("HTTP {} - {}", s, body)),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ProviderError::from_status(status, &err.to_string()),
            None => ProviderError::Unavailable(err.to_string()),
        }
    }
}

/// Token set returned by code exchange or refresh
#[derive(Clone)]
pub struct ProviderTokens {
    pub access_token: String,
    /// Providers may omit this on refresh; the stored one is kept then.
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub email: Option<String>,
}

impl std::fmt::Debug for ProviderTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderTokens")
            .field("expires_at", &self.expires_at)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// A live access credential, passed by value into each provider call.
/// There is no shared, mutable client holding credentials.
#[derive(Clone)]
pub struct Credential {
    pub user_id: String,
    access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        user_id: impl Into<String>,
        access_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
            expires_at,
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DriveFileInfo {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size: Option<i64>,
    pub modified_at: Option<DateTime<Utc>>,
}

pub type ByteStream = BoxStream<'static, Result<Bytes, ProviderError>>;

/// An open download. The body is pulled chunk by chunk, never collected.
pub struct DriveDownload {
    pub filename: String,
    pub mime_type: String,
    pub size: Option<i64>,
    pub body: ByteStream,
}

#[async_trait]
pub trait DriveProvider: Send + Sync {
    /// Provider identifier (e.g., "google_drive")
    fn provider_id(&self) -> &'static str;

    /// Human-readable name (e.g., "Google Drive")
    fn display_name(&self) -> &'static str;

    /// OAuth consent URL the user is redirected to
    fn consent_url(&self, state: &str) -> String;

    /// Exchange authorization code for tokens
    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, ProviderError>;

    /// Refresh an expired access token
    async fn refresh_token(&self, refresh_token: &str) -> Result<ProviderTokens, ProviderError>;

    /// Revoke tokens (on disconnect)
    async fn revoke_token(&self, token: &str) -> Result<(), ProviderError>;

    /// Get metadata for a single file
    async fn file_info(
        &self,
        credential: &Credential,
        file_id: &str,
    ) -> Result<DriveFileInfo, ProviderError>;

    /// Open a streaming download of the file content
    async fn download_file(
        &self,
        credential: &Credential,
        file_id: &str,
    ) -> Result<DriveDownload, ProviderError>;
}
