use crate::entities::{access_capabilities, prelude::AccessCapabilities};
use crate::services::audit::{AuditAction, AuditEntry, AuditService};
use crate::services::credentials::CredentialManager;
use crate::services::directory::AccessDirectory;
use crate::services::errors::AccessError;
use crate::services::permissions::{Action, PermissionEngine};
use anyhow::anyhow;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use chrono::{Duration, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use rand::RngCore;
use sea_orm::sea_query::Expr;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub const MIN_TTL_SECS: i64 = 60;
pub const MAX_TTL_SECS: i64 = 900;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityAction {
    Read,
    Download,
    Thumbnail,
}

impl CapabilityAction {
    pub fn as_str(self) -> &'static str {
        match self {
            CapabilityAction::Read => "read",
            CapabilityAction::Download => "download",
            CapabilityAction::Thumbnail => "thumbnail",
        }
    }

    /// Whether a token bound to `self` may serve a `requested` operation
    pub fn satisfies(self, requested: CapabilityAction) -> bool {
        matches!(
            (self, requested),
            (CapabilityAction::Download, CapabilityAction::Download | CapabilityAction::Read)
                | (CapabilityAction::Read, CapabilityAction::Read)
                | (CapabilityAction::Thumbnail, CapabilityAction::Thumbnail)
        )
    }
}

impl fmt::Display for CapabilityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(CapabilityAction::Read),
            "download" => Ok(CapabilityAction::Download),
            "thumbnail" => Ok(CapabilityAction::Thumbnail),
            other => Err(format!("unknown capability action: {}", other)),
        }
    }
}

/// A validated capability, ready to be proxied
#[derive(Debug, Clone)]
pub struct CapabilityGrant {
    pub token: String,
    pub user_id: String,
    pub provider_file_id: String,
    pub action: CapabilityAction,
}

pub type ProxyStream = BoxStream<'static, Result<Bytes, AccessError>>;

pub struct ProxiedFile {
    pub filename: String,
    pub mime_type: String,
    pub size: Option<i64>,
    pub body: ProxyStream,
}

/// Hands out and redeems short-lived capability tokens, and streams Drive
/// bytes on their behalf. Provider credentials never leave this type.
#[derive(Clone)]
pub struct AccessBroker {
    db: DatabaseConnection,
    directory: AccessDirectory,
    credentials: Arc<CredentialManager>,
    audit: AuditService,
    proxy_timeout: std::time::Duration,
}

impl AccessBroker {
    pub fn new(
        db: DatabaseConnection,
        directory: AccessDirectory,
        credentials: Arc<CredentialManager>,
        audit: AuditService,
        proxy_timeout_secs: u64,
    ) -> Self {
        Self {
            db,
            directory,
            credentials,
            audit,
            proxy_timeout: std::time::Duration::from_secs(proxy_timeout_secs),
        }
    }

    pub fn clamp_ttl(ttl_seconds: i64) -> i64 {
        ttl_seconds.clamp(MIN_TTL_SECS, MAX_TTL_SECS)
    }

    /// 256 bits from the OS RNG, URL-safe base64 without padding
    fn generate_token() -> String {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Mint a capability. Authorization is the caller's job.
    pub async fn issue(
        &self,
        user_id: &str,
        provider_file_id: &str,
        action: CapabilityAction,
        ttl_seconds: i64,
    ) -> Result<access_capabilities::Model, AccessError> {
        let now = Utc::now();
        let capability = access_capabilities::ActiveModel {
            token: Set(Self::generate_token()),
            provider_file_id: Set(provider_file_id.to_string()),
            issued_to: Set(user_id.to_string()),
            action: Set(action.as_str().to_string()),
            expires_at: Set(now + Duration::seconds(Self::clamp_ttl(ttl_seconds))),
            consumed: Set(false),
            created_at: Set(Some(now)),
        }
        .insert(&self.db)
        .await?;

        self.audit
            .record(
                AuditEntry::success(AuditAction::CapabilityIssue)
                    .user(user_id)
                    .file(provider_file_id)
                    .metadata(serde_json::json!({
                        "action": action.as_str(),
                        "expires_at": capability.expires_at,
                    })),
            )
            .await;

        Ok(capability)
    }

    /// Check `read` on the asset for `user_id`, then mint a capability for
    /// its Drive file.
    pub async fn issue_for_asset(
        &self,
        user_id: &str,
        asset_id: &str,
        action: CapabilityAction,
        ttl_seconds: i64,
    ) -> Result<access_capabilities::Model, AccessError> {
        let asset = match self.directory.authorize(user_id, asset_id, Action::Read).await {
            Ok(asset) => asset,
            Err(e) => {
                self.audit
                    .record(
                        AuditEntry::failure(AuditAction::CapabilityIssue, e.code())
                            .user(user_id)
                            .metadata(serde_json::json!({
                                "asset_id": asset_id,
                                "action": action.as_str(),
                            })),
                    )
                    .await;
                return Err(e);
            }
        };
        let provider_file_id = match (asset.is_provider_file, asset.provider_file_id) {
            (true, Some(id)) => id,
            _ => {
                return Err(AccessError::InvalidRequest(
                    "asset is not backed by a Drive file".to_string(),
                ));
            }
        };
        self.issue(user_id, &provider_file_id, action, ttl_seconds).await
    }

    /// Validate and redeem a capability. Each failure writes one audit record.
    pub async fn consume(
        &self,
        token: Option<&str>,
        provider_file_id: &str,
        requested: CapabilityAction,
    ) -> Result<CapabilityGrant, AccessError> {
        let mut issued_to = None;
        let outcome = self
            .try_consume(token, provider_file_id, requested, &mut issued_to)
            .await;

        if let Err(e) = &outcome {
            debug!("Capability rejected for {}: {}", provider_file_id, e.code());
            let mut entry = AuditEntry::failure(AuditAction::CapabilityConsume, e.code())
                .file(provider_file_id)
                .metadata(serde_json::json!({ "action": requested.as_str() }));
            if let Some(user_id) = issued_to {
                entry = entry.user(user_id);
            }
            self.audit.record(entry).await;
        }

        outcome
    }

    async fn try_consume(
        &self,
        token: Option<&str>,
        provider_file_id: &str,
        requested: CapabilityAction,
        issued_to: &mut Option<String>,
    ) -> Result<CapabilityGrant, AccessError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(AccessError::MissingToken)?;

        let capability = AccessCapabilities::find_by_id(token)
            .one(&self.db)
            .await?
            .ok_or(AccessError::InvalidToken)?;
        *issued_to = Some(capability.issued_to.clone());

        if capability.consumed {
            return Err(AccessError::TokenConsumed);
        }
        if capability.expires_at <= Utc::now() {
            return Err(AccessError::TokenExpired);
        }
        if capability.provider_file_id != provider_file_id {
            return Err(AccessError::TokenFileMismatch);
        }

        let bound: CapabilityAction = capability
            .action
            .parse()
            .map_err(|e: String| AccessError::Internal(anyhow!(e)))?;
        if !bound.satisfies(requested) {
            return Err(AccessError::ActionNotPermitted);
        }

        // Permissions may have changed since issuance.
        let subject = self.directory.subject(&capability.issued_to).await?;
        let asset = self.directory.asset_by_provider_file(provider_file_id).await?;
        let view = AccessDirectory::view(&asset)?;
        PermissionEngine::check(&subject, &view, Action::Read)
            .into_result()
            .map_err(AccessError::PermissionDenied)?;
        PermissionEngine::check_provider_overlay(&subject, &view)
            .into_result()
            .map_err(|_| AccessError::ProviderAccessDenied)?;

        if bound == CapabilityAction::Download {
            let result = AccessCapabilities::update_many()
                .col_expr(access_capabilities::Column::Consumed, Expr::value(true))
                .filter(access_capabilities::Column::Token.eq(token))
                .filter(access_capabilities::Column::Consumed.eq(false))
                .filter(access_capabilities::Column::ExpiresAt.gt(Utc::now()))
                .exec(&self.db)
                .await?;
            if result.rows_affected == 0 {
                return Err(AccessError::TokenConsumed);
            }
        }

        Ok(CapabilityGrant {
            token: capability.token,
            user_id: capability.issued_to,
            provider_file_id: capability.provider_file_id,
            action: bound,
        })
    }

    /// Stream the granted file from Drive. Exactly one audit record is
    /// written per call, whether the stream completes, fails or is dropped.
    pub async fn proxy(&self, grant: CapabilityGrant) -> Result<ProxiedFile, AccessError> {
        // Armed before the credential refresh so a caller dropping this
        // future mid-open still settles the capability.
        let mut guard = ProxyGuard::new(self.db.clone(), self.audit.clone(), grant);
        let download = match self.open_download(&guard.grant).await {
            Ok(download) => download,
            Err(e) => {
                guard.finish(Some(e.code())).await;
                return Err(e);
            }
        };

        let chunk_timeout = self.proxy_timeout;
        let mut upstream = download.body;

        let body = async_stream::stream! {
            loop {
                match tokio::time::timeout(chunk_timeout, upstream.next()).await {
                    Ok(Some(Ok(chunk))) => {
                        guard.bytes_sent += chunk.len() as u64;
                        yield Ok(chunk);
                    }
                    Ok(Some(Err(e))) => {
                        let err = AccessError::from(e);
                        guard.finish(Some(err.code())).await;
                        yield Err(err);
                        break;
                    }
                    Ok(None) => {
                        guard.finish(None).await;
                        break;
                    }
                    Err(_) => {
                        let err =
                            AccessError::UpstreamUnavailable("Drive stream stalled".to_string());
                        guard.finish(Some(err.code())).await;
                        yield Err(err);
                        break;
                    }
                }
            }
        };

        Ok(ProxiedFile {
            filename: download.filename,
            mime_type: download.mime_type,
            size: download.size,
            body: body.boxed(),
        })
    }

    async fn open_download(
        &self,
        grant: &CapabilityGrant,
    ) -> Result<crate::services::providers::DriveDownload, AccessError> {
        let credential = self.credentials.get_live_credential(&grant.user_id).await?;
        let provider = self.credentials.provider();

        match tokio::time::timeout(
            self.proxy_timeout,
            provider.download_file(&credential, &grant.provider_file_id),
        )
        .await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(AccessError::UpstreamUnavailable(
                "timed out opening Drive download".to_string(),
            )),
        }
    }

    /// Delete capabilities past their expiry
    pub async fn sweep_expired(&self) -> Result<u64, AccessError> {
        let result = AccessCapabilities::delete_many()
            .filter(access_capabilities::Column::ExpiresAt.lte(Utc::now()))
            .exec(&self.db)
            .await?;
        if result.rows_affected > 0 {
            debug!("Swept {} expired capabilities", result.rows_affected);
        }
        Ok(result.rows_affected)
    }

    pub async fn capability(
        &self,
        token: &str,
    ) -> Result<Option<access_capabilities::Model>, AccessError> {
        Ok(AccessCapabilities::find_by_id(token).one(&self.db).await?)
    }
}

/// Settles one proxy invocation: writes its audit record and, unless the
/// transfer completed, hands a `download` capability back.
struct ProxyGuard {
    db: DatabaseConnection,
    audit: AuditService,
    grant: CapabilityGrant,
    bytes_sent: u64,
    settled: bool,
}

impl ProxyGuard {
    fn new(db: DatabaseConnection, audit: AuditService, grant: CapabilityGrant) -> Self {
        Self {
            db,
            audit,
            grant,
            bytes_sent: 0,
            settled: false,
        }
    }

    fn entry(&self, error_code: Option<&str>) -> AuditEntry {
        let entry = match error_code {
            None => AuditEntry::success(AuditAction::FileProxy),
            Some(code) => AuditEntry::failure(AuditAction::FileProxy, code),
        };
        entry
            .user(&self.grant.user_id)
            .file(&self.grant.provider_file_id)
            .metadata(serde_json::json!({
                "action": self.grant.action.as_str(),
                "bytes_sent": self.bytes_sent,
            }))
    }

    fn needs_release(&self, error_code: Option<&str>) -> bool {
        error_code.is_some() && self.grant.action == CapabilityAction::Download
    }

    fn release_query(token: &str) -> UpdateMany<AccessCapabilities> {
        AccessCapabilities::update_many()
            .col_expr(access_capabilities::Column::Consumed, Expr::value(false))
            .filter(access_capabilities::Column::Token.eq(token))
    }

    async fn finish(&mut self, error_code: Option<&str>) {
        if self.settled {
            return;
        }
        self.settled = true;

        self.audit.record(self.entry(error_code)).await;
        if self.needs_release(error_code) {
            if let Err(e) = Self::release_query(&self.grant.token).exec(&self.db).await {
                error!("Failed to release capability: {}", e);
            }
        }
    }
}

impl Drop for ProxyGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;

        warn!(
            "Proxy of {} cancelled after {} bytes",
            self.grant.provider_file_id, self.bytes_sent
        );
        let code = Some("CANCELLED");
        self.audit.record_detached(self.entry(code));

        if self.needs_release(code) {
            let db = self.db.clone();
            let token = self.grant.token.clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = Self::release_query(&token).exec(&db).await {
                        error!("Failed to release capability: {}", e);
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_satisfaction() {
        use CapabilityAction::*;
        assert!(Download.satisfies(Download));
        assert!(Download.satisfies(Read));
        assert!(Read.satisfies(Read));
        assert!(!Read.satisfies(Download));
        assert!(!Thumbnail.satisfies(Download));
        assert!(!Thumbnail.satisfies(Read));
        assert!(Thumbnail.satisfies(Thumbnail));
        assert!(!Download.satisfies(Thumbnail));
    }

    #[test]
    fn test_ttl_is_clamped() {
        assert_eq!(AccessBroker::clamp_ttl(0), MIN_TTL_SECS);
        assert_eq!(AccessBroker::clamp_ttl(-5), MIN_TTL_SECS);
        assert_eq!(AccessBroker::clamp_ttl(300), 300);
        assert_eq!(AccessBroker::clamp_ttl(86_400), MAX_TTL_SECS);
    }

    #[test]
    fn test_tokens_are_256_bit_and_url_safe() {
        let a = AccessBroker::generate_token();
        let b = AccessBroker::generate_token();
        assert_ne!(a, b);
        assert_eq!(URL_SAFE_NO_PAD.decode(&a).unwrap().len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_action_parse() {
        assert_eq!("download".parse::<CapabilityAction>(), Ok(CapabilityAction::Download));
        assert!("write".parse::<CapabilityAction>().is_err());
    }
}
