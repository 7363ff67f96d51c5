use crate::entities::{prelude::ProviderCredentials, provider_credentials};
use crate::services::audit::{AuditAction, AuditEntry, AuditService};
use crate::services::errors::AccessError;
use crate::services::providers::{Credential, DriveProvider, ProviderError, ProviderTokens};
use crate::services::vault::{CredentialVault, TokenPair};
use crate::utils::auth::{create_consent_state, verify_consent_state};
use crate::utils::keyed_mutex::KeyedMutex;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::*;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub provider: &'static str,
    pub connected: bool,
    pub requires_reauth: bool,
    pub email: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Owns the lifecycle of each user's Drive credentials: consent, refresh
/// (one in flight per user), and disconnect.
pub struct CredentialManager {
    db: DatabaseConnection,
    vault: CredentialVault,
    provider: Arc<dyn DriveProvider>,
    audit: AuditService,
    refresh_locks: KeyedMutex,
    state_secret: String,
    skew_secs: i64,
}

impl CredentialManager {
    pub fn new(
        db: DatabaseConnection,
        vault: CredentialVault,
        provider: Arc<dyn DriveProvider>,
        audit: AuditService,
        state_secret: String,
        skew_secs: i64,
    ) -> Self {
        Self {
            db,
            vault,
            provider,
            audit,
            refresh_locks: KeyedMutex::new(),
            state_secret,
            skew_secs,
        }
    }

    pub fn provider(&self) -> Arc<dyn DriveProvider> {
        self.provider.clone()
    }

    pub fn consent_url(&self, user_id: &str) -> Result<String, AccessError> {
        let state = create_consent_state(user_id, &self.state_secret)?;
        Ok(self.provider.consent_url(&state))
    }

    /// Resolve the user a consent callback belongs to
    pub fn verify_consent_state(&self, state: &str) -> Result<String, AccessError> {
        verify_consent_state(state, &self.state_secret)
            .map_err(|_| AccessError::InvalidRequest("invalid or expired OAuth state".to_string()))
    }

    /// Return a live access credential for `user_id`, refreshing it first
    /// when it is inside the expiry skew.
    pub async fn get_live_credential(&self, user_id: &str) -> Result<Credential, AccessError> {
        let record = self.load_usable(user_id).await?;
        if !CredentialVault::is_expired(&record, self.skew_secs) {
            return self.touch(record).await;
        }

        let _guard = self.refresh_locks.lock(user_id.to_string()).await;

        // Re-read under the lock: a concurrent caller may have refreshed already.
        let record = self.load_usable(user_id).await?;
        if !CredentialVault::is_expired(&record, self.skew_secs) {
            return self.touch(record).await;
        }

        self.refresh(record).await
    }

    async fn load(
        &self,
        user_id: &str,
    ) -> Result<Option<provider_credentials::Model>, AccessError> {
        Ok(ProviderCredentials::find_by_id(user_id).one(&self.db).await?)
    }

    async fn load_usable(&self, user_id: &str) -> Result<provider_credentials::Model, AccessError> {
        match self.load(user_id).await? {
            None => Err(AccessError::AuthRequired {
                consent_url: self.consent_url(user_id)?,
            }),
            Some(record) if record.requires_reauth => Err(AccessError::TokenRefreshFailed {
                consent_url: self.consent_url(user_id)?,
            }),
            Some(record) => Ok(record),
        }
    }

    async fn touch(&self, record: provider_credentials::Model) -> Result<Credential, AccessError> {
        let pair = self
            .vault
            .decrypt(&record)
            .map_err(AccessError::CredentialDecrypt)?;
        let credential = Credential::new(&record.user_id, pair.access_token, record.expires_at);

        let mut active_model: provider_credentials::ActiveModel = record.into();
        active_model.last_used_at = Set(Some(Utc::now()));
        active_model.update(&self.db).await?;

        Ok(credential)
    }

    /// Exactly one provider call. No retry: a failed refresh either reports
    /// an outage or flags the user for re-consent.
    async fn refresh(
        &self,
        record: provider_credentials::Model,
    ) -> Result<Credential, AccessError> {
        let user_id = record.user_id.clone();
        let pair = self
            .vault
            .decrypt(&record)
            .map_err(AccessError::CredentialDecrypt)?;

        let tokens = match self.provider.refresh_token(&pair.refresh_token).await {
            Ok(tokens) => tokens,
            Err(ProviderError::Unavailable(msg)) => {
                warn!("Drive refresh for {} hit an outage: {}", user_id, msg);
                self.audit
                    .record(
                        AuditEntry::failure(AuditAction::CredentialRefresh, "UPSTREAM_UNAVAILABLE")
                            .user(&user_id),
                    )
                    .await;
                return Err(AccessError::UpstreamUnavailable(msg));
            }
            Err(e) => {
                warn!("Drive refresh for {} rejected: {}", user_id, e);
                ProviderCredentials::update_many()
                    .col_expr(provider_credentials::Column::RequiresReauth, Expr::value(true))
                    .col_expr(provider_credentials::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(provider_credentials::Column::UserId.eq(user_id.as_str()))
                    .exec(&self.db)
                    .await?;
                self.audit
                    .record(
                        AuditEntry::failure(AuditAction::CredentialRefresh, "TOKEN_REFRESH_FAILED")
                            .user(&user_id)
                            .metadata(serde_json::json!({ "provider_error": e.to_string() })),
                    )
                    .await;
                return Err(AccessError::TokenRefreshFailed {
                    consent_url: self.consent_url(&user_id)?,
                });
            }
        };

        let rotated = TokenPair {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.unwrap_or(pair.refresh_token),
        };
        let sealed = self
            .vault
            .encrypt(&rotated)
            .map_err(|e| AccessError::Internal(e.into()))?;

        let now = Utc::now();
        let mut active_model: provider_credentials::ActiveModel = record.into();
        active_model.encrypted_access_token = Set(sealed.access_token);
        active_model.encrypted_refresh_token = Set(sealed.refresh_token);
        active_model.expires_at = Set(tokens.expires_at);
        active_model.last_used_at = Set(Some(now));
        active_model.updated_at = Set(Some(now));
        active_model.update(&self.db).await?;

        info!("🔄 Drive credentials refreshed for {}", user_id);
        self.audit
            .record(AuditEntry::success(AuditAction::CredentialRefresh).user(&user_id))
            .await;

        Ok(Credential::new(user_id, rotated.access_token, tokens.expires_at))
    }

    /// Finish the OAuth consent flow for `user_id`
    pub async fn connect(&self, user_id: &str, code: &str) -> Result<(), AccessError> {
        let tokens = self.provider.exchange_code(code).await?;
        self.store_tokens(user_id, tokens).await?;
        self.audit
            .record(AuditEntry::success(AuditAction::DriveConnect).user(user_id))
            .await;
        Ok(())
    }

    pub async fn store_tokens(
        &self,
        user_id: &str,
        tokens: ProviderTokens,
    ) -> Result<(), AccessError> {
        let existing = self.load(user_id).await?;

        let refresh_token = match (tokens.refresh_token, &existing) {
            (Some(rt), _) => rt,
            (None, Some(record)) => self
                .vault
                .open(&record.encrypted_refresh_token)
                .map_err(AccessError::CredentialDecrypt)?,
            (None, None) => {
                return Err(AccessError::InvalidRequest(
                    "provider returned no refresh token; offline access is required".to_string(),
                ));
            }
        };

        let sealed = self
            .vault
            .encrypt(&TokenPair {
                access_token: tokens.access_token,
                refresh_token,
            })
            .map_err(|e| AccessError::InvalidRequest(e.to_string()))?;

        let now = Utc::now();
        if let Some(record) = existing {
            let mut active_model: provider_credentials::ActiveModel = record.into();
            active_model.encrypted_access_token = Set(sealed.access_token);
            active_model.encrypted_refresh_token = Set(sealed.refresh_token);
            active_model.expires_at = Set(tokens.expires_at);
            active_model.requires_reauth = Set(false);
            if tokens.email.is_some() {
                active_model.provider_email = Set(tokens.email);
            }
            active_model.updated_at = Set(Some(now));
            active_model.update(&self.db).await?;
        } else {
            let active_model = provider_credentials::ActiveModel {
                user_id: Set(user_id.to_string()),
                encrypted_access_token: Set(sealed.access_token),
                encrypted_refresh_token: Set(sealed.refresh_token),
                expires_at: Set(tokens.expires_at),
                last_used_at: Set(None),
                requires_reauth: Set(false),
                provider_email: Set(tokens.email),
                created_at: Set(Some(now)),
                updated_at: Set(Some(now)),
            };
            active_model.insert(&self.db).await?;
        }

        Ok(())
    }

    /// Revoke at the provider, then delete the local record. A failed
    /// revoke leaves the record in place.
    pub async fn disconnect(&self, user_id: &str) -> Result<(), AccessError> {
        let Some(record) = self.load(user_id).await? else {
            return Ok(());
        };

        let pair = self
            .vault
            .decrypt(&record)
            .map_err(AccessError::CredentialDecrypt)?;

        if let Err(e) = self.provider.revoke_token(&pair.refresh_token).await {
            let err = AccessError::from(e);
            self.audit
                .record(AuditEntry::failure(AuditAction::DriveDisconnect, err.code()).user(user_id))
                .await;
            return Err(err);
        }

        ProviderCredentials::delete_by_id(user_id).exec(&self.db).await?;

        info!("🔌 Drive disconnected for {}", user_id);
        self.audit
            .record(AuditEntry::success(AuditAction::DriveDisconnect).user(user_id))
            .await;
        Ok(())
    }

    pub async fn status(&self, user_id: &str) -> Result<ConnectionStatus, AccessError> {
        let record = self.load(user_id).await?;
        Ok(ConnectionStatus {
            provider: self.provider.provider_id(),
            connected: record.is_some(),
            requires_reauth: record.as_ref().is_some_and(|r| r.requires_reauth),
            email: record.as_ref().and_then(|r| r.provider_email.clone()),
            expires_at: record.map(|r| r.expires_at),
        })
    }

    /// Drop idle per-user refresh locks
    pub fn cleanup_locks(&self) {
        self.refresh_locks.cleanup();
    }
}
