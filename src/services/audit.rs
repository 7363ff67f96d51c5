use crate::entities::audit_logs;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditAction {
    CapabilityIssue,
    CapabilityConsume,
    FileProxy,
    ThumbnailRead,
    CredentialRefresh,
    DriveConnect,
    DriveDisconnect,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::CapabilityIssue => "capability_issue",
            AuditAction::CapabilityConsume => "capability_consume",
            AuditAction::FileProxy => "file_proxy",
            AuditAction::ThumbnailRead => "thumbnail_read",
            AuditAction::CredentialRefresh => "credential_refresh",
            AuditAction::DriveConnect => "drive_connect",
            AuditAction::DriveDisconnect => "drive_disconnect",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub user_id: Option<String>,
    pub provider_file_id: Option<String>,
    pub success: bool,
    pub error_code: Option<String>,
    pub metadata: Option<Value>,
}

impl AuditEntry {
    pub fn success(action: AuditAction) -> Self {
        Self {
            action,
            user_id: None,
            provider_file_id: None,
            success: true,
            error_code: None,
            metadata: None,
        }
    }

    pub fn failure(action: AuditAction, error_code: &str) -> Self {
        Self {
            success: false,
            error_code: Some(error_code.to_string()),
            ..Self::success(action)
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn file(mut self, provider_file_id: impl Into<String>) -> Self {
        self.provider_file_id = Some(provider_file_id.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Append-only audit trail. Every entry is mirrored to the `audit` tracing target.
#[derive(Clone)]
pub struct AuditService {
    db: DatabaseConnection,
}

impl AuditService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Persist one audit record. Failures are logged, never propagated,
    /// so an audit outage cannot change the outcome of the audited call.
    pub async fn record(&self, entry: AuditEntry) {
        Self::emit(&entry);
        if let Err(e) = Self::to_active_model(entry).insert(&self.db).await {
            error!("Failed to persist audit log: {}", e);
        }
    }

    /// Fire-and-forget variant for contexts that cannot await (drop guards).
    pub fn record_detached(&self, entry: AuditEntry) {
        Self::emit(&entry);
        let db = self.db.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = Self::to_active_model(entry).insert(&db).await {
                        error!("Failed to persist audit log: {}", e);
                    }
                });
            }
            Err(_) => warn!("No runtime available; audit record only logged"),
        }
    }

    fn emit(entry: &AuditEntry) {
        info!(
            target: "audit",
            action = %entry.action,
            user_id = ?entry.user_id,
            provider_file_id = ?entry.provider_file_id,
            success = entry.success,
            error_code = ?entry.error_code,
            "Audit Event Occurred"
        );
    }

    fn to_active_model(entry: AuditEntry) -> audit_logs::ActiveModel {
        audit_logs::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            user_id: Set(entry.user_id),
            provider_file_id: Set(entry.provider_file_id),
            action: Set(entry.action.to_string()),
            success: Set(entry.success),
            error_code: Set(entry.error_code),
            timestamp: Set(Utc::now()),
            metadata: Set(entry.metadata.map(|v| v.to_string())),
        }
    }
}
