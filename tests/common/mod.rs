#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use drive_access_core::AppState;
use drive_access_core::config::AccessConfig;
use drive_access_core::entities::{assets, audit_logs, prelude::*};
use drive_access_core::infrastructure::database;
use drive_access_core::services::directory::{AssetOrigin, NewAsset};
use drive_access_core::services::permissions::{Role, SharingMetadata, Visibility};
use drive_access_core::services::providers::{
    Credential, DriveDownload, DriveFileInfo, DriveProvider, ProviderError, ProviderTokens,
};
use drive_access_core::services::storage::LocalStorageService;
use futures::StreamExt;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub const CLIENT: &str = "client-a";

/// In-memory Drive with call counters and failure switches
#[derive(Default)]
pub struct MockDrive {
    pub refresh_calls: AtomicUsize,
    pub revoke_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
    pub reject_refresh: AtomicBool,
    pub refresh_outage: AtomicBool,
    pub revoke_outage: AtomicBool,
    /// Yield the first chunk, then never finish
    pub stall_downloads: AtomicBool,
    pub omit_refresh_token: AtomicBool,
    pub files: Mutex<HashMap<String, (String, Vec<u8>)>>,
    pub revoked: Mutex<Vec<String>>,
}

impl MockDrive {
    pub fn add_file(&self, id: &str, mime_type: &str, data: Vec<u8>) {
        self.files
            .lock()
            .unwrap()
            .insert(id.to_string(), (mime_type.to_string(), data));
    }

    fn file(&self, id: &str) -> Result<(String, Vec<u8>), ProviderError> {
        self.files
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(ProviderError::NotFound)
    }
}

#[async_trait]
impl DriveProvider for MockDrive {
    fn provider_id(&self) -> &'static str {
        "mock_drive"
    }

    fn display_name(&self) -> &'static str {
        "Mock Drive"
    }

    fn consent_url(&self, state: &str) -> String {
        format!("https://consent.test/auth?state={}", state)
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderTokens, ProviderError> {
        if code == "bad-code" {
            return Err(ProviderError::InvalidGrant("invalid_grant".to_string()));
        }
        Ok(ProviderTokens {
            access_token: format!("access-{}", code),
            refresh_token: if self.omit_refresh_token.load(Ordering::SeqCst) {
                None
            } else {
                Some(format!("refresh-{}", code))
            },
            expires_at: Utc::now() + Duration::hours(1),
            email: Some("owner@drive.test".to_string()),
        })
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<ProviderTokens, ProviderError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        // Widen the window for concurrent callers.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        if self.refresh_outage.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("HTTP 503".to_string()));
        }
        if self.reject_refresh.load(Ordering::SeqCst) {
            return Err(ProviderError::InvalidGrant("invalid_grant".to_string()));
        }
        Ok(ProviderTokens {
            access_token: format!("access-refreshed-{}", n),
            refresh_token: None,
            expires_at: Utc::now() + Duration::hours(1),
            email: None,
        })
    }

    async fn revoke_token(&self, token: &str) -> Result<(), ProviderError> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        if self.revoke_outage.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("HTTP 502".to_string()));
        }
        self.revoked.lock().unwrap().push(token.to_string());
        Ok(())
    }

    async fn file_info(
        &self,
        _credential: &Credential,
        file_id: &str,
    ) -> Result<DriveFileInfo, ProviderError> {
        let (mime_type, data) = self.file(file_id)?;
        Ok(DriveFileInfo {
            id: file_id.to_string(),
            name: format!("{}.bin", file_id),
            mime_type,
            size: Some(data.len() as i64),
            modified_at: None,
        })
    }

    async fn download_file(
        &self,
        _credential: &Credential,
        file_id: &str,
    ) -> Result<DriveDownload, ProviderError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let (mime_type, data) = self.file(file_id)?;
        let size = data.len() as i64;

        let chunks: Vec<Result<Bytes, ProviderError>> = data
            .chunks(4)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let body = if self.stall_downloads.load(Ordering::SeqCst) {
            futures::stream::iter(chunks.into_iter().take(1))
                .chain(futures::stream::pending())
                .boxed()
        } else {
            futures::stream::iter(chunks).boxed()
        };

        Ok(DriveDownload {
            filename: format!("{}.bin", file_id),
            mime_type,
            size: Some(size),
            body,
        })
    }
}

pub struct TestEnv {
    pub state: AppState,
    pub drive: Arc<MockDrive>,
    pub storage_dir: tempfile::TempDir,
}

pub async fn setup() -> TestEnv {
    let storage_dir = tempfile::tempdir().unwrap();
    let config = AccessConfig {
        database_url: "sqlite::memory:".to_string(),
        proxy_timeout_secs: 5,
        storage_root: storage_dir.path().to_string_lossy().to_string(),
        ..AccessConfig::default()
    };
    let db = database::setup_database(&config).await.unwrap();
    let drive = Arc::new(MockDrive::default());
    let storage = Arc::new(LocalStorageService::new(storage_dir.path()));
    let state = AppState::new(db, config, drive.clone(), storage);

    TestEnv {
        state,
        drive,
        storage_dir,
    }
}

impl TestEnv {
    pub async fn user(&self, email: &str, role: Role) -> String {
        let user = self.state.directory.create_user(email, role).await.unwrap();
        self.state
            .directory
            .add_membership(&user.id, CLIENT)
            .await
            .unwrap();
        user.id
    }

    /// Store a Drive connection whose access token expires `expires_in` from now
    pub async fn connect_drive(&self, user_id: &str, expires_in: Duration) {
        self.state
            .credentials
            .store_tokens(
                user_id,
                ProviderTokens {
                    access_token: "access-initial".to_string(),
                    refresh_token: Some("refresh-initial".to_string()),
                    expires_at: Utc::now() + expires_in,
                    email: Some(format!("{}@drive.test", user_id)),
                },
            )
            .await
            .unwrap();
    }

    pub async fn drive_asset(
        &self,
        owner_id: &str,
        file_id: &str,
        visibility: Visibility,
        sharing: SharingMetadata,
    ) -> assets::Model {
        let owner = self.state.directory.subject(owner_id).await.unwrap();
        self.state
            .directory
            .register_asset(
                &owner,
                NewAsset {
                    client_id: CLIENT.to_string(),
                    mime_type: "image/png".to_string(),
                    visibility: Some(visibility),
                    source_version: "v1".to_string(),
                    origin: AssetOrigin::Drive {
                        file_id: file_id.to_string(),
                        sharing,
                    },
                },
            )
            .await
            .unwrap()
    }

    pub async fn local_asset(
        &self,
        owner_id: &str,
        storage_key: &str,
        mime_type: &str,
        visibility: Option<Visibility>,
    ) -> assets::Model {
        let owner = self.state.directory.subject(owner_id).await.unwrap();
        self.state
            .directory
            .register_asset(
                &owner,
                NewAsset {
                    client_id: CLIENT.to_string(),
                    mime_type: mime_type.to_string(),
                    visibility,
                    source_version: "v1".to_string(),
                    origin: AssetOrigin::Local {
                        storage_key: storage_key.to_string(),
                    },
                },
            )
            .await
            .unwrap()
    }

    pub async fn audit_rows(&self, action: &str) -> Vec<audit_logs::Model> {
        AuditLogs::find()
            .filter(audit_logs::Column::Action.eq(action))
            .all(&self.state.db)
            .await
            .unwrap()
    }
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::new_rgb8(width, height);
    let mut bytes = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Png,
    )
    .unwrap();
    bytes
}
