use crate::entities::{prelude::ThumbnailCache as ThumbnailEntries, thumbnail_cache};
use crate::services::broker::{AccessBroker, CapabilityAction, MIN_TTL_SECS};
use crate::services::errors::AccessError;
use crate::services::storage::StorageService;
use crate::utils::keyed_mutex::KeyedMutex;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use image::ImageFormat;
use sea_orm::sea_query::OnConflict;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Largest origin file a thumbnail is rendered from
const MAX_SOURCE_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailSize {
    #[default]
    Small,
    Medium,
    Large,
}

impl ThumbnailSize {
    pub const ALL: [ThumbnailSize; 3] = [
        ThumbnailSize::Small,
        ThumbnailSize::Medium,
        ThumbnailSize::Large,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ThumbnailSize::Small => "small",
            ThumbnailSize::Medium => "medium",
            ThumbnailSize::Large => "large",
        }
    }

    /// Longest edge in pixels
    pub fn pixels(self) -> u32 {
        match self {
            ThumbnailSize::Small => 150,
            ThumbnailSize::Medium => 300,
            ThumbnailSize::Large => 600,
        }
    }
}

impl fmt::Display for ThumbnailSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThumbnailSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "small" => Ok(ThumbnailSize::Small),
            "medium" => Ok(ThumbnailSize::Medium),
            "large" => Ok(ThumbnailSize::Large),
            other => Err(format!("unknown thumbnail size: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Thumbnail {
    Image {
        bytes: Vec<u8>,
        content_type: String,
        cached: bool,
    },
    /// No preview for this type; render the named icon instead
    Icon(&'static str),
}

/// Icon name for MIME types no preview is rendered for
pub fn icon_for(mime_type: &str) -> Option<&'static str> {
    let mime = mime_type.to_ascii_lowercase();
    match mime.as_str() {
        "image/jpeg" | "image/png" | "image/gif" | "image/webp" => None,
        "application/pdf" => Some("file-pdf"),
        "application/zip" | "application/x-7z-compressed" | "application/x-tar"
        | "application/gzip" | "application/x-rar-compressed" => Some("file-archive"),
        m if m.starts_with("image/") => Some("file-image"),
        m if m.starts_with("video/") => Some("file-video"),
        m if m.starts_with("audio/") => Some("file-audio"),
        m if m.starts_with("text/") => Some("file-text"),
        _ => Some("file"),
    }
}

pub struct GeneratedThumbnail {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[async_trait]
pub trait ThumbnailGenerator: Send + Sync {
    /// MIME type of the origin file
    fn mime_type(&self) -> &str;

    async fn generate(&self, size: ThumbnailSize) -> Result<GeneratedThumbnail, AccessError>;
}

/// Persistent preview cache, addressed by (asset, size, source version).
/// Entries have no TTL; a new source version simply misses.
#[derive(Clone)]
pub struct ThumbnailCache {
    db: DatabaseConnection,
    locks: KeyedMutex<(String, ThumbnailSize)>,
}

impl ThumbnailCache {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            locks: KeyedMutex::new(),
        }
    }

    pub async fn get_or_generate(
        &self,
        asset_id: &str,
        size: ThumbnailSize,
        source_version: &str,
        generator: &dyn ThumbnailGenerator,
    ) -> Result<Thumbnail, AccessError> {
        if let Some(icon) = icon_for(generator.mime_type()) {
            return Ok(Thumbnail::Icon(icon));
        }

        if let Some(hit) = self.lookup(asset_id, size, source_version).await? {
            return Ok(hit);
        }

        let _guard = self.locks.lock((asset_id.to_string(), size)).await;

        if let Some(hit) = self.lookup(asset_id, size, source_version).await? {
            return Ok(hit);
        }

        let generated = generator.generate(size).await?;

        let entry = thumbnail_cache::ActiveModel {
            asset_id: Set(asset_id.to_string()),
            size: Set(size.as_str().to_string()),
            data: Set(generated.bytes.clone()),
            content_type: Set(generated.content_type.clone()),
            source_version: Set(source_version.to_string()),
            cached_at: Set(Utc::now()),
        };
        ThumbnailEntries::insert(entry)
            .on_conflict(
                OnConflict::columns([
                    thumbnail_cache::Column::AssetId,
                    thumbnail_cache::Column::Size,
                ])
                .update_columns([
                    thumbnail_cache::Column::Data,
                    thumbnail_cache::Column::ContentType,
                    thumbnail_cache::Column::SourceVersion,
                    thumbnail_cache::Column::CachedAt,
                ])
                .to_owned(),
            )
            .exec(&self.db)
            .await?;

        info!(
            "🖼️ Thumbnail {} for asset {} generated ({} bytes)",
            size,
            asset_id,
            generated.bytes.len()
        );

        Ok(Thumbnail::Image {
            bytes: generated.bytes,
            content_type: generated.content_type,
            cached: false,
        })
    }

    async fn lookup(
        &self,
        asset_id: &str,
        size: ThumbnailSize,
        source_version: &str,
    ) -> Result<Option<Thumbnail>, AccessError> {
        let entry = ThumbnailEntries::find_by_id((asset_id.to_string(), size.as_str().to_string()))
            .one(&self.db)
            .await?;

        Ok(entry
            .filter(|e| e.source_version == source_version)
            .map(|e| Thumbnail::Image {
                bytes: e.data,
                content_type: e.content_type,
                cached: true,
            }))
    }

    /// Drop every size cached for `asset_id`
    pub async fn invalidate(&self, asset_id: &str) -> Result<u64, AccessError> {
        let result = ThumbnailEntries::delete_many()
            .filter(thumbnail_cache::Column::AssetId.eq(asset_id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    pub fn cleanup_locks(&self) {
        self.locks.cleanup();
    }
}

pub enum RasterOrigin {
    Local {
        storage: Arc<dyn StorageService>,
        key: String,
    },
    /// Fetched through the broker with a thumbnail-scoped capability
    Drive {
        broker: AccessBroker,
        user_id: String,
        provider_file_id: String,
    },
}

/// Decodes the origin with `image`, scales it to the requested edge and
/// encodes PNG.
pub struct RasterGenerator {
    mime_type: String,
    origin: RasterOrigin,
}

impl RasterGenerator {
    pub fn new(mime_type: impl Into<String>, origin: RasterOrigin) -> Self {
        Self {
            mime_type: mime_type.into(),
            origin,
        }
    }

    async fn fetch(&self) -> Result<Vec<u8>, AccessError> {
        match &self.origin {
            RasterOrigin::Local { storage, key } => storage
                .get_file(key)
                .await
                .map_err(AccessError::Internal),
            RasterOrigin::Drive {
                broker,
                user_id,
                provider_file_id,
            } => {
                let capability = broker
                    .issue(user_id, provider_file_id, CapabilityAction::Thumbnail, MIN_TTL_SECS)
                    .await?;
                let grant = broker
                    .consume(
                        Some(&capability.token),
                        provider_file_id,
                        CapabilityAction::Thumbnail,
                    )
                    .await?;
                let mut body = broker.proxy(grant).await?.body;

                let mut data = Vec::new();
                while let Some(chunk) = body.next().await {
                    let chunk = chunk?;
                    if data.len() + chunk.len() > MAX_SOURCE_BYTES {
                        return Err(AccessError::InvalidRequest(
                            "source file too large for a thumbnail".to_string(),
                        ));
                    }
                    data.extend_from_slice(&chunk);
                }
                Ok(data)
            }
        }
    }

    pub fn render(data: &[u8], size: ThumbnailSize) -> anyhow::Result<GeneratedThumbnail> {
        let img =
            image::load_from_memory(data).map_err(|e| anyhow!("Failed to load image: {}", e))?;

        // Preserves aspect ratio; the longest edge becomes `pixels`.
        let thumbnail = img.thumbnail(size.pixels(), size.pixels());

        let mut bytes = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut bytes);
        thumbnail
            .write_to(&mut cursor, ImageFormat::Png)
            .map_err(|e| anyhow!("Failed to encode PNG thumbnail: {}", e))?;

        Ok(GeneratedThumbnail {
            bytes,
            content_type: "image/png".to_string(),
        })
    }
}

#[async_trait]
impl ThumbnailGenerator for RasterGenerator {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    async fn generate(&self, size: ThumbnailSize) -> Result<GeneratedThumbnail, AccessError> {
        let data = self.fetch().await?;
        tokio::task::spawn_blocking(move || Self::render(&data, size))
            .await
            .map_err(|e| AccessError::Internal(e.into()))?
            .map_err(AccessError::Internal)
    }
}
