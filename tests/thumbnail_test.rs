mod common;

use async_trait::async_trait;
use chrono::Duration;
use common::{png, setup};
use drive_access_core::services::errors::AccessError;
use drive_access_core::services::permissions::{Role, SharingMetadata, Visibility};
use drive_access_core::services::storage::StorageService;
use drive_access_core::services::thumbnails::{
    GeneratedThumbnail, RasterGenerator, RasterOrigin, Thumbnail, ThumbnailGenerator,
    ThumbnailSize,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Generator that counts invocations and returns a fixed payload
struct CountingGenerator {
    mime_type: String,
    calls: AtomicUsize,
}

impl CountingGenerator {
    fn new(mime_type: &str) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ThumbnailGenerator for CountingGenerator {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    async fn generate(&self, size: ThumbnailSize) -> Result<GeneratedThumbnail, AccessError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        Ok(GeneratedThumbnail {
            bytes: format!("{}-{}", size, n).into_bytes(),
            content_type: "image/png".to_string(),
        })
    }
}

fn bytes_of(thumbnail: &Thumbnail) -> &[u8] {
    match thumbnail {
        Thumbnail::Image { bytes, .. } => bytes,
        Thumbnail::Icon(icon) => panic!("expected an image, got icon {}", icon),
    }
}

#[tokio::test]
async fn test_cache_is_keyed_by_source_version() {
    let env = setup().await;
    let owner = env.user("owner@brand.test", Role::Standard).await;
    let asset = env.local_asset(&owner, "logo.png", "image/png", None).await;
    let cache = &env.state.thumbnails;
    let generator = CountingGenerator::new("image/png");

    let first = cache
        .get_or_generate(&asset.id, ThumbnailSize::Small, "v1", &generator)
        .await
        .unwrap();
    let second = cache
        .get_or_generate(&asset.id, ThumbnailSize::Small, "v1", &generator)
        .await
        .unwrap();
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(bytes_of(&first), bytes_of(&second));
    assert!(matches!(second, Thumbnail::Image { cached: true, .. }));

    let bumped = cache
        .get_or_generate(&asset.id, ThumbnailSize::Small, "v2", &generator)
        .await
        .unwrap();
    assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    assert_ne!(bytes_of(&first), bytes_of(&bumped));

    // Sizes are cached independently.
    cache
        .get_or_generate(&asset.id, ThumbnailSize::Large, "v2", &generator)
        .await
        .unwrap();
    assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unsupported_type_returns_icon_without_generating() {
    let env = setup().await;
    let owner = env.user("owner@brand.test", Role::Standard).await;
    let asset = env
        .local_asset(&owner, "brief.pdf", "application/pdf", None)
        .await;
    let generator = CountingGenerator::new("application/pdf");

    let result = env
        .state
        .thumbnails
        .get_or_generate(&asset.id, ThumbnailSize::Medium, "v1", &generator)
        .await
        .unwrap();
    assert_eq!(result, Thumbnail::Icon("file-pdf"));
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalidate_forces_regeneration() {
    let env = setup().await;
    let owner = env.user("owner@brand.test", Role::Standard).await;
    let asset = env.local_asset(&owner, "logo.png", "image/png", None).await;
    let cache = &env.state.thumbnails;
    let generator = CountingGenerator::new("image/png");

    for size in [ThumbnailSize::Small, ThumbnailSize::Medium] {
        cache
            .get_or_generate(&asset.id, size, "v1", &generator)
            .await
            .unwrap();
    }
    assert_eq!(cache.invalidate(&asset.id).await.unwrap(), 2);
    assert_eq!(cache.invalidate(&asset.id).await.unwrap(), 0);

    cache
        .get_or_generate(&asset.id, ThumbnailSize::Small, "v1", &generator)
        .await
        .unwrap();
    assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_concurrent_misses_generate_once() {
    let env = setup().await;
    let owner = env.user("owner@brand.test", Role::Standard).await;
    let asset = env.local_asset(&owner, "logo.png", "image/png", None).await;
    let generator = Arc::new(CountingGenerator::new("image/png"));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = env.state.thumbnails.clone();
        let generator = generator.clone();
        let asset_id = asset.id.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_generate(&asset_id, ThumbnailSize::Small, "v1", generator.as_ref())
                .await
        }));
    }

    let mut payloads = Vec::new();
    for handle in handles {
        let thumbnail = handle.await.unwrap().unwrap();
        payloads.push(bytes_of(&thumbnail).to_vec());
    }
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert!(payloads.windows(2).all(|pair| pair[0] == pair[1]));
}

#[tokio::test]
async fn test_raster_generator_from_local_storage() {
    let env = setup().await;
    let owner = env.user("owner@brand.test", Role::Standard).await;
    env.state
        .storage
        .upload_file("brand/hero.png", png(800, 400))
        .await
        .unwrap();
    let asset = env
        .local_asset(&owner, "brand/hero.png", "image/png", None)
        .await;

    let generator = RasterGenerator::new(
        "image/png",
        RasterOrigin::Local {
            storage: env.state.storage.clone(),
            key: "brand/hero.png".to_string(),
        },
    );
    let result = env
        .state
        .thumbnails
        .get_or_generate(&asset.id, ThumbnailSize::Medium, "v1", &generator)
        .await
        .unwrap();

    let decoded = image::load_from_memory(bytes_of(&result)).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (300, 150));
}

#[tokio::test]
async fn test_raster_generator_through_drive_capability() {
    let env = setup().await;
    let owner = env.user("owner@brand.test", Role::Standard).await;
    env.connect_drive(&owner, Duration::hours(1)).await;
    env.drive.add_file("drive-photo", "image/png", png(400, 800));
    let asset = env
        .drive_asset(&owner, "drive-photo", Visibility::Shared, SharingMetadata::default())
        .await;

    let generator = RasterGenerator::new(
        "image/png",
        RasterOrigin::Drive {
            broker: env.state.broker.clone(),
            user_id: owner.clone(),
            provider_file_id: "drive-photo".to_string(),
        },
    );
    let result = env
        .state
        .thumbnails
        .get_or_generate(&asset.id, ThumbnailSize::Small, "v1", &generator)
        .await
        .unwrap();

    let decoded = image::load_from_memory(bytes_of(&result)).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (75, 150));
    assert_eq!(env.drive.download_calls.load(Ordering::SeqCst), 1);

    let proxied = env.audit_rows("file_proxy").await;
    assert_eq!(proxied.len(), 1);
    assert!(proxied[0].success);
    let issued = env.audit_rows("capability_issue").await;
    assert_eq!(issued.len(), 1);
}
