pub mod api;
pub mod config;
pub mod entities;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::AccessConfig;
use crate::services::audit::AuditService;
use crate::services::broker::AccessBroker;
use crate::services::credentials::CredentialManager;
use crate::services::directory::AccessDirectory;
use crate::services::providers::DriveProvider;
use crate::services::storage::StorageService;
use crate::services::thumbnails::ThumbnailCache;
use crate::services::vault::CredentialVault;
use axum::{
    Router,
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::health::health_check,
        api::handlers::permissions::check_permission,
        api::handlers::capabilities::issue_capability,
        api::handlers::proxy::proxy_file,
        api::handlers::thumbnails::get_thumbnail,
        api::handlers::thumbnails::invalidate_thumbnail,
        api::handlers::drive::connect_drive,
        api::handlers::drive::drive_callback,
        api::handlers::drive::connection_status,
        api::handlers::drive::disconnect_drive,
    ),
    components(
        schemas(
            api::handlers::health::HealthResponse,
            api::handlers::permissions::PermissionCheckRequest,
            api::handlers::permissions::PermissionCheckResponse,
            api::handlers::capabilities::IssueCapabilityRequest,
            api::handlers::capabilities::CapabilityResponse,
            api::handlers::thumbnails::InvalidateResponse,
            api::handlers::drive::ConsentResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "access", description = "Permission checks and capability tokens"),
        (name = "thumbnails", description = "Preview cache"),
        (name = "drive", description = "Drive connection lifecycle")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "jwt",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: AccessConfig,
    pub directory: AccessDirectory,
    pub credentials: Arc<CredentialManager>,
    pub broker: AccessBroker,
    pub thumbnails: ThumbnailCache,
    pub storage: Arc<dyn StorageService>,
    pub audit: AuditService,
}

impl AppState {
    /// Wire every service from its dependencies
    pub fn new(
        db: DatabaseConnection,
        config: AccessConfig,
        provider: Arc<dyn DriveProvider>,
        storage: Arc<dyn StorageService>,
    ) -> Self {
        let audit = AuditService::new(db.clone());
        let directory = AccessDirectory::new(db.clone());
        let credentials = Arc::new(CredentialManager::new(
            db.clone(),
            CredentialVault::new(&config.credential_encryption_key),
            provider,
            audit.clone(),
            config.jwt_secret.clone(),
            config.token_expiry_skew_secs,
        ));
        let broker = AccessBroker::new(
            db.clone(),
            directory.clone(),
            credentials.clone(),
            audit.clone(),
            config.proxy_timeout_secs,
        );
        let thumbnails = ThumbnailCache::new(db.clone());

        Self {
            db,
            config,
            directory,
            credentials,
            broker,
            thumbnails,
            storage,
            audit,
        }
    }
}

fn cors_layer(config: &AccessConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/permissions/check",
            post(api::handlers::permissions::check_permission),
        )
        .route(
            "/assets/:id/capabilities",
            post(api::handlers::capabilities::issue_capability),
        )
        .route(
            "/assets/:id/thumbnail",
            get(api::handlers::thumbnails::get_thumbnail)
                .delete(api::handlers::thumbnails::invalidate_thumbnail),
        )
        .route("/drive/connect", get(api::handlers::drive::connect_drive))
        .route(
            "/drive/connection",
            get(api::handlers::drive::connection_status)
                .delete(api::handlers::drive::disconnect_drive),
        )
        .layer(from_fn_with_state(
            state.clone(),
            api::middleware::auth::auth_middleware,
        ));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/proxy/:provider_file_id",
            get(api::handlers::proxy::proxy_file),
        )
        .route("/drive/callback", get(api::handlers::drive::drive_callback))
        .merge(protected)
        .layer(cors_layer(&state.config))
        .with_state(state)
}
