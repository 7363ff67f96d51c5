use clap::Parser;
use drive_access_core::config::AccessConfig;
use drive_access_core::infrastructure::database;
use drive_access_core::services::providers::DriveProvider;
use drive_access_core::services::providers::google_drive::GoogleDriveProvider;
use drive_access_core::services::storage::LocalStorageService;
use drive_access_core::services::sweeper::BackgroundSweeper;
use drive_access_core::{AppState, create_app};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service type to run (api, worker, all)
    #[arg(short, long, default_value = "all")]
    mode: String,

    /// Port for the API server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// Use relaxed development defaults instead of requiring secrets
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment & logging
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drive_access_core=info,audit=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Drive Access Core [Mode: {}]...", args.mode);

    let config = if args.dev {
        AccessConfig {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| AccessConfig::default().database_url),
            ..AccessConfig::development()
        }
    } else {
        AccessConfig::production()?
    };
    info!("🛡️  Access Config: {:?}", config);

    // 2. Shared infrastructure
    let db = database::setup_database(&config).await?;
    let provider = Arc::new(GoogleDriveProvider::new(
        config.google_client_id.clone(),
        config.google_client_secret.clone(),
        config.google_redirect_uri.clone(),
    ));
    info!("☁️  Drive provider: {}", provider.display_name());
    let storage = Arc::new(LocalStorageService::new(config.storage_root.clone()));
    let state = AppState::new(db, config.clone(), provider, storage);

    // 3. Graceful shutdown channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut handles = Vec::new();

    // 4. Sweeper
    if args.mode == "worker" || args.mode == "all" {
        let sweeper = BackgroundSweeper::new(
            state.broker.clone(),
            state.credentials.clone(),
            state.thumbnails.clone(),
            config.sweep_interval_secs,
            shutdown_rx.clone(),
        );
        handles.push(tokio::spawn(sweeper.run()));
        info!("👷 Capability sweeper initialized.");
    }

    // 5. API
    if args.mode == "api" || args.mode == "all" {
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    // Proxy URLs carry capability tokens; log the path only.
                    path = %request.uri().path(),
                )
            })
            .on_response(
                |response: &axum::http::Response<_>,
                 latency: std::time::Duration,
                 _span: &tracing::Span| {
                    info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                },
            );

        let app = create_app(state).layer(trace_layer);
        let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("✅ API Server listening on: http://0.0.0.0:{}", args.port);
        info!("📖 Swagger UI documentation: http://localhost:{}/swagger-ui", args.port);

        let mut server_shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown.changed().await;
                })
                .await
            {
                error!("❌ Server runtime error: {}", e);
            }
        }));
    }

    // 6. Wait for a signal, then notify every task
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    info!("🛑 Shutting down access core services...");
    for handle in handles {
        let _ = handle.await;
    }

    info!("👋 Access core exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
