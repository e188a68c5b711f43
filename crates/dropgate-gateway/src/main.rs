use std::sync::Arc;

use dropgate_core::Config;
use dropgate_gateway::{UploadGateway, UploadPolicy};
use dropgate_storage::{LocalStorage, MemoryStorage, StorageRegistry, UploadStorage};
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenvy::dotenv().ok();
    dropgate_gateway::telemetry::init_telemetry()?;

    // Load configuration
    let config = Config::from_env()?;

    // Storage registration happens before the gateway starts serving.
    let registry = Arc::new(StorageRegistry::new());
    match (&config.local_storage_path, &config.local_storage_base_url) {
        (Some(path), Some(base_url)) => {
            let disk = LocalStorage::new("disk", path.clone(), base_url.clone()).await?;
            registry
                .register_instance(Arc::new(disk) as Arc<dyn UploadStorage>)
                .await?;
        }
        _ => {
            tracing::warn!(
                "LOCAL_STORAGE_PATH / LOCAL_STORAGE_BASE_URL not set, storing uploads in memory"
            );
            let memory = MemoryStorage::new("disk", "memory://uploads");
            registry
                .register_instance(Arc::new(memory) as Arc<dyn UploadStorage>)
                .await?;
        }
    }

    let gateway = Arc::new(UploadGateway::new(registry));
    gateway.add(
        UploadPolicy::new("asset.upload", config.upload_path.clone())
            .field(config.upload_field_name.clone())
            .limits(config.default_limits)
            .storage_name("disk")
            .process(|_ctx, _file| Box::pin(async { Ok(()) })),
    )?;

    let app = dropgate_gateway::router(gateway).layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.server_port);
    tracing::info!(
        addr = %addr,
        upload_path = %config.upload_path,
        field = %config.upload_field_name,
        max_file_mb = config.default_limits.file_size / 1_000_000,
        "Server ready and accepting connections"
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Signal handler for graceful shutdown
///
/// Listens for Ctrl+C (SIGINT) and SIGTERM signals to initiate graceful
/// shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal");
        },
    }

    tracing::info!("Shutting down gracefully...");
}
