//! Vigil Camserver
//!
//! Main entry point for the violence-detection pipeline server.

use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigil::{
    artifact_store::ArtifactStore,
    frame_source::SourceManager,
    incident_log::IncidentLog,
    model_client::ModelClient,
    notifier::{EmailChannel, NotificationChannel, NotificationDispatcher},
    pipeline::Pipeline,
    realtime_hub::RealtimeHub,
    state::{AppConfig, AppState},
    web_api,
};

/// Finalized incidents retained in memory
const INCIDENT_LOG_CAPACITY: usize = 1000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Vigil Camserver v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        model_server_url = %config.model_server_url,
        data_dir = %config.data_dir.display(),
        cameras = config.cameras.len(),
        frame_size = format!("{}x{}", config.frame_width, config.frame_height),
        "Configuration loaded"
    );

    // Initialize components
    let artifacts = Arc::new(ArtifactStore::new(config.data_dir.clone()).await?);
    tracing::info!(data_dir = %config.data_dir.display(), "ArtifactStore initialized");

    let model = Arc::new(ModelClient::new(config.model_server_url.clone()));
    if !model.health_check().await.unwrap_or(false) {
        tracing::warn!(url = %config.model_server_url, "Model server unreachable at startup");
    }

    let incident_log = Arc::new(IncidentLog::new(INCIDENT_LOG_CAPACITY));
    let hub = Arc::new(RealtimeHub::new());
    let sources = Arc::new(SourceManager::new());

    let email_channel: Arc<dyn NotificationChannel> = Arc::new(EmailChannel::new(
        config.email.clone(),
        config.data_dir.clone(),
    ));
    let dispatcher = NotificationDispatcher::new(vec![email_channel]);
    dispatcher.start().await;
    tracing::info!("NotificationDispatcher started");

    let pipeline = Arc::new(Pipeline::new(
        model.clone(),
        model.clone(),
        artifacts.clone(),
        incident_log.clone(),
        dispatcher.clone(),
        hub.clone(),
    ));
    tracing::info!("Pipeline initialized");

    // Create application state
    let state = AppState {
        config: config.clone(),
        sources: sources.clone(),
        model,
        incident_log,
        dispatcher,
        hub,
        artifacts,
        pipeline,
    };

    // Reap camera sources nobody is watching
    let source_reaper = sources.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let reclaimed = source_reaper.cleanup_inactive().await;
            if reclaimed > 0 {
                tracing::info!(reclaimed, "Idle camera sources reclaimed");
            }
        }
    });

    // Create router with artifact serving under /static
    let app = web_api::create_router(state)
        .nest_service("/static", ServeDir::new(&config.data_dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(addr = %addr, "Server listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
