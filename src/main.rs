use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use tubely_backend::{
    auth::JwtValidator,
    cleanup,
    config::Config,
    db::MemoryVideoStore,
    ffmpeg::Ffmpeg,
    handlers,
    models::AppState,
    staging::Stager,
    storage::S3ObjectStore,
    system_info,
    upload::{Collaborators, UploadPipeline},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tubely_backend=debug,tower_http=debug")),
        )
        .init();

    // Load configuration
    let config = Config::load()?;

    // Ensure directories exist
    tokio::fs::create_dir_all(&config.staging_dir).await?;

    // Print system info at startup
    system_info::print_startup_info(&config).await;

    let videos = match &config.seed_file {
        Some(path) => MemoryVideoStore::from_seed_file(path).await?,
        None => MemoryVideoStore::new(),
    };
    let media = Arc::new(Ffmpeg::new(
        config.media.ffmpeg_path.clone(),
        config.media.ffprobe_path.clone(),
    ));

    let pipeline = UploadPipeline::new(
        Collaborators {
            videos: Arc::new(videos),
            tokens: Arc::new(JwtValidator::new(&config.jwt_secret)),
            prober: media.clone(),
            remuxer: media,
            objects: Arc::new(S3ObjectStore::new(&config.storage)),
        },
        Stager::new(config.staging_dir.clone(), config.max_upload_bytes),
        &config.storage,
    );

    let app_state = Arc::new(AppState {
        pipeline: Arc::new(pipeline),
    });

    cleanup::start_cleanup_task(config.staging_dir.clone(), config.cleanup.clone());

    let app = handlers::router(app_state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("✅ Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
