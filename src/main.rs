mod config;
mod constants;
mod db;
mod domain;
mod inference;
mod logging;
mod routes;
mod services;
mod storage;

use anyhow::Context;
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::Arc;

use config::Config;
use inference::{FfmpegDecoder, OnnxClassifier, Pipeline};

pub struct AppState {
    db: SqlitePool,
    pipeline: Arc<Pipeline>,
    config: Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = Config::from_env().context("Invalid configuration")?;

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("Failed to create upload dir {:?}", config.upload_dir))?;

    let pool = db::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    db::migrate(&pool)
        .await
        .context("Failed to run migrations")?;

    // Loaded once, shared by every request.
    let classifier = OnnxClassifier::load(&config.model_path, config.output_head)
        .with_context(|| format!("Failed to load model {:?}", config.model_path))?;
    log::info!(
        "Loaded {} ({:?} head)",
        config.model_path.display(),
        classifier.head()
    );

    let decoder = FfmpegDecoder::new(&config.ffmpeg_bin, &config.ffprobe_bin);
    let pipeline = Pipeline::new(
        Arc::new(decoder),
        Arc::new(classifier),
        config.pipeline_options(),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = Arc::new(AppState {
        db: pool,
        pipeline: Arc::new(pipeline),
        config,
    });

    let app = routes::build_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    log::info!("Listening on http://{}", addr);
    // Peer addresses feed the per-IP rate limiter on the auth routes.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server failed")?;

    Ok(())
}
