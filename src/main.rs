//! # Transcribe Backend - Main Application Entry Point
//!
//! HTTP server that accepts audio uploads, transcribes them in the
//! background with a Whisper model, persists the results, and notifies
//! subscribed WebSocket channels per upload batch.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML file + environment variables)
//! - **state**: shared application state, metrics, injected services
//! - **db**: SQLite-backed transcription record store
//! - **transcription**: audio decoding and the Whisper engine
//! - **notify**: batch id -> live channel registry and the event types
//! - **batch**: background batch processing
//! - **handlers / websocket / health**: the HTTP and WebSocket surface

mod batch;
mod config;
mod db;
mod error;
mod handlers;
mod health;
mod middleware;
mod notify;
mod state;
mod transcription;
mod websocket;

use crate::batch::BatchProcessor;
use crate::config::AppConfig;
use crate::db::TranscriptionStore;
use crate::notify::NotificationRegistry;
use crate::state::AppState;
use crate::transcription::{SpeechToText, TranscriptionEngine};
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown flag set by the signal handlers.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting transcribe-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    std::fs::create_dir_all(&config.storage.audio_dir)?;

    let store = TranscriptionStore::open(&config.storage.database_path).await?;
    let registry = Arc::new(NotificationRegistry::new());
    // The model itself loads lazily on the first transcription request.
    let engine: Arc<dyn SpeechToText> = Arc::new(TranscriptionEngine::new(&config.models)?);
    let processor = Arc::new(BatchProcessor::new(
        engine,
        store.clone(),
        Arc::clone(&registry),
    ));

    let app_state = AppState::new(config.clone(), store, Arc::clone(&registry), processor);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::RequestTelemetry)
            .service(
                web::scope("/api")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/transcribe", web::post().to(handlers::transcribe))
                    .route("/transcriptions", web::get().to(handlers::list_transcriptions))
                    .route("/search", web::get().to(handlers::search_transcriptions)),
            )
            .route(
                "/ws/transcript_ready/{batch_uuid}",
                web::get().to(websocket::transcript_ready),
            )
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    registry.clear();
    info!("Server stopped gracefully");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transcribe_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Install SIGTERM/SIGINT handlers that flip the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
