//! # Speech Chat Backend - Main Application Entry Point
//!
//! Actix-web server exposing two speech-to-text surfaces:
//!
//! - `POST /transcribe`: batch upload of a complete audio file, transcribed
//!   through an upstream speech-to-text service (chunked when oversized)
//! - `GET /realtime`: bidirectional WebSocket relayed to an upstream realtime
//!   speech API
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML file + environment variables)
//! - **state**: shared application state, metrics, session registry
//! - **audio**: upload validation, decoding, chunk planning, scratch storage
//! - **transcription**: upstream batch service client + orchestrator
//! - **realtime**: upstream realtime connection, session state, registry
//! - **websocket**: the relay actor behind `/realtime`
//! - **handlers / health / middleware**: HTTP surface and telemetry
//! - **error**: error taxonomy and HTTP mappings

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod realtime;
mod state;
mod transcription;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal, set by the signal handler task and polled by the
/// main task to stop the server gracefully.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present; fine if there is none.
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting speech-chat-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{}",
        config.server.host, config.server.port
    );

    // The credential is a per-request condition, not a startup precondition:
    // note its absence loudly but keep serving.
    if config.has_upstream_credential() {
        info!("Upstream API credential loaded");
    } else {
        warn!("OPENAI_API_KEY is not set; transcription and realtime sessions will be refused");
    }

    let app_state = AppState::new(config.clone());
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
            .route("/transcribe", web::post().to(handlers::transcribe_upload))
            .route("/realtime", web::get().to(websocket::realtime_endpoint))
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Race the server against the shutdown signal.
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

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize structured logging.
///
/// `RUST_LOG` controls verbosity; the default keeps this crate at debug and
/// the framework at info.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "speech_chat_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT and flip the shutdown flag.
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

/// Wait until the shutdown flag is set, checking every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
