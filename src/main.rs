//! # Call Agent Backend - Main Application Entry Point
//!
//! A voice agent that answers phone calls. The telephony provider streams each
//! call's audio over a WebSocket; the server detects when the caller stops
//! talking, generates a spoken reply and streams it back into the call, and
//! records the whole conversation to a WAV file.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: The entire application is asynchronous
//! - **Actors**: Each call is one Actix actor that owns its own state
//! - **Trait objects**: Remote services sit behind traits so they can be faked in tests
//! - **Result<T, E>**: Errors are propagated with `?` up to startup
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, config.toml, environment)
//! - **state**: Shared configuration and call metrics
//! - **audio**: Frame loudness, voice activity, resampling, recording, WAV muxing
//! - **transcription**: Streaming speech-to-text client
//! - **services**: Chat completion and speech synthesis clients
//! - **pipeline**: One task per turn: completion → synthesis → resampling
//! - **session**: Per-call controller tying the pieces together
//! - **websocket**: The per-call actor and the `/socket` upgrade endpoint
//! - **handlers**: Telephony webhooks and config introspection
//! - **health**: Health and load reporting

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod pipeline;
mod protocol;
mod services;
mod session;
mod state;
mod transcription;
mod websocket;

use crate::config::AppConfig;
use crate::session::CallServices;
use crate::state::AppState;
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal, set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** and refuses to start without service credentials
/// 2. **Sets up logging**
/// 3. **Builds the remote service clients** shared by every call
/// 4. **Configures the HTTP server** with the call socket, webhooks and health routes
/// 5. **Handles graceful shutdown** on SIGINT/SIGTERM
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;
    config.require_credentials()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!("Recordings will be written to {}", config.call.recordings_dir.display());
    info!("Answer webhook will connect calls to {}", config.socket_uri());

    let services = CallServices::from_config(&config)?;
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
            .app_data(web::Data::new(services.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            // One WebSocket per phone call
            .route("/socket", web::get().to(websocket::call_socket))
            .service(
                web::scope("/webhooks")
                    .route("/answer", web::get().to(handlers::answer_call))
                    .route("/events", web::post().to(handlers::call_event)),
            )
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/config", web::get().to(handlers::get_config)),
            )
            .route("/health", web::get().to(health::health_check))
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
            // Graceful stop lets open calls close and flush their recordings
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "call_agent_backend=trace")
/// - Defaults to "call_agent_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "call_agent_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM and SIGINT and set the global shutdown flag.
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

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

/// Wait for the shutdown signal to be set.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
