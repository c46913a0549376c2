//! # Nexus Voice - Main Application Entry Point
//!
//! Starts the voice session service on the host's audio devices and an
//! Actix-web server that controls it.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: the HTTP server and the voice service share one runtime
//! - **Trait objects**: the controller only sees `AudioInput`, `OutputDevice` and `Connector`
//! - **Result<T, E>**: startup failures propagate with `?`
//!
//! ## Application Architecture:
//! - **config**: defaults, optional config file and environment variables
//! - **session**: the voice controller, hosted on its own task
//! - **handlers / health / websocket**: the HTTP and WebSocket surface

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use nexus_voice::audio::{CpalInput, CpalOutputDevice};
use nexus_voice::config::AppConfig;
use nexus_voice::live::WebSocketConnector;
use nexus_voice::session::{VoiceController, VoiceService};
use nexus_voice::state::AppState;
use nexus_voice::{handlers, health, websocket};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging**
/// 3. **Spawns the voice service** with the cpal devices and the Live connector
/// 4. **Serves HTTP** until Ctrl+C or SIGTERM
/// 5. **Shuts the voice service down** so devices are released before exit
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting nexus-voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!("Live model {} with voice {}", config.live.model, config.live.voice);
    if !config.has_api_key() {
        warn!("No API key configured (set GEMINI_API_KEY); sessions will fail to connect");
    }

    let controller = VoiceController::new(
        config.voice_config(),
        Arc::new(CpalInput),
        Arc::new(CpalOutputDevice::new(config.output_device())),
        Arc::new(WebSocketConnector::new(
            config.live.endpoint.clone(),
            config.live.api_key.clone(),
        )),
    );
    let voice = VoiceService::spawn(controller);

    let app_state = AppState::new(config.clone(), voice.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

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
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/voice/start", web::post().to(handlers::start_session))
                    .route("/voice/stop", web::post().to(handlers::stop_session))
                    .route("/voice/status", web::get().to(handlers::session_status))
                    .route("/voice/devices", web::get().to(handlers::list_audio_devices)),
            )
            .route("/ws/status", web::get().to(websocket::status_websocket))
            .route("/health", web::get().to(health::health_check))
    })
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    voice.shutdown().await;
    info!("Server stopped gracefully");
    Ok(())
}

/// ## Environment Variables:
/// - `RUST_LOG`: e.g. "debug" or "nexus_voice=trace"
/// - If not set, defaults to "nexus_voice=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nexus_voice=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolve on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
