//! Session control endpoints.
//!
//! - `POST /api/v1/voice/start`: begin a session (ignored while one is connecting or active)
//! - `POST /api/v1/voice/stop`: end the session and release devices
//! - `GET  /api/v1/voice/status`: current status line
//! - `GET  /api/v1/voice/devices`: audio devices visible to the host

use crate::audio::device::{list_devices, Direction};
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

pub async fn start_session(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let outcome = state.voice.start().await?;
    if outcome.accepted {
        info!("Voice session requested");
    }

    let response = if outcome.accepted {
        HttpResponse::Accepted()
    } else {
        HttpResponse::Conflict()
    }
    .json(json!({
        "accepted": outcome.accepted,
        "status": outcome.status,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }));

    Ok(response)
}

pub async fn stop_session(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let status = state.voice.stop().await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub async fn session_status(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(json!({
        "status": state.voice.status(),
        "stats": state.voice.stats(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub async fn list_audio_devices(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();
    // Device enumeration can block on some hosts.
    let (inputs, outputs) = web::block(|| (list_devices(Direction::Input), list_devices(Direction::Output)))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(HttpResponse::Ok().json(json!({
        "input": {
            "selected": config.audio.input_device,
            "available": inputs
        },
        "output": {
            "selected": config.audio.output_device,
            "available": outputs
        }
    })))
}
