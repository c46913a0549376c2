use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config.redacted()
    })))
}

/// Apply a partial update. The live and audio sections take effect on the
/// next session; a running session keeps the settings it started with.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state.update_config(current_config.clone()).await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": current_config.redacted()
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::session::testing::{FakeConnector, FakeInput, FakeOutputDevice};
    use crate::session::{VoiceConfig, VoiceController, VoiceService};
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use std::sync::Arc;

    fn app_state() -> AppState {
        let controller = VoiceController::new(
            VoiceConfig::default(),
            Arc::new(FakeInput::default()),
            Arc::new(FakeOutputDevice::new()),
            Arc::new(FakeConnector::default()),
        );
        AppState::new(AppConfig::default(), VoiceService::spawn(controller))
    }

    #[actix_web::test]
    async fn test_out_of_range_audio_update_is_rejected_and_config_kept() {
        let state = app_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/config", web::put().to(update_config)),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(serde_json::json!({
                "audio": {"frame_size": 1099511627776u64, "output_sample_rate": 4294967297u64}
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let config = state.get_config();
        assert_eq!(config.audio.frame_size, AppConfig::default().audio.frame_size);
        assert_eq!(
            config.audio.output_sample_rate,
            AppConfig::default().audio.output_sample_rate
        );
    }

    #[actix_web::test]
    async fn test_in_range_audio_update_is_stored() {
        let state = app_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/config", web::put().to(update_config)),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/config")
            .set_json(serde_json::json!({"audio": {"frame_size": 2048}}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.get_config().audio.frame_size, 2048);
    }
}
