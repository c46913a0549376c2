use crate::session::{SessionState, SessionStatus, StatsSnapshot};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();
    let session = state.voice.status();
    let stats = state.voice.stats();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "nexus-voice",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "session": session,
        "live": {
            "model": config.live.model,
            "voice": config.live.voice,
            "api_key_configured": config.has_api_key()
        },
        "metrics": {
            "sessions_started": stats.sessions_started,
            "sessions_failed": stats.sessions_failed,
            "transport_errors": stats.transport_errors
        },
        "memory": get_memory_info(),
        "system": get_system_status(&session, &stats)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let stats = state.voice.stats();
    let uptime_seconds = state.get_uptime_seconds();
    let config = state.get_config();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "sessions": {
            "started": stats.sessions_started,
            "failed": stats.sessions_failed,
            "failure_rate": ratio(stats.sessions_failed, stats.sessions_started)
        },
        "capture": {
            "frames_sent": stats.frames_sent,
            "frames_dropped": stats.frames_dropped,
            "drop_rate": ratio(stats.frames_dropped, stats.frames_sent + stats.frames_dropped),
            "frames_per_second": if uptime_seconds > 0 {
                stats.frames_sent as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "playback": {
            "chunks_scheduled": stats.chunks_scheduled,
            "payloads_dropped": stats.payloads_dropped,
            "interruptions": stats.interruptions
        },
        "transport": {
            "errors": stats.transport_errors
        },
        "memory": get_memory_info(),
        "audio": {
            "input_sample_rate": config.audio.input_sample_rate,
            "output_sample_rate": config.audio.output_sample_rate,
            "frame_size": config.audio.frame_size
        }
    }))
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64
    } else {
        0.0
    }
}

fn get_memory_info() -> serde_json::Value {
    let pid = process::id();

    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_rss = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                } else if line.starts_with("VmSize:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_size = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    let _ = pid;
    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

/// Coarse health of the audio pipeline.
///
/// Dropped capture frames mean the transport is not keeping up with the
/// microphone; dropped payloads mean the model sent audio we could not decode.
fn get_system_status(session: &SessionStatus, stats: &StatsSnapshot) -> serde_json::Value {
    let drop_rate = ratio(stats.frames_dropped, stats.frames_sent + stats.frames_dropped);

    let mut warnings = Vec::new();
    if drop_rate > 0.05 {
        warnings.push("Capture frames are being dropped - the uplink is not keeping up");
    }
    if stats.payloads_dropped > 0 {
        warnings.push("Some audio payloads from the model could not be decoded");
    }

    let status = if session.state == SessionState::Error {
        "degraded"
    } else if warnings.is_empty() {
        "normal"
    } else {
        "warning"
    };

    json!({
        "status": status,
        "capture_drop_percent": (drop_rate * 100.0).round(),
        "warnings": warnings
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_status_flags_dropped_frames() {
        let stats = StatsSnapshot {
            frames_sent: 90,
            frames_dropped: 10,
            ..StatsSnapshot::default()
        };
        let status = get_system_status(&SessionStatus::standby(), &stats);
        assert_eq!(status["status"], "warning");
        assert_eq!(status["capture_drop_percent"], 10.0);
    }

    #[test]
    fn test_system_status_reports_error_session_as_degraded() {
        let session = SessionStatus::error("Access Denied", None);
        let status = get_system_status(&session, &StatsSnapshot::default());
        assert_eq!(status["status"], "degraded");
        assert_eq!(status["warnings"].as_array().map(Vec::len), Some(0));
    }

    #[test]
    fn test_ratio_handles_zero() {
        assert_eq!(ratio(3, 0), 0.0);
        assert_eq!(ratio(1, 4), 0.25);
    }
}
