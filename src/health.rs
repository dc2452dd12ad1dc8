use crate::config::AppConfig;
use crate::state::{AppState, CallMetrics};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "calls": {
            "active": metrics.active_calls,
            "total": metrics.total_calls,
            "utterances_dispatched": metrics.utterances_dispatched,
            "turns_completed": metrics.turns_completed,
            "turn_failures": metrics.turn_failures,
            "turn_failure_rate": metrics.turn_failure_rate()
        },
        "recordings": {
            "written": metrics.recordings_written,
            "failed": metrics.recording_failures,
            "directory": config.call.recordings_dir
        },
        "system": get_load_status(&config, &metrics)
    }))
}

fn get_load_status(config: &AppConfig, metrics: &CallMetrics) -> serde_json::Value {
    let max_calls = config.call.max_concurrent_calls;
    let usage = if max_calls > 0 {
        metrics.active_calls as f64 / max_calls as f64
    } else {
        0.0
    };

    let status = if usage >= 1.0 {
        "at_capacity"
    } else if usage > 0.7 {
        "high_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "call_usage_percent": (usage * 100.0).round(),
        "max_calls": max_calls,
        "current_calls": metrics.active_calls
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health_reports_call_metrics() {
        let mut config = AppConfig::default();
        config.call.max_concurrent_calls = 1;
        let state = AppState::new(config);
        state.try_begin_call();
        state.record_utterance();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"]["name"], "call-agent-backend");
        assert_eq!(body["calls"]["active"], 1);
        assert_eq!(body["calls"]["utterances_dispatched"], 1);
        assert_eq!(body["system"]["status"], "at_capacity");
    }
}
