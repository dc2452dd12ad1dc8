//! Telephony provider webhooks.
//!
//! - **Answer**: tells the provider to stream the call's audio to `/socket`
//! - **Events**: call status notifications, logged and acknowledged

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Serialize;
use tracing::info;

/// Audio format requested from the provider.
const CALL_CONTENT_TYPE: &str = "audio/l16;rate=8000";

/// Caller id shown on the provider side of the connection.
const CONNECT_FROM: &str = "NexmoTest";

/// One action of a call-control (NCCO) script.
#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum CallAction {
    Connect {
        from: String,
        endpoint: Vec<Endpoint>,
    },
}

#[derive(Debug, Serialize)]
struct Endpoint {
    #[serde(rename = "type")]
    kind: &'static str,
    uri: String,
    #[serde(rename = "content-type")]
    content_type: String,
}

fn answer_script(socket_uri: String, call_sample_rate: u32) -> Vec<CallAction> {
    let content_type = if call_sample_rate == 8000 {
        CALL_CONTENT_TYPE.to_string()
    } else {
        format!("audio/l16;rate={}", call_sample_rate)
    };

    vec![CallAction::Connect {
        from: CONNECT_FROM.to_string(),
        endpoint: vec![Endpoint {
            kind: "websocket",
            uri: socket_uri,
            content_type,
        }],
    }]
}

/// `GET /webhooks/answer`
pub async fn answer_call(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let socket_uri = config.socket_uri();
    info!("Answering call, streaming audio to {}", socket_uri);

    HttpResponse::Ok().json(answer_script(socket_uri, config.audio.call_sample_rate))
}

/// `POST /webhooks/events`
pub async fn call_event(body: web::Json<serde_json::Value>) -> HttpResponse {
    info!("Call event: {}", body.into_inner());
    HttpResponse::Ok().finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::json;

    #[actix_web::test]
    async fn test_answer_returns_connect_action() {
        let mut config = AppConfig::default();
        config.server.host = "calls.example.com".to_string();
        config.server.port = 3000;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(config)))
                .route("/webhooks/answer", web::get().to(answer_call)),
        )
        .await;

        let req = test::TestRequest::get().uri("/webhooks/answer").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(
            body,
            json!([{
                "action": "connect",
                "from": "NexmoTest",
                "endpoint": [{
                    "type": "websocket",
                    "uri": "ws://calls.example.com:3000/socket",
                    "content-type": "audio/l16;rate=8000"
                }]
            }])
        );
    }

    #[actix_web::test]
    async fn test_events_are_acknowledged() {
        let app =
            test::init_service(App::new().route("/webhooks/events", web::post().to(call_event)))
                .await;

        let req = test::TestRequest::post()
            .uri("/webhooks/events")
            .set_json(json!({"status": "answered", "uuid": "abc"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
