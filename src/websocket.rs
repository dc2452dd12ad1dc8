//! # Call WebSocket Handler
//!
//! The telephony provider connects to `/socket` once per phone call and streams
//! raw caller audio. Each connection becomes one `CallSocket` actor that owns
//! the call's `CallSession`.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: Provider upgrades `/socket` (503 when the server is full)
//! 2. **Handshake event**: First text message is `{"event":"websocket:connected",...}`
//! 3. **Audio Streaming**: Binary 8kHz linear16 frames in both directions
//! 4. **Notifications**: JSON text such as `{"type":"error","message":"..."}`
//! 5. **Close**: Either side closes; the session flushes the call recording
//!
//! ## Actor Model:
//! The actor receives three streams: socket messages, pipeline events and
//! transcription events. They are all handled on the actor's own context, so the
//! session is never shared or locked and the real-time path never awaits a
//! remote service.

use crate::error::AppError;
use crate::pipeline::PipelineEvent;
use crate::protocol::{ControlMessage, Outbound, TransportEvent};
use crate::session::{CallServices, CallSession};
use crate::state::AppState;
use crate::transcription::{TranscriptionEvent, TranscriptionService};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often the server pings the provider and checks for an idle call.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket actor for one phone call.
pub struct CallSocket {
    session: CallSession,

    /// Taken in `started` and attached to the actor context
    pipeline_events: Option<mpsc::UnboundedReceiver<PipelineEvent>>,

    /// Opened in `started`, once the handshake has succeeded
    transcription: Arc<dyn TranscriptionService>,

    state: AppState,

    /// Last time anything arrived from the provider
    last_activity: Instant,

    idle_timeout: Duration,

    /// Rate the provider is expected to announce in its connected event
    call_sample_rate: u32,
}

impl CallSocket {
    pub fn new(
        session: CallSession,
        pipeline_events: mpsc::UnboundedReceiver<PipelineEvent>,
        transcription: Arc<dyn TranscriptionService>,
        state: AppState,
    ) -> Self {
        let config = state.get_config();
        Self {
            session,
            pipeline_events: Some(pipeline_events),
            transcription,
            state,
            last_activity: Instant::now(),
            idle_timeout: Duration::from_secs(config.call.idle_timeout_secs),
            call_sample_rate: config.audio.call_sample_rate,
        }
    }

    fn send(&self, outbound: Outbound, ctx: &mut ws::WebsocketContext<Self>) {
        match outbound {
            Outbound::Audio(frame) => ctx.binary(frame),
            Outbound::Control(message) => {
                if let Ok(json) = serde_json::to_string(&message) {
                    ctx.text(json);
                }
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        match TransportEvent::parse(text) {
            Ok(event) if event.is_connected() => {
                info!(
                    session_id = %self.session.id(),
                    "Provider connected: {:?}", event.content_type
                );
                if let Some(rate) = event.sample_rate() {
                    if rate != self.call_sample_rate {
                        warn!(
                            session_id = %self.session.id(),
                            "Provider announced {}Hz audio, expected {}Hz",
                            rate,
                            self.call_sample_rate
                        );
                    }
                }
            }
            Ok(event) => {
                debug!(session_id = %self.session.id(), "Transport event: {}", event.event);
            }
            Err(err) => {
                debug!(session_id = %self.session.id(), "Ignoring non-event text message: {}", err);
            }
        }
    }

    fn handle_audio(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        if let Err(err) = self.session.handle_inbound_frame(data) {
            warn!(session_id = %self.session.id(), "Ending call: {}", err);
            self.send(Outbound::Control(ControlMessage::error(err.to_string())), ctx);
            ctx.close(Some(ws::CloseReason {
                code: ws::CloseCode::Invalid,
                description: Some(err.to_string()),
            }));
            ctx.stop();
        }
    }
}

impl Actor for CallSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session.id(), "Call connected");

        if let Some(events) = self.pipeline_events.take() {
            ctx.add_stream(UnboundedReceiverStream::new(events));
        }
        let transcripts = self.session.start_transcription(self.transcription.as_ref());
        ctx.add_stream(UnboundedReceiverStream::new(transcripts));

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_activity) > act.idle_timeout {
                warn!(
                    session_id = %act.session.id(),
                    "No traffic for {:?}, closing call", act.idle_timeout
                );
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.session.close();
        self.state.end_call();
        info!(
            session_id = %self.session.id(),
            status = self.session.status().as_str(),
            "Call disconnected"
        );
    }
}

/// Handle messages from the provider.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for CallSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.last_activity = Instant::now();
                self.handle_audio(&data, ctx);
            }
            Ok(ws::Message::Text(text)) => {
                self.last_activity = Instant::now();
                self.handle_text(&text);
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_activity = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_activity = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session.id(), "Provider closed the call: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.session.id(), "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.session.id(), "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// Pipeline output for the current turn.
impl StreamHandler<PipelineEvent> for CallSocket {
    fn handle(&mut self, event: PipelineEvent, ctx: &mut Self::Context) {
        if let Some(outbound) = self.session.handle_pipeline_event(event) {
            self.send(outbound, ctx);
        }
    }

    // Only ends after the session has closed
    fn finished(&mut self, _ctx: &mut Self::Context) {}
}

impl StreamHandler<TranscriptionEvent> for CallSocket {
    fn handle(&mut self, event: TranscriptionEvent, _ctx: &mut Self::Context) {
        self.session.handle_transcription_event(event);
    }

    /// A lost transcription stream never ends the call.
    fn finished(&mut self, _ctx: &mut Self::Context) {
        debug!(session_id = %self.session.id(), "Transcription stream ended");
    }
}

/// WebSocket endpoint handler for `GET /socket`.
///
/// ## HTTP to WebSocket Upgrade:
/// Reserves a call slot, creates the call session and hands both to a
/// `CallSocket` actor. The slot is returned if the upgrade fails, and the
/// transcription stream is only opened once the actor has started.
pub async fn call_socket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    services: web::Data<CallServices>,
) -> ActixResult<HttpResponse> {
    let config = state.get_config();
    if !state.try_begin_call() {
        warn!("Rejecting call: {} calls already active", config.call.max_concurrent_calls);
        return Err(AppError::ServiceUnavailable(format!(
            "Maximum concurrent calls ({}) reached",
            config.call.max_concurrent_calls
        ))
        .into());
    }

    let session_id = Uuid::new_v4().to_string();
    info!(
        session_id = %session_id,
        "New call from {:?}", req.connection_info().peer_addr()
    );

    let app_state = state.get_ref().clone();
    let (session, pipeline_events) = CallSession::new(
        session_id,
        &config,
        Arc::clone(&services.pipeline),
        app_state.clone(),
    );
    let socket = CallSocket::new(
        session,
        pipeline_events,
        Arc::clone(&services.transcription),
        app_state,
    );

    ws::start(socket, &req, stream).map_err(|err| {
        warn!("WebSocket upgrade failed: {}", err);
        state.end_call();
        err
    })
}
