//! # Deepgram Live Transcription
//!
//! One WebSocket per call to `wss://api.deepgram.com/v1/listen`. A background
//! task owns the socket and multiplexes three things with `tokio::select!`:
//!
//! 1. Commands from the call (audio frames, finalize, close)
//! 2. A keep-alive timer so the stream survives long silences
//! 3. Result messages from Deepgram, forwarded as transcript text
//!
//! ## Wire format:
//! - **Outbound**: binary linear16 frames, plus JSON control messages
//!   (`KeepAlive`, `Finalize`, `CloseStream`)
//! - **Inbound**: JSON `Results` messages carrying
//!   `channel.alternatives[0].transcript`

use crate::config::TranscriptionConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::transcription::{
    TranscriptionChannel, TranscriptionCommand, TranscriptionEvent, TranscriptionService,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const SERVICE: &str = "transcription";

#[derive(Debug, Deserialize)]
struct LiveMessage {
    #[serde(rename = "type")]
    kind: String,
    channel: Option<LiveChannel>,
}

#[derive(Debug, Deserialize)]
struct LiveChannel {
    #[serde(default)]
    alternatives: Vec<LiveAlternative>,
}

#[derive(Debug, Deserialize)]
struct LiveAlternative {
    #[serde(default)]
    transcript: String,
}

/// Pull the best transcript out of a Deepgram message.
///
/// Returns `None` for metadata, utterance-end and speech-started messages, for
/// results with no alternatives, and for empty transcripts.
pub fn parse_transcript(text: &str) -> Option<String> {
    let message: LiveMessage = serde_json::from_str(text).ok()?;
    if message.kind != "Results" {
        return None;
    }

    let transcript = message
        .channel?
        .alternatives
        .into_iter()
        .next()?
        .transcript;

    if transcript.trim().is_empty() {
        None
    } else {
        Some(transcript)
    }
}

fn control_message(kind: &str) -> Message {
    Message::Text(serde_json::json!({ "type": kind }).to_string())
}

fn stream_error(err: impl std::fmt::Display) -> ServiceError {
    ServiceError::Stream {
        service: SERVICE,
        message: err.to_string(),
    }
}

/// Opens Deepgram live streams for calls.
pub struct DeepgramTranscriber {
    config: TranscriptionConfig,
    sample_rate: u32,
}

impl DeepgramTranscriber {
    pub fn new(config: TranscriptionConfig, sample_rate: u32) -> Self {
        Self { config, sample_rate }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}?model={}&sample_rate={}&channels=1&encoding=linear16",
            self.config.url, self.config.model, self.sample_rate
        )
    }
}

impl TranscriptionService for DeepgramTranscriber {
    fn open(&self, session_id: &str) -> TranscriptionChannel {
        let (channel, commands, events) = TranscriptionChannel::pair();

        let worker = StreamWorker {
            session_id: session_id.to_string(),
            endpoint: self.endpoint(),
            api_key: self.config.api_key.clone(),
            keep_alive: Duration::from_secs(self.config.keep_alive_secs.max(1)),
        };
        tokio::spawn(worker.run(commands, events));

        channel
    }
}

/// Everything the background task needs, moved out of the transcriber.
struct StreamWorker {
    session_id: String,
    endpoint: String,
    api_key: String,
    keep_alive: Duration,
}

impl StreamWorker {
    async fn run(
        self,
        mut commands: mpsc::UnboundedReceiver<TranscriptionCommand>,
        events: mpsc::UnboundedSender<TranscriptionEvent>,
    ) {
        if let Err(e) = self.stream(&mut commands, &events).await {
            warn!(session_id = %self.session_id, "Transcription stream failed: {}", e);
            let _ = events.send(TranscriptionEvent::Error(e.to_string()));
        }

        info!(session_id = %self.session_id, "Transcription stream closed");
        let _ = events.send(TranscriptionEvent::Closed);
    }

    async fn stream(
        &self,
        commands: &mut mpsc::UnboundedReceiver<TranscriptionCommand>,
        events: &mpsc::UnboundedSender<TranscriptionEvent>,
    ) -> ServiceResult<()> {
        let mut request = self.endpoint.as_str().into_client_request().map_err(stream_error)?;
        let token =
            HeaderValue::from_str(&format!("Token {}", self.api_key)).map_err(stream_error)?;
        request.headers_mut().insert(AUTHORIZATION, token);

        let (socket, _response) = connect_async(request).await.map_err(stream_error)?;
        info!(session_id = %self.session_id, "Transcription stream connected");

        let (mut sink, mut source) = socket.split();
        let mut keep_alive = tokio::time::interval(self.keep_alive);
        // First tick fires immediately
        keep_alive.tick().await;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(TranscriptionCommand::Audio(frame)) => {
                        sink.send(Message::Binary(frame)).await.map_err(stream_error)?;
                    }
                    Some(TranscriptionCommand::Finalize) => {
                        debug!(session_id = %self.session_id, "Finalizing utterance");
                        sink.send(control_message("Finalize")).await.map_err(stream_error)?;
                    }
                    Some(TranscriptionCommand::Close) | None => {
                        let _ = sink.send(control_message("CloseStream")).await;
                        let _ = sink.close().await;
                        return Ok(());
                    }
                },
                _ = keep_alive.tick() => {
                    sink.send(control_message("KeepAlive")).await.map_err(stream_error)?;
                }
                message = source.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(transcript) = parse_transcript(&text) {
                            debug!(session_id = %self.session_id, "Transcript: {}", transcript);
                            if events.send(TranscriptionEvent::Transcript(transcript)).is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(
                            session_id = %self.session_id,
                            "Deepgram closed the stream: {:?}", frame
                        );
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(stream_error(e)),
                    None => return Ok(()),
                },
            }
        }
    }
}
