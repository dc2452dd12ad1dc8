//! # Call Socket Protocol
//!
//! Message shapes exchanged with the telephony provider over `/socket`.
//!
//! ## Message Format:
//! - **Provider → Server**: Binary 8kHz linear16 frames, plus occasional JSON text
//!   events such as `{"event":"websocket:connected","content-type":"audio/l16;rate=8000"}`
//! - **Server → Provider**: Binary 8kHz linear16 frames, plus JSON notifications
//!   such as `{"type":"error","message":"..."}`

use serde::{Deserialize, Serialize};

/// JSON notifications sent to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// A turn failed; the call carries on
    Error { message: String },
}

impl ControlMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ControlMessage::Error {
            message: message.into(),
        }
    }
}

/// Something the session wants written to the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Audio(Vec<u8>),
    Control(ControlMessage),
}

/// Text event from the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportEvent {
    pub event: String,
    #[serde(rename = "content-type")]
    pub content_type: Option<String>,
}

impl TransportEvent {
    pub const CONNECTED: &'static str = "websocket:connected";

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn is_connected(&self) -> bool {
        self.event == Self::CONNECTED
    }

    /// Sample rate announced in the content type, e.g. `audio/l16;rate=16000` → 16000.
    pub fn sample_rate(&self) -> Option<u32> {
        self.content_type
            .as_deref()?
            .split(';')
            .find_map(|param| param.trim().strip_prefix("rate="))
            .and_then(|rate| rate.trim().parse().ok())
    }
}
