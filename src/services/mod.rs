//! # Remote Language and Speech Services
//!
//! The turn pipeline depends on two request/response collaborators:
//!
//! - **Completion**: ordered role-tagged messages in, one assistant message out
//! - **Synthesis**: text in, a stream of 16kHz 16-bit mono PCM bytes out
//!
//! Both are traits so the pipeline can run against in-process fakes in tests.
//! Production implementations live in `groq.rs` and `elevenlabs.rs`.

pub mod elevenlabs;
pub mod groq;

use crate::error::ServiceResult;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub use elevenlabs::ElevenLabsSynthesizer;
pub use groq::GroqCompletion;

/// Who said a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Streamed PCM from the synthesis service, in network-sized pieces.
pub type AudioByteStream = BoxStream<'static, ServiceResult<Vec<u8>>>;

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Produce the assistant's reply to `messages` (system message first).
    async fn complete(&self, messages: &[ChatMessage]) -> ServiceResult<ChatMessage>;
}

#[async_trait]
pub trait SynthesisService: Send + Sync {
    /// Start synthesizing `text`; the returned stream ends when the audio does.
    async fn synthesize(&self, text: &str) -> ServiceResult<AudioByteStream>;
}
