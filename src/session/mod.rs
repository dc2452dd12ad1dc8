//! # Call Sessions
//!
//! One `CallSession` per phone call, owned by that call's WebSocket actor.
//!
//! ## Key Components:
//! - **CallSession**: Per-call state and the frame → segmenter → pipeline wiring
//! - **TurnQueue**: Serializes pipeline invocations within one call
//! - **CallServices**: The collaborators every call shares (transcription, pipeline)

pub mod controller;
pub mod turn_queue;

use crate::config::AppConfig;
use crate::error::ServiceResult;
use crate::pipeline::TurnPipeline;
use crate::transcription::{DeepgramTranscriber, TranscriptionService};
use std::sync::Arc;

pub use controller::CallSession;
pub use turn_queue::TurnQueue;

/// Shared, stateless collaborators handed to every call.
#[derive(Clone)]
pub struct CallServices {
    pub transcription: Arc<dyn TranscriptionService>,
    pub pipeline: Arc<TurnPipeline>,
}

impl CallServices {
    pub fn new(transcription: Arc<dyn TranscriptionService>, pipeline: Arc<TurnPipeline>) -> Self {
        Self {
            transcription,
            pipeline,
        }
    }

    /// Production services: Deepgram transcription, Groq completion, ElevenLabs synthesis.
    pub fn from_config(config: &AppConfig) -> ServiceResult<Self> {
        let transcription = DeepgramTranscriber::new(
            config.transcription.clone(),
            config.audio.call_sample_rate,
        );
        let pipeline = TurnPipeline::from_config(config)?;
        Ok(Self::new(Arc::new(transcription), Arc::new(pipeline)))
    }
}
