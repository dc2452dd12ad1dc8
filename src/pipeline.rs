//! # Turn Pipeline
//!
//! One invocation per user utterance, run as its own Tokio task so the call's
//! real-time loop never waits on a remote service.
//!
//! ## Steps:
//! 1. Append the utterance to a private copy of the history as a `user` entry
//! 2. Ask the completion service for a reply (system instruction first)
//! 3. Stream synthesized speech for the reply
//! 4. Decimate the speech into call-rate frames and publish them in order
//! 5. Publish the final history exactly once
//!
//! ## Failure:
//! Any failure in steps 2-4 stops the invocation and publishes a single error
//! event instead of the history. Frames already published stay valid. If the
//! call has gone away the invocation stops without publishing anything else.
//!
//! Synthesis that goes quiet for longer than the stall timeout counts as a
//! failure, so one stuck response cannot hold the call's turn queue forever.
//!
//! ## Rust Concepts:
//! - **Arc<dyn Trait>**: Collaborators are shared trait objects so tests can swap in fakes
//! - **mpsc::UnboundedSender**: The only link back to the call; sending never blocks

use crate::audio::resample::Decimator;
use crate::config::AppConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::services::{
    ChatMessage, CompletionService, ElevenLabsSynthesizer, GroqCompletion, SynthesisService,
};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything one invocation needs, copied out of the session.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: String,
    pub turn: u64,
    pub history: Vec<ChatMessage>,
    pub transcript: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEventKind {
    /// One call-rate frame of synthesized speech
    AudioChunk(Vec<u8>),
    /// The invocation failed; carries a human-readable cause
    Error(String),
    /// The invocation finished; carries the history to commit
    HistoryUpdated(Vec<ChatMessage>),
}

/// Message from an invocation to its session, tagged with the turn it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineEvent {
    pub turn: u64,
    pub kind: PipelineEventKind,
}

pub type PipelineSender = mpsc::UnboundedSender<PipelineEvent>;

const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Publishes events for a single turn.
struct Publisher<'a> {
    turn: u64,
    events: &'a PipelineSender,
}

impl Publisher<'_> {
    fn publish(&self, kind: PipelineEventKind) -> ServiceResult<()> {
        self.events
            .send(PipelineEvent { turn: self.turn, kind })
            .map_err(|_| ServiceError::SessionClosed)
    }
}

pub struct TurnPipeline {
    completion: Arc<dyn CompletionService>,
    synthesis: Arc<dyn SynthesisService>,
    system_prompt: String,
    decimation_ratio: usize,
    frame_bytes: usize,
    stall_timeout: Duration,
}

impl TurnPipeline {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        synthesis: Arc<dyn SynthesisService>,
        system_prompt: impl Into<String>,
        decimation_ratio: usize,
        frame_bytes: usize,
    ) -> Self {
        Self {
            completion,
            synthesis,
            system_prompt: system_prompt.into(),
            decimation_ratio,
            frame_bytes,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
        }
    }

    /// Longest wait for synthesis to start or to deliver its next chunk.
    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    /// Build the production pipeline (Groq completion, ElevenLabs synthesis).
    pub fn from_config(config: &AppConfig) -> ServiceResult<Self> {
        let completion = GroqCompletion::new(config.completion.clone())?;
        let synthesis = ElevenLabsSynthesizer::new(
            config.synthesis.clone(),
            config.audio.synthesis_sample_rate,
        )?;

        Ok(Self::new(
            Arc::new(completion),
            Arc::new(synthesis),
            config.completion.system_prompt.clone(),
            config.decimation_ratio(),
            config.audio.output_frame_bytes,
        )
        .with_stall_timeout(Duration::from_secs(config.synthesis.timeout_secs)))
    }

    /// Run an invocation on its own task.
    pub fn spawn(self: &Arc<Self>, request: TurnRequest, events: PipelineSender) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move { pipeline.run(request, events).await })
    }

    /// Run an invocation to completion, publishing its outcome on `events`.
    pub async fn run(&self, request: TurnRequest, events: PipelineSender) {
        let session_id = request.session_id.clone();
        let publisher = Publisher {
            turn: request.turn,
            events: &events,
        };

        match self.execute(request, &publisher).await {
            Ok(history) => {
                if publisher.publish(PipelineEventKind::HistoryUpdated(history)).is_ok() {
                    info!(session_id = %session_id, turn = publisher.turn, "Turn completed");
                }
            }
            Err(ServiceError::SessionClosed) => {
                debug!(
                    session_id = %session_id,
                    turn = publisher.turn,
                    "Session gone, turn dropped"
                );
            }
            Err(e) => {
                warn!(session_id = %session_id, turn = publisher.turn, "Turn failed: {}", e);
                let _ = publisher.publish(PipelineEventKind::Error(e.to_string()));
            }
        }
    }

    async fn execute(
        &self,
        request: TurnRequest,
        publisher: &Publisher<'_>,
    ) -> ServiceResult<Vec<ChatMessage>> {
        let mut history = request.history;
        history.push(ChatMessage::user(request.transcript));

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(history.iter().cloned());

        let reply = self.completion.complete(&messages).await?.content;
        history.push(ChatMessage::assistant(reply.clone()));

        if reply.trim().is_empty() {
            debug!(turn = publisher.turn, "Empty reply, skipping synthesis");
            return Ok(history);
        }

        let started = self.synthesis.synthesize(&reply);
        let mut speech = tokio::time::timeout(self.stall_timeout, started)
            .await
            .map_err(|_| self.stalled())??;
        let mut decimator = Decimator::new(self.decimation_ratio, self.frame_bytes);
        let mut frames = 0usize;

        loop {
            let piece = match tokio::time::timeout(self.stall_timeout, speech.next()).await {
                Ok(Some(piece)) => piece?,
                Ok(None) => break,
                Err(_) => return Err(self.stalled()),
            };
            for frame in decimator.push(&piece) {
                publisher.publish(PipelineEventKind::AudioChunk(frame))?;
                frames += 1;
            }
        }
        if let Some(tail) = decimator.finish() {
            publisher.publish(PipelineEventKind::AudioChunk(tail))?;
            frames += 1;
        }

        debug!(turn = publisher.turn, "Published {} frames", frames);
        Ok(history)
    }

    fn stalled(&self) -> ServiceError {
        ServiceError::Stream {
            service: "synthesis",
            message: format!("no audio for {:?}", self.stall_timeout),
        }
    }
}
