//! # Call Session Controller
//!
//! Owns everything that belongs to one call and runs entirely on the call's
//! actor: no locks, no awaits. Remote work happens in spawned pipeline tasks and
//! in the transcription stream, both of which talk back over channels.
//!
//! ## Session Lifecycle:
//! 1. **Open**: Transcription stream started, frames flowing
//! 2. **Closing**: Turns abandoned, transcription closed, recording flushed
//! 3. **Closed**: Every further event is ignored
//!
//! ## Per inbound frame:
//! validate → transcription → recording → loudness → segmenter → (maybe) dispatch

use crate::audio::buffer::{RecordingBuffer, RecordingConfig};
use crate::audio::processor::{frame_energy, validate_frame};
use crate::audio::vad::{FrameOutcome, SegmenterConfig, VoiceActivitySegmenter};
use crate::config::AppConfig;
use crate::error::CallError;
use crate::pipeline::{PipelineEvent, PipelineEventKind, PipelineSender, TurnPipeline, TurnRequest};
use crate::protocol::{ControlMessage, Outbound};
use crate::services::ChatMessage;
use crate::session::TurnQueue;
use crate::state::AppState;
use crate::transcription::{TranscriptionEvent, TranscriptionHandle, TranscriptionService};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Open,
    Closing,
    Closed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Open => "open",
            CallStatus::Closing => "closing",
            CallStatus::Closed => "closed",
        }
    }
}

pub struct CallSession {
    id: String,
    status: CallStatus,
    segmenter: VoiceActivitySegmenter,
    recording: Option<RecordingBuffer>,
    history: Vec<ChatMessage>,
    turns: TurnQueue,
    transcription: Option<TranscriptionHandle>,
    pipeline: Arc<TurnPipeline>,
    pipeline_tx: Option<PipelineSender>,
    state: AppState,
}

impl CallSession {
    /// Create a session. Returns the receiver the owning actor must drain and
    /// feed back through `handle_pipeline_event`.
    ///
    /// No remote connection is made here; see `start_transcription`.
    pub fn new(
        id: String,
        config: &AppConfig,
        pipeline: Arc<TurnPipeline>,
        state: AppState,
    ) -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (pipeline_tx, pipeline_rx) = mpsc::unbounded_channel();

        let segmenter = VoiceActivitySegmenter::new(SegmenterConfig {
            energy_threshold: config.call.energy_threshold,
            silence_frame_limit: config.call.silence_frame_limit,
            min_transcript_chars: config.call.min_transcript_chars,
        });
        let recording = RecordingBuffer::new(RecordingConfig {
            sample_rate: config.audio.call_sample_rate,
            directory: config.call.recordings_dir.clone(),
        });

        info!(session_id = %id, "Call session opened");

        let session = Self {
            id,
            status: CallStatus::Open,
            segmenter,
            recording: Some(recording),
            history: Vec::new(),
            turns: TurnQueue::new(),
            transcription: None,
            pipeline,
            pipeline_tx: Some(pipeline_tx),
            state,
        };
        (session, pipeline_rx)
    }

    /// Open the call's transcription stream. Returns the event receiver the
    /// owning actor must feed back through `handle_transcription_event`.
    ///
    /// Frames that arrive before this is called are recorded and segmented but
    /// not transcribed.
    pub fn start_transcription(
        &mut self,
        service: &dyn TranscriptionService,
    ) -> mpsc::UnboundedReceiver<TranscriptionEvent> {
        let channel = service.open(&self.id);
        self.transcription = Some(channel.handle);
        channel.events
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    #[cfg(test)]
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    #[cfg(test)]
    pub fn segmenter(&self) -> &VoiceActivitySegmenter {
        &self.segmenter
    }

    #[cfg(test)]
    pub fn recorded_bytes(&self) -> usize {
        self.recording.as_ref().map_or(0, RecordingBuffer::len)
    }

    /// Process one binary frame from the transport.
    ///
    /// ## Returns:
    /// - **Ok(())**: Frame accepted (or ignored because the session is closed)
    /// - **Err(CallError::MalformedFrame)**: Odd byte length; the caller should end the call
    pub fn handle_inbound_frame(&mut self, frame: &[u8]) -> Result<(), CallError> {
        if self.status != CallStatus::Open {
            return Ok(());
        }
        validate_frame(frame).map_err(CallError::MalformedFrame)?;

        if let Some(transcription) = &self.transcription {
            transcription.send_audio(frame);
        }
        if let Some(recording) = self.recording.as_mut() {
            recording.append(frame);
        }

        match self.segmenter.process_frame(frame_energy(frame)) {
            FrameOutcome::Continue => {}
            FrameOutcome::SpeechStarted => {
                debug!(session_id = %self.id, "Speech started");
            }
            FrameOutcome::SpeechEnded { utterance } => {
                debug!(session_id = %self.id, "Speech stopped");
                if let Some(transcription) = &self.transcription {
                    transcription.finalize();
                }
                if let Some(transcript) = utterance {
                    info!(session_id = %self.id, "Utterance: {}", transcript);
                    self.state.record_utterance();
                    self.turns.push(transcript);
                    self.dispatch_next();
                }
            }
        }
        Ok(())
    }

    pub fn handle_transcription_event(&mut self, event: TranscriptionEvent) {
        if self.status != CallStatus::Open {
            return;
        }
        match event {
            TranscriptionEvent::Transcript(text) => self.segmenter.append_transcript(&text),
            TranscriptionEvent::Error(message) => {
                warn!(session_id = %self.id, "Transcription error: {}", message);
            }
            TranscriptionEvent::Closed => {
                debug!(session_id = %self.id, "Transcription stream acknowledged close");
            }
        }
    }

    /// Apply one pipeline event and return what, if anything, goes to the transport.
    ///
    /// Events from a turn other than the one in flight are dropped.
    pub fn handle_pipeline_event(&mut self, event: PipelineEvent) -> Option<Outbound> {
        if self.status != CallStatus::Open {
            return None;
        }
        if self.turns.in_flight_turn() != Some(event.turn) {
            debug!(session_id = %self.id, turn = event.turn, "Dropping event from stale turn");
            return None;
        }

        match event.kind {
            PipelineEventKind::AudioChunk(frame) => {
                if let Some(recording) = self.recording.as_mut() {
                    recording.append(&frame);
                }
                Some(Outbound::Audio(frame))
            }
            PipelineEventKind::Error(message) => {
                self.turns.complete(event.turn);
                self.state.record_turn_failure();
                self.dispatch_next();
                Some(Outbound::Control(ControlMessage::error(message)))
            }
            PipelineEventKind::HistoryUpdated(history) => {
                self.turns.complete(event.turn);
                self.history = history;
                self.state.record_turn_completed();
                self.dispatch_next();
                None
            }
        }
    }

    /// Tear the session down. Runs once; later calls return `None`.
    ///
    /// The in-flight turn is aborted and queued utterances are dropped before the
    /// recording is flushed and released.
    pub fn close(&mut self) -> Option<PathBuf> {
        if self.status != CallStatus::Open {
            return None;
        }
        self.status = CallStatus::Closing;

        let dropped = self.turns.abandon();
        if dropped > 0 {
            debug!(session_id = %self.id, "Abandoned {} turn(s)", dropped);
        }
        if let Some(transcription) = self.transcription.take() {
            transcription.close();
        }
        self.pipeline_tx = None;

        let path = self.recording.take().and_then(|recording| {
            if recording.is_empty() {
                warn!(session_id = %self.id, "Call ended before any audio arrived");
            }
            let seconds = recording.duration_seconds();
            match recording.flush_to_file(&self.id) {
                Ok(path) => {
                    info!(
                        session_id = %self.id,
                        "Recording saved to {} ({:.1}s)",
                        path.display(),
                        seconds
                    );
                    self.state.record_recording_written();
                    Some(path)
                }
                Err(e) => {
                    error!(session_id = %self.id, "{}", e);
                    self.state.record_recording_failure();
                    None
                }
            }
        });

        self.history.clear();
        self.status = CallStatus::Closed;
        info!(session_id = %self.id, "Call session closed");
        path
    }

    fn dispatch_next(&mut self) {
        let Some(events) = self.pipeline_tx.clone() else {
            return;
        };
        let pipeline = &self.pipeline;
        let session_id = self.id.clone();
        let history = self.history.clone();

        let started = self.turns.start_next(|turn, transcript| {
            let request = TurnRequest {
                session_id,
                turn,
                history,
                transcript,
            };
            pipeline.spawn(request, events).abort_handle()
        });

        if let Some(turn) = started {
            debug!(session_id = %self.id, turn, "Turn dispatched");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::processor::samples_to_bytes;
    use crate::audio::vad::VadState;
    use crate::error::{ServiceError, ServiceResult};
    use crate::pipeline::tests::{FakeCompletion, FakeSynthesis};
    use crate::services::{CompletionService, SynthesisService};
    use crate::transcription::{TranscriptionChannel, TranscriptionCommand};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeTranscription {
        commands: Mutex<Option<mpsc::UnboundedReceiver<TranscriptionCommand>>>,
    }

    impl TranscriptionService for FakeTranscription {
        fn open(&self, _session_id: &str) -> TranscriptionChannel {
            let (channel, commands, _events) = TranscriptionChannel::pair();
            *self.commands.lock().unwrap() = Some(commands);
            channel
        }
    }

    impl FakeTranscription {
        fn sent(&self) -> Vec<TranscriptionCommand> {
            let mut guard = self.commands.lock().unwrap();
            let mut sent = Vec::new();
            if let Some(rx) = guard.as_mut() {
                while let Ok(command) = rx.try_recv() {
                    sent.push(command);
                }
            }
            sent
        }
    }

    /// Completion that never answers, to keep a turn in flight.
    struct HangingCompletion;

    #[async_trait]
    impl CompletionService for HangingCompletion {
        async fn complete(&self, _messages: &[ChatMessage]) -> ServiceResult<ChatMessage> {
            std::future::pending::<()>().await;
            Err(ServiceError::SessionClosed)
        }
    }

    struct Harness {
        session: CallSession,
        pipeline_rx: mpsc::UnboundedReceiver<PipelineEvent>,
        _transcription_rx: mpsc::UnboundedReceiver<TranscriptionEvent>,
        transcription: Arc<FakeTranscription>,
        completion: Arc<FakeCompletion>,
        state: AppState,
        _dir: TempDir,
    }

    fn harness_with(
        completion: Arc<dyn CompletionService>,
        fake: Arc<FakeCompletion>,
        synthesis: Arc<dyn SynthesisService>,
    ) -> Harness {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.call.recordings_dir = dir.path().to_path_buf();

        let transcription = Arc::new(FakeTranscription::default());
        let pipeline = TurnPipeline::new(completion, synthesis, "be brief", 2, 320)
            .with_stall_timeout(Duration::from_millis(100));
        let state = AppState::new(config.clone());

        let (mut session, pipeline_rx) =
            CallSession::new("call-1".to_string(), &config, Arc::new(pipeline), state.clone());
        let transcription_rx = session.start_transcription(transcription.as_ref());
        Harness {
            session,
            pipeline_rx,
            _transcription_rx: transcription_rx,
            transcription,
            completion: fake,
            state,
            _dir: dir,
        }
    }

    fn harness(reply: &str, synthesis: FakeSynthesis) -> Harness {
        let completion = Arc::new(FakeCompletion::replying(reply));
        harness_with(completion.clone(), completion, Arc::new(synthesis))
    }

    fn loud_frame() -> Vec<u8> {
        samples_to_bytes(&[1000; 160])
    }

    fn quiet_frame() -> Vec<u8> {
        samples_to_bytes(&[3; 160])
    }

    /// One full speech burst: 5 loud frames, then 25 quiet frames.
    fn speak(h: &mut Harness, transcript: &str) {
        for _ in 0..5 {
            h.session.handle_inbound_frame(&loud_frame()).unwrap();
        }
        h.session
            .handle_transcription_event(TranscriptionEvent::Transcript(transcript.to_string()));
        for _ in 0..25 {
            h.session.handle_inbound_frame(&quiet_frame()).unwrap();
        }
    }

    /// Feed pipeline events into the session until the turn in flight finishes.
    async fn finish_turn(h: &mut Harness) -> Vec<Outbound> {
        let mut outbound = Vec::new();
        loop {
            let event = h.pipeline_rx.recv().await.unwrap();
            let last = !matches!(event.kind, PipelineEventKind::AudioChunk(_));
            if let Some(item) = h.session.handle_pipeline_event(event) {
                outbound.push(item);
            }
            if last {
                return outbound;
            }
        }
    }

    #[tokio::test]
    async fn test_silence_never_dispatches() {
        let mut h = harness("unused", FakeSynthesis::streaming(vec![]));
        for _ in 0..50 {
            h.session.handle_inbound_frame(&[0; 320]).unwrap();
        }

        assert_eq!(h.session.segmenter().state(), VadState::Idle);
        assert_eq!(h.state.get_metrics_snapshot().utterances_dispatched, 0);
        assert_eq!(h.session.recorded_bytes(), 50 * 320);
        assert_eq!(h.transcription.sent().len(), 50);
    }

    #[tokio::test]
    async fn test_utterance_dispatched_after_silence_limit() {
        let mut h = harness("Hi, I'm Carter.", FakeSynthesis::streaming(vec![vec![0; 1280]]));

        for _ in 0..5 {
            h.session.handle_inbound_frame(&loud_frame()).unwrap();
        }
        h.session
            .handle_transcription_event(TranscriptionEvent::Transcript("hello there".to_string()));
        for i in 1..=30 {
            h.session.handle_inbound_frame(&quiet_frame()).unwrap();
            let dispatched = h.state.get_metrics_snapshot().utterances_dispatched;
            assert_eq!(dispatched, if i >= 25 { 1 } else { 0 }, "after quiet frame {}", i);
        }

        let sent = h.transcription.sent();
        assert_eq!(sent.iter().filter(|c| **c == TranscriptionCommand::Finalize).count(), 1);

        let outbound = finish_turn(&mut h).await;
        assert_eq!(outbound.len(), 2);
        assert!(outbound.iter().all(|o| matches!(o, Outbound::Audio(f) if f.len() == 320)));
        assert_eq!(
            h.session.history(),
            &[ChatMessage::user("hello there"), ChatMessage::assistant("Hi, I'm Carter.")]
        );
        // 35 inbound frames plus two synthesized frames
        assert_eq!(h.session.recorded_bytes(), 35 * 320 + 2 * 320);
        assert_eq!(h.state.get_metrics_snapshot().turns_completed, 1);
    }

    #[tokio::test]
    async fn test_short_transcript_is_not_a_turn() {
        let mut h = harness("unused", FakeSynthesis::streaming(vec![]));
        speak(&mut h, "a");
        assert_eq!(h.state.get_metrics_snapshot().utterances_dispatched, 0);
        assert_eq!(h.session.segmenter().transcript(), "");
    }

    #[tokio::test]
    async fn test_malformed_frame_is_rejected() {
        let mut h = harness("unused", FakeSynthesis::streaming(vec![]));
        let err = h.session.handle_inbound_frame(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, CallError::MalformedFrame(_)));
        assert_eq!(h.session.recorded_bytes(), 0);
    }

    #[tokio::test]
    async fn test_pipeline_error_becomes_notification() {
        let synthesis = FakeSynthesis::failing_after(vec![vec![0; 640], vec![0; 640]]);
        let mut h = harness("Hello", synthesis);
        speak(&mut h, "hello there");

        let outbound = finish_turn(&mut h).await;
        assert_eq!(outbound.len(), 3);
        assert!(matches!(outbound[0], Outbound::Audio(_)));
        assert!(matches!(outbound[1], Outbound::Audio(_)));
        match &outbound[2] {
            Outbound::Control(ControlMessage::Error { message }) => {
                assert!(message.contains("connection reset"))
            }
            other => panic!("expected error notification, got {:?}", other),
        }
        assert!(h.session.history().is_empty());
        assert_eq!(h.state.get_metrics_snapshot().turn_failures, 1);
    }

    #[tokio::test]
    async fn test_turns_are_serialized_and_see_committed_history() {
        let mut h = harness("Sure.", FakeSynthesis::streaming(vec![]));
        speak(&mut h, "first question");
        speak(&mut h, "second question");
        assert_eq!(h.state.get_metrics_snapshot().utterances_dispatched, 2);

        finish_turn(&mut h).await;
        finish_turn(&mut h).await;

        let requests = h.completion.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        // system + first user
        assert_eq!(requests[0].len(), 2);
        // system + first user + first reply + second user
        assert_eq!(requests[1].len(), 4);
        assert_eq!(requests[1][1], ChatMessage::user("first question"));
        assert_eq!(requests[1][2], ChatMessage::assistant("Sure."));
        assert_eq!(h.session.history().len(), 4);
    }

    #[tokio::test]
    async fn test_stale_turn_events_are_ignored() {
        let mut h = harness("unused", FakeSynthesis::streaming(vec![]));
        let event = PipelineEvent {
            turn: 42,
            kind: PipelineEventKind::AudioChunk(vec![0; 320]),
        };
        assert_eq!(h.session.handle_pipeline_event(event), None);
        assert_eq!(h.session.recorded_bytes(), 0);
    }

    #[tokio::test]
    async fn test_close_abandons_outstanding_turn_and_writes_recording() {
        let fake = Arc::new(FakeCompletion::replying("unused"));
        let synthesis = Arc::new(FakeSynthesis::streaming(vec![]));
        let mut h = harness_with(Arc::new(HangingCompletion), fake, synthesis);
        speak(&mut h, "are you there");

        let path = h.session.close().unwrap();
        assert_eq!(h.session.status(), CallStatus::Closed);
        assert!(path.ends_with("full_conversation_call-1.wav"));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 44 + 30 * 320);
        assert!(h.transcription.sent().contains(&TranscriptionCommand::Close));

        // The aborted task drops the last sender, so the stream ends without events
        assert!(h.pipeline_rx.recv().await.is_none());

        // A closed session ignores everything
        assert!(h.session.handle_inbound_frame(&loud_frame()).is_ok());
        assert_eq!(h.session.close(), None);
        assert_eq!(h.state.get_metrics_snapshot().recordings_written, 1);
    }

    #[tokio::test]
    async fn test_recording_failure_does_not_block_teardown() {
        let mut h = harness("unused", FakeSynthesis::streaming(vec![]));
        let blocker = h._dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        h.session.recording = Some(RecordingBuffer::new(RecordingConfig {
            sample_rate: 8000,
            directory: blocker,
        }));
        h.session.handle_inbound_frame(&quiet_frame()).unwrap();

        assert_eq!(h.session.close(), None);
        assert_eq!(h.session.status(), CallStatus::Closed);
        assert_eq!(h.state.get_metrics_snapshot().recording_failures, 1);
    }

    #[tokio::test]
    async fn test_stalled_synthesis_frees_the_turn_queue() {
        let mut h = harness("Hello", FakeSynthesis::stalling_after(vec![]));
        speak(&mut h, "first question");
        speak(&mut h, "second question");
        speak(&mut h, "third question");
        assert_eq!(h.state.get_metrics_snapshot().utterances_dispatched, 3);

        for _ in 0..3 {
            let outbound = tokio::time::timeout(Duration::from_secs(3), finish_turn(&mut h))
                .await
                .expect("a stalled turn must end with an error");
            match &outbound[..] {
                [Outbound::Control(ControlMessage::Error { message })] => {
                    assert!(message.contains("no audio"))
                }
                other => panic!("expected a single error notification, got {:?}", other),
            }
        }

        assert_eq!(h.completion.requests.lock().unwrap().len(), 3);
        assert_eq!(h.state.get_metrics_snapshot().turn_failures, 3);
    }

    #[tokio::test]
    async fn test_frames_before_transcription_starts_are_not_lost() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.call.recordings_dir = dir.path().to_path_buf();
        let pipeline = TurnPipeline::new(
            Arc::new(FakeCompletion::replying("unused")),
            Arc::new(FakeSynthesis::streaming(vec![])),
            "be brief",
            2,
            320,
        );
        let state = AppState::new(config.clone());
        let (mut session, _pipeline_rx) =
            CallSession::new("call-2".to_string(), &config, Arc::new(pipeline), state);

        session.handle_inbound_frame(&quiet_frame()).unwrap();
        let transcription = FakeTranscription::default();
        let _events = session.start_transcription(&transcription);
        session.handle_inbound_frame(&quiet_frame()).unwrap();

        assert_eq!(session.recorded_bytes(), 2 * 320);
        assert_eq!(transcription.sent().len(), 1);
    }
}
