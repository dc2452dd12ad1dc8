//! # Voice-Activity Segmentation
//!
//! Energy-threshold state machine that turns a stream of frame loudness values
//! into utterance boundaries. Transcript text arrives on its own schedule from the
//! transcription stream and is collected here until the boundary closes.
//!
//! ```text
//!            energy > threshold
//!   Idle ───────────────────────────▶ Speaking ──┐ loud frame: silence = 0
//!    ▲                                    │  ◀───┘ quiet frame: silence += 1
//!    └──── silence == silence_frame_limit ┘
//! ```

use tracing::debug;

/// Tuning for the segmenter.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Frames with a loudness metric strictly above this count as speech
    pub energy_threshold: f64,
    /// Consecutive quiet frames that end an utterance
    pub silence_frame_limit: u32,
    /// Transcripts shorter than this are dropped as transcription noise
    pub min_transcript_chars: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 300.0,
            silence_frame_limit: 25,
            min_transcript_chars: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Idle,
    Speaking,
}

/// What a single frame did to the segmenter.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// No state change
    Continue,
    /// Idle → Speaking
    SpeechStarted,
    /// Speaking → Idle. The transcription stream must be finalized; `utterance`
    /// is set when the collected transcript is long enough to become a turn.
    ///
    /// The transcript is taken when this is returned, not when the finalize is
    /// acknowledged. Text the service flushes in reply to the finalize is
    /// collected into the next utterance instead of this one.
    SpeechEnded { utterance: Option<String> },
}

pub struct VoiceActivitySegmenter {
    config: SegmenterConfig,
    state: VadState,
    silence_run: u32,
    transcript: String,
}

impl VoiceActivitySegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            state: VadState::Idle,
            silence_run: 0,
            transcript: String::new(),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> VadState {
        self.state
    }

    #[cfg(test)]
    pub fn is_speaking(&self) -> bool {
        self.state == VadState::Speaking
    }

    #[cfg(test)]
    pub fn silence_run(&self) -> u32 {
        self.silence_run
    }

    #[cfg(test)]
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Add transcript text from the transcription stream.
    ///
    /// Fragments are joined with a single space; blank fragments are ignored.
    pub fn append_transcript(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.transcript.is_empty() {
            self.transcript.push(' ');
        }
        self.transcript.push_str(text);
    }

    /// Advance the state machine by one frame.
    pub fn process_frame(&mut self, energy: f64) -> FrameOutcome {
        let loud = energy > self.config.energy_threshold;

        match (self.state, loud) {
            (VadState::Idle, true) => {
                self.state = VadState::Speaking;
                self.silence_run = 0;
                FrameOutcome::SpeechStarted
            }
            (VadState::Idle, false) => FrameOutcome::Continue,
            (VadState::Speaking, true) => {
                self.silence_run = 0;
                FrameOutcome::Continue
            }
            (VadState::Speaking, false) => {
                self.silence_run += 1;
                if self.silence_run < self.config.silence_frame_limit {
                    return FrameOutcome::Continue;
                }

                self.state = VadState::Idle;
                self.silence_run = 0;
                let transcript = std::mem::take(&mut self.transcript);

                let min_chars = self.config.min_transcript_chars.max(2);
                let utterance = if transcript.chars().count() >= min_chars {
                    Some(transcript)
                } else {
                    if !transcript.is_empty() {
                        debug!("Dropping short transcript {:?}", transcript);
                    }
                    None
                };

                FrameOutcome::SpeechEnded { utterance }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOUD: f64 = 1000.0;
    const QUIET: f64 = 0.0;

    fn segmenter(limit: u32) -> VoiceActivitySegmenter {
        VoiceActivitySegmenter::new(SegmenterConfig {
            silence_frame_limit: limit,
            ..SegmenterConfig::default()
        })
    }

    #[test]
    fn test_silence_never_starts_speech() {
        let mut vad = segmenter(25);
        for _ in 0..50 {
            assert_eq!(vad.process_frame(QUIET), FrameOutcome::Continue);
            assert_eq!(vad.state(), VadState::Idle);
        }
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let mut vad = segmenter(25);
        assert_eq!(vad.process_frame(300.0), FrameOutcome::Continue);
        assert!(!vad.is_speaking());
        assert_eq!(vad.process_frame(300.5), FrameOutcome::SpeechStarted);
        assert!(vad.is_speaking());
    }

    #[test]
    fn test_utterance_fires_after_exact_silence_limit() {
        let mut vad = segmenter(25);
        let mut completed = Vec::new();

        for i in 0..5 {
            vad.process_frame(LOUD);
            if i == 2 {
                vad.append_transcript("hello there");
            }
        }

        for quiet_frame in 1..=30 {
            match vad.process_frame(QUIET) {
                FrameOutcome::SpeechEnded { utterance } => completed.push((quiet_frame, utterance)),
                FrameOutcome::Continue => {}
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        assert_eq!(completed, vec![(25, Some("hello there".to_string()))]);
        assert_eq!(vad.state(), VadState::Idle);
        assert_eq!(vad.transcript(), "");
    }

    #[test]
    fn test_loud_frame_resets_silence_run() {
        let mut vad = segmenter(3);
        vad.process_frame(LOUD);
        vad.process_frame(QUIET);
        vad.process_frame(QUIET);
        assert_eq!(vad.silence_run(), 2);
        vad.process_frame(LOUD);
        assert_eq!(vad.silence_run(), 0);
        vad.process_frame(QUIET);
        vad.process_frame(QUIET);
        assert!(vad.is_speaking());
        assert!(matches!(vad.process_frame(QUIET), FrameOutcome::SpeechEnded { .. }));
    }

    #[test]
    fn test_short_transcripts_are_not_emitted() {
        for transcript in ["", "a"] {
            let mut vad = segmenter(1);
            vad.process_frame(LOUD);
            vad.append_transcript(transcript);
            assert_eq!(
                vad.process_frame(QUIET),
                FrameOutcome::SpeechEnded { utterance: None }
            );
            assert_eq!(vad.transcript(), "");
        }
    }

    #[test]
    fn test_late_transcript_carries_into_next_utterance() {
        let mut vad = segmenter(1);
        vad.process_frame(LOUD);
        vad.append_transcript("hello");
        assert_eq!(
            vad.process_frame(QUIET),
            FrameOutcome::SpeechEnded {
                utterance: Some("hello".to_string())
            }
        );

        // Arrives after the boundary, in reply to the finalize
        vad.append_transcript("there");
        vad.process_frame(LOUD);
        vad.append_transcript("how are you");
        assert_eq!(
            vad.process_frame(QUIET),
            FrameOutcome::SpeechEnded {
                utterance: Some("there how are you".to_string())
            }
        );
    }

    #[test]
    fn test_transcript_fragments_are_joined() {
        let mut vad = segmenter(1);
        vad.append_transcript("good morning");
        vad.append_transcript("   ");
        vad.append_transcript(" how are you ");
        assert_eq!(vad.transcript(), "good morning how are you");
    }
}
