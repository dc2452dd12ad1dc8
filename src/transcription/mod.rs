//! # Transcription Module
//!
//! Streaming speech-to-text for live calls. Each call opens one transcription
//! stream: caller audio is pushed in as it arrives, transcript text comes back
//! whenever the service produces it.
//!
//! ## Key Components:
//! - **TranscriptionService**: Opens a stream for a call
//! - **TranscriptionHandle**: Sending side (audio, finalize, close)
//! - **TranscriptionEvent**: Receiving side (text, errors, close acknowledgement)
//! - **Deepgram**: Production implementation over the Deepgram live WebSocket API
//!
//! ## Failure Model:
//! Transcription problems never end a call. The handle silently drops commands
//! once the stream is gone, and errors surface only as `TranscriptionEvent::Error`
//! for logging.

pub mod deepgram;

use tokio::sync::mpsc;

pub use deepgram::DeepgramTranscriber;

/// Commands sent from the call to its transcription stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionCommand {
    /// Raw call audio (8kHz linear16)
    Audio(Vec<u8>),
    /// Flush any partial transcript for the utterance that just ended
    Finalize,
    /// Finish the stream; the service acknowledges with `TranscriptionEvent::Closed`
    Close,
}

/// Events delivered from the transcription stream to the call.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionEvent {
    Transcript(String),
    Error(String),
    Closed,
}

/// Sending half of a call's transcription stream.
#[derive(Debug, Clone)]
pub struct TranscriptionHandle {
    commands: mpsc::UnboundedSender<TranscriptionCommand>,
}

impl TranscriptionHandle {
    pub fn new(commands: mpsc::UnboundedSender<TranscriptionCommand>) -> Self {
        Self { commands }
    }

    pub fn send_audio(&self, frame: &[u8]) -> bool {
        self.send(TranscriptionCommand::Audio(frame.to_vec()))
    }

    pub fn finalize(&self) -> bool {
        self.send(TranscriptionCommand::Finalize)
    }

    pub fn close(&self) -> bool {
        self.send(TranscriptionCommand::Close)
    }

    /// Returns false when the stream has already gone away.
    fn send(&self, command: TranscriptionCommand) -> bool {
        self.commands.send(command).is_ok()
    }
}

/// Both halves of an open transcription stream.
pub struct TranscriptionChannel {
    pub handle: TranscriptionHandle,
    pub events: mpsc::UnboundedReceiver<TranscriptionEvent>,
}

impl TranscriptionChannel {
    /// Wire up a channel pair, returning the far ends for the stream worker.
    pub fn pair() -> (
        Self,
        mpsc::UnboundedReceiver<TranscriptionCommand>,
        mpsc::UnboundedSender<TranscriptionEvent>,
    ) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let channel = Self {
            handle: TranscriptionHandle::new(command_tx),
            events: event_rx,
        };
        (channel, command_rx, event_tx)
    }
}

pub trait TranscriptionService: Send + Sync {
    /// Open a stream for one call. Must be called from within a Tokio runtime.
    fn open(&self, session_id: &str) -> TranscriptionChannel;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_reports_closed_stream() {
        let (channel, command_rx, _event_tx) = TranscriptionChannel::pair();
        assert!(channel.handle.send_audio(&[1, 2]));
        drop(command_rx);
        assert!(!channel.handle.finalize());
    }

    #[test]
    fn test_commands_arrive_in_order() {
        let (channel, mut command_rx, _event_tx) = TranscriptionChannel::pair();
        channel.handle.send_audio(&[1, 2]);
        channel.handle.finalize();
        channel.handle.close();

        assert_eq!(command_rx.try_recv().unwrap(), TranscriptionCommand::Audio(vec![1, 2]));
        assert_eq!(command_rx.try_recv().unwrap(), TranscriptionCommand::Finalize);
        assert_eq!(command_rx.try_recv().unwrap(), TranscriptionCommand::Close);
    }
}
