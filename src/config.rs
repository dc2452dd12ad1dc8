//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP__ prefix)
//! - Provider credentials from plain environment variables (DEEPGRAM_API_KEY, ...)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **impl blocks**: Add methods to structs
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Plain environment variables (HOST, PORT, DEEPGRAM_API_KEY, GROQ_API_KEY, ...)
//! 2. Prefixed environment variables (APP__SERVER__PORT, APP__CALL__ENERGY_THRESHOLD, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// System instruction prepended to every completion request.
pub const DEFAULT_SYSTEM_PROMPT: &str = "Your name is carter. You are on a phone call, so your responses MUST be brief. Make sure to introduce yourself. Your response will be spoken to the other person on the call, so don't include any actions just speech.";

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each remote collaborator (transcription, completion, synthesis) gets its own
/// section so credentials and tuning knobs stay next to each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub call: CallConfig,
    pub audio: AudioConfig,
    pub transcription: TranscriptionConfig,
    pub completion: CompletionConfig,
    pub synthesis: SynthesisConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: Address to bind to. Also used to build the `ws://` URI handed to
///   the telephony provider by the answer webhook.
/// - `port`: TCP port number to listen on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Per-call behaviour: voice activity detection and recording.
///
/// ## Fields:
/// - `energy_threshold`: Mean squared sample value above which a frame counts as speech
/// - `silence_frame_limit`: Consecutive quiet frames that end an utterance (25 × 20ms = 500ms)
/// - `min_transcript_chars`: Shortest transcript that is worth a turn
/// - `recordings_dir`: Where `full_conversation_<id>.wav` files are written
/// - `idle_timeout_secs`: Close the call when no transport traffic arrives for this long
/// - `max_concurrent_calls`: Upgrade requests beyond this are rejected with 503
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    pub energy_threshold: f64,
    pub silence_frame_limit: u32,
    pub min_transcript_chars: usize,
    pub recordings_dir: PathBuf,
    pub idle_timeout_secs: u64,
    pub max_concurrent_calls: usize,
}

/// Audio formats on both sides of the resampler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Telephony transport rate (8kHz narrow-band)
    pub call_sample_rate: u32,
    /// Rate of the PCM returned by the synthesis service
    pub synthesis_sample_rate: u32,
    /// Bytes per outbound frame at the call rate (320 = 160 samples = 20ms)
    pub output_frame_bytes: usize,
}

/// Streaming transcription service (Deepgram live API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub keep_alive_secs: u64,
}

/// Chat completion service (OpenAI-compatible API, Groq by default).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub system_prompt: String,
    pub timeout_secs: u64,
}

/// Speech synthesis service (ElevenLabs streaming API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    pub base_url: String,
    pub api_key: String,
    pub voice_id: String,
    pub model_id: String,
    pub optimize_streaming_latency: u8,
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
    pub seed: u32,
    /// Longest wait for the connection, the response headers or the next audio chunk
    pub timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            call: CallConfig {
                energy_threshold: 300.0,
                silence_frame_limit: 25,
                min_transcript_chars: 2,
                recordings_dir: PathBuf::from("."),
                idle_timeout_secs: 60,
                max_concurrent_calls: 10,
            },
            audio: AudioConfig {
                call_sample_rate: 8000,
                synthesis_sample_rate: 16000,
                output_frame_bytes: 320,
            },
            transcription: TranscriptionConfig {
                url: "wss://api.deepgram.com/v1/listen".to_string(),
                api_key: String::new(),
                model: "nova-2-voicemail".to_string(),
                keep_alive_secs: 10,
            },
            completion: CompletionConfig {
                base_url: "https://api.groq.com/openai/v1".to_string(),
                api_key: String::new(),
                model: "llama-3.1-70b-versatile".to_string(),
                system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
                timeout_secs: 30,
            },
            synthesis: SynthesisConfig {
                base_url: "https://api.elevenlabs.io/v1".to_string(),
                api_key: String::new(),
                voice_id: String::new(),
                model_id: "eleven_turbo_v2_5".to_string(),
                optimize_streaming_latency: 4,
                stability: 0.5,
                similarity_boost: 0.5,
                style: 1.0,
                use_speaker_boost: true,
                seed: 123,
                timeout_secs: 10,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP__SERVER__PORT=3000`: Override server port
    /// - `APP__CALL__SILENCE_FRAME_LIMIT=30`: Longer pause before a turn ends
    /// - `HOST=0.0.0.0`, `PORT=3000`: Deployment platform conventions
    /// - `DEEPGRAM_API_KEY`, `GROQ_API_KEY`, `ELEVENLABS_API_KEY`, `ELEVENLABS_VOICE_ID`
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Double underscore so field names like `api_key` survive the split
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__"),
            );

        let overrides = [
            ("HOST", "server.host"),
            ("PORT", "server.port"),
            ("DEEPGRAM_API_KEY", "transcription.api_key"),
            ("GROQ_API_KEY", "completion.api_key"),
            ("ELEVENLABS_API_KEY", "synthesis.api_key"),
            ("ELEVENLABS_VOICE_ID", "synthesis.voice_id"),
        ];
        for (var, key) in overrides {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - VAD limits are positive
    /// - The synthesis rate is an integer multiple of the call rate (decimation only)
    /// - Output frames hold whole 16-bit samples
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.call.silence_frame_limit == 0 {
            return Err(anyhow::anyhow!("Silence frame limit must be greater than 0"));
        }

        if self.call.energy_threshold.is_nan() || self.call.energy_threshold < 0.0 {
            return Err(anyhow::anyhow!("Energy threshold must be a non-negative number"));
        }

        if self.call.max_concurrent_calls == 0 {
            return Err(anyhow::anyhow!("Max concurrent calls must be greater than 0"));
        }

        if self.audio.call_sample_rate == 0
            || self.audio.synthesis_sample_rate % self.audio.call_sample_rate != 0
        {
            return Err(anyhow::anyhow!(
                "Synthesis sample rate {} must be an integer multiple of call sample rate {}",
                self.audio.synthesis_sample_rate,
                self.audio.call_sample_rate
            ));
        }

        if self.synthesis.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Synthesis timeout must be greater than 0"));
        }

        if self.audio.output_frame_bytes == 0 || self.audio.output_frame_bytes % 2 != 0 {
            return Err(anyhow::anyhow!(
                "Output frame size must be a positive, even number of bytes"
            ));
        }

        Ok(())
    }

    /// Ensure every remote service has credentials before the server starts.
    ///
    /// Reports all missing variables at once instead of failing on the first one.
    pub fn require_credentials(&self) -> Result<()> {
        let required = [
            ("DEEPGRAM_API_KEY", &self.transcription.api_key),
            ("GROQ_API_KEY", &self.completion.api_key),
            ("ELEVENLABS_API_KEY", &self.synthesis.api_key),
            ("ELEVENLABS_VOICE_ID", &self.synthesis.voice_id),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "The following environment variables are missing: {}",
                missing.join(", ")
            ))
        }
    }

    /// Integer decimation factor between the synthesis and call sample rates.
    pub fn decimation_ratio(&self) -> usize {
        (self.audio.synthesis_sample_rate / self.audio.call_sample_rate.max(1)) as usize
    }

    /// WebSocket URI the telephony provider should stream call audio to.
    pub fn socket_uri(&self) -> String {
        format!("ws://{}:{}/socket", self.server.host, self.server.port)
    }

    /// A copy of this configuration with every secret blanked out, for API responses.
    pub fn redacted(&self) -> Self {
        fn mask(secret: &str) -> String {
            if secret.is_empty() {
                String::new()
            } else {
                "***".to_string()
            }
        }

        let mut copy = self.clone();
        copy.transcription.api_key = mask(&self.transcription.api_key);
        copy.completion.api_key = mask(&self.completion.api_key);
        copy.synthesis.api_key = mask(&self.synthesis.api_key);
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.call.silence_frame_limit, 25);
        assert_eq!(config.decimation_ratio(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.synthesis_sample_rate = 22050;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.output_frame_bytes = 321;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.synthesis.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_credentials_are_all_reported() {
        let mut config = AppConfig::default();
        config.completion.api_key = "gsk_test".to_string();

        let err = config.require_credentials().unwrap_err().to_string();
        assert!(err.contains("DEEPGRAM_API_KEY"));
        assert!(err.contains("ELEVENLABS_API_KEY"));
        assert!(err.contains("ELEVENLABS_VOICE_ID"));
        assert!(!err.contains("GROQ_API_KEY"));
    }

    #[test]
    fn test_redacted_hides_secrets() {
        let mut config = AppConfig::default();
        config.synthesis.api_key = "xi-secret".to_string();

        let redacted = config.redacted();
        assert_eq!(redacted.synthesis.api_key, "***");
        assert_eq!(redacted.transcription.api_key, "");
        assert_eq!(redacted.synthesis.voice_id, config.synthesis.voice_id);
    }

    #[test]
    fn test_socket_uri() {
        let mut config = AppConfig::default();
        config.server.host = "calls.example.com".to_string();
        config.server.port = 3000;
        assert_eq!(config.socket_uri(), "ws://calls.example.com:3000/socket");
    }
}
