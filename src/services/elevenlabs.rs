//! Streaming speech synthesis through the ElevenLabs text-to-speech API.
//!
//! Audio is requested as raw `pcm_16000` so the response body can be decimated
//! straight into call frames while it is still downloading.

use crate::config::SynthesisConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::services::{AudioByteStream, SynthesisService};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use std::time::Duration;

const SERVICE: &str = "synthesis";

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    style: f32,
    use_speaker_boost: bool,
}

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
    seed: u32,
}

pub struct ElevenLabsSynthesizer {
    config: SynthesisConfig,
    output_sample_rate: u32,
    client: reqwest::Client,
}

impl ElevenLabsSynthesizer {
    /// `output_sample_rate` selects the `pcm_<rate>` output format.
    ///
    /// There is no overall request timeout because replies stream for as long
    /// as the speech lasts. Instead connecting and each body read are bounded by
    /// `timeout_secs`, so a stalled response surfaces as a stream error.
    pub fn new(config: SynthesisConfig, output_sample_rate: u32) -> ServiceResult<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|source| ServiceError::Http { service: SERVICE, source })?;
        Ok(Self {
            config,
            output_sample_rate,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/text-to-speech/{}?optimize_streaming_latency={}&output_format=pcm_{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.voice_id,
            self.config.optimize_streaming_latency,
            self.output_sample_rate
        )
    }

    fn request_body<'a>(&'a self, text: &'a str) -> SynthesisRequest<'a> {
        SynthesisRequest {
            text,
            model_id: &self.config.model_id,
            voice_settings: VoiceSettings {
                stability: self.config.stability,
                similarity_boost: self.config.similarity_boost,
                style: self.config.style,
                use_speaker_boost: self.config.use_speaker_boost,
            },
            seed: self.config.seed,
        }
    }
}

#[async_trait]
impl SynthesisService for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str) -> ServiceResult<AudioByteStream> {
        let response = self
            .client
            .post(self.endpoint())
            .header("xi-api-key", &self.config.api_key)
            .json(&self.request_body(text))
            .send()
            .await
            .map_err(|source| ServiceError::Http { service: SERVICE, source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk.map(|bytes| bytes.to_vec()).map_err(|e| ServiceError::Stream {
                service: SERVICE,
                message: e.to_string(),
            })
        });

        Ok(stream.boxed())
    }
}
