//! # Audio Processing Module
//!
//! Everything that touches raw call audio without talking to the network.
//!
//! ## Key Components:
//! - **Processor**: Frame validation and the loudness metric
//! - **VAD**: Energy-threshold utterance segmentation
//! - **Resample**: 16kHz → 8kHz decimation into transport-sized frames
//! - **Buffer**: Whole-call recording buffer
//! - **WAV**: Container muxing for recordings
//!
//! ## Audio Format Requirements:
//! - **Call audio**: 8kHz, 16-bit, mono, little-endian linear PCM
//! - **Synthesis audio**: 16kHz, 16-bit, mono, little-endian linear PCM

pub mod buffer;
pub mod processor;
pub mod resample;
pub mod vad;
pub mod wav;
