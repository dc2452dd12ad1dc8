//! # Audio Frame Classification and Validation
//!
//! Every inbound transport frame passes through here before it reaches the
//! segmenter. Frames are 16-bit signed little-endian PCM, mono, 8kHz.
//!
//! ## Key Functions:
//! - **Frame validation**: Reject frames that cannot hold whole 16-bit samples
//! - **Loudness metric**: Mean of squared sample values, the input to the VAD

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Check that a transport frame can be interpreted as 16-bit PCM.
///
/// ## Returns:
/// - **Ok(())**: Frame holds a whole number of samples (empty frames are allowed)
/// - **Err(String)**: Description of the problem
pub fn validate_frame(frame: &[u8]) -> Result<(), String> {
    if frame.len() % 2 != 0 {
        return Err(format!(
            "frame length {} is odd, expected whole 16-bit samples",
            frame.len()
        ));
    }
    Ok(())
}

/// Compute the loudness metric of one frame: the mean of squared sample values.
///
/// ## Properties:
/// - Pure and deterministic: identical bytes always give the identical value
/// - An empty frame has energy 0.0
/// - A dangling odd byte is ignored (callers validate first)
///
/// ## Example:
/// A frame of constant amplitude 20 has energy 400, just above the default
/// threshold of 300.
pub fn frame_energy(frame: &[u8]) -> f64 {
    let mut cursor = Cursor::new(frame);
    let mut sum = 0.0f64;
    let mut count = 0usize;

    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        let sample = sample as f64;
        sum += sample * sample;
        count += 1;
    }

    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Encode samples as little-endian bytes.
#[cfg(test)]
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|sample| sample.to_le_bytes()).collect()
}
