//! # Synthesis Audio Resampling
//!
//! Converts the 16kHz PCM stream coming back from the synthesis service into
//! 8kHz frames the telephony transport can play.
//!
//! ## Method:
//! Plain decimation: keep the first sample of every group of `ratio` samples and
//! drop the rest. There is no anti-aliasing filter, so energy above the new Nyquist
//! frequency folds back into the band. Adding a low-pass stage would change the
//! emitted samples.
//!
//! ## Streaming:
//! Source bytes arrive in arbitrary network-sized pieces. The decimator keeps a
//! rolling buffer and emits every complete output frame as soon as enough input
//! has accumulated, so a reply starts playing before synthesis has finished.

/// Incremental decimating chunker.
///
/// ## Example:
/// With `ratio = 2` and `frame_bytes = 320`, each 640 source bytes (320 samples
/// at 16kHz, 20ms) become one 320-byte frame (160 samples at 8kHz, 20ms).
#[derive(Debug)]
pub struct Decimator {
    ratio: usize,
    frame_bytes: usize,
    pending: Vec<u8>,
}

impl Decimator {
    /// Create a decimator.
    ///
    /// ## Parameters:
    /// - **ratio**: source rate / target rate, at least 1
    /// - **frame_bytes**: size of each emitted frame, rounded down to whole samples
    pub fn new(ratio: usize, frame_bytes: usize) -> Self {
        let frame_bytes = (frame_bytes - frame_bytes % 2).max(2);
        Self {
            ratio: ratio.max(1),
            frame_bytes,
            pending: Vec::new(),
        }
    }

    /// Source bytes consumed per emitted frame.
    pub fn input_chunk_bytes(&self) -> usize {
        self.frame_bytes * self.ratio
    }

    /// Bytes buffered but not yet emitted.
    #[cfg(test)]
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    /// Feed source bytes and collect every complete output frame.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(bytes);

        let chunk = self.input_chunk_bytes();
        let complete = self.pending.len() / chunk;
        if complete == 0 {
            return Vec::new();
        }

        let consumed = complete * chunk;
        let frames = self.pending[..consumed]
            .chunks_exact(chunk)
            .map(|source| decimate(source, self.ratio))
            .collect();
        self.pending.drain(..consumed);
        frames
    }

    /// Flush the remainder at end of stream.
    ///
    /// Emits one short frame when at least one whole group of `ratio` samples is
    /// left; a trailing partial group (including a dangling odd byte) is dropped.
    pub fn finish(mut self) -> Option<Vec<u8>> {
        let group = 2 * self.ratio;
        let usable = self.pending.len() - self.pending.len() % group;
        if usable == 0 {
            return None;
        }
        self.pending.truncate(usable);
        Some(decimate(&self.pending, self.ratio))
    }
}

/// Keep the first 16-bit sample of every `ratio`-sample group.
fn decimate(source: &[u8], ratio: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(source.len() / ratio);
    for group in source.chunks_exact(2 * ratio) {
        out.extend_from_slice(&group[..2]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::processor::samples_to_bytes;

    fn to_samples(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    fn run(decimator: &mut Decimator, input: &[u8], piece: usize) -> Vec<Vec<u8>> {
        input.chunks(piece).flat_map(|bytes| decimator.push(bytes)).collect()
    }

    #[test]
    fn test_full_frames_have_transport_size() {
        let mut decimator = Decimator::new(2, 320);
        assert_eq!(decimator.input_chunk_bytes(), 640);

        let frames = decimator.push(&vec![0u8; 640 * 3 + 100]);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|frame| frame.len() == 320));
        assert_eq!(decimator.pending_bytes(), 100);
    }

    #[test]
    fn test_tone_sample_count_and_order() {
        // Ramp makes every sample unique so reordering would show up.
        for total_samples in [0usize, 1, 2, 3, 319, 320, 321, 1000, 1001] {
            let samples: Vec<i16> = (0..total_samples).map(|i| i as i16).collect();
            let input = samples_to_bytes(&samples);

            let mut decimator = Decimator::new(2, 320);
            let mut frames = run(&mut decimator, &input, 97);
            frames.extend(decimator.finish());

            let output: Vec<i16> = frames.iter().flat_map(|frame| to_samples(frame)).collect();
            let expected: Vec<i16> =
                samples.iter().copied().step_by(2).take(total_samples / 2).collect();

            assert_eq!(output.len(), total_samples / 2, "samples={}", total_samples);
            assert_eq!(output, expected);
        }
    }

    #[test]
    fn test_chunk_boundaries_do_not_matter() {
        let samples: Vec<i16> = (0..2000)
            .map(|i| ((i as f32 * 0.05).sin() * 12000.0) as i16)
            .collect();
        let input = samples_to_bytes(&samples);

        let mut whole = Decimator::new(2, 320);
        let mut expected = whole.push(&input);
        expected.extend(whole.finish());

        let mut pieces = Decimator::new(2, 320);
        let mut actual = run(&mut pieces, &input, 7);
        actual.extend(pieces.finish());

        assert_eq!(actual, expected);
    }

    #[test]
    fn test_finish_drops_dangling_bytes() {
        let mut decimator = Decimator::new(2, 320);
        assert!(decimator.push(&[1, 0, 2, 0, 3]).is_empty());
        assert_eq!(decimator.finish(), Some(vec![1, 0]));

        let mut decimator = Decimator::new(2, 320);
        decimator.push(&[1, 0, 2]);
        assert_eq!(decimator.finish(), None);
    }

    #[test]
    fn test_ratio_three() {
        let samples: Vec<i16> = (0..12).collect();
        let mut decimator = Decimator::new(3, 4);
        let frames = decimator.push(&samples_to_bytes(&samples));
        let output: Vec<i16> = frames.iter().flat_map(|frame| to_samples(frame)).collect();
        assert_eq!(output, vec![0, 3, 6, 9]);
        assert_eq!(decimator.finish(), None);
    }
}
