//! WAV container muxing for call recordings.
//!
//! Layout of the canonical 44-byte PCM header:
//!
//! | offset | field            | value                     |
//! |--------|------------------|---------------------------|
//! | 0      | `RIFF`           |                           |
//! | 4      | chunk size       | 36 + data length          |
//! | 8      | `WAVE`           |                           |
//! | 12     | `fmt `           |                           |
//! | 16     | fmt chunk size   | 16                        |
//! | 20     | audio format     | 1 (PCM)                   |
//! | 22     | channels         | 1                         |
//! | 24     | sample rate      |                           |
//! | 28     | byte rate        | sample rate × 2           |
//! | 32     | block align      | 2                         |
//! | 34     | bits per sample  | 16                        |
//! | 36     | `data`           |                           |
//! | 40     | data length      |                           |

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Write};

pub const WAV_HEADER_LEN: usize = 44;

const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;

/// Write a mono 16-bit PCM WAV file containing `samples` to `out`.
pub fn write_wav<W: Write>(out: &mut W, samples: &[u8], sample_rate: u32) -> io::Result<()> {
    let data_len = u32::try_from(samples.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "recording exceeds 4 GiB"))?;
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;

    out.write_all(b"RIFF")?;
    out.write_u32::<LittleEndian>(data_len + (WAV_HEADER_LEN as u32 - 8))?;
    out.write_all(b"WAVE")?;
    out.write_all(b"fmt ")?;
    out.write_u32::<LittleEndian>(16)?;
    out.write_u16::<LittleEndian>(1)?;
    out.write_u16::<LittleEndian>(CHANNELS)?;
    out.write_u32::<LittleEndian>(sample_rate)?;
    out.write_u32::<LittleEndian>(sample_rate * block_align as u32)?;
    out.write_u16::<LittleEndian>(block_align)?;
    out.write_u16::<LittleEndian>(BITS_PER_SAMPLE)?;
    out.write_all(b"data")?;
    out.write_u32::<LittleEndian>(data_len)?;
    out.write_all(samples)?;
    Ok(())
}

/// Mux `samples` into an in-memory WAV image.
pub fn encode_wav(samples: &[u8], sample_rate: u32) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(WAV_HEADER_LEN + samples.len());
    write_wav(&mut out, samples, sample_rate)?;
    Ok(out)
}
