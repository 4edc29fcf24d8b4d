//! WAV input.
//!
//! `hound` decodes the container. On top of that the file must use the
//! canonical 44-byte layout (`RIFF`/`WAVE`, a 16-byte `fmt ` chunk, then
//! `data`) and hold plain PCM, mono, 16 bits, at 8 or 16 kHz.

use std::io::Cursor;

use anyhow::{bail, ensure, Context, Result};
use hound::{SampleFormat, WavReader};
use pdm::SampleRate;

/// Length of the canonical header.
pub const HEADER_LEN: usize = 44;

const FMT_LEN_OFFSET: usize = 16;
const DATA_TAG_OFFSET: usize = 36;
const CANONICAL_FMT_LEN: u32 = 16;
const BITS_PER_SAMPLE: u16 = 16;

/// A validated mono 16-bit recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    pub sample_rate: SampleRate,
    pub samples: Vec<i16>,
}

impl Recording {
    /// Size of the sample data in bytes.
    pub fn data_len(&self) -> usize {
        self.samples.len().saturating_mul(2)
    }
}

/// Validate `bytes` as a WAV file and decode its samples.
///
/// Bytes after the `data` chunk are ignored.
pub fn decode(bytes: &[u8]) -> Result<Recording> {
    ensure!(
        bytes.len() >= HEADER_LEN,
        "file is {} bytes, too short for a {HEADER_LEN}-byte WAV header",
        bytes.len()
    );
    let mut reader = WavReader::new(Cursor::new(bytes)).context("not a readable WAV file")?;

    let spec = reader.spec();
    ensure!(
        spec.sample_format == SampleFormat::Int,
        "floating-point samples are not supported, only integer PCM"
    );
    ensure!(
        spec.channels == 1,
        "file has {} channels, only mono is supported",
        spec.channels
    );
    let sample_rate = SampleRate::from_hz(spec.sample_rate).with_context(|| {
        format!(
            "sample rate {} Hz is not supported, only 8000 or 16000 Hz",
            spec.sample_rate
        )
    })?;
    ensure!(
        spec.bits_per_sample == BITS_PER_SAMPLE,
        "{} bits per sample is not supported, only {BITS_PER_SAMPLE}",
        spec.bits_per_sample
    );

    let fmt_len = le_u32(bytes, FMT_LEN_OFFSET);
    if fmt_len != Some(CANONICAL_FMT_LEN) {
        bail!(
            "fmt chunk is {} bytes, expected {CANONICAL_FMT_LEN}",
            fmt_len.unwrap_or_default()
        );
    }
    ensure!(
        bytes.get(DATA_TAG_OFFSET..DATA_TAG_OFFSET.saturating_add(4)) == Some(b"data".as_slice()),
        "data chunk must directly follow the fmt chunk"
    );

    let declared = reader.len();
    let samples = reader
        .samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("data chunk declares {declared} samples but the file ends early"))?;

    Ok(Recording {
        sample_rate,
        samples,
    })
}

fn le_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let field = bytes.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes(field.try_into().ok()?))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation
)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn fixture(rate: u32, channels: u16, bits: u16, samples: &[i16]) -> Vec<u8> {
        let spec = WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: bits,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        for &sample in samples {
            if bits == 8 {
                writer.write_sample(sample as i8).unwrap();
            } else {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    fn message(bytes: &[u8]) -> String {
        format!("{:#}", decode(bytes).unwrap_err())
    }

    #[test]
    fn decodes_a_mono_recording() {
        let bytes = fixture(8_000, 1, 16, &[1, -2, 300, i16::MIN]);
        assert_eq!(&bytes[36..40], b"data");

        let recording = decode(&bytes).unwrap();
        assert_eq!(recording.sample_rate, SampleRate::Hz8000);
        assert_eq!(recording.samples, vec![1, -2, 300, i16::MIN]);
        assert_eq!(recording.data_len(), 8);
    }

    #[test]
    fn rejects_stereo_citing_channel_count() {
        let bytes = fixture(8_000, 2, 16, &[0, 0]);
        assert!(message(&bytes).contains("2 channels"));
    }

    #[test]
    fn rejects_unsupported_rate() {
        let bytes = fixture(44_100, 1, 16, &[0]);
        assert!(message(&bytes).contains("44100"));
    }

    #[test]
    fn rejects_other_bit_depths() {
        let bytes = fixture(8_000, 1, 8, &[0, 1]);
        assert!(message(&bytes).contains("8 bits per sample"));
    }

    #[test]
    fn rejects_float_samples() {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        writer.write_sample(0.5f32).unwrap();
        writer.finalize().unwrap();

        assert!(message(&cursor.into_inner()).contains("integer PCM"));
    }

    #[test]
    fn rejects_short_files() {
        assert!(message(&[0u8; 43]).contains("too short"));
    }

    #[test]
    fn rejects_bad_signatures() {
        let good = fixture(8_000, 1, 16, &[0]);
        for offset in [0, 8] {
            let mut bytes = good.clone();
            bytes[offset] = b'X';
            assert!(decode(&bytes).is_err(), "offset {offset}");
        }
    }

    #[test]
    fn rejects_a_chunk_between_fmt_and_data() {
        let good = fixture(8_000, 1, 16, &[7, 8]);
        let mut bytes = good[..DATA_TAG_OFFSET].to_vec();
        bytes.extend(b"LIST");
        bytes.extend(4u32.to_le_bytes());
        bytes.extend(b"abcd");
        bytes.extend(&good[DATA_TAG_OFFSET..]);
        let riff_len = (bytes.len() - 8) as u32;
        bytes[4..8].copy_from_slice(&riff_len.to_le_bytes());

        assert!(message(&bytes).contains("directly follow the fmt chunk"));
    }

    #[test]
    fn rejects_truncated_data() {
        let mut bytes = fixture(8_000, 1, 16, &[1, 2, 3]);
        bytes.truncate(bytes.len() - 1);
        assert!(message(&bytes).contains("declares 3 samples"));
    }

    #[test]
    fn ignores_chunks_after_the_data() {
        let mut bytes = fixture(8_000, 1, 16, &[1, 2]);
        bytes.extend(b"LIST");
        bytes.extend(4u32.to_le_bytes());
        bytes.extend(b"abcd");
        assert_eq!(decode(&bytes).unwrap().samples, vec![1, 2]);
    }
}
