//! Read, validate, encode, write.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pdm::{encode_to_vec, Oversampling, OutputPlan};

use crate::wav;

/// One conversion.
#[derive(Debug, Clone)]
pub struct Job {
    pub input: PathBuf,
    pub output: PathBuf,
    pub osr: Oversampling,
    pub clock_hz: u32,
}

/// Convert `job.input` to `job.output` and return what was produced.
///
/// Nothing is written unless the input is a valid mono 16-bit WAV at a
/// supported rate. The output only appears once it is complete.
pub fn run(job: &Job) -> Result<OutputPlan> {
    let bytes = std::fs::read(&job.input)
        .with_context(|| format!("failed to read {}", job.input.display()))?;
    let recording = wav::decode(&bytes)
        .with_context(|| format!("{} is not a usable WAV file", job.input.display()))?;

    let plan = OutputPlan::new(
        u64::try_from(recording.data_len())?,
        u64::try_from(recording.samples.len())?,
        recording.sample_rate,
        job.osr,
        job.clock_hz,
    );
    tracing::info!(
        samples = plan.samples,
        rate = recording.sample_rate.hz(),
        osr = job.osr.get(),
        bytes = plan.bytes,
        "encoding"
    );

    let stream = encode_to_vec(
        recording.samples.iter().copied(),
        recording.sample_rate,
        job.osr,
    )?;

    write_complete(&job.output, &stream)
        .with_context(|| format!("failed to write {}", job.output.display()))?;
    tracing::debug!(path = %job.output.display(), "output persisted");
    Ok(plan)
}

/// Write `data` to a temporary file beside `path`, then rename it over
/// `path`. A failure part way through leaves no file at `path`.
fn write_complete(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".pdmconv-")
        .tempfile_in(dir)
        .with_context(|| format!("cannot create a temporary file in {}", dir.display()))?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::cast_possible_truncation
)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use tempfile::TempDir;

    fn wav_file(dir: &TempDir, name: &str, rate: u32, channels: u16, samples: &[i16]) -> PathBuf {
        let spec = WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let path = dir.path().join(name);
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    fn job(input: PathBuf, output: PathBuf, r: u8) -> Job {
        Job {
            input,
            output,
            osr: Oversampling::new(r).unwrap(),
            clock_hz: platform::config::REFERENCE_CLOCK_HZ,
        }
    }

    #[test]
    fn converts_and_reports_sizes() {
        let dir = TempDir::new().unwrap();
        let input = wav_file(&dir, "tone.wav", 16_000, 1, &[1_000; 4_096]);
        let output = dir.path().join("tone.pdm");

        let plan = run(&job(input, output.clone(), 1)).unwrap();

        assert_eq!(plan.samples, 4_096);
        assert_eq!(plan.input_bytes, 8_192);
        assert_eq!(plan.bytes, 1_024);
        assert_eq!(plan.sectors, 2);
        assert_eq!(std::fs::read(&output).unwrap().len(), 1_024);
    }

    #[test]
    fn invalid_input_leaves_no_output() {
        let dir = TempDir::new().unwrap();
        let input = wav_file(&dir, "stereo.wav", 8_000, 2, &[0; 64]);
        let output = dir.path().join("out.pdm");

        let err = run(&job(input, output.clone(), 4)).unwrap_err();
        assert!(format!("{err:#}").contains("2 channels"));
        assert!(!output.exists());
        // No stray temporary file either.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn existing_output_is_replaced_whole() {
        let dir = TempDir::new().unwrap();
        let input = wav_file(&dir, "in.wav", 8_000, 1, &[0; 800]);
        let output = dir.path().join("out.pdm");
        std::fs::write(&output, vec![0xEE; 10_000]).unwrap();

        run(&job(input, output.clone(), 4)).unwrap();
        let written = std::fs::read(&output).unwrap();
        assert_eq!(written.len(), 800);
        // Encoded silence: roughly half the bits set in every byte.
        assert!(written.iter().all(|b| (3..=5).contains(&b.count_ones())));
    }

    #[test]
    fn missing_input_names_the_path() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("nope.wav");
        let err = run(&job(input, dir.path().join("out.pdm"), 4)).unwrap_err();
        assert!(err.to_string().contains("nope.wav"));
    }
}
