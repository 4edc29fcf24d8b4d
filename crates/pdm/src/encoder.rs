//! PCM to packed PDM encoder.
//!
//! [`PdmEncoder`] drives a [`SigmaDelta`] modulator over a sample sequence
//! and yields the one-bit output packed MSB-first into bytes.
//!
//! # Timing
//!
//! With sample rate `S`, oversampling ratio `R` and `N` samples:
//!
//! - `S × R` priming steps run on silence and emit nothing. They let the
//!   integrators settle so playback does not start with a click.
//! - Exactly `2 × R × N` steps follow, each emitting one bit.
//! - A single step counter runs across both phases and gates sample reads
//!   with a strict `>`; the first emitting step therefore still sees
//!   silence.
//! - The hold counter also runs during priming, so the first sample is held
//!   for one step only. Every later sample is held for `2 × R` steps.
//! - The tail that would read past the last sample sees silence.
//!
//! Trailing bits that do not fill a byte are dropped, so the output is
//! `floor(2 × R × N / 8)` bytes.

use crate::modulator::SigmaDelta;
use crate::rate::{Oversampling, SampleRate};

/// Number of priming steps: `S × R`.
#[must_use]
pub fn priming_steps(rate: SampleRate, osr: Oversampling) -> u64 {
    u64::from(rate.hz()).saturating_mul(u64::from(osr.get()))
}

/// Number of emitted bits for `samples` input samples: `2 × R × N`.
#[must_use]
pub fn output_bits(samples: u64, osr: Oversampling) -> u64 {
    samples.saturating_mul(u64::from(osr.steps_per_sample()))
}

/// Number of output bytes for `samples` input samples: `floor(2 × R × N / 8)`.
#[must_use]
pub fn output_bytes(samples: u64, osr: Oversampling) -> u64 {
    output_bits(samples, osr) / 8
}

/// Streaming encoder over any exact-size sample iterator.
///
/// Iterating yields packed output bytes; [`next_bit`](Self::next_bit) gives
/// access to the unpacked bit stream.
///
/// ```
/// use pdm::{Oversampling, PdmEncoder, SampleRate};
///
/// let osr = Oversampling::new(4).unwrap();
/// let silence = [0i16; 100];
/// let bytes: Vec<u8> = PdmEncoder::new(silence.iter().copied(), SampleRate::Hz8000, osr).collect();
/// assert_eq!(bytes.len(), 100);
/// ```
#[derive(Debug, Clone)]
pub struct PdmEncoder<I> {
    samples: I,
    current: Option<i16>,
    modulator: SigmaDelta,
    prime_steps: u64,
    hold_steps: u64,
    step: u64,
    hold: u64,
    bits_left: u64,
    bytes_left: u64,
}

impl<I> PdmEncoder<I>
where
    I: ExactSizeIterator<Item = i16>,
{
    /// Create an encoder for `samples` recorded at `rate`.
    pub fn new(samples: impl IntoIterator<IntoIter = I>, rate: SampleRate, osr: Oversampling) -> Self {
        let mut samples = samples.into_iter();
        let count = u64::try_from(samples.len()).unwrap_or(u64::MAX);
        let bits = output_bits(count, osr);
        let current = samples.next();
        Self {
            samples,
            current,
            modulator: SigmaDelta::new(),
            prime_steps: priming_steps(rate, osr),
            hold_steps: u64::from(osr.steps_per_sample()),
            step: 0,
            hold: 0,
            bits_left: bits,
            bytes_left: bits / 8,
        }
    }

    /// Next output bit, or `None` once all `2 × R × N` bits are out.
    ///
    /// The first call runs the priming phase.
    pub fn next_bit(&mut self) -> Option<bool> {
        if self.bits_left == 0 {
            return None;
        }
        while self.step < self.prime_steps {
            self.tick();
        }
        self.bits_left = self.bits_left.saturating_sub(1);
        Some(self.tick())
    }

    /// Modulator state, for inspection.
    pub fn modulator(&self) -> &SigmaDelta {
        &self.modulator
    }

    /// One modulator step with the sample the counters select.
    fn tick(&mut self) -> bool {
        let sample = if self.step > self.prime_steps {
            let sample = self.current.unwrap_or(0);
            if self.hold >= self.hold_steps {
                self.hold = 0;
                self.current = self.samples.next();
            }
            sample
        } else {
            0
        };
        let bit = self.modulator.step(sample);
        self.step = self.step.saturating_add(1);
        self.hold = self.hold.saturating_add(1);
        bit
    }
}

impl<I> Iterator for PdmEncoder<I>
where
    I: ExactSizeIterator<Item = i16>,
{
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.bytes_left == 0 {
            return None;
        }
        let mut byte = 0u8;
        for _ in 0..8 {
            let bit = self.next_bit()?;
            byte = (byte << 1) | u8::from(bit);
        }
        self.bytes_left = self.bytes_left.saturating_sub(1);
        Some(byte)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match usize::try_from(self.bytes_left) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}

/// Error from [`encode_into`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputTooSmall {
    /// Bytes the encoding needs.
    pub needed: u64,
    /// Bytes the caller provided.
    pub available: usize,
}

impl core::fmt::Display for OutputTooSmall {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "output buffer holds {} bytes but the encoding needs {}",
            self.available, self.needed
        )
    }
}

#[cfg(feature = "std")]
impl std::error::Error for OutputTooSmall {}

/// Encode `samples` into `out`, returning the number of bytes written.
///
/// # Errors
///
/// Returns [`OutputTooSmall`] without touching `out` if it cannot hold
/// [`output_bytes`] bytes.
pub fn encode_into(
    samples: &[i16],
    rate: SampleRate,
    osr: Oversampling,
    out: &mut [u8],
) -> Result<usize, OutputTooSmall> {
    let needed = output_bytes(u64::try_from(samples.len()).unwrap_or(u64::MAX), osr);
    let fits = usize::try_from(needed).is_ok_and(|n| n <= out.len());
    if !fits {
        return Err(OutputTooSmall {
            needed,
            available: out.len(),
        });
    }
    let mut written = 0usize;
    for (slot, byte) in out
        .iter_mut()
        .zip(PdmEncoder::new(samples.iter().copied(), rate, osr))
    {
        *slot = byte;
        written = written.saturating_add(1);
    }
    Ok(written)
}

/// Error from [`encode_to_vec`].
#[cfg(any(test, feature = "std"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationFailed {
    /// Bytes requested.
    pub bytes: u64,
}

#[cfg(any(test, feature = "std"))]
impl core::fmt::Display for AllocationFailed {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "could not allocate {} bytes for the output stream", self.bytes)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AllocationFailed {}

/// Encode any exact-size sample iterator into a freshly allocated buffer.
///
/// # Errors
///
/// Returns [`AllocationFailed`] if the output buffer cannot be reserved.
#[cfg(any(test, feature = "std"))]
pub fn encode_to_vec<I>(
    samples: impl IntoIterator<IntoIter = I>,
    rate: SampleRate,
    osr: Oversampling,
) -> Result<Vec<u8>, AllocationFailed>
where
    I: ExactSizeIterator<Item = i16>,
{
    let encoder = PdmEncoder::new(samples, rate, osr);
    let bytes = encoder.bytes_left;
    let mut out = Vec::new();
    usize::try_from(bytes)
        .ok()
        .and_then(|n| out.try_reserve_exact(n).ok())
        .ok_or(AllocationFailed { bytes })?;
    out.extend(encoder);
    Ok(out)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;

    fn osr(r: u8) -> Oversampling {
        Oversampling::new(r).unwrap()
    }

    #[test]
    fn derived_sizes() {
        assert_eq!(priming_steps(SampleRate::Hz8000, osr(4)), 32_000);
        assert_eq!(output_bits(8_000, osr(4)), 64_000);
        assert_eq!(output_bytes(8_000, osr(4)), 8_000);
        // 2 * 1 * 3 = 6 bits: not a whole byte.
        assert_eq!(output_bytes(3, osr(1)), 0);
        assert_eq!(output_bytes(5, osr(1)), 1);
    }

    #[test]
    fn empty_input_yields_nothing() {
        let mut enc = PdmEncoder::new(core::iter::empty(), SampleRate::Hz8000, osr(8));
        assert_eq!(enc.next_bit(), None);
        assert_eq!(enc.next(), None);
    }

    #[test]
    fn priming_runs_before_the_first_bit() {
        let rate = SampleRate::Hz8000;
        let r = osr(2);
        let samples = [12_000i16; 4];
        let mut enc = PdmEncoder::new(samples.iter().copied(), rate, r);

        let mut reference = SigmaDelta::new();
        for _ in 0..priming_steps(rate, r) {
            reference.step(0);
        }
        // The first emitting step still sees silence.
        assert_eq!(enc.next_bit(), Some(reference.step(0)));
        assert_eq!(enc.modulator(), &reference);
    }

    #[test]
    fn first_sample_is_held_for_one_step_then_later_samples_for_2r() {
        let rate = SampleRate::Hz8000;
        let r = osr(3);
        let samples = [100i16, -200, 300];
        let mut enc = PdmEncoder::new(samples.iter().copied(), rate, r);

        let mut reference = SigmaDelta::new();
        for _ in 0..priming_steps(rate, r) {
            reference.step(0);
        }
        let mut expected = vec![0i16, 100];
        expected.extend([-200i16; 6]);
        expected.extend([300i16; 6]);
        expected.extend([0i16; 4]);
        assert_eq!(expected.len(), 18);

        for (step, &s) in expected.iter().enumerate() {
            assert_eq!(enc.next_bit(), Some(reference.step(s)), "step {step}");
        }
        assert_eq!(enc.next_bit(), None);
    }

    #[test]
    fn encode_into_checks_capacity() {
        let samples = [0i16; 16];
        let mut small = [0u8; 3];
        assert_eq!(
            encode_into(&samples, SampleRate::Hz8000, osr(1), &mut small),
            Err(OutputTooSmall {
                needed: 4,
                available: 3
            })
        );
        let mut big = [0xEEu8; 6];
        assert_eq!(
            encode_into(&samples, SampleRate::Hz8000, osr(1), &mut big),
            Ok(4)
        );
        assert_eq!(&big[4..], &[0xEE, 0xEE]);
    }

    #[test]
    fn encode_to_vec_matches_the_iterator() {
        let samples: Vec<i16> = (0..64).map(|i| (i * 500) as i16).collect();
        let direct: Vec<u8> =
            PdmEncoder::new(samples.iter().copied(), SampleRate::Hz8000, osr(2)).collect();
        let owned = encode_to_vec(samples.iter().copied(), SampleRate::Hz8000, osr(2)).unwrap();
        assert_eq!(owned, direct);
        assert_eq!(owned.len(), 32);
    }

    #[test]
    fn iterator_reports_exact_length() {
        let samples = [0i16; 10];
        let enc = PdmEncoder::new(samples.iter().copied(), SampleRate::Hz16000, osr(3));
        assert_eq!(enc.size_hint(), (7, Some(7)));
        assert_eq!(enc.count(), 7);
    }
}
