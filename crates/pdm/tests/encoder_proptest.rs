//! Property-based tests for the encoder.
//! Length law, determinism and accumulator boundedness over arbitrary input.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation
)]

use pdm::{baud_divisor, output_bytes, Oversampling, PdmEncoder, SampleRate, SigmaDelta};
use proptest::prelude::*;

fn rate() -> impl Strategy<Value = SampleRate> {
    prop_oneof![Just(SampleRate::Hz8000), Just(SampleRate::Hz16000)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Encoded length is floor(2·R·N / 8) for every N and R.
    #[test]
    fn length_law(n in 0usize..300, r in 1u8..=12, rate in rate()) {
        let samples = vec![0i16; n];
        let osr = Oversampling::new(r).unwrap();
        let out: Vec<u8> = PdmEncoder::new(samples.iter().copied(), rate, osr).collect();
        prop_assert_eq!(out.len(), 2 * usize::from(r) * n / 8);
        prop_assert_eq!(out.len() as u64, output_bytes(n as u64, osr));
    }

    /// Same input, same output.
    #[test]
    fn deterministic(samples in proptest::collection::vec(any::<i16>(), 0..200), r in 1u8..=8) {
        let osr = Oversampling::new(r).unwrap();
        let a: Vec<u8> = PdmEncoder::new(samples.iter().copied(), SampleRate::Hz8000, osr).collect();
        let b: Vec<u8> = PdmEncoder::new(samples.iter().copied(), SampleRate::Hz8000, osr).collect();
        prop_assert_eq!(a, b);
    }
}

proptest! {
    /// Any 16-bit input held for 2·R steps, R up to 255: the modulator never
    /// panics, even when overloaded for the whole run.
    #[test]
    fn modulator_never_panics(
        samples in proptest::collection::vec(any::<i16>(), 1..64),
        r in 1u8..=255,
    ) {
        let mut m = SigmaDelta::new();
        for &s in &samples {
            for _ in 0..2 * u32::from(r) {
                let _ = m.step(s);
            }
        }
        let _ = m.step(0);
    }

    /// Inputs well inside full scale keep the first accumulator within a
    /// few rails of zero: the loop is stable.
    #[test]
    fn in_range_input_is_stable(
        samples in proptest::collection::vec(-16_000i16..=16_000, 1..64),
        r in 1u8..=32,
    ) {
        let mut m = SigmaDelta::new();
        for &s in &samples {
            for _ in 0..2 * u32::from(r) {
                m.step(s);
                prop_assert!(m.first().unsigned_abs() < 1 << 20, "A = {}", m.first());
                prop_assert!(m.second().unsigned_abs() < 1 << 24, "B = {}", m.second());
            }
        }
    }

    /// The baud divisor never panics and, when it exists, rounds the exact
    /// value half-up.
    #[test]
    fn baud_divisor_rounds_half_up(clock in 1_000_000u32..=40_000_000, r in 1u8..=255, rate in rate()) {
        let osr = Oversampling::new(r).unwrap();
        if let Ok(divisor) = baud_divisor(clock, rate, osr) {
            let exact = f64::from(clock) / (4.0 * f64::from(rate.hz()) * f64::from(r)) - 1.0;
            prop_assert!((f64::from(divisor) - (exact + 0.5).floor()).abs() < 1e-6,
                "clock {} rate {} R {}: {} vs {}", clock, rate, r, divisor, exact);
        }
    }
}
