//! Second-order one-bit sigma-delta modulator.
//!
//! Two cascaded integrators with the quantised output fed back into both:
//!
//! ```text
//!   B += A
//!   level = +FULL_SCALE if B > 0 else -FULL_SCALE
//!   A += s - level
//!   B -= level
//!   bit = level > 0
//! ```
//!
//! The noise transfer function is `(1 - z^-1)^2`, pushing quantisation noise
//! above the audio band where the analog output filter removes it.
//!
//! A one-bit second-order loop is only conditionally stable: a sustained
//! full-scale input drives the integrators without bound. Both accumulators
//! saturate at the `i32` range so an overloaded input degrades into clipping
//! rather than wrapping.

/// Positive rail of the quantiser (`i16::MAX`).
pub const RAIL_HIGH: i32 = i16::MAX as i32;

/// Negative rail of the quantiser (`i16::MIN`).
pub const RAIL_LOW: i32 = i16::MIN as i32;

/// Modulator state: first-stage accumulator `A` and second-stage `B`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SigmaDelta {
    first: i32,
    second: i32,
}

impl SigmaDelta {
    /// A modulator with both accumulators at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            first: 0,
            second: 0,
        }
    }

    /// Run one step with input `sample` and return the output bit.
    pub fn step(&mut self, sample: i16) -> bool {
        self.second = self.second.saturating_add(self.first);
        let level = if self.second > 0 { RAIL_HIGH } else { RAIL_LOW };
        // |sample - level| <= 65535, no overflow before saturation.
        let error = i32::from(sample).saturating_sub(level);
        self.first = self.first.saturating_add(error);
        self.second = self.second.saturating_sub(level);
        level > 0
    }

    /// First-stage accumulator `A`.
    #[must_use]
    pub const fn first(&self) -> i32 {
        self.first
    }

    /// Second-stage accumulator `B`.
    #[must_use]
    pub const fn second(&self) -> i32 {
        self.second
    }
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

    #[test]
    fn first_step_from_rest_picks_negative_rail() {
        let mut m = SigmaDelta::new();
        assert!(!m.step(0));
        assert_eq!(m.first(), 32_768);
        assert_eq!(m.second(), 32_768);
    }

    #[test]
    fn silence_settles_into_alternating_bits() {
        let mut m = SigmaDelta::new();
        for _ in 0..1_000 {
            m.step(0);
        }
        let ones = (0..1_000).filter(|_| m.step(0)).count();
        assert!((490..=510).contains(&ones), "ones = {ones}");
    }

    #[test]
    fn silence_keeps_accumulators_small() {
        let mut m = SigmaDelta::new();
        for _ in 0..100_000 {
            m.step(0);
            assert!(m.first().abs() <= 2 * RAIL_HIGH + 2);
            assert!(m.second().abs() <= 4 * RAIL_HIGH + 4);
        }
    }

    #[test]
    fn bit_density_tracks_dc_level() {
        // Half of positive full scale -> roughly 75 % ones.
        let mut m = SigmaDelta::new();
        let ones = (0..40_000).filter(|_| m.step(16_384)).count();
        let density = ones as f64 / 40_000.0;
        assert!((0.72..0.78).contains(&density), "density = {density}");
    }

    #[test]
    fn full_scale_overload_saturates_instead_of_wrapping() {
        let mut m = SigmaDelta::new();
        for _ in 0..1_000_000 {
            m.step(i16::MIN);
        }
        // Still driving the negative rail, still no panic.
        assert!(!m.step(i16::MIN));
    }
}
