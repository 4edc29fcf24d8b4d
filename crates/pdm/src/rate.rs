//! Sample-rate and oversampling newtypes.
//!
//! - `SampleRate`: the two PCM rates the player supports
//! - `Oversampling`: the ratio `R`, `1..=255`, never zero

use core::num::NonZeroU8;

// ── SampleRate ───────────────────────────────────────────────────────────────

/// PCM sample rate of the input recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SampleRate {
    /// 8 kHz (telephony).
    Hz8000,
    /// 16 kHz (wideband speech).
    Hz16000,
}

impl SampleRate {
    /// Map a rate in Hz to a supported rate.
    #[must_use]
    pub const fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            8_000 => Some(Self::Hz8000),
            16_000 => Some(Self::Hz16000),
            _ => None,
        }
    }

    /// The rate in Hz.
    #[must_use]
    pub const fn hz(self) -> u32 {
        match self {
            Self::Hz8000 => 8_000,
            Self::Hz16000 => 16_000,
        }
    }

    /// The rate in whole kHz, for reports.
    #[must_use]
    pub const fn khz(self) -> u32 {
        self.hz() / 1_000
    }
}

impl core::fmt::Display for SampleRate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} Hz", self.hz())
    }
}

// ── Oversampling ─────────────────────────────────────────────────────────────

/// Error returned for an oversampling ratio of zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroOversampling;

impl core::fmt::Display for ZeroOversampling {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("oversampling ratio must be between 1 and 255")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ZeroOversampling {}

/// Oversampling ratio `R`. Each input sample becomes `2 × R` output bits.
///
/// There is no default: the ratio trades output size against quality and
/// must be chosen explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Oversampling(NonZeroU8);

impl Oversampling {
    /// Create an oversampling ratio.
    ///
    /// # Errors
    ///
    /// Returns [`ZeroOversampling`] if `ratio == 0`.
    pub const fn new(ratio: u8) -> Result<Self, ZeroOversampling> {
        match NonZeroU8::new(ratio) {
            Some(r) => Ok(Self(r)),
            None => Err(ZeroOversampling),
        }
    }

    /// The ratio as a plain integer.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0.get()
    }

    /// Output steps per input sample: `2 × R`.
    #[must_use]
    #[allow(clippy::arithmetic_side_effects)] // at most 510
    pub const fn steps_per_sample(self) -> u32 {
        2 * self.0.get() as u32
    }
}

impl TryFrom<u8> for Oversampling {
    type Error = ZeroOversampling;

    fn try_from(ratio: u8) -> Result<Self, Self::Error> {
        Self::new(ratio)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn only_two_rates_are_supported() {
        assert_eq!(SampleRate::from_hz(8_000), Some(SampleRate::Hz8000));
        assert_eq!(SampleRate::from_hz(16_000), Some(SampleRate::Hz16000));
        assert_eq!(SampleRate::from_hz(44_100), None);
        assert_eq!(SampleRate::from_hz(0), None);
    }

    #[test]
    fn rate_round_trips_through_hz() {
        for rate in [SampleRate::Hz8000, SampleRate::Hz16000] {
            assert_eq!(SampleRate::from_hz(rate.hz()), Some(rate));
        }
        assert_eq!(SampleRate::Hz16000.khz(), 16);
    }

    #[test]
    fn zero_oversampling_is_rejected() {
        assert_eq!(Oversampling::new(0), Err(ZeroOversampling));
        assert_eq!(Oversampling::try_from(255).unwrap().get(), 255);
    }

    #[test]
    fn steps_per_sample_is_twice_the_ratio() {
        assert_eq!(Oversampling::new(1).unwrap().steps_per_sample(), 2);
        assert_eq!(Oversampling::new(255).unwrap().steps_per_sample(), 510);
    }
}
