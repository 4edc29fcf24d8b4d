//! Device-side numbers derived from an encoding.
//!
//! The player has no runtime configuration, so everything it needs is
//! computed here, on the host, and compiled in by the integrator: the
//! serial clock divisor that makes the byte interrupt fire at the PDM bit
//! rate, and the sector count of the stream.

use platform::config::{ConfigError, StreamConfig, REFERENCE_CLOCK_HZ, SECTOR_SIZE};

use crate::encoder::{output_bits, output_bytes};
use crate::rate::{Oversampling, SampleRate};

/// Why no baud divisor fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaudError {
    /// The reference clock is slower than half the PDM bit rate; the
    /// divisor would be negative.
    ClockTooSlow {
        /// Reference clock in Hz.
        clock_hz: u32,
        /// PDM bit rate in bits per second.
        bit_rate: u32,
    },
    /// The divisor does not fit the 16-bit register.
    OutOfRange(u64),
}

impl core::fmt::Display for BaudError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ClockTooSlow { clock_hz, bit_rate } => write!(
                f,
                "a {clock_hz} Hz reference clock cannot produce {bit_rate} bit/s"
            ),
            Self::OutOfRange(divisor) => {
                write!(f, "baud divisor {divisor} does not fit in 16 bits")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BaudError {}

/// PDM bit rate: `2 × S × R` bits per second.
#[must_use]
pub fn bit_rate(rate: SampleRate, osr: Oversampling) -> u32 {
    rate.hz().saturating_mul(osr.steps_per_sample())
}

/// Exact baud divisor `F / (2 × S × R × 2) − 1`, before rounding.
#[must_use]
#[allow(clippy::arithmetic_side_effects)] // float math, no overflow
pub fn baud_divisor_exact(clock_hz: u32, rate: SampleRate, osr: Oversampling) -> f64 {
    f64::from(clock_hz) / (2.0 * f64::from(bit_rate(rate, osr))) - 1.0
}

/// Baud divisor rounded half-up: `round(F / (4 × S × R) − 1)`.
///
/// Computed in integers as `floor((2F − 4SR) / 8SR)` so the rounding is
/// exact.
///
/// # Errors
///
/// [`BaudError`] if the divisor would be negative or exceed `u16::MAX`.
pub fn baud_divisor(clock_hz: u32, rate: SampleRate, osr: Oversampling) -> Result<u16, BaudError> {
    let bits = u64::from(bit_rate(rate, osr));
    let twice_clock = u64::from(clock_hz).saturating_mul(2);
    let numerator = twice_clock
        .checked_sub(bits.saturating_mul(2))
        .ok_or(BaudError::ClockTooSlow {
            clock_hz,
            bit_rate: bit_rate(rate, osr),
        })?;
    let divisor = numerator
        .checked_div(bits.saturating_mul(4))
        .unwrap_or_default();
    u16::try_from(divisor).map_err(|_| BaudError::OutOfRange(divisor))
}

/// Everything the host tool reports about one conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputPlan {
    /// Bytes in the input `data` chunk.
    pub input_bytes: u64,
    /// Input samples `N`.
    pub samples: u64,
    /// Input sample rate `S`.
    pub sample_rate: SampleRate,
    /// Oversampling ratio `R`.
    pub osr: Oversampling,
    /// Emitted bits, `2 × R × N`.
    pub bits: u64,
    /// Output bytes, `floor(bits / 8)`.
    pub bytes: u64,
    /// Whole 512-byte sectors in the output. This is the device's sector
    /// maximum.
    pub sectors: u64,
    /// Reference clock used for the divisor.
    pub clock_hz: u32,
    /// Divisor before rounding.
    pub baud_exact: f64,
    /// Divisor to program.
    pub baud_divisor: Result<u16, BaudError>,
}

impl OutputPlan {
    /// Plan the conversion of `samples` samples at `sample_rate`.
    #[must_use]
    pub fn new(
        input_bytes: u64,
        samples: u64,
        sample_rate: SampleRate,
        osr: Oversampling,
        clock_hz: u32,
    ) -> Self {
        let bytes = output_bytes(samples, osr);
        Self {
            input_bytes,
            samples,
            sample_rate,
            osr,
            bits: output_bits(samples, osr),
            bytes,
            sectors: bytes / SECTOR_SIZE as u64,
            clock_hz,
            baud_exact: baud_divisor_exact(clock_hz, sample_rate, osr),
            baud_divisor: baud_divisor(clock_hz, sample_rate, osr),
        }
    }

    /// Plan against the reference board's 20 MHz clock.
    #[must_use]
    pub fn with_reference_clock(
        input_bytes: u64,
        samples: u64,
        sample_rate: SampleRate,
        osr: Oversampling,
    ) -> Self {
        Self::new(input_bytes, samples, sample_rate, osr, REFERENCE_CLOCK_HZ)
    }

    /// Output size in MiB, for reports.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // display only
    pub fn mebibytes(&self) -> f64 {
        self.bytes as f64 / (1024.0 * 1024.0)
    }

    /// The device configuration for this stream, if it is usable.
    ///
    /// # Errors
    ///
    /// [`PlanError::Baud`] if no divisor fits, [`PlanError::Config`] if the
    /// stream is too short to play or the divisor is zero.
    pub fn stream_config(&self) -> Result<StreamConfig, PlanError> {
        let divisor = self.baud_divisor.map_err(PlanError::Baud)?;
        let sector_max = u32::try_from(self.sectors).unwrap_or(u32::MAX);
        StreamConfig::new(divisor, sector_max).map_err(PlanError::Config)
    }
}

/// Why an [`OutputPlan`] does not yield a device configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanError {
    /// No baud divisor fits.
    Baud(BaudError),
    /// The divisor or sector count is rejected by the device.
    Config(ConfigError),
}

impl core::fmt::Display for PlanError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Baud(e) => core::fmt::Display::fmt(e, f),
            Self::Config(e) => core::fmt::Display::fmt(e, f),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PlanError {}

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
    fn reference_board_divisors() {
        // 20e6 / 128e3 - 1 = 155.25 -> 155
        assert_eq!(
            baud_divisor(REFERENCE_CLOCK_HZ, SampleRate::Hz8000, osr(4)),
            Ok(155)
        );
        // 20e6 / 64e3 - 1 = 311.5 -> 312 (half rounds up)
        assert_eq!(
            baud_divisor(REFERENCE_CLOCK_HZ, SampleRate::Hz8000, osr(2)),
            Ok(312)
        );
        // 20e6 / 512e3 - 1 = 38.0625 -> 38
        assert_eq!(
            baud_divisor(REFERENCE_CLOCK_HZ, SampleRate::Hz16000, osr(8)),
            Ok(38)
        );
    }

    #[test]
    fn exact_divisor_matches_formula() {
        let exact = baud_divisor_exact(REFERENCE_CLOCK_HZ, SampleRate::Hz8000, osr(4));
        assert!((exact - 155.25).abs() < 1e-9);
    }

    #[test]
    fn slow_clock_is_an_error() {
        assert_eq!(
            baud_divisor(1_000, SampleRate::Hz16000, osr(255)),
            Err(BaudError::ClockTooSlow {
                clock_hz: 1_000,
                bit_rate: 8_160_000
            })
        );
    }

    #[test]
    fn huge_divisor_is_out_of_range() {
        assert!(matches!(
            baud_divisor(u32::MAX, SampleRate::Hz8000, osr(1)),
            Err(BaudError::OutOfRange(_))
        ));
    }

    #[test]
    fn plan_for_one_second_at_8khz() {
        let plan = OutputPlan::with_reference_clock(16_000, 8_000, SampleRate::Hz8000, osr(4));
        assert_eq!(plan.bits, 64_000);
        assert_eq!(plan.bytes, 8_000);
        assert_eq!(plan.sectors, 15);
        assert_eq!(plan.baud_divisor, Ok(155));
        let config = plan.stream_config().unwrap();
        assert_eq!(config.baud_divisor(), 155);
        assert_eq!(config.sector_max(), 15);
    }

    #[test]
    fn short_stream_has_no_device_config() {
        let plan = OutputPlan::with_reference_clock(2, 1, SampleRate::Hz8000, osr(4));
        assert!(matches!(
            plan.stream_config(),
            Err(PlanError::Config(ConfigError::SectorMaxTooSmall { sector_max: 0 }))
        ));
    }
}
