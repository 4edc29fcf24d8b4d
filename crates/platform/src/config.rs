//! Application configuration and constants
//!
//! The device has no runtime configuration: the serial baud divisor and the
//! length of the persisted PDM stream are compile-time constants supplied by
//! the integrator from the numbers `pdmconv` prints. This module holds those
//! constants and the validated [`StreamConfig`] that carries them.

/// Size of one storage sector in bytes. Every storage transfer is exactly
/// one sector; there is no partial-sector access.
pub const SECTOR_SIZE: usize = 512;

/// Reference clock of the serial clock generator on the reference board
/// (20 MHz crystal).
pub const REFERENCE_CLOCK_HZ: u32 = 20_000_000;

/// Number of sectors consumed by priming (sectors 0 and 1).
pub const PRIMING_SECTORS: u32 = 2;

/// Smallest accepted sector maximum: both priming sectors plus at least one
/// refill.
pub const MIN_SECTOR_MAX: u32 = PRIMING_SECTORS + 1;

/// Error returned when a stream configuration is not usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// `sector_max` does not leave room for a single refill after priming.
    SectorMaxTooSmall {
        /// The rejected value.
        sector_max: u32,
    },
    /// A baud divisor of zero would run the serial clock at its maximum
    /// rate, which never matches a PDM bit rate the encoder can produce.
    ZeroBaudDivisor,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::SectorMaxTooSmall { sector_max } => write!(
                f,
                "sector maximum {sector_max} is below the minimum of {MIN_SECTOR_MAX}"
            ),
            Self::ZeroBaudDivisor => f.write_str("baud divisor must be non-zero"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

/// Device-side playback configuration.
///
/// Both values come from the host tool's report for the encoded file:
///
/// - `baud_divisor` is programmed into the serial clock generator so the
///   byte-emission interrupt fires at `2 × S × R / 8` Hz.
/// - `sector_max` is the number of 512-byte sectors in the persisted stream.
///   The scheduler stops when its sector counter reaches this value; nothing
///   on the card is consulted.
///
/// Build it in a `const` so a bad value fails the build rather than the
/// device:
///
/// ```
/// use platform::StreamConfig;
///
/// const STREAM: StreamConfig = match StreamConfig::new(8, 79_557) {
///     Ok(config) => config,
///     Err(_) => panic!("invalid stream configuration"),
/// };
/// assert_eq!(STREAM.sector_max(), 79_557);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamConfig {
    baud_divisor: u16,
    sector_max: u32,
}

impl StreamConfig {
    /// Validate and build a configuration.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ZeroBaudDivisor`] if `baud_divisor == 0`.
    /// - [`ConfigError::SectorMaxTooSmall`] if `sector_max < MIN_SECTOR_MAX`.
    pub const fn new(baud_divisor: u16, sector_max: u32) -> Result<Self, ConfigError> {
        if baud_divisor == 0 {
            return Err(ConfigError::ZeroBaudDivisor);
        }
        if sector_max < MIN_SECTOR_MAX {
            return Err(ConfigError::SectorMaxTooSmall { sector_max });
        }
        Ok(Self {
            baud_divisor,
            sector_max,
        })
    }

    /// Value for the serial clock generator's baud register.
    pub const fn baud_divisor(&self) -> u16 {
        self.baud_divisor
    }

    /// Sector count at which playback stops.
    pub const fn sector_max(&self) -> u32 {
        self.sector_max
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn accepts_reference_board_values() {
        let config = StreamConfig::new(8, 79_557).unwrap();
        assert_eq!(config.baud_divisor(), 8);
        assert_eq!(config.sector_max(), 79_557);
    }

    #[test]
    fn rejects_sector_max_consumed_by_priming() {
        assert_eq!(
            StreamConfig::new(8, 2),
            Err(ConfigError::SectorMaxTooSmall { sector_max: 2 })
        );
        assert!(StreamConfig::new(8, MIN_SECTOR_MAX).is_ok());
    }

    #[test]
    fn rejects_zero_divisor() {
        assert_eq!(StreamConfig::new(0, 100), Err(ConfigError::ZeroBaudDivisor));
    }

    #[test]
    fn error_display_names_the_limit() {
        let msg = ConfigError::SectorMaxTooSmall { sector_max: 1 }.to_string();
        assert!(msg.contains('3'), "{msg}");
    }
}
