//! The two disjoint error taxonomies of the driver.
//!
//! - [`InitError`]: one reason per failed bring-up step. Returned to the
//!   caller as a value; board code decides whether to retry or halt.
//! - [`IoError`]: steady-state sector I/O failures. These go to the
//!   injected [`platform::FatalSink`] and are never retried.

/// Why card bring-up failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitError {
    /// `CMD0` never answered "idle" after every retry.
    Cmd0,
    /// `CMD8` did not answer "idle" (v1 card or bad voltage).
    Cmd8,
    /// `CMD16` did not answer "ready".
    Cmd16,
    /// `CMD55` did not answer "idle" during the `ACMD41` loop.
    Cmd55,
    /// The transport itself failed (bus or chip-select error).
    Transport,
}

impl core::fmt::Display for InitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Cmd0 => f.write_str("CMD0 (reset) was not acknowledged with idle"),
            Self::Cmd8 => f.write_str("CMD8 (interface condition) was rejected"),
            Self::Cmd16 => f.write_str("CMD16 (set block length) was rejected"),
            Self::Cmd55 => f.write_str("CMD55 (application command) was rejected"),
            Self::Transport => f.write_str("transport failure during initialisation"),
        }
    }
}

/// Unrecoverable sector I/O failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IoError {
    /// `CMD17` answered with a non-zero R1.
    ReadCmdRejected,
    /// The card sent a data-error token instead of the start token.
    ReadStartTokenMissing,
    /// `CMD24` answered with a non-zero R1.
    WriteCmdRejected,
    /// The data-response token had bit 0 clear.
    InvalidDataResponse,
    /// The card rejected the written block's CRC.
    CrcError,
    /// The card failed to program the written block.
    WriteError,
    /// The data-response token held an undefined status.
    UnknownError,
    /// The transport itself failed (bus or chip-select error).
    Transport,
}

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ReadCmdRejected => f.write_str("read command rejected"),
            Self::ReadStartTokenMissing => f.write_str("read start token missing"),
            Self::WriteCmdRejected => f.write_str("write command rejected"),
            Self::InvalidDataResponse => f.write_str("invalid data response token"),
            Self::CrcError => f.write_str("card reported a CRC error on write"),
            Self::WriteError => f.write_str("card reported a write error"),
            Self::UnknownError => f.write_str("card reported an unknown write status"),
            Self::Transport => f.write_str("transport failure during sector I/O"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InitError {}

#[cfg(feature = "std")]
impl std::error::Error for IoError {}

impl IoError {
    /// Classify a data-response token received after a block write.
    ///
    /// Returns `None` if the block was accepted.
    pub fn from_data_response(token: u8) -> Option<Self> {
        use crate::command::{DATA_ACCEPTED, DATA_CRC_ERROR, DATA_RESPONSE_MASK, DATA_WRITE_ERROR};

        let status = token & DATA_RESPONSE_MASK;
        if status & 0x01 == 0 {
            Some(Self::InvalidDataResponse)
        } else if status == DATA_CRC_ERROR {
            Some(Self::CrcError)
        } else if status == DATA_WRITE_ERROR {
            Some(Self::WriteError)
        } else if status != DATA_ACCEPTED {
            Some(Self::UnknownError)
        } else {
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn accepted_token_is_not_an_error() {
        assert_eq!(IoError::from_data_response(0x05), None);
        // Upper three bits are undefined and must be ignored.
        assert_eq!(IoError::from_data_response(0xE5), None);
    }

    #[test]
    fn data_response_classification() {
        assert_eq!(IoError::from_data_response(0x0B), Some(IoError::CrcError));
        assert_eq!(IoError::from_data_response(0x0D), Some(IoError::WriteError));
        assert_eq!(
            IoError::from_data_response(0x04),
            Some(IoError::InvalidDataResponse)
        );
        assert_eq!(IoError::from_data_response(0x07), Some(IoError::UnknownError));
    }

    #[test]
    fn display_is_human_readable() {
        assert_eq!(InitError::Cmd8.to_string(), "CMD8 (interface condition) was rejected");
        assert!(IoError::ReadCmdRejected.to_string().contains("read"));
    }
}
