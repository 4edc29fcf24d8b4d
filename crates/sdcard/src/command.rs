//! Command frames, response codes and data tokens of the SPI-mode protocol.
//!
//! A command is always six bytes on the wire:
//!
//! ```text
//! | 0 1 i i i i i i | arg[31:24] | arg[23:16] | arg[15:8] | arg[7:0] | c c c c c c c 1 |
//!   start+tx bits, index           big-endian argument                 CRC7 + end bit
//! ```
//!
//! CRC checking is off by default in SPI mode, so only `CMD0` and `CMD8`
//! (sent before the card has left native mode) carry a real CRC.

/// R1: card is initialised and ready.
pub const R1_READY: u8 = 0x00;

/// R1: card is in the idle state (still initialising).
pub const R1_IDLE: u8 = 0x01;

/// R1 bit 7 is always clear in a real response; while it is set the card is
/// still driving the idle line.
pub const R1_PENDING_MASK: u8 = 0x80;

/// Token that precedes the 512 data bytes of a single-block read or write.
pub const START_BLOCK_TOKEN: u8 = 0xFE;

/// The low five bits of a data-response token carry the status.
pub const DATA_RESPONSE_MASK: u8 = 0x1F;

/// Data response: data accepted.
pub const DATA_ACCEPTED: u8 = 0x05;

/// Data response: data rejected due to a CRC error.
pub const DATA_CRC_ERROR: u8 = 0x0B;

/// Data response: data rejected due to a write error.
pub const DATA_WRITE_ERROR: u8 = 0x0D;

/// Byte the card drives while it is busy programming a written block.
pub const BUSY: u8 = 0x00;

/// Number of CRC bytes that trail a data block.
pub const BLOCK_CRC_LEN: usize = 2;

/// Number of bytes that trail an R1 in an R7 (`CMD8`) response.
pub const R7_TRAILER_LEN: usize = 4;

/// Argument for `CMD8`: 2.7 to 3.6 V supply, check pattern `0xAA`.
pub const IF_COND_ARG: u32 = 0x0000_01AA;

/// Argument for `ACMD41`: host supports high-capacity cards (HCS bit).
pub const HCS_ARG: u32 = 0x4000_0000;

/// Commands used by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// `CMD0` GO_IDLE_STATE: software reset into SPI mode.
    GoIdleState,
    /// `CMD8` SEND_IF_COND: voltage check; also marks the host as v2-aware.
    SendIfCond,
    /// `CMD16` SET_BLOCKLEN: force 512-byte blocks.
    SetBlockLen,
    /// `CMD17` READ_SINGLE_BLOCK.
    ReadSingleBlock,
    /// `CMD24` WRITE_BLOCK.
    WriteBlock,
    /// `CMD55` APP_CMD: the next command is application-specific.
    AppCmd,
    /// `ACMD41` SD_SEND_OP_COND: start initialisation. Must follow `CMD55`.
    SdSendOpCond,
}

impl Command {
    /// Command index, `0..=63`.
    pub const fn index(self) -> u8 {
        match self {
            Self::GoIdleState => 0,
            Self::SendIfCond => 8,
            Self::SetBlockLen => 16,
            Self::ReadSingleBlock => 17,
            Self::WriteBlock => 24,
            Self::AppCmd => 55,
            Self::SdSendOpCond => 41,
        }
    }

    /// CRC byte to send. Only the commands issued before CRC checking is
    /// switched off need a correct value.
    pub const fn crc(self) -> u8 {
        match self {
            Self::GoIdleState => 0x95,
            Self::SendIfCond => 0x87,
            _ => 0x00,
        }
    }

    /// Build the six-byte frame for this command.
    pub const fn frame(self, arg: u32) -> [u8; 6] {
        let [a3, a2, a1, a0] = arg.to_be_bytes();
        [0x40 | self.index(), a3, a2, a1, a0, self.crc() | 0x01]
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
    fn go_idle_frame_matches_the_well_known_bytes() {
        assert_eq!(
            Command::GoIdleState.frame(0),
            [0x40, 0x00, 0x00, 0x00, 0x00, 0x95]
        );
    }

    #[test]
    fn if_cond_frame_carries_check_pattern_and_crc() {
        assert_eq!(
            Command::SendIfCond.frame(IF_COND_ARG),
            [0x48, 0x00, 0x00, 0x01, 0xAA, 0x87]
        );
    }

    #[test]
    fn read_frame_puts_sector_address_big_endian() {
        assert_eq!(
            Command::ReadSingleBlock.frame(0x0102_0304),
            [0x51, 0x01, 0x02, 0x03, 0x04, 0x01]
        );
    }

    #[test]
    fn end_bit_is_always_set() {
        for cmd in [
            Command::SetBlockLen,
            Command::WriteBlock,
            Command::AppCmd,
            Command::SdSendOpCond,
        ] {
            let frame = cmd.frame(0);
            assert_eq!(frame[5] & 0x01, 0x01, "{cmd:?}");
        }
    }
}
