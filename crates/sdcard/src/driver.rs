//! Card driver: bring-up and single-sector transfers.
//!
//! The session is encoded in the type system. A transport that has not been
//! through [`SdCard::init`] cannot issue sector commands; a successful init
//! yields an [`SdCard`] (ready), a failed one yields an [`InitFailure`] that
//! hands the transport and sink back so the caller may retry or halt.
//!
//! Every polling loop here waits for the card without a deadline, matching
//! the protocol's "card answers eventually" contract. A card that never
//! answers hangs the caller. The loops are the R1 poll in `send_command`,
//! the token and busy polls in `poll_while`, and the `ACMD41` loop in
//! `activate`.

use platform::{ByteTransport, FatalSink, IDLE_BYTE, SECTOR_SIZE};

use crate::command::{
    Command, BLOCK_CRC_LEN, BUSY, HCS_ARG, IF_COND_ARG, R1_IDLE, R1_PENDING_MASK, R1_READY,
    R7_TRAILER_LEN, START_BLOCK_TOKEN,
};
use crate::error::{InitError, IoError};

/// One sector of data.
pub type Sector = [u8; SECTOR_SIZE];

/// Idle bytes clocked with chip select deasserted at power-up (at least 74
/// clocks are required; 100 bytes gives 800).
pub const POWER_UP_IDLE_BYTES: usize = 100;

/// Idle bytes clocked between the commands of the bring-up sequence.
pub const COMMAND_GAP_BYTES: usize = 10;

/// Maximum number of `CMD0` attempts before giving up.
pub const CMD0_ATTEMPTS: usize = 10;

#[allow(clippy::cast_possible_truncation)]
const SECTOR_LEN_ARG: u32 = SECTOR_SIZE as u32;

fn init_transport<E>(_: E) -> InitError {
    InitError::Transport
}

fn io_transport<E>(_: E) -> IoError {
    IoError::Transport
}

/// An initialised card, ready for sector I/O.
///
/// `F` receives every steady-state I/O failure from [`read_sector`] and
/// [`write_sector`]. On hardware this is [`platform::Halt`]; tests use a
/// recorder.
///
/// [`read_sector`]: SdCard::read_sector
/// [`write_sector`]: SdCard::write_sector
#[derive(Debug)]
pub struct SdCard<T, F> {
    transport: T,
    fatal: F,
}

/// A failed bring-up: the reason plus the parts needed to try again.
pub struct InitFailure<T, F> {
    error: InitError,
    transport: T,
    fatal: F,
}

impl<T, F> InitFailure<T, F> {
    /// The step that failed.
    pub fn error(&self) -> InitError {
        self.error
    }

    /// Recover the transport and sink.
    pub fn into_parts(self) -> (T, F) {
        (self.transport, self.fatal)
    }
}

impl<T, F> core::fmt::Debug for InitFailure<T, F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InitFailure")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<T, F> core::fmt::Display for InitFailure<T, F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.error, f)
    }
}

impl<T, F> SdCard<T, F>
where
    T: ByteTransport,
    F: FatalSink<IoError>,
{
    /// Bring the card from power-up to ready.
    ///
    /// Sequence: power-up idle clocks, `CMD0` (retried), `CMD8`, the
    /// `CMD55`/`ACMD41` loop, `CMD16` with 512-byte blocks. Each command is
    /// bracketed by chip select and followed by [`COMMAND_GAP_BYTES`] idle
    /// bytes.
    ///
    /// # Errors
    ///
    /// The [`InitError`] for the first step that failed, together with the
    /// transport and sink.
    pub fn init(transport: T, fatal: F) -> Result<Self, InitFailure<T, F>> {
        let mut card = Self { transport, fatal };
        match card.bring_up() {
            Ok(()) => {
                #[cfg(feature = "defmt")]
                defmt::info!("card ready");
                Ok(card)
            }
            Err(error) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("card init failed: {}", error);
                Err(InitFailure {
                    error,
                    transport: card.transport,
                    fatal: card.fatal,
                })
            }
        }
    }

    /// Read sector `lba` into `buf`.
    ///
    /// Exactly one `CMD17` is issued and exactly 514 bytes (512 data plus
    /// 2 CRC) are clocked after the start token. Chip select is released on
    /// every path.
    ///
    /// # Errors
    ///
    /// [`IoError::ReadCmdRejected`], [`IoError::ReadStartTokenMissing`] or
    /// [`IoError::Transport`]. `buf` is unspecified on error.
    pub fn try_read_sector(&mut self, lba: u32, buf: &mut Sector) -> Result<(), IoError> {
        self.in_transaction(|card| card.read_selected(lba, buf))
    }

    /// Read sector `lba` into `buf`, routing any failure to the fatal sink.
    pub fn read_sector(&mut self, lba: u32, buf: &mut Sector) {
        if let Err(error) = self.try_read_sector(lba, buf) {
            #[cfg(feature = "defmt")]
            defmt::error!("read of sector {=u32} failed: {}", lba, error);
            self.fatal.fatal(error);
        }
    }

    /// Write `data` to sector `lba` and wait until the card has programmed it.
    ///
    /// # Errors
    ///
    /// [`IoError::WriteCmdRejected`], one of the data-response errors, or
    /// [`IoError::Transport`].
    pub fn try_write_sector(&mut self, lba: u32, data: &Sector) -> Result<(), IoError> {
        self.in_transaction(|card| card.write_selected(lba, data))
    }

    /// Write `data` to sector `lba`, routing any failure to the fatal sink.
    pub fn write_sector(&mut self, lba: u32, data: &Sector) {
        if let Err(error) = self.try_write_sector(lba, data) {
            #[cfg(feature = "defmt")]
            defmt::error!("write of sector {=u32} failed: {}", lba, error);
            self.fatal.fatal(error);
        }
    }
}

impl<T, F> SdCard<T, F> {
    /// Borrow the fatal sink.
    pub fn fatal_sink(&self) -> &F {
        &self.fatal
    }

    /// Borrow the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Give the transport and sink back.
    pub fn release(self) -> (T, F) {
        (self.transport, self.fatal)
    }
}

impl<T: ByteTransport, F> SdCard<T, F> {
    fn bring_up(&mut self) -> Result<(), InitError> {
        self.transport.deselect().map_err(init_transport)?;
        self.transport
            .idle_clocks(POWER_UP_IDLE_BYTES)
            .map_err(init_transport)?;

        self.reset()?;
        self.gap()?;

        let r1 = self.bracketed(Command::SendIfCond, IF_COND_ARG, R7_TRAILER_LEN)?;
        if r1 != R1_IDLE {
            return Err(InitError::Cmd8);
        }
        self.gap()?;

        self.activate()?;

        let r1 = self.bracketed(Command::SetBlockLen, SECTOR_LEN_ARG, 0)?;
        if r1 != R1_READY {
            return Err(InitError::Cmd16);
        }
        self.gap()
    }

    /// `CMD0` until the card reports idle, at most [`CMD0_ATTEMPTS`] times.
    fn reset(&mut self) -> Result<(), InitError> {
        for _attempt in 0..CMD0_ATTEMPTS {
            self.gap()?;
            let r1 = self.bracketed(Command::GoIdleState, 0, 0)?;
            if r1 == R1_IDLE {
                return Ok(());
            }
            #[cfg(feature = "defmt")]
            defmt::debug!("CMD0 attempt {} answered {=u8:#x}", _attempt, r1);
        }
        Err(InitError::Cmd0)
    }

    /// `CMD55` + `ACMD41` until the card leaves the idle state.
    ///
    /// The number of rounds is unbounded. A card that stays idle keeps the
    /// caller here; a capped variant would report it as an init failure.
    fn activate(&mut self) -> Result<(), InitError> {
        let mut _rounds: u32 = 0;
        loop {
            _rounds = _rounds.wrapping_add(1);
            let r1 = self.bracketed(Command::AppCmd, 0, 0)?;
            if r1 != R1_IDLE {
                return Err(InitError::Cmd55);
            }
            self.gap()?;

            let r1 = self.bracketed(Command::SdSendOpCond, HCS_ARG, 0)?;
            self.gap()?;
            if r1 != R1_IDLE {
                #[cfg(feature = "defmt")]
                defmt::debug!("ACMD41 left idle after {=u32} rounds", _rounds);
                return Ok(());
            }
        }
    }

    /// Send one command inside a chip-select bracket, discarding
    /// `trailer_len` bytes after the R1.
    fn bracketed(&mut self, cmd: Command, arg: u32, trailer_len: usize) -> Result<u8, InitError> {
        self.transport.select().map_err(init_transport)?;
        let r1 = self.send_command(cmd, arg).map_err(init_transport)?;
        self.transport
            .idle_clocks(trailer_len)
            .map_err(init_transport)?;
        self.transport.deselect().map_err(init_transport)?;
        Ok(r1)
    }

    fn gap(&mut self) -> Result<(), InitError> {
        self.transport
            .idle_clocks(COMMAND_GAP_BYTES)
            .map_err(init_transport)
    }

    /// Clock out a command frame and poll for its R1.
    fn send_command(&mut self, cmd: Command, arg: u32) -> Result<u8, T::Error> {
        for byte in cmd.frame(arg) {
            self.transport.exchange(byte)?;
        }
        loop {
            let r1 = self.transport.exchange(IDLE_BYTE)?;
            if r1 & R1_PENDING_MASK == 0 {
                return Ok(r1);
            }
        }
    }

    /// Clock idle bytes until the card drives something other than `level`.
    ///
    /// Unbounded, like the R1 poll in `send_command`. Both are the places a
    /// byte limit with a timeout error would go.
    fn poll_while(&mut self, level: u8) -> Result<u8, T::Error> {
        loop {
            let byte = self.transport.exchange(IDLE_BYTE)?;
            if byte != level {
                return Ok(byte);
            }
        }
    }

    /// One dummy byte, then `op` inside a chip-select bracket. Chip select is
    /// released even when `op` fails.
    fn in_transaction(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<(), IoError>,
    ) -> Result<(), IoError> {
        self.transport.exchange(IDLE_BYTE).map_err(io_transport)?;
        self.transport.select().map_err(io_transport)?;
        let result = op(self);
        let released = self.transport.deselect().map_err(io_transport);
        result.and(released)
    }

    fn read_selected(&mut self, lba: u32, buf: &mut Sector) -> Result<(), IoError> {
        let r1 = self
            .send_command(Command::ReadSingleBlock, lba)
            .map_err(io_transport)?;
        if r1 != R1_READY {
            return Err(IoError::ReadCmdRejected);
        }

        let token = self.poll_while(IDLE_BYTE).map_err(io_transport)?;
        if token != START_BLOCK_TOKEN {
            return Err(IoError::ReadStartTokenMissing);
        }

        for slot in buf.iter_mut() {
            *slot = self.transport.exchange(IDLE_BYTE).map_err(io_transport)?;
        }
        self.transport
            .idle_clocks(BLOCK_CRC_LEN)
            .map_err(io_transport)
    }

    fn write_selected(&mut self, lba: u32, data: &Sector) -> Result<(), IoError> {
        let r1 = self
            .send_command(Command::WriteBlock, lba)
            .map_err(io_transport)?;
        if r1 != R1_READY {
            return Err(IoError::WriteCmdRejected);
        }

        self.transport
            .exchange(START_BLOCK_TOKEN)
            .map_err(io_transport)?;
        for &byte in data {
            self.transport.exchange(byte).map_err(io_transport)?;
        }

        let response = self.poll_while(IDLE_BYTE).map_err(io_transport)?;
        if let Some(error) = IoError::from_data_response(response) {
            return Err(error);
        }

        self.poll_while(BUSY).map_err(io_transport)?;
        Ok(())
    }
}
