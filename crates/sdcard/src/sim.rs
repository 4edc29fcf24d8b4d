//! Simulated card
//!
//! [`SimCard`] implements [`ByteTransport`] by playing the card side of the
//! SPI-mode protocol byte for byte: it parses command frames, answers with
//! R1/R7 responses after a configurable latency, streams sector data behind
//! a start token, accepts written blocks and holds the line busy while it
//! "programs" them. A written block only lands in the image once the host
//! has clocked through the whole busy phase; releasing chip select early
//! loses it. Faults can be injected at every step the driver checks.
//!
//! It also records what the host did (commands, power-up clocks, bytes
//! clocked after each read's start token) so tests can assert on the exact
//! bus behaviour.

use std::collections::VecDeque;

use platform::{ByteTransport, IDLE_BYTE, SECTOR_SIZE};

use crate::command::{
    Command, BLOCK_CRC_LEN, BUSY, DATA_ACCEPTED, DATA_RESPONSE_MASK, R1_IDLE, R1_READY,
    START_BLOCK_TOKEN,
};

/// R1 flag: illegal command.
const R1_ILLEGAL_COMMAND: u8 = 0x04;
/// R1 flag: address error.
const R1_ADDRESS_ERROR: u8 = 0x20;
/// R1 flag: parameter error.
const R1_PARAMETER_ERROR: u8 = 0x40;
/// Data-error token: out of range.
const DATA_ERROR_OUT_OF_RANGE: u8 = 0x08;

/// Fault to inject into a [`SimCard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Answer `CMD8` as a v1 card would (illegal command).
    RejectIfCond,
    /// Answer `CMD55` with illegal command.
    RejectAppCmd,
    /// Answer `CMD16` with a parameter error.
    RejectBlockLen,
    /// Answer `CMD17` with illegal command.
    RejectRead,
    /// Send a data-error token instead of the start token on reads.
    ReadDataError,
    /// Answer `CMD24` with illegal command.
    RejectWrite,
}

/// One command frame the card received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRecord {
    /// Command index.
    pub index: u8,
    /// 32-bit argument.
    pub arg: u32,
    /// `true` if this was an application command (preceded by `CMD55`).
    pub app: bool,
}

#[derive(Debug)]
enum Rx {
    Idle,
    Frame { bytes: [u8; 6], len: usize },
    AwaitToken { lba: u32 },
    Data { lba: u32, data: Vec<u8> },
    Crc { lba: u32, data: Vec<u8>, left: usize },
}

/// An accepted block waiting for its busy phase to be clocked out.
#[derive(Debug)]
struct Programming {
    lba: u32,
    data: Vec<u8>,
    clocks_left: usize,
}

/// Byte-accurate model of an SPI-mode storage card.
#[derive(Debug)]
pub struct SimCard {
    image: Vec<u8>,
    selected: bool,
    ever_selected: bool,
    ready: bool,
    app_cmd: bool,
    rx: Rx,
    out: VecDeque<u8>,

    cmd0_failures: usize,
    init_rounds: usize,
    fault: Option<Fault>,
    data_response: u8,
    response_latency: usize,
    token_latency: usize,
    busy_clocks: usize,

    commands: Vec<CommandRecord>,
    powerup_clocks: usize,
    until_token: Option<usize>,
    payload_clocks: Option<usize>,
    read_payloads: Vec<usize>,
    programming: Option<Programming>,
    interrupted_writes: usize,
}

impl SimCard {
    /// A card holding `sector_count` zeroed sectors.
    pub fn new(sector_count: usize) -> Self {
        Self::from_image(&vec![0; sector_count.saturating_mul(SECTOR_SIZE)])
    }

    /// A card whose contents start with `image`, padded with zeros to a
    /// whole number of sectors.
    pub fn from_image(image: &[u8]) -> Self {
        let mut image = image.to_vec();
        let partial = image.len() % SECTOR_SIZE;
        if partial != 0 {
            image.resize(image.len().saturating_add(SECTOR_SIZE.saturating_sub(partial)), 0);
        }
        Self {
            image,
            selected: false,
            ever_selected: false,
            ready: false,
            app_cmd: false,
            rx: Rx::Idle,
            out: VecDeque::new(),
            cmd0_failures: 0,
            init_rounds: 0,
            fault: None,
            data_response: DATA_ACCEPTED,
            response_latency: 1,
            token_latency: 2,
            busy_clocks: 3,
            commands: Vec::new(),
            powerup_clocks: 0,
            until_token: None,
            payload_clocks: None,
            read_payloads: Vec::new(),
            programming: None,
            interrupted_writes: 0,
        }
    }

    /// Answer the first `count` `CMD0`s with illegal command.
    pub fn with_cmd0_failures(mut self, count: usize) -> Self {
        self.cmd0_failures = count;
        self
    }

    /// Answer `ACMD41` with "idle" `rounds` times before going ready.
    pub fn with_init_rounds(mut self, rounds: usize) -> Self {
        self.init_rounds = rounds;
        self
    }

    /// Inject `fault`.
    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    /// Data-response token to send after every written block.
    pub fn with_data_response(mut self, token: u8) -> Self {
        self.data_response = token;
        self
    }

    /// Idle bytes between the end of a command frame and its R1.
    pub fn with_response_latency(mut self, bytes: usize) -> Self {
        self.response_latency = bytes;
        self
    }

    /// Idle bytes between a read's R1 and its start token.
    pub fn with_token_latency(mut self, bytes: usize) -> Self {
        self.token_latency = bytes;
        self
    }

    /// Busy bytes after an accepted write.
    pub fn with_busy_clocks(mut self, bytes: usize) -> Self {
        self.busy_clocks = bytes;
        self
    }

    /// Whole card contents.
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Contents of sector `lba`, if it exists.
    pub fn sector(&self, lba: u32) -> Option<&[u8]> {
        let range = self.sector_range(lba)?;
        self.image.get(range)
    }

    /// Number of sectors.
    pub fn sector_count(&self) -> usize {
        self.image.len() / SECTOR_SIZE
    }

    /// Every command frame received, oldest first.
    pub fn commands(&self) -> &[CommandRecord] {
        &self.commands
    }

    /// How many frames with `cmd`'s index were received.
    pub fn command_count(&self, cmd: Command) -> usize {
        self.commands
            .iter()
            .filter(|record| record.index == cmd.index())
            .count()
    }

    /// Bytes clocked with chip select deasserted before the first select.
    pub fn powerup_clocks(&self) -> usize {
        self.powerup_clocks
    }

    /// For each completed read: bytes clocked after the start token until
    /// chip select was released.
    pub fn read_payloads(&self) -> &[usize] {
        &self.read_payloads
    }

    /// Accepted writes whose busy phase was cut short by releasing chip
    /// select. None of them reached the image.
    pub fn interrupted_writes(&self) -> usize {
        self.interrupted_writes
    }

    /// Whether the card has left the idle state.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Whether chip select is asserted.
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    fn sector_range(&self, lba: u32) -> Option<core::ops::Range<usize>> {
        let start = usize::try_from(lba).ok()?.checked_mul(SECTOR_SIZE)?;
        let end = start.checked_add(SECTOR_SIZE)?;
        (end <= self.image.len()).then_some(start..end)
    }

    fn state_r1(&self) -> u8 {
        if self.ready {
            R1_READY
        } else {
            R1_IDLE
        }
    }

    fn respond(&mut self, bytes: &[u8]) {
        self.out
            .extend(core::iter::repeat(IDLE_BYTE).take(self.response_latency));
        self.out.extend(bytes.iter().copied());
    }

    fn receive(&mut self, byte: u8) {
        self.rx = match core::mem::replace(&mut self.rx, Rx::Idle) {
            Rx::Idle if byte & 0xC0 == 0x40 => Rx::Frame {
                bytes: [byte, 0, 0, 0, 0, 0],
                len: 1,
            },
            Rx::Idle => Rx::Idle,
            Rx::Frame { mut bytes, len } => {
                if let Some(slot) = bytes.get_mut(len) {
                    *slot = byte;
                }
                let len = len.saturating_add(1);
                if len == bytes.len() {
                    self.execute(bytes)
                } else {
                    Rx::Frame { bytes, len }
                }
            }
            Rx::AwaitToken { lba } if byte == START_BLOCK_TOKEN => Rx::Data {
                lba,
                data: Vec::with_capacity(SECTOR_SIZE),
            },
            Rx::AwaitToken { lba } => Rx::AwaitToken { lba },
            Rx::Data { lba, mut data } => {
                data.push(byte);
                if data.len() == SECTOR_SIZE {
                    Rx::Crc {
                        lba,
                        data,
                        left: BLOCK_CRC_LEN,
                    }
                } else {
                    Rx::Data { lba, data }
                }
            }
            Rx::Crc { lba, data, left } => {
                let left = left.saturating_sub(1);
                if left == 0 {
                    self.finish_write(lba, data);
                    Rx::Idle
                } else {
                    Rx::Crc { lba, data, left }
                }
            }
        };
    }

    fn execute(&mut self, frame: [u8; 6]) -> Rx {
        let [first, a3, a2, a1, a0, _crc] = frame;
        let index = first & 0x3F;
        let arg = u32::from_be_bytes([a3, a2, a1, a0]);
        let app = core::mem::take(&mut self.app_cmd);
        self.commands.push(CommandRecord { index, arg, app });

        let fault = self.fault;
        match index {
            0 => {
                self.ready = false;
                if self.cmd0_failures > 0 {
                    self.cmd0_failures = self.cmd0_failures.saturating_sub(1);
                    self.respond(&[R1_ILLEGAL_COMMAND]);
                } else {
                    self.respond(&[R1_IDLE]);
                }
            }
            8 if fault == Some(Fault::RejectIfCond) => {
                self.respond(&[R1_IDLE | R1_ILLEGAL_COMMAND]);
            }
            8 => {
                // R7 echoes the voltage range and check pattern.
                let [_, _, voltage, pattern] = arg.to_be_bytes();
                self.respond(&[R1_IDLE, 0x00, 0x00, voltage & 0x0F, pattern]);
            }
            55 if fault == Some(Fault::RejectAppCmd) => {
                self.respond(&[R1_ILLEGAL_COMMAND]);
            }
            55 => {
                self.app_cmd = true;
                let r1 = self.state_r1();
                self.respond(&[r1]);
            }
            41 if app => {
                if self.init_rounds > 0 {
                    self.init_rounds = self.init_rounds.saturating_sub(1);
                    self.respond(&[R1_IDLE]);
                } else {
                    self.ready = true;
                    self.respond(&[R1_READY]);
                }
            }
            16 if fault == Some(Fault::RejectBlockLen) || arg != 512 => {
                let r1 = self.state_r1() | R1_PARAMETER_ERROR;
                self.respond(&[r1]);
            }
            16 => {
                let r1 = self.state_r1();
                self.respond(&[r1]);
            }
            17 => self.start_read(arg),
            24 => return self.start_write(arg),
            _ => {
                let r1 = self.state_r1() | R1_ILLEGAL_COMMAND;
                self.respond(&[r1]);
            }
        }
        Rx::Idle
    }

    fn start_read(&mut self, lba: u32) {
        if !self.ready || self.fault == Some(Fault::RejectRead) {
            let r1 = self.state_r1() | R1_ILLEGAL_COMMAND;
            self.respond(&[r1]);
            return;
        }
        let Some(range) = self.sector_range(lba) else {
            self.respond(&[R1_ADDRESS_ERROR]);
            return;
        };

        self.respond(&[R1_READY]);
        self.out
            .extend(core::iter::repeat(IDLE_BYTE).take(self.token_latency));
        if self.fault == Some(Fault::ReadDataError) {
            self.out.push_back(DATA_ERROR_OUT_OF_RANGE);
            return;
        }

        // The token is the next byte pushed; count pops until it goes out.
        self.until_token = Some(self.out.len());
        self.out.push_back(START_BLOCK_TOKEN);
        if let Some(data) = self.image.get(range) {
            self.out.extend(data.iter().copied());
        }
        self.out.extend([0x00; BLOCK_CRC_LEN]);
    }

    fn start_write(&mut self, lba: u32) -> Rx {
        if !self.ready || self.fault == Some(Fault::RejectWrite) {
            let r1 = self.state_r1() | R1_ILLEGAL_COMMAND;
            self.respond(&[r1]);
            return Rx::Idle;
        }
        if self.sector_range(lba).is_none() {
            self.respond(&[R1_ADDRESS_ERROR]);
            return Rx::Idle;
        }
        self.respond(&[R1_READY]);
        Rx::AwaitToken { lba }
    }

    fn finish_write(&mut self, lba: u32, data: Vec<u8>) {
        self.out.push_back(self.data_response);
        if self.data_response & DATA_RESPONSE_MASK != DATA_ACCEPTED {
            return;
        }
        self.out
            .extend(core::iter::repeat(BUSY).take(self.busy_clocks));
        // Committed once the response and every busy byte have gone out.
        self.programming = Some(Programming {
            lba,
            data,
            clocks_left: self.out.len(),
        });
    }

    fn clock_programming(&mut self) {
        let Some(programming) = self.programming.as_mut() else {
            return;
        };
        programming.clocks_left = programming.clocks_left.saturating_sub(1);
        if programming.clocks_left > 0 {
            return;
        }
        if let Some(Programming { lba, data, .. }) = self.programming.take() {
            if let Some(target) = self
                .sector_range(lba)
                .and_then(|range| self.image.get_mut(range))
            {
                target.copy_from_slice(&data);
            }
        }
    }
}

impl ByteTransport for SimCard {
    type Error = core::convert::Infallible;

    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error> {
        if !self.selected {
            if !self.ever_selected {
                self.powerup_clocks = self.powerup_clocks.saturating_add(1);
            }
            return Ok(IDLE_BYTE);
        }

        if let Some(clocks) = self.payload_clocks.as_mut() {
            *clocks = clocks.saturating_add(1);
        }
        let reply = self.out.pop_front().unwrap_or(IDLE_BYTE);
        self.clock_programming();
        match self.until_token {
            Some(0) => {
                self.until_token = None;
                self.payload_clocks = Some(0);
            }
            Some(left) => self.until_token = Some(left.saturating_sub(1)),
            None => {}
        }

        self.receive(byte);
        Ok(reply)
    }

    fn select(&mut self) -> Result<(), Self::Error> {
        self.selected = true;
        self.ever_selected = true;
        Ok(())
    }

    fn deselect(&mut self) -> Result<(), Self::Error> {
        self.selected = false;
        self.out.clear();
        self.rx = Rx::Idle;
        self.until_token = None;
        if self.programming.take().is_some() {
            self.interrupted_writes = self.interrupted_writes.saturating_add(1);
        }
        if let Some(clocks) = self.payload_clocks.take() {
            self.read_payloads.push(clocks);
        }
        Ok(())
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

    fn send_frame(card: &mut SimCard, cmd: Command, arg: u32) -> u8 {
        for byte in cmd.frame(arg) {
            card.exchange(byte).unwrap();
        }
        loop {
            let r1 = card.exchange(IDLE_BYTE).unwrap();
            if r1 & 0x80 == 0 {
                return r1;
            }
        }
    }

    #[test]
    fn ignores_bus_while_deselected() {
        let mut card = SimCard::new(1);
        assert_eq!(card.exchange(0x40).unwrap(), IDLE_BYTE);
        assert_eq!(card.powerup_clocks(), 1);
        assert!(card.commands().is_empty());
    }

    #[test]
    fn go_idle_answers_idle() {
        let mut card = SimCard::new(1);
        card.select().unwrap();
        assert_eq!(send_frame(&mut card, Command::GoIdleState, 0), R1_IDLE);
        assert_eq!(card.command_count(Command::GoIdleState), 1);
    }

    #[test]
    fn app_flag_survives_chip_select_release() {
        let mut card = SimCard::new(1);
        card.select().unwrap();
        send_frame(&mut card, Command::AppCmd, 0);
        card.deselect().unwrap();
        card.select().unwrap();
        assert_eq!(send_frame(&mut card, Command::SdSendOpCond, 0), R1_READY);
        assert!(card.is_ready());
        assert!(card.commands().last().unwrap().app);
    }

    #[test]
    fn bare_cmd41_is_illegal() {
        let mut card = SimCard::new(1);
        card.select().unwrap();
        let r1 = send_frame(&mut card, Command::SdSendOpCond, 0);
        assert_ne!(r1 & R1_ILLEGAL_COMMAND, 0);
        assert!(!card.is_ready());
    }

    /// Bring a fresh card to ready and start a write of `fill` to sector 0,
    /// stopping right after the data response.
    fn accepted_write(fill: u8) -> SimCard {
        let mut card = SimCard::new(1).with_busy_clocks(4);
        card.select().unwrap();
        send_frame(&mut card, Command::AppCmd, 0);
        send_frame(&mut card, Command::SdSendOpCond, 0);
        assert_eq!(send_frame(&mut card, Command::WriteBlock, 0), R1_READY);

        card.exchange(START_BLOCK_TOKEN).unwrap();
        for _ in 0..SECTOR_SIZE {
            card.exchange(fill).unwrap();
        }
        for _ in 0..BLOCK_CRC_LEN {
            card.exchange(IDLE_BYTE).unwrap();
        }
        assert_eq!(card.exchange(IDLE_BYTE).unwrap(), DATA_ACCEPTED);
        card
    }

    #[test]
    fn write_lands_after_the_busy_phase() {
        let mut card = accepted_write(0x5A);
        for _ in 0..4 {
            assert!(card.sector(0).unwrap().iter().all(|&b| b == 0));
            assert_eq!(card.exchange(IDLE_BYTE).unwrap(), BUSY);
        }
        assert_eq!(card.exchange(IDLE_BYTE).unwrap(), IDLE_BYTE);
        card.deselect().unwrap();

        assert!(card.sector(0).unwrap().iter().all(|&b| b == 0x5A));
        assert_eq!(card.interrupted_writes(), 0);
    }

    #[test]
    fn releasing_the_card_while_busy_loses_the_write() {
        let mut card = accepted_write(0x5A);
        assert_eq!(card.exchange(IDLE_BYTE).unwrap(), BUSY);
        card.deselect().unwrap();

        assert!(card.sector(0).unwrap().iter().all(|&b| b == 0));
        assert_eq!(card.interrupted_writes(), 1);
    }

    #[test]
    fn image_is_padded_to_whole_sectors() {
        let card = SimCard::from_image(&[1, 2, 3]);
        assert_eq!(card.sector_count(), 1);
        assert_eq!(&card.sector(0).unwrap()[..4], &[1, 2, 3, 0]);
        assert!(card.sector(1).is_none());
    }
}
