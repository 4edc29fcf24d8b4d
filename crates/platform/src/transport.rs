//! Synchronous byte transport
//!
//! The storage protocol is spoken one byte at a time: every byte clocked out
//! clocks one byte back in. [`ByteTransport`] captures exactly that, plus the
//! active-low chip-select bracket the protocol wraps around each command.
//!
//! [`SpiTransport`] adapts any embedded-hal 1.0 [`SpiBus`] and [`OutputPin`]
//! pair. A `SpiDevice` would not do here: the protocol needs idle clocks with
//! chip select *deasserted*, which `SpiDevice` transactions cannot express.

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

/// Byte clocked out when the host has nothing to send. Also the line level a
/// card drives while it has nothing to say.
pub const IDLE_BYTE: u8 = 0xFF;

/// Blocking, unbuffered, full-duplex byte exchange with chip-select control.
pub trait ByteTransport {
    /// Error type
    type Error: core::fmt::Debug;

    /// Clock `byte` out and return the byte clocked in at the same time.
    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error>;

    /// Assert chip select (drive it low).
    fn select(&mut self) -> Result<(), Self::Error>;

    /// Deassert chip select (drive it high).
    fn deselect(&mut self) -> Result<(), Self::Error>;

    /// Clock `count` idle bytes, discarding whatever comes back.
    fn idle_clocks(&mut self, count: usize) -> Result<(), Self::Error> {
        for _ in 0..count {
            self.exchange(IDLE_BYTE)?;
        }
        Ok(())
    }
}

/// Error from an [`SpiTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiTransportError<B, P> {
    /// The SPI bus reported an error.
    Bus(B),
    /// The chip-select pin could not be driven.
    ChipSelect(P),
}

/// [`ByteTransport`] over an embedded-hal SPI bus and a chip-select pin.
///
/// The bus must already be configured for mode 0, MSB first. The protocol
/// allows any clock rate the card accepts; initialization is commonly
/// expected below 400 kHz but most cards tolerate the full rate.
pub struct SpiTransport<SPI, CS> {
    spi: SPI,
    cs: CS,
}

impl<SPI, CS> SpiTransport<SPI, CS>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
{
    /// Wrap a configured bus and chip-select pin.
    pub fn new(spi: SPI, cs: CS) -> Self {
        Self { spi, cs }
    }

    /// Give the bus and pin back.
    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }
}

impl<SPI, CS> ByteTransport for SpiTransport<SPI, CS>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
{
    type Error = SpiTransportError<SPI::Error, CS::Error>;

    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error> {
        let mut word = [byte];
        self.spi
            .transfer_in_place(&mut word)
            .map_err(SpiTransportError::Bus)?;
        let [received] = word;
        Ok(received)
    }

    fn select(&mut self) -> Result<(), Self::Error> {
        self.cs.set_low().map_err(SpiTransportError::ChipSelect)
    }

    fn deselect(&mut self) -> Result<(), Self::Error> {
        // Finish any in-flight byte before releasing the card.
        self.spi.flush().map_err(SpiTransportError::Bus)?;
        self.cs.set_high().map_err(SpiTransportError::ChipSelect)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };
    use embedded_hal_mock::eh1::spi::{Mock as SpiMock, Transaction as SpiTransaction};

    #[test]
    fn exchange_returns_clocked_in_byte() {
        let spi = SpiMock::new(&[SpiTransaction::transfer_in_place(vec![0x51], vec![0x00])]);
        let cs = PinMock::new(&[]);
        let mut transport = SpiTransport::new(spi, cs);

        assert_eq!(transport.exchange(0x51).unwrap(), 0x00);

        let (mut spi, mut cs) = transport.release();
        spi.done();
        cs.done();
    }

    #[test]
    fn select_bracket_drives_chip_select_low_then_high() {
        let spi = SpiMock::new(&[
            SpiTransaction::transfer_in_place(vec![IDLE_BYTE], vec![0x01]),
            SpiTransaction::flush(),
        ]);
        let cs = PinMock::new(&[
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::High),
        ]);
        let mut transport = SpiTransport::new(spi, cs);

        transport.select().unwrap();
        assert_eq!(transport.exchange(IDLE_BYTE).unwrap(), 0x01);
        transport.deselect().unwrap();

        let (mut spi, mut cs) = transport.release();
        spi.done();
        cs.done();
    }

    #[test]
    fn idle_clocks_sends_idle_bytes() {
        let expectations: Vec<_> = (0..3)
            .map(|_| SpiTransaction::transfer_in_place(vec![IDLE_BYTE], vec![IDLE_BYTE]))
            .collect();
        let spi = SpiMock::new(&expectations);
        let cs = PinMock::new(&[]);
        let mut transport = SpiTransport::new(spi, cs);

        transport.idle_clocks(3).unwrap();

        let (mut spi, mut cs) = transport.release();
        spi.done();
        cs.done();
    }
}
