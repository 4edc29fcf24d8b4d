//! Periodic byte-emission interrupt
//!
//! The serial output peripheral raises an interrupt every time it can accept
//! another byte. At the configured baud divisor that is a fixed rate equal
//! to the PDM bit rate divided by eight.
//!
//! The handler itself is registered by board code (vector table entry,
//! `#[interrupt]` attribute, RTIC task, whatever the target uses). Its
//! contract:
//!
//! - it runs at a fixed, hardware-timed rate and never re-enters itself;
//! - it completes in bounded time and never blocks;
//! - it never touches the storage driver;
//! - it only calls `playback::Drain::drain_step` and writes the returned
//!   byte to the peripheral's data register.
//!
//! This trait only covers switching that source on and off.

/// Control over the fixed-rate interrupt that drains the transmit buffer.
pub trait PeriodicInterrupt {
    /// Start firing. Called once, after both buffers are primed.
    fn enable(&mut self);

    /// Stop firing. Called once, when the sector maximum is reached or the
    /// stream source reports its end.
    fn disable(&mut self);
}
