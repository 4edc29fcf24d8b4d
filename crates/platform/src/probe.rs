//! Refill timing probe
//!
//! A refill must finish within 512 byte periods or the interrupt starts
//! replaying the buffer it just sent. The drain side counts those replays
//! but cannot say how close a card runs to the limit; the way to check that
//! is to watch a pin on a scope. [`RefillProbe`] brackets every
//! refill so board code can wire that pin in.

use embedded_hal::digital::OutputPin;

/// Hook raised around each sector refill.
pub trait RefillProbe {
    /// Called just before the sector read starts.
    fn begin(&mut self);

    /// Called just after the sector read returns.
    fn end(&mut self);
}

/// No probe.
impl RefillProbe for () {
    fn begin(&mut self) {}

    fn end(&mut self) {}
}

/// Drives a pin high for the duration of each refill.
pub struct PinProbe<P> {
    pin: P,
}

impl<P: OutputPin> PinProbe<P> {
    /// Wrap a push-pull output pin.
    pub fn new(pin: P) -> Self {
        Self { pin }
    }

    /// Give the pin back.
    pub fn release(self) -> P {
        self.pin
    }
}

impl<P: OutputPin> RefillProbe for PinProbe<P> {
    fn begin(&mut self) {
        // A debug pin that fails to toggle must not disturb playback.
        let _ = self.pin.set_high();
    }

    fn end(&mut self) {
        let _ = self.pin.set_low();
    }
}
