//! Fatal error sink
//!
//! Steady-state storage failures during playback have no degraded mode: a
//! stream that glitched cannot be resumed meaningfully. They are handed to a
//! single [`FatalSink`] chosen at startup instead of being returned to the
//! scheduler.
//!
//! On hardware the sink is [`Halt`], which never returns. Host tests inject
//! a sink that records the error and returns, so the caller sees the
//! operation abandoned instead of the process stopping.

/// Receiver of unrecoverable errors of type `E`.
pub trait FatalSink<E> {
    /// Handle an unrecoverable error.
    ///
    /// Hardware implementations do not return. If an implementation does
    /// return, the failing operation is abandoned and its output must be
    /// treated as garbage.
    fn fatal(&mut self, error: E);
}

impl<E, F> FatalSink<E> for F
where
    F: FnMut(E),
{
    fn fatal(&mut self, error: E) {
        self(error);
    }
}

/// Stop the device: spin forever.
///
/// Interrupts are left as they are. If the byte interrupt is still running
/// it keeps replaying whatever the two buffers hold, which is the same
/// audible result as a stalled refill.
#[derive(Debug, Default, Clone, Copy)]
pub struct Halt;

impl<E> FatalSink<E> for Halt {
    fn fatal(&mut self, _error: E) {
        loop {
            core::hint::spin_loop();
        }
    }
}
