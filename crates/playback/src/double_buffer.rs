//! Two sector buffers shared between the byte interrupt and the foreground.
//!
//! One buffer is [`Role::Transmitting`]: the interrupt reads it one byte at a
//! time through [`Drain`]. The other is [`Role::Filling`]: the foreground
//! writes the next sector into it through [`Refill`]. When the transmit
//! cursor reaches the end of its buffer the roles flip and the foreground is
//! asked for another sector. Nothing is copied; the flip is an index change.
//!
//! # Hand-over
//!
//! - `transmitting` holds the index of the transmitting buffer. Only the
//!   drain side writes it.
//! - `refill_pending` is raised by the drain side when it flips roles and
//!   lowered by the foreground once the filling buffer holds a new sector.
//! - The drain side only flips while `refill_pending` is low. A refill that
//!   runs past 512 byte periods makes the drain side replay its current
//!   buffer and count an overrun instead of flipping onto a half-written
//!   one.
//!
//! Only atomic loads and stores are used, so this works on cores without
//! compare-and-swap (Cortex-M0 and smaller).

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use platform::SECTOR_SIZE;
use sdcard::Sector;

/// Which side currently owns a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// Read by the interrupt, one byte per period.
    Transmitting,
    /// Written by the foreground with the next sector.
    Filling,
}

/// Two 512-byte buffers plus the state that assigns their roles.
///
/// Lives in a `static` on the device; [`new`](Self::new) is `const` for
/// that. Prime it through [`buffers_mut`](Self::buffers_mut), then
/// [`split`](Self::split) it into the interrupt's [`Drain`] and the
/// foreground's [`Refill`].
pub struct DoubleBuffer {
    buffers: [UnsafeCell<Sector>; 2],
    transmitting: AtomicU8,
    refill_pending: AtomicBool,
    overruns: AtomicU32,
}

// SAFETY: `Drain` only reads `buffers[transmitting]` and only moves
// `transmitting` while `refill_pending` is low. `Refill` only writes
// `buffers[transmitting ^ 1]` while `refill_pending` is high, and lowers it
// with Release after the write. The drain side observes it with Acquire
// before flipping onto that buffer. Each buffer therefore has at most one
// user at a time, and `split` hands out one handle of each kind per
// exclusive borrow.
unsafe impl Sync for DoubleBuffer {}

impl DoubleBuffer {
    /// Zeroed buffers, buffer 0 transmitting, no refill pending.
    pub const fn new() -> Self {
        Self {
            buffers: [
                UnsafeCell::new([0; SECTOR_SIZE]),
                UnsafeCell::new([0; SECTOR_SIZE]),
            ],
            transmitting: AtomicU8::new(0),
            refill_pending: AtomicBool::new(false),
            overruns: AtomicU32::new(0),
        }
    }

    /// Both buffers in transmit order, `[transmitting, filling]`.
    ///
    /// Used for priming: the first sector goes into the buffer the
    /// interrupt starts on.
    pub fn buffers_mut(&mut self) -> [&mut Sector; 2] {
        let transmitting = *self.transmitting.get_mut() & 1;
        let [a, b] = &mut self.buffers;
        let (a, b) = (a.get_mut(), b.get_mut());
        if transmitting == 0 {
            [a, b]
        } else {
            [b, a]
        }
    }

    /// Return to the starting state: buffer 0 transmits first, no refill
    /// pending, overrun count cleared. Contents are left alone.
    pub fn reset(&mut self) {
        *self.transmitting.get_mut() = 0;
        *self.refill_pending.get_mut() = false;
        *self.overruns.get_mut() = 0;
    }

    /// Role of buffer `index` (0 or 1; other values wrap).
    pub fn role(&self, index: usize) -> Role {
        let transmitting = usize::from(self.transmitting.load(Ordering::Relaxed) & 1);
        if index & 1 == transmitting {
            Role::Transmitting
        } else {
            Role::Filling
        }
    }

    /// Times the drain side had to replay a buffer because the refill was
    /// late.
    pub fn overruns(&self) -> u32 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Split into the interrupt half and the foreground half.
    ///
    /// The transmit cursor starts at the beginning of the transmitting
    /// buffer.
    pub fn split(&mut self) -> (Drain<'_>, Refill<'_>) {
        let shared: &Self = self;
        (Drain { shared, cursor: 0 }, Refill { shared })
    }
}

impl Default for DoubleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for DoubleBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DoubleBuffer")
            .field("transmitting", &self.transmitting.load(Ordering::Relaxed))
            .field("refill_pending", &self.refill_pending.load(Ordering::Relaxed))
            .field("overruns", &self.overruns())
            .finish_non_exhaustive()
    }
}

// ── Interrupt side ──────────────────────────────────────────────────────────

/// The interrupt's half of a [`DoubleBuffer`].
///
/// Owns the transmit cursor. [`drain_step`](Self::drain_step) is O(1),
/// never blocks and never touches storage.
///
/// A refill that misses its 512 byte periods is not reported as an error.
/// The drain side replays the transmitting buffer from the start and bumps
/// the overrun count, so the glitch is audible but no buffer is shared.
#[derive(Debug)]
pub struct Drain<'a> {
    shared: &'a DoubleBuffer,
    cursor: usize,
}

impl Drain<'_> {
    /// Next byte for the serial output. Call once per byte period.
    ///
    /// After the 512th byte of a buffer the roles flip and a refill is
    /// requested, unless the previous refill has not finished, in which case
    /// the same buffer is sent again.
    #[allow(clippy::indexing_slicing)] // Safety: index masked to 0..2; cursor < SECTOR_SIZE between calls
    #[allow(clippy::arithmetic_side_effects)] // Safety: cursor < SECTOR_SIZE before the increment
    pub fn drain_step(&mut self) -> u8 {
        let transmitting = self.shared.transmitting.load(Ordering::Relaxed) & 1;
        let cell = &self.shared.buffers[usize::from(transmitting)];
        // SAFETY: the foreground never writes the transmitting buffer.
        let byte = unsafe { (*cell.get())[self.cursor] };
        self.cursor += 1;
        if self.cursor == SECTOR_SIZE {
            self.cursor = 0;
            self.exhausted(transmitting);
        }
        byte
    }

    fn exhausted(&mut self, transmitting: u8) {
        if self.shared.refill_pending.load(Ordering::Acquire) {
            // Single writer: a plain load/store pair is enough.
            let overruns = self.shared.overruns.load(Ordering::Relaxed);
            self.shared
                .overruns
                .store(overruns.saturating_add(1), Ordering::Relaxed);
            return;
        }
        self.shared
            .transmitting
            .store(transmitting ^ 1, Ordering::Relaxed);
        self.shared.refill_pending.store(true, Ordering::Release);
    }

    /// Position of the next byte within the transmitting buffer.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Role of buffer `index`.
    pub fn role(&self, index: usize) -> Role {
        self.shared.role(index)
    }

    /// See [`DoubleBuffer::overruns`].
    pub fn overruns(&self) -> u32 {
        self.shared.overruns()
    }
}

// ── Foreground side ─────────────────────────────────────────────────────────

/// The foreground's half of a [`DoubleBuffer`].
#[derive(Debug)]
pub struct Refill<'a> {
    shared: &'a DoubleBuffer,
}

impl Refill<'_> {
    /// Whether the drain side has flipped roles and wants a new sector.
    pub fn is_pending(&self) -> bool {
        self.shared.refill_pending.load(Ordering::Acquire)
    }

    /// If a refill is pending, hand the filling buffer to `fill`, then give
    /// it back to the drain side.
    ///
    /// Returns `None` without calling `fill` when nothing is pending. The
    /// refill signal is lowered only after `fill` returns, which is what
    /// keeps the drain side off the buffer while it is being written.
    #[allow(clippy::indexing_slicing)] // Safety: filling_index() is 0 or 1
    pub fn refill_into_current<R>(&mut self, fill: impl FnOnce(&mut Sector) -> R) -> Option<R> {
        if !self.is_pending() {
            return None;
        }
        let cell = &self.shared.buffers[self.filling_index()];
        // SAFETY: while the refill is pending the drain side neither reads
        // nor flips onto the filling buffer, and `&mut self` makes this the
        // only writer.
        let result = fill(unsafe { &mut *cell.get() });
        self.shared.refill_pending.store(false, Ordering::Release);
        Some(result)
    }

    /// Index of the buffer the next refill writes.
    pub fn filling_index(&self) -> usize {
        usize::from((self.shared.transmitting.load(Ordering::Relaxed) & 1) ^ 1)
    }

    /// Role of buffer `index`.
    pub fn role(&self, index: usize) -> Role {
        self.shared.role(index)
    }

    /// See [`DoubleBuffer::overruns`].
    pub fn overruns(&self) -> u32 {
        self.shared.overruns()
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

    fn primed(first: u8, second: u8) -> DoubleBuffer {
        let mut buffer = DoubleBuffer::new();
        let [a, b] = buffer.buffers_mut();
        a.fill(first);
        b.fill(second);
        buffer
    }

    fn drain_sector(drain: &mut Drain<'_>) -> Vec<u8> {
        (0..SECTOR_SIZE).map(|_| drain.drain_step()).collect()
    }

    #[test]
    fn new_buffer_transmits_buffer_zero() {
        let buffer = DoubleBuffer::new();
        assert_eq!(buffer.role(0), Role::Transmitting);
        assert_eq!(buffer.role(1), Role::Filling);
        assert_eq!(buffer.overruns(), 0);
    }

    #[test]
    fn drains_the_first_buffer_then_flips_and_requests_a_refill() {
        let mut buffer = primed(0x11, 0x22);
        let (mut drain, refill) = buffer.split();

        for i in 0..SECTOR_SIZE - 1 {
            assert_eq!(drain.drain_step(), 0x11);
            assert_eq!(drain.cursor(), i + 1);
            assert!(!refill.is_pending());
        }
        assert_eq!(drain.drain_step(), 0x11);
        assert_eq!(drain.cursor(), 0);
        assert!(refill.is_pending());
        assert_eq!(drain.role(1), Role::Transmitting);
        assert_eq!(refill.filling_index(), 0);

        assert_eq!(drain.drain_step(), 0x22);
    }

    #[test]
    fn refill_writes_only_the_filling_buffer() {
        let mut buffer = primed(0x11, 0x22);
        let (mut drain, mut refill) = buffer.split();
        drain_sector(&mut drain);

        let filled = refill.refill_into_current(|buf| {
            buf.fill(0x33);
            buf.len()
        });
        assert_eq!(filled, Some(SECTOR_SIZE));
        assert!(!refill.is_pending());

        // Buffer 1 was transmitting throughout and is untouched.
        assert!(drain_sector(&mut drain).iter().all(|&b| b == 0x22));
        assert!(drain_sector(&mut drain).iter().all(|&b| b == 0x33));
    }

    #[test]
    fn refill_without_request_does_nothing() {
        let mut buffer = primed(0x11, 0x22);
        let (_drain, mut refill) = buffer.split();
        let mut called = false;
        assert_eq!(refill.refill_into_current(|_| called = true), None);
        assert!(!called);
    }

    #[test]
    fn roles_flip_on_every_swap_and_stay_disjoint() {
        let mut buffer = primed(0, 1);
        let (mut drain, mut refill) = buffer.split();
        let mut transmitting = 0usize;

        for round in 0..6u8 {
            assert_eq!(drain.role(transmitting), Role::Transmitting);
            assert_eq!(drain.role(transmitting ^ 1), Role::Filling);
            assert_eq!(refill.filling_index(), transmitting ^ 1);

            drain_sector(&mut drain);
            transmitting ^= 1;
            assert_eq!(drain.role(transmitting), Role::Transmitting, "round {round}");
            refill.refill_into_current(|buf| buf.fill(round)).unwrap();
        }
        assert_eq!(drain.overruns(), 0);
    }

    #[test]
    fn late_refill_replays_the_current_buffer() {
        let mut buffer = primed(0x11, 0x22);
        let (mut drain, mut refill) = buffer.split();
        drain_sector(&mut drain);
        assert!(refill.is_pending());

        // The foreground misses the whole of buffer 1.
        assert!(drain_sector(&mut drain).iter().all(|&b| b == 0x22));
        assert_eq!(drain.overruns(), 1);
        assert_eq!(drain.role(1), Role::Transmitting);

        // Still no flip: buffer 0 is owed to the foreground.
        assert!(drain_sector(&mut drain).iter().all(|&b| b == 0x22));
        assert_eq!(drain.overruns(), 2);

        refill.refill_into_current(|buf| buf.fill(0x44)).unwrap();
        assert!(drain_sector(&mut drain).iter().all(|&b| b == 0x22));
        assert_eq!(drain.role(0), Role::Transmitting);

        // Back on time: the next boundary flips without a replay.
        refill.refill_into_current(|buf| buf.fill(0x55)).unwrap();
        assert!(drain_sector(&mut drain).iter().all(|&b| b == 0x44));
        assert_eq!(drain.role(1), Role::Transmitting);
        assert_eq!(refill.overruns(), 2);
    }

    #[test]
    fn buffers_mut_follows_transmit_order() {
        let mut buffer = primed(0x11, 0x22);
        {
            let (mut drain, mut refill) = buffer.split();
            drain_sector(&mut drain);
            refill.refill_into_current(|_| ()).unwrap();
        }
        let [first, second] = buffer.buffers_mut();
        assert_eq!(first[0], 0x22);
        assert_eq!(second[0], 0x11);

        buffer.reset();
        assert_eq!(buffer.role(0), Role::Transmitting);
        assert_eq!(buffer.buffers_mut()[0][0], 0x11);
    }
}
