//! Streaming scheduler.
//!
//! [`Player`] is the foreground half of playback. It primes both buffers,
//! switches the byte interrupt on and then refills whichever buffer the
//! interrupt has just finished with, one sector per request, until the
//! source reports its last sector or fails. At that point it switches the
//! interrupt off and stops for good.
//!
//! ```text
//!   prime(0), prime(1) ─► start ─► ┌─ poll: refill pending? ─┐
//!                                  │  no  → return            │
//!                                  │  yes → read next sector  │
//!                                  └─ Last / error → stop ────┘
//! ```
//!
//! The interrupt is disabled when the last sector has been read, not when
//! it has been sent, and before that buffer is handed back. That sector is
//! never transmitted and the one before it is cut short.

use platform::{PeriodicInterrupt, RefillProbe};

use crate::double_buffer::{DoubleBuffer, Drain, Refill};
use crate::source::{Flow, StreamSource};

/// Where a [`Player`] is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlayerState {
    /// Both buffers hold data; the interrupt is still off.
    Primed,
    /// The interrupt is on and the foreground is refilling.
    Playing,
    /// The interrupt is off for good.
    Stopped,
}

/// Why playback stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason<E> {
    /// The source delivered its last sector.
    EndOfStream,
    /// The source failed to deliver a sector.
    SourceFailed(E),
}

impl<E: core::fmt::Display> core::fmt::Display for StopReason<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::EndOfStream => write!(f, "end of stream"),
            Self::SourceFailed(e) => write!(f, "source failed: {e}"),
        }
    }
}

/// Summary of a finished playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackReport<E> {
    /// Sectors read into the buffers, priming included.
    pub sectors_read: u32,
    /// Buffers replayed because a refill ran late.
    pub overruns: u32,
    /// Why playback stopped.
    pub stop: StopReason<E>,
}

/// Foreground scheduler over a primed [`DoubleBuffer`].
pub struct Player<'a, S: StreamSource, I, P = ()> {
    refill: Refill<'a>,
    source: S,
    interrupt: I,
    probe: P,
    state: PlayerState,
    sectors_read: u32,
    stop: Option<StopReason<S::Error>>,
}

impl<'a, S, I, P> Player<'a, S, I, P>
where
    S: StreamSource,
    I: PeriodicInterrupt,
    P: RefillProbe,
{
    /// Fill both buffers from `source` and split `buffer`.
    ///
    /// `interrupt` must be off. The returned [`Drain`] belongs to the
    /// interrupt handler; the player keeps the refill half.
    ///
    /// # Errors
    ///
    /// Returns the source's error if either priming read fails. Nothing has
    /// been enabled at that point.
    pub fn prime(
        buffer: &'a mut DoubleBuffer,
        mut source: S,
        interrupt: I,
        probe: P,
    ) -> Result<(Self, Drain<'a>), S::Error> {
        buffer.reset();
        let mut sectors_read = 0u32;
        let mut stop = None;
        for slot in buffer.buffers_mut() {
            let flow = source.read_next(slot)?;
            sectors_read = sectors_read.saturating_add(1);
            if flow == Flow::Last {
                stop = Some(StopReason::EndOfStream);
                break;
            }
        }

        #[cfg(feature = "defmt")]
        defmt::info!("primed {} sectors", sectors_read);

        let state = if stop.is_some() {
            PlayerState::Stopped
        } else {
            PlayerState::Primed
        };
        let (drain, refill) = buffer.split();
        let player = Self {
            refill,
            source,
            interrupt,
            probe,
            state,
            sectors_read,
            stop,
        };
        Ok((player, drain))
    }

    /// Switch the byte interrupt on. Does nothing unless [`Primed`].
    ///
    /// [`Primed`]: PlayerState::Primed
    pub fn start(&mut self) {
        if self.state == PlayerState::Primed {
            self.interrupt.enable();
            self.state = PlayerState::Playing;
        }
    }

    /// One pass of the foreground loop: refill if the interrupt asked for it.
    ///
    /// Returns `false` once playback has stopped.
    pub fn poll(&mut self) -> bool {
        if self.state != PlayerState::Playing {
            return self.state != PlayerState::Stopped;
        }

        let Self {
            refill,
            source,
            interrupt,
            probe,
            ..
        } = self;
        let outcome = refill.refill_into_current(|buf| {
            probe.begin();
            let result = source.read_next(buf);
            probe.end();
            if !matches!(result, Ok(Flow::Continue)) {
                // Off before the buffer is handed back, so it is never sent.
                interrupt.disable();
            }
            result
        });

        match outcome {
            None => true,
            Some(Ok(Flow::Continue)) => {
                self.sectors_read = self.sectors_read.saturating_add(1);
                true
            }
            Some(Ok(Flow::Last)) => {
                self.sectors_read = self.sectors_read.saturating_add(1);
                self.finish(StopReason::EndOfStream);
                false
            }
            Some(Err(e)) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("sector {} could not be read", self.sectors_read);
                self.finish(StopReason::SourceFailed(e));
                false
            }
        }
    }

    fn finish(&mut self, reason: StopReason<S::Error>) {
        self.state = PlayerState::Stopped;
        self.stop = Some(reason);

        #[cfg(feature = "defmt")]
        defmt::info!(
            "playback finished: {} sectors read, {} overruns",
            self.sectors_read,
            self.refill.overruns()
        );
    }

    /// Start, refill until stopped, and report.
    ///
    /// Blocks the foreground for the whole session.
    pub fn run(mut self) -> PlaybackReport<S::Error> {
        self.start();
        loop {
            if let Some(stop) = self.stop.take() {
                return self.report(stop);
            }
            self.poll();
            core::hint::spin_loop();
        }
    }

    /// The session report, or the player back if it has not stopped yet.
    pub fn into_report(mut self) -> Result<PlaybackReport<S::Error>, Self> {
        match self.stop.take() {
            Some(stop) => Ok(self.report(stop)),
            None => Err(self),
        }
    }

    fn report(&self, stop: StopReason<S::Error>) -> PlaybackReport<S::Error> {
        PlaybackReport {
            sectors_read: self.sectors_read,
            overruns: self.refill.overruns(),
            stop,
        }
    }

    /// Current state.
    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// Sectors read so far, priming included.
    pub fn sectors_read(&self) -> u32 {
        self.sectors_read
    }

    /// The interrupt source.
    pub fn interrupt(&self) -> &I {
        &self.interrupt
    }

    /// The stream source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The refill probe.
    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Take the parts back.
    pub fn release(self) -> (S, I, P) {
        (self.source, self.interrupt, self.probe)
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
    use platform::mocks::{CountingProbe, MockInterrupt};
    use platform::SECTOR_SIZE;
    use sdcard::Sector;

    /// Sector `n` is filled with byte `n`; `count` sectors in total.
    struct Numbered {
        next: u8,
        count: u8,
        fail_at: Option<u8>,
    }

    impl Numbered {
        fn new(count: u8) -> Self {
            Self {
                next: 0,
                count,
                fail_at: None,
            }
        }

        fn failing_at(mut self, sector: u8) -> Self {
            self.fail_at = Some(sector);
            self
        }
    }

    impl StreamSource for Numbered {
        type Error = u8;

        fn read_next(&mut self, buf: &mut Sector) -> Result<Flow, u8> {
            if self.fail_at == Some(self.next) {
                return Err(self.next);
            }
            buf.fill(self.next);
            self.next += 1;
            Ok(if self.next >= self.count {
                Flow::Last
            } else {
                Flow::Continue
            })
        }
    }

    type TestPlayer<'a> = Player<'a, Numbered, MockInterrupt, CountingProbe>;

    fn prime(buffer: &mut DoubleBuffer, source: Numbered) -> (TestPlayer<'_>, Drain<'_>) {
        Player::prime(buffer, source, MockInterrupt::new(), CountingProbe::new()).unwrap()
    }

    /// Interrupt fires once per byte; the foreground polls after every byte.
    fn play(player: &mut TestPlayer<'_>, drain: &mut Drain<'_>) -> Vec<u8> {
        player.start();
        let mut out = Vec::new();
        while player.interrupt().is_enabled() {
            out.push(drain.drain_step());
            player.poll();
        }
        out
    }

    #[test]
    fn priming_reads_two_sectors_and_leaves_the_interrupt_off() {
        let mut buffer = DoubleBuffer::new();
        let (player, mut drain) = prime(&mut buffer, Numbered::new(5));

        assert_eq!(player.state(), PlayerState::Primed);
        assert_eq!(player.sectors_read(), 2);
        assert_eq!(player.source().next, 2);
        assert_eq!(player.interrupt().enable_count(), 0);
        assert_eq!(player.probe().completed(), 0);
        assert_eq!(drain.drain_step(), 0);
    }

    #[test]
    fn poll_without_a_request_reads_nothing() {
        let mut buffer = DoubleBuffer::new();
        let (mut player, _drain) = prime(&mut buffer, Numbered::new(5));
        player.start();
        assert!(player.poll());
        assert!(player.poll());
        assert_eq!(player.sectors_read(), 2);
        assert_eq!(player.probe().completed(), 0);
    }

    #[test]
    fn plays_in_order_and_stops_after_reading_the_last_sector() {
        let mut buffer = DoubleBuffer::new();
        let (mut player, mut drain) = prime(&mut buffer, Numbered::new(5));
        let out = play(&mut player, &mut drain);

        // Sectors 3 and 4 are read but never sent.
        assert_eq!(out.len(), 3 * SECTOR_SIZE);
        for (n, chunk) in out.chunks(SECTOR_SIZE).enumerate() {
            assert!(chunk.iter().all(|&b| usize::from(b) == n), "sector {n}");
        }

        assert_eq!(player.state(), PlayerState::Stopped);
        assert!(!player.poll());
        assert_eq!(player.interrupt().enable_count(), 1);
        assert_eq!(player.interrupt().disable_count(), 1);
        assert_eq!(player.probe().completed(), 3);
        assert!(!player.probe().unbalanced());

        let report = player.into_report().ok().unwrap();
        assert_eq!(
            report,
            PlaybackReport {
                sectors_read: 5,
                overruns: 0,
                stop: StopReason::EndOfStream,
            }
        );
    }

    #[test]
    fn source_error_ends_playback() {
        let mut buffer = DoubleBuffer::new();
        let (mut player, mut drain) = prime(&mut buffer, Numbered::new(10).failing_at(3));
        let out = play(&mut player, &mut drain);

        assert_eq!(out.len(), 2 * SECTOR_SIZE);
        assert_eq!(player.interrupt().disable_count(), 1);
        let report = player.into_report().ok().unwrap();
        assert_eq!(report.stop, StopReason::SourceFailed(3));
        assert_eq!(report.sectors_read, 3);
    }

    #[test]
    fn priming_failure_is_returned() {
        let mut buffer = DoubleBuffer::new();
        let result = Player::prime(
            &mut buffer,
            Numbered::new(10).failing_at(1),
            MockInterrupt::new(),
            (),
        );
        assert_eq!(result.err(), Some(1));
    }

    #[test]
    fn stream_ending_during_priming_never_starts() {
        let mut buffer = DoubleBuffer::new();
        let (mut player, _drain) = prime(&mut buffer, Numbered::new(1));
        assert_eq!(player.state(), PlayerState::Stopped);
        player.start();
        assert_eq!(player.interrupt().enable_count(), 0);

        let report = player.into_report().ok().unwrap();
        assert_eq!(report.sectors_read, 1);
        assert_eq!(report.stop, StopReason::EndOfStream);
    }

    #[test]
    fn unfinished_player_is_handed_back() {
        let mut buffer = DoubleBuffer::new();
        let (player, _drain) = prime(&mut buffer, Numbered::new(5));
        let player = player.into_report().err().unwrap();
        assert_eq!(player.state(), PlayerState::Primed);
    }

    #[test]
    fn late_refills_show_up_in_the_report() {
        let mut buffer = DoubleBuffer::new();
        let (mut player, mut drain) = prime(&mut buffer, Numbered::new(4));
        player.start();

        // The foreground misses the whole of sector 1.
        let mut out: Vec<u8> = (0..2 * SECTOR_SIZE).map(|_| drain.drain_step()).collect();
        while player.interrupt().is_enabled() {
            player.poll();
            if player.interrupt().is_enabled() {
                out.push(drain.drain_step());
            }
        }

        // Sector 1 went out twice; sector 2 was refilled in time but cut off.
        assert_eq!(out.len(), 3 * SECTOR_SIZE);
        assert!(out[SECTOR_SIZE..].iter().all(|&b| b == 1));
        let report = player.into_report().ok().unwrap();
        assert_eq!(report.overruns, 1);
        assert_eq!(report.sectors_read, 4);
    }

    #[test]
    fn stop_reason_displays() {
        assert_eq!(StopReason::<u8>::EndOfStream.to_string(), "end of stream");
        assert_eq!(
            StopReason::SourceFailed("card removed").to_string(),
            "source failed: card removed"
        );
    }
}
