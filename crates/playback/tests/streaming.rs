//! End-to-end streaming: encoded PDM staged on a simulated card and played
//! back through the scheduler, plus a two-thread run of the double buffer.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation
)]

use std::sync::atomic::{AtomicU8, Ordering};

use pdm::{encode_to_vec, Oversampling, OutputPlan, SampleRate};
use platform::mocks::{CountingProbe, MockInterrupt, RecordingSink};
use platform::{PeriodicInterrupt, SECTOR_SIZE};
use playback::{
    BlockFile, DoubleBuffer, Drain, FileSource, Flow, Player, PlayerState, RawSectorSource,
    StopReason, StreamSource,
};
use sdcard::sim::SimCard;
use sdcard::{Command, IoError, SdCard, Sector};

fn tone(samples: usize) -> Vec<i16> {
    (0..samples)
        .map(|i| {
            let phase = i as f64 * 2.0 * core::f64::consts::PI * 440.0 / 8_000.0;
            (phase.sin() * 12_000.0) as i16
        })
        .collect()
}

type SimDriver = SdCard<SimCard, RecordingSink<IoError>>;

/// Encode, keep the whole sectors and write them to a fresh card the way a
/// host-side staging helper would.
fn staged_card(samples: &[i16]) -> (SimDriver, Vec<u8>, OutputPlan) {
    let osr = Oversampling::new(2).unwrap();
    let mut stream = encode_to_vec(samples.iter().copied(), SampleRate::Hz8000, osr).unwrap();
    let plan = OutputPlan::with_reference_clock(
        samples.len() as u64 * 2,
        samples.len() as u64,
        SampleRate::Hz8000,
        osr,
    );
    stream.resize(plan.sectors as usize * SECTOR_SIZE, 0);

    let mut card: SimDriver =
        SdCard::init(SimCard::new(plan.sectors as usize), RecordingSink::new()).unwrap();
    for (lba, chunk) in stream.chunks(SECTOR_SIZE).enumerate() {
        let sector: &Sector = chunk.try_into().unwrap();
        card.write_sector(lba as u32, sector);
    }
    assert!(card.fatal_sink().is_clean());
    (card, stream, plan)
}

/// The interrupt fires once per byte and the foreground polls in between.
fn play<S: StreamSource>(
    player: &mut Player<'_, S, MockInterrupt, CountingProbe>,
    drain: &mut Drain<'_>,
) -> Vec<u8> {
    player.start();
    let mut out = Vec::new();
    while player.interrupt().is_enabled() {
        out.push(drain.drain_step());
        player.poll();
    }
    out
}

#[test]
fn staged_stream_plays_back_from_the_card() {
    let (card, stream, plan) = staged_card(&tone(6_000));
    assert_eq!(card.transport().image(), &stream[..]);

    let config = plan.stream_config().unwrap();
    let sector_max = config.sector_max();
    // 3000 encoded bytes: five whole sectors.
    assert_eq!(sector_max, 5);

    let source = RawSectorSource::new(card, &config);
    let mut buffer = DoubleBuffer::new();
    let (mut player, mut drain) =
        Player::prime(&mut buffer, source, MockInterrupt::new(), CountingProbe::new()).unwrap();
    let out = play(&mut player, &mut drain);

    // Everything but the last two sectors read goes out, in order.
    let sent = (sector_max as usize - 2) * SECTOR_SIZE;
    assert_eq!(out, &stream[..sent]);
    assert_eq!(player.state(), PlayerState::Stopped);
    assert_eq!(player.probe().completed(), sector_max as usize - 2);

    let (source, interrupt, _) = player.release();
    assert_eq!(interrupt.disable_count(), 1);
    assert_eq!(source.next_sector(), sector_max);

    let card = source.release();
    assert!(card.fatal_sink().is_clean());
    let sim = card.transport();
    assert_eq!(sim.command_count(Command::ReadSingleBlock), sector_max as usize);
    assert!(sim.read_payloads().iter().all(|&n| n == SECTOR_SIZE + 2));
}

#[test]
fn player_report_counts_every_sector_read() {
    let (card, _, plan) = staged_card(&tone(4_000));
    let config = plan.stream_config().unwrap();

    let mut buffer = DoubleBuffer::new();
    let source = RawSectorSource::new(card, &config);
    let (mut player, mut drain) =
        Player::prime(&mut buffer, source, MockInterrupt::new(), CountingProbe::new()).unwrap();
    play(&mut player, &mut drain);

    let report = player.into_report().ok().unwrap();
    assert_eq!(report.sectors_read, config.sector_max());
    assert_eq!(report.overruns, 0);
    assert_eq!(report.stop, StopReason::EndOfStream);
}

// ── File-system path ────────────────────────────────────────────────────────

struct SliceFile<'a> {
    data: &'a [u8],
}

#[derive(Debug, PartialEq)]
struct EndOfFile;

impl BlockFile for SliceFile<'_> {
    type Error = EndOfFile;

    fn read_block(&mut self, buf: &mut Sector) -> Result<(), EndOfFile> {
        if self.data.len() < SECTOR_SIZE {
            return Err(EndOfFile);
        }
        let (block, rest) = self.data.split_at(SECTOR_SIZE);
        buf.copy_from_slice(block);
        self.data = rest;
        Ok(())
    }
}

#[test]
fn file_source_plays_until_the_file_runs_out() {
    let data: Vec<u8> = (0..5 * SECTOR_SIZE + 300).map(|i| (i / SECTOR_SIZE) as u8).collect();
    let source = FileSource::new(SliceFile { data: &data });

    let mut buffer = DoubleBuffer::new();
    let (mut player, mut drain) =
        Player::prime(&mut buffer, source, MockInterrupt::new(), CountingProbe::new()).unwrap();
    let out = play(&mut player, &mut drain);

    // Blocks 0..=4 read; the short sixth read ends playback. Block 4 was
    // read last, so blocks 0..=3 went out.
    assert_eq!(out, &data[..4 * SECTOR_SIZE]);
    assert_eq!(player.source().blocks_read(), 5);

    let report = player.into_report().ok().unwrap();
    assert_eq!(report.stop, StopReason::SourceFailed(EndOfFile));
    assert_eq!(report.sectors_read, 5);
}

#[test]
fn file_source_priming_failure_is_reported() {
    let data = vec![0u8; SECTOR_SIZE + 1];
    let mut buffer = DoubleBuffer::new();
    let result = Player::prime(
        &mut buffer,
        FileSource::new(SliceFile { data: &data }),
        MockInterrupt::new(),
        (),
    );
    assert_eq!(result.err(), Some(EndOfFile));
}

// ── Two contexts on real threads ────────────────────────────────────────────

const OFF: u8 = 0;
const ON: u8 = 1;
const STOPPED: u8 = 2;

/// Interrupt whose enable state another thread can watch.
struct SharedInterrupt<'a>(&'a AtomicU8);

impl PeriodicInterrupt for SharedInterrupt<'_> {
    fn enable(&mut self) {
        self.0.store(ON, Ordering::Release);
    }

    fn disable(&mut self) {
        self.0.store(STOPPED, Ordering::Release);
    }
}

/// Sector `n` is `n` repeated; `count` sectors.
struct Numbered {
    next: u8,
    count: u8,
}

impl StreamSource for Numbered {
    type Error = core::convert::Infallible;

    fn read_next(&mut self, buf: &mut Sector) -> Result<Flow, Self::Error> {
        buf.fill(self.next);
        self.next += 1;
        Ok(if self.next >= self.count {
            Flow::Last
        } else {
            Flow::Continue
        })
    }
}

#[test]
fn concurrent_drain_never_sees_a_torn_sector() {
    let irq = AtomicU8::new(OFF);
    let mut buffer = DoubleBuffer::new();
    let source = Numbered { next: 0, count: 64 };
    let (player, mut drain) =
        Player::prime(&mut buffer, source, SharedInterrupt(&irq), ()).unwrap();

    let (out, report) = std::thread::scope(|s| {
        let isr = s.spawn(|| {
            let mut out = Vec::new();
            loop {
                match irq.load(Ordering::Acquire) {
                    OFF => std::hint::spin_loop(),
                    ON => {
                        out.push(drain.drain_step());
                        if drain.cursor() == 0 {
                            std::thread::yield_now();
                        }
                    }
                    _ => break out,
                }
            }
        });
        let report = player.run();
        (isr.join().unwrap(), report)
    });

    assert_eq!(report.sectors_read, 64);
    assert_eq!(report.stop, StopReason::EndOfStream);

    // Each 512-byte block is one whole sector. Blocks advance by one
    // sector at a time, or repeat when the foreground was late.
    let mut previous = None;
    let mut replays = 0u32;
    for block in out.chunks(SECTOR_SIZE) {
        let id = block[0];
        assert!(block.iter().all(|&b| b == id), "torn block {id}");
        if let Some(prev) = previous {
            assert!(id == prev || id == prev + 1, "{prev} -> {id}");
            if id == prev && block.len() == SECTOR_SIZE {
                replays += 1;
            }
        } else {
            assert_eq!(id, 0);
        }
        previous = Some(id);
    }
    assert!(previous.unwrap() <= 62);
    assert!(replays <= report.overruns);
}
