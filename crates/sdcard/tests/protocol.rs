//! Driver behaviour against the simulated card and against byte scripts.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use platform::mocks::{BusEvent, RecordingSink, ScriptedTransport};
use platform::{IDLE_BYTE, SECTOR_SIZE};
use sdcard::command::{HCS_ARG, IF_COND_ARG};
use sdcard::sim::{Fault, SimCard};
use sdcard::{Command, InitError, IoError, SdCard, Sector};

type SimDriver = SdCard<SimCard, RecordingSink<IoError>>;

fn ready(card: SimCard) -> SimDriver {
    SdCard::init(card, RecordingSink::new()).expect("card should initialise")
}

fn init_error(card: SimCard) -> (InitError, SimCard) {
    let failure = SdCard::init(card, RecordingSink::<IoError>::new()).unwrap_err();
    let error = failure.error();
    let (card, sink) = failure.into_parts();
    assert!(sink.is_clean(), "init failures must not reach the fatal sink");
    (error, card)
}

fn patterned(sectors: usize) -> Vec<u8> {
    (0..sectors * SECTOR_SIZE).map(|i| (i % 251) as u8).collect()
}

// ── bring-up ──────────────────────────────────────────────────────────────

#[test]
fn test_init_issues_commands_in_protocol_order() {
    let driver = ready(SimCard::new(4).with_init_rounds(3));
    let card = driver.transport();

    let indices: Vec<u8> = card.commands().iter().map(|c| c.index).collect();
    assert_eq!(indices, vec![0, 8, 55, 41, 55, 41, 55, 41, 55, 41, 16]);
    assert!(card.is_ready());
    assert!(!card.is_selected());

    let cmd8 = card.commands()[1];
    assert_eq!(cmd8.arg, IF_COND_ARG);
    let acmd41 = card.commands()[3];
    assert!(acmd41.app);
    assert_eq!(acmd41.arg, HCS_ARG);
    assert_eq!(card.commands().last().unwrap().arg, 512);
}

#[test]
fn test_init_clocks_at_least_74_cycles_before_first_command() {
    let driver = ready(SimCard::new(1));
    assert!(driver.transport().powerup_clocks() * 8 >= 74);
}

#[test]
fn test_cmd0_is_retried_until_idle() {
    let driver = ready(SimCard::new(1).with_cmd0_failures(3));
    assert_eq!(driver.transport().command_count(Command::GoIdleState), 4);
}

#[test]
fn test_cmd0_gives_up_after_ten_attempts() {
    let (error, card) = init_error(SimCard::new(1).with_cmd0_failures(50));
    assert_eq!(error, InitError::Cmd0);
    assert_eq!(card.command_count(Command::GoIdleState), 10);
    assert_eq!(card.commands().len(), 10, "nothing after CMD0 may be sent");
}

#[test]
fn test_cmd0_succeeding_on_last_attempt_is_enough() {
    let driver = ready(SimCard::new(1).with_cmd0_failures(9));
    assert_eq!(driver.transport().command_count(Command::GoIdleState), 10);
}

#[test]
fn test_cmd8_rejection_stops_bring_up() {
    let (error, card) = init_error(SimCard::new(1).with_fault(Fault::RejectIfCond));
    assert_eq!(error, InitError::Cmd8);
    assert_eq!(card.command_count(Command::AppCmd), 0);
    assert!(!card.is_selected());
}

#[test]
fn test_cmd55_rejection_is_reported() {
    let (error, card) = init_error(SimCard::new(1).with_fault(Fault::RejectAppCmd));
    assert_eq!(error, InitError::Cmd55);
    assert_eq!(card.command_count(Command::SdSendOpCond), 0);
}

#[test]
fn test_cmd16_rejection_is_reported() {
    let (error, _) = init_error(SimCard::new(1).with_fault(Fault::RejectBlockLen));
    assert_eq!(error, InitError::Cmd16);
}

#[test]
fn test_failed_init_can_be_retried_with_returned_parts() {
    let failure = SdCard::init(
        SimCard::new(1).with_cmd0_failures(12),
        RecordingSink::<IoError>::new(),
    )
    .unwrap_err();
    let (card, sink) = failure.into_parts();
    // Two failures left on the card; the second bring-up gets through.
    let driver = SdCard::init(card, sink).unwrap();
    assert!(driver.transport().is_ready());
}

// ── sector reads ──────────────────────────────────────────────────────────

#[test]
fn test_read_returns_sector_contents() {
    let image = patterned(4);
    let mut driver = ready(SimCard::from_image(&image).with_token_latency(7));
    let mut buf: Sector = [0; SECTOR_SIZE];

    driver.read_sector(2, &mut buf);

    assert!(driver.fatal_sink().is_clean());
    assert_eq!(&buf[..], &image[2 * SECTOR_SIZE..3 * SECTOR_SIZE]);
}

#[test]
fn test_read_issues_one_command_and_clocks_514_bytes_after_token() {
    let mut driver = ready(SimCard::new(8));
    let before = driver.transport().command_count(Command::ReadSingleBlock);
    let mut buf: Sector = [0; SECTOR_SIZE];

    driver.read_sector(5, &mut buf);

    let card = driver.transport();
    assert_eq!(card.command_count(Command::ReadSingleBlock), before + 1);
    assert_eq!(card.commands().last().unwrap().arg, 5);
    assert_eq!(card.read_payloads(), &[514]);
    assert!(!card.is_selected());
}

#[test]
fn test_rejected_read_goes_to_fatal_sink_and_releases_card() {
    let mut driver = ready(SimCard::new(2).with_fault(Fault::RejectRead));
    let mut buf: Sector = [0; SECTOR_SIZE];

    driver.read_sector(0, &mut buf);

    assert_eq!(driver.fatal_sink().errors(), &[IoError::ReadCmdRejected]);
    assert!(!driver.transport().is_selected());
}

#[test]
fn test_data_error_token_is_a_missing_start_token() {
    let mut driver = ready(SimCard::new(2).with_fault(Fault::ReadDataError));
    let mut buf: Sector = [0; SECTOR_SIZE];

    driver.read_sector(1, &mut buf);

    assert_eq!(driver.fatal_sink().errors(), &[IoError::ReadStartTokenMissing]);
    assert!(driver.transport().read_payloads().is_empty());
}

#[test]
fn test_read_past_end_of_card_is_rejected() {
    let mut driver = ready(SimCard::new(2));
    let mut buf: Sector = [0; SECTOR_SIZE];

    assert_eq!(
        driver.try_read_sector(2, &mut buf),
        Err(IoError::ReadCmdRejected)
    );
    assert!(driver.fatal_sink().is_clean(), "try_* must not report");
}

// ── sector writes ─────────────────────────────────────────────────────────

#[test]
fn test_write_then_read_back() {
    let mut driver = ready(SimCard::new(4).with_busy_clocks(20));
    let data: Sector = core::array::from_fn(|i| (i * 7) as u8);

    driver.write_sector(3, &data);
    let mut back: Sector = [0; SECTOR_SIZE];
    driver.read_sector(3, &mut back);

    assert!(driver.fatal_sink().is_clean());
    assert_eq!(back, data);
    assert_eq!(driver.transport().sector(3).unwrap(), &data[..]);
    assert_eq!(driver.transport().interrupted_writes(), 0);
    assert_eq!(driver.transport().commands().last().unwrap().index, 17);
}

#[test]
fn test_write_data_response_errors() {
    let cases = [
        (0x0B, IoError::CrcError),
        (0x0D, IoError::WriteError),
        (0x04, IoError::InvalidDataResponse),
        (0x07, IoError::UnknownError),
    ];
    for (token, expected) in cases {
        let mut driver = ready(SimCard::new(2).with_data_response(token));
        driver.write_sector(1, &[0xAB; SECTOR_SIZE]);

        assert_eq!(driver.fatal_sink().errors(), &[expected], "token {token:#04x}");
        assert!(!driver.transport().is_selected());
        assert!(driver.transport().sector(1).unwrap().iter().all(|&b| b == 0));
    }
}

#[test]
fn test_rejected_write_command() {
    let mut driver = ready(SimCard::new(2).with_fault(Fault::RejectWrite));
    assert_eq!(
        driver.try_write_sector(0, &[0; SECTOR_SIZE]),
        Err(IoError::WriteCmdRejected)
    );
}

// ── exact bus traffic ─────────────────────────────────────────────────────

/// Card side of one command: silent during the frame, then `r1`.
fn answer(r1: u8) -> Vec<u8> {
    let mut bytes = vec![IDLE_BYTE; 6];
    bytes.push(r1);
    bytes
}

fn gap() -> Vec<u8> {
    vec![IDLE_BYTE; 10]
}

/// Card side of a clean bring-up with one `ACMD41` round.
fn init_script() -> Vec<u8> {
    let mut script = vec![IDLE_BYTE; 100];
    script.extend(gap());
    script.extend(answer(0x01)); // CMD0
    script.extend(gap());
    script.extend(answer(0x01)); // CMD8
    script.extend([0x00, 0x00, 0x01, 0xAA]);
    script.extend(gap());
    script.extend(answer(0x01)); // CMD55
    script.extend(gap());
    script.extend(answer(0x00)); // ACMD41
    script.extend(gap());
    script.extend(answer(0x00)); // CMD16
    script.extend(gap());
    script
}

fn exchanged(events: &[BusEvent]) -> Vec<(u8, u8)> {
    events
        .iter()
        .filter_map(|e| match e {
            BusEvent::Exchange { sent, received } => Some((*sent, *received)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_init_then_read_byte_for_byte() {
    let script = init_script();
    let init_len = script.len();

    let payload: Vec<u8> = (0..SECTOR_SIZE).map(|i| i as u8).collect();
    let mut read_script = vec![IDLE_BYTE]; // dummy byte
    read_script.extend(answer(0x00));
    read_script.extend([IDLE_BYTE, 0xFE]);
    read_script.extend(&payload);
    read_script.extend([0x12, 0x34]);
    let read_len = read_script.len();

    let mut transport = ScriptedTransport::new(script);
    transport.queue(read_script);

    let mut driver = SdCard::init(transport, RecordingSink::<IoError>::new()).unwrap();
    assert_eq!(driver.transport().remaining(), read_len);

    let sent = driver.transport().sent();
    assert_eq!(sent.len(), init_len);
    assert_eq!(&sent[110..116], &Command::GoIdleState.frame(0));
    assert_eq!(
        driver
            .transport()
            .events()
            .iter()
            .filter(|e| **e == BusEvent::Select)
            .count(),
        5
    );
    let event_mark = driver.transport().events().len();

    let mut buf: Sector = [0; SECTOR_SIZE];
    driver.read_sector(0x0102_0304, &mut buf);

    assert!(driver.fatal_sink().is_clean());
    assert_eq!(&buf[..], &payload[..]);
    assert_eq!(driver.transport().remaining(), 0);

    let events = &driver.transport().events()[event_mark..];
    assert_eq!(
        events[0],
        BusEvent::Exchange {
            sent: IDLE_BYTE,
            received: IDLE_BYTE
        },
        "dummy byte goes out before chip select"
    );
    assert_eq!(events[1], BusEvent::Select);
    assert_eq!(*events.last().unwrap(), BusEvent::Deselect);

    let sent: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            BusEvent::Exchange { sent, .. } => Some(*sent),
            _ => None,
        })
        .collect();
    assert_eq!(sent.len(), read_len);
    assert_eq!(&sent[1..7], &Command::ReadSingleBlock.frame(0x0102_0304));
    assert!(sent[7..].iter().all(|&b| b == IDLE_BYTE));
}

#[test]
fn test_write_clocks_every_busy_byte_before_release() {
    const BUSY_BYTES: usize = 6;

    let mut write_script = vec![IDLE_BYTE]; // dummy byte
    write_script.extend(answer(0x00)); // CMD24
    write_script.extend(vec![IDLE_BYTE; 1 + SECTOR_SIZE]); // token and data
    write_script.extend([IDLE_BYTE, IDLE_BYTE, 0xE5]); // CRC clocks, accepted
    write_script.extend(vec![0x00; BUSY_BYTES]);
    write_script.push(IDLE_BYTE); // programming done
    let write_len = write_script.len();

    let mut transport = ScriptedTransport::new(init_script());
    transport.queue(write_script);
    let mut driver = SdCard::init(transport, RecordingSink::<IoError>::new()).unwrap();
    let event_mark = driver.transport().events().len();

    let data: Sector = core::array::from_fn(|i| (i % 7) as u8);
    driver.write_sector(9, &data);

    assert!(driver.fatal_sink().is_clean());
    assert_eq!(driver.transport().remaining(), 0, "busy phase cut short");

    let events = &driver.transport().events()[event_mark..];
    assert_eq!(events[1], BusEvent::Select);
    assert_eq!(*events.last().unwrap(), BusEvent::Deselect);
    let bytes = exchanged(events);
    assert_eq!(bytes.len(), write_len);
    let sent: Vec<u8> = bytes.iter().map(|&(sent, _)| sent).collect();
    assert_eq!(&sent[1..7], &Command::WriteBlock.frame(9));
    // Dummy, frame and R1 come before the start token.
    assert_eq!(sent[8], 0xFE);
    assert_eq!(&sent[9..9 + SECTOR_SIZE], &data[..]);

    // The response is followed by all busy bytes, then one ready byte,
    // and only then is chip select released.
    let tail = &bytes[bytes.len() - BUSY_BYTES - 2..];
    assert_eq!(tail[0].1, 0xE5);
    assert!(tail[1..=BUSY_BYTES]
        .iter()
        .all(|&(sent, received)| sent == IDLE_BYTE && received == 0x00));
    assert_eq!(tail[BUSY_BYTES + 1], (IDLE_BYTE, IDLE_BYTE));
}
