//! End-to-end encoder checks against a step-by-step reference loop.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation
)]

use pdm::{Oversampling, PdmEncoder, SampleRate};

/// Single-loop model of the encoder: one step counter over priming and
/// emission, one hold counter, the two accumulators updated in place and
/// packing by hand. Shares no code with the crate.
fn reference(data: &[i16], rate: SampleRate, r: u8) -> Vec<u8> {
    let r = u64::from(r);
    let prime = u64::from(rate.hz()) * r;
    let total = 2 * r * data.len() as u64 + prime;

    let (mut a, mut b) = (0i32, 0i32);
    let (mut index, mut hold) = (0usize, 0u64);
    let (mut packed, mut bits) = (0u8, 0u8);
    let mut out = Vec::new();

    for step in 0..total {
        let sample = if step > prime {
            let sample = data.get(index).copied().unwrap_or(0);
            if hold >= 2 * r {
                hold = 0;
                index += 1;
            }
            sample
        } else {
            0
        };

        b = b.saturating_add(a);
        let level: i32 = if b > 0 { 32_767 } else { -32_768 };
        a = a.saturating_add(i32::from(sample) - level);
        b = b.saturating_sub(level);
        let bit = level > 0;

        hold += 1;
        if step < prime {
            continue;
        }
        packed = (packed << 1) | u8::from(bit);
        bits += 1;
        if bits == 8 {
            out.push(packed);
            packed = 0;
            bits = 0;
        }
    }
    out
}

fn encode(data: &[i16], rate: SampleRate, r: u8) -> Vec<u8> {
    PdmEncoder::new(data.iter().copied(), rate, Oversampling::new(r).unwrap()).collect()
}

#[test]
fn one_second_of_silence_at_8khz_osr_4() {
    let silence = vec![0i16; 8_000];
    let out = encode(&silence, SampleRate::Hz8000, 4);

    assert_eq!(out.len(), 8_000);
    assert_eq!(out, reference(&silence, SampleRate::Hz8000, 4));
    // Silence settles into alternating bits.
    assert_eq!(out[0], 0xAA);
    assert!(out.iter().all(|b| (3..=5).contains(&b.count_ones())));
}

#[test]
fn sine_at_16khz_matches_reference() {
    let sine: Vec<i16> = (0..1_600)
        .map(|i| {
            let phase = i as f64 * 2.0 * core::f64::consts::PI * 440.0 / 16_000.0;
            (phase.sin() * 20_000.0) as i16
        })
        .collect();
    for r in [1, 3, 8] {
        assert_eq!(
            encode(&sine, SampleRate::Hz16000, r),
            reference(&sine, SampleRate::Hz16000, r),
            "R = {r}"
        );
    }
}

#[test]
fn full_scale_square_wave_matches_reference() {
    let square: Vec<i16> = (0..800)
        .map(|i| if (i / 20) % 2 == 0 { i16::MAX } else { i16::MIN })
        .collect();
    assert_eq!(
        encode(&square, SampleRate::Hz8000, 2),
        reference(&square, SampleRate::Hz8000, 2)
    );
}

#[test]
fn output_tracks_input_level() {
    let loud = vec![24_000i16; 4_000];
    let quiet = vec![-24_000i16; 4_000];
    let ones = |bytes: &[u8]| bytes.iter().map(|b| b.count_ones()).sum::<u32>();

    let loud_out = encode(&loud, SampleRate::Hz8000, 4);
    let quiet_out = encode(&quiet, SampleRate::Hz8000, 4);
    let total = loud_out.len() as u32 * 8;

    assert!(ones(&loud_out) > total * 8 / 10);
    assert!(ones(&quiet_out) < total * 2 / 10);
}
