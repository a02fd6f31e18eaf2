/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    For the full copyright notice, see the lib.rs file.
*/
use core::num::NonZeroU32;
use rand::{rngs::SmallRng, Rng, SeedableRng};

use cbmtape::audio::{Polarity, SampleChannel};
use cbmtape::formats::kernal::{FileType, Header, RecoveredFile};
use cbmtape::formats::kernal::pulse::{program_blocks, seq_file_blocks, KernalPulseIter, Leader, PulseTimings};
use cbmtape::formats::kernal::pulse::consts::{INTER_COPY_PULSES, TRAILER_PULSES};
use cbmtape::formats::tap::TapeMachine;
use cbmtape::search::{search_recording, Candidate, PhaseSearch, SearchConfig, TapeSearch};

const RATE: u32 = 96000;
const AMPLITUDE: i16 = 10000;
const LEADER_HEAD: u32 = 1500;
const LEADER_DATA: u32 = 600;

type Blocks = Vec<(Leader, Vec<u8>)>;

fn nz(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap()
}

fn program(name: &str, load: u16, len: usize, seed: u8) -> (Header, Vec<u8>) {
    let data: Vec<u8> = (0..len).map(|n| (n as u8).wrapping_mul(13).wrapping_add(seed)).collect();
    (Header::new_program(load, len as u16).with_name(name), data)
}

fn tape_blocks(files: &[(Header, Vec<u8>)]) -> Blocks {
    files.iter().flat_map(|(header, data)| {
        if header.file_type == FileType::SeqFile {
            seq_file_blocks(header, data)
        }
        else {
            program_blocks(header, data)
        }
    }).collect()
}

fn encoder<I: Iterator<Item=(Leader, Vec<u8>)>>(blocks: I) -> KernalPulseIter<I> {
    let timings = PulseTimings::at_sample_rate(RATE, TapeMachine::C64_PAL.clock_hz()).unwrap();
    KernalPulseIter::new(blocks).with_timings(timings).with_leader_pulses(LEADER_HEAD, LEADER_DATA)
}

fn encode(blocks: &Blocks) -> Vec<u32> {
    encoder(blocks.iter().cloned()).map(NonZeroU32::get).collect()
}

/// Returns the index of the first pulse of each copy of each block.
fn copy_starts(blocks: &Blocks) -> Vec<(usize, usize)> {
    let mut start = 0;
    blocks.iter().map(|block| {
        let leader = match block.0 { Leader::Header => LEADER_HEAD, Leader::Data => LEADER_DATA } as usize;
        let copy_len = 20 * (block.1.len() + 10) + 2;
        let first = start + leader;
        let repeat = first + copy_len + INTER_COPY_PULSES as usize;
        start = repeat + copy_len + TRAILER_PULSES as usize;
        (first, repeat)
    }).collect()
}

/// Flips the lowest bit of the `byte`-th payload byte of a block copy starting at `copy_start`.
fn flip_bit(pulses: &mut [u32], copy_start: usize, byte: usize) {
    let index = copy_start + 20 * (9 + byte) + 2;
    pulses.swap(index, index + 1);
}

fn render(pulses: &[u32]) -> SampleChannel {
    SampleChannel::from_pulses(nz(RATE), pulses.iter().map(|&pulse| nz(pulse)), AMPLITUDE)
}

fn recover(channels: &[SampleChannel], phases: PhaseSearch) -> TapeSearch {
    let config = SearchConfig::default().with_phases(phases).with_parallel(false);
    search_recording(channels, &config)
}

fn sample_files() -> Vec<(Header, Vec<u8>)> {
    let seq_data: Vec<u8> = b"10 PRINT \"HELLO\"\r".iter().cycle().take(500).copied().collect();
    vec![
        program("FIRST", 0x0801, 200, 1),
        (Header::new(FileType::SeqFile, 0x033c, 0x03fc).with_name("NOTES"), seq_data),
        program("SECOND", 0xc000, 1000, 2),
        program("THIRD", 0x2000, 64, 3),
    ]
}

fn assert_recovered(files: &[RecoveredFile], expected: &[(Header, Vec<u8>)]) {
    assert_eq!(files.len(), expected.len());
    for (file, (header, data)) in files.iter().zip(expected) {
        assert!(file.is_valid(), "{}", file);
        assert_eq!(file.file_type, header.file_type);
        assert_eq!(&file.filename[..], &header.name[..]);
        assert_eq!(file.load_address, header.load_address);
        assert_eq!(file.end_address, header.end_address);
        assert_eq!(&file.content, data);
    }
}

#[test]
fn exact_round_trip() {
    let files = sample_files();
    let pulses = encode(&tape_blocks(&files));
    let search = recover(&[render(&pulses)], PhaseSearch::Normal);
    assert_recovered(&search.files, &files);
    let report = &search.reports[0];
    assert_eq!(report.pulses, pulses.len());
    assert_eq!(report.orphan_headers, 0);
    assert!(search.files.windows(2).all(|pair| pair[0].end < pair[1].start));
}

#[test]
fn tolerates_speed_drift() {
    let files = sample_files();
    let pulses = encode(&tape_blocks(&files));
    for &scale in [0.7, 1.0, 1.4].iter() {
        let scaled: Vec<u32> = pulses.iter().map(|&p| (p as f64 * scale).round() as u32).collect();
        let search = recover(&[render(&scaled)], PhaseSearch::Normal);
        assert_recovered(&search.files, &files);
    }
    let len = pulses.len() as f64;
    let drifting: Vec<u32> = pulses.iter().enumerate().map(|(n, &p)| {
        let scale = 0.85 + 0.3 * n as f64 / len;
        (p as f64 * scale).round() as u32
    }).collect();
    let search = recover(&[render(&drifting)], PhaseSearch::Normal);
    assert_recovered(&search.files, &files);
}

#[test]
fn tolerates_bounded_noise() {
    let files = sample_files();
    let pulses = encode(&tape_blocks(&files));
    let mut rng = SmallRng::seed_from_u64(0x64);
    // the calibrated tolerance is about half the 14 samples between *short* and *medium* pulses
    for &jitter in [3, 6].iter() {
        let noisy: Vec<u32> = pulses.iter().map(|&p| (p as i32 + rng.gen_range(-jitter..=jitter)) as u32).collect();
        let search = recover(&[render(&noisy)], PhaseSearch::Normal);
        assert_recovered(&search.files, &files);
        assert_eq!(search.reports[0].calibration_failures, 0, "jitter {}", jitter);
    }
}

#[test]
fn resynchronizes_after_damage() {
    let files = vec![program("ONE", 0x0801, 300, 1), program("TWO", 0x0801, 300, 2), program("THREE", 0x0801, 300, 3)];
    let blocks = tape_blocks(&files);
    let mut pulses = encode(&blocks);
    let long = pulses.iter().copied().max().unwrap();
    // the data block of the second file
    let (first, repeat) = copy_starts(&blocks)[3];
    for start in [first, repeat].iter() {
        let damaged = start + 20 * 150;
        for pulse in pulses[damaged..damaged + 60].iter_mut() {
            *pulse = long * 2;
        }
    }
    let search = recover(&[render(&pulses)], PhaseSearch::Normal);
    assert_eq!(search.files.len(), 3);
    assert_recovered(&search.files[0..1], &files[0..1]);
    assert_recovered(&search.files[2..3], &files[2..3]);
    let damaged = &search.files[1];
    assert_eq!(damaged.filename_lossy(), "TWO");
    assert!(!damaged.is_valid());
    assert!(damaged.truncated);
    assert!(damaged.content.len() < 300);
    assert_eq!(&damaged.content[..100], &files[1].1[..100]);
}

#[test]
fn repairs_from_the_repeated_copy() {
    let files = vec![program("FIXME", 0x1000, 400, 7), program("MERGE", 0x1000, 400, 8)];
    let blocks = tape_blocks(&files);
    let mut pulses = encode(&blocks);
    let starts = copy_starts(&blocks);
    // first file: only the first copy is damaged
    flip_bit(&mut pulses, starts[1].0, 10);
    flip_bit(&mut pulses, starts[1].0, 300);
    // second file: both copies damaged in different bytes
    flip_bit(&mut pulses, starts[3].0, 20);
    flip_bit(&mut pulses, starts[3].1, 200);
    let search = recover(&[render(&pulses)], PhaseSearch::Normal);
    assert_recovered(&search.files, &files);
}

#[test]
fn recovers_data_after_lost_copies() {
    let files = vec![program("LOST", 0x0801, 300, 6)];
    let blocks = tape_blocks(&files);
    let mut pulses = encode(&blocks);
    let short = pulses.iter().copied().min().unwrap();
    let starts = copy_starts(&blocks);
    let copy_len = |data: &[u8]| 20 * (data.len() + 10) + 2;
    // the header's repeated copy and the data's first copy are blank
    let lost = [(starts[0].1, copy_len(&blocks[0].1)), (starts[1].0, copy_len(&blocks[1].1))];
    for &(start, len) in lost.iter() {
        for pulse in pulses[start..start + len].iter_mut() {
            *pulse = short;
        }
    }
    let search = recover(&[render(&pulses)], PhaseSearch::Normal);
    assert_recovered(&search.files, &files);
    assert_eq!(search.reports[0].orphan_headers, 0);
    assert_eq!(search.reports[0].blocks, 2);
}

#[test]
fn damage_in_both_copies_of_a_byte_is_reported() {
    let files = vec![program("BROKEN", 0x1000, 100, 9)];
    let blocks = tape_blocks(&files);
    let mut pulses = encode(&blocks);
    let (first, repeat) = copy_starts(&blocks)[1];
    flip_bit(&mut pulses, first, 50);
    flip_bit(&mut pulses, repeat, 50);
    let search = recover(&[render(&pulses)], PhaseSearch::Normal);
    assert_eq!(search.files.len(), 1);
    let file = &search.files[0];
    assert!(!file.checksum_valid);
    assert!(!file.truncated);
    assert_eq!(file.content[50], files[0].1[50] ^ 1);
}

#[test]
fn selects_channel_and_polarity() {
    let files = vec![program("STEREO", 0x0801, 250, 4)];
    let pulses = encode(&tape_blocks(&files));
    let tape = render(&pulses);
    let inverted = SampleChannel::new(nz(RATE), tape.samples().iter().map(|&s| -s).collect());
    let mut rng = SmallRng::seed_from_u64(0xc64);
    let noise = SampleChannel::new(nz(RATE), (0..tape.len()).map(|_| rng.gen_range(-8000..8000)).collect());

    let search = recover(&[noise.clone(), inverted], PhaseSearch::Both);
    assert_eq!(search.selected, Some(Candidate { channel: 1, polarity: Polarity::Inverted }));
    assert_eq!(search.reports.len(), 4);
    assert_recovered(&search.files, &files);
    assert!(search.files.iter().all(|file| file.channel == 1 && file.polarity == Polarity::Inverted));

    let config = SearchConfig::default().with_parallel(true);
    let parallel = search_recording(&[noise, tape], &config);
    assert_eq!(parallel.selected, Some(Candidate { channel: 1, polarity: Polarity::Normal }));
    assert_recovered(&parallel.files, &files);
}

#[test]
fn tape_image_is_faithful() {
    let files = vec![program("TAPE", 0x0801, 100, 5)];
    let pulses = encode(&tape_blocks(&files));
    let channel = render(&pulses);
    let config = SearchConfig::default().with_phases(PhaseSearch::Normal).with_machine(TapeMachine::C64_PAL);
    let search = search_recording(&[channel], &config);
    let image = search.image.unwrap();
    let cycles: Vec<u32> = image.pulses().map(NonZeroU32::get).collect();
    assert_eq!(cycles.len(), search.reports[0].pulses);
    let clock = TapeMachine::C64_PAL.clock_hz() as f64;
    // the first and the last pulse span the silence around the recording
    for (&samples, &cycles) in pulses[1..pulses.len() - 1].iter().zip(&cycles[1..]) {
        let exact = samples as f64 * clock / RATE as f64;
        assert!((exact - cycles as f64).abs() <= 8.0, "{} {}", exact, cycles);
    }
    let parsed = cbmtape::formats::tap::TapeImage::parse(&image.to_bytes().unwrap()).unwrap();
    assert_eq!(parsed, image);
}

#[test]
fn no_channels_no_files() {
    let search = recover(&[], PhaseSearch::Both);
    assert!(search.files.is_empty());
    assert!(search.image.is_none());
    assert!(search.selected.is_none());
}
