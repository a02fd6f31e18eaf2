/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    For the full copyright notice, see the lib.rs file.
*/
use core::num::NonZeroU32;

use crate::kernal::{checksum, check_bit, Header};
use crate::kernal::consts::{COUNTDOWN_SIZE, FIRST_COPY_COUNTDOWN, REPEAT_COPY_COUNTDOWN,
                            SEQ_BLOCK_DATA_SIZE};
use super::consts::*;

/// The kind of leader preceding a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Leader {
    /// A long leader preceding a header block.
    Header,
    /// A shorter leader preceding a data block.
    Data,
}

/// The pulse lengths used by the [KernalPulseIter].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PulseTimings {
    pub short: NonZeroU32,
    pub medium: NonZeroU32,
    pub long: NonZeroU32,
}

/// The current state of the [KernalPulseIter].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PulseIterState {
    /// Waiting for the next block.
    Idle,
    /// Emitting leader pulses.
    Lead {
        /// How many pulses left to the end of this leader.
        countdown: u32
    },
    /// Emitting data pulses.
    Data {
        /// The index of the byte being emitted.
        index: usize,
        /// A pulse counter for the current byte: 2 marker pulses and 18 bit pulses.
        pulse: u8
    },
    /// Emitting the *end of data* marker.
    End {
        pulse: u8
    },
    /// Emitting pulses between the first and the repeated copy.
    Gap {
        countdown: u32
    },
    /// Emitting pulses after the repeated copy.
    Trailer {
        countdown: u32
    },
    /// Emitting is done.
    Done,
}

/// Encodes blocks as KERNAL tape pulse intervals via an [Iterator] interface.
///
/// Each item of the underlying iterator is a block payload with the kind of its [Leader].
/// Every block is emitted as the KERNAL routines record it:
///
/// * leader pulses followed by
/// * the first copy: countdown `$89..$81`, payload, checksum, *end of data* marker followed by
/// * inter-copy gap pulses followed by
/// * the repeated copy: countdown `$09..$01`, payload, checksum, *end of data* marker followed by
/// * trailer pulses.
///
/// By default the pulse lengths are nominal C64 CPU cycles, see [PulseTimings].
#[derive(Clone, Debug)]
pub struct KernalPulseIter<I> {
    blocks: I,
    timings: PulseTimings,
    state: PulseIterState,
    bytes: Vec<u8>,
    repeat: bool,
    leader_head: u32,
    leader_data: u32,
}

impl Default for PulseTimings {
    fn default() -> Self {
        PulseTimings {
            short: SHORT_PULSE_LENGTH,
            medium: MEDIUM_PULSE_LENGTH,
            long: LONG_PULSE_LENGTH
        }
    }
}

impl PulseTimings {
    /// Creates timings from explicit pulse lengths.
    ///
    /// Returns `None` unless `short < medium < long`.
    pub fn new(short: u32, medium: u32, long: u32) -> Option<Self> {
        if short < medium && medium < long {
            Some(PulseTimings {
                short: NonZeroU32::new(short)?,
                medium: NonZeroU32::new(medium)?,
                long: NonZeroU32::new(long)?
            })
        }
        else {
            None
        }
    }
    /// Converts the nominal timings to samples at `sample_rate` of a machine clocked at `clock_hz`.
    pub fn at_sample_rate(sample_rate: u32, clock_hz: u32) -> Option<Self> {
        let convert = |cycles: NonZeroU32| {
            ((cycles.get() as u64 * sample_rate as u64 + clock_hz as u64 / 2) / clock_hz as u64) as u32
        };
        let nominal = PulseTimings::default();
        PulseTimings::new(convert(nominal.short), convert(nominal.medium), convert(nominal.long))
    }
}

impl Leader {
    /// Returns the number of leader pulses of this kind, as recorded by the KERNAL.
    pub fn pulses(self) -> u32 {
        match self {
            Leader::Header => LEADER_PULSES_HEAD,
            Leader::Data => LEADER_PULSES_DATA,
        }
    }
}

/// Returns the blocks a KERNAL would record for a program file.
pub fn program_blocks(header: &Header, data: &[u8]) -> Vec<(Leader, Vec<u8>)> {
    vec![(Leader::Header, header.to_payload().to_vec()),
         (Leader::Data, data.to_vec())]
}

/// Returns the blocks a KERNAL would record for a sequential file.
///
/// Data is split into 191 byte chunks, each recorded as a header sized block starting with
/// the type byte `2`. The last chunk is padded with zeroes.
pub fn seq_file_blocks(header: &Header, data: &[u8]) -> Vec<(Leader, Vec<u8>)> {
    let mut blocks = vec![(Leader::Header, header.to_payload().to_vec())];
    for chunk in data.chunks(SEQ_BLOCK_DATA_SIZE) {
        let mut payload = Vec::with_capacity(SEQ_BLOCK_DATA_SIZE + 1);
        payload.push(2);
        payload.extend_from_slice(chunk);
        payload.resize(SEQ_BLOCK_DATA_SIZE + 1, 0);
        blocks.push((Leader::Header, payload));
    }
    blocks
}

impl PulseIterState {
    /// Returns `true` if there are no more pulses to emit.
    pub fn is_done(&self) -> bool {
        matches!(self, PulseIterState::Done)
    }
    /// Returns `true` if emitting leader pulses.
    pub fn is_lead(&self) -> bool {
        matches!(self, PulseIterState::Lead {..})
    }
    /// Returns `true` if emitting data pulses.
    pub fn is_data(&self) -> bool {
        matches!(self, PulseIterState::Data {..})
    }
}

impl<I> KernalPulseIter<I> {
    /// Returns the current state.
    pub fn state(&self) -> PulseIterState {
        self.state
    }
    /// Returns the pulse lengths being emitted.
    pub fn timings(&self) -> &PulseTimings {
        &self.timings
    }
    /// Returns `true` if there are no more pulses to emit.
    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }
    /// Returns the underlying block iterator.
    pub fn into_inner(self) -> I {
        self.blocks
    }
    /// Changes the pulse lengths.
    pub fn with_timings(mut self, timings: PulseTimings) -> Self {
        self.timings = timings;
        self
    }
    /// Changes the number of leader pulses preceding header and data blocks.
    pub fn with_leader_pulses(mut self, head: u32, data: u32) -> Self {
        self.leader_head = head;
        self.leader_data = data;
        self
    }
}

impl<I, B> KernalPulseIter<I>
    where I: Iterator<Item=(Leader, B)>, B: AsRef<[u8]>
{
    /// Creates a new `KernalPulseIter` from the given block iterator.
    pub fn new(blocks: I) -> Self {
        KernalPulseIter {
            blocks,
            timings: PulseTimings::default(),
            state: PulseIterState::Idle,
            bytes: Vec::new(),
            repeat: false,
            leader_head: LEADER_PULSES_HEAD,
            leader_data: LEADER_PULSES_DATA
        }
    }

    fn next_block(&mut self) {
        self.state = match self.blocks.next() {
            Some((leader, payload)) => {
                let payload = payload.as_ref();
                self.bytes.clear();
                self.bytes.extend((0..COUNTDOWN_SIZE as u8).map(|n| FIRST_COPY_COUNTDOWN - n));
                self.bytes.extend_from_slice(payload);
                self.bytes.push(checksum(payload));
                self.repeat = false;
                let countdown = match leader {
                    Leader::Header => self.leader_head,
                    Leader::Data => self.leader_data
                };
                PulseIterState::Lead { countdown }
            }
            None => PulseIterState::Done
        };
    }

    fn data_pulse(&self, index: usize, pulse: u8) -> NonZeroU32 {
        let timings = &self.timings;
        match pulse {
            0 => timings.long,
            1 => timings.medium,
            _ => {
                let byte = self.bytes[index];
                let n = (pulse - 2) >> 1;
                let bit = if n < 8 { (byte >> n) & 1 } else { check_bit(byte) };
                match (bit, pulse & 1) {
                    (0, 0)|(1, 1) => timings.short,
                    _ => timings.medium
                }
            }
        }
    }
}

impl<I, B> Iterator for KernalPulseIter<I>
    where I: Iterator<Item=(Leader, B)>, B: AsRef<[u8]>
{
    type Item = NonZeroU32;

    fn next(&mut self) -> Option<NonZeroU32> {
        loop {
            match self.state {
                PulseIterState::Idle => self.next_block(),
                PulseIterState::Lead { countdown: 0 } => {
                    self.state = PulseIterState::Data { index: 0, pulse: 0 };
                }
                PulseIterState::Lead { countdown } => {
                    self.state = PulseIterState::Lead { countdown: countdown - 1 };
                    return Some(self.timings.short)
                }
                PulseIterState::Data { index, .. } if index >= self.bytes.len() => {
                    self.state = PulseIterState::End { pulse: 0 };
                }
                PulseIterState::Data { index, pulse } => {
                    let delta = self.data_pulse(index, pulse);
                    self.state = if pulse == 19 {
                        PulseIterState::Data { index: index + 1, pulse: 0 }
                    }
                    else {
                        PulseIterState::Data { index, pulse: pulse + 1 }
                    };
                    return Some(delta)
                }
                PulseIterState::End { pulse: 0 } => {
                    self.state = PulseIterState::End { pulse: 1 };
                    return Some(self.timings.long)
                }
                PulseIterState::End { .. } => {
                    self.state = if self.repeat {
                        PulseIterState::Trailer { countdown: TRAILER_PULSES }
                    }
                    else {
                        self.repeat = true;
                        for (n, byte) in self.bytes[..COUNTDOWN_SIZE].iter_mut().enumerate() {
                            *byte = REPEAT_COPY_COUNTDOWN - n as u8;
                        }
                        PulseIterState::Gap { countdown: INTER_COPY_PULSES }
                    };
                    return Some(self.timings.short)
                }
                PulseIterState::Gap { countdown: 0 } => {
                    self.state = PulseIterState::Data { index: 0, pulse: 0 };
                }
                PulseIterState::Gap { countdown } => {
                    self.state = PulseIterState::Gap { countdown: countdown - 1 };
                    return Some(self.timings.short)
                }
                PulseIterState::Trailer { countdown: 0 } => {
                    self.state = PulseIterState::Idle;
                }
                PulseIterState::Trailer { countdown } => {
                    self.state = PulseIterState::Trailer { countdown: countdown - 1 };
                    return Some(self.timings.short)
                }
                PulseIterState::Done => return None
            }
        }
    }
}
