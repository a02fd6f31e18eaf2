/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    For the full copyright notice, see the lib.rs file.
*/
use bitflags::bitflags;
use cbmtape_core::clock::{ClassifiedPulse, PulseClass};

use crate::kernal::check_bit;
use super::consts::*;

bitflags! {
    /// Quality flags of a decoded byte.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ByteFlags: u8 {
        /// The check bit does not match the data bits.
        const PARITY_ERROR = 0b0000_0001;
        /// At least one bit was decoded from an ambiguous pulse pair.
        const REPAIRED     = 0b0000_0010;
    }
}

/// A byte decoded from the tape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TapeByte {
    pub value: u8,
    pub flags: ByteFlags,
    /// The sample offset of the first pulse of this byte's data bits.
    pub offset: u64,
}

/// Events emitted by the [PulseDecoder].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeEvent {
    /// A leader followed by the first *new data* marker was found.
    BlockStart {
        offset: u64
    },
    /// A byte has been decoded.
    Byte(TapeByte),
    /// The block copy ended.
    BlockEnd {
        offset: u64,
        /// `true` if the *end of data* marker was found, `false` if decoding was aborted.
        complete: bool
    },
}

/// The current state of the [PulseDecoder].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PulseDecodeState {
    /// Counting consecutive *short* pulses.
    SeekSync {
        count: u32
    },
    /// Receiving leader pulses, waiting for the *new data* marker.
    SyncTrain,
    /// Received the *long* pulse of the first *new data* marker.
    AwaitNewDataMarker,
    /// Receiving data bit pulse pairs.
    ReadingByte {
        /// Data bits received so far.
        current: u8,
        /// The number of complete bit pairs received, the 9th one being the check bit.
        bits: u8,
        /// The first pulse of the current pair, if received.
        half: Option<(PulseClass, u32)>,
        flags: ByteFlags,
    },
    /// A byte has been received, expecting a *new data* or an *end of data* marker.
    ByteComplete {
        /// `true` if the *long* pulse of the marker was received.
        marker: bool
    },
}

/// Provides a decoder of classified KERNAL tape pulses.
///
/// After invoking [PulseDecoder::new] or [PulseDecoder::reset] the decoder expects a block copy
/// which consists of:
///
/// * at least [MIN_SYNC_PULSES] *short* leader pulses followed by
/// * the *new data* marker and data bit pairs for each byte followed by
/// * the *end of data* marker.
///
/// Feed the decoder with pulses via [PulseDecoder::decode]. At most one [DecodeEvent] is emitted
/// per pulse. Malformed pulse sequences never produce errors: the block copy is aborted with an
/// incomplete [DecodeEvent::BlockEnd] and the decoder searches for the next leader.
///
/// Pairs of two *short* or two *medium* pulses are repaired by comparing raw pulse lengths, and
/// the resulting byte is flagged with [ByteFlags::REPAIRED].
#[derive(Clone, Debug)]
pub struct PulseDecoder {
    state: PulseDecodeState,
    byte_offset: u64,
    bytes: u32,
}

/// An iterator adapter decoding classified pulses into [DecodeEvent]s.
#[derive(Clone, Debug)]
pub struct DecodeIter<I> {
    iter: I,
    decoder: PulseDecoder,
    end: u64,
    done: bool,
}

/// Extends classified pulse iterators with the [DecodeExt::decode] method.
pub trait DecodeExt: Iterator<Item=ClassifiedPulse> + Sized {
    fn decode(self) -> DecodeIter<Self> {
        DecodeIter::new(self)
    }
}

impl<I: Iterator<Item=ClassifiedPulse>> DecodeExt for I {}

impl PulseDecodeState {
    /// Returns `true` if searching for a leader.
    pub fn is_seeking(&self) -> bool {
        matches!(self, PulseDecodeState::SeekSync {..})
    }
    /// Returns `true` if receiving leader pulses.
    pub fn is_sync(&self) -> bool {
        matches!(self, PulseDecodeState::SyncTrain|PulseDecodeState::AwaitNewDataMarker)
    }
    /// Returns `true` if receiving a block copy.
    pub fn is_data(&self) -> bool {
        matches!(self, PulseDecodeState::ReadingByte {..}|PulseDecodeState::ByteComplete {..})
    }
}

impl Default for PulseDecodeState {
    fn default() -> Self {
        PulseDecodeState::SeekSync { count: 0 }
    }
}

impl Default for PulseDecoder {
    fn default() -> Self {
        PulseDecoder::new()
    }
}

impl PulseDecoder {
    pub fn new() -> Self {
        PulseDecoder { state: PulseDecodeState::default(), byte_offset: 0, bytes: 0 }
    }
    /// Resets the state of the decoder, discarding any partially received block.
    pub fn reset(&mut self) {
        self.state = PulseDecodeState::default();
        self.bytes = 0;
    }
    /// Returns the current state.
    pub fn state(&self) -> PulseDecodeState {
        self.state
    }
    /// Allows to manually assign `state`.
    pub fn with_state(mut self, state: PulseDecodeState) -> Self {
        self.state = state;
        self
    }
    /// Returns the number of bytes decoded in the current block copy.
    pub fn block_bytes(&self) -> u32 {
        self.bytes
    }
    /// Ends the current block copy if one is in progress.
    ///
    /// Returns an incomplete [DecodeEvent::BlockEnd] at `offset` if a block copy has been
    /// interrupted. After calling this method the decoder searches for a leader.
    pub fn end(&mut self, offset: u64) -> Option<DecodeEvent> {
        let in_block = self.state.is_data();
        self.reset();
        if in_block {
            Some(DecodeEvent::BlockEnd { offset, complete: false })
        }
        else {
            None
        }
    }

    fn abort(&mut self, pulse: &ClassifiedPulse) -> Option<DecodeEvent> {
        self.bytes = 0;
        self.state = PulseDecodeState::SeekSync {
            count: if pulse.class.is_short() { 1 } else { 0 }
        };
        Some(DecodeEvent::BlockEnd { offset: pulse.offset, complete: false })
    }

    fn start_byte(&mut self) {
        self.state = PulseDecodeState::ReadingByte {
            current: 0, bits: 0, half: None, flags: ByteFlags::empty()
        };
    }
    /// Interprets a single classified pulse.
    ///
    /// Returns an event if the pulse completed one.
    pub fn decode(&mut self, pulse: ClassifiedPulse) -> Option<DecodeEvent> {
        use PulseClass::*;
        match self.state {
            PulseDecodeState::SeekSync { count } => {
                self.state = match pulse.class {
                    Short if count + 1 >= MIN_SYNC_PULSES => PulseDecodeState::SyncTrain,
                    Short => PulseDecodeState::SeekSync { count: count + 1 },
                    _ => PulseDecodeState::SeekSync { count: 0 }
                };
                None
            }
            PulseDecodeState::SyncTrain => {
                self.state = match pulse.class {
                    Short => PulseDecodeState::SyncTrain,
                    Long => PulseDecodeState::AwaitNewDataMarker,
                    _ => PulseDecodeState::SeekSync { count: 0 }
                };
                None
            }
            PulseDecodeState::AwaitNewDataMarker => match pulse.class {
                Medium => {
                    self.bytes = 0;
                    self.start_byte();
                    Some(DecodeEvent::BlockStart { offset: pulse.offset })
                }
                Short => {
                    self.state = PulseDecodeState::SeekSync { count: 1 };
                    None
                }
                _ => {
                    self.state = PulseDecodeState::SeekSync { count: 0 };
                    None
                }
            }
            PulseDecodeState::ReadingByte { current, bits, half, mut flags } => {
                if matches!(pulse.class, Long|Invalid) {
                    return self.abort(&pulse)
                }
                let (first_class, first_length) = match half {
                    None => {
                        if bits == 0 {
                            self.byte_offset = pulse.offset;
                        }
                        self.state = PulseDecodeState::ReadingByte {
                            current, bits, half: Some((pulse.class, pulse.length.get())), flags
                        };
                        return None
                    }
                    Some(half) => half
                };
                let bit = match (first_class, pulse.class) {
                    (Short, Medium) => 0,
                    (Medium, Short) => 1,
                    _ => {
                        flags |= ByteFlags::REPAIRED;
                        if first_length <= pulse.length.get() { 0 } else { 1 }
                    }
                };
                if bits < 8 {
                    self.state = PulseDecodeState::ReadingByte {
                        current: current | (bit << bits), bits: bits + 1, half: None, flags
                    };
                    None
                }
                else {
                    if bit != check_bit(current) {
                        flags |= ByteFlags::PARITY_ERROR;
                    }
                    self.bytes += 1;
                    self.state = PulseDecodeState::ByteComplete { marker: false };
                    Some(DecodeEvent::Byte(TapeByte { value: current, flags, offset: self.byte_offset }))
                }
            }
            PulseDecodeState::ByteComplete { marker: false } => match pulse.class {
                Long => {
                    self.state = PulseDecodeState::ByteComplete { marker: true };
                    None
                }
                _ => self.abort(&pulse)
            }
            PulseDecodeState::ByteComplete { marker: true } => match pulse.class {
                Medium => {
                    self.start_byte();
                    None
                }
                Short => {
                    self.bytes = 0;
                    self.state = PulseDecodeState::SeekSync { count: 1 };
                    Some(DecodeEvent::BlockEnd { offset: pulse.end(), complete: true })
                }
                _ => self.abort(&pulse)
            }
        }
    }
}

impl<I> DecodeIter<I> {
    /// Returns a reference to the decoder.
    pub fn decoder(&self) -> &PulseDecoder {
        &self.decoder
    }
    /// Returns the underlying pulse iterator.
    pub fn into_inner(self) -> I {
        self.iter
    }
}

impl<I: Iterator<Item=ClassifiedPulse>> DecodeIter<I> {
    pub fn new(iter: I) -> Self {
        DecodeIter { iter, decoder: PulseDecoder::new(), end: 0, done: false }
    }
}

impl<I: Iterator<Item=ClassifiedPulse>> Iterator for DecodeIter<I> {
    type Item = DecodeEvent;

    fn next(&mut self) -> Option<DecodeEvent> {
        if self.done {
            return None
        }
        for pulse in self.iter.by_ref() {
            self.end = pulse.end();
            if let Some(event) = self.decoder.decode(pulse) {
                return Some(event)
            }
        }
        self.done = true;
        self.decoder.end(self.end)
    }
}
