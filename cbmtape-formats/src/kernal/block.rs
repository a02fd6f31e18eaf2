/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    For the full copyright notice, see the lib.rs file.
*/
use core::convert::TryFrom;
use core::fmt;
use core::iter::Peekable;

use bitflags::bitflags;
#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

use super::pulse::{ByteFlags, DecodeEvent, TapeByte};
use super::pulse::consts::INTER_COPY_PULSES;
use super::{checksum, FileType, Header};
use super::consts::*;

bitflags! {
    /// Quality flags of a block.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BlockFlags: u8 {
        /// The block copy ended without the *end of data* marker.
        const INCOMPLETE        = 0b0000_0001;
        /// The checksum byte does not match the payload.
        const CHECKSUM_MISMATCH = 0b0000_0010;
        /// At least one byte has a check bit error.
        const PARITY_ERRORS     = 0b0000_0100;
        /// At least one byte was decoded from ambiguous pulse pairs.
        const REPAIRED          = 0b0000_1000;
        /// The block was merged from both recorded copies.
        const MERGED            = 0b0001_0000;
        /// The countdown was not recognized.
        const NO_COUNTDOWN      = 0b0010_0000;
    }
}

/// Identifies the recorded copy of a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockCopy {
    /// The first copy, with the countdown `$89..$81`.
    First,
    /// The repeated copy, with the countdown `$09..$01`.
    Repeat,
    /// The countdown was not recognized.
    Unknown,
}

/// The kind of a block determined from its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// A file header.
    Header,
    /// A block of a sequential file.
    SeqData,
    /// Program data or an unrecognized block.
    Data,
}

/// Bytes of a single block copy as they were decoded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawBlock {
    pub bytes: Vec<TapeByte>,
    /// `true` if the *end of data* marker was found.
    pub complete: bool,
    /// The sample offset of the block's first byte.
    pub start: u64,
    /// The sample offset at which the block ended.
    pub end: u64,
}

/// A verified block with its countdown and checksum removed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub copy: BlockCopy,
    pub payload: Vec<u8>,
    /// Flags of each payload byte.
    pub byte_flags: Vec<ByteFlags>,
    /// The recorded checksum, if the block was complete.
    pub checksum: Option<u8>,
    pub flags: BlockFlags,
    pub start: u64,
    pub end: u64,
}

/// An iterator adapter collecting [DecodeEvent]s into [RawBlock]s.
#[derive(Clone, Debug)]
pub struct BlockReader<I> {
    events: I,
    current: Option<RawBlock>,
}

/// An iterator adapter merging both recorded copies of each block into a single [Block].
///
/// See [merge_copies] and [is_repeat_of].
pub struct CopyMerger<I: Iterator> {
    blocks: Peekable<I>,
}

impl<I: Iterator + Clone> Clone for CopyMerger<I> where I::Item: Clone {
    fn clone(&self) -> Self {
        CopyMerger { blocks: self.blocks.clone() }
    }
}

impl<I: Iterator + fmt::Debug> fmt::Debug for CopyMerger<I> where I::Item: fmt::Debug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyMerger").field("blocks", &self.blocks).finish()
    }
}

impl<I> BlockReader<I> {
    pub fn new(events: I) -> Self {
        BlockReader { events, current: None }
    }

    pub fn into_inner(self) -> I {
        self.events
    }
}

impl<I: Iterator<Item=DecodeEvent>> Iterator for BlockReader<I> {
    type Item = RawBlock;

    fn next(&mut self) -> Option<RawBlock> {
        for event in self.events.by_ref() {
            match event {
                DecodeEvent::BlockStart { offset } => {
                    if let Some(block) = self.current.replace(RawBlock { start: offset, ..Default::default() }) {
                        if !block.bytes.is_empty() {
                            return Some(block)
                        }
                    }
                }
                DecodeEvent::Byte(byte) => {
                    let block = self.current.get_or_insert_with(|| RawBlock { start: byte.offset, ..Default::default() });
                    block.bytes.push(byte);
                }
                DecodeEvent::BlockEnd { offset, complete } => {
                    if let Some(mut block) = self.current.take() {
                        block.complete = complete;
                        block.end = offset;
                        if !block.bytes.is_empty() {
                            return Some(block)
                        }
                    }
                }
            }
        }
        self.current.take().filter(|block| !block.bytes.is_empty())
    }
}

/// Returns the length of the countdown prefix found in `bytes` and the copy it identifies.
///
/// The countdown is recognized when one of the first 9 bytes is its final value (`$81` or `$01`)
/// and at least half of the preceding bytes count down to it.
fn find_countdown(bytes: &[u8]) -> Option<(usize, BlockCopy)> {
    bytes.iter().take(COUNTDOWN_SIZE).enumerate().skip(1).find_map(|(last, &byte)| {
        let copy = match byte {
            0x81 => BlockCopy::First,
            0x01 => BlockCopy::Repeat,
            _ => return None
        };
        let matching = bytes[..last].iter().enumerate()
                       .filter(|&(n, &b)| b == byte.wrapping_add((last - n) as u8))
                       .count();
        if 2 * matching >= last {
            Some((last + 1, copy))
        }
        else {
            None
        }
    })
}

impl Block {
    /// Verifies a raw block copy.
    ///
    /// Strips the countdown and, if the copy was complete, the trailing checksum byte.
    /// Returns `None` if there are no bytes left.
    pub fn from_raw(raw: RawBlock) -> Option<Block> {
        let RawBlock { bytes, complete, start, end } = raw;
        let mut flags = BlockFlags::empty();
        let (skip, copy) = find_countdown(&bytes.iter().map(|b| b.value).collect::<Vec<_>>())
                           .unwrap_or_else(|| {
                                flags |= BlockFlags::NO_COUNTDOWN;
                                (0, BlockCopy::Unknown)
                           });
        let mut bytes = &bytes[skip..];
        let mut checksum_byte = None;
        if complete {
            if let Some((last, rest)) = bytes.split_last() {
                checksum_byte = Some(last.value);
                if last.flags.contains(ByteFlags::PARITY_ERROR) {
                    flags |= BlockFlags::PARITY_ERRORS;
                }
                bytes = rest;
            }
        }
        else {
            flags |= BlockFlags::INCOMPLETE;
        }
        if bytes.is_empty() && checksum_byte.is_none() {
            return None
        }
        let payload: Vec<u8> = bytes.iter().map(|b| b.value).collect();
        let byte_flags: Vec<ByteFlags> = bytes.iter().map(|b| b.flags).collect();
        let mut block = Block { copy, payload, byte_flags, checksum: checksum_byte, flags, start, end };
        block.verify();
        Some(block)
    }
    /// Recalculates the quality flags from the payload and the recorded checksum.
    fn verify(&mut self) {
        let mut byte_flags = ByteFlags::empty();
        for flags in self.byte_flags.iter() {
            byte_flags |= *flags;
        }
        self.flags.set(BlockFlags::PARITY_ERRORS, byte_flags.contains(ByteFlags::PARITY_ERROR));
        self.flags.set(BlockFlags::REPAIRED, byte_flags.contains(ByteFlags::REPAIRED));
        self.flags.set(BlockFlags::CHECKSUM_MISMATCH,
                       self.checksum != Some(checksum(&self.payload)));
    }
    /// Returns `true` if the block is complete, its checksum matches and no byte has a check bit error.
    pub fn is_valid(&self) -> bool {
        !self.flags.intersects(BlockFlags::INCOMPLETE|BlockFlags::CHECKSUM_MISMATCH|BlockFlags::PARITY_ERRORS)
    }
    /// Returns `true` if the *end of data* marker was found.
    pub fn is_complete(&self) -> bool {
        !self.flags.contains(BlockFlags::INCOMPLETE)
    }
    /// Determines the kind of the block from its payload.
    pub fn kind(&self) -> BlockKind {
        if self.payload.len() != HEADER_SIZE {
            return BlockKind::Data
        }
        match FileType::try_from(self.payload[0]) {
            Ok(FileType::SeqData) => BlockKind::SeqData,
            Ok(file_type) if file_type.is_header() => BlockKind::Header,
            _ => BlockKind::Data
        }
    }
    /// Parses the payload as a header.
    pub fn header(&self) -> Option<Header> {
        Header::try_from(&self.payload[..]).ok()
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {:?} block, {} bytes at {}..{}",
            self.copy, self.kind(), self.payload.len(), self.start, self.end)?;
        if !self.is_valid() {
            write!(f, " ({:?})", self.flags)?;
        }
        Ok(())
    }
}

/// Merges the first and the repeated copy of a block.
///
/// A valid copy wins, the first one being preferred. When neither is valid but both have
/// the same length, the payload is merged byte by byte, replacing bytes with check bit errors
/// in the first copy with the corresponding bytes of the repeated one, and verified against
/// either recorded checksum. Otherwise the complete, or the longer, copy is kept.
pub fn merge_copies(first: Block, repeat: Block) -> Block {
    if first.is_valid() {
        return first
    }
    if repeat.is_valid() {
        return repeat
    }
    if first.payload.len() == repeat.payload.len() {
        let mut merged = first;
        for (n, flags) in repeat.byte_flags.iter().enumerate() {
            if merged.byte_flags[n].contains(ByteFlags::PARITY_ERROR) && !flags.contains(ByteFlags::PARITY_ERROR) {
                merged.payload[n] = repeat.payload[n];
                merged.byte_flags[n] = *flags;
            }
        }
        let sum = checksum(&merged.payload);
        if merged.checksum != Some(sum) && repeat.checksum == Some(sum) {
            merged.checksum = repeat.checksum;
        }
        if merged.checksum.is_none() {
            merged.checksum = repeat.checksum;
        }
        if repeat.is_complete() {
            merged.flags.remove(BlockFlags::INCOMPLETE);
        }
        merged.end = repeat.end;
        merged.flags |= BlockFlags::MERGED;
        merged.verify();
        return merged
    }
    match (first.is_complete(), repeat.is_complete()) {
        (true, false) => first,
        (false, true) => repeat,
        _ if repeat.payload.len() > first.payload.len() => repeat,
        _ => first
    }
}

impl Block {
    /// Returns the duration of the block copy in samples.
    pub fn duration(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
    /// Returns the number of pulses recorded for the payload with the countdown and the checksum.
    fn copy_pulses(&self) -> u64 {
        20 * (self.payload.len() as u64 + COUNTDOWN_SIZE as u64 + 1)
    }
}

/// Returns `true` if `repeat` may be the repeated copy of the same block as `first`.
///
/// Copies of the same block are recorded one after another, separated only by the short
/// inter-copy gap. A complete copy determines the length of the block: copies of different
/// lengths, or starting further apart than a complete copy followed by the gap, can't be
/// paired. When both copies are incomplete, only their order is known.
pub fn is_repeat_of(first: &Block, repeat: &Block) -> bool {
    if repeat.start < first.start {
        return false
    }
    let complete = match (first.is_complete(), repeat.is_complete()) {
        (true, true) if first.payload.len() != repeat.payload.len() => return false,
        (true, true) => first,
        (true, false) if repeat.payload.len() > first.payload.len() => return false,
        (true, false) => first,
        (false, true) if first.payload.len() > repeat.payload.len() => return false,
        (false, true) => repeat,
        (false, false) => return true
    };
    let pulse = complete.duration() as f64 / complete.copy_pulses() as f64;
    let limit = complete.duration() as f64 + pulse * (3 * INTER_COPY_PULSES) as f64;
    (repeat.start - first.start) as f64 <= limit
}

impl<I: Iterator<Item=Block>> CopyMerger<I> {
    pub fn new(blocks: I) -> Self {
        CopyMerger { blocks: blocks.peekable() }
    }
}

impl<I: Iterator<Item=Block>> Iterator for CopyMerger<I> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let block = self.blocks.next()?;
        if block.copy != BlockCopy::First {
            return Some(block)
        }
        match self.blocks.peek() {
            Some(next) if next.copy == BlockCopy::Repeat && is_repeat_of(&block, next) => {}
            _ => {
                debug!("missing repeated copy of: {}", block);
                return Some(block)
            }
        }
        let repeat = self.blocks.next()?;
        let merged = merge_copies(block, repeat);
        trace!("merged: {}", merged);
        Some(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(values: &[u8], parity: &[usize], complete: bool) -> RawBlock {
        let bytes = values.iter().enumerate().map(|(n, &value)| {
            let flags = if parity.contains(&n) { ByteFlags::PARITY_ERROR } else { ByteFlags::empty() };
            TapeByte { value, flags, offset: n as u64 * 100 }
        }).collect();
        RawBlock { bytes, complete, start: 0, end: values.len() as u64 * 100 }
    }

    fn copy(countdown: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes: Vec<u8> = (0..9).map(|n| countdown - n).collect();
        bytes.extend_from_slice(payload);
        bytes.push(checksum(payload));
        bytes
    }

    #[test]
    fn block_reader_works() {
        let byte = |value, offset| DecodeEvent::Byte(TapeByte { value, flags: ByteFlags::empty(), offset });
        let events = vec![
            DecodeEvent::BlockStart { offset: 10 },
            byte(1, 10),
            byte(2, 30),
            DecodeEvent::BlockEnd { offset: 50, complete: true },
            DecodeEvent::BlockStart { offset: 100 },
            DecodeEvent::BlockEnd { offset: 101, complete: false },
            DecodeEvent::BlockStart { offset: 200 },
            byte(3, 200),
        ];
        let blocks: Vec<RawBlock> = BlockReader::new(events.into_iter()).collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].bytes.len(), 2);
        assert_eq!((blocks[0].start, blocks[0].end, blocks[0].complete), (10, 50, true));
        assert_eq!(blocks[1].bytes[0].value, 3);
        assert!(!blocks[1].complete);
    }

    #[test]
    fn verifies_blocks() {
        let block = Block::from_raw(raw(&copy(0x89, &[1, 2, 3]), &[], true)).unwrap();
        assert_eq!(block.copy, BlockCopy::First);
        assert_eq!(block.payload, vec![1, 2, 3]);
        assert_eq!(block.checksum, Some(0));
        assert!(block.is_valid());
        assert_eq!(block.kind(), BlockKind::Data);

        let block = Block::from_raw(raw(&copy(0x09, &[1, 2, 3]), &[10], true)).unwrap();
        assert_eq!(block.copy, BlockCopy::Repeat);
        assert!(block.flags.contains(BlockFlags::PARITY_ERRORS));
        assert!(!block.is_valid());

        let mut bytes = copy(0x89, &[1, 2, 3]);
        bytes[10] = 0x42;
        let block = Block::from_raw(raw(&bytes, &[], true)).unwrap();
        assert_eq!(block.flags, BlockFlags::CHECKSUM_MISMATCH);

        let block = Block::from_raw(raw(&bytes[..11], &[], false)).unwrap();
        assert_eq!(block.payload, vec![1, 0x42]);
        assert!(block.flags.contains(BlockFlags::INCOMPLETE));
        assert!(!block.is_valid());

        assert!(Block::from_raw(raw(&bytes[..9], &[], false)).is_none());
        assert!(Block::from_raw(RawBlock::default()).is_none());
    }

    #[test]
    fn recognizes_damaged_countdown() {
        let mut bytes = copy(0x89, &[0x81, 0x01]);
        bytes[2] = 0xff;
        bytes[5] = 0x00;
        let block = Block::from_raw(raw(&bytes, &[], true)).unwrap();
        assert_eq!(block.copy, BlockCopy::First);
        assert_eq!(block.payload, vec![0x81, 0x01]);

        let block = Block::from_raw(raw(&[0x55, 0x66, 0x77, 0x11], &[], true)).unwrap();
        assert_eq!(block.copy, BlockCopy::Unknown);
        assert!(block.flags.contains(BlockFlags::NO_COUNTDOWN));
        assert_eq!(block.payload, vec![0x55, 0x66, 0x77]);
    }

    #[test]
    fn block_kinds() {
        let header = Header::new_program(0x1000, 0x100).with_name("TEST");
        let block = Block::from_raw(raw(&copy(0x89, &header.to_payload()), &[], true)).unwrap();
        assert_eq!(block.kind(), BlockKind::Header);
        assert_eq!(block.header(), Some(header));
        let mut seq = vec![0u8; HEADER_SIZE];
        seq[0] = 2;
        let block = Block::from_raw(raw(&copy(0x89, &seq), &[], true)).unwrap();
        assert_eq!(block.kind(), BlockKind::SeqData);
        assert_eq!(block.header(), None);
        seq[0] = 9;
        let block = Block::from_raw(raw(&copy(0x89, &seq), &[], true)).unwrap();
        assert_eq!(block.kind(), BlockKind::Data);
    }

    #[test]
    fn merges_copies() {
        let payload = [10u8, 20, 30, 40];
        let first = Block::from_raw(raw(&copy(0x89, &payload), &[]  , true)).unwrap();
        let repeat = Block::from_raw(raw(&copy(0x09, &payload), &[], true)).unwrap();
        assert_eq!(merge_copies(first.clone(), repeat.clone()), first);

        // both copies damaged in different bytes
        let mut bad_first = copy(0x89, &payload);
        bad_first[9] ^= 0x04;
        let mut bad_repeat = copy(0x09, &payload);
        bad_repeat[12] ^= 0x40;
        let bad_first = Block::from_raw(raw(&bad_first, &[9], true)).unwrap();
        let bad_repeat = Block::from_raw(raw(&bad_repeat, &[12], true)).unwrap();
        let merged = merge_copies(bad_first.clone(), bad_repeat);
        assert!(merged.is_valid());
        assert_eq!(merged.payload, payload);
        assert!(merged.flags.contains(BlockFlags::MERGED));

        // a truncated first copy
        let truncated = Block::from_raw(raw(&copy(0x89, &payload)[..11], &[], false)).unwrap();
        assert_eq!(merge_copies(truncated.clone(), repeat.clone()), repeat);
        assert_eq!(merge_copies(bad_first.clone(), truncated.clone()), bad_first);

        let blocks = vec![truncated, repeat.clone(), first.clone(), repeat.clone()];
        let merged: Vec<Block> = CopyMerger::new(blocks.into_iter()).collect();
        assert_eq!(merged, vec![repeat.clone(), first]);
        let merged: Vec<Block> = CopyMerger::new(vec![repeat.clone()].into_iter()).collect();
        assert_eq!(merged, vec![repeat]);
    }

    fn at(mut block: Block, start: u64) -> Block {
        block.end = start + block.duration();
        block.start = start;
        block
    }

    #[test]
    fn pairs_copies_of_the_same_block() {
        let header = Header::new_program(0x0801, 300).with_name("LOST");
        let header_first = Block::from_raw(raw(&copy(0x89, &header.to_payload()), &[], true)).unwrap();
        let data = [7u8; 300];
        let data_repeat = Block::from_raw(raw(&copy(0x09, &data), &[], true)).unwrap();
        let data_first = Block::from_raw(raw(&copy(0x89, &data), &[], true)).unwrap();
        // each copy spans 100 samples per byte
        let gap = 100 * INTER_COPY_PULSES as u64 / 20;
        let first = at(data_first.clone(), 50_000);
        let repeat = at(data_repeat.clone(), first.end + gap);
        assert!(is_repeat_of(&first, &repeat));
        assert!(!is_repeat_of(&repeat, &first));
        assert!(!is_repeat_of(&first, &at(data_repeat.clone(), first.end + 40 * gap)));
        // the header's repeat and the data's first copy are missing
        let header_first = at(header_first, 0);
        assert!(!is_repeat_of(&header_first, &repeat));
        let blocks = vec![header_first.clone(), repeat.clone()];
        let merged: Vec<Block> = CopyMerger::new(blocks.into_iter()).collect();
        assert_eq!(merged, vec![header_first, repeat.clone()]);
        // a truncated first copy can't be longer than the complete repeat
        let long_first = Block::from_raw(raw(&copy(0x89, &[7u8; 400])[..409], &[], false)).unwrap();
        assert!(!is_repeat_of(&at(long_first, 0), &at(data_repeat.clone(), 41_000)));
        let short_first = Block::from_raw(raw(&copy(0x89, &data)[..200], &[], false)).unwrap();
        assert!(is_repeat_of(&at(short_first.clone(), 0), &at(data_repeat, 31_000 + gap)));
        // two incomplete copies are paired in order
        let short_repeat = Block::from_raw(raw(&copy(0x09, &data)[..100], &[], false)).unwrap();
        assert!(is_repeat_of(&at(short_first, 0), &at(short_repeat, 40_000)));
    }
}
