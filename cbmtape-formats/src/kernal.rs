/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    For the full copyright notice, see the lib.rs file.
*/
//! Utilities for the cassette encoding of the Commodore KERNAL tape routines.
//!
//! A KERNAL recording is a sequence of blocks. Each block is recorded twice: a first copy
//! prefixed with the countdown bytes `$89..$81` and a repeated copy prefixed with `$09..$01`.
//! After the countdown comes the payload and a checksum byte: the XOR of all payload bytes.
//!
//! A *header* block carries a 192 byte payload:
//!
//! | offset | size | content                           |
//! |--------|------|-----------------------------------|
//! | 0      | 1    | [FileType]                        |
//! | 1      | 2    | load address (little endian)      |
//! | 3      | 2    | end address (little endian)       |
//! | 5      | 16   | filename, space padded            |
//! | 21     | 171  | padding                           |
//!
//! A program header is followed by a data block of `end - load` bytes. A sequential file header
//! is followed by any number of 192 byte data blocks, each starting with the type byte `2`.
//!
//! * [pulse] provides the pulse level decoder and encoder.
//! * [BlockReader], [Block] and [CopyMerger] turn decoded bytes into verified blocks.
//! * [FileAssembler] pairs headers with data and produces [RecoveredFile]s.
//! * [basic] lists recovered BASIC programs.
use core::borrow::Borrow;
use core::convert::TryFrom;
use core::fmt;
use std::io::{Error, ErrorKind, Result};

use arrayvec::ArrayVec;
use memchr::memchr;
use nom::bytes::complete::take;
use nom::error::{context, VerboseError};
use nom::number::complete::{le_u8, le_u16};
use nom::sequence::tuple;
use nom::IResult;

#[cfg(feature = "report")]
use serde::{Serialize, Deserialize};

pub mod basic;
pub mod pulse;
mod block;
mod file;

pub use block::*;
pub use file::*;

pub mod consts {
    /// The size of a header block payload.
    pub const HEADER_SIZE: usize = 192;
    /// The maximum length of a filename.
    pub const FILENAME_SIZE: usize = 16;
    /// The offset of a filename in a header block payload.
    pub const FILENAME_OFFSET: usize = 5;
    /// The size of data carried by a single sequential file block.
    pub const SEQ_BLOCK_DATA_SIZE: usize = HEADER_SIZE - 1;
    /// The number of countdown bytes preceding each block copy.
    pub const COUNTDOWN_SIZE: usize = 9;
    /// The first countdown byte of the first block copy.
    pub const FIRST_COPY_COUNTDOWN: u8 = 0x89;
    /// The first countdown byte of the repeated block copy.
    pub const REPEAT_COPY_COUNTDOWN: u8 = 0x09;
    /// The padding byte of filenames and headers.
    pub const PADDING: u8 = 0x20;
}

use consts::*;

/// The type of a recorded file, as stored in the first byte of a header block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "report", derive(Serialize, Deserialize))]
pub enum FileType {
    /// A relocatable (BASIC) program loaded at the start of BASIC memory.
    BasicProgram = 1,
    /// A data block of a sequential file.
    SeqData      = 2,
    /// A program loaded at the address from its header.
    Program      = 3,
    /// A sequential file header.
    SeqFile      = 4,
    /// An end-of-tape marker.
    EndOfTape    = 5,
    /// Data recovered without any preceding header.
    Headerless   = 0x100,
}

/// The parsed content of a header block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub file_type: FileType,
    pub load_address: u16,
    pub end_address: u16,
    /// The filename with the padding removed.
    pub name: ArrayVec<u8, FILENAME_SIZE>,
}

/// Calculates the bit toggle checksum from the given iterator of `u8`.
pub fn checksum<I: IntoIterator<Item=B>, B: Borrow<u8>>(iter: I) -> u8 {
    iter.into_iter().fold(0, |acc, x| acc ^ x.borrow())
}

/// Returns the check bit of a byte: `1` if the number of bits set in `byte` is even, `0` otherwise.
#[inline]
pub fn check_bit(byte: u8) -> u8 {
    1 ^ (byte.count_ones() & 1) as u8
}

/// Converts a PETSCII character to its closest printable ASCII counterpart.
///
/// Returns `None` for graphic and control characters.
pub fn petscii_to_ascii(byte: u8) -> Option<char> {
    match byte {
        0x20..=0x5b | 0x5d => Some(byte as char),
        0x61..=0x7a => Some((byte - 0x20) as char),
        0xc1..=0xda => Some((byte - 0x80) as char),
        _ => None
    }
}

impl FileType {
    /// Returns `true` for types starting a program.
    pub fn is_program(self) -> bool {
        matches!(self, FileType::BasicProgram|FileType::Program)
    }
    /// Returns `true` for sequential file headers and data.
    pub fn is_sequential(self) -> bool {
        matches!(self, FileType::SeqFile|FileType::SeqData)
    }
    /// Returns `true` for types valid in a header block.
    pub fn is_header(self) -> bool {
        matches!(self, FileType::BasicProgram|FileType::Program|FileType::SeqFile|FileType::EndOfTape)
    }
    /// Returns a conventional file name extension.
    pub fn extension(self) -> &'static str {
        match self {
            FileType::BasicProgram|FileType::Program => "prg",
            FileType::SeqFile|FileType::SeqData => "seq",
            FileType::EndOfTape|FileType::Headerless => "bin",
        }
    }
}

impl TryFrom<u8> for FileType {
    type Error = Error;

    #[inline]
    fn try_from(file_type: u8) -> Result<Self> {
        match file_type {
            1 => Ok(FileType::BasicProgram),
            2 => Ok(FileType::SeqData),
            3 => Ok(FileType::Program),
            4 => Ok(FileType::SeqFile),
            5 => Ok(FileType::EndOfTape),
            _ => Err(Error::new(ErrorKind::InvalidData, "Unknown KERNAL file type."))
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileType::BasicProgram => "PRG (relocatable)",
            FileType::SeqData => "SEQ data",
            FileType::Program => "PRG",
            FileType::SeqFile => "SEQ",
            FileType::EndOfTape => "EOT",
            FileType::Headerless => "headerless",
        })
    }
}

fn parse_header(input: &[u8]) -> IResult<&[u8], (u8, u16, u16, &[u8]), VerboseError<&[u8]>> {
    context("header", tuple((
        context("file type", le_u8),
        context("load address", le_u16),
        context("end address", le_u16),
        context("filename", take(FILENAME_SIZE)),
    )))(input)
}

/// Removes padding from a raw filename: anything from the first NUL byte, then trailing spaces.
pub fn trim_filename(raw: &[u8]) -> &[u8] {
    let raw = match memchr(0, raw) {
        Some(end) => &raw[..end],
        None => raw
    };
    let end = raw.iter().rposition(|&b| b != PADDING && b != PADDING|0x80).map_or(0, |n| n + 1);
    &raw[..end]
}

impl Header {
    /// Creates a header of the given type with an empty name.
    pub fn new(file_type: FileType, load_address: u16, end_address: u16) -> Self {
        Header { file_type, load_address, end_address, name: ArrayVec::new() }
    }
    /// Creates a program header for `length` bytes loaded at `load_address`.
    pub fn new_program(load_address: u16, length: u16) -> Self {
        Header::new(FileType::Program, load_address, load_address.wrapping_add(length))
    }
    /// Changes the header's name, returning a new header. Names longer than 16 bytes are truncated.
    pub fn with_name<S: AsRef<[u8]>>(mut self, name: S) -> Self {
        let name = name.as_ref();
        self.name.clear();
        let len = name.len().min(FILENAME_SIZE);
        // capacity is never exceeded
        let _ = self.name.try_extend_from_slice(&name[..len]);
        self
    }
    /// Returns the length of data expected to follow a program header.
    pub fn data_length(&self) -> usize {
        self.end_address.wrapping_sub(self.load_address) as usize
    }
    /// Returns the name converted to printable ASCII. Non printable characters are replaced with `?`.
    pub fn name_lossy(&self) -> String {
        self.name.iter().map(|&b| petscii_to_ascii(b).unwrap_or('?')).collect()
    }
    /// Returns the 192 byte payload of a header block.
    pub fn to_payload(&self) -> [u8; HEADER_SIZE] {
        let mut payload = [PADDING; HEADER_SIZE];
        payload[0] = self.file_type as u8;
        payload[1..3].copy_from_slice(&self.load_address.to_le_bytes());
        payload[3..5].copy_from_slice(&self.end_address.to_le_bytes());
        payload[FILENAME_OFFSET..FILENAME_OFFSET + self.name.len()].copy_from_slice(&self.name);
        payload
    }
}

impl TryFrom<&'_[u8]> for Header {
    type Error = Error;

    fn try_from(payload: &[u8]) -> Result<Self> {
        let (_, (file_type, load_address, end_address, raw_name)) = parse_header(payload)
            .map_err(|_| Error::new(ErrorKind::InvalidData, "Not a KERNAL header: too short"))?;
        let file_type = FileType::try_from(file_type)?;
        if !file_type.is_header() {
            return Err(Error::new(ErrorKind::InvalidData, "Not a KERNAL header: a data block type"))
        }
        let header = Header::new(file_type, load_address, end_address)
                            .with_name(trim_filename(raw_name));
        Ok(header)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: \"{}\" ${:04X}-${:04X}",
            self.file_type, self.name_lossy(), self.load_address, self.end_address)
    }
}
