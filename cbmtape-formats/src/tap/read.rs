/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    For the full copyright notice, see the lib.rs file.
*/
use core::num::NonZeroU32;
use std::io::Read;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};
use nom::bytes::complete::tag;
use nom::error::{context, VerboseError};
use nom::number::complete::{le_u8, le_u32};
use nom::sequence::tuple;
use nom::IResult;

use super::consts::*;
use super::{TapError, TapeImage, TapeMachine, TapVersion};

/// Iterates over pulses of a [TapeImage], yielding their lengths in cycles.
///
/// Created by [TapeImage::pulses].
#[derive(Clone, Debug)]
pub struct TapPulseIter<'a> {
    version: TapVersion,
    data: &'a [u8],
}

type HeaderFields = (u8, u8, u8, u32);

fn parse_header(input: &[u8]) -> IResult<&[u8], HeaderFields, VerboseError<&[u8]>> {
    let (input, (_, version, platform, video, _, length)) = context("TAP header", tuple((
        context("signature", tag(&TAP_MAGIC[..])),
        context("version", le_u8),
        context("platform", le_u8),
        context("video standard", le_u8),
        context("reserved", le_u8),
        context("data length", le_u32),
    )))(input)?;
    Ok((input, (version, platform, video, length)))
}

impl TapeImage {
    /// Parses a TAP image from bytes.
    ///
    /// Data found after the declared data length is ignored.
    pub fn parse(bytes: &[u8]) -> Result<TapeImage, TapError> {
        if bytes.len() < TAP_HEADER_SIZE {
            if !TAP_MAGIC.starts_with(&bytes[..bytes.len().min(TAP_MAGIC.len())]) {
                return Err(TapError::BadMagic)
            }
            return Err(TapError::Truncated { expected: TAP_HEADER_SIZE, found: bytes.len() })
        }
        let (data, (version, platform, video, length)) = parse_header(bytes)
                                                        .map_err(|_| TapError::BadMagic)?;
        let version = match version {
            0 => TapVersion::V0,
            1 => TapVersion::V1,
            v => return Err(TapError::UnsupportedVersion(v))
        };
        let machine = TapeMachine::from_header_bytes(platform, video)
                      .ok_or(TapError::UnsupportedMachine { platform, video })?;
        let length = length as usize;
        if data.len() < length {
            return Err(TapError::Truncated { expected: length, found: data.len() })
        }
        if data.len() > length {
            debug!("ignoring {} bytes after TAP data", data.len() - length);
        }
        Ok(TapeImage { version, machine, data: data[..length].to_vec() })
    }
    /// Reads and parses a TAP image.
    pub fn read_from<R: Read>(mut rd: R) -> Result<TapeImage, TapError> {
        let mut bytes = Vec::new();
        rd.read_to_end(&mut bytes)?;
        TapeImage::parse(&bytes)
    }
    /// Returns an iterator of pulse lengths in cycles.
    pub fn pulses(&self) -> TapPulseIter<'_> {
        TapPulseIter { version: self.version, data: &self.data }
    }
}

impl<'a> TapPulseIter<'a> {
    /// Returns the data that has not been read yet.
    pub fn remaining(&self) -> &'a [u8] {
        self.data
    }
}

impl<'a> Iterator for TapPulseIter<'a> {
    type Item = NonZeroU32;

    fn next(&mut self) -> Option<NonZeroU32> {
        loop {
            let (&byte, rest) = self.data.split_first()?;
            self.data = rest;
            if byte != 0 {
                return NonZeroU32::new(byte as u32 * CYCLES_PER_UNIT)
            }
            match self.version {
                TapVersion::V0 => return NonZeroU32::new(OVERFLOW_CYCLES),
                TapVersion::V1 => {
                    if rest.len() < 3 {
                        debug!("truncated TAP escape sequence");
                        self.data = &[];
                        return None
                    }
                    let cycles = u32::from_le_bytes([rest[0], rest[1], rest[2], 0]);
                    self.data = &rest[3..];
                    if let Some(cycles) = NonZeroU32::new(cycles) {
                        return Some(cycles)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(version: u8, platform: u8, video: u8, data: &[u8]) -> Vec<u8> {
        let mut bytes = TAP_MAGIC.to_vec();
        bytes.extend_from_slice(&[version, platform, video, 0]);
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(data);
        bytes
    }

    fn cycles(image: &TapeImage) -> Vec<u32> {
        image.pulses().map(NonZeroU32::get).collect()
    }

    #[test]
    fn parse_tap_works() {
        let tap = TapeImage::parse(&image(1, 0, 1, &[0x30, 0, 0x00, 0x10, 0x00, 0x56, 0, 0, 0, 0, 0x01])).unwrap();
        assert_eq!(tap.version, TapVersion::V1);
        assert_eq!(tap.machine, TapeMachine::C64_NTSC);
        assert_eq!(cycles(&tap), vec![0x180, 0x1000, 0x2b0, 8]);
        assert_eq!(tap.duration_cycles(), 0x180 + 0x1000 + 0x2b0 + 8);

        let tap = TapeImage::parse(&image(0, 2, 0, &[0x42, 0, 0x30])).unwrap();
        assert_eq!(tap.machine, TapeMachine::C16_PAL);
        assert_eq!(cycles(&tap), vec![0x210, 2048, 0x180]);

        let mut bytes = image(1, 1, 0, &[0x30, 0x30]);
        bytes.extend_from_slice(&[1, 2, 3]);
        let tap = TapeImage::read_from(&bytes[..]).unwrap();
        assert_eq!(tap.machine, TapeMachine::VIC20_PAL);
        assert_eq!(tap.data, vec![0x30, 0x30]);
    }

    #[test]
    fn truncated_escape_is_dropped() {
        let tap = TapeImage::parse(&image(1, 0, 0, &[0x30, 0, 0x10])).unwrap();
        assert_eq!(cycles(&tap), vec![0x180]);
    }

    #[test]
    fn parse_tap_errors() {
        assert!(matches!(TapeImage::parse(b"C64-TAPE"), Err(TapError::Truncated {..})));
        assert!(matches!(TapeImage::parse(b"RIFF"), Err(TapError::BadMagic)));
        let mut bytes = image(1, 0, 0, &[0x30]);
        bytes[0] = b'X';
        assert!(matches!(TapeImage::parse(&bytes), Err(TapError::BadMagic)));
        assert!(matches!(TapeImage::parse(&image(2, 0, 0, &[])), Err(TapError::UnsupportedVersion(2))));
        assert!(matches!(TapeImage::parse(&image(1, 3, 0, &[])),
                         Err(TapError::UnsupportedMachine { platform: 3, video: 0 })));
        let mut bytes = image(1, 0, 0, &[0x30, 0x30, 0x30]);
        bytes.pop();
        assert!(matches!(TapeImage::parse(&bytes), Err(TapError::Truncated { expected: 3, found: 2 })));
    }
}
