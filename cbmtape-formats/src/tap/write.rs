/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    For the full copyright notice, see the lib.rs file.
*/
use core::convert::TryFrom;
use core::num::NonZeroU32;
use std::io::{Error, ErrorKind, Write, Seek, SeekFrom, Result};

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

use super::consts::*;
use super::{TapeImage, TapeMachine, TapVersion};

/// Converts pulse lengths from audio samples to machine clock cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CycleConverter {
    clock_hz: u64,
    sample_rate: u64,
}

/// A tool for writing TAP images to seekable writers.
///
/// The header is written by [TapWriter::try_new] with a zero data length, which is
/// patched by [TapWriter::finish].
pub struct TapWriter<W> {
    wr: W,
    head: u64,
    length: u64,
    machine: TapeMachine,
    buf: Vec<u8>,
}

/// Appends a single pulse of `cycles` length to `out` in the version 1 encoding.
///
/// Returns the number of bytes appended.
pub fn encode_cycles(cycles: u64, out: &mut Vec<u8>) -> usize {
    let units = ((cycles + CYCLES_PER_UNIT as u64 / 2) / CYCLES_PER_UNIT as u64).max(1);
    if units <= u8::MAX as u64 {
        out.push(units as u8);
        return 1
    }
    let mut cycles = cycles;
    let mut len = 0;
    while cycles > 0 {
        let chunk = cycles.min(MAX_ESCAPE_CYCLES as u64);
        let bytes = (chunk as u32).to_le_bytes();
        out.extend_from_slice(&[0, bytes[0], bytes[1], bytes[2]]);
        cycles -= chunk;
        len += 4;
    }
    len
}

fn header_bytes(version: TapVersion, machine: TapeMachine, length: u32) -> [u8; TAP_HEADER_SIZE] {
    let mut header = [0u8; TAP_HEADER_SIZE];
    header[..TAP_MAGIC.len()].copy_from_slice(TAP_MAGIC);
    header[12] = version as u8;
    header[13] = machine.platform as u8;
    header[14] = machine.video as u8;
    header[TAP_LENGTH_OFFSET..].copy_from_slice(&length.to_le_bytes());
    header
}

fn data_length(length: u64) -> Result<u32> {
    u32::try_from(length).map_err(|_| Error::new(ErrorKind::InvalidData, "TAP data too large."))
}

impl CycleConverter {
    /// Creates a converter for audio sampled at `sample_rate` and a machine clocked at `clock_hz`.
    pub fn new(sample_rate: NonZeroU32, clock_hz: u32) -> Self {
        CycleConverter { clock_hz: clock_hz as u64, sample_rate: sample_rate.get() as u64 }
    }
    /// Returns the nearest number of cycles elapsed during `samples`.
    #[inline]
    pub fn cycles(&self, samples: u32) -> u64 {
        (samples as u64 * self.clock_hz + self.sample_rate / 2) / self.sample_rate
    }
}

impl TapeImage {
    /// Creates a version 1 image from pulse lengths given in samples at `sample_rate`.
    pub fn from_pulses<I>(pulses: I, sample_rate: NonZeroU32, machine: TapeMachine) -> Self
        where I: IntoIterator<Item=NonZeroU32>
    {
        let converter = CycleConverter::new(sample_rate, machine.clock_hz());
        let mut image = TapeImage::new(machine);
        for pulse in pulses {
            encode_cycles(converter.cycles(pulse.get()), &mut image.data);
        }
        image
    }
    /// Writes the complete image, with its header, to the given writer.
    pub fn write_to<W: Write>(&self, mut wr: W) -> Result<()> {
        let length = data_length(self.data.len() as u64)?;
        wr.write_all(&header_bytes(self.version, self.machine, length))?;
        wr.write_all(&self.data)
    }
    /// Returns the image file content.
    ///
    /// Fails in the same way as [TapeImage::write_to] when the data is too large.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.file_size());
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }
}

impl<W> TapWriter<W> {
    pub fn machine(&self) -> TapeMachine {
        self.machine
    }
    /// Returns the number of data bytes written so far.
    pub fn data_length(&self) -> u64 {
        self.length
    }
    pub fn get_ref(&self) -> &W {
        &self.wr
    }
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.wr
    }
}

impl<W> TapWriter<W>
    where W: Write + Seek
{
    /// Writes a version 1 header at the current position of `wr`.
    pub fn try_new(mut wr: W, machine: TapeMachine) -> Result<Self> {
        let head = wr.seek(SeekFrom::Current(0))?;
        wr.write_all(&header_bytes(TapVersion::V1, machine, 0))?;
        Ok(TapWriter { wr, head, length: 0, machine, buf: Vec::new() })
    }
    /// Writes pulses given in clock cycles.
    ///
    /// Returns the number of bytes written.
    pub fn write_cycles<I>(&mut self, cycles: I) -> Result<usize>
        where I: IntoIterator<Item=NonZeroU32>
    {
        self.buf.clear();
        for pulse in cycles {
            encode_cycles(pulse.get() as u64, &mut self.buf);
        }
        self.flush_buf()
    }
    /// Writes pulses given in samples at `sample_rate`, converting them to clock cycles.
    ///
    /// Returns the number of bytes written.
    pub fn write_pulses<I>(&mut self, pulses: I, sample_rate: NonZeroU32) -> Result<usize>
        where I: IntoIterator<Item=NonZeroU32>
    {
        let converter = CycleConverter::new(sample_rate, self.machine.clock_hz());
        self.buf.clear();
        for pulse in pulses {
            encode_cycles(converter.cycles(pulse.get()), &mut self.buf);
        }
        self.flush_buf()
    }
    /// Patches the data length in the header and returns the underlying writer
    /// positioned at the end of the image.
    pub fn finish(mut self) -> Result<W> {
        let length = data_length(self.length)?;
        self.wr.seek(SeekFrom::Start(self.head + TAP_LENGTH_OFFSET as u64))?;
        self.wr.write_all(&length.to_le_bytes())?;
        self.wr.seek(SeekFrom::Start(self.head + TAP_HEADER_SIZE as u64 + self.length))?;
        self.wr.flush()?;
        debug!("TAP image finished: {} data bytes", length);
        Ok(self.wr)
    }

    fn flush_buf(&mut self) -> Result<usize> {
        let len = self.buf.len();
        data_length(self.length + len as u64)?;
        self.wr.write_all(&self.buf)?;
        self.length += len as u64;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use super::*;

    fn nz(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    #[test]
    fn encode_cycles_works() {
        let mut out = Vec::new();
        assert_eq!(encode_cycles(0x180, &mut out), 1);
        assert_eq!(encode_cycles(3, &mut out), 1);
        assert_eq!(encode_cycles(2043, &mut out), 1);
        assert_eq!(out, vec![0x30, 1, 0xff]);
        out.clear();
        assert_eq!(encode_cycles(2044, &mut out), 4);
        assert_eq!(out, vec![0, 0xfc, 0x07, 0]);
        out.clear();
        assert_eq!(encode_cycles(0x100_0005, &mut out), 8);
        assert_eq!(out, vec![0, 0xff, 0xff, 0xff, 0, 0x06, 0, 0]);
        let image = TapeImage { data: out, ..TapeImage::default() };
        assert_eq!(image.pulses().map(NonZeroU32::get).collect::<Vec<_>>(), vec![0xff_ffff, 6]);
    }

    #[test]
    fn cycle_converter_works() {
        let converter = CycleConverter::new(nz(44100), TapeMachine::C64_PAL.clock_hz());
        assert_eq!(converter.cycles(44100), 985_248);
        assert_eq!(converter.cycles(17), 380);
        let converter = CycleConverter::new(nz(985_248), TapeMachine::C64_PAL.clock_hz());
        assert_eq!(converter.cycles(0x180), 0x180);
    }

    #[test]
    fn tap_writer_works() {
        let mut wr = TapWriter::try_new(Cursor::new(Vec::new()), TapeMachine::C64_NTSC).unwrap();
        assert_eq!(wr.write_cycles([nz(0x180), nz(0x210)].iter().copied()).unwrap(), 2);
        assert_eq!(wr.write_cycles(Some(nz(0x12345))).unwrap(), 4);
        let rate = nz(TapeMachine::C64_NTSC.clock_hz());
        assert_eq!(wr.write_pulses(Some(nz(0x2b0)), rate).unwrap(), 1);
        assert_eq!(wr.data_length(), 7);
        let bytes = wr.finish().unwrap().into_inner();
        assert_eq!(bytes.len(), TAP_HEADER_SIZE + 7);
        assert_eq!(&bytes[..16], b"C64-TAPE-RAW\x01\x00\x01\x00");
        assert_eq!(&bytes[16..20], &[7, 0, 0, 0]);
        let image = TapeImage::parse(&bytes).unwrap();
        assert_eq!(image.to_bytes().unwrap(), bytes);
        let mut written = Vec::new();
        image.write_to(&mut written).unwrap();
        assert_eq!(written, bytes);
        assert_eq!(image.pulses().map(NonZeroU32::get).collect::<Vec<_>>(),
                   vec![0x180, 0x210, 0x12345, 0x2b0]);
    }

    #[test]
    fn data_length_is_limited() {
        assert_eq!(data_length(0).unwrap(), 0);
        assert_eq!(data_length(u32::MAX as u64).unwrap(), u32::MAX);
        let err = data_length(u32::MAX as u64 + 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn image_from_pulses_is_accurate() {
        let rate = nz(44100);
        let machine = TapeMachine::VIC20_PAL;
        let converter = CycleConverter::new(rate, machine.clock_hz());
        let pulses: Vec<NonZeroU32> = (1..400).map(nz).collect();
        let image = TapeImage::from_pulses(pulses.iter().copied(), rate, machine);
        assert_eq!(image.machine, machine);
        let restored: Vec<u32> = image.pulses().map(NonZeroU32::get).collect();
        assert_eq!(restored.len(), pulses.len());
        for (pulse, cycles) in pulses.iter().zip(restored) {
            let exact = converter.cycles(pulse.get()) as i64;
            assert!((exact - cycles as i64).abs() <= CYCLES_PER_UNIT as i64 / 2, "{} {}", exact, cycles);
        }
    }
}
