/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    For the full copyright notice, see the lib.rs file.
*/
//! **C64-TAPE-RAW** tape image format utilities.
//!
//! A TAP image stores the lengths of the recorded pulses measured in machine clock cycles.
//!
//! | offset | size | content                                   |
//! |--------|------|-------------------------------------------|
//! | 0      | 12   | `"C64-TAPE-RAW"`                          |
//! | 12     | 1    | version: `0` or `1`                       |
//! | 13     | 1    | [Platform]: `0` C64, `1` VIC-20, `2` C16  |
//! | 14     | 1    | [VideoStandard]: `0` PAL, `1` NTSC        |
//! | 15     | 1    | reserved                                  |
//! | 16     | 4    | data length (little endian)               |
//!
//! Each data byte `n > 0` is a pulse of `n * 8` cycles. In version 1 the byte `0` is followed
//! by the exact pulse length in cycles as a 24-bit little endian number. In version 0 the
//! byte `0` denotes an overflow: a pulse longer than `255 * 8` cycles.
//!
//! * [TapeImage] is an in-memory image, parsed with [TapeImage::parse].
//! * [TapWriter] streams pulses into a seekable writer.
use core::fmt;
use core::str::FromStr;
use std::error::Error;
use std::io;

#[cfg(feature = "report")]
use serde::{Serialize, Deserialize};

mod read;
mod write;

pub use read::*;
pub use write::*;

pub mod consts {
    /// The signature at the start of each TAP image.
    pub const TAP_MAGIC: &[u8;12] = b"C64-TAPE-RAW";
    /// The size of the TAP image header.
    pub const TAP_HEADER_SIZE: usize = 20;
    /// The offset of the data length in the header.
    pub const TAP_LENGTH_OFFSET: usize = 16;
    /// The number of cycles represented by a unit of a single byte pulse.
    pub const CYCLES_PER_UNIT: u32 = 8;
    /// The longest pulse in cycles stored by a single version 1 escape sequence.
    pub const MAX_ESCAPE_CYCLES: u32 = 0xFF_FFFF;
    /// The pulse length in cycles assumed for the version 0 overflow byte.
    pub const OVERFLOW_CYCLES: u32 = 256 * CYCLES_PER_UNIT;
}

/// The machine the image was recorded for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "report", derive(Serialize, Deserialize))]
pub enum Platform {
    C64   = 0,
    Vic20 = 1,
    C16   = 2,
}

/// The video standard of the machine, which determines its clock rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "report", derive(Serialize, Deserialize))]
pub enum VideoStandard {
    Pal  = 0,
    Ntsc = 1,
}

/// The target machine of a TAP image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "report", derive(Serialize, Deserialize))]
pub struct TapeMachine {
    pub platform: Platform,
    pub video: VideoStandard,
}

/// The TAP image format version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "report", derive(Serialize, Deserialize))]
pub enum TapVersion {
    /// Long pulses are stored as a single overflow byte.
    V0 = 0,
    /// Long pulses are stored with their exact length.
    V1 = 1,
}

/// An error returned when parsing a TAP image.
#[derive(Debug)]
pub enum TapError {
    /// The image does not start with the `"C64-TAPE-RAW"` signature.
    BadMagic,
    /// The version byte is neither `0` nor `1`.
    UnsupportedVersion(u8),
    /// The platform or the video standard byte is not recognized.
    UnsupportedMachine { platform: u8, video: u8 },
    /// The image is shorter than its header declares.
    Truncated { expected: usize, found: usize },
    Io(io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMachineError;

impl Default for Platform {
    fn default() -> Self {
        Platform::C64
    }
}

impl Default for VideoStandard {
    fn default() -> Self {
        VideoStandard::Pal
    }
}

impl Default for TapVersion {
    fn default() -> Self {
        TapVersion::V1
    }
}

impl TapeMachine {
    pub const C64_PAL: TapeMachine = TapeMachine::new(Platform::C64, VideoStandard::Pal);
    pub const C64_NTSC: TapeMachine = TapeMachine::new(Platform::C64, VideoStandard::Ntsc);
    pub const VIC20_PAL: TapeMachine = TapeMachine::new(Platform::Vic20, VideoStandard::Pal);
    pub const VIC20_NTSC: TapeMachine = TapeMachine::new(Platform::Vic20, VideoStandard::Ntsc);
    pub const C16_PAL: TapeMachine = TapeMachine::new(Platform::C16, VideoStandard::Pal);
    pub const C16_NTSC: TapeMachine = TapeMachine::new(Platform::C16, VideoStandard::Ntsc);

    pub const fn new(platform: Platform, video: VideoStandard) -> Self {
        TapeMachine { platform, video }
    }
    /// Creates a machine from the platform and video standard bytes of a TAP header.
    pub fn from_header_bytes(platform: u8, video: u8) -> Option<Self> {
        let platform = match platform {
            0 => Platform::C64,
            1 => Platform::Vic20,
            2 => Platform::C16,
            _ => return None
        };
        let video = match video {
            0 => VideoStandard::Pal,
            1 => VideoStandard::Ntsc,
            _ => return None
        };
        Some(TapeMachine { platform, video })
    }
    /// Returns the CPU clock frequency in Hz.
    pub fn clock_hz(self) -> u32 {
        use Platform::*;
        use VideoStandard::*;
        match (self.platform, self.video) {
            (C64, Pal)    =>   985_248,
            (C64, Ntsc)   => 1_022_727,
            (Vic20, Pal)  => 1_108_405,
            (Vic20, Ntsc) => 1_022_727,
            (C16, Pal)    =>   886_724,
            (C16, Ntsc)   =>   894_886,
        }
    }
}

impl fmt::Display for TapeMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let platform = match self.platform {
            Platform::C64 => "c64",
            Platform::Vic20 => "vic20",
            Platform::C16 => "c16",
        };
        let video = match self.video {
            VideoStandard::Pal => "pal",
            VideoStandard::Ntsc => "ntsc",
        };
        write!(f, "{}-{}", platform, video)
    }
}

impl Error for ParseMachineError {}

impl fmt::Display for ParseMachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unrecognized machine, expected one of: \
                     c64-pal, c64-ntsc, vic20-pal, vic20-ntsc, c16-pal, c16-ntsc")
    }
}

impl FromStr for TapeMachine {
    type Err = ParseMachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_ascii_lowercase();
        let (platform, video) = s.split_once(|c| c == '-' || c == '_').ok_or(ParseMachineError)?;
        let platform = match platform {
            "c64" => Platform::C64,
            "vic20" => Platform::Vic20,
            "c16" => Platform::C16,
            _ => return Err(ParseMachineError)
        };
        let video = match video {
            "pal" => VideoStandard::Pal,
            "ntsc" => VideoStandard::Ntsc,
            _ => return Err(ParseMachineError)
        };
        Ok(TapeMachine { platform, video })
    }
}

impl Error for TapError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TapError::Io(err) => Some(err),
            _ => None
        }
    }
}

impl fmt::Display for TapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TapError::BadMagic => f.write_str("not a C64-TAPE-RAW image"),
            TapError::UnsupportedVersion(version) => write!(f, "unsupported TAP version: {}", version),
            TapError::UnsupportedMachine { platform, video } => {
                write!(f, "unsupported TAP machine: platform {}, video {}", platform, video)
            }
            TapError::Truncated { expected, found } => {
                write!(f, "TAP image truncated: expected {} data bytes, found {}", expected, found)
            }
            TapError::Io(err) => fmt::Display::fmt(err, f)
        }
    }
}

impl From<io::Error> for TapError {
    fn from(err: io::Error) -> Self {
        TapError::Io(err)
    }
}

impl From<TapError> for io::Error {
    fn from(err: TapError) -> Self {
        match err {
            TapError::Io(err) => err,
            TapError::Truncated {..} => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            err => io::Error::new(io::ErrorKind::InvalidData, err)
        }
    }
}

/// An in-memory TAP image.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TapeImage {
    pub version: TapVersion,
    pub machine: TapeMachine,
    /// The encoded pulse data following the header.
    pub data: Vec<u8>,
}

impl TapeImage {
    /// Creates an empty version 1 image.
    pub fn new(machine: TapeMachine) -> Self {
        TapeImage { version: TapVersion::V1, machine, data: Vec::new() }
    }
    /// Returns the size of the image file in bytes.
    pub fn file_size(&self) -> usize {
        consts::TAP_HEADER_SIZE + self.data.len()
    }
    /// Returns the total length of all pulses in cycles.
    pub fn duration_cycles(&self) -> u64 {
        self.pulses().map(|cycles| cycles.get() as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tape_machine_works() {
        assert_eq!(TapeMachine::default(), TapeMachine::C64_PAL);
        assert_eq!(TapeMachine::C64_PAL.clock_hz(), 985_248);
        assert_eq!(TapeMachine::C16_NTSC.clock_hz(), 894_886);
        for machine in [TapeMachine::C64_PAL, TapeMachine::C64_NTSC, TapeMachine::VIC20_PAL,
                        TapeMachine::VIC20_NTSC, TapeMachine::C16_PAL, TapeMachine::C16_NTSC].iter() {
            assert_eq!(machine.to_string().parse::<TapeMachine>().unwrap(), *machine);
            let (platform, video) = (machine.platform as u8, machine.video as u8);
            assert_eq!(TapeMachine::from_header_bytes(platform, video), Some(*machine));
        }
        assert_eq!("VIC20_NTSC".parse::<TapeMachine>(), Ok(TapeMachine::VIC20_NTSC));
        assert_eq!("c128-pal".parse::<TapeMachine>(), Err(ParseMachineError));
        assert_eq!("c64".parse::<TapeMachine>(), Err(ParseMachineError));
        assert_eq!(TapeMachine::from_header_bytes(3, 0), None);
        assert_eq!(TapeMachine::from_header_bytes(0, 2), None);
    }

    #[test]
    fn tap_error_works() {
        let err: io::Error = TapError::BadMagic.into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let err: io::Error = TapError::Truncated { expected: 10, found: 1 }.into();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(err.to_string(), "TAP image truncated: expected 10 data bytes, found 1");
        let err = TapError::from(io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(err.source().is_some());
        assert_eq!(TapError::UnsupportedVersion(7).to_string(), "unsupported TAP version: 7");
    }
}
