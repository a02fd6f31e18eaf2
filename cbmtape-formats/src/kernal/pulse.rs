/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    For the full copyright notice, see the lib.rs file.
*/
//! **KERNAL** tape pulse signal encoding and decoding.
//!
//! Every bit is a pair of pulses: `(short, medium)` encodes `0` and `(medium, short)` encodes `1`.
//! A byte is a *new data* marker `(long, medium)` followed by eight data bits, least significant
//! first, and a check bit making the number of ones odd. The last byte of a block copy is
//! followed by the *end of data* marker `(long, short)`.
#![warn(unused_imports)]

mod decoding;
mod encoding;

pub mod consts {
    use core::num::NonZeroU32;
    /// Nominal length of the *short* pulse in C64 CPU cycles.
    pub const SHORT_PULSE_LENGTH : NonZeroU32 = unsafe { NonZeroU32::new_unchecked(0x30 * 8) };
    /// Nominal length of the *medium* pulse in C64 CPU cycles.
    pub const MEDIUM_PULSE_LENGTH: NonZeroU32 = unsafe { NonZeroU32::new_unchecked(0x42 * 8) };
    /// Nominal length of the *long* pulse in C64 CPU cycles.
    pub const LONG_PULSE_LENGTH  : NonZeroU32 = unsafe { NonZeroU32::new_unchecked(0x56 * 8) };

    /// The number of leader pulses before a header block.
    pub const LEADER_PULSES_HEAD: u32 = 0x6A00;
    /// The number of leader pulses before a data block.
    pub const LEADER_PULSES_DATA: u32 = 0x1A00;
    /// The number of *short* pulses between the first and the repeated block copy.
    pub const INTER_COPY_PULSES: u32 = 0x4F;
    /// The number of *short* pulses after the repeated block copy.
    pub const TRAILER_PULSES: u32 = 0x4E;

    /// The minimum number of consecutive *short* pulses recognized as a leader.
    pub const MIN_SYNC_PULSES: u32 = 32;
}

pub use decoding::*;
pub use encoding::*;
