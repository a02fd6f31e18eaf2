/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    CBMTAPE is free software: you can redistribute it and/or modify it under
    the terms of the GNU Lesser General Public License (LGPL) as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    CBMTAPE is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Lesser General Public License for more details.

    You should have received a copy of the GNU Lesser General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.

    Author contact information: see Cargo.toml file, section [package.authors].
*/
//! CBMTAPE recovers files from audio recordings of Commodore cassette tapes written by
//! the KERNAL tape routines and converts recordings to **C64-TAPE-RAW** images.
//!
//! The recovery runs in stages:
//!
//! * [audio] finds pulse intervals between falling edges of a recorded channel.
//! * [clock] calibrates the pulse widths on the fly and classifies pulses.
//! * [formats] decodes bytes, blocks and files, and serializes [TAP][formats::tap] images.
//! * [search] runs the above for every channel and polarity of a recording and picks the best.
pub use cbmtape_core::audio;
pub use cbmtape_core::clock;

#[cfg(feature = "formats")]
pub use cbmtape_formats as formats;

#[cfg(feature = "formats")]
pub mod search;
