/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    For the full copyright notice, see the lib.rs file.
*/
//! Three-tier pulse clock calibration and pulse classification.
//!
//! Commodore tapes encode everything with three pulse widths: *short*, *medium* and *long*.
//! The absolute widths depend on the recording machine and the playback speed, so they
//! are learned from the recording itself by the [Calibrator] and applied by the
//! [Classify] iterator adapter.
use core::fmt;
use core::num::NonZeroU32;

#[cfg(feature = "report")]
use serde::{Serialize, Deserialize};

mod calibrate;
mod classify;

pub use calibrate::*;
pub use classify::*;

/// The nominal ratio of the *medium* to the *short* pulse width.
pub const NOMINAL_MEDIUM_RATIO: f64 = 66.0 / 48.0;
/// The nominal ratio of the *long* to the *short* pulse width.
pub const NOMINAL_LONG_RATIO: f64 = 86.0 / 48.0;

/// The class of a pulse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "report", derive(Serialize, Deserialize))]
pub enum PulseClass {
    Short,
    Medium,
    Long,
    /// The pulse fits none of the calibrated tolerance windows.
    Invalid
}

/// A pulse with its class and position in the recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClassifiedPulse {
    /// The length of the pulse in samples.
    pub length: NonZeroU32,
    /// The sample offset at which the pulse starts.
    pub offset: u64,
    pub class: PulseClass,
}

/// How a [ClockProfile] was established.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "report", derive(Serialize, Deserialize))]
pub enum ProfileSource {
    /// All three pulse clusters were found and measured.
    Clusters,
    /// Only the *short* pulse leader tone was measured, other widths were extrapolated.
    Tone
}

/// A calibrated pulse width with its tolerance.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "report", derive(Serialize, Deserialize))]
pub struct Anchor {
    /// The expected pulse width in samples.
    pub center: f64,
    /// The symmetric half-width of the acceptance window in samples.
    pub tolerance: f64,
}

/// The calibrated pulse widths of the three-tier tape clock.
///
/// Invariant: `short < medium < long` and tolerance windows never overlap.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "report", derive(Serialize, Deserialize))]
pub struct ClockProfile {
    pub short: Anchor,
    pub medium: Anchor,
    pub long: Anchor,
    pub source: ProfileSource,
}

impl PulseClass {
    pub fn is_short(self) -> bool {
        self == PulseClass::Short
    }

    pub fn is_medium(self) -> bool {
        self == PulseClass::Medium
    }

    pub fn is_long(self) -> bool {
        self == PulseClass::Long
    }

    pub fn is_invalid(self) -> bool {
        self == PulseClass::Invalid
    }
}

impl fmt::Display for PulseClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PulseClass::Short => "S",
            PulseClass::Medium => "M",
            PulseClass::Long => "L",
            PulseClass::Invalid => "?"
        })
    }
}

impl ClassifiedPulse {
    /// Returns the sample offset just past the end of the pulse.
    pub fn end(&self) -> u64 {
        self.offset + self.length.get() as u64
    }
}

impl Anchor {
    #[inline]
    pub fn contains(&self, length: f64) -> bool {
        (length - self.center).abs() <= self.tolerance
    }
}

impl ClockProfile {
    /// Creates a profile from the three expected pulse widths.
    ///
    /// Each tolerance half-width is `tolerance` times the distance to the nearest neighbouring
    /// width. `tolerance` is clamped to `(0, 0.5]` to keep the windows apart.
    ///
    /// Returns `None` if the widths are not strictly increasing and positive.
    pub fn from_centers(
            short: f64,
            medium: f64,
            long: f64,
            tolerance: f64,
            source: ProfileSource
        ) -> Option<Self>
    {
        if !(short > 0.0 && short < medium && medium < long) || !long.is_finite() {
            return None
        }
        let tolerance = tolerance.min(0.5);
        if !(tolerance > 0.0) {
            return None
        }
        let low_gap = medium - short;
        let high_gap = long - medium;
        Some(ClockProfile {
            short: Anchor { center: short, tolerance: tolerance * low_gap },
            medium: Anchor { center: medium, tolerance: tolerance * low_gap.min(high_gap) },
            long: Anchor { center: long, tolerance: tolerance * high_gap },
            source
        })
    }
    /// Returns the class of a pulse of the given length in samples.
    pub fn classify(&self, length: u32) -> PulseClass {
        let length = length as f64;
        if self.short.contains(length) {
            PulseClass::Short
        }
        else if self.medium.contains(length) {
            PulseClass::Medium
        }
        else if self.long.contains(length) {
            PulseClass::Long
        }
        else {
            PulseClass::Invalid
        }
    }
    /// Returns ratios of the *medium* and *long* widths to the *short* width.
    pub fn ratios(&self) -> (f64, f64) {
        (self.medium.center / self.short.center, self.long.center / self.short.center)
    }
    /// Returns `true` if the widths of `other` differ by more than `fraction` from this profile.
    pub fn differs_from(&self, other: &ClockProfile, fraction: f64) -> bool {
        [(self.short, other.short), (self.medium, other.medium), (self.long, other.long)]
            .iter()
            .any(|(a, b)| (a.center - b.center).abs() > a.center * fraction)
    }
}

impl fmt::Display for ClockProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S={:.1}±{:.1} M={:.1}±{:.1} L={:.1}±{:.1}",
            self.short.center, self.short.tolerance,
            self.medium.center, self.medium.tolerance,
            self.long.center, self.long.tolerance)
    }
}
