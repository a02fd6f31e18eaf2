/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    For the full copyright notice, see the lib.rs file.
*/
//! Conversions of PCM sample formats.
//!
//! Recordings are analysed as 16-bit signed samples. Containers carrying other formats
//! are converted with [FromSample] / [IntoSample].

/// For converting samples between types.
pub trait FromSample<S> {
    /// Converts to Self a sample from the `other`.
    fn from_sample(other: S) -> Self;
}

/// For converting samples between types.
pub trait IntoSample<S> {
    /// Convert to `S` a sample type from `self`.
    fn into_sample(self) -> S;
}

impl<S: FromSample<T>, T> IntoSample<S> for T {
    #[inline]
    fn into_sample(self) -> S {
        S::from_sample(self)
    }
}

impl FromSample<i16> for i16 {
    #[inline(always)]
    fn from_sample(other: i16) -> i16 {
        other
    }
}

macro_rules! impl_widen_sample {
    ($from:ty => $to:ty, $shift:expr) => {
        impl FromSample<$from> for $to {
            #[inline]
            fn from_sample(other: $from) -> $to {
                (other as $to) << $shift
            }
        }
    };
}

macro_rules! impl_narrow_sample {
    ($from:ty => $to:ty, $shift:expr) => {
        impl FromSample<$from> for $to {
            #[inline]
            fn from_sample(other: $from) -> $to {
                (other >> $shift) as $to
            }
        }
    };
}

impl_widen_sample!(i8 => i16, 8);
impl_narrow_sample!(i32 => i16, 16);

impl FromSample<f32> for i16 {
    #[inline]
    fn from_sample(other: f32) -> i16 {
        let other = other.max(-1.0).min(1.0);
        if other >= 0.0 {
            (other * i16::MAX as f32) as i16
        } else {
            (-other * i16::MIN as f32) as i16
        }
    }
}
