/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    For the full copyright notice, see the lib.rs file.
*/
//! Recorded audio channels and pulse interval extraction.
use core::fmt;
use core::num::NonZeroU32;
use core::str::FromStr;

#[cfg(feature = "report")]
use serde::{Serialize, Deserialize};

mod edges;
pub mod sample;

pub use edges::*;
use sample::IntoSample;

/// Determines how the recorded waveform is interpreted.
///
/// The analog chain between the tape head and the sound card may flip the signal,
/// in which case falling edges become rising ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "report", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "report", serde(rename_all = "lowercase"))]
pub enum Polarity {
    /// The waveform is read as recorded.
    Normal,
    /// The waveform is negated before edge detection.
    Inverted
}

/// A single channel of recorded audio.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleChannel {
    sample_rate: NonZeroU32,
    samples: Box<[i16]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePolarityError;

impl Default for Polarity {
    fn default() -> Self {
        Polarity::Normal
    }
}

impl Polarity {
    /// Returns `true` if the waveform should be negated.
    pub fn is_inverted(self) -> bool {
        matches!(self, Polarity::Inverted)
    }
    /// Returns the sample value as seen with this polarity.
    #[inline]
    pub fn apply(self, sample: i16) -> i32 {
        match self {
            Polarity::Normal => sample as i32,
            Polarity::Inverted => -(sample as i32)
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Polarity::Normal => "normal",
            Polarity::Inverted => "inverted"
        })
    }
}

impl std::error::Error for ParsePolarityError {}

impl fmt::Display for ParsePolarityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unrecognized polarity, expected \"normal\" or \"inverted\"")
    }
}

impl FromStr for Polarity {
    type Err = ParsePolarityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("normal") {
            Ok(Polarity::Normal)
        }
        else if s.eq_ignore_ascii_case("inverted") || s.eq_ignore_ascii_case("invert") {
            Ok(Polarity::Inverted)
        }
        else {
            Err(ParsePolarityError)
        }
    }
}

impl SampleChannel {
    /// Creates a new channel from 16-bit samples.
    pub fn new(sample_rate: NonZeroU32, samples: Vec<i16>) -> Self {
        SampleChannel { sample_rate, samples: samples.into_boxed_slice() }
    }
    /// Creates a new channel converting samples of any supported format.
    pub fn from_samples<S, I>(sample_rate: NonZeroU32, samples: I) -> Self
        where S: IntoSample<i16>, I: IntoIterator<Item=S>
    {
        let samples: Vec<i16> = samples.into_iter().map(IntoSample::into_sample).collect();
        SampleChannel::new(sample_rate, samples)
    }
    /// Renders pulse intervals, given in samples, as a square wave.
    ///
    /// Each pulse starts with its low half and ends with its high half, so every falling edge
    /// lands exactly on a pulse boundary.
    pub fn from_pulses<I>(sample_rate: NonZeroU32, pulses: I, amplitude: i16) -> Self
        where I: IntoIterator<Item=NonZeroU32>
    {
        let amplitude = amplitude.saturating_abs();
        let mut samples = Vec::new();
        for pulse in pulses {
            let len = pulse.get() as usize;
            let low = len / 2;
            samples.extend(core::iter::repeat(-amplitude).take(low));
            samples.extend(core::iter::repeat(amplitude).take(len - low));
        }
        SampleChannel::new(sample_rate, samples)
    }
    /// Returns the sample rate in samples per second.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.get()
    }
    /// Returns a reference to the recorded samples.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }
    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    /// Returns `true` if there are no samples in this channel.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
    /// Returns the duration of the recording in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate.get() as f64
    }
    /// Returns an iterator of pulse intervals found in this channel.
    pub fn pulses(&self, polarity: Polarity, config: &ExtractConfig) -> PulseIter<'_> {
        PulseIter::new(&self.samples, self.sample_rate.get(), polarity, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polarity_works() {
        assert_eq!(Polarity::default(), Polarity::Normal);
        assert_eq!(Polarity::Inverted.apply(i16::MIN), 32768);
        assert_eq!(Polarity::Normal.apply(-5), -5);
        assert_eq!("Inverted".parse::<Polarity>(), Ok(Polarity::Inverted));
        assert_eq!("normal".parse::<Polarity>(), Ok(Polarity::Normal));
        assert_eq!("sideways".parse::<Polarity>(), Err(ParsePolarityError));
        assert_eq!(Polarity::Inverted.to_string(), "inverted");
    }

    #[test]
    fn square_wave_rendering_works() {
        let rate = NonZeroU32::new(44100).unwrap();
        let pulses = [3u32, 4].iter().map(|&n| NonZeroU32::new(n).unwrap());
        let channel = SampleChannel::from_pulses(rate, pulses, 1000);
        assert_eq!(channel.samples(), &[-1000, 1000, 1000, -1000, -1000, 1000, 1000]);
        assert_eq!(channel.len(), 7);
        assert_eq!(channel.sample_rate(), 44100);
        let channel = SampleChannel::from_samples(rate, vec![i8::MIN, 0, i8::MAX]);
        assert_eq!(channel.samples(), &[i16::MIN, 0, 0x7f00]);
    }
}
