/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    For the full copyright notice, see the lib.rs file.
*/
use core::num::NonZeroU32;
use std::collections::VecDeque;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

use super::{Calibrator, CalibrationConfig, ClassifiedPulse, ClockProfile, PulseClass};

/// Relative change of pulse widths worth reporting in the log.
const PROFILE_LOG_DRIFT: f64 = 0.05;

/// An iterator adapter classifying pulse intervals with a continuously recalibrated clock.
///
/// Pulses are processed in segments of [CalibrationConfig::stride] pulses. Each segment is
/// classified with the profile calibrated over the trailing [CalibrationConfig::window] pulses
/// ending with that segment, so the classifier follows slow speed drift of the recording.
/// When calibration fails all pulses of a segment are classified as [PulseClass::Invalid].
#[derive(Clone, Debug)]
pub struct Classify<I> {
    iter: I,
    calibrator: Calibrator,
    history: VecDeque<u32>,
    segment: Vec<(NonZeroU32, u64)>,
    ready: VecDeque<ClassifiedPulse>,
    profile: Option<ClockProfile>,
    offset: u64,
    calibrations: usize,
    failures: usize,
}

/// Extends pulse iterators with the [ClassifyExt::classify] method.
pub trait ClassifyExt: Iterator<Item=NonZeroU32> + Sized {
    /// Returns an iterator adapter classifying pulses with the clock calibrated on the fly.
    fn classify(self, config: CalibrationConfig) -> Classify<Self> {
        Classify::new(self, config)
    }
}

impl<I: Iterator<Item=NonZeroU32>> ClassifyExt for I {}

impl<I> Classify<I> {
    /// Returns the most recently calibrated profile.
    pub fn profile(&self) -> Option<&ClockProfile> {
        self.profile.as_ref()
    }
    /// Returns the number of segment calibrations performed so far.
    pub fn calibrations(&self) -> usize {
        self.calibrations
    }
    /// Returns the number of failed segment calibrations.
    pub fn failures(&self) -> usize {
        self.failures
    }
    /// Returns the underlying pulse iterator.
    pub fn into_inner(self) -> I {
        self.iter
    }
}

impl<I: Iterator<Item=NonZeroU32>> Classify<I> {
    pub fn new(iter: I, config: CalibrationConfig) -> Self {
        let stride = config.stride.max(1);
        Classify {
            iter,
            calibrator: Calibrator::new(config),
            history: VecDeque::with_capacity(config.window.max(stride)),
            segment: Vec::with_capacity(stride),
            ready: VecDeque::with_capacity(stride),
            profile: None,
            offset: 0,
            calibrations: 0,
            failures: 0
        }
    }

    fn fill_segment(&mut self) -> bool {
        let config = *self.calibrator.config();
        let window = config.window.max(config.stride);
        while self.segment.len() < config.stride {
            match self.iter.next() {
                Some(pulse) => {
                    if self.history.len() == window {
                        self.history.pop_front();
                    }
                    self.history.push_back(pulse.get());
                    self.segment.push((pulse, self.offset));
                    self.offset += pulse.get() as u64;
                }
                None => break
            }
        }
        !self.segment.is_empty()
    }

    fn calibrate_segment(&mut self) {
        let previous = self.profile;
        let profile = self.calibrator.calibrate(self.history.make_contiguous(), previous.as_ref());
        self.calibrations += 1;
        match (&previous, &profile) {
            (_, None) => {
                self.failures += 1;
                if previous.is_some() {
                    debug!("clock lost at sample {}", self.segment[0].1);
                }
            }
            (None, Some(p)) => {
                debug!("clock found at sample {}: {} ({:?})", self.segment[0].1, p, p.source);
            }
            (Some(prev), Some(p)) => {
                if prev.source != p.source || prev.differs_from(p, PROFILE_LOG_DRIFT) {
                    debug!("clock changed at sample {}: {} ({:?})", self.segment[0].1, p, p.source);
                }
                else {
                    trace!("clock at sample {}: {}", self.segment[0].1, p);
                }
            }
        }
        if profile.is_some() {
            self.profile = profile;
        }
        let current = profile;
        self.ready.extend(self.segment.drain(..).map(|(length, offset)| {
            let class = match current {
                Some(ref p) => p.classify(length.get()),
                None => PulseClass::Invalid
            };
            ClassifiedPulse { length, offset, class }
        }));
    }
}

impl<I: Iterator<Item=NonZeroU32>> Iterator for Classify<I> {
    type Item = ClassifiedPulse;

    fn next(&mut self) -> Option<ClassifiedPulse> {
        if let Some(pulse) = self.ready.pop_front() {
            return Some(pulse)
        }
        if !self.fill_segment() {
            return None
        }
        self.calibrate_segment();
        self.ready.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ProfileSource;

    fn pulses(lengths: &[u32]) -> impl Iterator<Item=NonZeroU32> + '_ {
        lengths.iter().map(|&n| NonZeroU32::new(n).unwrap())
    }

    fn data_pattern(scale: f64, count: usize) -> Vec<u32> {
        (0..count).map(|i| {
            let base = match i % 20 {
                0 => 67.0,
                1..=9 => 37.0,
                _ => 51.0
            };
            (base * scale).round() as u32
        }).collect()
    }

    #[test]
    fn classify_follows_drift() {
        // speed slowly drifting by 20% over the recording
        let count = 20_000;
        let lengths: Vec<u32> = (0..count).map(|i| {
            let scale = 1.0 + 0.2 * i as f64 / count as f64;
            let base = match i % 20 {
                0 => 67.0,
                1..=9 => 37.0,
                _ => 51.0
            };
            (base * scale).round() as u32
        }).collect();
        let mut classify = pulses(&lengths).classify(CalibrationConfig::default());
        let mut offset = 0u64;
        for (i, pulse) in classify.by_ref().enumerate() {
            let expected = match i % 20 {
                0 => PulseClass::Long,
                1..=9 => PulseClass::Short,
                _ => PulseClass::Medium,
            };
            assert_eq!(pulse.class, expected, "pulse {}", i);
            assert_eq!(pulse.offset, offset);
            offset = pulse.end();
        }
        assert_eq!(classify.failures(), 0);
        assert_eq!(classify.calibrations(), (count + 255) / 256);
        let profile = classify.profile().unwrap();
        assert!((profile.short.center - 44.4).abs() < 1.0);
    }

    #[test]
    fn classify_survives_garbage() {
        let mut lengths = data_pattern(1.0, 2048);
        // a stretch of pulses without any clock
        lengths.extend((0..1024u32).map(|i| 5 + (i * 7919) % 200));
        lengths.extend(data_pattern(1.0, 2048));
        let classified: Vec<ClassifiedPulse> = pulses(&lengths)
            .classify(CalibrationConfig::default())
            .collect();
        assert_eq!(classified.len(), lengths.len());
        assert!(classified[..2048].iter().all(|p| !p.class.is_invalid()));
        assert!(classified[2048..3072].iter().any(|p| p.class.is_invalid()));
        // the clock is recovered once the window holds clean data again
        let tail = &classified[classified.len() - 512..];
        assert!(tail.iter().all(|p| !p.class.is_invalid()));
    }

    #[test]
    fn classify_leader_tone() {
        let mut lengths = vec![37u32; 3000];
        lengths.extend(data_pattern(1.0, 400));
        let mut classify = pulses(&lengths).classify(CalibrationConfig::default());
        let classified: Vec<ClassifiedPulse> = classify.by_ref().collect();
        assert!(classified[..3000].iter().all(|p| p.class.is_short()));
        assert_eq!(classified[3000].class, PulseClass::Long);
        assert_eq!(classified[3010].class, PulseClass::Medium);
        assert_eq!(classify.profile().map(|p| p.source), Some(ProfileSource::Clusters));
    }

    #[test]
    fn classify_empty() {
        let mut classify = pulses(&[]).classify(CalibrationConfig::default());
        assert!(classify.next().is_none());
        assert_eq!(classify.calibrations(), 0);
    }
}
