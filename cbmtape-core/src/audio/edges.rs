/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    For the full copyright notice, see the lib.rs file.
*/
use core::num::NonZeroU32;

#[cfg(feature = "report")]
use serde::{Serialize, Deserialize};

use super::Polarity;

/// Pulse extraction parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "report", derive(Serialize, Deserialize))]
pub struct ExtractConfig {
    /// The hysteresis band as a fraction of the peak amplitude.
    pub threshold: f64,
    /// The narrowest hysteresis band in sample amplitude units.
    ///
    /// Keeps dither and hiss of a silent channel from registering edges.
    pub min_band: f64,
    /// The time constant of the running center level in milliseconds.
    ///
    /// The center level starts at the channel's mean value. `0.0` keeps it there.
    pub center_ms: f64,
    /// The fraction of absolute sample amplitudes lying below the peak amplitude.
    pub peak_percentile: f64,
}

/// An iterator of pulse intervals measured in samples between consecutive falling edges.
///
/// Created by [SampleChannel::pulses][super::SampleChannel::pulses].
///
/// The first pulse spans from the beginning of the channel to the first edge and the last one
/// from the last edge to the end of the channel, so the sum of all pulses equals the
/// channel's length. A channel without any edges yields nothing.
#[derive(Clone, Debug)]
pub struct PulseIter<'a> {
    samples: &'a [i16],
    polarity: Polarity,
    cursor: usize,
    last_edge: usize,
    center: f64,
    alpha: f64,
    band: f64,
    armed: bool,
    edges: usize,
    done: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        ExtractConfig {
            threshold: 0.15,
            min_band: 16.0,
            center_ms: 20.0,
            peak_percentile: 0.999
        }
    }
}

impl ExtractConfig {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_min_band(mut self, min_band: f64) -> Self {
        self.min_band = min_band;
        self
    }

    pub fn with_center_ms(mut self, center_ms: f64) -> Self {
        self.center_ms = center_ms;
        self
    }

    pub fn with_peak_percentile(mut self, peak_percentile: f64) -> Self {
        self.peak_percentile = peak_percentile;
        self
    }
}

/// Returns the amplitude below which `percentile` of absolute sample values lie.
///
/// Using a high percentile instead of the maximum prevents a single click from
/// desensitizing the whole channel.
pub fn peak_amplitude(samples: &[i16], percentile: f64) -> u32 {
    if samples.is_empty() {
        return 0
    }
    let mut histogram = vec![0u32; 32769];
    for &sample in samples {
        histogram[(sample as i32).unsigned_abs() as usize] += 1;
    }
    let percentile = percentile.max(0.0).min(1.0);
    let target = ((samples.len() as f64 * percentile).ceil() as u64).max(1);
    let mut total = 0u64;
    for (level, &count) in histogram.iter().enumerate() {
        total += count as u64;
        if total >= target {
            return level as u32
        }
    }
    32768
}

impl<'a> PulseIter<'a> {
    pub(super) fn new(
            samples: &'a [i16],
            sample_rate: u32,
            polarity: Polarity,
            config: &ExtractConfig
        ) -> Self
    {
        let peak = peak_amplitude(samples, config.peak_percentile);
        let band = (peak as f64 * config.threshold).max(config.min_band).max(1.0);
        let center = if samples.is_empty() {
            0.0
        }
        else {
            let sum: i64 = samples.iter().map(|&s| polarity.apply(s) as i64).sum();
            sum as f64 / samples.len() as f64
        };
        let span = config.center_ms * sample_rate as f64 / 1000.0;
        let alpha = if span >= 1.0 { 1.0 / span } else { 0.0 };
        PulseIter {
            samples, polarity, center, alpha, band,
            cursor: 0,
            last_edge: 0,
            armed: false,
            edges: 0,
            done: false
        }
    }
    /// Returns the number of falling edges found so far.
    pub fn edges(&self) -> usize {
        self.edges
    }
    /// Returns the current sample position of the detector.
    pub fn position(&self) -> usize {
        self.cursor
    }
    /// Returns the hysteresis band in sample amplitude units.
    pub fn band(&self) -> f64 {
        self.band
    }
}

impl<'a> Iterator for PulseIter<'a> {
    type Item = NonZeroU32;

    fn next(&mut self) -> Option<NonZeroU32> {
        if self.done {
            return None
        }
        while let Some(&sample) = self.samples.get(self.cursor) {
            let index = self.cursor;
            self.cursor += 1;
            let level = self.polarity.apply(sample) as f64;
            let center = self.center;
            self.center += (level - center) * self.alpha;
            if self.armed {
                if level < center {
                    self.armed = false;
                    self.edges += 1;
                    let length = index - self.last_edge;
                    self.last_edge = index;
                    if let Some(pulse) = NonZeroU32::new(length as u32) {
                        return Some(pulse)
                    }
                }
            }
            else if level - center > self.band {
                self.armed = true;
            }
        }
        self.done = true;
        if self.edges == 0 {
            return None
        }
        NonZeroU32::new((self.samples.len() - self.last_edge) as u32)
    }
}
