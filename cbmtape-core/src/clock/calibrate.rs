/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    For the full copyright notice, see the lib.rs file.
*/
#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

#[cfg(feature = "report")]
use serde::{Serialize, Deserialize};

use super::*;

const SEED_MEDIUM_RATIO: f64 = 1.4;
const SEED_LONG_RATIO: f64 = 1.8;
const OUTLIER_FACTOR: f64 = 3.0;
const TONE_BAND: f64 = 0.2;

/// Clock calibration parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "report", derive(Serialize, Deserialize))]
pub struct CalibrationConfig {
    /// The number of pulses analysed at once.
    pub window: usize,
    /// The number of pulses classified with each calibration.
    pub stride: usize,
    /// The tolerance half-width as a fraction of the gap to the nearest neighbouring width.
    pub tolerance: f64,
    /// The limit of cluster refinement iterations.
    pub max_iterations: u32,
    /// The minimum number of pulses in each of the three clusters.
    pub min_cluster_pulses: usize,
    /// The maximum standard deviation of a cluster as a fraction of its tolerance half-width.
    ///
    /// Lengths spread uniformly over the whole tolerance window deviate by `1/√3` of it.
    pub max_spread: f64,
    /// The accepted range of the *medium* to *short* width ratio.
    pub medium_ratio: (f64, f64),
    /// The accepted range of the *long* to *short* width ratio.
    pub long_ratio: (f64, f64),
    /// The minimum share of the window a leader tone must hold.
    pub tone_share: f64,
    /// The maximum coefficient of variation of a leader tone.
    pub tone_cv: f64,
    /// The minimum share of the window the previous profile must classify to be kept
    /// when no new profile can be found.
    pub keep_share: f64,
}

/// Learns a [ClockProfile] from a window of pulse lengths.
///
/// Pulses outside `[median/3, 3·median]` are discarded, then three clusters are refined with
/// one-dimensional Lloyd iterations, seeded twice: assuming the median pulse is *short*, and
/// assuming it is *medium*. The more compact acceptable solution wins.
///
/// When no three-cluster solution exists but the window is dominated by a single tight cluster,
/// that cluster is taken as the *short* leader tone, and the remaining widths are extrapolated
/// from the previous profile's ratios (or the nominal ones).
///
/// Otherwise the previous profile is kept as long as it still classifies most of the window.
#[derive(Clone, Debug, Default)]
pub struct Calibrator {
    config: CalibrationConfig,
}

#[derive(Clone, Copy, Debug)]
struct Cluster {
    count: usize,
    mean: f64,
    std: f64,
}

#[derive(Clone, Copy, Debug)]
struct Fit {
    clusters: [Cluster; 3],
    score: f64,
}

/// Prefix sums of a sorted window, for constant time range statistics.
struct Moments {
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        CalibrationConfig {
            window: 1024,
            stride: 256,
            tolerance: 0.5,
            max_iterations: 16,
            min_cluster_pulses: 4,
            max_spread: 0.6,
            medium_ratio: (1.2, 1.65),
            long_ratio: (1.5, 2.2),
            tone_share: 0.6,
            tone_cv: 0.12,
            keep_share: 0.9,
        }
    }
}

impl CalibrationConfig {
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride.max(1);
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_min_cluster_pulses(mut self, min_cluster_pulses: usize) -> Self {
        self.min_cluster_pulses = min_cluster_pulses.max(1);
        self
    }

    pub fn with_max_spread(mut self, max_spread: f64) -> Self {
        self.max_spread = max_spread;
        self
    }

    pub fn with_tone(mut self, share: f64, cv: f64) -> Self {
        self.tone_share = share;
        self.tone_cv = cv;
        self
    }

    pub fn with_keep_share(mut self, keep_share: f64) -> Self {
        self.keep_share = keep_share;
        self
    }
}

impl Cluster {
    fn cv(&self) -> f64 {
        self.std / self.mean
    }
}

impl Moments {
    fn new(sorted: &[u32]) -> Self {
        let mut sum = Vec::with_capacity(sorted.len() + 1);
        let mut sum_sq = Vec::with_capacity(sorted.len() + 1);
        let (mut s, mut sq) = (0.0, 0.0);
        sum.push(s);
        sum_sq.push(sq);
        for &x in sorted {
            let x = x as f64;
            s += x;
            sq += x * x;
            sum.push(s);
            sum_sq.push(sq);
        }
        Moments { sum, sum_sq }
    }

    fn cluster(&self, start: usize, end: usize) -> Option<Cluster> {
        let count = end.checked_sub(start).filter(|&n| n != 0)?;
        let n = count as f64;
        let mean = (self.sum[end] - self.sum[start]) / n;
        let var = ((self.sum_sq[end] - self.sum_sq[start]) / n - mean * mean).max(0.0);
        Some(Cluster { count, mean, std: var.sqrt() })
    }
}

impl Calibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Calibrator { config }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }
    /// Attempts to calibrate a clock profile from a `window` of pulse lengths.
    ///
    /// `previous` is the last accepted profile. It is used to extrapolate a profile
    /// from a leader tone and is returned when the window has no clock of its own
    /// but the profile still fits it.
    ///
    /// Returns `None` when the window contains no usable clock.
    pub fn calibrate(&self, window: &[u32], previous: Option<&ClockProfile>) -> Option<ClockProfile> {
        if window.len() < 3 * self.config.min_cluster_pulses {
            return None
        }
        let mut sorted = window.to_vec();
        sorted.sort_unstable();
        let median = sorted[sorted.len() / 2] as f64;
        let lo = sorted.partition_point(|&x| (x as f64) < median / OUTLIER_FACTOR);
        let hi = sorted.partition_point(|&x| (x as f64) <= median * OUTLIER_FACTOR);
        let trimmed = &sorted[lo..hi];
        let moments = Moments::new(trimmed);

        let seeds = [
            [median, median * SEED_MEDIUM_RATIO, median * SEED_LONG_RATIO],
            [median / SEED_MEDIUM_RATIO, median, median * SEED_LONG_RATIO / SEED_MEDIUM_RATIO],
        ];
        let best = seeds.iter()
            .filter_map(|seed| self.refine(trimmed, &moments, *seed))
            .min_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(core::cmp::Ordering::Equal));

        if let Some(Fit { clusters: [s, m, l], .. }) = best {
            return ClockProfile::from_centers(s.mean, m.mean, l.mean,
                                              self.config.tolerance, ProfileSource::Clusters)
        }
        self.anchor_tone(trimmed, &moments, median, sorted.len(), previous)
            .or_else(|| previous.filter(|profile| self.fits(window, profile)).copied())
    }

    fn fits(&self, window: &[u32], profile: &ClockProfile) -> bool {
        let matching = window.iter().filter(|&&x| !profile.classify(x).is_invalid()).count();
        matching as f64 >= self.config.keep_share * window.len() as f64
    }

    fn refine(&self, sorted: &[u32], moments: &Moments, seed: [f64; 3]) -> Option<Fit> {
        let mut anchors = seed;
        let mut bounds = (usize::MAX, usize::MAX);
        let mut clusters = None;
        for _ in 0..self.config.max_iterations.max(1) {
            let b1 = sorted.partition_point(|&x| (x as f64) < (anchors[0] + anchors[1]) / 2.0);
            let b2 = sorted.partition_point(|&x| (x as f64) < (anchors[1] + anchors[2]) / 2.0);
            let found = [
                moments.cluster(0, b1)?,
                moments.cluster(b1, b2)?,
                moments.cluster(b2, sorted.len())?,
            ];
            clusters = Some(found);
            if (b1, b2) == bounds {
                break
            }
            bounds = (b1, b2);
            anchors = [found[0].mean, found[1].mean, found[2].mean];
        }
        let [s, m, l] = clusters?;
        let config = &self.config;
        if [s, m, l].iter().any(|c| c.count < config.min_cluster_pulses) {
            return None
        }
        let (medium_ratio, long_ratio) = (m.mean / s.mean, l.mean / s.mean);
        if medium_ratio < config.medium_ratio.0 || medium_ratio > config.medium_ratio.1
            || long_ratio < config.long_ratio.0 || long_ratio > config.long_ratio.1
        {
            return None
        }
        let low_gap = m.mean - s.mean;
        let high_gap = l.mean - m.mean;
        let gaps = [low_gap, low_gap.min(high_gap), high_gap];
        let mut score = 0.0;
        for (cluster, gap) in [s, m, l].iter().zip(gaps.iter()) {
            if !(*gap > 0.0) || cluster.std > config.max_spread * config.tolerance * gap {
                return None
            }
            score += cluster.std / gap;
        }
        Some(Fit { clusters: [s, m, l], score })
    }

    fn anchor_tone(
            &self,
            sorted: &[u32],
            moments: &Moments,
            median: f64,
            total: usize,
            previous: Option<&ClockProfile>
        ) -> Option<ClockProfile>
    {
        let lo = sorted.partition_point(|&x| (x as f64) < median * (1.0 - TONE_BAND));
        let hi = sorted.partition_point(|&x| (x as f64) <= median * (1.0 + TONE_BAND));
        let tone = moments.cluster(lo, hi)?;
        if (tone.count as f64) < self.config.tone_share * total as f64 || tone.cv() > self.config.tone_cv {
            return None
        }
        let (medium_ratio, long_ratio) = previous.map(ClockProfile::ratios)
                                        .unwrap_or((NOMINAL_MEDIUM_RATIO, NOMINAL_LONG_RATIO));
        ClockProfile::from_centers(tone.mean, tone.mean * medium_ratio, tone.mean * long_ratio,
                                   self.config.tolerance, ProfileSource::Tone)
    }
}
