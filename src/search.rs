/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    For the full copyright notice, see the lib.rs file.
*/
//! Recovering files from multi-channel recordings.
//!
//! Each channel of a recording is decoded independently with each configured [Polarity].
//! Every such attempt is a [Candidate]. Candidates are compared by their [Score] and the files
//! and the TAP image of the best one are returned.
use core::fmt;
use core::num::NonZeroU32;
use core::str::FromStr;
use std::error::Error;
use std::panic;
use std::thread;

#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

#[cfg(feature = "report")]
use serde::{Serialize, Deserialize};

use crate::audio::{ExtractConfig, Polarity, SampleChannel};
use crate::clock::{CalibrationConfig, ClassifyExt, ClockProfile};
use crate::formats::kernal::{recover_files, FileAssembler, RecoveredFile};
use crate::formats::tap::{TapeImage, TapeMachine};

/// Selects waveform polarities to be tried on each channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "report", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "report", serde(rename_all = "lowercase"))]
pub enum PhaseSearch {
    Normal,
    Inverted,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePhaseSearchError;

/// Configuration of [search_recording].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchConfig {
    pub extract: ExtractConfig,
    pub calibration: CalibrationConfig,
    pub phases: PhaseSearch,
    /// Decodes candidates on separate threads.
    pub parallel: bool,
    /// Emits data blocks found without a header as files.
    pub keep_headerless: bool,
    /// The machine of the produced TAP image.
    pub machine: TapeMachine,
}

/// A channel decoded with the given polarity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "report", derive(Serialize, Deserialize))]
pub struct Candidate {
    pub channel: usize,
    pub polarity: Polarity,
}

/// The quality of a candidate. Scores are compared lexicographically, the greater one wins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "report", derive(Serialize, Deserialize))]
pub struct Score {
    /// The number of files recovered without errors.
    pub valid_files: usize,
    /// The number of damaged or truncated files plus headers without data.
    pub flawed_files: usize,
    /// The number of payload bytes in all decoded blocks.
    pub decoded_bytes: usize,
}

/// A summary of decoding a single candidate.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "report", derive(Serialize, Deserialize))]
pub struct CandidateReport {
    pub candidate: Candidate,
    pub score: Score,
    /// The number of pulses found.
    pub pulses: usize,
    /// The number of blocks decoded, both copies merged.
    pub blocks: usize,
    pub orphan_headers: usize,
    /// The number of successful clock calibrations.
    pub calibrations: usize,
    /// The number of failed clock calibrations.
    pub calibration_failures: usize,
    /// The clock profile at the end of the recording.
    pub profile: Option<ClockProfile>,
}

/// The outcome of [search_recording].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TapeSearch {
    /// Files recovered from the selected candidate.
    pub files: Vec<RecoveredFile>,
    /// The TAP image made from pulses of the selected candidate.
    pub image: Option<TapeImage>,
    /// The selected candidate, `None` if there were no channels.
    pub selected: Option<Candidate>,
    /// Reports of all candidates, in the order they were tried.
    pub reports: Vec<CandidateReport>,
}

impl Default for PhaseSearch {
    fn default() -> Self {
        PhaseSearch::Both
    }
}

impl PhaseSearch {
    /// Returns the polarities to try.
    pub fn polarities(self) -> &'static [Polarity] {
        match self {
            PhaseSearch::Normal => &[Polarity::Normal],
            PhaseSearch::Inverted => &[Polarity::Inverted],
            PhaseSearch::Both => &[Polarity::Normal, Polarity::Inverted],
        }
    }
}

impl fmt::Display for PhaseSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PhaseSearch::Normal => "normal",
            PhaseSearch::Inverted => "inverted",
            PhaseSearch::Both => "both",
        })
    }
}

impl Error for ParsePhaseSearchError {}

impl fmt::Display for ParsePhaseSearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unrecognized phase, expected \"normal\", \"inverted\" or \"both\"")
    }
}

impl FromStr for PhaseSearch {
    type Err = ParsePhaseSearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("both") {
            return Ok(PhaseSearch::Both)
        }
        match s.parse::<Polarity>() {
            Ok(Polarity::Normal) => Ok(PhaseSearch::Normal),
            Ok(Polarity::Inverted) => Ok(PhaseSearch::Inverted),
            Err(_) => Err(ParsePhaseSearchError)
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            extract: ExtractConfig::default(),
            calibration: CalibrationConfig::default(),
            phases: PhaseSearch::default(),
            parallel: true,
            keep_headerless: true,
            machine: TapeMachine::default()
        }
    }
}

impl SearchConfig {
    pub fn with_extract(mut self, extract: ExtractConfig) -> Self {
        self.extract = extract;
        self
    }

    pub fn with_calibration(mut self, calibration: CalibrationConfig) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn with_phases(mut self, phases: PhaseSearch) -> Self {
        self.phases = phases;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_headerless(mut self, keep_headerless: bool) -> Self {
        self.keep_headerless = keep_headerless;
        self
    }

    pub fn with_machine(mut self, machine: TapeMachine) -> Self {
        self.machine = machine;
        self
    }
    /// Returns candidates for the given number of channels, in the order they are tried.
    pub fn candidates(&self, channels: usize) -> Vec<Candidate> {
        (0..channels).flat_map(|channel| {
            self.phases.polarities().iter().map(move |&polarity| Candidate { channel, polarity })
        }).collect()
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {} ({})", self.channel, self.polarity)
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} valid, {} flawed, {} bytes", self.valid_files, self.flawed_files, self.decoded_bytes)
    }
}

struct Evaluation {
    report: CandidateReport,
    files: Vec<RecoveredFile>,
}

/// Decodes a single candidate.
fn evaluate(channel: &SampleChannel, candidate: Candidate, config: &SearchConfig) -> Evaluation {
    let mut pulses = 0;
    let mut classify = channel.pulses(candidate.polarity, &config.extract)
                              .inspect(|_| pulses += 1)
                              .classify(config.calibration);
    let assembler = FileAssembler::new()
                    .with_channel(candidate.channel, candidate.polarity)
                    .with_headerless(config.keep_headerless);
    let recovery = recover_files(classify.by_ref(), assembler);
    let (calibrations, calibration_failures) = (classify.calibrations(), classify.failures());
    let profile = classify.profile().copied();
    drop(classify);
    let valid_files = recovery.files.iter().filter(|file| file.is_valid()).count();
    let score = Score {
        valid_files,
        flawed_files: recovery.files.len() - valid_files + recovery.orphan_headers,
        decoded_bytes: recovery.decoded_bytes
    };
    debug!("{}: {}", candidate, score);
    let report = CandidateReport {
        candidate,
        score,
        pulses,
        blocks: recovery.blocks,
        orphan_headers: recovery.orphan_headers,
        calibrations,
        calibration_failures,
        profile
    };
    Evaluation { report, files: recovery.files }
}

fn evaluate_all(channels: &[SampleChannel], candidates: &[Candidate], config: &SearchConfig) -> Vec<Evaluation> {
    if !config.parallel || candidates.len() < 2 {
        return candidates.iter().map(|&candidate| {
            evaluate(&channels[candidate.channel], candidate, config)
        }).collect()
    }
    thread::scope(|scope| {
        let handles: Vec<_> = candidates.iter().map(|&candidate| {
            let channel = &channels[candidate.channel];
            scope.spawn(move || evaluate(channel, candidate, config))
        }).collect();
        handles.into_iter().map(|handle| {
            handle.join().unwrap_or_else(|err| panic::resume_unwind(err))
        }).collect()
    })
}

/// Recovers files from a recording, trying every channel with the configured polarities.
///
/// The candidate with the greatest [Score] is selected; on a tie the earliest one wins.
/// With a single candidate no comparison is made. The returned TAP image is made from pulses
/// of the selected candidate, regardless of whether anything could be decoded.
pub fn search_recording(channels: &[SampleChannel], config: &SearchConfig) -> TapeSearch {
    let candidates = config.candidates(channels.len());
    if candidates.is_empty() {
        warn!("no channels to search");
        return TapeSearch::default()
    }
    let evaluations = evaluate_all(channels, &candidates, config);
    let mut best = 0;
    if evaluations.len() > 1 {
        for (index, evaluation) in evaluations.iter().enumerate().skip(1) {
            if evaluation.report.score > evaluations[best].report.score {
                best = index;
            }
        }
    }
    let mut reports = Vec::with_capacity(evaluations.len());
    let mut files = Vec::new();
    for (index, evaluation) in evaluations.into_iter().enumerate() {
        if index == best {
            files = evaluation.files;
        }
        reports.push(evaluation.report);
    }
    let selected = reports[best].candidate;
    info!("selected {}: {}", selected, reports[best].score);
    let channel = &channels[selected.channel];
    let image = NonZeroU32::new(channel.sample_rate()).map(|sample_rate| {
        TapeImage::from_pulses(channel.pulses(selected.polarity, &config.extract), sample_rate, config.machine)
    });
    TapeSearch { files, image, selected: Some(selected), reports }
}
