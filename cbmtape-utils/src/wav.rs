/*
    Copyright (C) 2026  CBMTAPE developers

    This file is part of CBMTAPE, a Rust library for recovering Commodore cassette tapes.

    For the full copyright notice, see the lib.rs file.
*/
//! Reading tape recordings from WAV files.
use core::fmt;
use core::num::NonZeroU32;
use std::error::Error;
use std::io::Read;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec};
#[allow(unused_imports)]
use log::{error, warn, info, debug, trace};

use cbmtape::audio::SampleChannel;
use cbmtape::audio::sample::IntoSample;

/// An error returned when reading a WAV file.
#[derive(Debug)]
pub enum WavError {
    /// The file could not be read or is not a valid WAV container.
    Hound(hound::Error),
    /// The sample format is not supported.
    Unsupported { format: SampleFormat, bits_per_sample: u16 },
    /// The recording has no channels or no samples.
    Empty,
    /// The sample rate is zero.
    InvalidSampleRate,
}

impl Error for WavError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WavError::Hound(err) => Some(err),
            _ => None
        }
    }
}

impl fmt::Display for WavError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WavError::Hound(err) => write!(f, "can't read WAV: {}", err),
            WavError::Unsupported { format, bits_per_sample } => {
                let format = match format {
                    SampleFormat::Int => "integer",
                    SampleFormat::Float => "float",
                };
                write!(f, "unsupported WAV sample format: {}-bit {}", bits_per_sample, format)
            }
            WavError::Empty => f.write_str("WAV file contains no samples"),
            WavError::InvalidSampleRate => f.write_str("WAV file has an invalid sample rate"),
        }
    }
}

impl From<hound::Error> for WavError {
    fn from(err: hound::Error) -> Self {
        WavError::Hound(err)
    }
}

/// Reads all channels of the WAV file at `path`.
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<Vec<SampleChannel>, WavError> {
    let path = path.as_ref();
    debug!("reading: {}", path.display());
    read_wav_from(WavReader::open(path)?)
}

/// Reads all channels of a WAV stream.
pub fn read_from<R: Read>(rd: R) -> Result<Vec<SampleChannel>, WavError> {
    read_wav_from(WavReader::new(rd)?)
}

/// Reads all channels from an opened WAV reader, converting samples to 16-bit.
pub fn read_wav_from<R: Read>(mut reader: WavReader<R>) -> Result<Vec<SampleChannel>, WavError> {
    let WavSpec { channels, sample_rate, bits_per_sample, sample_format } = reader.spec();
    let sample_rate = NonZeroU32::new(sample_rate).ok_or(WavError::InvalidSampleRate)?;
    if channels == 0 {
        return Err(WavError::Empty)
    }
    info!("WAV: {} Hz, {} channel(s), {}-bit {:?}", sample_rate, channels, bits_per_sample, sample_format);
    let samples: Vec<i16> = match (sample_format, bits_per_sample) {
        (SampleFormat::Int, 8) => convert(reader.samples::<i8>(), |s| s)?,
        (SampleFormat::Int, 16) => convert(reader.samples::<i16>(), |s| s)?,
        (SampleFormat::Int, 24) => convert(reader.samples::<i32>(), |s| s << 8)?,
        (SampleFormat::Int, 32) => convert(reader.samples::<i32>(), |s| s)?,
        (SampleFormat::Float, 32) => convert(reader.samples::<f32>(), |s| s)?,
        (format, bits_per_sample) => return Err(WavError::Unsupported { format, bits_per_sample })
    };
    let channels = channels as usize;
    let frames = samples.len() / channels;
    if frames == 0 {
        return Err(WavError::Empty)
    }
    let recording = (0..channels).map(|channel| {
        let data = samples.iter().skip(channel).step_by(channels).take(frames).copied().collect();
        SampleChannel::new(sample_rate, data)
    }).collect();
    Ok(recording)
}

fn convert<S, T, I, F>(samples: I, map: F) -> Result<Vec<i16>, WavError>
    where I: Iterator<Item=hound::Result<S>>,
          F: Fn(S) -> T,
          T: IntoSample<i16>
{
    samples.map(|sample| Ok(map(sample?).into_sample())).collect()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use hound::WavWriter;
    use super::*;

    fn wav_bytes<S: hound::Sample + Copy>(spec: WavSpec, samples: &[S]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for &sample in samples {
                writer.write_sample(sample).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn spec(channels: u16, bits_per_sample: u16, sample_format: SampleFormat) -> WavSpec {
        WavSpec { channels, sample_rate: 44100, bits_per_sample, sample_format }
    }

    #[test]
    fn reads_16bit_stereo() {
        let samples: Vec<i16> = vec![0, 100, -200, 300, 32767, -32768, 5, 6];
        let bytes = wav_bytes(spec(2, 16, SampleFormat::Int), &samples);
        let channels = read_from(&bytes[..]).unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].sample_rate(), 44100);
        assert_eq!(channels[0].samples(), &[0, -200, 32767, 5]);
        assert_eq!(channels[1].samples(), &[100, 300, -32768, 6]);
    }

    #[test]
    fn converts_sample_formats() {
        let bytes = wav_bytes(spec(1, 8, SampleFormat::Int), &[0i8, 127, -128, 1]);
        let channels = read_from(&bytes[..]).unwrap();
        assert_eq!(channels[0].samples(), &[0, 127 << 8, -32768, 256]);

        let bytes = wav_bytes(spec(1, 24, SampleFormat::Int), &[0i32, 0x7f_ffff, -0x80_0000, 0x100]);
        let channels = read_from(&bytes[..]).unwrap();
        assert_eq!(channels[0].samples(), &[0, 32767, -32768, 1]);

        let bytes = wav_bytes(spec(1, 32, SampleFormat::Float), &[0.0f32, 0.5, -1.0, 2.0]);
        let channels = read_from(&bytes[..]).unwrap();
        let samples = channels[0].samples();
        assert_eq!(samples[0], 0);
        assert!((samples[1] - 16384).abs() <= 1);
        assert!(samples[2] <= -32767);
        assert_eq!(samples[3], 32767);
    }

    #[test]
    fn rejects_invalid_files() {
        assert!(matches!(read_from(&b"definitely not a RIFF file"[..]), Err(WavError::Hound(_))));
        assert!(matches!(read_from(&[][..]), Err(WavError::Hound(_))));
        let bytes = wav_bytes::<i16>(spec(1, 16, SampleFormat::Int), &[]);
        assert!(matches!(read_from(&bytes[..]), Err(WavError::Empty)));
        assert!(read_wav("/nonexistent/cbmtape/recording.wav").is_err());
    }
}
