//! WAV decoding for source samples
//!
//! Integer files are scaled by `2^(bits - 1)` into `-1.0..1.0`; float files
//! are read as is. Channels are deinterleaved so analysis and playback can
//! pick what they need. [`resample`] converts a channel to the rate the
//! synth runs at, since grains read the source one sample per output sample.
//!
//! ```no_run
//! use grainbow::sample_loader::load_wav;
//!
//! let buffer = load_wav("voice.wav").unwrap();
//! let mono = buffer.mono();
//! println!("{} frames at {} Hz", mono.len(), buffer.sample_rate);
//! ```

use crate::error::{GrainError, GrainResult};
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use std::path::Path;
use tracing::debug;

const RESAMPLE_CHUNK: usize = 1024;

/// Decoded audio, one vector per channel
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleBuffer {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl SampleBuffer {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self { channels, sample_rate }
    }

    pub fn mono_buffer(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Frames in the shortest channel
    pub fn len(&self) -> usize {
        self.channels.iter().map(Vec::len).min().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn duration_seconds(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f32 / self.sample_rate as f32
    }

    /// Channel average
    pub fn mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => {
                let scale = 1.0 / n as f32;
                (0..self.len())
                    .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() * scale)
                    .collect()
            }
        }
    }
}

/// Decode a WAV file
pub fn load_wav<P: AsRef<Path>>(path: P) -> GrainResult<SampleBuffer> {
    let path = path.as_ref();
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(GrainError::EmptySample);
    }

    let raw: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<_, _>>()?
        }
    };

    let num_channels = spec.channels as usize;
    let mut channels = vec![Vec::with_capacity(raw.len() / num_channels); num_channels];
    for frame in raw.chunks_exact(num_channels) {
        for (channel, &sample) in channels.iter_mut().zip(frame) {
            channel.push(sample);
        }
    }

    debug!(
        "Loaded {}: {} channels, {} frames at {} Hz",
        path.display(),
        num_channels,
        channels[0].len(),
        spec.sample_rate
    );
    Ok(SampleBuffer::new(channels, spec.sample_rate))
}

/// Convert one channel from `from_rate` to `to_rate`
///
/// The output has `len * to_rate / from_rate` frames (rounded) and is
/// aligned with the input: the resampler's delay is trimmed off.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> GrainResult<Vec<f32>> {
    if from_rate == 0 {
        return Err(GrainError::InvalidSampleRate(from_rate as f32));
    }
    if to_rate == 0 {
        return Err(GrainError::InvalidSampleRate(to_rate as f32));
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| GrainError::Resample(e.to_string()))?;

    let expected = (samples.len() as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

    let mut chunks = samples.chunks_exact(RESAMPLE_CHUNK);
    for chunk in &mut chunks {
        let input = [chunk];
        let frames = resampler
            .process(&input[..], None)
            .map_err(|e| GrainError::Resample(e.to_string()))?;
        out.extend_from_slice(&frames[0]);
    }
    let tail = chunks.remainder();
    if !tail.is_empty() {
        let input = [tail];
        let frames = resampler
            .process_partial(Some(&input[..]), None)
            .map_err(|e| GrainError::Resample(e.to_string()))?;
        out.extend_from_slice(&frames[0]);
    }
    // Flush what is still inside the filter
    while out.len() < expected + delay {
        let flush: Option<&[&[f32]]> = None;
        let frames = resampler
            .process_partial(flush, None)
            .map_err(|e| GrainError::Resample(e.to_string()))?;
        if frames[0].is_empty() {
            break;
        }
        out.extend_from_slice(&frames[0]);
    }

    out.drain(..delay.min(out.len()));
    out.truncate(expected);
    debug!("Resampled {} frames at {} Hz to {} at {} Hz", samples.len(), from_rate, out.len(), to_rate);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    /// Upward zero crossings, roughly the number of cycles
    fn cycles(samples: &[f32]) -> usize {
        samples.windows(2).filter(|w| w[0] < 0.0 && w[1] >= 0.0).count()
    }

    #[test]
    fn test_resample_keeps_pitch_and_duration() {
        let input: Vec<f32> = (0..44100)
            .map(|i| 0.8 * (2.0 * PI * 441.0 * i as f32 / 44100.0).sin())
            .collect();
        let output = resample(&input, 44100, 48000).unwrap();
        assert_eq!(output.len(), 48000);
        let found = cycles(&output);
        assert!((439..=442).contains(&found), "{} cycles", found);

        // Middle of the buffer matches the analytic sine at the new rate
        for i in (20_000..20_100).step_by(7) {
            let expected = 0.8 * (2.0 * PI * 441.0 * i as f32 / 48000.0).sin();
            assert!((output[i] - expected).abs() < 0.05, "frame {}: {} vs {}", i, output[i], expected);
        }

        let back = resample(&output, 48000, 44100).unwrap();
        assert_eq!(back.len(), 44100);
    }

    #[test]
    fn test_resample_same_rate_is_copy() {
        let input = vec![0.1, -0.2, 0.3];
        assert_eq!(resample(&input, 22050, 22050).unwrap(), input);
        assert!(matches!(resample(&input, 0, 44100), Err(GrainError::InvalidSampleRate(_))));
    }

    fn write_int_wav(path: &Path, frames: &[[i16; 2]]) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for frame in frames {
            writer.write_sample(frame[0]).unwrap();
            writer.write_sample(frame[1]).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_load_stereo_int_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_int_wav(&path, &[[16384, -16384], [0, 8192], [-32768, 0]]);

        let buffer = load_wav(&path).unwrap();
        assert_eq!(buffer.sample_rate, 22050);
        assert_eq!(buffer.num_channels(), 2);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.channels[0], vec![0.5, 0.0, -1.0]);
        assert_eq!(buffer.channels[1], vec![-0.5, 0.25, 0.0]);
        assert_eq!(buffer.mono(), vec![0.0, 0.125, -0.5]);
    }

    #[test]
    fn test_load_float_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("float.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for v in [0.1f32, -0.2, 0.3] {
            writer.write_sample(v).unwrap();
        }
        writer.finalize().unwrap();

        let buffer = load_wav(&path).unwrap();
        assert_eq!(buffer.mono(), vec![0.1, -0.2, 0.3]);
        assert!((buffer.duration_seconds() - 3.0 / 48000.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(load_wav("/definitely/not/here.wav").is_err());
    }
}
