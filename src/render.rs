//! Offline rendering of held notes to a buffer or WAV file
//!
//! Notes start at time zero and are released together at `release_at`
//! seconds (block accurate). Rendering runs the same `process_block` path
//! the live callback uses.

use crate::error::{GrainError, GrainResult};
use crate::pitch_class::PitchClass;
use crate::synth::GranularSynth;
use std::path::Path;
use tracing::info;

/// MIDI octave used for notes given by pitch class name
const DEFAULT_OCTAVE_NOTE: u8 = 60;

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub sample_rate: u32,
    pub channels: usize,
    pub block_size: usize,
    /// Total length in seconds
    pub duration: f32,
    /// Release time in seconds; notes are held to the end when `None`
    pub release_at: Option<f32>,
    pub notes: Vec<u8>,
    pub velocity: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            block_size: 512,
            duration: 2.0,
            release_at: None,
            notes: vec![DEFAULT_OCTAVE_NOTE],
            velocity: 1.0,
        }
    }
}

/// Parse a comma separated note list: pitch class names ("C", "F#", "Gs")
/// or MIDI numbers
pub fn parse_notes(list: &str) -> GrainResult<Vec<u8>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            if let Ok(midi) = s.parse::<u8>() {
                if midi < 128 {
                    return Ok(midi);
                }
            }
            PitchClass::parse(s)
                .map(|pc| DEFAULT_OCTAVE_NOTE + pc.index() as u8)
                .ok_or_else(|| GrainError::Config(format!("Unknown note: {}", s)))
        })
        .collect()
}

/// Render interleaved audio for `config.duration` seconds
pub fn render_to_buffer(synth: &mut GranularSynth, config: &RenderConfig) -> Vec<f32> {
    let channels = config.channels.max(1);
    let block_size = config.block_size.max(1);
    let total_frames = (config.duration.max(0.0) * config.sample_rate as f32) as usize;
    let release_frame = config
        .release_at
        .map(|t| (t.max(0.0) * config.sample_rate as f32) as usize);

    for &note in &config.notes {
        synth.note_on(note, config.velocity);
    }

    let mut output = vec![0.0f32; total_frames * channels];
    let mut released = false;
    let mut frame = 0;
    for block in output.chunks_mut(block_size * channels) {
        if !released && release_frame.is_some_and(|r| frame >= r) {
            for &note in &config.notes {
                synth.note_off(note);
            }
            released = true;
        }
        synth.process_block(block);
        frame += block.len() / channels;
    }
    output
}

/// Write interleaved samples as 16-bit PCM
pub fn write_wav(path: &Path, samples: &[f32], channels: usize, sample_rate: u32) -> GrainResult<()> {
    let spec = hound::WavSpec {
        channels: channels.max(1) as u16,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * 32767.0) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Render and write to `path`
pub fn render_to_file(synth: &mut GranularSynth, config: &RenderConfig, path: &Path) -> GrainResult<RenderStats> {
    let samples = render_to_buffer(synth, config);
    write_wav(path, &samples, config.channels, config.sample_rate)?;
    let stats = RenderStats::from_samples(&samples, config.channels, config.sample_rate);
    info!(
        "Rendered {:.2}s to {} (peak {:.3}, rms {:.3})",
        stats.duration,
        path.display(),
        stats.peak,
        stats.rms
    );
    Ok(stats)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderStats {
    pub duration: f32,
    pub frames: usize,
    pub rms: f32,
    pub peak: f32,
}

impl RenderStats {
    pub fn from_samples(samples: &[f32], channels: usize, sample_rate: u32) -> Self {
        let frames = samples.len() / channels.max(1);
        let rms = if samples.is_empty() {
            0.0
        } else {
            (samples.iter().map(|x| x * x).sum::<f32>() / samples.len() as f32).sqrt()
        };
        let peak = samples.iter().map(|x| x.abs()).fold(0.0f32, f32::max);
        Self {
            duration: if sample_rate == 0 { 0.0 } else { frames as f32 / sample_rate as f32 },
            frames,
            rms,
            peak,
        }
    }

    pub fn print_summary(&self) {
        println!("Render statistics:");
        println!("  Duration: {:.3} seconds", self.duration);
        println!("  Frames:   {}", self.frames);
        println!("  RMS:      {:.3}", self.rms);
        println!("  Peak:     {:.3}", self.peak);
    }
}
