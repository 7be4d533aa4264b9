//! Harmonic Pitch Class Profile
//!
//! Folds the spectral peaks of every spectrogram frame into 120 chroma bins
//! (ten per semitone, bin 0 = C).
//!
//! # Algorithm
//!
//! For each frame:
//! 1. Pick up to [`MAX_SPEC_PEAKS`] spectral peaks, drop those outside
//!    [`MIN_FREQ`]..=[`MAX_FREQ`]
//! 2. For every chroma bin and every harmonic weight, measure the distance
//!    `d` in semitones between the (harmonic-shifted) peak frequency and
//!    the bin centre, folded into one octave
//! 3. Within half a window (`|d| <= 0.5`) add `cos²(πd) · gain² · weight²`
//! 4. Divide the frame by its largest bin; zero it when the average raw bin
//!    energy is below [`MIN_AVG_FRAME_ENERGY`]

use super::fft::Spectrogram;
use super::peaks::find_peaks;
use super::{no_progress, CancelToken};
use crate::error::GrainResult;
use lazy_static::lazy_static;
use std::f32::consts::PI;

pub const REF_FREQ: f32 = 440.0;
pub const MAX_SPEC_PEAKS: usize = 60;
pub const NUM_HPCP_BINS: usize = 120;
pub const BINS_PER_SEMITONE: usize = NUM_HPCP_BINS / 12;
pub const HPCP_WINDOW_LEN: f32 = 1.0;
pub const NUM_HARMONIC_WEIGHTS: usize = 3;
pub const MIN_FREQ: f32 = 40.0;
pub const MAX_FREQ: f32 = 5000.0;
pub const HARMONIC_PRECISION: f32 = 1e-5;
pub const MIN_AVG_FRAME_ENERGY: f32 = 1e-4;
/// Semitones from the reference A up to the next C
pub const PITCH_CLASS_OFFSET: usize = 9;
pub const PITCH_CLASS_OFFSET_BINS: usize = BINS_PER_SEMITONE * PITCH_CLASS_OFFSET;

/// Harmonic folded into one octave with its accumulated weight
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarmonicWeight {
    pub semitone: f32,
    pub gain: f32,
}

lazy_static! {
    /// Weights of the first harmonics, octave-folded and merged
    pub static ref HARMONIC_WEIGHTS: Vec<HarmonicWeight> = harmonic_weights();
}

fn harmonic_weights() -> Vec<HarmonicWeight> {
    let mut weights: Vec<HarmonicWeight> = Vec::new();
    for i in 0..=NUM_HARMONIC_WEIGHTS {
        let mut semitone = 12.0 * ((i + 1) as f32).log2();
        let oct_weight = (semitone / 12.0 * 0.5).max(1.0);
        while semitone >= 12.0 - HARMONIC_PRECISION {
            semitone -= 12.0;
        }
        match weights
            .iter_mut()
            .find(|w| (w.semitone - semitone).abs() < HARMONIC_PRECISION)
        {
            Some(existing) => existing.gain += 1.0 / oct_weight,
            None => weights.push(HarmonicWeight {
                semitone,
                gain: 1.0 / oct_weight,
            }),
        }
    }
    weights
}

/// Centre frequency of chroma bin `pc` counted from the reference A
fn center_freq(pc: usize) -> f32 {
    REF_FREQ * 2f32.powf(pc as f32 / NUM_HPCP_BINS as f32)
}

/// Signed semitone distance folded into `[-6, 6)`
fn folded_distance(freq: f32, center: f32) -> f32 {
    let d = 12.0 * (freq / center).log2();
    (d + 6.0).rem_euclid(12.0) - 6.0
}

#[derive(Debug, Clone, Copy)]
pub struct Hpcp {
    sample_rate: f32,
}

impl Hpcp {
    pub fn new(sample_rate: f32) -> Self {
        Self { sample_rate }
    }

    /// Chroma profile of every frame in `spectrogram`
    pub fn process(&self, spectrogram: &Spectrogram) -> Spectrogram {
        // A fresh token is never cancelled
        self.process_cancellable(spectrogram, &CancelToken::new(), &mut no_progress)
            .unwrap_or_default()
    }

    pub fn process_cancellable(
        &self,
        spectrogram: &Spectrogram,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(f32),
    ) -> GrainResult<Spectrogram> {
        let num_frames = spectrogram.len();
        let mut hpcp = Vec::with_capacity(num_frames);
        for (idx, frame) in spectrogram.iter().enumerate() {
            cancel.check()?;
            hpcp.push(self.process_frame(frame));
            progress((idx + 1) as f32 / num_frames as f32);
        }
        Ok(hpcp)
    }

    /// Chroma profile of a single magnitude frame
    pub fn process_frame(&self, spec_frame: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0f32; NUM_HPCP_BINS];
        if spec_frame.len() < 2 {
            return out;
        }
        let last_bin = (spec_frame.len() - 1) as f32;

        let mut cur_max = 0.0f32;
        for peak in find_peaks(spec_frame, MAX_SPEC_PEAKS) {
            let peak_freq = peak.bin / last_bin * self.sample_rate / 2.0;
            if !(MIN_FREQ..=MAX_FREQ).contains(&peak_freq) {
                continue;
            }
            let gain_sq = peak.gain * peak.gain;

            for pc in 0..NUM_HPCP_BINS {
                let pc_idx = (pc + PITCH_CLASS_OFFSET_BINS) % NUM_HPCP_BINS;
                let center = center_freq(pc);
                for harmonic in HARMONIC_WEIGHTS.iter() {
                    let freq = peak_freq * 2f32.powf(-harmonic.semitone / 12.0);
                    let d = folded_distance(freq, center);
                    if d.abs() <= 0.5 * HPCP_WINDOW_LEN {
                        let w = (PI * d / HPCP_WINDOW_LEN).cos().powi(2);
                        out[pc_idx] += w * gain_sq * harmonic.gain * harmonic.gain;
                        cur_max = cur_max.max(out[pc_idx]);
                    }
                }
            }
        }

        let mut total_energy = 0.0f32;
        if cur_max > 0.0 {
            for v in out.iter_mut() {
                total_energy += *v;
                *v /= cur_max;
            }
        }
        if total_energy / (NUM_HPCP_BINS as f32) < MIN_AVG_FRAME_ENERGY {
            out.fill(0.0);
        }
        out
    }
}

/// Pitch class (0..12) of a fractional chroma bin, rounded to the nearest class
pub fn bin_to_pitch_class(bin: f32) -> usize {
    ((bin / BINS_PER_SEMITONE as f32).round() as i64).rem_euclid(12) as usize
}
