//! Onset detection from spectral energy
//!
//! # Algorithm
//!
//! Each spectrogram frame is reduced to its total energy (sum of bins).
//! The last [`PARAM_SPREAD`] energies are kept, newest first. A frame is a
//! transient when:
//! - no transient was reported in the previous [`PARAM_ATTACK_LOCK`] frames
//!   (the lock also covers the first frames of the sample)
//! - looking back, energy never rises (`E[0] >= E[1] >= ... `)
//! - the newest energy exceeds the oldest by more than [`PARAM_THRESHOLD`]

use super::fft::Fft;
use super::{no_progress, CancelToken};
use crate::error::GrainResult;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const FFT_SIZE: usize = 1024;
pub const HOP_SIZE: usize = 512;
pub const PARAM_THRESHOLD: f32 = 2.5;
pub const PARAM_SPREAD: usize = 3;
pub const PARAM_ATTACK_LOCK: usize = 10;

/// A detected onset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transient {
    /// Onset position as a ratio of the analyzed frames
    pub pos_ratio: f32,
    pub confidence: f32,
}

pub struct TransientDetector {
    fft: Fft,
}

impl Default for TransientDetector {
    fn default() -> Self {
        Self::new(FFT_SIZE, HOP_SIZE)
    }
}

impl TransientDetector {
    pub fn new(fft_size: usize, hop_size: usize) -> Self {
        Self {
            fft: Fft::new(fft_size, hop_size),
        }
    }

    pub fn process(&self, samples: &[f32]) -> Vec<Transient> {
        // A fresh token is never cancelled
        self.process_cancellable(samples, &CancelToken::new(), &mut no_progress)
            .unwrap_or_default()
    }

    pub fn process_cancellable(
        &self,
        samples: &[f32],
        cancel: &CancelToken,
        progress: &mut dyn FnMut(f32),
    ) -> GrainResult<Vec<Transient>> {
        let spectrogram = self
            .fft
            .process_cancellable(samples, cancel, &mut |p| progress(p * 0.8))?;
        let num_frames = spectrogram.len();
        let mut transients = Vec::new();
        let mut energy = [0.0f32; PARAM_SPREAD];
        let mut attack_frames = PARAM_ATTACK_LOCK;

        for (frame_idx, frame) in spectrogram.iter().enumerate() {
            cancel.check()?;
            energy.copy_within(0..PARAM_SPREAD - 1, 1);
            energy[0] = frame.iter().sum();

            if attack_frames == 0 && is_transient(&energy) {
                transients.push(Transient {
                    pos_ratio: frame_idx as f32 / num_frames as f32,
                    confidence: 1.0,
                });
                attack_frames = PARAM_ATTACK_LOCK;
            } else if attack_frames > 0 {
                attack_frames -= 1;
            }
            progress(0.8 + 0.2 * (frame_idx + 1) as f32 / num_frames as f32);
        }

        debug!("Transient detection: {} frames, {} transients", num_frames, transients.len());
        Ok(transients)
    }
}

/// Energy window (newest first) rises monotonically into a sharp jump
fn is_transient(energy: &[f32; PARAM_SPREAD]) -> bool {
    let rising = energy.windows(2).all(|pair| pair[0] >= pair[1]);
    rising && energy[0] > energy[PARAM_SPREAD - 1] * PARAM_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transient_rules() {
        assert!(is_transient(&[10.0, 1.0, 1.0]));
        assert!(is_transient(&[10.0, 0.0, 0.0]));
        // older frame louder than a newer one
        assert!(!is_transient(&[10.0, 1.0, 2.0]));
        // below threshold
        assert!(!is_transient(&[2.0, 1.5, 1.0]));
        // silence
        assert!(!is_transient(&[0.0, 0.0, 0.0]));
    }

    #[test]
    fn test_single_impulse_detected_once() {
        let mut samples = vec![0.0f32; 44100];
        samples[22050] = 1.0;
        let transients = TransientDetector::default().process(&samples);
        assert_eq!(transients.len(), 1, "{:?}", transients);
        let frame_ratio = 1.0 / 85.0;
        assert!((transients[0].pos_ratio - 0.5).abs() <= frame_ratio);
        assert_eq!(transients[0].confidence, 1.0);
    }

    #[test]
    fn test_attack_lock_suppresses_close_onsets() {
        // Two impulses 2048 samples apart (4 hops), second one is masked
        let mut samples = vec![0.0f32; 44100];
        samples[11025] = 1.0;
        samples[11025 + 2048] = 1.0;
        let transients = TransientDetector::default().process(&samples);
        assert_eq!(transients.len(), 1);
    }

    #[test]
    fn test_separated_onsets_both_detected() {
        let mut samples = vec![0.0f32; 44100];
        samples[11025] = 1.0;
        samples[33075] = 1.0;
        let transients = TransientDetector::default().process(&samples);
        assert_eq!(transients.len(), 2);
        assert!(transients[0].pos_ratio < transients[1].pos_ratio);
    }

    #[test]
    fn test_onset_inside_initial_lock_ignored() {
        let mut samples = vec![0.0f32; 44100];
        samples[1000] = 1.0;
        assert!(TransientDetector::default().process(&samples).is_empty());
    }

    #[test]
    fn test_short_input_has_no_transients() {
        assert!(TransientDetector::default().process(&[0.5; 100]).is_empty());
    }
}
