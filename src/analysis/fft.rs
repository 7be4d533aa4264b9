//! Windowed short-time FFT producing a normalized magnitude spectrogram
//!
//! # Algorithm
//!
//! 1. Slide a window of `window_size` samples over the input with `hop_size`
//!    (only full windows are analyzed)
//! 2. Apply a 4-term Blackman-Harris window
//! 3. Real FFT, keep the magnitudes of the first `window_size / 2` bins
//! 4. Divide each frame by the running maximum magnitude seen so far
//!
//! The running maximum is updated before a frame is scaled, so the first
//! frame is divided by its own peak and the frame holding the global peak
//! contains exactly one bin equal to 1.0. Earlier frames are not rescaled
//! when a louder frame arrives; downstream peak thresholds depend on this.

use super::{no_progress, CancelToken};
use crate::error::GrainResult;
use realfft::num_complex::Complex32;
use realfft::{RealFftPlanner, RealToComplex};
use std::f32::consts::PI;
use std::sync::Arc;
use tracing::debug;

/// Frame-indexed magnitudes, `frames[frame][bin]`
pub type Spectrogram = Vec<Vec<f32>>;

pub struct Fft {
    window_size: usize,
    hop_size: usize,
    window: Vec<f32>,
    r2c: Arc<dyn RealToComplex<f32>>,
}

impl Fft {
    /// # Arguments
    /// * `window_size` - FFT length in samples (>= 2)
    /// * `hop_size` - Distance between frame starts (>= 1)
    pub fn new(window_size: usize, hop_size: usize) -> Self {
        let window_size = window_size.max(2);
        let mut planner = RealFftPlanner::<f32>::new();
        let r2c = planner.plan_fft_forward(window_size);
        Self {
            window_size,
            hop_size: hop_size.max(1),
            window: blackman_harris(window_size),
            r2c,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Bins kept per frame
    pub fn num_bins(&self) -> usize {
        self.window_size / 2
    }

    /// Number of frames produced for `len` input samples
    pub fn num_frames(&self, len: usize) -> usize {
        if len < self.window_size {
            0
        } else {
            (len - self.window_size) / self.hop_size + 1
        }
    }

    /// Spectrogram of `samples`; empty when shorter than one window
    pub fn process(&self, samples: &[f32]) -> Spectrogram {
        // A fresh token is never cancelled
        self.process_cancellable(samples, &CancelToken::new(), &mut no_progress)
            .unwrap_or_default()
    }

    /// Like [`Fft::process`], checking `cancel` before every frame
    pub fn process_cancellable(
        &self,
        samples: &[f32],
        cancel: &CancelToken,
        progress: &mut dyn FnMut(f32),
    ) -> GrainResult<Spectrogram> {
        let num_frames = self.num_frames(samples.len());
        if num_frames == 0 {
            debug!(
                "FFT input of {} samples is shorter than one window ({})",
                samples.len(),
                self.window_size
            );
            return Ok(Vec::new());
        }

        let num_bins = self.num_bins();
        let mut input = self.r2c.make_input_vec();
        let mut spectrum: Vec<Complex32> = self.r2c.make_output_vec();
        let mut scratch = self.r2c.make_scratch_vec();
        let mut frames = Vec::with_capacity(num_frames);
        let mut running_max = f32::MIN_POSITIVE;

        for frame_idx in 0..num_frames {
            cancel.check()?;

            let start = frame_idx * self.hop_size;
            let chunk = &samples[start..start + self.window_size];
            for ((dst, &s), &w) in input.iter_mut().zip(chunk).zip(&self.window) {
                *dst = s * w;
            }

            // Lengths come from make_*_vec so this cannot fail
            if self
                .r2c
                .process_with_scratch(&mut input, &mut spectrum, &mut scratch)
                .is_err()
            {
                frames.push(vec![0.0; num_bins]);
                continue;
            }

            let mut frame: Vec<f32> = spectrum[..num_bins].iter().map(|c| c.norm()).collect();
            let frame_max = frame.iter().fold(0.0f32, |acc, &v| acc.max(v));
            if frame_max > running_max {
                running_max = frame_max;
            }
            for v in frame.iter_mut() {
                *v /= running_max;
            }
            frames.push(frame);

            progress((frame_idx + 1) as f32 / num_frames as f32);
        }

        debug!(
            "FFT produced {} frames of {} bins (peak magnitude {:.3})",
            frames.len(),
            num_bins,
            running_max
        );
        Ok(frames)
    }
}

/// 4-term Blackman-Harris window
fn blackman_harris(size: usize) -> Vec<f32> {
    const A0: f32 = 0.35875;
    const A1: f32 = 0.48829;
    const A2: f32 = 0.14128;
    const A3: f32 = 0.01168;
    let denom = (size - 1).max(1) as f32;
    (0..size)
        .map(|n| {
            let x = 2.0 * PI * n as f32 / denom;
            A0 - A1 * x.cos() + A2 * (2.0 * x).cos() - A3 * (3.0 * x).cos()
        })
        .collect()
}
