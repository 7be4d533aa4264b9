//! Offline analysis of a loaded sample
//!
//! ```text
//! samples ──> Fft(4096/4096) ──> HPCP ──> segment tracking ──> pitch map ──> candidates
//!        └──> Fft(1024/512) ──> spectral flux ──> transients
//! ```
//!
//! Every stage checks a [`CancelToken`] once per frame and reports progress
//! in `0.0..=1.0`. A cancelled stage returns [`GrainError::Cancelled`] and
//! produces nothing.

pub mod fft;
pub mod hpcp;
pub mod peaks;
pub mod pipeline;
pub mod pitch_detector;
pub mod transient_detector;

use crate::error::{GrainError, GrainResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use fft::{Fft, Spectrogram};
pub use hpcp::Hpcp;
pub use pipeline::{AnalysisEvent, AnalysisPipeline, AnalysisResult, AnalysisStage};
pub use pitch_detector::{Pitch, PitchDetector, PitchMap};
pub use transient_detector::{Transient, TransientDetector};

/// Shared cancellation flag for a running analysis
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> GrainResult<()> {
        if self.is_cancelled() {
            Err(GrainError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Progress sink that ignores updates
pub fn no_progress(_: f32) {}
