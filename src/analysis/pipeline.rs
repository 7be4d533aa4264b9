//! Background analysis of a loaded sample
//!
//! # Architecture
//!
//! ```text
//! control thread                     worker thread
//!      |                                   |
//!      |--start(samples)--> cancel + join previous run (bounded)
//!      |                   spawn ------->  pitch stage      (Fft -> HPCP -> segments)
//!      |                                   transient stage  (Fft -> spectral energy)
//!      |                                   candidate stage
//!      |<-----Progress / Finished----------|
//!      |                                   publish: candidates -> Parameters
//!      |                                            samples    -> SourceSlot
//!      |                                            result     -> ArcSwapOption
//! ```
//!
//! Stages run in sequence on one worker; the first error or cancellation
//! stops the run. Results are only published when the run completes and is
//! still the latest one, so a cancelled or superseded run never leaves
//! partial state behind.

use super::pitch_detector::PitchDetector;
use super::transient_detector::{Transient, TransientDetector};
use super::{CancelToken, PitchMap, Spectrogram};
use crate::candidates::{create_candidates, CandidateLists};
use crate::config::AnalysisConfig;
use crate::error::{GrainError, GrainResult};
use crate::parameters::Parameters;
use crate::synth::SourceSlot;
use arc_swap::ArcSwapOption;
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Smallest progress step reported as an event
const PROGRESS_STEP: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStage {
    Pitch,
    Transients,
    Candidates,
}

impl AnalysisStage {
    pub fn name(self) -> &'static str {
        match self {
            AnalysisStage::Pitch => "pitch",
            AnalysisStage::Transients => "transients",
            AnalysisStage::Candidates => "candidates",
        }
    }
}

/// Notifications from the worker, tagged with the run they belong to
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisEvent {
    Progress { run: u64, stage: AnalysisStage, progress: f32 },
    Finished { run: u64, pitches: usize, transients: usize },
    Failed { run: u64, error: String },
    Cancelled { run: u64 },
}

/// Everything one analysis run produces
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    /// Mono source the analysis ran on
    pub samples: Arc<Vec<f32>>,
    pub sample_rate: f32,
    pub spectrogram: Spectrogram,
    pub hpcp: Spectrogram,
    pub pitches: PitchMap,
    /// Detected pitches drawn into an HPCP-shaped buffer
    pub segmented: Spectrogram,
    pub transients: Vec<Transient>,
    pub candidates: CandidateLists,
}

/// Reject buffers the analysis cannot work with
pub fn validate_input(samples: &[f32], sample_rate: f32, config: &AnalysisConfig) -> GrainResult<()> {
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        return Err(GrainError::InvalidSampleRate(sample_rate));
    }
    if samples.is_empty() {
        return Err(GrainError::EmptySample);
    }
    let required = ((config.min_analysis_seconds * sample_rate).ceil() as usize)
        .max(config.pitch_fft_size)
        .max(config.fft_window);
    if samples.len() < required {
        return Err(GrainError::SampleTooShort {
            samples: samples.len(),
            required,
        });
    }
    Ok(())
}

/// Run every stage on the calling thread
///
/// `progress` receives the stage and its progress in `0.0..=1.0`.
pub fn run_analysis(
    samples: Arc<Vec<f32>>,
    sample_rate: f32,
    config: &AnalysisConfig,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(AnalysisStage, f32),
) -> GrainResult<AnalysisResult> {
    validate_input(&samples, sample_rate, config)?;

    let detector = PitchDetector::with_fft(sample_rate, config.pitch_fft_size, config.pitch_hop);
    let pitch = detector.process_cancellable(&samples, cancel, &mut |p| progress(AnalysisStage::Pitch, p))?;

    let transient_detector = TransientDetector::new(config.fft_window, config.fft_hop);
    let transients =
        transient_detector.process_cancellable(&samples, cancel, &mut |p| progress(AnalysisStage::Transients, p))?;

    cancel.check()?;
    let candidates = create_candidates(&pitch.pitches);
    progress(AnalysisStage::Candidates, 1.0);

    Ok(AnalysisResult {
        samples,
        sample_rate,
        spectrogram: pitch.spectrogram,
        hpcp: pitch.hpcp,
        pitches: pitch.pitches,
        segmented: pitch.segmented,
        transients,
        candidates,
    })
}

struct RunningAnalysis {
    run: u64,
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

/// Where a finished run installs its results
#[derive(Clone)]
struct PublishTargets {
    result: Arc<ArcSwapOption<AnalysisResult>>,
    params: Option<Arc<Parameters>>,
    source: Option<SourceSlot>,
    /// Id of the newest run; older runs never publish
    latest: Arc<Mutex<u64>>,
}

impl PublishTargets {
    fn publish(&self, run: u64, cancel: &CancelToken, result: AnalysisResult) -> bool {
        let latest = match self.latest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *latest != run || cancel.is_cancelled() {
            return false;
        }
        if let Some(params) = &self.params {
            if let Err(e) = params.install_candidates(&result.candidates) {
                warn!("Some analysis candidates were rejected: {}", e);
            }
        }
        if let Some(source) = &self.source {
            source.store(Some(Arc::clone(&result.samples)));
        }
        self.result.store(Some(Arc::new(result)));
        true
    }
}

/// Runs analyses on a background thread and publishes completed results
///
/// # Example
/// ```ignore
/// let mut pipeline = AnalysisPipeline::new(AnalysisConfig::default())
///     .with_parameters(Arc::clone(&params))
///     .with_source(Arc::clone(&source));
/// let events = pipeline.events();
/// pipeline.start(samples, 44100.0)?;
/// while let Ok(event) = events.recv() {
///     if let AnalysisEvent::Finished { .. } = event { break; }
/// }
/// let result = pipeline.result();
/// ```
pub struct AnalysisPipeline {
    config: AnalysisConfig,
    targets: PublishTargets,
    events_tx: Sender<AnalysisEvent>,
    events_rx: Receiver<AnalysisEvent>,
    current: Option<RunningAnalysis>,
    next_run: u64,
}

impl AnalysisPipeline {
    pub fn new(config: AnalysisConfig) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            config,
            targets: PublishTargets {
                result: Arc::new(ArcSwapOption::empty()),
                params: None,
                source: None,
                latest: Arc::new(Mutex::new(0)),
            },
            events_tx,
            events_rx,
            current: None,
            next_run: 1,
        }
    }

    /// Install candidates into `params` when a run completes
    pub fn with_parameters(mut self, params: Arc<Parameters>) -> Self {
        self.targets.params = Some(params);
        self
    }

    /// Swap the analyzed samples into `source` when a run completes
    pub fn with_source(mut self, source: SourceSlot) -> Self {
        self.targets.source = Some(source);
        self
    }

    pub fn events(&self) -> Receiver<AnalysisEvent> {
        self.events_rx.clone()
    }

    /// Latest published result
    pub fn result(&self) -> Option<Arc<AnalysisResult>> {
        self.targets.result.load_full()
    }

    /// Shared handle to the published result
    pub fn result_slot(&self) -> Arc<ArcSwapOption<AnalysisResult>> {
        Arc::clone(&self.targets.result)
    }

    pub fn is_running(&self) -> bool {
        self.current.as_ref().is_some_and(|r| !r.handle.is_finished())
    }

    /// Start analysing `samples`, cancelling any run in flight
    ///
    /// Invalid input is rejected before anything is cancelled, so the
    /// previous result stays in place. Returns the run id.
    pub fn start(&mut self, samples: Vec<f32>, sample_rate: f32) -> GrainResult<u64> {
        validate_input(&samples, sample_rate, &self.config)?;
        self.cancel();

        let run = self.next_run;
        self.next_run += 1;
        match self.targets.latest.lock() {
            Ok(mut latest) => *latest = run,
            Err(poisoned) => *poisoned.into_inner() = run,
        }

        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        let config = self.config.clone();
        let targets = self.targets.clone();
        let events = self.events_tx.clone();
        let samples = Arc::new(samples);

        info!(
            "Analysis run {}: {} samples at {} Hz",
            run,
            samples.len(),
            sample_rate
        );
        let handle = thread::Builder::new()
            .name(format!("grainbow-analysis-{}", run))
            .spawn(move || analysis_worker(run, samples, sample_rate, config, worker_cancel, targets, events))?;

        self.current = Some(RunningAnalysis { run, cancel, handle });
        Ok(run)
    }

    /// Cancel the run in flight and wait for it up to the configured timeout
    ///
    /// Returns true if a run was cancelled.
    pub fn cancel(&mut self) -> bool {
        let Some(running) = self.current.take() else {
            return false;
        };
        if running.handle.is_finished() {
            let _ = running.handle.join();
            return false;
        }
        running.cancel.cancel();
        let timeout = Duration::from_millis(self.config.cancel_timeout_ms);
        if join_with_timeout(running.handle, timeout) {
            debug!("Analysis run {} stopped", running.run);
        } else {
            warn!(
                "Analysis run {} did not stop within {:?}, detaching",
                running.run, timeout
            );
        }
        true
    }

    /// Block until the current run ends or `timeout` passes; true when it ended
    pub fn wait(&mut self, timeout: Duration) -> bool {
        let Some(running) = self.current.take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !running.handle.is_finished() {
            if Instant::now() >= deadline {
                self.current = Some(running);
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        let _ = running.handle.join();
        true
    }
}

impl Drop for AnalysisPipeline {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    let _ = handle.join();
    true
}

fn analysis_worker(
    run: u64,
    samples: Arc<Vec<f32>>,
    sample_rate: f32,
    config: AnalysisConfig,
    cancel: CancelToken,
    targets: PublishTargets,
    events: Sender<AnalysisEvent>,
) {
    let started = Instant::now();
    let mut last = (AnalysisStage::Pitch, -1.0f32);
    let mut progress = |stage: AnalysisStage, p: f32| {
        if stage != last.0 || p - last.1 >= PROGRESS_STEP || (p >= 1.0 && last.1 < 1.0) {
            last = (stage, p);
            let _ = events.send(AnalysisEvent::Progress { run, stage, progress: p });
        }
    };

    let event = match run_analysis(samples, sample_rate, &config, &cancel, &mut progress) {
        Ok(result) => {
            let pitches = result.pitches.len();
            let transients = result.transients.len();
            if targets.publish(run, &cancel, result) {
                info!(
                    "Analysis run {} finished in {:?}: {} pitches, {} transients",
                    run,
                    started.elapsed(),
                    pitches,
                    transients
                );
                AnalysisEvent::Finished { run, pitches, transients }
            } else {
                debug!("Analysis run {} superseded, result dropped", run);
                AnalysisEvent::Cancelled { run }
            }
        }
        Err(GrainError::Cancelled) => {
            debug!("Analysis run {} cancelled", run);
            AnalysisEvent::Cancelled { run }
        }
        Err(e) => {
            error!("Analysis run {} failed: {}", run, e);
            AnalysisEvent::Failed {
                run,
                error: e.to_string(),
            }
        }
    };
    let _ = events.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, seconds: f32, sr: f32) -> Vec<f32> {
        (0..(seconds * sr) as usize)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / sr).sin())
            .collect()
    }

    #[test]
    fn test_validate_input() {
        let config = AnalysisConfig::default();
        assert!(matches!(validate_input(&[], 44100.0, &config), Err(GrainError::EmptySample)));
        assert!(matches!(
            validate_input(&[0.0; 100], 0.0, &config),
            Err(GrainError::InvalidSampleRate(_))
        ));
        match validate_input(&[0.0; 1000], 44100.0, &config) {
            Err(GrainError::SampleTooShort { samples, required }) => {
                assert_eq!(samples, 1000);
                assert_eq!(required, 4410);
            }
            other => panic!("expected SampleTooShort, got {:?}", other),
        }
        assert!(validate_input(&[0.0; 8192], 44100.0, &config).is_ok());
    }

    #[test]
    fn test_run_analysis_reports_every_stage() {
        let mut stages = Vec::new();
        let result = run_analysis(
            Arc::new(sine(440.0, 1.0, 44100.0)),
            44100.0,
            &AnalysisConfig::default(),
            &CancelToken::new(),
            &mut |stage, p| {
                assert!((0.0..=1.0).contains(&p));
                if stages.last() != Some(&stage) {
                    stages.push(stage);
                }
            },
        )
        .unwrap();
        assert_eq!(
            stages,
            vec![AnalysisStage::Pitch, AnalysisStage::Transients, AnalysisStage::Candidates]
        );
        assert_eq!(result.hpcp.len(), result.spectrogram.len());
        assert_eq!(result.segmented.len(), result.hpcp.len());
    }

    #[test]
    fn test_cancelled_run_returns_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = run_analysis(
            Arc::new(sine(440.0, 1.0, 44100.0)),
            44100.0,
            &AnalysisConfig::default(),
            &cancel,
            &mut |_, _| {},
        );
        assert!(matches!(result, Err(GrainError::Cancelled)));
    }

    #[test]
    fn test_rejected_start_keeps_previous_state() {
        let mut pipeline = AnalysisPipeline::new(AnalysisConfig::default());
        assert!(pipeline.start(vec![0.0; 10], 44100.0).is_err());
        assert!(!pipeline.is_running());
        assert!(pipeline.result().is_none());
    }
}
