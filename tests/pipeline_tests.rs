//! Background analysis: publishing, cancellation and rejection
use arc_swap::ArcSwapOption;
use grainbow::analysis::{AnalysisEvent, AnalysisPipeline};
use grainbow::config::AnalysisConfig;
use grainbow::parameters::{ParamCandidate, Parameters};
use grainbow::pitch_class::PitchClass;
use grainbow::synth::SourceSlot;
use grainbow::GrainError;
use crossbeam::channel::Receiver;
use std::f32::consts::PI;
use std::sync::Arc;
use std::time::Duration;

const SR: f32 = 44100.0;
const TIMEOUT: Duration = Duration::from_secs(60);

fn sine(freq: f32, seconds: f32) -> Vec<f32> {
    (0..(seconds * SR) as usize)
        .map(|i| 0.7 * (2.0 * PI * freq * i as f32 / SR).sin())
        .collect()
}

/// Wait for the terminal event of `run`
fn finish(events: &Receiver<AnalysisEvent>, run: u64) -> AnalysisEvent {
    loop {
        let event = events.recv_timeout(TIMEOUT).expect("analysis timed out");
        match &event {
            AnalysisEvent::Progress { .. } => continue,
            AnalysisEvent::Finished { run: r, .. }
            | AnalysisEvent::Failed { run: r, .. }
            | AnalysisEvent::Cancelled { run: r } => {
                if *r == run {
                    return event;
                }
            }
        }
    }
}

fn pipeline() -> (AnalysisPipeline, Arc<Parameters>, SourceSlot) {
    let params = Arc::new(Parameters::new());
    let source: SourceSlot = Arc::new(ArcSwapOption::empty());
    let pipeline = AnalysisPipeline::new(AnalysisConfig::default())
        .with_parameters(Arc::clone(&params))
        .with_source(Arc::clone(&source));
    (pipeline, params, source)
}

#[test]
fn test_finished_run_publishes_everything() {
    let (mut pipeline, params, source) = pipeline();
    let events = pipeline.events();
    let run = pipeline.start(sine(440.0, 2.0), SR).unwrap();

    match finish(&events, run) {
        AnalysisEvent::Finished { pitches, .. } => assert!(pitches >= 1),
        other => panic!("expected Finished, got {:?}", other),
    }

    let result = pipeline.result().expect("result published");
    assert_eq!(result.samples.len(), 88200);
    assert!(!result.pitches.get(PitchClass::A).is_empty());
    assert_eq!(source.load_full().map(|s| s.len()), Some(88200));
    assert!(!params.candidates(PitchClass::A).is_empty());
    assert_eq!(
        params.candidates(PitchClass::A).as_ref(),
        &result.candidates[PitchClass::A.index()]
    );
}

#[test]
fn test_progress_reported_in_range() {
    let (mut pipeline, _, _) = pipeline();
    let events = pipeline.events();
    let run = pipeline.start(sine(330.0, 1.0), SR).unwrap();

    let mut progress = Vec::new();
    loop {
        match events.recv_timeout(TIMEOUT).expect("analysis timed out") {
            AnalysisEvent::Progress { progress: p, .. } => progress.push(p),
            AnalysisEvent::Finished { run: r, .. } if r == run => break,
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert!(!progress.is_empty());
    assert!(progress.iter().all(|p| (0.0..=1.0).contains(p)));
}

#[test]
fn test_too_short_sample_leaves_previous_result() {
    let (mut pipeline, params, source) = pipeline();
    let events = pipeline.events();
    let run = pipeline.start(sine(440.0, 1.0), SR).unwrap();
    assert!(matches!(finish(&events, run), AnalysisEvent::Finished { .. }));
    let before = pipeline.result().expect("first result");

    let err = pipeline.start(vec![0.1; 100], SR).unwrap_err();
    assert!(matches!(err, GrainError::SampleTooShort { samples: 100, .. }));
    assert!(matches!(pipeline.start(Vec::new(), SR), Err(GrainError::EmptySample)));
    assert!(matches!(
        pipeline.start(vec![0.1; 44100], f32::NAN),
        Err(GrainError::InvalidSampleRate(_))
    ));

    let after = pipeline.result().expect("result kept");
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(source.load_full().map(|s| s.len()), Some(44100));
    assert!(!params.candidates(PitchClass::A).is_empty());
}

#[test]
fn test_cancelled_run_publishes_nothing() {
    let (mut pipeline, params, source) = pipeline();
    let events = pipeline.events();
    // Long enough that cancellation lands mid-analysis
    let run = pipeline.start(sine(440.0, 120.0), SR).unwrap();
    assert!(pipeline.cancel());

    assert_eq!(finish(&events, run), AnalysisEvent::Cancelled { run });
    assert!(pipeline.result().is_none());
    assert!(source.load_full().is_none());
    assert!(params.candidates(PitchClass::A).is_empty());
    assert!(!pipeline.is_running());
}

#[test]
fn test_new_sample_supersedes_running_analysis() {
    let (mut pipeline, _, source) = pipeline();
    let events = pipeline.events();
    let first = pipeline.start(sine(440.0, 120.0), SR).unwrap();
    let second = pipeline.start(sine(220.0, 1.5), SR).unwrap();
    assert!(second > first);

    assert_eq!(finish(&events, first), AnalysisEvent::Cancelled { run: first });
    assert!(matches!(finish(&events, second), AnalysisEvent::Finished { .. }));
    let result = pipeline.result().expect("second result");
    assert_eq!(result.samples.len(), (1.5 * SR) as usize);
    assert_eq!(source.load_full().map(|s| s.len()), Some((1.5 * SR) as usize));
}

#[test]
fn test_wait_reports_completion() {
    let (mut pipeline, _, _) = pipeline();
    pipeline.start(sine(440.0, 0.5), SR).unwrap();
    assert!(pipeline.wait(TIMEOUT));
    assert!(pipeline.result().is_some());
    assert!(pipeline.wait(Duration::from_millis(1)), "nothing left to wait for");
}

#[test]
fn test_preset_restored_after_publish_keeps_its_candidates() {
    let preset = Parameters::new();
    preset
        .set_candidates(PitchClass::A, vec![ParamCandidate::new(0.9, 1, 1.0, 0.05, 1.0)])
        .unwrap();
    let state = preset.snapshot();

    let (mut pipeline, params, _) = pipeline();
    let events = pipeline.events();
    let run = pipeline.start(sine(440.0, 1.0), SR).unwrap();
    assert!(matches!(finish(&events, run), AnalysisEvent::Finished { .. }));
    params.restore(&state).unwrap();

    let candidates = params.candidates(PitchClass::A);
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].octave, 1);
    assert!((candidates[0].pos_ratio - 0.9).abs() < 1e-6);
    // The analysis result itself still carries what was detected
    let result = pipeline.result().expect("result published");
    assert_ne!(result.candidates[PitchClass::A.index()], candidates.as_ref().clone());
}
