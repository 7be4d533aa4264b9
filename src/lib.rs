//! # grainbow - Pitch-aware granular synthesis
//!
//! grainbow analyzes a recorded sample for pitched material and plays it
//! back as clouds of grains keyed to incoming notes. A note picks grain
//! positions from the places in the sample where its pitch class (or a
//! close neighbour, re-pitched) was detected.
//!
//! ## Core Features
//!
//! - **Pitch analysis**: windowed FFT, harmonic pitch class profile and
//!   segment tracking into per pitch class events
//! - **Transient detection** from spectral energy
//! - **Background pipeline**: cancellable analysis with progress events,
//!   results published atomically
//! - **Hierarchical parameters**: Global, per note and per generator values
//!   with modulation from LFOs, envelopes and macros
//! - **Real-time grain engine**: fixed grain pool, per generator ADSR, pan,
//!   spray, reverse and octave controls
//!
//! ## Quick Start
//!
//! ```no_run
//! use grainbow::analysis::AnalysisPipeline;
//! use grainbow::config::EngineConfig;
//! use grainbow::parameters::Parameters;
//! use grainbow::synth::GranularSynth;
//! use arc_swap::ArcSwapOption;
//! use std::sync::Arc;
//!
//! let config = EngineConfig::default();
//! let params = Arc::new(Parameters::new());
//! let source = Arc::new(ArcSwapOption::empty());
//!
//! let mut pipeline = AnalysisPipeline::new(config.analysis.clone())
//!     .with_parameters(Arc::clone(&params))
//!     .with_source(Arc::clone(&source));
//! let samples = grainbow::sample_loader::load_wav("voice.wav").unwrap();
//! pipeline.start(samples.mono(), samples.sample_rate as f32).unwrap();
//!
//! let mut synth = GranularSynth::new(params, source, &config.synth, 44100.0, 2, 512);
//! synth.note_on(69, 1.0);
//! let mut block = vec![0.0f32; 512 * 2];
//! synth.process_block(&mut block);
//! ```
//!
//! ## Architecture
//!
//! - [`analysis`] - Fft, HPCP, pitch and transient detection, the pipeline
//! - [`candidates`] - Playback candidates per note from detected pitches
//! - [`parameters`] - Parameter hierarchy, presets
//! - [`modulators`] and [`modulation_router`] - Modulation sources and routing
//! - [`synth`] - Notes, grain scheduling and the audio block renderer
//! - [`audio`], [`midi_input`], [`render`] - Device and file surfaces

pub mod analysis;
pub mod audio;
pub mod candidates;
pub mod config;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod grain;
pub mod grain_pool;
pub mod midi_input;
pub mod modulation_router;
pub mod modulators;
pub mod parameters;
pub mod pitch_class;
pub mod render;
pub mod sample_loader;
pub mod synth;

pub use analysis::{AnalysisEvent, AnalysisPipeline, AnalysisResult, CancelToken};
pub use config::EngineConfig;
pub use error::{GrainError, GrainResult};
pub use parameters::{ParamLevel, ParamType, Parameters};
pub use pitch_class::PitchClass;
pub use synth::{GranularSynth, SourceSlot, SynthCommand};
