//! Error types for the grain engine
//!
//! Analysis, parameter I/O, configuration and the audio/MIDI surfaces all
//! report through [`GrainError`].

use std::fmt;

/// Errors produced by the engine
#[derive(Debug)]
pub enum GrainError {
    /// Sample is shorter than the minimum analyzable duration
    SampleTooShort { samples: usize, required: usize },
    /// Sample rate is zero, negative or not finite
    InvalidSampleRate(f32),
    /// Sample has no channels or no frames
    EmptySample,
    /// Analysis was cancelled before it finished
    Cancelled,
    /// Candidate list rejected by a strict setter
    InvalidCandidates(String),
    /// Identifier does not name any parameter
    UnknownParameter(String),
    /// Value outside the parameter's accepted range
    InvalidParameterValue { id: String, value: f32 },
    /// Configuration error
    Config(String),
    /// Serialization error
    Serde(String),
    /// IO error
    Io(std::io::Error),
    /// Audio device error
    Audio(String),
    /// MIDI device error
    Midi(String),
    /// Sample rate conversion failed
    Resample(String),
}

impl fmt::Display for GrainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrainError::SampleTooShort { samples, required } => write!(
                f,
                "Sample too short for analysis: {} samples (need at least {})",
                samples, required
            ),
            GrainError::InvalidSampleRate(rate) => write!(f, "Invalid sample rate: {}", rate),
            GrainError::EmptySample => write!(f, "Sample contains no audio"),
            GrainError::Cancelled => write!(f, "Analysis cancelled"),
            GrainError::InvalidCandidates(msg) => write!(f, "Invalid candidates: {}", msg),
            GrainError::UnknownParameter(id) => write!(f, "Unknown parameter: {}", id),
            GrainError::InvalidParameterValue { id, value } => {
                write!(f, "Invalid value {} for parameter {}", value, id)
            }
            GrainError::Config(msg) => write!(f, "Configuration error: {}", msg),
            GrainError::Serde(msg) => write!(f, "Serialization error: {}", msg),
            GrainError::Io(e) => write!(f, "IO error: {}", e),
            GrainError::Audio(msg) => write!(f, "Audio error: {}", msg),
            GrainError::Midi(msg) => write!(f, "MIDI error: {}", msg),
            GrainError::Resample(msg) => write!(f, "Resampling error: {}", msg),
        }
    }
}

impl std::error::Error for GrainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GrainError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GrainError {
    fn from(e: std::io::Error) -> Self {
        GrainError::Io(e)
    }
}

impl From<hound::Error> for GrainError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => GrainError::Io(io),
            other => GrainError::Serde(format!("WAV: {}", other)),
        }
    }
}

/// Result type for engine operations
pub type GrainResult<T> = Result<T, GrainError>;
