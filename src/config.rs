//! Engine configuration
//!
//! A single [`EngineConfig`] is built at startup and handed to the
//! analysis pipeline, the synth and the audio surfaces. Stored as TOML,
//! JSON is accepted when parsing.

use crate::error::{GrainError, GrainResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Analysis settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Window size of the transient detector FFT
    pub fft_window: usize,
    /// Hop of the transient detector FFT
    pub fft_hop: usize,
    /// Window size used for pitch detection
    pub pitch_fft_size: usize,
    /// Hop used for pitch detection
    pub pitch_hop: usize,
    /// Samples shorter than this are rejected
    pub min_analysis_seconds: f32,
    /// How long a superseded analysis may take to stop
    pub cancel_timeout_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_window: 1024,
            fft_hop: 512,
            pitch_fft_size: 4096,
            pitch_hop: 4096,
            min_analysis_seconds: 0.1,
            cancel_timeout_ms: 2000,
        }
    }
}

/// Synth settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub max_grains: usize,
    pub bpm: f32,
    pub beats_per_bar: u32,
    /// Fixed scale applied to every generator's grain gain
    pub output_gain: f32,
    /// Seed for grain spray randomness, entropy when unset
    pub seed: Option<u64>,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            max_grains: 100,
            bpm: 120.0,
            beats_per_bar: 4,
            output_gain: 0.4,
            seed: None,
        }
    }
}

/// Audio device settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub block_size: usize,
    pub channels: usize,
    pub sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            block_size: 512,
            channels: 2,
            sample_rate: 44100,
        }
    }
}

/// Top level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub analysis: AnalysisConfig,
    pub synth: SynthConfig,
    pub audio: AudioConfig,
}

impl EngineConfig {
    /// Load from a file
    pub fn load(path: &Path) -> GrainResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse from string content
    pub fn parse(content: &str) -> GrainResult<Self> {
        let config: EngineConfig = match toml::from_str(content) {
            Ok(config) => config,
            Err(toml_err) => serde_json::from_str(content)
                .map_err(|_| GrainError::Config(format!("Could not parse config: {}", toml_err)))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file
    pub fn save(&self, path: &Path) -> GrainResult<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Convert to TOML string
    pub fn to_toml(&self) -> GrainResult<String> {
        toml::to_string_pretty(self).map_err(|e| GrainError::Serde(e.to_string()))
    }

    /// Reject sizes and rates the engine cannot run with
    pub fn validate(&self) -> GrainResult<()> {
        let a = &self.analysis;
        if a.fft_window < 4 || a.fft_hop == 0 || a.pitch_fft_size < 4 || a.pitch_hop == 0 {
            return Err(GrainError::Config(
                "FFT window must be at least 4 and hop sizes must be positive".to_string(),
            ));
        }
        if !(a.min_analysis_seconds >= 0.0) {
            return Err(GrainError::Config("min_analysis_seconds must be >= 0".to_string()));
        }
        let s = &self.synth;
        if s.max_grains == 0 {
            return Err(GrainError::Config("max_grains must be positive".to_string()));
        }
        if !(s.bpm > 0.0) || s.beats_per_bar == 0 {
            return Err(GrainError::Config("bpm and beats_per_bar must be positive".to_string()));
        }
        if self.audio.block_size == 0 || self.audio.channels == 0 || self.audio.sample_rate == 0 {
            return Err(GrainError::Config(
                "block_size, channels and sample_rate must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.analysis.pitch_fft_size, 4096);
        assert_eq!(config.synth.max_grains, 100);
    }

    #[test]
    fn test_parse_partial_toml_uses_defaults() {
        let config = EngineConfig::parse(
            r#"
            [synth]
            bpm = 90.0
            seed = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.synth.bpm, 90.0);
        assert_eq!(config.synth.seed, Some(7));
        assert_eq!(config.analysis.fft_window, 1024);
    }

    #[test]
    fn test_parse_json() {
        let config = EngineConfig::parse(r#"{"audio": {"block_size": 256}}"#).unwrap();
        assert_eq!(config.audio.block_size, 256);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = EngineConfig::parse("[synth]\nmax_grains = 0\n");
        assert!(matches!(result, Err(GrainError::Config(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grainbow.toml");
        let mut config = EngineConfig::default();
        config.synth.bpm = 140.0;
        config.save(&path).unwrap();
        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
