//! Serializable snapshot of the parameter tree
//!
//! The global level stores every value; note and generator levels store only
//! the parameters they override. Snapshots are written as TOML and read back
//! from TOML or JSON.

use super::{ParamCandidate, ParamLevel, ParamType, Parameters, NUM_GENERATORS};
use crate::error::{GrainError, GrainResult};
use crate::pitch_class::PitchClass;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratorState {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub candidate: usize,
    #[serde(default)]
    pub overrides: BTreeMap<String, f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteState {
    pub pitch_class: PitchClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solo: Option<usize>,
    #[serde(default)]
    pub overrides: BTreeMap<String, f32>,
    #[serde(default)]
    pub candidates: Vec<ParamCandidate>,
    #[serde(default)]
    pub generators: Vec<GeneratorState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParametersState {
    #[serde(default)]
    pub global: BTreeMap<String, f32>,
    #[serde(default)]
    pub notes: Vec<NoteState>,
}

impl ParametersState {
    pub fn load(path: &Path) -> GrainResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse TOML, falling back to JSON
    pub fn parse(content: &str) -> GrainResult<Self> {
        match toml::from_str(content) {
            Ok(state) => Ok(state),
            Err(toml_err) => serde_json::from_str(content)
                .map_err(|json_err| GrainError::Serde(format!("not TOML ({}) or JSON ({})", toml_err, json_err))),
        }
    }

    pub fn save(&self, path: &Path) -> GrainResult<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn to_toml(&self) -> GrainResult<String> {
        toml::to_string_pretty(self).map_err(|e| GrainError::Serde(e.to_string()))
    }

    pub fn to_json(&self) -> GrainResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| GrainError::Serde(e.to_string()))
    }
}

fn overrides(params: &Parameters, level: ParamLevel) -> BTreeMap<String, f32> {
    ParamType::ALL
        .iter()
        .filter(|ty| params.is_used(level, **ty))
        .map(|ty| (ty.name().to_string(), params.raw_value(level, *ty)))
        .collect()
}

fn apply_values(params: &Parameters, level: ParamLevel, values: &BTreeMap<String, f32>) -> GrainResult<()> {
    let mut result = Ok(());
    for (name, value) in values {
        let applied = ParamType::parse(name)
            .ok_or_else(|| GrainError::UnknownParameter(format!("{}_{}", level.id_prefix(), name)))
            .and_then(|ty| params.set_param(level, ty, *value));
        if let Err(e) = applied {
            warn!("Skipping preset value: {}", e);
            result = Err(e);
        }
    }
    result
}

impl Parameters {
    /// Capture the whole tree
    pub fn snapshot(&self) -> ParametersState {
        let global = ParamType::ALL
            .iter()
            .map(|ty| (ty.name().to_string(), self.raw_value(ParamLevel::Global, *ty)))
            .collect();
        let notes = PitchClass::ALL
            .iter()
            .map(|&pc| NoteState {
                pitch_class: pc,
                solo: self.solo(pc),
                overrides: overrides(self, ParamLevel::Note(pc)),
                candidates: self.candidates(pc).as_ref().clone(),
                generators: (0..NUM_GENERATORS)
                    .map(|g| GeneratorState {
                        enable: self.is_generator_enabled(pc, g),
                        candidate: self.candidate_index(pc, g),
                        overrides: overrides(self, ParamLevel::Generator(pc, g)),
                    })
                    .collect(),
            })
            .collect();
        ParametersState { global, notes }
    }

    /// Reset to defaults, then apply `state`
    ///
    /// Everything valid is applied even when part of the state is rejected;
    /// a note whose candidate list is invalid ends up with no candidates.
    /// The last error encountered is returned.
    pub fn restore(&self, state: &ParametersState) -> GrainResult<()> {
        self.reset_all();
        let mut result = apply_values(self, ParamLevel::Global, &state.global);

        for note in &state.notes {
            let pc = note.pitch_class;
            let mut note_result = apply_values(self, ParamLevel::Note(pc), &note.overrides);
            if let Err(e) = self.set_candidates(pc, note.candidates.clone()) {
                note_result = Err(e);
            }
            if let Err(e) = self.set_solo(pc, note.solo) {
                note_result = Err(e);
            }
            for (g, gen) in note.generators.iter().enumerate().take(NUM_GENERATORS) {
                let level = ParamLevel::Generator(pc, g);
                if let Err(e) = apply_values(self, level, &gen.overrides) {
                    note_result = Err(e);
                }
                if let Err(e) = self.set_generator_enabled(pc, g, gen.enable) {
                    note_result = Err(e);
                }
                if !self.candidates(pc).is_empty() {
                    if let Err(e) = self.set_candidate(pc, g, gen.candidate) {
                        note_result = Err(e);
                    }
                }
            }
            if note_result.is_err() {
                result = note_result;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_params() -> Parameters {
        let params = Parameters::new();
        params.set_param(ParamLevel::Global, ParamType::GrainRate, 0.75).unwrap();
        params.set_param(ParamLevel::Note(PitchClass::E), ParamType::PanAdjust, -0.4).unwrap();
        params
            .set_param(ParamLevel::Generator(PitchClass::E, 2), ParamType::OctaveAdjust, 1.0)
            .unwrap();
        params.set_generator_enabled(PitchClass::E, 2, true).unwrap();
        params.set_solo(PitchClass::G, Some(1)).unwrap();
        params
            .set_candidates(
                PitchClass::E,
                vec![
                    ParamCandidate::new(0.125, 0, 1.0, 0.25, 1.0),
                    ParamCandidate::new(0.5, -1, 0.9439, 0.125, 0.6),
                ],
            )
            .unwrap();
        params.set_candidate(PitchClass::E, 0, 1).unwrap();
        params
    }

    #[test]
    fn test_snapshot_only_records_overrides() {
        let state = sample_params().snapshot();
        assert_eq!(state.global.len(), ParamType::COUNT);
        let e = &state.notes[PitchClass::E.index()];
        assert_eq!(e.overrides.len(), 1);
        assert_eq!(e.overrides.get("pan_adjust"), Some(&-0.4));
        assert_eq!(e.generators[2].overrides.get("octave_adjust"), Some(&1.0));
        assert!(state.notes[PitchClass::C.index()].overrides.is_empty());
    }

    #[test]
    fn test_restore_reproduces_tree() {
        let original = sample_params();
        let state = original.snapshot();
        let restored = Parameters::new();
        restored.restore(&state).unwrap();
        assert_eq!(restored.snapshot(), state);
        assert_eq!(restored.solo(PitchClass::G), Some(1));
        assert_eq!(restored.candidate_index(PitchClass::E, 0), 1);
        assert!(restored.is_used(ParamLevel::Note(PitchClass::E), ParamType::PanAdjust));
        assert!(!restored.is_used(ParamLevel::Note(PitchClass::D), ParamType::PanAdjust));
    }

    #[test]
    fn test_toml_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preset.toml");
        let state = sample_params().snapshot();
        state.save(&path).unwrap();
        let loaded = ParametersState::load(&path).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_json_accepted() {
        let state = sample_params().snapshot();
        let json = state.to_json().unwrap();
        assert_eq!(ParametersState::parse(&json).unwrap(), state);
        assert!(ParametersState::parse("not a preset {").is_err());
    }

    #[test]
    fn test_bad_candidates_only_affect_their_note() {
        let mut state = sample_params().snapshot();
        state.notes[PitchClass::E.index()].candidates[0].pos_ratio = 3.0;
        let params = Parameters::new();
        let result = params.restore(&state);
        assert!(matches!(result, Err(GrainError::InvalidCandidates(_))));
        assert!(params.candidates(PitchClass::E).is_empty());
        // The rest of the tree still restored
        assert_eq!(params.solo(PitchClass::G), Some(1));
        assert!((params.get_float_param(ParamLevel::Global, ParamType::GrainRate, None) - 0.75).abs() < 1e-6);
        assert_eq!(
            params.get_float_param(ParamLevel::Note(PitchClass::E), ParamType::PanAdjust, None),
            -0.4
        );
    }

    #[test]
    fn test_unknown_names_reported() {
        let mut state = ParametersState::default();
        state.global.insert("wobble".to_string(), 1.0);
        state.global.insert("gain".to_string(), 0.25);
        let params = Parameters::new();
        assert!(matches!(params.restore(&state), Err(GrainError::UnknownParameter(_))));
        assert_eq!(params.raw_value(ParamLevel::Global, ParamType::Gain), 0.25);
    }
}
