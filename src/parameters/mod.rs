//! Hierarchical synth parameters
//!
//! Three levels hold the same [`ParamType`] set: one global level, one level
//! per pitch class and [`NUM_GENERATORS`] generator levels per note. Each
//! level keeps a `used` flag per parameter; resolution walks
//! Generator → Note → Global and takes the first level that has the flag
//! set. The global level is always used.
//!
//! Values live in atomics so the audio thread can read while a control
//! thread writes. Readers may see a value one block late, never a torn one.
//! Candidate lists are swapped whole through `ArcSwap`.
//!
//! # Example
//! ```ignore
//! let params = Parameters::new();
//! let gen = ParamLevel::Generator(PitchClass::A, 1);
//! params.set_param(ParamLevel::Note(PitchClass::A), ParamType::Gain, 0.3)?;
//! assert_eq!(params.get_used_param(gen, ParamType::Gain), ParamLevel::Note(PitchClass::A));
//! ```

mod preset;
mod types;

pub use preset::{GeneratorState, NoteState, ParametersState};
pub use types::{AtomicF32, ParamCandidate, ParamKind, ParamType, MAX_CANDIDATES, NUM_GENERATORS, SYNC_DIV_MAX};

use crate::error::{GrainError, GrainResult};
use crate::modulation_router::ModulationRouter;
use crate::pitch_class::{PitchClass, NUM_PITCH_CLASSES};
use arc_swap::ArcSwap;
use crossbeam::channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Pending change notifications kept before new ones are dropped
pub const CHANGE_QUEUE_SIZE: usize = 1024;

const SOLO_NONE: i32 = -1;

/// One level of the parameter hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamLevel {
    Global,
    Note(PitchClass),
    Generator(PitchClass, usize),
}

impl ParamLevel {
    /// Level this one falls back to
    pub fn parent(self) -> Option<ParamLevel> {
        match self {
            ParamLevel::Global => None,
            ParamLevel::Note(_) => Some(ParamLevel::Global),
            ParamLevel::Generator(pc, _) => Some(ParamLevel::Note(pc)),
        }
    }

    /// Flat slot of `ty` at this level, used as the modulation key
    pub fn param_index(self, ty: ParamType) -> usize {
        let level = match self {
            ParamLevel::Global => 0,
            ParamLevel::Note(pc) => 1 + pc.index(),
            ParamLevel::Generator(pc, g) => 1 + NUM_PITCH_CLASSES + pc.index() * NUM_GENERATORS + g,
        };
        ParamType::COUNT * level + ty.index()
    }

    fn id_prefix(self) -> String {
        match self {
            ParamLevel::Global => "global".to_string(),
            ParamLevel::Note(pc) => pc.name().to_string(),
            ParamLevel::Generator(pc, g) => format!("{}_gen_{}", pc.name(), g),
        }
    }

    /// Identifier of `ty` at this level, e.g. `A_gen_1_grain_rate`
    pub fn param_id(self, ty: ParamType) -> String {
        format!("{}_{}", self.id_prefix(), ty.name())
    }
}

/// Addressable parameter parsed from an identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamId {
    Common(ParamLevel, ParamType),
    Enable(PitchClass, usize),
    Candidate(PitchClass, usize),
    Solo(PitchClass),
}

impl ParamId {
    pub fn parse(id: &str) -> GrainResult<ParamId> {
        let unknown = || GrainError::UnknownParameter(id.to_string());
        if let Some(name) = id.strip_prefix("global_") {
            return ParamType::parse(name)
                .map(|ty| ParamId::Common(ParamLevel::Global, ty))
                .ok_or_else(unknown);
        }
        let (pc_name, rest) = id.split_once('_').ok_or_else(unknown)?;
        let pc = PitchClass::parse(pc_name).ok_or_else(unknown)?;
        if rest == "solo" {
            return Ok(ParamId::Solo(pc));
        }
        if let Some(gen_rest) = rest.strip_prefix("gen_") {
            let (g, name) = gen_rest.split_once('_').ok_or_else(unknown)?;
            let g: usize = g.parse().map_err(|_| unknown())?;
            if g >= NUM_GENERATORS {
                return Err(unknown());
            }
            return match name {
                "enable" => Ok(ParamId::Enable(pc, g)),
                "candidate" => Ok(ParamId::Candidate(pc, g)),
                _ => ParamType::parse(name)
                    .map(|ty| ParamId::Common(ParamLevel::Generator(pc, g), ty))
                    .ok_or_else(unknown),
            };
        }
        ParamType::parse(rest)
            .map(|ty| ParamId::Common(ParamLevel::Note(pc), ty))
            .ok_or_else(unknown)
    }
}

/// Notification sent when a parameter changes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamChange {
    Value { level: ParamLevel, ty: ParamType, value: f32 },
    Reset { level: ParamLevel, ty: ParamType },
    Enable { pc: PitchClass, generator: usize, enabled: bool },
    Candidate { pc: PitchClass, generator: usize, index: usize },
    Solo { pc: PitchClass, generator: Option<usize> },
    Candidates { pc: PitchClass, count: usize },
    AllReset,
}

/// Values and used flags for one level
#[derive(Debug)]
pub struct ParamCommon {
    values: [AtomicF32; ParamType::COUNT],
    used: [AtomicBool; ParamType::COUNT],
}

impl Default for ParamCommon {
    fn default() -> Self {
        Self {
            values: std::array::from_fn(|i| AtomicF32::new(ParamType::ALL[i].default_value())),
            used: std::array::from_fn(|_| AtomicBool::new(false)),
        }
    }
}

impl ParamCommon {
    pub fn value(&self, ty: ParamType) -> f32 {
        self.values[ty.index()].load()
    }

    pub fn is_used(&self, ty: ParamType) -> bool {
        self.used[ty.index()].load(Ordering::Acquire)
    }

    fn store(&self, ty: ParamType, value: f32) {
        self.values[ty.index()].store(value);
    }

    fn set_used(&self, ty: ParamType, used: bool) {
        self.used[ty.index()].store(used, Ordering::Release);
    }

    fn reset(&self) {
        for ty in ParamType::ALL {
            self.store(ty, ty.default_value());
            self.set_used(ty, false);
        }
    }
}

#[derive(Debug)]
pub struct ParamGenerator {
    pub common: ParamCommon,
    enable: AtomicBool,
    candidate: AtomicUsize,
}

impl ParamGenerator {
    fn new(idx: usize) -> Self {
        Self {
            common: ParamCommon::default(),
            enable: AtomicBool::new(idx == 0),
            candidate: AtomicUsize::new(0),
        }
    }

    fn reset(&self, idx: usize) {
        self.common.reset();
        self.enable.store(idx == 0, Ordering::Release);
        self.candidate.store(0, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct ParamNote {
    pub common: ParamCommon,
    pub generators: Vec<ParamGenerator>,
    candidates: ArcSwap<Vec<ParamCandidate>>,
    solo: AtomicI32,
}

impl Default for ParamNote {
    fn default() -> Self {
        Self {
            common: ParamCommon::default(),
            generators: (0..NUM_GENERATORS).map(ParamGenerator::new).collect(),
            candidates: ArcSwap::from_pointee(Vec::new()),
            solo: AtomicI32::new(SOLO_NONE),
        }
    }
}

/// The full parameter tree
pub struct Parameters {
    global: ParamCommon,
    notes: Vec<ParamNote>,
    change_tx: Sender<ParamChange>,
    change_rx: Receiver<ParamChange>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self::new()
    }
}

impl Parameters {
    pub fn new() -> Self {
        let (change_tx, change_rx) = bounded(CHANGE_QUEUE_SIZE);
        Self {
            global: ParamCommon::default(),
            notes: (0..NUM_PITCH_CLASSES).map(|_| ParamNote::default()).collect(),
            change_tx,
            change_rx,
        }
    }

    /// Receiver for change notifications; every clone competes for events
    pub fn changes(&self) -> Receiver<ParamChange> {
        self.change_rx.clone()
    }

    fn notify(&self, change: ParamChange) {
        // A full queue means nobody is listening; drop the event
        let _ = self.change_tx.try_send(change);
    }

    pub fn note(&self, pc: PitchClass) -> &ParamNote {
        &self.notes[pc.index()]
    }

    fn generator(&self, pc: PitchClass, g: usize) -> GrainResult<&ParamGenerator> {
        self.note(pc)
            .generators
            .get(g)
            .ok_or_else(|| GrainError::UnknownParameter(format!("{}_gen_{}", pc.name(), g)))
    }

    fn common(&self, level: ParamLevel) -> Option<&ParamCommon> {
        match level {
            ParamLevel::Global => Some(&self.global),
            ParamLevel::Note(pc) => Some(&self.note(pc).common),
            ParamLevel::Generator(pc, g) => self.note(pc).generators.get(g).map(|gen| &gen.common),
        }
    }

    fn common_checked(&self, level: ParamLevel, ty: ParamType) -> GrainResult<&ParamCommon> {
        self.common(level)
            .ok_or_else(|| GrainError::UnknownParameter(level.param_id(ty)))
    }

    /// Level whose value of `ty` is in effect for `level`
    pub fn get_used_param(&self, level: ParamLevel, ty: ParamType) -> ParamLevel {
        let mut cur = level;
        loop {
            match cur.parent() {
                None => return cur,
                Some(parent) => {
                    if self.common(cur).is_some_and(|c| c.is_used(ty)) {
                        return cur;
                    }
                    cur = parent;
                }
            }
        }
    }

    /// Stored value at exactly `level`, ignoring used flags
    pub fn raw_value(&self, level: ParamLevel, ty: ParamType) -> f32 {
        self.common(level).map_or(ty.default_value(), |c| c.value(ty))
    }

    /// Resolved value of `ty`, optionally with modulation applied
    ///
    /// Always finite and inside the parameter's range.
    pub fn get_float_param(&self, level: ParamLevel, ty: ParamType, modulation: Option<&ModulationRouter>) -> f32 {
        let used = self.get_used_param(level, ty);
        let raw = self.raw_value(used, ty);
        let value = if raw.is_finite() { ty.sanitize(raw) } else { ty.default_value() };
        match modulation {
            Some(router) => {
                let modulated = router.apply(used.param_index(ty), ty.normalize(value));
                ty.sanitize(ty.denormalize(modulated))
            }
            None => value,
        }
    }

    pub fn get_int_param(&self, level: ParamLevel, ty: ParamType, modulation: Option<&ModulationRouter>) -> i32 {
        self.get_float_param(level, ty, modulation).round() as i32
    }

    pub fn get_bool_param(&self, level: ParamLevel, ty: ParamType, modulation: Option<&ModulationRouter>) -> bool {
        self.get_float_param(level, ty, modulation) >= 0.5
    }

    /// Set `ty` at `level` and mark the level as overriding its parent
    pub fn set_param(&self, level: ParamLevel, ty: ParamType, value: f32) -> GrainResult<()> {
        if !value.is_finite() {
            return Err(GrainError::InvalidParameterValue {
                id: level.param_id(ty),
                value,
            });
        }
        let common = self.common_checked(level, ty)?;
        let value = ty.sanitize(value);
        common.store(ty, value);
        common.set_used(ty, true);
        self.notify(ParamChange::Value { level, ty, value });
        Ok(())
    }

    /// Drop the override at `level` so the parent's value applies again
    pub fn reset_param(&self, level: ParamLevel, ty: ParamType) -> GrainResult<()> {
        let common = self.common_checked(level, ty)?;
        common.store(ty, ty.default_value());
        common.set_used(ty, false);
        self.notify(ParamChange::Reset { level, ty });
        Ok(())
    }

    pub fn is_used(&self, level: ParamLevel, ty: ParamType) -> bool {
        match level {
            ParamLevel::Global => true,
            _ => self.common(level).is_some_and(|c| c.is_used(ty)),
        }
    }

    /// Toggle an override flag without touching the stored value
    pub fn set_used(&self, level: ParamLevel, ty: ParamType, used: bool) -> GrainResult<()> {
        if level == ParamLevel::Global {
            return Ok(());
        }
        self.common_checked(level, ty)?.set_used(ty, used);
        Ok(())
    }

    pub fn is_generator_enabled(&self, pc: PitchClass, g: usize) -> bool {
        self.generator(pc, g)
            .map(|gen| gen.enable.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn set_generator_enabled(&self, pc: PitchClass, g: usize, enabled: bool) -> GrainResult<()> {
        self.generator(pc, g)?.enable.store(enabled, Ordering::Release);
        self.notify(ParamChange::Enable {
            pc,
            generator: g,
            enabled,
        });
        Ok(())
    }

    pub fn solo(&self, pc: PitchClass) -> Option<usize> {
        usize::try_from(self.note(pc).solo.load(Ordering::Acquire)).ok()
    }

    pub fn set_solo(&self, pc: PitchClass, generator: Option<usize>) -> GrainResult<()> {
        let raw = match generator {
            Some(g) => {
                self.generator(pc, g)?;
                g as i32
            }
            None => SOLO_NONE,
        };
        self.note(pc).solo.store(raw, Ordering::Release);
        self.notify(ParamChange::Solo { pc, generator });
        Ok(())
    }

    /// A soloed generator plays alone, otherwise the enable flag decides
    pub fn should_play_generator(&self, pc: PitchClass, g: usize) -> bool {
        match self.solo(pc) {
            Some(solo) => solo == g,
            None => self.is_generator_enabled(pc, g),
        }
    }

    pub fn candidates(&self, pc: PitchClass) -> Arc<Vec<ParamCandidate>> {
        self.note(pc).candidates.load_full()
    }

    /// Replace the candidate list of `pc`
    ///
    /// An invalid list leaves the note with no candidates and returns
    /// [`GrainError::InvalidCandidates`].
    pub fn set_candidates(&self, pc: PitchClass, candidates: Vec<ParamCandidate>) -> GrainResult<()> {
        let note = self.note(pc);
        let checked = validate_candidates(&candidates);
        let installed = if checked.is_ok() { candidates } else { Vec::new() };
        let count = installed.len();
        note.candidates.store(Arc::new(installed));
        for (g, gen) in note.generators.iter().enumerate() {
            gen.candidate.store(g.min(count.saturating_sub(1)), Ordering::Release);
        }
        self.notify(ParamChange::Candidates { pc, count });
        match checked {
            Ok(()) => {
                debug!("{}: {} candidates", pc.name(), count);
                Ok(())
            }
            Err(reason) => {
                warn!("Rejected candidate list for {}: {}", pc.name(), reason);
                Err(GrainError::InvalidCandidates(format!("{}: {}", pc.name(), reason)))
            }
        }
    }

    /// Install a full set of analysis candidates, one list per pitch class
    pub fn install_candidates(&self, lists: &[Vec<ParamCandidate>; NUM_PITCH_CLASSES]) -> GrainResult<()> {
        let mut result = Ok(());
        for pc in PitchClass::ALL {
            if let Err(e) = self.set_candidates(pc, lists[pc.index()].clone()) {
                result = Err(e);
            }
        }
        result
    }

    pub fn candidate_index(&self, pc: PitchClass, g: usize) -> usize {
        self.generator(pc, g)
            .map(|gen| gen.candidate.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Point generator `g` at candidate `index`
    pub fn set_candidate(&self, pc: PitchClass, g: usize, index: usize) -> GrainResult<()> {
        let count = self.note(pc).candidates.load().len();
        if index >= count {
            return Err(GrainError::InvalidCandidates(format!(
                "{}: candidate {} out of range ({} available)",
                pc.name(),
                index,
                count
            )));
        }
        self.generator(pc, g)?.candidate.store(index, Ordering::Release);
        self.notify(ParamChange::Candidate {
            pc,
            generator: g,
            index,
        });
        Ok(())
    }

    /// Candidate generator `g` of `pc` currently plays, if any
    pub fn selected_candidate(&self, pc: PitchClass, g: usize) -> Option<ParamCandidate> {
        let idx = self.candidate_index(pc, g);
        self.note(pc).candidates.load().get(idx).copied()
    }

    /// Value behind an identifier; bools read as 0/1, no solo as -1
    pub fn get_by_id(&self, id: &str) -> GrainResult<f32> {
        Ok(match ParamId::parse(id)? {
            ParamId::Common(level, ty) => self.raw_value(level, ty),
            ParamId::Enable(pc, g) => bool_to_f32(self.is_generator_enabled(pc, g)),
            ParamId::Candidate(pc, g) => self.candidate_index(pc, g) as f32,
            ParamId::Solo(pc) => self.solo(pc).map_or(SOLO_NONE as f32, |g| g as f32),
        })
    }

    pub fn set_by_id(&self, id: &str, value: f32) -> GrainResult<()> {
        if !value.is_finite() {
            return Err(GrainError::InvalidParameterValue {
                id: id.to_string(),
                value,
            });
        }
        match ParamId::parse(id)? {
            ParamId::Common(level, ty) => self.set_param(level, ty, value),
            ParamId::Enable(pc, g) => self.set_generator_enabled(pc, g, value >= 0.5),
            ParamId::Candidate(pc, g) => {
                if value < 0.0 {
                    return Err(GrainError::InvalidParameterValue {
                        id: id.to_string(),
                        value,
                    });
                }
                self.set_candidate(pc, g, value.round() as usize)
            }
            ParamId::Solo(pc) => {
                let solo = if value < 0.0 { None } else { Some(value.round() as usize) };
                self.set_solo(pc, solo)
            }
        }
    }

    /// Identifiers of every addressable parameter
    pub fn all_ids() -> Vec<String> {
        let mut ids: Vec<String> = ParamType::ALL
            .iter()
            .map(|ty| ParamLevel::Global.param_id(*ty))
            .collect();
        for pc in PitchClass::ALL {
            ids.extend(ParamType::ALL.iter().map(|ty| ParamLevel::Note(pc).param_id(*ty)));
            ids.push(format!("{}_solo", pc.name()));
            for g in 0..NUM_GENERATORS {
                let level = ParamLevel::Generator(pc, g);
                ids.extend(ParamType::ALL.iter().map(|ty| level.param_id(*ty)));
                ids.push(format!("{}_gen_{}_enable", pc.name(), g));
                ids.push(format!("{}_gen_{}_candidate", pc.name(), g));
            }
        }
        ids
    }

    /// Restore every level to defaults; candidate lists are kept
    pub fn reset_all(&self) {
        self.global.reset();
        for note in &self.notes {
            note.common.reset();
            note.solo.store(SOLO_NONE, Ordering::Release);
            let count = note.candidates.load().len();
            for (g, gen) in note.generators.iter().enumerate() {
                gen.reset(g);
                gen.candidate.store(g.min(count.saturating_sub(1)), Ordering::Release);
            }
        }
        self.notify(ParamChange::AllReset);
    }
}

fn bool_to_f32(b: bool) -> f32 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn validate_candidates(candidates: &[ParamCandidate]) -> Result<(), String> {
    if candidates.len() > MAX_CANDIDATES {
        return Err(format!("{} candidates, at most {} allowed", candidates.len(), MAX_CANDIDATES));
    }
    for (i, c) in candidates.iter().enumerate() {
        c.validate().map_err(|e| format!("candidate {}: {}", i, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modulation_router::ModSourceId;

    const A: PitchClass = PitchClass::A;

    #[test]
    fn test_param_index_layout() {
        assert_eq!(ParamLevel::Global.param_index(ParamType::Gain), 0);
        assert_eq!(
            ParamLevel::Note(PitchClass::C).param_index(ParamType::Gain),
            ParamType::COUNT
        );
        let last = ParamLevel::Generator(PitchClass::B, NUM_GENERATORS - 1).param_index(ParamType::FilterResonance);
        let total = ParamType::COUNT * (1 + NUM_PITCH_CLASSES + NUM_PITCH_CLASSES * NUM_GENERATORS);
        assert_eq!(last, total - 1);
    }

    #[test]
    fn test_set_marks_level_used() {
        let params = Parameters::new();
        let gen = ParamLevel::Generator(A, 2);
        assert_eq!(params.get_used_param(gen, ParamType::GrainRate), ParamLevel::Global);
        params.set_param(gen, ParamType::GrainRate, 0.9).unwrap();
        assert!(params.is_used(gen, ParamType::GrainRate));
        assert_eq!(params.get_used_param(gen, ParamType::GrainRate), gen);
        assert!((params.get_float_param(gen, ParamType::GrainRate, None) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_reset_unwinds_one_level() {
        let params = Parameters::new();
        let note = ParamLevel::Note(A);
        let gen = ParamLevel::Generator(A, 0);
        params.set_param(ParamLevel::Global, ParamType::Gain, 0.1).unwrap();
        params.set_param(note, ParamType::Gain, 0.2).unwrap();
        params.set_param(gen, ParamType::Gain, 0.3).unwrap();
        assert_eq!(params.get_float_param(gen, ParamType::Gain, None), 0.3);
        params.reset_param(gen, ParamType::Gain).unwrap();
        assert_eq!(params.get_float_param(gen, ParamType::Gain, None), 0.2);
        params.reset_param(note, ParamType::Gain).unwrap();
        assert_eq!(params.get_float_param(gen, ParamType::Gain, None), 0.1);
    }

    #[test]
    fn test_values_clamped_and_nan_rejected() {
        let params = Parameters::new();
        params.set_param(ParamLevel::Global, ParamType::PanAdjust, 7.0).unwrap();
        assert_eq!(params.get_float_param(ParamLevel::Global, ParamType::PanAdjust, None), 1.0);
        let err = params.set_param(ParamLevel::Global, ParamType::Gain, f32::NAN);
        assert!(matches!(err, Err(GrainError::InvalidParameterValue { .. })));
        assert_eq!(params.get_float_param(ParamLevel::Global, ParamType::Gain, None), 0.8);
    }

    #[test]
    fn test_modulated_read_leaves_raw_value() {
        let params = Parameters::new();
        let mut router = ModulationRouter::new();
        router.macro_mut(0).unwrap().value = 1.0;
        let slot = ParamLevel::Global.param_index(ParamType::Gain);
        router.add_route(slot, ModSourceId::Macro(0), -0.5).unwrap();
        router.process_block();
        let level = ParamLevel::Generator(A, 0);
        let modulated = params.get_float_param(level, ParamType::Gain, Some(&router));
        assert!((modulated - 0.3).abs() < 1e-6, "got {}", modulated);
        assert_eq!(params.get_float_param(level, ParamType::Gain, None), 0.8);
    }

    #[test]
    fn test_generator_enable_and_solo() {
        let params = Parameters::new();
        assert!(params.should_play_generator(A, 0));
        assert!(!params.should_play_generator(A, 1));
        params.set_generator_enabled(A, 1, true).unwrap();
        assert!(params.should_play_generator(A, 1));
        params.set_solo(A, Some(3)).unwrap();
        assert!(!params.should_play_generator(A, 0));
        assert!(params.should_play_generator(A, 3));
        assert!(params.set_solo(A, Some(NUM_GENERATORS)).is_err());
        params.set_solo(A, None).unwrap();
        assert!(params.should_play_generator(A, 0));
    }

    #[test]
    fn test_candidates_set_starting_positions() {
        let params = Parameters::new();
        let list = vec![
            ParamCandidate::new(0.1, 0, 1.0, 0.3, 1.0),
            ParamCandidate::new(0.6, 0, 1.0594, 0.2, 0.7),
        ];
        params.set_candidates(A, list.clone()).unwrap();
        assert_eq!(params.candidate_index(A, 0), 0);
        assert_eq!(params.candidate_index(A, 1), 1);
        assert_eq!(params.candidate_index(A, 3), 1);
        assert_eq!(params.selected_candidate(A, 1), Some(list[1]));
        assert!(params.set_candidate(A, 0, 2).is_err());
        params.set_candidate(A, 0, 1).unwrap();
        assert_eq!(params.selected_candidate(A, 0), Some(list[1]));
    }

    #[test]
    fn test_invalid_candidates_fall_back_to_empty() {
        let params = Parameters::new();
        params
            .set_candidates(PitchClass::E, vec![ParamCandidate::new(0.2, 0, 1.0, 0.1, 1.0)])
            .unwrap();
        let too_many = vec![ParamCandidate::new(0.2, 0, 1.0, 0.1, 1.0); MAX_CANDIDATES + 1];
        let err = params.set_candidates(PitchClass::E, too_many);
        assert!(matches!(err, Err(GrainError::InvalidCandidates(_))));
        assert!(params.candidates(PitchClass::E).is_empty());
        assert_eq!(params.selected_candidate(PitchClass::E, 0), None);
    }

    #[test]
    fn test_param_id_parsing() {
        assert_eq!(
            ParamId::parse("global_gain").unwrap(),
            ParamId::Common(ParamLevel::Global, ParamType::Gain)
        );
        assert_eq!(
            ParamId::parse("Cs_pitch_spray").unwrap(),
            ParamId::Common(ParamLevel::Note(PitchClass::Cs), ParamType::PitchSpray)
        );
        assert_eq!(
            ParamId::parse("A_gen_2_grain_tilt").unwrap(),
            ParamId::Common(ParamLevel::Generator(A, 2), ParamType::GrainTilt)
        );
        assert_eq!(ParamId::parse("A_gen_3_enable").unwrap(), ParamId::Enable(A, 3));
        assert_eq!(ParamId::parse("B_gen_0_candidate").unwrap(), ParamId::Candidate(PitchClass::B, 0));
        assert_eq!(ParamId::parse("G_solo").unwrap(), ParamId::Solo(PitchClass::G));
        assert!(ParamId::parse("A_gen_4_enable").is_err());
        assert!(ParamId::parse("H_gain").is_err());
        assert!(ParamId::parse("global_volume").is_err());
    }

    #[test]
    fn test_every_id_is_addressable() {
        let params = Parameters::new();
        for id in Parameters::all_ids() {
            assert!(params.get_by_id(&id).is_ok(), "{} not readable", id);
        }
        params.set_by_id("D_gen_1_reverse", 1.0).unwrap();
        assert!(params.get_bool_param(ParamLevel::Generator(PitchClass::D, 1), ParamType::Reverse, None));
        params.set_by_id("D_solo", 2.0).unwrap();
        assert_eq!(params.get_by_id("D_solo").unwrap(), 2.0);
        params.set_by_id("D_solo", -1.0).unwrap();
        assert_eq!(params.solo(PitchClass::D), None);
    }

    #[test]
    fn test_changes_are_published() {
        let params = Parameters::new();
        let rx = params.changes();
        params.set_param(ParamLevel::Note(A), ParamType::Sustain, 0.5).unwrap();
        match rx.try_recv() {
            Ok(ParamChange::Value { level, ty, value }) => {
                assert_eq!(level, ParamLevel::Note(A));
                assert_eq!(ty, ParamType::Sustain);
                assert_eq!(value, 0.5);
            }
            other => panic!("unexpected change {:?}", other),
        }
    }

    #[test]
    fn test_full_change_queue_drops_events() {
        let params = Parameters::new();
        for _ in 0..CHANGE_QUEUE_SIZE + 10 {
            params.set_param(ParamLevel::Global, ParamType::Gain, 0.5).unwrap();
        }
        assert_eq!(params.changes().len(), CHANGE_QUEUE_SIZE);
    }

    #[test]
    fn test_reset_all() {
        let params = Parameters::new();
        params.set_param(ParamLevel::Generator(A, 1), ParamType::Attack, 1.5).unwrap();
        params.set_generator_enabled(A, 2, true).unwrap();
        params.set_solo(A, Some(2)).unwrap();
        params.reset_all();
        assert!(!params.is_used(ParamLevel::Generator(A, 1), ParamType::Attack));
        assert!(!params.is_generator_enabled(A, 2));
        assert_eq!(params.solo(A), None);
        assert_eq!(
            params.get_float_param(ParamLevel::Generator(A, 1), ParamType::Attack, None),
            ParamType::Attack.default_value()
        );
    }
}
