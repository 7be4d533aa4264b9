//! Modulation routing
//!
//! Owns the modulation sources and maps parameter slots (see
//! [`crate::parameters::ParamLevel::param_index`]) to a source and depth.
//! Lives on the audio thread: sources tick once per block, before any
//! parameter is resolved for that block.

use crate::error::{GrainError, GrainResult};
use crate::modulators::{Lfo, LfoShape, Macro, ModEnvelope, ModSource, NUM_ENVS, NUM_LFOS, NUM_MACROS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Identifies one modulation source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModSourceId {
    Lfo(usize),
    Env(usize),
    Macro(usize),
}

impl ModSourceId {
    pub fn parse(s: &str) -> Option<Self> {
        let (kind, idx) = s.split_at(s.find(|c: char| c.is_ascii_digit())?);
        let idx: usize = idx.parse().ok()?;
        match kind {
            "lfo" if idx < NUM_LFOS => Some(ModSourceId::Lfo(idx)),
            "env" if idx < NUM_ENVS => Some(ModSourceId::Env(idx)),
            "macro" if idx < NUM_MACROS => Some(ModSourceId::Macro(idx)),
            _ => None,
        }
    }
}

/// A source applied to a parameter slot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Modulation {
    pub source: ModSourceId,
    /// Scale of the source output, -1..1
    pub depth: f32,
}

/// Main modulation router
pub struct ModulationRouter {
    lfos: Vec<Lfo>,
    envs: Vec<ModEnvelope>,
    macros: Vec<Macro>,
    routes: HashMap<usize, Modulation>,
}

impl Default for ModulationRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ModulationRouter {
    pub fn new() -> Self {
        Self {
            lfos: (0..NUM_LFOS).map(|_| Lfo::new(LfoShape::Sine, 1.0)).collect(),
            envs: (0..NUM_ENVS).map(|_| ModEnvelope::default()).collect(),
            macros: (0..NUM_MACROS).map(|_| Macro::default()).collect(),
            routes: HashMap::new(),
        }
    }

    pub fn prepare(&mut self, block_size: usize, sample_rate: f32) {
        for source in self.sources_mut() {
            source.prepare(block_size, sample_rate);
        }
    }

    /// Tempo for synced LFOs
    pub fn set_tempo(&mut self, bpm: f32, beats_per_bar: u32) {
        let bars_per_sec = bpm / 60.0 / beats_per_bar.max(1) as f32;
        for lfo in &mut self.lfos {
            lfo.set_sync_rate(bars_per_sec);
        }
    }

    /// Advance every source by one block
    pub fn process_block(&mut self) {
        for source in self.sources_mut() {
            source.process_block();
        }
    }

    /// Retrigger LFOs and open the envelopes
    pub fn note_on(&mut self, ts: i64) {
        for lfo in &mut self.lfos {
            lfo.check_retrigger();
        }
        for env in &mut self.envs {
            env.note_on(ts);
        }
    }

    pub fn note_off(&mut self, ts: i64) {
        for env in &mut self.envs {
            env.note_off(ts);
        }
    }

    /// Output of `source` for the current block
    pub fn output(&self, source: ModSourceId) -> f32 {
        match source {
            ModSourceId::Lfo(i) => self.lfos.get(i).map_or(0.0, |s| s.output()),
            ModSourceId::Env(i) => self.envs.get(i).map_or(0.0, |s| s.output()),
            ModSourceId::Macro(i) => self.macros.get(i).map_or(0.0, |s| s.output()),
        }
    }

    /// Route `source` to parameter slot `param_index`, replacing any previous route
    pub fn add_route(&mut self, param_index: usize, source: ModSourceId, depth: f32) -> GrainResult<()> {
        if !self.source_exists(source) {
            return Err(GrainError::Config(format!("no modulation source {:?}", source)));
        }
        if !depth.is_finite() {
            return Err(GrainError::Config(format!("invalid modulation depth {}", depth)));
        }
        let depth = depth.clamp(-1.0, 1.0);
        debug!("Modulation route {:?} -> slot {} (depth {})", source, param_index, depth);
        self.routes.insert(param_index, Modulation { source, depth });
        Ok(())
    }

    pub fn remove_route(&mut self, param_index: usize) -> Option<Modulation> {
        self.routes.remove(&param_index)
    }

    pub fn route(&self, param_index: usize) -> Option<&Modulation> {
        self.routes.get(&param_index)
    }

    /// Apply the route on `param_index` (if any) to a normalized value
    pub fn apply(&self, param_index: usize, value_0to1: f32) -> f32 {
        match self.routes.get(&param_index) {
            Some(m) => (value_0to1 + m.depth * self.output(m.source)).clamp(0.0, 1.0),
            None => value_0to1,
        }
    }

    /// Clear all routes
    pub fn clear(&mut self) {
        self.routes.clear();
    }

    pub fn lfo_mut(&mut self, idx: usize) -> Option<&mut Lfo> {
        self.lfos.get_mut(idx)
    }

    pub fn env_mut(&mut self, idx: usize) -> Option<&mut ModEnvelope> {
        self.envs.get_mut(idx)
    }

    pub fn macro_mut(&mut self, idx: usize) -> Option<&mut Macro> {
        self.macros.get_mut(idx)
    }

    fn source_exists(&self, source: ModSourceId) -> bool {
        match source {
            ModSourceId::Lfo(i) => i < self.lfos.len(),
            ModSourceId::Env(i) => i < self.envs.len(),
            ModSourceId::Macro(i) => i < self.macros.len(),
        }
    }

    fn sources_mut(&mut self) -> impl Iterator<Item = &mut dyn ModSource> {
        self.lfos
            .iter_mut()
            .map(|s| s as &mut dyn ModSource)
            .chain(self.envs.iter_mut().map(|s| s as &mut dyn ModSource))
            .chain(self.macros.iter_mut().map(|s| s as &mut dyn ModSource))
    }
}
