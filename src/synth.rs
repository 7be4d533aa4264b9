//! Polyphonic granular synth
//!
//! Every held note owns one amplitude envelope and one trigger countdown per
//! generator. Callers apply queued [`SynthCommand`]s with
//! [`GranularSynth::drain_commands`] before each block. A block then:
//! 1. ticks the modulation sources once
//! 2. mixes every active grain sample by sample into its generator's bus,
//!    runs each bus through that generator's filter and sums the buses
//! 3. clips the output to [-1, 1]
//! 4. spawns a grain for every generator whose countdown ran out, returns
//!    expired grains to the pool and drops finished notes
//!
//! Nothing in the block path allocates or locks. Parameter reads are
//! atomic loads, the source sample is an `ArcSwapOption` load and grains
//! live in a fixed [`GrainPool`].
//!
//! # Example
//! ```ignore
//! let params = Arc::new(Parameters::new());
//! let source: SourceSlot = Arc::new(ArcSwapOption::empty());
//! let mut synth = GranularSynth::new(params, source, &SynthConfig::default(), 44100.0, 2, 512);
//! synth.note_on(69, 1.0);
//! let mut block = vec![0.0; 512 * 2];
//! synth.process_block(&mut block);
//! ```

use crate::config::SynthConfig;
use crate::envelope::EnvelopeAdsr;
use crate::filter::{FilterType, GenFilter};
use crate::grain::{grain_envelope, Grain};
use crate::grain_pool::{GrainOwner, GrainPool};
use crate::modulation_router::ModulationRouter;
use crate::parameters::{ParamLevel, ParamType, Parameters, NUM_GENERATORS, SYNC_DIV_MAX};
use crate::pitch_class::PitchClass;
use arc_swap::ArcSwapOption;
use crossbeam::channel::{bounded, Receiver, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, info};

/// Notes that can sound at once, released notes included
pub const MAX_NOTES: usize = 16;
/// Grain spacing relative to grain duration at the lowest and highest rate
pub const MIN_RATE_RATIO: f32 = 0.25;
pub const MAX_RATE_RATIO: f32 = 1.0;
/// Pitch bend range in semitones
pub const MAX_PITCH_BEND: f32 = 2.0;
pub const GRAIN_EVENT_QUEUE_SIZE: usize = 256;
pub const COMMAND_QUEUE_SIZE: usize = 256;
const MIN_PB_RATE: f32 = 0.01;

/// Mono source sample the grains read from, swapped in by the analysis pipeline
pub type SourceSlot = Arc<ArcSwapOption<Vec<f32>>>;

/// Control messages for the audio thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SynthCommand {
    NoteOn { note: u8, velocity: f32 },
    NoteOff { note: u8 },
    /// Bend in semitones
    PitchBend(f32),
    AllNotesOff,
}

/// Sent whenever a grain starts, for visualization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrainEvent {
    pub pitch_class: PitchClass,
    pub generator: usize,
    /// Grain length in seconds of source material
    pub duration: f32,
    pub gain: f32,
}

/// ADSR stage lengths in seconds, sustain as a level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adsr {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Default for Adsr {
    fn default() -> Self {
        Self {
            attack: ParamType::Attack.default_value(),
            decay: ParamType::Decay.default_value(),
            sustain: ParamType::Sustain.default_value(),
            release: ParamType::Release.default_value(),
        }
    }
}

/// One sounding MIDI note
#[derive(Debug, Clone)]
pub struct GrainNote {
    pub pitch_class: PitchClass,
    pub velocity: f32,
    gen_envs: [EnvelopeAdsr; NUM_GENERATORS],
    /// Samples until each generator triggers its next grain
    grain_triggers: [f32; NUM_GENERATORS],
    remove_ts: Option<i64>,
}

impl GrainNote {
    /// Note started at `ts`; every generator fires on the first block
    pub fn new(pitch_class: PitchClass, velocity: f32, ts: i64) -> Self {
        Self {
            pitch_class,
            velocity: velocity.clamp(0.0, 1.0),
            gen_envs: [EnvelopeAdsr::started_at(ts); NUM_GENERATORS],
            grain_triggers: [0.0; NUM_GENERATORS],
            remove_ts: None,
        }
    }

    /// Start every generator's release; the note may be dropped after `max_release` seconds
    pub fn note_off(&mut self, ts: i64, max_release: f32, sample_rate: f32) {
        for env in &mut self.gen_envs {
            env.note_off(ts);
        }
        self.remove_ts = Some(ts + (max_release * sample_rate) as i64);
    }

    pub fn is_released(&self) -> bool {
        self.remove_ts.is_some()
    }

    /// Envelope amplitude of generator `g` at `ts`
    pub fn amplitude(&mut self, g: usize, ts: i64, adsr: &Adsr, sample_rate: f32) -> f32 {
        self.gen_envs[g].amplitude(
            ts,
            adsr.attack * sample_rate,
            adsr.decay * sample_rate,
            adsr.sustain,
            adsr.release * sample_rate,
        )
    }

    /// Last computed amplitude of generator `g`
    pub fn current_amplitude(&self, g: usize) -> f32 {
        self.gen_envs[g].current()
    }

    /// Released and silent: all envelopes finished or the release window passed
    pub fn is_silent(&self, ts: i64) -> bool {
        match self.remove_ts {
            Some(remove_ts) => ts >= remove_ts || self.gen_envs.iter().all(|e| e.is_finished()),
            None => false,
        }
    }
}

/// Per block, per generator values that only change between blocks
#[derive(Debug, Clone, Copy, Default)]
struct GenMix {
    gain: f32,
    adsr: Adsr,
}

pub struct GranularSynth {
    params: Arc<Parameters>,
    source: SourceSlot,
    router: ModulationRouter,
    pool: GrainPool,
    notes: Vec<Option<GrainNote>>,
    mix: [[GenMix; NUM_GENERATORS]; MAX_NOTES],
    gains: [[f32; NUM_GENERATORS]; MAX_NOTES],
    /// One filter per note slot and generator, indexed `slot * NUM_GENERATORS + g`
    filters: Vec<GenFilter>,
    /// Per frame generator buses, indexed `(slot * NUM_GENERATORS + g) * channels + ch`
    gen_acc: Vec<f32>,
    sample_rate: f32,
    channels: usize,
    block_size: usize,
    total_samps: i64,
    bpm: f32,
    beats_per_bar: u32,
    output_gain: f32,
    pitch_bend: f32,
    rng: StdRng,
    grain_tx: Sender<GrainEvent>,
    grain_rx: Receiver<GrainEvent>,
}

impl GranularSynth {
    pub fn new(
        params: Arc<Parameters>,
        source: SourceSlot,
        config: &SynthConfig,
        sample_rate: f32,
        channels: usize,
        block_size: usize,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (grain_tx, grain_rx) = bounded(GRAIN_EVENT_QUEUE_SIZE);
        let mut router = ModulationRouter::new();
        router.prepare(block_size, sample_rate);
        router.set_tempo(config.bpm, config.beats_per_bar);
        let channels = channels.max(1);
        info!(
            "Granular synth: {} Hz, {} channels, {} grains max",
            sample_rate, channels, config.max_grains
        );
        Self {
            params,
            source,
            router,
            pool: GrainPool::new(config.max_grains),
            notes: vec![None; MAX_NOTES],
            mix: [[GenMix::default(); NUM_GENERATORS]; MAX_NOTES],
            gains: [[0.0; NUM_GENERATORS]; MAX_NOTES],
            filters: (0..MAX_NOTES * NUM_GENERATORS)
                .map(|_| GenFilter::new(channels, sample_rate))
                .collect(),
            gen_acc: vec![0.0; MAX_NOTES * NUM_GENERATORS * channels],
            sample_rate,
            channels,
            block_size,
            total_samps: 0,
            bpm: config.bpm,
            beats_per_bar: config.beats_per_bar.max(1),
            output_gain: config.output_gain,
            pitch_bend: 0.0,
            rng,
            grain_tx,
            grain_rx,
        }
    }

    /// Create a command queue for another thread to feed this synth
    pub fn command_channel() -> (Sender<SynthCommand>, Receiver<SynthCommand>) {
        bounded(COMMAND_QUEUE_SIZE)
    }

    pub fn params(&self) -> &Arc<Parameters> {
        &self.params
    }

    pub fn router(&self) -> &ModulationRouter {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut ModulationRouter {
        &mut self.router
    }

    /// Receiver for grain notifications; events are dropped while it is full
    pub fn grain_events(&self) -> Receiver<GrainEvent> {
        self.grain_rx.clone()
    }

    pub fn set_tempo(&mut self, bpm: f32, beats_per_bar: u32) {
        if bpm > 0.0 {
            self.bpm = bpm;
        }
        self.beats_per_bar = beats_per_bar.max(1);
        self.router.set_tempo(self.bpm, self.beats_per_bar);
    }

    /// Bend every grain by `semitones`, clamped to ±[`MAX_PITCH_BEND`]
    pub fn pitch_bend(&mut self, semitones: f32) {
        if semitones.is_finite() {
            self.pitch_bend = semitones.clamp(-MAX_PITCH_BEND, MAX_PITCH_BEND);
        }
    }

    pub fn active_notes(&self) -> usize {
        self.notes.iter().filter(|n| n.is_some()).count()
    }

    pub fn active_grains(&self) -> usize {
        self.pool.active_count()
    }

    pub fn current_time(&self) -> i64 {
        self.total_samps
    }

    pub fn note(&self, pc: PitchClass) -> Option<&GrainNote> {
        self.notes.iter().flatten().find(|n| n.pitch_class == pc)
    }

    /// Start a note; dropped when [`MAX_NOTES`] are already sounding
    pub fn note_on(&mut self, midi_note: u8, velocity: f32) {
        let pc = PitchClass::from_midi(midi_note);
        let ts = self.total_samps;
        match self.notes.iter().position(Option::is_none) {
            Some(slot) => {
                self.notes[slot] = Some(GrainNote::new(pc, velocity, ts));
                for filter in &mut self.filters[slot * NUM_GENERATORS..(slot + 1) * NUM_GENERATORS] {
                    filter.reset();
                }
                self.router.note_on(ts);
            }
            None => debug!("Note slots full, dropping note on {}", pc),
        }
    }

    /// Release the held note of this pitch class
    pub fn note_off(&mut self, midi_note: u8) {
        let pc = PitchClass::from_midi(midi_note);
        let ts = self.total_samps;
        let params = &self.params;
        let router = &self.router;
        let Some(note) = self
            .notes
            .iter_mut()
            .flatten()
            .find(|n| n.pitch_class == pc && !n.is_released())
        else {
            return;
        };
        let max_release = (0..NUM_GENERATORS)
            .map(|g| params.get_float_param(ParamLevel::Generator(pc, g), ParamType::Release, Some(router)))
            .fold(0.0f32, f32::max);
        note.note_off(ts, max_release, self.sample_rate);

        if self.notes.iter().flatten().all(|n| n.is_released()) {
            self.router.note_off(ts);
        }
    }

    pub fn all_notes_off(&mut self) {
        for pc in PitchClass::ALL {
            self.note_off(pc.index() as u8);
        }
    }

    pub fn handle_command(&mut self, command: SynthCommand) {
        match command {
            SynthCommand::NoteOn { note, velocity } => self.note_on(note, velocity),
            SynthCommand::NoteOff { note } => self.note_off(note),
            SynthCommand::PitchBend(semitones) => self.pitch_bend(semitones),
            SynthCommand::AllNotesOff => self.all_notes_off(),
        }
    }

    /// Apply every queued command without blocking
    pub fn drain_commands(&mut self, commands: &Receiver<SynthCommand>) {
        while let Ok(command) = commands.try_recv() {
            self.handle_command(command);
        }
    }

    /// Render one interleaved block, overwriting `output`
    pub fn process_block(&mut self, output: &mut [f32]) {
        output.fill(0.0);
        let channels = self.channels;
        let num_frames = output.len() / channels;
        if num_frames == 0 {
            return;
        }
        if num_frames != self.block_size {
            self.block_size = num_frames;
            self.router.prepare(num_frames, self.sample_rate);
        }

        self.router.process_block();
        self.resolve_block_params();

        let source = self.source.load_full();
        let samples: &[f32] = match source.as_deref() {
            Some(s) => s.as_slice(),
            None => &[],
        };

        for frame in output.chunks_exact_mut(channels) {
            let ts = self.total_samps;
            for (slot, note) in self.notes.iter_mut().enumerate() {
                let Some(note) = note else { continue };
                for g in 0..NUM_GENERATORS {
                    let mix = &self.mix[slot][g];
                    let env = note.amplitude(g, ts, &mix.adsr, self.sample_rate);
                    self.gains[slot][g] = env * mix.gain * self.output_gain * note.velocity;
                }
            }
            self.gen_acc.fill(0.0);
            for (grain, owner) in self.pool.iter_active() {
                if !grain.is_active(ts) {
                    continue;
                }
                let gain = self.gains[owner.note][owner.generator];
                let bus = (owner.note * NUM_GENERATORS + owner.generator) * channels;
                for (ch, acc) in self.gen_acc[bus..bus + channels].iter_mut().enumerate() {
                    *acc += grain.process(chan_perc(ch, channels), samples, gain, ts);
                }
            }
            for slot in 0..MAX_NOTES {
                if self.notes[slot].is_none() {
                    continue;
                }
                for g in 0..NUM_GENERATORS {
                    let idx = slot * NUM_GENERATORS + g;
                    let filter = &mut self.filters[idx];
                    let bus = &self.gen_acc[idx * channels..(idx + 1) * channels];
                    for ((ch, out), &sample) in frame.iter_mut().enumerate().zip(bus) {
                        *out += filter.process(ch, sample);
                    }
                }
            }
            self.total_samps += 1;
        }

        for s in output.iter_mut() {
            *s = if s.is_finite() { s.clamp(-1.0, 1.0) } else { 0.0 };
        }

        self.handle_grain_add_remove(num_frames, samples.len());

        if self.active_notes() == 0 && self.pool.active_count() == 0 {
            self.total_samps = 0;
        }
    }

    fn resolve_block_params(&mut self) {
        for (slot, note) in self.notes.iter().enumerate() {
            let Some(note) = note else { continue };
            for g in 0..NUM_GENERATORS {
                let level = ParamLevel::Generator(note.pitch_class, g);
                let get = |ty| self.params.get_float_param(level, ty, Some(&self.router));
                self.mix[slot][g] = GenMix {
                    gain: get(ParamType::Gain),
                    adsr: Adsr {
                        attack: get(ParamType::Attack),
                        decay: get(ParamType::Decay),
                        sustain: get(ParamType::Sustain),
                        release: get(ParamType::Release),
                    },
                };
                let filter_type = FilterType::from_index(get(ParamType::FilterType).round() as i32);
                self.filters[slot * NUM_GENERATORS + g].configure(
                    filter_type,
                    get(ParamType::FilterCutoff),
                    get(ParamType::FilterResonance),
                );
            }
        }
    }

    fn handle_grain_add_remove(&mut self, block_size: usize, source_len: usize) {
        let mut pool_exhausted = false;
        for slot in 0..MAX_NOTES {
            let Some(pc) = self.notes[slot].as_ref().map(|n| n.pitch_class) else {
                continue;
            };
            for g in 0..NUM_GENERATORS {
                let trigger = self.notes[slot].as_ref().map_or(1.0, |n| n.grain_triggers[g]);
                if trigger > 0.0 {
                    if let Some(note) = self.notes[slot].as_mut() {
                        note.grain_triggers[g] -= block_size as f32;
                    }
                    continue;
                }
                let interval = self.trigger_generator(slot, pc, g, source_len, &mut pool_exhausted);
                if let Some(note) = self.notes[slot].as_mut() {
                    note.grain_triggers[g] += interval;
                }
            }
        }
        if pool_exhausted {
            debug!("Grain pool exhausted, dropped grain requests");
        }

        let now = self.total_samps;
        self.pool.reclaim_expired(now);
        for slot in 0..MAX_NOTES {
            let finished = self.notes[slot].as_ref().is_some_and(|n| n.is_silent(now));
            if finished && self.pool.count_for_note(slot) == 0 {
                self.notes[slot] = None;
            }
        }
    }

    /// Spawn one grain for generator `g` if it may play; returns samples until its next grain
    fn trigger_generator(
        &mut self,
        slot: usize,
        pc: PitchClass,
        g: usize,
        source_len: usize,
        pool_exhausted: &mut bool,
    ) -> f32 {
        let level = ParamLevel::Generator(pc, g);
        let params = &self.params;
        let router = Some(&self.router);
        let float = |ty| params.get_float_param(level, ty, router);
        let gain = float(ParamType::Gain);
        let grain_rate = float(ParamType::GrainRate);
        let grain_duration = float(ParamType::GrainDuration);
        let grain_sync = params.get_bool_param(level, ParamType::GrainSync, router);
        let pitch_adjust = float(ParamType::PitchAdjust);
        let pitch_spray = float(ParamType::PitchSpray);
        let pos_adjust = float(ParamType::PosAdjust);
        let pos_spray = float(ParamType::PosSpray);
        let pan_adjust = float(ParamType::PanAdjust);
        let pan_spray = float(ParamType::PanSpray);
        let reverse = params.get_bool_param(level, ParamType::Reverse, router);
        let octave = params.get_int_param(level, ParamType::OctaveAdjust, router);
        let shape = float(ParamType::GrainShape);
        let tilt = float(ParamType::GrainTilt);

        let dur_sec = if grain_sync {
            let div = 2f32.powi((SYNC_DIV_MAX * ParamType::GrainDuration.normalize(grain_duration)) as i32);
            60.0 / self.bpm * (self.beats_per_bar as f32 / div)
        } else {
            grain_duration
        };

        let candidate = params.selected_candidate(pc, g);
        let should_play = params.should_play_generator(pc, g);
        let silent = self.notes[slot].as_ref().map_or(true, |n| n.is_silent(self.total_samps));
        if let (Some(candidate), true, false) = (candidate, should_play && source_len > 0, silent) {
            let sr = self.sample_rate;
            let dur_samples = sr * dur_sec / candidate.pb_rate;

            let pos_samples = candidate.pos_ratio * source_len as f32
                + pos_adjust * dur_samples
                + spray(&mut self.rng, pos_spray) * sr;
            let pan = (pan_adjust + spray(&mut self.rng, pan_spray)).clamp(-1.0, 1.0);
            let pitch_offset = spray(&mut self.rng, pitch_spray);
            let mut pb_rate = (candidate.pb_rate + pitch_adjust + pitch_offset).max(MIN_PB_RATE)
                * 2f32.powi(candidate.octave + octave)
                * 2f32.powf(self.pitch_bend / 12.0);
            if reverse {
                pb_rate = -pb_rate;
            }

            let grain = Grain::new(
                grain_envelope(shape, tilt),
                dur_samples as i64,
                pb_rate,
                pos_samples as i64,
                self.total_samps,
                gain,
                pan,
            );
            match self.pool.acquire(grain, GrainOwner { note: slot, generator: g }) {
                Some(_) => {
                    let (env_amp, velocity) = self.notes[slot]
                        .as_ref()
                        .map_or((0.0, 0.0), |n| (n.current_amplitude(g), n.velocity));
                    let _ = self.grain_tx.try_send(GrainEvent {
                        pitch_class: pc,
                        generator: g,
                        duration: dur_sec / pb_rate.abs(),
                        gain: gain * env_amp * velocity,
                    });
                }
                None => *pool_exhausted = true,
            }
        }

        if grain_sync {
            let div = 2f32.powi((SYNC_DIV_MAX * ParamType::GrainRate.normalize(grain_rate)) as i32);
            self.sample_rate * dur_sec / div
        } else {
            let norm = ParamType::GrainRate.normalize(grain_rate);
            self.sample_rate * lerp(norm, dur_sec * MIN_RATE_RATIO, dur_sec * MAX_RATE_RATIO)
        }
    }

}

/// Random offset of up to `amount` in either direction
fn spray(rng: &mut StdRng, amount: f32) -> f32 {
    let offset = lerp(rng.gen::<f32>(), 0.0, amount);
    if rng.gen::<f32>() > 0.5 {
        -offset
    } else {
        offset
    }
}

/// Channel position for the pan law; a mono output counts as the first channel
fn chan_perc(ch: usize, channels: usize) -> f32 {
    if channels > 1 {
        ch as f32 / (channels - 1) as f32
    } else {
        0.0
    }
}

fn lerp(t: f32, a: f32, b: f32) -> f32 {
    a + t * (b - a)
}
