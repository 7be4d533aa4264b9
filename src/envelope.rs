//! ADSR envelope driven by sample timestamps
//!
//! The envelope holds only its note-on/note-off timestamps and state; the
//! stage lengths are passed on every [`EnvelopeAdsr::amplitude`] call so they
//! can follow parameter changes while a note sounds.

/// Envelope state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeState {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
    Finished,
}

/// Linear ADSR envelope
///
/// # Example
/// ```ignore
/// let mut env = EnvelopeAdsr::new();
/// env.note_on(0);
/// // attack/decay/release in samples, sustain as a level
/// let amp = env.amplitude(2205, 4410.0, 4410.0, 0.8, 8820.0);  // 0.5
/// ```
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeAdsr {
    state: EnvelopeState,
    amplitude: f32,
    note_off_amplitude: f32,
    note_on_ts: i64,
    note_off_ts: i64,
}

impl Default for EnvelopeAdsr {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeAdsr {
    pub fn new() -> Self {
        Self {
            state: EnvelopeState::Idle,
            amplitude: 0.0,
            note_off_amplitude: 0.0,
            note_on_ts: 0,
            note_off_ts: 0,
        }
    }

    /// Envelope already triggered at `ts`
    pub fn started_at(ts: i64) -> Self {
        let mut env = Self::new();
        env.note_on(ts);
        env
    }

    pub fn note_on(&mut self, ts: i64) {
        self.note_on_ts = ts;
        self.state = EnvelopeState::Attack;
        self.amplitude = 0.0;
        self.note_off_amplitude = 0.0;
    }

    /// Start the release from the most recently computed amplitude
    pub fn note_off(&mut self, ts: i64) {
        if matches!(self.state, EnvelopeState::Idle | EnvelopeState::Finished) {
            return;
        }
        self.note_off_ts = ts;
        self.note_off_amplitude = self.amplitude;
        self.state = EnvelopeState::Release;
    }

    pub fn state(&self) -> EnvelopeState {
        self.state
    }

    /// Last computed amplitude
    pub fn current(&self) -> f32 {
        self.amplitude
    }

    /// Release has run to completion
    pub fn is_finished(&self) -> bool {
        self.state == EnvelopeState::Finished
    }

    /// Amplitude at `ts`
    ///
    /// `attack`, `decay` and `release` are in samples, `sustain` is a level.
    pub fn amplitude(&mut self, ts: i64, attack: f32, decay: f32, sustain: f32, release: f32) -> f32 {
        let sustain = sustain.clamp(0.0, 1.0);
        let new_amp = match self.state {
            EnvelopeState::Idle | EnvelopeState::Finished => 0.0,
            EnvelopeState::Attack | EnvelopeState::Decay | EnvelopeState::Sustain => {
                let elapsed = (ts - self.note_on_ts).max(0) as f32;
                if elapsed < attack {
                    self.state = EnvelopeState::Attack;
                    elapsed / attack
                } else if elapsed - attack < decay {
                    self.state = EnvelopeState::Decay;
                    1.0 - ((elapsed - attack) / decay) * (1.0 - sustain)
                } else {
                    self.state = EnvelopeState::Sustain;
                    sustain
                }
            }
            EnvelopeState::Release => {
                let elapsed = (ts - self.note_off_ts).max(0) as f32;
                if elapsed >= release {
                    self.state = EnvelopeState::Finished;
                    0.0
                } else {
                    self.note_off_amplitude * (1.0 - elapsed / release)
                }
            }
        };
        self.amplitude = if new_amp.is_finite() { new_amp.clamp(0.0, 1.0) } else { 0.0 };
        self.amplitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 44100.0;

    #[test]
    fn test_adsr_stages() {
        let (a, d, s, r) = (0.1 * SR, 0.1 * SR, 0.8, 0.2 * SR);
        let mut env = EnvelopeAdsr::started_at(0);

        let mut last = -1.0;
        for ts in 0..4410 {
            let amp = env.amplitude(ts, a, d, s, r);
            assert!(amp > last, "attack must rise at {}", ts);
            last = amp;
        }
        assert_eq!(env.state(), EnvelopeState::Attack);

        let amp = env.amplitude(8820, a, d, s, r);
        assert!((amp - 0.8).abs() < 1e-6, "sustain reached, got {}", amp);
        assert_eq!(env.state(), EnvelopeState::Sustain);

        env.note_off(44100);
        assert_eq!(env.state(), EnvelopeState::Release);
        let half = env.amplitude(44100 + 4410, a, d, s, r);
        assert!((half - 0.4).abs() < 1e-3, "half way through release, got {}", half);
        assert_eq!(env.amplitude(52920, a, d, s, r), 0.0);
        assert!(env.is_finished());
    }

    #[test]
    fn test_decay_midpoint() {
        let mut env = EnvelopeAdsr::started_at(1000);
        let amp = env.amplitude(1000 + 150, 100.0, 100.0, 0.5, 100.0);
        assert!((amp - 0.75).abs() < 1e-6);
        assert_eq!(env.state(), EnvelopeState::Decay);
    }

    #[test]
    fn test_release_during_attack_starts_from_current_level() {
        let mut env = EnvelopeAdsr::started_at(0);
        env.amplitude(50, 100.0, 100.0, 0.5, 100.0);
        env.note_off(50);
        let amp = env.amplitude(100, 100.0, 100.0, 0.5, 100.0);
        assert!((amp - 0.25).abs() < 1e-6, "got {}", amp);
    }

    #[test]
    fn test_zero_length_stages() {
        let mut env = EnvelopeAdsr::started_at(0);
        assert_eq!(env.amplitude(0, 0.0, 0.0, 0.6, 0.0), 0.6);
        env.note_off(10);
        assert_eq!(env.amplitude(10, 0.0, 0.0, 0.6, 0.0), 0.0);
        assert!(env.is_finished());
    }

    #[test]
    fn test_idle_is_silent() {
        let mut env = EnvelopeAdsr::new();
        assert_eq!(env.amplitude(100, 10.0, 10.0, 1.0, 10.0), 0.0);
        env.note_off(100);
        assert_eq!(env.state(), EnvelopeState::Idle);
    }
}
