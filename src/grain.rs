//! A single grain: a short enveloped read from the source sample
//!
//! Grains are plain values. Everything they need, the envelope table
//! included, is copied in at trigger time so rendering never touches shared
//! state or allocates.

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

pub const ENV_LUT_SIZE: usize = 128;

pub type GrainEnvelope = [f32; ENV_LUT_SIZE];

/// Grain amplitude envelope lookup table
///
/// `shape` widens the plateau (0 = triangle, 1 = flat), `tilt` moves its
/// centre from the start (0) to the end (1) of the grain.
///
/// # Algorithm
/// ```text
/// shape' = shape * N / 2      tilt' = tilt * N
/// up     = max(0, tilt' - shape')
/// down   = min(N, tilt' + shape')
/// env[i] = i / up                        i < up
///          1 - (i - down) / (N - down)   i > down
///          1                             otherwise
/// ```
pub fn grain_envelope(shape: f32, tilt: f32) -> GrainEnvelope {
    let n = ENV_LUT_SIZE as f32;
    let scaled_shape = shape.clamp(0.0, 1.0) * n / 2.0;
    let scaled_tilt = tilt.clamp(0.0, 1.0) * n;
    let ramp_up_end = (scaled_tilt - scaled_shape).max(0.0) as usize;
    let ramp_down_start = (scaled_tilt + scaled_shape).min(n) as usize;

    let mut env = [1.0f32; ENV_LUT_SIZE];
    for (i, v) in env.iter_mut().enumerate() {
        let value = if i < ramp_up_end {
            i as f32 / ramp_up_end as f32
        } else if i > ramp_down_start {
            1.0 - (i - ramp_down_start) as f32 / (ENV_LUT_SIZE - ramp_down_start) as f32
        } else {
            1.0
        };
        *v = value.clamp(0.0, 1.0);
    }
    env
}

#[derive(Debug, Clone, Copy)]
pub struct Grain {
    env: GrainEnvelope,
    /// Length in output samples, at least 1
    pub duration: i64,
    /// Source samples advanced per output sample, negative plays backwards
    pub pb_rate: f32,
    /// Source read position at the start of the grain
    pub start_pos: i64,
    /// Output timestamp of the first sample
    pub trig_ts: i64,
    pub gain: f32,
    /// -1 (left) .. 1 (right)
    pub pan: f32,
}

impl Default for Grain {
    fn default() -> Self {
        Self {
            env: [0.0; ENV_LUT_SIZE],
            duration: 1,
            pb_rate: 1.0,
            start_pos: 0,
            trig_ts: 0,
            gain: 0.0,
            pan: 0.0,
        }
    }
}

impl Grain {
    pub fn new(env: GrainEnvelope, duration: i64, pb_rate: f32, start_pos: i64, trig_ts: i64, gain: f32, pan: f32) -> Self {
        Self {
            env,
            duration: duration.max(1),
            pb_rate,
            start_pos,
            trig_ts,
            gain,
            pan: pan.clamp(-1.0, 1.0),
        }
    }

    pub fn end_ts(&self) -> i64 {
        self.trig_ts + self.duration
    }

    /// Sounding at `ts`: true on `[trig_ts, trig_ts + duration)`
    pub fn is_active(&self, ts: i64) -> bool {
        ts >= self.trig_ts && ts < self.end_ts()
    }

    pub fn is_expired(&self, ts: i64) -> bool {
        ts >= self.end_ts()
    }

    /// Envelope value at a position (0..1) through the grain
    pub fn amplitude(&self, time_perc: f32) -> f32 {
        let idx = (time_perc.clamp(0.0, 1.0) * (ENV_LUT_SIZE - 1) as f32) as usize;
        self.env[idx.min(ENV_LUT_SIZE - 1)]
    }

    /// Constant-power pan gain for the channel at `chan_perc` (0 = first, 1 = last)
    pub fn pan_gain(&self, chan_perc: f32) -> f32 {
        let angle = (self.pan + 1.0) * FRAC_PI_4 + chan_perc * FRAC_PI_2;
        angle.cos().abs()
    }

    /// One output sample for one channel at `time`
    ///
    /// `gain` is the caller's gain (note envelope, generator gain, velocity);
    /// pan and the grain envelope are applied on top. The grain's `gain`
    /// field records the gain it was triggered with and is not reapplied.
    #[inline]
    pub fn process(&self, chan_perc: f32, source: &[f32], gain: f32, time: i64) -> f32 {
        if source.is_empty() {
            return 0.0;
        }
        let time_perc = ((time - self.trig_ts) as f32 / self.duration as f32).clamp(0.0, 1.0);
        let total_gain = gain * self.pan_gain(chan_perc) * self.amplitude(time_perc);

        let sample_idx = self.duration as f32 * self.pb_rate * time_perc;
        let low = sample_idx.floor();
        let rem = sample_idx - low;
        let len = source.len() as i64;
        let low_pos = (self.start_pos + low as i64).rem_euclid(len) as usize;
        let high_pos = (self.start_pos + low as i64 + 1).rem_euclid(len) as usize;
        let sample = source[low_pos] + rem * (source[high_pos] - source[low_pos]);
        sample * total_gain
    }
}
