//! Resonant filter applied to each generator's grain mix
//!
//! One biquad per output channel. Coefficients are recomputed only when the
//! resolved type, cutoff or resonance changes, so a steady setting costs a
//! single comparison per block.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz};

/// Highest cutoff as a fraction of the sample rate
const MAX_CUTOFF_RATIO: f32 = 0.49;
const MIN_CUTOFF_HZ: f32 = 20.0;
const MIN_Q: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    None,
    LowPass,
    HighPass,
    BandPass,
}

impl FilterType {
    /// Map the integer `filter_type` parameter; anything unknown is no filter
    pub fn from_index(index: i32) -> Self {
        match index {
            1 => FilterType::LowPass,
            2 => FilterType::HighPass,
            3 => FilterType::BandPass,
            _ => FilterType::None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FilterType::None => "none",
            FilterType::LowPass => "lowpass",
            FilterType::HighPass => "highpass",
            FilterType::BandPass => "bandpass",
        }
    }
}

/// Pass-through coefficients
fn identity() -> Coefficients<f32> {
    Coefficients {
        a1: 0.0,
        a2: 0.0,
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
    }
}

pub struct GenFilter {
    filter_type: FilterType,
    cutoff: f32,
    resonance: f32,
    sample_rate: f32,
    channels: Vec<DirectForm2Transposed<f32>>,
}

impl GenFilter {
    pub fn new(channels: usize, sample_rate: f32) -> Self {
        Self {
            filter_type: FilterType::None,
            cutoff: 0.0,
            resonance: 0.0,
            sample_rate,
            channels: (0..channels.max(1))
                .map(|_| DirectForm2Transposed::<f32>::new(identity()))
                .collect(),
        }
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    /// Update the filter settings, clamping cutoff below Nyquist
    pub fn configure(&mut self, filter_type: FilterType, cutoff: f32, resonance: f32) {
        let cutoff = cutoff.clamp(MIN_CUTOFF_HZ, self.sample_rate * MAX_CUTOFF_RATIO);
        let resonance = resonance.max(MIN_Q);
        if filter_type == self.filter_type && cutoff == self.cutoff && resonance == self.resonance {
            return;
        }
        let was_off = self.filter_type == FilterType::None;

        let (fs, f0) = (self.sample_rate.hz(), cutoff.hz());
        let coeffs = match filter_type {
            FilterType::None => {
                self.filter_type = FilterType::None;
                return;
            }
            FilterType::LowPass => Coefficients::<f32>::from_params(biquad::Type::LowPass, fs, f0, resonance),
            FilterType::HighPass => Coefficients::<f32>::from_params(biquad::Type::HighPass, fs, f0, resonance),
            FilterType::BandPass => Coefficients::<f32>::from_params(biquad::Type::BandPass, fs, f0, resonance),
        };
        // Out of range settings keep the previous coefficients
        let Ok(coeffs) = coeffs else {
            return;
        };
        for filter in &mut self.channels {
            filter.update_coefficients(coeffs);
            if was_off {
                filter.reset_state();
            }
        }
        self.filter_type = filter_type;
        self.cutoff = cutoff;
        self.resonance = resonance;
    }

    /// Clear the delay lines, e.g. when a new note takes over this slot
    pub fn reset(&mut self) {
        for filter in &mut self.channels {
            filter.reset_state();
        }
    }

    /// Filter one sample of channel `ch`; passes through when off
    #[inline]
    pub fn process(&mut self, ch: usize, input: f32) -> f32 {
        if self.filter_type == FilterType::None {
            return input;
        }
        match self.channels.get_mut(ch) {
            Some(filter) => filter.run(input),
            None => input,
        }
    }
}
