//! Pitch classes

use serde::{Deserialize, Serialize};
use std::fmt;

pub const NUM_PITCH_CLASSES: usize = 12;

/// One of the twelve equal-tempered pitch classes, C = 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    Cs,
    D,
    Ds,
    E,
    F,
    Fs,
    G,
    Gs,
    A,
    As,
    B,
}

const NAMES: [&str; NUM_PITCH_CLASSES] = ["C", "Cs", "D", "Ds", "E", "F", "Fs", "G", "Gs", "A", "As", "B"];
const DISPLAY_NAMES: [&str; NUM_PITCH_CLASSES] =
    ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

impl PitchClass {
    pub const ALL: [PitchClass; NUM_PITCH_CLASSES] = [
        PitchClass::C,
        PitchClass::Cs,
        PitchClass::D,
        PitchClass::Ds,
        PitchClass::E,
        PitchClass::F,
        PitchClass::Fs,
        PitchClass::G,
        PitchClass::Gs,
        PitchClass::A,
        PitchClass::As,
        PitchClass::B,
    ];

    /// Pitch class at `idx`, wrapping in both directions
    pub fn from_index(idx: i32) -> Self {
        Self::ALL[idx.rem_euclid(NUM_PITCH_CLASSES as i32) as usize]
    }

    pub fn from_midi(note: u8) -> Self {
        Self::ALL[note as usize % NUM_PITCH_CLASSES]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Identifier-safe name ("Cs")
    pub fn name(self) -> &'static str {
        NAMES[self.index()]
    }

    /// Name for display ("C#")
    pub fn display_name(self) -> &'static str {
        DISPLAY_NAMES[self.index()]
    }

    /// Parse either naming style, case-insensitive
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL.iter().copied().find(|pc| {
            pc.name().eq_ignore_ascii_case(s) || pc.display_name().eq_ignore_ascii_case(s)
        })
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
