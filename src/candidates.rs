//! Playback candidates derived from detected pitches
//!
//! # Algorithm
//!
//! For every note the search looks at pitches detected on the note's own
//! pitch class first, then walks outward one semitone at a time (below,
//! then above) for up to [`MAX_SEARCH_DISTANCE`] semitones. A pitch `n`
//! semitones below is played back at `1.0594^n` to land on the note, a
//! pitch above at `1.0594^-n`. Pitches with a salience below
//! [`MIN_CANDIDATE_SALIENCE`] are skipped and at most
//! [`MAX_CANDIDATES`] are kept per note.

use crate::analysis::PitchMap;
use crate::parameters::{ParamCandidate, MAX_CANDIDATES};
use crate::pitch_class::{PitchClass, NUM_PITCH_CLASSES};
use tracing::debug;

/// Playback rate ratio of one semitone
pub const TIMESTRETCH_RATIO: f32 = 1.0594;
pub const MIN_CANDIDATE_SALIENCE: f32 = 0.5;
pub const MAX_SEARCH_DISTANCE: i32 = 5;

pub type CandidateLists = [Vec<ParamCandidate>; NUM_PITCH_CLASSES];

/// Candidates for every pitch class
pub fn create_candidates(pitches: &PitchMap) -> CandidateLists {
    let lists: CandidateLists = std::array::from_fn(|i| candidates_for(PitchClass::ALL[i], pitches));
    for pc in PitchClass::ALL {
        debug!("{}: {} candidates", pc.display_name(), lists[pc.index()].len());
    }
    lists
}

/// Candidates for one note
pub fn candidates_for(note: PitchClass, pitches: &PitchMap) -> Vec<ParamCandidate> {
    let mut candidates = Vec::with_capacity(MAX_CANDIDATES);
    let note_idx = note.index() as i32;

    for distance in 0..=MAX_SEARCH_DISTANCE {
        let lower = PitchClass::from_index(note_idx - distance);
        if collect(&mut candidates, pitches, lower, TIMESTRETCH_RATIO.powi(distance)) {
            break;
        }
        if distance > 0 {
            let upper = PitchClass::from_index(note_idx + distance);
            if collect(&mut candidates, pitches, upper, TIMESTRETCH_RATIO.powi(-distance)) {
                break;
            }
        }
    }
    candidates
}

/// Append salient pitches of `pc`; true once the list is full
fn collect(candidates: &mut Vec<ParamCandidate>, pitches: &PitchMap, pc: PitchClass, pb_rate: f32) -> bool {
    for pitch in pitches.get(pc) {
        if pitch.gain < MIN_CANDIDATE_SALIENCE {
            continue;
        }
        candidates.push(ParamCandidate::new(pitch.pos_ratio, 0, pb_rate, pitch.duration, pitch.gain));
        if candidates.len() >= MAX_CANDIDATES {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Pitch;

    fn pitch(pc: PitchClass, pos_ratio: f32, gain: f32) -> Pitch {
        Pitch {
            pitch_class: pc,
            pos_ratio,
            duration: 0.1,
            gain,
        }
    }

    #[test]
    fn test_exact_match_plays_at_unity() {
        let mut map = PitchMap::new();
        map.push(pitch(PitchClass::A, 0.2, 1.0));
        let c = candidates_for(PitchClass::A, &map);
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].pb_rate, 1.0);
        assert_eq!(c[0].pos_ratio, 0.2);
        assert_eq!(c[0].salience, 1.0);
    }

    #[test]
    fn test_neighbours_searched_below_then_above() {
        let mut map = PitchMap::new();
        map.push(pitch(PitchClass::As, 0.7, 0.9));
        map.push(pitch(PitchClass::Gs, 0.3, 0.8));
        let c = candidates_for(PitchClass::A, &map);
        assert_eq!(c.len(), 2);
        // G# is below A: sped up by one semitone
        assert_eq!(c[0].pos_ratio, 0.3);
        assert!((c[0].pb_rate - TIMESTRETCH_RATIO).abs() < 1e-6);
        assert_eq!(c[1].pos_ratio, 0.7);
        assert!((c[1].pb_rate - 1.0 / TIMESTRETCH_RATIO).abs() < 1e-6);
    }

    #[test]
    fn test_search_wraps_around_octave() {
        let mut map = PitchMap::new();
        map.push(pitch(PitchClass::B, 0.5, 1.0));
        let c = candidates_for(PitchClass::C, &map);
        assert_eq!(c.len(), 1);
        assert!(c[0].pb_rate > 1.0);
    }

    #[test]
    fn test_weak_and_distant_pitches_skipped() {
        let mut map = PitchMap::new();
        map.push(pitch(PitchClass::A, 0.1, 0.4));
        // Tritone away: beyond the search distance
        map.push(pitch(PitchClass::Ds, 0.1, 1.0));
        assert!(candidates_for(PitchClass::A, &map).is_empty());
    }

    #[test]
    fn test_list_capped() {
        let mut map = PitchMap::new();
        for i in 0..10 {
            map.push(pitch(PitchClass::E, i as f32 / 10.0, 0.9));
        }
        let lists = create_candidates(&map);
        assert_eq!(lists[PitchClass::E.index()].len(), MAX_CANDIDATES);
        for list in &lists {
            assert!(list.len() <= MAX_CANDIDATES);
            for c in list {
                assert!(c.validate().is_ok());
            }
        }
    }
}
