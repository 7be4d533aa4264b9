//! Pitch detection by chroma peak tracking
//!
//! Runs an FFT (4096/4096 by default) and the HPCP stage over a sample,
//! then follows the strongest chroma peak from frame to frame with a small
//! pool of segments. A segment that stays idle long enough is closed and,
//! when it lived longer than the minimum note length, becomes a [`Pitch`].
//!
//! # Segment tracking
//!
//! Per frame, for every slot of the pool:
//! - **tracking**: claim the nearest unclaimed peak within
//!   [`MAX_DEVIATION_BINS`] (ties go to the louder peak). A match resets the
//!   idle marker, adds the peak gain to the salience and moves the segment
//!   to the peak unless a closer peak shows up within the lookahead window.
//!   No match starts the idle marker. Once idle for more than the max idle
//!   frames the segment closes.
//! - **available**: claim the first unclaimed peak and start tracking.
//!
//! Segments still tracking when the sample ends are closed at the last frame.
//! Confidences are finally divided by the largest confidence of the run.

use super::fft::{Fft, Spectrogram};
use super::hpcp::{bin_to_pitch_class, Hpcp, BINS_PER_SEMITONE};
use super::peaks::{find_peaks, Peak};
use super::{no_progress, CancelToken};
use crate::error::GrainResult;
use crate::pitch_class::{PitchClass, NUM_PITCH_CLASSES};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const FFT_SIZE: usize = 4096;
pub const HOP_SIZE: usize = 4096;
pub const NUM_ACTIVE_SEGMENTS: usize = 1;
pub const MAX_DEVIATION_CENTS: f32 = 15.0;
/// Deviation allowed between frames, in chroma bins
pub const MAX_DEVIATION_BINS: f32 = ((BINS_PER_SEMITONE as f32 * MAX_DEVIATION_CENTS / 100.0) as i32) as f32;
pub const MAX_IDLE_TIME_MS: f32 = 62.5;
pub const MIN_NOTE_TIME_MS: f32 = 125.0;
pub const LOOKAHEAD_TIME_MS: f32 = 25.0;

/// Confidence below which normalization is skipped
const MIN_NORMALIZE_CONFIDENCE: f32 = 1e-9;

/// A detected pitch region of the sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pitch {
    pub pitch_class: PitchClass,
    /// Start position as a ratio of the sample length
    pub pos_ratio: f32,
    /// Length as a ratio of the sample length
    pub duration: f32,
    /// Confidence in `[0, 1]` after normalization
    pub gain: f32,
}

/// Detected pitches grouped by pitch class, each list loudest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PitchMap {
    classes: [Vec<Pitch>; NUM_PITCH_CLASSES],
}

impl PitchMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pc: PitchClass) -> &[Pitch] {
        &self.classes[pc.index()]
    }

    pub fn push(&mut self, pitch: Pitch) {
        self.classes[pitch.pitch_class.index()].push(pitch);
    }

    pub fn len(&self) -> usize {
        self.classes.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pitch> {
        self.classes.iter().flatten()
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut Pitch> {
        self.classes.iter_mut().flatten()
    }

    fn sort_by_confidence(&mut self) {
        for pitches in self.classes.iter_mut() {
            pitches.sort_by(|a, b| b.gain.total_cmp(&a.gain));
        }
    }
}

/// Everything the pitch stage produces for one sample
#[derive(Debug, Clone, Default)]
pub struct PitchAnalysis {
    pub spectrogram: Spectrogram,
    pub hpcp: Spectrogram,
    pub pitches: PitchMap,
    /// HPCP-shaped buffer with each detected pitch drawn at its confidence
    pub segmented: Spectrogram,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    bin: f32,
    salience: f32,
    start_frame: usize,
    idle_frame: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct FramePeak {
    peak: Peak,
    claimed: bool,
}

pub struct PitchDetector {
    sample_rate: f32,
    fft: Fft,
    hpcp: Hpcp,
}

impl PitchDetector {
    pub fn new(sample_rate: f32) -> Self {
        Self::with_fft(sample_rate, FFT_SIZE, HOP_SIZE)
    }

    pub fn with_fft(sample_rate: f32, fft_size: usize, hop_size: usize) -> Self {
        Self {
            sample_rate,
            fft: Fft::new(fft_size, hop_size),
            hpcp: Hpcp::new(sample_rate),
        }
    }

    /// Frames covering `ms` milliseconds, truncated
    fn frames_for_ms(&self, ms: f32) -> usize {
        (self.sample_rate * (ms / 1000.0) / self.fft.hop_size() as f32) as usize
    }

    pub fn process(&self, samples: &[f32]) -> PitchAnalysis {
        // A fresh token is never cancelled
        self.process_cancellable(samples, &CancelToken::new(), &mut no_progress)
            .unwrap_or_default()
    }

    /// FFT, HPCP and segment tracking, checking `cancel` every frame
    ///
    /// Progress is split 50/30/20 over the three stages.
    pub fn process_cancellable(
        &self,
        samples: &[f32],
        cancel: &CancelToken,
        progress: &mut dyn FnMut(f32),
    ) -> GrainResult<PitchAnalysis> {
        let spectrogram = self
            .fft
            .process_cancellable(samples, cancel, &mut |p| progress(p * 0.5))?;
        let hpcp = self
            .hpcp
            .process_cancellable(&spectrogram, cancel, &mut |p| progress(0.5 + p * 0.3))?;
        let pitches = self.segment_pitches(&hpcp, cancel, &mut |p| progress(0.8 + p * 0.2))?;
        let segmented = segmented_pitch_buffer(hpcp.len(), &pitches);
        progress(1.0);

        debug!(
            "Pitch detection: {} frames, {} pitches",
            hpcp.len(),
            pitches.len()
        );
        Ok(PitchAnalysis {
            spectrogram,
            hpcp,
            pitches,
            segmented,
        })
    }

    /// Track chroma peaks across `hpcp` frames into pitch events
    pub fn segment_pitches(
        &self,
        hpcp: &Spectrogram,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(f32),
    ) -> GrainResult<PitchMap> {
        let mut pitch_map = PitchMap::new();
        let num_frames = hpcp.len();
        if num_frames == 0 {
            return Ok(pitch_map);
        }

        let max_idle_frames = self.frames_for_ms(MAX_IDLE_TIME_MS);
        let min_note_frames = self.frames_for_ms(MIN_NOTE_TIME_MS);
        let lookahead_frames = self.frames_for_ms(LOOKAHEAD_TIME_MS);

        let mut frame_peaks = Vec::with_capacity(num_frames);
        for frame in hpcp {
            cancel.check()?;
            frame_peaks.push(find_peaks(frame, NUM_ACTIVE_SEGMENTS));
        }

        let mut segments: [Option<Segment>; NUM_ACTIVE_SEGMENTS] = [None; NUM_ACTIVE_SEGMENTS];
        let mut max_confidence = 0.0f32;
        let total = num_frames as f32;

        let mut close = |seg: &Segment, end_frame: usize, pitch_map: &mut PitchMap| {
            let length = end_frame - seg.start_frame;
            if length > min_note_frames {
                let confidence = seg.salience / length as f32;
                max_confidence = max_confidence.max(confidence);
                pitch_map.push(Pitch {
                    pitch_class: PitchClass::from_index(bin_to_pitch_class(seg.bin) as i32),
                    pos_ratio: seg.start_frame as f32 / total,
                    duration: length as f32 / total,
                    gain: confidence,
                });
            }
        };

        for frame in 0..num_frames {
            cancel.check()?;
            let mut peaks: Vec<FramePeak> = frame_peaks[frame]
                .iter()
                .map(|&peak| FramePeak { peak, claimed: false })
                .collect();

            for slot in segments.iter_mut() {
                match slot {
                    Some(seg) => {
                        let closest = closest_peak(&peaks, seg.bin);
                        match closest {
                            None => {
                                if seg.idle_frame.is_none() {
                                    seg.idle_frame = Some(frame);
                                }
                            }
                            Some(idx) => {
                                let candidate = peaks[idx].peak;
                                let deviation = (seg.bin - candidate.bin).abs();
                                seg.idle_frame = None;
                                if !has_better_candidate_ahead(
                                    &frame_peaks,
                                    frame + 1,
                                    lookahead_frames,
                                    seg.bin,
                                    deviation,
                                ) {
                                    seg.bin = candidate.bin;
                                }
                                seg.salience += candidate.gain;
                                peaks[idx].claimed = true;
                            }
                        }

                        if let Some(idle_frame) = seg.idle_frame {
                            if frame - idle_frame > max_idle_frames {
                                close(seg, frame, &mut pitch_map);
                                *slot = None;
                            }
                        }
                    }
                    None => {
                        if let Some(fp) = peaks.iter_mut().find(|fp| !fp.claimed) {
                            fp.claimed = true;
                            *slot = Some(Segment {
                                bin: fp.peak.bin,
                                salience: fp.peak.gain,
                                start_frame: frame,
                                idle_frame: None,
                            });
                        }
                    }
                }
            }
            progress((frame + 1) as f32 / total);
        }

        for seg in segments.iter().flatten() {
            close(seg, num_frames, &mut pitch_map);
        }

        if max_confidence > MIN_NORMALIZE_CONFIDENCE {
            for pitch in pitch_map.iter_mut() {
                pitch.gain = (pitch.gain / max_confidence).clamp(0.0, 1.0);
            }
        } else {
            for pitch in pitch_map.iter_mut() {
                pitch.gain = 0.0;
            }
        }
        pitch_map.sort_by_confidence();
        Ok(pitch_map)
    }
}

/// Nearest unclaimed peak within the allowed deviation
fn closest_peak(peaks: &[FramePeak], target: f32) -> Option<usize> {
    let mut closest: Option<(usize, f32)> = None;
    for (idx, fp) in peaks.iter().enumerate() {
        if fp.claimed {
            continue;
        }
        let dev = (target - fp.peak.bin).abs();
        if dev > MAX_DEVIATION_BINS {
            continue;
        }
        closest = match closest {
            None => Some((idx, dev)),
            Some((best, best_dev)) => {
                if dev < best_dev || (dev == best_dev && fp.peak.gain > peaks[best].peak.gain) {
                    Some((idx, dev))
                } else {
                    Some((best, best_dev))
                }
            }
        };
    }
    closest.map(|(idx, _)| idx)
}

/// Whether a peak closer than `deviation` to `target` appears within the lookahead
fn has_better_candidate_ahead(
    frame_peaks: &[Vec<Peak>],
    start_frame: usize,
    lookahead_frames: usize,
    target: f32,
    deviation: f32,
) -> bool {
    let end = (start_frame + lookahead_frames).min(frame_peaks.len());
    (start_frame..end).any(|frame| {
        frame_peaks[frame]
            .iter()
            .any(|peak| (target - peak.bin).abs() < deviation)
    })
}

/// Render `pitches` into a frame x chroma buffer at their confidence
pub fn segmented_pitch_buffer(num_frames: usize, pitches: &PitchMap) -> Spectrogram {
    let mut buffer = vec![vec![0.0f32; super::hpcp::NUM_HPCP_BINS]; num_frames];
    if num_frames == 0 {
        return buffer;
    }
    for pitch in pitches.iter() {
        let start = (pitch.pos_ratio * (num_frames - 1) as f32) as usize;
        let length = (pitch.duration * num_frames as f32).ceil() as usize;
        let bin = pitch.pitch_class.index() * BINS_PER_SEMITONE;
        for frame in buffer.iter_mut().skip(start).take(length) {
            frame[bin] = pitch.gain;
        }
    }
    buffer
}
