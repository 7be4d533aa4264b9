//! Spectral peak picking with quadratic interpolation
//!
//! Shared by the HPCP stage (peaks of magnitude spectra) and segment
//! tracking (peaks of HPCP frames).

/// Magnitude below which a local maximum is ignored
pub const MAGNITUDE_THRESHOLD: f32 = 1e-5;

/// A local maximum at a fractional bin position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub bin: f32,
    pub gain: f32,
}

impl Peak {
    pub fn new(bin: f32, gain: f32) -> Self {
        Self { bin, gain }
    }
}

/// Quadratic interpolation through three neighbouring bins
///
/// Returns `(bin, value)` of the vertex of the parabola through
/// `(bin-1, left)`, `(bin, middle)`, `(bin+1, right)`.
pub fn interpolate_peak(left: f32, middle: f32, right: f32, bin: usize) -> (f32, f32) {
    let denom = left - 2.0 * middle + right;
    if denom == 0.0 {
        return (bin as f32, middle);
    }
    let delta = 0.5 * (left - right) / denom;
    (bin as f32 + delta, middle - 0.25 * (left - right) * delta)
}

/// Up to `max_peaks` local maxima of `frame`, loudest first
///
/// Walks the frame descending then climbing; plateaus report their centre,
/// single-bin maxima are refined with [`interpolate_peak`]. Both boundaries
/// count as peaks when they exceed their only neighbour.
pub fn find_peaks(frame: &[f32], max_peaks: usize) -> Vec<Peak> {
    let size = frame.len();
    let mut peaks = Vec::new();
    if size < 3 || max_peaks == 0 {
        return peaks;
    }

    if frame[0] > frame[1] && frame[0] > MAGNITUDE_THRESHOLD {
        peaks.push(Peak::new(0.0, frame[0]));
    }

    let mut i = 0;
    loop {
        // descend
        while i + 1 < size - 1 && frame[i] >= frame[i + 1] {
            i += 1;
        }
        // climb
        while i + 1 < size - 1 && frame[i] < frame[i + 1] {
            i += 1;
        }
        // plateau
        let mut j = i;
        while j + 1 < size - 1 && frame[j] == frame[j + 1] {
            j += 1;
        }

        if j + 1 < size - 1 && frame[j + 1] < frame[j] && frame[j] > MAGNITUDE_THRESHOLD {
            let (bin, gain) = if j != i {
                ((i + j) as f32 * 0.5, frame[i])
            } else {
                interpolate_peak(frame[j - 1], frame[j], frame[j + 1], j)
            };
            if bin > (size - 1) as f32 {
                break;
            }
            peaks.push(Peak::new(bin, gain));
        }

        i = j;
        if i + 1 >= size - 1 {
            // the bin just before the last one
            if i == size - 2
                && frame[i - 1] < frame[i]
                && frame[i + 1] < frame[i]
                && frame[i] > MAGNITUDE_THRESHOLD
            {
                let (bin, gain) = interpolate_peak(frame[i - 1], frame[i], frame[i + 1], i);
                peaks.push(Peak::new(bin, gain));
            }
            break;
        }
    }

    if frame[size - 1] > frame[size - 2] && frame[size - 1] > MAGNITUDE_THRESHOLD {
        peaks.push(Peak::new((size - 1) as f32, frame[size - 1]));
    }

    peaks.sort_by(|a, b| b.gain.total_cmp(&a.gain));
    peaks.truncate(max_peaks);
    peaks
}
