//! Resampling and alignment of two replays onto a common time axis.

use ndarray::Array2;

use crate::{Replay, ReplayError, Trajectory, PLAYFIELD_HEIGHT, PLAYFIELD_WIDTH};

/// Two equal-length, bounds-filtered, orientation-normalized coordinate
/// sequences (`n x 2` each), ready for metric computation. Built fresh per
/// comparison and never mutated afterwards.
#[derive(Clone, Debug)]
pub struct AlignedPair {
    pub(crate) a: Array2<f64>,
    pub(crate) b: Array2<f64>,
}

impl AlignedPair {
    pub fn len(&self) -> usize {
        self.a.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.a.nrows() == 0
    }
}

fn is_valid_coordinate(x: f64, y: f64) -> bool {
    (0.0..=PLAYFIELD_WIDTH).contains(&x) && (0.0..=PLAYFIELD_HEIGHT).contains(&y)
}

/// Aligns two replays for comparison.
///
/// The shorter replay (strict `<` on sample count; ties keep the second
/// operand as long) is resampled onto every timestamp of the longer one, the
/// y axis of exactly one side is flipped when the HR modifier mismatches,
/// and index positions where either side leaves the play field are dropped.
pub fn align_pair(replay1: &Replay, replay2: &Replay) -> Result<AlignedPair, ReplayError> {
    let (long, short) = if replay1.trajectory().len() > replay2.trajectory().len() {
        (replay1, replay2)
    } else {
        (replay2, replay1)
    };

    if short.trajectory().is_empty() || long.trajectory().is_empty() {
        return Err(ReplayError::InsufficientData);
    }

    let resampled = resample_onto(short.trajectory(), long.trajectory());
    let flip_short = short.has_hr() && !long.has_hr();
    let flip_long = long.has_hr() && !short.has_hr();

    let n = long.trajectory().len();
    let long_points = long.trajectory().points();
    let mut kept_a = Vec::new();
    let mut kept_b = Vec::new();
    for i in 0..n {
        let xa = resampled[[i, 0]];
        let ya = if flip_short {
            PLAYFIELD_HEIGHT - resampled[[i, 1]]
        } else {
            resampled[[i, 1]]
        };
        let xb = long_points[[i, 0]];
        let yb = if flip_long {
            PLAYFIELD_HEIGHT - long_points[[i, 1]]
        } else {
            long_points[[i, 1]]
        };
        if is_valid_coordinate(xa, ya) && is_valid_coordinate(xb, yb) {
            kept_a.extend_from_slice(&[xa, ya]);
            kept_b.extend_from_slice(&[xb, yb]);
        }
    }

    if kept_a.len() != kept_b.len() {
        return Err(ReplayError::ShapeMismatch {
            left: kept_a.len() / 2,
            right: kept_b.len() / 2,
        });
    }

    let rows = kept_a.len() / 2;
    let a = Array2::from_shape_vec((rows, 2), kept_a)
        .map_err(|e| ReplayError::InvalidReplay(format!("aligned pair shape error: {e}")))?;
    let b = Array2::from_shape_vec((rows, 2), kept_b)
        .map_err(|e| ReplayError::InvalidReplay(format!("aligned pair shape error: {e}")))?;
    Ok(AlignedPair { a, b })
}

/// Resamples `short` onto every timestamp of `long`.
///
/// Query times are non-decreasing across the loop, so the binary search is
/// restricted to indices at or after the previous bracket (monotone cursor).
/// Bracket indices are clamped at the ends; boundary samples are reused
/// rather than extrapolated.
fn resample_onto(short: &Trajectory, long: &Trajectory) -> Array2<f64> {
    let axis = short.axis();
    let points = short.points();
    let last = axis.len() - 1;
    let mut out = Array2::zeros((long.len(), 2));
    let mut cursor = 0usize;

    for (i, &t) in long.axis().iter().enumerate() {
        let (lower, upper) = match axis[cursor..].binary_search_by(|probe| probe.total_cmp(&t)) {
            Ok(rel) => (cursor + rel, cursor + rel),
            Err(rel) => {
                let insertion = cursor + rel;
                (insertion.clamp(1, last + 1) - 1, insertion.min(last))
            }
        };
        cursor = lower;

        if lower == upper {
            out[[i, 0]] = points[[lower, 0]];
            out[[i, 1]] = points[[lower, 1]];
        } else {
            let ratio = (t - axis[lower]) / (axis[upper] - axis[lower]);
            out[[i, 0]] = points[[lower, 0]] + ratio * (points[[upper, 0]] - points[[lower, 0]]);
            out[[i, 1]] = points[[lower, 1]] + ratio * (points[[upper, 1]] - points[[lower, 1]]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ReplayEvent, MODS_HR};

    fn replay_from(samples: &[(i32, f64, f64)], id: u64, mods: u32) -> Replay {
        let events: Vec<ReplayEvent> = samples
            .iter()
            .map(|&(time_delta, x, y)| ReplayEvent { time_delta, x, y })
            .collect();
        Replay::from_events(&events, Some(id), mods).unwrap()
    }

    fn ramp(count: usize, dt: i32, id: u64, mods: u32) -> Replay {
        let samples: Vec<(i32, f64, f64)> = (0..count)
            .map(|i| (dt, 10.0 + i as f64, 20.0 + i as f64))
            .collect();
        replay_from(&samples, id, mods)
    }

    #[test]
    fn test_self_alignment_is_identical() {
        let replay = ramp(50, 10, 1, 0);
        let pair = align_pair(&replay, &replay).unwrap();
        assert_eq!(pair.len(), replay.trajectory().len());
        assert_eq!(pair.a, pair.b);
    }

    #[test]
    fn test_resampling_matches_long_length() {
        let short = ramp(20, 20, 1, 0);
        let long = ramp(40, 10, 2, 0);
        let pair = align_pair(&short, &long).unwrap();
        assert_eq!(pair.len(), long.trajectory().len());
    }

    #[test]
    fn test_exact_timestamp_hits_use_sample_directly() {
        // Long samples every 10 ms, short every 20 ms on the same clock: every
        // second long timestamp hits a short sample exactly.
        let short = ramp(10, 20, 1, 0);
        let long = ramp(20, 10, 2, 0);
        let resampled = resample_onto(short.trajectory(), long.trajectory());
        // long t = 40 hits short's first sample (t = 40, x = 11) exactly.
        assert_eq!(resampled[[2, 0]], 11.0);
        // long t = 50 falls midway between short t = 40 and t = 60.
        assert!((resampled[[3, 0]] - 11.5).abs() < 1e-12);
    }

    #[test]
    fn test_boundary_samples_reused_beyond_range() {
        // Short covers t in [30, 40]; long extends from t = 20 to t = 100.
        let short = replay_from(&[(10, 0.0, 0.0), (20, 1.0, 1.0), (10, 2.0, 2.0)], 1, 0);
        let long = ramp(10, 10, 2, 0);
        let resampled = resample_onto(short.trajectory(), long.trajectory());
        // Before the short range: first sample reused.
        assert_eq!(resampled[[0, 0]], 1.0);
        // After the short range: last sample reused.
        assert_eq!(resampled[[8, 0]], 2.0);
    }

    #[test]
    fn test_hr_mismatch_flips_exactly_one_side() {
        let plain = ramp(30, 10, 1, 0);
        let hr = ramp(30, 10, 2, MODS_HR);
        let pair = align_pair(&plain, &hr).unwrap();
        // Tie on length keeps the second operand as long, so `a` is the
        // resampled plain replay and `b` is the HR replay, flipped. The
        // first event only seeds the cumulative clock, so the first emitted
        // sample carries the second event's coordinates (y = 21).
        assert_eq!(pair.a.column(1)[0], 21.0);
        assert_eq!(pair.b.column(1)[0], PLAYFIELD_HEIGHT - 21.0);
    }

    #[test]
    fn test_matching_hr_is_not_flipped() {
        let a = ramp(30, 10, 1, MODS_HR);
        let b = ramp(30, 10, 2, MODS_HR);
        let pair = align_pair(&a, &b).unwrap();
        assert_eq!(pair.a, pair.b);
    }

    #[test]
    fn test_out_of_bounds_samples_filtered() {
        let mut samples: Vec<(i32, f64, f64)> = (0..10).map(|i| (10, 100.0 + i as f64, 100.0)).collect();
        samples[4].1 = 600.0; // off the play field
        samples[7].2 = -5.0;
        let bad = replay_from(&samples, 1, 0);
        let good = ramp(10, 10, 2, 0);
        let pair = align_pair(&bad, &good).unwrap();
        assert_eq!(pair.len(), 7);
    }

    #[test]
    fn test_zero_overlap_yields_empty_pair() {
        let off_field: Vec<(i32, f64, f64)> = (0..10).map(|i| (10, 600.0 + i as f64, 500.0)).collect();
        let bad = replay_from(&off_field, 1, 0);
        let good = ramp(10, 10, 2, 0);
        let pair = align_pair(&bad, &good).unwrap();
        assert!(pair.is_empty());
    }
}
