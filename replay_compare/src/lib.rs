//! Core replay cursor-trace comparison library implemented in Rust.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod align;
pub mod decode;
pub mod metrics;
pub mod set;

pub use align::{align_pair, AlignedPair};
pub use decode::{decode_replay_string, parse_events};
pub use metrics::{compute_correlation, compute_distance};
pub use set::{
    compare_replay_pair, compare_replay_set, compare_single_with_set, SetOptions,
};

/// Play-field extent; coordinates outside it are discarded during alignment.
pub const PLAYFIELD_WIDTH: f64 = 512.0;
pub const PLAYFIELD_HEIGHT: f64 = 384.0;

/// Mods bitmask flag for the hard-rock modifier (vertical play-field flip).
pub const MODS_HR: u32 = 1 << 4;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("invalid replay: {0}")]
    InvalidReplay(String),
    #[error("sequence length mismatch: {left} vs {right}")]
    ShapeMismatch { left: usize, right: usize },
    #[error("insufficient data for comparison")]
    InsufficientData,
    #[error("all replays must carry an id for set comparison")]
    MissingIdentity,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// One decoded input record; `time_delta` is relative to the previous record
/// and may be negative or zero.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayEvent {
    pub time_delta: i32,
    pub x: f64,
    pub y: f64,
}

/// Time-ordered cursor trajectory with strictly increasing timestamps.
///
/// Stored as an `n x 3` matrix (columns x, y, t) with the time column also
/// materialized separately for binary-search resampling.
#[derive(Clone, Debug)]
pub struct Trajectory {
    points: Array2<f64>,
    axis: Vec<f64>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.points.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.points.nrows() == 0
    }

    pub fn points(&self) -> &Array2<f64> {
        &self.points
    }

    /// The standalone time column.
    pub fn axis(&self) -> &[f64] {
        &self.axis
    }
}

/// A replay: identity plus an owned trajectory. Immutable once constructed,
/// so it can be shared freely across concurrent comparisons.
#[derive(Clone, Debug)]
pub struct Replay {
    pub id: Option<u64>,
    pub mods: u32,
    trajectory: Trajectory,
}

impl Replay {
    /// Builds a replay from decoded events, reconstructing the monotonic
    /// timeline along the way.
    pub fn from_events(
        events: &[ReplayEvent],
        id: Option<u64>,
        mods: u32,
    ) -> Result<Self, ReplayError> {
        Ok(Self {
            id,
            mods,
            trajectory: build_trajectory(events)?,
        })
    }

    /// Builds a replay from a base64 + LZMA encoded data string.
    pub fn from_encoded(data: &str, id: Option<u64>, mods: u32) -> Result<Self, ReplayError> {
        let events = decode::decode_replay_string(data)?;
        Self::from_events(&events, id, mods)
    }

    pub fn has_hr(&self) -> bool {
        self.mods & MODS_HR == MODS_HR
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }
}

/// Result of one pairwise comparison.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairComparison {
    pub similarity: f64,
    pub correlation: f64,
}

/// One row of a batch comparison. Row order across a batch is unspecified.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetComparison {
    pub replay1_id: u64,
    pub replay1_mods: u32,
    pub replay2_id: u64,
    pub replay2_mods: u32,
    pub similarity: f64,
    pub correlation: f64,
}

/// Reconstructs a monotonically time-ordered trajectory from raw events.
///
/// The source format can contain runs of frames whose cumulative time
/// regresses below a previously seen maximum ("negative sections"). Keeping
/// them would break the monotonic-time assumption the resampler relies on,
/// so each run is replaced by a single corrective sample interpolated at the
/// last known-good timestamp.
pub fn build_trajectory(events: &[ReplayEvent]) -> Result<Trajectory, ReplayError> {
    if events.is_empty() {
        return Err(ReplayError::InvalidReplay("empty event stream".into()));
    }

    // The first frame with a zero delta is an initial synchronization frame.
    let events = if events[0].time_delta == 0 && events.len() > 1 {
        &events[1..]
    } else {
        events
    };

    let mut samples: Vec<[f64; 3]> = Vec::with_capacity(events.len());
    let mut cumulative = i64::from(events[0].time_delta);
    let mut highest = cumulative;
    // Last forward sample before the current negative run, if any.
    let mut last_positive: Option<[f64; 3]> = None;
    let mut in_negative = false;

    for frame in &events[1..] {
        let previous = cumulative;
        cumulative += i64::from(frame.time_delta);
        highest = highest.max(cumulative);

        let negative = cumulative < highest;
        if negative {
            if !in_negative {
                last_positive = samples.last().copied();
            }
        } else {
            if in_negative {
                if let Some([lx, ly, lt]) = last_positive {
                    // The current frame is forward again: patch the run with
                    // one sample interpolated at the last positive timestamp.
                    let ratio = (lt - previous as f64) / (cumulative - previous) as f64;
                    samples.push([
                        lx + ratio * (frame.x - lx),
                        ly + ratio * (frame.y - ly),
                        lt,
                    ]);
                }
            }
            samples.push([frame.x, frame.y, cumulative as f64]);
        }
        in_negative = negative;
    }

    // Collapse duplicate timestamps; the corrective sample is appended after
    // the original it replaces, so later writes win.
    let mut unique: Vec<[f64; 3]> = Vec::with_capacity(samples.len());
    let mut seen: HashMap<u64, usize> = HashMap::with_capacity(samples.len());
    for sample in samples {
        match seen.entry(sample[2].to_bits()) {
            Entry::Occupied(slot) => unique[*slot.get()] = sample,
            Entry::Vacant(slot) => {
                slot.insert(unique.len());
                unique.push(sample);
            }
        }
    }

    let mut flat = Vec::with_capacity(unique.len() * 3);
    let mut axis = Vec::with_capacity(unique.len());
    for sample in &unique {
        flat.extend_from_slice(sample);
        axis.push(sample[2]);
    }
    let points = Array2::from_shape_vec((unique.len(), 3), flat)
        .map_err(|e| ReplayError::InvalidReplay(format!("trajectory shape error: {e}")))?;

    Ok(Trajectory { points, axis })
}
