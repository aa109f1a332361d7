//! Pairwise comparison and concurrent orchestration over replay sets.

use std::collections::HashSet;

use rayon::prelude::*;

use crate::align::align_pair;
use crate::metrics::{compute_correlation, compute_distance};
use crate::{PairComparison, Replay, ReplayError, SetComparison};

/// Orchestration options for batch comparisons.
#[derive(Clone, Copy, Debug)]
pub struct SetOptions {
    /// Worker-pool size; 0 means host parallelism.
    pub num_threads: usize,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self { num_threads: 0 }
    }
}

/// Compares two replays, producing a (similarity, correlation) result.
///
/// Both metrics are pure functions of the same aligned pair and run
/// concurrently with each other.
pub fn compare_replay_pair(
    replay1: &Replay,
    replay2: &Replay,
) -> Result<PairComparison, ReplayError> {
    let pair = align_pair(replay1, replay2)?;
    let (similarity, correlation) =
        rayon::join(|| compute_distance(&pair), || compute_correlation(&pair));
    Ok(PairComparison {
        similarity: similarity?,
        correlation: correlation?,
    })
}

/// Compares every unordered pair of a replay set.
///
/// The set is first deduplicated by id (first occurrence wins). Every replay
/// must carry an id; this is checked eagerly, before any work is dispatched.
/// A failing pair fails the whole batch: results are gathered through
/// rayon's short-circuiting `Result` collection, so no partial rows are
/// returned and no unsynchronized shared list is involved.
pub fn compare_replay_set(
    replays: &[Replay],
    options: &SetOptions,
) -> Result<Vec<SetComparison>, ReplayError> {
    if replays.iter().any(|r| r.id.is_none()) {
        return Err(ReplayError::MissingIdentity);
    }

    let unique = dedup_by_id(replays);
    let mut pairs = Vec::with_capacity(unique.len() * unique.len().saturating_sub(1) / 2);
    for i in 0..unique.len() {
        for j in i + 1..unique.len() {
            pairs.push((unique[i], unique[j]));
        }
    }
    run_comparisons(&pairs, options)
}

/// Compares one reference replay against every member of a set.
///
/// The collection is not deduplicated; the reference is compared to every
/// entry, repeats included.
pub fn compare_single_with_set(
    reference: &Replay,
    replays: &[Replay],
    options: &SetOptions,
) -> Result<Vec<SetComparison>, ReplayError> {
    if reference.id.is_none() || replays.iter().any(|r| r.id.is_none()) {
        return Err(ReplayError::MissingIdentity);
    }

    let pairs: Vec<(&Replay, &Replay)> = replays.iter().map(|r| (reference, r)).collect();
    run_comparisons(&pairs, options)
}

fn dedup_by_id(replays: &[Replay]) -> Vec<&Replay> {
    let mut seen = HashSet::new();
    replays.iter().filter(|r| seen.insert(r.id)).collect()
}

fn run_comparisons(
    pairs: &[(&Replay, &Replay)],
    options: &SetOptions,
) -> Result<Vec<SetComparison>, ReplayError> {
    let compare_all = || {
        pairs
            .par_iter()
            .map(|&(replay1, replay2)| {
                let result = compare_replay_pair(replay1, replay2)?;
                Ok(SetComparison {
                    replay1_id: replay1.id.ok_or(ReplayError::MissingIdentity)?,
                    replay1_mods: replay1.mods,
                    replay2_id: replay2.id.ok_or(ReplayError::MissingIdentity)?,
                    replay2_mods: replay2.mods,
                    similarity: result.similarity,
                    correlation: result.correlation,
                })
            })
            .collect::<Result<Vec<_>, ReplayError>>()
    };

    if options.num_threads == 0 {
        compare_all()
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.num_threads)
            .build()
            .map_err(|e| ReplayError::InvalidParameter(format!("worker pool: {e}")))?;
        pool.install(compare_all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ReplayEvent, MODS_HR, PLAYFIELD_HEIGHT};

    /// A smooth synthetic cursor trace sampled every `dt` ms, expressed as a
    /// function of absolute time so differently-sampled copies share a shape.
    fn trace(count: usize, dt: i32, id: u64, mods: u32) -> Replay {
        let events: Vec<ReplayEvent> = (0..count)
            .map(|_| dt)
            .enumerate()
            .map(|(i, dt)| {
                let t = (dt as f64) * (i as f64 + 1.0);
                ReplayEvent {
                    time_delta: dt,
                    x: 256.0 + 200.0 * (t / 200.0).sin(),
                    y: 192.0 + 150.0 * (t / 300.0).cos(),
                }
            })
            .collect();
        Replay::from_events(&events, Some(id), mods).unwrap()
    }

    #[test]
    fn test_self_comparison() {
        let replay = trace(200, 10, 1, 0);
        let result = compare_replay_pair(&replay, &replay).unwrap();
        assert!(result.similarity.abs() < 1e-9);
        assert!(result.correlation > 0.95);
    }

    #[test]
    fn test_pair_comparison_is_symmetric() {
        let a = trace(100, 13, 1, 0);
        let b = trace(130, 10, 2, 0);
        let ab = compare_replay_pair(&a, &b).unwrap();
        let ba = compare_replay_pair(&b, &a).unwrap();
        assert!((ab.similarity - ba.similarity).abs() < 1e-9);
        assert!((ab.correlation - ba.correlation).abs() < 1e-9);
    }

    #[test]
    fn test_time_scaled_traces_stay_close() {
        // Same shape, one sampled at 100 x 13 ms and one at 130 x 10 ms: the
        // shorter one resamples onto 130 points and the pair scores as a
        // near-perfect match.
        let a = trace(100, 13, 1, 0);
        let b = trace(130, 10, 2, 0);
        let result = compare_replay_pair(&a, &b).unwrap();
        // Linear interpolation on a 13 ms grid keeps the per-sample error
        // well under half a pixel on this trace.
        assert!(result.similarity < 0.5, "similarity: {}", result.similarity);
        assert!(result.correlation > 0.9, "correlation: {}", result.correlation);
    }

    #[test]
    fn test_hr_flip_round_trip() {
        // Mirroring a trace and marking it HR must compare exactly like the
        // unmirrored, unflagged original.
        let plain = trace(100, 10, 1, 0);
        let other = trace(120, 10, 2, 0);
        let mirrored_events: Vec<ReplayEvent> = (0..120)
            .map(|i| {
                let t = 10.0 * (i as f64 + 1.0);
                ReplayEvent {
                    time_delta: 10,
                    x: 256.0 + 200.0 * (t / 200.0).sin(),
                    y: PLAYFIELD_HEIGHT - (192.0 + 150.0 * (t / 300.0).cos()),
                }
            })
            .collect();
        let mirrored = Replay::from_events(&mirrored_events, Some(2), MODS_HR).unwrap();

        let baseline = compare_replay_pair(&plain, &other).unwrap();
        let flipped = compare_replay_pair(&plain, &mirrored).unwrap();
        assert!((baseline.similarity - flipped.similarity).abs() < 1e-9);
        assert!((baseline.correlation - flipped.correlation).abs() < 1e-9);
    }

    #[test]
    fn test_set_deduplicates_by_id() {
        let replays = vec![
            trace(100, 10, 1, 0),
            trace(110, 10, 2, 0),
            trace(120, 10, 1, 0),
        ];
        let rows = compare_replay_set(&replays, &SetOptions::default()).unwrap();
        // ids {1, 2} survive: one unordered pair.
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].replay1_id, 1);
        assert_eq!(rows[0].replay2_id, 2);
    }

    #[test]
    fn test_set_all_pairs_row_count() {
        let replays: Vec<Replay> = (0..5).map(|i| trace(100 + i, 10, i as u64, 0)).collect();
        let rows = compare_replay_set(&replays, &SetOptions { num_threads: 2 }).unwrap();
        assert_eq!(rows.len(), 10);
    }

    #[test]
    fn test_set_requires_identity() {
        let replays = vec![
            trace(100, 10, 1, 0),
            Replay::from_events(
                &[
                    ReplayEvent { time_delta: 10, x: 1.0, y: 1.0 },
                    ReplayEvent { time_delta: 10, x: 2.0, y: 2.0 },
                ],
                None,
                0,
            )
            .unwrap(),
        ];
        assert!(matches!(
            compare_replay_set(&replays, &SetOptions::default()),
            Err(ReplayError::MissingIdentity)
        ));
    }

    #[test]
    fn test_single_with_set_keeps_repeats() {
        let reference = trace(100, 10, 9, 0);
        let replays = vec![
            trace(110, 10, 1, 0),
            trace(110, 10, 1, 0),
            trace(120, 10, 2, 0),
        ];
        let rows = compare_single_with_set(&reference, &replays, &SetOptions::default()).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.replay1_id == 9));
    }

    #[test]
    fn test_zero_overlap_fails_batch() {
        let off_field: Vec<ReplayEvent> = (0..50)
            .map(|_| ReplayEvent { time_delta: 10, x: 900.0, y: 700.0 })
            .collect();
        let replays = vec![
            trace(100, 10, 1, 0),
            Replay::from_events(&off_field, Some(2), 0).unwrap(),
        ];
        assert!(matches!(
            compare_replay_set(&replays, &SetOptions::default()),
            Err(ReplayError::InsufficientData)
        ));
    }
}
