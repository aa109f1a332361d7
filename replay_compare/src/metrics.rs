//! Similarity metrics over an aligned replay pair.

use ndarray::{s, Array2, ArrayView2};
use rayon::prelude::*;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::{AlignedPair, ReplayError};

/// Number of sub-segments the correlation metric evaluates independently.
/// Correlating the whole trace washes out localized timing offsets; the
/// median over per-window best-alignment scores is robust against a single
/// erratic segment.
const CORRELATION_CHUNKS: usize = 5;

/// Mean per-sample Euclidean distance between the two aligned sequences.
pub fn compute_distance(pair: &AlignedPair) -> Result<f64, ReplayError> {
    let (a, b) = (&pair.a, &pair.b);
    if a.nrows() != b.nrows() {
        return Err(ReplayError::ShapeMismatch {
            left: a.nrows(),
            right: b.nrows(),
        });
    }
    let n = a.nrows();
    if n == 0 {
        // A pair with no overlapping valid coordinates cannot be compared.
        return Err(ReplayError::InsufficientData);
    }

    let mut total = 0.0;
    for i in 0..n {
        let dx = a[[i, 0]] - b[[i, 0]];
        let dy = a[[i, 1]] - b[[i, 1]];
        total += (dx * dx + dy * dy).sqrt();
    }
    Ok(total / n as f64)
}

/// Chunked, FFT-based normalized cross-correlation, aggregated by median.
///
/// The pair is split into five contiguous chunks (the fifth absorbs the
/// remainder); each chunk is de-meaned, cross-correlated, normalized by
/// `sd(a) * sd(b) * 2 * len`, and scored by its best-alignment (maximum)
/// value. Chunks that are empty or degenerate (constant signal, so the
/// normalization factor vanishes) are excluded from the median instead of
/// propagating a `NaN`; if no chunk survives the result is
/// `InsufficientData`.
pub fn compute_correlation(pair: &AlignedPair) -> Result<f64, ReplayError> {
    let (a, b) = (&pair.a, &pair.b);
    if a.nrows() != b.nrows() {
        return Err(ReplayError::ShapeMismatch {
            left: a.nrows(),
            right: b.nrows(),
        });
    }

    let n = a.nrows();
    let chunk = n / CORRELATION_CHUNKS;
    let ranges: Vec<(usize, usize)> = (0..CORRELATION_CHUNKS)
        .map(|i| {
            let start = i * chunk;
            let end = if i < CORRELATION_CHUNKS - 1 {
                start + chunk
            } else {
                n
            };
            (start, end)
        })
        .collect();

    let mut scores: Vec<f64> = ranges
        .par_iter()
        .filter_map(|&(start, end)| {
            chunk_score(a.slice(s![start..end, ..]), b.slice(s![start..end, ..]))
        })
        .collect();

    if scores.is_empty() {
        return Err(ReplayError::InsufficientData);
    }
    Ok(median(&mut scores))
}

fn chunk_score(a: ArrayView2<'_, f64>, b: ArrayView2<'_, f64>) -> Option<f64> {
    let len = a.nrows();
    if len == 0 {
        return None;
    }

    // De-mean across the flattened x/y values of each chunk.
    let mut ca = a.to_owned();
    let mut cb = b.to_owned();
    ca -= ca.mean().unwrap_or(0.0);
    cb -= cb.mean().unwrap_or(0.0);

    let norm = sample_sd(&ca) * sample_sd(&cb) * (2 * len) as f64;
    if !norm.is_finite() || norm <= 0.0 {
        return None;
    }

    let correlation = cross_correlate(&ca, &cb);
    let best = correlation
        .into_iter()
        .fold(f64::NEG_INFINITY, |acc, v| acc.max(v / norm));
    best.is_finite().then_some(best)
}

/// Discrete linear cross-correlation of two `n x 2` coordinate chunks via
/// FFT convolution: the x channel rides the real part and the y channel the
/// imaginary part, one operand is reversed and conjugated, both are
/// zero-padded to the next power of two at least `len_a + len_b - 1`,
/// transformed, multiplied elementwise, and inverse-transformed; the real
/// part truncated to `len_a + len_b - 1` is returned.
fn cross_correlate(a: &Array2<f64>, b: &Array2<f64>) -> Vec<f64> {
    let n = a.nrows() + b.nrows() - 1;
    let size = n.next_power_of_two();

    let mut fa = vec![Complex::new(0.0, 0.0); size];
    let mut fb = vec![Complex::new(0.0, 0.0); size];
    for i in 0..a.nrows() {
        fa[i] = Complex::new(a[[i, 0]], a[[i, 1]]);
    }
    for i in 0..b.nrows() {
        let j = b.nrows() - 1 - i;
        fb[i] = Complex::new(b[[j, 0]], -b[[j, 1]]);
    }

    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(size).process(&mut fa);
    planner.plan_fft_forward(size).process(&mut fb);
    for (x, y) in fa.iter_mut().zip(fb.iter()) {
        *x *= *y;
    }
    planner.plan_fft_inverse(size).process(&mut fa);

    // rustfft leaves the inverse transform unscaled.
    let scale = 1.0 / size as f64;
    fa[..n].iter().map(|c| c.re * scale).collect()
}

/// Sample standard deviation over all elements of the matrix.
fn sample_sd(values: &Array2<f64>) -> f64 {
    let count = values.len();
    if count < 2 {
        return 0.0;
    }
    let mean = values.mean().unwrap_or(0.0);
    let sum_sq: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    (sum_sq / (count - 1) as f64).sqrt()
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
