//! Robust statistics for rate buckets: mean, median, MAD and the outlier test.
//!
//! Every function tolerates non-finite inputs by skipping them; an empty
//! (or all-invalid) input yields `None` rather than a zero that would
//! poison downstream averages.

/// Relative scale used when both MAD and standard deviation collapse to
/// zero (every prior sample identical).
const DEGENERATE_RELATIVE_SCALE: f64 = 0.05;
const DEGENERATE_ABSOLUTE_SCALE: f64 = 1e-9;

fn finite(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    let v = finite(values);
    if v.is_empty() {
        return None;
    }
    Some(v.iter().sum::<f64>() / v.len() as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    let mut v = finite(values);
    if v.is_empty() {
        return None;
    }
    v.sort_by(f64::total_cmp);
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        Some((v[mid - 1] + v[mid]) / 2.0)
    } else {
        Some(v[mid])
    }
}

/// Median absolute deviation around `center`.
pub fn median_abs_deviation(values: &[f64], center: f64) -> Option<f64> {
    let deviations: Vec<f64> = finite(values).iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// Population standard deviation around `mean`.
pub fn std_dev(values: &[f64], mean: f64) -> Option<f64> {
    let v = finite(values);
    if v.is_empty() {
        return None;
    }
    let var = v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / v.len() as f64;
    Some(var.sqrt())
}

/// Which dispersion estimate produced the outlier bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleKind {
    Mad,
    StdDev,
    /// All prior samples identical; a small relative band is used.
    Degenerate,
}

/// Result of testing a candidate sample against a bucket's history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierAssessment {
    pub is_outlier: bool,
    pub center: f64,
    pub scale: f64,
    pub scale_kind: ScaleKind,
    pub lower: f64,
    pub upper: f64,
    /// The candidate clipped into `[lower, upper]`.
    pub clipped: f64,
}

/// Test `candidate` against `history`.
///
/// Returns `None` when fewer than `min_samples` valid history values exist
/// (or the candidate itself is not finite). Otherwise the candidate is an
/// outlier when it lies further than `k × MAD` from the median; if MAD is
/// zero, further than `k` standard deviations from the mean.
pub fn assess_outlier(
    history: &[f64],
    candidate: f64,
    k: f64,
    min_samples: usize,
) -> Option<OutlierAssessment> {
    if !candidate.is_finite() {
        return None;
    }
    let valid = finite(history);
    if valid.len() < min_samples.max(1) {
        return None;
    }

    let med = median(&valid)?;
    let mad = median_abs_deviation(&valid, med)?;

    let (center, scale, scale_kind) = if mad > 0.0 {
        (med, mad, ScaleKind::Mad)
    } else {
        let mu = mean(&valid)?;
        let sd = std_dev(&valid, mu)?;
        if sd > 0.0 {
            (mu, sd, ScaleKind::StdDev)
        } else {
            let s = (mu.abs() * DEGENERATE_RELATIVE_SCALE).max(DEGENERATE_ABSOLUTE_SCALE);
            (mu, s, ScaleKind::Degenerate)
        }
    };

    let lower = center - k * scale;
    let upper = center + k * scale;
    let is_outlier = (candidate - center).abs() > k * scale;

    Some(OutlierAssessment {
        is_outlier,
        center,
        scale,
        scale_kind,
        lower,
        upper,
        clipped: candidate.clamp(lower, upper),
    })
}

/// Bounded rolling average.
///
/// Treats `current` as the mean of `entries` values and folds in
/// `new_value` with the given `weight` (0–1). A missing or zero `current`
/// starts the average at `new_value`.
pub fn rolling_average(current: Option<f64>, new_value: f64, weight: f64, entries: u32) -> f64 {
    if entries == 0 {
        return new_value;
    }
    let avg = match current {
        Some(c) if c.is_finite() && c != 0.0 => c,
        _ => new_value,
    };
    let n = f64::from(entries);
    let sum = avg * (n - 1.0);
    let weighted = (new_value - avg) * weight.clamp(0.0, 1.0);
    (sum + avg + weighted) / n
}
