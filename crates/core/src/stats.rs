//! Small numeric helpers shared by the analyzer, predictor and controller.
//!
//! All functions are total: empty or degenerate input yields `0.0` or `None`
//! rather than NaN.

/// Arithmetic mean, `0.0` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance, `0.0` for an empty slice.
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Largest observed value, `0.0` for an empty slice.
pub fn max(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::max).unwrap_or(0.0)
}

/// Largest absolute deviation from the mean.
pub fn max_deviation(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m).abs()).fold(0.0, f64::max)
}

/// Slope of the least-squares line fitted to `values` against sample index.
///
/// Returns `0.0` for fewer than two points.
pub fn slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n as f64 - 1.0) / 2.0;
    let y_mean = mean(values);

    let mut ss_xy = 0.0;
    let mut ss_xx = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        ss_xy += dx * (y - y_mean);
        ss_xx += dx * dx;
    }
    if ss_xx.abs() < f64::EPSILON {
        return 0.0;
    }
    ss_xy / ss_xx
}

/// Pearson correlation coefficient of two equally long series.
///
/// `None` when the lengths differ, fewer than two points exist, or either
/// series has zero variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let x_mean = mean(xs);
    let y_mean = mean(ys);

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - x_mean;
        let dy = y - y_mean;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    let denom = (var_x * var_y).sqrt();
    if denom < f64::EPSILON {
        return None;
    }
    Some(cov / denom)
}

/// Largest single-step percentage drop between consecutive values.
///
/// Steps from a non-positive value are ignored. Rises count as zero.
pub fn max_step_drop_pct(values: &[f64]) -> f64 {
    values
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[0] - w[1]) / w[0] * 100.0)
        .fold(0.0, f64::max)
}

/// Mean of the values left after sorting ascending and dropping the lowest
/// `trim_fraction` share. `None` for an empty slice.
pub fn upper_trimmed_mean(values: &[f64], trim_fraction: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let drop = ((sorted.len() as f64) * trim_fraction.clamp(0.0, 1.0)) as usize;
    let kept = &sorted[drop.min(sorted.len() - 1)..];
    Some(mean(kept))
}
