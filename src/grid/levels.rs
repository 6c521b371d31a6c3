//! Grid level calculation

use super::errors::{GridError, GridResult};
use super::types::GridLevel;

/// Spacing between adjacent levels of a ladder with `count` levels
pub fn level_interval(lower: f64, upper: f64, count: u32) -> f64 {
    (upper - lower) / (count.saturating_sub(1).max(1)) as f64
}

/// Calculate `count` evenly spaced levels from `lower` to `upper` inclusive
///
/// `level[i] = lower + i * (upper - lower) / (count - 1)`
pub fn compute_levels(lower: f64, upper: f64, count: u32) -> GridResult<Vec<GridLevel>> {
    if count < 2 {
        return Err(GridError::InvalidConfig(format!(
            "grid needs at least 2 levels, got {count}"
        )));
    }
    if !lower.is_finite() || !upper.is_finite() {
        return Err(GridError::InvalidConfig(format!(
            "grid bounds must be finite, got [{lower}, {upper}]"
        )));
    }
    if upper <= lower {
        return Err(GridError::InvalidConfig(format!(
            "upper price {upper} must be above lower price {lower}"
        )));
    }

    let step = level_interval(lower, upper, count);

    Ok((0..count)
        .map(|i| GridLevel::new(i, lower + step * i as f64))
        .collect())
}
