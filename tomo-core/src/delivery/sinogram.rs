use crate::domain::{LEAF_BANK, PlanRecord};
use crate::error::{Result, TomoError};
use crate::policy::MidpointPolicy;
use crate::util::le::read_f64s;
use std::fs;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, warn};

/// A projection is active when some leaf is open longer than this fraction.
pub const ACTIVITY_THRESHOLD: f64 = 0.01;

/// One-based inclusive projection range where the machine is delivering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveWindow {
    pub start: usize,
    pub stop: usize,
}

impl ActiveWindow {
    pub fn width(&self) -> usize {
        self.stop - self.start + 1
    }

    pub fn contains(&self, projection: usize) -> bool {
        (self.start..=self.stop).contains(&projection)
    }
}

/// Fractional leaf open times, trimmed to the active window.
///
/// Rows cover the whole leaf bank; rows outside the plan's active leaves
/// are always zero.
#[derive(Clone, Debug, PartialEq)]
pub struct LeafSinogram {
    window: ActiveWindow,
    projections: usize,
    leaves: Range<usize>,
    /// `LEAF_BANK` rows of `window.width()` columns.
    values: Vec<f64>,
}

impl LeafSinogram {
    pub fn window(&self) -> ActiveWindow {
        self.window
    }

    /// Untrimmed projection count of the plan.
    pub fn projections(&self) -> usize {
        self.projections
    }

    pub fn active_leaves(&self) -> Range<usize> {
        self.leaves.clone()
    }

    /// Open fraction of `leaf` at one-based `projection`; zero outside the window.
    pub fn value(&self, leaf: usize, projection: usize) -> f64 {
        if leaf >= LEAF_BANK || !self.window.contains(projection) {
            return 0.0;
        }
        self.values[leaf * self.window.width() + (projection - self.window.start)]
    }

    /// Trimmed row for one bank position.
    pub fn row(&self, leaf: usize) -> &[f64] {
        let w = self.window.width();
        &self.values[leaf * w..(leaf + 1) * w]
    }

    /// Zero-filled full-width grid (`LEAF_BANK` rows of `projections` columns).
    pub fn expand(&self) -> Vec<f64> {
        expand(&self.values, self.window, self.projections)
    }

    /// Build from a full-width grid, trimming to its active window.
    pub fn from_full(full: Vec<f64>, projections: usize, leaves: Range<usize>) -> Result<Self> {
        let window = active_window(&full, projections).ok_or(TomoError::EmptyDelivery)?;
        Ok(Self {
            values: trim(&full, projections, window),
            window,
            projections,
            leaves,
        })
    }
}

fn check_layout(leaves: usize, projections: usize, lower: usize) -> Result<()> {
    if leaves == 0 || projections == 0 {
        return Err(TomoError::Validation(format!(
            "sinogram needs at least one leaf and one projection (leaves={leaves}, projections={projections})"
        )));
    }
    if lower + leaves > LEAF_BANK {
        return Err(TomoError::Validation(format!(
            "active leaves {lower}..{} exceed the {LEAF_BANK}-leaf bank",
            lower + leaves
        )));
    }
    Ok(())
}

/// Place projection-major `(open, close)` pairs into a full-width grid.
///
/// Each pair lands in the column of its midpoint, `floor((open + close) / 2) + 1`
/// (one-based), not in the projection it was read from.
pub fn bucket_pairs(
    raw: &[f64],
    leaves: usize,
    projections: usize,
    lower: usize,
    policy: MidpointPolicy,
) -> Result<Vec<f64>> {
    check_layout(leaves, projections, lower)?;
    let need = projections * leaves * 2;
    if raw.len() != need {
        return Err(TomoError::Format(format!(
            "leaf blob holds {} values, expected {need} ({projections} projections x {leaves} leaves x 2)",
            raw.len()
        )));
    }

    let mut full = vec![0.0; LEAF_BANK * projections];
    for (i, pair) in raw.chunks_exact(2).enumerate() {
        let (open, close) = (pair[0], pair[1]);
        let offset = i % leaves;
        let read_at = i / leaves + 1;
        let mid = ((open + close) / 2.0).floor();
        let column = if mid.is_finite() && mid >= 0.0 && mid < projections as f64 {
            mid as usize + 1
        } else {
            match policy {
                MidpointPolicy::Reject => {
                    return Err(TomoError::Format(format!(
                        "leaf {} pair ({open}, {close}) read at projection {read_at} has midpoint outside 1..={projections}",
                        lower + offset
                    )));
                }
                MidpointPolicy::Clamp if mid.is_finite() => {
                    warn!(leaf = lower + offset, read_at, open, close, "clamping midpoint");
                    if mid < 0.0 { 1 } else { projections }
                }
                MidpointPolicy::Clamp | MidpointPolicy::Drop => {
                    warn!(leaf = lower + offset, read_at, open, close, "dropping pair");
                    continue;
                }
            }
        };
        full[(lower + offset) * projections + (column - 1)] = close - open;
    }
    Ok(full)
}

/// First and last one-based columns whose maximum exceeds the threshold.
pub fn active_window(full: &[f64], projections: usize) -> Option<ActiveWindow> {
    let active = |col: usize| {
        (0..LEAF_BANK).any(|leaf| full[leaf * projections + col] > ACTIVITY_THRESHOLD)
    };
    let first = (0..projections).find(|&c| active(c))?;
    let last = (0..projections).rev().find(|&c| active(c))?;
    Some(ActiveWindow {
        start: first + 1,
        stop: last + 1,
    })
}

pub fn trim(full: &[f64], projections: usize, window: ActiveWindow) -> Vec<f64> {
    let mut out = Vec::with_capacity(LEAF_BANK * window.width());
    for leaf in 0..LEAF_BANK {
        let row = &full[leaf * projections..(leaf + 1) * projections];
        out.extend_from_slice(&row[window.start - 1..window.stop]);
    }
    out
}

pub fn expand(trimmed: &[f64], window: ActiveWindow, projections: usize) -> Vec<f64> {
    let w = window.width();
    let mut full = vec![0.0; LEAF_BANK * projections];
    for leaf in 0..LEAF_BANK {
        let dst = leaf * projections + window.start - 1;
        full[dst..dst + w].copy_from_slice(&trimmed[leaf * w..(leaf + 1) * w]);
    }
    full
}

/// Re-encode a full-width grid as the engine's leaf-major `(open, close)` stream.
///
/// Outer loop over `leaves`, inner loop over every projection; a fraction `f`
/// at projection `p` becomes `p - 0.5 - f/2, p - 0.5 + f/2`.
pub fn leaf_major_pairs(full: &[f64], projections: usize, leaves: Range<usize>) -> Vec<f64> {
    let mut out = Vec::with_capacity(leaves.len() * projections * 2);
    for leaf in leaves {
        for p in 1..=projections {
            let f = full[leaf * projections + p - 1];
            let center = p as f64 - 0.5;
            out.push(center - f / 2.0);
            out.push(center + f / 2.0);
        }
    }
    out
}

pub fn decode(
    blob: &Path,
    number_of_leaves: usize,
    number_of_projections: usize,
    lower_leaf_index: usize,
) -> Result<LeafSinogram> {
    decode_with_policy(
        blob,
        number_of_leaves,
        number_of_projections,
        lower_leaf_index,
        MidpointPolicy::default(),
    )
}

pub fn decode_with_policy(
    blob: &Path,
    number_of_leaves: usize,
    number_of_projections: usize,
    lower_leaf_index: usize,
    policy: MidpointPolicy,
) -> Result<LeafSinogram> {
    check_layout(number_of_leaves, number_of_projections, lower_leaf_index)?;
    let bytes = fs::read(blob)?;
    let raw = read_f64s(&bytes)?;
    let full = bucket_pairs(
        &raw,
        number_of_leaves,
        number_of_projections,
        lower_leaf_index,
        policy,
    )?;
    let sino = LeafSinogram::from_full(
        full,
        number_of_projections,
        lower_leaf_index..lower_leaf_index + number_of_leaves,
    )?;
    debug!(
        blob = %blob.display(),
        start = sino.window.start,
        stop = sino.window.stop,
        "decoded leaf sinogram"
    );
    Ok(sino)
}

/// Decode the blob a plan record points at.
pub fn decode_plan(plan: &PlanRecord, policy: MidpointPolicy) -> Result<LeafSinogram> {
    decode_with_policy(
        &plan.sinogram_path,
        plan.number_of_leaves,
        plan.number_of_projections,
        plan.lower_leaf_index,
        policy,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(projections: usize, cells: &[(usize, usize, f64)]) -> Vec<f64> {
        let mut full = vec![0.0; LEAF_BANK * projections];
        for &(leaf, p, v) in cells {
            full[leaf * projections + p - 1] = v;
        }
        full
    }

    #[test]
    fn pairs_land_on_midpoint_column() {
        // 2 leaves x 3 projections, projection-major
        let raw = [
            0.2, 0.6, 1.0, 1.5, // read at p1: mids 0.4 -> col 1, 1.25 -> col 2
            1.1, 1.9, 1.5, 1.5, // read at p2: col 2 (0.8), col 2 (0.0)
            2.0, 2.9, 2.25, 2.75, // read at p3: col 3, col 3
        ];
        let full = bucket_pairs(&raw, 2, 3, 10, MidpointPolicy::Reject).unwrap();
        let at = |leaf: usize, p: usize| full[leaf * 3 + p - 1];
        assert!((at(10, 1) - 0.4).abs() < 1e-12);
        assert!((at(10, 2) - 0.8).abs() < 1e-12);
        assert!((at(10, 3) - 0.9).abs() < 1e-12);
        // leaf 11's col-2 pair from p1 is overwritten by the zero-length pair from p2
        assert_eq!(at(11, 1), 0.0);
        assert_eq!(at(11, 2), 0.0);
        assert!((at(11, 3) - 0.5).abs() < 1e-12);
        for leaf in (0..LEAF_BANK).filter(|l| *l != 10 && *l != 11) {
            assert!((1..=3).all(|p| at(leaf, p) == 0.0));
        }
    }

    #[test]
    fn out_of_range_midpoint_follows_policy() {
        let raw = [0.0, 0.5, 3.0, 3.4];
        let err = bucket_pairs(&raw, 1, 2, 0, MidpointPolicy::Reject).unwrap_err();
        assert!(matches!(err, TomoError::Format(_)));

        let clamped = bucket_pairs(&raw, 1, 2, 0, MidpointPolicy::Clamp).unwrap();
        assert!((clamped[1] - 0.4).abs() < 1e-12);

        let dropped = bucket_pairs(&raw, 1, 2, 0, MidpointPolicy::Drop).unwrap();
        assert_eq!(dropped[1], 0.0);
        assert!((dropped[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn window_ignores_sub_threshold_columns() {
        let full = grid(6, &[(3, 2, 0.005), (3, 3, 0.2), (40, 5, 0.011), (40, 6, 0.01)]);
        let w = active_window(&full, 6).unwrap();
        assert_eq!(w, ActiveWindow { start: 3, stop: 5 });
    }

    #[test]
    fn empty_delivery_is_an_error() {
        let full = grid(4, &[(0, 1, 0.01)]);
        let err = LeafSinogram::from_full(full, 4, 0..1).unwrap_err();
        assert!(matches!(err, TomoError::EmptyDelivery));
    }

    #[test]
    fn trim_then_expand_round_trips_window() {
        let full = grid(8, &[(5, 3, 0.4), (6, 4, 0.02), (7, 6, 0.9)]);
        let sino = LeafSinogram::from_full(full.clone(), 8, 5..8).unwrap();
        assert_eq!(sino.window(), ActiveWindow { start: 3, stop: 6 });
        let expanded = sino.expand();
        assert_eq!(expanded, full);
        assert_eq!(active_window(&expanded, 8), Some(sino.window()));
        assert_eq!(sino.value(7, 6), 0.9);
        assert_eq!(sino.value(7, 7), 0.0);
        assert_eq!(sino.row(5), &[0.4, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn leaf_major_pairs_transpose_and_center() {
        let full = grid(3, &[(2, 1, 0.5), (3, 3, 1.0)]);
        let pairs = leaf_major_pairs(&full, 3, 2..4);
        assert_eq!(pairs.len(), 2 * 3 * 2);
        assert_eq!(&pairs[0..2], &[0.25, 0.75]);
        assert_eq!(&pairs[2..4], &[1.5, 1.5]);
        assert_eq!(&pairs[10..12], &[2.0, 3.0]);
    }

    #[test]
    fn leaf_range_must_fit_bank() {
        let err = bucket_pairs(&[], 10, 1, 60, MidpointPolicy::Reject).unwrap_err();
        assert!(matches!(err, TomoError::Validation(_)));
    }
}
