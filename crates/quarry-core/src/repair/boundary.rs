//! Locating split boundaries in a series and measuring how far a bar sits
//! from its neighbours.

use time::Date;

use crate::{CorporateAction, PriceBar};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct DeclaredSplit {
    pub(super) effective: Date,
    pub(super) factor: f64,
}

/// Declared splits in date order.
pub(super) fn declared_splits(actions: &[CorporateAction]) -> Vec<DeclaredSplit> {
    let mut splits: Vec<DeclaredSplit> = actions
        .iter()
        .filter_map(|action| match *action {
            CorporateAction::Split { effective, ratio } => Some(DeclaredSplit {
                effective,
                factor: ratio.factor(),
            }),
            CorporateAction::Dividend { .. } => None,
        })
        .collect();
    splits.sort_by_key(|split| split.effective);
    splits
}

/// A split located between two bars of the current series.
///
/// Splits with no bar between them share a boundary; their factors are
/// multiplied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct Boundary {
    /// First bar dated on or after the effective date.
    pub(super) index: usize,
    pub(super) factor: f64,
    /// Latest effective date among the merged splits.
    pub(super) effective: Date,
}

/// Boundaries with bars on both sides, latest first.
pub(super) fn locate(bars: &[PriceBar], splits: &[DeclaredSplit]) -> Vec<Boundary> {
    let mut boundaries: Vec<Boundary> = Vec::new();
    for split in splits {
        let index = bars.partition_point(|bar| bar.ts.date() < split.effective);
        if index == 0 || index == bars.len() {
            continue;
        }
        match boundaries.iter_mut().find(|boundary| boundary.index == index) {
            Some(boundary) => {
                boundary.factor *= split.factor;
                boundary.effective = boundary.effective.max(split.effective);
            }
            None => boundaries.push(Boundary {
                index,
                factor: split.factor,
                effective: split.effective,
            }),
        }
    }
    boundaries.sort_by(|a, b| b.index.cmp(&a.index));
    boundaries
}

pub(super) fn is_split_boundary(boundaries: &[Boundary], index: usize) -> bool {
    boundaries.iter().any(|boundary| boundary.index == index)
}

/// Symmetric ratio, always >= 1.
pub(super) fn deviation(a: f64, b: f64) -> f64 {
    if a >= b {
        a / b
    } else {
        b / a
    }
}

/// Combined split factor for boundaries crossed between two bars.
fn factor_between(boundaries: &[Boundary], a: usize, b: usize) -> f64 {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    boundaries
        .iter()
        .filter(|boundary| boundary.index > lo && boundary.index <= hi)
        .map(|boundary| boundary.factor)
        .product()
}

/// Deviation of bar `at` from bar `other`. Across a split boundary both the
/// raw and the split-adjusted basis are tried and the smaller wins.
fn neighbour_deviation(bars: &[PriceBar], boundaries: &[Boundary], at: usize, other: usize) -> f64 {
    let close = bars[at].close;
    let other_close = bars[other].close;
    let raw = deviation(close, other_close);

    let factor = factor_between(boundaries, at, other);
    if factor == 1.0 {
        return raw;
    }
    let rebased = if other < at {
        other_close / factor
    } else {
        other_close * factor
    };
    raw.min(deviation(close, rebased))
}

/// If bar `at` is an isolated spike, its deviation from the nearer of its
/// two neighbours.
///
/// A spike sits at least `outlier_ratio` away from both neighbours while
/// trading a volume within the same ratio of their average. Bars at either
/// end of the series have only one neighbour and are never spikes.
pub(super) fn spike_deviation(
    bars: &[PriceBar],
    boundaries: &[Boundary],
    at: usize,
    outlier_ratio: f64,
) -> Option<f64> {
    if at == 0 || at + 1 >= bars.len() {
        return None;
    }
    let before = neighbour_deviation(bars, boundaries, at, at - 1);
    let after = neighbour_deviation(bars, boundaries, at, at + 1);
    if before < outlier_ratio || after < outlier_ratio {
        return None;
    }
    volume_is_plausible(bars, at, outlier_ratio).then_some(before.min(after))
}

fn volume_is_plausible(bars: &[PriceBar], at: usize, outlier_ratio: f64) -> bool {
    let reference = (bars[at - 1].volume as f64 + bars[at + 1].volume as f64) / 2.0;
    if reference == 0.0 {
        return true;
    }
    let ratio = bars[at].volume as f64 / reference;
    ratio >= 1.0 / outlier_ratio && ratio <= outlier_ratio
}
