//! # Price Repair
//!
//! Pure reconciliation of a raw bar series with the provider's declared
//! corporate actions.
//!
//! The engine:
//!
//! 1. sanitizes the series (order, duplicates, impossible prices, high/low);
//! 2. checks every declared split boundary, latest first, and rescales the
//!    pre-boundary segment when the provider already adjusted it;
//! 3. reports unexplained jumps and clips isolated single-bar spikes;
//! 4. repeats 2-3 until nothing changes;
//! 5. recomputes adjusted close from close prices and the declared actions.
//!
//! Prices are only ever scaled or dropped. Nothing is interpolated, and the
//! most recent segment is never modified, so it stays the reference basis.
//! Because the result is a fixed point of steps 2-3 and adjusted close is
//! derived from close alone, repairing a repaired series changes nothing.
//!
//! ```rust
//! use quarry_core::repair::{repair, RepairConfig};
//!
//! let outcome = repair(Vec::new(), &[], &RepairConfig::default());
//! assert!(outcome.bars.is_empty());
//! assert!(!outcome.is_ambiguous());
//! ```

mod adjust;
mod boundary;
mod jumps;
mod sanitize;
mod splits;

use serde::{Deserialize, Serialize};
use time::Date;
use tracing::{info, warn};

use crate::{CorporateAction, ExchangeDateTime, PriceBar};

/// Detection thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Relative band within which an observed boundary ratio counts as a
    /// match for the declared ratio (or for 1).
    pub split_tolerance: f64,
    /// Close-to-close ratio (either direction) reported as a jump.
    pub jump_ratio: f64,
    /// Deviation from both neighbours that makes a bar an isolated spike.
    /// Also bounds how far a spike's volume may stray from its neighbours'.
    pub outlier_ratio: f64,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            split_tolerance: 0.10,
            jump_ratio: 1.8,
            outlier_ratio: 10.0,
        }
    }
}

/// Category of a repair warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// An anomaly was detected that the declared actions do not explain.
    DataIntegrityAmbiguous,
    /// A bar could not be used and was removed.
    InvalidBar,
    /// A declared action could not be applied.
    IgnoredAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairWarning {
    pub kind: WarningKind,
    /// Exchange-local date the warning refers to, when there is one.
    pub date: Option<Date>,
    pub message: String,
}

impl RepairWarning {
    pub(crate) fn new(kind: WarningKind, date: Option<Date>, message: impl Into<String>) -> Self {
        Self {
            kind,
            date,
            message: message.into(),
        }
    }
}

/// One change applied to the series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Correction {
    /// Input bars were not in timestamp order.
    Reordered,
    DuplicateRemoved { ts: ExchangeDateTime },
    BarRejected { ts: ExchangeDateTime, reason: String },
    /// High/low (or an unusable adjusted close) were coerced.
    BarCoerced { ts: ExchangeDateTime },
    /// Every bar before `effective` was multiplied by `factor`.
    SplitRescaled { effective: Date, factor: f64, bars: usize },
    /// An isolated spike was removed.
    SpikeDropped { ts: ExchangeDateTime, deviation: f64 },
}

/// Repaired series plus what was done to it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub bars: Vec<PriceBar>,
    pub corrections: Vec<Correction>,
    pub warnings: Vec<RepairWarning>,
}

impl RepairOutcome {
    /// True when at least one anomaly could not be explained.
    pub fn is_ambiguous(&self) -> bool {
        self.warnings
            .iter()
            .any(|warning| warning.kind == WarningKind::DataIntegrityAmbiguous)
    }

    pub fn warnings_of(&self, kind: WarningKind) -> impl Iterator<Item = &RepairWarning> + '_ {
        self.warnings
            .iter()
            .filter(move |warning| warning.kind == kind)
    }
}

/// Accumulates corrections and warnings while the passes run.
#[derive(Debug, Default)]
pub(crate) struct Report {
    pub(crate) corrections: Vec<Correction>,
    /// Warnings tied to applied changes; kept regardless of later passes.
    pub(crate) warnings: Vec<RepairWarning>,
}

impl Report {
    pub(crate) fn correct(&mut self, correction: Correction) {
        self.corrections.push(correction);
    }

    pub(crate) fn warn(&mut self, warning: RepairWarning) {
        self.warnings.push(warning);
    }
}

/// Repair `raw_bars` against `actions`. Never fails.
pub fn repair(
    raw_bars: Vec<PriceBar>,
    actions: &[CorporateAction],
    config: &RepairConfig,
) -> RepairOutcome {
    let mut report = Report::default();
    let mut bars = sanitize::sanitize(raw_bars, &mut report);
    let actions = distinct(actions);
    let splits = boundary::declared_splits(&actions);

    // Every pass applies at most one change. Between two drops each split
    // boundary is rescaled at most once, and there are fewer drops than
    // bars, so the loop reaches a fixed point within this bound.
    let max_passes = (bars.len() + 1) * (splits.len() + 1) + 1;
    let mut pass_warnings = Vec::new();
    for _ in 0..max_passes {
        pass_warnings.clear();
        let changed = splits::reconcile(&mut bars, &splits, config, &mut report, &mut pass_warnings)
            || jumps::scan(
                &mut bars,
                &splits,
                !actions.is_empty(),
                config,
                &mut report,
                &mut pass_warnings,
            );
        if !changed {
            break;
        }
    }
    report.warnings.append(&mut pass_warnings);

    if !actions.is_empty() {
        adjust::recompute_adj_close(&mut bars, &actions, &mut report);
    }

    let outcome = RepairOutcome {
        bars,
        corrections: report.corrections,
        warnings: report.warnings,
    };
    log_outcome(&outcome);
    outcome
}

/// Providers occasionally repeat an event; apply each distinct one once.
fn distinct(actions: &[CorporateAction]) -> Vec<CorporateAction> {
    let mut unique: Vec<CorporateAction> = Vec::with_capacity(actions.len());
    for action in actions {
        if !unique.contains(action) {
            unique.push(*action);
        }
    }
    unique
}

fn log_outcome(outcome: &RepairOutcome) {
    if outcome.is_ambiguous() {
        warn!(
            bars = outcome.bars.len(),
            corrections = outcome.corrections.len(),
            warnings = outcome.warnings.len(),
            "price series has unexplained anomalies"
        );
    } else if !outcome.corrections.is_empty() {
        info!(
            bars = outcome.bars.len(),
            corrections = outcome.corrections.len(),
            "price series repaired"
        );
    }
}

#[cfg(test)]
mod tests {
    use time::macros::{date, offset};
    use time::Duration;

    use super::*;

    pub(crate) fn day(n: i64) -> Date {
        date!(2024 - 01 - 01) + Duration::days(n)
    }

    pub(crate) fn bar(n: i64, close: f64) -> PriceBar {
        bar_with_volume(n, close, 1_000)
    }

    pub(crate) fn bar_with_volume(n: i64, close: f64, volume: u64) -> PriceBar {
        PriceBar {
            ts: ExchangeDateTime::at_midnight(day(n), offset!(-5)),
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            adj_close: close,
            volume,
        }
    }

    fn closes(outcome: &RepairOutcome) -> Vec<f64> {
        outcome.bars.iter().map(|bar| bar.close).collect()
    }

    #[test]
    fn empty_series_is_untouched() {
        let outcome = repair(Vec::new(), &[], &RepairConfig::default());
        assert_eq!(outcome, RepairOutcome::default());
    }

    #[test]
    fn consistent_split_boundary_is_left_alone() {
        let bars = vec![bar(8, 101.0), bar(9, 100.0), bar(10, 50.0), bar(11, 50.5)];
        let split = CorporateAction::split(day(10), 2, 1).expect("split");

        let outcome = repair(bars, &[split], &RepairConfig::default());

        assert_eq!(closes(&outcome), vec![101.0, 100.0, 50.0, 50.5]);
        assert!(outcome.corrections.is_empty());
        assert!(!outcome.is_ambiguous());
        // Adjusted close puts pre-split bars on the post-split basis.
        assert_eq!(outcome.bars[1].adj_close, 50.0);
        assert_eq!(outcome.bars[2].adj_close, 50.0);
    }

    #[test]
    fn pre_adjusted_segment_is_rescaled_to_raw_basis() {
        let bars = vec![bar(8, 50.5), bar(9, 50.0), bar(10, 50.0), bar(11, 51.0)];
        let split = CorporateAction::split(day(10), 2, 1).expect("split");

        let outcome = repair(bars, &[split], &RepairConfig::default());

        assert_eq!(closes(&outcome), vec![101.0, 100.0, 50.0, 51.0]);
        assert!(matches!(
            outcome.corrections.as_slice(),
            [Correction::SplitRescaled { bars: 2, .. }]
        ));
        assert_eq!(outcome.bars[0].volume, 1_000);
        assert_eq!(outcome.bars[0].adj_close, 50.5);
    }

    #[test]
    fn sanitize_sorts_dedupes_and_coerces() {
        let mut inverted = bar(3, 10.0);
        inverted.high = 9.0;
        inverted.low = 11.0;
        let mut broken = bar(4, 10.0);
        broken.close = f64::NAN;
        let bars = vec![bar(2, 10.0), bar(1, 10.0), bar(2, 99.0), inverted, broken];

        let outcome = repair(bars, &[], &RepairConfig::default());

        assert_eq!(outcome.bars.len(), 3);
        assert_eq!(outcome.bars[1].close, 10.0);
        assert_eq!(outcome.bars[2].high, 11.0);
        assert_eq!(outcome.bars[2].low, 9.0);
        assert!(outcome.corrections.contains(&Correction::Reordered));
        assert_eq!(outcome.warnings_of(WarningKind::InvalidBar).count(), 1);
        for bar in &outcome.bars {
            bar.validate().expect("sanitized bar");
        }
    }

    #[test]
    fn without_actions_adjusted_close_is_kept() {
        let mut first = bar(1, 10.0);
        first.adj_close = 9.5;
        let outcome = repair(vec![first, bar(2, 10.2)], &[], &RepairConfig::default());
        assert_eq!(outcome.bars[0].adj_close, 9.5);
    }

    #[test]
    fn repairing_twice_is_a_no_op() {
        let mut spike = bar(5, 1_000.0);
        spike.volume = 1_200;
        let bars = vec![
            bar(1, 50.0),
            bar(2, 51.0),
            bar(3, 50.0),
            bar(4, 52.0),
            spike,
            bar(6, 51.0),
            bar(7, 25.5),
            bar(8, 25.0),
        ];
        let actions = [
            CorporateAction::split(day(7), 2, 1).expect("split"),
            CorporateAction::dividend(day(3), 0.5).expect("dividend"),
        ];
        let config = RepairConfig::default();

        let once = repair(bars, &actions, &config);
        let twice = repair(once.bars.clone(), &actions, &config);

        assert_eq!(once.bars.len(), 7);
        assert_eq!(once.bars, twice.bars);
        assert!(twice.corrections.is_empty());
    }
}
