use tracing::{debug, info};

use super::boundary::{locate, spike_deviation, DeclaredSplit};
use super::{Correction, RepairConfig, RepairWarning, Report, WarningKind};
use crate::PriceBar;

/// Check each split boundary, latest first, and apply at most one change.
///
/// Returns true when the series changed and the pass must restart.
pub(super) fn reconcile(
    bars: &mut Vec<PriceBar>,
    splits: &[DeclaredSplit],
    config: &RepairConfig,
    report: &mut Report,
    pass_warnings: &mut Vec<RepairWarning>,
) -> bool {
    let boundaries = locate(bars, splits);
    for boundary in &boundaries {
        let after = boundary.index;
        let before = after - 1;
        let observed = bars[before].close / bars[after].close;

        if within(observed / boundary.factor, config.split_tolerance) {
            continue;
        }

        if within(observed, config.split_tolerance) {
            for bar in &mut bars[..after] {
                bar.scale_prices(boundary.factor);
            }
            info!(
                effective = %boundary.effective,
                factor = boundary.factor,
                bars = after,
                "rescaled pre-split segment to raw basis"
            );
            report.correct(Correction::SplitRescaled {
                effective: boundary.effective,
                factor: boundary.factor,
                bars: after,
            });
            return true;
        }

        // Neither basis fits. Remove a boundary bar only if it is an
        // isolated spike; the earlier bar wins ties.
        let spike = [before, after]
            .into_iter()
            .filter_map(|at| {
                spike_deviation(bars, &boundaries, at, config.outlier_ratio).map(|d| (at, d))
            })
            .fold(None, |best: Option<(usize, f64)>, candidate| match best {
                Some((_, best_deviation)) if best_deviation >= candidate.1 => best,
                _ => Some(candidate),
            });

        match spike {
            Some((at, deviation)) => {
                let removed = bars.remove(at);
                debug!(ts = %removed.ts, deviation, "dropped spike at split boundary");
                report.correct(Correction::SpikeDropped {
                    ts: removed.ts,
                    deviation,
                });
                report.warn(RepairWarning::new(
                    WarningKind::DataIntegrityAmbiguous,
                    Some(removed.ts.date()),
                    format!(
                        "dropped bar at {} next to split effective {}: close {} is {deviation:.1}x off its neighbours",
                        removed.ts, boundary.effective, removed.close
                    ),
                ));
                return true;
            }
            None => pass_warnings.push(RepairWarning::new(
                WarningKind::DataIntegrityAmbiguous,
                Some(boundary.effective),
                format!(
                    "split effective {} declares ratio {} but closes moved {observed:.4}x across it",
                    boundary.effective, boundary.factor
                ),
            )),
        }
    }
    false
}

fn within(ratio: f64, tolerance: f64) -> bool {
    (ratio - 1.0).abs() <= tolerance
}
