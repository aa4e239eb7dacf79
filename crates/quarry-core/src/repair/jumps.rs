use tracing::debug;

use super::boundary::{deviation, is_split_boundary, locate, spike_deviation, DeclaredSplit};
use super::{Correction, RepairConfig, RepairWarning, Report, WarningKind};
use crate::PriceBar;

/// Report close-to-close jumps no declared split explains.
///
/// With `may_drop`, an isolated spike behind a jump is removed and the
/// function returns true so the pass restarts. Otherwise jumps are only
/// reported.
pub(super) fn scan(
    bars: &mut Vec<PriceBar>,
    splits: &[DeclaredSplit],
    may_drop: bool,
    config: &RepairConfig,
    report: &mut Report,
    pass_warnings: &mut Vec<RepairWarning>,
) -> bool {
    let boundaries = locate(bars, splits);
    for at in 1..bars.len() {
        if is_split_boundary(&boundaries, at) {
            continue;
        }
        let jump = deviation(bars[at].close, bars[at - 1].close);
        if jump < config.jump_ratio {
            continue;
        }

        if may_drop {
            if let Some(spike) = spike_deviation(bars, &boundaries, at, config.outlier_ratio) {
                let removed = bars.remove(at);
                debug!(ts = %removed.ts, deviation = spike, "dropped isolated spike");
                report.correct(Correction::SpikeDropped {
                    ts: removed.ts,
                    deviation: spike,
                });
                report.warn(RepairWarning::new(
                    WarningKind::DataIntegrityAmbiguous,
                    Some(removed.ts.date()),
                    format!(
                        "dropped bar at {}: close {} is {spike:.1}x off both neighbours",
                        removed.ts, removed.close
                    ),
                ));
                return true;
            }
        }

        pass_warnings.push(RepairWarning::new(
            WarningKind::DataIntegrityAmbiguous,
            Some(bars[at].ts.date()),
            format!(
                "close moved {jump:.2}x from {} to {} at {} with no declared split",
                bars[at - 1].close,
                bars[at].close,
                bars[at].ts
            ),
        ));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::super::tests::{bar, day};
    use super::*;

    fn run(bars: &mut Vec<PriceBar>, may_drop: bool) -> (bool, Report, Vec<RepairWarning>) {
        let mut report = Report::default();
        let mut pass_warnings = Vec::new();
        let changed = scan(
            bars,
            &[],
            may_drop,
            &RepairConfig::default(),
            &mut report,
            &mut pass_warnings,
        );
        (changed, report, pass_warnings)
    }

    #[test]
    fn persistent_jump_is_reported_at_the_later_bar() {
        let mut bars = vec![bar(9, 100.0), bar(10, 50.0), bar(11, 50.5)];

        let (changed, _, warnings) = run(&mut bars, true);

        assert!(!changed);
        assert_eq!(bars.len(), 3);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].date, Some(day(10)));
    }

    #[test]
    fn isolated_spike_is_dropped_only_when_allowed() {
        let mut bars = vec![bar(1, 20.0), bar(2, 400.0), bar(3, 20.5)];
        let (changed, _, warnings) = run(&mut bars, false);
        assert!(!changed);
        assert_eq!(warnings.len(), 2);

        let (changed, report, _) = run(&mut bars, true);
        assert!(changed);
        assert_eq!(bars.len(), 2);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn small_moves_are_ignored() {
        let mut bars = vec![bar(1, 20.0), bar(2, 35.0), bar(3, 20.0)];
        let (changed, report, warnings) = run(&mut bars, true);
        assert!(!changed);
        assert!(report.corrections.is_empty());
        assert!(warnings.is_empty());
    }
}
