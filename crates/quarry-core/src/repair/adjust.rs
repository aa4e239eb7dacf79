use super::{RepairWarning, Report, WarningKind};
use crate::{CorporateAction, PriceBar};

/// Recompute adjusted close by walking backward from the latest bar.
///
/// Actions dated in `(date[k-1], date[k]]` adjust every bar before `k`: a
/// dividend by `1 - amount / close[k-1]`, a split by `1 / factor`. A
/// dividend at least as large as the close it would adjust is skipped with
/// an `IgnoredAction` warning.
pub(super) fn recompute_adj_close(bars: &mut [PriceBar], actions: &[CorporateAction], report: &mut Report) {
    let Some(last) = bars.last_mut() else {
        return;
    };
    last.adj_close = last.close;

    let mut factor = 1.0;
    for at in (1..bars.len()).rev() {
        let from = bars[at - 1].ts.date();
        let to = bars[at].ts.date();
        let previous_close = bars[at - 1].close;

        for action in actions.iter().filter(|action| action.date() > from && action.date() <= to) {
            match *action {
                CorporateAction::Dividend { ex_date, amount } => {
                    if amount.is_finite() && amount > 0.0 && amount < previous_close {
                        factor *= 1.0 - amount / previous_close;
                    } else {
                        report.warn(RepairWarning::new(
                            WarningKind::IgnoredAction,
                            Some(ex_date),
                            format!(
                                "dividend of {amount} on {ex_date} ignored against prior close {previous_close}"
                            ),
                        ));
                    }
                }
                CorporateAction::Split { ratio, .. } => factor /= ratio.factor(),
            }
        }

        bars[at - 1].adj_close = previous_close * factor;
    }
}
