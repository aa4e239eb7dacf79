use super::{Correction, RepairWarning, Report, WarningKind};
use crate::domain::validate_positive;
use crate::PriceBar;

/// Sort, drop unusable and duplicate bars, and coerce high/low to bound
/// open and close.
pub(super) fn sanitize(mut bars: Vec<PriceBar>, report: &mut Report) -> Vec<PriceBar> {
    if bars.windows(2).any(|pair| pair[0].ts > pair[1].ts) {
        bars.sort_by(|a, b| a.ts.cmp(&b.ts));
        report.correct(Correction::Reordered);
    }

    let mut clean: Vec<PriceBar> = Vec::with_capacity(bars.len());
    for mut bar in bars {
        if let Err(error) = check_prices(&bar) {
            report.warn(RepairWarning::new(
                WarningKind::InvalidBar,
                Some(bar.ts.date()),
                format!("removed bar at {}: {error}", bar.ts),
            ));
            report.correct(Correction::BarRejected {
                ts: bar.ts,
                reason: error.to_string(),
            });
            continue;
        }

        if clean.last().is_some_and(|previous| previous.ts == bar.ts) {
            report.correct(Correction::DuplicateRemoved { ts: bar.ts });
            continue;
        }

        if coerce(&mut bar) {
            report.correct(Correction::BarCoerced { ts: bar.ts });
        }
        clean.push(bar);
    }
    clean
}

fn check_prices(bar: &PriceBar) -> Result<(), crate::ValidationError> {
    validate_positive("open", bar.open)?;
    validate_positive("high", bar.high)?;
    validate_positive("low", bar.low)?;
    validate_positive("close", bar.close)
}

/// Returns true when anything changed.
fn coerce(bar: &mut PriceBar) -> bool {
    let high = bar.open.max(bar.high).max(bar.low).max(bar.close);
    let low = bar.open.min(bar.high).min(bar.low).min(bar.close);
    let adj_close_usable = bar.adj_close.is_finite() && bar.adj_close > 0.0;

    if high == bar.high && low == bar.low && adj_close_usable {
        return false;
    }
    bar.high = high;
    bar.low = low;
    if !adj_close_usable {
        bar.adj_close = bar.close;
    }
    true
}
