//! Chart endpoint request building and payload decoding.

use std::collections::BTreeMap;

use serde::Deserialize;
use time::{Date, UtcOffset};
use tracing::warn;

use crate::{
    CorporateAction, ExchangeDateTime, FetchError, HistorySpan, Interval, PriceBar,
    RequestDescriptor, SplitRatio, Symbol,
};

pub const CHART_HOST: &str = "query2.finance.yahoo.com";

const SECONDS_PER_DAY: i64 = 86_400;

/// Descriptor for `GET /v8/finance/chart/{symbol}` with dividends and splits.
pub fn chart_descriptor(symbol: &Symbol, span: HistorySpan, interval: Interval) -> RequestDescriptor {
    let mut params: Vec<(&str, String)> = vec![
        ("interval", interval.as_str().to_owned()),
        ("events", String::from("div,splits")),
        ("includePrePost", String::from("false")),
    ];

    match span {
        HistorySpan::Period(period) => params.push(("range", period.as_str().to_owned())),
        // One spare day each side: exchanges away from UTC open their day
        // before or after UTC midnight. Bars are trimmed to local dates later.
        HistorySpan::Between { start, end } => {
            params.push(("period1", (utc_midnight(start) - SECONDS_PER_DAY).to_string()));
            params.push(("period2", (utc_midnight(end) + SECONDS_PER_DAY).to_string()));
        }
    }

    RequestDescriptor::get(CHART_HOST, chart_path(symbol), params)
}

/// Path shared by every chart request for `symbol`.
pub fn chart_path(symbol: &Symbol) -> String {
    format!("/v8/finance/chart/{}", urlencoding::encode(symbol.as_str()))
}

fn utc_midnight(date: Date) -> i64 {
    date.midnight().assume_offset(UtcOffset::UTC).unix_timestamp()
}

/// Raw series and declared actions decoded from one chart payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartData {
    pub currency: Option<String>,
    pub exchange_timezone: Option<String>,
    pub gmtoffset: i64,
    /// Bars in payload order; not yet sanitized.
    pub bars: Vec<PriceBar>,
    /// Actions sorted by date.
    pub actions: Vec<CorporateAction>,
    /// Rows dropped because a price was missing or the timestamp was invalid.
    pub skipped_rows: usize,
    /// Events dropped because their values were unusable.
    pub skipped_events: usize,
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    #[serde(default)]
    indicators: ChartIndicators,
    #[serde(default)]
    events: ChartEvents,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    #[serde(default)]
    currency: Option<String>,
    #[serde(rename = "exchangeTimezoneName", default)]
    exchange_timezone: Option<String>,
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Default, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
    #[serde(default)]
    adjclose: Vec<ChartAdjClose>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartAdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartEvents {
    #[serde(default)]
    dividends: BTreeMap<String, DividendEvent>,
    #[serde(default)]
    splits: BTreeMap<String, SplitEvent>,
}

#[derive(Debug, Deserialize)]
struct DividendEvent {
    amount: f64,
    date: i64,
}

#[derive(Debug, Deserialize)]
struct SplitEvent {
    date: i64,
    numerator: f64,
    denominator: f64,
}

/// Decode a chart payload into raw bars and declared actions.
///
/// A body that is not a chart document is a `MalformedResponse`; a
/// `chart.error` or an empty result is an `InvalidRequest`.
pub fn decode_chart(body: &str) -> Result<ChartData, FetchError> {
    let response: ChartResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::malformed(format!("failed to parse chart payload: {e}"), 0))?;

    if let Some(error) = response.chart.error {
        return Err(FetchError::invalid_request(format!(
            "chart API error {}: {}",
            error.code.as_deref().unwrap_or("unknown"),
            error.description.as_deref().unwrap_or("no description")
        )));
    }

    let result = response
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| FetchError::invalid_request("chart payload has no result"))?;

    let gmtoffset = result.meta.gmtoffset;
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let adjclose = result
        .indicators
        .adjclose
        .into_iter()
        .next()
        .unwrap_or_default()
        .adjclose;

    let mut bars = Vec::with_capacity(result.timestamp.len());
    let mut skipped_rows = 0;
    for (i, &seconds) in result.timestamp.iter().enumerate() {
        let prices = (
            value_at(&quote.open, i),
            value_at(&quote.high, i),
            value_at(&quote.low, i),
            value_at(&quote.close, i),
        );
        let (Some(open), Some(high), Some(low), Some(close)) = prices else {
            skipped_rows += 1;
            continue;
        };
        let Ok(ts) = ExchangeDateTime::from_unix(seconds, gmtoffset) else {
            skipped_rows += 1;
            continue;
        };

        bars.push(PriceBar {
            ts,
            open,
            high,
            low,
            close,
            adj_close: value_at(&adjclose, i).unwrap_or(close),
            volume: value_at(&quote.volume, i).map_or(0, volume_from_f64),
        });
    }

    let mut actions = Vec::new();
    let mut skipped_events = 0;
    for event in result.events.dividends.into_values() {
        match event_date(event.date, gmtoffset)
            .and_then(|ex_date| CorporateAction::dividend(ex_date, event.amount).ok())
        {
            Some(action) => actions.push(action),
            None => {
                warn!(date = event.date, amount = event.amount, "skipping unusable dividend event");
                skipped_events += 1;
            }
        }
    }
    for event in result.events.splits.into_values() {
        match event_date(event.date, gmtoffset).zip(split_ratio(event.numerator, event.denominator)) {
            Some((effective, ratio)) => actions.push(CorporateAction::Split { effective, ratio }),
            None => {
                warn!(
                    date = event.date,
                    numerator = event.numerator,
                    denominator = event.denominator,
                    "skipping unusable split event"
                );
                skipped_events += 1;
            }
        }
    }
    actions.sort_by_key(CorporateAction::date);

    Ok(ChartData {
        currency: result.meta.currency,
        exchange_timezone: result.meta.exchange_timezone,
        gmtoffset,
        bars,
        actions,
        skipped_rows,
        skipped_events,
    })
}

fn value_at(values: &[Option<f64>], index: usize) -> Option<f64> {
    values.get(index).copied().flatten()
}

fn volume_from_f64(volume: f64) -> u64 {
    if volume.is_finite() && volume > 0.0 {
        volume.round() as u64
    } else {
        0
    }
}

fn event_date(seconds: i64, gmtoffset: i64) -> Option<Date> {
    ExchangeDateTime::from_unix(seconds, gmtoffset)
        .ok()
        .map(ExchangeDateTime::date)
}

fn split_ratio(numerator: f64, denominator: f64) -> Option<SplitRatio> {
    let whole = |value: f64| {
        (value.is_finite() && value >= 1.0 && value.fract() == 0.0 && value <= f64::from(u32::MAX))
            .then(|| value as u32)
    };
    SplitRatio::new(whole(numerator)?, whole(denominator)?).ok()
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;
    use crate::{FetchErrorKind, Period};

    const PAYLOAD: &str = r#"{
      "chart": {
        "result": [{
          "meta": {"currency": "USD", "symbol": "AAPL", "exchangeTimezoneName": "America/New_York", "gmtoffset": -18000},
          "timestamp": [1717680600, 1717767000, 1717853400, 1718026200],
          "events": {
            "dividends": {"1715347800": {"amount": 0.25, "date": 1715347800}},
            "splits": {"1717767000": {"date": 1717767000, "numerator": 10.0, "denominator": 1.0, "splitRatio": "10:1"}}
          },
          "indicators": {
            "quote": [{
              "open":   [1200.0, 121.0, null, 122.0],
              "high":   [1210.0, 123.0, null, 124.0],
              "low":    [1190.0, 120.0, null, 121.0],
              "close":  [1205.0, 122.0, null, 123.5],
              "volume": [1000000, 9800000, null, 9100000]
            }],
            "adjclose": [{"adjclose": [120.5, 122.0, null, 123.5]}]
          }
        }],
        "error": null
      }
    }"#;

    #[test]
    fn decodes_bars_and_actions() {
        let data = decode_chart(PAYLOAD).expect("chart");

        assert_eq!(data.gmtoffset, -18_000);
        assert_eq!(data.bars.len(), 3);
        assert_eq!(data.skipped_rows, 1);
        assert_eq!(data.bars[0].ts.date(), date!(2024 - 06 - 06));
        assert_eq!(data.bars[0].adj_close, 120.5);
        assert_eq!(data.bars[1].volume, 9_800_000);

        assert_eq!(data.actions.len(), 2);
        assert!(matches!(data.actions[0], CorporateAction::Dividend { amount, .. } if amount == 0.25));
        assert_eq!(
            data.actions[1],
            CorporateAction::split(date!(2024 - 06 - 07), 10, 1).expect("split")
        );
    }

    #[test]
    fn chart_error_is_an_invalid_request() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let error = decode_chart(body).expect_err("must fail");
        assert_eq!(error.kind(), FetchErrorKind::InvalidRequest);
        assert!(error.message().contains("delisted"));
    }

    #[test]
    fn non_chart_json_is_malformed() {
        let error = decode_chart(r#"{"quoteResponse":{}}"#).expect_err("must fail");
        assert_eq!(error.kind(), FetchErrorKind::MalformedResponse);
    }

    #[test]
    fn fractional_split_terms_are_skipped() {
        assert!(split_ratio(1.5, 1.0).is_none());
        assert_eq!(split_ratio(3.0, 2.0).map(SplitRatio::factor), Some(1.5));
    }

    #[test]
    fn descriptor_uses_range_or_unix_bounds() {
        let symbol = Symbol::parse("^gspc").expect("symbol");
        let by_period = chart_descriptor(&symbol, HistorySpan::Period(Period::OneYear), Interval::OneDay);
        assert_eq!(by_period.path(), "/v8/finance/chart/%5EGSPC");
        assert_eq!(by_period.param("range"), Some("1y"));
        assert_eq!(by_period.param("events"), Some("div,splits"));

        let span = HistorySpan::between(date!(2024 - 01 - 01), date!(2024 - 01 - 02)).expect("span");
        let by_dates = chart_descriptor(&symbol, span, Interval::OneDay);
        assert_eq!(by_dates.param("period1"), Some("1703980800"));
        assert_eq!(by_dates.param("period2"), Some("1704240000"));
        assert_eq!(by_dates.param("range"), None);
    }
}
