//! # Price History Service
//!
//! Inbound interface of the pipeline: one call turns a symbol, span and
//! interval into a repaired series.
//!
//! ```text
//! HistoryRequest -> chart descriptor -> FetchClient (cache, credential,
//!   rate limit, retry, decode_chart) -> trim to span -> repair -> PriceHistory
//! ```
//!
//! Data problems the repair engine cannot explain come back as warnings on
//! the [`PriceHistory`], never as errors.

use std::sync::Arc;

use time::{Date, OffsetDateTime};
use tracing::{debug, warn};

use quarry_warehouse::ResponseStore;

use crate::cache::{CacheMode, CacheStore, CacheTtls, EndpointClass};
use crate::cancel::Cancellation;
use crate::chart::{chart_descriptor, chart_path, decode_chart};
use crate::config::PipelineConfig;
use crate::credential::{CredentialConfig, CredentialManager};
use crate::fetch::FetchClient;
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::rate_limiter::RateLimiter;
use crate::repair::{repair, Correction, RepairConfig, RepairWarning, WarningKind};
use crate::{
    CorporateAction, FetchError, HistorySpan, Interval, PriceBar, RequestDescriptor, SplitRatio,
    Symbol,
};

/// What to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryRequest {
    pub symbol: Symbol,
    pub span: HistorySpan,
    pub interval: Interval,
}

impl HistoryRequest {
    pub fn new(symbol: Symbol, span: HistorySpan, interval: Interval) -> Self {
        Self {
            symbol,
            span,
            interval,
        }
    }

    pub fn descriptor(&self) -> RequestDescriptor {
        chart_descriptor(&self.symbol, self.span, self.interval)
    }

    /// Reject spans the provider will not serve at this interval.
    pub fn check_lookback(&self, today: Date) -> Result<(), FetchError> {
        let Some(limit) = self.interval.max_lookback() else {
            return Ok(());
        };
        match self.span.lookback_from(today) {
            Some(lookback) if lookback <= limit => Ok(()),
            _ => Err(FetchError::invalid_request(format!(
                "interval {} only covers the last {} days",
                self.interval,
                limit.whole_days()
            ))),
        }
    }
}

/// Repaired series for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceHistory {
    pub symbol: Symbol,
    pub interval: Interval,
    pub currency: Option<String>,
    pub exchange_timezone: Option<String>,
    pub bars: Vec<PriceBar>,
    /// Declared actions, by date.
    pub actions: Vec<CorporateAction>,
    pub corrections: Vec<Correction>,
    pub warnings: Vec<RepairWarning>,
    /// Payload rows or events that could not be decoded.
    pub skipped: usize,
}

impl PriceHistory {
    pub fn actions(&self) -> &[CorporateAction] {
        &self.actions
    }

    /// `(ex_date, amount)` per dividend.
    pub fn dividends(&self) -> impl Iterator<Item = (Date, f64)> + '_ {
        self.actions.iter().filter_map(|action| match *action {
            CorporateAction::Dividend { ex_date, amount } => Some((ex_date, amount)),
            CorporateAction::Split { .. } => None,
        })
    }

    /// `(effective, ratio)` per split.
    pub fn splits(&self) -> impl Iterator<Item = (Date, SplitRatio)> + '_ {
        self.actions.iter().filter_map(|action| match *action {
            CorporateAction::Split { effective, ratio } => Some((effective, ratio)),
            CorporateAction::Dividend { .. } => None,
        })
    }

    /// True when the series carries anomalies the declared actions do not
    /// explain.
    pub fn is_ambiguous(&self) -> bool {
        self.warnings
            .iter()
            .any(|warning| warning.kind == WarningKind::DataIntegrityAmbiguous)
    }
}

/// Cheap to clone; clones share the cache, limiter and credential.
#[derive(Debug, Clone)]
pub struct PriceHistoryService {
    fetch: FetchClient,
    ttls: CacheTtls,
    repair: RepairConfig,
}

impl PriceHistoryService {
    pub fn new(fetch: FetchClient, ttls: CacheTtls, repair: RepairConfig) -> Self {
        Self {
            fetch,
            ttls,
            repair,
        }
    }

    /// Assemble a pipeline around `http` and `cache`.
    pub fn from_config(config: &PipelineConfig, http: Arc<dyn HttpClient>, cache: CacheStore) -> Self {
        let limiter = RateLimiter::new(config.rate_limit);
        let credentials = CredentialManager::new(
            Arc::clone(&http),
            limiter.clone(),
            CredentialConfig {
                request_timeout: config.request_timeout,
                ..config.credential.clone()
            },
        );
        let fetch = FetchClient::new(http, limiter, Arc::new(credentials), cache, config.retry)
            .with_default_ttl(config.cache.daily_chart)
            .with_request_timeout(config.request_timeout);
        Self::new(fetch, config.cache, config.repair)
    }

    /// Production pipeline: reqwest transport, plus the durable cache when
    /// `quarry_home` is set. A durable store that fails to open is logged
    /// and the cache stays in memory.
    pub fn open(config: &PipelineConfig) -> Self {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new(&config.user_agent));
        let cache = match config.warehouse().map(ResponseStore::open) {
            Some(Ok(store)) => CacheStore::with_durable(store),
            Some(Err(error)) => {
                warn!(%error, "durable cache unavailable, caching in memory only");
                CacheStore::new()
            }
            None => CacheStore::new(),
        };
        Self::from_config(config, http, cache)
    }

    pub fn fetch_client(&self) -> &FetchClient {
        &self.fetch
    }

    pub async fn get_price_history(
        &self,
        request: &HistoryRequest,
        cancel: &Cancellation,
    ) -> Result<PriceHistory, FetchError> {
        self.get_price_history_with_mode(request, CacheMode::Use, cancel)
            .await
    }

    pub async fn get_price_history_with_mode(
        &self,
        request: &HistoryRequest,
        mode: CacheMode,
        cancel: &Cancellation,
    ) -> Result<PriceHistory, FetchError> {
        request.check_lookback(OffsetDateTime::now_utc().date())?;

        let descriptor = request.descriptor();
        let ttl = self.ttls.ttl_for(EndpointClass::chart(request.interval));
        let mut chart = self
            .fetch
            .fetch_decoded(&descriptor, ttl, mode, cancel, decode_chart)
            .await?;

        let span = request.span;
        chart.bars.retain(|bar| span.contains(bar.ts.date()));
        chart.actions.retain(|action| span.contains(action.date()));

        let outcome = repair(chart.bars, &chart.actions, &self.repair);
        debug!(
            symbol = %request.symbol,
            interval = %request.interval,
            bars = outcome.bars.len(),
            corrections = outcome.corrections.len(),
            warnings = outcome.warnings.len(),
            "price history ready"
        );

        Ok(PriceHistory {
            symbol: request.symbol.clone(),
            interval: request.interval,
            currency: chart.currency,
            exchange_timezone: chart.exchange_timezone,
            bars: outcome.bars,
            actions: chart.actions,
            corrections: outcome.corrections,
            warnings: outcome.warnings,
            skipped: chart.skipped_rows + chart.skipped_events,
        })
    }

    /// Fetch several symbols concurrently. Results keep the input order and
    /// fail independently.
    pub async fn get_price_history_many(
        &self,
        symbols: &[Symbol],
        span: HistorySpan,
        interval: Interval,
        cancel: &Cancellation,
    ) -> Vec<(Symbol, Result<PriceHistory, FetchError>)> {
        let handles: Vec<_> = symbols
            .iter()
            .map(|symbol| {
                let service = self.clone();
                let cancel = cancel.clone();
                let request = HistoryRequest::new(symbol.clone(), span, interval);
                tokio::spawn(async move { service.get_price_history(&request, &cancel).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (symbol, handle) in symbols.iter().zip(handles) {
            let result = match handle.await {
                Ok(result) => result,
                Err(error) if error.is_cancelled() => Err(FetchError::cancelled(0)),
                Err(error) => Err(FetchError::network(format!("history task failed: {error}"), 0)),
            };
            results.push((symbol.clone(), result));
        }
        results
    }

    /// Drop cached chart responses for `symbol`, or every cached response.
    /// Returns how many memory entries were removed.
    pub async fn invalidate_cache(&self, symbol: Option<&Symbol>) -> usize {
        let cache = self.fetch.cache();
        match symbol {
            Some(symbol) => cache.invalidate_path(&chart_path(symbol)).await,
            None => {
                let removed = cache.len().await;
                cache.clear().await;
                removed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use time::macros::date;

    use super::*;
    use crate::http_client::{HttpResponse, ScriptedHttpClient};
    use crate::rate_limiter::RateLimitConfig;
    use crate::retry::RetryConfig;
    use crate::{FetchErrorKind, Period};

    const WARMUP: &str = "https://fc.yahoo.com";
    const CRUMB: &str = "https://query1.finance.yahoo.com/v1/test/getcrumb";
    const AAPL: &str = "https://query2.finance.yahoo.com/v8/finance/chart/AAPL?";
    const MSFT: &str = "https://query2.finance.yahoo.com/v8/finance/chart/MSFT?";

    // Daily closes 100, 100, 50, 51 with a 2:1 split declared on the third day.
    const SPLIT_PAYLOAD: &str = r#"{"chart":{"result":[{
        "meta":{"currency":"USD","exchangeTimezoneName":"America/New_York","gmtoffset":-18000},
        "timestamp":[1717680600,1717767000,1717853400,1718026200],
        "events":{"splits":{"1717853400":{"date":1717853400,"numerator":2,"denominator":1}}},
        "indicators":{
          "quote":[{"open":[100,100,50,51],"high":[101,101,51,52],"low":[99,99,49,50],"close":[100,100,50,51],"volume":[10,10,20,20]}],
          "adjclose":[{"adjclose":[50,50,50,51]}]
        }
      }],"error":null}}"#;

    fn scripted() -> ScriptedHttpClient {
        let http = ScriptedHttpClient::new();
        http.always(
            WARMUP,
            Ok(HttpResponse::new(404, "").with_header("set-cookie", "A3=d=session; Path=/")),
        )
        .always(CRUMB, Ok(HttpResponse::new(200, "crumb-1")));
        http
    }

    fn service(http: &ScriptedHttpClient) -> PriceHistoryService {
        let config = PipelineConfig {
            rate_limit: RateLimitConfig {
                quota_window: Duration::from_secs(1),
                quota_limit: 1_000,
                burst: 100,
            },
            retry: RetryConfig::fixed(Duration::from_millis(5), 2),
            ..PipelineConfig::default()
        };
        PriceHistoryService::from_config(&config, Arc::new(http.clone()), CacheStore::new())
    }

    fn daily(symbol: &str) -> HistoryRequest {
        HistoryRequest::new(
            Symbol::parse(symbol).expect("symbol"),
            HistorySpan::Period(Period::OneMonth),
            Interval::OneDay,
        )
    }

    #[tokio::test]
    async fn returns_repaired_series_with_actions() {
        let http = scripted();
        http.always(AAPL, Ok(HttpResponse::ok_json(SPLIT_PAYLOAD)));
        let history = service(&http)
            .get_price_history(&daily("AAPL"), &Cancellation::new())
            .await
            .expect("history");

        assert_eq!(history.bars.len(), 4);
        assert_eq!(history.currency.as_deref(), Some("USD"));
        assert_eq!(history.splits().count(), 1);
        assert_eq!(history.dividends().count(), 0);
        assert!(!history.is_ambiguous());
        assert_eq!(history.bars[0].adj_close, 50.0);
        assert_eq!(history.bars[0].ts.date(), date!(2024 - 06 - 06));
    }

    #[tokio::test]
    async fn undecodable_chart_body_is_not_cached() {
        let http = scripted();
        http.push(AAPL, Ok(HttpResponse::ok_json(r#"{"finance":{"result":null}}"#)))
            .always(AAPL, Ok(HttpResponse::ok_json(SPLIT_PAYLOAD)));
        let service = service(&http);
        let cancel = Cancellation::new();

        let error = service
            .get_price_history(&daily("AAPL"), &cancel)
            .await
            .expect_err("must fail");
        assert_eq!(error.kind(), FetchErrorKind::MalformedResponse);
        assert!(service.fetch_client().cache().is_empty().await);

        let history = service
            .get_price_history(&daily("AAPL"), &cancel)
            .await
            .expect("history");
        assert_eq!(history.bars.len(), 4);
        assert_eq!(http.request_count(AAPL), 2);
        assert_eq!(service.fetch_client().cache().len().await, 1);
    }

    #[tokio::test]
    async fn provider_error_body_is_not_cached() {
        let http = scripted();
        http.push(
            AAPL,
            Ok(HttpResponse::ok_json(
                r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#,
            )),
        )
        .always(AAPL, Ok(HttpResponse::ok_json(SPLIT_PAYLOAD)));
        let service = service(&http);
        let cancel = Cancellation::new();

        assert!(service.get_price_history(&daily("AAPL"), &cancel).await.is_err());
        assert!(service.get_price_history(&daily("AAPL"), &cancel).await.is_ok());
        assert_eq!(http.request_count(AAPL), 2);
    }

    #[tokio::test]
    async fn date_span_is_trimmed_to_exchange_local_dates() {
        // Sydney (UTC+11) daily bars at 10:00 local on Jan 4, 5 and 8, which
        // fall on the previous UTC day.
        const SYDNEY: &str = r#"{"chart":{"result":[{
            "meta":{"currency":"AUD","exchangeTimezoneName":"Australia/Sydney","gmtoffset":39600},
            "timestamp":[1704322800,1704409200,1704668400],
            "indicators":{
              "quote":[{"open":[10,11,12],"high":[10.5,11.5,12.5],"low":[9.5,10.5,11.5],"close":[10,11,12],"volume":[5,5,5]}],
              "adjclose":[{"adjclose":[10,11,12]}]
            }
          }],"error":null}}"#;
        const BHP: &str = "https://query2.finance.yahoo.com/v8/finance/chart/BHP?";

        let http = scripted();
        http.always(BHP, Ok(HttpResponse::ok_json(SYDNEY)));
        let request = HistoryRequest::new(
            Symbol::parse("BHP").expect("symbol"),
            HistorySpan::between(date!(2024 - 01 - 05), date!(2024 - 01 - 08)).expect("span"),
            Interval::OneDay,
        );

        let history = service(&http)
            .get_price_history(&request, &Cancellation::new())
            .await
            .expect("history");

        let dates: Vec<Date> = history.bars.iter().map(|bar| bar.ts.date()).collect();
        assert_eq!(dates, vec![date!(2024 - 01 - 05)]);

        let sent = http
            .requests()
            .into_iter()
            .find(|request| request.url.starts_with(BHP))
            .expect("chart request");
        assert!(sent.url.contains("period1=1704326400"), "url {}", sent.url);
    }

    #[tokio::test]
    async fn intraday_lookback_is_checked_before_any_request() {
        let http = scripted();
        let request = HistoryRequest::new(
            Symbol::parse("AAPL").expect("symbol"),
            HistorySpan::Period(Period::OneYear),
            Interval::OneMinute,
        );

        let error = service(&http)
            .get_price_history(&request, &Cancellation::new())
            .await
            .expect_err("must fail");

        assert_eq!(error.kind(), FetchErrorKind::InvalidRequest);
        assert!(http.requests().is_empty());
    }

    #[test]
    fn lookback_limits_follow_interval() {
        let today = date!(2024 - 06 - 30);
        let symbol = Symbol::parse("AAPL").expect("symbol");
        let recent = HistorySpan::between(date!(2024 - 06 - 10), date!(2024 - 06 - 20)).expect("span");
        let old = HistorySpan::between(date!(2024 - 01 - 02), date!(2024 - 01 - 10)).expect("span");

        assert!(HistoryRequest::new(symbol.clone(), recent, Interval::OneMinute)
            .check_lookback(today)
            .is_ok());
        assert!(HistoryRequest::new(symbol.clone(), old, Interval::OneMinute)
            .check_lookback(today)
            .is_err());
        assert!(HistoryRequest::new(symbol.clone(), old, Interval::OneHour)
            .check_lookback(today)
            .is_ok());
        assert!(HistoryRequest::new(symbol, HistorySpan::Period(Period::Max), Interval::FiveMinutes)
            .check_lookback(today)
            .is_err());
    }

    #[tokio::test]
    async fn invalidating_one_symbol_keeps_the_others() {
        let http = scripted();
        http.always(AAPL, Ok(HttpResponse::ok_json(SPLIT_PAYLOAD)))
            .always(MSFT, Ok(HttpResponse::ok_json(SPLIT_PAYLOAD)));
        let service = service(&http);
        let cancel = Cancellation::new();

        service.get_price_history(&daily("AAPL"), &cancel).await.expect("aapl");
        service.get_price_history(&daily("MSFT"), &cancel).await.expect("msft");

        let aapl = Symbol::parse("AAPL").expect("symbol");
        assert_eq!(service.invalidate_cache(Some(&aapl)).await, 1);

        service.get_price_history(&daily("AAPL"), &cancel).await.expect("aapl");
        service.get_price_history(&daily("MSFT"), &cancel).await.expect("msft");
        assert_eq!(http.request_count(AAPL), 2);
        assert_eq!(http.request_count(MSFT), 1);

        assert_eq!(service.invalidate_cache(None).await, 2);
    }

    #[tokio::test]
    async fn many_symbols_fail_independently() {
        let http = scripted();
        http.always(AAPL, Ok(HttpResponse::ok_json(SPLIT_PAYLOAD)))
            .always(
                MSFT,
                Ok(HttpResponse::ok_json(
                    r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#,
                )),
            );
        let symbols = [
            Symbol::parse("AAPL").expect("symbol"),
            Symbol::parse("MSFT").expect("symbol"),
        ];

        let results = service(&http)
            .get_price_history_many(
                &symbols,
                HistorySpan::Period(Period::OneMonth),
                Interval::OneDay,
                &Cancellation::new(),
            )
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.as_str(), "AAPL");
        assert!(results[0].1.is_ok());
        let error = results[1].1.as_ref().expect_err("msft fails");
        assert_eq!(error.kind(), FetchErrorKind::InvalidRequest);
    }
}
