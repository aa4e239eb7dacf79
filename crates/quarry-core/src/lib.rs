//! # Quarry Core
//!
//! Acquisition, caching and repair of historical OHLCV prices from the
//! Yahoo Finance chart endpoint.
//!
//! ## Overview
//!
//! - **Rate limiting** per remote host with a sustained rate and a burst
//! - **Session credentials** (cookie + crumb) with coalesced refresh
//! - **Response cache** keyed by a canonical request descriptor, with an
//!   optional DuckDB-backed durable tier
//! - **Fetch client** with bounded retry, backoff and a single
//!   authentication replay
//! - **Price repair** reconciling raw bars with declared splits and
//!   dividends, idempotently
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | In-memory response cache with TTLs and durable read-through |
//! | [`cancel`] | Caller-driven cancellation |
//! | [`chart`] | Chart request building and payload decoding |
//! | [`config`] | Pipeline configuration and `QUARRY_*` overrides |
//! | [`credential`] | Cookie + crumb acquisition |
//! | [`descriptor`] | Canonical request identity |
//! | [`domain`] | Symbols, intervals, spans, bars, corporate actions |
//! | [`error`] | Validation, configuration and fetch errors |
//! | [`fetch`] | Cache/credential/limiter/retry orchestration |
//! | [`history`] | `PriceHistoryService`, the inbound interface |
//! | [`http_client`] | HTTP abstraction and a scripted test double |
//! | [`rate_limiter`] | Keyed token bucket |
//! | [`repair`] | Split/dividend reconciliation |
//! | [`retry`] | Attempt budget and backoff |
//! | [`telemetry`] | `tracing` subscriber installation |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quarry_core::{
//!     Cancellation, HistoryRequest, HistorySpan, Interval, Period, PipelineConfig,
//!     PriceHistoryService, Symbol,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     quarry_core::telemetry::init_tracing("info");
//!     let service = PriceHistoryService::open(&PipelineConfig::from_env()?);
//!
//!     let request = HistoryRequest::new(
//!         Symbol::parse("AAPL")?,
//!         HistorySpan::Period(Period::OneYear),
//!         Interval::OneDay,
//!     );
//!     let history = service
//!         .get_price_history(&request, &Cancellation::new())
//!         .await?;
//!
//!     for warning in &history.warnings {
//!         eprintln!("{:?}: {}", warning.kind, warning.message);
//!     }
//!     println!("{} bars", history.bars.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │ PriceHistoryService  │
//! └──────────┬───────────┘
//!            │ RequestDescriptor
//!            ▼
//! ┌──────────────────────┐     ┌──────────────────┐
//! │ FetchClient          │────▶│ CacheStore       │──▶ ResponseStore (DuckDB)
//! │ (AttemptBudget)      │     └──────────────────┘
//! └──────────┬───────────┘
//!            │          ┌──────────────────┐   ┌──────────────────┐
//!            ├─────────▶│ CredentialManager│──▶│ RateLimiter      │
//!            │          └──────────────────┘   └──────────────────┘
//!            ▼
//! ┌──────────────────────┐
//! │ HttpClient           │
//! └──────────┬───────────┘
//!            │ body
//!            ▼
//! ┌──────────────────────┐     ┌──────────────────┐
//! │ decode_chart         │────▶│ repair           │──▶ PriceHistory
//! └──────────────────────┘     └──────────────────┘
//! ```

pub mod cache;
pub mod cancel;
pub mod chart;
pub mod config;
pub mod credential;
pub mod descriptor;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod history;
pub mod http_client;
pub mod rate_limiter;
pub mod repair;
pub mod retry;
pub mod telemetry;

pub use cache::{CacheMode, CacheStore, CacheTtls, EndpointClass};
pub use cancel::{Cancellation, Cancelled};
pub use chart::{chart_descriptor, decode_chart, ChartData};
pub use config::PipelineConfig;
pub use credential::{Credential, CredentialConfig, CredentialManager};
pub use descriptor::RequestDescriptor;
pub use domain::{
    CorporateAction, ExchangeDateTime, HistorySpan, Interval, Period, PriceBar, SplitRatio, Symbol,
};
pub use error::{ConfigError, FetchError, FetchErrorKind, ValidationError};
pub use fetch::FetchClient;
pub use history::{HistoryRequest, PriceHistory, PriceHistoryService};
pub use http_client::{
    HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use repair::{repair, Correction, RepairConfig, RepairOutcome, RepairWarning, WarningKind};
pub use retry::{AttemptBudget, Backoff, RetryConfig, RetryState};
