//! Behavior-driven tests for the durable cache tier
//!
//! These tests verify that responses cached with a DuckDB-backed store
//! survive a process restart, honour their TTL across it, and can be
//! invalidated on disk.

use std::sync::Arc;
use std::time::Duration;

use quarry_core::{
    CacheStore, Cancellation, CredentialConfig, CredentialManager, FetchClient, HttpClient,
    HttpResponse, RateLimitConfig, RateLimiter, RequestDescriptor, RetryConfig,
    ScriptedHttpClient,
};
use quarry_warehouse::{ResponseStore, WarehouseConfig};
use tempfile::{tempdir, TempDir};

const PAYLOAD: &str = r#"{"chart":{"result":[],"error":null}}"#;

fn open_cache(home: &TempDir) -> CacheStore {
    let mut config = WarehouseConfig::at_home(home.path().join("quarry"));
    config.max_pool_size = 2;
    CacheStore::with_durable(ResponseStore::open(config).expect("store open"))
}

fn chart(symbol: &str) -> RequestDescriptor {
    RequestDescriptor::get(
        "query2.finance.yahoo.com",
        format!("/v8/finance/chart/{symbol}"),
        [("interval", "1d"), ("range", "1mo")],
    )
}

// =============================================================================
// Durable cache: restart survival
// =============================================================================

#[tokio::test]
async fn when_the_process_restarts_then_cached_responses_are_served_from_disk() {
    // Given: A response cached before a restart
    let home = tempdir().expect("tempdir");
    {
        let cache = open_cache(&home);
        cache.put(&chart("AAPL"), PAYLOAD, Duration::from_secs(60)).await;
    }

    // When: A fresh cache opens the same store
    let cache = open_cache(&home);
    assert!(cache.is_empty().await);
    let hit = cache.get(&chart("AAPL")).await;

    // Then: The response is read through and promoted to memory
    assert_eq!(hit.as_deref(), Some(PAYLOAD));
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn when_an_entry_expires_across_a_restart_then_it_is_not_served() {
    // Given: A short-lived response cached before a restart
    let home = tempdir().expect("tempdir");
    {
        let cache = open_cache(&home);
        cache.put(&chart("AAPL"), PAYLOAD, Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(120)).await;

    // When: A fresh cache looks it up after the TTL
    let cache = open_cache(&home);

    // Then: It is a miss
    assert_eq!(cache.get(&chart("AAPL")).await, None);
}

#[tokio::test]
async fn when_a_symbol_is_invalidated_then_its_disk_entries_are_gone_after_restart() {
    // Given: Two symbols cached durably
    let home = tempdir().expect("tempdir");
    {
        let cache = open_cache(&home);
        cache.put(&chart("AAPL"), PAYLOAD, Duration::from_secs(60)).await;
        cache.put(&chart("MSFT"), PAYLOAD, Duration::from_secs(60)).await;

        // When: One symbol's chart path is invalidated
        assert_eq!(cache.invalidate_path("/v8/finance/chart/AAPL").await, 1);
    }

    // Then: Only the other symbol survives the restart
    let cache = open_cache(&home);
    assert_eq!(cache.get(&chart("AAPL")).await, None);
    assert_eq!(cache.get(&chart("MSFT")).await.as_deref(), Some(PAYLOAD));
}

#[tokio::test]
async fn when_a_pipeline_restarts_then_no_request_is_repeated() {
    // Given: A pipeline that fetched a chart into a durable cache
    let home = tempdir().expect("tempdir");
    let http = ScriptedHttpClient::new();
    http.always(
        "https://fc.yahoo.com",
        Ok(HttpResponse::new(404, "").with_header("set-cookie", "A3=d=session")),
    )
    .always(
        "https://query1.finance.yahoo.com/v1/test/getcrumb",
        Ok(HttpResponse::new(200, "crumb")),
    )
    .always(
        "https://query2.finance.yahoo.com/v8/finance/chart/AAPL",
        Ok(HttpResponse::ok_json(PAYLOAD)),
    );

    let pipeline = |cache: CacheStore| {
        let transport: Arc<dyn HttpClient> = Arc::new(http.clone());
        let limiter = RateLimiter::new(RateLimitConfig {
            quota_window: Duration::from_secs(1),
            quota_limit: 1_000,
            burst: 100,
        });
        let credentials = Arc::new(CredentialManager::new(
            Arc::clone(&transport),
            limiter.clone(),
            CredentialConfig::default(),
        ));
        FetchClient::new(
            transport,
            limiter,
            credentials,
            cache,
            RetryConfig::fixed(Duration::from_millis(5), 3),
        )
    };

    {
        let client = pipeline(open_cache(&home));
        client
            .fetch(&chart("AAPL"), &Cancellation::new())
            .await
            .expect("first fetch");
    }

    // When: A new pipeline asks for the same chart
    let client = pipeline(open_cache(&home));
    let body = client
        .fetch(&chart("AAPL"), &Cancellation::new())
        .await
        .expect("second fetch");

    // Then: It is served from disk without credentials or a data request
    assert_eq!(body, PAYLOAD);
    assert_eq!(
        http.request_count("https://query2.finance.yahoo.com/v8/finance/chart/AAPL"),
        1
    );
    assert_eq!(client.credentials().refresh_count(), 0);
}
