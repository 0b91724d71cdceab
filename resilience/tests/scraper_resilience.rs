//! End-to-end flows: a retailer fetch behind a breaker and retry, database
//! write failures surfacing through the API envelope, and log shipping.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use axum::body::to_bytes;
use axum::http::StatusCode;
use serde_json::{Value, json};
use solebox_feedback::{JsonLinesSink, LogContext, MemorySink};
use solebox_resilience::error::ErrorContext;
use solebox_resilience::retry::{CircuitBreakerConfig, UntypedError};
use solebox_resilience::{
    CircuitBreakerError, CircuitState, ConfigLoader, DbError, ManualClock, ResilienceConfig,
    ResilienceContext, RetryConfig, handle_db_error, handle_error,
};

fn context_with_clock() -> (ResilienceContext, ManualClock) {
    let clock = ManualClock::new(1_700_000_000_000);
    let mut config = ResilienceConfig::default();
    config.circuit_breakers.insert(
        "stockx".to_string(),
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout_ms: 30_000,
        },
    );
    let ctx = ResilienceContext::builder(config)
        .with_clock(Arc::new(clock.clone()))
        .build();
    (ctx, clock)
}

fn fast_retries(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        jitter: false,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn open_breaker_stops_retries_early() {
    let (ctx, _clock) = context_with_clock();
    let breaker = ctx.breaker("stockx", None);
    let upstream_calls = AtomicU32::new(0);

    let result = ctx
        .retry()
        .retry_with_backoff(
            || {
                let breaker = Arc::clone(&breaker);
                let calls = &upstream_calls;
                async move {
                    breaker
                        .execute(|| async {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Err::<Value, _>(UntypedError::new("bad gateway").with_status(502))
                        })
                        .await
                }
            },
            "scrape_stockx",
            Some(&fast_retries(5)),
        )
        .await;

    assert_eq!(upstream_calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.attempts, 4, "fourth attempt is rejected by the breaker");
    let err = result.outcome.unwrap_err();
    assert!(matches!(err, CircuitBreakerError::Open { .. }), "{err}");
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn breaker_recovers_after_timeout() {
    let (ctx, clock) = context_with_clock();
    let breaker = ctx.breaker("stockx", None);
    for _ in 0..3 {
        breaker.record_failure();
    }
    assert!(!breaker.try_acquire());

    clock.advance_ms(30_000);

    for price in [180, 185] {
        let quote = breaker
            .execute(|| async { Ok::<_, UntypedError>(json!({"sku": "DD1391-100", "price": price})) })
            .await
            .unwrap();
        assert_eq!(quote["price"], price);
    }

    let statuses = ctx.breakers().statuses();
    assert_eq!(statuses["stockx"].state, CircuitState::Closed);
    assert_eq!(statuses["stockx"].failures, 0);
}

#[tokio::test(start_paused = true)]
async fn constraint_violation_is_not_retried_and_maps_to_envelope() {
    let ctx = ResilienceContext::new(ResilienceConfig::default());
    let raw = json!({
        "code": "23505",
        "message": "duplicate key value violates unique constraint \"items_sku_key\"",
        "constraint": "items_sku_key"
    });
    let writes = AtomicU32::new(0);

    let err = ctx
        .retry()
        .retry(
            || {
                writes.fetch_add(1, Ordering::SeqCst);
                let raw = raw.clone();
                async move { Err::<(), _>(DbError::from_value(&raw)) }
            },
            "insert_item",
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(writes.load(Ordering::SeqCst), 1);

    let info = handle_db_error(
        ctx.logger(),
        &raw,
        Some(LogContext::new().with("table", "items")),
    );
    assert!(!info.is_retryable);
    assert!(info.user_message.contains("items_sku_key"));

    let request = ErrorContext::new()
        .route("/api/items")
        .method("POST")
        .request_id(solebox_resilience::generate_request_id());
    let response = handle_error(ctx.logger(), err.into(), Some(&request));
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "DATABASE_ERROR");
    assert_eq!(body["error"]["requestId"], request.request_id.unwrap().as_str());
}

#[tokio::test(start_paused = true)]
async fn transient_db_failure_recovers_and_is_measured() {
    let ctx = ResilienceContext::new(ResilienceConfig::default());
    let attempts = AtomicU32::new(0);

    let rows = ctx
        .retry()
        .retry(
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                ctx.metrics().time_query("list_closet", async move {
                    if n == 0 {
                        Err(DbError::connection_lost("server closed the connection"))
                    } else {
                        Ok(vec!["jordan-1", "dunk-low"])
                    }
                })
            },
            "list_closet",
            Some(&fast_retries(2)),
        )
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(ctx.metrics().get_stats(Some("list_closet")).count, 2);
}

#[test]
fn critical_entry_ships_to_json_lines_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("solebox.log");
    let ctx = ResilienceContext::builder(ResilienceConfig::default())
        .with_sink(Arc::new(JsonLinesSink::new(&path)))
        .build();

    ctx.logger().info("scrape started", None);
    ctx.logger().critical(
        "all retailers unreachable",
        Some(LogContext::new().with("retailers", ["stockx", "goat"])),
    );

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1]["level"], "CRITICAL");
    assert_eq!(lines[1]["context"]["retailers"], json!(["stockx", "goat"]));
    assert!(ctx.logger().buffered().is_empty());
}

#[test]
fn config_file_drives_context() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("solebox.toml");
    std::fs::write(
        &path,
        r#"
[retry]
max_retries = 1

[circuit_breakers.goat]
failure_threshold = 2
"#,
    )
    .unwrap();

    let config = ConfigLoader::new().with_file(&path).load().unwrap();
    let sink = MemorySink::new();
    let ctx = ResilienceContext::builder(config)
        .with_sink(Arc::new(sink.clone()))
        .build();

    assert_eq!(ctx.retry().defaults().max_retries, 1);
    let goat = ctx.breaker("goat", None);
    goat.record_failure();
    goat.record_failure();
    assert_eq!(goat.state(), CircuitState::Open);
    assert_eq!(ctx.breaker("flightclub", None).config().failure_threshold, 5);

    drop(ctx);
    assert!(sink.entry_count() >= 1, "breaker open warning is flushed on drop");
}
