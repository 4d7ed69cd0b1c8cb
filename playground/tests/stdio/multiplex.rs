//! Concurrent calls over one pipe

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mcp_playground::mcp::McpError;
use serde_json::{json, Value};

use super::common::{args, Fixture};

#[tokio::test]
async fn test_concurrent_calls_get_their_own_responses() {
    let fx = Fixture::new();
    let registry = Arc::new(fx.registry());
    registry.start(&fx.stub("echo")).await.unwrap();

    // later calls answer first, so responses arrive out of order
    let calls: Vec<_> = (0..10u64)
        .map(|n| {
            let registry = registry.clone();
            tokio::spawn(async move {
                let out = registry
                    .call("echo.echo", args(json!({"n": n, "delay_ms": (10 - n) * 20})), None)
                    .await
                    .unwrap();
                (n, out)
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for call in calls {
        let (n, out) = call.await.unwrap();
        let echoed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(echoed["arguments"]["n"], n);
        assert!(ids.insert(echoed["request_id"].as_u64().unwrap()));
    }
    assert_eq!(ids.len(), 10);

    registry.stop_all().await;
}

#[tokio::test]
async fn test_timeout_leaves_server_usable() {
    let fx = Fixture::new();
    let registry = fx.registry();
    registry.start(&fx.stub("echo")).await.unwrap();

    let started = Instant::now();
    let err = registry
        .call("echo.hang", args(json!({})), Some(Duration::from_secs(1)))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, McpError::CallTimeout { .. }));
    assert!(err.is_recoverable());
    assert!(elapsed >= Duration::from_millis(900), "returned too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "returned too late: {:?}", elapsed);

    assert_eq!(registry.call("echo.ping", args(json!({})), None).await.unwrap(), "pong");
    registry.stop_all().await;
}

#[tokio::test]
async fn test_late_response_is_discarded() {
    let fx = Fixture::new();
    let registry = fx.registry();
    registry.start(&fx.stub("echo")).await.unwrap();

    let err = registry
        .call(
            "echo.echo",
            args(json!({"delay_ms": 500})),
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::CallTimeout { .. }));

    // the answer to the timed-out call lands in between and must go nowhere
    tokio::time::sleep(Duration::from_millis(700)).await;

    let out = registry
        .call("echo.echo", args(json!({"tag": "second"})), None)
        .await
        .unwrap();
    let echoed: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(echoed["arguments"]["tag"], "second");

    registry.stop_all().await;
}
