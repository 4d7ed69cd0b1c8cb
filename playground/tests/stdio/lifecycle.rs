//! Start, stop, restart, probe

use std::sync::Arc;

use mcp_playground::mcp::{CacheStatus, McpError, ServerState};
use serde_json::json;

use super::common::{args, Fixture};

#[tokio::test]
async fn test_start_discovers_stub_tools() {
    let fx = Fixture::new();
    let registry = fx.registry();

    let tools = registry.start(&fx.stub("echo")).await.expect("start failed");
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["ping", "echo", "hang", "crash", "image", "big", "fail"]
    );
    assert_eq!(tools[0].qualified_name(), "echo.ping");
    assert_eq!(registry.spawn_count(), 1);
    assert_eq!(fx.list_count(), 1);

    let info = registry.server_info("echo").await.unwrap().expect("no server info");
    assert_eq!(info.name, "stub-echo");

    let out = registry.call("echo.ping", args(json!({})), None).await.unwrap();
    assert_eq!(out, "pong");

    registry.stop_all().await;
}

#[tokio::test]
async fn test_warm_start_skips_spawn_and_discovery() {
    let fx = Fixture::new();

    let first = fx.registry();
    let cold = first.start(&fx.stub("echo")).await.unwrap();
    assert_eq!(first.call("echo.ping", args(json!({})), None).await.unwrap(), "pong");
    first.stop_all().await;
    assert_eq!(fx.list_count(), 1);

    let second = fx.registry();
    let warm = second.start(&fx.stub("echo")).await.unwrap();
    assert_eq!(warm, cold);
    assert_eq!(second.spawn_count(), 0);

    let status = second.status().await;
    assert_eq!(status[0].state, ServerState::Idle);
    assert_eq!(status[0].cache_status, CacheStatus::Valid);

    // first call spawns lazily, without another tools/list
    assert_eq!(second.call("echo.ping", args(json!({})), None).await.unwrap(), "pong");
    assert_eq!(second.spawn_count(), 1);
    assert_eq!(fx.list_count(), 1);
    assert_eq!(second.status().await[0].state, ServerState::Running);

    second.stop_all().await;
}

#[tokio::test]
async fn test_duplicate_start_is_rejected_until_stopped() {
    let fx = Fixture::new();
    let registry = fx.registry();

    registry.start(&fx.stub("echo")).await.unwrap();
    let err = registry.start(&fx.stub("echo")).await.unwrap_err();
    assert!(matches!(err, McpError::DuplicateServer(ref name) if name == "echo"));

    assert!(registry.stop("echo").await.unwrap());
    assert!(!registry.stop("echo").await.unwrap());
    assert_eq!(registry.status().await[0].state, ServerState::Stopped);

    // stopped servers refuse calls until started again
    assert!(matches!(
        registry.call("echo.ping", args(json!({})), None).await,
        Err(McpError::ConnectionClosed { .. })
    ));

    registry.start(&fx.stub("echo")).await.unwrap();
    assert_eq!(registry.call("echo.ping", args(json!({})), None).await.unwrap(), "pong");
    registry.stop_all().await;
}

#[tokio::test]
async fn test_restart_revives_a_crashed_server() {
    let fx = Fixture::new();
    let registry = fx.registry();
    registry.start(&fx.stub("echo")).await.unwrap();

    let err = registry
        .call("echo.crash", args(json!({})), None)
        .await
        .unwrap_err();
    assert!(err.is_connection_lost(), "unexpected error: {}", err);
    assert_eq!(registry.status().await[0].state, ServerState::Failed);

    // no automatic restart
    assert!(matches!(
        registry.call("echo.ping", args(json!({})), None).await,
        Err(McpError::ConnectionClosed { .. })
    ));

    registry.restart("echo").await.unwrap();
    assert_eq!(registry.spawn_count(), 2);
    assert_eq!(registry.call("echo.ping", args(json!({})), None).await.unwrap(), "pong");
    registry.stop_all().await;
}

#[tokio::test]
async fn test_probe_lists_without_registering() {
    let fx = Fixture::new();
    let registry = fx.registry();

    let tools = registry.probe(&fx.stub("echo")).await.unwrap();
    assert_eq!(tools.len(), 7);
    assert!(registry.tools().await.is_empty());
    assert_eq!(registry.spawn_count(), 1);

    // the probe refreshed the cache
    registry.start(&fx.stub("echo")).await.unwrap();
    assert_eq!(registry.spawn_count(), 1);
    assert_eq!(fx.list_count(), 1);
}

#[tokio::test]
async fn test_start_all_and_callables() {
    let fx = Fixture::new();
    let registry = Arc::new(fx.registry());

    let report = registry
        .start_all(vec![fx.stub("alpha"), fx.stub("beta")])
        .await;
    assert!(report.all_started());
    assert_eq!(
        report.started,
        vec![("alpha".to_string(), 7), ("beta".to_string(), 7)]
    );

    let callables = registry.callables().await;
    assert_eq!(callables.len(), 14);
    let ping = callables
        .iter()
        .find(|c| c.name() == "beta.ping")
        .expect("beta.ping missing");
    assert_eq!(ping.description(), "Reply with pong");
    assert_eq!(ping.call(args(json!({}))).await.unwrap(), "pong");

    registry.stop_all().await;
}
