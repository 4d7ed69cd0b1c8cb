//! Crashes, startup failures and server errors

use std::sync::Arc;
use std::time::Duration;

use mcp_playground::config::ServerLaunchConfig;
use mcp_playground::mcp::McpError;
use mcp_playground::Sanitizer;
use serde_json::json;

use super::common::{args, runtime, Fixture};

/// Spawn `count` calls to the never-answering tool
fn hang_calls(
    registry: &Arc<mcp_playground::Registry>,
    count: usize,
) -> Vec<tokio::task::JoinHandle<Result<String, McpError>>> {
    (0..count)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .call("echo.hang", args(json!({})), Some(Duration::from_secs(30)))
                    .await
            })
        })
        .collect()
}

#[tokio::test]
async fn test_crash_fails_every_pending_call() {
    let fx = Fixture::new();
    let registry = Arc::new(fx.registry());
    registry.start(&fx.stub("echo")).await.unwrap();

    let pending = hang_calls(&registry, 3);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let crash = registry
        .call("echo.crash", args(json!({})), None)
        .await
        .unwrap_err();
    assert!(matches!(crash, McpError::ConnectionClosed { .. }));

    for call in pending {
        let outcome = tokio::time::timeout(Duration::from_secs(5), call)
            .await
            .expect("pending call hung after crash")
            .unwrap();
        assert!(matches!(outcome, Err(McpError::ConnectionClosed { .. })));
    }
}

#[tokio::test]
async fn test_stop_fails_in_flight_calls() {
    let fx = Fixture::new();
    let registry = Arc::new(fx.registry());
    registry.start(&fx.stub("echo")).await.unwrap();

    let pending = hang_calls(&registry, 3);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(registry.stop("echo").await.unwrap());

    for call in pending {
        let outcome = tokio::time::timeout(Duration::from_secs(5), call)
            .await
            .expect("pending call hung after stop")
            .unwrap();
        assert!(matches!(outcome, Err(McpError::ConnectionClosed { .. })));
    }
}

#[tokio::test]
async fn test_startup_failure_carries_stderr() {
    let fx = Fixture::new();
    let mut settings = runtime();
    settings.startup_grace_ms = 1_000;
    let registry = fx.registry_with(settings, Duration::from_secs(3600), Sanitizer::default());

    let config = fx.stub("broken").with_env("STUB_EXIT_IMMEDIATELY", "1");
    match registry.start(&config).await {
        Err(McpError::StartupFailed { stderr, .. }) => {
            assert!(stderr.contains("fatal error: boom"), "stderr was: {}", stderr);
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("broken server started"),
    }
    assert!(registry.tools().await.is_empty());
}

#[tokio::test]
async fn test_missing_command_is_reported() {
    let fx = Fixture::new();
    let registry = fx.registry();
    let config = ServerLaunchConfig::new("ghost", "no-such-mcp-server-binary");

    let err = registry.start(&config).await.unwrap_err();
    match err {
        McpError::CommandNotFound { server, command } => {
            assert_eq!(server, "ghost");
            assert_eq!(command, "no-such-mcp-server-binary");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_server_error_is_passed_through() {
    let fx = Fixture::new();
    let registry = fx.registry();
    registry.start(&fx.stub("echo")).await.unwrap();

    match registry.call("echo.fail", args(json!({})), None).await {
        Err(McpError::ServerError { code, message, .. }) => {
            assert_eq!(code, -32000);
            assert_eq!(message, "tool failed on purpose");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    // recoverable: the process is still there
    assert_eq!(registry.call("echo.ping", args(json!({})), None).await.unwrap(), "pong");
    registry.stop_all().await;
}

#[tokio::test]
async fn test_unknown_tool_never_reaches_the_wire() {
    let fx = Fixture::new();
    let registry = fx.registry();
    registry.start(&fx.stub("echo")).await.unwrap();

    assert!(matches!(
        registry.call("echo.nope", args(json!({})), None).await,
        Err(McpError::UnknownTool { .. })
    ));
    registry.stop_all().await;
}
