//! Sanitized results from a real server

use std::time::Duration;

use mcp_playground::sanitize::TRUNCATION_MARKER;
use mcp_playground::Sanitizer;
use serde_json::{json, Value};

use super::common::{args, runtime, Fixture};

#[tokio::test]
async fn test_image_payload_is_replaced() {
    let fx = Fixture::new();
    let registry = fx.registry();
    registry.start(&fx.stub("echo")).await.unwrap();

    let out = registry
        .call("echo.image", args(json!({"size": 5000})), None)
        .await
        .unwrap();
    assert!(!out.contains(&"A".repeat(1000)));
    // "iVBORw0KGgo" prefix plus the requested size
    assert!(out.contains("[Image data - 5011 chars, type: image/png]"), "got: {}", out);
    registry.stop_all().await;
}

#[tokio::test]
async fn test_long_output_is_truncated_once() {
    let fx = Fixture::new();
    let sanitizer = Sanitizer::new(1_000, 15_000);
    let registry = fx.registry_with(runtime(), Duration::from_secs(3600), sanitizer.clone());
    registry.start(&fx.stub("echo")).await.unwrap();

    let out = registry
        .call("echo.big", args(json!({"size": 20000})), None)
        .await
        .unwrap();
    assert!(out.ends_with(TRUNCATION_MARKER));
    assert_eq!(
        out.chars().count(),
        15_000 + TRUNCATION_MARKER.chars().count()
    );
    assert_eq!(sanitizer.sanitize_text(&out), out);
    registry.stop_all().await;
}

#[tokio::test]
async fn test_home_relative_path_arguments_are_expanded() {
    let Some(home) = dirs::home_dir() else {
        return;
    };
    let fx = Fixture::new();
    let registry = fx.registry();
    registry.start(&fx.stub("echo")).await.unwrap();

    let out = registry
        .call(
            "echo.echo",
            args(json!({"path": "~/notes/today.md"})),
            None,
        )
        .await
        .unwrap();
    let echoed: Value = serde_json::from_str(&out).unwrap();
    let expected = format!("{}/notes/today.md", home.to_string_lossy());
    assert_eq!(echoed["arguments"]["path"], expected.as_str());
    registry.stop_all().await;
}
