//! Capability cache across registries

use std::time::Duration;

use mcp_playground::{CapabilityCache, Registry, Sanitizer};

use super::common::{runtime, Fixture};

#[tokio::test]
async fn test_changed_args_force_discovery() {
    let fx = Fixture::new();

    let first = fx.registry();
    first.start(&fx.stub("echo")).await.unwrap();
    first.stop_all().await;

    // the stub ignores its arguments, but they are part of the fingerprint
    let second = fx.registry();
    let changed = fx.stub("echo").with_args(["--verbose"]);
    second.start(&changed).await.unwrap();
    assert_eq!(second.spawn_count(), 1);
    assert_eq!(fx.list_count(), 2);
    second.stop_all().await;
}

#[tokio::test]
async fn test_env_changes_keep_the_cache() {
    let fx = Fixture::new();

    let first = fx.registry();
    first.start(&fx.stub("echo")).await.unwrap();
    first.stop_all().await;

    let second = fx.registry();
    second
        .start(&fx.stub("echo").with_env("API_TOKEN", "rotated"))
        .await
        .unwrap();
    assert_eq!(second.spawn_count(), 0);
}

#[tokio::test]
async fn test_expired_entry_forces_discovery() {
    let fx = Fixture::new();

    let first = fx.registry_with(runtime(), Duration::ZERO, Sanitizer::default());
    first.start(&fx.stub("echo")).await.unwrap();
    first.stop_all().await;

    let second = fx.registry_with(runtime(), Duration::ZERO, Sanitizer::default());
    second.start(&fx.stub("echo")).await.unwrap();
    assert_eq!(second.spawn_count(), 1);
    assert_eq!(fx.list_count(), 2);
    second.stop_all().await;
}

#[tokio::test]
async fn test_disabled_cache_always_discovers() {
    let fx = Fixture::new();
    let disabled = || {
        Registry::with_parts(
            runtime(),
            CapabilityCache::new(fx.cache_dir(), Duration::from_secs(3600)).with_enabled(false),
            Sanitizer::default(),
        )
    };

    let first = disabled();
    first.start(&fx.stub("echo")).await.unwrap();
    first.stop_all().await;

    let second = disabled();
    second.start(&fx.stub("echo")).await.unwrap();
    assert_eq!(second.spawn_count(), 1);
    assert!(!fx.cache_dir().exists());
    second.stop_all().await;
}

#[tokio::test]
async fn test_invalidate_forces_discovery() {
    let fx = Fixture::new();

    let first = fx.registry();
    first.start(&fx.stub("echo")).await.unwrap();
    first.stop_all().await;
    assert_eq!(first.invalidate_cache(Some("echo")).await.unwrap(), 1);

    let second = fx.registry();
    second.start(&fx.stub("echo")).await.unwrap();
    assert_eq!(second.spawn_count(), 1);

    let stats = second.cache().stats().await.unwrap();
    assert_eq!(stats.entries, 1);
    assert!(stats.total_bytes > 0);
    second.stop_all().await;
}
