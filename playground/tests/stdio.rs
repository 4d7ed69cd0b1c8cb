//! Integration tests against the `stub-echo` tool server
//!
//! Every test spawns the real stub binary built alongside this crate, with a
//! scratch cache directory so runs never share state.
//!
//! Run with: cargo test -p mcp-playground --test stdio
//!
//! Test structure:
//! - lifecycle: start, stop, restart, probe, status, callables
//! - multiplex: concurrent calls, timeouts, late responses
//! - failures: crashes, startup failures, server errors
//! - caching: warm starts, fingerprint and TTL misses
//! - sanitizing: image elision, truncation, path arguments

#[path = "stdio/common.rs"]
mod common;

#[path = "stdio/lifecycle.rs"]
mod lifecycle;

#[path = "stdio/multiplex.rs"]
mod multiplex;

#[path = "stdio/failures.rs"]
mod failures;

#[path = "stdio/caching.rs"]
mod caching;

#[path = "stdio/sanitizing.rs"]
mod sanitizing;
