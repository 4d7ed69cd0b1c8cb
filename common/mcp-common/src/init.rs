//! Logging setup
//!
//! Nothing here writes to stdout. A tool server's stdout carries protocol
//! frames and the CLI's carries command output, so every event goes to stderr.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the stderr subscriber shared by the CLI and stdio tool servers.
///
/// `crate_name` logs at `info` and above; other targets follow `RUST_LOG`.
/// Output is plain text without colors, since it usually lands in a parent's
/// stderr drain rather than a terminal. `LOG_FORMAT=json` switches to one
/// JSON object per event.
///
/// Fails if the directive is malformed or a global subscriber is already set.
///
/// ```rust,ignore
/// mcp_common::init_tracing("stub_echo")?;
/// ```
pub fn init_tracing(crate_name: &str) -> anyhow::Result<()> {
    let directive = format!("{}=info", crate_name);
    let filter = EnvFilter::from_default_env().add_directive(directive.parse()?);

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);

    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init()?;
    }

    Ok(())
}
