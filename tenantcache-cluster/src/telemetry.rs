//! Tracing subscriber setup for binaries.

use tenantcache_core::{CacheError, CacheResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter applied when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "tenantcache=debug,info";

/// Install the global tracing subscriber.
///
/// Logs go to stderr so stdout stays free for the JSON-lines transport.
/// Set `TENANTCACHE_LOG_FORMAT=json` for JSON output.
pub fn init_tracing() -> CacheResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var("TENANTCACHE_LOG_FORMAT")
        .map(|s| s.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CacheError::Telemetry(format!("Failed to init subscriber: {}", e)))
}
