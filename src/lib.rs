//! Resolution-and-delivery core for a personal multi-provider music
//! player: capability dispatch across heterogeneous providers, fuzzy
//! record linkage of search results, per-provider rate limiting, an
//! encrypted legacy tuner protocol, and a byte-range streaming proxy.
pub mod api;
pub mod config;
pub mod error;
pub mod manager;
pub mod matcher;
pub mod models;
pub mod ratelimit;
pub mod stream;

use tracing_subscriber::EnvFilter;

/// Install the process-wide tracing subscriber. Honors RUST_LOG if set,
/// otherwise defaults to info. Safe to call more than once; later calls
/// are no-ops.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}
