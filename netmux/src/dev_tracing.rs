//! Log output for examples and tests.
//!
//! Tests call [`init_tracing`], which stays silent unless `RUST_LOG` is set.
//! The demo server calls [`init_tracing_or`] so bind and accept lines show
//! up without any environment setup. Both are no-ops when a global
//! subscriber is already installed.

use tracing_subscriber::EnvFilter;

/// Directives used by [`init_tracing_or`] when `RUST_LOG` is unset: the
/// manager's bind, accept and close lines, nothing from other crates.
pub const DEFAULT_DIRECTIVES: &str = "warn,netmux_core=info,netmux=info";

/// Install a `fmt` subscriber filtered by `RUST_LOG`, if set.
pub fn init_tracing() {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        install(filter);
    }
}

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `directives` when the variable is unset or does not parse.
pub fn init_tracing_or(directives: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    install(filter);
}

fn install(filter: EnvFilter) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
