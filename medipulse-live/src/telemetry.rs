//! Logging bootstrap for binaries and demos.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the host.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Install a console subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; only the first call has an effect. If
/// another global subscriber is already installed, it is left in place.
///
/// # Example
/// ```
/// medipulse_live::telemetry::init_tracing("medipulse-voice");
/// ```
pub fn init_tracing(service_name: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .try_init();

        if installed.is_ok() {
            tracing::info!(service.name = service_name, "Tracing initialized");
        }
    });
}
