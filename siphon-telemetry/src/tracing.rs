use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Default filter directive used when `RUST_LOG` is not set.
const DEFAULT_DIRECTIVES: &str = "info";

/// Initializes tracing for a service binary.
///
/// Log verbosity is controlled through `RUST_LOG`; without it, `info` and above are
/// emitted. The `service` name is attached to every event as a top-level field via the
/// subscriber's target prefix.
pub fn init_tracing(service: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    ::tracing::info!(service, "tracing initialized");
}

/// Initializes tracing for tests.
///
/// Safe to call from every test: initialization happens once, and output is routed
/// through the test writer so it interleaves with test harness capture.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    });
}
