//! Shared helpers for codeact's integration tests: config and request
//! builders, a scripted operation backend, and tracing setup.

pub mod builders;
pub mod fake_backend;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Upper bound for any single awaited step in a test. Shell sessions settle
/// for 200ms and kills wait out a grace window, so this stays generous.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Route batch and session logs to the per-test writer, once per process.
///
/// Output only shows for failing tests (or with `--nocapture`). Filter with
/// `RUST_LOG`, e.g. `RUST_LOG=codeact::exec=debug`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, failing the test if it takes longer than [`TEST_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, f)
        .await
        .expect("test step exceeded TEST_TIMEOUT")
}
