//! Shared helpers for flowtk's integration tests: tracing, timeouts, flow
//! builders and a scripted queue adapter.

pub mod builders;
pub mod fake_queue;

use std::sync::Once;
use std::time::Duration;

use flowtk::logging::LOG_ENV;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Upper bound for a single scheduler run in tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test subscriber once per test binary.
///
/// The filter comes from `FLOWTK_LOG` (as for the binary), then `RUST_LOG`,
/// then `warn`. Output goes through the test writer, so it only shows for
/// failing tests or with `--nocapture`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = std::env::var(LOG_ENV)
            .ok()
            .and_then(|level| EnvFilter::try_new(level).ok())
            .or_else(|| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| EnvFilter::new("warn"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(false)
            .init();
    });
}

/// Await `f`, failing the test if a flow has not settled within
/// [`TEST_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    match tokio::time::timeout(TEST_TIMEOUT, f).await {
        Ok(value) => value,
        Err(_) => panic!("flow did not settle within {TEST_TIMEOUT:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn settled_future_passes_through() {
        init_tracing();
        assert_eq!(with_timeout(async { 7 }).await, 7);
    }

    #[tokio::test]
    #[should_panic(expected = "did not settle")]
    async fn stalled_future_fails_the_test() {
        with_timeout(std::future::pending::<()>()).await;
    }
}
