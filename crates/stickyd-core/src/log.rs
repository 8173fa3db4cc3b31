//! tracing subscriber setup
//!
//! The filter comes from `STICKYD_LOG` (any `EnvFilter` directive string),
//! falling back to the level passed by the caller. Output goes to stderr
//! with thread names, so carrier and event-loop threads are identifiable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::env::env_get_opt;
use crate::error::{CoreError, CoreResult};

/// Environment variable holding the tracing filter
pub const LOG_ENV: &str = "STICKYD_LOG";

/// Install the global tracing subscriber
///
/// Calling this twice is not an error: the second call leaves the first
/// subscriber in place and returns `Ok(false)`.
pub fn init_logging(default_level: &str) -> CoreResult<bool> {
    let directives: String = env_get_opt(LOG_ENV).unwrap_or_else(|| default_level.to_string());
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_names(true),
        )
        .try_init();

    match result {
        Ok(()) => Ok(true),
        Err(e) if tracing::dispatcher::has_been_set() => {
            tracing::trace!(error = %e, "subscriber already installed");
            Ok(false)
        }
        Err(e) => Err(CoreError::Logging(e.to_string())),
    }
}

/// Best-effort subscriber for tests; output is captured by the harness
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer().with_thread_names(true))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() {
        init_test_logging();
        assert_eq!(init_logging("debug").ok(), Some(false));
    }
}
