//! Exponential backoff for transient failures
//!
//! Used when the download connection has to be (re)established and when the authoritative
//! metadata source is fetched. Per-item HTTP failures are never retried here; they land in the
//! owning job's failure map instead.

use crate::config::RetryConfig;
use crate::error::{Error, HttpError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Classifies errors as transient (worth another attempt) or permanent
pub trait IsRetryable {
    /// Returns true if the operation that produced this error should be attempted again
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => is_transient_io(e),
            Error::Http(HttpError::ConnectFailed { .. } | HttpError::ConnectionClosed) => true,
            Error::Http(HttpError::MalformedResponse(_) | HttpError::InvalidTemplate { .. }) => {
                false
            }
            Error::Config { .. }
            | Error::Job(_)
            | Error::Cache(_)
            | Error::Database(_)
            | Error::Sqlx(_)
            | Error::Extraction(_)
            | Error::Serialization(_)
            | Error::ShuttingDown => false,
        }
    }
}

/// Connection-level I/O error kinds that usually go away on their own
pub(crate) fn is_transient_io(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::Interrupted
    )
}

/// Run `operation` until it succeeds, fails permanently, or `config.max_attempts` retries
/// have been spent
///
/// The delay starts at `initial_delay`, is multiplied by `backoff_multiplier` after each
/// failed attempt and capped at `max_delay`. With `jitter` enabled each sleep is stretched by a
/// random factor in `[1, 2]`.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        let e = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !e.is_retryable() {
            tracing::debug!(error = %e, "operation failed with non-retryable error");
            return Err(e);
        }
        if attempt >= config.max_attempts {
            tracing::error!(error = %e, attempts = attempt + 1, "giving up after retries");
            return Err(e);
        }

        attempt += 1;
        tracing::warn!(
            error = %e,
            attempt,
            max_attempts = config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "operation failed, retrying"
        );

        let sleep_for = if config.jitter {
            add_jitter(delay)
        } else {
            delay
        };
        tokio::time::sleep(sleep_for).await;

        delay = Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
            .min(config.max_delay);
    }
}

fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + factor))
}
