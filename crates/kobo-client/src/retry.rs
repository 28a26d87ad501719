//! Retrying with exponential backoff.

use std::{future::Future, time::Duration};

use crate::Result;

/// Run `operation` until it succeeds or has been retried `retries` times.
///
/// The first retry waits `delay`; each further one waits twice as long.
pub(crate) async fn with_backoff<T, F, Fut>(
  operation_name: &str,
  retries: usize,
  delay: Duration,
  mut operation: F,
) -> Result<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let mut delay = delay;
  let mut attempt = 0;

  loop {
    attempt += 1;
    match operation().await {
      Ok(value) => {
        if attempt > 1 {
          tracing::debug!(operation = operation_name, attempt, "succeeded after retry");
        }
        return Ok(value);
      }
      Err(error) if attempt <= retries => {
        tracing::info!(
          operation = operation_name,
          attempt,
          %error,
          retry_in_ms = delay.as_millis() as u64,
          "attempt failed; retrying"
        );
        tokio::time::sleep(delay).await;
        delay = delay.saturating_mul(2);
      }
      Err(error) => {
        tracing::error!(operation = operation_name, attempt, %error, "giving up");
        return Err(error);
      }
    }
  }
}
