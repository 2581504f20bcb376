use std::future::Future;
use std::time::Duration;

use crate::error::{DelveError, DelveResult};

/// Retry and timeout policy applied to every external call.
///
/// Transient failures (network, rate-limit, 5xx, timeout) are retried with
/// exponential backoff up to `max_retries`; everything else returns
/// immediately. The timeout applies to each attempt separately.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            timeout: Duration::from_secs(30),
        }
    }
}

impl CallPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, timeout: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            timeout,
        }
    }

    /// Fast policy for tests: no waiting between attempts.
    pub fn immediate() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::ZERO,
            timeout: Duration::from_secs(5),
        }
    }

    /// Run `op`, retrying transient failures with exponential backoff.
    pub async fn run<T, F, Fut>(&self, service: &str, mut op: F) -> DelveResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DelveResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            let outcome = tokio::time::timeout(self.timeout, op()).await;
            let err = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => DelveError::Timeout {
                    service: service.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                },
            };

            if !err.is_transient() || attempt >= self.max_retries {
                return Err(err);
            }

            let delay = self.base_delay * 2u32.saturating_pow(attempt);
            log::warn!("{service} failed ({err}); retry {} in {delay:?}", attempt + 1);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
