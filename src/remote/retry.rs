//! Bounded retry with failure classification around a [`Gateway`].

use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::client::{ApiRequest, Gateway, GatewayError};
use crate::error::{Error, Result};

/// Classified result of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome<T> {
  Success(T),
  /// HTTP 429: retry with a delay that grows with the attempt number
  RateLimited,
  /// HTTP 403: never retried
  Forbidden(String),
  /// Anything else: retry with a fixed delay
  TransientError(String),
}

impl<T> FetchOutcome<T> {
  pub fn classify(result: std::result::Result<T, GatewayError>) -> Self {
    match result {
      Ok(value) => FetchOutcome::Success(value),
      Err(GatewayError::Status { status: 429, .. }) => FetchOutcome::RateLimited,
      Err(GatewayError::Status {
        status: 403,
        message,
      }) => FetchOutcome::Forbidden(message),
      Err(other) => FetchOutcome::TransientError(other.to_string()),
    }
  }
}

/// Retry budget and delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_retries: u32,
  pub base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 3,
      base_delay: Duration::from_secs(2),
    }
  }
}

impl RetryPolicy {
  /// Delay before retrying after a rate-limited `attempt` (0-based).
  pub fn rate_limit_delay(&self, attempt: u32) -> Duration {
    self.base_delay * (attempt + 1)
  }

  /// Delay before retrying after a transient failure.
  pub fn transient_delay(&self) -> Duration {
    self.base_delay
  }
}

/// Wraps a gateway with the retry policy. Used only by the repository.
pub struct RetryingFetcher<G> {
  gateway: G,
  policy: RetryPolicy,
}

impl<G: Gateway> RetryingFetcher<G> {
  pub fn new(gateway: G, policy: RetryPolicy) -> Self {
    Self { gateway, policy }
  }

  /// Run `request` until success, a terminal 403, or the retry budget is spent.
  ///
  /// Each payload is decoded inside the attempt, so a payload that fails to
  /// decode counts as a transient failure.
  pub async fn fetch<T, D>(&self, request: &ApiRequest, decode: D) -> Result<T>
  where
    D: Fn(Value) -> std::result::Result<T, String>,
  {
    let mut attempt: u32 = 0;

    loop {
      let result = self
        .gateway
        .request(request)
        .await
        .and_then(|payload| decode(payload).map_err(GatewayError::Malformed));
      let outcome = FetchOutcome::classify(result);

      let delay = match outcome {
        FetchOutcome::Success(value) => return Ok(value),
        FetchOutcome::Forbidden(message) => {
          warn!("{} forbidden, not retrying: {}", request, message);
          return Err(Error::Forbidden(message));
        }
        FetchOutcome::RateLimited => {
          if attempt >= self.policy.max_retries {
            warn!("{} still rate limited after {} attempts", request, attempt + 1);
            return Err(Error::RateLimited {
              attempts: attempt + 1,
            });
          }
          self.policy.rate_limit_delay(attempt)
        }
        FetchOutcome::TransientError(cause) => {
          if attempt >= self.policy.max_retries {
            warn!("{} failed after {} attempts: {}", request, attempt + 1, cause);
            return Err(Error::Transient {
              attempts: attempt + 1,
              cause,
            });
          }
          debug!("{} transient failure: {}", request, cause);
          self.policy.transient_delay()
        }
      };

      debug!(
        "retrying {} in {:?} (attempt {} of {})",
        request,
        delay,
        attempt + 2,
        self.policy.max_retries + 1
      );
      tokio::time::sleep(delay).await;
      attempt += 1;
    }
  }
}
