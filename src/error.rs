//! Classified errors surfaced by the data layer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors a caller of the repository, aggregator or synthesizer can observe.
///
/// A cache miss is never an error: it only decides whether the network is hit.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
  /// Upstream kept answering 429 until the retry budget ran out.
  #[error("rate limited by upstream after {attempts} attempts")]
  RateLimited { attempts: u32 },

  /// Upstream refused the request (subscription or permission problem).
  #[error("forbidden by upstream: {0}")]
  Forbidden(String),

  /// Timeouts, 5xx, transport failures or malformed payloads, after retries.
  #[error("upstream unavailable after {attempts} attempts: {cause}")]
  Transient { attempts: u32, cause: String },

  /// Upstream answered successfully but the requested resource does not exist.
  #[error("not found: {0}")]
  NotFound(String),

  /// The caller asked for something that cannot be fetched.
  #[error("invalid request: {0}")]
  InvalidRequest(String),
}
