//! Fan-out across partitions with per-branch failure isolation.
//!
//! One repository fetch per partition key runs concurrently; a branch that
//! fails becomes an entry in [`AggregateResult::errors`] and never affects its
//! siblings.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheStore, DataState, Origin, QuerySpec, Repository};
use crate::error::{Error, Result};
use crate::remote::Gateway;

/// How one successful partition was served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionOutcome<K> {
  pub key: K,
  pub origin: Origin,
  pub rows: usize,
  pub cached_at: Option<DateTime<Utc>>,
  pub warning: Option<String>,
}

/// Merged result of a fan-out call.
///
/// `partitions` and `errors` together account for every requested key.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateResult<T, K> {
  /// Rows of every successful partition, in key order
  pub succeeded: Vec<T>,
  pub partitions: Vec<PartitionOutcome<K>>,
  /// Failed partitions with the error message
  pub errors: Vec<(K, String)>,
}

impl<T, K> AggregateResult<T, K> {
  pub fn state(&self) -> DataState {
    if !self.errors.is_empty() {
      DataState::Partial
    } else if self
      .partitions
      .iter()
      .any(|p| p.origin == Origin::StaleFallback)
    {
      DataState::Stale
    } else {
      DataState::Fresh
    }
  }

  /// Non-fatal warnings of the partitions served from stale cache.
  pub fn warnings(&self) -> impl Iterator<Item = (&K, &str)> {
    self
      .partitions
      .iter()
      .filter_map(|p| p.warning.as_deref().map(|w| (&p.key, w)))
  }
}

/// Fetch `build(key)` for every key concurrently and merge the results.
///
/// Errors only on a caller mistake: an empty key list or a repeated key.
#[instrument(skip_all, fields(partitions = keys.len()))]
pub async fn fetch_many<G, S, K, Q, F>(
  repository: &Repository<G, S>,
  keys: Vec<K>,
  build: F,
) -> Result<AggregateResult<Q::Row, K>>
where
  G: Gateway,
  S: CacheStore,
  K: Clone + Eq + Hash + Display + Debug,
  Q: QuerySpec,
  F: Fn(&K) -> Q,
{
  if keys.is_empty() {
    return Err(Error::InvalidRequest(
      "fan-out needs at least one partition".to_string(),
    ));
  }
  let mut seen = HashSet::new();
  if let Some(dup) = keys.iter().find(|k| !seen.insert(*k)) {
    return Err(Error::InvalidRequest(format!(
      "partition {} requested twice",
      dup
    )));
  }

  let queries: Vec<Q> = keys.iter().map(&build).collect();
  let branches = queries.iter().map(|query| {
    // A panicking branch must not take its siblings down with it
    AssertUnwindSafe(repository.fetch(query)).catch_unwind()
  });
  let outcomes = join_all(branches).await;

  let mut result = AggregateResult {
    succeeded: Vec::new(),
    partitions: Vec::new(),
    errors: Vec::new(),
  };

  for (key, outcome) in keys.into_iter().zip(outcomes) {
    match outcome {
      Ok(Ok(fetched)) => {
        debug!("partition {}: {} rows ({:?})", key, fetched.data.len(), fetched.origin);
        result.partitions.push(PartitionOutcome {
          key,
          origin: fetched.origin,
          rows: fetched.data.len(),
          cached_at: fetched.cached_at,
          warning: fetched.warning,
        });
        result.succeeded.extend(fetched.data);
      }
      Ok(Err(e)) => {
        warn!("partition {} failed: {}", key, e);
        result.errors.push((key, e.to_string()));
      }
      Err(_) => {
        warn!("partition {} panicked", key);
        result.errors.push((key, "fetch panicked".to_string()));
      }
    }
  }

  Ok(result)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{FreshnessPolicy, MemoryStore};
  use crate::football::{FixturesQuery, LiveQuery};
  use crate::remote::testing::FakeGateway;
  use crate::remote::{ApiRequest, GatewayError, RetryPolicy, RetryingFetcher};
  use serde_json::{json, Value};
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  fn fixture_json(id: u64, league: u32) -> Value {
    json!({
      "fixture": {
        "id": id,
        "date": "2024-09-14T14:00:00+00:00",
        "status": {"long": "First Half", "short": "1H", "elapsed": 23}
      },
      "league": {"id": league, "season": 2024, "round": "Regular Season - 4"},
      "teams": {"home": {"id": 1, "name": "H"}, "away": {"id": 2, "name": "A"}},
      "goals": {"home": 0, "away": 0}
    })
  }

  /// League 2 always fails, every other league answers two fixtures.
  fn flaky_upstream(request: &ApiRequest) -> std::result::Result<Value, GatewayError> {
    let league: u32 = request
      .get("league")
      .or(request.get("live"))
      .and_then(|l| l.parse().ok())
      .unwrap_or_default();
    if league == 2 {
      return Err(GatewayError::Status {
        status: 500,
        message: "upstream down".into(),
      });
    }
    let base = u64::from(league) * 100;
    Ok(json!([fixture_json(base + 1, league), fixture_json(base + 2, league)]))
  }

  fn repository(gateway: &FakeGateway, store: MemoryStore) -> Repository<FakeGateway, MemoryStore> {
    let policy = RetryPolicy {
      max_retries: 1,
      base_delay: Duration::from_secs(2),
    };
    Repository::new(RetryingFetcher::new(gateway.clone(), policy), store)
  }

  fn day() -> chrono::NaiveDate {
    chrono::NaiveDate::from_ymd_opt(2024, 9, 14).unwrap()
  }

  #[tokio::test(start_paused = true)]
  async fn test_failing_partition_is_isolated() {
    let gateway = FakeGateway::new(flaky_upstream);
    let repo = repository(&gateway, MemoryStore::new());

    let result = fetch_many(&repo, vec![1u32, 2, 3], |league| {
      FixturesQuery::on_date(*league, day(), Some(2024))
    })
    .await
    .unwrap();

    let ids: Vec<u64> = result.succeeded.iter().map(|f| f.id).collect();
    assert_eq!(ids, vec![101, 102, 301, 302]);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].0, 2);
    assert!(result.errors[0].1.contains("upstream down"));
    assert_eq!(result.partitions.len() + result.errors.len(), 3);
    assert_eq!(result.state(), DataState::Partial);
  }

  #[tokio::test(start_paused = true)]
  async fn test_partitions_run_concurrently() {
    let gateway = FakeGateway::new(flaky_upstream).with_delay(Duration::from_secs(1));
    let repo = repository(&gateway, MemoryStore::new());

    let started = tokio::time::Instant::now();
    let result = fetch_many(&repo, vec![1u32, 3, 4, 5], |league| LiveQuery {
      league: Some(*league),
    })
    .await
    .unwrap();

    assert_eq!(result.succeeded.len(), 8);
    assert_eq!(result.state(), DataState::Fresh);
    // four one-second calls overlap instead of queueing
    assert!(started.elapsed() < Duration::from_secs(2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_stale_partition_marks_result_stale() {
    let down = Arc::new(AtomicBool::new(false));
    let flag = down.clone();
    let gateway = FakeGateway::new(move |request| {
      if flag.load(Ordering::SeqCst) {
        return Err(GatewayError::Transport("connection refused".into()));
      }
      flaky_upstream(request)
    });
    // Every cached row is already out of date
    let repo = repository(&gateway, MemoryStore::new()).with_freshness(FreshnessPolicy {
      static_ttl: Duration::ZERO,
      live_ttl: Duration::ZERO,
    });
    let build = |league: &u32| FixturesQuery::on_date(*league, day(), Some(2024));

    let warm = fetch_many(&repo, vec![1u32, 3], build).await.unwrap();
    assert_eq!(warm.state(), DataState::Fresh);

    down.store(true, Ordering::SeqCst);
    let result = fetch_many(&repo, vec![1u32, 3], build).await.unwrap();

    assert!(result.errors.is_empty());
    assert_eq!(result.state(), DataState::Stale);
    assert_eq!(result.warnings().count(), 2);
    assert_eq!(result.succeeded.len(), 4);
    assert!(result
      .partitions
      .iter()
      .all(|p| p.origin == Origin::StaleFallback));
  }

  #[tokio::test]
  async fn test_caller_errors() {
    let gateway = FakeGateway::new(flaky_upstream);
    let repo = repository(&gateway, MemoryStore::new());
    let build = |league: &u32| LiveQuery {
      league: Some(*league),
    };

    let empty = fetch_many(&repo, Vec::<u32>::new(), build).await;
    assert!(matches!(empty, Err(Error::InvalidRequest(_))));

    let duplicate = fetch_many(&repo, vec![1u32, 3, 1], build).await;
    assert!(matches!(duplicate, Err(Error::InvalidRequest(_))));
    assert_eq!(gateway.calls(), 0);
  }
}
