//! Freshness-gated repository: serves fresh cache, otherwise fetches, and
//! falls back to stale cache when the network fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use super::storage::CacheStore;
use super::traits::{
  Cacheable, CachedRecord, Fetched, FreshnessPolicy, Lookup, Partition, PartitionFilter, QuerySpec,
};
use crate::error::{Error, Result};
use crate::remote::{Gateway, RetryingFetcher};

/// The complete answer to a partition filter, as of its `last_updated` time.
///
/// Rows alone can't tell what a filter's answer was: other queries may have
/// cached rows in the same partition, and upstream may have dropped rows since.
/// A filter lookup serves exactly the rows listed here, in upstream order.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueryMarker {
  query: String,
  keys: Vec<String>,
}

impl QueryMarker {
  fn covering<T: Cacheable>(filter: &PartitionFilter, keys: Vec<String>) -> Self {
    Self {
      query: format!("{}:{:?}", T::entity_type(), filter),
      keys,
    }
  }

  fn key_for<T: Cacheable>(filter: &PartitionFilter) -> String {
    Self::covering::<T>(filter, Vec::new()).cache_key()
  }
}

impl Cacheable for QueryMarker {
  fn cache_key(&self) -> String {
    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(self.query.as_bytes());
    hex::encode(hasher.finalize())
  }

  fn partition(&self) -> Partition {
    Partition::default()
  }

  fn entity_type() -> &'static str {
    "query"
  }
}

/// What the cache holds for one lookup, regardless of freshness.
struct CachedAnswer<T> {
  rows: Vec<CachedRecord<T>>,
  /// When the rows were stored as the lookup's complete answer, if they are one
  complete_at: Option<DateTime<Utc>>,
}

impl<T> CachedAnswer<T> {
  fn none() -> Self {
    Self {
      rows: Vec::new(),
      complete_at: None,
    }
  }

  fn is_empty(&self) -> bool {
    self.rows.is_empty() && self.complete_at.is_none()
  }
}

/// Read-through cache in front of the retrying fetcher.
///
/// Cache writes happen only after a successful network fetch.
pub struct Repository<G, S> {
  fetcher: RetryingFetcher<G>,
  store: S,
  freshness: FreshnessPolicy,
}

impl<G: Gateway, S: CacheStore> Repository<G, S> {
  pub fn new(fetcher: RetryingFetcher<G>, store: S) -> Self {
    Self {
      fetcher,
      store,
      freshness: FreshnessPolicy::default(),
    }
  }

  /// Set the freshness windows for cached data.
  pub fn with_freshness(mut self, freshness: FreshnessPolicy) -> Self {
    self.freshness = freshness;
    self
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  /// Fetch the rows answering `query`.
  ///
  /// 1. Cache holds the last complete answer and every row is fresh: return it, no network
  /// 2. Otherwise fetch from network; the result becomes the cached answer
  /// 3. On network failure, serve whatever is cached with a warning
  /// 4. Nothing cached: propagate the classified error
  #[instrument(skip_all, fields(query = %query.describe()))]
  pub async fn fetch<Q: QuerySpec>(&self, query: &Q) -> Result<Fetched<Vec<Q::Row>>> {
    let now = Utc::now();
    let window = self.freshness.window(query.freshness());
    let lookup = query.lookup();

    let cached = self.read_cache::<Q::Row>(&lookup);
    if let Some(complete_at) = cached.complete_at {
      let fresh = |at: DateTime<Utc>| now - at < window;
      if fresh(complete_at) && cached.rows.iter().all(|r| fresh(r.last_updated)) {
        debug!("cache hit ({} rows)", cached.rows.len());
        let oldest = oldest(&cached.rows, complete_at);
        let rows = cached.rows.into_iter().map(|r| r.payload).collect();
        return Ok(Fetched::from_cache(query.refine(rows), oldest));
      }
    }
    debug!("cache miss ({} cached rows)", cached.rows.len());

    let request = query.request();
    match self
      .fetcher
      .fetch(&request, |payload| query.decode(payload))
      .await
    {
      Ok(rows) => {
        if rows.is_empty() && !cached.rows.is_empty() {
          warn!(
            "upstream returned no rows for {}, {} cached rows no longer served",
            request,
            cached.rows.len()
          );
        }
        self.write_cache(query, &lookup, &rows, Utc::now());
        info!("fetched {} rows from network", rows.len());
        Ok(Fetched::from_network(query.refine(rows)))
      }
      Err(err) => {
        // Re-read: a concurrent fetch may have written since the first lookup
        let stale = self.read_cache::<Q::Row>(&lookup);
        if stale.is_empty() {
          warn!("fetch failed with nothing cached: {}", err);
          return Err(err);
        }

        warn!("fetch failed, serving {} stale rows: {}", stale.rows.len(), err);
        let oldest = oldest(&stale.rows, stale.complete_at.unwrap_or(now));
        let rows = stale.rows.into_iter().map(|r| r.payload).collect();
        Ok(Fetched::stale(query.refine(rows), oldest, &err.to_string()))
      }
    }
  }

  /// Fetch a single resource by id.
  pub async fn fetch_one<Q: QuerySpec>(&self, query: &Q) -> Result<Fetched<Q::Row>> {
    let fetched = self.fetch(query).await?;
    let row = fetched
      .data
      .first()
      .cloned()
      .ok_or_else(|| Error::NotFound(query.describe()))?;
    Ok(fetched.map(|_| row))
  }

  /// Cached answer for a lookup, ignoring freshness. Read failures count as a miss.
  ///
  /// A filter with a stored answer yields exactly that answer's rows. Without
  /// one, whatever rows match the filter are returned as an incomplete answer.
  fn read_cache<T: Cacheable>(&self, lookup: &Lookup) -> CachedAnswer<T> {
    let result = match lookup {
      Lookup::Key(key) => self.store.get::<T>(key).map(|record| CachedAnswer {
        complete_at: record.as_ref().map(|r| r.last_updated),
        rows: record.into_iter().collect(),
      }),
      Lookup::Filter(filter) => self.read_filter::<T>(filter),
      Lookup::Uncached => return CachedAnswer::none(),
    };

    result.unwrap_or_else(|e| {
      warn!("cache read failed for {:?}: {}", lookup, e);
      CachedAnswer::none()
    })
  }

  fn read_filter<T: Cacheable>(
    &self,
    filter: &PartitionFilter,
  ) -> color_eyre::Result<CachedAnswer<T>> {
    let Some(marker) = self
      .store
      .get::<QueryMarker>(&QueryMarker::key_for::<T>(filter))?
    else {
      return Ok(CachedAnswer {
        rows: self.store.get_by_filter::<T>(filter)?,
        complete_at: None,
      });
    };

    let mut rows = Vec::with_capacity(marker.payload.keys.len());
    for key in &marker.payload.keys {
      if let Some(record) = self.store.get::<T>(key)? {
        rows.push(record);
      }
    }

    // A row evicted since the answer was stored leaves the answer incomplete
    let complete = rows.len() == marker.payload.keys.len();
    Ok(CachedAnswer {
      rows,
      complete_at: complete.then_some(marker.last_updated),
    })
  }

  fn write_cache<Q: QuerySpec>(
    &self,
    query: &Q,
    lookup: &Lookup,
    rows: &[Q::Row],
    now: DateTime<Utc>,
  ) {
    let records: Vec<CachedRecord<Q::Row>> = rows
      .iter()
      .cloned()
      .map(|row| CachedRecord::new(row, now))
      .collect();

    let result = match lookup {
      Lookup::Filter(filter) if query.replaces_partition() => {
        self.store.replace_partition(filter, &records)
      }
      _ if records.is_empty() => Ok(()),
      _ => self.store.upsert_batch(&records),
    };

    let result = result.and_then(|()| match lookup {
      Lookup::Filter(filter) => {
        let keys = records.iter().map(|r| r.key.clone()).collect();
        let marker = QueryMarker::covering::<Q::Row>(filter, keys);
        self.store.upsert_batch(&[CachedRecord::new(marker, now)])
      }
      _ => Ok(()),
    });

    if let Err(e) = result {
      warn!("cache write failed for {}: {}", query.describe(), e);
    }
  }
}

fn oldest<T>(records: &[CachedRecord<T>], fallback: DateTime<Utc>) -> DateTime<Utc> {
  records
    .iter()
    .map(|r| r.last_updated)
    .chain(std::iter::once(fallback))
    .min()
    .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryStore;
  use crate::cache::traits::{Cacheable, Freshness, Origin, Partition, PartitionFilter};
  use crate::remote::testing::FakeGateway;
  use crate::remote::{ApiRequest, GatewayError, RetryPolicy};
  use serde::{Deserialize, Serialize};
  use serde_json::{json, Value};
  use std::time::Duration;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Score {
    id: u32,
    league: u32,
    team: u32,
  }

  impl Cacheable for Score {
    fn cache_key(&self) -> String {
      self.id.to_string()
    }

    fn partition(&self) -> Partition {
      Partition {
        league: Some(self.league),
        ..Default::default()
      }
    }

    fn entity_type() -> &'static str {
      "score"
    }
  }

  /// All scores of a league, optionally narrowed to one team in memory.
  struct LeagueScores {
    league: u32,
    team: Option<u32>,
    replace: bool,
    class: Freshness,
  }

  impl LeagueScores {
    fn new(league: u32) -> Self {
      Self {
        league,
        team: None,
        replace: false,
        class: Freshness::Static,
      }
    }
  }

  impl QuerySpec for LeagueScores {
    type Row = Score;

    fn describe(&self) -> String {
      format!("scores of league {}", self.league)
    }

    fn request(&self) -> ApiRequest {
      ApiRequest::new("scores").param("league", self.league)
    }

    fn lookup(&self) -> Lookup {
      Lookup::Filter(PartitionFilter {
        league: Some(self.league),
        ..Default::default()
      })
    }

    fn freshness(&self) -> Freshness {
      self.class
    }

    fn decode(&self, payload: Value) -> std::result::Result<Vec<Score>, String> {
      serde_json::from_value(payload).map_err(|e| e.to_string())
    }

    fn refine(&self, rows: Vec<Score>) -> Vec<Score> {
      match self.team {
        Some(team) => rows.into_iter().filter(|s| s.team == team).collect(),
        None => rows,
      }
    }

    fn replaces_partition(&self) -> bool {
      self.replace
    }
  }

  struct OneScore(u32);

  impl QuerySpec for OneScore {
    type Row = Score;

    fn describe(&self) -> String {
      format!("score {}", self.0)
    }

    fn request(&self) -> ApiRequest {
      ApiRequest::new("scores").param("id", self.0)
    }

    fn lookup(&self) -> Lookup {
      Lookup::Key(self.0.to_string())
    }

    fn decode(&self, payload: Value) -> std::result::Result<Vec<Score>, String> {
      serde_json::from_value(payload).map_err(|e| e.to_string())
    }
  }

  fn score(id: u32, league: u32, team: u32) -> Score {
    Score { id, league, team }
  }

  fn aged(row: Score, hours: i64) -> CachedRecord<Score> {
    CachedRecord::new(row, Utc::now() - chrono::Duration::hours(hours))
  }

  /// Record `ids` as the complete answer for a league, stored `hours` ago.
  fn mark(store: &MemoryStore, league: u32, ids: &[u32], hours: i64) {
    let filter = PartitionFilter {
      league: Some(league),
      ..Default::default()
    };
    let keys = ids.iter().map(|id| id.to_string()).collect();
    let marker = QueryMarker::covering::<Score>(&filter, keys);
    store
      .upsert_batch(&[CachedRecord::new(
        marker,
        Utc::now() - chrono::Duration::hours(hours),
      )])
      .unwrap();
  }

  fn repository(gateway: &FakeGateway, store: MemoryStore) -> Repository<FakeGateway, MemoryStore> {
    let policy = RetryPolicy {
      max_retries: 1,
      base_delay: Duration::from_millis(1),
    };
    Repository::new(RetryingFetcher::new(gateway.clone(), policy), store)
  }

  #[tokio::test]
  async fn test_fresh_cache_skips_network() {
    let store = MemoryStore::new();
    store
      .upsert_batch(&[aged(score(1, 39, 10), 1), aged(score(2, 39, 20), 23)])
      .unwrap();
    mark(&store, 39, &[1, 2], 1);
    let gateway = FakeGateway::failing();
    let repo = repository(&gateway, store);

    let fetched = repo.fetch(&LeagueScores::new(39)).await.unwrap();

    assert_eq!(fetched.origin, Origin::Cache);
    assert_eq!(fetched.data.len(), 2);
    assert!(fetched.warning.is_none());
    assert_eq!(gateway.calls(), 0);
  }

  #[tokio::test]
  async fn test_partially_stale_cache_fetches() {
    let store = MemoryStore::new();
    store
      .upsert_batch(&[aged(score(1, 39, 10), 1), aged(score(2, 39, 20), 25)])
      .unwrap();
    mark(&store, 39, &[1, 2], 1);
    let gateway = FakeGateway::new(|_| Ok(json!([{"id": 1, "league": 39, "team": 10}])));
    let repo = repository(&gateway, store);

    let fetched = repo.fetch(&LeagueScores::new(39)).await.unwrap();

    assert_eq!(fetched.origin, Origin::Network);
    assert_eq!(fetched.data, vec![score(1, 39, 10)]);
    assert_eq!(gateway.calls(), 1);
  }

  #[tokio::test]
  async fn test_network_result_is_cached() {
    let gateway = FakeGateway::new(|_| {
      Ok(json!([
        {"id": 1, "league": 39, "team": 10},
        {"id": 2, "league": 39, "team": 20}
      ]))
    });
    let repo = repository(&gateway, MemoryStore::new());

    let first = repo.fetch(&LeagueScores::new(39)).await.unwrap();
    let second = repo.fetch(&LeagueScores::new(39)).await.unwrap();

    assert_eq!(first.origin, Origin::Network);
    assert_eq!(second.origin, Origin::Cache);
    assert_eq!(first.data, second.data);
    assert_eq!(gateway.calls(), 1);
  }

  #[tokio::test]
  async fn test_rows_without_complete_fetch_are_a_miss() {
    let store = MemoryStore::new();
    store.upsert_batch(&[aged(score(1, 39, 10), 1)]).unwrap();
    let gateway = FakeGateway::new(|_| {
      Ok(json!([
        {"id": 1, "league": 39, "team": 10},
        {"id": 2, "league": 39, "team": 20}
      ]))
    });
    let repo = repository(&gateway, store);

    let fetched = repo.fetch(&LeagueScores::new(39)).await.unwrap();

    assert_eq!(fetched.origin, Origin::Network);
    assert_eq!(fetched.data.len(), 2);
  }

  #[tokio::test]
  async fn test_stale_marker_is_a_miss() {
    let store = MemoryStore::new();
    store.upsert_batch(&[aged(score(1, 39, 10), 1)]).unwrap();
    mark(&store, 39, &[1], 30);
    let gateway = FakeGateway::new(|_| Ok(json!([{"id": 1, "league": 39, "team": 10}])));
    let repo = repository(&gateway, store);

    repo.fetch(&LeagueScores::new(39)).await.unwrap();

    assert_eq!(gateway.calls(), 1);
  }

  #[tokio::test]
  async fn test_empty_partition_is_cached() {
    let gateway = FakeGateway::new(|_| Ok(json!([])));
    let repo = repository(&gateway, MemoryStore::new());

    repo.fetch(&LeagueScores::new(39)).await.unwrap();
    let second = repo.fetch(&LeagueScores::new(39)).await.unwrap();

    assert_eq!(second.origin, Origin::Cache);
    assert!(second.data.is_empty());
    assert_eq!(gateway.calls(), 1);
  }

  #[tokio::test]
  async fn test_stale_fallback_on_failure() {
    let store = MemoryStore::new();
    store.upsert_batch(&[aged(score(1, 39, 10), 30)]).unwrap();
    let gateway = FakeGateway::failing();
    let repo = repository(&gateway, store);

    let fetched = repo.fetch(&LeagueScores::new(39)).await.unwrap();

    assert_eq!(fetched.origin, Origin::StaleFallback);
    assert_eq!(fetched.data, vec![score(1, 39, 10)]);
    assert!(fetched
      .warning
      .as_deref()
      .unwrap()
      .starts_with("stale data due to fetch failure"));
    assert_eq!(gateway.calls(), 2);
  }

  #[tokio::test]
  async fn test_failure_without_cache_propagates() {
    let gateway = FakeGateway::new(|_| {
      Err(GatewayError::Status {
        status: 403,
        message: "plan does not cover this league".into(),
      })
    });
    let repo = repository(&gateway, MemoryStore::new());

    let result = repo.fetch(&LeagueScores::new(39)).await;

    assert_eq!(
      result.unwrap_err(),
      Error::Forbidden("plan does not cover this league".into())
    );
  }

  #[tokio::test]
  async fn test_empty_success_wins_over_stale_cache() {
    let store = MemoryStore::new();
    store.upsert_batch(&[aged(score(1, 39, 10), 30)]).unwrap();
    let gateway = FakeGateway::new(|_| Ok(json!([])));
    let repo = repository(&gateway, store);

    let fetched = repo.fetch(&LeagueScores::new(39)).await.unwrap();

    assert_eq!(fetched.origin, Origin::Network);
    assert!(fetched.data.is_empty());
  }

  #[tokio::test]
  async fn test_dropped_rows_stay_dropped_on_failure() {
    let store = MemoryStore::new();
    store.upsert_batch(&[aged(score(1, 39, 10), 30)]).unwrap();
    let gateway = FakeGateway::sequence(vec![
      Ok(json!([])),
      Err(GatewayError::Status {
        status: 500,
        message: "boom".into(),
      }),
    ]);
    // Every answer is out of date as soon as it is stored
    let repo = repository(&gateway, store).with_freshness(FreshnessPolicy {
      static_ttl: Duration::ZERO,
      live_ttl: Duration::ZERO,
    });

    let first = repo.fetch(&LeagueScores::new(39)).await.unwrap();
    let second = repo.fetch(&LeagueScores::new(39)).await.unwrap();

    assert_eq!(first.origin, Origin::Network);
    assert!(first.data.is_empty());
    assert_eq!(second.origin, Origin::StaleFallback);
    assert!(second.data.is_empty());
  }

  #[tokio::test]
  async fn test_cache_hit_matches_last_network_answer() {
    let store = MemoryStore::new();
    // Cached by some other query sharing the partition
    store.upsert_batch(&[aged(score(2, 39, 20), 1)]).unwrap();
    let gateway = FakeGateway::new(|_| Ok(json!([{"id": 1, "league": 39, "team": 10}])));
    let repo = repository(&gateway, store);

    let network = repo.fetch(&LeagueScores::new(39)).await.unwrap();
    let hit = repo.fetch(&LeagueScores::new(39)).await.unwrap();

    assert_eq!(network.origin, Origin::Network);
    assert_eq!(hit.origin, Origin::Cache);
    assert_eq!(hit.data, network.data);
    assert_eq!(hit.data, vec![score(1, 39, 10)]);
    assert_eq!(gateway.calls(), 1);
  }

  #[tokio::test]
  async fn test_evicted_answer_row_is_a_miss() {
    let store = MemoryStore::new();
    store.upsert_batch(&[aged(score(1, 39, 10), 1)]).unwrap();
    mark(&store, 39, &[1, 2], 1);
    let gateway = FakeGateway::new(|_| {
      Ok(json!([
        {"id": 1, "league": 39, "team": 10},
        {"id": 2, "league": 39, "team": 20}
      ]))
    });
    let repo = repository(&gateway, store);

    let fetched = repo.fetch(&LeagueScores::new(39)).await.unwrap();

    assert_eq!(fetched.origin, Origin::Network);
    assert_eq!(fetched.data.len(), 2);
    assert_eq!(gateway.calls(), 1);
  }

  #[tokio::test]
  async fn test_refine_applies_to_cache_and_network() {
    let store = MemoryStore::new();
    store
      .upsert_batch(&[aged(score(1, 39, 10), 1), aged(score(2, 39, 20), 1)])
      .unwrap();
    mark(&store, 39, &[1, 2], 1);
    let gateway = FakeGateway::failing();
    let repo = repository(&gateway, store);

    let query = LeagueScores {
      team: Some(20),
      ..LeagueScores::new(39)
    };
    let fetched = repo.fetch(&query).await.unwrap();

    assert_eq!(fetched.data, vec![score(2, 39, 20)]);
  }

  #[tokio::test]
  async fn test_live_class_uses_short_window() {
    let store = MemoryStore::new();
    store
      .upsert_batch(&[CachedRecord::new(
        score(1, 39, 10),
        Utc::now() - chrono::Duration::seconds(45),
      )])
      .unwrap();
    let gateway = FakeGateway::new(|_| Ok(json!([{"id": 1, "league": 39, "team": 10}])));
    let repo = repository(&gateway, store);

    let live = LeagueScores {
      class: Freshness::Live,
      ..LeagueScores::new(39)
    };
    let fetched = repo.fetch(&live).await.unwrap();

    assert_eq!(fetched.origin, Origin::Network);
    assert_eq!(gateway.calls(), 1);
  }

  #[tokio::test]
  async fn test_replacing_query_evicts_partition() {
    let store = MemoryStore::new();
    store
      .upsert_batch(&[aged(score(1, 39, 10), 30), aged(score(2, 39, 20), 30)])
      .unwrap();
    let gateway = FakeGateway::new(|_| Ok(json!([{"id": 3, "league": 39, "team": 30}])));
    let repo = repository(&gateway, store);

    let query = LeagueScores {
      replace: true,
      ..LeagueScores::new(39)
    };
    repo.fetch(&query).await.unwrap();

    let ids: Vec<u32> = repo
      .store()
      .get_by_filter::<Score>(&PartitionFilter {
        league: Some(39),
        ..Default::default()
      })
      .unwrap()
      .into_iter()
      .map(|r| r.payload.id)
      .collect();
    assert_eq!(ids, vec![3]);
  }

  #[tokio::test]
  async fn test_fetch_one_by_key() {
    let store = MemoryStore::new();
    store.upsert_batch(&[aged(score(7, 39, 10), 2)]).unwrap();
    let gateway = FakeGateway::new(|_| Ok(json!([])));
    let repo = repository(&gateway, store);

    let hit = repo.fetch_one(&OneScore(7)).await.unwrap();
    assert_eq!(hit.data, score(7, 39, 10));
    assert_eq!(hit.origin, Origin::Cache);

    let missing = repo.fetch_one(&OneScore(8)).await;
    assert_eq!(missing.unwrap_err(), Error::NotFound("score 8".into()));
    assert_eq!(gateway.calls(), 1);
  }
}
