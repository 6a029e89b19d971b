//! Core traits and types for the caching system.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::remote::ApiRequest;

/// Trait for rows that can be cached.
///
/// Implementors provide a unique key within their entity type and the
/// partition columns the row is filed under.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Unique identifier for this row (e.g., fixture id)
  fn cache_key(&self) -> String;

  /// Partition columns used by filtered lookups.
  fn partition(&self) -> Partition;

  /// Entity type name for storage organization (e.g., "fixture", "standing")
  fn entity_type() -> &'static str;
}

/// Partition columns of a cached row. Unused columns stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
  pub league: Option<u32>,
  pub season: Option<u16>,
  pub day: Option<NaiveDate>,
  pub round: Option<String>,
}

/// Secondary filter over partition columns.
///
/// Every `Some` field must match. A date range only matches rows that have a day.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionFilter {
  pub league: Option<u32>,
  pub season: Option<u16>,
  pub from: Option<NaiveDate>,
  pub to: Option<NaiveDate>,
  pub round: Option<String>,
}

impl PartitionFilter {
  pub fn matches(&self, partition: &Partition) -> bool {
    fn eq<T: PartialEq>(want: &Option<T>, have: &Option<T>) -> bool {
      want.is_none() || want == have
    }

    let day_ok = match (self.from, self.to) {
      (None, None) => true,
      (from, to) => partition.day.is_some_and(|day| {
        from.is_none_or(|f| day >= f) && to.is_none_or(|t| day <= t)
      }),
    };

    eq(&self.league, &partition.league)
      && eq(&self.season, &partition.season)
      && eq(&self.round, &partition.round)
      && day_ok
  }
}

/// One cached row with its last-modified timestamp.
#[derive(Debug, Clone)]
pub struct CachedRecord<T> {
  pub key: String,
  pub partition: Partition,
  pub payload: T,
  pub last_updated: DateTime<Utc>,
}

impl<T: Cacheable> CachedRecord<T> {
  pub fn new(payload: T, last_updated: DateTime<Utc>) -> Self {
    Self {
      key: payload.cache_key(),
      partition: payload.partition(),
      payload,
      last_updated,
    }
  }
}

/// Freshness class of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  /// Mostly-static resources: fixtures lists, standings, teams
  Static,
  /// In-play data that goes out of date within seconds
  Live,
}

/// Maximum age per freshness class.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
  pub static_ttl: Duration,
  pub live_ttl: Duration,
}

impl Default for FreshnessPolicy {
  fn default() -> Self {
    Self {
      static_ttl: Duration::from_secs(24 * 60 * 60),
      live_ttl: Duration::from_secs(30),
    }
  }
}

impl FreshnessPolicy {
  pub fn window(&self, class: Freshness) -> chrono::Duration {
    let ttl = match class {
      Freshness::Static => self.static_ttl,
      Freshness::Live => self.live_ttl,
    };
    chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX)
  }
}

/// How a query finds its rows in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
  /// Single resource addressed by id
  Key(String),
  /// Every row matching a fully-specified partition filter
  Filter(PartitionFilter),
  /// Not specific enough to be answered from cache
  Uncached,
}

/// Describes one logical fetch: how to find it in cache and how to ask upstream.
pub trait QuerySpec: Send + Sync {
  type Row: Cacheable;

  /// Human-readable description for logs.
  fn describe(&self) -> String;

  /// The upstream request answering this query.
  fn request(&self) -> ApiRequest;

  /// Cache lookup for this query.
  fn lookup(&self) -> Lookup;

  fn freshness(&self) -> Freshness {
    Freshness::Static
  }

  /// Decode the upstream `response` payload into rows.
  fn decode(&self, payload: Value) -> Result<Vec<Self::Row>, String>;

  /// In-memory filters the cache partitions can't express (team, status).
  fn refine(&self, rows: Vec<Self::Row>) -> Vec<Self::Row> {
    rows
  }

  /// Whether a successful fetch replaces the whole partition instead of upserting.
  fn replaces_partition(&self) -> bool {
    false
  }
}

/// Result from a repository fetch, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub origin: Origin,
  /// Oldest `last_updated` of the rows served (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
  /// Non-fatal warning for the presentation layer
  pub warning: Option<String>,
}

impl<T> Fetched<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      origin: Origin::Network,
      cached_at: None,
      warning: None,
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      origin: Origin::Cache,
      cached_at: Some(cached_at),
      warning: None,
    }
  }

  /// Stale rows served because the network fetch failed.
  pub fn stale(data: T, cached_at: DateTime<Utc>, cause: &str) -> Self {
    Self {
      data,
      origin: Origin::StaleFallback,
      cached_at: Some(cached_at),
      warning: Some(format!("stale data due to fetch failure: {}", cause)),
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
    Fetched {
      data: f(self.data),
      origin: self.origin,
      cached_at: self.cached_at,
      warning: self.warning,
    }
  }

  pub fn state(&self) -> DataState {
    match self.origin {
      Origin::StaleFallback => DataState::Stale,
      Origin::Cache | Origin::Network => DataState::Fresh,
    }
  }
}

/// Where fetched data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
  /// Fresh rows straight from the cache
  Cache,
  /// Fresh data from the network
  Network,
  /// Network failed, serving outdated cached rows
  StaleFallback,
}

/// What the presentation layer should tell the user about the data it shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataState {
  Fresh,
  /// Some data may be outdated because upstream failed
  Stale,
  /// Some partitions are missing entirely
  Partial,
}
