//! Generic caching layer for upstream data.
//!
//! This module is agnostic of the football domain. It provides:
//! - A key-indexed record store with per-record last-modified timestamps
//! - Partition filters for "all rows of this league/season/day range" lookups
//! - A freshness-gated repository with stale-on-error fallback

mod repository;
mod storage;
mod traits;

pub use repository::Repository;
pub use storage::{CacheStore, MemoryStore, SqliteStore};
pub use traits::{
  Cacheable, DataState, Fetched, Freshness, FreshnessPolicy, Lookup, Origin, Partition,
  PartitionFilter, QuerySpec,
};
