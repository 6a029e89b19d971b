//! Cache store trait with SQLite and in-memory implementations.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, Transaction};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use super::traits::{Cacheable, CachedRecord, Partition, PartitionFilter};

/// Trait for cache storage backends.
///
/// Upserts are atomic per record; concurrent writers to distinct keys need no
/// coordination beyond what the backend provides.
pub trait CacheStore: Send + Sync {
  /// Get a single record by key.
  fn get<T: Cacheable>(&self, key: &str) -> Result<Option<CachedRecord<T>>>;

  /// Get every record of `T` matching the partition filter, in stored order.
  fn get_by_filter<T: Cacheable>(&self, filter: &PartitionFilter) -> Result<Vec<CachedRecord<T>>>;

  /// Insert or overwrite records by key.
  fn upsert_batch<T: Cacheable>(&self, records: &[CachedRecord<T>]) -> Result<()>;

  /// Delete every record of `T` matching the filter, then insert `records`.
  fn replace_partition<T: Cacheable>(
    &self,
    filter: &PartitionFilter,
    records: &[CachedRecord<T>],
  ) -> Result<()>;

  /// Drop everything. Returns the number of records removed.
  fn clear(&self) -> Result<usize>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private database that lives as long as the store.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per cached API record (stores serialized JSON)
CREATE TABLE IF NOT EXISTS records (
    entity_type TEXT NOT NULL,
    record_key TEXT NOT NULL,
    league INTEGER,
    season INTEGER,
    day TEXT,
    round TEXT,
    position INTEGER NOT NULL,
    data BLOB NOT NULL,
    last_updated TEXT NOT NULL,
    PRIMARY KEY (entity_type, record_key)
);

CREATE INDEX IF NOT EXISTS idx_records_partition
    ON records(entity_type, league, season, day);
"#;

const FILTER_CLAUSE: &str = "entity_type = ?1
   AND (?2 IS NULL OR league = ?2)
   AND (?3 IS NULL OR season = ?3)
   AND (?4 IS NULL OR day >= ?4)
   AND (?5 IS NULL OR day <= ?5)
   AND (?6 IS NULL OR round = ?6)";

fn format_day(day: Option<NaiveDate>) -> Option<String> {
  day.map(|d| d.format("%Y-%m-%d").to_string())
}

fn insert_records<T: Cacheable>(tx: &Transaction<'_>, records: &[CachedRecord<T>]) -> Result<()> {
  let entity_type = T::entity_type();
  let mut stmt = tx
    .prepare_cached(
      "INSERT OR REPLACE INTO records
         (entity_type, record_key, league, season, day, round, position, data, last_updated)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .map_err(|e| eyre!("Failed to prepare insert: {}", e))?;

  for (position, record) in records.iter().enumerate() {
    let data = serde_json::to_vec(&record.payload)
      .map_err(|e| eyre!("Failed to serialize record {}: {}", record.key, e))?;

    stmt
      .execute(params![
        entity_type,
        record.key,
        record.partition.league,
        record.partition.season,
        format_day(record.partition.day),
        record.partition.round,
        position as i64,
        data,
        record
          .last_updated
          .to_rfc3339_opts(SecondsFormat::Millis, true),
      ])
      .map_err(|e| eyre!("Failed to store record {}: {}", record.key, e))?;
  }

  Ok(())
}

type RawRow = (String, Option<u32>, Option<u16>, Option<String>, Option<String>, Vec<u8>, String);

fn decode_row<T: Cacheable>(raw: RawRow) -> Result<CachedRecord<T>> {
  let (key, league, season, day, round, data, last_updated) = raw;
  let payload: T = serde_json::from_slice(&data)
    .map_err(|e| eyre!("Failed to deserialize record {}: {}", key, e))?;
  let day = day
    .map(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d"))
    .transpose()
    .map_err(|e| eyre!("Failed to parse day of record {}: {}", key, e))?;

  Ok(CachedRecord {
    key,
    partition: Partition {
      league,
      season,
      day,
      round,
    },
    payload,
    last_updated: parse_datetime(&last_updated)?,
  })
}

impl CacheStore for SqliteStore {
  fn get<T: Cacheable>(&self, key: &str) -> Result<Option<CachedRecord<T>>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT record_key, league, season, day, round, data, last_updated FROM records
         WHERE entity_type = ? AND record_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let mut rows = stmt
      .query_map(params![T::entity_type(), key], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query record {}: {}", key, e))?;

    match rows.next() {
      Some(raw) => {
        let raw: RawRow = raw.map_err(|e| eyre!("Failed to read record {}: {}", key, e))?;
        decode_row(raw).map(Some)
      }
      None => Ok(None),
    }
  }

  fn get_by_filter<T: Cacheable>(&self, filter: &PartitionFilter) -> Result<Vec<CachedRecord<T>>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let sql = format!(
      "SELECT record_key, league, season, day, round, data, last_updated FROM records
       WHERE {}
       ORDER BY day, position, record_key",
      FILTER_CLAUSE
    );
    let mut stmt = conn
      .prepare(&sql)
      .map_err(|e| eyre!("Failed to prepare filter query: {}", e))?;

    let raws: Vec<RawRow> = stmt
      .query_map(
        params![
          T::entity_type(),
          filter.league,
          filter.season,
          format_day(filter.from),
          format_day(filter.to),
          filter.round,
        ],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
          ))
        },
      )
      .map_err(|e| eyre!("Failed to query records: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read records: {}", e))?;

    raws.into_iter().map(decode_row::<T>).collect()
  }

  fn upsert_batch<T: Cacheable>(&self, records: &[CachedRecord<T>]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    insert_records(&tx, records)?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn replace_partition<T: Cacheable>(
    &self,
    filter: &PartitionFilter,
    records: &[CachedRecord<T>],
  ) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      &format!("DELETE FROM records WHERE {}", FILTER_CLAUSE),
      params![
        T::entity_type(),
        filter.league,
        filter.season,
        format_day(filter.from),
        format_day(filter.to),
        filter.round,
      ],
    )
    .map_err(|e| eyre!("Failed to delete old partition: {}", e))?;

    insert_records(&tx, records)?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn clear(&self) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM records", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))
  }
}

/// Parse a stored RFC 3339 timestamp.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[derive(Debug, Clone)]
struct StoredRecord {
  partition: Partition,
  position: usize,
  data: Value,
  last_updated: DateTime<Utc>,
}

impl StoredRecord {
  fn decode<T: Cacheable>(&self, key: &str) -> Result<CachedRecord<T>> {
    let payload = serde_json::from_value(self.data.clone())
      .map_err(|e| eyre!("Failed to deserialize record {}: {}", key, e))?;
    Ok(CachedRecord {
      key: key.to_string(),
      partition: self.partition.clone(),
      payload,
      last_updated: self.last_updated,
    })
  }
}

/// In-process cache store, keyed by (entity type, record key).
///
/// Used when no on-disk cache is wanted; nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
  records: RwLock<HashMap<(&'static str, String), StoredRecord>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn insert<T: Cacheable>(
    map: &mut HashMap<(&'static str, String), StoredRecord>,
    records: &[CachedRecord<T>],
  ) -> Result<()> {
    for (position, record) in records.iter().enumerate() {
      let data = serde_json::to_value(&record.payload)
        .map_err(|e| eyre!("Failed to serialize record {}: {}", record.key, e))?;
      map.insert(
        (T::entity_type(), record.key.clone()),
        StoredRecord {
          partition: record.partition.clone(),
          position,
          data,
          last_updated: record.last_updated,
        },
      );
    }
    Ok(())
  }
}

impl CacheStore for MemoryStore {
  fn get<T: Cacheable>(&self, key: &str) -> Result<Option<CachedRecord<T>>> {
    let map = self
      .records
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    map
      .get(&(T::entity_type(), key.to_string()))
      .map(|stored| stored.decode(key))
      .transpose()
  }

  fn get_by_filter<T: Cacheable>(&self, filter: &PartitionFilter) -> Result<Vec<CachedRecord<T>>> {
    let map = self
      .records
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut matching: Vec<(&String, &StoredRecord)> = map
      .iter()
      .filter(|((entity_type, _), stored)| {
        *entity_type == T::entity_type() && filter.matches(&stored.partition)
      })
      .map(|((_, key), stored)| (key, stored))
      .collect();

    // Same order as the SQLite store
    matching.sort_by(|(ka, a), (kb, b)| {
      (a.partition.day, a.position, *ka).cmp(&(b.partition.day, b.position, *kb))
    });

    matching
      .into_iter()
      .map(|(key, stored)| stored.decode(key))
      .collect()
  }

  fn upsert_batch<T: Cacheable>(&self, records: &[CachedRecord<T>]) -> Result<()> {
    let mut map = self
      .records
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Self::insert(&mut map, records)
  }

  fn replace_partition<T: Cacheable>(
    &self,
    filter: &PartitionFilter,
    records: &[CachedRecord<T>],
  ) -> Result<()> {
    let mut map = self
      .records
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    map.retain(|(entity_type, _), stored| {
      *entity_type != T::entity_type() || !filter.matches(&stored.partition)
    });
    Self::insert(&mut map, records)
  }

  fn clear(&self) -> Result<usize> {
    let mut map = self
      .records
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let removed = map.len();
    map.clear();
    Ok(removed)
  }
}
