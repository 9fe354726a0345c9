//! SQLite-backed POI cache: single slot, time-bounded.
//!
//! Schema: one key/value table. The cached POI lives under a single key as
//! a JSON-serialized `CacheEntry`. Anything that fails to read or decode is
//! a miss, never an error.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use serde::{Deserialize, Serialize};

use compass_core::{CompassError, Poi};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Key holding the cached POI.
const CACHE_KEY: &str = "poi_cache";

/// Freshness window used when none is configured.
pub const DEFAULT_TTL_MS: u64 = 300_000;

/// Persisted form of the cached POI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub poi: Poi,
    pub created_at_ms: u64,
}

impl CacheEntry {
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at_ms)
    }

    pub fn is_fresh(&self, now_ms: u64, ttl_ms: u64) -> bool {
        self.age_ms(now_ms) < ttl_ms
    }
}

fn parse_entry(raw: &str) -> Result<CacheEntry, CompassError> {
    serde_json::from_str(raw).map_err(|e| CompassError::CacheCorrupt(e.to_string()))
}

/// Decode a stored entry. Corrupt payloads are a miss.
fn decode_entry(raw: &str) -> Option<CacheEntry> {
    match parse_entry(raw) {
        Ok(entry) => Some(entry),
        Err(e) => {
            tracing::debug!(error = %e, "ignoring cache entry");
            None
        }
    }
}

/// Single-slot POI cache persisted in SQLite.
pub struct PoiCache {
    conn: Connection,
    ttl_ms: u64,
}

impl PoiCache {
    /// Open or create a cache database at the given path.
    pub fn open(path: &str, ttl_ms: u64) -> SqlResult<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            // Ensure parent directory exists
            if let Some(parent) = Path::new(path).parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            Connection::open(path)?
        };

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(PoiCache { conn, ttl_ms })
    }

    /// Open in-memory cache (for testing).
    pub fn open_memory(ttl_ms: u64) -> SqlResult<Self> {
        Self::open(":memory:", ttl_ms)
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    /// Raw stored entry regardless of age. `None` if absent or unreadable.
    pub fn entry(&self) -> Option<CacheEntry> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![CACHE_KEY],
                |r| r.get(0),
            )
            .optional()
            .unwrap_or_else(|e| {
                tracing::debug!(error = %e, "cache read failed");
                None
            });
        raw.as_deref().and_then(decode_entry)
    }

    /// Cached POI if it is younger than the TTL.
    pub fn get(&self, now_ms: u64) -> Option<Poi> {
        self.entry()
            .filter(|entry| entry.is_fresh(now_ms, self.ttl_ms))
            .map(|entry| entry.poi)
    }

    /// Store `poi` as the single cached entry, replacing any previous one.
    pub fn put(&mut self, poi: &Poi, now_ms: u64) -> SqlResult<()> {
        let entry = CacheEntry {
            poi: poi.clone(),
            created_at_ms: now_ms,
        };
        let value = serde_json::to_string(&entry)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![CACHE_KEY, value],
        )?;
        Ok(())
    }

    /// Drop the cached entry. Returns whether one existed.
    pub fn clear(&mut self) -> SqlResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM kv WHERE key = ?1", params![CACHE_KEY])?;
        Ok(removed > 0)
    }

    #[cfg(test)]
    fn put_raw(&mut self, value: &str) {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![CACHE_KEY, value],
            )
            .unwrap();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use compass_core::Coordinate;

    fn sample_poi(id: &str) -> Poi {
        Poi {
            id: id.into(),
            name: "McDonald's".into(),
            location: Coordinate::new(40.001, -75.0),
            locality: "Philadelphia".into(),
        }
    }

    #[test]
    fn test_empty_cache_misses() {
        let cache = PoiCache::open_memory(DEFAULT_TTL_MS).unwrap();
        assert!(cache.get(1_000).is_none());
        assert!(cache.entry().is_none());
    }

    #[test]
    fn test_put_then_get_within_ttl() {
        let mut cache = PoiCache::open_memory(DEFAULT_TTL_MS).unwrap();
        let poi = sample_poi("node/1");
        cache.put(&poi, 1_000_000).unwrap();

        assert_eq!(cache.get(1_000_000), Some(poi.clone()));
        assert_eq!(cache.get(1_000_000 + 299_999), Some(poi));
    }

    #[test]
    fn test_expired_after_ttl() {
        let mut cache = PoiCache::open_memory(DEFAULT_TTL_MS).unwrap();
        cache.put(&sample_poi("node/1"), 1_000_000).unwrap();

        assert!(cache.get(1_000_000 + 300_000).is_none());
        assert!(cache.get(1_000_000 + 301_000).is_none());
        // Stale entry is superseded, not deleted
        assert!(cache.entry().is_some());
    }

    #[test]
    fn test_put_replaces_previous() {
        let mut cache = PoiCache::open_memory(DEFAULT_TTL_MS).unwrap();
        cache.put(&sample_poi("node/1"), 1_000).unwrap();
        cache.put(&sample_poi("node/2"), 2_000).unwrap();

        let entry = cache.entry().unwrap();
        assert_eq!(entry.poi.id, "node/2");
        assert_eq!(entry.created_at_ms, 2_000);
    }

    #[test]
    fn test_corrupt_entry_is_miss() {
        let mut cache = PoiCache::open_memory(DEFAULT_TTL_MS).unwrap();
        cache.put_raw("{not json");
        assert!(cache.get(1_000).is_none());
        assert!(cache.entry().is_none());

        cache.put_raw(r#"{"poi": {"id": 5}, "created_at_ms": "yesterday"}"#);
        assert!(cache.get(1_000).is_none());
        assert!(matches!(
            parse_entry(r#"{"poi": {"id": 5}, "created_at_ms": "yesterday"}"#),
            Err(CompassError::CacheCorrupt(_))
        ));

        // Writing a fresh entry recovers
        cache.put(&sample_poi("node/3"), 1_000).unwrap();
        assert_eq!(cache.get(1_500).unwrap().id, "node/3");
    }

    #[test]
    fn test_clear() {
        let mut cache = PoiCache::open_memory(DEFAULT_TTL_MS).unwrap();
        assert!(!cache.clear().unwrap());
        cache.put(&sample_poi("node/1"), 1_000).unwrap();
        assert!(cache.clear().unwrap());
        assert!(cache.get(1_000).is_none());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db").to_str().unwrap().to_string();

        {
            let mut cache = PoiCache::open(&path, DEFAULT_TTL_MS).unwrap();
            cache.put(&sample_poi("node/42"), 5_000).unwrap();
        }

        let cache = PoiCache::open(&path, DEFAULT_TTL_MS).unwrap();
        assert_eq!(cache.get(6_000).unwrap().id, "node/42");
    }

    #[test]
    fn test_custom_ttl() {
        let mut cache = PoiCache::open_memory(1_000).unwrap();
        cache.put(&sample_poi("node/1"), 0).unwrap();
        assert!(cache.get(999).is_some());
        assert!(cache.get(1_000).is_none());
    }
}
