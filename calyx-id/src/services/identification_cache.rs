//! Content-addressed identification cache
//!
//! Best effort in both directions: lookup errors read as a miss and write
//! errors are logged and dropped. Expiry is evaluated at query time; rows are
//! never deleted.

use calyx_common::db::{
    CachedIdentification, IdentificationCacheEntry, IdentificationMethod, TraitSet,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::CacheStore;

/// Default entry lifetime
pub const DEFAULT_TTL_DAYS: i64 = 7;

/// Result to remember for an image
#[derive(Debug, Clone)]
pub struct NewCacheEntry {
    /// Pre-assigned row id, returned to clients for feedback
    pub id: Uuid,
    pub image_hash: String,
    pub species_id: Uuid,
    pub confidence: f64,
    pub traits: TraitSet,
    pub method: IdentificationMethod,
}

pub struct IdentificationCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl IdentificationCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl_days: i64) -> Self {
        Self {
            store,
            ttl: Duration::days(ttl_days.max(0)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn lookup(&self, image_hash: &str) -> Option<CachedIdentification> {
        self.lookup_at(image_hash, Utc::now()).await
    }

    /// Valid entry for `image_hash` at `now`, if any
    pub async fn lookup_at(&self, image_hash: &str, now: DateTime<Utc>) -> Option<CachedIdentification> {
        match self.store.find_valid(image_hash, now).await {
            Ok(Some(hit)) => {
                debug!(cache_id = %hit.entry.id, "Identification cache hit");
                Some(hit)
            }
            Ok(None) => {
                debug!(image_hash, "Identification cache miss");
                None
            }
            Err(e) => {
                warn!(error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Count one reuse of `cache_id`
    pub async fn record_hit(&self, cache_id: Uuid) {
        if let Err(e) = self.store.increment_hit_count(cache_id).await {
            warn!(%cache_id, error = %e, "Failed to record cache hit");
        }
    }

    pub async fn write(&self, entry: NewCacheEntry) {
        self.write_at(entry, Utc::now()).await
    }

    /// Store `entry` with `expires_at = now + ttl`; failures are logged only
    pub async fn write_at(&self, entry: NewCacheEntry, now: DateTime<Utc>) {
        let row = IdentificationCacheEntry {
            id: entry.id,
            image_hash: entry.image_hash,
            species_id: entry.species_id,
            confidence: entry.confidence,
            traits_extracted: entry.traits,
            method: entry.method,
            hit_count: 0,
            expires_at: now + self.ttl,
            created_at: now,
        };

        if let Err(e) = self.store.insert_entry(&row).await {
            warn!(cache_id = %row.id, error = %e, "Failed to write identification cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use calyx_common::db::SpeciesSummary;
    use calyx_common::{Error, Result};
    use std::sync::Mutex;

    /// Vec-backed cache store with switchable failure
    #[derive(Default)]
    struct MemoryCache {
        rows: Mutex<Vec<IdentificationCacheEntry>>,
        broken: bool,
    }

    fn species_for(id: Uuid) -> SpeciesSummary {
        SpeciesSummary {
            id,
            scientific_name: "Rosa canina".to_string(),
            common_names: vec!["Dog rose".to_string()],
            family: Some("Rosaceae".to_string()),
            primary_image_url: None,
            thumbnail_url: None,
            traits: TraitSet::default(),
            native_region: Vec::new(),
            bloom_season: Vec::new(),
            search_count: 0,
            created_at: None,
        }
    }

    #[async_trait]
    impl CacheStore for MemoryCache {
        async fn find_valid(&self, image_hash: &str, now: DateTime<Utc>) -> Result<Option<CachedIdentification>> {
            if self.broken {
                return Err(Error::Internal("offline".to_string()));
            }
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .filter(|r| r.image_hash == image_hash && r.expires_at > now)
                .max_by_key(|r| r.created_at)
                .map(|r| CachedIdentification {
                    entry: r.clone(),
                    species: species_for(r.species_id),
                }))
        }

        async fn insert_entry(&self, entry: &IdentificationCacheEntry) -> Result<()> {
            if self.broken {
                return Err(Error::Internal("offline".to_string()));
            }
            self.rows.lock().unwrap().push(entry.clone());
            Ok(())
        }

        async fn increment_hit_count(&self, id: Uuid) -> Result<()> {
            if self.broken {
                return Err(Error::Internal("offline".to_string()));
            }
            for row in self.rows.lock().unwrap().iter_mut().filter(|r| r.id == id) {
                row.hit_count += 1;
            }
            Ok(())
        }

        async fn usage_totals(&self) -> Result<(i64, i64)> {
            let rows = self.rows.lock().unwrap();
            Ok((rows.len() as i64, rows.iter().map(|r| r.hit_count).sum()))
        }
    }

    fn entry(hash: &str) -> NewCacheEntry {
        NewCacheEntry {
            id: Uuid::new_v4(),
            image_hash: hash.to_string(),
            species_id: Uuid::new_v4(),
            confidence: 0.85,
            traits: TraitSet::default(),
            method: IdentificationMethod::TraitElimination,
        }
    }

    #[tokio::test]
    async fn test_write_then_lookup() {
        let cache = IdentificationCache::new(Arc::new(MemoryCache::default()), 7);
        let hash = "a".repeat(64);
        let now = Utc::now();

        cache.write_at(entry(&hash), now).await;
        let hit = cache.lookup_at(&hash, now).await.unwrap();

        assert_eq!(hit.entry.hit_count, 0);
        assert_eq!(hit.entry.expires_at, now + Duration::days(7));
        assert_eq!(hit.entry.method, IdentificationMethod::TraitElimination);
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent() {
        let cache = IdentificationCache::new(Arc::new(MemoryCache::default()), 7);
        let hash = "b".repeat(64);
        let written = Utc::now();

        cache.write_at(entry(&hash), written).await;

        let just_before = written + Duration::days(7) - Duration::seconds(1);
        assert!(cache.lookup_at(&hash, just_before).await.is_some());

        let at_expiry = written + Duration::days(7);
        assert!(cache.lookup_at(&hash, at_expiry).await.is_none());
    }

    #[tokio::test]
    async fn test_record_hit_increments_by_one() {
        let store = Arc::new(MemoryCache::default());
        let cache = IdentificationCache::new(store.clone(), 7);
        let hash = "c".repeat(64);
        let new_entry = entry(&hash);
        let id = new_entry.id;

        cache.write(new_entry).await;
        cache.record_hit(id).await;
        cache.record_hit(id).await;

        assert_eq!(cache.lookup(&hash).await.unwrap().entry.hit_count, 2);
    }

    #[tokio::test]
    async fn test_duplicate_rows_newest_wins() {
        let cache = IdentificationCache::new(Arc::new(MemoryCache::default()), 7);
        let hash = "d".repeat(64);
        let now = Utc::now();

        let older = entry(&hash);
        let newer = entry(&hash);
        let newer_id = newer.id;
        cache.write_at(older, now - Duration::seconds(5)).await;
        cache.write_at(newer, now).await;

        assert_eq!(cache.lookup_at(&hash, now).await.unwrap().entry.id, newer_id);
    }

    #[tokio::test]
    async fn test_store_errors_are_swallowed() {
        let cache = IdentificationCache::new(
            Arc::new(MemoryCache {
                broken: true,
                ..Default::default()
            }),
            7,
        );
        let hash = "e".repeat(64);

        cache.write(entry(&hash)).await;
        cache.record_hit(Uuid::new_v4()).await;
        assert!(cache.lookup(&hash).await.is_none());
    }
}
