use crate::models::{KeyResult, LocationRecord};
use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Cache of resolved rows per location content.
///
/// Only consulted for lookups whose rows depend on attributes alone (see
/// `KeysLookup::cacheable_by_attributes`): two such locations with identical
/// attributes resolve to identical rows under the same snapshot. Entries are
/// keyed by a SHA-256 of the snapshot generation and the canonical attribute
/// JSON; the location id is not part of the key and is re-applied on a hit.
#[derive(Clone)]
pub struct ResolutionCache {
    inner: Cache<String, Arc<Vec<KeyResult>>>,
}

impl ResolutionCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Computes the cache key for a location under a snapshot generation.
    pub fn key(generation: u64, location: &LocationRecord) -> String {
        // BTreeMap serializes in key order, so this is canonical.
        let canonical = serde_json::to_string(&location.attributes).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(generation.to_be_bytes());
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns cached rows relabelled with `location_id`.
    pub async fn get(&self, key: &str, location_id: &str) -> Option<Vec<KeyResult>> {
        let rows = self.inner.get(key).await?;
        Some(
            rows.iter()
                .cloned()
                .map(|mut row| {
                    row.location_id = Some(location_id.to_string());
                    row
                })
                .collect(),
        )
    }

    pub async fn insert(&self, key: String, rows: &[KeyResult]) {
        self.inner.insert(key, Arc::new(rows.to_vec())).await;
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}
