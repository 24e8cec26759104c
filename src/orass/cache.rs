// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU cache in front of an [`OrassSource`].
//!
//! Only single-policy lookups are cached; searches always hit the source.
//! Keys are normalized policy numbers.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;

use super::types::{PolicyRecord, PolicySearch};
use super::{OrassError, OrassSource};
use crate::storage::repository::certificates::normalize_policy_number;
use crate::storage::Page;

struct CacheEntry {
    record: PolicyRecord,
    inserted_at: Instant,
}

pub struct CachedPolicySource {
    inner: Arc<dyn OrassSource>,
    cache: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl CachedPolicySource {
    /// `capacity` of zero is treated as one.
    pub fn new(inner: Arc<dyn OrassSource>, capacity: usize, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
        }
    }

    fn get_cached(&self, key: &str) -> Option<PolicyRecord> {
        let mut cache = self.cache.lock().ok()?;
        if let Some(entry) = cache.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.record.clone());
            }
            cache.pop(key);
        }
        None
    }

    fn put(&self, key: String, record: PolicyRecord) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                key,
                CacheEntry {
                    record,
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    pub fn invalidate(&self, policy_number: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(&normalize_policy_number(policy_number));
        }
    }
}

#[async_trait]
impl OrassSource for CachedPolicySource {
    async fn find_policy(&self, policy_number: &str) -> Result<PolicyRecord, OrassError> {
        let key = normalize_policy_number(policy_number);
        if let Some(record) = self.get_cached(&key) {
            tracing::trace!(policy_number = %key, "ORASS cache hit");
            return Ok(record);
        }

        let record = self.inner.find_policy(&key).await?;
        self.put(key, record.clone());
        Ok(record)
    }

    async fn search_policies(&self, search: &PolicySearch) -> Result<Page<PolicyRecord>, OrassError> {
        self.inner.search_policies(search).await
    }

    async fn ping(&self) -> Result<(), OrassError> {
        self.inner.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeOrass;

    fn source() -> (Arc<FakeOrass>, CachedPolicySource) {
        let fake = Arc::new(FakeOrass::with_policies(vec![FakeOrass::policy("POL-1")]));
        let cached = CachedPolicySource::new(fake.clone(), 10, Duration::from_secs(300));
        (fake, cached)
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let (fake, cached) = source();
        cached.find_policy("POL-1").await.unwrap();
        cached.find_policy(" pol-1 ").await.unwrap();
        assert_eq!(fake.lookups(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let (fake, cached) = source();
        cached.find_policy("POL-1").await.unwrap();
        cached.invalidate("pol-1");
        cached.find_policy("POL-1").await.unwrap();
        assert_eq!(fake.lookups(), 2);
    }

    #[tokio::test]
    async fn expired_entries_are_refetched() {
        let fake = Arc::new(FakeOrass::with_policies(vec![FakeOrass::policy("POL-1")]));
        let cached = CachedPolicySource::new(fake.clone(), 10, Duration::from_millis(1));
        cached.find_policy("POL-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cached.find_policy("POL-1").await.unwrap();
        assert_eq!(fake.lookups(), 2);
    }

    #[tokio::test]
    async fn misses_are_not_cached() {
        let (fake, cached) = source();
        assert!(cached.find_policy("NOPE").await.is_err());
        assert!(cached.find_policy("NOPE").await.is_err());
        assert_eq!(fake.lookups(), 2);
    }
}
