/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{CacheError, ContextCache};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

struct Entry {
    value: String,
    expire_at: Instant,
}

#[derive(Default)]
struct Inner {
    map: HashMap<String, Entry>,
    next_purge: Option<Instant>,
}

impl Inner {
    /// Drop all expired entries, at most once per purge interval.
    fn purge_expired(&mut self, now: Instant) {
        if self.next_purge.is_some_and(|t| t > now) {
            return;
        }
        self.map.retain(|_, entry| entry.expire_at > now);
        self.next_purge = Some(now + PURGE_INTERVAL);
    }
}

/// In-process cache, for single instance deployments and tests.
#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<Inner>,
}

impl MemoryCache {
    pub fn new() -> Self {
        MemoryCache::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.map.len()
    }
}

#[async_trait]
impl ContextCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.map.get(key) else {
            return Ok(None);
        };
        if entry.expire_at <= Instant::now() {
            inner.map.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let entry = Entry {
            value: value.to_string(),
            expire_at: now + Duration::from_secs(super::ttl_secs(ttl)),
        };
        let mut inner = self.inner.lock().await;
        inner.purge_expired(now);
        inner.map.insert(key.to_string(), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_missing() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("nsenv:demo").await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_value_is_a_hit() {
        let cache = MemoryCache::new();
        cache
            .set_ex("nsenv:unknown", "", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            cache.get("nsenv:unknown").await.unwrap(),
            Some(String::new())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expire_after_ttl() {
        let cache = MemoryCache::new();
        cache
            .set_ex("nsenv:demo", "dev", Duration::from_secs(30))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(
            cache.get("nsenv:demo").await.unwrap().as_deref(),
            Some("dev")
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("nsenv:demo").await.unwrap(), None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_resets_expiry() {
        let cache = MemoryCache::new();
        cache
            .set_ex("nsenv:demo", "dev", Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        cache
            .set_ex("nsenv:demo", "dev", Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(
            cache.get("nsenv:demo").await.unwrap().as_deref(),
            Some("dev")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sub_second_ttl_rounds_up() {
        let cache = MemoryCache::new();
        cache
            .set_ex("nsenv:demo", "dev", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(cache.get("nsenv:demo").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_purged_on_write() {
        let cache = MemoryCache::new();
        for i in 0..10000 {
            cache
                .set_ex(&format!("nsenv:ns-{i}"), "dev", Duration::from_secs(1))
                .await
                .unwrap();
        }
        assert_eq!(cache.len().await, 10000);

        tokio::time::advance(Duration::from_secs(3600)).await;
        cache
            .set_ex("nsenv:demo", "dev", Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_keeps_live_entries() {
        let cache = MemoryCache::new();
        cache
            .set_ex("nsenv:short", "dev", Duration::from_secs(10))
            .await
            .unwrap();
        cache
            .set_ex("nsenv:long", "prod", Duration::from_secs(600))
            .await
            .unwrap();

        tokio::time::advance(PURGE_INTERVAL).await;
        cache
            .set_ex("nsenv:demo", "dev", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(cache.len().await, 2);
        assert_eq!(
            cache.get("nsenv:long").await.unwrap().as_deref(),
            Some("prod")
        );
    }
}
