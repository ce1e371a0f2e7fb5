/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::cache::ArcContextCache;
use crate::config::EdpConfig;

mod defaults;
pub use defaults::DefaultTable;

mod source;
pub use source::{ArcContextSource, ContextSource, HttpContextSource, SourceError};

/// Cache-aside resolver: cache, then context source, then the default table.
///
/// Resolution never fails. Any failure degrades to the default table and the
/// resolved value, including an empty one, is written back to the cache.
pub struct ContextResolver {
    cache: ArcContextCache,
    source: Option<ArcContextSource>,
    defaults: DefaultTable,
    key_prefix: String,
    ttl: Duration,
}

impl ContextResolver {
    pub fn new(
        cache: ArcContextCache,
        source: Option<ArcContextSource>,
        defaults: DefaultTable,
        key_prefix: String,
        ttl: Duration,
    ) -> Self {
        ContextResolver {
            cache,
            source,
            defaults,
            key_prefix,
            ttl,
        }
    }

    pub fn build(config: &EdpConfig) -> anyhow::Result<Self> {
        let source = HttpContextSource::from_config(&config.upstream)?
            .map(|s| Arc::new(s) as ArcContextSource);
        Ok(ContextResolver::new(
            config.cache.build(),
            source,
            DefaultTable::new(config.resolver.defaults.clone()),
            config.resolver.key_prefix.clone(),
            config.resolver.ttl,
        ))
    }

    #[inline]
    pub fn defaults(&self) -> &DefaultTable {
        &self.defaults
    }

    fn cache_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    pub async fn resolve(&self, key: &str) -> String {
        let cache_key = self.cache_key(key);
        match self.cache.get(&cache_key).await {
            Ok(Some(value)) => return value,
            Ok(None) => {}
            Err(e) => warn!("cache read of {cache_key} failed: {e}"),
        }

        let value = match self.lookup_upstream(key).await {
            Some(value) => value,
            None => self.defaults.resolve(key),
        };

        if let Err(e) = self.cache.set_ex(&cache_key, &value, self.ttl).await {
            warn!("cache write of {cache_key} failed: {e}");
        }
        value
    }

    async fn lookup_upstream(&self, key: &str) -> Option<String> {
        let source = self.source.as_ref()?;
        match source.lookup(key).await {
            // no mapping reported by upstream
            Ok(value) if value.is_empty() => None,
            Ok(value) => Some(value),
            Err(e) => {
                debug!("context lookup of {key} failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, ContextCache, MemoryCache};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSource {
        values: HashMap<String, String>,
        calls: AtomicUsize,
    }

    impl CountingSource {
        fn with(values: &[(&str, &str)]) -> Self {
            CountingSource {
                values: values
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl ContextSource for CountingSource {
        async fn lookup(&self, key: &str) -> Result<String, SourceError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.values
                .get(key)
                .cloned()
                .ok_or_else(|| SourceError::Malformed("no value field".to_string()))
        }
    }

    struct BrokenCache;

    #[async_trait]
    impl ContextCache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable("127.0.0.1:6379".to_string()))
        }

        async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("127.0.0.1:6379".to_string()))
        }
    }

    fn defaults() -> DefaultTable {
        [("demo", "dev"), ("prod2", "prod")].into_iter().collect()
    }

    fn resolver(
        cache: ArcContextCache,
        source: Option<Arc<CountingSource>>,
    ) -> ContextResolver {
        ContextResolver::new(
            cache,
            source.map(|s| s as ArcContextSource),
            defaults(),
            "nsenv:".to_string(),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn upstream_value_is_cached() {
        let cache = Arc::new(MemoryCache::new());
        let source = Arc::new(CountingSource::with(&[("demo", "staging")]));
        let resolver = resolver(cache.clone(), Some(source.clone()));

        assert_eq!(resolver.resolve("demo").await, "staging");
        assert_eq!(resolver.resolve("demo").await, "staging");
        assert_eq!(source.calls(), 1);
        assert_eq!(
            cache.get("nsenv:demo").await.unwrap().as_deref(),
            Some("staging")
        );
    }

    #[tokio::test]
    async fn unmapped_is_cached_as_empty() {
        let cache = Arc::new(MemoryCache::new());
        let source = Arc::new(CountingSource::default());
        let resolver = resolver(cache.clone(), Some(source.clone()));

        assert_eq!(resolver.resolve("unknown-ns").await, "");
        assert_eq!(resolver.resolve("unknown-ns").await, "");
        assert_eq!(source.calls(), 1);
        assert_eq!(
            cache.get("nsenv:unknown-ns").await.unwrap(),
            Some(String::new())
        );
    }

    #[tokio::test]
    async fn upstream_empty_uses_defaults() {
        let cache = Arc::new(MemoryCache::new());
        let source = Arc::new(CountingSource::with(&[("demo", "")]));
        let resolver = resolver(cache, Some(source));
        assert_eq!(resolver.resolve("demo").await, "dev");
    }

    #[tokio::test]
    async fn degrade_without_upstream() {
        let resolver = resolver(Arc::new(MemoryCache::new()), None);
        assert_eq!(resolver.resolve("demo").await, "dev");
        assert_eq!(resolver.resolve("prod2").await, "prod");
        assert_eq!(resolver.resolve("unknown-ns").await, "");
    }

    #[tokio::test]
    async fn cache_hit_skips_upstream() {
        let cache = Arc::new(MemoryCache::new());
        cache
            .set_ex("nsenv:demo", "cached", Duration::from_secs(60))
            .await
            .unwrap();
        let source = Arc::new(CountingSource::with(&[("demo", "staging")]));
        let resolver = resolver(cache, Some(source.clone()));

        assert_eq!(resolver.resolve("demo").await, "cached");
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refetch_after_ttl() {
        let cache = Arc::new(MemoryCache::new());
        let source = Arc::new(CountingSource::with(&[("demo", "staging")]));
        let resolver = resolver(cache, Some(source.clone()));

        assert_eq!(resolver.resolve("demo").await, "staging");
        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(resolver.resolve("demo").await, "staging");
        assert_eq!(source.calls(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(resolver.resolve("demo").await, "staging");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn cache_down_is_a_miss() {
        let source = Arc::new(CountingSource::with(&[("demo", "staging")]));
        let resolver = resolver(Arc::new(BrokenCache), Some(source.clone()));

        assert_eq!(resolver.resolve("demo").await, "staging");
        assert_eq!(resolver.resolve("demo").await, "staging");
        assert_eq!(source.calls(), 2);
        assert_eq!(resolver.resolve("prod2").await, "prod");
        assert_eq!(resolver.resolve("unknown-ns").await, "");
    }

    #[tokio::test]
    async fn stalled_redis_degrades_to_defaults() {
        use crate::cache::{RedisCache, RedisCacheConfig};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut streams = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                streams.push(stream);
            }
        });

        let mut config = RedisCacheConfig::new("127.0.0.1", port);
        config.set_connect_timeout(Duration::from_millis(500));
        let resolver = resolver(Arc::new(RedisCache::new(config)), None);

        let values = tokio::time::timeout(
            Duration::from_secs(5),
            futures_util::future::join_all([
                resolver.resolve("demo"),
                resolver.resolve("prod2"),
                resolver.resolve("unknown-ns"),
            ]),
        )
        .await
        .unwrap();
        assert_eq!(values, vec!["dev", "prod", ""]);
    }
}
