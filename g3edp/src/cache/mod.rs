/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod memory;
pub use memory::MemoryCache;

mod redis;
pub use self::redis::{REDIS_DEFAULT_PORT, RedisCache, RedisCacheConfig};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to resolve {0}: {1}")]
    Resolve(String, std::io::Error),
    #[error("failed to connect to {0}: {1}")]
    Connect(String, std::io::Error),
    #[error("timeout to connect to {0}")]
    ConnectTimeout(String),
    #[error("handshake with {0} failed: {1}")]
    Handshake(String, ::redis::RedisError),
    #[error("server {0} is marked unavailable after a recent failure")]
    Unavailable(String),
    #[error("command failed: {0}")]
    Command(#[from] ::redis::RedisError),
}

/// Key-value store with per entry expiry, shared by all resolvers.
///
/// An empty string is a valid value and must be returned as `Some("")`.
#[async_trait]
pub trait ContextCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
}

pub type ArcContextCache = Arc<dyn ContextCache>;

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}
