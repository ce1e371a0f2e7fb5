/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use anyhow::{Context, anyhow};
use yaml_rust::Yaml;

use super::yaml;
use crate::cache::{ArcContextCache, MemoryCache, RedisCache, RedisCacheConfig};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CacheConfig {
    Memory,
    Redis(RedisCacheConfig),
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig::Redis(RedisCacheConfig::default())
    }
}

impl CacheConfig {
    pub fn build(&self) -> ArcContextCache {
        match self {
            CacheConfig::Memory => Arc::new(MemoryCache::new()),
            CacheConfig::Redis(config) => Arc::new(RedisCache::new(config.clone())),
        }
    }

    pub(super) fn parse(v: &Yaml) -> anyhow::Result<Self> {
        match v {
            Yaml::String(s) => match yaml::normalize_key(s).as_str() {
                "memory" | "local" => Ok(CacheConfig::Memory),
                "redis" => Ok(CacheConfig::default()),
                _ => Err(anyhow!("unsupported cache type {s}")),
            },
            Yaml::Hash(map) => {
                let mut config = RedisCacheConfig::default();
                yaml::foreach_kv(map, |k, v| set_redis_by_yaml_kv(&mut config, k, v))?;
                Ok(CacheConfig::Redis(config))
            }
            _ => Err(anyhow!(
                "yaml value type for 'cache' should be 'string' or 'map'"
            )),
        }
    }

    pub(super) fn set_redis_url(&mut self, url: &str) -> anyhow::Result<()> {
        let mut config = match self {
            CacheConfig::Redis(config) => config.clone(),
            CacheConfig::Memory => RedisCacheConfig::default(),
        };
        config.set_url(url)?;
        *self = CacheConfig::Redis(config);
        Ok(())
    }
}

fn set_redis_by_yaml_kv(config: &mut RedisCacheConfig, k: &str, v: &Yaml) -> anyhow::Result<()> {
    match yaml::normalize_key(k).as_str() {
        "addr" | "address" => {
            let addr = yaml::as_string(v)?;
            config
                .set_addr(&addr)
                .context(format!("invalid redis address value for key {k}"))
        }
        "url" => {
            let url = yaml::as_string(v)?;
            config
                .set_url(&url)
                .context(format!("invalid redis url value for key {k}"))
        }
        "db" => {
            let db = yaml::as_i64(v).context(format!("invalid int value for key {k}"))?;
            config.set_db(db);
            Ok(())
        }
        "username" => {
            let username = yaml::as_string(v)?;
            config.set_username(username);
            Ok(())
        }
        "password" => {
            let password = yaml::as_string(v)?;
            config.set_password(password);
            Ok(())
        }
        "connect_timeout" => {
            let timeout = yaml::as_duration(v)
                .context(format!("invalid humanize duration value for key {k}"))?;
            config.set_connect_timeout(timeout);
            Ok(())
        }
        "response_timeout" | "read_timeout" => {
            let timeout = yaml::as_duration(v)
                .context(format!("invalid humanize duration value for key {k}"))?;
            config.set_response_timeout(timeout);
            Ok(())
        }
        "reconnect_interval" => {
            let interval = yaml::as_duration(v)
                .context(format!("invalid humanize duration value for key {k}"))?;
            config.set_reconnect_interval(interval);
            Ok(())
        }
        _ => Err(anyhow!("invalid key {k}")),
    }
}
