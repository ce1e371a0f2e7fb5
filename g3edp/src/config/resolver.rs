/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, anyhow};
use yaml_rust::Yaml;

use super::yaml;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolverConfig {
    pub key_prefix: String,
    pub ttl: Duration,
    pub defaults: BTreeMap<String, String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        let defaults = [
            ("demo", "dev"),
            ("dev", "dev"),
            ("prod", "prod"),
            ("prod2", "prod"),
            ("prod3", "prod"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        ResolverConfig {
            key_prefix: "nsenv:".to_string(),
            ttl: Duration::from_secs(300),
            defaults,
        }
    }
}

impl ResolverConfig {
    pub(super) fn set_by_yaml_kv(&mut self, k: &str, v: &Yaml) -> anyhow::Result<()> {
        match yaml::normalize_key(k).as_str() {
            "key_prefix" | "cache_key_prefix" => {
                self.key_prefix = yaml::as_string(v)?;
                Ok(())
            }
            "ttl" | "cache_ttl" => {
                let ttl = yaml::as_duration(v)
                    .context(format!("invalid humanize duration value for key {k}"))?;
                if ttl.as_secs() == 0 {
                    return Err(anyhow!("cache ttl should be at least 1s"));
                }
                self.ttl = ttl;
                Ok(())
            }
            "defaults" | "default_mapping" => {
                let Yaml::Hash(map) = v else {
                    return Err(anyhow!(
                        "yaml value type for key {k} should be 'map'"
                    ));
                };
                let mut defaults = BTreeMap::new();
                yaml::foreach_kv(map, |key, value| {
                    let value = yaml::as_string(value)?;
                    defaults.insert(key.to_string(), value);
                    Ok(())
                })?;
                self.defaults = defaults;
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k}")),
        }
    }
}
