/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use anyhow::{Context, anyhow};
use url::Url;
use yaml_rust::Yaml;

use super::yaml;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpstreamConfig {
    /// Requests to the context source are skipped if not set.
    pub base_url: Option<Url>,
    pub lookup_path: String,
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            base_url: None,
            lookup_path: "context-lookup".to_string(),
            timeout: Duration::from_millis(1500),
        }
    }
}

impl UpstreamConfig {
    pub(super) fn set_by_yaml_kv(&mut self, k: &str, v: &Yaml) -> anyhow::Result<()> {
        match yaml::normalize_key(k).as_str() {
            "base_url" | "url" => {
                let s = yaml::as_string(v)?;
                let url = Url::parse(&s).map_err(|e| anyhow!("invalid url {s}: {e}"))?;
                match url.scheme() {
                    "http" | "https" => {}
                    scheme => return Err(anyhow!("unsupported url scheme {scheme}")),
                }
                self.base_url = Some(url);
                Ok(())
            }
            "lookup_path" => {
                let path = yaml::as_string(v)?;
                self.lookup_path = path.trim_matches('/').to_string();
                Ok(())
            }
            "timeout" => {
                self.timeout = yaml::as_duration(v)
                    .context(format!("invalid humanize duration value for key {k}"))?;
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k}")),
        }
    }
}
