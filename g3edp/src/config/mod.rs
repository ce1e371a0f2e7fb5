/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use yaml_rust::{Yaml, YamlLoader};

pub(crate) mod yaml;

mod cache;
pub use cache::CacheConfig;

mod resolver;
pub use resolver::ResolverConfig;

mod server;
pub use server::ServerConfig;

mod trust;
pub use trust::TrustConfig;

mod upstream;
pub use upstream::UpstreamConfig;

const ENV_HTTP_PORT: &str = "PORT";
const ENV_TLS_PORT: &str = "TLS_PORT";
const ENV_REDIS_URL: &str = "REDIS_URL";
const ENV_CACHE_TTL_SECONDS: &str = "NS_ENV_TTL_SECONDS";
const ENV_DEFAULT_MAPPING_JSON: &str = "NS_ENV_MAP_JSON";
const ENV_UPSTREAM_URL: &str = "CONTEXT_SOURCE_URL";

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EdpConfig {
    pub server: ServerConfig,
    pub trust: TrustConfig,
    pub cache: CacheConfig,
    pub upstream: UpstreamConfig,
    pub resolver: ResolverConfig,
}

/// Load the config file if given, or use the builtin defaults.
///
/// Environment overrides are applied on top in both cases.
pub fn load(config_file: Option<&Path>) -> anyhow::Result<EdpConfig> {
    let mut config = match config_file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| anyhow!("failed to read config file {}: {e}", path.display()))?;
            load_str(&content).context(format!("invalid config file {}", path.display()))?
        }
        None => EdpConfig::default(),
    };
    config
        .apply_env(|name| std::env::var(name).ok())
        .context("invalid environment override")?;
    config.trust.check()?;
    Ok(config)
}

pub fn load_str(content: &str) -> anyhow::Result<EdpConfig> {
    let docs =
        YamlLoader::load_from_str(content).map_err(|e| anyhow!("invalid yaml content: {e}"))?;

    let mut config = EdpConfig::default();
    // allow multiple docs, and treat them as the same
    for (i, doc) in docs.iter().enumerate() {
        match doc {
            Yaml::Hash(map) => config
                .load_doc(map)
                .context(format!("failed to load yaml doc #{i}"))?,
            Yaml::Null => {}
            _ => return Err(anyhow!("yaml doc root should be hash")),
        }
    }
    Ok(config)
}

impl EdpConfig {
    fn load_doc(&mut self, map: &yaml_rust::yaml::Hash) -> anyhow::Result<()> {
        yaml::foreach_kv(map, |k, v| match yaml::normalize_key(k).as_str() {
            "server" => as_section(v, |k, v| self.server.set_by_yaml_kv(k, v)),
            "trust" | "tls" => as_section(v, |k, v| self.trust.set_by_yaml_kv(k, v)),
            "cache" => {
                self.cache = CacheConfig::parse(v)?;
                Ok(())
            }
            "upstream" | "context_source" => {
                as_section(v, |k, v| self.upstream.set_by_yaml_kv(k, v))
            }
            "resolver" => as_section(v, |k, v| self.resolver.set_by_yaml_kv(k, v)),
            _ => Err(anyhow!("invalid key {k} in main conf")),
        })
    }

    fn apply_env<F>(&mut self, get_env: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(s) = get_env(ENV_HTTP_PORT) {
            let port = u16::from_str(&s).map_err(|e| anyhow!("invalid {ENV_HTTP_PORT}: {e}"))?;
            self.server.set_http_port(port);
        }
        if let Some(s) = get_env(ENV_TLS_PORT) {
            let port = u16::from_str(&s).map_err(|e| anyhow!("invalid {ENV_TLS_PORT}: {e}"))?;
            self.server.set_tls_port(port);
        }
        if let Some(s) = get_env(ENV_REDIS_URL) {
            self.cache
                .set_redis_url(&s)
                .context(format!("invalid {ENV_REDIS_URL}"))?;
        }
        if let Some(s) = get_env(ENV_UPSTREAM_URL) {
            self.upstream
                .set_by_yaml_kv("base_url", &Yaml::String(s))
                .context(format!("invalid {ENV_UPSTREAM_URL}"))?;
        }
        if let Some(s) = get_env(ENV_CACHE_TTL_SECONDS) {
            let secs = u64::from_str(&s)
                .map_err(|e| anyhow!("invalid {ENV_CACHE_TTL_SECONDS}: {e}"))?;
            if secs == 0 {
                return Err(anyhow!("{ENV_CACHE_TTL_SECONDS} should be at least 1"));
            }
            self.resolver.ttl = Duration::from_secs(secs);
        }
        if let Some(s) = get_env(ENV_DEFAULT_MAPPING_JSON) {
            let defaults = serde_json::from_str::<BTreeMap<String, String>>(&s)
                .map_err(|e| anyhow!("invalid {ENV_DEFAULT_MAPPING_JSON}: {e}"))?;
            self.resolver.defaults = defaults;
        }
        Ok(())
    }
}

fn as_section<F>(v: &Yaml, f: F) -> anyhow::Result<()>
where
    F: FnMut(&str, &Yaml) -> anyhow::Result<()>,
{
    if let Yaml::Hash(map) = v {
        yaml::foreach_kv(map, f)
    } else {
        Err(anyhow!("yaml value type for this section should be 'map'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RedisCacheConfig;
    use std::collections::HashMap;
    use std::net::{IpAddr, SocketAddr};
    use std::path::PathBuf;

    #[test]
    fn empty_is_default() {
        assert_eq!(load_str("").unwrap(), EdpConfig::default());
        assert_eq!(load_str("---\n").unwrap(), EdpConfig::default());
    }

    #[test]
    fn full_config() {
        let content = r#"
server:
  http_listen: "127.0.0.1:18080"
  tls-listen: 18443
  tls_accept_timeout: 5s
  provider_name: mvp-external-data
  request_timeout: 3s
trust:
  bundle_dir: /run/edp/tls
  regenerate_on_partial: true
  ca_common_name: "EDP Pinned CA"
  dns_names:
    - external-data.provider-system.svc
    - localhost
  ip_addresses: 127.0.0.1
  rsa_bits: 3072
cache: memory
upstream:
  base_url: "http://mcp-server:9200"
  lookup_path: /k8s/ns-env/
  timeout: 1s
resolver:
  key_prefix: "ctx:"
  ttl: 2m
  defaults:
    demo: dev
    prod: prod
"#;
        let config = load_str(content).unwrap();

        assert_eq!(
            config.server.http_listen,
            SocketAddr::from(([127, 0, 0, 1], 18080))
        );
        assert_eq!(config.server.tls_listen.port(), 18443);
        assert_eq!(config.server.tls_accept_timeout, Duration::from_secs(5));
        assert_eq!(config.server.provider_name, "mvp-external-data");
        assert_eq!(config.server.request_timeout, Some(Duration::from_secs(3)));

        assert_eq!(config.trust.bundle_dir, PathBuf::from("/run/edp/tls"));
        assert_eq!(config.trust.key_path(), PathBuf::from("/run/edp/tls/tls.key"));
        assert!(config.trust.regenerate_on_partial);
        assert_eq!(config.trust.ca_common_name, "EDP Pinned CA");
        assert_eq!(config.trust.dns_names.len(), 2);
        assert_eq!(
            config.trust.ip_addresses,
            vec![IpAddr::from([127, 0, 0, 1])]
        );
        assert_eq!(config.trust.rsa_bits, 3072);

        assert_eq!(config.cache, CacheConfig::Memory);

        assert_eq!(
            config.upstream.base_url.as_ref().map(|u| u.as_str()),
            Some("http://mcp-server:9200/")
        );
        assert_eq!(config.upstream.lookup_path, "k8s/ns-env");
        assert_eq!(config.upstream.timeout, Duration::from_secs(1));

        assert_eq!(config.resolver.key_prefix, "ctx:");
        assert_eq!(config.resolver.ttl, Duration::from_secs(120));
        assert_eq!(config.resolver.defaults.len(), 2);
        assert_eq!(config.resolver.defaults.get("demo").unwrap(), "dev");
    }

    #[test]
    fn invalid_config() {
        assert!(load_str("- a\n- b").is_err());
        assert!(load_str("unknown: 1").is_err());
        assert!(load_str("server: 8080").is_err());
        assert!(load_str("server:\n  tls_listen: abc").is_err());
        assert!(load_str("trust:\n  rsa_bits: 1024").is_err());
        assert!(load_str("upstream:\n  base_url: ftp://ctx").is_err());
        assert!(load_str("resolver:\n  ttl: 0").is_err());
        assert!(load_str("resolver:\n  defaults: [demo]").is_err());
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PORT", "9080"),
            ("TLS_PORT", "9443"),
            ("REDIS_URL", "redis://10.0.0.3:6379"),
            ("CONTEXT_SOURCE_URL", "http://mcp-server:9200"),
            ("NS_ENV_TTL_SECONDS", "60"),
            ("NS_ENV_MAP_JSON", r#"{"demo":"dev","prod3":"prod"}"#),
        ]
        .into_iter()
        .collect();

        let mut config = EdpConfig::default();
        config
            .apply_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.http_listen.port(), 9080);
        assert_eq!(config.server.tls_listen.port(), 9443);
        assert_eq!(
            config.cache,
            CacheConfig::Redis(RedisCacheConfig::new("10.0.0.3", 6379))
        );
        assert!(config.upstream.base_url.is_some());
        assert_eq!(config.resolver.ttl, Duration::from_secs(60));
        assert_eq!(config.resolver.defaults.len(), 2);
        assert_eq!(config.resolver.defaults.get("prod3").unwrap(), "prod");
    }

    #[test]
    fn env_overrides_err() {
        for (name, value) in [
            ("PORT", "http"),
            ("TLS_PORT", "70000"),
            ("REDIS_URL", "http://redis"),
            ("NS_ENV_TTL_SECONDS", "0"),
            ("NS_ENV_MAP_JSON", r#"{"demo":1}"#),
        ] {
            let mut config = EdpConfig::default();
            let r = config.apply_env(|n| (n == name).then(|| value.to_string()));
            assert!(r.is_err(), "{name}={value} should be rejected");
        }
    }
}
