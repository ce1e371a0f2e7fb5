/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use yaml_rust::Yaml;

use super::yaml;

const DEFAULT_BUNDLE_DIR: &str = "/etc/external-data/tls";
const MIN_RSA_BITS: u32 = 2048;

const DEFAULT_DNS_NAMES: &[&str] = &[
    "external-data",
    "external-data.provider-system",
    "external-data.provider-system.svc",
    "external-data.provider-system.svc.cluster.local",
    "host.docker.internal",
    "host.minikube.internal",
    "localhost",
];

/// Identity and location settings for the TLS trust material.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrustConfig {
    pub bundle_dir: PathBuf,
    pub ca_cert_file: String,
    pub cert_file: String,
    pub key_file: String,
    pub regenerate_on_partial: bool,
    pub ca_common_name: String,
    pub common_name: String,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub rsa_bits: u32,
}

impl Default for TrustConfig {
    fn default() -> Self {
        TrustConfig {
            bundle_dir: PathBuf::from(DEFAULT_BUNDLE_DIR),
            ca_cert_file: "ca.crt".to_string(),
            cert_file: "tls.crt".to_string(),
            key_file: "tls.key".to_string(),
            regenerate_on_partial: false,
            ca_common_name: "EDP Local CA".to_string(),
            common_name: "external-data.provider-system.svc".to_string(),
            dns_names: DEFAULT_DNS_NAMES.iter().map(|s| s.to_string()).collect(),
            ip_addresses: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
            rsa_bits: MIN_RSA_BITS,
        }
    }
}

impl TrustConfig {
    pub fn ca_cert_path(&self) -> PathBuf {
        self.bundle_dir.join(&self.ca_cert_file)
    }

    pub fn cert_path(&self) -> PathBuf {
        self.bundle_dir.join(&self.cert_file)
    }

    pub fn key_path(&self) -> PathBuf {
        self.bundle_dir.join(&self.key_file)
    }

    pub fn with_bundle_dir(&self, dir: &Path) -> Self {
        let mut config = self.clone();
        config.bundle_dir = dir.to_path_buf();
        config
    }

    pub(super) fn set_by_yaml_kv(&mut self, k: &str, v: &Yaml) -> anyhow::Result<()> {
        match yaml::normalize_key(k).as_str() {
            "bundle_dir" | "mount_path" => {
                self.bundle_dir = PathBuf::from(yaml::as_string(v)?);
                Ok(())
            }
            "ca_cert_file" | "ca_certificate_file" => {
                self.ca_cert_file = yaml::as_string(v)?;
                Ok(())
            }
            "cert_file" | "certificate_file" => {
                self.cert_file = yaml::as_string(v)?;
                Ok(())
            }
            "key_file" | "private_key_file" => {
                self.key_file = yaml::as_string(v)?;
                Ok(())
            }
            "regenerate_on_partial" => {
                self.regenerate_on_partial = yaml::as_bool(v)?;
                Ok(())
            }
            "ca_common_name" => {
                self.ca_common_name = yaml::as_string(v)?;
                Ok(())
            }
            "common_name" => {
                self.common_name = yaml::as_string(v)?;
                Ok(())
            }
            "dns_names" | "dns_name" => {
                self.dns_names = yaml::as_list(v, yaml::as_string)
                    .context(format!("invalid string list value for key {k}"))?;
                Ok(())
            }
            "ip_addresses" | "ip_address" => {
                self.ip_addresses = yaml::as_list(v, yaml::as_ip_addr)
                    .context(format!("invalid ip address list value for key {k}"))?;
                Ok(())
            }
            "rsa_bits" => {
                let bits = yaml::as_u32(v)?;
                if bits < MIN_RSA_BITS {
                    return Err(anyhow!("rsa bits should be at least {MIN_RSA_BITS}"));
                }
                self.rsa_bits = bits;
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k}")),
        }
    }

    pub(super) fn check(&self) -> anyhow::Result<()> {
        if self.dns_names.is_empty() && self.ip_addresses.is_empty() {
            return Err(anyhow!("no subject alternative name set"));
        }
        if self.common_name.is_empty() || self.ca_common_name.is_empty() {
            return Err(anyhow!("empty common name is not allowed"));
        }
        Ok(())
    }
}
