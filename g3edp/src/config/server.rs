/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, anyhow};
use yaml_rust::Yaml;

use super::yaml;

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_TLS_PORT: u16 = 8443;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerConfig {
    pub http_listen: SocketAddr,
    pub tls_listen: SocketAddr,
    pub tls_accept_timeout: Duration,
    pub provider_name: String,
    pub request_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            http_listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_HTTP_PORT),
            tls_listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_TLS_PORT),
            tls_accept_timeout: Duration::from_secs(10),
            provider_name: "external-data".to_string(),
            request_timeout: None,
        }
    }
}

impl ServerConfig {
    pub(super) fn set_by_yaml_kv(&mut self, k: &str, v: &Yaml) -> anyhow::Result<()> {
        match yaml::normalize_key(k).as_str() {
            "http_listen" | "listen" => {
                self.http_listen = yaml::as_socket_addr(v)
                    .context(format!("invalid socket address value for key {k}"))?;
                Ok(())
            }
            "tls_listen" => {
                self.tls_listen = yaml::as_socket_addr(v)
                    .context(format!("invalid socket address value for key {k}"))?;
                Ok(())
            }
            "tls_accept_timeout" => {
                self.tls_accept_timeout = yaml::as_duration(v)
                    .context(format!("invalid humanize duration value for key {k}"))?;
                Ok(())
            }
            "provider_name" => {
                self.provider_name = yaml::as_string(v)?;
                Ok(())
            }
            "request_timeout" => {
                let timeout = yaml::as_duration(v)
                    .context(format!("invalid humanize duration value for key {k}"))?;
                self.request_timeout = Some(timeout);
                Ok(())
            }
            _ => Err(anyhow!("invalid key {k}")),
        }
    }

    pub(super) fn set_http_port(&mut self, port: u16) {
        self.http_listen.set_port(port);
    }

    pub(super) fn set_tls_port(&mut self, port: u16) {
        self.tls_listen.set_port(port);
    }
}
