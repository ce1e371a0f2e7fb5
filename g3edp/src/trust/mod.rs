/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::anyhow;
use log::{info, warn};
use openssl::pkey::{PKey, Private};
use openssl::x509::{X509, X509Ref};

use crate::config::TrustConfig;

mod builder;
use builder::{CaCertBuilder, LeafCertBuilder, ValidityWindow};

mod load;
use load::BundleFiles;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BundleSource {
    Generated,
    Loaded(PathBuf),
}

/// CA certificate and server certificate / key used by the TLS listener.
///
/// Created once at startup and never modified afterwards.
pub struct TrustBundle {
    ca_cert: X509,
    leaf_chain: Vec<X509>,
    leaf_key: PKey<Private>,
    ca_cert_pem: String,
    leaf_cert_pem: String,
    leaf_key_pem: String,
    source: BundleSource,
}

impl TrustBundle {
    fn new(
        ca_cert: X509,
        leaf_chain: Vec<X509>,
        leaf_key: PKey<Private>,
        pems: (String, String, String),
        source: BundleSource,
    ) -> anyhow::Result<Self> {
        if leaf_chain.is_empty() {
            return Err(anyhow!("no server certificate set"));
        }
        let (ca_cert_pem, leaf_cert_pem, leaf_key_pem) = pems;
        Ok(TrustBundle {
            ca_cert,
            leaf_chain,
            leaf_key,
            ca_cert_pem,
            leaf_cert_pem,
            leaf_key_pem,
            source,
        })
    }

    /// Generate a new self-signed CA, and a server certificate signed by it.
    pub fn generate(config: &TrustConfig) -> anyhow::Result<Self> {
        let validity = ValidityWindow::from_now()?;

        let ca_builder = CaCertBuilder::new_rsa(config.rsa_bits, &config.ca_common_name)?;
        let ca_cert = ca_builder.build(&validity)?;
        let ca_key = ca_builder.into_pkey();

        let mut leaf_builder = LeafCertBuilder::new_rsa(config.rsa_bits, &config.common_name)?;
        leaf_builder.set_dns_names(&config.dns_names);
        leaf_builder.set_ip_addresses(&config.ip_addresses);
        let leaf_cert = leaf_builder.build(&validity, &ca_cert, &ca_key)?;
        let leaf_key = leaf_builder.into_pkey();

        let ca_cert_pem = cert_to_pem(&ca_cert)?;
        let leaf_cert_pem = cert_to_pem(&leaf_cert)?;
        let leaf_key_pem = leaf_key
            .private_key_to_pem_pkcs8()
            .map_err(|e| anyhow!("failed to encode server private key: {e}"))
            .and_then(|pem| {
                String::from_utf8(pem).map_err(|e| anyhow!("invalid pem encoding: {e}"))
            })?;

        TrustBundle::new(
            ca_cert,
            vec![leaf_cert],
            leaf_key,
            (ca_cert_pem, leaf_cert_pem, leaf_key_pem),
            BundleSource::Generated,
        )
    }

    #[inline]
    pub fn source(&self) -> &BundleSource {
        &self.source
    }

    #[inline]
    pub fn ca_cert(&self) -> &X509Ref {
        &self.ca_cert
    }

    #[inline]
    pub fn leaf_cert(&self) -> &X509Ref {
        &self.leaf_chain[0]
    }

    #[inline]
    pub fn leaf_chain(&self) -> &[X509] {
        &self.leaf_chain
    }

    #[inline]
    pub fn leaf_key(&self) -> &PKey<Private> {
        &self.leaf_key
    }

    #[inline]
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    #[inline]
    pub fn leaf_cert_pem(&self) -> &str {
        &self.leaf_cert_pem
    }

    #[inline]
    pub fn leaf_key_pem(&self) -> &str {
        &self.leaf_key_pem
    }

    /// Write the bundle as `ca.crt`, `tls.crt` and `tls.key` style files.
    pub fn write_to(&self, config: &TrustConfig) -> anyhow::Result<()> {
        std::fs::create_dir_all(&config.bundle_dir).map_err(|e| {
            anyhow!(
                "failed to create directory {}: {e}",
                config.bundle_dir.display()
            )
        })?;
        write_file(&config.ca_cert_path(), &self.ca_cert_pem, false)?;
        write_file(&config.cert_path(), &self.leaf_cert_pem, false)?;
        write_file(&config.key_path(), &self.leaf_key_pem, true)?;
        Ok(())
    }
}

fn cert_to_pem(cert: &X509Ref) -> anyhow::Result<String> {
    let pem = cert
        .to_pem()
        .map_err(|e| anyhow!("failed to encode certificate: {e}"))?;
    String::from_utf8(pem).map_err(|e| anyhow!("invalid pem encoding: {e}"))
}

fn write_file(path: &Path, content: &str, private: bool) -> anyhow::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    if private {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options
        .open(path)
        .map_err(|e| anyhow!("failed to open {} for write: {e}", path.display()))?;
    file.write_all(content.as_bytes())
        .map_err(|e| anyhow!("failed to write to {}: {e}", path.display()))
}

/// Load the pre-provisioned bundle if present, or generate a new one.
///
/// A bundle with some of the files missing is an error unless
/// `regenerate_on_partial` is set in config.
pub fn provision(config: &TrustConfig) -> anyhow::Result<TrustBundle> {
    match BundleFiles::probe(config) {
        BundleFiles::Complete => {
            let bundle = load::load_bundle(config)?;
            info!(
                "loaded pre-provisioned trust bundle from {}",
                config.bundle_dir.display()
            );
            Ok(bundle)
        }
        BundleFiles::Absent => {
            info!(
                "no trust bundle found in {}, will generate a new one",
                config.bundle_dir.display()
            );
            TrustBundle::generate(config)
        }
        BundleFiles::Partial { missing } => {
            let missing = missing
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            if config.regenerate_on_partial {
                warn!("trust bundle is incomplete, missing {missing}, will generate a new one");
                TrustBundle::generate(config)
            } else {
                Err(anyhow!("trust bundle is incomplete, missing {missing}"))
            }
        }
    }
}

/// Holds the CA certificate PEM once provisioning has completed.
#[derive(Clone, Default)]
pub struct CaSlot {
    inner: Arc<OnceLock<String>>,
}

impl CaSlot {
    pub fn new() -> Self {
        CaSlot::default()
    }

    /// Returns false if a certificate has already been published.
    pub fn publish(&self, bundle: &TrustBundle) -> bool {
        self.inner.set(bundle.ca_cert_pem.clone()).is_ok()
    }

    pub fn get(&self) -> Option<&str> {
        self.inner.get().map(|s| s.as_str())
    }
}
