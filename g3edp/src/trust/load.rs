/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;

use super::{BundleSource, TrustBundle};
use crate::config::TrustConfig;

pub(super) enum BundleFiles {
    Complete,
    Absent,
    Partial { missing: Vec<PathBuf> },
}

impl BundleFiles {
    pub(super) fn probe(config: &TrustConfig) -> Self {
        let paths = [
            config.ca_cert_path(),
            config.cert_path(),
            config.key_path(),
        ];
        let missing: Vec<PathBuf> = paths.into_iter().filter(|p| !p.is_file()).collect();
        match missing.len() {
            0 => BundleFiles::Complete,
            3 => BundleFiles::Absent,
            _ => BundleFiles::Partial { missing },
        }
    }
}

fn read_pem(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).map_err(|e| anyhow!("failed to read {}: {e}", path.display()))
}

fn parse_certificates(pem: &str, path: &Path) -> anyhow::Result<Vec<X509>> {
    let certs = X509::stack_from_pem(pem.as_bytes())
        .map_err(|e| anyhow!("invalid certificate in {}: {e}", path.display()))?;
    if certs.is_empty() {
        return Err(anyhow!("no certificate found in {}", path.display()));
    }
    Ok(certs)
}

fn parse_private_key(pem: &str, path: &Path) -> anyhow::Result<PKey<Private>> {
    PKey::private_key_from_pem(pem.as_bytes())
        .map_err(|e| anyhow!("invalid private key in {}: {e}", path.display()))
}

/// Load a complete bundle, keeping the file contents verbatim.
pub(super) fn load_bundle(config: &TrustConfig) -> anyhow::Result<TrustBundle> {
    let ca_path = config.ca_cert_path();
    let cert_path = config.cert_path();
    let key_path = config.key_path();

    let ca_cert_pem = read_pem(&ca_path)?;
    let leaf_cert_pem = read_pem(&cert_path)?;
    let leaf_key_pem = read_pem(&key_path)?;

    let ca_cert = parse_certificates(&ca_cert_pem, &ca_path)?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no ca certificate loaded"))?;
    let leaf_chain = parse_certificates(&leaf_cert_pem, &cert_path)?;
    let leaf_key = parse_private_key(&leaf_key_pem, &key_path)?;

    let leaf_pubkey = leaf_chain[0]
        .public_key()
        .map_err(|e| anyhow!("failed to get public key of the server certificate: {e}"))?;
    if !leaf_pubkey.public_eq(&leaf_key) {
        return Err(anyhow!(
            "private key {} does not match certificate {}",
            key_path.display(),
            cert_path.display()
        ));
    }

    TrustBundle::new(
        ca_cert,
        leaf_chain,
        leaf_key,
        (ca_cert_pem, leaf_cert_pem, leaf_key_pem),
        BundleSource::Loaded(config.bundle_dir.clone()),
    )
    .context("invalid trust bundle")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_states() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrustConfig::default().with_bundle_dir(dir.path());
        assert!(matches!(BundleFiles::probe(&config), BundleFiles::Absent));

        std::fs::write(config.ca_cert_path(), "ca").unwrap();
        match BundleFiles::probe(&config) {
            BundleFiles::Partial { missing } => {
                assert_eq!(missing, vec![config.cert_path(), config.key_path()]);
            }
            _ => panic!("should be partial"),
        }

        std::fs::write(config.cert_path(), "cert").unwrap();
        std::fs::write(config.key_path(), "key").unwrap();
        assert!(matches!(BundleFiles::probe(&config), BundleFiles::Complete));
    }

    #[test]
    fn load_invalid_pem() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrustConfig::default().with_bundle_dir(dir.path());
        std::fs::write(config.ca_cert_path(), "ca").unwrap();
        std::fs::write(config.cert_path(), "cert").unwrap();
        std::fs::write(config.key_path(), "key").unwrap();
        assert!(load_bundle(&config).is_err());
    }
}
