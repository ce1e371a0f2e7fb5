/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::IpAddr;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Days, TimeDelta, Utc};
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509, X509Builder, X509Name, X509Ref};

const CLOCK_SKEW_MINUTES: i64 = 5;
const VALIDITY_DAYS: u64 = 365;

fn new_rsa(bits: u32) -> anyhow::Result<PKey<Private>> {
    let rsa_key =
        Rsa::generate(bits).map_err(|e| anyhow!("failed to generate rsa {bits} keypair: {e}"))?;
    PKey::from_rsa(rsa_key).map_err(|e| anyhow!("failed to convert rsa key to pkey: {e}"))
}

fn random_serial() -> anyhow::Result<Asn1Integer> {
    let mut bn = BigNum::new().map_err(|e| anyhow!("failed to create big num: {e}"))?;
    bn.rand(128, MsbOption::ONE, true)
        .map_err(|e| anyhow!("failed to generate random big num: {e}"))?;
    bn.to_asn1_integer()
        .map_err(|e| anyhow!("failed to convert bn to asn1 integer: {e}"))
}

fn common_name(cn: &str) -> anyhow::Result<X509Name> {
    let mut builder = X509Name::builder()
        .map_err(|e| anyhow!("failed to create x509 subject name builder: {e}"))?;
    builder
        .append_entry_by_nid(Nid::COMMONNAME, cn)
        .map_err(|e| anyhow!("failed to set common name to {cn}: {e}"))?;
    Ok(builder.build())
}

fn asn1_time(datetime: &DateTime<Utc>) -> anyhow::Result<Asn1Time> {
    Asn1Time::from_unix(datetime.timestamp() as _)
        .map_err(|e| anyhow!("failed to get asn1 time: {e}"))
}

/// The shared `[now - 5min, now + 365d]` window of both certificates.
pub(super) struct ValidityWindow {
    not_before: Asn1Time,
    not_after: Asn1Time,
}

impl ValidityWindow {
    pub(super) fn from_now() -> anyhow::Result<Self> {
        ValidityWindow::starting_at(Utc::now())
    }

    fn starting_at(now: DateTime<Utc>) -> anyhow::Result<Self> {
        let time_before = now
            .checked_sub_signed(TimeDelta::minutes(CLOCK_SKEW_MINUTES))
            .ok_or(anyhow!("unable to get time before date"))?;
        let time_after = now
            .checked_add_days(Days::new(VALIDITY_DAYS))
            .ok_or(anyhow!("unable to get time after date"))?;
        Ok(ValidityWindow {
            not_before: asn1_time(&time_before).context("failed to get NotBefore time")?,
            not_after: asn1_time(&time_after).context("failed to get NotAfter time")?,
        })
    }

    fn apply(&self, builder: &mut X509Builder) -> anyhow::Result<()> {
        builder
            .set_not_before(&self.not_before)
            .map_err(|e| anyhow!("failed to set NotBefore: {e}"))?;
        builder
            .set_not_after(&self.not_after)
            .map_err(|e| anyhow!("failed to set NotAfter: {e}"))
    }
}

fn new_x509_builder(pkey: &PKey<Private>, serial: &Asn1Integer) -> anyhow::Result<X509Builder> {
    let mut builder =
        X509Builder::new().map_err(|e| anyhow!("failed to create x509 builder {e}"))?;
    builder
        .set_version(2)
        .map_err(|e| anyhow!("failed to set x509 version 3: {e}"))?;
    builder
        .set_pubkey(pkey)
        .map_err(|e| anyhow!("failed to set pub key: {e}"))?;
    builder
        .set_serial_number(serial)
        .map_err(|e| anyhow!("failed to set serial number: {e}"))?;
    Ok(builder)
}

pub(super) struct CaCertBuilder {
    pkey: PKey<Private>,
    serial: Asn1Integer,
    common_name: String,
}

impl CaCertBuilder {
    pub(super) fn new_rsa(bits: u32, common_name: &str) -> anyhow::Result<Self> {
        Ok(CaCertBuilder {
            pkey: new_rsa(bits).context("failed to generate ca key")?,
            serial: random_serial()?,
            common_name: common_name.to_string(),
        })
    }

    pub(super) fn into_pkey(self) -> PKey<Private> {
        self.pkey
    }

    pub(super) fn build(&self, validity: &ValidityWindow) -> anyhow::Result<X509> {
        let mut builder = new_x509_builder(&self.pkey, &self.serial)?;
        validity.apply(&mut builder)?;

        let basic_constraints = BasicConstraints::new()
            .critical()
            .ca()
            .build()
            .map_err(|e| anyhow!("failed to build BasicConstraints extension: {e}"))?;
        builder
            .append_extension(basic_constraints)
            .map_err(|e| anyhow!("failed to append BasicConstraints extension: {e}"))?;
        let key_usage = KeyUsage::new()
            .critical()
            .key_cert_sign()
            .crl_sign()
            .build()
            .map_err(|e| anyhow!("failed to build KeyUsage extension: {e}"))?;
        builder
            .append_extension(key_usage)
            .map_err(|e| anyhow!("failed to append KeyUsage extension: {e}"))?;

        let subject_name = common_name(&self.common_name)?;
        builder
            .set_subject_name(&subject_name)
            .map_err(|e| anyhow!("failed to set subject name: {e}"))?;
        builder
            .set_issuer_name(&subject_name)
            .map_err(|e| anyhow!("failed to set issuer name: {e}"))?;

        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(None, None))
            .map_err(|e| anyhow!("failed to build SubjectKeyIdentifier extension: {e}"))?;
        builder
            .append_extension(ski)
            .map_err(|e| anyhow!("failed to append SubjectKeyIdentifier extension: {e}"))?;

        builder
            .sign(&self.pkey, MessageDigest::sha256())
            .map_err(|e| anyhow!("failed to sign ca certificate: {e}"))?;
        Ok(builder.build())
    }
}

pub(super) struct LeafCertBuilder {
    pkey: PKey<Private>,
    serial: Asn1Integer,
    common_name: String,
    dns_names: Vec<String>,
    ip_addresses: Vec<IpAddr>,
}

impl LeafCertBuilder {
    pub(super) fn new_rsa(bits: u32, common_name: &str) -> anyhow::Result<Self> {
        Ok(LeafCertBuilder {
            pkey: new_rsa(bits).context("failed to generate server key")?,
            serial: random_serial()?,
            common_name: common_name.to_string(),
            dns_names: Vec::new(),
            ip_addresses: Vec::new(),
        })
    }

    pub(super) fn set_dns_names(&mut self, names: &[String]) {
        self.dns_names = names.to_vec();
    }

    pub(super) fn set_ip_addresses(&mut self, ips: &[IpAddr]) {
        self.ip_addresses = ips.to_vec();
    }

    pub(super) fn into_pkey(self) -> PKey<Private> {
        self.pkey
    }

    pub(super) fn build(
        &self,
        validity: &ValidityWindow,
        ca_cert: &X509Ref,
        ca_key: &PKey<Private>,
    ) -> anyhow::Result<X509> {
        if self.dns_names.is_empty() && self.ip_addresses.is_empty() {
            return Err(anyhow!("no subject alternative name set"));
        }

        let mut builder = new_x509_builder(&self.pkey, &self.serial)?;
        validity.apply(&mut builder)?;

        let basic_constraints = BasicConstraints::new()
            .critical()
            .build()
            .map_err(|e| anyhow!("failed to build BasicConstraints extension: {e}"))?;
        builder
            .append_extension(basic_constraints)
            .map_err(|e| anyhow!("failed to append BasicConstraints extension: {e}"))?;
        let key_usage = KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .build()
            .map_err(|e| anyhow!("failed to build KeyUsage extension: {e}"))?;
        builder
            .append_extension(key_usage)
            .map_err(|e| anyhow!("failed to append KeyUsage extension: {e}"))?;
        let ext_key_usage = ExtendedKeyUsage::new()
            .server_auth()
            .build()
            .map_err(|e| anyhow!("failed to build ExtendedKeyUsage extension: {e}"))?;
        builder
            .append_extension(ext_key_usage)
            .map_err(|e| anyhow!("failed to append ExtendedKeyUsage extension: {e}"))?;

        let subject_name = common_name(&self.common_name)?;
        builder
            .set_subject_name(&subject_name)
            .map_err(|e| anyhow!("failed to set subject name: {e}"))?;
        builder
            .set_issuer_name(ca_cert.subject_name())
            .map_err(|e| anyhow!("failed to set issuer name: {e}"))?;

        let v3_ctx = builder.x509v3_context(Some(ca_cert), None);
        let mut san = SubjectAlternativeName::new();
        for name in &self.dns_names {
            san.dns(name);
        }
        for ip in &self.ip_addresses {
            san.ip(&ip.to_string());
        }
        let san = san
            .build(&v3_ctx)
            .map_err(|e| anyhow!("failed to build SubjectAlternativeName extension: {e}"))?;
        let ski = SubjectKeyIdentifier::new()
            .build(&v3_ctx)
            .map_err(|e| anyhow!("failed to build SubjectKeyIdentifier extension: {e}"))?;
        let aki = AuthorityKeyIdentifier::new()
            .keyid(false)
            .build(&v3_ctx)
            .map_err(|e| anyhow!("failed to build AuthorityKeyIdentifier extension: {e}"))?;
        for (ext, name) in [
            (san, "SubjectAlternativeName"),
            (ski, "SubjectKeyIdentifier"),
            (aki, "AuthorityKeyIdentifier"),
        ] {
            builder
                .append_extension(ext)
                .map_err(|e| anyhow!("failed to append {name} extension: {e}"))?;
        }

        builder
            .sign(ca_key, MessageDigest::sha256())
            .map_err(|e| anyhow!("failed to sign server certificate: {e}"))?;
        Ok(builder.build())
    }
}
