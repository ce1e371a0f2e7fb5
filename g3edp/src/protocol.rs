/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use serde::Serialize;
use serde_json::Value;

pub const API_VERSION: &str = "externaldata.gatekeeper.sh/v1beta1";
pub const RESPONSE_KIND: &str = "ProviderResponse";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestKey {
    Name(String),
    /// A non-string entry, kept as its JSON text and never resolved.
    Invalid(String),
}

/// Extract `request.keys` from a lookup request body.
///
/// Bodies that are not JSON, or have no `request.keys` array, yield no keys.
/// Every array entry yields one key, so the response keeps the same length.
pub fn parse_request_keys(body: &[u8]) -> Vec<RequestKey> {
    let Ok(doc) = serde_json::from_slice::<Value>(body) else {
        return Vec::new();
    };
    let Some(Value::Array(keys)) = doc.get("request").and_then(|r| r.get("keys")) else {
        return Vec::new();
    };
    keys.iter()
        .map(|k| match k {
            Value::String(s) => RequestKey::Name(s.clone()),
            v => RequestKey::Invalid(v.to_string()),
        })
        .collect()
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct LookupItem {
    pub key: String,
    pub value: String,
    pub error: String,
}

impl LookupItem {
    pub fn resolved(key: String, value: String) -> Self {
        LookupItem {
            key,
            value,
            error: String::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResult {
    pub idempotent: bool,
    pub items: Vec<LookupItem>,
    pub system_error: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    pub api_version: &'static str,
    pub kind: &'static str,
    pub response: LookupResult,
}

impl LookupResponse {
    pub fn new(items: Vec<LookupItem>) -> Self {
        LookupResponse {
            api_version: API_VERSION,
            kind: RESPONSE_KIND,
            response: LookupResult {
                idempotent: true,
                items,
                system_error: String::new(),
            },
        }
    }
}
