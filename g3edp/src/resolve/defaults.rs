/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::BTreeMap;

/// Static fallback mapping, used when the context source can not answer.
#[derive(Clone, Debug, Default)]
pub struct DefaultTable {
    inner: BTreeMap<String, String>,
}

impl DefaultTable {
    pub fn new(inner: BTreeMap<String, String>) -> Self {
        DefaultTable { inner }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(|v| v.as_str())
    }

    /// The mapped value, or an empty string for unmapped keys.
    pub fn resolve(&self, key: &str) -> String {
        self.get(key).map(str::to_string).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DefaultTable {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let inner = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        DefaultTable { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve() {
        let table: DefaultTable = [("demo", "dev"), ("prod2", "prod")].into_iter().collect();
        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve("demo"), "dev");
        assert_eq!(table.resolve("prod2"), "prod");
        assert_eq!(table.resolve("unknown-ns"), "");
        assert!(table.get("unknown-ns").is_none());
    }
}
