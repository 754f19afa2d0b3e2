//! Policy applied when registering password configurations.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySection {
    /// Minimum password length accepted by `add`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    /// Namespaces a cluster secret may target (empty = no restriction).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespace_allowlist: Vec<String>,
}

impl PolicySection {
    pub fn is_namespace_allowed(&self, namespace: &str) -> bool {
        self.namespace_allowlist.is_empty()
            || self.namespace_allowlist.iter().any(|n| n == namespace)
    }

    pub fn meets_min_length(&self, length: usize) -> bool {
        self.min_length.map_or(true, |min| length >= min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_allowlist_allows_all() {
        assert!(PolicySection::default().is_namespace_allowed("anything"));
    }

    #[test]
    fn test_allowlist_restricts() {
        let policy = PolicySection {
            namespace_allowlist: vec!["default".into()],
            ..Default::default()
        };
        assert!(policy.is_namespace_allowed("default"));
        assert!(!policy.is_namespace_allowed("kube-system"));
    }

    #[test]
    fn test_min_length() {
        let policy = PolicySection {
            min_length: Some(16),
            ..Default::default()
        };
        assert!(policy.meets_min_length(16));
        assert!(!policy.meets_min_length(15));
        assert!(PolicySection::default().meets_min_length(1));
    }
}
