use crate::constants;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Descriptor of one managed credential.
///
/// Field names on the wire match the collection persisted under
/// `password-configs` in the stack configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordConfig {
    #[serde(rename = "serviceName")]
    pub service_name: String,
    pub length: usize,
    #[serde(rename = "useSpecial")]
    pub use_special: bool,
    #[serde(rename = "gcpSecretId")]
    pub cloud_secret_id: String,
    #[serde(rename = "k8sSecretName")]
    pub target_secret_name: String,
    #[serde(rename = "k8sNamespace")]
    pub target_namespace: String,
}

/// The persisted collection, keyed by service name.
pub type PasswordConfigMap = BTreeMap<String, PasswordConfig>;

impl PasswordConfig {
    /// Check field formats before the descriptor is persisted.
    pub fn validate(&self) -> Result<()> {
        validate_service_name(&self.service_name)?;
        if self.length == 0 || self.length > constants::MAX_PASSWORD_LENGTH {
            return Err(Error::InvalidLength {
                length: self.length,
                max: constants::MAX_PASSWORD_LENGTH,
            });
        }
        validate_cloud_secret_id(&self.cloud_secret_id)?;
        if !is_dns1123_subdomain(&self.target_secret_name) {
            return Err(Error::invalid_config(format!(
                "cluster secret name '{}' is not a valid DNS-1123 subdomain",
                self.target_secret_name
            )));
        }
        if !is_dns1123_label(&self.target_namespace) {
            return Err(Error::invalid_config(format!(
                "namespace '{}' is not a valid DNS-1123 label",
                self.target_namespace
            )));
        }
        Ok(())
    }
}

/// Stack configuration key for a service's password value.
pub fn value_key(service_name: &str) -> String {
    format!("{}.{}", constants::PASSWORD_VALUE_PREFIX, service_name)
}

pub fn validate_service_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_config("service name cannot be empty"));
    }
    if name.contains("..") {
        return Err(Error::invalid_config("service name cannot contain '..'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
    {
        return Err(Error::invalid_config(format!(
            "service name '{}': only [a-zA-Z0-9._-] allowed",
            name
        )));
    }
    Ok(())
}

fn validate_cloud_secret_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 255 {
        return Err(Error::invalid_config(
            "cloud secret id must be 1-255 characters",
        ));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::invalid_config(format!(
            "cloud secret id '{}': only [a-zA-Z0-9_-] allowed",
            id
        )));
    }
    Ok(())
}

pub fn is_dns1123_label(s: &str) -> bool {
    if s.is_empty() || s.len() > 63 {
        return false;
    }
    let bytes = s.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    edge_ok(bytes[0])
        && edge_ok(bytes[bytes.len() - 1])
        && bytes
            .iter()
            .all(|&b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

pub fn is_dns1123_subdomain(s: &str) -> bool {
    !s.is_empty() && s.len() <= 253 && s.split('.').all(is_dns1123_label)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PasswordConfig {
        PasswordConfig {
            service_name: "pg-root".into(),
            length: 16,
            use_special: true,
            cloud_secret_id: "pg-root-pw".into(),
            target_secret_name: "pg-root-secret".into(),
            target_namespace: "default".into(),
        }
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        let obj = json.as_object().unwrap();
        for key in [
            "serviceName",
            "length",
            "useSpecial",
            "gcpSecretId",
            "k8sSecretName",
            "k8sNamespace",
        ] {
            assert!(obj.contains_key(key), "missing {}", key);
        }
    }

    #[test]
    fn test_parses_existing_collection() {
        let raw = r#"{"pg-root":{"serviceName":"pg-root","length":16,"useSpecial":true,
            "gcpSecretId":"pg-root-pw","k8sSecretName":"pg-root-secret","k8sNamespace":"default"}}"#;
        let map: PasswordConfigMap = serde_json::from_str(raw).unwrap();
        assert_eq!(map["pg-root"], sample());
    }

    #[test]
    fn test_validate_ok() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_length() {
        let cfg = PasswordConfig {
            length: 0,
            ..sample()
        };
        assert!(matches!(
            cfg.validate(),
            Err(Error::InvalidLength { length: 0, .. })
        ));
    }

    #[test]
    fn test_validate_bad_names() {
        let bad_ns = PasswordConfig {
            target_namespace: "Default".into(),
            ..sample()
        };
        assert!(bad_ns.validate().is_err());

        let bad_secret = PasswordConfig {
            target_secret_name: "-pg".into(),
            ..sample()
        };
        assert!(bad_secret.validate().is_err());

        let bad_service = PasswordConfig {
            service_name: "pg/root".into(),
            ..sample()
        };
        assert!(bad_service.validate().is_err());

        let bad_cloud = PasswordConfig {
            cloud_secret_id: "pg.root".into(),
            ..sample()
        };
        assert!(bad_cloud.validate().is_err());
    }

    #[test]
    fn test_dns_helpers() {
        assert!(is_dns1123_label("default"));
        assert!(is_dns1123_label("kube-system"));
        assert!(!is_dns1123_label("ends-"));
        assert!(is_dns1123_subdomain("pg.root-secret"));
        assert!(!is_dns1123_subdomain("pg..root"));
    }

    #[test]
    fn test_value_key() {
        assert_eq!(value_key(&sample().service_name), "passwords.pg-root");
    }
}
