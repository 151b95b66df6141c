//! Descriptor fingerprints.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::ReconcileError;

/// Fingerprint of a serialized descriptor, for deterministic comparison.
///
/// Used to notice that a retained component's descriptor changed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecHash(String);

impl SpecHash {
    /// Hashes the canonical JSON encoding of a value.
    pub fn of<T: Serialize>(value: &T) -> Result<Self, ReconcileError> {
        // serde_json::Value objects are key-ordered, so this encoding is canonical.
        let canonical = serde_json::to_value(value)
            .and_then(|v| serde_json::to_vec(&v))
            .map_err(|e| ReconcileError::Internal(format!("cannot hash descriptor: {}", e)))?;

        let digest = Sha256::digest(&canonical);
        Ok(Self(format!("sha256:{}", hex::encode(&digest[..16]))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_hash_ignores_key_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
        assert_eq!(SpecHash::of(&a).unwrap(), SpecHash::of(&b).unwrap());
    }

    #[test]
    fn test_spec_hash_detects_change() {
        let a = serde_json::json!({"instances": 2});
        let b = serde_json::json!({"instances": 3});
        assert_ne!(SpecHash::of(&a).unwrap(), SpecHash::of(&b).unwrap());
        assert!(SpecHash::of(&a).unwrap().as_str().starts_with("sha256:"));
    }
}
