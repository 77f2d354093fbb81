use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::error::{PipelineError, PipelineResult};

/// Configuration parameters of a stage. Sorted by construction, so the
/// iteration order fed into key derivation never depends on insertion.
pub type StageConfig = BTreeMap<String, String>;

/// Bumped whenever the on-disk artifact encoding of any stage changes.
const KEY_SCHEME: &str = "loom-pipeline/key/v1";

/// Deterministic identity of an artifact: SHA-256 over the producing stage
/// name, its input keys and its configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    /// Derive the key of a stage output.
    ///
    /// Inputs are `(input stage name, key)` pairs and are sorted by stage
    /// name before hashing. Every field is length-prefixed so that no two
    /// distinct derivations share a byte stream.
    pub fn derive(stage: &str, inputs: &[(&str, &ArtifactKey)], config: &StageConfig) -> Self {
        let mut sorted: Vec<(&str, &ArtifactKey)> = inputs.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        let mut hasher = Sha256::new();
        feed(&mut hasher, KEY_SCHEME.as_bytes());
        feed(&mut hasher, stage.as_bytes());

        hasher.update((sorted.len() as u64).to_le_bytes());
        for (name, key) in sorted {
            feed(&mut hasher, name.as_bytes());
            feed(&mut hasher, key.0.as_bytes());
        }

        hasher.update((config.len() as u64).to_le_bytes());
        for (k, v) in config {
            feed(&mut hasher, k.as_bytes());
            feed(&mut hasher, v.as_bytes());
        }

        ArtifactKey(hex::encode(hasher.finalize()))
    }

    /// Accept a key transferred verbatim, e.g. from another machine.
    pub fn from_hex(value: &str) -> PipelineResult<Self> {
        let valid = value.len() == 64
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(PipelineError::Config(format!(
                "not a valid artifact key: {value}"
            )));
        }
        Ok(ArtifactKey(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character fan-out directory used by the store layout.
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }

    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn feed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Hex SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> StageConfig {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn derivation_is_stable_across_input_order() {
        let a = ArtifactKey::derive("provision", &[], &config(&[("side", "client")]));
        let b = ArtifactKey::derive("provision", &[], &config(&[("side", "server")]));

        let ab = ArtifactKey::derive("merge", &[("client", &a), ("server", &b)], &StageConfig::new());
        let ba = ArtifactKey::derive("merge", &[("server", &b), ("client", &a)], &StageConfig::new());
        assert_eq!(ab, ba);
        assert_eq!(ab.as_str().len(), 64);
    }

    #[test]
    fn any_declared_input_changes_the_key() {
        let base = ArtifactKey::derive("remap", &[], &config(&[("target", "named")]));
        assert_ne!(base, ArtifactKey::derive("remap", &[], &config(&[("target", "intermediate")])));
        assert_ne!(base, ArtifactKey::derive("access", &[], &config(&[("target", "named")])));
        assert_ne!(
            base,
            ArtifactKey::derive("remap", &[("merge", &base)], &config(&[("target", "named")]))
        );
    }

    #[test]
    fn length_prefixing_separates_adjacent_fields() {
        let left = ArtifactKey::derive("s", &[], &config(&[("ab", "c")]));
        let right = ArtifactKey::derive("s", &[], &config(&[("a", "bc")]));
        assert_ne!(left, right);
    }

    #[test]
    fn from_hex_rejects_garbage() {
        let key = ArtifactKey::derive("s", &[], &StageConfig::new());
        assert_eq!(ArtifactKey::from_hex(key.as_str()).unwrap(), key);
        assert!(ArtifactKey::from_hex("not-a-key").is_err());
        assert!(ArtifactKey::from_hex(&key.as_str().to_uppercase()).is_err());
    }
}
