use std::fmt;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::core::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Md5,
}

impl HashAlgorithm {
    fn prefix(self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Md5 => "md5",
        }
    }

    fn hex_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 40,
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Md5 => 32,
        }
    }

    pub fn digest(self, bytes: &[u8]) -> String {
        match self {
            HashAlgorithm::Sha1 => {
                let mut hasher = Sha1::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
            HashAlgorithm::Md5 => {
                let mut hasher = Md5::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
        }
    }
}

/// Expected content digest of a raw input, written `sha1:<hex>`,
/// `sha256:<hex>`, `md5:<hex>` or bare hex (SHA-1).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    /// Lowercase hex.
    pub value: String,
}

impl Checksum {
    pub fn of(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        Self {
            algorithm,
            value: algorithm.digest(bytes),
        }
    }

    /// Fail with `Integrity` unless `bytes` hash to this checksum.
    pub fn verify(&self, subject: &str, bytes: &[u8]) -> PipelineResult<()> {
        let actual = self.algorithm.digest(bytes);
        if actual != self.value {
            return Err(PipelineError::Integrity {
                subject: subject.to_string(),
                expected: self.to_string(),
                actual: format!("{}:{}", self.algorithm.prefix(), actual),
            });
        }
        Ok(())
    }
}

impl FromStr for Checksum {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, value) = match s.split_once(':') {
            Some(("sha1", v)) => (HashAlgorithm::Sha1, v),
            Some(("sha256", v)) => (HashAlgorithm::Sha256, v),
            Some(("md5", v)) => (HashAlgorithm::Md5, v),
            Some((other, _)) => {
                return Err(PipelineError::Config(format!(
                    "unsupported checksum algorithm '{other}'"
                )))
            }
            None => (HashAlgorithm::Sha1, s),
        };
        let value = value.trim().to_ascii_lowercase();
        if value.len() != algorithm.hex_len() || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(PipelineError::Config(format!("malformed checksum '{s}'")));
        }
        Ok(Self { algorithm, value })
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.prefix(), self.value)
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
