use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::checksum::Checksum;
use crate::core::error::PipelineError;
use crate::core::maven::MavenArtifact;

/// Where a raw input comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InputLocation {
    Path(PathBuf),
    Url(String),
    /// `maven:group:artifact:version[:classifier][@ext]`, resolved against
    /// the fabric repository.
    Maven(MavenArtifact),
}

impl FromStr for InputLocation {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PipelineError::Config("empty input location".into()));
        }
        if let Some(coord) = s.strip_prefix("maven:") {
            return Ok(InputLocation::Maven(MavenArtifact::parse(coord)?));
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(InputLocation::Url(s.to_string()));
        }
        Ok(InputLocation::Path(PathBuf::from(s.strip_prefix("file:").unwrap_or(s))))
    }
}

impl fmt::Display for InputLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputLocation::Path(p) => write!(f, "{}", p.display()),
            InputLocation::Url(u) => f.write_str(u),
            InputLocation::Maven(a) => write!(f, "maven:{a}"),
        }
    }
}

impl Serialize for InputLocation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for InputLocation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One declared raw input: a distribution side (e.g. `client`), its
/// location and the checksum it must match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInput {
    pub side: String,
    pub location: InputLocation,
    pub checksum: Checksum,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_location_kind() {
        assert!(matches!(
            "maven:net.fabricmc:intermediary:1.20.1:v2".parse().unwrap(),
            InputLocation::Maven(_)
        ));
        assert!(matches!(
            "https://piston-data.mojang.com/client.jar".parse().unwrap(),
            InputLocation::Url(_)
        ));
        assert_eq!(
            "file:/tmp/server.jar".parse::<InputLocation>().unwrap(),
            InputLocation::Path(PathBuf::from("/tmp/server.jar"))
        );
        assert!("maven:bad".parse::<InputLocation>().is_err());
    }

    #[test]
    fn raw_inputs_deserialize_from_json() {
        let input: RawInput = serde_json::from_str(
            r#"{"side":"client","location":"maven:a.b:c:1","checksum":"sha1:a9993e364706816aba3e25717850c26c9cd0d89d"}"#,
        )
        .unwrap();
        assert_eq!(input.location.to_string(), "maven:a.b:c:1");
    }
}
