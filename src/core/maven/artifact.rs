use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::error::{PipelineError, PipelineResult};

/// A Maven coordinate naming a raw input artifact.
///
/// Supported formats:
///   `group:artifact:version`
///   `group:artifact:version:classifier`
///   `group:artifact:version[:classifier]@extension`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MavenArtifact {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub classifier: Option<String>,
    /// File extension. Defaults to `"jar"`.
    pub extension: String,
}

impl MavenArtifact {
    pub fn parse(coord: &str) -> PipelineResult<Self> {
        let (coord_part, extension) = match coord.rsplit_once('@') {
            Some((c, ext)) if !ext.is_empty() => (c, ext),
            Some(_) => return Err(PipelineError::InvalidMavenCoordinate(coord.to_string())),
            None => (coord, "jar"),
        };

        let parts: Vec<&str> = coord_part.split(':').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(PipelineError::InvalidMavenCoordinate(coord.to_string()));
        }
        let classifier = match parts.len() {
            3 => None,
            4 => Some(parts[3].to_string()),
            _ => return Err(PipelineError::InvalidMavenCoordinate(coord.to_string())),
        };
        Ok(Self {
            group_id: parts[0].to_string(),
            artifact_id: parts[1].to_string(),
            version: parts[2].to_string(),
            classifier,
            extension: extension.to_string(),
        })
    }

    pub fn group_path(&self) -> String {
        self.group_id.replace('.', "/")
    }

    /// `artifactId-version[-classifier].extension`
    pub fn filename(&self) -> String {
        match &self.classifier {
            Some(c) => format!(
                "{}-{}-{}.{}",
                self.artifact_id, self.version, c, self.extension
            ),
            None => format!("{}-{}.{}", self.artifact_id, self.version, self.extension),
        }
    }

    /// `<repo>/<group_path>/<artifact_id>/<version>/<filename>`
    pub fn url(&self, repo_base: &str) -> String {
        let base = repo_base.trim_end_matches('/');
        format!(
            "{}/{}/{}/{}/{}",
            base,
            self.group_path(),
            self.artifact_id,
            self.version,
            self.filename()
        )
    }
}

impl fmt::Display for MavenArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)?;
        if let Some(c) = &self.classifier {
            write!(f, ":{c}")?;
        }
        if self.extension != "jar" {
            write!(f, "@{}", self.extension)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_classifier_and_extension() {
        let a = MavenArtifact::parse("net.fabricmc:yarn:1.20.1+build.10:v2@tiny").unwrap();
        assert_eq!(a.group_id, "net.fabricmc");
        assert_eq!(a.version, "1.20.1+build.10");
        assert_eq!(a.classifier.as_deref(), Some("v2"));
        assert_eq!(a.extension, "tiny");
        assert_eq!(a.filename(), "yarn-1.20.1+build.10-v2.tiny");
    }

    #[test]
    fn url_construction() {
        let a = MavenArtifact::parse("net.fabricmc:intermediary:1.20.1").unwrap();
        assert_eq!(
            a.url("https://maven.fabricmc.net/"),
            "https://maven.fabricmc.net/net/fabricmc/intermediary/1.20.1/intermediary-1.20.1.jar"
        );
    }

    #[test]
    fn display_round_trips() {
        for coord in ["a.b:c:1", "a.b:c:1:x", "a.b:c:1:x@zip"] {
            assert_eq!(MavenArtifact::parse(coord).unwrap().to_string(), coord);
        }
    }

    #[test]
    fn rejects_malformed_coordinates() {
        for coord in ["a:b", "a::1", "a:b:c:d:e", "a:b:1@"] {
            assert!(MavenArtifact::parse(coord).is_err(), "{coord}");
        }
    }
}
