use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_LIBRARIES: &str = "https://libraries.minecraft.net/";
pub const DEFAULT_RESOURCES: &str = "https://resources.download.minecraft.net/";
pub const DEFAULT_VERSION_MANIFESTS: &str =
    "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";
pub const DEFAULT_FABRIC_REPOSITORY: &str = "https://maven.fabricmc.net/";

/// Download bases. URLs starting with a default base are fetched from the
/// configured one instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub libraries: String,
    pub resources: String,
    pub version_manifests: String,
    pub fabric_repository: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            libraries: DEFAULT_LIBRARIES.to_string(),
            resources: DEFAULT_RESOURCES.to_string(),
            version_manifests: DEFAULT_VERSION_MANIFESTS.to_string(),
            fabric_repository: DEFAULT_FABRIC_REPOSITORY.to_string(),
        }
    }
}

impl MirrorConfig {
    /// Apply `LOOM_*` environment overrides on top of this configuration.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        for (key, slot) in [
            ("LOOM_LIBRARIES_MIRROR", &mut self.libraries),
            ("LOOM_RESOURCES_MIRROR", &mut self.resources),
            ("LOOM_VERSION_MANIFESTS", &mut self.version_manifests),
            ("LOOM_FABRIC_REPOSITORY", &mut self.fabric_repository),
        ] {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                debug!("{} overrides mirror {} -> {}", key, slot, value);
                *slot = value;
            }
        }
        self
    }

    /// Rewrite a URL onto the configured mirror, if it lives under one of the
    /// default bases.
    pub fn rewrite(&self, url: &str) -> String {
        let pairs = [
            (DEFAULT_LIBRARIES, &self.libraries),
            (DEFAULT_RESOURCES, &self.resources),
            (DEFAULT_FABRIC_REPOSITORY, &self.fabric_repository),
        ];
        if url == DEFAULT_VERSION_MANIFESTS {
            return self.version_manifests.clone();
        }
        for (default, mirror) in pairs {
            if let Some(rest) = url.strip_prefix(default) {
                return format!("{}/{}", mirror.trim_end_matches('/'), rest);
            }
        }
        url.to_string()
    }
}
