use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::decompile::DecompilerConfig;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::mappings::{MappingFormat, Namespace};
use crate::core::provision::{InputLocation, MirrorConfig, RawInput};

const CACHE_DIR_NAME: &str = "loom-pipeline";

/// Sides the merge stage knows how to combine.
pub const SIDES: [&str; 2] = ["client", "server"];

/// One mapping file, in precedence order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingSourceConfig {
    pub path: PathBuf,
    #[serde(default = "auto_format")]
    pub format: MappingFormat,
    /// Later definitions replace earlier ones instead of conflicting.
    #[serde(default, rename = "override")]
    pub override_existing: bool,
}

fn auto_format() -> MappingFormat {
    MappingFormat::Auto
}

/// Artifacts exported to the output directory after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Mappings,
    Merged,
    Remapped,
    Patched,
    Sources,
}

impl OutputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputKind::Mappings => "mappings",
            OutputKind::Merged => "merged",
            OutputKind::Remapped => "remapped",
            OutputKind::Patched => "patched",
            OutputKind::Sources => "sources",
        }
    }

    /// File name of the exported artifact.
    pub fn file_name(self) -> &'static str {
        match self {
            OutputKind::Mappings => "mappings.tiny",
            OutputKind::Merged => "merged.jar",
            OutputKind::Remapped => "remapped.jar",
            OutputKind::Patched => "patched.jar",
            OutputKind::Sources => "remapped-sources.jar",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub cache_root: PathBuf,
    /// Maximum number of stages running at once.
    pub concurrency: usize,
    pub inputs: Vec<RawInput>,
    pub mappings: Vec<MappingSourceConfig>,
    /// Namespace of the provisioned jars.
    pub source_namespace: Namespace,
    pub target_namespace: Namespace,
    /// Access widener files, applied in order.
    pub patches: Vec<PathBuf>,
    /// Internal-name prefixes of game-owned classes.
    pub game_prefixes: Vec<String>,
    pub decompiler: Option<DecompilerConfig>,
    pub mirrors: MirrorConfig,
    pub output_dir: PathBuf,
    pub outputs: Vec<OutputKind>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            inputs: Vec::new(),
            mappings: Vec::new(),
            source_namespace: Namespace::Obfuscated,
            target_namespace: Namespace::Named,
            patches: Vec::new(),
            game_prefixes: vec!["net/minecraft/".into(), "com/mojang/blaze3d/".into()],
            decompiler: None,
            mirrors: MirrorConfig::default(),
            output_dir: PathBuf::from("build/loom"),
            outputs: vec![OutputKind::Remapped],
        }
    }
}

pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CACHE_DIR_NAME)
}

impl PipelineConfig {
    /// Read a JSON config file. Relative paths inside it are taken relative
    /// to the file's directory; mirror environment overrides are applied.
    pub async fn load(path: &Path) -> PipelineResult<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::io(path, e))?;
        let mut config: PipelineConfig = serde_json::from_str(&raw)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        config.mirrors = config.mirrors.with_env_overrides();
        config.validate()?;
        debug!("Loaded pipeline config from {}", path.display());
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.cache_root);
        join(&mut self.output_dir);
        for input in &mut self.inputs {
            if let InputLocation::Path(p) = &mut input.location {
                join(p);
            }
        }
        for source in &mut self.mappings {
            join(&mut source.path);
        }
        for patch in &mut self.patches {
            join(patch);
        }
        if let Some(decompiler) = &mut self.decompiler {
            if let Some(jar) = &mut decompiler.engine_jar {
                join(jar);
            }
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.concurrency == 0 {
            return Err(PipelineError::Config("concurrency must be at least 1".into()));
        }
        if self.inputs.is_empty() {
            return Err(PipelineError::Config("no raw inputs declared".into()));
        }
        let mut sides = HashSet::new();
        for input in &self.inputs {
            if !SIDES.contains(&input.side.as_str()) {
                return Err(PipelineError::Config(format!(
                    "unknown input side '{}', expected one of {:?}",
                    input.side, SIDES
                )));
            }
            if !sides.insert(input.side.as_str()) {
                return Err(PipelineError::Config(format!(
                    "input side '{}' declared twice",
                    input.side
                )));
            }
        }
        if self.mappings.is_empty() {
            return Err(PipelineError::Config("no mapping sources declared".into()));
        }
        for kind in &self.outputs {
            match kind {
                OutputKind::Patched if self.patches.is_empty() => {
                    return Err(PipelineError::Config(
                        "patched output requested without patch files".into(),
                    ))
                }
                OutputKind::Sources if self.decompiler.is_none() => {
                    return Err(PipelineError::Config(
                        "sources output requested without a decompiler".into(),
                    ))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "cache_root": "cache",
        "concurrency": 2,
        "inputs": [
            { "side": "client", "location": "jars/client.jar", "checksum": "sha256:0000000000000000000000000000000000000000000000000000000000000000" },
            { "side": "server", "location": "https://piston-data.mojang.com/server.jar", "checksum": "0000000000000000000000000000000000000000" }
        ],
        "mappings": [
            { "path": "mappings.tiny" },
            { "path": "fixes.tiny", "format": "tiny_v2", "override": true }
        ],
        "source_namespace": "official",
        "target_namespace": "named",
        "outputs": ["remapped", "merged"]
    }"#;

    #[tokio::test]
    async fn loads_and_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loom.json");
        tokio::fs::write(&path, CONFIG).await.unwrap();

        let config = PipelineConfig::load(&path).await.unwrap();
        assert_eq!(config.cache_root, dir.path().join("cache"));
        assert_eq!(config.concurrency, 2);
        assert_eq!(
            config.inputs[0].location,
            InputLocation::Path(dir.path().join("jars/client.jar"))
        );
        assert!(matches!(config.inputs[1].location, InputLocation::Url(_)));
        assert_eq!(config.mappings[0].format, MappingFormat::Auto);
        assert!(config.mappings[1].override_existing);
        assert_eq!(config.source_namespace, Namespace::Obfuscated);
        assert_eq!(config.game_prefixes, PipelineConfig::default().game_prefixes);
    }

    #[test]
    fn validation_rejects_incomplete_configs() {
        let mut config: PipelineConfig = serde_json::from_str(CONFIG).unwrap();
        assert!(config.validate().is_ok());

        config.concurrency = 0;
        assert!(config.validate().is_err());
        config.concurrency = 1;

        config.inputs[1].side = "client".into();
        assert!(config.validate().is_err());
        config.inputs[1].side = "server".into();

        config.outputs.push(OutputKind::Sources);
        assert!(config.validate().is_err());
        config.outputs.pop();

        config.mappings.clear();
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }
}
