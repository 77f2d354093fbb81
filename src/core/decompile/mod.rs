// ─── Decompilation ───
// Pluggable decompiler engines behind one async capability, plus the
// optional source-level remapping pass over their output.

pub mod external;
pub mod skeleton;
pub mod source_remap;

pub use external::ExternalDecompiler;
pub use skeleton::SkeletonDecompiler;
pub use source_remap::SourceRemapper;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::cache::{sha256_hex, StageConfig};
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::jar::Jar;
use crate::core::mappings::Namespace;
use crate::core::pipeline::{CancellationFlag, ClassFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Skeleton,
    External,
}

/// Which engine to run and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompilerConfig {
    pub engine: EngineKind,
    pub threads: usize,
    /// Heap for forked engines. Defaults to half of physical memory.
    pub memory_mb: Option<u64>,
    /// Engine-specific switches, passed through verbatim.
    pub options: BTreeMap<String, String>,
    /// Rewrite identifiers in the produced sources into this namespace.
    pub source_remap_namespace: Option<Namespace>,
    pub java_path: Option<PathBuf>,
    pub engine_jar: Option<PathBuf>,
}

impl Default for DecompilerConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Skeleton,
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            memory_mb: None,
            options: BTreeMap::new(),
            source_remap_namespace: None,
            java_path: None,
            engine_jar: None,
        }
    }
}

impl DecompilerConfig {
    /// Parameters that change the produced sources. Thread count and heap
    /// size do not.
    pub fn stage_config(&self) -> StageConfig {
        let mut config = StageConfig::new();
        config.insert(
            "engine".into(),
            match self.engine {
                EngineKind::Skeleton => "skeleton".into(),
                EngineKind::External => "external".into(),
            },
        );
        for (key, value) in &self.options {
            config.insert(format!("option.{key}"), value.clone());
        }
        if let Some(ns) = self.source_remap_namespace {
            config.insert("source_remap".into(), ns.to_string());
        }
        config
    }

    /// SHA-256 of the configured engine jar. The jar's contents, not its
    /// path, decide whether cached sources are still valid.
    pub async fn engine_digest(&self) -> PipelineResult<Option<String>> {
        let Some(jar) = &self.engine_jar else {
            return Ok(None);
        };
        let bytes = tokio::fs::read(jar)
            .await
            .map_err(|e| PipelineError::io(jar, e))?;
        Ok(Some(sha256_hex(&bytes)))
    }
}

/// Engine output: `.java` text keyed by entry path, plus the classes that
/// failed. Partial output is a valid result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecompiledSources {
    pub sources: BTreeMap<String, String>,
    pub failures: Vec<ClassFailure>,
}

impl DecompiledSources {
    pub fn record_failure(&mut self, class: &str, error: PipelineError) {
        let message = match error {
            PipelineError::DecompileFailure { message, .. } => message,
            other => other.to_string(),
        };
        warn!("decompilation of {} failed: {}", class, message);
        self.failures.push(ClassFailure {
            class: class.to_string(),
            message,
        });
    }

    /// Package the sources as a `-sources.jar` payload.
    pub fn to_jar(&self) -> Jar {
        let mut jar = Jar::new();
        for (path, text) in &self.sources {
            jar.resources.insert(path.clone(), text.clone().into_bytes());
        }
        jar
    }

    pub fn from_jar(jar: &Jar) -> Self {
        Self {
            sources: jar
                .resources
                .iter()
                .filter(|(path, _)| path.ends_with(".java"))
                .map(|(path, bytes)| (path.clone(), String::from_utf8_lossy(bytes).into_owned()))
                .collect(),
            failures: Vec::new(),
        }
    }
}

/// Classes that get their own source file: everything except nested
/// classes whose outer class is in the jar.
pub fn source_units(jar: &Jar) -> Vec<String> {
    jar.classes
        .keys()
        .filter(|name| match name.split_once('$') {
            Some((outer, _)) => !jar.classes.contains_key(outer),
            None => true,
        })
        .cloned()
        .collect()
}

pub fn source_path(class: &str) -> String {
    format!("{class}.java")
}

/// The decompile capability. Engines must not fail the batch for a single
/// class; such failures go into `DecompiledSources::failures`.
#[async_trait]
pub trait Decompiler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn decompile(
        &self,
        jar: Arc<Jar>,
        cancel: &CancellationFlag,
    ) -> PipelineResult<DecompiledSources>;
}

/// Engine selected by configuration.
#[derive(Debug, Clone)]
pub enum DecompilerEngine {
    Skeleton(SkeletonDecompiler),
    External(ExternalDecompiler),
}

impl DecompilerEngine {
    pub fn from_config(config: &DecompilerConfig) -> PipelineResult<Self> {
        match config.engine {
            EngineKind::Skeleton => Ok(DecompilerEngine::Skeleton(SkeletonDecompiler {
                threads: config.threads,
            })),
            EngineKind::External => {
                let engine_jar = config.engine_jar.clone().ok_or_else(|| {
                    PipelineError::Config("external decompiler needs engine_jar".into())
                })?;
                Ok(DecompilerEngine::External(ExternalDecompiler {
                    java: config.java_path.clone().unwrap_or_else(|| PathBuf::from("java")),
                    engine_jar,
                    threads: config.threads,
                    memory_mb: config.memory_mb.unwrap_or_else(external::default_heap_mb),
                    options: config.options.clone(),
                }))
            }
        }
    }
}

#[async_trait]
impl Decompiler for DecompilerEngine {
    fn name(&self) -> &'static str {
        match self {
            DecompilerEngine::Skeleton(engine) => engine.name(),
            DecompilerEngine::External(engine) => engine.name(),
        }
    }

    async fn decompile(
        &self,
        jar: Arc<Jar>,
        cancel: &CancellationFlag,
    ) -> PipelineResult<DecompiledSources> {
        let out = match self {
            DecompilerEngine::Skeleton(engine) => engine.decompile(jar, cancel).await?,
            DecompilerEngine::External(engine) => engine.decompile(jar, cancel).await?,
        };
        info!(
            "{} decompiler produced {} files, {} failures",
            self.name(),
            out.sources.len(),
            out.failures.len()
        );
        Ok(out)
    }
}

/// Run `engine`, then rewrite the produced sources and their paths with
/// `remapper` if one is given.
pub async fn decompile_jar(
    engine: &dyn Decompiler,
    jar: Arc<Jar>,
    remapper: Option<&SourceRemapper>,
    cancel: &CancellationFlag,
) -> PipelineResult<DecompiledSources> {
    let mut out = engine.decompile(jar, cancel).await?;
    if let Some(remapper) = remapper {
        let mut remapped = BTreeMap::new();
        for (path, text) in std::mem::take(&mut out.sources) {
            cancel.checkpoint()?;
            remapped.insert(remapper.remap_path(&path), remapper.remap(&text));
        }
        out.sources = remapped;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classfile::builder::ClassBuilder;

    fn class(name: &str) -> Vec<u8> {
        ClassBuilder::new(name, Some("java/lang/Object"))
            .unwrap()
            .to_bytes()
            .unwrap()
    }

    #[test]
    fn nested_classes_share_their_outer_file() {
        let mut jar = Jar::new();
        for name in ["a/Outer", "a/Outer$Inner", "a/Lone$Child"] {
            jar.classes.insert(name.into(), class(name));
        }
        assert_eq!(source_units(&jar), vec!["a/Lone$Child", "a/Outer"]);
    }

    #[test]
    fn external_engine_requires_a_jar() {
        let config = DecompilerConfig {
            engine: EngineKind::External,
            ..DecompilerConfig::default()
        };
        assert!(matches!(
            DecompilerEngine::from_config(&config),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn thread_count_does_not_change_the_stage_config() {
        let one = DecompilerConfig {
            threads: 1,
            ..DecompilerConfig::default()
        };
        let many = DecompilerConfig {
            threads: 16,
            ..DecompilerConfig::default()
        };
        assert_eq!(one.stage_config(), many.stage_config());
    }

    #[tokio::test]
    async fn engine_digest_follows_the_jar_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.jar");
        let config = DecompilerConfig {
            engine: EngineKind::External,
            engine_jar: Some(path.clone()),
            ..DecompilerConfig::default()
        };

        tokio::fs::write(&path, b"engine 1").await.unwrap();
        let first = config.engine_digest().await.unwrap().unwrap();
        tokio::fs::write(&path, b"engine 2").await.unwrap();
        let second = config.engine_digest().await.unwrap().unwrap();
        assert_ne!(first, second);
        assert!(!config.stage_config().values().any(|v| v.contains("engine.jar")));

        assert_eq!(DecompilerConfig::default().engine_digest().await.unwrap(), None);
        tokio::fs::remove_file(&path).await.unwrap();
        assert!(matches!(
            config.engine_digest().await,
            Err(PipelineError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn sources_are_remapped_after_decompiling() {
        let mut jar = Jar::new();
        jar.classes.insert("net/minecraft/class_1".into(), class("net/minecraft/class_1"));
        let table = crate::core::mappings::resolve(&[crate::core::mappings::MappingSource {
            name: "test".into(),
            format: crate::core::mappings::MappingFormat::Auto,
            contents: "tiny\t2\t0\tofficial\tintermediary\tnamed\nc\ta\tnet/minecraft/class_1\tnet/minecraft/Entity\n".into(),
            override_existing: false,
        }])
        .unwrap();
        let remapper = SourceRemapper::from_table(&table, Namespace::Intermediate, Namespace::Named);
        let engine = DecompilerEngine::from_config(&DecompilerConfig::default()).unwrap();

        let out = decompile_jar(&engine, Arc::new(jar), Some(&remapper), &CancellationFlag::new())
            .await
            .unwrap();
        let text = &out.sources["net/minecraft/Entity.java"];
        assert!(text.contains("public class Entity {"));
        assert!(out.failures.is_empty());
        assert_eq!(DecompiledSources::from_jar(&out.to_jar()).sources, out.sources);
    }
}
