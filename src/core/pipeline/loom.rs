use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::cancel::CancellationFlag;
use super::graph::StageGraph;
use super::report::ClassFailure;
use super::stage::{StageDescriptor, StageInputs, StageOutput, Transform};
use crate::core::access::apply::targeted_classes;
use crate::core::access::{apply_patches, parse_access_widener, PatchSet, PatchSummary};
use crate::core::cache::{sha256_hex, Artifact, ArtifactMeta, StageConfig};
use crate::core::config::{MappingSourceConfig, OutputKind, PipelineConfig};
use crate::core::decompile::{decompile_jar, DecompilerConfig, DecompilerEngine, SourceRemapper};
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::jar::{merge_jars, Jar, MergedJar, Side};
use crate::core::mappings::tiny::write_tiny_v2;
use crate::core::mappings::{resolve, MappingFormat, MappingSource, MappingTable, Namespace};
use crate::core::provision::{Provisioner, RawInput};
use crate::core::remap::{remap_jar, Remapper};

pub const MAPPINGS: &str = "mappings";
pub const MERGE: &str = "merge";
pub const REMAP: &str = "remap";
pub const ACCESS: &str = "access";
pub const DECOMPILE: &str = "decompile";

pub fn provision_stage(side: &str) -> String {
    format!("provision-{side}")
}

/// Stage whose artifact is exported for an output kind.
pub fn output_stage(kind: OutputKind) -> &'static str {
    match kind {
        OutputKind::Mappings => MAPPINGS,
        OutputKind::Merged => MERGE,
        OutputKind::Remapped => REMAP,
        OutputKind::Patched => ACCESS,
        OutputKind::Sources => DECOMPILE,
    }
}

/// A text input read when the graph is built. Only its digest enters the
/// stage configuration; the name is for messages.
#[derive(Debug, Clone)]
struct TextFile {
    name: String,
    contents: String,
    sha256: String,
}

impl TextFile {
    async fn read(path: &Path) -> PipelineResult<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::io(path, e))?;
        Ok(Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            sha256: sha256_hex(contents.as_bytes()),
            contents,
        })
    }
}

/// Run CPU-bound stage work off the async workers.
async fn blocking<T, F>(stage: &str, work: F) -> PipelineResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> PipelineResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PipelineError::stage(stage, format!("worker panicked: {e}")))?
}

/// Rebuild the table stored by the mappings stage.
fn load_mappings(artifact: &Artifact) -> PipelineResult<MappingTable> {
    let contents = std::str::from_utf8(&artifact.payload)
        .map_err(|e| PipelineError::stage(MAPPINGS, format!("stored mappings are not UTF-8: {e}")))?;
    resolve(&[MappingSource {
        name: format!("{MAPPINGS} {}", artifact.key.short()),
        format: MappingFormat::TinyV2,
        contents: contents.to_string(),
        override_existing: false,
    }])
}

// ── Provision ───────────────────────────────────────────

struct ProvisionStage {
    input: RawInput,
    provisioner: Provisioner,
}

#[async_trait]
impl Transform for ProvisionStage {
    async fn run(&self, _: StageInputs, _: CancellationFlag) -> PipelineResult<StageOutput> {
        Ok(StageOutput::new(self.provisioner.provision(&self.input).await?))
    }
}

// ── Mappings ────────────────────────────────────────────

struct MappingsStage {
    sources: Vec<(MappingSourceConfig, TextFile)>,
}

#[async_trait]
impl Transform for MappingsStage {
    async fn run(&self, _: StageInputs, _: CancellationFlag) -> PipelineResult<StageOutput> {
        let sources: Vec<MappingSource> = self
            .sources
            .iter()
            .map(|(config, file)| MappingSource {
                name: file.name.clone(),
                format: config.format,
                contents: file.contents.clone(),
                override_existing: config.override_existing,
            })
            .collect();
        let text = blocking(MAPPINGS, move || {
            let table = resolve(&sources)?;
            info!(
                "Resolved mappings: {} classes, {} members",
                table.class_count(),
                table.member_count()
            );
            Ok(write_tiny_v2(&table))
        })
        .await?;
        Ok(StageOutput::new(text.into_bytes()))
    }
}

// ── Merge ───────────────────────────────────────────────

struct MergeStage;

#[async_trait]
impl Transform for MergeStage {
    async fn run(&self, inputs: StageInputs, _: CancellationFlag) -> PipelineResult<StageOutput> {
        let client = inputs.optional(&provision_stage("client")).cloned();
        let server = inputs.optional(&provision_stage("server")).cloned();
        let merged = blocking(MERGE, move || match (client, server) {
            (Some(client), Some(server)) => {
                merge_jars(&Jar::read(&client.payload)?, &Jar::read(&server.payload)?)
            }
            (Some(client), None) => Ok(MergedJar::single(Jar::read(&client.payload)?, Side::Client)),
            (None, Some(server)) => Ok(MergedJar::single(Jar::read(&server.payload)?, Side::Server)),
            (None, None) => Err(PipelineError::stage(MERGE, "no client or server input")),
        })
        .await?;
        let provenance = serde_json::to_value(&merged.provenance)?;
        Ok(StageOutput::new(merged.jar.write()?).with_side_table(provenance))
    }
}

// ── Remap ───────────────────────────────────────────────

struct RemapStage {
    from: Namespace,
    to: Namespace,
    game_prefixes: Vec<String>,
    concurrency: usize,
}

#[async_trait]
impl Transform for RemapStage {
    async fn run(&self, inputs: StageInputs, cancel: CancellationFlag) -> PipelineResult<StageOutput> {
        let mappings = inputs.get(MAPPINGS)?.clone();
        let merged = inputs.get(MERGE)?.clone();
        let (from, to, prefixes) = (self.from, self.to, self.game_prefixes.clone());
        let (jar, remapper) = blocking(REMAP, move || {
            let table = Arc::new(load_mappings(&mappings)?);
            let jar = Jar::read(&merged.payload)?;
            let remapper = Remapper::new(table, from, to, &prefixes, &jar)?;
            Ok((Arc::new(jar), Arc::new(remapper)))
        })
        .await?;
        let remapped = remap_jar(jar, remapper, self.concurrency, &cancel).await?;
        Ok(StageOutput::new(remapped.write()?))
    }
}

// ── Access ──────────────────────────────────────────────

struct AccessStage {
    namespace: Namespace,
    files: Vec<TextFile>,
}

#[async_trait]
impl Transform for AccessStage {
    async fn run(&self, inputs: StageInputs, _: CancellationFlag) -> PipelineResult<StageOutput> {
        let remapped = inputs.get(REMAP)?.clone();
        let files = self.files.clone();
        let namespace = self.namespace;
        let (jar, summary) = blocking(ACCESS, move || {
            let sets = files
                .iter()
                .map(|f| parse_access_widener(&f.contents, &f.name))
                .collect::<PipelineResult<Vec<_>>>()?;
            let jar = Jar::read(&remapped.payload)?;
            match PatchSet::concat(sets)? {
                Some(patches) => {
                    info!(
                        "Applying {} access patches across {} classes",
                        patches.len(),
                        targeted_classes(&patches).len()
                    );
                    apply_patches(&jar, &patches, namespace)
                }
                None => Ok((jar, PatchSummary::default())),
            }
        })
        .await?;
        Ok(StageOutput::new(jar.write()?).with_side_table(serde_json::to_value(summary)?))
    }
}

// ── Decompile ───────────────────────────────────────────

/// Side table of the decompile artifact.
#[derive(Debug, Default, Serialize, Deserialize)]
struct DecompileManifest {
    failures: Vec<ClassFailure>,
}

struct DecompileStage {
    config: DecompilerConfig,
    /// Stage providing the classes.
    input: &'static str,
    /// Namespace of those classes.
    namespace: Namespace,
}

#[async_trait]
impl Transform for DecompileStage {
    async fn run(&self, inputs: StageInputs, cancel: CancellationFlag) -> PipelineResult<StageOutput> {
        let engine = DecompilerEngine::from_config(&self.config)?;
        let classes = inputs.get(self.input)?.clone();
        let mappings = inputs.optional(MAPPINGS).cloned();
        let (from, target) = (self.namespace, self.config.source_remap_namespace);

        let (jar, remapper) = blocking(DECOMPILE, move || {
            let jar = Arc::new(Jar::read(&classes.payload)?);
            let remapper = match (target, mappings) {
                (Some(to), Some(mappings)) if to != from => {
                    let table = load_mappings(&mappings)?;
                    Some(SourceRemapper::from_table(&table, from, to))
                }
                _ => None,
            };
            Ok((jar, remapper))
        })
        .await?;

        let sources = decompile_jar(&engine, jar, remapper.as_ref(), &cancel).await?;
        let manifest = DecompileManifest {
            failures: sources.failures.clone(),
        };
        Ok(StageOutput::new(sources.to_jar().write()?).with_side_table(serde_json::to_value(manifest)?))
    }

    fn class_failures(&self, meta: &ArtifactMeta) -> PipelineResult<Vec<ClassFailure>> {
        match &meta.side_table {
            Some(value) => Ok(serde_json::from_value::<DecompileManifest>(value.clone())?.failures),
            None => Ok(Vec::new()),
        }
    }
}

// ── Graph ───────────────────────────────────────────────

/// Build the standard stage graph: provision per side, mappings, merge,
/// remap, then access patches and decompilation when configured.
///
/// Mapping and patch files are read here so that their digests become part
/// of the stage keys.
pub async fn build_loom_graph(
    config: &PipelineConfig,
    provisioner: Provisioner,
) -> PipelineResult<StageGraph> {
    let mut stages = Vec::new();

    let mut merge = StageDescriptor::new(MERGE, Arc::new(MergeStage));
    let mut sides = Vec::new();
    for input in &config.inputs {
        let name = provision_stage(&input.side);
        stages.push(
            StageDescriptor::new(
                &name,
                Arc::new(ProvisionStage {
                    input: input.clone(),
                    provisioner: provisioner.clone(),
                }),
            )
            .config("side", &input.side)
            .config("location", input.location.to_string())
            .config("checksum", input.checksum.to_string()),
        );
        merge = merge.input(name);
        sides.push(input.side.as_str());
    }
    stages.push(merge.config("sides", sides.join(",")));

    let mut mapping_sources = Vec::with_capacity(config.mappings.len());
    for source in &config.mappings {
        mapping_sources.push((source.clone(), TextFile::read(&source.path).await?));
    }
    let mappings_config: StageConfig = mapping_sources
        .iter()
        .enumerate()
        .map(|(i, (source, file))| {
            (
                format!("source.{i:02}"),
                format!(
                    "{};override={};sha256={}",
                    source.format.as_str(),
                    source.override_existing,
                    file.sha256
                ),
            )
        })
        .collect();
    stages.push(
        StageDescriptor::new(MAPPINGS, Arc::new(MappingsStage { sources: mapping_sources }))
            .with_config(mappings_config),
    );

    stages.push(
        StageDescriptor::new(
            REMAP,
            Arc::new(RemapStage {
                from: config.source_namespace,
                to: config.target_namespace,
                game_prefixes: config.game_prefixes.clone(),
                concurrency: config.concurrency,
            }),
        )
        .input(MERGE)
        .input(MAPPINGS)
        .config("from", config.source_namespace.to_string())
        .config("to", config.target_namespace.to_string())
        .config("game_prefixes", config.game_prefixes.join(",")),
    );

    let mut classes_stage = REMAP;
    if !config.patches.is_empty() {
        let mut files = Vec::with_capacity(config.patches.len());
        for path in &config.patches {
            files.push(TextFile::read(path).await?);
        }
        let hashes: Vec<(String, String)> = files
            .iter()
            .enumerate()
            .map(|(i, file)| (format!("patch.{i:02}"), file.sha256.clone()))
            .collect();
        stages.push(
            StageDescriptor::new(
                ACCESS,
                Arc::new(AccessStage {
                    namespace: config.target_namespace,
                    files,
                }),
            )
            .input(REMAP)
            .config("namespace", config.target_namespace.to_string())
            .with_config(hashes.into_iter().collect()),
        );
        classes_stage = ACCESS;
    }

    if let Some(decompiler) = &config.decompiler {
        let mut decompile = StageDescriptor::new(
            DECOMPILE,
            Arc::new(DecompileStage {
                config: decompiler.clone(),
                input: classes_stage,
                namespace: config.target_namespace,
            }),
        )
        .input(classes_stage)
        .with_config(decompiler.stage_config())
        .config("namespace", config.target_namespace.to_string());
        if let Some(digest) = decompiler.engine_digest().await? {
            decompile = decompile.config("engine_jar.sha256", digest);
        }
        if decompiler
            .source_remap_namespace
            .is_some_and(|ns| ns != config.target_namespace)
        {
            decompile = decompile.input(MAPPINGS);
        }
        stages.push(decompile);
    }

    let graph = StageGraph::new(stages)?;
    debug!("Built loom graph with {} stages", graph.len());
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::core::cache::{ArtifactKey, CacheStore};
    use crate::core::classfile::builder::{ClassBuilder, CodeEmitter};
    use crate::core::classfile::code::op;
    use crate::core::classfile::{flags, ClassFile};
    use crate::core::decompile::EngineKind;
    use crate::core::downloader::{write_file, Downloader};
    use crate::core::jar::ProvenanceTable;
    use crate::core::pipeline::{Executor, Outcome, RunReport, StageStatus};
    use crate::core::provision::{Checksum, HashAlgorithm, InputLocation, MirrorConfig};

    const MAPPINGS_V2: &str = "tiny\t2\t0\tofficial\tintermediary\tnamed\n\
c\ta\tnet/minecraft/class_1\tnet/minecraft/Entity\n\
\tf\tI\tb\tfield_1\trenderDistance\n\
\tf\tI\tc\tfield_2\tviewDistance\n\
\tm\t()V\td\tmethod_1\ttick\n";

    const PATCH: &str = "accessWidener v2 named\naccessible method net/minecraft/Entity tick ()V\n";

    /// The shared class `a`: a variant-only field and a private method that
    /// reads it.
    fn variant(field: &str) -> Vec<u8> {
        let field_name = field.to_string();
        ClassBuilder::new("a", Some("java/lang/Object"))
            .unwrap()
            .access(flags::ACC_PUBLIC | flags::ACC_SUPER)
            .field(flags::ACC_PRIVATE, field, "I")
            .unwrap()
            .method(
                flags::ACC_PRIVATE,
                "d",
                "()V",
                Some(&|c: &mut CodeEmitter<'_>| {
                    c.aload(0)
                        .field_insn(op::GETFIELD, "a", &field_name, "I")?
                        .pop()
                        .return_void();
                    Ok(())
                }),
            )
            .unwrap()
            .to_bytes()
            .unwrap()
    }

    async fn write_jar(dir: &Path, name: &str, field: &str) -> (PathBuf, Checksum) {
        let mut jar = Jar::new();
        jar.classes.insert("a".into(), variant(field));
        let bytes = jar.write().unwrap();
        let path = write_file(&dir.join(name), &bytes).await.unwrap();
        (path, Checksum::of(HashAlgorithm::Sha256, &bytes))
    }

    async fn scenario(dir: &Path) -> PipelineConfig {
        let (client, client_sum) = write_jar(dir, "client.jar", "b").await;
        let (server, server_sum) = write_jar(dir, "server.jar", "c").await;
        let mappings = write_file(&dir.join("mappings.tiny"), MAPPINGS_V2.as_bytes())
            .await
            .unwrap();
        let patch = write_file(&dir.join("mod.accesswidener"), PATCH.as_bytes())
            .await
            .unwrap();
        PipelineConfig {
            cache_root: dir.join("cache"),
            concurrency: 4,
            inputs: vec![
                RawInput {
                    side: "client".into(),
                    location: InputLocation::Path(client),
                    checksum: client_sum,
                },
                RawInput {
                    side: "server".into(),
                    location: InputLocation::Path(server),
                    checksum: server_sum,
                },
            ],
            mappings: vec![MappingSourceConfig {
                path: mappings,
                format: MappingFormat::Auto,
                override_existing: false,
            }],
            patches: vec![patch],
            game_prefixes: vec!["net/minecraft/".into()],
            output_dir: dir.join("out"),
            ..PipelineConfig::default()
        }
    }

    async fn run(config: &PipelineConfig) -> (RunReport, CacheStore) {
        let provisioner = Provisioner::new(Downloader::new().unwrap(), MirrorConfig::default());
        let graph = build_loom_graph(config, provisioner).await.unwrap();
        let store = CacheStore::open(&config.cache_root).await.unwrap();
        let report = Executor::new(store.clone(), config.concurrency).run(&graph).await;
        (report, store)
    }

    async fn jar_of(store: &CacheStore, report: &RunReport, stage: &str) -> (Jar, Artifact) {
        let artifact = store.get(report.key(stage).unwrap()).await.unwrap().unwrap();
        (Jar::read(&artifact.payload).unwrap(), artifact)
    }

    #[tokio::test]
    async fn merges_remaps_and_widens_then_hits_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = scenario(dir.path()).await;

        let (report, store) = run(&config).await;
        assert_eq!(report.outcome, Outcome::Success, "{:?}", report.first_failure);
        assert_eq!(report.invocations, 6);

        let (merged, merge_artifact) = jar_of(&store, &report, MERGE).await;
        let class = ClassFile::parse(merged.class("a").unwrap(), "a").unwrap();
        let fields = class.field_signatures().unwrap();
        assert!(fields.contains(&("b".into(), "I".into())));
        assert!(fields.contains(&("c".into(), "I".into())));
        let provenance: ProvenanceTable = merge_artifact.side_table().unwrap().unwrap();
        assert_eq!(provenance["a"].fields["b:I"], Side::Client);
        assert_eq!(provenance["a"].fields["c:I"], Side::Server);

        let (remapped, _) = jar_of(&store, &report, REMAP).await;
        assert!(remapped.class("a").is_none());
        let entity = ClassFile::parse(remapped.class("net/minecraft/Entity").unwrap(), "Entity").unwrap();
        assert_eq!(entity.name().unwrap(), "net/minecraft/Entity");
        let fields = entity.field_signatures().unwrap();
        assert!(fields.contains(&("renderDistance".into(), "I".into())));
        assert!(fields.contains(&("viewDistance".into(), "I".into())));
        let tick = entity.find_method("tick", "()V").unwrap();
        assert!(tick.has_flag(flags::ACC_PRIVATE));

        let (patched, _) = jar_of(&store, &report, ACCESS).await;
        let entity = ClassFile::parse(patched.class("net/minecraft/Entity").unwrap(), "Entity").unwrap();
        let tick = entity.find_method("tick", "()V").unwrap();
        assert!(tick.has_flag(flags::ACC_PUBLIC));
        assert!(!tick.has_flag(flags::ACC_PRIVATE));
        let field = entity.find_field("renderDistance", "I").unwrap();
        assert!(field.has_flag(flags::ACC_PRIVATE));

        let (again, _) = run(&config).await;
        assert_eq!(again.outcome, Outcome::Success);
        assert_eq!(again.invocations, 0);
        assert_eq!(again.cache_hits, 6);
        for stage in &report.stages {
            assert_eq!(again.key(&stage.name), Some(&stage.key));
        }
    }

    #[tokio::test]
    async fn outputs_are_identical_across_fresh_caches() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = scenario(dir.path()).await;
        let (first, first_store) = run(&config).await;

        config.cache_root = dir.path().join("other-cache");
        config.concurrency = 1;
        let (second, second_store) = run(&config).await;

        for stage in [MERGE, REMAP, ACCESS] {
            assert_eq!(first.key(stage), second.key(stage));
            let (_, a) = jar_of(&first_store, &first, stage).await;
            let (_, b) = jar_of(&second_store, &second, stage).await;
            assert_eq!(a.payload, b.payload);
        }
    }

    #[tokio::test]
    async fn missing_patch_target_fails_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = scenario(dir.path()).await;
        let bad = write_file(
            &dir.path().join("bad.accesswidener"),
            b"accessWidener v2 named\naccessible method net/minecraft/Entity jump ()V\n",
        )
        .await
        .unwrap();
        config.patches = vec![bad];
        config.decompiler = Some(DecompilerConfig::default());

        let (report, store) = run(&config).await;
        assert_eq!(report.outcome, Outcome::Failure);
        let access = report.stage(ACCESS).unwrap();
        assert_eq!(access.status, StageStatus::Failed);
        assert!(matches!(access.error, Some(PipelineError::PatchTargetMissing { .. })));
        assert_eq!(report.skipped, vec![DECOMPILE]);
        assert!(!store.contains(report.key(ACCESS).unwrap()).await);
        assert_eq!(report.stage(REMAP).unwrap().status, StageStatus::Done);
    }

    #[tokio::test]
    async fn corrupt_input_stops_everything_downstream() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = scenario(dir.path()).await;
        config.inputs[1].checksum = Checksum::of(HashAlgorithm::Sha256, b"something else");

        let (report, _) = run(&config).await;
        let cause = report.first_failure.as_ref().unwrap();
        assert_eq!(cause.stage, "provision-server");
        assert_eq!(cause.kind, "integrity");
        assert_eq!(report.skipped, vec![MERGE, REMAP, ACCESS]);
        assert_eq!(report.stage(MAPPINGS).unwrap().status, StageStatus::Done);
    }

    #[tokio::test]
    async fn decompiles_the_patched_classes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = scenario(dir.path()).await;
        config.decompiler = Some(DecompilerConfig {
            threads: 2,
            ..DecompilerConfig::default()
        });

        let (report, store) = run(&config).await;
        assert_eq!(report.outcome, Outcome::Success, "{:?}", report.first_failure);
        let (sources, _) = jar_of(&store, &report, DECOMPILE).await;
        let text = sources.resource_str("net/minecraft/Entity.java").unwrap();
        assert!(text.contains("package net.minecraft;"));
        assert!(text.contains("public void tick()"));
        assert!(text.contains("private int renderDistance;"));
    }

    #[tokio::test]
    async fn mapping_changes_invalidate_only_dependent_stages() {
        let dir = tempfile::tempdir().unwrap();
        let config = scenario(dir.path()).await;
        run(&config).await;

        let renamed = MAPPINGS_V2.replace("\ttick\n", "\tupdate\n");
        write_file(&config.mappings[0].path, renamed.as_bytes()).await.unwrap();
        write_file(
            &config.patches[0],
            b"accessWidener v2 named\naccessible method net/minecraft/Entity update ()V\n",
        )
        .await
        .unwrap();

        let (report, _) = run(&config).await;
        assert_eq!(report.outcome, Outcome::Success, "{:?}", report.first_failure);
        for stage in ["provision-client", "provision-server", MERGE] {
            assert!(report.stage(stage).unwrap().cache_hit, "{stage}");
        }
        for stage in [MAPPINGS, REMAP, ACCESS] {
            assert!(!report.stage(stage).unwrap().cache_hit, "{stage}");
        }
        assert_eq!(report.invocations, 3);
    }

    async fn access_and_decompile_keys(config: &PipelineConfig) -> (ArtifactKey, ArtifactKey) {
        let provisioner = Provisioner::new(Downloader::new().unwrap(), MirrorConfig::default());
        let graph = build_loom_graph(config, provisioner).await.unwrap();
        let keys = Executor::derive_keys(&graph);
        let at = |name: &str| keys[graph.position(name).unwrap()].clone();
        (at(ACCESS), at(DECOMPILE))
    }

    #[tokio::test]
    async fn replacing_the_engine_jar_changes_only_the_decompile_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = scenario(dir.path()).await;
        let engine = write_file(&dir.path().join("engine.jar"), b"engine 1").await.unwrap();
        config.decompiler = Some(DecompilerConfig {
            engine: EngineKind::External,
            engine_jar: Some(engine.clone()),
            ..DecompilerConfig::default()
        });

        let before = access_and_decompile_keys(&config).await;
        assert_eq!(before, access_and_decompile_keys(&config).await);

        write_file(&engine, b"engine 2").await.unwrap();
        let after = access_and_decompile_keys(&config).await;
        assert_eq!(before.0, after.0);
        assert_ne!(before.1, after.1);
    }
}
