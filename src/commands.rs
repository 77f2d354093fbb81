use std::path::Path;

use tracing::{error, info, warn};

use crate::core::cache::CacheStore;
use crate::core::config::PipelineConfig;
use crate::core::downloader::{write_file, Downloader};
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::pipeline::{build_loom_graph, output_stage, CancellationFlag, Executor, RunReport};
use crate::core::provision::Provisioner;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Run the loom stage graph for `config` and hand the results to the host.
///
/// Requested outputs are copied out of the cache only when the run did not
/// fail; `manifest.json` is written to the output directory either way.
/// Stage and export failures are reported in the returned report, not as
/// `Err`.
pub async fn run_and_report(
    config: &PipelineConfig,
    cancel: CancellationFlag,
) -> PipelineResult<RunReport> {
    config.validate()?;
    let store = CacheStore::open(&config.cache_root).await?;
    let downloader = Downloader::new()?;
    let provisioner = Provisioner::new(downloader, config.mirrors.clone());
    let graph = build_loom_graph(config, provisioner).await?;

    let mut report = Executor::new(store.clone(), config.concurrency)
        .with_cancellation(cancel)
        .run(&graph)
        .await;

    if report.is_success() {
        for kind in &config.outputs {
            let stage = output_stage(*kind);
            let dest = config.output_dir.join(kind.file_name());
            let exported = match report.key(stage).cloned() {
                Some(key) => store.export(&key, &dest).await,
                None => Err(PipelineError::Config(format!(
                    "output '{}' needs stage '{}', which is not in the graph",
                    kind.as_str(),
                    stage
                ))),
            };
            match exported {
                Ok(()) => {
                    info!("Exported {} to {}", kind.as_str(), dest.display());
                    report.outputs.insert(kind.as_str().to_string(), dest);
                }
                Err(e) => {
                    error!("Export of {} failed: {}", kind.as_str(), e);
                    report.record_export_failure(stage, e);
                    break;
                }
            }
        }
    } else if let Some(cause) = &report.first_failure {
        error!(
            "Pipeline failed at stage {} ({}): {}",
            cause.stage, cause.kind, cause.message
        );
        if !report.skipped.is_empty() {
            warn!("Skipped stages: {}", report.skipped.join(", "));
        }
    }

    let manifest = config.output_dir.join(MANIFEST_FILE);
    write_file(&manifest, report.to_json()?.as_bytes()).await?;
    Ok(report)
}

/// Load a config file and run it, cancelling cleanly on Ctrl-C.
pub async fn load_and_run(path: &Path) -> PipelineResult<RunReport> {
    crate::init_logging();
    let config = PipelineConfig::load(path).await?;

    let cancel = CancellationFlag::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing running stages");
                cancel.cancel();
            }
        })
    };
    let result = run_and_report(&config, cancel).await;
    watcher.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classfile::builder::ClassBuilder;
    use crate::core::classfile::flags;
    use crate::core::config::{MappingSourceConfig, OutputKind};
    use crate::core::jar::Jar;
    use crate::core::mappings::MappingFormat;
    use crate::core::pipeline::Outcome;
    use crate::core::provision::{Checksum, HashAlgorithm, InputLocation, RawInput};

    async fn client_only(dir: &Path) -> PipelineConfig {
        let mut jar = Jar::new();
        jar.classes.insert(
            "a".into(),
            ClassBuilder::new("a", Some("java/lang/Object"))
                .unwrap()
                .field(flags::ACC_PUBLIC, "b", "I")
                .unwrap()
                .to_bytes()
                .unwrap(),
        );
        let bytes = jar.write().unwrap();
        let client = write_file(&dir.join("client.jar"), &bytes).await.unwrap();
        let mappings = write_file(
            &dir.join("mappings.tiny"),
            b"tiny\t2\t0\tofficial\tintermediary\tnamed\nc\ta\tnet/minecraft/class_1\tnet/minecraft/Block\n\tf\tI\tb\tfield_1\thardness\n",
        )
        .await
        .unwrap();

        PipelineConfig {
            cache_root: dir.join("cache"),
            concurrency: 2,
            inputs: vec![RawInput {
                side: "client".into(),
                location: InputLocation::Path(client),
                checksum: Checksum::of(HashAlgorithm::Sha1, &bytes),
            }],
            mappings: vec![MappingSourceConfig {
                path: mappings,
                format: MappingFormat::TinyV2,
                override_existing: false,
            }],
            output_dir: dir.join("out"),
            outputs: vec![OutputKind::Mappings, OutputKind::Merged, OutputKind::Remapped],
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn exports_outputs_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let config = client_only(dir.path()).await;

        let report = run_and_report(&config, CancellationFlag::new()).await.unwrap();
        assert_eq!(report.outcome, Outcome::Success);
        assert_eq!(report.outputs.len(), 3);

        let remapped = tokio::fs::read(&report.outputs["remapped"]).await.unwrap();
        let jar = Jar::read(&remapped).unwrap();
        assert!(jar.class("net/minecraft/Block").is_some());
        let tiny = tokio::fs::read_to_string(config.output_dir.join("mappings.tiny"))
            .await
            .unwrap();
        assert!(tiny.starts_with("tiny\t2\t0\tofficial\tintermediary\tnamed\n"));

        let manifest = tokio::fs::read_to_string(config.output_dir.join(MANIFEST_FILE))
            .await
            .unwrap();
        let manifest: serde_json::Value = serde_json::from_str(&manifest).unwrap();
        assert_eq!(manifest["outcome"], "success");
        assert_eq!(manifest["run_id"], report.run_id.to_string());
        assert_eq!(manifest["cache_misses"], 4);
        assert_eq!(manifest["stages"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn failed_runs_export_only_the_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = client_only(dir.path()).await;
        config.inputs[0].checksum = Checksum::of(HashAlgorithm::Sha1, b"not the jar");

        let report = run_and_report(&config, CancellationFlag::new()).await.unwrap();
        assert_eq!(report.outcome, Outcome::Failure);
        assert!(report.outputs.is_empty());
        assert!(!config.output_dir.join("remapped.jar").exists());

        let manifest = tokio::fs::read_to_string(config.output_dir.join(MANIFEST_FILE))
            .await
            .unwrap();
        let manifest: serde_json::Value = serde_json::from_str(&manifest).unwrap();
        assert_eq!(manifest["outcome"], "failure");
        assert_eq!(manifest["first_failure"]["kind"], "integrity");
        assert_eq!(manifest["skipped"], serde_json::json!(["merge", "remap"]));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = client_only(dir.path()).await;
        config.mappings.clear();
        assert!(matches!(
            run_and_report(&config, CancellationFlag::new()).await,
            Err(PipelineError::Config(_))
        ));
        assert!(!config.output_dir.join(MANIFEST_FILE).exists());
    }

    #[tokio::test]
    async fn corrupted_cache_entries_fail_the_export_but_keep_the_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let config = client_only(dir.path()).await;
        run_and_report(&config, CancellationFlag::new()).await.unwrap();

        let mut shards = tokio::fs::read_dir(config.cache_root.join("objects")).await.unwrap();
        while let Some(shard) = shards.next_entry().await.unwrap() {
            let mut entries = tokio::fs::read_dir(shard.path()).await.unwrap();
            while let Some(entry) = entries.next_entry().await.unwrap() {
                if entry.path().extension().is_some_and(|ext| ext == "bin") {
                    tokio::fs::write(entry.path(), b"evil").await.unwrap();
                }
            }
        }
        tokio::fs::remove_dir_all(&config.output_dir).await.unwrap();

        let report = run_and_report(&config, CancellationFlag::new()).await.unwrap();
        assert_eq!(report.cache_hits, 4);
        assert_eq!(report.outcome, Outcome::Failure);
        let cause = report.first_failure.as_ref().unwrap();
        assert_eq!((cause.stage.as_str(), cause.kind), ("mappings", "integrity"));
        assert!(!config.output_dir.join("mappings.tiny").exists());

        let manifest = tokio::fs::read_to_string(config.output_dir.join(MANIFEST_FILE))
            .await
            .unwrap();
        let manifest: serde_json::Value = serde_json::from_str(&manifest).unwrap();
        assert_eq!(manifest["outcome"], "failure");
        assert_eq!(manifest["first_failure"]["kind"], "integrity");
    }
}
