use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{source_path, source_units, DecompiledSources, Decompiler};
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::jar::Jar;
use crate::core::pipeline::CancellationFlag;

/// Heap limits for a forked engine when none is configured.
const MIN_HEAP_MB: u64 = 1024;
const MAX_HEAP_MB: u64 = 4096;

/// Forks a Fernflower-compatible engine jar:
/// `java -Xmx<mem>M -jar <engine.jar> -<opt>=<value>... <input.jar> <out dir>`.
///
/// Classes the engine produced no source for are reported per class.
#[derive(Debug, Clone)]
pub struct ExternalDecompiler {
    pub java: PathBuf,
    pub engine_jar: PathBuf,
    pub threads: usize,
    pub memory_mb: u64,
    pub options: BTreeMap<String, String>,
}

/// Half of physical memory, clamped to a sensible JVM heap range.
pub fn default_heap_mb() -> u64 {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    let total_mb = system.total_memory() / (1024 * 1024);
    (total_mb / 2).clamp(MIN_HEAP_MB, MAX_HEAP_MB)
}

impl ExternalDecompiler {
    fn command_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec![
            format!("-Xmx{}M", self.memory_mb),
            "-jar".to_string(),
            self.engine_jar.to_string_lossy().into_owned(),
        ];
        let mut options = self.options.clone();
        options
            .entry("thr".to_string())
            .or_insert_with(|| self.threads.max(1).to_string());
        for (key, value) in &options {
            args.push(format!("-{key}={value}"));
        }
        args.push(input.to_string_lossy().into_owned());
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl Decompiler for ExternalDecompiler {
    fn name(&self) -> &'static str {
        "external"
    }

    async fn decompile(
        &self,
        jar: Arc<Jar>,
        cancel: &CancellationFlag,
    ) -> PipelineResult<DecompiledSources> {
        cancel.checkpoint()?;
        let work = std::env::temp_dir().join(format!("loom-decompile-{}", Uuid::new_v4()));
        let result = self.run_in(&work, &jar).await;
        if let Err(e) = tokio::fs::remove_dir_all(&work).await {
            warn!("could not clean up {}: {}", work.display(), e);
        }
        result
    }
}

impl ExternalDecompiler {
    async fn run_in(&self, work: &Path, jar: &Jar) -> PipelineResult<DecompiledSources> {
        let input = work.join("input.jar");
        let output = work.join("out");
        tokio::fs::create_dir_all(&output)
            .await
            .map_err(|e| PipelineError::io(&output, e))?;
        let bytes = jar.write()?;
        tokio::fs::write(&input, &bytes)
            .await
            .map_err(|e| PipelineError::io(&input, e))?;

        let args = self.command_args(&input, &output);
        info!("Running {} {}", self.java.display(), args.join(" "));
        let result = tokio::process::Command::new(&self.java)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::io(&self.java, e))?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(20).collect();
            return Err(PipelineError::stage(
                "decompile",
                format!(
                    "engine exited with {}: {}",
                    result.status,
                    tail.into_iter().rev().collect::<Vec<_>>().join("\n")
                ),
            ));
        }

        let produced = collect_sources(&output).await?;
        debug!("engine produced {} source files", produced.len());

        let mut out = DecompiledSources::default();
        for unit in source_units(jar) {
            let path = source_path(&unit);
            match produced.get(&path) {
                Some(text) => {
                    out.sources.insert(path, text.clone());
                }
                None => out.record_failure(
                    &unit,
                    PipelineError::DecompileFailure {
                        class: unit.clone(),
                        message: "engine produced no source".to_string(),
                    },
                ),
            }
        }
        Ok(out)
    }
}

/// Sources written by the engine, keyed by their path relative to `root`.
/// Engines either write a sources jar named after the input or a plain
/// directory tree.
async fn collect_sources(root: &Path) -> PipelineResult<BTreeMap<String, String>> {
    let jar_out = root.join("input.jar");
    if tokio::fs::try_exists(&jar_out).await.unwrap_or(false) {
        let bytes = tokio::fs::read(&jar_out)
            .await
            .map_err(|e| PipelineError::io(&jar_out, e))?;
        let jar = Jar::read(&bytes)?;
        return Ok(jar
            .resources
            .into_iter()
            .filter(|(path, _)| path.ends_with(".java"))
            .map(|(path, bytes)| (path, String::from_utf8_lossy(&bytes).into_owned()))
            .collect());
    }

    let mut out = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| PipelineError::io(&dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::io(&dir, e))?
        {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|e| e == "java") {
                let Ok(relative) = path.strip_prefix(root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let text = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| PipelineError::io(&path, e))?;
                out.insert(key, text);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_fernflower_style_arguments() {
        let engine = ExternalDecompiler {
            java: PathBuf::from("java"),
            engine_jar: PathBuf::from("/opt/vineflower.jar"),
            threads: 3,
            memory_mb: 2048,
            options: BTreeMap::from([("dgs".to_string(), "1".to_string())]),
        };
        let args = engine.command_args(Path::new("/w/input.jar"), Path::new("/w/out"));
        assert_eq!(
            args,
            vec![
                "-Xmx2048M",
                "-jar",
                "/opt/vineflower.jar",
                "-dgs=1",
                "-thr=3",
                "/w/input.jar",
                "/w/out",
            ]
        );
    }

    #[test]
    fn default_heap_is_clamped() {
        let heap = default_heap_mb();
        assert!((MIN_HEAP_MB..=MAX_HEAP_MB).contains(&heap));
    }

    #[tokio::test]
    async fn collects_sources_from_a_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("net/minecraft");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("Entity.java"), "class Entity {}").unwrap();
        std::fs::write(nested.join("notes.txt"), "ignored").unwrap();

        let sources = collect_sources(dir.path()).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources["net/minecraft/Entity.java"], "class Entity {}");
    }
}
