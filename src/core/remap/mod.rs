// ─── Remapping ───
// Renames every symbolic reference in a class set from one namespace to
// another. Each class is remapped on its own against a shared, read-only
// view of the mappings and the jar's class hierarchy, so classes are
// processed in parallel.

pub mod class;
pub mod hierarchy;
pub mod metadata;
pub mod remapper;

pub use class::remap_class;
pub use hierarchy::{ClassHierarchy, GameScope};
pub use remapper::Remapper;

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tracing::info;

use crate::core::error::{PipelineError, PipelineResult};
use crate::core::jar::Jar;
use crate::core::pipeline::CancellationFlag;

/// Remap a whole jar. Classes are dispatched to blocking workers, at most
/// `concurrency` at a time; cancellation is checked before each class.
/// When several classes fail, the error of the first one by name is
/// reported.
pub async fn remap_jar(
    jar: Arc<Jar>,
    remapper: Arc<Remapper>,
    concurrency: usize,
    cancel: &CancellationFlag,
) -> PipelineResult<Jar> {
    let names: Vec<String> = jar.classes.keys().cloned().collect();
    let total = names.len();

    let mut results: Vec<(usize, PipelineResult<(String, Vec<u8>)>)> =
        stream::iter(names.into_iter().enumerate())
            .map(|(i, name)| {
                let jar = Arc::clone(&jar);
                let remapper = Arc::clone(&remapper);
                let cancel = cancel.clone();
                async move {
                    if let Err(e) = cancel.checkpoint() {
                        return (i, Err(e));
                    }
                    let result = tokio::task::spawn_blocking(move || {
                        let bytes = jar.class(&name).unwrap_or_default();
                        remap_class(bytes, &name, &remapper)
                    })
                    .await
                    .map_err(|e| PipelineError::stage("remap", format!("worker panicked: {e}")))
                    .and_then(|r| r);
                    (i, result)
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
    results.sort_by_key(|(i, _)| *i);

    let mut classes = BTreeMap::new();
    for (_, result) in results {
        let (name, bytes) = result?;
        if classes.insert(name.clone(), bytes).is_some() {
            return Err(PipelineError::stage(
                "remap",
                format!("two classes were renamed to {name}"),
            ));
        }
    }

    let resources = metadata::remap_resources(&jar.resources, &remapper)?;
    info!(
        "Remapped {} classes from {} to {}",
        total,
        remapper.from(),
        remapper.to()
    );
    Ok(Jar { classes, resources })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classfile::builder::ClassBuilder;
    use crate::core::mappings::{resolve, MappingFormat, MappingSource, Namespace};

    fn setup() -> (Arc<Jar>, Arc<Remapper>) {
        let mappings = "tiny\t2\t0\tofficial\tnamed
c\ta\tnet/minecraft/Alpha
c\tb\tnet/minecraft/Beta
";
        let table = resolve(&[MappingSource {
            name: "test".into(),
            format: MappingFormat::Auto,
            contents: mappings.into(),
            override_existing: false,
        }])
        .unwrap();
        let mut jar = Jar::new();
        for name in ["a", "b"] {
            jar.classes.insert(
                name.into(),
                ClassBuilder::new(name, Some("java/lang/Object")).unwrap().to_bytes().unwrap(),
            );
        }
        jar.resources.insert("assets/lang.json".into(), b"{}".to_vec());
        let remapper = Remapper::new(
            Arc::new(table),
            Namespace::Obfuscated,
            Namespace::Named,
            &[],
            &jar,
        )
        .unwrap();
        (Arc::new(jar), Arc::new(remapper))
    }

    #[tokio::test]
    async fn remaps_every_class_and_keeps_resources() {
        let (jar, remapper) = setup();
        let out = remap_jar(jar, remapper, 4, &CancellationFlag::new()).await.unwrap();
        let names: Vec<&str> = out.classes.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["net/minecraft/Alpha", "net/minecraft/Beta"]);
        assert_eq!(out.resources["assets/lang.json"], b"{}");
    }

    #[tokio::test]
    async fn parallel_runs_are_byte_identical() {
        let (jar, remapper) = setup();
        let cancel = CancellationFlag::new();
        let one = remap_jar(Arc::clone(&jar), Arc::clone(&remapper), 1, &cancel).await.unwrap();
        let many = remap_jar(jar, remapper, 8, &cancel).await.unwrap();
        assert_eq!(one.write().unwrap(), many.write().unwrap());
    }

    #[tokio::test]
    async fn cancellation_stops_at_class_boundaries() {
        let (jar, remapper) = setup();
        let cancel = CancellationFlag::new();
        cancel.cancel();
        assert!(matches!(
            remap_jar(jar, remapper, 2, &cancel).await,
            Err(PipelineError::Cancelled)
        ));
    }
}
