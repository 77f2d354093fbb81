use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cancel::CancellationFlag;
use super::graph::StageGraph;
use super::report::{outcome_of, ClassFailure, FailureCause, RunReport, StageReport, StageStatus};
use super::stage::{StageInputs, Transform};
use crate::core::cache::{Artifact, ArtifactKey, CacheStore, PutOutcome, StageConfig};
use crate::core::error::{PipelineError, PipelineResult};

/// Per-stage state during a run.
#[derive(Debug)]
enum StageState {
    Pending,
    Running,
    Done {
        cache_hit: bool,
        duration_ms: u64,
        failures: Vec<ClassFailure>,
    },
    Failed {
        error: PipelineError,
        duration_ms: u64,
    },
    Skipped,
}

/// Everything a spawned stage task needs, owned.
struct Job {
    index: usize,
    name: String,
    key: ArtifactKey,
    config: StageConfig,
    transform: Arc<dyn Transform>,
    /// `(input stage, key, artifact if already in memory)`.
    inputs: Vec<(String, ArtifactKey, Option<Artifact>)>,
    store: CacheStore,
    cancel: CancellationFlag,
}

struct JobResult {
    index: usize,
    invoked: bool,
    duration_ms: u64,
    /// Inputs that had to be read from the store, kept for later dependents.
    loaded: Vec<(String, Artifact)>,
    result: PipelineResult<Artifact>,
}

/// Runs a stage graph against a cache store with bounded parallelism.
#[derive(Debug, Clone)]
pub struct Executor {
    store: CacheStore,
    concurrency: usize,
    cancel: CancellationFlag,
}

impl Executor {
    pub fn new(store: CacheStore, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
            cancel: CancellationFlag::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Compute the key of every stage, in topological order.
    pub fn derive_keys(graph: &StageGraph) -> Vec<ArtifactKey> {
        let mut keys: Vec<ArtifactKey> = Vec::with_capacity(graph.len());
        for (i, stage) in graph.stages().iter().enumerate() {
            let inputs: Vec<(&str, &ArtifactKey)> = graph
                .inputs_of(i)
                .into_iter()
                .map(|j| (graph.stages()[j].name.as_str(), &keys[j]))
                .collect();
            let key = ArtifactKey::derive(&stage.name, &inputs, &stage.config);
            keys.push(key);
        }
        keys
    }

    /// Run every stage whose output is not yet stored and report the
    /// outcome. Never returns early: failures and cancellation end up in the
    /// report.
    pub async fn run(&self, graph: &StageGraph) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            "Pipeline run {} starting: {} stages, concurrency={}",
            run_id,
            graph.len(),
            self.concurrency
        );

        let keys = Self::derive_keys(graph);
        let mut states: Vec<StageState> = Vec::with_capacity(graph.len());
        let mut first_failure: Option<FailureCause> = None;
        let mut cache_misses = 0;

        // ── Cache lookup ────────────────────────────────
        // Lookups are independent per stage, so a hit never waits on its
        // upstream stages.
        for (i, stage) in graph.stages().iter().enumerate() {
            let state = match self.store.meta(&keys[i]).await {
                Ok(Some(meta)) => match stage.transform.class_failures(&meta) {
                    Ok(failures) => {
                        debug!("stage {} cache hit {}", stage.name, keys[i].short());
                        StageState::Done {
                            cache_hit: true,
                            duration_ms: 0,
                            failures,
                        }
                    }
                    Err(error) => StageState::Failed {
                        error,
                        duration_ms: 0,
                    },
                },
                Ok(None) => {
                    cache_misses += 1;
                    debug!("stage {} cache miss {}", stage.name, keys[i].short());
                    StageState::Pending
                }
                Err(error) => StageState::Failed {
                    error,
                    duration_ms: 0,
                },
            };
            states.push(state);
        }
        for i in 0..states.len() {
            let cause = match &states[i] {
                StageState::Failed { error, .. } => {
                    Some(FailureCause::new(&graph.stages()[i].name, error))
                }
                _ => None,
            };
            if let Some(cause) = cause {
                warn!("stage {} failed: {}", cause.stage, cause.message);
                first_failure.get_or_insert(cause);
                skip_downstream(graph, &mut states, i);
            }
        }

        // ── Dispatch ────────────────────────────────────
        let mut produced: HashMap<String, Artifact> = HashMap::new();
        let mut running = FuturesUnordered::new();
        let mut invocations = 0;

        loop {
            if !self.cancel.is_cancelled() {
                for i in 0..states.len() {
                    if running.len() >= self.concurrency {
                        break;
                    }
                    if !matches!(states[i], StageState::Pending) || !inputs_done(graph, &states, i) {
                        continue;
                    }
                    let job = self.job(graph, &keys, &produced, i);
                    states[i] = StageState::Running;
                    info!("stage {} running", job.name);
                    let handle = tokio::spawn(execute(job));
                    running.push(async move { (i, handle.await) });
                }
            }

            let Some((index, joined)) = running.next().await else {
                break;
            };
            let done = joined.unwrap_or_else(|e| JobResult {
                index,
                invoked: true,
                duration_ms: 0,
                loaded: Vec::new(),
                result: Err(PipelineError::stage(
                    &graph.stages()[index].name,
                    format!("stage task aborted: {e}"),
                )),
            });

            if done.invoked {
                invocations += 1;
            }
            for (name, artifact) in done.loaded {
                produced.entry(name).or_insert(artifact);
            }

            let stage = &graph.stages()[done.index];
            match done.result {
                Ok(artifact) => match stage.transform.class_failures(&artifact.meta) {
                    Ok(failures) => {
                        info!(
                            "stage {} done in {}ms ({})",
                            stage.name,
                            done.duration_ms,
                            artifact.key.short()
                        );
                        states[done.index] = StageState::Done {
                            cache_hit: false,
                            duration_ms: done.duration_ms,
                            failures,
                        };
                        produced.insert(stage.name.clone(), artifact);
                    }
                    Err(error) => {
                        self.fail(graph, &mut states, &mut first_failure, done.index, error, done.duration_ms);
                    }
                },
                Err(error) => {
                    self.fail(graph, &mut states, &mut first_failure, done.index, error, done.duration_ms);
                }
            }
        }

        // Whatever never got dispatched was cut off by cancellation.
        for state in states.iter_mut() {
            if matches!(state, StageState::Pending) {
                *state = StageState::Skipped;
            }
        }
        if self.cancel.is_cancelled() && first_failure.is_none() {
            if let Some(stage) = graph.stages().iter().zip(&states).find_map(|(s, st)| {
                matches!(st, StageState::Skipped).then_some(s)
            }) {
                first_failure = Some(FailureCause::new(&stage.name, &PipelineError::Cancelled));
            }
        }

        self.report(
            graph,
            keys,
            states,
            first_failure,
            ReportCounts {
                run_id,
                started_at,
                cache_misses,
                invocations,
            },
        )
    }

    fn job(
        &self,
        graph: &StageGraph,
        keys: &[ArtifactKey],
        produced: &HashMap<String, Artifact>,
        i: usize,
    ) -> Job {
        let stage = &graph.stages()[i];
        let inputs = graph
            .inputs_of(i)
            .into_iter()
            .map(|j| {
                let name = graph.stages()[j].name.clone();
                let artifact = produced.get(&name).cloned();
                (name, keys[j].clone(), artifact)
            })
            .collect();
        Job {
            index: i,
            name: stage.name.clone(),
            key: keys[i].clone(),
            config: stage.config.clone(),
            transform: Arc::clone(&stage.transform),
            inputs,
            store: self.store.clone(),
            cancel: self.cancel.clone(),
        }
    }

    fn fail(
        &self,
        graph: &StageGraph,
        states: &mut [StageState],
        first_failure: &mut Option<FailureCause>,
        index: usize,
        error: PipelineError,
        duration_ms: u64,
    ) {
        let name = &graph.stages()[index].name;
        warn!("stage {} failed: {}", name, error);
        first_failure.get_or_insert_with(|| FailureCause::new(name, &error));
        states[index] = StageState::Failed { error, duration_ms };
        skip_downstream(graph, states, index);
    }

    fn report(
        &self,
        graph: &StageGraph,
        keys: Vec<ArtifactKey>,
        states: Vec<StageState>,
        first_failure: Option<FailureCause>,
        counts: ReportCounts,
    ) -> RunReport {
        let mut stages = Vec::with_capacity(states.len());
        let mut skipped = Vec::new();
        let mut cache_hits = 0;

        for ((stage, key), state) in graph.stages().iter().zip(keys).zip(states) {
            let mut report = StageReport {
                name: stage.name.clone(),
                status: StageStatus::Skipped,
                key,
                cache_hit: false,
                duration_ms: 0,
                error: None,
                failed_classes: Vec::new(),
            };
            match state {
                StageState::Done {
                    cache_hit,
                    duration_ms,
                    failures,
                } => {
                    if cache_hit {
                        cache_hits += 1;
                    }
                    report.status = StageStatus::Done;
                    report.cache_hit = cache_hit;
                    report.duration_ms = duration_ms;
                    report.failed_classes = failures;
                }
                StageState::Failed { error, duration_ms } => {
                    report.status = StageStatus::Failed;
                    report.duration_ms = duration_ms;
                    report.error = Some(error);
                }
                StageState::Pending | StageState::Running | StageState::Skipped => {
                    skipped.push(stage.name.clone());
                }
            }
            stages.push(report);
        }

        let outcome = outcome_of(&stages);
        info!(
            "Pipeline run {} finished: {:?}, {} hits, {} misses, {} invocations",
            counts.run_id, outcome, cache_hits, counts.cache_misses, counts.invocations
        );
        RunReport {
            run_id: counts.run_id,
            started_at: counts.started_at,
            finished_at: Utc::now(),
            outcome,
            stages,
            cache_hits,
            cache_misses: counts.cache_misses,
            invocations: counts.invocations,
            first_failure,
            skipped,
            outputs: BTreeMap::new(),
        }
    }
}

struct ReportCounts {
    run_id: Uuid,
    started_at: chrono::DateTime<Utc>,
    cache_misses: usize,
    invocations: usize,
}

fn inputs_done(graph: &StageGraph, states: &[StageState], i: usize) -> bool {
    graph
        .inputs_of(i)
        .into_iter()
        .all(|j| matches!(states[j], StageState::Done { .. }))
}

/// Mark every not-yet-finished dependent of `index` as skipped. Dependents
/// already satisfied from the cache keep their state.
fn skip_downstream(graph: &StageGraph, states: &mut [StageState], index: usize) {
    for j in graph.downstream_of(index) {
        if matches!(states[j], StageState::Pending) {
            debug!("stage {} skipped", graph.stages()[j].name);
            states[j] = StageState::Skipped;
        }
    }
}

async fn execute(job: Job) -> JobResult {
    let started = Instant::now();
    let mut loaded = Vec::new();
    let mut invoked = false;
    let result = run_job(&job, &mut loaded, &mut invoked).await;
    JobResult {
        index: job.index,
        invoked,
        duration_ms: started.elapsed().as_millis() as u64,
        loaded,
        result,
    }
}

async fn run_job(
    job: &Job,
    loaded: &mut Vec<(String, Artifact)>,
    invoked: &mut bool,
) -> PipelineResult<Artifact> {
    let mut artifacts = BTreeMap::new();
    for (name, key, artifact) in &job.inputs {
        let artifact = match artifact {
            Some(artifact) => artifact.clone(),
            None => {
                let artifact = job.store.get(key).await?.ok_or_else(|| {
                    PipelineError::stage(
                        &job.name,
                        format!("cached output of '{}' ({}) disappeared", name, key.short()),
                    )
                })?;
                loaded.push((name.clone(), artifact.clone()));
                artifact
            }
        };
        artifacts.insert(name.clone(), artifact);
    }

    job.cancel.checkpoint()?;
    *invoked = true;
    let output = job
        .transform
        .run(StageInputs::new(&job.name, artifacts), job.cancel.clone())
        .await?;

    let (artifact, outcome) = job
        .store
        .put(&job.key, &job.name, &job.config, output.payload, output.side_table)
        .await?;
    if outcome == PutOutcome::AlreadyExists {
        debug!("stage {} output was stored concurrently", job.name);
    }
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::core::pipeline::{Outcome, StageDescriptor, StageOutput};

    /// Concatenates its inputs after a fixed tag, counting invocations.
    struct Concat {
        tag: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transform for Concat {
        async fn run(&self, inputs: StageInputs, _: CancellationFlag) -> PipelineResult<StageOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut payload = self.tag.as_bytes().to_vec();
            for (_, artifact) in inputs.iter() {
                payload.extend_from_slice(&artifact.payload);
            }
            Ok(StageOutput::new(payload))
        }
    }

    struct Fails;

    #[async_trait]
    impl Transform for Fails {
        async fn run(&self, inputs: StageInputs, _: CancellationFlag) -> PipelineResult<StageOutput> {
            Err(PipelineError::stage(inputs.stage(), "boom"))
        }
    }

    /// Cancels the run from inside its own transformation.
    struct CancelsRun;

    #[async_trait]
    impl Transform for CancelsRun {
        async fn run(&self, _: StageInputs, cancel: CancellationFlag) -> PipelineResult<StageOutput> {
            cancel.cancel();
            Ok(StageOutput::new(b"first".to_vec()))
        }
    }

    fn concat(name: &str, tag: &'static str, calls: &Arc<AtomicUsize>) -> StageDescriptor {
        StageDescriptor::new(
            name,
            Arc::new(Concat {
                tag,
                calls: Arc::clone(calls),
            }),
        )
    }

    fn diamond(calls: &Arc<AtomicUsize>, tag: &str) -> StageGraph {
        StageGraph::new(vec![
            concat("a", "a", calls).config("tag", tag),
            concat("b", "b", calls).input("a"),
            concat("c", "c", calls).input("a"),
            concat("d", "d", calls).input("b").input("c"),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn second_run_is_served_entirely_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let graph = diamond(&calls, "v1");

        let first = Executor::new(store.clone(), 4).run(&graph).await;
        assert_eq!(first.outcome, Outcome::Success);
        assert_eq!(first.invocations, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let second = Executor::new(store.clone(), 4).run(&graph).await;
        assert_eq!(second.outcome, Outcome::Success);
        assert_eq!(second.invocations, 0);
        assert_eq!(second.cache_hits, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        for stage in &first.stages {
            assert_eq!(second.key(&stage.name), Some(&stage.key));
        }

        let d = store.get(first.key("d").unwrap()).await.unwrap().unwrap();
        assert_eq!(&*d.payload, b"dbaca");
    }

    #[tokio::test]
    async fn changed_config_recomputes_only_what_depends_on_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let graph = StageGraph::new(vec![
            concat("a", "a", &calls),
            concat("b", "b", &calls).config("level", "1").input("a"),
        ])
        .unwrap();
        Executor::new(store.clone(), 2).run(&graph).await;

        let changed = StageGraph::new(vec![
            concat("a", "a", &calls),
            concat("b", "b", &calls).config("level", "2").input("a"),
        ])
        .unwrap();
        let report = Executor::new(store, 2).run(&changed).await;
        assert_eq!(report.invocations, 1);
        assert!(report.stage("a").unwrap().cache_hit);
        assert!(!report.stage("b").unwrap().cache_hit);
    }

    #[tokio::test]
    async fn failure_skips_every_dependent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let graph = StageGraph::new(vec![
            StageDescriptor::new("a", Arc::new(Fails)),
            concat("b", "b", &calls).input("a"),
            concat("c", "c", &calls).input("b"),
            concat("side", "s", &calls),
        ])
        .unwrap();

        let report = Executor::new(store.clone(), 2).run(&graph).await;
        assert_eq!(report.outcome, Outcome::Failure);
        assert_eq!(report.stage("a").unwrap().status, StageStatus::Failed);
        assert_eq!(report.stage("b").unwrap().status, StageStatus::Skipped);
        assert_eq!(report.stage("c").unwrap().status, StageStatus::Skipped);
        assert_eq!(report.stage("side").unwrap().status, StageStatus::Done);
        assert_eq!(report.skipped, vec!["b", "c"]);

        let cause = report.first_failure.as_ref().unwrap();
        assert_eq!(cause.stage, "a");
        assert_eq!(cause.kind, "stage_failure");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for name in ["a", "b", "c"] {
            assert!(!store.contains(report.key(name).unwrap()).await);
        }
    }

    #[tokio::test]
    async fn cancellation_stops_dispatch_but_keeps_finished_work() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let graph = StageGraph::new(vec![
            StageDescriptor::new("first", Arc::new(CancelsRun)),
            concat("second", "2", &calls).input("first"),
        ])
        .unwrap();

        let report = Executor::new(store.clone(), 1).run(&graph).await;
        assert_eq!(report.outcome, Outcome::Failure);
        assert_eq!(report.stage("first").unwrap().status, StageStatus::Done);
        assert_eq!(report.skipped, vec!["second"]);
        assert_eq!(report.first_failure.as_ref().unwrap().kind, "cancelled");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let retry = Executor::new(store, 1).run(&graph).await;
        assert_eq!(retry.outcome, Outcome::Success);
        assert!(retry.stage("first").unwrap().cache_hit);
        assert_eq!(retry.invocations, 1);
    }

    #[tokio::test]
    async fn concurrency_does_not_change_outputs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let graph = diamond(&calls, "v1");
        let mut payloads = Vec::new();
        for concurrency in [1, 8] {
            let dir = tempfile::tempdir().unwrap();
            let store = CacheStore::open(dir.path()).await.unwrap();
            let report = Executor::new(store.clone(), concurrency).run(&graph).await;
            let d = store.get(report.key("d").unwrap()).await.unwrap().unwrap();
            payloads.push(d.payload.to_vec());
        }
        assert_eq!(payloads[0], payloads[1]);
    }
}
