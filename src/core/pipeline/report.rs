use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::cache::ArtifactKey;
use crate::core::error::PipelineError;

/// Final state of one stage in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Output available, either computed or taken from the cache.
    Done,
    Failed,
    /// Not run because an upstream stage failed or the run was cancelled.
    Skipped,
}

/// A class an otherwise successful stage could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassFailure {
    pub class: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StageReport {
    pub name: String,
    pub status: StageStatus,
    pub key: ArtifactKey,
    pub cache_hit: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PipelineError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_classes: Vec<ClassFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// Every stage finished, some with per-class failures.
    PartialSuccess,
    Failure,
}

/// The first stage that failed and why.
#[derive(Debug, Clone, Serialize)]
pub struct FailureCause {
    pub stage: String,
    pub kind: &'static str,
    pub message: String,
}

impl FailureCause {
    pub fn new(stage: &str, error: &PipelineError) -> Self {
        Self {
            stage: stage.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Structured result of a pipeline run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: Outcome,
    /// In topological order.
    pub stages: Vec<StageReport>,
    pub cache_hits: usize,
    pub cache_misses: usize,
    /// Transformations actually invoked.
    pub invocations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_failure: Option<FailureCause>,
    pub skipped: Vec<String>,
    /// Host-visible output locations, filled in by the caller that exports
    /// them.
    pub outputs: BTreeMap<String, PathBuf>,
}

impl RunReport {
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn key(&self, name: &str) -> Option<&ArtifactKey> {
        self.stage(name).map(|s| &s.key)
    }

    pub fn is_success(&self) -> bool {
        self.outcome != Outcome::Failure
    }

    /// Mark the run failed because the output of `stage` could not be
    /// handed to the host.
    pub fn record_export_failure(&mut self, stage: &str, error: PipelineError) {
        if self.first_failure.is_none() {
            self.first_failure = Some(FailureCause::new(stage, &error));
        }
        if let Some(report) = self.stages.iter_mut().find(|s| s.name == stage) {
            report.status = StageStatus::Failed;
            report.error = Some(error);
        }
        self.outcome = Outcome::Failure;
    }

    /// Every per-class failure across stages.
    pub fn failed_classes(&self) -> impl Iterator<Item = (&str, &ClassFailure)> {
        self.stages
            .iter()
            .flat_map(|s| s.failed_classes.iter().map(move |f| (s.name.as_str(), f)))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Classify a finished run. Any failed or skipped stage makes it a
/// failure; otherwise per-class failures make it partial.
pub fn outcome_of(stages: &[StageReport]) -> Outcome {
    if stages.iter().any(|s| s.status != StageStatus::Done) {
        Outcome::Failure
    } else if stages.iter().any(|s| !s.failed_classes.is_empty()) {
        Outcome::PartialSuccess
    } else {
        Outcome::Success
    }
}
