use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::cancel::CancellationFlag;
use super::report::ClassFailure;
use crate::core::cache::{Artifact, ArtifactMeta, StageConfig};
use crate::core::error::{PipelineError, PipelineResult};

/// Outputs of a stage's declared inputs, by stage name.
#[derive(Debug, Clone, Default)]
pub struct StageInputs {
    stage: String,
    artifacts: BTreeMap<String, Artifact>,
}

impl StageInputs {
    pub fn new(stage: impl Into<String>, artifacts: BTreeMap<String, Artifact>) -> Self {
        Self {
            stage: stage.into(),
            artifacts,
        }
    }

    /// Name of the stage these inputs are for.
    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn get(&self, name: &str) -> PipelineResult<&Artifact> {
        self.artifacts.get(name).ok_or_else(|| {
            PipelineError::stage(&self.stage, format!("input '{name}' is not available"))
        })
    }

    pub fn optional(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Artifact)> {
        self.artifacts.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// What a transformation produces. Stored as one immutable artifact.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub payload: Vec<u8>,
    pub side_table: Option<serde_json::Value>,
}

impl StageOutput {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            side_table: None,
        }
    }

    pub fn with_side_table(mut self, side_table: serde_json::Value) -> Self {
        self.side_table = Some(side_table);
        self
    }
}

/// The work a stage performs. Must be a pure function of its inputs and
/// configuration: the same inputs always yield byte-identical output.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn run(&self, inputs: StageInputs, cancel: CancellationFlag) -> PipelineResult<StageOutput>;

    /// Per-class failures recorded in a finished artifact. They are read
    /// back from its metadata so that cache hits report them too.
    fn class_failures(&self, _meta: &ArtifactMeta) -> PipelineResult<Vec<ClassFailure>> {
        Ok(Vec::new())
    }
}

/// A node of the stage graph.
#[derive(Clone)]
pub struct StageDescriptor {
    pub name: String,
    pub inputs: Vec<String>,
    pub config: StageConfig,
    pub transform: Arc<dyn Transform>,
}

impl StageDescriptor {
    pub fn new(name: impl Into<String>, transform: Arc<dyn Transform>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            config: StageConfig::new(),
            transform,
        }
    }

    pub fn input(mut self, stage: impl Into<String>) -> Self {
        self.inputs.push(stage.into());
        self
    }

    pub fn config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_config(mut self, config: StageConfig) -> Self {
        self.config.extend(config);
        self
    }
}

impl fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
