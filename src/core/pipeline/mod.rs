// ─── Pipeline Orchestration ───
// Stage graph, cache-aware executor and the built-in loom stages.
//
// A stage's output key is derived from its name, its input keys and its
// configuration, so the executor can decide from the cache alone which
// stages still have to run.

pub mod cancel;
pub mod executor;
pub mod graph;
pub mod loom;
pub mod report;
pub mod stage;

pub use cancel::CancellationFlag;
pub use executor::Executor;
pub use graph::StageGraph;
pub use loom::{build_loom_graph, output_stage, provision_stage};
pub use report::{ClassFailure, FailureCause, Outcome, RunReport, StageReport, StageStatus};
pub use stage::{StageDescriptor, StageInputs, StageOutput, Transform};
