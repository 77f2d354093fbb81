pub mod commands;
pub mod core;

use tracing_subscriber::EnvFilter;

pub use crate::commands::{load_and_run, run_and_report};
pub use crate::core::config::PipelineConfig;
pub use crate::core::error::{PipelineError, PipelineResult};
pub use crate::core::pipeline::{CancellationFlag, Outcome, RunReport};

/// Install the structured logger. `RUST_LOG` overrides the default filter.
/// Calling it again, or after the host installed its own subscriber, is a
/// no-op.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,loom_pipeline=debug")),
        )
        .try_init();
}
