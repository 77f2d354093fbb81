use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the whole pipeline.
/// Every module returns `Result<T, PipelineError>`.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    // ── Integrity ───────────────────────────────────────
    #[error("Integrity error for {subject}: expected {expected}, got {actual}")]
    Integrity {
        subject: String,
        expected: String,
        actual: String,
    },

    // ── Mappings ────────────────────────────────────────
    #[error("Mapping gap: no {namespace} name for {symbol}")]
    MappingGap { symbol: String, namespace: String },

    #[error("Conflicting {namespace} mapping for {symbol}: {existing} vs {incoming} (from {source_name})")]
    MappingConflict {
        symbol: String,
        namespace: String,
        existing: String,
        incoming: String,
        source_name: String,
    },

    #[error("Mapping parse error in {source_name} line {line}: {message}")]
    MappingParse {
        source_name: String,
        line: usize,
        message: String,
    },

    // ── Merge ───────────────────────────────────────────
    #[error("Merge conflict in {class}: client has {client}, server has {server}")]
    MergeConflict {
        class: String,
        client: String,
        server: String,
    },

    // ── Access patches ──────────────────────────────────
    #[error("Access patch target missing: {record}")]
    PatchTargetMissing { record: String },

    #[error("Access patch parse error in {source_name} line {line}: {message}")]
    PatchParse {
        source_name: String,
        line: usize,
        message: String,
    },

    #[error("Namespace mismatch: patches target {expected}, classes are in {actual}")]
    NamespaceMismatch { expected: String, actual: String },

    // ── Decompile ───────────────────────────────────────
    #[error("Decompilation of {class} failed: {message}")]
    DecompileFailure { class: String, message: String },

    // ── Class files ─────────────────────────────────────
    #[error("Malformed class file {class}: {message}")]
    ClassFormat { class: String, message: String },

    // ── Pipeline ────────────────────────────────────────
    #[error("Stage '{stage}' failed: {message}")]
    StageFailure { stage: String, message: String },

    #[error("Stage graph contains a cycle through: {}", .0.join(" -> "))]
    GraphCycle(Vec<String>),

    #[error("Stage '{stage}' depends on unknown stage '{missing}'")]
    UnknownStage { stage: String, missing: String },

    #[error("Stage '{0}' is declared more than once")]
    DuplicateStage(String),

    #[error("Pipeline cancelled")]
    Cancelled,

    // ── Configuration ───────────────────────────────────
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid Maven coordinate: {0}")]
    InvalidMavenCoordinate(String),

    // ── Serialization ───────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    // ── Archive ─────────────────────────────────────────
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Convenience alias used throughout the crate.
pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::StageFailure {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn class_format(class: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::ClassFormat {
            class: class.into(),
            message: message.into(),
        }
    }

    /// Only per-class decompile failures are collected instead of aborting
    /// their stage.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::DecompileFailure { .. })
    }

    /// Short machine-readable kind used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Io { .. } => "io",
            PipelineError::Http(_) | PipelineError::DownloadFailed { .. } => "network",
            PipelineError::Integrity { .. } => "integrity",
            PipelineError::MappingGap { .. } => "mapping_gap",
            PipelineError::MappingConflict { .. } => "mapping_conflict",
            PipelineError::MappingParse { .. } => "mapping_parse",
            PipelineError::MergeConflict { .. } => "merge_conflict",
            PipelineError::PatchTargetMissing { .. } => "patch_target_missing",
            PipelineError::PatchParse { .. } => "patch_parse",
            PipelineError::NamespaceMismatch { .. } => "namespace_mismatch",
            PipelineError::DecompileFailure { .. } => "decompile_failure",
            PipelineError::ClassFormat { .. } => "class_format",
            PipelineError::StageFailure { .. } => "stage_failure",
            PipelineError::GraphCycle(_)
            | PipelineError::UnknownStage { .. }
            | PipelineError::DuplicateStage(_) => "graph",
            PipelineError::Cancelled => "cancelled",
            PipelineError::Config(_) | PipelineError::InvalidMavenCoordinate(_) => "config",
            PipelineError::Json(_) | PipelineError::Csv(_) => "serialization",
            PipelineError::Zip(_) => "archive",
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(source: std::io::Error) -> Self {
        PipelineError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

// ── Serialization for reports ───────────────────────────
// The run manifest embeds errors as their display string.
impl serde::Serialize for PipelineError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
