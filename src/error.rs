//! Typed errors for the task pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling. The taxonomy mirrors when an
//! error can occur: [`ConfigError`] at construction time (always fatal, never
//! retried), [`TaskError`] while a task runs over a batch, and [`EngineError`]
//! at the inference-backend boundary.

use thiserror::Error;

use crate::engine::{BackendKind, InferenceMode};
use crate::outputs::OutputKind;

/// Errors raised while assembling tasks or pipelines.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Two tasks in one pipeline share an id
    #[error("duplicate task id '{id}'; task ids must be unique within a pipeline")]
    DuplicateTaskId { id: String },

    /// A task's declared input kind does not match its predecessor's output
    #[error("task '{next}' consumes {consumes:?} but preceding task '{task}' produces {produces:?}")]
    ChainMismatch {
        task: String,
        next: String,
        produces: OutputKind,
        consumes: OutputKind,
    },

    /// The chosen engine's backend family cannot serve this task
    #[error("backend {backend:?} is not supported by task '{task}'")]
    UnsupportedBackend { task: String, backend: BackendKind },

    /// A required declaration (labels, questions, aspects, fields) is empty
    #[error("task '{task}': {what} must not be empty")]
    EmptyDeclaration { task: String, what: &'static str },

    /// Few-shot examples failed validation or are unsupported by the engine
    #[error("task '{task}': invalid few-shot examples: {reason}")]
    FewShot { task: String, reason: String },

    /// The engine rejected the task's inference spec
    #[error("task '{task}': failed to build engine executable")]
    BuildExecutable {
        task: String,
        #[source]
        source: EngineError,
    },
}

/// Errors crossing the inference-engine boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Backend-specific failure (network, runtime, model)
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The engine does not implement the requested inference mode
    #[error("inference mode {mode:?} is not supported by this engine")]
    UnsupportedMode { mode: InferenceMode },
}

impl EngineError {
    /// Wrap an arbitrary backend failure.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// Errors raised while a task runs over a document batch.
///
/// Extraction failures abort the whole batch; individual chunk failures are
/// represented as `None` entries in the raw-result sequence and never surface
/// here unless the task runs under [`FailurePolicy::Strict`].
///
/// [`FailurePolicy::Strict`]: crate::tasks::FailurePolicy::Strict
#[derive(Debug, Error)]
pub enum TaskError {
    /// A document required to carry text does not
    #[error("document {doc_index} has no text")]
    MissingText { doc_index: usize },

    /// The engine call itself failed
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// The engine violated the same-length result contract
    #[error("engine returned {got} results for {expected} chunk records")]
    ResultCount { expected: usize, got: usize },

    /// A chunk result could not be parsed (strict mode only)
    #[error("chunk {chunk_index} returned a malformed result: {source}")]
    MalformedChunk {
        chunk_index: usize,
        #[source]
        source: serde_json::Error,
    },

    /// Consolidation did not produce exactly one result per document
    #[error("consolidation produced {got} results for {expected} documents")]
    ConsolidationCount { expected: usize, got: usize },
}

/// Top-level error for pipeline operations.
#[derive(Debug, Error)]
pub enum SiftError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("task '{task_id}' failed: {source}")]
    Task {
        task_id: String,
        #[source]
        source: TaskError,
    },
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, SiftError>;

/// Result type alias for construction/validation operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Result type alias for task execution.
pub type TaskRunResult<T> = std::result::Result<T, TaskError>;
