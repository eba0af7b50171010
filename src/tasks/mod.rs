//! Tasks - one pipeline stage each.
//!
//! [`PredictiveTask`] owns the chunk-level execution loop shared by every
//! built-in task: extract per-document prompt values, expand them onto
//! chunks, execute the whole flattened batch through the engine, parse and
//! consolidate the chunk results, and integrate one result per document.

pub mod classification;
pub mod information_extraction;
pub mod ner;
pub mod question_answering;
pub mod sentiment;
pub mod summarization;
pub mod translation;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::bridges::Bridge;
use crate::consolidate::ChunkRange;
use crate::document::Document;
use crate::engine::{Engine, InferenceSpec, InputRecord, TEXT_KEY};
use crate::error::{ConfigError, TaskError, TaskRunResult};
use crate::outputs::OutputKind;

/// Per-document predicate deciding whether a task runs on a document.
pub type SkipPredicate = dyn Fn(&Document) -> bool + Send + Sync;

/// Serialize few-shot examples, enforcing engine support.
pub(crate) fn serialize_examples<T: serde::Serialize>(
    task: &str,
    examples: &[T],
    engine: &dyn Engine,
) -> Result<Vec<Value>, ConfigError> {
    if examples.is_empty() {
        return Ok(Vec::new());
    }
    if !engine.supports_few_shot() {
        return Err(ConfigError::FewShot {
            task: task.to_string(),
            reason: "engine does not support few-shot examples".into(),
        });
    }
    examples
        .iter()
        .map(|example| {
            serde_json::to_value(example).map_err(|err| ConfigError::FewShot {
                task: task.to_string(),
                reason: err.to_string(),
            })
        })
        .collect()
}

/// How a task treats chunk results the bridge cannot parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Discard the chunk (logged); its range contributes nothing
    #[default]
    Lenient,

    /// Abort the batch with [`TaskError::MalformedChunk`]
    Strict,
}

/// One stage of a pipeline.
#[async_trait]
pub trait Task: Send + Sync {
    /// Unique task id; results are written under this key.
    fn id(&self) -> &str;

    /// Prompt template in use, if the task prompts an engine.
    fn prompt_template(&self) -> Option<&str> {
        None
    }

    /// Shape of the results this task writes.
    fn produces(&self) -> OutputKind;

    /// Result shape this task requires its predecessor to produce, if any.
    fn consumes(&self) -> Option<OutputKind> {
        None
    }

    /// Run the task over the whole document batch.
    async fn run(&self, docs: Vec<Document>) -> TaskRunResult<Vec<Document>>;
}

/// A task backed by an inference engine through a bridge.
///
/// Built by the per-task builders ([`classification::Classification`] and
/// friends); the bridge and executable are resolved once at construction.
pub struct PredictiveTask<C> {
    id: String,
    bridge: Box<dyn Bridge<ChunkOutput = C>>,
    executable: Box<dyn crate::engine::Executable>,
    policy: FailurePolicy,
    skip: Option<Box<SkipPredicate>>,
}

impl<C: Send + Sync> PredictiveTask<C> {
    pub(crate) fn build(
        id: String,
        bridge: Box<dyn Bridge<ChunkOutput = C>>,
        engine: &dyn Engine,
        few_shot: Vec<Value>,
        policy: FailurePolicy,
    ) -> Result<Self, ConfigError> {
        let spec = InferenceSpec {
            mode: bridge.inference_mode(),
            prompt_template: bridge.prompt_template().map(str::to_string),
            output_shape: bridge.output_shape(),
            few_shot,
        };
        let executable = engine
            .build_executable(spec)
            .map_err(|source| ConfigError::BuildExecutable {
                task: id.clone(),
                source,
            })?;

        Ok(Self {
            id,
            bridge,
            executable,
            policy,
            skip: None,
        })
    }

    /// Run this task only on documents for which the predicate holds.
    ///
    /// Excluded documents flow through unchanged - no result entry is
    /// written for them - and keep their position in the batch.
    pub fn with_skip(
        mut self,
        predicate: impl Fn(&Document) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.skip = Some(Box::new(predicate));
        self
    }

    async fn run_active(&self, mut active: Vec<Document>) -> TaskRunResult<Vec<Document>> {
        // 1. Extract per-document prompt values.
        let base_records = self.bridge.extract(&active)?;

        // 2. Expand onto chunks, recording each document's offset range.
        let mut flat: Vec<InputRecord> = Vec::new();
        let mut offsets: Vec<ChunkRange> = Vec::with_capacity(active.len());
        for (doc, base) in active.iter().zip(&base_records) {
            let start = flat.len();
            if doc.chunks.is_empty() {
                // The base record already carries the full text.
                flat.push(base.clone());
            } else {
                for chunk in &doc.chunks {
                    let mut record = base.clone();
                    record.insert(TEXT_KEY, chunk.as_str());
                    flat.push(record);
                }
            }
            offsets.push(ChunkRange::new(start, flat.len()));
        }

        debug!(
            task = %self.id,
            documents = active.len(),
            chunks = flat.len(),
            "dispatching chunk batch"
        );

        // 3. One logical engine invocation over the flattened batch.
        let expected = flat.len();
        let raw = self.executable.execute(flat).await?;
        if raw.len() != expected {
            return Err(TaskError::ResultCount {
                expected,
                got: raw.len(),
            });
        }

        // 4. Parse raw chunk results into typed payloads.
        let mut parsed: Vec<Option<C>> = Vec::with_capacity(raw.len());
        for (chunk_index, value) in raw.iter().enumerate() {
            match value {
                None => parsed.push(None),
                Some(value) => match self.bridge.parse(value) {
                    Ok(output) => parsed.push(Some(output)),
                    Err(source) => match self.policy {
                        FailurePolicy::Lenient => {
                            warn!(
                                task = %self.id,
                                chunk = chunk_index,
                                error = %source,
                                "discarding malformed chunk result"
                            );
                            parsed.push(None);
                        }
                        FailurePolicy::Strict => {
                            return Err(TaskError::MalformedChunk {
                                chunk_index,
                                source,
                            })
                        }
                    },
                },
            }
        }

        // 5. Consolidate to exactly one result per document.
        let outputs = self.bridge.consolidate(&parsed, &offsets);
        if outputs.len() != active.len() {
            return Err(TaskError::ConsolidationCount {
                expected: active.len(),
                got: outputs.len(),
            });
        }

        // 6. Integrate into the documents.
        self.bridge.integrate(outputs, &mut active);
        Ok(active)
    }
}

#[async_trait]
impl<C: Send + Sync> Task for PredictiveTask<C> {
    fn id(&self) -> &str {
        &self.id
    }

    fn prompt_template(&self) -> Option<&str> {
        self.bridge.prompt_template()
    }

    fn produces(&self) -> OutputKind {
        self.bridge.output_kind()
    }

    async fn run(&self, docs: Vec<Document>) -> TaskRunResult<Vec<Document>> {
        // Partition out skipped documents, remembering their positions.
        let mut slots: Vec<Option<Document>> = Vec::with_capacity(docs.len());
        let mut active: Vec<Document> = Vec::new();
        let mut active_positions: Vec<usize> = Vec::new();
        for (i, doc) in docs.into_iter().enumerate() {
            let runs = self.skip.as_ref().map_or(true, |pred| pred(&doc));
            if runs {
                active_positions.push(i);
                active.push(doc);
                slots.push(None);
            } else {
                slots.push(Some(doc));
            }
        }

        if !active.is_empty() {
            let processed = self.run_active(active).await?;
            for (position, doc) in active_positions.into_iter().zip(processed) {
                slots[position] = Some(doc);
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}
