//! Bridge contract between tasks and inference backends.
//!
//! A bridge adapts one task to one backend family: it declares the prompt
//! template, output shape, and inference mode the engine needs, and owns the
//! pure per-batch functions - extracting prompt values from documents,
//! parsing raw chunk results, consolidating chunk results into per-document
//! results, and integrating those into the documents. Bridges are selected
//! once at task construction by backend kind; unsupported pairings fail
//! there, never at run time.

use serde_json::Value;

use crate::consolidate::ChunkRange;
use crate::document::Document;
use crate::engine::{InferenceMode, InputRecord, OutputShape, TEXT_KEY};
use crate::error::TaskError;
use crate::outputs::{OutputKind, TaskOutput};

pub trait Bridge: Send + Sync {
    /// Typed payload parsed from one chunk's raw result.
    type ChunkOutput: Send + Sync;

    /// Id of the task this bridge was built for.
    fn task_id(&self) -> &str;

    /// Prompt template handed to the engine; `None` for promptless backends.
    fn prompt_template(&self) -> Option<&str>;

    fn inference_mode(&self) -> InferenceMode;

    fn output_shape(&self) -> OutputShape;

    /// Shape of the per-document result this bridge produces.
    fn output_kind(&self) -> OutputKind;

    /// Per-document prompt values. The default injects the document text
    /// under [`TEXT_KEY`] and fails the batch when a document has none.
    fn extract(&self, docs: &[Document]) -> Result<Vec<InputRecord>, TaskError> {
        docs.iter()
            .enumerate()
            .map(|(doc_index, doc)| {
                let text = doc
                    .text
                    .as_deref()
                    .ok_or(TaskError::MissingText { doc_index })?;
                let mut record = InputRecord::new();
                record.insert(TEXT_KEY, text);
                Ok(record)
            })
            .collect()
    }

    /// Parse one chunk's raw result into the typed payload.
    ///
    /// Errors become `None` chunks under the lenient failure policy and
    /// abort the batch under the strict one.
    fn parse(&self, raw: &Value) -> serde_json::Result<Self::ChunkOutput>;

    /// Merge chunk payloads into exactly one result per offset range.
    fn consolidate(
        &self,
        chunks: &[Option<Self::ChunkOutput>],
        offsets: &[ChunkRange],
    ) -> Vec<TaskOutput>;

    /// Write consolidated results into the documents.
    ///
    /// The default writes each result under the task id. Text-producing
    /// bridges override this to additionally overwrite the document text.
    fn integrate(&self, outputs: Vec<TaskOutput>, docs: &mut [Document]) {
        for (doc, output) in docs.iter_mut().zip(outputs) {
            doc.results.insert(self.task_id().to_string(), output);
        }
    }
}

/// Assemble a prompt template from instruction text.
///
/// Appends the conventional text block so every template renders the chunk
/// under the same placeholder.
pub(crate) fn compose_template(instructions: &str) -> String {
    let mut template = instructions.trim_end().to_string();
    template.push_str("\n\nText:\n{text}");
    template
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_appends_text_block() {
        let template = compose_template("Summarize the text.\n");
        assert_eq!(template, "Summarize the text.\n\nText:\n{text}");
    }
}
