//! Document model - the unit of work flowing through a pipeline.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::outputs::TaskOutput;

/// A document holding text to be processed and the results written by tasks.
///
/// Documents may arrive pre-chunked by an external chunker. When `chunks` is
/// non-empty, every chunk must be a contiguous slice of `text` in original
/// order (caller-maintained; the pipeline treats chunks as opaque strings).
/// When `chunks` is empty, tasks process the whole text as a single chunk.
///
/// `results` holds one entry per task that ran on this document, keyed by
/// task id. A task whose skip predicate excluded the document leaves no
/// entry. Entries are never deleted.
///
/// `Clone` is a deep copy: every field is owned, so a cloned document can be
/// mutated without affecting the original. The pipeline relies on this for
/// its copy-on-run mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Caller-assigned identifier, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Document text. Tasks that require text fail the batch when absent.
    pub text: Option<String>,

    /// Pre-computed text chunks, in document order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<String>,

    /// Application-provided metadata
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub meta: IndexMap<String, Value>,

    /// Task results keyed by task id
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub results: IndexMap<String, TaskOutput>,
}

impl Document {
    /// Create a document from text.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Set the caller-assigned id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set pre-computed chunks.
    pub fn with_chunks(mut self, chunks: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.chunks = chunks.into_iter().map(Into::into).collect();
        self
    }

    /// Add a metadata key-value pair.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Result written by the task with this id, if any.
    pub fn result(&self, task_id: &str) -> Option<&TaskOutput> {
        self.results.get(task_id)
    }

    /// Replace the text, clearing any chunks.
    ///
    /// Chunks are slices of the old text and would violate the chunk
    /// invariant if kept; subsequent tasks fall back to processing the new
    /// text as a single chunk.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = Some(text.into());
        self.chunks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_roundtrip() {
        let doc = Document::new("hello world")
            .with_id("doc-1")
            .with_chunks(["hello", "world"])
            .with_meta("language", "en");

        assert_eq!(doc.text.as_deref(), Some("hello world"));
        assert_eq!(doc.chunks, vec!["hello", "world"]);
        assert_eq!(doc.meta["language"], "en");
        assert!(doc.results.is_empty());
    }

    #[test]
    fn clone_is_independent() {
        let original = Document::new("text").with_meta("k", "v");
        let mut copy = original.clone();
        copy.set_text("changed");
        copy.results.insert(
            "t".into(),
            TaskOutput::Text {
                text: "s".into(),
                score: None,
            },
        );

        assert_eq!(original.text.as_deref(), Some("text"));
        assert!(original.results.is_empty());
        assert_ne!(original, copy);
    }

    #[test]
    fn set_text_clears_chunks() {
        let mut doc = Document::new("a b").with_chunks(["a", "b"]);
        doc.set_text("translated");
        assert!(doc.chunks.is_empty());
        assert_eq!(doc.text.as_deref(), Some("translated"));
    }
}
