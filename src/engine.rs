//! Inference-backend interface.
//!
//! Engines are external collaborators: chat/completion APIs, constrained
//! decoding runtimes, zero-shot classifiers. The core only requires that an
//! engine compile an [`InferenceSpec`] into an [`Executable`] and that the
//! executable map a batch of input records to a same-length, in-order
//! sequence of raw results, with `None` marking a failed chunk.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineResult;

/// Key under which the chunk text is injected into input records.
pub const TEXT_KEY: &str = "text";

/// Backend families an engine can belong to.
///
/// Bridges are selected once per task instance by this tag; call sites never
/// branch on it afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Chat/completion API producing free-form or JSON text
    Chat,

    /// Constrained-decoding runtime guaranteeing shape-conformant output
    Constrained,

    /// Zero-shot classifier producing a label distribution
    ZeroShot,
}

/// Inference modes of chat backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMode {
    /// Free text generation
    Generate,

    /// JSON output requested via the prompt
    Json,
}

/// Inference modes of constrained-decoding backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstrainedMode {
    /// Decode against a JSON schema derived from the output shape
    Json,

    /// Decode one of a closed set of strings
    Choice,
}

/// Inference modes of zero-shot classifier backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroShotMode {
    Classify,
}

/// Inference mode, tagged by backend family.
///
/// Each backend family defines its own closed mode enumeration; the tag
/// makes the pairing explicit so a mode can never reach the wrong backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceMode {
    Chat(ChatMode),
    Constrained(ConstrainedMode),
    ZeroShot(ZeroShotMode),
}

impl InferenceMode {
    /// Backend family this mode belongs to.
    pub fn backend(&self) -> BackendKind {
        match self {
            Self::Chat(_) => BackendKind::Chat,
            Self::Constrained(_) => BackendKind::Constrained,
            Self::ZeroShot(_) => BackendKind::ZeroShot,
        }
    }
}

/// Field in a structured output schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Primitive type of a declared output field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
}

/// Reusable output-shape descriptor handed to the engine.
///
/// Engines receive the constraint as a value ("one of these strings", "a
/// record with these typed fields") instead of a per-call synthesized type,
/// so one descriptor serves every chunk of every document a task processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum OutputShape {
    /// A score per declared label
    LabelScores { labels: Vec<String> },

    /// Exactly one of the declared labels
    Choice { labels: Vec<String> },

    /// A single record with the declared fields (or null)
    Record { fields: Vec<FieldSpec> },

    /// A list of records with the declared fields
    RecordList { fields: Vec<FieldSpec> },

    /// Free text with an optional score
    Text,

    /// One answer per declared question
    Answers { questions: Vec<String> },

    /// A score per declared aspect plus an optional overall score
    AspectScores { aspects: Vec<String> },
}

/// One per-chunk prompt input: an ordered map of values to render into the
/// prompt template. The chunk text lives under [`TEXT_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputRecord(IndexMap<String, Value>);

impl InputRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The chunk text, if set.
    pub fn text(&self) -> Option<&str> {
        self.0.get(TEXT_KEY).and_then(Value::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Everything an engine needs to compile a task into a runnable executable.
#[derive(Debug, Clone)]
pub struct InferenceSpec {
    pub mode: InferenceMode,

    /// Prompt template with `{key}` placeholders for record values.
    /// `None` for backends that take no prompt (zero-shot classifiers).
    pub prompt_template: Option<String>,

    pub output_shape: OutputShape,

    /// Serialized few-shot examples, empty when none were configured
    pub few_shot: Vec<Value>,
}

/// A compiled prompt program.
///
/// `execute` is one logical invocation over the whole flattened chunk batch:
/// it must return exactly one entry per input record, in input order, and
/// block until the full sequence is available. A `None` entry marks a chunk
/// whose inference failed; the core treats it as "no information" rather
/// than an error. Engines may batch or parallelize internally.
#[async_trait]
pub trait Executable: Send + Sync {
    async fn execute(&self, records: Vec<InputRecord>) -> EngineResult<Vec<Option<Value>>>;
}

/// A pluggable inference backend.
///
/// Implementations wrap a specific runtime (an API client, a local model)
/// and handle prompt rendering and response decoding; the core never looks
/// inside the raw result values beyond handing them to the task's bridge.
pub trait Engine: Send + Sync {
    /// Backend family, used to select the task bridge at construction time.
    fn kind(&self) -> BackendKind;

    /// Whether the backend can condition on few-shot examples.
    fn supports_few_shot(&self) -> bool;

    /// Compile an inference spec into an executable.
    fn build_executable(&self, spec: InferenceSpec) -> EngineResult<Box<dyn Executable>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_recovers_backend_tag() {
        assert_eq!(
            InferenceMode::Chat(ChatMode::Json).backend(),
            BackendKind::Chat
        );
        assert_eq!(
            InferenceMode::Constrained(ConstrainedMode::Choice).backend(),
            BackendKind::Constrained
        );
        assert_eq!(
            InferenceMode::ZeroShot(ZeroShotMode::Classify).backend(),
            BackendKind::ZeroShot
        );
    }

    #[test]
    fn record_text_helper() {
        let mut record = InputRecord::new();
        record.insert(TEXT_KEY, "chunk text");
        record.insert("to", "French");

        assert_eq!(record.text(), Some("chunk text"));
        assert_eq!(record.get("to").and_then(Value::as_str), Some("French"));
        assert_eq!(record.len(), 2);
    }
}
