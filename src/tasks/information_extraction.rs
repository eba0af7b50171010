//! Structured record extraction against a declared field schema.
//!
//! Two modes: `Single` elects one record per document by majority vote
//! across chunks; `Multi` keeps every distinct record observed anywhere in
//! the document.

use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridges::{compose_template, Bridge};
use crate::consolidate::{
    ChunkRange, MultiEntityConsolidation, SingleEntityConsolidation,
};
use crate::engine::{
    BackendKind, ChatMode, ConstrainedMode, Engine, FieldSpec, InferenceMode, OutputShape,
};
use crate::error::ConfigError;
use crate::outputs::{ExtractedRecord, OutputKind, TaskOutput};
use crate::tasks::{serialize_examples, FailurePolicy, PredictiveTask};

/// Whether a document yields one voted record or all distinct records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExtractionMode {
    Single,
    #[default]
    Multi,
}

/// Few-shot example: a text with the records it contains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FewshotExample {
    pub text: String,
    pub entities: Vec<Value>,
}

const SINGLE_INSTRUCTIONS: &str = "\
Extract the record described by the given fields from the text. Respond \
with a JSON object {\"entity\": {field: value} | null, \"score\": \
confidence}; use null when the text contains no such record.";

const MULTI_INSTRUCTIONS: &str = "\
Extract every distinct record described by the given fields from the text. \
Respond with a JSON object {\"entities\": [{field: value, \"score\": \
confidence}]}; the list may be empty.";

/// Builder for an information-extraction task.
pub struct InformationExtraction {
    id: String,
    fields: Vec<FieldSpec>,
    mode: ExtractionMode,
    instructions: Option<String>,
    examples: Vec<FewshotExample>,
    policy: FailurePolicy,
}

impl InformationExtraction {
    pub fn new(id: impl Into<String>, fields: impl IntoIterator<Item = FieldSpec>) -> Self {
        Self {
            id: id.into(),
            fields: fields.into_iter().collect(),
            mode: ExtractionMode::default(),
            instructions: None,
            examples: Vec::new(),
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_mode(mut self, mode: ExtractionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_examples(mut self, examples: Vec<FewshotExample>) -> Self {
        self.examples = examples;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(
        self,
        engine: &dyn Engine,
    ) -> Result<PredictiveTask<ExtractionChunk>, ConfigError> {
        if self.fields.is_empty() {
            return Err(ConfigError::EmptyDeclaration {
                task: self.id,
                what: "field schema",
            });
        }
        let mode = match engine.kind() {
            BackendKind::Chat => InferenceMode::Chat(ChatMode::Json),
            BackendKind::Constrained => InferenceMode::Constrained(ConstrainedMode::Json),
            BackendKind::ZeroShot => {
                return Err(ConfigError::UnsupportedBackend {
                    task: self.id,
                    backend: BackendKind::ZeroShot,
                })
            }
        };
        let few_shot = serialize_examples(&self.id, &self.examples, engine)?;

        let bridge = ExtractionBridge::new(
            self.id.clone(),
            self.fields,
            self.mode,
            mode,
            self.instructions,
        );
        PredictiveTask::build(self.id, Box::new(bridge), engine, few_shot, self.policy)
    }
}

/// Per-chunk payload: one optional record or a list of records.
#[derive(Debug, Clone)]
pub enum ExtractionChunk {
    Single(Option<ExtractedRecord>),
    Multi(Vec<ExtractedRecord>),
}

struct ExtractionBridge {
    task_id: String,
    fields: Vec<FieldSpec>,
    mode: ExtractionMode,
    inference_mode: InferenceMode,
    template: String,
}

impl ExtractionBridge {
    fn new(
        task_id: String,
        fields: Vec<FieldSpec>,
        mode: ExtractionMode,
        inference_mode: InferenceMode,
        instructions: Option<String>,
    ) -> Self {
        let default = match mode {
            ExtractionMode::Single => SINGLE_INSTRUCTIONS,
            ExtractionMode::Multi => MULTI_INSTRUCTIONS,
        };
        let mut body = instructions.unwrap_or_else(|| default.to_string());
        body.push_str("\n\nFields:\n");
        for field in &fields {
            body.push_str(&format!("- {} ({:?})\n", field.name, field.kind));
        }

        Self {
            task_id,
            fields,
            mode,
            inference_mode,
            template: compose_template(&body),
        }
    }

    /// Normalize a raw object into a record with declared field order.
    ///
    /// Missing fields become null so records with equal values share an
    /// identity regardless of which keys the backend emitted.
    fn record_from(&self, value: &Value) -> serde_json::Result<ExtractedRecord> {
        let object = value
            .as_object()
            .ok_or_else(|| serde_json::Error::custom("expected a record object"))?;

        let fields: IndexMap<String, Value> = self
            .fields
            .iter()
            .map(|field| {
                (
                    field.name.clone(),
                    object.get(&field.name).cloned().unwrap_or(Value::Null),
                )
            })
            .collect();

        Ok(ExtractedRecord {
            fields,
            score: object.get("score").and_then(Value::as_f64),
        })
    }
}

#[derive(Deserialize)]
struct SingleResponse {
    entity: Option<Value>,
}

#[derive(Deserialize)]
struct MultiResponse {
    entities: Vec<Value>,
}

impl Bridge for ExtractionBridge {
    type ChunkOutput = ExtractionChunk;

    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn prompt_template(&self) -> Option<&str> {
        Some(&self.template)
    }

    fn inference_mode(&self) -> InferenceMode {
        self.inference_mode
    }

    fn output_shape(&self) -> OutputShape {
        match self.mode {
            ExtractionMode::Single => OutputShape::Record {
                fields: self.fields.clone(),
            },
            ExtractionMode::Multi => OutputShape::RecordList {
                fields: self.fields.clone(),
            },
        }
    }

    fn output_kind(&self) -> OutputKind {
        match self.mode {
            ExtractionMode::Single => OutputKind::Entity,
            ExtractionMode::Multi => OutputKind::Records,
        }
    }

    fn parse(&self, raw: &Value) -> serde_json::Result<Self::ChunkOutput> {
        match self.mode {
            ExtractionMode::Single => {
                let response: SingleResponse = serde_json::from_value(raw.clone())?;
                let record = response
                    .entity
                    .as_ref()
                    .filter(|v| !v.is_null())
                    .map(|v| self.record_from(v))
                    .transpose()?;
                Ok(ExtractionChunk::Single(record))
            }
            ExtractionMode::Multi => {
                let response: MultiResponse = serde_json::from_value(raw.clone())?;
                let records = response
                    .entities
                    .iter()
                    .map(|v| self.record_from(v))
                    .collect::<serde_json::Result<Vec<_>>>()?;
                Ok(ExtractionChunk::Multi(records))
            }
        }
    }

    fn consolidate(
        &self,
        chunks: &[Option<Self::ChunkOutput>],
        offsets: &[ChunkRange],
    ) -> Vec<TaskOutput> {
        match self.mode {
            ExtractionMode::Single => {
                let flat: Vec<Option<ExtractedRecord>> = chunks
                    .iter()
                    .map(|chunk| match chunk {
                        Some(ExtractionChunk::Single(record)) => record.clone(),
                        _ => None,
                    })
                    .collect();
                SingleEntityConsolidation
                    .consolidate(&flat, offsets)
                    .into_iter()
                    .map(|entity| TaskOutput::Entity { entity })
                    .collect()
            }
            ExtractionMode::Multi => {
                let flat: Vec<Option<Vec<ExtractedRecord>>> = chunks
                    .iter()
                    .map(|chunk| match chunk {
                        Some(ExtractionChunk::Multi(records)) => Some(records.clone()),
                        _ => None,
                    })
                    .collect();
                MultiEntityConsolidation
                    .consolidate(&flat, offsets)
                    .into_iter()
                    .map(|records| TaskOutput::Records { records })
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FieldKind;
    use serde_json::json;

    fn bridge(mode: ExtractionMode) -> ExtractionBridge {
        ExtractionBridge::new(
            "extract".into(),
            vec![
                FieldSpec::new("name", FieldKind::String),
                FieldSpec::new("year", FieldKind::Integer),
            ],
            mode,
            InferenceMode::Chat(ChatMode::Json),
            None,
        )
    }

    #[test]
    fn single_parse_normalizes_field_order() {
        let bridge = bridge(ExtractionMode::Single);
        let chunk = bridge
            .parse(&json!({"entity": {"year": 1815, "name": "Ada", "score": 0.9}}))
            .unwrap();

        match chunk {
            ExtractionChunk::Single(Some(record)) => {
                let keys: Vec<&str> = record.fields.keys().map(String::as_str).collect();
                assert_eq!(keys, vec!["name", "year"]);
                assert_eq!(record.score, Some(0.9));
            }
            other => panic!("unexpected chunk: {other:?}"),
        }
    }

    #[test]
    fn single_parse_accepts_null_entity() {
        let bridge = bridge(ExtractionMode::Single);
        let chunk = bridge.parse(&json!({"entity": null})).unwrap();
        assert!(matches!(chunk, ExtractionChunk::Single(None)));
    }

    #[test]
    fn multi_parse_fills_missing_fields_with_null() {
        let bridge = bridge(ExtractionMode::Multi);
        let chunk = bridge
            .parse(&json!({"entities": [{"name": "Ada"}]}))
            .unwrap();

        match chunk {
            ExtractionChunk::Multi(records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].fields["year"], Value::Null);
            }
            other => panic!("unexpected chunk: {other:?}"),
        }
    }

    #[test]
    fn zero_shot_backend_is_rejected() {
        let engine = crate::testing::MockEngine::new(BackendKind::ZeroShot);
        let result = InformationExtraction::new(
            "extract",
            [FieldSpec::new("name", FieldKind::String)],
        )
        .build(&engine);

        assert!(matches!(
            result,
            Err(ConfigError::UnsupportedBackend { .. })
        ));
    }
}
