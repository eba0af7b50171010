//! Translation into a target language.
//!
//! The target language is injected into every chunk record, so custom
//! prompt templates can reference it alongside the text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridges::{compose_template, Bridge};
use crate::consolidate::{ChunkRange, TextConsolidation};
use crate::document::Document;
use crate::engine::{
    BackendKind, ChatMode, ConstrainedMode, Engine, InferenceMode, InputRecord, OutputShape,
};
use crate::error::{ConfigError, TaskError};
use crate::outputs::{OutputKind, TaskOutput};
use crate::tasks::{serialize_examples, FailurePolicy, PredictiveTask};

const INSTRUCTIONS: &str = "\
Translate the text into {to}. Respond with a JSON object {\"translation\": \
text, \"score\": confidence}.";

/// Few-shot example: a text with its translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FewshotExample {
    pub text: String,
    pub to: String,
    pub translation: String,
}

/// Builder for a translation task.
pub struct Translation {
    id: String,
    to: String,
    overwrite: bool,
    instructions: Option<String>,
    examples: Vec<FewshotExample>,
    policy: FailurePolicy,
}

impl Translation {
    pub fn new(id: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            to: to.into(),
            overwrite: false,
            instructions: None,
            examples: Vec::new(),
            policy: FailurePolicy::default(),
        }
    }

    /// Whether the translation replaces the document text. Defaults to false.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
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
    ) -> Result<PredictiveTask<(String, Option<f64>)>, ConfigError> {
        if self.to.is_empty() {
            return Err(ConfigError::EmptyDeclaration {
                task: self.id,
                what: "target language",
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

        let instructions = self
            .instructions
            .unwrap_or_else(|| INSTRUCTIONS.to_string());
        let bridge = TranslationBridge {
            task_id: self.id.clone(),
            to: self.to,
            mode,
            overwrite: self.overwrite,
            template: compose_template(&instructions),
            strategy: TextConsolidation::default(),
        };
        PredictiveTask::build(self.id, Box::new(bridge), engine, few_shot, self.policy)
    }
}

struct TranslationBridge {
    task_id: String,
    to: String,
    mode: InferenceMode,
    overwrite: bool,
    template: String,
    strategy: TextConsolidation,
}

#[derive(Deserialize)]
struct TranslationResponse {
    translation: String,
    #[serde(default)]
    score: Option<f64>,
}

impl Bridge for TranslationBridge {
    type ChunkOutput = (String, Option<f64>);

    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn prompt_template(&self) -> Option<&str> {
        Some(&self.template)
    }

    fn inference_mode(&self) -> InferenceMode {
        self.mode
    }

    fn output_shape(&self) -> OutputShape {
        OutputShape::Text
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::Text
    }

    fn extract(&self, docs: &[Document]) -> Result<Vec<InputRecord>, TaskError> {
        docs.iter()
            .enumerate()
            .map(|(doc_index, doc)| {
                let text = doc
                    .text
                    .as_deref()
                    .ok_or(TaskError::MissingText { doc_index })?;
                let mut record = InputRecord::new();
                record.insert(crate::engine::TEXT_KEY, text);
                record.insert("to", self.to.as_str());
                Ok(record)
            })
            .collect()
    }

    fn parse(&self, raw: &Value) -> serde_json::Result<Self::ChunkOutput> {
        let response: TranslationResponse = serde_json::from_value(raw.clone())?;
        Ok((response.translation, response.score))
    }

    fn consolidate(
        &self,
        chunks: &[Option<Self::ChunkOutput>],
        offsets: &[ChunkRange],
    ) -> Vec<TaskOutput> {
        self.strategy
            .consolidate(chunks, offsets)
            .into_iter()
            .map(|(text, score)| TaskOutput::Text { text, score })
            .collect()
    }

    fn integrate(&self, outputs: Vec<TaskOutput>, docs: &mut [Document]) {
        for (doc, output) in docs.iter_mut().zip(outputs) {
            if self.overwrite {
                if let TaskOutput::Text { text, .. } = &output {
                    doc.set_text(text.clone());
                }
            }
            doc.results.insert(self.task_id.clone(), output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> TranslationBridge {
        TranslationBridge {
            task_id: "translate".into(),
            to: "French".into(),
            mode: InferenceMode::Chat(ChatMode::Json),
            overwrite: false,
            template: "t".into(),
            strategy: TextConsolidation::default(),
        }
    }

    #[test]
    fn extract_injects_target_language() {
        let docs = vec![Document::new("hello")];
        let records = bridge().extract(&docs).unwrap();

        assert_eq!(records[0].text(), Some("hello"));
        assert_eq!(
            records[0].get("to").and_then(Value::as_str),
            Some("French")
        );
    }

    #[test]
    fn extract_fails_on_missing_text() {
        let docs = vec![Document::default()];
        let result = bridge().extract(&docs);
        assert!(matches!(result, Err(TaskError::MissingText { doc_index: 0 })));
    }
}
