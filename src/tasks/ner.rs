//! Named-entity recognition over a declared label set.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridges::{compose_template, Bridge};
use crate::consolidate::{ChunkRange, MultiEntityConsolidation};
use crate::engine::{
    BackendKind, ChatMode, ConstrainedMode, Engine, FieldKind, FieldSpec, InferenceMode,
    OutputShape,
};
use crate::error::ConfigError;
use crate::outputs::{Entity, OutputKind, TaskOutput};
use crate::tasks::{serialize_examples, FailurePolicy, PredictiveTask};

const INSTRUCTIONS: &str = "\
Find every entity mention of the given types in the text. Respond with a \
JSON object {\"entities\": [{\"text\": mention, \"label\": type, \"score\": \
confidence}]}; the list may be empty.";

/// Few-shot example: a text with its annotated entity mentions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FewshotExample {
    pub text: String,
    pub entities: Vec<Entity>,
}

/// Builder for an entity-recognition task.
pub struct EntityRecognition {
    id: String,
    labels: Vec<String>,
    instructions: Option<String>,
    examples: Vec<FewshotExample>,
    policy: FailurePolicy,
}

impl EntityRecognition {
    pub fn new(
        id: impl Into<String>,
        labels: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id: id.into(),
            labels: labels.into_iter().map(Into::into).collect(),
            instructions: None,
            examples: Vec::new(),
            policy: FailurePolicy::default(),
        }
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

    pub fn build(self, engine: &dyn Engine) -> Result<PredictiveTask<Vec<Entity>>, ConfigError> {
        if self.labels.is_empty() {
            return Err(ConfigError::EmptyDeclaration {
                task: self.id,
                what: "entity label set",
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

        let bridge = NerBridge::new(self.id.clone(), self.labels, mode, self.instructions);
        PredictiveTask::build(self.id, Box::new(bridge), engine, few_shot, self.policy)
    }
}

struct NerBridge {
    task_id: String,
    mode: InferenceMode,
    template: String,
}

impl NerBridge {
    fn new(
        task_id: String,
        labels: Vec<String>,
        mode: InferenceMode,
        instructions: Option<String>,
    ) -> Self {
        let mut body = instructions.unwrap_or_else(|| INSTRUCTIONS.to_string());
        body.push_str("\n\nEntity types:\n");
        for label in &labels {
            body.push_str(&format!("- {label}\n"));
        }

        Self {
            task_id,
            mode,
            template: compose_template(&body),
        }
    }
}

#[derive(Deserialize)]
struct EntitiesResponse {
    entities: Vec<Entity>,
}

impl Bridge for NerBridge {
    type ChunkOutput = Vec<Entity>;

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
        OutputShape::RecordList {
            fields: vec![
                FieldSpec::new("text", FieldKind::String),
                FieldSpec::new("label", FieldKind::String),
                FieldSpec::new("score", FieldKind::Float),
            ],
        }
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::Entities
    }

    fn parse(&self, raw: &Value) -> serde_json::Result<Self::ChunkOutput> {
        let response: EntitiesResponse = serde_json::from_value(raw.clone())?;
        Ok(response.entities)
    }

    fn consolidate(
        &self,
        chunks: &[Option<Self::ChunkOutput>],
        offsets: &[ChunkRange],
    ) -> Vec<TaskOutput> {
        MultiEntityConsolidation
            .consolidate(chunks, offsets)
            .into_iter()
            .map(|entities| TaskOutput::Entities { entities })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bridge() -> NerBridge {
        NerBridge::new(
            "ner".into(),
            vec!["person".into(), "location".into()],
            InferenceMode::Chat(ChatMode::Json),
            None,
        )
    }

    #[test]
    fn parses_entity_list() {
        let chunk = bridge()
            .parse(&json!({"entities": [
                {"text": "Ada", "label": "person", "score": 0.9},
                {"text": "London", "label": "location"}
            ]}))
            .unwrap();

        assert_eq!(chunk.len(), 2);
        assert_eq!(chunk[0].text, "Ada");
        assert_eq!(chunk[1].score, None);
    }

    #[test]
    fn consolidates_duplicates_across_chunks() {
        let b = bridge();
        let chunks = vec![
            Some(vec![
                Entity {
                    text: "Ada".into(),
                    label: "person".into(),
                    score: Some(0.8),
                },
            ]),
            Some(vec![
                Entity {
                    text: "Ada".into(),
                    label: "person".into(),
                    score: Some(0.6),
                },
                Entity {
                    text: "London".into(),
                    label: "location".into(),
                    score: None,
                },
            ]),
        ];

        let outputs = b.consolidate(&chunks, &[ChunkRange::new(0, 2)]);
        match &outputs[0] {
            TaskOutput::Entities { entities } => {
                assert_eq!(entities.len(), 2);
                assert!((entities[0].score.unwrap() - 0.7).abs() < 1e-9);
                assert_eq!(entities[1].score, None);
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[test]
    fn template_lists_entity_types() {
        let b = bridge();
        assert!(b.template.contains("- person"));
        assert!(b.template.contains("- location"));
    }
}
