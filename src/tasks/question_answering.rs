//! Question answering over a declared, ordered question list.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridges::{compose_template, Bridge};
use crate::consolidate::{ChunkRange, QaConsolidation};
use crate::document::Document;
use crate::engine::{
    BackendKind, ChatMode, ConstrainedMode, Engine, InferenceMode, InputRecord, OutputShape,
};
use crate::error::{ConfigError, TaskError};
use crate::outputs::{Answer, OutputKind, TaskOutput};
use crate::tasks::{serialize_examples, FailurePolicy, PredictiveTask};

const INSTRUCTIONS: &str = "\
Answer each of the given questions from the text. Respond with a JSON \
object {\"answers\": [{\"question\": question, \"answer\": answer, \
\"score\": confidence}]}; omit questions the text does not answer.";

/// Few-shot example: a text with answers aligned to the question list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FewshotExample {
    pub text: String,
    pub questions: Vec<String>,
    pub answers: Vec<String>,
}

/// Builder for a question-answering task.
pub struct QuestionAnswering {
    id: String,
    questions: Vec<String>,
    instructions: Option<String>,
    examples: Vec<FewshotExample>,
    policy: FailurePolicy,
}

impl QuestionAnswering {
    pub fn new(
        id: impl Into<String>,
        questions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id: id.into(),
            questions: questions.into_iter().map(Into::into).collect(),
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

    pub fn build(
        self,
        engine: &dyn Engine,
    ) -> Result<PredictiveTask<QaChunk>, ConfigError> {
        if self.questions.is_empty() {
            return Err(ConfigError::EmptyDeclaration {
                task: self.id,
                what: "question list",
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

        let bridge = QaBridge::new(self.id.clone(), self.questions, mode, self.instructions);
        PredictiveTask::build(self.id, Box::new(bridge), engine, few_shot, self.policy)
    }
}

/// Per-chunk payload: (question, answer, score) triples.
pub type QaChunk = Vec<(String, String, Option<f64>)>;

struct QaBridge {
    task_id: String,
    questions: Vec<String>,
    mode: InferenceMode,
    template: String,
    strategy: QaConsolidation,
}

impl QaBridge {
    fn new(
        task_id: String,
        questions: Vec<String>,
        mode: InferenceMode,
        instructions: Option<String>,
    ) -> Self {
        let mut body = instructions.unwrap_or_else(|| INSTRUCTIONS.to_string());
        body.push_str("\n\nQuestions:\n");
        for question in &questions {
            body.push_str(&format!("- {question}\n"));
        }

        Self {
            task_id,
            strategy: QaConsolidation::new(questions.clone()),
            questions,
            mode,
            template: compose_template(&body),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAnswer {
    /// Answer keyed to its question
    Keyed {
        question: String,
        answer: String,
        #[serde(default)]
        score: Option<f64>,
    },

    /// Bare answer text, aligned with the declared question order
    Bare(String),
}

#[derive(Deserialize)]
struct AnswersResponse {
    answers: Vec<RawAnswer>,
}

impl Bridge for QaBridge {
    type ChunkOutput = QaChunk;

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
        OutputShape::Answers {
            questions: self.questions.clone(),
        }
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::Answers
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
                record.insert("questions", self.questions.clone());
                Ok(record)
            })
            .collect()
    }

    fn parse(&self, raw: &Value) -> serde_json::Result<Self::ChunkOutput> {
        let response: AnswersResponse = serde_json::from_value(raw.clone())?;
        Ok(response
            .answers
            .into_iter()
            .enumerate()
            .filter_map(|(i, answer)| match answer {
                RawAnswer::Keyed {
                    question,
                    answer,
                    score,
                } => Some((question, answer, score)),
                // Bare answers align with the declared question order.
                RawAnswer::Bare(answer) => self
                    .questions
                    .get(i)
                    .map(|question| (question.clone(), answer, None)),
            })
            .collect())
    }

    fn consolidate(
        &self,
        chunks: &[Option<Self::ChunkOutput>],
        offsets: &[ChunkRange],
    ) -> Vec<TaskOutput> {
        self.strategy
            .consolidate(chunks, offsets)
            .into_iter()
            .map(|answers| TaskOutput::Answers {
                answers: answers
                    .into_iter()
                    .map(|(question, answer, score)| Answer {
                        question,
                        answer,
                        score,
                    })
                    .collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bridge() -> QaBridge {
        QaBridge::new(
            "qa".into(),
            vec!["Q1".into(), "Q2".into()],
            InferenceMode::Chat(ChatMode::Json),
            None,
        )
    }

    #[test]
    fn parses_keyed_answers() {
        let chunk = bridge()
            .parse(&json!({"answers": [
                {"question": "Q1", "answer": "yes", "score": 0.8}
            ]}))
            .unwrap();

        assert_eq!(chunk, vec![("Q1".to_string(), "yes".to_string(), Some(0.8))]);
    }

    #[test]
    fn parses_bare_answers_in_question_order() {
        let chunk = bridge()
            .parse(&json!({"answers": ["first", "second"]}))
            .unwrap();

        assert_eq!(chunk[0].0, "Q1");
        assert_eq!(chunk[1], ("Q2".to_string(), "second".to_string(), None));
    }

    #[test]
    fn unanswered_questions_get_empty_entries() {
        let b = bridge();
        let chunks = vec![Some(vec![(
            "Q1".to_string(),
            "yes".to_string(),
            Some(0.8),
        )])];

        let outputs = b.consolidate(&chunks, &[ChunkRange::new(0, 1)]);
        match &outputs[0] {
            TaskOutput::Answers { answers } => {
                assert_eq!(answers.len(), 2);
                assert_eq!(answers[1].question, "Q2");
                assert_eq!(answers[1].answer, "");
                assert_eq!(answers[1].score, None);
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }
}
