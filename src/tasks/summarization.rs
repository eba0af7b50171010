//! Summarization with a target length.
//!
//! Chunk summaries are joined in document order; by default the produced
//! summary replaces the document text so downstream tasks operate on it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridges::{compose_template, Bridge};
use crate::consolidate::{ChunkRange, TextConsolidation};
use crate::document::Document;
use crate::engine::{BackendKind, ChatMode, ConstrainedMode, Engine, InferenceMode, OutputShape};
use crate::error::ConfigError;
use crate::outputs::{OutputKind, TaskOutput};
use crate::tasks::{serialize_examples, FailurePolicy, PredictiveTask};

/// Few-shot example: a text with its reference summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FewshotExample {
    pub text: String,
    pub summary: String,
}

/// Builder for a summarization task.
pub struct Summarization {
    id: String,
    n_words: usize,
    overwrite: bool,
    instructions: Option<String>,
    examples: Vec<FewshotExample>,
    policy: FailurePolicy,
}

impl Summarization {
    pub fn new(id: impl Into<String>, n_words: usize) -> Self {
        Self {
            id: id.into(),
            n_words,
            overwrite: true,
            instructions: None,
            examples: Vec::new(),
            policy: FailurePolicy::default(),
        }
    }

    /// Whether the summary replaces the document text. Defaults to true.
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

        let instructions = self.instructions.unwrap_or_else(|| {
            format!(
                "Summarize the text in at most {} words. Respond with a JSON \
                 object {{\"summary\": text, \"score\": confidence}}.",
                self.n_words
            )
        });
        let bridge = SummarizationBridge {
            task_id: self.id.clone(),
            mode,
            overwrite: self.overwrite,
            template: compose_template(&instructions),
            strategy: TextConsolidation::default(),
        };
        PredictiveTask::build(self.id, Box::new(bridge), engine, few_shot, self.policy)
    }
}

struct SummarizationBridge {
    task_id: String,
    mode: InferenceMode,
    overwrite: bool,
    template: String,
    strategy: TextConsolidation,
}

#[derive(Deserialize)]
struct SummaryResponse {
    summary: String,
    #[serde(default)]
    score: Option<f64>,
}

impl Bridge for SummarizationBridge {
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

    fn parse(&self, raw: &Value) -> serde_json::Result<Self::ChunkOutput> {
        let response: SummaryResponse = serde_json::from_value(raw.clone())?;
        Ok((response.summary, response.score))
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
    use serde_json::json;

    fn bridge(overwrite: bool) -> SummarizationBridge {
        SummarizationBridge {
            task_id: "summary".into(),
            mode: InferenceMode::Chat(ChatMode::Json),
            overwrite,
            template: "t".into(),
            strategy: TextConsolidation::default(),
        }
    }

    #[test]
    fn integrate_overwrites_text_and_clears_chunks() {
        let mut docs = vec![Document::new("long text").with_chunks(["long", "text"])];
        bridge(true).integrate(
            vec![TaskOutput::Text {
                text: "short".into(),
                score: None,
            }],
            &mut docs,
        );

        assert_eq!(docs[0].text.as_deref(), Some("short"));
        assert!(docs[0].chunks.is_empty());
        assert!(docs[0].result("summary").is_some());
    }

    #[test]
    fn integrate_without_overwrite_keeps_text() {
        let mut docs = vec![Document::new("long text")];
        bridge(false).integrate(
            vec![TaskOutput::Text {
                text: "short".into(),
                score: Some(0.5),
            }],
            &mut docs,
        );

        assert_eq!(docs[0].text.as_deref(), Some("long text"));
        assert_eq!(
            docs[0].result("summary"),
            Some(&TaskOutput::Text {
                text: "short".into(),
                score: Some(0.5),
            })
        );
    }

    #[test]
    fn parses_summary_response() {
        let chunk = bridge(true)
            .parse(&json!({"summary": "s", "score": 0.4}))
            .unwrap();
        assert_eq!(chunk, ("s".to_string(), Some(0.4)));
    }
}
