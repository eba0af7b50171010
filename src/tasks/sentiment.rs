//! Aspect-based sentiment analysis.
//!
//! Scores each declared aspect in [0, 1] (0 negative, 1 positive) plus an
//! overall sentiment score. With no declared aspects, only the overall
//! score is produced.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridges::{compose_template, Bridge};
use crate::consolidate::{ChunkRange, MapScoreConsolidation};
use crate::engine::{BackendKind, ChatMode, ConstrainedMode, Engine, InferenceMode, OutputShape};
use crate::error::ConfigError;
use crate::outputs::{OutputKind, TaskOutput};
use crate::tasks::{serialize_examples, FailurePolicy, PredictiveTask};

const INSTRUCTIONS: &str = "\
Rate the sentiment the text expresses towards each of the given aspects, \
from 0 (negative) to 1 (positive), and the overall sentiment. Respond with \
a JSON object {\"sentiment_per_aspect\": {aspect: score}, \"score\": \
overall}.";

/// Few-shot example: a text with per-aspect sentiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FewshotExample {
    pub text: String,
    pub sentiment_per_aspect: IndexMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Builder for a sentiment-analysis task.
pub struct SentimentAnalysis {
    id: String,
    aspects: Vec<String>,
    instructions: Option<String>,
    examples: Vec<FewshotExample>,
    policy: FailurePolicy,
}

impl SentimentAnalysis {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            aspects: Vec::new(),
            instructions: None,
            examples: Vec::new(),
            policy: FailurePolicy::default(),
        }
    }

    /// Aspects to score. Overall sentiment is always determined.
    pub fn with_aspects(
        mut self,
        aspects: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.aspects = aspects.into_iter().map(Into::into).collect();
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
    ) -> Result<PredictiveTask<SentimentChunk>, ConfigError> {
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

        let bridge = SentimentBridge::new(self.id.clone(), self.aspects, mode, self.instructions);
        PredictiveTask::build(self.id, Box::new(bridge), engine, few_shot, self.policy)
    }
}

/// Per-chunk payload: per-aspect scores plus an optional overall score.
pub type SentimentChunk = (IndexMap<String, f64>, Option<f64>);

struct SentimentBridge {
    task_id: String,
    aspects: Vec<String>,
    mode: InferenceMode,
    template: String,
    strategy: MapScoreConsolidation,
}

impl SentimentBridge {
    fn new(
        task_id: String,
        aspects: Vec<String>,
        mode: InferenceMode,
        instructions: Option<String>,
    ) -> Self {
        let mut body = instructions.unwrap_or_else(|| INSTRUCTIONS.to_string());
        if !aspects.is_empty() {
            body.push_str("\n\nAspects:\n");
            for aspect in &aspects {
                body.push_str(&format!("- {aspect}\n"));
            }
        }

        Self {
            task_id,
            strategy: MapScoreConsolidation::new(aspects.clone()),
            aspects,
            mode,
            template: compose_template(&body),
        }
    }
}

#[derive(Deserialize)]
struct SentimentResponse {
    #[serde(default)]
    sentiment_per_aspect: IndexMap<String, f64>,
    #[serde(default)]
    score: Option<f64>,
}

impl Bridge for SentimentBridge {
    type ChunkOutput = SentimentChunk;

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
        OutputShape::AspectScores {
            aspects: self.aspects.clone(),
        }
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::AspectScores
    }

    fn parse(&self, raw: &Value) -> serde_json::Result<Self::ChunkOutput> {
        let response: SentimentResponse = serde_json::from_value(raw.clone())?;
        Ok((response.sentiment_per_aspect, response.score))
    }

    fn consolidate(
        &self,
        chunks: &[Option<Self::ChunkOutput>],
        offsets: &[ChunkRange],
    ) -> Vec<TaskOutput> {
        self.strategy
            .consolidate(chunks, offsets)
            .into_iter()
            .map(|(aspects, overall)| TaskOutput::AspectScores { aspects, overall })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bridge() -> SentimentBridge {
        SentimentBridge::new(
            "sentiment".into(),
            vec!["food".into(), "service".into()],
            InferenceMode::Chat(ChatMode::Json),
            None,
        )
    }

    #[test]
    fn parses_aspect_scores() {
        let chunk = bridge()
            .parse(&json!({
                "sentiment_per_aspect": {"food": 0.9, "service": 0.2},
                "score": 0.6
            }))
            .unwrap();

        assert_eq!(chunk.0["food"], 0.9);
        assert_eq!(chunk.1, Some(0.6));
    }

    #[test]
    fn consolidates_across_chunks() {
        let b = bridge();
        let chunks = vec![
            Some((
                [("food".to_string(), 0.8), ("service".to_string(), 0.4)]
                    .into_iter()
                    .collect(),
                Some(0.5),
            )),
            None,
        ];

        let outputs = b.consolidate(&chunks, &[ChunkRange::new(0, 2)]);
        match &outputs[0] {
            TaskOutput::AspectScores { aspects, overall } => {
                assert!((aspects["food"] - 0.4).abs() < 1e-9);
                assert_eq!(*overall, Some(0.5));
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }
}
