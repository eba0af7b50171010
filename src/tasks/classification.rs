//! Text classification over a fixed label set.
//!
//! Supported backends: chat, constrained decoding, zero-shot classifiers.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridges::{compose_template, Bridge};
use crate::consolidate::{ChunkRange, LabelScoreConsolidation};
use crate::engine::{
    BackendKind, ChatMode, ConstrainedMode, Engine, InferenceMode, OutputShape, ZeroShotMode,
};
use crate::error::ConfigError;
use crate::outputs::{OutputKind, TaskOutput};
use crate::tasks::{FailurePolicy, PredictiveTask};

/// Whether exactly one label applies or every label is scored independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LabelMode {
    /// Return the single best-fitting label
    Single,

    /// Score every declared label independently
    #[default]
    Multi,
}

/// Few-shot example: a text with its per-label confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FewshotExample {
    pub text: String,
    pub scores: IndexMap<String, f64>,
}

const MULTI_LABEL_INSTRUCTIONS: &str = "\
For each of the given labels, score how strongly the text should carry that \
label. Scores are between 0 and 1 and do not need to sum to 1. Respond with \
a JSON object {\"scores\": {label: score}} covering every label.";

const SINGLE_LABEL_INSTRUCTIONS: &str = "\
Pick the single label that best fits the text. Respond with a JSON object \
{\"label\": label, \"score\": confidence} where the confidence is between \
0 and 1.";

/// Builder for a classification task.
///
/// ```no_run
/// # use textsift::tasks::classification::Classification;
/// # fn demo(engine: &dyn textsift::engine::Engine) -> Result<(), textsift::error::ConfigError> {
/// let task = Classification::new("topic", ["science", "politics"])
///     .build(engine)?;
/// # Ok(())
/// # }
/// ```
pub struct Classification {
    id: String,
    labels: Vec<String>,
    descriptions: IndexMap<String, String>,
    mode: LabelMode,
    instructions: Option<String>,
    examples: Vec<FewshotExample>,
    policy: FailurePolicy,
}

impl Classification {
    pub fn new(
        id: impl Into<String>,
        labels: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id: id.into(),
            labels: labels.into_iter().map(Into::into).collect(),
            descriptions: IndexMap::new(),
            mode: LabelMode::default(),
            instructions: None,
            examples: Vec::new(),
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_mode(mut self, mode: LabelMode) -> Self {
        self.mode = mode;
        self
    }

    /// Attach a description shown to the model next to a label.
    pub fn describe_label(
        mut self,
        label: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.descriptions.insert(label.into(), description.into());
        self
    }

    /// Replace the default prompt instructions.
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

    /// Resolve the bridge for the engine's backend and build the task.
    pub fn build(
        self,
        engine: &dyn Engine,
    ) -> Result<PredictiveTask<IndexMap<String, f64>>, ConfigError> {
        if self.labels.is_empty() {
            return Err(ConfigError::EmptyDeclaration {
                task: self.id,
                what: "label set",
            });
        }
        let few_shot = validate_examples(&self.id, &self.labels, &self.examples, engine)?;

        let core = ClassificationCore::new(
            self.id.clone(),
            self.labels,
            self.descriptions,
            self.mode,
            self.instructions,
        );
        let bridge: Box<dyn Bridge<ChunkOutput = IndexMap<String, f64>>> = match engine.kind() {
            BackendKind::Chat => Box::new(ChatClassification { core }),
            BackendKind::Constrained => Box::new(ConstrainedClassification { core }),
            BackendKind::ZeroShot => Box::new(ZeroShotClassification { core }),
        };

        PredictiveTask::build(self.id, bridge, engine, few_shot, self.policy)
    }
}

fn validate_examples(
    task: &str,
    labels: &[String],
    examples: &[FewshotExample],
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
    for example in examples {
        for (label, score) in &example.scores {
            if !labels.contains(label) {
                return Err(ConfigError::FewShot {
                    task: task.to_string(),
                    reason: format!("example references undeclared label '{label}'"),
                });
            }
            if !(0.0..=1.0).contains(score) {
                return Err(ConfigError::FewShot {
                    task: task.to_string(),
                    reason: format!("score for label '{label}' is outside [0, 1]"),
                });
            }
        }
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

/// State shared by the per-backend classification bridges.
struct ClassificationCore {
    task_id: String,
    labels: Vec<String>,
    mode: LabelMode,
    template: String,
    strategy: LabelScoreConsolidation,
}

impl ClassificationCore {
    fn new(
        task_id: String,
        labels: Vec<String>,
        descriptions: IndexMap<String, String>,
        mode: LabelMode,
        instructions: Option<String>,
    ) -> Self {
        let default = match mode {
            LabelMode::Single => SINGLE_LABEL_INSTRUCTIONS,
            LabelMode::Multi => MULTI_LABEL_INSTRUCTIONS,
        };
        let mut body = instructions.unwrap_or_else(|| default.to_string());
        body.push_str("\n\nLabels:\n");
        for label in &labels {
            match descriptions.get(label) {
                Some(description) => {
                    body.push_str(&format!("- {label}: {description}\n"));
                }
                None => body.push_str(&format!("- {label}\n")),
            }
        }

        Self {
            task_id,
            strategy: LabelScoreConsolidation::new(labels.clone()),
            labels,
            mode,
            template: compose_template(&body),
        }
    }

    fn consolidate(
        &self,
        chunks: &[Option<IndexMap<String, f64>>],
        offsets: &[ChunkRange],
    ) -> Vec<TaskOutput> {
        self.strategy
            .consolidate(chunks, offsets)
            .into_iter()
            .map(|scores| TaskOutput::LabelScores { scores })
            .collect()
    }
}

#[derive(Deserialize)]
struct MultiLabelResponse {
    scores: IndexMap<String, f64>,
}

#[derive(Deserialize)]
struct SingleLabelResponse {
    label: String,
    #[serde(default)]
    score: Option<f64>,
}

fn parse_single(raw: &Value) -> serde_json::Result<IndexMap<String, f64>> {
    // Choice-constrained backends may return the bare label string.
    if let Some(label) = raw.as_str() {
        return Ok([(label.to_string(), 1.0)].into_iter().collect());
    }
    let response: SingleLabelResponse = serde_json::from_value(raw.clone())?;
    Ok([(response.label, response.score.unwrap_or(1.0))]
        .into_iter()
        .collect())
}

struct ChatClassification {
    core: ClassificationCore,
}

impl Bridge for ChatClassification {
    type ChunkOutput = IndexMap<String, f64>;

    fn task_id(&self) -> &str {
        &self.core.task_id
    }

    fn prompt_template(&self) -> Option<&str> {
        Some(&self.core.template)
    }

    fn inference_mode(&self) -> InferenceMode {
        InferenceMode::Chat(ChatMode::Json)
    }

    fn output_shape(&self) -> OutputShape {
        match self.core.mode {
            LabelMode::Single => OutputShape::Choice {
                labels: self.core.labels.clone(),
            },
            LabelMode::Multi => OutputShape::LabelScores {
                labels: self.core.labels.clone(),
            },
        }
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::LabelScores
    }

    fn parse(&self, raw: &Value) -> serde_json::Result<Self::ChunkOutput> {
        match self.core.mode {
            LabelMode::Single => parse_single(raw),
            LabelMode::Multi => {
                let response: MultiLabelResponse = serde_json::from_value(raw.clone())?;
                Ok(response.scores)
            }
        }
    }

    fn consolidate(
        &self,
        chunks: &[Option<Self::ChunkOutput>],
        offsets: &[ChunkRange],
    ) -> Vec<TaskOutput> {
        self.core.consolidate(chunks, offsets)
    }
}

struct ConstrainedClassification {
    core: ClassificationCore,
}

impl Bridge for ConstrainedClassification {
    type ChunkOutput = IndexMap<String, f64>;

    fn task_id(&self) -> &str {
        &self.core.task_id
    }

    fn prompt_template(&self) -> Option<&str> {
        Some(&self.core.template)
    }

    fn inference_mode(&self) -> InferenceMode {
        match self.core.mode {
            LabelMode::Single => InferenceMode::Constrained(ConstrainedMode::Choice),
            LabelMode::Multi => InferenceMode::Constrained(ConstrainedMode::Json),
        }
    }

    fn output_shape(&self) -> OutputShape {
        match self.core.mode {
            LabelMode::Single => OutputShape::Choice {
                labels: self.core.labels.clone(),
            },
            LabelMode::Multi => OutputShape::LabelScores {
                labels: self.core.labels.clone(),
            },
        }
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::LabelScores
    }

    fn parse(&self, raw: &Value) -> serde_json::Result<Self::ChunkOutput> {
        match self.core.mode {
            LabelMode::Single => parse_single(raw),
            LabelMode::Multi => {
                let response: MultiLabelResponse = serde_json::from_value(raw.clone())?;
                Ok(response.scores)
            }
        }
    }

    fn consolidate(
        &self,
        chunks: &[Option<Self::ChunkOutput>],
        offsets: &[ChunkRange],
    ) -> Vec<TaskOutput> {
        self.core.consolidate(chunks, offsets)
    }
}

struct ZeroShotClassification {
    core: ClassificationCore,
}

impl Bridge for ZeroShotClassification {
    type ChunkOutput = IndexMap<String, f64>;

    fn task_id(&self) -> &str {
        &self.core.task_id
    }

    fn prompt_template(&self) -> Option<&str> {
        // Zero-shot classifiers take the candidate labels, not a prompt.
        None
    }

    fn inference_mode(&self) -> InferenceMode {
        InferenceMode::ZeroShot(ZeroShotMode::Classify)
    }

    fn output_shape(&self) -> OutputShape {
        OutputShape::LabelScores {
            labels: self.core.labels.clone(),
        }
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::LabelScores
    }

    fn parse(&self, raw: &Value) -> serde_json::Result<Self::ChunkOutput> {
        // Zero-shot backends emit the distribution directly.
        serde_json::from_value(raw.clone())
    }

    fn consolidate(
        &self,
        chunks: &[Option<Self::ChunkOutput>],
        offsets: &[ChunkRange],
    ) -> Vec<TaskOutput> {
        self.core.consolidate(chunks, offsets)
    }
}
