//! Task result shapes written into [`Document::results`].
//!
//! [`Document::results`]: crate::document::Document

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::consolidate::ScoredEntity;

/// Discriminant of a task's result shape, used for chain type-checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    LabelScores,
    Entity,
    Entities,
    Records,
    Text,
    Answers,
    AspectScores,
}

/// A recognized entity mention.
///
/// Identity for deduplication is `(text, label)`; the score never
/// participates in identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity text as it appears in the document
    pub text: String,

    /// Entity label (person, organization, ...)
    pub label: String,

    /// Confidence score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Entity {
    pub fn new(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: label.into(),
            score: None,
        }
    }
}

impl ScoredEntity for Entity {
    type Identity = (String, String);

    fn identity(&self) -> Self::Identity {
        (self.text.clone(), self.label.clone())
    }

    fn score(&self) -> Option<f64> {
        self.score
    }

    fn with_score(mut self, score: Option<f64>) -> Self {
        self.score = score;
        self
    }
}

/// A structured record extracted against a declared field schema.
///
/// Field order follows the declared schema, so two records with equal field
/// values share an identity regardless of how the backend ordered its
/// output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    /// Field values keyed by declared field name
    pub fields: IndexMap<String, Value>,

    /// Confidence score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl ExtractedRecord {
    pub fn new(fields: IndexMap<String, Value>) -> Self {
        Self {
            fields,
            score: None,
        }
    }
}

impl ScoredEntity for ExtractedRecord {
    type Identity = String;

    fn identity(&self) -> String {
        // Canonical JSON of the field map; field order is schema order.
        serde_json::to_string(&self.fields).unwrap_or_default()
    }

    fn score(&self) -> Option<f64> {
        self.score
    }

    fn with_score(mut self, score: Option<f64>) -> Self {
        self.score = score;
        self
    }
}

/// One answered question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub question: String,

    /// Joined answer text; empty when no chunk answered the question
    pub answer: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Consolidated per-document result of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOutput {
    /// Label distribution, sorted descending by score
    LabelScores { scores: Vec<(String, f64)> },

    /// Single extracted record, if the majority vote produced one
    Entity { entity: Option<ExtractedRecord> },

    /// Recognized entity mentions, deduplicated
    Entities { entities: Vec<Entity> },

    /// Extracted records, deduplicated
    Records { records: Vec<ExtractedRecord> },

    /// Produced text (summary, translation)
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        score: Option<f64>,
    },

    /// One entry per declared question, in declared order
    Answers { answers: Vec<Answer> },

    /// Averaged per-aspect scores plus an optional overall score
    AspectScores {
        aspects: IndexMap<String, f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        overall: Option<f64>,
    },
}

impl TaskOutput {
    /// Shape discriminant of this result.
    pub fn kind(&self) -> OutputKind {
        match self {
            Self::LabelScores { .. } => OutputKind::LabelScores,
            Self::Entity { .. } => OutputKind::Entity,
            Self::Entities { .. } => OutputKind::Entities,
            Self::Records { .. } => OutputKind::Records,
            Self::Text { .. } => OutputKind::Text,
            Self::Answers { .. } => OutputKind::Answers,
            Self::AspectScores { .. } => OutputKind::AspectScores,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_identity_ignores_score() {
        let a = Entity {
            text: "Paris".into(),
            label: "location".into(),
            score: Some(0.9),
        };
        let b = Entity {
            text: "Paris".into(),
            label: "location".into(),
            score: Some(0.1),
        };
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a, b);
    }

    #[test]
    fn record_identity_ignores_score() {
        let mut fields = IndexMap::new();
        fields.insert("name".to_string(), json!("Ada"));
        fields.insert("year".to_string(), json!(1815));

        let a = ExtractedRecord {
            fields: fields.clone(),
            score: Some(0.5),
        };
        let b = ExtractedRecord {
            fields,
            score: None,
        };
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn task_output_serde_roundtrip() {
        let output = TaskOutput::LabelScores {
            scores: vec![("science".into(), 0.6), ("politics".into(), 0.4)],
        };
        let json = serde_json::to_string(&output).unwrap();
        let back: TaskOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(output, back);
        assert_eq!(back.kind(), OutputKind::LabelScores);
    }
}
