//! Chunk-Aware Document Task Pipeline
//!
//! A library for running a chain of text-processing tasks over a collection
//! of documents, where each task sends document chunks through a pluggable
//! inference backend and merges the per-chunk outputs back into one coherent
//! per-document result.
//!
//! # Design Philosophy
//!
//! - Documents in, documents out - each task writes one result per document
//! - Chunks are processed independently; consolidation owns the merge
//! - Backends are external: the core only sees the [`Engine`] contract
//! - Configuration errors fail at construction, never mid-run
//!
//! # Usage
//!
//! ```rust,ignore
//! use textsift::{Document, Pipeline};
//! use textsift::tasks::classification::Classification;
//!
//! let task = Classification::new("topic", ["science", "politics"])
//!     .build(&engine)?;
//! let pipeline = Pipeline::new(vec![Box::new(task)])?;
//!
//! let docs = pipeline
//!     .run(vec![Document::new("The LHC observed a new resonance.")])
//!     .await?;
//! println!("{:?}", docs[0].result("topic"));
//! ```
//!
//! # Modules
//!
//! - [`document`] - Document model
//! - [`engine`] - Inference-backend contract (engines are external)
//! - [`consolidate`] - Cross-chunk consolidation strategies
//! - [`bridges`] - Per-(task, backend) adapter contract
//! - [`tasks`] - Built-in tasks and the shared execution loop
//! - [`pipeline`] - Task sequencing and validation
//! - [`testing`] - Mock implementations for testing

pub mod bridges;
pub mod consolidate;
pub mod document;
pub mod engine;
pub mod error;
pub mod outputs;
pub mod pipeline;
pub mod tasks;
pub mod testing;

// Re-export core types at crate root
pub use consolidate::{
    ChunkRange, LabelScoreConsolidation, MapScoreConsolidation, MultiEntityConsolidation,
    QaConsolidation, ScoredEntity, SingleEntityConsolidation, TextConsolidation,
};
pub use document::Document;
pub use engine::{
    BackendKind, ChatMode, ConstrainedMode, Engine, Executable, FieldKind, FieldSpec,
    InferenceMode, InferenceSpec, InputRecord, OutputShape, ZeroShotMode,
};
pub use error::{ConfigError, EngineError, Result, SiftError, TaskError};
pub use outputs::{Answer, Entity, ExtractedRecord, OutputKind, TaskOutput};
pub use pipeline::Pipeline;
pub use tasks::{FailurePolicy, PredictiveTask, Task};

// Re-export task builders
pub use tasks::classification::Classification;
pub use tasks::information_extraction::InformationExtraction;
pub use tasks::ner::EntityRecognition;
pub use tasks::question_answering::QuestionAnswering;
pub use tasks::sentiment::SentimentAnalysis;
pub use tasks::summarization::Summarization;
pub use tasks::translation::Translation;
