//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the pipeline without
//! making real inference calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::document::Document;
use crate::engine::{BackendKind, Engine, Executable, InferenceMode, InferenceSpec, InputRecord};
use crate::error::{EngineResult, TaskRunResult};
use crate::outputs::{OutputKind, TaskOutput};
use crate::tasks::Task;

/// A mock inference engine with scripted responses.
///
/// Each queued batch answers one `execute` call; when the script runs dry,
/// every chunk fails (`None`), which exercises the all-null consolidation
/// paths. Calls are recorded for assertions.
#[derive(Clone)]
pub struct MockEngine {
    kind: BackendKind,
    supports_few_shot: bool,
    batches: Arc<RwLock<VecDeque<Vec<Option<Value>>>>>,
    calls: Arc<RwLock<Vec<MockCall>>>,
}

/// Record of one `execute` call made through the mock.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub mode: InferenceMode,
    pub records: Vec<InputRecord>,
}

impl MockEngine {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            supports_few_shot: true,
            batches: Arc::new(RwLock::new(VecDeque::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_few_shot_support(mut self, supported: bool) -> Self {
        self.supports_few_shot = supported;
        self
    }

    /// Queue the response batch for the next `execute` call.
    pub fn with_batch(self, batch: Vec<Option<Value>>) -> Self {
        self.batches.write().unwrap().push_back(batch);
        self
    }

    /// All `execute` calls made so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.read().unwrap().clone()
    }

    /// Clear call history.
    pub fn clear_calls(&self) {
        self.calls.write().unwrap().clear();
    }
}

impl Engine for MockEngine {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn supports_few_shot(&self) -> bool {
        self.supports_few_shot
    }

    fn build_executable(&self, spec: InferenceSpec) -> EngineResult<Box<dyn Executable>> {
        Ok(Box::new(MockExecutable {
            mode: spec.mode,
            batches: Arc::clone(&self.batches),
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct MockExecutable {
    mode: InferenceMode,
    batches: Arc<RwLock<VecDeque<Vec<Option<Value>>>>>,
    calls: Arc<RwLock<Vec<MockCall>>>,
}

#[async_trait]
impl Executable for MockExecutable {
    async fn execute(&self, records: Vec<InputRecord>) -> EngineResult<Vec<Option<Value>>> {
        self.calls.write().unwrap().push(MockCall {
            mode: self.mode,
            records: records.clone(),
        });

        match self.batches.write().unwrap().pop_front() {
            Some(batch) => Ok(batch),
            None => Ok(vec![None; records.len()]),
        }
    }
}

/// A task that writes a fixed result for every document.
///
/// Useful for pipeline sequencing tests without an engine in the loop.
pub struct StaticTask {
    id: String,
    output: TaskOutput,
    consumes: Option<OutputKind>,
    runs: Option<Arc<AtomicUsize>>,
}

impl StaticTask {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            output: TaskOutput::Text {
                text: format!("{id} ran"),
                score: None,
            },
            id,
            consumes: None,
            runs: None,
        }
    }

    /// Replace the result written for each document.
    pub fn with_output(mut self, output: TaskOutput) -> Self {
        self.output = output;
        self
    }

    /// Declare a required input kind for chain-validation tests.
    pub fn consuming(mut self, kind: OutputKind) -> Self {
        self.consumes = Some(kind);
        self
    }

    /// Increment the counter each time the task runs.
    pub fn counting(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.runs = Some(counter);
        self
    }
}

#[async_trait]
impl Task for StaticTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn produces(&self) -> OutputKind {
        self.output.kind()
    }

    fn consumes(&self) -> Option<OutputKind> {
        self.consumes
    }

    async fn run(&self, mut docs: Vec<Document>) -> TaskRunResult<Vec<Document>> {
        if let Some(counter) = &self.runs {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        for doc in &mut docs {
            doc.results.insert(self.id.clone(), self.output.clone());
        }
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scripted_batches_are_served_in_order() {
        let engine = MockEngine::new(BackendKind::Chat)
            .with_batch(vec![Some(json!({"a": 1}))])
            .with_batch(vec![None]);

        let spec = InferenceSpec {
            mode: InferenceMode::Chat(crate::engine::ChatMode::Json),
            prompt_template: None,
            output_shape: crate::engine::OutputShape::Text,
            few_shot: Vec::new(),
        };
        let executable = engine.build_executable(spec).unwrap();

        tokio_test::block_on(async {
            let first = executable.execute(vec![InputRecord::new()]).await.unwrap();
            assert_eq!(first, vec![Some(json!({"a": 1}))]);

            let second = executable.execute(vec![InputRecord::new()]).await.unwrap();
            assert_eq!(second, vec![None]);

            // Script exhausted: every chunk fails.
            let third = executable
                .execute(vec![InputRecord::new(), InputRecord::new()])
                .await
                .unwrap();
            assert_eq!(third, vec![None, None]);
        });

        assert_eq!(engine.calls().len(), 3);
    }
}
