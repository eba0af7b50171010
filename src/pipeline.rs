//! Pipeline - an ordered chain of tasks executed over a document batch.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use tracing::{debug, info};

use crate::document::Document;
use crate::error::{ConfigError, ConfigResult, Result, SiftError};
use crate::tasks::Task;

/// An ordered chain of tasks.
///
/// Construction validates the chain: task ids must be unique, and a task
/// declaring an input kind must follow a task producing that kind. Execution
/// is left-to-right composition over the whole batch - no dependency graph.
///
/// `run` takes ownership of the batch and mutates it; use [`Pipeline::run_cloned`]
/// to keep the caller's documents untouched.
pub struct Pipeline {
    tasks: Vec<Box<dyn Task>>,
    cache_capacity: usize,
    cache: RwLock<Cache>,
}

#[derive(Default)]
struct Cache {
    entries: HashMap<String, Document>,
    order: VecDeque<String>,
}

impl Cache {
    fn insert(&mut self, text: String, doc: Document, capacity: usize) {
        while self.order.len() >= capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
        self.order.push_back(text.clone());
        self.entries.insert(text, doc);
    }
}

impl Pipeline {
    pub fn new(tasks: Vec<Box<dyn Task>>) -> ConfigResult<Self> {
        validate(&tasks)?;
        Ok(Self {
            tasks,
            cache_capacity: 0,
            cache: RwLock::new(Cache::default()),
        })
    }

    /// Cache processed documents keyed by their input text.
    ///
    /// Duplicate inputs within and across runs are served from cache instead
    /// of re-running tasks; the oldest entries are evicted beyond `capacity`.
    /// Off by default - text-keyed caching is unsound when documents differ
    /// only in `meta`.
    pub fn with_cache(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Append a task, revalidating the chain.
    pub fn add_task(&mut self, task: Box<dyn Task>) -> ConfigResult<()> {
        self.tasks.push(task);
        if let Err(err) = validate(&self.tasks) {
            self.tasks.pop();
            return Err(err);
        }
        Ok(())
    }

    /// Append several tasks, revalidating the chain once.
    pub fn add_tasks(&mut self, tasks: impl IntoIterator<Item = Box<dyn Task>>) -> ConfigResult<()> {
        let before = self.tasks.len();
        self.tasks.extend(tasks);
        if let Err(err) = validate(&self.tasks) {
            self.tasks.truncate(before);
            return Err(err);
        }
        Ok(())
    }

    /// Task with this id, if present.
    pub fn get(&self, task_id: &str) -> Option<&dyn Task> {
        self.tasks
            .iter()
            .find(|task| task.id() == task_id)
            .map(AsRef::as_ref)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &dyn Task> {
        self.tasks.iter().map(AsRef::as_ref)
    }

    /// Run all tasks over the batch, mutating the owned documents.
    pub async fn run(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        if self.cache_capacity == 0 {
            return self.run_all(docs).await;
        }
        self.run_with_cache(docs).await
    }

    /// Run all tasks over clones of the given documents.
    ///
    /// The caller's originals are never touched; the processed clones are
    /// returned.
    pub async fn run_cloned(&self, docs: &[Document]) -> Result<Vec<Document>> {
        self.run(docs.to_vec()).await
    }

    async fn run_all(&self, mut docs: Vec<Document>) -> Result<Vec<Document>> {
        let total = self.tasks.len();
        for (i, task) in self.tasks.iter().enumerate() {
            info!(task = %task.id(), "running task {}/{}", i + 1, total);
            docs = task
                .run(docs)
                .await
                .map_err(|source| SiftError::Task {
                    task_id: task.id().to_string(),
                    source,
                })?;
        }
        Ok(docs)
    }

    async fn run_with_cache(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        enum Target {
            /// Textless document, mapped back by position
            Position(usize),
            /// Text-keyed document, served to every position with this text
            Text(String),
        }

        let total = docs.len();
        let mut slots: Vec<Option<Document>> = (0..total).map(|_| None).collect();
        let mut to_run: Vec<Document> = Vec::new();
        let mut targets: Vec<Target> = Vec::new();
        let mut pending: HashMap<String, Vec<usize>> = HashMap::new();

        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            for (i, doc) in docs.into_iter().enumerate() {
                match doc.text.clone() {
                    None => {
                        targets.push(Target::Position(i));
                        to_run.push(doc);
                    }
                    Some(text) => {
                        if let Some(hit) = cache.entries.get(&text) {
                            debug!(position = i, "serving document from cache");
                            slots[i] = Some(hit.clone());
                        } else if let Some(positions) = pending.get_mut(&text) {
                            // Duplicate input within the batch: run once.
                            positions.push(i);
                        } else {
                            pending.insert(text.clone(), vec![i]);
                            targets.push(Target::Text(text));
                            to_run.push(doc);
                        }
                    }
                }
            }
        }

        let processed = if to_run.is_empty() {
            Vec::new()
        } else {
            self.run_all(to_run).await?
        };

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        for (target, doc) in targets.into_iter().zip(processed) {
            match target {
                Target::Position(i) => slots[i] = Some(doc),
                Target::Text(text) => {
                    for &i in &pending[&text] {
                        slots[i] = Some(doc.clone());
                    }
                    cache.insert(text, doc, self.cache_capacity);
                }
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

fn validate(tasks: &[Box<dyn Task>]) -> ConfigResult<()> {
    let mut ids: HashSet<&str> = HashSet::new();
    for task in tasks {
        if !ids.insert(task.id()) {
            return Err(ConfigError::DuplicateTaskId {
                id: task.id().to_string(),
            });
        }
    }

    for pair in tasks.windows(2) {
        if let Some(consumes) = pair[1].consumes() {
            let produces = pair[0].produces();
            if produces != consumes {
                return Err(ConfigError::ChainMismatch {
                    task: pair[0].id().to_string(),
                    next: pair[1].id().to_string(),
                    produces,
                    consumes,
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::OutputKind;
    use crate::testing::StaticTask;

    fn boxed(task: StaticTask) -> Box<dyn Task> {
        Box::new(task)
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let result = Pipeline::new(vec![
            boxed(StaticTask::new("a")),
            boxed(StaticTask::new("a")),
        ]);
        assert!(matches!(result, Err(ConfigError::DuplicateTaskId { .. })));
    }

    #[test]
    fn chain_mismatch_is_rejected() {
        let result = Pipeline::new(vec![
            boxed(StaticTask::new("text")),
            boxed(StaticTask::new("labels").consuming(OutputKind::LabelScores)),
        ]);
        assert!(matches!(result, Err(ConfigError::ChainMismatch { .. })));
    }

    #[test]
    fn matching_chain_is_accepted() {
        let result = Pipeline::new(vec![
            boxed(StaticTask::new("text")),
            boxed(StaticTask::new("next").consuming(OutputKind::Text)),
        ]);
        assert!(result.is_ok());
    }

    #[test]
    fn add_task_rolls_back_on_failure() {
        let mut pipeline = Pipeline::new(vec![boxed(StaticTask::new("a"))]).unwrap();
        assert!(pipeline.add_task(boxed(StaticTask::new("a"))).is_err());
        assert_eq!(pipeline.tasks().count(), 1);
        assert!(pipeline.add_task(boxed(StaticTask::new("b"))).is_ok());
        assert!(pipeline.get("b").is_some());
        assert!(pipeline.get("missing").is_none());
    }

    #[tokio::test]
    async fn runs_tasks_in_order() {
        let pipeline = Pipeline::new(vec![
            boxed(StaticTask::new("first")),
            boxed(StaticTask::new("second")),
        ])
        .unwrap();

        let docs = pipeline.run(vec![Document::new("text")]).await.unwrap();
        let keys: Vec<&String> = docs[0].results.keys().collect();
        assert_eq!(keys, ["first", "second"]);
    }

    #[tokio::test]
    async fn run_cloned_leaves_originals_untouched() {
        let pipeline = Pipeline::new(vec![boxed(StaticTask::new("t"))]).unwrap();
        let originals = vec![Document::new("text")];

        let processed = pipeline.run_cloned(&originals).await.unwrap();

        assert!(originals[0].results.is_empty());
        assert!(processed[0].result("t").is_some());
    }

    #[tokio::test]
    async fn cache_serves_duplicate_documents() {
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let pipeline = Pipeline::new(vec![boxed(StaticTask::new("t").counting(counter.clone()))])
            .unwrap()
            .with_cache(8);

        // Duplicate inside one batch.
        let docs = pipeline
            .run(vec![Document::new("same"), Document::new("same")])
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs[1].result("t").is_some());
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);

        // Served from cache on the next run.
        let docs = pipeline.run(vec![Document::new("same")]).await.unwrap();
        assert!(docs[0].result("t").is_some());
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
