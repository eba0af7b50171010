//! Cross-chunk consolidation strategies - the algorithmic core.
//!
//! Documents are processed chunk by chunk; each strategy merges the per-chunk
//! outputs of one task back into a single per-document value. Strategies
//! operate on the flattened cross-document result list plus one
//! [`ChunkRange`] per document, and return exactly one aggregate per range.
//!
//! A `None` entry means "no information from this chunk" (failed or skipped
//! inference). Strategies skip `None` entries and produce a neutral aggregate
//! for ranges where every entry is `None` - they never error on missing data.

use std::hash::Hash;

use indexmap::IndexMap;

/// Location of one document's chunks within the flattened cross-document
/// batch. Ranges are contiguous, non-overlapping, and cover the whole
/// flattened list in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub start: usize,
    pub end: usize,
}

impl ChunkRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Number of chunks in this range.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    fn slice<'a, T>(&self, results: &'a [T]) -> &'a [T] {
        &results[self.start..self.end]
    }
}

/// A typed value whose identity excludes its confidence score.
///
/// Two values are "the same" for voting and deduplication purposes iff their
/// identities are equal; their scores are then averaged.
pub trait ScoredEntity: Clone {
    type Identity: Hash + Eq;

    /// Identity key covering every field except the score.
    fn identity(&self) -> Self::Identity;

    /// Confidence score, if the backend produced one.
    fn score(&self) -> Option<f64>;

    /// Same value with the score replaced.
    fn with_score(self, score: Option<f64>) -> Self;
}

fn mean(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}

/// Averages per-label scores over a fixed label set.
///
/// Per chunk: clamp each declared label's score to [0, 1] and accumulate.
/// Per document: divide by the chunk count and sort descending by score.
/// The sort is stable, so ties keep the declared label order. Labels never
/// observed in any chunk contribute 0; undeclared labels are ignored.
#[derive(Debug, Clone)]
pub struct LabelScoreConsolidation {
    labels: Vec<String>,
}

impl LabelScoreConsolidation {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn consolidate(
        &self,
        results: &[Option<IndexMap<String, f64>>],
        offsets: &[ChunkRange],
    ) -> Vec<Vec<(String, f64)>> {
        offsets
            .iter()
            .map(|range| {
                let mut totals: IndexMap<&str, f64> =
                    self.labels.iter().map(|l| (l.as_str(), 0.0)).collect();

                for chunk in range.slice(results).iter().flatten() {
                    for (label, score) in chunk {
                        if let Some(total) = totals.get_mut(label.as_str()) {
                            *total += score.clamp(0.0, 1.0);
                        }
                    }
                }

                let n = range.len().max(1) as f64;
                let mut averaged: Vec<(String, f64)> = totals
                    .into_iter()
                    .map(|(label, total)| (label.to_string(), total / n))
                    .collect();
                averaged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                averaged
            })
            .collect()
    }
}

/// Majority vote across chunks for a single optional entity.
///
/// `None` chunks vote for their own "no entity" bucket. The winner is the
/// identity with the highest occurrence count; ties are resolved toward the
/// identity first seen at the smallest in-range chunk index. The winner's
/// score is the mean of its occurrences' non-null scores (null if none). If
/// the "no entity" bucket wins, the document result is `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleEntityConsolidation;

impl SingleEntityConsolidation {
    pub fn consolidate<E: ScoredEntity>(
        &self,
        results: &[Option<E>],
        offsets: &[ChunkRange],
    ) -> Vec<Option<E>> {
        offsets
            .iter()
            .map(|range| Self::vote(range.slice(results)))
            .collect()
    }

    fn vote<E: ScoredEntity>(chunks: &[Option<E>]) -> Option<E> {
        struct Bucket<E> {
            entity: Option<E>,
            count: usize,
            first_seen: usize,
            scores: Vec<f64>,
        }

        let mut buckets: IndexMap<Option<E::Identity>, Bucket<E>> = IndexMap::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let bucket = buckets
                .entry(chunk.as_ref().map(ScoredEntity::identity))
                .or_insert_with(|| Bucket {
                    entity: chunk.clone(),
                    count: 0,
                    first_seen: i,
                    scores: Vec::new(),
                });
            bucket.count += 1;
            if let Some(score) = chunk.as_ref().and_then(ScoredEntity::score) {
                bucket.scores.push(score);
            }
        }

        let mut winner: Option<&Bucket<E>> = None;
        for bucket in buckets.values() {
            let better = match winner {
                None => true,
                Some(w) => {
                    bucket.count > w.count
                        || (bucket.count == w.count && bucket.first_seen < w.first_seen)
                }
            };
            if better {
                winner = Some(bucket);
            }
        }

        let winner = winner?;
        let entity = winner.entity.clone()?;
        Some(entity.with_score(mean(&winner.scores)))
    }
}

/// Deduplicates entities across chunks, averaging scores per identity.
///
/// Every distinct identity observed anywhere in the range is kept - there is
/// no vote or threshold. Output order is the insertion order of each
/// identity's first occurrence.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiEntityConsolidation;

impl MultiEntityConsolidation {
    pub fn consolidate<E: ScoredEntity>(
        &self,
        results: &[Option<Vec<E>>],
        offsets: &[ChunkRange],
    ) -> Vec<Vec<E>> {
        offsets
            .iter()
            .map(|range| {
                let mut buckets: IndexMap<E::Identity, (E, Vec<f64>)> = IndexMap::new();
                for chunk in range.slice(results).iter().flatten() {
                    for entity in chunk {
                        let (_, scores) = buckets
                            .entry(entity.identity())
                            .or_insert_with(|| (entity.clone(), Vec::new()));
                        if let Some(score) = entity.score() {
                            scores.push(score);
                        }
                    }
                }
                buckets
                    .into_values()
                    .map(|(entity, scores)| entity.with_score(mean(&scores)))
                    .collect()
            })
            .collect()
    }
}

/// Joins per-chunk text with a separator, averaging scores.
///
/// Used by summarization and translation. The joined text is trimmed; the
/// score is the mean of the non-null chunk scores (null if none).
#[derive(Debug, Clone)]
pub struct TextConsolidation {
    joiner: String,
}

impl Default for TextConsolidation {
    fn default() -> Self {
        Self { joiner: "\n".into() }
    }
}

impl TextConsolidation {
    pub fn new(joiner: impl Into<String>) -> Self {
        Self {
            joiner: joiner.into(),
        }
    }

    pub fn consolidate(
        &self,
        results: &[Option<(String, Option<f64>)>],
        offsets: &[ChunkRange],
    ) -> Vec<(String, Option<f64>)> {
        offsets
            .iter()
            .map(|range| {
                let mut texts: Vec<&str> = Vec::new();
                let mut scores: Vec<f64> = Vec::new();
                for (text, score) in range.slice(results).iter().flatten() {
                    texts.push(text.as_str());
                    if let Some(score) = score {
                        scores.push(*score);
                    }
                }
                (
                    texts.join(&self.joiner).trim().to_string(),
                    mean(&scores),
                )
            })
            .collect()
    }
}

/// Merges per-chunk answers into one entry per declared question.
///
/// Only declared questions are kept. Per question, answers collected across
/// the range are joined with a single space and trimmed; the score is the
/// mean of the non-null answer scores. The output carries one entry per
/// declared question in declared order, with an empty answer and null score
/// when no chunk answered it.
#[derive(Debug, Clone)]
pub struct QaConsolidation {
    questions: Vec<String>,
}

impl QaConsolidation {
    pub fn new(questions: Vec<String>) -> Self {
        Self { questions }
    }

    #[allow(clippy::type_complexity)]
    pub fn consolidate(
        &self,
        results: &[Option<Vec<(String, String, Option<f64>)>>],
        offsets: &[ChunkRange],
    ) -> Vec<Vec<(String, String, Option<f64>)>> {
        offsets
            .iter()
            .map(|range| {
                let mut merged: IndexMap<&str, (Vec<&str>, Vec<f64>)> = self
                    .questions
                    .iter()
                    .map(|q| (q.as_str(), (Vec::new(), Vec::new())))
                    .collect();

                for chunk in range.slice(results).iter().flatten() {
                    for (question, answer, score) in chunk {
                        if let Some((answers, scores)) = merged.get_mut(question.as_str()) {
                            answers.push(answer.as_str());
                            if let Some(score) = score {
                                scores.push(*score);
                            }
                        }
                    }
                }

                self.questions
                    .iter()
                    .map(|question| {
                        let (answers, scores) = &merged[question.as_str()];
                        (
                            question.clone(),
                            answers.join(" ").trim().to_string(),
                            mean(scores),
                        )
                    })
                    .collect()
            })
            .collect()
    }
}

/// Averages a fixed-key score map plus an optional overall score.
///
/// Used by aspect sentiment. Per-key scores are clamped to [0, 1], summed
/// across the range, and divided by the chunk count; the overall score is
/// the mean of the non-null per-chunk overall scores.
#[derive(Debug, Clone)]
pub struct MapScoreConsolidation {
    keys: Vec<String>,
}

impl MapScoreConsolidation {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }

    #[allow(clippy::type_complexity)]
    pub fn consolidate(
        &self,
        results: &[Option<(IndexMap<String, f64>, Option<f64>)>],
        offsets: &[ChunkRange],
    ) -> Vec<(IndexMap<String, f64>, Option<f64>)> {
        offsets
            .iter()
            .map(|range| {
                let mut totals: IndexMap<&str, f64> =
                    self.keys.iter().map(|k| (k.as_str(), 0.0)).collect();
                let mut overall: Vec<f64> = Vec::new();

                for (key_scores, overall_score) in range.slice(results).iter().flatten() {
                    for (key, score) in key_scores {
                        if let Some(total) = totals.get_mut(key.as_str()) {
                            *total += score.clamp(0.0, 1.0);
                        }
                    }
                    if let Some(score) = overall_score {
                        overall.push(*score);
                    }
                }

                let n = range.len().max(1) as f64;
                let averaged: IndexMap<String, f64> = totals
                    .into_iter()
                    .map(|(key, total)| (key.to_string(), total / n))
                    .collect();
                (averaged, mean(&overall))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Place {
        name: String,
        score: Option<f64>,
    }

    impl Place {
        fn new(name: &str, score: impl Into<Option<f64>>) -> Self {
            Self {
                name: name.into(),
                score: score.into(),
            }
        }
    }

    impl ScoredEntity for Place {
        type Identity = String;

        fn identity(&self) -> String {
            self.name.clone()
        }

        fn score(&self) -> Option<f64> {
            self.score
        }

        fn with_score(mut self, score: Option<f64>) -> Self {
            self.score = score;
            self
        }
    }

    fn scores(pairs: &[(&str, f64)]) -> Option<IndexMap<String, f64>> {
        Some(pairs.iter().map(|(l, s)| (l.to_string(), *s)).collect())
    }

    fn whole(len: usize) -> Vec<ChunkRange> {
        vec![ChunkRange::new(0, len)]
    }

    #[test]
    fn label_scores_average_across_chunks() {
        // Two chunks with diverging distributions.
        let strategy = LabelScoreConsolidation::new(vec!["science".into(), "politics".into()]);
        let results = vec![
            scores(&[("science", 0.8), ("politics", 0.2)]),
            scores(&[("science", 0.4), ("politics", 0.6)]),
        ];

        let consolidated = strategy.consolidate(&results, &whole(2));
        let pairs = &consolidated[0];
        assert_eq!(pairs[0].0, "science");
        assert!((pairs[0].1 - 0.6).abs() < 1e-9);
        assert_eq!(pairs[1].0, "politics");
        assert!((pairs[1].1 - 0.4).abs() < 1e-9);
    }

    #[test]
    fn label_scores_clamp_and_ignore_undeclared() {
        let strategy = LabelScoreConsolidation::new(vec!["a".into(), "b".into()]);
        let results = vec![scores(&[("a", 3.0), ("b", -1.0), ("unknown", 0.9)])];

        let consolidated = strategy.consolidate(&results, &whole(1));
        assert_eq!(
            consolidated,
            vec![vec![("a".to_string(), 1.0), ("b".to_string(), 0.0)]]
        );
    }

    #[test]
    fn label_scores_ties_keep_declared_order() {
        let strategy = LabelScoreConsolidation::new(vec!["x".into(), "y".into(), "z".into()]);
        let results = vec![scores(&[("y", 0.5), ("x", 0.5), ("z", 0.9)])];

        let consolidated = strategy.consolidate(&results, &whole(1));
        let labels: Vec<&str> = consolidated[0].iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, vec!["z", "x", "y"]);
    }

    #[test]
    fn label_scores_all_null_range_is_neutral() {
        let strategy = LabelScoreConsolidation::new(vec!["a".into()]);
        let results: Vec<Option<IndexMap<String, f64>>> = vec![None, None];

        let consolidated = strategy.consolidate(&results, &whole(2));
        assert_eq!(consolidated, vec![vec![("a".to_string(), 0.0)]]);
    }

    #[test]
    fn single_entity_majority_vote_averages_winner_scores() {
        let results = vec![
            Some(Place::new("Paris", 0.9)),
            Some(Place::new("Paris", 0.7)),
            Some(Place::new("Berlin", 0.95)),
        ];

        let consolidated = SingleEntityConsolidation.consolidate(&results, &whole(3));
        let winner = consolidated[0].as_ref().unwrap();
        assert_eq!(winner.name, "Paris");
        assert!((winner.score.unwrap() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn single_entity_tie_resolves_to_earliest_seen() {
        let results = vec![
            Some(Place::new("Berlin", 0.1)),
            Some(Place::new("Paris", 0.9)),
            Some(Place::new("Paris", 0.9)),
            Some(Place::new("Berlin", 0.1)),
        ];

        let consolidated = SingleEntityConsolidation.consolidate(&results, &whole(4));
        assert_eq!(consolidated[0].as_ref().unwrap().name, "Berlin");
    }

    #[test]
    fn single_entity_null_bucket_can_win() {
        let results = vec![None, None, Some(Place::new("Paris", 0.9))];

        let consolidated = SingleEntityConsolidation.consolidate(&results, &whole(3));
        assert_eq!(consolidated, vec![None]);
    }

    #[test]
    fn single_entity_score_null_when_no_occurrence_scored() {
        let results = vec![Some(Place::new("Paris", None)), Some(Place::new("Paris", None))];

        let consolidated = SingleEntityConsolidation.consolidate(&results, &whole(2));
        let winner = consolidated[0].as_ref().unwrap();
        assert_eq!(winner.name, "Paris");
        assert_eq!(winner.score, None);
    }

    #[test]
    fn multi_entity_dedups_and_averages() {
        let results = vec![Some(vec![
            Place::new("A", 0.5),
            Place::new("B", 0.9),
            Place::new("A", 0.9),
        ])];

        let consolidated = MultiEntityConsolidation.consolidate(&results, &whole(1));
        assert_eq!(consolidated[0].len(), 2);
        assert_eq!(consolidated[0][0].name, "A");
        assert!((consolidated[0][0].score.unwrap() - 0.7).abs() < 1e-9);
        assert_eq!(consolidated[0][1].name, "B");
        assert!((consolidated[0][1].score.unwrap() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn multi_entity_keeps_first_occurrence_order_across_chunks() {
        let results = vec![
            Some(vec![Place::new("B", 0.2)]),
            None,
            Some(vec![Place::new("A", 0.4), Place::new("B", 0.6)]),
        ];

        let consolidated = MultiEntityConsolidation.consolidate(&results, &whole(3));
        let names: Vec<&str> = consolidated[0].iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
    }

    #[test]
    fn text_joins_and_trims() {
        let strategy = TextConsolidation::default();
        let results = vec![
            Some(("first".to_string(), Some(0.4))),
            None,
            Some(("second".to_string(), None)),
        ];

        let consolidated = strategy.consolidate(&results, &whole(3));
        assert_eq!(consolidated[0].0, "first\nsecond");
        assert_eq!(consolidated[0].1, Some(0.4));
    }

    #[test]
    fn text_all_null_is_empty_with_null_score() {
        let strategy = TextConsolidation::default();
        let results: Vec<Option<(String, Option<f64>)>> = vec![None, None];

        let consolidated = strategy.consolidate(&results, &whole(2));
        assert_eq!(consolidated, vec![(String::new(), None)]);
    }

    #[test]
    fn qa_merges_per_question_in_declared_order() {
        let strategy = QaConsolidation::new(vec!["Q1".into(), "Q2".into()]);
        let results = vec![
            Some(vec![("Q1".to_string(), "yes".to_string(), Some(0.8))]),
            Some(vec![
                ("Q1".to_string(), "definitely".to_string(), Some(0.6)),
                ("Q3".to_string(), "ignored".to_string(), Some(1.0)),
            ]),
        ];

        let consolidated = strategy.consolidate(&results, &whole(2));
        assert_eq!(consolidated[0].len(), 2);
        assert_eq!(consolidated[0][0].0, "Q1");
        assert_eq!(consolidated[0][0].1, "yes definitely");
        assert!((consolidated[0][0].2.unwrap() - 0.7).abs() < 1e-9);
        assert_eq!(consolidated[0][1], ("Q2".to_string(), String::new(), None));
    }

    #[test]
    fn map_scores_average_with_overall() {
        let strategy = MapScoreConsolidation::new(vec!["food".into(), "service".into()]);
        let results = vec![
            Some((
                [("food".to_string(), 0.8), ("service".to_string(), 0.4)]
                    .into_iter()
                    .collect(),
                Some(0.6),
            )),
            Some((
                [("food".to_string(), 0.6), ("service".to_string(), 0.2)]
                    .into_iter()
                    .collect(),
                None,
            )),
        ];

        let consolidated = strategy.consolidate(&results, &whole(2));
        let (aspects, overall) = &consolidated[0];
        assert!((aspects["food"] - 0.7).abs() < 1e-9);
        assert!((aspects["service"] - 0.3).abs() < 1e-9);
        assert_eq!(*overall, Some(0.6));
    }

    #[test]
    fn strategies_respect_document_boundaries() {
        let strategy = LabelScoreConsolidation::new(vec!["l".into()]);
        let results = vec![
            scores(&[("l", 1.0)]),
            scores(&[("l", 1.0)]),
            scores(&[("l", 0.0)]),
        ];
        let offsets = vec![ChunkRange::new(0, 2), ChunkRange::new(2, 3)];

        let consolidated = strategy.consolidate(&results, &offsets);
        assert_eq!(consolidated.len(), 2);
        assert!((consolidated[0][0].1 - 1.0).abs() < 1e-9);
        assert!((consolidated[1][0].1 - 0.0).abs() < 1e-9);
    }

    proptest! {
        // Each chunk contributes at most 1.0 per label after clamping, so the
        // per-label average stays within [0, 1] and the total stays within
        // the label count; the output is sorted non-increasing.
        #[test]
        fn label_score_bound_and_sorted(
            chunk_scores in proptest::collection::vec(
                proptest::collection::vec(-2.0f64..3.0, 3),
                1..6,
            )
        ) {
            let labels = vec!["a".to_string(), "b".to_string(), "c".to_string()];
            let strategy = LabelScoreConsolidation::new(labels.clone());
            let results: Vec<Option<IndexMap<String, f64>>> = chunk_scores
                .iter()
                .map(|chunk| {
                    Some(labels.iter().cloned().zip(chunk.iter().copied()).collect())
                })
                .collect();

            let consolidated = strategy.consolidate(&results, &whole(results.len()));
            let pairs = &consolidated[0];

            let total: f64 = pairs.iter().map(|(_, s)| s).sum();
            prop_assert!(total <= labels.len() as f64 + 1e-9);
            for (_, score) in pairs {
                prop_assert!((0.0..=1.0 + 1e-9).contains(score));
            }
            for window in pairs.windows(2) {
                prop_assert!(window[0].1 >= window[1].1);
            }
        }

        // The vote is deterministic: consolidating the same multiset twice
        // yields the same winner, and the winner is always the entity first
        // seen among those with the maximum count.
        #[test]
        fn majority_vote_deterministic(
            names in proptest::collection::vec(0u8..4, 1..12)
        ) {
            let results: Vec<Option<Place>> = names
                .iter()
                .map(|n| Some(Place::new(&format!("e{n}"), None)))
                .collect();

            let first = SingleEntityConsolidation.consolidate(&results, &whole(results.len()));
            let second = SingleEntityConsolidation.consolidate(&results, &whole(results.len()));
            prop_assert_eq!(&first, &second);

            let winner = first[0].as_ref().unwrap();
            let max_count = names
                .iter()
                .map(|n| names.iter().filter(|m| *m == n).count())
                .max()
                .unwrap();
            let earliest_max = names
                .iter()
                .find(|n| names.iter().filter(|m| m == n).count() == max_count)
                .unwrap();
            prop_assert_eq!(&winner.name, &format!("e{earliest_max}"));
        }

        // Consolidating an already-deduplicated list (one occurrence per
        // identity) returns the same identities with unchanged scores.
        #[test]
        fn dedup_idempotent(
            entries in proptest::collection::btree_map(0u8..20, 0.0f64..1.0, 1..8)
        ) {
            let unique: Vec<Place> = entries
                .iter()
                .map(|(n, s)| Place::new(&format!("e{n}"), *s))
                .collect();
            let results = vec![Some(unique.clone())];

            let consolidated = MultiEntityConsolidation.consolidate(&results, &whole(1));
            prop_assert_eq!(&consolidated[0], &unique);
        }

        // Joining k non-empty chunk texts with the newline separator and
        // re-splitting yields exactly k segments.
        #[test]
        fn text_join_exact(
            texts in proptest::collection::vec("[a-z]{1,8}", 1..6)
        ) {
            let strategy = TextConsolidation::default();
            let results: Vec<Option<(String, Option<f64>)>> = texts
                .iter()
                .map(|t| Some((t.clone(), None)))
                .collect();

            let consolidated = strategy.consolidate(&results, &whole(results.len()));
            let segments: Vec<&str> = consolidated[0].0.split('\n').collect();
            prop_assert_eq!(segments.len(), texts.len());
        }
    }
}
