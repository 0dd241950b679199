//! Per-row attempt ledger and its store.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use super::types::{QualityAssessment, WeakColumn};
use crate::models::{FieldConfidence, FieldValue};

/// One pass of a row through the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attempt {
    pub number: u32,
    /// Columns this attempt was asked to focus on; empty on the first pass.
    pub target_columns: Vec<String>,
    pub patterns_used: Vec<String>,
    pub urls_crawled: Vec<String>,
    pub results: BTreeMap<String, FieldValue>,
    pub confidences: BTreeMap<String, FieldConfidence>,
    pub error: Option<String>,
    pub assessment: Option<QualityAssessment>,
}

/// Append-only record of every attempt made for one row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptHistory {
    pub row_key: String,
    pub attempts: Vec<Attempt>,
}

fn dedup_in_order<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen: HashSet<&String> = HashSet::new();
    items
        .filter(|item| seen.insert(*item))
        .cloned()
        .collect()
}

impl AttemptHistory {
    pub fn new(row_key: impl Into<String>) -> Self {
        Self {
            row_key: row_key.into(),
            attempts: Vec::new(),
        }
    }

    pub fn record(&mut self, attempt: Attempt) {
        self.attempts.push(attempt);
    }

    pub fn count(&self) -> usize {
        self.attempts.len()
    }

    pub fn last_attempt(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    pub fn last_weak_columns(&self) -> &[WeakColumn] {
        self.last_attempt()
            .and_then(|a| a.assessment.as_ref())
            .map(|a| a.weak_columns.as_slice())
            .unwrap_or(&[])
    }

    /// Every pattern tried so far, first occurrence order.
    pub fn all_patterns_used(&self) -> Vec<String> {
        dedup_in_order(self.attempts.iter().flat_map(|a| a.patterns_used.iter()))
    }

    /// Every URL crawled so far, first occurrence order.
    pub fn all_urls_crawled(&self) -> Vec<String> {
        dedup_in_order(self.attempts.iter().flat_map(|a| a.urls_crawled.iter()))
    }

    /// Highest confidence score seen per column.
    pub fn best_confidences(&self) -> BTreeMap<String, f64> {
        let mut best: BTreeMap<String, f64> = BTreeMap::new();
        for attempt in &self.attempts {
            for (col, conf) in &attempt.confidences {
                let entry = best.entry(col.clone()).or_insert(conf.score);
                if conf.score > *entry {
                    *entry = conf.score;
                }
            }
        }
        best
    }

    /// Per column, the value from the attempt with that column's best
    /// confidence. Earlier attempts win ties.
    pub fn best_results(&self) -> BTreeMap<String, FieldValue> {
        self.best_partial().extracted_data
    }

    /// Best value, confidence and the union of sources across all attempts.
    pub fn best_partial(&self) -> PartialResult {
        self.attempts
            .iter()
            .map(PartialResult::from)
            .fold(PartialResult::default(), PartialResult::merge)
    }
}

/// The extracted slice of a row that one or more attempts produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialResult {
    pub extracted_data: BTreeMap<String, FieldValue>,
    pub confidences: BTreeMap<String, FieldConfidence>,
    pub sources: Vec<String>,
}

impl PartialResult {
    /// Merge `new` into `self`.
    ///
    /// A field takes the new value when it was absent or when the new
    /// confidence is strictly higher. Sources are unioned in order.
    pub fn merge(self, new: PartialResult) -> PartialResult {
        let mut merged = self;

        for (key, value) in new.extracted_data {
            let existing_score = merged.confidences.get(&key).map(|c| c.score).unwrap_or(0.0);
            let new_conf = new.confidences.get(&key).cloned();
            let new_score = new_conf.as_ref().map(|c| c.score).unwrap_or(0.0);

            if !merged.extracted_data.contains_key(&key) || new_score > existing_score {
                merged.extracted_data.insert(key.clone(), value);
                match new_conf {
                    Some(conf) => {
                        merged.confidences.insert(key, conf);
                    }
                    None => {
                        merged.confidences.remove(&key);
                    }
                }
            }
        }

        let sources = dedup_in_order(merged.sources.iter().chain(new.sources.iter()));
        merged.sources = sources;
        merged
    }
}

impl From<&Attempt> for PartialResult {
    fn from(attempt: &Attempt) -> Self {
        Self {
            extracted_data: attempt.results.clone(),
            confidences: attempt
                .confidences
                .iter()
                .filter(|(k, _)| attempt.results.contains_key(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            sources: attempt.urls_crawled.clone(),
        }
    }
}

/// Keeps one [`AttemptHistory`] per row key for the duration of a run.
pub trait AttemptStore: Send + Sync {
    /// The stored history for `row_key`, creating an empty one if absent.
    fn get_or_create(&self, row_key: &str) -> AttemptHistory;

    fn save(&self, history: AttemptHistory);

    fn delete(&self, row_key: &str);
}

/// Mutex-guarded in-memory [`AttemptStore`].
#[derive(Debug, Default)]
pub struct InMemoryAttemptStore {
    histories: Mutex<HashMap<String, AttemptHistory>>,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, AttemptHistory>> {
        self.histories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AttemptStore for InMemoryAttemptStore {
    fn get_or_create(&self, row_key: &str) -> AttemptHistory {
        self.lock()
            .entry(row_key.to_string())
            .or_insert_with(|| AttemptHistory::new(row_key))
            .clone()
    }

    fn save(&self, history: AttemptHistory) {
        self.lock().insert(history.row_key.clone(), history);
    }

    fn delete(&self, row_key: &str) {
        self.lock().remove(row_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn attempt(number: u32, patterns: &[&str], urls: &[&str], values: &[(&str, &str, f64)]) -> Attempt {
        Attempt {
            number,
            patterns_used: patterns.iter().map(|s| s.to_string()).collect(),
            urls_crawled: urls.iter().map(|s| s.to_string()).collect(),
            results: values
                .iter()
                .map(|(k, v, _)| (k.to_string(), FieldValue::from(*v)))
                .collect(),
            confidences: values
                .iter()
                .map(|(k, _, c)| (k.to_string(), FieldConfidence::new(*c, "test")))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_all_patterns_and_urls_dedup_in_order() {
        let mut history = AttemptHistory::new("acme");
        history.record(attempt(1, &["p1", "p2"], &["u1"], &[]));
        history.record(attempt(2, &["p2", "p3"], &["u2", "u1"], &[]));

        assert_eq!(history.all_patterns_used(), vec!["p1", "p2", "p3"]);
        assert_eq!(history.all_urls_crawled(), vec!["u1", "u2"]);
        assert_eq!(history.count(), 2);
    }

    #[test]
    fn test_best_confidences_and_results() {
        let mut history = AttemptHistory::new("acme");
        history.record(attempt(1, &[], &[], &[("ceo", "Old CEO", 0.4), ("hq", "Paris", 0.9)]));
        history.record(attempt(2, &[], &[], &[("ceo", "Jane Doe", 0.8), ("hq", "Lyon", 0.5)]));

        let best = history.best_confidences();
        assert_eq!(best["ceo"], 0.8);
        assert_eq!(best["hq"], 0.9);

        let results = history.best_results();
        assert_eq!(results["ceo"], FieldValue::from("Jane Doe"));
        assert_eq!(results["hq"], FieldValue::from("Paris"));
    }

    #[test]
    fn test_best_results_ties_keep_earlier_value() {
        let mut history = AttemptHistory::new("acme");
        history.record(attempt(1, &[], &[], &[("ceo", "First", 0.5)]));
        history.record(attempt(2, &[], &[], &[("ceo", "Second", 0.5)]));
        assert_eq!(history.best_results()["ceo"], FieldValue::from("First"));
    }

    #[test]
    fn test_merge_partial_results() {
        let existing = PartialResult::from(&attempt(1, &[], &["a", "b"], &[("ceo", "Old", 0.6)]));
        let new = PartialResult::from(&attempt(
            2,
            &[],
            &["b", "c"],
            &[("ceo", "Worse", 0.3), ("hq", "Berlin", 0.7)],
        ));

        let merged = existing.merge(new);
        assert_eq!(merged.extracted_data["ceo"], FieldValue::from("Old"));
        assert_eq!(merged.confidences["ceo"].score, 0.6);
        assert_eq!(merged.extracted_data["hq"], FieldValue::from("Berlin"));
        assert_eq!(merged.sources, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_last_weak_columns() {
        let mut history = AttemptHistory::new("acme");
        assert!(history.last_weak_columns().is_empty());

        let mut a = attempt(1, &[], &[], &[]);
        a.assessment = Some(QualityAssessment {
            passed: false,
            weak_columns: vec![WeakColumn::new("ceo", 0.1, "low")],
            suggestions: vec![],
        });
        history.record(a);
        assert_eq!(history.last_weak_columns().len(), 1);
    }

    #[test]
    fn test_attempt_store_get_or_create_save_delete() {
        let store = InMemoryAttemptStore::new();
        let mut history = store.get_or_create("acme");
        assert_eq!(history.count(), 0);

        history.record(attempt(1, &["p"], &[], &[]));
        store.save(history);
        assert_eq!(store.get_or_create("acme").count(), 1);

        store.delete("acme");
        assert_eq!(store.get_or_create("acme").count(), 0);
    }

    #[tokio::test]
    async fn test_attempt_store_concurrent_rows() {
        let store = Arc::new(InMemoryAttemptStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("row-{}", i);
                let mut history = store.get_or_create(&key);
                history.record(attempt(1, &["p"], &[], &[]));
                store.save(history);
            }));
        }
        for handle in handles {
            handle.await.expect("task panicked");
        }
        assert_eq!(store.len(), 16);
    }
}
