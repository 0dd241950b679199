//! Quality evaluation of a row's enrichment result.

use std::collections::BTreeSet;

use crate::feedback::{QualityAssessment, WeakColumn};
use crate::models::EnrichmentResult;

/// Scores a result against a confidence threshold.
///
/// Implementations fail closed: no result, or a result carrying an error,
/// never passes.
pub trait QualityEvaluator: Send + Sync {
    fn evaluate(&self, result: Option<&EnrichmentResult>, threshold: f64) -> QualityAssessment;
}

/// Checks every column the result has a value or a confidence entry for.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultQualityEvaluator;

impl DefaultQualityEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl QualityEvaluator for DefaultQualityEvaluator {
    fn evaluate(&self, result: Option<&EnrichmentResult>, threshold: f64) -> QualityAssessment {
        let result = match precheck(result) {
            Ok(result) => result,
            Err(assessment) => return assessment,
        };

        let columns: BTreeSet<&String> = result
            .confidence
            .keys()
            .chain(result.extracted_data.keys())
            .collect();

        let weak_columns = columns
            .into_iter()
            .filter_map(|name| match result.confidence.get(name) {
                None => Some(WeakColumn::new(name.as_str(), 0.0, "No confidence information")),
                Some(conf) if conf.score < threshold => {
                    Some(WeakColumn::new(name.as_str(), conf.score, conf.reason.as_str()))
                }
                Some(_) => None,
            })
            .collect();

        assessment_from(weak_columns)
    }
}

/// Checks only an explicit set of target columns. A target with no
/// confidence entry at all counts as weak.
#[derive(Debug, Clone, Default)]
pub struct ColumnTargetedEvaluator {
    targets: BTreeSet<String>,
}

impl ColumnTargetedEvaluator {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(String::as_str)
    }
}

impl QualityEvaluator for ColumnTargetedEvaluator {
    fn evaluate(&self, result: Option<&EnrichmentResult>, threshold: f64) -> QualityAssessment {
        let result = match precheck(result) {
            Ok(result) => result,
            Err(assessment) => return assessment,
        };

        let weak_columns = self
            .targets
            .iter()
            .filter_map(|name| match result.confidence.get(name) {
                None => Some(WeakColumn::new(
                    name.as_str(),
                    0.0,
                    "No confidence information for targeted column",
                )),
                Some(conf) if conf.score < threshold => {
                    Some(WeakColumn::new(name.as_str(), conf.score, conf.reason.as_str()))
                }
                Some(_) => None,
            })
            .collect();

        assessment_from(weak_columns)
    }
}

fn precheck(result: Option<&EnrichmentResult>) -> Result<&EnrichmentResult, QualityAssessment> {
    let Some(result) = result else {
        return Err(QualityAssessment::failed("No result provided"));
    };
    if let Some(error) = &result.error {
        return Err(QualityAssessment::failed(format!(
            "Result contains error: {}",
            error
        )));
    }
    Ok(result)
}

fn assessment_from(weak_columns: Vec<WeakColumn>) -> QualityAssessment {
    let suggestions = weak_columns
        .iter()
        .map(|wc| {
            format!(
                "Column '{}' has low confidence ({:.1}): {}",
                wc.name, wc.confidence, wc.reason
            )
        })
        .collect();
    QualityAssessment {
        passed: weak_columns.is_empty(),
        weak_columns,
        suggestions,
    }
}
