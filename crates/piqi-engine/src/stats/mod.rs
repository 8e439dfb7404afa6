//! Statistical aggregates of one evaluation.
//!
//! The aggregator consumes every finalized result that is neither
//! conditional nor dependent, and is authoritative for all scorecard
//! numbers. Dictionary keys are wire-stable string compositions.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::evaluation::{EvalOutcome, EvaluationItem, EvaluationResult};

/// Scalar counts of one track (scoring or informational).
///
/// `processed = passed + failed` and `total = processed + skipped` hold
/// at every point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackCounts {
    pub total: u64,
    pub processed: u64,
    pub skipped: u64,
    pub passed: u64,
    pub failed: u64,
}

impl TrackCounts {
    fn add(&mut self, outcome: &EvalOutcome, weight: u64) {
        self.total += weight;
        match outcome {
            EvalOutcome::Skipped { .. } => self.skipped += weight,
            EvalOutcome::Passed => {
                self.processed += weight;
                self.passed += weight;
            }
            EvalOutcome::Failed { .. } => {
                self.processed += weight;
                self.failed += weight;
            }
            EvalOutcome::Pending => {}
        }
    }
}

/// Per data class aggregate (scoring track only).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassStat {
    pub name: String,
    pub instance_count: u64,
    pub scoring: TrackCounts,
    pub weighted: TrackCounts,
    pub critical_failure_count: u64,
}

/// Per element-instance aggregate, keyed `{classMnemonic}.{elementSequence}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ElementStat {
    pub class_mnemonic: String,
    pub element_sequence: u32,
    pub scoring: TrackCounts,
    pub sam_critical_failure_count: u64,
}

/// Cause-keyed aggregate for skips, failures, and critical failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CauseStat {
    pub entity_mnemonic: String,
    pub sam_mnemonic: String,
    pub cause_sam_mnemonic: String,
    pub count: u64,
    pub weight: u64,
}

/// One SAM-level error. The slot still counts as a normal failure; the
/// error detail is carried so the projector can surface it distinctly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamErrorDetail {
    pub entity_mnemonic: String,
    pub sam_mnemonic: String,
    pub message: String,
}

/// Informational-track aggregate, keyed `{entity}|{sam}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InformationalStat {
    pub entity_mnemonic: String,
    pub entity_name: String,
    pub evaluation_name: String,
    pub class_mnemonic: Option<String>,
    pub class_name: Option<String>,
    pub counts: TrackCounts,
}

/// Aggregate state of one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatResponse {
    pub scoring: TrackCounts,
    pub weighted: TrackCounts,
    pub informational: TrackCounts,
    pub critical_failure_count: u64,
    /// Keyed by class mnemonic.
    pub class_stats: BTreeMap<String, ClassStat>,
    /// Keyed `{classMnemonic}.{elementSequence}`.
    pub element_stats: BTreeMap<String, ElementStat>,
    /// Keyed `{entity}|{sam}|{failSam}`.
    pub critical_failures: BTreeMap<String, CauseStat>,
    /// Keyed `{entity}|{sam}`.
    pub informational_stats: BTreeMap<String, InformationalStat>,
    /// Keyed `{entity}|{sam}|{skipSam}`.
    pub skip_stats: BTreeMap<String, CauseStat>,
    /// Keyed `{entity}|{sam}|{failSam}`.
    pub fail_stats: BTreeMap<String, CauseStat>,
    pub sam_errors: Vec<SamErrorDetail>,
}

/// Single-writer consumer of finalized results.
#[derive(Debug, Default)]
pub struct StatisticsAggregator {
    response: StatResponse,
}

impl StatisticsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a data class so empty classes still project a 0/0 score.
    pub fn note_class(&mut self, mnemonic: &str, name: &str) {
        let entry = self
            .response
            .class_stats
            .entry(mnemonic.to_string())
            .or_default();
        if entry.name.is_empty() {
            entry.name = name.to_string();
        }
    }

    pub fn note_element_instance(&mut self, class_mnemonic: &str, class_name: &str) {
        self.note_class(class_mnemonic, class_name);
        if let Some(entry) = self.response.class_stats.get_mut(class_mnemonic) {
            entry.instance_count += 1;
        }
    }

    /// Fold one finalized result into the aggregates. Conditional and
    /// dependent results never contribute.
    pub fn record(&mut self, result: &EvaluationResult, item: &EvaluationItem) {
        if result.is_shadow() || !result.outcome.is_final() {
            return;
        }

        let entity = item.entity.mnemonic.as_str();
        let sam = result.sam_mnemonic();
        let weight = u64::from(result.criterion.scoring_weight);
        let scoring = result.is_scoring();

        if scoring {
            self.response.scoring.add(&result.outcome, 1);
            self.response.weighted.add(&result.outcome, weight);
        } else {
            self.response.informational.add(&result.outcome, 1);
            let key = format!("{entity}|{sam}");
            let entry = self
                .response
                .informational_stats
                .entry(key)
                .or_insert_with(|| InformationalStat {
                    entity_mnemonic: entity.to_string(),
                    entity_name: item.entity.name.clone(),
                    evaluation_name: result
                        .criterion
                        .sam_name_override
                        .clone()
                        .unwrap_or_else(|| sam.to_string()),
                    class_mnemonic: item.class_mnemonic.clone(),
                    class_name: item.class_name.clone(),
                    counts: TrackCounts::default(),
                });
            entry.counts.add(&result.outcome, 1);
        }

        if scoring {
            if let (Some(class_mnemonic), Some(sequence)) =
                (item.class_mnemonic.as_deref(), item.element_sequence)
            {
                let key = format!("{class_mnemonic}.{sequence}");
                let entry = self
                    .response
                    .element_stats
                    .entry(key)
                    .or_insert_with(|| ElementStat {
                        class_mnemonic: class_mnemonic.to_string(),
                        element_sequence: sequence,
                        ..ElementStat::default()
                    });
                entry.scoring.add(&result.outcome, 1);
            }

            if let Some(class_mnemonic) = item.class_mnemonic.as_deref() {
                let entry = self
                    .response
                    .class_stats
                    .entry(class_mnemonic.to_string())
                    .or_default();
                if entry.name.is_empty() {
                    entry.name = item.class_name.clone().unwrap_or_default();
                }
                entry.scoring.add(&result.outcome, 1);
                entry.weighted.add(&result.outcome, weight);
            }
        }

        match &result.outcome {
            EvalOutcome::Skipped { skip_sam, .. } => {
                let cause = skip_sam.as_deref().unwrap_or(sam);
                let key = format!("{entity}|{sam}|{cause}");
                let entry = self
                    .response
                    .skip_stats
                    .entry(key)
                    .or_insert_with(|| CauseStat {
                        entity_mnemonic: entity.to_string(),
                        sam_mnemonic: sam.to_string(),
                        cause_sam_mnemonic: cause.to_string(),
                        ..CauseStat::default()
                    });
                entry.count += 1;
                entry.weight += weight;
            }
            EvalOutcome::Failed {
                fail_sam,
                custom_error,
                ..
            } => {
                if let Some(message) = custom_error {
                    self.response.sam_errors.push(SamErrorDetail {
                        entity_mnemonic: entity.to_string(),
                        sam_mnemonic: sam.to_string(),
                        message: message.clone(),
                    });
                }
                let cause = fail_sam.as_deref().unwrap_or(sam);
                let key = format!("{entity}|{sam}|{cause}");
                let entry = self
                    .response
                    .fail_stats
                    .entry(key.clone())
                    .or_insert_with(|| CauseStat {
                        entity_mnemonic: entity.to_string(),
                        sam_mnemonic: sam.to_string(),
                        cause_sam_mnemonic: cause.to_string(),
                        ..CauseStat::default()
                    });
                entry.count += 1;
                entry.weight += weight;

                if scoring && result.is_critical() {
                    self.response.critical_failure_count += 1;
                    let entry = self
                        .response
                        .critical_failures
                        .entry(key)
                        .or_insert_with(|| CauseStat {
                            entity_mnemonic: entity.to_string(),
                            sam_mnemonic: sam.to_string(),
                            cause_sam_mnemonic: cause.to_string(),
                            ..CauseStat::default()
                        });
                    entry.count += 1;
                    entry.weight += weight;

                    if let (Some(class_mnemonic), Some(sequence)) =
                        (item.class_mnemonic.as_deref(), item.element_sequence)
                    {
                        let key = format!("{class_mnemonic}.{sequence}");
                        if let Some(entry) = self.response.element_stats.get_mut(&key) {
                            entry.sam_critical_failure_count += 1;
                        }
                    }
                    if let Some(class_mnemonic) = item.class_mnemonic.as_deref() {
                        if let Some(entry) = self.response.class_stats.get_mut(class_mnemonic) {
                            entry.critical_failure_count += 1;
                        }
                    }
                }
            }
            EvalOutcome::Passed | EvalOutcome::Pending => {}
        }
    }

    pub fn response(&self) -> &StatResponse {
        &self.response
    }

    pub fn into_response(self) -> StatResponse {
        self.response
    }
}
