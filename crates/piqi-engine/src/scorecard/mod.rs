//! Projection of the aggregate state into the external scorecard shape.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::message::MessageHeader;
use crate::refdata::EvaluationRubric;
use crate::stats::StatResponse;

/// The external scorecard emitted for one evaluated message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PiqiScorecard {
    #[serde(rename = "DataProviderID")]
    pub data_provider_id: String,
    #[serde(rename = "DataSourceID")]
    pub data_source_id: String,
    #[serde(rename = "MessageID")]
    pub message_id: String,
    #[serde(rename = "EvaluationRubric")]
    pub evaluation_rubric: String,
    #[serde(rename = "ProcessDate")]
    pub process_date: DateTime<Utc>,
    /// True when cancellation cut the evaluation short.
    #[serde(rename = "Partial")]
    pub partial: bool,
    #[serde(rename = "MessageResults")]
    pub message_results: ScoreBlock,
    #[serde(rename = "DataClassResults")]
    pub data_class_results: Vec<DataClassResult>,
    #[serde(rename = "InformationalResults")]
    pub informational_results: Vec<InformationalClassResult>,
    /// Failures caused by SAM-level errors, surfaced separately from the
    /// ordinary scoring failures they also count as.
    #[serde(rename = "EvaluationErrors")]
    pub evaluation_errors: Vec<EvaluationErrorResult>,
}

/// Scoring figures at the message or data-class level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBlock {
    #[serde(rename = "Denominator")]
    pub denominator: u64,
    #[serde(rename = "Numerator")]
    pub numerator: u64,
    #[serde(rename = "PIQIScore")]
    pub piqi_score: u64,
    #[serde(rename = "WeightedDenominator")]
    pub weighted_denominator: u64,
    #[serde(rename = "WeightedNumerator")]
    pub weighted_numerator: u64,
    #[serde(rename = "WeightedPIQIScore")]
    pub weighted_piqi_score: u64,
    #[serde(rename = "CriticalFailureCount")]
    pub critical_failure_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataClassResult {
    #[serde(rename = "DataClass")]
    pub data_class: String,
    #[serde(rename = "InstanceCount")]
    pub instance_count: u64,
    #[serde(flatten)]
    pub scores: ScoreBlock,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InformationalClassResult {
    #[serde(rename = "DataClass")]
    pub data_class: String,
    #[serde(rename = "Evaluations")]
    pub evaluations: Vec<InformationalEvaluation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationErrorResult {
    #[serde(rename = "EntityMnemonic")]
    pub entity_mnemonic: String,
    #[serde(rename = "Evaluation")]
    pub evaluation: String,
    #[serde(rename = "ErrorMessage")]
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InformationalEvaluation {
    #[serde(rename = "EntityName")]
    pub entity_name: String,
    #[serde(rename = "EvaluationName")]
    pub evaluation_name: String,
    #[serde(rename = "InstanceCount")]
    pub instance_count: u64,
    #[serde(rename = "Denominator")]
    pub denominator: u64,
    #[serde(rename = "Numerator")]
    pub numerator: u64,
}

/// Integer percentage, truncated toward zero; a zero denominator scores
/// zero.
fn truncated_percentage(numerator: u64, denominator: u64) -> u64 {
    if denominator == 0 {
        0
    } else {
        numerator * 100 / denominator
    }
}

/// Insert a space before each upper-case letter and upper-case the first
/// character: `labResults` and `LabResults` both read `Lab Results`.
fn prettify_name(raw: &str) -> String {
    let mut pretty = String::with_capacity(raw.len() + 4);
    for (position, character) in raw.chars().enumerate() {
        if position == 0 {
            pretty.extend(character.to_uppercase());
        } else if character.is_uppercase() {
            pretty.push(' ');
            pretty.push(character);
        } else {
            pretty.push(character);
        }
    }
    pretty
}

/// Deterministic transform from the aggregate state to the scorecard.
pub fn project(
    header: &MessageHeader,
    rubric: &EvaluationRubric,
    stats: &StatResponse,
    partial: bool,
    process_date: DateTime<Utc>,
) -> PiqiScorecard {
    let message_results = ScoreBlock {
        denominator: stats.scoring.processed,
        numerator: stats.scoring.passed,
        piqi_score: truncated_percentage(stats.scoring.passed, stats.scoring.processed),
        weighted_denominator: stats.weighted.processed,
        weighted_numerator: stats.weighted.passed,
        weighted_piqi_score: truncated_percentage(stats.weighted.passed, stats.weighted.processed),
        critical_failure_count: stats.critical_failure_count,
    };

    let mut data_class_results: Vec<DataClassResult> = stats
        .class_stats
        .values()
        .map(|class| DataClassResult {
            data_class: prettify_name(&class.name),
            instance_count: class.instance_count,
            scores: ScoreBlock {
                denominator: class.scoring.processed,
                numerator: class.scoring.passed,
                piqi_score: truncated_percentage(class.scoring.passed, class.scoring.processed),
                weighted_denominator: class.weighted.processed,
                weighted_numerator: class.weighted.passed,
                weighted_piqi_score: truncated_percentage(
                    class.weighted.passed,
                    class.weighted.processed,
                ),
                critical_failure_count: class.critical_failure_count,
            },
        })
        .collect();
    data_class_results.sort_by(|a, b| a.data_class.cmp(&b.data_class));

    let mut grouped: BTreeMap<String, Vec<InformationalEvaluation>> = BTreeMap::new();
    for stat in stats.informational_stats.values() {
        let class_name = stat
            .class_name
            .as_deref()
            .map(prettify_name)
            .unwrap_or_else(|| "Message".to_string());
        grouped
            .entry(class_name)
            .or_default()
            .push(InformationalEvaluation {
                entity_name: prettify_name(&stat.entity_name),
                evaluation_name: stat.evaluation_name.clone(),
                instance_count: stat.counts.total,
                denominator: stat.counts.processed,
                numerator: stat.counts.passed,
            });
    }
    let informational_results = grouped
        .into_iter()
        .map(|(data_class, mut evaluations)| {
            evaluations.sort_by(|a, b| {
                (a.entity_name.as_str(), a.evaluation_name.as_str())
                    .cmp(&(b.entity_name.as_str(), b.evaluation_name.as_str()))
            });
            InformationalClassResult {
                data_class,
                evaluations,
            }
        })
        .collect();

    let mut evaluation_errors: Vec<EvaluationErrorResult> = stats
        .sam_errors
        .iter()
        .map(|error| EvaluationErrorResult {
            entity_mnemonic: error.entity_mnemonic.clone(),
            evaluation: error.sam_mnemonic.clone(),
            error_message: error.message.clone(),
        })
        .collect();
    evaluation_errors.sort_by(|a, b| {
        (&a.entity_mnemonic, &a.evaluation, &a.error_message).cmp(&(
            &b.entity_mnemonic,
            &b.evaluation,
            &b.error_message,
        ))
    });

    PiqiScorecard {
        data_provider_id: header.data_provider_id.clone(),
        data_source_id: header.data_source_id.clone(),
        message_id: header.message_id.clone(),
        evaluation_rubric: rubric.display_name().to_string(),
        process_date,
        partial,
        message_results,
        data_class_results,
        informational_results,
        evaluation_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{ClassStat, TrackCounts};

    fn header() -> MessageHeader {
        MessageHeader {
            data_provider_id: "provider-1".to_string(),
            data_source_id: "source-1".to_string(),
            message_id: "message-1".to_string(),
        }
    }

    fn rubric() -> EvaluationRubric {
        EvaluationRubric {
            mnemonic: "CORE".to_string(),
            name: "Core Clinical Rubric".to_string(),
            criteria: Vec::new(),
        }
    }

    #[test]
    fn prettifies_names() {
        assert_eq!(prettify_name("labResults"), "Lab Results");
        assert_eq!(prettify_name("LabResults"), "Lab Results");
        assert_eq!(prettify_name("allergies"), "Allergies");
    }

    #[test]
    fn truncates_percentages_toward_zero() {
        assert_eq!(truncated_percentage(2, 3), 66);
        assert_eq!(truncated_percentage(1, 3), 33);
        assert_eq!(truncated_percentage(0, 0), 0);
        assert_eq!(truncated_percentage(3, 3), 100);
    }

    #[test]
    fn empty_class_projects_zero_score() {
        let mut stats = StatResponse::default();
        stats.class_stats.insert(
            "LABS".to_string(),
            ClassStat {
                name: "labResults".to_string(),
                instance_count: 0,
                scoring: TrackCounts::default(),
                weighted: TrackCounts::default(),
                critical_failure_count: 0,
            },
        );

        let scorecard = project(&header(), &rubric(), &stats, false, Utc::now());
        assert_eq!(scorecard.data_class_results.len(), 1);
        let class = &scorecard.data_class_results[0];
        assert_eq!(class.data_class, "Lab Results");
        assert_eq!(class.scores.piqi_score, 0);
        assert_eq!(class.scores.denominator, 0);
    }

    #[test]
    fn class_results_sort_by_prettified_name() {
        let mut stats = StatResponse::default();
        for (mnemonic, name) in [("ZED", "zedClass"), ("ALPHA", "alphaClass")] {
            stats.class_stats.insert(
                mnemonic.to_string(),
                ClassStat {
                    name: name.to_string(),
                    ..ClassStat::default()
                },
            );
        }

        let scorecard = project(&header(), &rubric(), &stats, false, Utc::now());
        let names: Vec<&str> = scorecard
            .data_class_results
            .iter()
            .map(|class| class.data_class.as_str())
            .collect();
        assert_eq!(names, vec!["Alpha Class", "Zed Class"]);
    }

    #[test]
    fn rubric_name_falls_back_to_mnemonic() {
        let rubric = EvaluationRubric {
            mnemonic: "CORE".to_string(),
            name: "  ".to_string(),
            criteria: Vec::new(),
        };
        let scorecard = project(&header(), &rubric, &StatResponse::default(), false, Utc::now());
        assert_eq!(scorecard.evaluation_rubric, "CORE");
    }
}
