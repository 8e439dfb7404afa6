use std::fs;
use std::path::Path;

use serde::Deserialize;

use super::model::{EvaluationCriterion, ReferenceDataBundle};
use super::ReferenceDataError;

/// Criteria file referenced by a profile's `filePath`. Accepts either a
/// bare criteria array or an object wrapping one.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CriteriaDocument {
    Wrapped {
        #[serde(rename = "EvaluationCriteria")]
        evaluation_criteria: Vec<EvaluationCriterion>,
    },
    Bare(Vec<EvaluationCriterion>),
}

impl CriteriaDocument {
    fn into_criteria(self) -> Vec<EvaluationCriterion> {
        match self {
            CriteriaDocument::Wrapped {
                evaluation_criteria,
            } => evaluation_criteria,
            CriteriaDocument::Bare(criteria) => criteria,
        }
    }
}

/// Load the bundle document from disk and resolve every profile's
/// `filePath` indirection relative to the bundle's directory.
pub fn load_bundle(path: &Path) -> Result<ReferenceDataBundle, ReferenceDataError> {
    let raw = fs::read_to_string(path)?;
    let mut bundle: ReferenceDataBundle = serde_json::from_str(&raw)?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    for profile in &mut bundle.evaluation_profile_library {
        if profile.evaluation_criteria.is_some() {
            continue;
        }
        let Some(file_path) = profile.file_path.as_deref() else {
            // Left unresolved; the index surfaces InvalidReferenceData
            // before any evaluation begins.
            continue;
        };
        let criteria_path = base_dir.join(file_path);
        let raw = fs::read_to_string(&criteria_path).map_err(|err| {
            ReferenceDataError::Invalid(format!(
                "evaluation profile '{}' references unreadable file '{}': {}",
                profile.mnemonic,
                criteria_path.display(),
                err
            ))
        })?;
        let document: CriteriaDocument = serde_json::from_str(&raw)?;
        profile.evaluation_criteria = Some(document.into_criteria());
    }

    Ok(bundle)
}
