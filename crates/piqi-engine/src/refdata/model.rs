use serde::{Deserialize, Serialize};

/// Kinds of node in the declarative entity model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityType {
    Root,
    Class,
    Element,
    Attribute,
}

/// A node in the entity model.
///
/// Element entities are templates: a concrete message may carry 0..N
/// instances of each, numbered by a 1-based element sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub mnemonic: String,
    pub name: String,
    pub field_name: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub children: Vec<Entity>,
}

impl Entity {
    /// The element template of a class entity.
    pub fn element_template(&self) -> Option<&Entity> {
        self.children
            .iter()
            .find(|child| child.entity_type == EntityType::Element)
    }

    pub fn class_children(&self) -> impl Iterator<Item = &Entity> {
        self.children
            .iter()
            .filter(|child| child.entity_type == EntityType::Class)
    }

    pub fn attribute_children(&self) -> impl Iterator<Item = &Entity> {
        self.children
            .iter()
            .filter(|child| child.entity_type == EntityType::Attribute)
    }
}

/// A code system known to the reference data, addressable by mnemonic or
/// by canonical URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSystem {
    pub mnemonic: String,
    pub name: String,
    pub uri: String,
}

/// A single coded value, shared between value-set expansions and message
/// payload parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coding {
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub display: Option<String>,
}

/// A value set with its pre-expanded codings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSet {
    pub mnemonic: String,
    pub name: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub codings: Vec<Coding>,
}

/// Descriptor of a Scoring-and-Assessment Method known to the rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamDescriptor {
    pub mnemonic: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Whether a criterion contributes to the PIQI score or is reported only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoringEffect {
    Scoring,
    Informational,
}

/// Names another criterion of the same rubric by `(samMnemonic, sequence)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionRef {
    pub sam_mnemonic: String,
    pub sequence: u32,
}

/// A named parameter handed to a SAM at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamParameter {
    pub name: String,
    pub value: String,
}

/// Declarative binding of one SAM to one entity in the rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationCriterion {
    pub sequence: u32,
    pub sam_mnemonic: String,
    pub entity_mnemonic: String,
    pub scoring_effect: ScoringEffect,
    pub scoring_weight: u32,
    pub criticality_indicator: bool,
    #[serde(default)]
    pub sam_name_override: Option<String>,
    #[serde(default)]
    pub parameters: Vec<SamParameter>,
    /// Must pass for this criterion to run.
    #[serde(default)]
    pub conditional_on: Option<CriterionRef>,
    /// This criterion inherits the referenced criterion's skip/fail outcome.
    #[serde(default)]
    pub dependent_on: Option<CriterionRef>,
}

impl EvaluationCriterion {
    pub fn is_scoring(&self) -> bool {
        self.scoring_effect == ScoringEffect::Scoring
    }

    /// Key of this criterion's result slot on an evaluation item.
    pub fn result_key(&self) -> String {
        format!("{}.{}", self.sam_mnemonic, self.sequence)
    }

    pub fn criterion_ref(&self) -> CriterionRef {
        CriterionRef {
            sam_mnemonic: self.sam_mnemonic.clone(),
            sequence: self.sequence,
        }
    }
}

/// One entry of the `EvaluationProfileLibrary`. Criteria may be inline or
/// resolved from a sibling file named by `filePath`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDataProfile {
    #[serde(rename = "mnemonic")]
    pub mnemonic: String,
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "filePath", default)]
    pub file_path: Option<String>,
    #[serde(rename = "EvaluationCriteria", default)]
    pub evaluation_criteria: Option<Vec<EvaluationCriterion>>,
}

/// A resolved rubric: the criteria bundle the planner expands per item.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRubric {
    pub mnemonic: String,
    pub name: String,
    pub criteria: Vec<EvaluationCriterion>,
}

impl EvaluationRubric {
    /// Display name, falling back to the mnemonic when the profile carries
    /// no human-readable name.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.mnemonic
        } else {
            &self.name
        }
    }

    pub fn find(&self, reference: &CriterionRef) -> Option<&EvaluationCriterion> {
        self.criteria.iter().find(|criterion| {
            criterion.sam_mnemonic == reference.sam_mnemonic
                && criterion.sequence == reference.sequence
        })
    }
}

/// The reference-data bundle document as stored on disk or in a registry.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceDataBundle {
    #[serde(rename = "ModelLibrary")]
    pub model_library: Vec<Entity>,
    #[serde(rename = "EvaluationProfileLibrary")]
    pub evaluation_profile_library: Vec<ReferenceDataProfile>,
    #[serde(rename = "ValueSetLibrary", default)]
    pub value_set_library: Vec<ValueSet>,
    #[serde(rename = "CodeSystemLibrary", default)]
    pub code_system_library: Vec<CodeSystem>,
    #[serde(rename = "SamLibrary", default)]
    pub sam_library: Vec<SamDescriptor>,
}
