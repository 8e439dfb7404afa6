//! Reference-data model, frozen lookup index, and disk loader.
//!
//! Reference data is created at load time and never mutated afterwards;
//! every lookup during an evaluation goes through [`ReferenceDataIndex`].

mod index;
mod loader;
mod model;

pub use index::ReferenceDataIndex;
pub use loader::load_bundle;
pub use model::{
    Coding, CodeSystem, CriterionRef, Entity, EntityType, EvaluationCriterion, EvaluationRubric,
    ReferenceDataBundle, ReferenceDataProfile, SamDescriptor, SamParameter, ScoringEffect,
    ValueSet,
};

/// Error raised while loading or indexing reference data. Always fatal to
/// the request: the engine refuses to evaluate against malformed data.
#[derive(Debug, thiserror::Error)]
pub enum ReferenceDataError {
    #[error("reference data is invalid: {0}")]
    Invalid(String),
    #[error("unable to read reference data: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to parse reference data: {0}")]
    Parse(#[from] serde_json::Error),
}
