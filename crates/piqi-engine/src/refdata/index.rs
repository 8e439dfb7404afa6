use std::collections::BTreeMap;
use std::sync::Arc;

use super::model::{
    CodeSystem, Entity, EntityType, EvaluationRubric, ReferenceDataBundle, SamDescriptor, ValueSet,
};
use super::ReferenceDataError;

/// Immutable lookup over one reference-data bundle.
///
/// Built once per bundle, then shared read-only across evaluations. Code
/// systems are addressable by mnemonic or canonical URI and both routes
/// resolve to the same instance, which interoperability checks rely on.
#[derive(Debug)]
pub struct ReferenceDataIndex {
    root: Arc<Entity>,
    entities: BTreeMap<String, Arc<Entity>>,
    code_systems: BTreeMap<String, Arc<CodeSystem>>,
    code_systems_by_uri: BTreeMap<String, Arc<CodeSystem>>,
    value_sets: BTreeMap<String, Arc<ValueSet>>,
    sam_descriptors: BTreeMap<String, Arc<SamDescriptor>>,
    rubric: Arc<EvaluationRubric>,
}

impl ReferenceDataIndex {
    /// Index a bundle, applying the rubric named by `rubric_mnemonic` (or
    /// the first profile when `None`). Fails with
    /// [`ReferenceDataError::Invalid`] on any structural defect; a failed
    /// bundle is never partially usable.
    pub fn new(
        bundle: &ReferenceDataBundle,
        rubric_mnemonic: Option<&str>,
    ) -> Result<Self, ReferenceDataError> {
        let root = bundle
            .model_library
            .first()
            .ok_or_else(|| ReferenceDataError::Invalid("model library is empty".to_string()))?;
        if root.entity_type != EntityType::Root {
            return Err(ReferenceDataError::Invalid(format!(
                "model root '{}' is not a Root entity",
                root.mnemonic
            )));
        }

        let mut entities = BTreeMap::new();
        collect_entities(root, &mut entities)?;

        for class in root.class_children() {
            if class.element_template().is_none() {
                return Err(ReferenceDataError::Invalid(format!(
                    "class '{}' has no element template",
                    class.mnemonic
                )));
            }
        }

        let mut code_systems = BTreeMap::new();
        let mut code_systems_by_uri = BTreeMap::new();
        for system in &bundle.code_system_library {
            let shared = Arc::new(system.clone());
            if code_systems
                .insert(system.mnemonic.clone(), shared.clone())
                .is_some()
            {
                return Err(ReferenceDataError::Invalid(format!(
                    "duplicate code system mnemonic '{}'",
                    system.mnemonic
                )));
            }
            code_systems_by_uri.insert(system.uri.clone(), shared);
        }

        let mut value_sets = BTreeMap::new();
        for value_set in &bundle.value_set_library {
            if value_sets
                .insert(value_set.mnemonic.clone(), Arc::new(value_set.clone()))
                .is_some()
            {
                return Err(ReferenceDataError::Invalid(format!(
                    "duplicate value set mnemonic '{}'",
                    value_set.mnemonic
                )));
            }
        }

        let mut sam_descriptors = BTreeMap::new();
        for descriptor in &bundle.sam_library {
            if sam_descriptors
                .insert(descriptor.mnemonic.clone(), Arc::new(descriptor.clone()))
                .is_some()
            {
                return Err(ReferenceDataError::Invalid(format!(
                    "duplicate SAM mnemonic '{}'",
                    descriptor.mnemonic
                )));
            }
        }

        let mut rubric = resolve_rubric(bundle, rubric_mnemonic)?;
        for criterion in &mut rubric.criteria {
            if !entities.contains_key(&criterion.entity_mnemonic) {
                return Err(ReferenceDataError::Invalid(format!(
                    "criterion '{}' targets unknown entity '{}'",
                    criterion.result_key(),
                    criterion.entity_mnemonic
                )));
            }
            // An explicit override wins; otherwise the descriptor supplies
            // the display name the scorecard reports.
            if criterion.sam_name_override.is_none() {
                if let Some(descriptor) = sam_descriptors.get(&criterion.sam_mnemonic) {
                    criterion.sam_name_override = Some(descriptor.name.clone());
                }
            }
        }

        Ok(Self {
            root: entities
                .get(&root.mnemonic)
                .cloned()
                .unwrap_or_else(|| Arc::new(root.clone())),
            entities,
            code_systems,
            code_systems_by_uri,
            value_sets,
            sam_descriptors,
            rubric: Arc::new(rubric),
        })
    }

    pub fn root_entity(&self) -> &Arc<Entity> {
        &self.root
    }

    pub fn entity(&self, mnemonic: &str) -> Option<&Arc<Entity>> {
        self.entities.get(mnemonic)
    }

    /// Resolve a code system by mnemonic or canonical URI. Equivalent
    /// inputs return the same instance.
    pub fn code_system(&self, key: &str) -> Option<&Arc<CodeSystem>> {
        self.code_systems
            .get(key)
            .or_else(|| self.code_systems_by_uri.get(key))
    }

    pub fn value_set(&self, mnemonic: &str) -> Option<&Arc<ValueSet>> {
        self.value_sets.get(mnemonic)
    }

    pub fn sam_descriptor(&self, mnemonic: &str) -> Option<&Arc<SamDescriptor>> {
        self.sam_descriptors.get(mnemonic)
    }

    pub fn rubric(&self) -> &EvaluationRubric {
        &self.rubric
    }
}

fn collect_entities(
    entity: &Entity,
    into: &mut BTreeMap<String, Arc<Entity>>,
) -> Result<(), ReferenceDataError> {
    if into
        .insert(entity.mnemonic.clone(), Arc::new(entity.clone()))
        .is_some()
    {
        return Err(ReferenceDataError::Invalid(format!(
            "duplicate entity mnemonic '{}'",
            entity.mnemonic
        )));
    }
    for child in &entity.children {
        collect_entities(child, into)?;
    }
    Ok(())
}

fn resolve_rubric(
    bundle: &ReferenceDataBundle,
    rubric_mnemonic: Option<&str>,
) -> Result<EvaluationRubric, ReferenceDataError> {
    let profile = match rubric_mnemonic {
        Some(mnemonic) => bundle
            .evaluation_profile_library
            .iter()
            .find(|profile| profile.mnemonic == mnemonic)
            .ok_or_else(|| {
                ReferenceDataError::Invalid(format!("no evaluation profile '{mnemonic}'"))
            })?,
        None => bundle.evaluation_profile_library.first().ok_or_else(|| {
            ReferenceDataError::Invalid("evaluation profile library is empty".to_string())
        })?,
    };

    // A profile that still points at a file after loading, or that names
    // neither criteria nor a file, is unresolved and refuses evaluation.
    let criteria = profile.evaluation_criteria.clone().ok_or_else(|| {
        ReferenceDataError::Invalid(format!(
            "evaluation profile '{}' is unresolved",
            profile.mnemonic
        ))
    })?;

    Ok(EvaluationRubric {
        mnemonic: profile.mnemonic.clone(),
        name: profile.name.clone(),
        criteria,
    })
}
