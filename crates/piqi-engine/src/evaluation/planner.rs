use std::collections::BTreeMap;
use std::sync::Arc;

use crate::refdata::{CriterionRef, EvaluationCriterion, EvaluationRubric};

use super::item::{EvaluationGraph, EvaluationResult, EvalOutcome, ItemHandle};
use super::EvaluationError;

/// Expand the rubric into result slots on every matching evaluation item.
///
/// A criterion targeting entity X contributes one primary slot to each
/// item whose entity mnemonic is X. Conditional and dependent references
/// materialize as extra shadow slots so they are executed on the item but
/// excluded from aggregation. The conditional/dependent graph is rejected
/// up front when cyclic.
pub(crate) fn plan_criteria(
    graph: &mut EvaluationGraph,
    rubric: &EvaluationRubric,
) -> Result<(), EvaluationError> {
    reject_cycles(rubric)?;

    let shared: Vec<Arc<EvaluationCriterion>> = rubric
        .criteria
        .iter()
        .cloned()
        .map(Arc::new)
        .collect();

    let handles: Vec<ItemHandle> = graph.handles().collect();
    for handle in handles {
        let entity_mnemonic = graph.item(handle).entity.mnemonic.clone();

        for criterion in shared
            .iter()
            .filter(|criterion| criterion.entity_mnemonic == entity_mnemonic)
        {
            let key = criterion.result_key();
            if graph.item(handle).criteria_results.contains_key(&key) {
                continue;
            }
            let id = graph.push_result(EvaluationResult {
                item: handle,
                criterion: criterion.clone(),
                is_conditional: false,
                is_dependent: false,
                outcome: EvalOutcome::Pending,
                eval_performed: false,
            });
            let item = graph.item_mut(handle);
            item.criteria_results.insert(key.clone(), id);
            item.full_results.insert(key, id);
        }

        // Chase conditional/dependent references until every slot the
        // scheduler will resolve exists on the item. Acyclic by the check
        // above, so this terminates.
        let mut changed = true;
        while changed {
            changed = false;
            let pending: Vec<(CriterionRef, bool)> = graph
                .item(handle)
                .full_results
                .values()
                .flat_map(|id| {
                    let criterion = &graph.result(*id).criterion;
                    let conditional = criterion
                        .conditional_on
                        .clone()
                        .map(|reference| (reference, true));
                    let dependent = criterion
                        .dependent_on
                        .clone()
                        .map(|reference| (reference, false));
                    conditional.into_iter().chain(dependent)
                })
                .collect();

            for (reference, is_conditional) in pending {
                let key = format!("{}.{}", reference.sam_mnemonic, reference.sequence);
                if graph.item(handle).full_results.contains_key(&key) {
                    continue;
                }
                let referenced = rubric.find(&reference).ok_or_else(|| {
                    EvaluationError::InvalidRubric(format!(
                        "criterion references unknown criterion '{}.{}'",
                        reference.sam_mnemonic, reference.sequence
                    ))
                })?;
                let id = graph.push_result(EvaluationResult {
                    item: handle,
                    criterion: Arc::new(referenced.clone()),
                    is_conditional,
                    is_dependent: !is_conditional,
                    outcome: EvalOutcome::Pending,
                    eval_performed: false,
                });
                graph.item_mut(handle).full_results.insert(key, id);
                changed = true;
            }
        }
    }

    Ok(())
}

/// Static DFS over the conditional/dependent reference graph.
fn reject_cycles(rubric: &EvaluationRubric) -> Result<(), EvaluationError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    let mut marks: BTreeMap<(String, u32), Mark> = BTreeMap::new();

    fn visit(
        rubric: &EvaluationRubric,
        criterion: &EvaluationCriterion,
        marks: &mut BTreeMap<(String, u32), Mark>,
    ) -> Result<(), EvaluationError> {
        let node = (criterion.sam_mnemonic.clone(), criterion.sequence);
        match marks.get(&node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                return Err(EvaluationError::InvalidRubric(format!(
                    "cyclic conditional/dependent chain through '{}.{}'",
                    criterion.sam_mnemonic, criterion.sequence
                )))
            }
            None => {}
        }
        marks.insert(node.clone(), Mark::Visiting);

        let references = criterion
            .conditional_on
            .iter()
            .chain(criterion.dependent_on.iter());
        for reference in references {
            let referenced = rubric.find(reference).ok_or_else(|| {
                EvaluationError::InvalidRubric(format!(
                    "criterion '{}.{}' references unknown criterion '{}.{}'",
                    criterion.sam_mnemonic,
                    criterion.sequence,
                    reference.sam_mnemonic,
                    reference.sequence
                ))
            })?;
            visit(rubric, referenced, marks)?;
        }

        marks.insert(node, Mark::Done);
        Ok(())
    }

    for criterion in &rubric.criteria {
        visit(rubric, criterion, &mut marks)?;
    }
    Ok(())
}
