use std::time::Duration;

use tracing::{debug, warn};

use crate::refdata::ReferenceDataIndex;
use crate::sams::gateways::{KnowledgeGateway, TerminologyGateway};
use crate::sams::{SamContext, SamRegistry, SamResponse, SamState};
use crate::stats::StatisticsAggregator;

use super::item::{EvalOutcome, EvaluationGraph, ItemHandle, ResultId};
use super::CancellationFlag;

/// Drives one evaluation: walks the tree post-order, finalizes every
/// result slot, and feeds primary outcomes to the aggregator.
///
/// SAM errors are local to their slot; the traversal never aborts. The
/// only early exit is cancellation, which finalizes the remaining slots
/// as skipped outside the scoring universe.
pub(crate) struct EvaluationScheduler<'a> {
    graph: &'a mut EvaluationGraph,
    registry: &'a SamRegistry,
    index: &'a ReferenceDataIndex,
    terminology: &'a dyn TerminologyGateway,
    knowledge: &'a dyn KnowledgeGateway,
    collaborator_timeout: Duration,
    aggregator: &'a mut StatisticsAggregator,
    cancel: &'a CancellationFlag,
    cancelled: bool,
}

impl<'a> EvaluationScheduler<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        graph: &'a mut EvaluationGraph,
        registry: &'a SamRegistry,
        index: &'a ReferenceDataIndex,
        terminology: &'a dyn TerminologyGateway,
        knowledge: &'a dyn KnowledgeGateway,
        collaborator_timeout: Duration,
        aggregator: &'a mut StatisticsAggregator,
        cancel: &'a CancellationFlag,
    ) -> Self {
        Self {
            graph,
            registry,
            index,
            terminology,
            knowledge,
            collaborator_timeout,
            aggregator,
            cancel,
            cancelled: false,
        }
    }

    /// Evaluate the whole tree. Returns true when the run was cut short
    /// by cancellation and the scorecard must be marked partial.
    pub(crate) async fn run(mut self) -> bool {
        let root = self.graph.root();
        self.visit(root).await;
        self.cancelled
    }

    /// Post-order: children finalize before their parent's SAMs execute,
    /// so structural SAMs observe a fully finalized subtree.
    async fn visit(&mut self, handle: ItemHandle) {
        let children = self.graph.item(handle).children.clone();
        for child in children {
            Box::pin(self.visit(child)).await;
        }

        let mut slots: Vec<(String, u32, ResultId)> = self
            .graph
            .item(handle)
            .full_results
            .values()
            .map(|id| {
                let criterion = &self.graph.result(*id).criterion;
                (criterion.sam_mnemonic.clone(), criterion.sequence, *id)
            })
            .collect();
        slots.sort();

        for (_, _, id) in slots {
            Box::pin(self.finalize(id)).await;
        }
    }

    /// Finalize one slot: resolve its conditional and dependent
    /// references first, then dispatch the SAM. Idempotent; a slot whose
    /// outcome already left Pending is never touched again.
    async fn finalize(&mut self, id: ResultId) {
        if self.graph.result(id).outcome.is_final() {
            return;
        }

        if self.cancel.is_cancelled() {
            self.cancelled = true;
            let result = self.graph.result_mut(id);
            result.outcome = EvalOutcome::Skipped {
                skip_sam: None,
                reason: Some("cancelled".to_string()),
            };
            result.eval_performed = false;
            // Outside the scoring universe: cancelled slots are not fed
            // to the aggregator.
            return;
        }

        let criterion = self.graph.result(id).criterion.clone();
        let item = self.graph.result(id).item;

        if let Some(reference) = &criterion.conditional_on {
            let key = format!("{}.{}", reference.sam_mnemonic, reference.sequence);
            if let Some(conditional_id) = self.graph.item(item).full_results.get(&key).copied() {
                Box::pin(self.finalize(conditional_id)).await;
                if !self.graph.result(conditional_id).outcome.passed() {
                    let result = self.graph.result_mut(id);
                    result.outcome = EvalOutcome::Skipped {
                        skip_sam: Some(reference.sam_mnemonic.clone()),
                        reason: Some("conditional not met".to_string()),
                    };
                    result.eval_performed = false;
                    self.record(id);
                    return;
                }
            }
        }

        if let Some(reference) = &criterion.dependent_on {
            let key = format!("{}.{}", reference.sam_mnemonic, reference.sequence);
            if let Some(dependent_id) = self.graph.item(item).full_results.get(&key).copied() {
                Box::pin(self.finalize(dependent_id)).await;
                match self.graph.result(dependent_id).outcome.clone() {
                    EvalOutcome::Skipped { .. } => {
                        let result = self.graph.result_mut(id);
                        result.outcome = EvalOutcome::Skipped {
                            skip_sam: Some(reference.sam_mnemonic.clone()),
                            reason: Some("dependent criterion was skipped".to_string()),
                        };
                        result.eval_performed = false;
                        self.record(id);
                        return;
                    }
                    EvalOutcome::Failed { .. } => {
                        let result = self.graph.result_mut(id);
                        result.outcome = EvalOutcome::Failed {
                            fail_sam: Some(reference.sam_mnemonic.clone()),
                            reason: Some("dependent criterion failed".to_string()),
                            custom_error: None,
                        };
                        result.eval_performed = false;
                        self.record(id);
                        return;
                    }
                    EvalOutcome::Passed | EvalOutcome::Pending => {}
                }
            }
        }

        let response = match self.registry.resolve(&criterion.sam_mnemonic) {
            Some(sam) => {
                let ctx = SamContext {
                    graph: &*self.graph,
                    item,
                    index: self.index,
                    terminology: self.terminology,
                    knowledge: self.knowledge,
                    collaborator_timeout: self.collaborator_timeout,
                };
                match sam.evaluate(&ctx, &criterion.parameters).await {
                    Ok(response) => response,
                    Err(error) => SamResponse::errored(error.to_string()),
                }
            }
            None => SamResponse::errored(format!(
                "no SAM registered for '{}'",
                criterion.sam_mnemonic
            )),
        };

        let sam = criterion.sam_mnemonic.clone();
        let result = self.graph.result_mut(id);
        result.eval_performed = true;
        result.outcome = match response.state {
            SamState::Succeeded => EvalOutcome::Passed,
            SamState::Failed => EvalOutcome::Failed {
                fail_sam: Some(sam.clone()),
                reason: response.fail_reason,
                custom_error: None,
            },
            SamState::Skipped => EvalOutcome::Skipped {
                skip_sam: Some(sam.clone()),
                reason: response.skip_reason,
            },
            SamState::Errored => {
                warn!(sam = %sam, error = ?response.error_message, "SAM errored");
                EvalOutcome::Failed {
                    fail_sam: Some(sam.clone()),
                    reason: None,
                    custom_error: response.error_message,
                }
            }
        };

        self.record(id);
    }

    fn record(&mut self, id: ResultId) {
        let result = self.graph.result(id);
        if result.is_shadow() {
            return;
        }
        let item = self.graph.item(result.item);
        debug!(
            key = %item.key,
            sam = %result.sam_mnemonic(),
            outcome = ?result.outcome,
            "criterion finalized"
        );
        self.aggregator.record(result, item);
    }
}
