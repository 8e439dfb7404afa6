//! The evaluation kernel: tree building, criterion planning, scheduling,
//! and the engine facade tying them to the aggregator and projector.

mod builder;
mod item;
mod planner;
mod scheduler;

#[cfg(test)]
mod tests;

pub use item::{
    EvalOutcome, EvaluationGraph, EvaluationItem, EvaluationResult, ItemHandle, ItemType, ResultId,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::message::{MessageError, MessageTree, PatientMessage};
use crate::refdata::{ReferenceDataError, ReferenceDataIndex};
use crate::sams::gateways::{KnowledgeGateway, TerminologyGateway};
use crate::sams::SamRegistry;
use crate::scorecard::{self, PiqiScorecard};
use crate::stats::{StatResponse, StatisticsAggregator};

/// Request-fatal evaluation failures. Everything else (collaborator and
/// SAM failures) is localized to a single result slot and never surfaces
/// here.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error(transparent)]
    ReferenceData(#[from] ReferenceDataError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error("invalid rubric: {0}")]
    InvalidRubric(String),
}

/// Cooperative cancellation signal handed in by the caller. Once raised,
/// pending slots finalize as skipped and the scorecard is marked partial.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Kernel tunables.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub collaborator_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            collaborator_timeout: Duration::from_secs(10),
        }
    }
}

/// Stateless evaluator applying one rubric to incoming patient messages.
///
/// The reference data and SAM registry are shared read-only across
/// requests; the message tree, evaluation graph, and aggregator live for
/// exactly one call.
pub struct EvaluationEngine {
    index: Arc<ReferenceDataIndex>,
    registry: Arc<SamRegistry>,
    terminology: Arc<dyn TerminologyGateway>,
    knowledge: Arc<dyn KnowledgeGateway>,
    settings: EngineSettings,
}

impl EvaluationEngine {
    pub fn new(
        index: Arc<ReferenceDataIndex>,
        terminology: Arc<dyn TerminologyGateway>,
        knowledge: Arc<dyn KnowledgeGateway>,
    ) -> Self {
        Self {
            index,
            registry: Arc::new(SamRegistry::standard()),
            terminology,
            knowledge,
            settings: EngineSettings::default(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<SamRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn index(&self) -> &ReferenceDataIndex {
        &self.index
    }

    /// Evaluate one message to a scorecard.
    pub async fn evaluate(
        &self,
        message: &PatientMessage,
    ) -> Result<PiqiScorecard, EvaluationError> {
        self.evaluate_with(message, &CancellationFlag::default())
            .await
    }

    /// Evaluate one message, honoring the caller's cancellation signal.
    pub async fn evaluate_with(
        &self,
        message: &PatientMessage,
        cancel: &CancellationFlag,
    ) -> Result<PiqiScorecard, EvaluationError> {
        let (stats, partial) = self.evaluate_stats(message, cancel).await?;
        Ok(scorecard::project(
            &message.header,
            self.index.rubric(),
            &stats,
            partial,
            Utc::now(),
        ))
    }

    /// Evaluate one message down to the raw aggregate state. The facade
    /// for callers that project their own scorecard shape.
    pub async fn evaluate_stats(
        &self,
        message: &PatientMessage,
        cancel: &CancellationFlag,
    ) -> Result<(StatResponse, bool), EvaluationError> {
        let tree = MessageTree::build(&self.index, message)?;
        let mut graph = builder::build_graph(&self.index, &tree);
        planner::plan_criteria(&mut graph, self.index.rubric())?;

        let mut aggregator = StatisticsAggregator::new();
        for (_, item) in graph.items() {
            match item.item_type {
                ItemType::Class => {
                    if let (Some(mnemonic), Some(name)) =
                        (item.class_mnemonic.as_deref(), item.class_name.as_deref())
                    {
                        aggregator.note_class(mnemonic, name);
                    }
                }
                ItemType::Element => {
                    if let (Some(mnemonic), Some(name)) =
                        (item.class_mnemonic.as_deref(), item.class_name.as_deref())
                    {
                        aggregator.note_element_instance(mnemonic, name);
                    }
                }
                ItemType::Root | ItemType::Attribute => {}
            }
        }

        let scheduler = scheduler::EvaluationScheduler::new(
            &mut graph,
            &self.registry,
            &self.index,
            self.terminology.as_ref(),
            self.knowledge.as_ref(),
            self.settings.collaborator_timeout,
            &mut aggregator,
            cancel,
        );
        let partial = scheduler.run().await;

        info!(
            message_id = %message.header.message_id,
            rubric = %self.index.rubric().display_name(),
            partial,
            "evaluation complete"
        );

        Ok((aggregator.into_response(), partial))
    }
}

#[cfg(test)]
pub(crate) use builder::build_graph;
#[cfg(test)]
pub(crate) use planner::plan_criteria;
#[cfg(test)]
pub(crate) use scheduler::EvaluationScheduler;
