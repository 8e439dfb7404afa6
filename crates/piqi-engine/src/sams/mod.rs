//! Scoring-and-Assessment Methods: the pluggable checks the scheduler
//! dispatches, and the registry resolving rubric mnemonics to handlers.

pub mod gateways;
mod knowledge;
mod structural;
mod terminology;

pub use knowledge::{LabDevicePlausible, LabResultPlausible, Plausibility};
pub use structural::{AttributePopulated, ElementIsClean};
pub use terminology::{CodeSystemRecognized, ReferenceDisplayPopulated, ValueSetMembership};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::evaluation::{EvaluationGraph, EvaluationItem, ItemHandle};
use crate::refdata::{ReferenceDataIndex, SamParameter};
use gateways::{GatewayError, KnowledgeGateway, TerminologyGateway};

/// Terminal state reported by a SAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamState {
    Succeeded,
    Failed,
    Skipped,
    Errored,
}

/// What a SAM returns to the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct SamResponse {
    pub state: SamState,
    pub fail_reason: Option<String>,
    pub skip_reason: Option<String>,
    pub error_message: Option<String>,
}

impl SamResponse {
    pub fn pass() -> Self {
        Self {
            state: SamState::Succeeded,
            fail_reason: None,
            skip_reason: None,
            error_message: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            state: SamState::Failed,
            fail_reason: Some(reason.into()),
            skip_reason: None,
            error_message: None,
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            state: SamState::Skipped,
            fail_reason: None,
            skip_reason: Some(reason.into()),
            error_message: None,
        }
    }

    pub fn errored(message: impl Into<String>) -> Self {
        Self {
            state: SamState::Errored,
            fail_reason: None,
            skip_reason: None,
            error_message: Some(message.into()),
        }
    }
}

/// Failure inside a SAM. The scheduler translates this to an ERRORED
/// response; it never escapes the slot being finalized.
#[derive(Debug, thiserror::Error)]
pub enum SamError {
    #[error(transparent)]
    Collaborator(#[from] GatewayError),
    #[error("collaborator returned unexpected status {status}")]
    UnexpectedStatus { status: u16 },
    #[error("{0}")]
    Internal(String),
}

/// Everything a SAM may consult: the item under evaluation, the finalized
/// subtree below it, reference data, and the collaborator capabilities.
pub struct SamContext<'a> {
    pub graph: &'a EvaluationGraph,
    pub item: ItemHandle,
    pub index: &'a ReferenceDataIndex,
    pub terminology: &'a dyn TerminologyGateway,
    pub knowledge: &'a dyn KnowledgeGateway,
    pub collaborator_timeout: Duration,
}

impl SamContext<'_> {
    pub fn item(&self) -> &EvaluationItem {
        self.graph.item(self.item)
    }

    pub fn message_text(&self) -> Option<&Value> {
        self.item().message_text.as_ref()
    }

    /// Message payload of the evaluation root, for SAMs that need
    /// patient-level fields such as the date of birth.
    pub fn root_message_text(&self) -> Option<&Value> {
        self.graph.item(self.graph.root()).message_text.as_ref()
    }
}

/// Look up a named SAM parameter.
pub fn param<'a>(parameters: &'a [SamParameter], name: &str) -> Option<&'a str> {
    parameters
        .iter()
        .find(|parameter| parameter.name == name)
        .map(|parameter| parameter.value.as_str())
}

pub fn param_or<'a>(parameters: &'a [SamParameter], name: &str, default: &'a str) -> &'a str {
    param(parameters, name).unwrap_or(default)
}

/// A Scoring-and-Assessment Method.
///
/// Implementations are pure with respect to scheduling policy: the
/// conditional/dependent resolution lives in the scheduler, never here.
#[async_trait]
pub trait Sam: Send + Sync {
    fn mnemonic(&self) -> &str;

    async fn evaluate(
        &self,
        ctx: &SamContext<'_>,
        parameters: &[SamParameter],
    ) -> Result<SamResponse, SamError>;
}

/// Registry resolving rubric SAM mnemonics to implementations.
#[derive(Default)]
pub struct SamRegistry {
    handlers: BTreeMap<String, Arc<dyn Sam>>,
}

impl SamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in SAMs.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ElementIsClean));
        registry.register(Arc::new(AttributePopulated));
        registry.register(Arc::new(CodeSystemRecognized));
        registry.register(Arc::new(ReferenceDisplayPopulated));
        registry.register(Arc::new(ValueSetMembership));
        registry.register(Arc::new(LabResultPlausible));
        registry.register(Arc::new(LabDevicePlausible));
        registry
    }

    pub fn register(&mut self, sam: Arc<dyn Sam>) {
        self.handlers.insert(sam.mnemonic().to_string(), sam);
    }

    pub fn resolve(&self, mnemonic: &str) -> Option<&Arc<dyn Sam>> {
        self.handlers.get(mnemonic)
    }

    pub fn mnemonics(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}
