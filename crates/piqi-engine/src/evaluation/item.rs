use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::refdata::{Entity, EntityType, EvaluationCriterion, ScoringEffect};

/// Handle into the item arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemHandle(pub(crate) usize);

/// Handle into the result arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResultId(pub(crate) usize);

/// Evaluation item kind, clamped to the four model levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Root,
    Class,
    Element,
    Attribute,
}

impl From<EntityType> for ItemType {
    fn from(value: EntityType) -> Self {
        match value {
            EntityType::Root => ItemType::Root,
            EntityType::Class => ItemType::Class,
            EntityType::Element => ItemType::Element,
            EntityType::Attribute => ItemType::Attribute,
        }
    }
}

/// Final state of one result slot. Skip and fail carry their cause: the
/// mnemonic of the SAM whose outcome produced this one.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutcome {
    Pending,
    Passed,
    Skipped {
        skip_sam: Option<String>,
        reason: Option<String>,
    },
    Failed {
        fail_sam: Option<String>,
        reason: Option<String>,
        custom_error: Option<String>,
    },
}

impl EvalOutcome {
    pub fn is_final(&self) -> bool {
        !matches!(self, EvalOutcome::Pending)
    }

    pub fn passed(&self) -> bool {
        matches!(self, EvalOutcome::Passed)
    }

    pub fn failed(&self) -> bool {
        matches!(self, EvalOutcome::Failed { .. })
    }

    pub fn skipped(&self) -> bool {
        matches!(self, EvalOutcome::Skipped { .. })
    }
}

/// One instance of (item, criterion, SAM).
///
/// Once the outcome leaves `Pending` the slot is immutable; the scheduler
/// enforces this by finalizing each slot exactly once.
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub item: ItemHandle,
    pub criterion: Arc<EvaluationCriterion>,
    pub is_conditional: bool,
    pub is_dependent: bool,
    pub outcome: EvalOutcome,
    /// True iff a SAM actually executed for this slot.
    pub eval_performed: bool,
}

impl EvaluationResult {
    pub fn sam_mnemonic(&self) -> &str {
        &self.criterion.sam_mnemonic
    }

    pub fn is_scoring(&self) -> bool {
        self.criterion.scoring_effect == ScoringEffect::Scoring
    }

    pub fn is_critical(&self) -> bool {
        self.criterion.criticality_indicator
    }

    /// Excluded from every aggregate counter.
    pub fn is_shadow(&self) -> bool {
        self.is_conditional || self.is_dependent
    }

    pub fn result_key(&self) -> String {
        self.criterion.result_key()
    }
}

/// The zip of an entity with its corresponding message item. The message
/// item may be absent; absence-sensitive SAMs still run.
#[derive(Debug, Clone)]
pub struct EvaluationItem {
    pub key: String,
    pub entity: Arc<Entity>,
    pub item_type: ItemType,
    pub root_mnemonic: String,
    pub class_mnemonic: Option<String>,
    pub class_name: Option<String>,
    pub element_mnemonic: Option<String>,
    pub element_sequence: Option<u32>,
    /// Raw JSON payload of the matching message node, when present.
    pub message_text: Option<Value>,
    pub parent: Option<ItemHandle>,
    pub children: Vec<ItemHandle>,
    /// Primary result slots, keyed `samMnemonic.criterionSequence`.
    pub criteria_results: BTreeMap<String, ResultId>,
    /// Primary slots plus conditional/dependent shadow slots.
    pub full_results: BTreeMap<String, ResultId>,
}

impl EvaluationItem {
    pub fn has_message(&self) -> bool {
        self.message_text.is_some()
    }
}

/// Arena of evaluation items and result slots for one request.
///
/// Parent/child and conditional/dependent cross-edges are integer
/// handles, never owning references.
#[derive(Debug, Clone)]
pub struct EvaluationGraph {
    items: Vec<EvaluationItem>,
    results: Vec<EvaluationResult>,
    root: ItemHandle,
}

impl EvaluationGraph {
    pub(crate) fn new(root_item: EvaluationItem) -> Self {
        Self {
            items: vec![root_item],
            results: Vec::new(),
            root: ItemHandle(0),
        }
    }

    pub fn root(&self) -> ItemHandle {
        self.root
    }

    pub fn item(&self, handle: ItemHandle) -> &EvaluationItem {
        &self.items[handle.0]
    }

    pub(crate) fn item_mut(&mut self, handle: ItemHandle) -> &mut EvaluationItem {
        &mut self.items[handle.0]
    }

    pub fn result(&self, id: ResultId) -> &EvaluationResult {
        &self.results[id.0]
    }

    pub(crate) fn result_mut(&mut self, id: ResultId) -> &mut EvaluationResult {
        &mut self.results[id.0]
    }

    pub fn handles(&self) -> impl Iterator<Item = ItemHandle> {
        (0..self.items.len()).map(ItemHandle)
    }

    pub fn items(&self) -> impl Iterator<Item = (ItemHandle, &EvaluationItem)> {
        self.items
            .iter()
            .enumerate()
            .map(|(index, item)| (ItemHandle(index), item))
    }

    pub fn results(&self) -> impl Iterator<Item = &EvaluationResult> {
        self.results.iter()
    }

    pub(crate) fn push_child(&mut self, parent: ItemHandle, mut item: EvaluationItem) -> ItemHandle {
        item.parent = Some(parent);
        let handle = ItemHandle(self.items.len());
        self.items.push(item);
        self.items[parent.0].children.push(handle);
        handle
    }

    pub(crate) fn push_result(&mut self, result: EvaluationResult) -> ResultId {
        let id = ResultId(self.results.len());
        self.results.push(result);
        id
    }

    /// Primary results of an item's direct children, in child order. The
    /// clean-element SAM inspects exactly this window.
    pub fn child_results(&self, handle: ItemHandle) -> Vec<&EvaluationResult> {
        self.item(handle)
            .children
            .iter()
            .flat_map(|child| self.item(*child).criteria_results.values())
            .map(|id| self.result(*id))
            .collect()
    }
}
