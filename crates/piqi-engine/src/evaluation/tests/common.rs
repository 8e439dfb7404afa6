use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::evaluation::{
    build_graph, plan_criteria, CancellationFlag, EvaluationGraph, EvaluationScheduler,
};
use crate::message::{MessageHeader, MessageTree, PatientMessage};
use crate::refdata::{
    CodeSystem, CriterionRef, Entity, EntityType, EvaluationCriterion, ReferenceDataBundle,
    ReferenceDataIndex, ReferenceDataProfile, SamDescriptor, SamParameter, ScoringEffect,
};
use crate::sams::gateways::{
    GatewayError, GatewayResponse, KnowledgeGateway, LabDeviceQuery, LabResultQuery,
    TerminologyGateway,
};
use crate::sams::{Sam, SamContext, SamError, SamRegistry, SamResponse};
use crate::stats::{StatResponse, StatisticsAggregator};

pub(super) fn entity(
    mnemonic: &str,
    name: &str,
    field: &str,
    entity_type: EntityType,
    children: Vec<Entity>,
) -> Entity {
    Entity {
        mnemonic: mnemonic.to_string(),
        name: name.to_string(),
        field_name: field.to_string(),
        entity_type,
        children,
    }
}

pub(super) fn patient_model() -> Entity {
    let lab_result = entity(
        "LAB_RESULT",
        "LabResult",
        "labResult",
        EntityType::Element,
        vec![
            entity("LAB_CODE", "TestCode", "testCode", EntityType::Attribute, Vec::new()),
            entity(
                "LAB_VALUE",
                "ResultValue",
                "resultValue",
                EntityType::Attribute,
                Vec::new(),
            ),
            entity("LAB_UNIT", "Unit", "unit", EntityType::Attribute, Vec::new()),
        ],
    );
    let labs = entity(
        "LABS",
        "labResults",
        "labResults",
        EntityType::Class,
        vec![lab_result],
    );

    let allergy = entity(
        "ALLERGY",
        "Allergy",
        "allergy",
        EntityType::Element,
        vec![
            entity("ALLERGY_CODE", "Code", "code", EntityType::Attribute, Vec::new()),
            entity(
                "ALLERGY_STATUS",
                "Status",
                "status",
                EntityType::Attribute,
                Vec::new(),
            ),
        ],
    );
    let allergies = entity(
        "ALLERGIES",
        "allergies",
        "allergies",
        EntityType::Class,
        vec![allergy],
    );

    entity(
        "PATIENT",
        "Patient",
        "patient",
        EntityType::Root,
        vec![labs, allergies],
    )
}

pub(super) fn criterion(
    sam: &str,
    entity_mnemonic: &str,
    sequence: u32,
    effect: ScoringEffect,
    weight: u32,
    critical: bool,
) -> EvaluationCriterion {
    EvaluationCriterion {
        sequence,
        sam_mnemonic: sam.to_string(),
        entity_mnemonic: entity_mnemonic.to_string(),
        scoring_effect: effect,
        scoring_weight: weight,
        criticality_indicator: critical,
        sam_name_override: None,
        parameters: Vec::new(),
        conditional_on: None,
        dependent_on: None,
    }
}

pub(super) fn conditional_on(
    mut criterion: EvaluationCriterion,
    sam: &str,
    sequence: u32,
) -> EvaluationCriterion {
    criterion.conditional_on = Some(CriterionRef {
        sam_mnemonic: sam.to_string(),
        sequence,
    });
    criterion
}

pub(super) fn dependent_on(
    mut criterion: EvaluationCriterion,
    sam: &str,
    sequence: u32,
) -> EvaluationCriterion {
    criterion.dependent_on = Some(CriterionRef {
        sam_mnemonic: sam.to_string(),
        sequence,
    });
    criterion
}

pub(super) fn with_parameter(
    mut criterion: EvaluationCriterion,
    name: &str,
    value: &str,
) -> EvaluationCriterion {
    criterion.parameters.push(SamParameter {
        name: name.to_string(),
        value: value.to_string(),
    });
    criterion
}

pub(super) fn index_with(criteria: Vec<EvaluationCriterion>) -> Arc<ReferenceDataIndex> {
    let bundle = ReferenceDataBundle {
        model_library: vec![patient_model()],
        evaluation_profile_library: vec![ReferenceDataProfile {
            mnemonic: "CORE".to_string(),
            name: "Core Clinical Rubric".to_string(),
            file_path: None,
            evaluation_criteria: Some(criteria),
        }],
        value_set_library: Vec::new(),
        code_system_library: vec![
            CodeSystem {
                mnemonic: "LOINC".to_string(),
                name: "LOINC".to_string(),
                uri: "http://loinc.org".to_string(),
            },
            CodeSystem {
                mnemonic: "SNOMED".to_string(),
                name: "SNOMED CT".to_string(),
                uri: "http://snomed.info/sct".to_string(),
            },
        ],
        sam_library: vec![SamDescriptor {
            mnemonic: "element-is-clean".to_string(),
            name: "Element Is Clean".to_string(),
            description: None,
        }],
    };
    Arc::new(ReferenceDataIndex::new(&bundle, None).expect("fixture bundle indexes"))
}

pub(super) fn message(body: Value) -> PatientMessage {
    PatientMessage {
        header: MessageHeader {
            data_provider_id: "provider-1".to_string(),
            data_source_id: "source-1".to_string(),
            message_id: "message-1".to_string(),
        },
        body,
    }
}

pub(super) fn two_lab_message() -> PatientMessage {
    message(json!({
        "patient": {
            "dateOfBirth": "1984-05-12",
            "labResults": [
                {
                    "testCode": "2345-7",
                    "resultValue": "98",
                    "unit": "mg/dL",
                    "timestamp": "2026-01-15T08:30:00Z"
                },
                {
                    "testCode": "718-7",
                    "resultValue": "13.4",
                    "unit": "g/dL",
                    "timestamp": "2026-01-15T08:30:00Z"
                }
            ],
            "allergies": [
                {
                    "code": {
                        "coding": [
                            { "system": "http://snomed.info/sct", "code": "91936005" }
                        ]
                    },
                    "status": "active"
                }
            ]
        }
    }))
}

/// A SAM test double returning scripted responses by item key and
/// recording its execution order.
pub(super) struct ScriptedSam {
    mnemonic: String,
    responses: BTreeMap<String, SamResponse>,
    default: SamResponse,
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSam {
    pub(super) fn new(mnemonic: &str, default: SamResponse) -> Self {
        Self {
            mnemonic: mnemonic.to_string(),
            responses: BTreeMap::new(),
            default,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(super) fn respond(mut self, item_key: &str, response: SamResponse) -> Self {
        self.responses.insert(item_key.to_string(), response);
        self
    }

    pub(super) fn log(&self) -> Arc<Mutex<Vec<String>>> {
        self.log.clone()
    }
}

#[async_trait]
impl Sam for ScriptedSam {
    fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    async fn evaluate(
        &self,
        ctx: &SamContext<'_>,
        _parameters: &[SamParameter],
    ) -> Result<SamResponse, SamError> {
        let key = ctx.item().key.clone();
        self.log
            .lock()
            .expect("execution log mutex poisoned")
            .push(format!("{}@{}", self.mnemonic, key));
        Ok(self.responses.get(&key).cloned().unwrap_or_else(|| self.default.clone()))
    }
}

/// A SAM that always fails internally, for error-localization tests.
pub(super) struct ExplodingSam;

#[async_trait]
impl Sam for ExplodingSam {
    fn mnemonic(&self) -> &str {
        "exploding-check"
    }

    async fn evaluate(
        &self,
        _ctx: &SamContext<'_>,
        _parameters: &[SamParameter],
    ) -> Result<SamResponse, SamError> {
        Err(SamError::Internal("scripted internal failure".to_string()))
    }
}

/// Scripted terminology collaborator: responds by (system, code) with a
/// configurable default, recording every lookup.
#[derive(Default)]
pub(super) struct ScriptedTerminology {
    lookups: BTreeMap<(String, String), GatewayResponse>,
    default_status: u16,
    value_sets: BTreeMap<String, GatewayResponse>,
    pub(super) calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedTerminology {
    pub(super) fn new(default_status: u16) -> Self {
        Self {
            default_status,
            ..Self::default()
        }
    }

    pub(super) fn lookup(mut self, system: &str, code: &str, response: GatewayResponse) -> Self {
        self.lookups
            .insert((system.to_string(), code.to_string()), response);
        self
    }

    pub(super) fn value_set(mut self, reference: &str, response: GatewayResponse) -> Self {
        self.value_sets.insert(reference.to_string(), response);
        self
    }
}

#[async_trait]
impl TerminologyGateway for ScriptedTerminology {
    async fn lookup_code(
        &self,
        code: &str,
        system: &str,
    ) -> Result<GatewayResponse, GatewayError> {
        self.calls
            .lock()
            .expect("call log mutex poisoned")
            .push((system.to_string(), code.to_string()));
        Ok(self
            .lookups
            .get(&(system.to_string(), code.to_string()))
            .cloned()
            .unwrap_or_else(|| GatewayResponse::new(self.default_status, json!({}))))
    }

    async fn value_set(&self, reference: &str) -> Result<GatewayResponse, GatewayError> {
        Ok(self
            .value_sets
            .get(reference)
            .cloned()
            .unwrap_or_else(|| GatewayResponse::new(404, json!({}))))
    }
}

/// Scripted knowledge collaborator: plausibility verdict by test code.
#[derive(Default)]
pub(super) struct ScriptedKnowledge {
    verdicts: BTreeMap<String, String>,
    pub(super) queries: Mutex<Vec<String>>,
}

impl ScriptedKnowledge {
    pub(super) fn verdict(mut self, test_code: &str, verdict: &str) -> Self {
        self.verdicts
            .insert(test_code.to_string(), verdict.to_string());
        self
    }
}

#[async_trait]
impl KnowledgeGateway for ScriptedKnowledge {
    async fn lab_result_plausibility(
        &self,
        query: &LabResultQuery,
    ) -> Result<GatewayResponse, GatewayError> {
        self.queries
            .lock()
            .expect("query log mutex poisoned")
            .push(query.test_code.clone());
        let verdict = self
            .verdicts
            .get(&query.test_code)
            .cloned()
            .unwrap_or_else(|| "PLAUSIBLE".to_string());
        Ok(GatewayResponse::new(200, json!({ "plausibility": verdict })))
    }

    async fn lab_device_plausibility(
        &self,
        query: &LabDeviceQuery,
    ) -> Result<GatewayResponse, GatewayError> {
        let verdict = self
            .verdicts
            .get(&query.test_code)
            .cloned()
            .unwrap_or_else(|| "PLAUSIBLE".to_string());
        Ok(GatewayResponse::new(200, json!({ "plausibility": verdict })))
    }
}

pub(super) struct Harness {
    pub(super) index: Arc<ReferenceDataIndex>,
    pub(super) registry: Arc<SamRegistry>,
    pub(super) terminology: Arc<ScriptedTerminology>,
    pub(super) knowledge: Arc<ScriptedKnowledge>,
}

impl Harness {
    pub(super) fn new(criteria: Vec<EvaluationCriterion>) -> Self {
        Self {
            index: index_with(criteria),
            registry: Arc::new(SamRegistry::standard()),
            terminology: Arc::new(ScriptedTerminology::new(200)),
            knowledge: Arc::new(ScriptedKnowledge::default()),
        }
    }

    pub(super) fn with_registry(mut self, registry: SamRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub(super) fn with_terminology(mut self, terminology: ScriptedTerminology) -> Self {
        self.terminology = Arc::new(terminology);
        self
    }

    pub(super) fn with_knowledge(mut self, knowledge: ScriptedKnowledge) -> Self {
        self.knowledge = Arc::new(knowledge);
        self
    }

    pub(super) fn plan(&self, message: &PatientMessage) -> EvaluationGraph {
        let tree = MessageTree::build(&self.index, message).expect("message parses");
        let mut graph = build_graph(&self.index, &tree);
        plan_criteria(&mut graph, self.index.rubric()).expect("rubric plans");
        graph
    }

    pub(super) async fn run(&self, message: &PatientMessage) -> (EvaluationGraph, StatResponse, bool) {
        let mut graph = self.plan(message);
        let (stats, partial) = self
            .schedule(&mut graph, &CancellationFlag::default())
            .await;
        (graph, stats, partial)
    }

    pub(super) async fn schedule(
        &self,
        graph: &mut EvaluationGraph,
        cancel: &CancellationFlag,
    ) -> (StatResponse, bool) {
        let mut aggregator = StatisticsAggregator::new();
        for (_, item) in graph.items() {
            match item.item_type {
                crate::evaluation::ItemType::Class => {
                    if let (Some(mnemonic), Some(name)) =
                        (item.class_mnemonic.as_deref(), item.class_name.as_deref())
                    {
                        aggregator.note_class(mnemonic, name);
                    }
                }
                crate::evaluation::ItemType::Element => {
                    if let (Some(mnemonic), Some(name)) =
                        (item.class_mnemonic.as_deref(), item.class_name.as_deref())
                    {
                        aggregator.note_element_instance(mnemonic, name);
                    }
                }
                _ => {}
            }
        }

        let scheduler = EvaluationScheduler::new(
            graph,
            &self.registry,
            &self.index,
            self.terminology.as_ref(),
            self.knowledge.as_ref(),
            std::time::Duration::from_secs(5),
            &mut aggregator,
            cancel,
        );
        let partial = scheduler.run().await;
        (aggregator.into_response(), partial)
    }
}

/// All finalized outcomes of one item, keyed by result slot.
pub(super) fn outcomes_of(
    graph: &EvaluationGraph,
    item_key: &str,
) -> BTreeMap<String, crate::evaluation::EvalOutcome> {
    graph
        .items()
        .find(|(_, item)| item.key == item_key)
        .map(|(_, item)| {
            item.full_results
                .iter()
                .map(|(key, id)| (key.clone(), graph.result(*id).outcome.clone()))
                .collect()
        })
        .unwrap_or_default()
}
