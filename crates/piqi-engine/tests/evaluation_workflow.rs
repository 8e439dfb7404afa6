use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use piqi_engine::evaluation::{CancellationFlag, EvaluationEngine, EvaluationError};
use piqi_engine::message::{MessageHeader, PatientMessage};
use piqi_engine::refdata::{
    CodeSystem, CriterionRef, Entity, EntityType, EvaluationCriterion, ReferenceDataBundle,
    ReferenceDataIndex, ReferenceDataProfile, ScoringEffect,
};
use piqi_engine::sams::gateways::{
    GatewayError, GatewayResponse, KnowledgeGateway, LabDeviceQuery, LabResultQuery,
    TerminologyGateway,
};

fn entity(
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

fn patient_model() -> Entity {
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
        ],
    );
    let labs = entity("LABS", "labResults", "labResults", EntityType::Class, vec![lab_result]);

    let allergy = entity(
        "ALLERGY",
        "Allergy",
        "allergy",
        EntityType::Element,
        vec![entity(
            "ALLERGY_CODE",
            "Code",
            "code",
            EntityType::Attribute,
            Vec::new(),
        )],
    );
    let allergies = entity(
        "ALLERGIES",
        "allergies",
        "allergies",
        EntityType::Class,
        vec![allergy],
    );

    entity("PATIENT", "Patient", "patient", EntityType::Root, vec![labs, allergies])
}

fn criterion(
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

fn bundle(criteria: Vec<EvaluationCriterion>) -> ReferenceDataBundle {
    ReferenceDataBundle {
        model_library: vec![patient_model()],
        evaluation_profile_library: vec![ReferenceDataProfile {
            mnemonic: "CORE".to_string(),
            name: "Core Clinical Rubric".to_string(),
            file_path: None,
            evaluation_criteria: Some(criteria),
        }],
        value_set_library: Vec::new(),
        code_system_library: vec![CodeSystem {
            mnemonic: "LOINC".to_string(),
            name: "LOINC".to_string(),
            uri: "http://loinc.org".to_string(),
        }],
        sam_library: Vec::new(),
    }
}

struct RecognizingTerminology;

#[async_trait]
impl TerminologyGateway for RecognizingTerminology {
    async fn lookup_code(&self, code: &str, _system: &str) -> Result<GatewayResponse, GatewayError> {
        Ok(GatewayResponse::new(
            200,
            json!({
                "resourceType": "Parameters",
                "parameter": [ { "name": "display", "valueString": format!("Display for {code}") } ]
            }),
        ))
    }

    async fn value_set(&self, _reference: &str) -> Result<GatewayResponse, GatewayError> {
        Ok(GatewayResponse::new(200, json!({ "expansion": { "contains": [] } })))
    }
}

struct PlausibleKnowledge;

#[async_trait]
impl KnowledgeGateway for PlausibleKnowledge {
    async fn lab_result_plausibility(
        &self,
        _query: &LabResultQuery,
    ) -> Result<GatewayResponse, GatewayError> {
        Ok(GatewayResponse::new(200, json!({ "plausibility": "PLAUSIBLE" })))
    }

    async fn lab_device_plausibility(
        &self,
        _query: &LabDeviceQuery,
    ) -> Result<GatewayResponse, GatewayError> {
        Ok(GatewayResponse::new(200, json!({ "plausibility": "PLAUSIBLE" })))
    }
}

fn engine(criteria: Vec<EvaluationCriterion>) -> EvaluationEngine {
    let index = Arc::new(ReferenceDataIndex::new(&bundle(criteria), None).expect("bundle indexes"));
    EvaluationEngine::new(index, Arc::new(RecognizingTerminology), Arc::new(PlausibleKnowledge))
}

fn message(body: Value) -> PatientMessage {
    PatientMessage {
        header: MessageHeader {
            data_provider_id: "provider-9".to_string(),
            data_source_id: "source-4".to_string(),
            message_id: "msg-0017".to_string(),
        },
        body,
    }
}

fn standard_message() -> PatientMessage {
    message(json!({
        "patient": {
            "dateOfBirth": "1975-11-02",
            "labResults": [
                { "testCode": "2345-7", "resultValue": "98" },
                { "testCode": "718-7" }
            ],
            "allergies": [
                { "code": { "coding": [ { "system": "http://loinc.org", "code": "91936005" } ] } }
            ]
        }
    }))
}

fn standard_criteria() -> Vec<EvaluationCriterion> {
    vec![
        criterion("attribute-populated", "LAB_CODE", 1, ScoringEffect::Scoring, 2, false),
        criterion("attribute-populated", "LAB_VALUE", 2, ScoringEffect::Scoring, 2, true),
        criterion("element-is-clean", "LAB_RESULT", 3, ScoringEffect::Informational, 0, false),
        criterion("code-system-recognized", "ALLERGY_CODE", 4, ScoringEffect::Scoring, 1, false),
    ]
}

#[tokio::test]
async fn end_to_end_scorecard_reflects_message_quality() {
    let engine = engine(standard_criteria());
    let scorecard = engine
        .evaluate(&standard_message())
        .await
        .expect("evaluation completes");

    assert_eq!(scorecard.message_id, "msg-0017");
    assert_eq!(scorecard.data_provider_id, "provider-9");
    assert_eq!(scorecard.evaluation_rubric, "Core Clinical Rubric");
    assert!(!scorecard.partial);

    // Scoring: 2x LAB_CODE pass, LAB_VALUE pass + fail, allergy code pass.
    let results = &scorecard.message_results;
    assert_eq!(results.denominator, 5);
    assert_eq!(results.numerator, 4);
    assert_eq!(results.piqi_score, 80);
    assert_eq!(results.weighted_denominator, 9);
    assert_eq!(results.weighted_numerator, 7);
    assert_eq!(results.critical_failure_count, 1);

    // Classes sorted by prettified name.
    let class_names: Vec<&str> = scorecard
        .data_class_results
        .iter()
        .map(|class| class.data_class.as_str())
        .collect();
    assert_eq!(class_names, vec!["Allergies", "Lab Results"]);
    let labs = &scorecard.data_class_results[1];
    assert_eq!(labs.instance_count, 2);
    assert_eq!(labs.scores.denominator, 4);
    assert_eq!(labs.scores.numerator, 3);
    assert_eq!(labs.scores.critical_failure_count, 1);

    // No SAM-level errors anywhere in this run.
    assert!(scorecard.evaluation_errors.is_empty());

    // The clean-element check reports informationally: one clean, one not.
    assert_eq!(scorecard.informational_results.len(), 1);
    let info = &scorecard.informational_results[0];
    assert_eq!(info.data_class, "Lab Results");
    assert_eq!(info.evaluations.len(), 1);
    assert_eq!(info.evaluations[0].instance_count, 2);
    assert_eq!(info.evaluations[0].numerator, 1);
}

#[tokio::test]
async fn identical_inputs_yield_identical_scorecards() {
    let engine = engine(standard_criteria());
    let mut first = engine
        .evaluate(&standard_message())
        .await
        .expect("first run completes");
    let second = engine
        .evaluate(&standard_message())
        .await
        .expect("second run completes");

    first.process_date = second.process_date;
    assert_eq!(
        serde_json::to_value(&first).expect("serializes"),
        serde_json::to_value(&second).expect("serializes")
    );
}

#[tokio::test]
async fn empty_class_scores_zero_with_zero_denominator() {
    let engine = engine(standard_criteria());
    let scorecard = engine
        .evaluate(&message(json!({
            "patient": { "labResults": [], "allergies": [] }
        })))
        .await
        .expect("evaluation completes");

    for class in &scorecard.data_class_results {
        assert_eq!(class.scores.piqi_score, 0);
        assert_eq!(class.scores.denominator, 0);
        assert_eq!(class.instance_count, 0);
    }
    assert_eq!(scorecard.message_results.piqi_score, 0);
}

#[tokio::test]
async fn cancellation_emits_a_partial_scorecard() {
    let engine = engine(standard_criteria());
    let cancel = CancellationFlag::new();
    cancel.cancel();

    let scorecard = engine
        .evaluate_with(&standard_message(), &cancel)
        .await
        .expect("partial scorecard still emitted");

    assert!(scorecard.partial);
    assert_eq!(scorecard.message_results.denominator, 0);
    assert_eq!(scorecard.message_results.numerator, 0);
}

#[tokio::test]
async fn cyclic_rubric_refuses_to_evaluate() {
    let mut a = criterion("attribute-populated", "LAB_CODE", 1, ScoringEffect::Scoring, 1, false);
    a.conditional_on = Some(CriterionRef {
        sam_mnemonic: "element-is-clean".to_string(),
        sequence: 2,
    });
    let mut b = criterion("element-is-clean", "LAB_RESULT", 2, ScoringEffect::Scoring, 1, false);
    b.conditional_on = Some(CriterionRef {
        sam_mnemonic: "attribute-populated".to_string(),
        sequence: 1,
    });

    let engine = engine(vec![a, b]);
    let error = engine
        .evaluate(&standard_message())
        .await
        .expect_err("cycle must refuse evaluation");
    assert!(matches!(error, EvaluationError::InvalidRubric(_)));
}

#[tokio::test]
async fn mismatched_root_is_an_invalid_message() {
    let engine = engine(standard_criteria());
    let error = engine
        .evaluate(&message(json!({ "encounter": {} })))
        .await
        .expect_err("root mismatch must refuse evaluation");
    assert!(matches!(error, EvaluationError::Message(_)));
}
