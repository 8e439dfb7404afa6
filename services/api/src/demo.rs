use std::path::PathBuf;

use clap::Args;
use serde_json::json;

use piqi_engine::config::AppConfig;
use piqi_engine::error::AppError;
use piqi_engine::evaluation::EvaluationError;
use piqi_engine::message::{MessageError, MessageHeader, PatientMessage};
use piqi_engine::refdata::{
    Coding, CodeSystem, Entity, EntityType, EvaluationCriterion, ReferenceDataBundle,
    ReferenceDataProfile, SamDescriptor, SamParameter, ScoringEffect, ValueSet,
};

use crate::infra::{build_engine, engine_from_bundle};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Emit compact JSON instead of pretty-printed output
    #[arg(long)]
    pub(crate) compact: bool,
}

#[derive(Args, Debug)]
pub(crate) struct EvaluateArgs {
    /// Path to the patient message file
    #[arg(long)]
    pub(crate) message: PathBuf,
    /// Reference-data bundle to evaluate against (defaults to
    /// PIQI_REFERENCE_DATA, then the bundled demo data)
    #[arg(long)]
    pub(crate) reference_data: Option<PathBuf>,
    /// Rubric mnemonic to apply
    #[arg(long)]
    pub(crate) rubric: Option<String>,
}

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

fn criterion(
    sam: &str,
    entity_mnemonic: &str,
    sequence: u32,
    effect: ScoringEffect,
    weight: u32,
    critical: bool,
    parameters: Vec<SamParameter>,
) -> EvaluationCriterion {
    EvaluationCriterion {
        sequence,
        sam_mnemonic: sam.to_string(),
        entity_mnemonic: entity_mnemonic.to_string(),
        scoring_effect: effect,
        scoring_weight: weight,
        criticality_indicator: critical,
        sam_name_override: None,
        parameters,
        conditional_on: None,
        dependent_on: None,
    }
}

/// Self-contained reference data exercising every built-in SAM class.
pub(crate) fn demo_bundle() -> ReferenceDataBundle {
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
    let labs = entity("LABS", "labResults", "labResults", EntityType::Class, vec![lab_result]);

    let allergy = entity(
        "ALLERGY",
        "Allergy",
        "allergy",
        EntityType::Element,
        vec![
            entity("ALLERGY_CODE", "Code", "code", EntityType::Attribute, Vec::new()),
            entity(
                "ALLERGY_STATUS",
                "ClinicalStatus",
                "clinicalStatus",
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

    let model = entity(
        "PATIENT",
        "Patient",
        "patient",
        EntityType::Root,
        vec![labs, allergies],
    );

    let status_system = "http://terminology.hl7.org/CodeSystem/allergy-clinical";
    let coding = |system: &str, code: &str, display: &str| Coding {
        system: Some(system.to_string()),
        code: Some(code.to_string()),
        display: Some(display.to_string()),
    };

    ReferenceDataBundle {
        model_library: vec![model],
        evaluation_profile_library: vec![ReferenceDataProfile {
            mnemonic: "CORE".to_string(),
            name: "Core Clinical Rubric".to_string(),
            file_path: None,
            evaluation_criteria: Some(vec![
                criterion("attribute-populated", "LAB_CODE", 1, ScoringEffect::Scoring, 2, false, Vec::new()),
                criterion("attribute-populated", "LAB_VALUE", 2, ScoringEffect::Scoring, 2, true, Vec::new()),
                criterion("lab-result-plausible", "LAB_RESULT", 3, ScoringEffect::Scoring, 1, false, Vec::new()),
                criterion(
                    "element-is-clean",
                    "LAB_RESULT",
                    4,
                    ScoringEffect::Informational,
                    0,
                    false,
                    Vec::new(),
                ),
                criterion("code-system-recognized", "ALLERGY_CODE", 5, ScoringEffect::Scoring, 1, false, Vec::new()),
                criterion(
                    "value-set-membership",
                    "ALLERGY_STATUS",
                    6,
                    ScoringEffect::Scoring,
                    1,
                    false,
                    vec![SamParameter {
                        name: "valueSet".to_string(),
                        value: "ALLERGY_STATUS_VS".to_string(),
                    }],
                ),
            ]),
        }],
        value_set_library: vec![
            ValueSet {
                mnemonic: "ALLERGY_STATUS_VS".to_string(),
                name: "Allergy Clinical Status".to_string(),
                uri: Some("http://example.org/fhir/ValueSet/allergy-clinical-status".to_string()),
                codings: vec![
                    coding(status_system, "active", "Active"),
                    coding(status_system, "inactive", "Inactive"),
                    coding(status_system, "resolved", "Resolved"),
                ],
            },
            ValueSet {
                mnemonic: "ALLERGY_CODE_VS".to_string(),
                name: "Common Allergy Codes".to_string(),
                uri: None,
                codings: vec![
                    coding("http://snomed.info/sct", "91936005", "Allergy to penicillin"),
                    coding("http://snomed.info/sct", "300913006", "Shellfish allergy"),
                ],
            },
        ],
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
            CodeSystem {
                mnemonic: "ALLERGY_CLINICAL".to_string(),
                name: "Allergy Clinical Status".to_string(),
                uri: status_system.to_string(),
            },
        ],
        sam_library: vec![
            SamDescriptor {
                mnemonic: "attribute-populated".to_string(),
                name: "Attribute Populated".to_string(),
                description: None,
            },
            SamDescriptor {
                mnemonic: "element-is-clean".to_string(),
                name: "Element Is Clean".to_string(),
                description: None,
            },
            SamDescriptor {
                mnemonic: "lab-result-plausible".to_string(),
                name: "Lab Result Plausible".to_string(),
                description: None,
            },
        ],
    }
}

pub(crate) fn demo_message() -> PatientMessage {
    PatientMessage {
        header: MessageHeader {
            data_provider_id: "demo-provider".to_string(),
            data_source_id: "demo-source".to_string(),
            message_id: "demo-0001".to_string(),
        },
        body: json!({
            "patient": {
                "dateOfBirth": "1968-03-21",
                "labResults": [
                    {
                        "testCode": "2345-7",
                        "resultValue": "98",
                        "unit": "mg/dL",
                        "timestamp": "2026-07-30T08:15:00Z"
                    },
                    {
                        "testCode": "718-7",
                        "unit": "g/dL",
                        "timestamp": "2026-07-30T08:15:00Z"
                    }
                ],
                "allergies": [
                    {
                        "code": {
                            "coding": [
                                { "system": "http://snomed.info/sct", "code": "91936005" }
                            ],
                            "text": "Penicillin allergy"
                        },
                        "clinicalStatus": {
                            "coding": [
                                {
                                    "system": "http://terminology.hl7.org/CodeSystem/allergy-clinical",
                                    "code": "active"
                                }
                            ]
                        }
                    }
                ]
            }
        }),
    }
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let engine = engine_from_bundle(&demo_bundle(), None, &config)?;
    let scorecard = engine.evaluate(&demo_message()).await?;

    let rendered = if args.compact {
        serde_json::to_string(&scorecard)
    } else {
        serde_json::to_string_pretty(&scorecard)
    }
    .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    println!("{rendered}");
    Ok(())
}

pub(crate) async fn run_evaluate(args: EvaluateArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;
    if args.reference_data.is_some() {
        config.engine.reference_data = args.reference_data;
    }
    if args.rubric.is_some() {
        config.engine.rubric_mnemonic = args.rubric;
    }

    let raw = std::fs::read_to_string(&args.message)?;
    let message: PatientMessage = serde_json::from_str(&raw).map_err(|err| {
        AppError::Evaluation(EvaluationError::Message(MessageError::Unparseable(
            err.to_string(),
        )))
    })?;

    let engine = build_engine(&config)?;
    let scorecard = engine.evaluate(&message).await?;
    let rendered = serde_json::to_string_pretty(&scorecard)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    println!("{rendered}");
    Ok(())
}
