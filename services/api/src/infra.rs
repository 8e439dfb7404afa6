use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};

use piqi_engine::config::AppConfig;
use piqi_engine::error::AppError;
use piqi_engine::evaluation::{EngineSettings, EvaluationEngine};
use piqi_engine::refdata::{load_bundle, ReferenceDataBundle, ReferenceDataIndex};
use piqi_engine::sams::gateways::{
    GatewayError, GatewayResponse, KnowledgeGateway, LabDeviceQuery, LabResultQuery,
    TerminologyGateway,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Offline terminology collaborator seeded from the reference-data
/// bundle: codes listed in the bundle's value sets are recognized,
/// everything else answers 400. Used by the demo, the tests, and as the
/// default wiring when no live terminology service is configured.
pub(crate) struct StaticTerminologyGateway {
    known_codes: BTreeSet<(String, String)>,
    expansions: BTreeMap<String, Value>,
}

impl StaticTerminologyGateway {
    pub(crate) fn from_bundle(bundle: &ReferenceDataBundle) -> Self {
        let mut known_codes = BTreeSet::new();
        let mut expansions = BTreeMap::new();

        for value_set in &bundle.value_set_library {
            let contains: Vec<Value> = value_set
                .codings
                .iter()
                .map(|coding| {
                    json!({
                        "system": coding.system,
                        "code": coding.code,
                        "display": coding.display,
                    })
                })
                .collect();
            let body = json!({ "expansion": { "contains": contains } });
            expansions.insert(value_set.mnemonic.clone(), body.clone());
            if let Some(uri) = &value_set.uri {
                expansions.insert(uri.clone(), body);
            }

            for coding in &value_set.codings {
                if let (Some(system), Some(code)) = (&coding.system, &coding.code) {
                    known_codes.insert((system.clone(), code.clone()));
                }
            }
        }

        Self {
            known_codes,
            expansions,
        }
    }
}

#[async_trait]
impl TerminologyGateway for StaticTerminologyGateway {
    async fn lookup_code(&self, code: &str, system: &str) -> Result<GatewayResponse, GatewayError> {
        if self
            .known_codes
            .contains(&(system.to_string(), code.to_string()))
        {
            Ok(GatewayResponse::new(
                200,
                json!({
                    "resourceType": "Parameters",
                    "parameter": [
                        { "name": "display", "valueString": format!("Reference display for {code}") }
                    ]
                }),
            ))
        } else {
            Ok(GatewayResponse::new(400, json!({})))
        }
    }

    async fn value_set(&self, reference: &str) -> Result<GatewayResponse, GatewayError> {
        match self.expansions.get(reference) {
            Some(body) => Ok(GatewayResponse::new(200, body.clone())),
            None => Ok(GatewayResponse::new(404, json!({}))),
        }
    }
}

/// Offline knowledge collaborator with a deterministic verdict rule:
/// numeric lab values within a broad physiological band are plausible,
/// values outside it implausible, non-numeric values unknown.
#[derive(Default)]
pub(crate) struct StaticKnowledgeGateway;

impl StaticKnowledgeGateway {
    fn verdict_for(value: &str) -> &'static str {
        match value.trim().parse::<f64>() {
            Ok(number) if (-1_000_000.0..=1_000_000.0).contains(&number) => "PLAUSIBLE",
            Ok(_) => "IMPLAUSIBLE",
            Err(_) => "UNKNOWN",
        }
    }
}

#[async_trait]
impl KnowledgeGateway for StaticKnowledgeGateway {
    async fn lab_result_plausibility(
        &self,
        query: &LabResultQuery,
    ) -> Result<GatewayResponse, GatewayError> {
        let verdict = Self::verdict_for(&query.result_value);
        Ok(GatewayResponse::new(200, json!({ "plausibility": verdict })))
    }

    async fn lab_device_plausibility(
        &self,
        query: &LabDeviceQuery,
    ) -> Result<GatewayResponse, GatewayError> {
        let low = query.ref_range_low.trim().parse::<f64>();
        let high = query.ref_range_high.trim().parse::<f64>();
        let verdict = match (low, high) {
            (Ok(low), Ok(high)) if low <= high => "PLAUSIBLE",
            (Ok(_), Ok(_)) => "IMPLAUSIBLE",
            _ => "UNKNOWN",
        };
        Ok(GatewayResponse::new(200, json!({ "plausibility": verdict })))
    }
}

/// Assemble the engine from configuration: reference data from disk when
/// configured, the bundled demo reference data otherwise.
pub(crate) fn build_engine(config: &AppConfig) -> Result<EvaluationEngine, AppError> {
    let bundle = match &config.engine.reference_data {
        Some(path) => load_bundle(path)?,
        None => crate::demo::demo_bundle(),
    };
    engine_from_bundle(&bundle, config.engine.rubric_mnemonic.as_deref(), config)
}

pub(crate) fn engine_from_bundle(
    bundle: &ReferenceDataBundle,
    rubric_mnemonic: Option<&str>,
    config: &AppConfig,
) -> Result<EvaluationEngine, AppError> {
    let index = Arc::new(ReferenceDataIndex::new(bundle, rubric_mnemonic)?);
    let terminology = Arc::new(StaticTerminologyGateway::from_bundle(bundle));
    let knowledge = Arc::new(StaticKnowledgeGateway);
    Ok(
        EvaluationEngine::new(index, terminology, knowledge).with_settings(EngineSettings {
            collaborator_timeout: config.engine.collaborator_timeout(),
        }),
    )
}
