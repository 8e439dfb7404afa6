use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

/// Raw response surface from a collaborator. SAMs interpret the status
/// themselves: 2xx carries a usable body, 400 means "not recognized" for
/// terminology lookups, anything else is a SAM-level error.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: Value,
}

impl GatewayResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport-level failure reaching the kernel from a collaborator. Always
/// downgraded to a SAM error, never fatal to the evaluation.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("collaborator transport failure: {0}")]
    Transport(String),
    #[error("collaborator call timed out after {0:?}")]
    Timeout(Duration),
}

/// Narrow capability surface over the FHIR terminology service.
#[async_trait]
pub trait TerminologyGateway: Send + Sync {
    /// `$lookup` of a code/system pair.
    async fn lookup_code(&self, code: &str, system: &str)
        -> Result<GatewayResponse, GatewayError>;

    /// Fetch/expand a value set by mnemonic or canonical URI. A 2xx body
    /// carries `expansion.contains[]` codings.
    async fn value_set(&self, reference: &str) -> Result<GatewayResponse, GatewayError>;
}

/// Query for the lab-result plausibility capability.
#[derive(Debug, Clone, PartialEq)]
pub struct LabResultQuery {
    pub dob: NaiveDate,
    pub test_code: String,
    pub result_value: String,
    pub stamp: String,
    pub lang: String,
    pub nav: String,
}

/// Query for the lab-device plausibility capability.
#[derive(Debug, Clone, PartialEq)]
pub struct LabDeviceQuery {
    pub test_code: String,
    pub ref_range_low: String,
    pub ref_range_high: String,
    pub unit: String,
    pub stamp: String,
    pub lang: String,
    pub nav: String,
}

/// Narrow capability surface over the knowledge plausibility service.
#[async_trait]
pub trait KnowledgeGateway: Send + Sync {
    async fn lab_result_plausibility(
        &self,
        query: &LabResultQuery,
    ) -> Result<GatewayResponse, GatewayError>;

    async fn lab_device_plausibility(
        &self,
        query: &LabDeviceQuery,
    ) -> Result<GatewayResponse, GatewayError>;
}

/// Bound every collaborator call by the configured timeout; elapsing the
/// deadline surfaces as a gateway error and therefore a SAM error.
pub async fn call_with_timeout<F>(
    deadline: Duration,
    call: F,
) -> Result<GatewayResponse, GatewayError>
where
    F: Future<Output = Result<GatewayResponse, GatewayError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(deadline)),
    }
}
