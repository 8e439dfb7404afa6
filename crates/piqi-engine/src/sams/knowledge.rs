use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

use crate::refdata::SamParameter;

use super::gateways::{call_with_timeout, LabDeviceQuery, LabResultQuery};
use super::{param_or, Sam, SamContext, SamError, SamResponse};

/// Verdict of the knowledge plausibility capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plausibility {
    Plausible,
    Implausible,
    Unknown,
}

impl Plausibility {
    pub(crate) fn from_body(body: &Value) -> Result<Self, SamError> {
        match body.get("plausibility").and_then(Value::as_str) {
            Some("PLAUSIBLE") => Ok(Self::Plausible),
            Some("IMPLAUSIBLE") => Ok(Self::Implausible),
            Some("UNKNOWN") => Ok(Self::Unknown),
            other => Err(SamError::Internal(format!(
                "knowledge response carries no plausibility verdict (got {other:?})"
            ))),
        }
    }
}

fn into_response(plausibility: Plausibility, subject: &str) -> SamResponse {
    match plausibility {
        Plausibility::Plausible => SamResponse::pass(),
        Plausibility::Implausible => SamResponse::fail(format!("{subject} is implausible")),
        // UNKNOWN counts as skipped, never as an informational pass.
        Plausibility::Unknown => {
            SamResponse::skip(format!("plausibility of {subject} is unknown"))
        }
    }
}

fn field<'a>(payload: &'a Value, name: &str) -> Option<&'a str> {
    payload.get(name).and_then(Value::as_str)
}

/// Plausibility of a lab result value for the patient's age.
pub struct LabResultPlausible;

#[async_trait]
impl Sam for LabResultPlausible {
    fn mnemonic(&self) -> &str {
        "lab-result-plausible"
    }

    async fn evaluate(
        &self,
        ctx: &SamContext<'_>,
        parameters: &[SamParameter],
    ) -> Result<SamResponse, SamError> {
        let Some(payload) = ctx.message_text() else {
            return Ok(SamResponse::skip("no lab result present"));
        };

        let dob_field = param_or(parameters, "dobField", "dateOfBirth");
        let stamp_field = param_or(parameters, "stampField", "timestamp");
        let Some(dob_raw) = ctx
            .root_message_text()
            .and_then(|root| field(root, dob_field))
        else {
            return Ok(SamResponse::skip("patient date of birth is missing"));
        };
        let dob = NaiveDate::parse_from_str(dob_raw, "%Y-%m-%d")
            .map_err(|err| SamError::Internal(format!("unparseable date of birth: {err}")))?;

        let (Some(test_code), Some(result_value)) =
            (field(payload, "testCode"), field(payload, "resultValue"))
        else {
            return Ok(SamResponse::skip("lab result fields are missing"));
        };

        let query = LabResultQuery {
            dob,
            test_code: test_code.to_string(),
            result_value: result_value.to_string(),
            stamp: field(payload, stamp_field).unwrap_or_default().to_string(),
            lang: param_or(parameters, "lang", "en").to_string(),
            nav: param_or(parameters, "nav", "default").to_string(),
        };

        let response = call_with_timeout(
            ctx.collaborator_timeout,
            ctx.knowledge.lab_result_plausibility(&query),
        )
        .await?;
        if !response.is_success() {
            return Err(SamError::UnexpectedStatus {
                status: response.status,
            });
        }

        let verdict = Plausibility::from_body(&response.body)?;
        Ok(into_response(verdict, "lab result value"))
    }
}

/// Plausibility of a lab device's reference range and unit.
pub struct LabDevicePlausible;

#[async_trait]
impl Sam for LabDevicePlausible {
    fn mnemonic(&self) -> &str {
        "lab-device-plausible"
    }

    async fn evaluate(
        &self,
        ctx: &SamContext<'_>,
        parameters: &[SamParameter],
    ) -> Result<SamResponse, SamError> {
        let Some(payload) = ctx.message_text() else {
            return Ok(SamResponse::skip("no lab device data present"));
        };
        let stamp_field = param_or(parameters, "stampField", "timestamp");

        let Some(test_code) = field(payload, "testCode") else {
            return Ok(SamResponse::skip("lab device fields are missing"));
        };

        let query = LabDeviceQuery {
            test_code: test_code.to_string(),
            ref_range_low: field(payload, "refRangeLow").unwrap_or_default().to_string(),
            ref_range_high: field(payload, "refRangeHigh")
                .unwrap_or_default()
                .to_string(),
            unit: field(payload, "unit").unwrap_or_default().to_string(),
            stamp: field(payload, stamp_field).unwrap_or_default().to_string(),
            lang: param_or(parameters, "lang", "en").to_string(),
            nav: param_or(parameters, "nav", "default").to_string(),
        };

        let response = call_with_timeout(
            ctx.collaborator_timeout,
            ctx.knowledge.lab_device_plausibility(&query),
        )
        .await?;
        if !response.is_success() {
            return Err(SamError::UnexpectedStatus {
                status: response.status,
            });
        }

        let verdict = Plausibility::from_body(&response.body)?;
        Ok(into_response(verdict, "lab device reference range"))
    }
}
