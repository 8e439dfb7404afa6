use async_trait::async_trait;
use serde_json::Value;

use crate::refdata::{Coding, SamParameter};

use super::gateways::call_with_timeout;
use super::{param, Sam, SamContext, SamError, SamResponse};

/// Codings carried by the item payload. Accepts a FHIR `CodeableConcept`
/// (`coding[]`), a bare coding object, or an array of codings.
pub(crate) fn codings_from(value: &Value) -> Vec<Coding> {
    fn coding_from(value: &Value) -> Option<Coding> {
        let fields = value.as_object()?;
        let system = fields.get("system").and_then(Value::as_str);
        let code = fields.get("code").and_then(Value::as_str);
        if system.is_none() && code.is_none() {
            return None;
        }
        Some(Coding {
            system: system.map(str::to_string),
            code: code.map(str::to_string),
            display: fields
                .get("display")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    match value {
        Value::Object(fields) => match fields.get("coding") {
            Some(Value::Array(codings)) => codings.iter().filter_map(coding_from).collect(),
            _ => coding_from(value).into_iter().collect(),
        },
        Value::Array(codings) => codings.iter().filter_map(coding_from).collect(),
        _ => Vec::new(),
    }
}

/// Code-system interoperability: every coding's system must be known to
/// the reference data and its code recognized by the terminology service.
///
/// HTTP 400 from `$lookup` means "code not recognized in that system" and
/// fails the check; any other non-2xx status is a SAM-level error.
pub struct CodeSystemRecognized;

#[async_trait]
impl Sam for CodeSystemRecognized {
    fn mnemonic(&self) -> &str {
        "code-system-recognized"
    }

    async fn evaluate(
        &self,
        ctx: &SamContext<'_>,
        _parameters: &[SamParameter],
    ) -> Result<SamResponse, SamError> {
        let Some(payload) = ctx.message_text() else {
            return Ok(SamResponse::skip("no coded value present"));
        };
        let codings = codings_from(payload);
        if codings.is_empty() {
            return Ok(SamResponse::skip("no coded value present"));
        }

        for coding in &codings {
            let (Some(system), Some(code)) = (coding.system.as_deref(), coding.code.as_deref())
            else {
                return Ok(SamResponse::fail("coding is missing system or code"));
            };
            let Some(known) = ctx.index.code_system(system) else {
                return Ok(SamResponse::fail(format!(
                    "code system '{system}' is not in the reference data"
                )));
            };

            let response = call_with_timeout(
                ctx.collaborator_timeout,
                ctx.terminology.lookup_code(code, &known.uri),
            )
            .await?;
            match response.status {
                status if (200..300).contains(&status) => {}
                400 => {
                    return Ok(SamResponse::fail(format!(
                        "code '{code}' is not recognized in '{}'",
                        known.uri
                    )))
                }
                status => return Err(SamError::UnexpectedStatus { status }),
            }
        }

        Ok(SamResponse::pass())
    }
}

/// Resolve display text for each coding of a `CodeableConcept` via
/// `$lookup`; passes when at least one coding resolves.
pub struct ReferenceDisplayPopulated;

fn display_from_lookup(body: &Value) -> Vec<String> {
    let mut displays = Vec::new();
    if let Some(parameters) = body.get("parameter").and_then(Value::as_array) {
        for parameter in parameters {
            let name = parameter.get("name").and_then(Value::as_str);
            if name == Some("display") || name == Some("designation") {
                if let Some(text) = parameter.get("valueString").and_then(Value::as_str) {
                    displays.push(text.to_string());
                }
            }
        }
    }
    displays
}

#[async_trait]
impl Sam for ReferenceDisplayPopulated {
    fn mnemonic(&self) -> &str {
        "reference-display-populated"
    }

    async fn evaluate(
        &self,
        ctx: &SamContext<'_>,
        _parameters: &[SamParameter],
    ) -> Result<SamResponse, SamError> {
        let Some(payload) = ctx.message_text() else {
            return Ok(SamResponse::skip("no codeable concept present"));
        };
        let codings = codings_from(payload);
        if codings.is_empty() {
            return Ok(SamResponse::skip("no codeable concept present"));
        }

        let mut resolved = 0usize;
        for coding in &codings {
            let (Some(system), Some(code)) = (coding.system.as_deref(), coding.code.as_deref())
            else {
                continue;
            };
            let uri = ctx
                .index
                .code_system(system)
                .map(|known| known.uri.clone())
                .unwrap_or_else(|| system.to_string());

            let response = call_with_timeout(
                ctx.collaborator_timeout,
                ctx.terminology.lookup_code(code, &uri),
            )
            .await?;
            match response.status {
                status if (200..300).contains(&status) => {
                    let displays = display_from_lookup(&response.body);
                    tracing::debug!(code, system = %uri, count = displays.len(), "display resolved");
                    resolved += 1;
                }
                // No such code in that system; keep trying the rest.
                400 => continue,
                status => return Err(SamError::UnexpectedStatus { status }),
            }
        }

        if resolved > 0 {
            Ok(SamResponse::pass())
        } else {
            Ok(SamResponse::fail(
                "no coding could be resolved to a display",
            ))
        }
    }
}

/// Membership of the item's codings in a named value-set expansion.
pub struct ValueSetMembership;

#[async_trait]
impl Sam for ValueSetMembership {
    fn mnemonic(&self) -> &str {
        "value-set-membership"
    }

    async fn evaluate(
        &self,
        ctx: &SamContext<'_>,
        parameters: &[SamParameter],
    ) -> Result<SamResponse, SamError> {
        let Some(reference) = param(parameters, "valueSet") else {
            return Err(SamError::Internal(
                "value-set-membership requires a 'valueSet' parameter".to_string(),
            ));
        };
        let Some(payload) = ctx.message_text() else {
            return Ok(SamResponse::skip("no coded value present"));
        };
        let codings = codings_from(payload);
        if codings.is_empty() {
            return Ok(SamResponse::skip("no coded value present"));
        }

        let response = call_with_timeout(
            ctx.collaborator_timeout,
            ctx.terminology.value_set(reference),
        )
        .await?;
        if !response.is_success() {
            return Err(SamError::UnexpectedStatus {
                status: response.status,
            });
        }

        let expansion = response
            .body
            .pointer("/expansion/contains")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .flat_map(|entry| codings_from(entry))
                    .collect::<Vec<Coding>>()
            })
            .unwrap_or_default();

        let member = codings.iter().any(|coding| {
            expansion
                .iter()
                .any(|candidate| candidate.system == coding.system && candidate.code == coding.code)
        });

        if member {
            Ok(SamResponse::pass())
        } else {
            Ok(SamResponse::fail(format!(
                "no coding is a member of value set '{reference}'"
            )))
        }
    }
}
