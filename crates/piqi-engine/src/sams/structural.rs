use async_trait::async_trait;
use serde_json::Value;

use crate::refdata::SamParameter;

use super::{Sam, SamContext, SamError, SamResponse};

/// Passes iff no criterion on any direct child of the item has failed.
///
/// Runs strictly after the children's criteria have finalized; the
/// scheduler's post-order traversal guarantees that.
pub struct ElementIsClean;

#[async_trait]
impl Sam for ElementIsClean {
    fn mnemonic(&self) -> &str {
        "element-is-clean"
    }

    async fn evaluate(
        &self,
        ctx: &SamContext<'_>,
        _parameters: &[SamParameter],
    ) -> Result<SamResponse, SamError> {
        let failed = ctx
            .graph
            .child_results(ctx.item)
            .iter()
            .filter(|result| result.outcome.failed())
            .count();

        if failed == 0 {
            Ok(SamResponse::pass())
        } else {
            Ok(SamResponse::fail(format!(
                "{failed} failed criteria among child items"
            )))
        }
    }
}

/// Passes iff the attribute is present in the message and carries a
/// non-empty value.
pub struct AttributePopulated;

fn is_populated(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.trim().is_empty(),
        Value::Array(values) => !values.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

#[async_trait]
impl Sam for AttributePopulated {
    fn mnemonic(&self) -> &str {
        "attribute-populated"
    }

    async fn evaluate(
        &self,
        ctx: &SamContext<'_>,
        _parameters: &[SamParameter],
    ) -> Result<SamResponse, SamError> {
        match ctx.message_text() {
            None => Ok(SamResponse::fail("attribute absent from message")),
            Some(value) if is_populated(value) => Ok(SamResponse::pass()),
            Some(_) => Ok(SamResponse::fail("attribute value is empty")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn populated_accepts_scalars_and_rejects_blanks() {
        assert!(is_populated(&json!("98")));
        assert!(is_populated(&json!(13.4)));
        assert!(is_populated(&json!(false)));
        assert!(!is_populated(&json!("   ")));
        assert!(!is_populated(&json!(null)));
        assert!(!is_populated(&json!([])));
        assert!(!is_populated(&json!({})));
    }
}
