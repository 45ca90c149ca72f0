// SPDX-License-Identifier: MIT OR Apache-2.0
//! Payload validation for `json_schema` contracts, plus contract
//! summaries rendered into HITL operator prompts.

use crate::ContractError;
use flex_core::OutputContract;
use serde_json::Value;

/// One validator finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractViolation {
    /// JSON pointer into the offending instance location.
    pub instance_path: String,
    /// Validator message.
    pub message: String,
}

impl std::fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.instance_path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.instance_path, self.message)
        }
    }
}

/// Validate `payload` against a contract.
///
/// Only `json_schema` contracts validate structurally; `facets` and
/// `freeform` contracts always pass here (facet coverage is the run
/// context's concern).
///
/// # Errors
///
/// Returns [`ContractError::InvalidSchema`] when the schema itself does
/// not compile. A failed validation is a successful call returning the
/// violations.
pub fn validate_payload(
    contract: &OutputContract,
    payload: &Value,
) -> Result<Vec<ContractViolation>, ContractError> {
    let OutputContract::JsonSchema { schema } = contract else {
        return Ok(Vec::new());
    };
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| ContractError::InvalidSchema(e.to_string()))?;
    Ok(validator
        .iter_errors(payload)
        .map(|error| ContractViolation {
            instance_path: error.instance_path.to_string(),
            message: error.to_string(),
        })
        .collect())
}

/// Render a one-line-per-facet summary of a contract for operator prompts.
#[must_use]
pub fn contract_summary(contract: &OutputContract) -> String {
    match contract {
        OutputContract::JsonSchema { schema } => {
            let properties = schema
                .get("properties")
                .and_then(Value::as_object)
                .map(|props| props.keys().cloned().collect::<Vec<_>>().join(", "))
                .unwrap_or_default();
            let required = schema
                .get("required")
                .and_then(Value::as_array)
                .map(|keys| {
                    keys.iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            let mut out = String::from("JSON schema contract");
            if !properties.is_empty() {
                out.push_str(&format!("; properties: {properties}"));
            }
            if !required.is_empty() {
                out.push_str(&format!("; required: {required}"));
            }
            out
        }
        OutputContract::Facets { facets } => {
            format!("Facet contract: {}", facets.join(", "))
        }
        OutputContract::Freeform { instructions } => {
            if instructions.is_empty() {
                "Freeform output".to_string()
            } else {
                format!("Freeform output: {instructions}")
            }
        }
    }
}
