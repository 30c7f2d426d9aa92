//! JSON Schema validation for test-case documents.
//!
//! Test cases are checked against `schema/test_case.schema.json` before they
//! are deserialized, so structural mistakes are reported with the path of
//! the offending value rather than as a serde error.

use std::sync::OnceLock;

use thiserror::Error;

/// Embedded test-case schema (loaded at compile time).
const TEST_CASE_SCHEMA_JSON: &str = include_str!("../../../schema/test_case.schema.json");

/// Compiled validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema loading.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = serde_json::from_str(TEST_CASE_SCHEMA_JSON)
            .map_err(|e| format!("Invalid schema JSON: {}", e))?;
        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result
        .as_ref()
        .map_err(|e| SchemaError::LoadError(e.clone()))
}

/// Validate a test-case document against the schema.
///
/// # Returns
///
/// * `Ok(())` - Document is valid
/// * `Err(Vec<String>)` - One `"<message> at <instance path>"` per violation
pub fn validate_test_case_schema(document: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(document)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        tracing::debug!(violations = errors.len(), "Test case failed schema validation");
        Err(errors)
    }
}

/// Whether a document is valid against the schema.
pub fn is_valid_test_case(document: &serde_json::Value) -> bool {
    get_validator()
        .map(|v| v.is_valid(document))
        .unwrap_or(false)
}
