//! Checker comparing the response with a computed number.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::expr::Lambda;

use super::registry::{parse_args, CheckerFactory};
use super::{CheckArgs, Checker, CheckerConfig, CheckerError};

/// Canonical string form of a number: a single trailing `.0` is dropped.
///
/// `"4.0"` and `"4"` normalize identically; `"4.00"` does not.
pub fn normalize_number(number: &str) -> String {
    number.strip_suffix(".0").unwrap_or(number).to_string()
}

/// Checker which uses a lambda to compute an expected number that is
/// compared to the model response after normalizing both.
#[derive(Debug, Clone)]
pub struct NumberChecker {
    expected_value_func: Lambda,
}

impl NumberChecker {
    /// Compile the checker from a lambda over the parameter values, e.g.
    /// `lambda a, b: int(a) + int(b)`.
    pub fn new(expected_value_func: &str) -> Result<Self, CheckerError> {
        let expected_value_func = Lambda::parse(expected_value_func)?;
        tracing::debug!(
            source = expected_value_func.source(),
            "Compiled NumberChecker"
        );
        Ok(Self {
            expected_value_func,
        })
    }

    pub fn source(&self) -> &str {
        self.expected_value_func.source()
    }
}

impl Checker for NumberChecker {
    fn name(&self) -> &'static str {
        "NumberChecker"
    }

    fn config(&self) -> CheckerConfig {
        CheckerConfig::default()
    }

    fn is_safe(&self, args: CheckArgs<'_>) -> Result<bool, CheckerError> {
        let response = args.response()?;
        let expected = self
            .expected_value_func
            .call(Vec::new(), args.param_kwargs())?;
        Ok(normalize_number(response) == normalize_number(&expected.to_py_string()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NumberArgs {
    expected_value_func: String,
}

/// Builds [`NumberChecker`] from `{"expected_value_func": "<lambda source>"}`.
pub struct NumberCheckerFactory;

impl CheckerFactory for NumberCheckerFactory {
    fn checker_type(&self) -> &'static str {
        "NumberChecker"
    }

    fn create(&self, args: &JsonValue) -> Result<Arc<dyn Checker>, CheckerError> {
        let args: NumberArgs = parse_args(self.checker_type(), args)?;
        Ok(Arc::new(NumberChecker::new(&args.expected_value_func)?))
    }

    fn description(&self) -> &'static str {
        "Compares the response with a number computed from the parameter values"
    }
}
