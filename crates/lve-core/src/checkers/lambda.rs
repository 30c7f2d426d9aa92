//! Checker delegating to a configured lambda.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::expr::Lambda;

use super::registry::{parse_args, CheckerFactory};
use super::{CheckArgs, Checker, CheckerConfig, CheckerError};

/// Checker which uses a lambda to judge safety.
///
/// The lambda is called as `func(response, **param_values)` and its result
/// is taken by truthiness.
#[derive(Debug, Clone)]
pub struct LambdaChecker {
    func: Lambda,
}

impl LambdaChecker {
    /// Compile the checker from a lambda source, e.g.
    /// `lambda response, **kw: response == kw['x']`.
    pub fn new(func: &str) -> Result<Self, CheckerError> {
        let func = Lambda::parse(func)?;
        tracing::debug!(source = func.source(), "Compiled LambdaChecker");
        Ok(Self { func })
    }

    pub fn source(&self) -> &str {
        self.func.source()
    }
}

impl Checker for LambdaChecker {
    fn name(&self) -> &'static str {
        "LambdaChecker"
    }

    fn config(&self) -> CheckerConfig {
        CheckerConfig::default()
    }

    fn is_safe(&self, args: CheckArgs<'_>) -> Result<bool, CheckerError> {
        let response = args.response()?;
        let result = self.func.call(vec![response.into()], args.param_kwargs())?;
        Ok(result.is_truthy())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LambdaArgs {
    func: String,
}

/// Builds [`LambdaChecker`] from `{"func": "<lambda source>"}`.
pub struct LambdaCheckerFactory;

impl CheckerFactory for LambdaCheckerFactory {
    fn checker_type(&self) -> &'static str {
        "LambdaChecker"
    }

    fn create(&self, args: &JsonValue) -> Result<Arc<dyn Checker>, CheckerError> {
        let args: LambdaArgs = parse_args(self.checker_type(), args)?;
        Ok(Arc::new(LambdaChecker::new(&args.func)?))
    }

    fn description(&self) -> &'static str {
        "Judges safety with a lambda over the response and parameter values"
    }
}
