//! Checkers decide whether a recorded conversation is safe.
//!
//! Every checker implements [`Checker`]. A checker declares, through its
//! [`CheckerConfig`], which arguments its safety predicate needs; the
//! dispatcher ([`Checker::invoke_check`]) reduces a conversation to exactly
//! that [`CheckArgs`] bundle and hands it to [`Checker::is_safe`].
//!
//! ## Representative value
//!
//! An invocation returns the verdict together with the value that best
//! represents what the model produced: the final response text when the
//! conversation has a single assistant turn, or the full variable mapping
//! when it has several.

mod lambda;
mod number;
mod pattern;
pub mod registry;

pub use lambda::{LambdaChecker, LambdaCheckerFactory};
pub use number::{normalize_number, NumberChecker, NumberCheckerFactory};
pub use pattern::{RegexChecker, RegexCheckerFactory, RegexFlag, RegexFlags};
pub use registry::{
    checker_registry, create_checker, register_checker, BaseCheckerFactory, CheckerFactory,
    CheckerRegistry, CheckerTable,
};

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::expr::{ExprError, Value};
use crate::prompt::{count_assistant, last_content, Message, ParamValues};
use crate::variables::{extract_variables, Variables};

/// Errors raised while constructing or invoking a checker.
#[derive(Error, Debug)]
pub enum CheckerError {
    #[error("Invalid checker configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("is_safe is not implemented for {checker}")]
    NotImplemented { checker: String },

    #[error("Output conversation is empty; there is no response to check")]
    EmptyConversation,

    #[error("Argument '{argument}' was not requested by the checker configuration")]
    MissingArgument { argument: &'static str },

    #[error("Unknown checker type: '{name}'. Available: {available:?}")]
    UnknownChecker { name: String, available: Vec<String> },

    #[error("Expression error: {0}")]
    Expression(#[from] ExprError),
}

/// Which arguments a checker's safety predicate receives.
///
/// Fixed at construction. Argument presence is driven entirely by these
/// flags, never by the shape of the conversation being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    /// Pass the input conversation as `prompt` instead of the output one
    #[serde(alias = "prompt_contains_responses")]
    pub wants_input_conversation: bool,

    /// Always compute and pass the variable mapping
    #[serde(alias = "get_variables")]
    pub wants_variable_mapping: bool,

    /// Pass the final message's content as `response`
    #[serde(alias = "get_response")]
    pub wants_response_text: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            wants_input_conversation: false,
            wants_variable_mapping: false,
            wants_response_text: true,
        }
    }
}

/// The argument bundle assembled by the dispatcher.
///
/// Fields a checker did not ask for are `None`.
#[derive(Debug, Clone, Copy)]
pub struct CheckArgs<'a> {
    pub prompt: &'a [Message],
    pub response: Option<&'a str>,
    pub variables: Option<&'a Variables>,
    pub param_values: Option<&'a ParamValues>,
}

impl<'a> CheckArgs<'a> {
    /// The response text, if the configuration requested it.
    pub fn response(&self) -> Result<&'a str, CheckerError> {
        self.response
            .ok_or(CheckerError::MissingArgument { argument: "response" })
    }

    /// The variable mapping, if the configuration requested it.
    pub fn variables(&self) -> Result<&'a Variables, CheckerError> {
        self.variables
            .ok_or(CheckerError::MissingArgument { argument: "variables" })
    }

    /// Parameter values as expression keyword arguments.
    ///
    /// Absent parameters behave like an empty mapping.
    pub fn param_kwargs(&self) -> IndexMap<String, Value> {
        self.param_values
            .map(|params| {
                params
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// The value that represents what the model produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseOrVariables {
    Response(String),
    Variables(Variables),
}

impl ResponseOrVariables {
    pub fn as_response(&self) -> Option<&str> {
        match self {
            ResponseOrVariables::Response(text) => Some(text),
            ResponseOrVariables::Variables(_) => None,
        }
    }

    pub fn as_variables(&self) -> Option<&Variables> {
        match self {
            ResponseOrVariables::Response(_) => None,
            ResponseOrVariables::Variables(vars) => Some(vars),
        }
    }
}

/// Result of a checker invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub is_safe: bool,
    pub response: ResponseOrVariables,
}

impl From<CheckOutcome> for (bool, ResponseOrVariables) {
    fn from(outcome: CheckOutcome) -> Self {
        (outcome.is_safe, outcome.response)
    }
}

/// Trait implemented by all checkers.
pub trait Checker: Send + Sync + fmt::Debug {
    /// The name this checker type is registered under.
    fn name(&self) -> &'static str;

    /// Which arguments [`Checker::is_safe`] receives.
    fn config(&self) -> CheckerConfig;

    /// Decide whether the response is safe.
    ///
    /// Receives exactly the arguments requested by [`Checker::config`].
    /// The default implementation fails with `NotImplemented`.
    fn is_safe(&self, _args: CheckArgs<'_>) -> Result<bool, CheckerError> {
        Err(CheckerError::NotImplemented {
            checker: self.name().to_string(),
        })
    }

    /// Normalize or redact a response before downstream comparison.
    ///
    /// Identity by default. Never called by [`Checker::invoke_check`].
    fn postprocess_response(&self, response: &str) -> String {
        response.to_string()
    }

    /// Reduce a conversation to this checker's arguments and run it.
    ///
    /// # Arguments
    ///
    /// * `prompt_in` - The conversation given to the model
    /// * `prompt_out` - The conversation including model responses
    /// * `param_values` - The parameter values plugged into the prompt
    ///
    /// # Returns
    ///
    /// The verdict plus the final response text, or the variable mapping
    /// when `prompt_out` holds more than one assistant turn.
    fn invoke_check(
        &self,
        prompt_in: &[Message],
        prompt_out: &[Message],
        param_values: Option<&ParamValues>,
    ) -> Result<CheckOutcome, CheckerError> {
        let config = self.config();
        let prompt = if config.wants_input_conversation {
            prompt_in
        } else {
            prompt_out
        };

        let response = last_content(prompt_out).ok_or(CheckerError::EmptyConversation)?;
        let assistant_turns = count_assistant(prompt_out);

        let variables = (config.wants_variable_mapping || assistant_turns > 1)
            .then(|| extract_variables(prompt_out));

        let args = CheckArgs {
            prompt,
            response: config.wants_response_text.then_some(response),
            variables: if config.wants_variable_mapping {
                variables.as_ref()
            } else {
                None
            },
            param_values,
        };

        let is_safe = self.is_safe(args)?;
        tracing::debug!(
            checker = self.name(),
            assistant_turns,
            is_safe,
            "Checker invoked"
        );

        let response = match variables {
            Some(vars) if assistant_turns > 1 => ResponseOrVariables::Variables(vars),
            _ => ResponseOrVariables::Response(response.to_string()),
        };

        Ok(CheckOutcome { is_safe, response })
    }
}

/// The base checker contract on its own.
///
/// Registered so that configurations can name it, but it has no safety
/// predicate: invoking it fails with `NotImplemented`.
#[derive(Debug, Clone, Default)]
pub struct BaseChecker {
    config: CheckerConfig,
}

impl BaseChecker {
    pub fn new(config: CheckerConfig) -> Self {
        Self { config }
    }
}

impl Checker for BaseChecker {
    fn name(&self) -> &'static str {
        "BaseChecker"
    }

    fn config(&self) -> CheckerConfig {
        self.config
    }
}
