//! # lve-core
//!
//! Safety checkers for recorded language-model conversations.
//!
//! A test case pairs a prompt template with a checker. After the model has
//! answered, the checker looks at the conversation and decides whether the
//! response is safe:
//! - Did the model repeat something it should have kept private?
//! - Does the number it produced match the expected one?
//! - Does the response match a forbidden (or required) pattern?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same conversation and parameters, same verdict
//! 2. **Configuration-driven**: Checkers are built by name from YAML/JSON
//! 3. **Explicit arguments**: A checker receives exactly what its
//!    [`CheckerConfig`] requests
//! 4. **Parallel-safe**: Invocations share no mutable state
//!
//! ## Example
//!
//! ```rust,ignore
//! use lve_core::{ParamValues, TestCase};
//!
//! let test = TestCase::from_yaml_file("test.yaml")?;
//! let report = test.run(&ParamValues::new(), &["I can't share that.".to_string()])?;
//!
//! if report.is_safe {
//!     println!("SAFE: {:?}", report.response);
//! } else {
//!     println!("UNSAFE: {:?}", report.response);
//! }
//! ```

pub mod checkers;
pub mod expr;
pub mod prompt;
pub mod schema;
pub mod test_case;
pub mod variables;

// Re-export main types at crate root
pub use checkers::{
    checker_registry, create_checker, register_checker, BaseChecker, CheckArgs, CheckOutcome,
    Checker, CheckerConfig, CheckerError, CheckerFactory, CheckerRegistry, LambdaChecker,
    NumberChecker, RegexChecker, ResponseOrVariables,
};
pub use expr::{ExprError, Lambda, Value};
pub use prompt::{fill_prompt, Message, ParamValues, Role, TemplateError};
pub use schema::{validate_test_case_schema, SchemaError};
pub use test_case::{CheckReport, CheckerSpec, TestCase, TestCaseError};
pub use variables::{extract_variables, Variables};
