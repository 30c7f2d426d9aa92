//! Expression language for checker configuration.
//!
//! Checker configurations carry small Python-style `lambda` sources such
//! as `lambda response, **kw: response == kw['x']`. They are parsed once at
//! construction into a [`Lambda`] and evaluated by a tree-walking
//! interpreter.
//!
//! ## Trust
//!
//! Lambda sources are configuration written by the test author and are
//! treated as trusted code. The interpreter has no I/O, no imports and no
//! access to anything beyond its arguments. String repetition is capped at
//! 16 MiB and fails with [`ExprError::Overflow`] beyond that; other work an
//! expression does is not bounded.

mod eval;
mod lexer;
mod parser;
mod value;

use std::fmt;

use indexmap::IndexMap;
use thiserror::Error;

pub use value::{format_float, Value};

use eval::Scope;
use parser::LambdaDef;

/// Errors raised while parsing or evaluating an expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("Syntax error at byte {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("Name '{0}' is not defined")]
    UnknownName(String),

    #[error("Key not found: '{0}'")]
    KeyError(String),

    #[error("Index {0} out of range")]
    IndexError(i64),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Value error: {0}")]
    ValueError(String),

    #[error("Division by zero")]
    ZeroDivision,

    #[error("Integer overflow")]
    Overflow,
}

/// A compiled `lambda` expression.
#[derive(Clone)]
pub struct Lambda {
    source: String,
    def: LambdaDef,
}

impl Lambda {
    /// Parse a `lambda` source string.
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let def = parser::parse_lambda(source)?;
        Ok(Self {
            source: source.to_string(),
            def,
        })
    }

    /// The source this lambda was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of the declared parameters, in order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.def.params.iter().map(|p| p.name.as_str())
    }

    /// Whether the lambda collects extra keyword arguments (`**kw`).
    pub fn accepts_kwargs(&self) -> bool {
        self.def.kwargs.is_some()
    }

    /// Call the lambda.
    ///
    /// Positional arguments bind in order, keyword arguments by name.
    /// Leftover keywords go to the `**` collector when one is declared.
    pub fn call(&self, args: Vec<Value>, kwargs: IndexMap<String, Value>) -> Result<Value, ExprError> {
        let params = &self.def.params;
        if args.len() > params.len() {
            return Err(ExprError::TypeError(format!(
                "<lambda>() takes {} positional argument(s) but {} were given",
                params.len(),
                args.len()
            )));
        }

        let mut scope = Scope::new();
        for (param, arg) in params.iter().zip(args) {
            scope.insert(param.name.clone(), arg);
        }

        let mut extra = IndexMap::new();
        for (name, value) in kwargs {
            if params.iter().any(|p| p.name == name) {
                if scope.contains_key(&name) {
                    return Err(ExprError::TypeError(format!(
                        "<lambda>() got multiple values for argument '{}'",
                        name
                    )));
                }
                scope.insert(name, value);
            } else if self.def.kwargs.is_some() {
                extra.insert(name, value);
            } else {
                return Err(ExprError::TypeError(format!(
                    "<lambda>() got an unexpected keyword argument '{}'",
                    name
                )));
            }
        }

        for param in params {
            if scope.contains_key(&param.name) {
                continue;
            }
            match &param.default {
                Some(default) => {
                    let value = eval::eval(default, &Scope::new())?;
                    scope.insert(param.name.clone(), value);
                }
                None => {
                    return Err(ExprError::TypeError(format!(
                        "<lambda>() missing required argument: '{}'",
                        param.name
                    )))
                }
            }
        }

        if let Some(collector) = &self.def.kwargs {
            scope.insert(collector.clone(), Value::Dict(extra));
        }

        eval::eval(&self.def.body, &scope)
    }
}

impl fmt::Debug for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lambda").field("source", &self.source).finish()
    }
}
