//! Conversation model.
//!
//! A prompt is an ordered sequence of role-tagged messages. Each evaluation
//! sees two views of it: the *input* conversation the model was given, and
//! the *output* conversation with the model's assistant turns appended.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::expr::Value;

/// Parameter values substituted into a prompt template.
pub type ParamValues = BTreeMap<String, serde_json::Value>;

/// Errors raised while filling a prompt template.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("Missing parameter '{name}' in prompt template")]
    MissingParameter { name: String },

    #[error("Malformed prompt template at byte {position}: {reason}")]
    Malformed { position: usize, reason: String },
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,

    /// Text supplied to or produced by the model
    #[serde(default)]
    pub content: String,

    /// Logical name this turn's content is bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            variable: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Bind this message's content to a named variable.
    pub fn with_variable(mut self, variable: impl Into<String>) -> Self {
        self.variable = Some(variable.into());
        self
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}

/// Number of assistant-authored messages in a conversation.
pub fn count_assistant(prompt: &[Message]) -> usize {
    prompt.iter().filter(|m| m.is_assistant()).count()
}

/// Content of the final message, if any.
pub fn last_content(prompt: &[Message]) -> Option<&str> {
    prompt.last().map(|m| m.content.as_str())
}

/// Substitute `{name}` placeholders in every message with parameter values.
///
/// `{{` and `}}` produce literal braces. Variables and roles are carried
/// over unchanged.
pub fn fill_prompt(prompt: &[Message], params: &ParamValues) -> Result<Vec<Message>, TemplateError> {
    prompt
        .iter()
        .map(|message| {
            Ok(Message {
                role: message.role,
                content: fill_template(&message.content, params)?,
                variable: message.variable.clone(),
            })
        })
        .collect()
}

/// Fill a single template string.
pub fn fill_template(template: &str, params: &ParamValues) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((position, c)) = chars.next() {
        match c {
            '{' => {
                if matches!(chars.peek(), Some((_, '{'))) {
                    chars.next();
                    out.push('{');
                    continue;
                }

                let mut name = String::new();
                let mut closed = false;
                for (_, inner) in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    name.push(inner);
                }

                if !closed {
                    return Err(TemplateError::Malformed {
                        position,
                        reason: "unclosed '{'".to_string(),
                    });
                }

                let value = params
                    .get(&name)
                    .ok_or_else(|| TemplateError::MissingParameter { name: name.clone() })?;
                out.push_str(&Value::from(value).to_py_string());
            }
            '}' => {
                if matches!(chars.peek(), Some((_, '}'))) {
                    chars.next();
                    out.push('}');
                } else {
                    return Err(TemplateError::Malformed {
                        position,
                        reason: "single '}' encountered".to_string(),
                    });
                }
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, serde_json::Value)]) -> ParamValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let msg = Message::assistant("hi").with_variable("a");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, json!({"role": "assistant", "content": "hi", "variable": "a"}));
    }

    #[test]
    fn test_message_defaults_from_json() {
        let msg: Message = serde_json::from_value(json!({"role": "user"})).unwrap();
        assert_eq!(msg.content, "");
        assert!(msg.variable.is_none());
    }

    #[test]
    fn test_count_assistant_and_last_content() {
        let prompt = vec![
            Message::system("be nice"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        assert_eq!(count_assistant(&prompt), 1);
        assert_eq!(last_content(&prompt), Some("hello"));
        assert_eq!(last_content(&[]), None);
    }

    #[test]
    fn test_fill_template_substitutes_values() {
        let p = params(&[("a", json!(3)), ("b", json!("four")), ("c", json!(2.0))]);
        let filled = fill_template("What is {a} + {b}? ({c})", &p).unwrap();
        assert_eq!(filled, "What is 3 + four? (2.0)");
    }

    #[test]
    fn test_fill_template_escapes_braces() {
        let filled = fill_template("{{literal}} {x}", &params(&[("x", json!("y"))])).unwrap();
        assert_eq!(filled, "{literal} y");
    }

    #[test]
    fn test_fill_template_missing_parameter() {
        let err = fill_template("Hello {name}", &ParamValues::new()).unwrap_err();
        assert_eq!(
            err,
            TemplateError::MissingParameter {
                name: "name".to_string()
            }
        );
    }

    #[test]
    fn test_fill_template_placeholder_name_is_exact() {
        let err = fill_template("{ a }", &params(&[("a", json!(1))])).unwrap_err();
        assert_eq!(
            err,
            TemplateError::MissingParameter {
                name: " a ".to_string()
            }
        );
    }

    #[test]
    fn test_fill_template_unclosed_brace() {
        let err = fill_template("Hello {name", &ParamValues::new()).unwrap_err();
        assert!(matches!(err, TemplateError::Malformed { position: 6, .. }));
    }

    #[test]
    fn test_fill_prompt_keeps_roles_and_variables() {
        let prompt = vec![
            Message::user("Say {word}"),
            Message::assistant("").with_variable("answer"),
        ];
        let filled = fill_prompt(&prompt, &params(&[("word", json!("hi"))])).unwrap();
        assert_eq!(filled[0].content, "Say hi");
        assert_eq!(filled[1].variable.as_deref(), Some("answer"));
        assert_eq!(filled[1].role, Role::Assistant);
    }
}
