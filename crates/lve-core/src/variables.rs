//! Variable extraction from output conversations.

use indexmap::IndexMap;

use crate::prompt::Message;

/// Variable name to produced content, in encounter order.
pub type Variables = IndexMap<String, String>;

/// Collect the content of every assistant turn under its variable name.
///
/// Unnamed turns are keyed by their zero-based position among assistant
/// turns, stringified. A later turn with the same name overwrites the
/// earlier one.
pub fn extract_variables(prompt: &[Message]) -> Variables {
    let mut variables = Variables::new();
    for (ordinal, message) in prompt.iter().filter(|m| m.is_assistant()).enumerate() {
        let name = match &message.variable {
            Some(name) => name.clone(),
            None => ordinal.to_string(),
        };
        variables.insert(name, message.content.clone());
    }
    variables
}
