//! The structured reply the agent asks the model for.
//!
//! Every assistant turn is a JSON object with the model's `thoughts` and the
//! `command` it wants run. The schema is derived from [`AssistantReply`] with
//! `schemars` and checked with `jsonschema`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// The model's working notes for a turn.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq, Eq)]
pub struct Thoughts {
    /// What the model is thinking.
    pub text: String,
    pub reasoning: String,
    /// Short bulleted list that conveys the long-term plan.
    pub plan: String,
    /// Constructive self-criticism.
    pub criticism: String,
    /// Summary of the thoughts to say to the user.
    pub speak: String,
}

/// The command the model wants executed.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
}

/// One structured assistant reply.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
pub struct AssistantReply {
    pub thoughts: Thoughts,
    pub command: Command,
}

impl AssistantReply {
    /// Parse and validate a raw reply.
    pub fn parse(content: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(content).ok()?;
        if !validate_reply(&value).is_empty() {
            return None;
        }
        serde_json::from_value(value).ok()
    }
}

/// JSON Schema of [`AssistantReply`].
pub fn reply_schema() -> Value {
    let schema = schemars::schema_for!(AssistantReply);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

static REPLY_VALIDATOR: LazyLock<Option<jsonschema::Validator>> =
    LazyLock::new(|| match jsonschema::validator_for(&reply_schema()) {
        Ok(validator) => Some(validator),
        Err(e) => {
            warn!("Reply schema does not compile, checking reply structure only: {e}");
            None
        }
    });

/// Schema violations in `value`, formatted as `path: message`. Empty when
/// the value is a valid reply.
pub fn validate_reply(value: &Value) -> Vec<String> {
    match REPLY_VALIDATOR.as_ref() {
        Some(validator) => validator
            .iter_errors(value)
            .map(|e| format!("{}: {e}", e.instance_path()))
            .collect(),
        None => structural_errors(value),
    }
}

/// Errors from reading `value` as an [`AssistantReply`].
fn structural_errors(value: &Value) -> Vec<String> {
    match AssistantReply::deserialize(value) {
        Ok(_) => Vec::new(),
        Err(e) => vec![format!(": {e}")],
    }
}

/// Whether `content` is a JSON object matching the reply schema.
pub fn is_valid_reply(content: &str) -> bool {
    let value: Value = match serde_json::from_str(content) {
        Ok(v) => v,
        Err(e) => {
            debug!("Reply is not valid JSON: {e}");
            return false;
        }
    };
    let errors = validate_reply(&value);
    if !errors.is_empty() {
        debug!("Reply does not match the schema: {}", errors.join("; "));
    }
    errors.is_empty()
}
