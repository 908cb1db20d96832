//! Schema types for refinement requests and results.
//!
//! `RefinedResult` serializes with the camelCase key names the LM is asked to
//! produce, so the same type is used for parsing LM output and for printing
//! results.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Maximum number of tags carried by a result.
pub const MAX_TAGS: usize = 8;

/// Which external AI CLI handles a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[default]
    Default,
    Alternate,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Default => "default",
            Provider::Alternate => "alternate",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A caller-owned refinement request. The pipeline only borrows it.
#[derive(Debug, Clone, Default)]
pub struct RefinementRequest {
    pub prompt: String,
    pub context: Option<String>,
    pub tags: Vec<String>,
    pub provider: Provider,
    pub model: Option<String>,
}

impl RefinementRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMetadata {
    pub sections: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub checklist: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinedResult {
    pub improved_prompt: String,
    pub rationale: String,
    pub risks: Vec<String>,
    pub tags: Vec<String>,
    pub metadata: TemplateMetadata,
}

/// Validate an untrusted JSON value against the `RefinedResult` shape.
///
/// Every missing key or wrongly typed element is reported, not just the first,
/// so rejections can be logged in full. Unknown keys are ignored.
pub fn validate_refined(value: &Value) -> Result<RefinedResult, Vec<String>> {
    let mut reasons = Vec::new();
    let Some(object) = value.as_object() else {
        return Err(vec!["response is not a JSON object".to_string()]);
    };

    for key in ["improvedPrompt", "rationale"] {
        match object.get(key) {
            Some(Value::String(_)) => {}
            Some(_) => reasons.push(format!("{key} must be a string")),
            None => reasons.push(format!("missing {key}")),
        }
    }
    for key in ["risks", "tags"] {
        check_string_array(object.get(key), key, &mut reasons);
    }
    match object.get("metadata") {
        Some(Value::Object(metadata)) => {
            for key in ["sections", "acceptanceCriteria", "checklist"] {
                check_string_array(metadata.get(key), &format!("metadata.{key}"), &mut reasons);
            }
        }
        Some(_) => reasons.push("metadata must be an object".to_string()),
        None => reasons.push("missing metadata".to_string()),
    }

    if !reasons.is_empty() {
        return Err(reasons);
    }
    serde_json::from_value(value.clone()).map_err(|err| vec![format!("decode result: {err}")])
}

fn check_string_array(value: Option<&Value>, label: &str, reasons: &mut Vec<String>) {
    match value {
        Some(Value::Array(items)) => {
            if let Some(idx) = items.iter().position(|item| !item.is_string()) {
                reasons.push(format!("{label}[{idx}] must be a string"));
            }
        }
        Some(_) => reasons.push(format!("{label} must be an array of strings")),
        None => reasons.push(format!("missing {label}")),
    }
}
