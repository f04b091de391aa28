use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{ConverterError, Result};

/// A model the backend can convert with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    pub provider: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ModelDescriptor {
    pub fn new(id: &str, display_name: &str, provider: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            provider: provider.to_string(),
            description: String::new(),
            capabilities: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Selector label, e.g. `GPT-4 (OpenAI)`.
    pub fn label(&self) -> String {
        format!("{} ({})", self.display_name, self.provider)
    }
}

/// One user submission. Built fresh per submit and dropped once the call
/// resolves; an instance always carries a non-blank prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest {
    pub prompt_text: String,
    pub model_id: String,
    pub use_caller_credential: bool,
    pub credential: Option<String>,
}

impl ConversionRequest {
    /// Validate the form input. The credential is only kept when
    /// `use_caller_credential` is set.
    pub fn new(
        prompt_text: &str,
        model_id: &str,
        use_caller_credential: bool,
        credential: Option<&str>,
    ) -> Result<Self> {
        if prompt_text.trim().is_empty() {
            return Err(ConverterError::Validation(
                "Please enter a text prompt to convert.".to_string(),
            ));
        }
        if model_id.trim().is_empty() {
            return Err(ConverterError::Validation(
                "Please select a model.".to_string(),
            ));
        }

        let credential = if use_caller_credential {
            match credential.map(str::trim) {
                Some(key) if !key.is_empty() => Some(key.to_string()),
                _ => {
                    return Err(ConverterError::Validation(
                        "Please enter your API key or switch back to the shared key.".to_string(),
                    ));
                }
            }
        } else {
            None
        };

        Ok(Self {
            prompt_text: prompt_text.to_string(),
            model_id: model_id.to_string(),
            use_caller_credential,
            credential,
        })
    }
}

/// Successful conversion. `json_output` is opaque: its shape belongs to the
/// backend and no key is assumed to exist.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOutput {
    pub json_output: Value,
    pub model_used: String,
    pub original_prompt: Option<String>,
    pub processing_time: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

pub type ConversionResult = Result<ConversionOutput>;

/// Past conversion as returned by the history endpoint. The store behind it
/// is schemaless, so every field is optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRecord {
    #[serde(default)]
    pub original_prompt: Option<String>,
    #[serde(default)]
    pub json_output: Option<Value>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub processing_time: Option<f64>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Accepts RFC 3339 and naive ISO timestamps (treated as UTC). Anything
/// unparseable becomes `None` instead of failing the whole payload.
pub(crate) fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
