use chrono::{DateTime, Utc};
use log::{debug, error};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConverterError;
use crate::models::{lenient_timestamp, ConversionOutput, ConversionRequest, ConversionResult};

/// Shown when neither the server nor the transport gave anything better.
pub const FALLBACK_MESSAGE: &str = "Failed to convert prompt. Please try again.";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConvertPromptBody<'a> {
    text_prompt: &'a str,
    model: &'a str,
    use_emergent_key: bool,
    api_key: Option<&'a str>,
}

impl<'a> From<&'a ConversionRequest> for ConvertPromptBody<'a> {
    fn from(request: &'a ConversionRequest) -> Self {
        Self {
            text_prompt: &request.prompt_text,
            model: &request.model_id,
            use_emergent_key: !request.use_caller_credential,
            api_key: request.credential.as_deref(),
        }
    }
}

/// Envelope for both success and failure bodies. `detail` is what the
/// backend framework puts in non-2xx responses.
#[derive(Debug, Default, Deserialize)]
struct ConvertPromptResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<ConversionData>,
    #[serde(default)]
    error: Option<ErrorBody>,
    #[serde(default)]
    detail: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversionData {
    /// Opaque; `null` is a valid result.
    #[serde(default)]
    json_output: Value,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    original_prompt: Option<String>,
    #[serde(default)]
    processing_time: Option<f64>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    code: Option<String>,
}

/// Posts prompts to `POST {base}/api/convert-prompt`.
#[derive(Debug, Clone)]
pub struct ConversionClient {
    client: Client,
    base_url: String,
}

impl ConversionClient {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// One best-effort request: no retry, no idempotency key.
    pub async fn convert(&self, request: &ConversionRequest) -> ConversionResult {
        let url = format!("{}/api/convert-prompt", self.base_url);
        debug!(
            "POST {} (model: {}, caller key: {})",
            url, request.model_id, request.use_caller_credential
        );

        let resp = self
            .client
            .post(&url)
            .json(&ConvertPromptBody::from(request))
            .send()
            .await
            .map_err(|e| {
                error!("Conversion request failed: {}", e);
                ConverterError::Conversion(non_empty(e.to_string()).unwrap_or_else(|| FALLBACK_MESSAGE.to_string()))
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| {
            error!("Failed to read conversion response: {}", e);
            ConverterError::Conversion(non_empty(e.to_string()).unwrap_or_else(|| FALLBACK_MESSAGE.to_string()))
        })?;

        let result = interpret_response(status, &body, &request.model_id);
        if let Err(e) = &result {
            error!("Conversion failed: {}", e);
        }
        result
    }
}

/// Map a raw response to a result. Failure messages prefer, in order: the
/// server `detail`, the body's `error.message`, the transport or decode
/// error, then `FALLBACK_MESSAGE`.
pub fn interpret_response(status: StatusCode, body: &str, requested_model: &str) -> ConversionResult {
    let parsed: Result<ConvertPromptResponse, _> = serde_json::from_str(body);

    if !status.is_success() {
        let envelope = parsed.unwrap_or_default();
        let message = envelope
            .detail
            .as_ref()
            .and_then(detail_message)
            .or_else(|| envelope.error.and_then(|e| e.message).and_then(non_empty))
            .unwrap_or_else(|| format!("Request failed with status code {}", status.as_u16()));
        return Err(ConverterError::Conversion(message));
    }

    let envelope = parsed.map_err(|e| ConverterError::Conversion(format!("Invalid response from backend: {}", e)))?;

    if !envelope.success {
        let message = envelope
            .detail
            .as_ref()
            .and_then(detail_message)
            .or_else(|| envelope.error.and_then(|e| e.message).and_then(non_empty))
            .unwrap_or_else(|| FALLBACK_MESSAGE.to_string());
        return Err(ConverterError::Conversion(message));
    }

    let data = envelope
        .data
        .ok_or_else(|| ConverterError::Conversion(FALLBACK_MESSAGE.to_string()))?;
    Ok(ConversionOutput {
        json_output: data.json_output,
        model_used: data
            .model
            .and_then(non_empty)
            .unwrap_or_else(|| requested_model.to_string()),
        original_prompt: data.original_prompt,
        processing_time: data.processing_time,
        timestamp: data.timestamp,
    })
}

/// `detail` is a string for handled errors and a list of `{msg, ...}` for
/// request validation errors.
fn detail_message(detail: &Value) -> Option<String> {
    match detail {
        Value::String(s) => non_empty(s.clone()),
        Value::Array(items) => items
            .iter()
            .find_map(|item| item.get("msg").and_then(Value::as_str))
            .map(str::to_string)
            .and_then(non_empty),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() { None } else { Some(s) }
}
