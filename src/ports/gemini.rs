//! Gemini adapter: structured JSON generation over the `generateContent`
//! REST endpoint.
//!
//! ## Retry Strategy
//!
//! Timeouts and HTTP 408/429/5xx from the Generative Language API are
//! transient under load. Retries use a linear backoff capped at 6 s
//! (`min(6.0, 1.2 * (attempt + 1))` seconds); anything else surfaces
//! immediately as a [`PortError`].

use crate::config::GeminiConfig;
use crate::error::{ExtractError, PortError};
use crate::ports::{LlmPort, Provenance};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

const GOOGLE_AI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const PROVIDER: &str = "gemini";
/// Char budgets for the user prompt and system instruction.
const MAX_PROMPT_CHARS: usize = 12_000;
const MAX_SYSTEM_CHARS: usize = 6_000;

/// Map a JSON-Schema `type` into Gemini's tag, noting `null` unions.
fn normalize_schema_type(type_value: Option<&Value>) -> (Option<&'static str>, bool) {
    fn map_one(name: &str) -> Option<&'static str> {
        match name.to_ascii_lowercase().as_str() {
            "object" => Some("OBJECT"),
            "array" => Some("ARRAY"),
            "string" => Some("STRING"),
            "number" => Some("NUMBER"),
            "integer" => Some("INTEGER"),
            "boolean" => Some("BOOLEAN"),
            "null" => Some("NULL"),
            _ => None,
        }
    }

    match type_value {
        Some(Value::String(name)) => (map_one(name), false),
        Some(Value::Array(items)) => {
            let types: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            let nullable = types.iter().any(|t| t.eq_ignore_ascii_case("null"));
            let first = types
                .iter()
                .find(|t| !t.eq_ignore_ascii_case("null"))
                .and_then(|t| map_one(t));
            (first, nullable)
        }
        _ => (None, false),
    }
}

/// Translate a JSON-Schema node into Gemini's `responseSchema` dialect.
///
/// Carries `required`/`description`/`format`/`enum` through, recurses into
/// `properties` and `items`, and drops everything else.
pub(crate) fn to_gemini_schema(node: &Value) -> Value {
    let Some(obj) = node.as_object() else {
        return json!({});
    };

    let mut out = Map::new();
    let (mapped, nullable) = normalize_schema_type(obj.get("type"));
    if let Some(tag) = mapped {
        out.insert("type".into(), json!(tag));
    }
    if nullable {
        out.insert("nullable".into(), json!(true));
    } else if let Some(Value::Bool(flag)) = obj.get("nullable") {
        out.insert("nullable".into(), json!(flag));
    }

    if let Some(Value::String(desc)) = obj.get("description") {
        out.insert("description".into(), json!(desc));
    }
    if let Some(Value::String(fmt)) = obj.get("format") {
        out.insert("format".into(), json!(fmt));
    }
    if let Some(Value::Array(options)) = obj.get("enum") {
        out.insert("enum".into(), json!(options));
    }
    if let Some(Value::Array(required)) = obj.get("required") {
        let names: Vec<&Value> = required.iter().filter(|v| v.is_string()).collect();
        out.insert("required".into(), json!(names));
    }

    if let Some(Value::Object(properties)) = obj.get("properties") {
        let translated: Map<String, Value> = properties
            .iter()
            .map(|(key, value)| (key.clone(), to_gemini_schema(value)))
            .collect();
        out.insert("properties".into(), Value::Object(translated));
    }

    match obj.get("items") {
        Some(items @ Value::Object(_)) => {
            out.insert("items".into(), to_gemini_schema(items));
        }
        Some(Value::Array(items)) => {
            if let Some(first @ Value::Object(_)) = items.first() {
                out.insert("items".into(), to_gemini_schema(first));
            }
        }
        _ => {}
    }

    Value::Object(out)
}

/// Cut a string at a char budget without splitting a code point.
fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Gemini-backed [`LlmPort`], text and media.
#[derive(Debug)]
pub struct GeminiLlm {
    client: reqwest::Client,
    api_key: String,
    model: String,
    timeout: Duration,
    max_retries: u32,
}

impl GeminiLlm {
    pub fn new(config: GeminiConfig) -> Result<Self, ExtractError> {
        if config.api_key.trim().is_empty() {
            return Err(ExtractError::InvalidConfig(
                "Gemini API key is empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExtractError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: config.api_key,
            model: config.model,
            timeout: config.timeout,
            max_retries: config.max_retries,
        })
    }

    fn generation_config(schema: &Value) -> Value {
        json!({
            "temperature": 0,
            "responseMimeType": "application/json",
            "responseSchema": to_gemini_schema(schema),
        })
    }

    async fn request_json(
        &self,
        mut payload: Value,
        system_prompt: Option<&str>,
    ) -> Result<Value, PortError> {
        payload["systemInstruction"] = json!({
            "parts": [{
                "text": truncate_chars(system_prompt.unwrap_or("Return strict JSON only."), MAX_SYSTEM_CHARS),
            }],
        });
        let url = format!("{GOOGLE_AI_BASE}/models/{}:generateContent", self.model);

        let mut attempt = 0u32;
        let body = loop {
            if attempt > 0 {
                let backoff = (1.2 * f64::from(attempt)).min(6.0);
                warn!(attempt, backoff_secs = backoff, "retrying Gemini request");
                tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
            }

            let response = self
                .client
                .post(&url)
                .query(&[("key", self.api_key.as_str())])
                .json(&payload)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        break resp.text().await.map_err(|e| PortError::Request {
                            provider: PROVIDER.into(),
                            detail: format!("reading response body: {e}"),
                        })?;
                    }
                    let detail = resp.text().await.unwrap_or_default();
                    if retryable_status(status.as_u16()) && attempt < self.max_retries {
                        attempt += 1;
                        continue;
                    }
                    return Err(PortError::Http {
                        provider: PROVIDER.into(),
                        status: status.as_u16(),
                        detail,
                    });
                }
                Err(e) if e.is_timeout() => {
                    if attempt < self.max_retries {
                        attempt += 1;
                        continue;
                    }
                    return Err(PortError::Timeout {
                        provider: PROVIDER.into(),
                        secs: self.timeout.as_secs(),
                    });
                }
                Err(e) => {
                    return Err(PortError::Request {
                        provider: PROVIDER.into(),
                        detail: e.to_string(),
                    });
                }
            }
        };

        let parsed: Value = serde_json::from_str(&body).map_err(|e| PortError::InvalidResponse {
            provider: PROVIDER.into(),
            detail: format!("response is not JSON: {e}"),
        })?;
        let invalid = |detail: &str| PortError::InvalidResponse {
            provider: PROVIDER.into(),
            detail: detail.to_string(),
        };

        let text = parsed
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .ok_or_else(|| invalid("response has no candidates"))?
            .pointer("/content/parts/0/text")
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| invalid("response part does not contain JSON text"))?;

        let mut data: Value = serde_json::from_str(text)
            .map_err(|e| invalid(&format!("structured output is not JSON: {e}")))?;
        let Some(obj) = data.as_object_mut() else {
            return Err(invalid("structured output is not a JSON object"));
        };
        obj.entry("provider").or_insert_with(|| json!(PROVIDER));
        obj.entry("model").or_insert_with(|| json!(self.model));
        debug!(model = %self.model, bytes = body.len(), "Gemini structured response parsed");
        Ok(data)
    }
}

#[async_trait]
impl LlmPort for GeminiLlm {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn provenance(&self) -> Provenance {
        Provenance::Real
    }

    fn model_name(&self) -> Option<&str> {
        Some(&self.model)
    }

    fn supports_media(&self) -> bool {
        true
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &Value,
        system_prompt: Option<&str>,
    ) -> Result<Value, PortError> {
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": truncate_chars(prompt, MAX_PROMPT_CHARS)}],
            }],
            "generationConfig": Self::generation_config(schema),
        });
        self.request_json(payload, system_prompt).await
    }

    async fn generate_structured_from_media(
        &self,
        prompt: &str,
        schema: &Value,
        media_bytes: &[u8],
        media_mime_type: &str,
        system_prompt: Option<&str>,
    ) -> Result<Value, PortError> {
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {"text": truncate_chars(prompt, MAX_PROMPT_CHARS)},
                    {"inlineData": {
                        "mimeType": media_mime_type,
                        "data": BASE64.encode(media_bytes),
                    }},
                ],
            }],
            "generationConfig": Self::generation_config(schema),
        });
        self.request_json(payload, system_prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_translation_maps_types_and_recurses() {
        let schema = json!({
            "type": "object",
            "required": ["questions"],
            "properties": {
                "questions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "orderIndex": {"type": "integer"},
                            "text": {"type": "string", "description": "question body"},
                        },
                    },
                },
                "note": {"type": ["string", "null"]},
            },
        });
        let out = to_gemini_schema(&schema);
        assert_eq!(out["type"], "OBJECT");
        assert_eq!(out["required"], json!(["questions"]));
        assert_eq!(out["properties"]["questions"]["type"], "ARRAY");
        assert_eq!(
            out["properties"]["questions"]["items"]["properties"]["orderIndex"]["type"],
            "INTEGER"
        );
        assert_eq!(
            out["properties"]["questions"]["items"]["properties"]["text"]["description"],
            "question body"
        );
        assert_eq!(out["properties"]["note"]["type"], "STRING");
        assert_eq!(out["properties"]["note"]["nullable"], true);
    }

    #[test]
    fn test_schema_translation_tolerates_junk() {
        assert_eq!(to_gemini_schema(&json!("not a schema")), json!({}));
        assert_eq!(to_gemini_schema(&json!(null)), json!({}));
        let out = to_gemini_schema(&json!({"type": "mystery"}));
        assert_eq!(out, json!({}));
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("한국어 시험", 3), "한국어");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[test]
    fn test_retryable_statuses() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(retryable_status(status));
        }
        assert!(!retryable_status(400));
        assert!(!retryable_status(401));
        assert!(!retryable_status(404));
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let err = GeminiLlm::new(GeminiConfig::new("  ")).expect_err("blank key");
        assert!(matches!(err, ExtractError::InvalidConfig(_)));
    }
}
