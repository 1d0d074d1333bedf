//! LLM port: schema-constrained JSON generation, optionally multimodal.

use crate::error::PortError;
use crate::ports::Provenance;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Structured-output language model.
///
/// Providers return schema-constrained JSON; a provider failure is a
/// [`PortError`], never malformed data. Media input is opt-in via
/// [`LlmPort::supports_media`] so callers can pick a strategy up front
/// instead of probing with a doomed request.
#[async_trait]
pub trait LlmPort: Send + Sync {
    fn name(&self) -> &str;
    fn provenance(&self) -> Provenance;

    /// Model identifier to stamp into question metadata, when known.
    fn model_name(&self) -> Option<&str> {
        None
    }

    /// Whether [`LlmPort::generate_structured_from_media`] is implemented.
    fn supports_media(&self) -> bool {
        false
    }

    /// Text-only structured generation against a JSON schema.
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &Value,
        system_prompt: Option<&str>,
    ) -> Result<Value, PortError>;

    /// Multimodal structured generation (image or document bytes).
    async fn generate_structured_from_media(
        &self,
        prompt: &str,
        schema: &Value,
        media_bytes: &[u8],
        media_mime_type: &str,
        system_prompt: Option<&str>,
    ) -> Result<Value, PortError> {
        let _ = (prompt, schema, media_bytes, media_mime_type, system_prompt);
        Err(PortError::MediaUnsupported {
            provider: self.name().to_string(),
        })
    }
}

/// Canned LLM for credential-less deployments and tests.
///
/// Echoes request shape instead of answering; the pipeline's provenance
/// gating keeps it away from refinement, so the echo is only ever seen by
/// diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockLlm;

#[async_trait]
impl LlmPort for MockLlm {
    fn name(&self) -> &str {
        "mock"
    }

    fn provenance(&self) -> Provenance {
        Provenance::Mock
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &Value,
        _system_prompt: Option<&str>,
    ) -> Result<Value, PortError> {
        let preview: String = prompt.chars().take(80).collect();
        let mut keys: Vec<&str> = schema
            .as_object()
            .map(|obj| obj.keys().map(String::as_str).collect())
            .unwrap_or_default();
        keys.sort_unstable();
        Ok(json!({
            "provider": "mock",
            "promptPreview": preview,
            "schemaKeys": keys,
        }))
    }
}
