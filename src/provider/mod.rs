//! Provider adapters: the seam between this crate and concrete LLM
//! backends.
//!
//! Generalizes the closed provider enum + `MultiProviderClient` registry
//! pattern into an open, string-keyed registry so hosts can register
//! adapters for providers this crate has never heard of, with canonical
//! id collapsing for common aliases (`"anthropic"` / `"claude"`, etc).

pub mod mock;
#[cfg(feature = "reference-adapters")]
pub mod reference;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::ErrorType;

pub use mock::MockAdapter;

/// `opts.reasoningEffort`/`opts.verbosity` from §4.1 — hints a backend
/// may ignore if it doesn't understand them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Low,
    Medium,
    High,
}

/// A single-sample generation request handed to a [`ProviderAdapter`].
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub model_id: String,
    pub prompt: String,
    /// Attachments already decoded and ready to inline, as
    /// `(media_type, bytes)` pairs; adapters decide how to encode them
    /// on the wire (e.g. base64 inline vs. file upload).
    pub attachments: Vec<(String, Vec<u8>)>,
    pub max_output_tokens: u32,
    /// Ignored by backends that do not understand it (§4.1).
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Ignored by backends that do not understand it (§4.1).
    pub verbosity: Option<Verbosity>,
}

impl GenerateOptions {
    pub fn new(model_id: impl Into<String>, prompt: impl Into<String>, max_output_tokens: u32) -> Self {
        Self {
            model_id: model_id.into(),
            prompt: prompt.into(),
            attachments: Vec::new(),
            max_output_tokens,
            reasoning_effort: None,
            verbosity: None,
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<(String, Vec<u8>)>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = Some(verbosity);
        self
    }
}

/// Raw text returned by one adapter call, before parsing.
#[derive(Debug, Clone)]
pub struct GenerateReply {
    pub text: String,
}

/// A classified adapter failure. Adapters are responsible for mapping
/// their native error surface (HTTP status, vendor error body, I/O
/// error) onto this taxonomy so the scheduler can reason about
/// retryability and the result assembler can report it uniformly.
#[derive(Debug, Clone)]
pub struct AdapterError {
    pub error_type: ErrorType,
    pub code: Option<String>,
    pub http_status: Option<u16>,
    pub message: String,
}

impl AdapterError {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            code: None,
            http_status: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.error_type, self.message)
    }
}

impl std::error::Error for AdapterError {}

/// One entry of a backend's model catalog (§4.1 `listModels`).
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub name: String,
    pub supports_images: bool,
    pub supports_attachments: bool,
}

/// Which image media types a backend's `generateWithImage` accepts
/// (§4.1): strict backends take only `jpeg`/`png`; permissive backends
/// also take `gif`/`webp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMediaTypePolicy {
    Strict,
    Permissive,
}

impl ImageMediaTypePolicy {
    pub fn accepts(&self, media_type: &str) -> bool {
        match self {
            ImageMediaTypePolicy::Strict => matches!(media_type, "image/jpeg" | "image/png"),
            ImageMediaTypePolicy::Permissive => {
                matches!(media_type, "image/jpeg" | "image/png" | "image/gif" | "image/webp")
            }
        }
    }
}

/// Decoded image size cap shared by every backend's `generateWithImage`
/// (§4.1: `file_too_large` past this many bytes).
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// A backend capable of producing one raw completion for one model.
///
/// Implementors own their own transport (HTTP client, SDK, in-memory
/// stub) and are responsible for classifying failures via
/// [`AdapterError`] rather than letting vendor-specific errors leak.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable identifier used as this adapter's registry key, e.g.
    /// `"anthropic"`.
    fn provider_id(&self) -> &str;

    /// Produce one completion. Implementations should not retry
    /// internally — the scheduler owns retry/timeout policy.
    async fn generate(&self, options: GenerateOptions) -> std::result::Result<GenerateReply, AdapterError>;

    /// This backend's model catalog, if it can enumerate one; an empty
    /// vec means "ask the adapter at call time" (no static catalog).
    fn list_models(&self) -> Vec<ModelDescriptor> {
        Vec::new()
    }

    fn supports_images(&self, model_id: &str) -> bool {
        self.list_models().iter().any(|m| m.name == model_id && m.supports_images)
    }

    fn supports_attachments(&self, model_id: &str) -> bool {
        self.list_models().iter().any(|m| m.name == model_id && m.supports_attachments)
    }

    /// Which image media types this backend accepts. Defaults to
    /// [`ImageMediaTypePolicy::Strict`]; permissive backends override it.
    fn image_media_type_policy(&self) -> ImageMediaTypePolicy {
        ImageMediaTypePolicy::Strict
    }

    /// Whether this backend accepts a given non-image attachment media
    /// type at all (`unsupported_attachment` otherwise). Defaults to
    /// accepting everything; a backend with a narrower policy overrides
    /// this.
    fn accepts_attachment_media_type(&self, _media_type: &str) -> bool {
        true
    }

    /// Model ids for which this backend handles PDF attachments natively
    /// (§4.1). For any other model, the `AttachmentPipeline` must
    /// substitute extracted text for a PDF before calling this adapter.
    fn native_pdf_models(&self) -> &[&str] {
        &[]
    }

    /// Generate with a single inline image. Fails with `unsupported_image`
    /// when `media_type` doesn't match [`Self::image_media_type_policy`],
    /// or `file_too_large` past [`MAX_IMAGE_BYTES`].
    async fn generate_with_image(
        &self,
        options: GenerateOptions,
        image_bytes: Vec<u8>,
        media_type: String,
    ) -> std::result::Result<GenerateReply, AdapterError> {
        if !self.image_media_type_policy().accepts(&media_type) {
            return Err(
                AdapterError::new(ErrorType::ContentPolicy, format!("unsupported image media type: {media_type}"))
                    .with_code("unsupported_image"),
            );
        }
        if image_bytes.len() > MAX_IMAGE_BYTES {
            return Err(AdapterError::new(
                ErrorType::ContentPolicy,
                format!("image of {} bytes exceeds the {MAX_IMAGE_BYTES}-byte cap", image_bytes.len()),
            )
            .with_code("file_too_large"));
        }
        let options = options.with_attachments(vec![(media_type, image_bytes)]);
        self.generate(options).await
    }

    /// Generate with zero or more non-image attachments. Fails with
    /// `unsupported_attachment` per [`Self::accepts_attachment_media_type`].
    async fn generate_with_attachments(
        &self,
        options: GenerateOptions,
        attachments: Vec<(String, Vec<u8>)>,
    ) -> std::result::Result<GenerateReply, AdapterError> {
        for (media_type, bytes) in &attachments {
            if !self.accepts_attachment_media_type(media_type) {
                return Err(AdapterError::new(
                    ErrorType::ContentPolicy,
                    format!("unsupported attachment media type: {media_type}"),
                )
                .with_code("unsupported_attachment"));
            }
            if bytes.len() > MAX_IMAGE_BYTES {
                return Err(AdapterError::new(
                    ErrorType::ContentPolicy,
                    format!("attachment of {} bytes exceeds the {MAX_IMAGE_BYTES}-byte cap", bytes.len()),
                )
                .with_code("file_too_large"));
            }
        }
        let mut options = options;
        options.attachments.extend(attachments);
        self.generate(options).await
    }
}

/// Maps provider aliases onto their canonical registry key.
fn canonicalize(provider_id: &str) -> String {
    let lower = provider_id.to_ascii_lowercase();
    match lower.as_str() {
        "claude" | "anthropic-api" => "anthropic".to_string(),
        "gpt" | "openai-api" | "azure-openai" => "openai".to_string(),
        "gemini" | "google-ai" => "google".to_string(),
        other => other.to_string(),
    }
}

/// An open registry of provider adapters, keyed by canonical provider id.
///
/// Unlike a closed enum, hosts can register adapters for arbitrary
/// provider ids at runtime; lookups collapse a handful of common
/// aliases onto a canonical key so panel configs can use whichever
/// spelling the caller prefers.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Register an adapter under its own `provider_id()` (after alias
    /// canonicalization).
    pub fn register(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        let key = canonicalize(adapter.provider_id());
        self.adapters.insert(key, adapter);
        self
    }

    pub fn get(&self, provider_id: &str) -> Result<Arc<dyn ProviderAdapter>> {
        let key = canonicalize(provider_id);
        self.adapters
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::bad_request(format!("unknown provider: {provider_id}")))
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.adapters.contains_key(&canonicalize(provider_id))
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockAdapter;

    #[test]
    fn canonicalize_collapses_known_aliases() {
        assert_eq!(canonicalize("claude"), "anthropic");
        assert_eq!(canonicalize("Claude"), "anthropic");
        assert_eq!(canonicalize("gpt"), "openai");
        assert_eq!(canonicalize("gemini"), "google");
        assert_eq!(canonicalize("mock"), "mock");
    }

    #[test]
    fn registry_lookup_resolves_aliases() {
        let registry = ProviderRegistry::new().register(Arc::new(MockAdapter::new("anthropic")));
        assert!(registry.get("claude").is_ok());
        assert!(registry.get("anthropic").is_ok());
        assert!(registry.get("openai").is_err());
    }
}
