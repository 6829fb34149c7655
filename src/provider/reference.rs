//! Reference provider adapters speaking Anthropic-shaped and
//! OpenAI-shaped completion APIs over `reqwest`.
//!
//! These exist so the crate is usable out of the box and so the
//! scheduler/parser/assembler have a realistic adapter to integration-test
//! against; most hosts will register their own `ProviderAdapter` that
//! talks to their actual vendor SDK instead. Gated behind the
//! `reference-adapters` feature since pulling in a full HTTP stack is a
//! host decision.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{AdapterError, GenerateOptions, GenerateReply, ImageMediaTypePolicy, ProviderAdapter};
use crate::model::ErrorType;

fn build_http_client(timeout: Duration) -> Client {
    match catch_unwind(AssertUnwindSafe(|| Client::builder().timeout(timeout).build())) {
        Ok(Ok(client)) => client,
        _ => Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .expect("building a no-proxy reqwest client should not fail"),
    }
}

fn status_to_error_type(status: u16) -> ErrorType {
    match status {
        401 => ErrorType::Authentication,
        403 => ErrorType::Authorization,
        404 => ErrorType::ModelNotFound,
        429 => ErrorType::RateLimit,
        413 | 400 => ErrorType::TokenLimit,
        500..=599 => ErrorType::ProviderError,
        _ => ErrorType::Unknown,
    }
}

/// A reference adapter for Anthropic's Messages API.
pub struct AnthropicReferenceAdapter {
    api_key: String,
    base_url: String,
    http: Client,
}

impl AnthropicReferenceAdapter {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            http: build_http_client(timeout),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    Image { source: AnthropicImageSource },
}

#[derive(Debug, Serialize)]
struct AnthropicImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponseContent {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

#[async_trait]
impl ProviderAdapter for AnthropicReferenceAdapter {
    fn provider_id(&self) -> &str {
        "anthropic"
    }

    fn image_media_type_policy(&self) -> ImageMediaTypePolicy {
        ImageMediaTypePolicy::Permissive
    }

    async fn generate(&self, options: GenerateOptions) -> Result<GenerateReply, AdapterError> {
        let mut content = vec![AnthropicContentBlock::Text {
            text: options.prompt,
        }];
        for (media_type, bytes) in &options.attachments {
            if !self.image_media_type_policy().accepts(media_type) {
                return Err(AdapterError::new(ErrorType::ContentPolicy, format!("unsupported image media type: {media_type}"))
                    .with_code("unsupported_image"));
            }
            if bytes.len() > super::MAX_IMAGE_BYTES {
                return Err(AdapterError::new(
                    ErrorType::ContentPolicy,
                    format!("image of {} bytes exceeds the {}-byte cap", bytes.len(), super::MAX_IMAGE_BYTES),
                )
                .with_code("file_too_large"));
            }
            content.push(AnthropicContentBlock::Image {
                source: AnthropicImageSource {
                    source_type: "base64",
                    media_type: media_type.clone(),
                    data: base64::engine::general_purpose::STANDARD.encode(bytes),
                },
            });
        }

        let body = AnthropicRequest {
            model: options.model_id,
            messages: vec![AnthropicMessage {
                role: "user",
                content,
            }],
            max_tokens: options.max_output_tokens,
        };

        let url = format!("{}/v1/messages", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::new(ErrorType::Network, e.to_string()))?;

        let status = response.status();
        let text_body = response
            .text()
            .await
            .map_err(|e| AdapterError::new(ErrorType::Network, format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            let error_type = status_to_error_type(status.as_u16());
            if let Ok(err) = serde_json::from_str::<AnthropicErrorBody>(&text_body) {
                return Err(AdapterError::new(error_type, err.error.message)
                    .with_code(err.error.error_type)
                    .with_http_status(status.as_u16()));
            }
            return Err(AdapterError::new(error_type, text_body).with_http_status(status.as_u16()));
        }

        let parsed: AnthropicResponse = serde_json::from_str(&text_body)
            .map_err(|e| AdapterError::new(ErrorType::ParsingError, format!("malformed response body: {e}")))?;

        let text = parsed
            .content
            .into_iter()
            .filter_map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(GenerateReply { text })
    }
}

/// A reference adapter for the OpenAI-shaped chat completions API
/// (also served by Azure OpenAI and many compatible providers).
pub struct OpenAiReferenceAdapter {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenAiReferenceAdapter {
    const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";

    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            http: build_http_client(timeout),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: Vec<OpenAiContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAiContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAiImageUrl },
}

#[derive(Debug, Serialize)]
struct OpenAiImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorBody {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

#[async_trait]
impl ProviderAdapter for OpenAiReferenceAdapter {
    fn provider_id(&self) -> &str {
        "openai"
    }

    fn image_media_type_policy(&self) -> ImageMediaTypePolicy {
        ImageMediaTypePolicy::Permissive
    }

    async fn generate(&self, options: GenerateOptions) -> Result<GenerateReply, AdapterError> {
        let mut content = vec![OpenAiContentPart::Text {
            text: options.prompt,
        }];
        for (media_type, bytes) in &options.attachments {
            if !self.image_media_type_policy().accepts(media_type) {
                return Err(AdapterError::new(ErrorType::ContentPolicy, format!("unsupported image media type: {media_type}"))
                    .with_code("unsupported_image"));
            }
            if bytes.len() > super::MAX_IMAGE_BYTES {
                return Err(AdapterError::new(
                    ErrorType::ContentPolicy,
                    format!("image of {} bytes exceeds the {}-byte cap", bytes.len(), super::MAX_IMAGE_BYTES),
                )
                .with_code("file_too_large"));
            }
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            content.push(OpenAiContentPart::ImageUrl {
                image_url: OpenAiImageUrl {
                    url: format!("data:{media_type};base64,{encoded}"),
                },
            });
        }

        let body = OpenAiRequest {
            model: options.model_id,
            messages: vec![OpenAiMessage {
                role: "user",
                content,
            }],
            max_tokens: options.max_output_tokens,
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::new(ErrorType::Network, e.to_string()))?;

        let status = response.status();
        let text_body = response
            .text()
            .await
            .map_err(|e| AdapterError::new(ErrorType::Network, format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            let error_type = status_to_error_type(status.as_u16());
            if let Ok(err) = serde_json::from_str::<OpenAiErrorBody>(&text_body) {
                let mut adapter_err = AdapterError::new(error_type, err.error.message).with_http_status(status.as_u16());
                if let Some(code) = err.error.error_type {
                    adapter_err = adapter_err.with_code(code);
                }
                return Err(adapter_err);
            }
            return Err(AdapterError::new(error_type, text_body).with_http_status(status.as_u16()));
        }

        let parsed: OpenAiResponse = serde_json::from_str(&text_body)
            .map_err(|e| AdapterError::new(ErrorType::ParsingError, format!("malformed response body: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(GenerateReply { text })
    }
}
