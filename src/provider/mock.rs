//! A scriptable in-memory adapter for scheduler and parser tests.
//!
//! Mirrors the teacher's `MockValidator`: canned responses, no network,
//! `#[cfg(test)]`-only construction helpers plus a small always-available
//! surface for doctests and integration tests outside this crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{AdapterError, GenerateOptions, GenerateReply, ProviderAdapter};
use crate::model::ErrorType;

/// What a [`MockAdapter`] should do on its next `generate` call.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Fail(ErrorType, String),
    /// Sleep past whatever timeout the caller races against, then return
    /// this text (only observable if the caller's timeout didn't fire).
    Delay(Duration, String),
}

/// A scriptable adapter: replies are consumed in order; once the script
/// is exhausted, the last entry is repeated.
pub struct MockAdapter {
    provider_id: String,
    script: Vec<ScriptedReply>,
    cursor: AtomicUsize,
}

impl MockAdapter {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            script: vec![ScriptedReply::Text(
                r#"{"score": [500000, 500000], "justification": "default mock reply"}"#.to_string(),
            )],
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn with_script(mut self, script: Vec<ScriptedReply>) -> Self {
        self.script = script;
        self
    }

    pub fn with_reply(mut self, text: impl Into<String>) -> Self {
        self.script = vec![ScriptedReply::Text(text.into())];
        self
    }

    pub fn with_failure(mut self, error_type: ErrorType, message: impl Into<String>) -> Self {
        self.script = vec![ScriptedReply::Fail(error_type, message.into())];
        self
    }

    fn next_scripted(&self) -> ScriptedReply {
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        let bounded = idx.min(self.script.len() - 1);
        self.script[bounded].clone()
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn generate(&self, _options: GenerateOptions) -> Result<GenerateReply, AdapterError> {
        match self.next_scripted() {
            ScriptedReply::Text(text) => Ok(GenerateReply { text }),
            ScriptedReply::Fail(error_type, message) => Err(AdapterError::new(error_type, message)),
            ScriptedReply::Delay(duration, text) => {
                tokio::time::sleep(duration).await;
                Ok(GenerateReply { text })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_mock_returns_parseable_reply() {
        let adapter = MockAdapter::new("mock");
        let reply = adapter
            .generate(GenerateOptions::new("mock-model", "prompt", 100))
            .await
            .unwrap();
        assert!(reply.text.contains("justification"));
    }

    #[tokio::test]
    async fn scripted_failure_surfaces_error_type() {
        let adapter = MockAdapter::new("mock").with_failure(ErrorType::RateLimit, "slow down");
        let err = adapter
            .generate(GenerateOptions::new("mock-model", "prompt", 100))
            .await
            .unwrap_err();
        assert!(matches!(err.error_type, ErrorType::RateLimit));
    }

    #[tokio::test]
    async fn script_exhaustion_repeats_last_entry() {
        let adapter = MockAdapter::new("mock").with_script(vec![
            ScriptedReply::Text("first".into()),
            ScriptedReply::Text("second".into()),
        ]);
        let opts = || GenerateOptions::new("m", "p", 10);
        assert_eq!(adapter.generate(opts()).await.unwrap().text, "first");
        assert_eq!(adapter.generate(opts()).await.unwrap().text, "second");
        assert_eq!(adapter.generate(opts()).await.unwrap().text, "second");
    }
}
