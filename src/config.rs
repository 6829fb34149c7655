//! Engine-wide configuration: timeouts, concurrency, and partial-result
//! policy. Mirrors the builder convention used by the provider layer's
//! own client configs — a plain struct with `with_*` setters and a
//! `Default` impl carrying production defaults.

use std::time::Duration;

/// Tunable knobs for a [`crate::scheduler::DeliberationScheduler`].
///
/// Construct with [`EngineConfig::default`] and adjust with the `with_*`
/// setters; all fields have conservative defaults suitable for
/// production use without further configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Overall wall-clock budget for one `deliberate` call.
    pub request_timeout: Duration,
    /// Budget for one iteration (one round across the full panel).
    pub model_timeout: Duration,
    /// Budget for a single adapter `generate` call (one sample).
    pub provider_call_timeout: Duration,
    /// Budget for the final justifier synthesis call.
    pub justifier_timeout: Duration,
    /// Minimum fraction of panel members that must produce a usable
    /// sample in an iteration before the iteration is abandoned.
    pub min_successful_models_fraction: f64,
    /// Whether a request may still return a result when some panel
    /// members failed, provided the success fraction threshold holds.
    pub allow_partial_results: bool,
    /// Upper bound passed to adapters as `max_output_tokens` for
    /// reasoning-capable models.
    pub reasoning_model_max_output_tokens: u32,
    /// Largest single decoded attachment the pipeline will accept.
    pub max_attachment_bytes: usize,
    /// Maximum number of adapter calls in flight at once across the
    /// whole deliberation. `None` means unbounded (one call per
    /// panel-member-sample scheduled at once).
    pub max_concurrent_calls: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(240_000),
            model_timeout: Duration::from_millis(120_000),
            provider_call_timeout: Duration::from_millis(90_000),
            justifier_timeout: Duration::from_millis(45_000),
            min_successful_models_fraction: 0.5,
            allow_partial_results: true,
            reasoning_model_max_output_tokens: 16_000,
            max_attachment_bytes: 20 * 1024 * 1024,
            max_concurrent_calls: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_model_timeout_ms(mut self, ms: u64) -> Self {
        self.model_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_provider_call_timeout_ms(mut self, ms: u64) -> Self {
        self.provider_call_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_justifier_timeout_ms(mut self, ms: u64) -> Self {
        self.justifier_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_min_successful_models_fraction(mut self, fraction: f64) -> Self {
        self.min_successful_models_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn with_allow_partial_results(mut self, allow: bool) -> Self {
        self.allow_partial_results = allow;
        self
    }

    pub fn with_reasoning_model_max_output_tokens(mut self, tokens: u32) -> Self {
        self.reasoning_model_max_output_tokens = tokens;
        self
    }

    pub fn with_max_attachment_bytes(mut self, bytes: usize) -> Self {
        self.max_attachment_bytes = bytes;
        self
    }

    pub fn with_max_concurrent_calls(mut self, limit: usize) -> Self {
        self.max_concurrent_calls = Some(limit.max(1));
        self
    }

    /// The effective permit count for a deliberation's semaphore, given a
    /// panel whose samples-per-iteration total is `total_samples`.
    pub fn effective_concurrency(&self, total_samples: usize) -> usize {
        self.max_concurrent_calls.unwrap_or(total_samples).max(1)
    }
}
