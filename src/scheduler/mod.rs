//! The deliberation scheduler (C4): runs `iterations` rounds of panel
//! consultation under the four-level timeout hierarchy, aggregates with
//! caller-supplied weights, and synthesizes the final justification.
//!
//! Per-member, per-sample fan-out is built on the teacher's
//! `llm::batch::BatchExecutor` pattern — a `Semaphore` bounds concurrent
//! adapter calls and `futures::future::join_all` gathers one round's
//! sample futures — but unlike the batch executor, no retries happen at
//! this level (§4.4.4's at-most-once property); an adapter that wants
//! retries owns that itself, under its own `providerCall` budget.

pub mod aggregate;
pub mod budgets;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::attachment::{self, ArchiveTransport};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::model::{
    Attachment, IterationRecord, MemberJustification, ModelSampleResult, Outcomes, PanelMember, Request, Response,
    SampleStatus, Severity, Warning,
};
use crate::parser;
use crate::provider::{AdapterError, GenerateOptions, ProviderRegistry};
use budgets::{BudgetOutcome, BudgetScope};

use crate::model::ScoreVector;

/// A long-lived scheduler: one `ProviderRegistry` and `EngineConfig`,
/// reused across many `deliberate` calls — matching the teacher's
/// `MultiProviderClient`/`BatchExecutor`, constructed once rather than
/// rebuilt per request.
pub struct DeliberationScheduler {
    registry: ProviderRegistry,
    config: EngineConfig,
    transport: Option<Arc<dyn ArchiveTransport>>,
}

impl DeliberationScheduler {
    pub fn new(registry: ProviderRegistry, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            transport: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn ArchiveTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Run one deliberation to completion. Returns `Err` for validation
    /// and attachment failures raised before any adapter call; returns
    /// `Ok(Response)` with `Response.error` populated for threshold and
    /// catastrophic-transport failures, since those are legitimate
    /// outcomes of a well-formed request the host must still be able to
    /// persist (§7).
    #[instrument(skip(self, request), fields(iterations))]
    pub async fn deliberate(&self, request: Request) -> Result<Response> {
        request.validate()?;
        let started = Instant::now();

        let materialized = match &request.archive_reference {
            Some(reference_str) => {
                let transport = self
                    .transport
                    .as_ref()
                    .ok_or_else(|| Error::bad_request("archive_reference given but no ArchiveTransport is configured"))?;
                let reference = attachment::parse_reference(reference_str);
                Some(attachment::materialize(transport.as_ref(), &reference, self.config.max_attachment_bytes).await?)
            }
            None => None,
        };

        let prompt = match &materialized {
            Some(m) => m.prompt.clone(),
            None => request
                .prompt
                .clone()
                .ok_or_else(|| Error::bad_request("no prompt supplied by caller or archive"))?,
        };

        let attachments = match &materialized {
            Some(m) => m.attachments.clone(),
            None => request.attachments.clone(),
        };

        let outcomes: Outcomes = request
            .outcomes
            .clone()
            .or_else(|| materialized.as_ref().and_then(|m| m.inherited_outcomes.clone()))
            .ok_or_else(|| Error::bad_request("no outcomes supplied by caller or archive manifest"))?;
        if outcomes.len() < 2 {
            return Err(Error::OutcomesTooFew(outcomes.len()));
        }

        let panel: Vec<PanelMember> = request
            .panel
            .clone()
            .or_else(|| materialized.as_ref().and_then(|m| m.inherited_panel.clone()))
            .ok_or_else(|| Error::bad_request("no panel supplied by caller or archive manifest"))?;
        crate::model::validate_panel(&panel)?;

        let iterations = request
            .iterations
            .or_else(|| materialized.as_ref().and_then(|m| m.inherited_iterations))
            .unwrap_or(1);
        if iterations == 0 {
            return Err(Error::bad_request("iterations must be at least 1"));
        }
        tracing::Span::current().record("iterations", iterations);

        for member in &panel {
            self.registry.get(&member.provider_id)?;
        }

        let mut warnings: Vec<Warning> = materialized
            .as_ref()
            .map(|m| {
                m.warnings
                    .iter()
                    .map(|w| Warning::new("manifest_warning", Severity::Warning, w.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let encoded_attachments: Vec<(String, Vec<u8>)> = attachments
            .iter()
            .map(|a| (a.media_type.clone(), a.bytes.clone()))
            .collect();

        let total_samples: usize = panel.iter().map(|m| m.count.max(1) as usize).sum();
        let semaphore = Arc::new(Semaphore::new(self.config.effective_concurrency(total_samples)));

        let root = BudgetScope::root(self.config.request_timeout);

        let mut previous_iteration: Option<IterationRecord> = None;
        let mut final_aggregate: Option<ScoreVector> = None;
        let mut final_iteration_record: Option<IterationRecord> = None;
        let mut model_results: Vec<ModelSampleResult> = Vec::new();
        let mut threshold_failure: Option<String> = None;

        for t in 0..iterations {
            if root.is_cancelled() {
                threshold_failure = Some("request timeout expired before all iterations completed".to_string());
                break;
            }

            let iteration_scope = root.child_unbounded();
            let iteration_prompt = render_iteration_prompt(&prompt, t, previous_iteration.as_ref());

            info!(iteration = t, "starting deliberation iteration");

            let member_futures = panel.iter().map(|member| {
                run_member(
                    &self.registry,
                    &iteration_scope,
                    Arc::clone(&semaphore),
                    member,
                    &iteration_prompt,
                    &encoded_attachments,
                    &outcomes,
                    self.config.provider_call_timeout,
                    self.config.model_timeout,
                    self.config.reasoning_model_max_output_tokens,
                )
            });
            let member_outcomes = join_all(member_futures).await;

            let mut member_vectors = Vec::with_capacity(panel.len());
            let mut weights = Vec::with_capacity(panel.len());
            let mut justifications = Vec::with_capacity(panel.len());
            let mut iteration_results = Vec::with_capacity(panel.len());
            let mut successful = 0usize;

            for (member, outcome) in panel.iter().zip(member_outcomes) {
                if matches!(outcome.sample_result.status, SampleStatus::Success) {
                    successful += 1;
                }
                match &outcome.vector {
                    Some(v) => member_vectors.push(v.clone()),
                    None => member_vectors.push(ScoreVector::uniform(outcomes.len())),
                }
                weights.push(member.weight);
                justifications.push(MemberJustification {
                    provider_id: member.provider_id.clone(),
                    model_id: member.model_id.clone(),
                    justification: outcome.justification.clone(),
                    failed: outcome.vector.is_none(),
                });
                iteration_results.push(outcome.sample_result);
                warnings.extend(outcome.warnings);
            }

            let aggregate = aggregate::weighted_floor_sum(&member_vectors, &weights)
                .ok_or_else(|| Error::Internal("weighted aggregation failed on a non-empty panel".to_string()))?;

            model_results = iteration_results;

            if !self.config.allow_partial_results {
                let failing: Vec<String> = panel
                    .iter()
                    .zip(model_results.iter())
                    .filter(|(_, r)| !matches!(r.status, SampleStatus::Success))
                    .map(|(m, _)| format!("{}/{}", m.provider_id, m.model_id))
                    .collect();
                if !failing.is_empty() {
                    warn!(iteration = t, "partial results disallowed and a panel member failed");
                    threshold_failure = Some(format!(
                        "insufficient_models: partial results are disabled and the following members did not succeed: {}",
                        failing.join(", ")
                    ));
                    break;
                }
            }

            if !aggregate::threshold_met(successful, panel.len(), self.config.min_successful_models_fraction) {
                let required = aggregate::required_successes(panel.len(), self.config.min_successful_models_fraction);
                let failing: Vec<String> = panel
                    .iter()
                    .zip(justifications.iter())
                    .filter(|(_, j)| j.failed)
                    .map(|(m, _)| format!("{}/{}", m.provider_id, m.model_id))
                    .collect();
                warn!(iteration = t, successful, required, "success threshold not met");
                threshold_failure = Some(format!(
                    "insufficient_models: {successful}/{} (minimum required: {required}). Failures: {}",
                    panel.len(),
                    failing.join(", ")
                ));
                break;
            }

            final_aggregate = Some(aggregate);
            let record = IterationRecord { justifications };
            final_iteration_record = Some(record.clone());
            previous_iteration = Some(record);
        }

        let total_duration_ms = started.elapsed().as_millis() as u64;

        if let Some(message) = threshold_failure {
            return Ok(crate::assembler::assemble(
                None,
                String::new(),
                &outcomes,
                model_results,
                warnings,
                total_duration_ms,
                false,
                Some(message),
            ));
        }

        let final_aggregate = final_aggregate.expect("loop completed without threshold failure implies an aggregate");
        let final_iteration_record = final_iteration_record.expect("aggregate implies a recorded iteration");

        let justifier_scope = root.child(self.config.justifier_timeout);
        let justification = match &request.justifier_model {
            Some(justifier) => {
                match try_justify(&self.registry, &justifier_scope, justifier, &outcomes, &final_aggregate, &final_iteration_record, self.config.reasoning_model_max_output_tokens).await {
                    Some(text) => text,
                    None => {
                        warnings.push(Warning::new(
                            "justifier_fallback",
                            Severity::Warning,
                            "justifier model failed or timed out; falling back to per-member justifications",
                        ));
                        render_member_blocks(&final_iteration_record)
                    }
                }
            }
            None => {
                warnings.push(Warning::new(
                    "justifier_fallback",
                    Severity::Warning,
                    "no justifier model configured; falling back to per-member justifications",
                ));
                render_member_blocks(&final_iteration_record)
            }
        };

        Ok(crate::assembler::assemble(
            Some(final_aggregate),
            justification,
            &outcomes,
            model_results,
            warnings,
            total_duration_ms,
            true,
            None,
        ))
    }
}

/// Deterministic rendering of iteration `t`'s prompt (§4.4.2 step 1):
/// the raw prompt for `t = 0`, or the raw prompt followed by a rendering
/// of the previous iteration's per-member justifications for `t > 0`.
fn render_iteration_prompt(original_prompt: &str, iteration: u32, previous: Option<&IterationRecord>) -> String {
    match (iteration, previous) {
        (0, _) | (_, None) => original_prompt.to_string(),
        (_, Some(record)) => format!("{original_prompt}\n\n{}", render_member_blocks(record)),
    }
}

/// `From <providerId> - <modelId>:\n<justification>\n` blocks in
/// original panel order, in the same string-building style as the
/// teacher's `build_prompt`.
fn render_member_blocks(record: &IterationRecord) -> String {
    record
        .justifications
        .iter()
        .map(|j| format!("From {} - {}:\n{}\n", j.provider_id, j.model_id, j.justification))
        .collect::<Vec<_>>()
        .join("")
}

/// How one provider-call attempt ended, before folding into the member's
/// per-iteration vector.
enum SampleAttempt {
    Replied(String, Duration),
    AdapterError(AdapterError, Duration),
    Timeout(Duration),
}

/// One panel member's contribution to one iteration: its folded vector
/// (`None` if every sample failed or the member's `model` budget
/// expired), the justification text to carry into the next iteration's
/// prompt, a summarizing [`ModelSampleResult`] for the response, and any
/// warnings raised along the way.
struct MemberIterationOutcome {
    vector: Option<ScoreVector>,
    justification: String,
    sample_result: ModelSampleResult,
    warnings: Vec<Warning>,
}

#[allow(clippy::too_many_arguments)]
#[instrument(skip(registry, iteration_scope, semaphore, iteration_prompt, attachments, outcomes), fields(provider = %member.provider_id, model = %member.model_id))]
async fn run_member(
    registry: &ProviderRegistry,
    iteration_scope: &BudgetScope,
    semaphore: Arc<Semaphore>,
    member: &PanelMember,
    iteration_prompt: &str,
    attachments: &[(String, Vec<u8>)],
    outcomes: &Outcomes,
    provider_call_timeout: Duration,
    model_timeout: Duration,
    max_output_tokens: u32,
) -> MemberIterationOutcome {
    let label = format!("{}/{}", member.provider_id, member.model_id);
    let started = Instant::now();
    let model_scope = iteration_scope.child(model_timeout);

    // Registry lookup was already validated before the iteration loop
    // began; an adapter can still be missing here only if the registry
    // was mutated concurrently, which this crate does not support.
    let adapter = match registry.get(&member.provider_id) {
        Ok(adapter) => adapter,
        Err(e) => {
            return MemberIterationOutcome {
                vector: None,
                justification: format!("LLM_ERROR: {e}"),
                sample_result: ModelSampleResult {
                    provider_id: member.provider_id.clone(),
                    model_id: member.model_id.clone(),
                    status: SampleStatus::Failed,
                    duration: Duration::ZERO,
                    raw_text: None,
                    parsed: None,
                    error_type: None,
                    error_code: None,
                    http_status: None,
                    error_message: Some(e.to_string()),
                },
                warnings: vec![Warning::new("model_failure", Severity::Warning, e.to_string()).with_model(label)],
            };
        }
    };

    let count = member.count.max(1) as usize;
    let sample_futures = (0..count).map(|_| {
        let adapter = Arc::clone(&adapter);
        let model_scope = model_scope.clone();
        let semaphore = Arc::clone(&semaphore);
        let prompt = iteration_prompt.to_string();
        let model_id = member.model_id.clone();
        let attachments = attachments.to_vec();

        async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed unexpectedly");
            let provider_call_scope = model_scope.child(provider_call_timeout);
            let call_started = Instant::now();
            let options = GenerateOptions::new(model_id, prompt, max_output_tokens).with_attachments(attachments);
            match provider_call_scope.run(adapter.generate(options)).await {
                BudgetOutcome::Completed(Ok(reply)) => SampleAttempt::Replied(reply.text, call_started.elapsed()),
                BudgetOutcome::Completed(Err(err)) => SampleAttempt::AdapterError(err, call_started.elapsed()),
                BudgetOutcome::Expired | BudgetOutcome::Cancelled => SampleAttempt::Timeout(provider_call_timeout),
            }
        }
    });

    let joined = model_scope.run(join_all(sample_futures)).await;

    let attempts = match joined {
        BudgetOutcome::Completed(attempts) => attempts,
        BudgetOutcome::Expired => {
            debug!("member model budget expired; cancelling remaining samples");
            return MemberIterationOutcome {
                vector: None,
                justification: "LLM_ERROR: model budget expired before any sample completed".to_string(),
                sample_result: ModelSampleResult {
                    provider_id: member.provider_id.clone(),
                    model_id: member.model_id.clone(),
                    status: SampleStatus::Timeout,
                    duration: model_timeout,
                    raw_text: None,
                    parsed: None,
                    error_type: Some(crate::model::ErrorType::Timeout),
                    error_code: None,
                    http_status: None,
                    error_message: Some("model budget expired".to_string()),
                },
                warnings: vec![],
            };
        }
        BudgetOutcome::Cancelled => {
            return MemberIterationOutcome {
                vector: None,
                justification: "LLM_ERROR: deliberation cancelled before this member completed".to_string(),
                sample_result: ModelSampleResult {
                    provider_id: member.provider_id.clone(),
                    model_id: member.model_id.clone(),
                    status: SampleStatus::Timeout,
                    duration: started.elapsed(),
                    raw_text: None,
                    parsed: None,
                    error_type: Some(crate::model::ErrorType::Timeout),
                    error_code: None,
                    http_status: None,
                    error_message: Some("parent budget cancelled this member".to_string()),
                },
                warnings: vec![],
            };
        }
    };

    let mut sample_vectors = Vec::new();
    let mut any_success = false;
    let mut any_parsing_error = false;
    let mut any_timeout = false;
    let mut chosen_justification: Option<String> = None;
    let mut representative_duration = Duration::ZERO;
    let mut last_raw_text: Option<String> = None;
    let mut first_adapter_error: Option<AdapterError> = None;
    let mut warnings = Vec::new();

    for attempt in attempts {
        match attempt {
            SampleAttempt::Replied(text, duration) => {
                representative_duration = representative_duration.max(duration);
                match parser::parse_reply(&text, outcomes) {
                    Some(parsed) => {
                        any_success = true;
                        chosen_justification.get_or_insert_with(|| parsed.justification.clone());
                        sample_vectors.push(parsed.score);
                    }
                    None => {
                        any_parsing_error = true;
                        sample_vectors.push(ScoreVector::uniform(outcomes.len()));
                        chosen_justification.get_or_insert_with(|| format!("LLM_ERROR: {text}"));
                        warnings.push(
                            Warning::new("model_failure", Severity::Warning, format!("could not parse reply from {label}"))
                                .with_model(label.clone()),
                        );
                    }
                }
                last_raw_text = Some(text);
            }
            SampleAttempt::AdapterError(err, duration) => {
                representative_duration = representative_duration.max(duration);
                chosen_justification.get_or_insert_with(|| format!("LLM_ERROR: {}", err.message));
                warnings.push(Warning::new("model_failure", Severity::Warning, err.message.clone()).with_model(label.clone()));
                first_adapter_error.get_or_insert(err);
            }
            SampleAttempt::Timeout(duration) => {
                representative_duration = representative_duration.max(duration);
                any_timeout = true;
                chosen_justification.get_or_insert_with(|| "LLM_ERROR: provider call timed out".to_string());
            }
        }
    }

    let vector = if sample_vectors.is_empty() {
        None
    } else {
        aggregate::floor_mean(&sample_vectors)
    };

    let status = if any_success {
        SampleStatus::Success
    } else if any_parsing_error {
        SampleStatus::ParsingError
    } else if any_timeout {
        SampleStatus::Timeout
    } else {
        SampleStatus::Failed
    };

    let justification = chosen_justification.unwrap_or_else(|| "LLM_ERROR: no sample produced a reply".to_string());

    let sample_result = ModelSampleResult {
        provider_id: member.provider_id.clone(),
        model_id: member.model_id.clone(),
        status,
        duration: representative_duration,
        raw_text: last_raw_text,
        parsed: None,
        error_type: first_adapter_error.as_ref().map(|e| e.error_type),
        error_code: first_adapter_error.as_ref().and_then(|e| e.code.clone()),
        http_status: first_adapter_error.as_ref().and_then(|e| e.http_status),
        error_message: first_adapter_error.as_ref().map(|e| e.message.clone()),
    };

    MemberIterationOutcome {
        vector,
        justification,
        sample_result,
        warnings,
    }
}

/// Build the justifier prompt and invoke the configured justifier model
/// under the `justifier` budget. Returns `None` on timeout or adapter
/// failure, in which case the caller falls back to concatenating the
/// final iteration's per-member justifications (§4.4.3).
async fn try_justify(
    registry: &ProviderRegistry,
    scope: &BudgetScope,
    justifier: &crate::model::JustifierModel,
    outcomes: &Outcomes,
    aggregate: &ScoreVector,
    record: &IterationRecord,
    max_output_tokens: u32,
) -> Option<String> {
    let adapter = registry.get(&justifier.provider_id).ok()?;
    let prompt = build_justifier_prompt(outcomes, aggregate, record);
    let options = GenerateOptions::new(justifier.model_id.clone(), prompt, max_output_tokens);

    match scope.run(adapter.generate(options)).await {
        BudgetOutcome::Completed(Ok(reply)) => Some(reply.text),
        BudgetOutcome::Completed(Err(_)) | BudgetOutcome::Expired | BudgetOutcome::Cancelled => None,
    }
}

fn build_justifier_prompt(outcomes: &Outcomes, aggregate: &ScoreVector, record: &IterationRecord) -> String {
    let mut prompt = String::from("Outcomes and final aggregate score:\n");
    for (outcome, score) in outcomes.iter().zip(aggregate.0.iter()) {
        prompt.push_str(&format!("- {outcome}: {score}\n"));
    }
    prompt.push_str("\nPanel justifications:\n");
    prompt.push_str(&render_member_blocks(record));
    prompt.push_str("\nSynthesize a concise final justification for this outcome distribution.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::{MockAdapter, ScriptedReply};
    use std::sync::Arc;

    fn registry_with(adapters: Vec<MockAdapter>) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for adapter in adapters {
            registry = registry.register(Arc::new(adapter));
        }
        registry
    }

    fn score_reply(score: &[u64]) -> String {
        format!(r#"{{"score": {score:?}, "justification": "because"}}"#)
    }

    fn base_request(outcomes: Vec<&str>, panel: Vec<PanelMember>) -> Request {
        Request {
            prompt: Some("Did the breach occur?".into()),
            outcomes: Some(outcomes.into_iter().map(String::from).collect()),
            panel: Some(panel),
            iterations: Some(1),
            ..Request::default()
        }
    }

    #[tokio::test]
    async fn s1_single_iteration_weighted_aggregate() {
        let registry = registry_with(vec![
            MockAdapter::new("a").with_reply(score_reply(&[400_000, 300_000, 200_000, 100_000])),
            MockAdapter::new("b").with_reply(score_reply(&[350_000, 250_000, 200_000, 200_000])),
            MockAdapter::new("c").with_reply(score_reply(&[300_000, 300_000, 200_000, 200_000])),
        ]);
        let scheduler = DeliberationScheduler::new(registry, EngineConfig::default());

        let request = base_request(
            vec!["o1", "o2", "o3", "o4"],
            vec![
                PanelMember::new("a", "m", 0.5),
                PanelMember::new("b", "m", 0.3),
                PanelMember::new("c", "m", 0.2),
            ],
        );

        let response = scheduler.deliberate(request).await.unwrap();
        let scores: Vec<u64> = response.scores.iter().map(|s| s.score).collect();
        assert_eq!(scores, vec![365_000, 285_000, 200_000, 150_000]);
        assert_eq!(scores.iter().sum::<u64>(), 1_000_000);
        assert!(response.metadata.success_threshold_met);
    }

    #[tokio::test]
    async fn s2_iterative_feedback_seeds_next_prompt() {
        let registry = registry_with(vec![
            MockAdapter::new("a").with_script(vec![
                ScriptedReply::Text(score_reply(&[600_000, 400_000])),
                ScriptedReply::Text(score_reply(&[700_000, 300_000])),
            ]),
            MockAdapter::new("b").with_script(vec![
                ScriptedReply::Text(score_reply(&[550_000, 450_000])),
                ScriptedReply::Text(score_reply(&[650_000, 350_000])),
            ]),
        ]);
        let scheduler = DeliberationScheduler::new(registry, EngineConfig::default());

        let request = Request {
            iterations: Some(2),
            ..base_request(vec!["yes", "no"], vec![PanelMember::new("a", "m", 0.6), PanelMember::new("b", "m", 0.4)])
        };

        let response = scheduler.deliberate(request).await.unwrap();
        let scores: Vec<u64> = response.scores.iter().map(|s| s.score).collect();
        assert_eq!(scores, vec![680_000, 320_000]);
    }

    #[tokio::test]
    async fn s3_malformed_reply_falls_back_to_uniform() {
        let registry = registry_with(vec![
            MockAdapter::new("a").with_reply(score_reply(&[700_000, 300_000])),
            MockAdapter::new("b").with_reply("I cannot comply."),
        ]);
        let scheduler = DeliberationScheduler::new(registry, EngineConfig::default());

        let request = base_request(vec!["yes", "no"], vec![PanelMember::new("a", "m", 0.6), PanelMember::new("b", "m", 0.4)]);
        let response = scheduler.deliberate(request).await.unwrap();

        let scores: Vec<u64> = response.scores.iter().map(|s| s.score).collect();
        assert_eq!(scores, vec![520_000, 480_000]);
        assert!(response
            .warnings
            .iter()
            .any(|w| w.warning_type == "model_failure" && matches!(w.severity, Severity::Warning)));
        let b_result = response.model_results.iter().find(|r| r.provider_id == "b").unwrap();
        assert!(matches!(b_result.status, SampleStatus::ParsingError));
    }

    #[tokio::test]
    async fn s6_count_parameter_averages_samples() {
        let registry = registry_with(vec![MockAdapter::new("a").with_script(vec![
            ScriptedReply::Text(score_reply(&[650_000, 350_000])),
            ScriptedReply::Text(score_reply(&[550_000, 450_000])),
        ])]);
        let scheduler = DeliberationScheduler::new(registry, EngineConfig::default());

        let request = base_request(vec!["yes", "no"], vec![PanelMember::new("a", "m", 1.0).with_count(2)]);
        let response = scheduler.deliberate(request).await.unwrap();
        let scores: Vec<u64> = response.scores.iter().map(|s| s.score).collect();
        assert_eq!(scores, vec![600_000, 400_000]);
    }

    #[tokio::test]
    async fn threshold_failure_returns_in_band_error() {
        let registry = registry_with(vec![
            MockAdapter::new("a").with_failure(crate::model::ErrorType::ProviderError, "down"),
            MockAdapter::new("b").with_failure(crate::model::ErrorType::ProviderError, "down"),
            MockAdapter::new("c").with_reply(score_reply(&[500_000, 500_000])),
        ]);
        let config = EngineConfig::default().with_min_successful_models_fraction(0.5);
        let scheduler = DeliberationScheduler::new(registry, config);

        let request = base_request(
            vec!["yes", "no"],
            vec![
                PanelMember::new("a", "m", 0.34),
                PanelMember::new("b", "m", 0.33),
                PanelMember::new("c", "m", 0.33),
            ],
        );
        let response = scheduler.deliberate(request).await.unwrap();
        assert!(!response.metadata.success_threshold_met);
        assert!(response.scores.is_empty());
        assert!(response.justification.is_empty());
        assert!(response.error.as_deref().unwrap().starts_with("insufficient_models"));
    }

    #[tokio::test]
    async fn s4_hanging_member_does_not_delay_other_members() {
        let registry = registry_with(vec![
            MockAdapter::new("a").with_reply(score_reply(&[600_000, 400_000])),
            MockAdapter::new("b").with_script(vec![ScriptedReply::Delay(
                Duration::from_millis(500),
                score_reply(&[100_000, 900_000]),
            )]),
        ]);
        let config = EngineConfig::default().with_model_timeout_ms(30);
        let scheduler = DeliberationScheduler::new(registry, config);

        let request = base_request(vec!["yes", "no"], vec![PanelMember::new("a", "m", 0.5), PanelMember::new("b", "m", 0.5)]);

        let started = Instant::now();
        let response = scheduler.deliberate(request).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(400), "hung member must not extend the request's wall time");

        let a_result = response.model_results.iter().find(|r| r.provider_id == "a").unwrap();
        assert!(matches!(a_result.status, SampleStatus::Success));

        let b_result = response.model_results.iter().find(|r| r.provider_id == "b").unwrap();
        assert!(matches!(b_result.status, SampleStatus::Timeout));
        assert_eq!(b_result.duration, Duration::from_millis(30));

        assert!(response.metadata.success_threshold_met);
    }

    #[tokio::test]
    async fn allow_partial_results_false_fails_on_any_member_failure() {
        let registry = registry_with(vec![
            MockAdapter::new("a").with_reply(score_reply(&[600_000, 400_000])),
            MockAdapter::new("b").with_failure(crate::model::ErrorType::ProviderError, "down"),
        ]);
        let config = EngineConfig::default().with_allow_partial_results(false);
        let scheduler = DeliberationScheduler::new(registry, config);

        let request = base_request(vec!["yes", "no"], vec![PanelMember::new("a", "m", 0.5), PanelMember::new("b", "m", 0.5)]);
        let response = scheduler.deliberate(request).await.unwrap();

        assert!(!response.metadata.success_threshold_met);
        assert!(response.error.as_deref().unwrap().contains("partial results are disabled"));
    }

    #[tokio::test]
    async fn unknown_provider_in_panel_is_a_hard_error() {
        let registry = registry_with(vec![MockAdapter::new("a")]);
        let scheduler = DeliberationScheduler::new(registry, EngineConfig::default());
        let request = base_request(vec!["yes", "no"], vec![PanelMember::new("nonexistent", "m", 1.0)]);
        assert!(matches!(scheduler.deliberate(request).await, Err(Error::BadRequest(_))));
    }

    #[tokio::test]
    async fn justifier_failure_falls_back_to_concatenated_justifications() {
        let registry = registry_with(vec![
            MockAdapter::new("a").with_reply(score_reply(&[600_000, 400_000])),
            MockAdapter::new("justifier").with_failure(crate::model::ErrorType::ProviderError, "down"),
        ]);
        let scheduler = DeliberationScheduler::new(registry, EngineConfig::default());

        let mut request = base_request(vec!["yes", "no"], vec![PanelMember::new("a", "m", 1.0)]);
        request.justifier_model = Some(crate::model::JustifierModel {
            provider_id: "justifier".into(),
            model_id: "m".into(),
        });

        let response = scheduler.deliberate(request).await.unwrap();
        assert!(response.justification.contains("From a - m:"));
        assert!(response.warnings.iter().any(|w| w.warning_type == "justifier_fallback"));
    }

    #[test]
    fn render_iteration_prompt_zero_is_raw_prompt() {
        assert_eq!(render_iteration_prompt("hello", 0, None), "hello");
    }

    #[test]
    fn render_iteration_prompt_seeds_previous_justifications() {
        let record = IterationRecord {
            justifications: vec![MemberJustification {
                provider_id: "a".into(),
                model_id: "m".into(),
                justification: "looks like yes".into(),
                failed: false,
            }],
        };
        let rendered = render_iteration_prompt("hello", 1, Some(&record));
        assert!(rendered.starts_with("hello"));
        assert!(rendered.contains("From a - m:\nlooks like yes\n"));
    }
}
