//! Packages the scheduler's final aggregate, justification, and
//! per-member records into the canonical [`Response`] document.
//!
//! `assemble` is a pure function, mirroring the teacher's style of
//! keeping response construction free of I/O or mutable shared state —
//! the same shape as `CompletionResponse` being built fresh from a
//! parsed API response rather than mutated in place.

use chrono::Utc;

use crate::model::{ModelSampleResult, Outcomes, ResponseMetadata, Response, ScoreEntry, ScoreVector, Warning};

/// Assemble the final [`Response`].
///
/// `final_aggregate` is `None` on catastrophic/threshold failure, in
/// which case `scores` is empty and `justification` is empty per §7/§8
/// invariant 4 (`success_threshold_met` iff no `error` is set).
#[allow(clippy::too_many_arguments)]
pub fn assemble(
    final_aggregate: Option<ScoreVector>,
    justification: String,
    outcomes: &Outcomes,
    model_results: Vec<ModelSampleResult>,
    warnings: Vec<Warning>,
    total_duration_ms: u64,
    success_threshold_met: bool,
    error: Option<String>,
) -> Response {
    let scores = match final_aggregate {
        Some(aggregate) => outcomes
            .iter()
            .zip(aggregate.0.iter())
            .map(|(outcome, score)| ScoreEntry {
                outcome: outcome.clone(),
                score: *score,
            })
            .collect(),
        None => Vec::new(),
    };

    let models_requested = model_results.len();
    let models_successful = model_results
        .iter()
        .filter(|r| matches!(r.status, crate::model::SampleStatus::Success))
        .count();
    let models_failed = models_requested - models_successful;

    Response {
        scores,
        justification,
        timestamp: Utc::now(),
        metadata: ResponseMetadata {
            models_requested,
            models_successful,
            models_failed,
            success_threshold_met,
            total_duration_ms,
        },
        model_results,
        warnings,
        error,
    }
}
