//! Core data model shared by the parser, attachment pipeline, scheduler,
//! and result assembler: outcomes, fixed-point scores, panel members,
//! requests, and the per-sample/per-iteration bookkeeping types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One-millionth unit: the fixed-point score convention used throughout.
pub const SCORE_UNIT_SUM: u64 = 1_000_000;

/// A fixed-point score vector over an outcome list.
///
/// Carries the invariant `sum(v) == SCORE_UNIT_SUM` once constructed
/// through [`ScoreVector::normalized`]; [`ScoreVector::raw`] allows
/// building an unchecked vector for intermediate arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreVector(pub Vec<u64>);

impl ScoreVector {
    /// Wrap a vector without checking the sum invariant.
    pub fn raw(values: Vec<u64>) -> Self {
        Self(values)
    }

    /// The near-uniform fallback vector for `k` outcomes (SPEC-4.2 fallback).
    ///
    /// `u[i] = floor(1_000_000 / k)` for `i < k - 1`, and the last
    /// coordinate absorbs the remainder so the sum is always exact.
    pub fn uniform(k: usize) -> Self {
        assert!(k > 0, "uniform fallback requires at least one outcome");
        let share = SCORE_UNIT_SUM / k as u64;
        let mut values = vec![share; k];
        let distributed: u64 = share * (k as u64 - 1);
        values[k - 1] = SCORE_UNIT_SUM - distributed;
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sum(&self) -> u64 {
        self.0.iter().sum()
    }

    /// Normalize in place so the sum is exactly `SCORE_UNIT_SUM` by adding
    /// the deficit (or removing the surplus) to the largest coordinate,
    /// ties broken by lowest index. Never rescales multiplicatively.
    ///
    /// Fails if any coordinate is negative (impossible for `u64`, kept for
    /// symmetry with the parser's validation) or if the vector is empty.
    pub fn normalize(mut self) -> Result<Self> {
        if self.0.is_empty() {
            return Err(Error::Internal("cannot normalize an empty score vector".into()));
        }
        let sum = self.sum();
        if sum == SCORE_UNIT_SUM {
            return Ok(self);
        }

        let (argmax, _) = self
            .0
            .iter()
            .enumerate()
            .max_by_key(|&(i, &v)| (v, std::cmp::Reverse(i)))
            .expect("non-empty vector has a max");

        if sum < SCORE_UNIT_SUM {
            self.0[argmax] += SCORE_UNIT_SUM - sum;
        } else {
            let surplus = sum - SCORE_UNIT_SUM;
            // Only ever called with well-formed positive-sum vectors from
            // this crate's own arithmetic, so the argmax coordinate always
            // has enough mass to absorb a surplus.
            self.0[argmax] = self.0[argmax].saturating_sub(surplus);
        }
        Ok(self)
    }
}

/// An ordered, opaque outcome label list, `k >= 2`.
pub type Outcomes = Vec<String>;

/// One panel member: a provider/model pair, its aggregation weight, and
/// how many independent samples to draw from it per iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelMember {
    pub provider_id: String,
    pub model_id: String,
    pub weight: f64,
    #[serde(default = "default_count")]
    pub count: u32,
}

fn default_count() -> u32 {
    1
}

impl PanelMember {
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>, weight: f64) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            weight,
            count: 1,
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count.max(1);
        self
    }
}

/// A designated model invoked once per deliberation to synthesize the
/// final justification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JustifierModel {
    pub provider_id: String,
    pub model_id: String,
}

/// The kind of an attachment, used to route it to the right adapter
/// capability and extraction step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Text,
    Document,
    Pdf,
}

/// A single attachment, already decoded to raw bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub media_type: String,
    pub bytes: Vec<u8>,
    pub size_bytes: usize,
    /// Display name, if the archive's manifest supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Attachment {
    pub fn new(kind: AttachmentKind, media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        let size_bytes = bytes.len();
        Self {
            kind,
            media_type: media_type.into(),
            bytes,
            size_bytes,
            name: None,
        }
    }
}

/// An inbound deliberation request.
///
/// `prompt`/`outcomes`/`panel`/`iterations` may be omitted when
/// `archive_reference` is set and the referenced primary manifest
/// supplies them instead (§4.3 step 8: caller wins over manifest; if
/// neither gives outcomes, placeholders are synthesized). When
/// `archive_reference` is absent, `prompt`/`outcomes`/`panel` are
/// required and validated immediately by [`Request::validate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcomes: Option<Outcomes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel: Option<Vec<PanelMember>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// The `primaryCid[,bCid1,…,bCidN][:addendumText]` reference
    /// consumed by the attachment pipeline (§4.3). Mutually composable
    /// with an inline `prompt`: when both are absent, validation fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justifier_model: Option<JustifierModel>,
}

impl Request {
    /// Structural validation ahead of any adapter call (SPEC 4.4.2/7).
    ///
    /// Only checks fields the caller can supply directly; fields left to
    /// be inherited from an archive's manifest (outcomes, panel,
    /// iterations) are validated after inheritance is resolved, since
    /// they may be legitimately absent here. Count-of-bCID/manifest
    /// checks live in the attachment pipeline since they depend on
    /// archive contents.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.is_none() && self.archive_reference.is_none() {
            return Err(Error::bad_request("either prompt or archive_reference must be supplied"));
        }
        if let Some(outcomes) = &self.outcomes {
            if outcomes.len() < 2 {
                return Err(Error::OutcomesTooFew(outcomes.len()));
            }
        }
        if let Some(panel) = &self.panel {
            validate_panel(panel)?;
        }
        if let Some(iterations) = self.iterations {
            if iterations == 0 {
                return Err(Error::bad_request("iterations must be at least 1"));
            }
        }
        Ok(())
    }
}

/// Shared panel-weight validation, used both by [`Request::validate`]
/// (when the panel is supplied inline) and by the scheduler after
/// manifest inheritance resolves a panel.
pub fn validate_panel(panel: &[PanelMember]) -> Result<()> {
    if panel.is_empty() {
        return Err(Error::bad_request("panel must contain at least one member"));
    }
    let sum: f64 = panel.iter().map(|m| m.weight).sum();
    const TOLERANCE: f64 = 1e-2;
    if (sum - 1.0).abs() > TOLERANCE {
        return Err(Error::WeightsNotNormalized {
            sum,
            tolerance: TOLERANCE,
        });
    }
    Ok(())
}

/// The canonical error classification an adapter must map native errors
/// into (SPEC 4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Authentication,
    Authorization,
    RateLimit,
    ModelNotFound,
    ContentPolicy,
    TokenLimit,
    ProviderError,
    Timeout,
    Network,
    ParsingError,
    Unknown,
}

/// Status of one model sample within one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStatus {
    Success,
    Failed,
    Timeout,
    ParsingError,
}

/// A parsed `{score, justification}` pair recovered from a model reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedReply {
    pub score: ScoreVector,
    pub justification: String,
}

/// The outcome of one adapter invocation (one sample).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSampleResult {
    pub provider_id: String,
    pub model_id: String,
    pub status: SampleStatus,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed: Option<ParsedReply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

/// One panel member's contribution to the next iteration's prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberJustification {
    pub provider_id: String,
    pub model_id: String,
    pub justification: String,
    pub failed: bool,
}

/// The full record of one iteration, used to seed the next iteration's
/// prompt and to build the justifier prompt for the final iteration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IterationRecord {
    pub justifications: Vec<MemberJustification>,
}

/// Severity of a [`Warning`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A non-fatal diagnostic surfaced alongside (or instead of) a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warning {
    #[serde(rename = "type")]
    pub warning_type: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Warning {
    pub fn new(warning_type: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            warning_type: warning_type.into(),
            severity,
            message: message.into(),
            model: None,
            details: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// One outcome's final score, in the caller's outcome order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub outcome: String,
    pub score: u64,
}

/// Aggregate counters and the success-threshold verdict for the
/// response's `metadata` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub models_requested: usize,
    pub models_successful: usize,
    pub models_failed: usize,
    pub success_threshold_met: bool,
    pub total_duration_ms: u64,
}

/// The canonical deliberation result (§4.5).
///
/// Backward compatibility rule: consumers reading only `{scores,
/// justification, timestamp}` must keep working — every field beyond
/// those three is additive and optional on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub scores: Vec<ScoreEntry>,
    pub justification: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: ResponseMetadata,
    pub model_results: Vec<ModelSampleResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
