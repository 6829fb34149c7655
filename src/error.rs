//! Error types for delib-core.

use thiserror::Error;

/// Result type alias using delib-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors surfaced before or instead of a deliberation result.
///
/// These map to the validation- and attachment-failure families from the
/// error handling design: they are raised before any adapter call, or
/// while materializing the request from its attachments, and always
/// abort the deliberation rather than degrading gracefully. Partial
/// per-sample failures never reach this type — they are recorded in
/// `ModelSampleResult` and folded into the aggregate instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Generic malformed request, not covered by a more specific variant.
    #[error("bad_request: {0}")]
    BadRequest(String),

    /// Fewer than two outcomes were supplied.
    #[error("outcomes_too_few: at least 2 outcomes are required, got {0}")]
    OutcomesTooFew(usize),

    /// Panel weights do not sum to 1.0 within tolerance.
    #[error("weights_not_normalized: panel weights sum to {sum}, expected 1.0 +/- {tolerance}")]
    WeightsNotNormalized { sum: f64, tolerance: f64 },

    /// The number of side archives didn't match `primary.bCIDs`.
    #[error("bcid_count_mismatch: expected {expected} side archives, got {actual}")]
    BcidCountMismatch { expected: usize, actual: usize },

    /// `manifest.json` is missing a required field or is unparseable.
    #[error("manifest_invalid: {0}")]
    ManifestInvalid(String),

    /// A manifest's `primary` entry names only a content id, not a filename.
    #[error("external_primary_unsupported: primary manifest entries must name a file")]
    ExternalPrimaryUnsupported,

    /// A side archive could not be fetched.
    #[error("bcid_fetch_failed: failed to fetch side archive {content_id}: {message}")]
    BcidFetchFailed { content_id: String, message: String },

    /// No archive at all was reachable.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Too few panel members succeeded in an iteration to proceed.
    #[error("insufficient_models: {0}")]
    InsufficientModels(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Archive extraction (zip) error.
    #[error("archive error: {0}")]
    Archive(String),

    /// Internal invariant violation; should not happen in correct code.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn manifest_invalid(message: impl Into<String>) -> Self {
        Self::ManifestInvalid(message.into())
    }

    pub fn bcid_fetch_failed(content_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BcidFetchFailed {
            content_id: content_id.into(),
            message: message.into(),
        }
    }

    pub fn insufficient_models(message: impl Into<String>) -> Self {
        Self::InsufficientModels(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_use_stable_codes() {
        assert!(Error::OutcomesTooFew(1)
            .to_string()
            .starts_with("outcomes_too_few"));
        assert!(Error::WeightsNotNormalized {
            sum: 0.8,
            tolerance: 0.01
        }
        .to_string()
        .starts_with("weights_not_normalized"));
        assert!(Error::ExternalPrimaryUnsupported
            .to_string()
            .starts_with("external_primary_unsupported"));
    }
}
