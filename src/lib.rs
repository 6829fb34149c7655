//! # delib-core
//!
//! A deliberation engine: turns a natural-language dispute prompt (plus
//! optional evidence attachments) into a weighted probability
//! distribution over a caller-defined set of outcomes, by consulting a
//! panel of independently-weighted LLM backends across one or more
//! iterations and folding their replies with exact fixed-point
//! arithmetic.
//!
//! ## Core components
//!
//! - [`provider`] — the `ProviderAdapter` trait and open registry backends register under.
//! - [`parser`] — tolerant multi-strategy parsing of a model's raw reply into a score vector.
//! - [`attachment`] — fetches and merges content-addressed evidence archives into the effective prompt.
//! - [`scheduler`] — the iteration loop, budget hierarchy, and score aggregation.
//! - [`assembler`] — packages a completed deliberation into the canonical [`Response`](model::Response).
//! - [`config`] — engine-wide timeout, concurrency, and partial-result policy.
//!
//! ## Example
//!
//! ```rust,ignore
//! use delib_core::{DeliberationScheduler, EngineConfig, PanelMember, ProviderRegistry, Request};
//!
//! let registry = ProviderRegistry::new(); // .register(...) real adapters
//! let scheduler = DeliberationScheduler::new(registry, EngineConfig::default());
//!
//! let request = Request {
//!     prompt: Some("Did the contractor breach clause 4.2?".into()),
//!     outcomes: Some(vec!["breach".into(), "no_breach".into()]),
//!     panel: Some(vec![PanelMember::new("anthropic", "claude", 0.6)]),
//!     iterations: Some(1),
//!     ..Request::default()
//! };
//! ```

pub mod assembler;
pub mod attachment;
pub mod config;
pub mod error;
pub mod model;
pub mod parser;
pub mod provider;
pub mod scheduler;

pub use attachment::{ArchiveTransport, AttachmentReference};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use model::{
    Attachment, AttachmentKind, ErrorType, IterationRecord, JustifierModel, MemberJustification, ModelSampleResult,
    Outcomes, PanelMember, ParsedReply, Request, Response, ResponseMetadata, SampleStatus, ScoreEntry, ScoreVector,
    Severity, Warning,
};
pub use provider::{AdapterError, GenerateOptions, GenerateReply, MockAdapter, ProviderAdapter, ProviderRegistry};
pub use scheduler::DeliberationScheduler;
