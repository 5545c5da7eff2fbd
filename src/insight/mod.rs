//! Natural-language interpretation of check-up results.
//!
//! An [`InsightGenerator`] turns an [`InsightRequest`] into an [`Insight`] or
//! fails. The [`InsightOrchestrator`] wraps one and guarantees that every
//! request settles with an insight, substituting [`Insight::fallback`] on any
//! failure.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mediband_checkup::insight::{GeminiInsightGenerator, InsightOrchestrator};
//!
//! let generator = GeminiInsightGenerator::from_env().expect("GEMINI_API_KEY not set");
//! let orchestrator = InsightOrchestrator::new(Arc::new(generator));
//! ```

mod gemini;
mod orchestrator;

pub use gemini::{GeminiInsightGenerator, DEFAULT_MODEL, GEMINI_API_KEY_ENV};
pub use orchestrator::InsightOrchestrator;

use crate::core::report::{Insight, InsightRequest};
use async_trait::async_trait;

/// Insight generation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsightError {
    /// No backend configured (e.g. missing API key)
    NotConfigured(String),
    /// Network/HTTP error
    Network(String),
    /// Backend returned an error response
    Api { status: u16, message: String },
    /// Response did not contain a usable insight
    Malformed(String),
}

impl std::fmt::Display for InsightError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InsightError::NotConfigured(msg) => write!(f, "Insight backend not configured: {msg}"),
            InsightError::Network(msg) => write!(f, "Insight network error: {msg}"),
            InsightError::Api { status, message } => {
                write!(f, "Insight API error ({status}): {message}")
            }
            InsightError::Malformed(msg) => write!(f, "Malformed insight: {msg}"),
        }
    }
}

impl std::error::Error for InsightError {}

/// Opaque text-generation backend.
#[async_trait]
pub trait InsightGenerator: Send + Sync {
    async fn generate(&self, request: &InsightRequest) -> Result<Insight, InsightError>;
}

/// Generator used when no backend is configured. Always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInsightGenerator;

#[async_trait]
impl InsightGenerator for NoopInsightGenerator {
    async fn generate(&self, _request: &InsightRequest) -> Result<Insight, InsightError> {
        Err(InsightError::NotConfigured(
            "no insight backend available".to_string(),
        ))
    }
}

/// Reject payloads that parsed but carry no usable content.
pub(crate) fn validate(insight: Insight) -> Result<Insight, InsightError> {
    if insight.summary.trim().is_empty() {
        return Err(InsightError::Malformed("empty summary".to_string()));
    }
    Ok(insight)
}
