//! Crate-wide error kinds for the pipeline.
//!
//! `GroundingEmpty` is deliberately not a variant here: an empty grounding
//! result is a normal code path (falls through to rule-based/general
//! classification), not a failure.

use std::fmt;

/// One of the failure kinds the pipeline can produce.
#[derive(Debug)]
pub enum PipelineError {
    /// User-supplied text failed sanitisation or length checks.
    Validation(String),
    /// A template failed the read-only/LIMIT/denylist checks at execution time.
    Security(String),
    /// The graph connection failed after retries.
    ExecutionTransient(String),
    /// The language model call failed outright (not a parse failure).
    SynthesisFailure(String),
    /// Any uncaught failure; surfaced as the generic error envelope.
    Fatal(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Validation(msg) => write!(f, "validation error: {msg}"),
            PipelineError::Security(_) => write!(f, "security validation failed"),
            PipelineError::ExecutionTransient(msg) => write!(f, "graph execution failed: {msg}"),
            PipelineError::SynthesisFailure(msg) => write!(f, "synthesis failed: {msg}"),
            PipelineError::Fatal(msg) => write!(f, "fatal error: {msg}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl PipelineError {
    /// The user-safe apology shown in the error envelope. Never echoes the
    /// underlying message for `Security`/`Fatal` kinds.
    pub fn user_message(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => {
                "Your question could not be processed — please rephrase it."
            }
            PipelineError::Security(_) | PipelineError::Fatal(_) => {
                "Sorry, I encountered an error processing your query. Please try rephrasing your question or check that you're using valid ETF tickers and company symbols."
            }
            PipelineError::ExecutionTransient(_) => {
                "The data source is temporarily unavailable; please try again shortly."
            }
            PipelineError::SynthesisFailure(_) => {
                "I could not generate a full answer, but the underlying data is included below."
            }
        }
    }
}
