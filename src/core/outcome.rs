//! Session outcome classification.

use serde::Serialize;

/// The single outcome produced for one session; drives the driver transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The session finished cleanly; `response` is the concatenated text
    /// content in arrival order.
    Continue { response: String },
    /// A transient failure. Retried next iteration with advisory context.
    RecoverableError { message: String },
    /// A response exceeded buffer limits. Retried next iteration with
    /// remediation guidance about oversized tool responses.
    LargeResponseError { message: String },
    /// The backend hit its rate limit. Not recoverable within this run.
    RateLimited { message: String },
}

impl SessionOutcome {
    /// Short stable label used in logs and session artifacts.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionOutcome::Continue { .. } => "continue",
            SessionOutcome::RecoverableError { .. } => "recoverable_error",
            SessionOutcome::LargeResponseError { .. } => "large_response_error",
            SessionOutcome::RateLimited { .. } => "rate_limited",
        }
    }

    /// Error text carried into the next iteration's prompt, if any.
    pub fn carried_error(&self) -> Option<&str> {
        match self {
            SessionOutcome::RecoverableError { message }
            | SessionOutcome::LargeResponseError { message } => Some(message),
            _ => None,
        }
    }
}
