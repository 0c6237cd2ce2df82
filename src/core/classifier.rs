//! Classification of heterogeneous backend failures.
//!
//! Failure modes arrive as free-form text: streamed tool results, exception
//! messages raised mid-stream, or process errors. The functions here map that
//! text onto the fixed outcome taxonomy. Only the rate-limit short-circuit is
//! a hard contract; the rest is best-effort signature matching.

use crate::core::outcome::SessionOutcome;

/// Marker phrase pair that identifies a rate-limit tool result.
const RATE_LIMIT_MARKER: &str = "Limit reached";
const RATE_LIMIT_RESET_MARKER: &str = "resets";

/// Signatures of a response that exceeded the stream buffer limit.
const BUFFER_OVERFLOW_SIGNATURES: [&str; 2] =
    ["exceeded maximum buffer size", "Failed to decode JSON"];

/// True when a tool-result body reports the backend's rate limit.
///
/// Both markers must be present; position within the content is irrelevant.
pub fn is_rate_limited(content: &str) -> bool {
    content.contains(RATE_LIMIT_MARKER) && content.contains(RATE_LIMIT_RESET_MARKER)
}

/// True when a tool-result body reports a command blocked by the security
/// policy. Blocked commands are informational, never an error outcome.
pub fn is_blocked(content: &str) -> bool {
    content.to_lowercase().contains("blocked")
}

/// True when a failure's textual description matches a known
/// buffer-overflow signature.
pub fn is_buffer_overflow(message: &str) -> bool {
    BUFFER_OVERFLOW_SIGNATURES
        .iter()
        .any(|signature| message.contains(signature))
}

/// Map a failure raised during send/consume to an outcome.
///
/// Buffer overflows become [`SessionOutcome::LargeResponseError`] with a
/// synthesized advisory naming the last tool invoked before the failure;
/// everything else is retried as a recoverable error.
pub fn classify_stream_failure(err: &anyhow::Error, last_tool: Option<&str>) -> SessionOutcome {
    let message = format!("{err:#}");
    if is_buffer_overflow(&message) {
        SessionOutcome::LargeResponseError {
            message: large_response_advice(last_tool),
        }
    } else {
        SessionOutcome::RecoverableError { message }
    }
}

/// Remediation guidance carried into the next prompt after an oversized
/// response.
pub fn large_response_advice(last_tool: Option<&str>) -> String {
    let tool_info = match last_tool {
        Some(name) => format!(" (from tool: {name})"),
        None => String::new(),
    };
    format!(
        "Tool response exceeded the stream buffer size{tool_info}. \
         This typically happens with screenshots or other large binary captures. \
         To avoid this error: (1) skip taking screenshots and focus on functional \
         testing, or (2) request smaller responses from the tool (smaller \
         dimensions, lower quality, narrower queries)."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn rate_limit_requires_both_markers() {
        assert!(is_rate_limited("Limit reached, resets at 10:00"));
        assert!(is_rate_limited("prefix text Limit reached more text resets 5pm suffix"));
        assert!(!is_rate_limited("Limit reached"));
        assert!(!is_rate_limited("resets at 10:00"));
        assert!(!is_rate_limited("all good"));
    }

    #[test]
    fn blocked_detection_is_case_insensitive() {
        assert!(is_blocked("Command BLOCKED by policy"));
        assert!(is_blocked("blocked: rm not allowed"));
        assert!(!is_blocked("command executed"));
    }

    #[test]
    fn buffer_overflow_becomes_large_response_error() {
        let err = anyhow!("JSON message exceeded maximum buffer size (2097152 bytes > 1048576 limit)");
        let outcome = classify_stream_failure(&err, Some("screenshot"));
        match outcome {
            SessionOutcome::LargeResponseError { message } => {
                assert!(message.contains("from tool: screenshot"));
                assert!(message.contains("skip taking screenshots"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn decode_failure_is_also_oversized() {
        let err = anyhow!("Failed to decode JSON message from provider: EOF while parsing");
        let outcome = classify_stream_failure(&err, None);
        match outcome {
            SessionOutcome::LargeResponseError { message } => {
                assert!(!message.contains("from tool:"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn other_failures_are_recoverable() {
        let err = anyhow!("connection reset by peer");
        assert_eq!(
            classify_stream_failure(&err, None),
            SessionOutcome::RecoverableError {
                message: "connection reset by peer".to_string()
            }
        );
    }
}
