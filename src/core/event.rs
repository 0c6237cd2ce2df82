//! The event union yielded by provider clients.
//!
//! Both backends normalize to this type: the structured backend maps typed
//! stream messages onto it, the raw-text backend produces it through the
//! incremental parser. The driver never branches on where an event came from.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of provider output, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Free-form assistant text.
    Text { content: String },
    /// Text recovered from a fenced code block, with the declared language.
    Code { content: String, lang: Option<String> },
    /// A tool invocation announced by the backend.
    ToolCall { name: String, args: Value },
    /// The result of a tool invocation.
    ToolResult { content: String, is_error: bool },
    /// An embedded JSON object recovered from raw output.
    Json { value: Value },
    /// The backend process finished.
    ProcessDone { exit_code: i32 },
    /// Unmodified passthrough of a received chunk, kept for auditability.
    RawChunk { content: String },
}

impl Event {
    /// Build a shell tool-call event from an extracted command.
    pub fn shell_call(cmd: &str) -> Self {
        Event::ToolCall {
            name: "shell".to_string(),
            args: serde_json::json!({ "cmd": cmd }),
        }
    }

    /// Content that contributes to the session's accumulated response text.
    pub fn response_text(&self) -> Option<&str> {
        match self {
            Event::Text { content } | Event::Code { content, .. } => Some(content),
            _ => None,
        }
    }
}
