//! Pluggable security policy for shell commands.
//!
//! The decision logic for which commands are permitted is an external
//! concern; the harness only guarantees that a policy seam exists. The
//! structured backend derives its permission settings from the policy, and
//! the raw-text backend reports policy verdicts for the shell commands it
//! observes in the stream.

use serde_json::Value;
use tracing::warn;

use crate::core::event::Event;

/// Verdict for one shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Block { reason: String },
}

/// A security check invoked before a command is executed (or, for backends
/// that execute tools themselves, reported when one is observed).
pub trait CommandPolicy: Send + Sync {
    fn evaluate(&self, command: &str) -> PolicyDecision;
}

/// Allow-list over the command's first token.
#[derive(Debug, Clone)]
pub struct AllowListPolicy {
    allowed: Vec<String>,
}

impl AllowListPolicy {
    pub fn new(allowed: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for AllowListPolicy {
    fn default() -> Self {
        Self::new([
            "ls", "cat", "head", "tail", "grep", "find", "mkdir", "touch", "cp", "mv", "pwd",
            "echo", "node", "npm", "npx", "python", "python3", "pip", "pip3", "cargo", "rustc",
            "git", "curl", "make", "sh", "bash",
        ])
    }
}

impl CommandPolicy for AllowListPolicy {
    fn evaluate(&self, command: &str) -> PolicyDecision {
        let Some(program) = command.split_whitespace().next() else {
            return PolicyDecision::Block {
                reason: "empty command".to_string(),
            };
        };
        // Strip a leading path so `/usr/bin/git` matches `git`.
        let program = program.rsplit('/').next().unwrap_or(program);
        if self.allowed.iter().any(|allowed| allowed == program) {
            PolicyDecision::Allow
        } else {
            PolicyDecision::Block {
                reason: format!("command '{program}' is not on the allow-list"),
            }
        }
    }
}

/// Policy that permits everything; used when the backend enforces its own
/// sandbox.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllPolicy;

impl CommandPolicy for AllowAllPolicy {
    fn evaluate(&self, _command: &str) -> PolicyDecision {
        PolicyDecision::Allow
    }
}

/// Log a policy verdict for an observed command.
pub fn report_verdict(policy: &dyn CommandPolicy, command: &str) {
    if let PolicyDecision::Block { reason } = policy.evaluate(command) {
        warn!(command, reason = %reason, "observed command violates security policy");
    }
}

/// Apply the policy to a streamed event when it carries a shell command.
pub fn observe_event(policy: &dyn CommandPolicy, event: &Event) {
    if let Event::ToolCall { name, args } = event
        && (name == "shell" || name == "Bash")
        && let Some(command) = args
            .get("cmd")
            .or_else(|| args.get("command"))
            .and_then(Value::as_str)
    {
        report_verdict(policy, command);
    }
}
