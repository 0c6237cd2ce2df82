//! Structured-message backend: the Claude CLI in streaming-JSON mode.
//!
//! The CLI emits one JSON message per line. Messages are parsed into typed
//! structs and mapped onto the shared [`Event`] union, so the driver sees the
//! same event stream shape as the raw-text backend. A line above the
//! configured byte cap raises the oversized-response failure the classifier
//! recognizes.

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{ChildStdout, Command};
use std::sync::Arc;
use std::sync::mpsc::Sender;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::config::Credentials;
use crate::core::event::Event;
use crate::io::provider::{EventStream, ProviderClient, ProviderFactory};
use crate::io::security::{CommandPolicy, observe_event};

/// Builds one fresh [`ClaudeClient`] per iteration.
pub struct ClaudeFactory {
    project_dir: PathBuf,
    settings_path: PathBuf,
    command: String,
    model: String,
    credentials: Credentials,
    policy: Arc<dyn CommandPolicy>,
    max_line_bytes: usize,
}

impl ClaudeFactory {
    pub fn new(
        project_dir: impl Into<PathBuf>,
        settings_path: impl Into<PathBuf>,
        command: impl Into<String>,
        model: impl Into<String>,
        credentials: Credentials,
        policy: Arc<dyn CommandPolicy>,
        max_line_bytes: usize,
    ) -> Self {
        Self {
            project_dir: project_dir.into(),
            settings_path: settings_path.into(),
            command: command.into(),
            model: model.into(),
            credentials,
            policy,
            max_line_bytes,
        }
    }
}

impl ProviderFactory for ClaudeFactory {
    fn create_client(&self) -> Result<Box<dyn ProviderClient>> {
        let token = self.credentials.require_token()?.to_string();
        write_security_settings(&self.settings_path)?;
        info!(
            project_dir = %self.project_dir.display(),
            model = %self.model,
            "created claude client"
        );
        Ok(Box::new(ClaudeClient {
            project_dir: self.project_dir.clone(),
            settings_path: self.settings_path.clone(),
            command: self.command.clone(),
            model: self.model.clone(),
            token,
            policy: Arc::clone(&self.policy),
            max_line_bytes: self.max_line_bytes,
            prompt: None,
        }))
    }
}

pub struct ClaudeClient {
    project_dir: PathBuf,
    settings_path: PathBuf,
    command: String,
    model: String,
    token: String,
    policy: Arc<dyn CommandPolicy>,
    max_line_bytes: usize,
    prompt: Option<String>,
}

impl ProviderClient for ClaudeClient {
    fn send(&mut self, prompt: &str) -> Result<()> {
        self.prompt = Some(prompt.to_string());
        Ok(())
    }

    #[instrument(skip_all, fields(model = %self.model))]
    fn events(&mut self) -> Result<EventStream> {
        let prompt = self
            .prompt
            .take()
            .ok_or_else(|| anyhow!("no prompt queued (call send first)"))?;

        let mut cmd = Command::new(&self.command);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .arg("--model")
            .arg(&self.model)
            .arg("--settings")
            .arg(&self.settings_path)
            .arg("--max-turns")
            .arg("1000")
            .current_dir(&self.project_dir)
            .env("CLAUDE_CODE_OAUTH_TOKEN", &self.token);

        let max_line_bytes = self.max_line_bytes;
        let policy = Arc::clone(&self.policy);
        EventStream::spawn(cmd, Some(prompt.as_bytes()), move |stdout, tx| {
            pump_json_lines(stdout, tx, max_line_bytes, policy.as_ref());
        })
    }
}

/// Write the security settings the CLI enforces: sandboxed shell and file
/// operations confined to the project directory.
fn write_security_settings(path: &std::path::Path) -> Result<()> {
    // Relative permission globs confine file access to the working
    // directory, which is set to the project dir at spawn time. Bash is
    // granted here; command-level filtering is the sandbox's concern, and
    // the harness-side policy reports violations it observes in the stream.
    let settings = serde_json::json!({
        "sandbox": { "enabled": true, "autoAllowBashIfSandboxed": true },
        "permissions": {
            "defaultMode": "acceptEdits",
            "allow": [
                "Read(./**)",
                "Write(./**)",
                "Edit(./**)",
                "Glob(./**)",
                "Grep(./**)",
                "Bash(*)",
                "WebFetch(*)",
                "WebSearch",
            ],
        },
    });

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create settings dir {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(&settings)?;
    buf.push('\n');
    std::fs::write(path, buf).with_context(|| format!("write settings {}", path.display()))?;
    debug!(path = %path.display(), "wrote security settings");
    Ok(())
}

/// Read newline-delimited JSON messages and emit their events.
fn pump_json_lines(
    stdout: ChildStdout,
    tx: Sender<Result<Event>>,
    max_line_bytes: usize,
    policy: &dyn CommandPolicy,
) {
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => return,
            Ok(_) => {}
            Err(err) => {
                let _ = tx.send(Err(anyhow!(err).context("read backend stdout")));
                return;
            }
        }
        if line.len() > max_line_bytes {
            let _ = tx.send(Err(anyhow!(
                "JSON message exceeded maximum buffer size ({} bytes > {} limit)",
                line.len(),
                max_line_bytes
            )));
            return;
        }

        let text = String::from_utf8_lossy(&line);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if tx
            .send(Ok(Event::RawChunk {
                content: text.to_string(),
            }))
            .is_err()
        {
            return;
        }
        if !trimmed.starts_with('{') {
            debug!(line = %trimmed, "skipping non-JSON backend output line");
            continue;
        }
        match serde_json::from_str::<SdkMessage>(trimmed) {
            Ok(message) => {
                for event in events_from_message(message) {
                    observe_event(policy, &event);
                    if tx.send(Ok(event)).is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                let _ = tx.send(Err(anyhow!(
                    "Failed to decode JSON message from backend: {err}"
                )));
                return;
            }
        }
    }
}

/// One streamed message from the CLI.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SdkMessage {
    Assistant { message: MessageBody },
    User { message: MessageBody },
    Result {
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        subtype: Option<String>,
    },
    System {
        #[serde(default)]
        subtype: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Default, Deserialize)]
struct MessageBody {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Unknown,
}

fn events_from_message(message: SdkMessage) -> Vec<Event> {
    let mut events = Vec::new();
    match message {
        SdkMessage::Assistant { message } | SdkMessage::User { message } => {
            for block in message.content {
                match block {
                    ContentBlock::Text { text } => events.push(Event::Text { content: text }),
                    ContentBlock::ToolUse { name, input } => {
                        events.push(Event::ToolCall { name, args: input });
                    }
                    ContentBlock::ToolResult { content, is_error } => {
                        events.push(Event::ToolResult {
                            content: stringify_content(&content),
                            is_error,
                        });
                    }
                    ContentBlock::Unknown => {}
                }
            }
        }
        SdkMessage::Result { is_error, subtype } => {
            debug!(is_error, subtype = ?subtype, "backend result message");
        }
        SdkMessage::System { subtype } => {
            debug!(subtype = ?subtype, "backend system message");
        }
        SdkMessage::Unknown => {}
    }
    events
}

/// Tool-result content may be a plain string or a block array; normalize to
/// text for classification.
fn stringify_content(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Vec<Event> {
        events_from_message(serde_json::from_str(line).expect("parse message"))
    }

    #[test]
    fn assistant_text_and_tool_use_map_to_events() {
        let events = parse(
            r#"{"type":"assistant","message":{"content":[
                {"type":"text","text":"working"},
                {"type":"tool_use","name":"Bash","input":{"command":"ls"}}
            ]}}"#,
        );
        assert_eq!(
            events,
            vec![
                Event::Text {
                    content: "working".to_string()
                },
                Event::ToolCall {
                    name: "Bash".to_string(),
                    args: serde_json::json!({ "command": "ls" }),
                },
            ]
        );
    }

    #[test]
    fn user_tool_result_maps_with_error_flag() {
        let events = parse(
            r#"{"type":"user","message":{"content":[
                {"type":"tool_result","content":"Limit reached, resets at 10:00","is_error":true}
            ]}}"#,
        );
        assert_eq!(
            events,
            vec![Event::ToolResult {
                content: "Limit reached, resets at 10:00".to_string(),
                is_error: true,
            }]
        );
    }

    #[test]
    fn block_array_tool_result_is_stringified() {
        let events = parse(
            r#"{"type":"user","message":{"content":[
                {"type":"tool_result","content":[{"type":"text","text":"ok"}]}
            ]}}"#,
        );
        match &events[0] {
            Event::ToolResult { content, is_error } => {
                assert!(content.contains("ok"));
                assert!(!is_error);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn result_and_system_messages_produce_no_events() {
        assert!(parse(r#"{"type":"result","subtype":"success","is_error":false}"#).is_empty());
        assert!(parse(r#"{"type":"system","subtype":"init"}"#).is_empty());
    }

    #[test]
    fn unknown_message_and_block_types_are_ignored() {
        assert!(parse(r#"{"type":"stream_event"}"#).is_empty());
        let events = parse(
            r#"{"type":"assistant","message":{"content":[
                {"type":"thinking","thinking":"hmm"},
                {"type":"text","text":"visible"}
            ]}}"#,
        );
        assert_eq!(
            events,
            vec![Event::Text {
                content: "visible".to_string()
            }]
        );
    }

    #[test]
    fn settings_confine_file_access_and_enable_sandbox() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("settings.json");
        write_security_settings(&path).expect("write");

        let settings: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(settings["sandbox"]["enabled"], true);
        let allow = settings["permissions"]["allow"]
            .as_array()
            .expect("allow array");
        assert!(allow.iter().any(|entry| entry == "Bash(*)"));
        assert!(allow.iter().any(|entry| entry == "Read(./**)"));
    }
}
