//! Incremental parser for raw-text backend output.
//!
//! Chunks arrive in arbitrary, non-line-aligned fragments. The parser buffers
//! the incomplete trailing line across [`StreamEventParser::feed`] calls and
//! applies all derived-event recognition (embedded JSON, code fences, shell
//! prompts, file-operation mentions) to complete lines only, so the derived
//! events for complete constructs do not depend on chunk boundaries.
//!
//! Derived events augment the raw signal rather than replacing it: every fed
//! chunk yields a [`Event::RawChunk`] passthrough first and (unless a line in
//! it parsed as JSON) a fallback [`Event::Text`] wrapping the whole chunk
//! last. Recognition is best-effort against unstructured text; extra or
//! missing tool-call events are acceptable noise.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::core::event::Event;

static SHELL_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\$\s+(?<cmd>.+)$").expect("shell line regex"));
static CODE_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```(?<lang>\w+)?\s*$").expect("code fence regex"));
static FILE_OP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?<op>create|update|edit|modify|delete)\s+(?:file\s+)?(?<path>\S+)")
        .expect("file op regex")
});

/// Fence languages that mark the buffered body as a shell command.
const SHELL_LANGS: [&str; 3] = ["sh", "bash", "shell"];

/// Stateful, incremental converter from raw text chunks to structured events.
///
/// One instance per provider client, fed chunks in strict arrival order from
/// a single producer. Not meant to be shared.
#[derive(Debug, Default)]
pub struct StreamEventParser {
    /// Incomplete trailing line carried over to the next `feed` call.
    pending: String,
    in_fence: bool,
    fence_lang: Option<String>,
    fence_buf: Vec<String>,
}

impl StreamEventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of backend output, returning the events it produced.
    pub fn feed(&mut self, chunk: &str) -> Vec<Event> {
        let mut events = Vec::new();
        if chunk.is_empty() {
            return events;
        }

        events.push(Event::RawChunk {
            content: chunk.to_string(),
        });

        self.pending.push_str(chunk);
        let mut saw_json = false;
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            saw_json |= self.handle_line(line.trim_end_matches(['\n', '\r']), &mut events);
        }

        // JSON wins over heuristics: a chunk whose line parsed as JSON does
        // not also produce the generic fallback.
        if !saw_json {
            events.push(Event::Text {
                content: chunk.to_string(),
            });
        }
        events
    }

    /// Flush at end of stream.
    ///
    /// A trailing line without a newline is processed as a final complete
    /// line; the buffered body of an unterminated fence is dropped rather
    /// than guessed.
    pub fn finish(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.handle_line(line.trim_end_matches('\r'), &mut events);
        }
        self.in_fence = false;
        self.fence_lang = None;
        self.fence_buf.clear();
        events
    }

    /// Apply line-level recognition. Returns true when the line produced a
    /// JSON event.
    fn handle_line(&mut self, line: &str, events: &mut Vec<Event>) -> bool {
        if !self.in_fence
            && let Some(value) = extract_json(line)
        {
            emit_json(value, events);
            return true;
        }

        if let Some(caps) = CODE_FENCE_RE.captures(line.trim()) {
            if self.in_fence {
                // Any fence marker closes an open fence, including an opener
                // with a different language tag.
                self.close_fence(events);
            } else {
                self.in_fence = true;
                self.fence_lang = caps.name("lang").map(|m| m.as_str().to_string());
                self.fence_buf.clear();
            }
            return false;
        }

        if self.in_fence {
            self.fence_buf.push(line.to_string());
            return false;
        }

        if let Some(caps) = SHELL_LINE_RE.captures(line) {
            events.push(Event::shell_call(caps["cmd"].trim()));
            return false;
        }

        if let Some(caps) = FILE_OP_RE.captures(line) {
            events.push(Event::ToolCall {
                name: "file_op".to_string(),
                args: serde_json::json!({ "op": &caps["op"], "path": &caps["path"] }),
            });
        }
        false
    }

    fn close_fence(&mut self, events: &mut Vec<Event>) {
        let code = self.fence_buf.join("\n");
        let lang = self.fence_lang.take();
        self.in_fence = false;
        self.fence_buf.clear();

        events.push(Event::Code {
            content: code.clone(),
            lang: lang.clone(),
        });

        let is_shell_lang = lang
            .as_deref()
            .is_some_and(|l| SHELL_LANGS.contains(&l));
        if is_shell_lang || code.trim().starts_with("$ ") {
            let cmd = code
                .trim()
                .trim_start_matches(['$', ' '])
                .trim()
                .to_string();
            events.push(Event::shell_call(&cmd));
        }
    }
}

fn emit_json(value: Value, events: &mut Vec<Event>) {
    events.push(Event::Json {
        value: value.clone(),
    });
    if let Some(calls) = value.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            events.push(Event::ToolCall {
                name: call
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                args: call
                    .get("args")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
            });
        }
    }
    if let Some(final_text) = value
        .get("final")
        .or_else(|| value.get("final_text"))
        .and_then(Value::as_str)
        && !final_text.is_empty()
    {
        events.push(Event::Text {
            content: final_text.to_string(),
        });
    }
}

/// Extract the first-`{`-to-last-`}` span of a line as a JSON object.
///
/// Multiple JSON-like spans are not supported; only that single bracket span
/// is considered, and a parse failure falls through to line heuristics.
fn extract_json(line: &str) -> Option<Value> {
    let start = line.find('{')?;
    let end = line.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&line[start..=end])
        .ok()
        .filter(Value::is_object)
}
