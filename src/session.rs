//! Single-session event consumption.
//!
//! One session is one send-prompt/consume-events cycle against a freshly
//! constructed provider client. Consumption is a strictly sequential pull
//! loop; the rate-limit short-circuit is the only thing that terminates it
//! before the stream ends. Every failure is converted to an outcome here so
//! nothing escapes to the driver loop.

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::classifier::{classify_stream_failure, is_blocked, is_rate_limited};
use crate::core::event::Event;
use crate::core::mode::RunMode;
use crate::core::outcome::SessionOutcome;
use crate::io::provider::ProviderClient;

/// Console-reporting hooks for one session, implemented by the CLI surface.
/// Default methods are no-ops so tests can observe only what they need.
pub trait SessionObserver {
    fn session_started(&mut self, _iteration: u32, _mode: RunMode) {}
    fn stream_text(&mut self, _text: &str) {}
    fn tool_call(&mut self, _name: &str, _args: &Value) {}
    fn tool_result(&mut self, _content: &str, _is_error: bool) {}
    fn tool_blocked(&mut self, _content: &str) {}
    fn process_done(&mut self, _exit_code: i32) {}
    fn rate_limited(&mut self, _content: &str) {}
    fn session_finished(&mut self, _report: &SessionReport) {}
}

/// Observer that reports nothing.
pub struct NullObserver;

impl SessionObserver for NullObserver {}

/// What one session produced, summarized for the caller.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub iteration: u32,
    pub mode: RunMode,
    pub outcome: SessionOutcome,
    pub passing: usize,
    pub total: usize,
}

/// Everything the driver needs after a session.
#[derive(Debug)]
pub struct SessionResult {
    pub outcome: SessionOutcome,
    /// Bounded raw passthrough of backend output.
    pub transcript: String,
    pub transcript_truncated: usize,
    /// Last tool invoked before the stream ended or failed.
    pub last_tool: Option<String>,
}

impl SessionResult {
    /// A session that failed before any events arrived.
    pub fn failed(message: String) -> Self {
        Self {
            outcome: SessionOutcome::RecoverableError { message },
            transcript: String::new(),
            transcript_truncated: 0,
            last_tool: None,
        }
    }
}

/// Send one prompt and consume the event stream to completion or until a
/// terminal classification is produced.
#[instrument(skip_all, fields(prompt_bytes = prompt.len()))]
pub fn run_session(
    client: &mut dyn ProviderClient,
    prompt: &str,
    observer: &mut dyn SessionObserver,
    transcript_limit_bytes: usize,
) -> SessionResult {
    let mut transcript = BoundedTranscript::new(transcript_limit_bytes);
    let mut response = String::new();
    let mut last_tool: Option<String> = None;

    if let Err(err) = client.send(prompt) {
        warn!(err = %format!("{err:#}"), "failed to send prompt");
        return SessionResult::failed(format!("{err:#}"));
    }

    let stream = match client.events() {
        Ok(stream) => stream,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "failed to open event stream");
            let outcome = classify_stream_failure(&err, None);
            return finish(outcome, transcript, None);
        }
    };

    for item in stream {
        match item {
            Ok(Event::Text { content }) => {
                observer.stream_text(&content);
                response.push_str(&content);
            }
            Ok(Event::Code { content, .. }) => {
                observer.stream_text(&content);
                response.push_str(&content);
            }
            Ok(Event::ToolCall { name, args }) => {
                observer.tool_call(&name, &args);
                last_tool = Some(name);
            }
            Ok(Event::ToolResult { content, is_error }) => {
                // The rate-limit check has priority over all other event
                // handling and ends stream consumption early.
                if is_rate_limited(&content) {
                    observer.rate_limited(&content);
                    return finish(
                        SessionOutcome::RateLimited { message: content },
                        transcript,
                        last_tool,
                    );
                }
                if is_blocked(&content) {
                    observer.tool_blocked(&content);
                } else {
                    observer.tool_result(&content, is_error);
                }
            }
            Ok(Event::ProcessDone { exit_code }) => {
                debug!(exit_code, "backend process finished");
                observer.process_done(exit_code);
            }
            Ok(Event::Json { .. }) => {}
            Ok(Event::RawChunk { content }) => {
                transcript.push(&content);
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "event stream failed");
                let outcome = classify_stream_failure(&err, last_tool.as_deref());
                return finish(outcome, transcript, last_tool);
            }
        }
    }

    finish(SessionOutcome::Continue { response }, transcript, last_tool)
}

fn finish(
    outcome: SessionOutcome,
    transcript: BoundedTranscript,
    last_tool: Option<String>,
) -> SessionResult {
    SessionResult {
        outcome,
        transcript: transcript.contents,
        transcript_truncated: transcript.truncated,
        last_tool,
    }
}

/// Accumulates raw output up to a byte limit, counting what was dropped.
struct BoundedTranscript {
    contents: String,
    limit: usize,
    truncated: usize,
}

impl BoundedTranscript {
    fn new(limit: usize) -> Self {
        Self {
            contents: String::new(),
            limit,
            truncated: 0,
        }
    }

    fn push(&mut self, chunk: &str) {
        let remaining = self.limit.saturating_sub(self.contents.len());
        if chunk.len() <= remaining {
            self.contents.push_str(chunk);
            return;
        }
        let mut cut = remaining;
        while cut > 0 && !chunk.is_char_boundary(cut) {
            cut -= 1;
        }
        self.contents.push_str(&chunk[..cut]);
        self.truncated += chunk.len() - cut;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};
    use crate::io::provider::EventStream;

    struct FakeClient {
        items: Option<Vec<Result<Event>>>,
        send_error: Option<String>,
        sent: Vec<String>,
    }

    impl FakeClient {
        fn new(items: Vec<Result<Event>>) -> Self {
            Self {
                items: Some(items),
                send_error: None,
                sent: Vec::new(),
            }
        }
    }

    impl ProviderClient for FakeClient {
        fn send(&mut self, prompt: &str) -> Result<()> {
            self.sent.push(prompt.to_string());
            match self.send_error.take() {
                Some(message) => Err(anyhow!(message)),
                None => Ok(()),
            }
        }

        fn events(&mut self) -> Result<EventStream> {
            Ok(EventStream::from_events(
                self.items.take().unwrap_or_default(),
            ))
        }
    }

    fn text(content: &str) -> Result<Event> {
        Ok(Event::Text {
            content: content.to_string(),
        })
    }

    #[test]
    fn clean_stream_concatenates_text_in_arrival_order() {
        let mut client = FakeClient::new(vec![
            text("one "),
            Ok(Event::Code {
                content: "two".to_string(),
                lang: Some("sh".to_string()),
            }),
            Ok(Event::ToolCall {
                name: "shell".to_string(),
                args: serde_json::json!({ "cmd": "ls" }),
            }),
            text(" three"),
            Ok(Event::ProcessDone { exit_code: 0 }),
        ]);
        let result = run_session(&mut client, "prompt", &mut NullObserver, 1000);
        assert_eq!(
            result.outcome,
            SessionOutcome::Continue {
                response: "one two three".to_string()
            }
        );
        assert_eq!(result.last_tool.as_deref(), Some("shell"));
        assert_eq!(client.sent, vec!["prompt".to_string()]);
    }

    /// A rate-limit tool result short-circuits the session regardless of
    /// position; later events are not consumed.
    #[test]
    fn rate_limit_short_circuits_consumption() {
        let mut client = FakeClient::new(vec![
            text("before"),
            Ok(Event::ToolResult {
                content: "Limit reached, resets at 10:00".to_string(),
                is_error: false,
            }),
            Err(anyhow!("must never be reached")),
        ]);
        let result = run_session(&mut client, "p", &mut NullObserver, 1000);
        assert_eq!(
            result.outcome,
            SessionOutcome::RateLimited {
                message: "Limit reached, resets at 10:00".to_string()
            }
        );
    }

    #[test]
    fn blocked_tool_result_is_not_an_error_outcome() {
        struct Recorder {
            blocked: Vec<String>,
        }
        impl SessionObserver for Recorder {
            fn tool_blocked(&mut self, content: &str) {
                self.blocked.push(content.to_string());
            }
        }

        let mut client = FakeClient::new(vec![Ok(Event::ToolResult {
            content: "Command blocked by security policy".to_string(),
            is_error: true,
        })]);
        let mut observer = Recorder { blocked: Vec::new() };
        let result = run_session(&mut client, "p", &mut observer, 1000);
        assert!(matches!(result.outcome, SessionOutcome::Continue { .. }));
        assert_eq!(observer.blocked.len(), 1);
    }

    #[test]
    fn stream_error_with_overflow_signature_names_last_tool() {
        let mut client = FakeClient::new(vec![
            Ok(Event::ToolCall {
                name: "screenshot".to_string(),
                args: serde_json::json!({}),
            }),
            Err(anyhow!(
                "JSON message exceeded maximum buffer size (2000000 bytes > 1048576 limit)"
            )),
        ]);
        let result = run_session(&mut client, "p", &mut NullObserver, 1000);
        match result.outcome {
            SessionOutcome::LargeResponseError { message } => {
                assert!(message.contains("from tool: screenshot"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn generic_stream_error_is_recoverable() {
        let mut client = FakeClient::new(vec![text("partial"), Err(anyhow!("pipe broke"))]);
        let result = run_session(&mut client, "p", &mut NullObserver, 1000);
        assert_eq!(
            result.outcome,
            SessionOutcome::RecoverableError {
                message: "pipe broke".to_string()
            }
        );
    }

    #[test]
    fn send_failure_is_recoverable() {
        let mut client = FakeClient::new(Vec::new());
        client.send_error = Some("spawn failed".to_string());
        let result = run_session(&mut client, "p", &mut NullObserver, 1000);
        assert_eq!(
            result.outcome,
            SessionOutcome::RecoverableError {
                message: "spawn failed".to_string()
            }
        );
    }

    #[test]
    fn raw_chunks_fill_the_transcript_up_to_the_limit() {
        let mut client = FakeClient::new(vec![
            Ok(Event::RawChunk {
                content: "0123456789".to_string(),
            }),
            Ok(Event::RawChunk {
                content: "abcdefghij".to_string(),
            }),
        ]);
        let result = run_session(&mut client, "p", &mut NullObserver, 15);
        assert_eq!(result.transcript, "0123456789abcde");
        assert_eq!(result.transcript_truncated, 5);
    }

    #[test]
    fn bounded_transcript_respects_char_boundaries() {
        let mut transcript = BoundedTranscript::new(5);
        transcript.push("héllo"); // 'é' is two bytes, boundary falls inside it
        assert!(transcript.contents.len() <= 5);
        assert!(transcript.contents.starts_with('h'));
        assert_eq!(
            transcript.contents.len() + transcript.truncated,
            "héllo".len()
        );
    }
}
