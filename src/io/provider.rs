//! Provider client abstraction over AI coding backends.
//!
//! The [`ProviderClient`] trait decouples the session driver from the actual
//! backend (a structured-message CLI stream or a raw-text CLI process). Tests
//! use scripted clients that yield predetermined events without spawning
//! processes. The driver never branches on backend identity.

use std::process::{Child, ChildStdout, Command};
use std::sync::mpsc::{Receiver, Sender};
use std::thread::JoinHandle;

use anyhow::Result;
use clap::ValueEnum;
use tracing::warn;

use crate::core::event::Event;
use crate::io::process::{drain_stderr, reap_child, spawn_piped};

/// Which backend realization to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    /// Structured-message stream from the Claude CLI.
    Claude,
    /// Raw-text stream from the Copilot CLI, recovered heuristically.
    Copilot,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Claude => "claude",
            ProviderKind::Copilot => "copilot",
        }
    }
}

/// One send-prompt/consume-events backend session.
///
/// `send` queues the prompt; `events` launches the backend and yields the
/// event sequence for that prompt. Backend resources are scoped to the
/// returned [`EventStream`], which releases them on every exit path.
pub trait ProviderClient {
    fn send(&mut self, prompt: &str) -> Result<()>;
    fn events(&mut self) -> Result<EventStream>;
}

/// Constructs a fresh client per iteration; no backend context carries over
/// between iterations.
pub trait ProviderFactory {
    fn create_client(&self) -> Result<Box<dyn ProviderClient>>;
}

/// Ordered event sequence from one backend invocation.
///
/// Backed by a channel fed from a reader thread; `next()` is the driver's
/// single suspension point. When the backend's stdout closes, the child is
/// reaped and a final [`Event::ProcessDone`] is synthesized with its exit
/// code. Dropping the stream early (e.g. on the rate-limit short-circuit)
/// kills the child after a short grace period.
pub struct EventStream {
    rx: Receiver<Result<Event>>,
    child: Option<Child>,
    readers: Vec<JoinHandle<()>>,
}

impl EventStream {
    /// Spawn `cmd` and pump its stdout through `pump` into the stream.
    pub(crate) fn spawn<F>(cmd: Command, stdin_payload: Option<&[u8]>, pump: F) -> Result<Self>
    where
        F: FnOnce(ChildStdout, Sender<Result<Event>>) + Send + 'static,
    {
        let (child, stdout, stderr) = spawn_piped(cmd, stdin_payload)?;
        let (tx, rx) = std::sync::mpsc::channel();
        let stdout_reader = std::thread::spawn(move || pump(stdout, tx));
        let stderr_reader = drain_stderr(stderr);
        Ok(Self {
            rx,
            child: Some(child),
            readers: vec![stdout_reader, stderr_reader],
        })
    }

    /// Build a stream from pre-recorded items (no backend process).
    pub fn from_events(items: Vec<Result<Event>>) -> Self {
        let (tx, rx) = std::sync::mpsc::channel();
        for item in items {
            // The unbounded channel only errors once `rx` is gone.
            let _ = tx.send(item);
        }
        Self {
            rx,
            child: None,
            readers: Vec::new(),
        }
    }

    fn join_readers(&mut self) {
        for handle in self.readers.drain(..) {
            if handle.join().is_err() {
                warn!("backend reader thread panicked");
            }
        }
    }
}

impl Iterator for EventStream {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Ok(item) = self.rx.recv() {
            return Some(item);
        }
        // Channel disconnected: stdout closed. Reap the child once and
        // surface its exit code as the terminal event.
        self.join_readers();
        let mut child = self.child.take()?;
        let exit_code = match child.wait() {
            Ok(status) => status.code().unwrap_or(-1),
            Err(err) => {
                warn!(err = %err, "failed to wait for backend process");
                -1
            }
        };
        Some(Ok(Event::ProcessDone { exit_code }))
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            reap_child(&mut child);
        }
        self.join_readers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn from_events_yields_items_in_order_then_ends() {
        let mut stream = EventStream::from_events(vec![
            Ok(Event::Text {
                content: "a".to_string(),
            }),
            Err(anyhow!("boom")),
            Ok(Event::ProcessDone { exit_code: 0 }),
        ]);

        assert_eq!(
            stream.next().map(|item| item.expect("event")),
            Some(Event::Text {
                content: "a".to_string()
            })
        );
        assert!(stream.next().expect("item").is_err());
        assert_eq!(
            stream.next().map(|item| item.expect("event")),
            Some(Event::ProcessDone { exit_code: 0 })
        );
        // No child process, so no synthesized terminal event.
        assert!(stream.next().is_none());
        assert!(stream.next().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn spawned_stream_ends_with_process_done() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("printf 'x'; exit 7");
        let mut stream = EventStream::spawn(cmd, None, |mut stdout, tx| {
            let mut buf = String::new();
            std::io::Read::read_to_string(&mut stdout, &mut buf).expect("read");
            let _ = tx.send(Ok(Event::Text { content: buf }));
        })
        .expect("spawn");

        assert_eq!(
            stream.next().map(|item| item.expect("event")),
            Some(Event::Text {
                content: "x".to_string()
            })
        );
        assert_eq!(
            stream.next().map(|item| item.expect("event")),
            Some(Event::ProcessDone { exit_code: 7 })
        );
        assert!(stream.next().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn dropping_a_stream_kills_the_backend() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo started; sleep 60");
        let stream = EventStream::spawn(cmd, None, |stdout, tx| {
            let reader = std::io::BufReader::new(stdout);
            for line in std::io::BufRead::lines(reader) {
                let Ok(line) = line else { break };
                if tx.send(Ok(Event::Text { content: line })).is_err() {
                    break;
                }
            }
        })
        .expect("spawn");
        // Dropping without consuming must not leave the child running; the
        // drop itself blocks only for the reap grace period.
        drop(stream);
    }
}
