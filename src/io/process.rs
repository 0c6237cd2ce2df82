//! Helpers for spawning backend processes with piped streams.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, warn};
use wait_timeout::ChildExt;

/// Grace period given to a child before it is killed when a stream is
/// released early.
pub const CHILD_REAP_GRACE: Duration = Duration::from_secs(2);

/// Spawn a command with piped stdout/stderr, writing `stdin_payload` (if any)
/// to the child's stdin before returning.
pub fn spawn_piped(
    mut cmd: Command,
    stdin_payload: Option<&[u8]>,
) -> Result<(Child, ChildStdout, ChildStderr)> {
    if stdin_payload.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning backend process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(err = %err, "failed to spawn backend process");
            return Err(err).context("spawn backend process");
        }
    };

    if let Some(payload) = stdin_payload {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(payload).context("write stdin")?;
        // Dropping the handle closes the pipe so the child sees EOF.
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    Ok((child, stdout, stderr))
}

/// Drain a child's stderr on a side thread into tracing diagnostics.
pub fn drain_stderr(stderr: ChildStderr) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(stderr);
        for line in reader.lines() {
            match line {
                Ok(line) if !line.trim().is_empty() => {
                    debug!(line = %line, "backend stderr");
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    })
}

/// Reap a child that may still be running: brief grace, then kill.
pub fn reap_child(child: &mut Child) {
    match child.wait_timeout(CHILD_REAP_GRACE) {
        Ok(Some(status)) => {
            debug!(exit_code = ?status.code(), "backend process exited");
        }
        Ok(None) => {
            warn!("backend process still running, killing");
            let _ = child.kill();
            let _ = child.wait();
        }
        Err(err) => {
            warn!(err = %err, "failed waiting for backend process, killing");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
