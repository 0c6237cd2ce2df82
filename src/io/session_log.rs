//! Per-session artifact logging under `.autocoder/sessions/`.
//!
//! # Separation of Concerns
//!
//! - **Tracing (`logging`)**: dev diagnostics via `RUST_LOG`, stderr only.
//! - **Session artifacts (this module)**: product output. Always written,
//!   unaffected by `RUST_LOG`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::mode::RunMode;
use crate::core::outcome::SessionOutcome;

#[derive(Debug, Clone, Serialize)]
pub struct SessionMeta {
    pub iteration: u32,
    pub mode: RunMode,
    pub outcome: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub prompt_path: PathBuf,
    pub transcript_path: PathBuf,
    pub outcome_path: PathBuf,
}

impl SessionPaths {
    pub fn new(sessions_dir: &Path, iteration: u32) -> Self {
        let dir = sessions_dir.join(iteration.to_string());
        Self {
            meta_path: dir.join("meta.json"),
            prompt_path: dir.join("prompt.md"),
            transcript_path: dir.join("transcript.log"),
            outcome_path: dir.join("outcome.json"),
            dir,
        }
    }
}

pub struct SessionWriteRequest<'a> {
    pub sessions_dir: &'a Path,
    pub meta: &'a SessionMeta,
    pub prompt: &'a str,
    pub outcome: &'a SessionOutcome,
    /// Bounded raw transcript and how many bytes were dropped from it.
    pub transcript: &'a str,
    pub transcript_truncated: usize,
}

pub fn write_session(request: &SessionWriteRequest<'_>) -> Result<SessionPaths> {
    let paths = SessionPaths::new(request.sessions_dir, request.meta.iteration);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create session dir {}", paths.dir.display()))?;

    // Write in deterministic order to keep artifacts stable.
    write_json(&paths.meta_path, request.meta)?;
    write_text(&paths.prompt_path, request.prompt)?;
    let mut transcript = request.transcript.to_string();
    if request.transcript_truncated > 0 {
        transcript.push_str(&format!(
            "\n[transcript truncated {} bytes]\n",
            request.transcript_truncated
        ));
    }
    write_text(&paths.transcript_path, &transcript)?;
    write_json(&paths.outcome_path, request.outcome)?;

    Ok(paths)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_paths_are_stable() {
        let paths = SessionPaths::new(Path::new("/p/.autocoder/sessions"), 3);
        assert!(paths.dir.ends_with(Path::new(".autocoder/sessions/3")));
        assert!(paths.meta_path.ends_with("meta.json"));
        assert!(paths.prompt_path.ends_with("prompt.md"));
        assert!(paths.transcript_path.ends_with("transcript.log"));
        assert!(paths.outcome_path.ends_with("outcome.json"));
    }

    #[test]
    fn writes_all_artifacts_with_truncation_notice() {
        let temp = tempfile::tempdir().expect("tempdir");
        let meta = SessionMeta {
            iteration: 1,
            mode: RunMode::Continue,
            outcome: "continue".to_string(),
            duration_ms: 42,
        };
        let outcome = SessionOutcome::Continue {
            response: "done".to_string(),
        };

        let paths = write_session(&SessionWriteRequest {
            sessions_dir: temp.path(),
            meta: &meta,
            prompt: "the prompt",
            outcome: &outcome,
            transcript: "raw output",
            transcript_truncated: 120,
        })
        .expect("write session");

        assert!(paths.meta_path.is_file());
        assert_eq!(
            fs::read_to_string(&paths.prompt_path).expect("read"),
            "the prompt"
        );
        let transcript = fs::read_to_string(&paths.transcript_path).expect("read");
        assert!(transcript.starts_with("raw output"));
        assert!(transcript.contains("[transcript truncated 120 bytes]"));

        let outcome_json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.outcome_path).expect("read"))
                .expect("parse");
        assert_eq!(outcome_json["outcome"], "continue");
        assert_eq!(outcome_json["response"], "done");
    }
}
