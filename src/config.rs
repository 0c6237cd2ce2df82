//! Harness configuration and credentials.
//!
//! The config file lives at `.autocoder/config.toml` inside the project
//! directory. It is intended to be edited by humans and must remain stable;
//! missing fields default to sensible values. Credentials are read once at
//! startup into an explicit value passed into client construction, never
//! consulted as ambient state by the driver or parser.

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Harness configuration (TOML).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Delay after a successful session before the next one, to allow
    /// external inspection.
    pub auto_continue_delay_secs: u64,

    /// General inter-session pacing delay.
    pub pacing_delay_secs: u64,

    /// A single streamed message above this size raises the oversized
    /// response failure.
    pub max_line_bytes: usize,

    /// Truncate per-session raw transcripts beyond this many bytes.
    pub transcript_limit_bytes: usize,

    /// Command used to launch the structured-message backend.
    pub claude_command: String,

    /// Command used to launch the raw-text backend.
    pub copilot_command: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            auto_continue_delay_secs: 3,
            pacing_delay_secs: 1,
            max_line_bytes: 1024 * 1024,
            transcript_limit_bytes: 100_000,
            claude_command: "claude".to_string(),
            copilot_command: "copilot".to_string(),
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_line_bytes == 0 {
            return Err(anyhow!("max_line_bytes must be > 0"));
        }
        if self.transcript_limit_bytes == 0 {
            return Err(anyhow!("transcript_limit_bytes must be > 0"));
        }
        if self.claude_command.trim().is_empty() {
            return Err(anyhow!("claude_command must not be empty"));
        }
        if self.copilot_command.trim().is_empty() {
            return Err(anyhow!("copilot_command must not be empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `HarnessConfig::default()`.
pub fn load_config(path: &Path) -> Result<HarnessConfig> {
    if !path.exists() {
        let cfg = HarnessConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HarnessConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &HarnessConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

/// API token for the structured backend, read once at startup.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    oauth_token: Option<String>,
}

impl Credentials {
    /// Read the token from `CLAUDE_CODE_OAUTH_TOKEN`, falling back to
    /// `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Self {
        let oauth_token = env::var("CLAUDE_CODE_OAUTH_TOKEN")
            .or_else(|_| env::var("ANTHROPIC_API_KEY"))
            .ok()
            .filter(|token| !token.trim().is_empty());
        Self { oauth_token }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            oauth_token: Some(token.into()),
        }
    }

    /// The token, or a configuration error naming the fix.
    pub fn require_token(&self) -> Result<&str> {
        self.oauth_token.as_deref().ok_or_else(|| {
            anyhow!(
                "no API token set: export CLAUDE_CODE_OAUTH_TOKEN (from `claude setup-token`) \
                 or ANTHROPIC_API_KEY"
            )
        })
    }
}
