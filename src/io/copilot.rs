//! Raw-text backend: the Copilot CLI as a non-interactive subprocess.
//!
//! The CLI produces an unstructured text stream. Stdout is read in fixed-size
//! chunks and normalized through the incremental [`StreamEventParser`], so
//! the driver sees the same event shape as the structured backend. One parser
//! instance per client, fed in strict arrival order from a single reader.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{ChildStdout, Command};
use std::sync::Arc;
use std::sync::mpsc::Sender;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use crate::core::event::Event;
use crate::core::parser::StreamEventParser;
use crate::io::provider::{EventStream, ProviderClient, ProviderFactory};
use crate::io::security::{CommandPolicy, observe_event};

const READ_CHUNK_BYTES: usize = 4096;

/// Builds one fresh [`CopilotClient`] per iteration.
pub struct CopilotFactory {
    project_dir: PathBuf,
    config_dir: PathBuf,
    command: String,
    policy: Arc<dyn CommandPolicy>,
}

impl CopilotFactory {
    pub fn new(
        project_dir: impl Into<PathBuf>,
        config_dir: impl Into<PathBuf>,
        command: impl Into<String>,
        policy: Arc<dyn CommandPolicy>,
    ) -> Self {
        Self {
            project_dir: project_dir.into(),
            config_dir: config_dir.into(),
            command: command.into(),
            policy,
        }
    }
}

impl ProviderFactory for CopilotFactory {
    fn create_client(&self) -> Result<Box<dyn ProviderClient>> {
        ensure_copilot_config(&self.config_dir)?;
        info!(project_dir = %self.project_dir.display(), "created copilot client");
        Ok(Box::new(CopilotClient {
            project_dir: self.project_dir.clone(),
            config_dir: self.config_dir.clone(),
            command: self.command.clone(),
            policy: Arc::clone(&self.policy),
            prompt: None,
        }))
    }
}

pub struct CopilotClient {
    project_dir: PathBuf,
    config_dir: PathBuf,
    command: String,
    policy: Arc<dyn CommandPolicy>,
    prompt: Option<String>,
}

impl ProviderClient for CopilotClient {
    fn send(&mut self, prompt: &str) -> Result<()> {
        self.prompt = Some(prompt.to_string());
        Ok(())
    }

    #[instrument(skip_all, fields(project_dir = %self.project_dir.display()))]
    fn events(&mut self) -> Result<EventStream> {
        let prompt = self
            .prompt
            .take()
            .ok_or_else(|| anyhow!("no prompt queued (call send first)"))?;

        let mut cmd = Command::new(&self.command);
        cmd.arg("-p")
            .arg(&prompt)
            // Autonomous operation without confirmations, with the project
            // directory pre-trusted.
            .arg("--allow-all-tools")
            .arg("--add-dir")
            .arg(&self.project_dir)
            .current_dir(&self.project_dir)
            .env("XDG_CONFIG_HOME", &self.config_dir);

        let policy = Arc::clone(&self.policy);
        EventStream::spawn(cmd, None, move |stdout, tx| {
            pump_parsed_chunks(stdout, tx, policy.as_ref());
        })
    }
}

/// Read fixed-size chunks, feed the parser, and forward its events.
fn pump_parsed_chunks(mut stdout: ChildStdout, tx: Sender<Result<Event>>, policy: &dyn CommandPolicy) {
    let mut parser = StreamEventParser::new();
    let mut buf = [0u8; READ_CHUNK_BYTES];
    loop {
        match stdout.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]);
                for event in parser.feed(&chunk) {
                    observe_event(policy, &event);
                    if tx.send(Ok(event)).is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                let _ = tx.send(Err(anyhow!(err).context("read backend stdout")));
                return;
            }
        }
    }
    for event in parser.finish() {
        observe_event(policy, &event);
        if tx.send(Ok(event)).is_err() {
            return;
        }
    }
}

/// Ensure the project-level config home exists with an MCP server config.
///
/// An existing `mcp-config.json` is left untouched so user edits survive.
fn ensure_copilot_config(config_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("create copilot config dir {}", config_dir.display()))?;
    let mcp_config_path = config_dir.join("mcp-config.json");
    if mcp_config_path.exists() {
        return Ok(());
    }
    let config = serde_json::json!({ "mcpServers": {} });
    let mut buf = serde_json::to_string_pretty(&config)?;
    buf.push('\n');
    std::fs::write(&mcp_config_path, buf)
        .with_context(|| format!("write {}", mcp_config_path.display()))?;
    debug!(path = %mcp_config_path.display(), "wrote default mcp config");
    Ok(())
}
