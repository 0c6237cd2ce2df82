//! Test-only helpers: scripted providers and temp projects.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use anyhow::{Result, anyhow};

use crate::core::event::Event;
use crate::io::paths::ProjectPaths;
use crate::io::provider::{EventStream, ProviderClient, ProviderFactory};

/// One scripted item: an event or a mid-stream failure.
#[derive(Debug, Clone)]
pub enum ScriptedItem {
    Event(Event),
    Error(String),
}

/// A predetermined session: what `send` does and what the stream yields.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSession {
    pub items: Vec<ScriptedItem>,
    pub send_error: Option<String>,
}

impl ScriptedSession {
    /// A clean session yielding one text event and a zero exit.
    pub fn continue_with_text(text: &str) -> Self {
        Self {
            items: vec![
                ScriptedItem::Event(Event::Text {
                    content: text.to_string(),
                }),
                ScriptedItem::Event(Event::ProcessDone { exit_code: 0 }),
            ],
            send_error: None,
        }
    }

    /// A session whose stream fails mid-consumption.
    pub fn stream_error(message: &str) -> Self {
        Self {
            items: vec![ScriptedItem::Error(message.to_string())],
            send_error: None,
        }
    }

    /// A session that hits the backend rate limit in a tool result.
    pub fn rate_limited(content: &str) -> Self {
        Self {
            items: vec![ScriptedItem::Event(Event::ToolResult {
                content: content.to_string(),
                is_error: false,
            })],
            send_error: None,
        }
    }

    pub fn with_events(items: Vec<Event>) -> Self {
        Self {
            items: items.into_iter().map(ScriptedItem::Event).collect(),
            send_error: None,
        }
    }
}

/// Factory that replays predetermined sessions in order and records every
/// prompt it was sent.
pub struct ScriptedFactory {
    sessions: RefCell<VecDeque<ScriptedSession>>,
    prompts: Rc<RefCell<Vec<String>>>,
}

impl ScriptedFactory {
    pub fn new(sessions: Vec<ScriptedSession>) -> Self {
        Self {
            sessions: RefCell::new(sessions.into()),
            prompts: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Prompts sent so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl ProviderFactory for ScriptedFactory {
    fn create_client(&self) -> Result<Box<dyn ProviderClient>> {
        let session = self
            .sessions
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted factory exhausted"))?;
        Ok(Box::new(ScriptedClient {
            session: Some(session),
            prompts: Rc::clone(&self.prompts),
        }))
    }
}

pub struct ScriptedClient {
    session: Option<ScriptedSession>,
    prompts: Rc<RefCell<Vec<String>>>,
}

impl ProviderClient for ScriptedClient {
    fn send(&mut self, prompt: &str) -> Result<()> {
        self.prompts.borrow_mut().push(prompt.to_string());
        if let Some(session) = &mut self.session
            && let Some(message) = session.send_error.take()
        {
            return Err(anyhow!(message));
        }
        Ok(())
    }

    fn events(&mut self) -> Result<EventStream> {
        let session = self
            .session
            .take()
            .ok_or_else(|| anyhow!("scripted session already consumed"))?;
        let items = session
            .items
            .into_iter()
            .map(|item| match item {
                ScriptedItem::Event(event) => Ok(event),
                ScriptedItem::Error(message) => Err(anyhow!(message)),
            })
            .collect();
        Ok(EventStream::from_events(items))
    }
}

/// Temp project directory with helpers for seeding harness files.
pub struct TestProject {
    /// Kept alive so the directory survives for the test's duration.
    _temp: tempfile::TempDir,
    pub paths: ProjectPaths,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let paths = ProjectPaths::new(temp.path());
        Ok(Self { _temp: temp, paths })
    }

    pub fn write_feature_list(&self, contents: &str) -> Result<()> {
        std::fs::write(&self.paths.feature_list_path, contents)?;
        Ok(())
    }

    /// Write a feature list with one record per entry in `passes`.
    pub fn write_features(&self, passes: &[bool]) -> Result<()> {
        let records: Vec<serde_json::Value> = passes
            .iter()
            .enumerate()
            .map(|(index, passes)| {
                serde_json::json!({
                    "id": index + 1,
                    "description": format!("feature {}", index + 1),
                    "passes": passes,
                })
            })
            .collect();
        self.write_feature_list(&serde_json::to_string_pretty(&records)?)
    }

    pub fn touch_progress_marker(&self) -> Result<()> {
        std::fs::write(&self.paths.progress_marker_path, "")?;
        Ok(())
    }

    pub fn init_git_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.paths.git_dir)?;
        Ok(())
    }

    pub fn write_spec(&self, contents: &str) -> Result<()> {
        std::fs::write(&self.paths.spec_path, contents)?;
        Ok(())
    }
}
