//! Prompt rendering for session modes.
//!
//! Templates are compiled in; rendering only substitutes the well-known file
//! names, so mode prompts are deterministic across iterations. The advisory
//! block is a fixed-format prefix: the prompt for an iteration that follows
//! a failure is exactly `advisory(error) + mode prompt`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};

use crate::core::mode::RunMode;
use crate::io::paths::ProjectPaths;

const GREENFIELD_TEMPLATE: &str = include_str!("prompts/greenfield.md");
const ENHANCEMENT_TEMPLATE: &str = include_str!("prompts/enhancement.md");
const CODING_TEMPLATE: &str = include_str!("prompts/coding.md");
const ADVISORY_TEMPLATE: &str = include_str!("prompts/advisory.md");

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("greenfield", GREENFIELD_TEMPLATE)
            .expect("greenfield template should be valid");
        env.add_template("enhancement", ENHANCEMENT_TEMPLATE)
            .expect("enhancement template should be valid");
        env.add_template("coding", CODING_TEMPLATE)
            .expect("coding template should be valid");
        env.add_template("advisory", ADVISORY_TEMPLATE)
            .expect("advisory template should be valid");
        Self { env }
    }

    fn render_mode(&self, mode: RunMode) -> String {
        let name = match mode {
            RunMode::GreenfieldInit => "greenfield",
            RunMode::EnhancementInit => "enhancement",
            RunMode::Continue => "coding",
        };
        let template = self.env.get_template(name).expect("registered template");
        template
            .render(context! {
                feature_list => "feature_list.json",
                progress_file => "agent_progress.txt",
                spec_file => "app_spec.txt",
            })
            .expect("mode template rendering should not fail")
    }

    fn render_advisory(&self, error: &str) -> String {
        let template = self.env.get_template("advisory").expect("registered template");
        template
            .render(context! { error => error })
            .expect("advisory template rendering should not fail")
    }
}

/// Prompt body for the given mode.
pub fn prompt_for_mode(mode: RunMode) -> String {
    PromptEngine::new().render_mode(mode)
}

/// The fixed-format previous-error advisory block.
pub fn advisory_block(error: &str) -> String {
    PromptEngine::new().render_advisory(error)
}

/// Full prompt for one iteration: the advisory block (when an error was
/// carried forward) followed by the unmodified mode prompt.
pub fn compose_prompt(mode_prompt: &str, carried_error: Option<&str>) -> String {
    match carried_error {
        Some(error) => format!("{}{}", advisory_block(error), mode_prompt),
        None => mode_prompt.to_string(),
    }
}

/// Place the application spec into the project for a greenfield run.
///
/// An existing `app_spec.txt` is kept as-is; otherwise `spec_source` is
/// copied in. Without either, the initializer has nothing to build from.
pub fn copy_spec_to_project(paths: &ProjectPaths, spec_source: Option<&Path>) -> Result<()> {
    if paths.spec_path.exists() {
        return Ok(());
    }
    let source = spec_source.ok_or_else(|| {
        anyhow!(
            "no app_spec.txt in {} and no --spec-file given; the initializer needs a spec",
            paths.root.display()
        )
    })?;
    fs::copy(source, &paths.spec_path).with_context(|| {
        format!(
            "copy spec {} to {}",
            source.display(),
            paths.spec_path.display()
        )
    })?;
    Ok(())
}

/// Verify a spec exists for an enhancement run, copying one in if provided.
pub fn copy_or_verify_spec(paths: &ProjectPaths, spec_source: Option<&Path>) -> Result<()> {
    if paths.spec_path.exists() {
        return Ok(());
    }
    match spec_source {
        Some(source) => {
            fs::copy(source, &paths.spec_path).with_context(|| {
                format!(
                    "copy spec {} to {}",
                    source.display(),
                    paths.spec_path.display()
                )
            })?;
            Ok(())
        }
        None => Err(anyhow!(
            "no app_spec.txt found in {}; create one describing the features to add, \
             or pass --spec-file",
            paths.root.display()
        )),
    }
}
