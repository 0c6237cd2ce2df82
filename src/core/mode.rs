//! Run-mode determination from observed project state.
//!
//! The mode is evaluated once, before the loop, from three facts about the
//! project directory. Initializer modes are one-shot: the driver downgrades
//! them to [`RunMode::Continue`] after the first session regardless of that
//! session's outcome.

use clap::ValueEnum;
use serde::Serialize;

/// Mode selection requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeRequest {
    /// Detect the mode from the project directory contents.
    Auto,
    /// Force the greenfield initializer (new project from scratch).
    Greenfield,
    /// Force the enhancement initializer (add features to existing code).
    Enhancement,
}

/// Which prompt template and post-session verification applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    GreenfieldInit,
    EnhancementInit,
    Continue,
}

impl RunMode {
    pub fn is_initializer(self) -> bool {
        matches!(self, RunMode::GreenfieldInit | RunMode::EnhancementInit)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::GreenfieldInit => "greenfield_init",
            RunMode::EnhancementInit => "enhancement_init",
            RunMode::Continue => "continue",
        }
    }
}

/// Presence facts about the project directory, gathered by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectFacts {
    /// The feature-list artifact exists.
    pub has_feature_list: bool,
    /// The progress marker (sentinel for "initializer has run") exists.
    pub has_progress_marker: bool,
    /// Version-control metadata exists.
    pub has_git: bool,
}

/// Determine the initial run mode.
///
/// Explicit requests are honored directly. In auto mode, a project with no
/// harness files starts an initializer (enhancement when version control is
/// already present, greenfield otherwise); any harness file means a prior
/// session exists and the run continues.
pub fn determine_run_mode(request: ModeRequest, facts: ProjectFacts) -> RunMode {
    match request {
        ModeRequest::Greenfield => RunMode::GreenfieldInit,
        ModeRequest::Enhancement => RunMode::EnhancementInit,
        ModeRequest::Auto => {
            if !facts.has_feature_list && !facts.has_progress_marker {
                if facts.has_git {
                    RunMode::EnhancementInit
                } else {
                    RunMode::GreenfieldInit
                }
            } else {
                RunMode::Continue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(has_feature_list: bool, has_progress_marker: bool, has_git: bool) -> ProjectFacts {
        ProjectFacts {
            has_feature_list,
            has_progress_marker,
            has_git,
        }
    }

    #[test]
    fn explicit_requests_override_detection() {
        let existing = facts(true, true, true);
        assert_eq!(
            determine_run_mode(ModeRequest::Greenfield, existing),
            RunMode::GreenfieldInit
        );
        assert_eq!(
            determine_run_mode(ModeRequest::Enhancement, existing),
            RunMode::EnhancementInit
        );
    }

    #[test]
    fn auto_fresh_directory_is_greenfield() {
        assert_eq!(
            determine_run_mode(ModeRequest::Auto, facts(false, false, false)),
            RunMode::GreenfieldInit
        );
    }

    #[test]
    fn auto_existing_repo_without_harness_is_enhancement() {
        assert_eq!(
            determine_run_mode(ModeRequest::Auto, facts(false, false, true)),
            RunMode::EnhancementInit
        );
    }

    #[test]
    fn auto_any_harness_file_continues() {
        assert_eq!(
            determine_run_mode(ModeRequest::Auto, facts(true, false, false)),
            RunMode::Continue
        );
        assert_eq!(
            determine_run_mode(ModeRequest::Auto, facts(false, true, true)),
            RunMode::Continue
        );
    }

    #[test]
    fn initializer_modes_are_flagged() {
        assert!(RunMode::GreenfieldInit.is_initializer());
        assert!(RunMode::EnhancementInit.is_initializer());
        assert!(!RunMode::Continue.is_initializer());
    }
}
