//! Canonical paths within a project directory.

use std::path::{Path, PathBuf};

use crate::core::mode::ProjectFacts;

/// All well-known file locations for one project root.
///
/// The feature list, progress marker, and spec file live at the top of the
/// project directory where the agent reads and writes them; everything the
/// harness owns lives under `.autocoder/`.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    /// Externally owned record of required behaviors (`feature_list.json`).
    pub feature_list_path: PathBuf,
    /// Presence-only sentinel: the initializer has run.
    pub progress_marker_path: PathBuf,
    /// Application spec the initializer works from.
    pub spec_path: PathBuf,
    /// Presence-only sentinel: version control metadata.
    pub git_dir: PathBuf,
    /// Harness-owned directory.
    pub harness_dir: PathBuf,
    /// Human-edited harness configuration (TOML).
    pub config_path: PathBuf,
    /// Per-session artifact directories.
    pub sessions_dir: PathBuf,
    /// Security settings handed to the structured backend.
    pub settings_path: PathBuf,
    /// Config home handed to the raw-text backend.
    pub copilot_config_dir: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let harness_dir = root.join(".autocoder");
        Self {
            feature_list_path: root.join("feature_list.json"),
            progress_marker_path: root.join("agent_progress.txt"),
            spec_path: root.join("app_spec.txt"),
            git_dir: root.join(".git"),
            config_path: harness_dir.join("config.toml"),
            sessions_dir: harness_dir.join("sessions"),
            settings_path: harness_dir.join("claude_settings.json"),
            copilot_config_dir: harness_dir.join("copilot"),
            harness_dir,
            root,
        }
    }

    /// Gather the presence facts that drive run-mode determination.
    pub fn facts(&self) -> ProjectFacts {
        ProjectFacts {
            has_feature_list: self.feature_list_path.exists(),
            has_progress_marker: self.progress_marker_path.exists(),
            has_git: self.git_dir.exists(),
        }
    }
}

impl AsRef<Path> for ProjectPaths {
    fn as_ref(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_stable() {
        let paths = ProjectPaths::new("/work/project");
        assert!(paths.feature_list_path.ends_with("feature_list.json"));
        assert!(paths.progress_marker_path.ends_with("agent_progress.txt"));
        assert!(paths.spec_path.ends_with("app_spec.txt"));
        assert!(paths.config_path.ends_with(".autocoder/config.toml"));
        assert!(paths.sessions_dir.ends_with(".autocoder/sessions"));
    }

    #[test]
    fn facts_reflect_directory_contents() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(temp.path());

        let facts = paths.facts();
        assert!(!facts.has_feature_list);
        assert!(!facts.has_progress_marker);
        assert!(!facts.has_git);

        std::fs::write(&paths.feature_list_path, "[]").expect("write");
        std::fs::create_dir_all(&paths.git_dir).expect("mkdir");
        let facts = paths.facts();
        assert!(facts.has_feature_list);
        assert!(facts.has_git);
    }
}
