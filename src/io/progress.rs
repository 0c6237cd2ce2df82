//! Feature-list store: the sole source of truth for "is the work done".
//!
//! The artifact is a JSON array of objects with at least `id` and a boolean
//! `passes`. Reads fail soft: counting functions report `(0, 0)` for missing
//! or malformed storage, and the driver distinguishes "missing" (expected
//! before the initializer runs) from "malformed" (fatal) at the point of use
//! via [`load_feature_list`].

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const FEATURE_LIST_SCHEMA: &str = include_str!("../../schemas/feature_list.schema.json");

/// One required behavior and its pass/fail status.
///
/// Ids are agent-assigned and may be numbers or strings; unknown fields are
/// ignored so the agent can attach its own bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub id: Value,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub passes: bool,
}

/// Result of reading the feature-list artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureListState {
    /// No work defined yet (expected before the initializer runs).
    Missing,
    /// The artifact exists but cannot be used.
    Corrupted { message: String },
    Loaded(Vec<FeatureRecord>),
}

/// Read the feature list, distinguishing missing from malformed.
pub fn load_feature_list(path: &Path) -> FeatureListState {
    if !path.exists() {
        return FeatureListState::Missing;
    }
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            return FeatureListState::Corrupted {
                message: format!("read {}: {err}", path.display()),
            };
        }
    };
    match serde_json::from_str::<Vec<FeatureRecord>>(&contents) {
        Ok(records) => FeatureListState::Loaded(records),
        Err(err) => FeatureListState::Corrupted {
            message: format!("parse {}: {err}", path.display()),
        },
    }
}

/// Read the feature list and validate it against the schema.
///
/// Used after an initializer session, where a structurally invalid artifact
/// is as fatal as an unparseable one.
pub fn verify_feature_list(path: &Path) -> FeatureListState {
    if !path.exists() {
        return FeatureListState::Missing;
    }
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            return FeatureListState::Corrupted {
                message: format!("read {}: {err}", path.display()),
            };
        }
    };
    let instance: Value = match serde_json::from_str(&contents) {
        Ok(value) => value,
        Err(err) => {
            return FeatureListState::Corrupted {
                message: format!("parse {}: {err}", path.display()),
            };
        }
    };
    if let Err(err) = validate_schema(&instance) {
        return FeatureListState::Corrupted {
            message: format!("{err:#}"),
        };
    }
    load_feature_list(path)
}

/// Validate a JSON instance against the feature-list schema (Draft 2020-12).
fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value =
        serde_json::from_str(FEATURE_LIST_SCHEMA).context("parse feature list schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile feature list schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

/// Count `(passing, total)` records. Missing or malformed storage reports
/// `(0, 0)`.
pub fn count_passing(path: &Path) -> (usize, usize) {
    match load_feature_list(path) {
        FeatureListState::Loaded(records) => {
            let total = records.len();
            let passing = records.iter().filter(|record| record.passes).count();
            (passing, total)
        }
        FeatureListState::Missing => (0, 0),
        FeatureListState::Corrupted { message } => {
            debug!(message = %message, "feature list unreadable, reporting zero counts");
            (0, 0)
        }
    }
}

/// Completion invariant: true iff the list is empty or every record passes.
///
/// Missing or corrupted storage is never complete.
pub fn is_work_complete(path: &Path) -> bool {
    match load_feature_list(path) {
        FeatureListState::Loaded(records) => records.iter().all(|record| record.passes),
        FeatureListState::Missing | FeatureListState::Corrupted { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        fs::write(path, contents).expect("write feature list");
    }

    #[test]
    fn missing_list_is_not_complete_and_counts_zero() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("feature_list.json");
        assert!(!is_work_complete(&path));
        assert_eq!(count_passing(&path), (0, 0));
        assert_eq!(load_feature_list(&path), FeatureListState::Missing);
    }

    #[test]
    fn empty_list_is_complete() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("feature_list.json");
        write(&path, "[]");
        assert!(is_work_complete(&path));
        assert_eq!(count_passing(&path), (0, 0));
    }

    #[test]
    fn complete_iff_every_record_passes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("feature_list.json");

        write(
            &path,
            r#"[{"id":1,"description":"a","passes":true},{"id":2,"passes":false}]"#,
        );
        assert!(!is_work_complete(&path));
        assert_eq!(count_passing(&path), (1, 2));

        write(
            &path,
            r#"[{"id":1,"passes":true},{"id":"two","passes":true}]"#,
        );
        assert!(is_work_complete(&path));
        assert_eq!(count_passing(&path), (2, 2));
    }

    #[test]
    fn corrupted_list_is_not_complete_and_counts_zero() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("feature_list.json");
        write(&path, "{not json");
        assert!(!is_work_complete(&path));
        assert_eq!(count_passing(&path), (0, 0));
        assert!(matches!(
            load_feature_list(&path),
            FeatureListState::Corrupted { .. }
        ));
    }

    #[test]
    fn missing_passes_field_defaults_to_false() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("feature_list.json");
        write(&path, r#"[{"id":1,"description":"x"}]"#);
        assert!(!is_work_complete(&path));
        assert_eq!(count_passing(&path), (0, 1));
    }

    #[test]
    fn verify_accepts_schema_conformant_lists() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("feature_list.json");
        write(&path, r#"[{"id":1,"description":"a","passes":false}]"#);
        assert!(matches!(
            verify_feature_list(&path),
            FeatureListState::Loaded(_)
        ));
    }

    #[test]
    fn verify_rejects_structurally_invalid_lists() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("feature_list.json");

        // Parseable JSON, but not an array of feature records.
        write(&path, r#"{"id":1,"passes":true}"#);
        assert!(matches!(
            verify_feature_list(&path),
            FeatureListState::Corrupted { .. }
        ));

        // `passes` must be a boolean.
        write(&path, r#"[{"id":1,"passes":"yes"}]"#);
        assert!(matches!(
            verify_feature_list(&path),
            FeatureListState::Corrupted { .. }
        ));
    }

    #[test]
    fn verify_distinguishes_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("feature_list.json");
        assert_eq!(verify_feature_list(&path), FeatureListState::Missing);
    }
}
