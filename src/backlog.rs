//! Tabular backlog store: one CSV row per story, with execution-status
//! columns the orchestrator updates as a story moves through the sprint.
//!
//! Updates are last-writer-wins field sets (never increments) so interleaved
//! writers from other subsystems cannot corrupt counters. A failed update is
//! reported as a skip reason, not an error — backlog bookkeeping is never
//! allowed to abort a sprint.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Columns every backlog file must carry.
const REQUIRED_COLUMNS: &[&str] = &[
    "Story_ID",
    "Sprint_ID",
    "Story_Title",
    "User_Story",
    "Acceptance_Criteria",
    "Execution_Status",
    "Execution_Started_At",
    "Execution_Completed_At",
    "Last_Event",
    "Last_Updated",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    NotStarted,
    InProgress,
    Done,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid execution status: {}", s)),
        }
    }
}

/// The requirement half of a backlog row, consumed by the personas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryRequirement {
    pub story_id: String,
    pub title: String,
    pub user_story: String,
    pub acceptance_criteria: Vec<String>,
}

/// Outcome of a row update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Applied,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    StoreMissing,
    HeaderMismatch { missing: Vec<String> },
    StoryNotFound { story_id: String },
    Io(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StoreMissing => write!(f, "backlog store missing"),
            Self::HeaderMismatch { missing } => {
                write!(f, "header mismatch, missing columns: {}", missing.join(", "))
            }
            Self::StoryNotFound { story_id } => write!(f, "story {} not found", story_id),
            Self::Io(msg) => write!(f, "i/o error: {}", msg),
        }
    }
}

pub struct BacklogStore {
    path: PathBuf,
}

impl BacklogStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Set fields on the story's row and rewrite the file.
    /// Unknown field names are ignored; known fields are overwritten whole.
    pub fn update_row(&self, story_id: &str, updates: &[(&str, String)]) -> UpdateOutcome {
        if !self.path.exists() {
            return UpdateOutcome::Skipped(SkipReason::StoreMissing);
        }

        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => return UpdateOutcome::Skipped(SkipReason::Io(e.to_string())),
        };

        let mut lines = content.lines();
        let Some(header_line) = lines.next() else {
            return UpdateOutcome::Skipped(SkipReason::HeaderMismatch {
                missing: REQUIRED_COLUMNS.iter().map(|s| s.to_string()).collect(),
            });
        };
        let header = parse_csv_line(header_line);

        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|c| !header.iter().any(|h| h == *c))
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return UpdateOutcome::Skipped(SkipReason::HeaderMismatch { missing });
        }

        let id_idx = header
            .iter()
            .position(|h| h == "Story_ID")
            .expect("Story_ID is a required column");
        let mut rows: Vec<Vec<String>> = lines.map(parse_csv_line).collect();
        let Some(row) = rows
            .iter_mut()
            .find(|r| r.get(id_idx).map(String::as_str) == Some(story_id))
        else {
            return UpdateOutcome::Skipped(SkipReason::StoryNotFound {
                story_id: story_id.to_string(),
            });
        };

        row.resize(header.len(), String::new());
        for (field, value) in updates {
            if let Some(idx) = header.iter().position(|h| h == field) {
                row[idx] = value.clone();
            }
        }

        let mut out = String::new();
        out.push_str(&format_csv_line(&header));
        out.push('\n');
        for row in &rows {
            out.push_str(&format_csv_line(row));
            out.push('\n');
        }

        match std::fs::write(&self.path, out) {
            Ok(()) => UpdateOutcome::Applied,
            Err(e) => UpdateOutcome::Skipped(SkipReason::Io(e.to_string())),
        }
    }

    /// Look up a story's requirement fields. Acceptance criteria are stored
    /// ";"-separated within their cell.
    pub fn story(&self, story_id: &str) -> Result<Option<StoryRequirement>> {
        let Some(row) = self.row(story_id)? else {
            return Ok(None);
        };

        let criteria: Vec<String> = row
            .get("Acceptance_Criteria")
            .map(|cell| {
                cell.split(';')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(StoryRequirement {
            story_id: story_id.to_string(),
            title: row.get("Story_Title").cloned().unwrap_or_default(),
            user_story: row.get("User_Story").cloned().unwrap_or_default(),
            acceptance_criteria: criteria,
        }))
    }

    /// Read one cell of the story's row.
    pub fn get_field(&self, story_id: &str, column: &str) -> Result<Option<String>> {
        Ok(self.row(story_id)?.and_then(|row| row.get(column).cloned()))
    }

    fn row(&self, story_id: &str) -> Result<Option<HashMap<String, String>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read backlog {}", self.path.display()))?;

        let mut lines = content.lines();
        let Some(header_line) = lines.next() else {
            return Ok(None);
        };
        let header = parse_csv_line(header_line);
        let Some(id_idx) = header.iter().position(|h| h == "Story_ID") else {
            return Ok(None);
        };

        for line in lines {
            let row = parse_csv_line(line);
            if row.get(id_idx).map(String::as_str) == Some(story_id) {
                let map = header
                    .iter()
                    .cloned()
                    .zip(row.into_iter().chain(std::iter::repeat(String::new())))
                    .collect();
                return Ok(Some(map));
            }
        }
        Ok(None)
    }
}

/// Split one CSV line, honoring double-quoted cells and `""` escapes.
fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut field));
            }
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

fn format_csv_line(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| {
            if f.contains(',') || f.contains('"') || f.contains('\n') {
                format!("\"{}\"", f.replace('"', "\"\""))
            } else {
                f.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const HEADER: &str = "Story_ID,Sprint_ID,Story_Title,User_Story,Acceptance_Criteria,Execution_Status,Execution_Started_At,Execution_Completed_At,Last_Event,Last_Updated";

    fn seed_backlog(rows: &[&str]) -> (BacklogStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backlog.csv");
        let mut content = String::from(HEADER);
        content.push('\n');
        for row in rows {
            content.push_str(row);
            content.push('\n');
        }
        std::fs::write(&path, content).unwrap();
        (BacklogStore::new(path), dir)
    }

    #[test]
    fn test_update_row_applies_fields() {
        let (store, _dir) = seed_backlog(&[
            "US-1,sprint-1,Login,As a user I want to log in,Form renders;Errors shown,not_started,,,,",
        ]);

        let outcome = store.update_row(
            "US-1",
            &[
                ("Execution_Status", "in_progress".to_string()),
                ("Last_Event", "story_started".to_string()),
            ],
        );
        assert_eq!(outcome, UpdateOutcome::Applied);
        assert_eq!(
            store.get_field("US-1", "Execution_Status").unwrap().as_deref(),
            Some("in_progress")
        );
        assert_eq!(
            store.get_field("US-1", "Last_Event").unwrap().as_deref(),
            Some("story_started")
        );
    }

    #[test]
    fn test_update_row_store_missing() {
        let dir = tempdir().unwrap();
        let store = BacklogStore::new(dir.path().join("absent.csv"));
        let outcome = store.update_row("US-1", &[("Execution_Status", "done".to_string())]);
        assert_eq!(outcome, UpdateOutcome::Skipped(SkipReason::StoreMissing));
    }

    #[test]
    fn test_update_row_header_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backlog.csv");
        std::fs::write(&path, "Story_ID,Title\nUS-1,Login\n").unwrap();
        let store = BacklogStore::new(path);

        match store.update_row("US-1", &[("Execution_Status", "done".to_string())]) {
            UpdateOutcome::Skipped(SkipReason::HeaderMismatch { missing }) => {
                assert!(missing.contains(&"Execution_Status".to_string()));
            }
            other => panic!("Expected HeaderMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_update_row_story_not_found() {
        let (store, _dir) = seed_backlog(&["US-1,sprint-1,Login,story,criteria,not_started,,,,"]);
        match store.update_row("US-99", &[("Execution_Status", "done".to_string())]) {
            UpdateOutcome::Skipped(SkipReason::StoryNotFound { story_id }) => {
                assert_eq!(story_id, "US-99");
            }
            other => panic!("Expected StoryNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_update_preserves_other_rows() {
        let (store, _dir) = seed_backlog(&[
            "US-1,sprint-1,Login,story one,a;b,not_started,,,,",
            "US-2,sprint-1,Logout,story two,c,not_started,,,,",
        ]);
        store.update_row("US-2", &[("Execution_Status", "done".to_string())]);
        assert_eq!(
            store.get_field("US-1", "Execution_Status").unwrap().as_deref(),
            Some("not_started")
        );
        assert_eq!(
            store.get_field("US-2", "Execution_Status").unwrap().as_deref(),
            Some("done")
        );
    }

    #[test]
    fn test_story_requirement_splits_criteria() {
        let (store, _dir) = seed_backlog(&[
            "US-1,sprint-1,Login,\"As a user, I want to log in\",Form renders; Errors shown ;,not_started,,,,",
        ]);
        let req = store.story("US-1").unwrap().unwrap();
        assert_eq!(req.title, "Login");
        assert_eq!(req.user_story, "As a user, I want to log in");
        assert_eq!(req.acceptance_criteria, vec!["Form renders", "Errors shown"]);
    }

    #[test]
    fn test_story_unknown_returns_none() {
        let (store, _dir) = seed_backlog(&["US-1,sprint-1,Login,story,criteria,not_started,,,,"]);
        assert!(store.story("US-42").unwrap().is_none());
    }

    #[test]
    fn test_quoted_cells_round_trip_through_update() {
        let (store, _dir) = seed_backlog(&[
            "US-1,sprint-1,\"Login, quickly\",\"He said \"\"go\"\"\",a;b,not_started,,,,",
        ]);
        store.update_row("US-1", &[("Execution_Status", "done".to_string())]);
        assert_eq!(
            store.get_field("US-1", "Story_Title").unwrap().as_deref(),
            Some("Login, quickly")
        );
        assert_eq!(
            store.get_field("US-1", "User_Story").unwrap().as_deref(),
            Some("He said \"go\"")
        );
    }

    #[test]
    fn test_parse_csv_line_quotes() {
        assert_eq!(
            parse_csv_line("a,\"b,c\",\"d\"\"e\""),
            vec!["a", "b,c", "d\"e"]
        );
        assert_eq!(parse_csv_line("x,,z"), vec!["x", "", "z"]);
    }

    #[test]
    fn test_execution_status_round_trip() {
        for status in [
            ExecutionStatus::NotStarted,
            ExecutionStatus::InProgress,
            ExecutionStatus::Done,
            ExecutionStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>().unwrap(), status);
        }
        assert!("paused".parse::<ExecutionStatus>().is_err());
    }
}
