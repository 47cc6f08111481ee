use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    TestFailure,
    SyntaxError,
    ImportError,
    RuntimeError,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TestFailure => "test_failure",
            Self::SyntaxError => "syntax_error",
            Self::ImportError => "import_error",
            Self::RuntimeError => "runtime_error",
        }
    }
}

impl FromStr for IssueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test_failure" => Ok(Self::TestFailure),
            "syntax_error" => Ok(Self::SyntaxError),
            "import_error" => Ok(Self::ImportError),
            "runtime_error" => Ok(Self::RuntimeError),
            _ => Err(format!("Invalid issue type: {}", s)),
        }
    }
}

/// A recorded defect tied to a story. Immutable once created; a fix retry
/// produces a new attempt record, never a mutation of the issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub issue_id: String,
    pub project_name: String,
    pub story_id: String,
    pub issue_type: IssueType,
    pub description: String,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

impl Issue {
    pub fn new(
        project_name: &str,
        story_id: &str,
        issue_type: IssueType,
        description: &str,
        error_message: &str,
    ) -> Self {
        Self {
            issue_id: Uuid::new_v4().to_string(),
            project_name: project_name.to_string(),
            story_id: story_id.to_string(),
            issue_type,
            description: description.to_string(),
            error_message: error_message.to_string(),
            file_path: None,
            line_number: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_file(mut self, path: &str) -> Self {
        self.file_path = Some(path.to_string());
        self
    }
}

/// JSONL-persisted issue journal for one project.
pub struct IssueTracker {
    path: PathBuf,
}

impl IssueTracker {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append one issue record.
    pub fn record(&self, issue: &Issue) -> Result<()> {
        use std::io::Write;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create issue tracker directory")?;
        }
        let line = serde_json::to_string(issue).context("Failed to serialize issue")?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open issue journal")?;
        writeln!(file, "{}", line).context("Failed to write issue")?;
        Ok(())
    }

    /// Load all recorded issues. Unparseable lines are skipped.
    pub fn load(&self) -> Result<Vec<Issue>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    pub fn for_story(&self, story_id: &str) -> Result<Vec<Issue>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|i| i.story_id == story_id)
            .collect())
    }
}
