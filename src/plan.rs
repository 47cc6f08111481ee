use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::PlanStoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SprintStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl SprintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for SprintStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "executing" => Ok(Self::Executing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid sprint status: {}", s)),
        }
    }
}

/// A bounded unit of work: an ordered list of story ids to execute.
/// Owned by the orchestrator for the sprint's lifetime and persisted after
/// every status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SprintPlan {
    pub sprint_id: String,
    pub stories: Vec<String>,
    pub status: SprintStatus,
    #[serde(default)]
    pub backups: Vec<String>,
}

impl SprintPlan {
    pub fn new(sprint_id: &str, stories: Vec<String>) -> Self {
        Self {
            sprint_id: sprint_id.to_string(),
            stories,
            status: SprintStatus::Pending,
            backups: Vec::new(),
        }
    }
}

/// One JSON plan file per sprint.
pub struct PlanStore {
    dir: PathBuf,
}

impl PlanStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn plan_path(&self, sprint_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sprint_id))
    }

    pub fn load(&self, sprint_id: &str) -> Result<SprintPlan, PlanStoreError> {
        let path = self.plan_path(sprint_id);
        if !path.exists() {
            return Err(PlanStoreError::NotFound {
                sprint_id: sprint_id.to_string(),
            });
        }
        let content = std::fs::read_to_string(&path).map_err(|source| {
            PlanStoreError::ReadFailed {
                path: path.clone(),
                source,
            }
        })?;
        serde_json::from_str(&content).map_err(|source| PlanStoreError::Malformed { path, source })
    }

    pub fn save(&self, plan: &SprintPlan) -> Result<(), PlanStoreError> {
        let path = self.plan_path(&plan.sprint_id);
        std::fs::create_dir_all(&self.dir).map_err(|source| PlanStoreError::WriteFailed {
            path: path.clone(),
            source,
        })?;
        let json = serde_json::to_string_pretty(plan).expect("plan serialization is infallible");
        std::fs::write(&path, json).map_err(|source| PlanStoreError::WriteFailed { path, source })
    }
}
