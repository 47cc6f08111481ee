//! Planner persona: turns a story requirement into a validated task
//! breakdown via the completion gateway.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::backlog::StoryRequirement;
use crate::llm::{ChatMessage, CompletionService, extract_json};
use crate::validators::validate_task_breakdown;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskBreakdown {
    pub tasks: Vec<TaskItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskItem {
    pub task_id: String,
    pub description: String,
    #[serde(default)]
    pub files_to_create: Vec<String>,
}

impl TaskBreakdown {
    /// Build from an already-validated payload. Numeric task ids are
    /// canonicalized to strings.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !validate_task_breakdown(value) {
            return None;
        }
        let tasks = value["tasks"]
            .as_array()?
            .iter()
            .map(|t| {
                let task_id = match &t["task_id"] {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let files_to_create = t
                    .get("files_to_create")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                TaskItem {
                    task_id,
                    description: t["description"].as_str().unwrap_or_default().to_string(),
                    files_to_create,
                }
            })
            .collect();
        Some(Self {
            tasks,
            technical_notes: value
                .get("technical_notes")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

#[derive(Debug, Error)]
pub enum BreakdownError {
    #[error("Planner gateway call failed: {0}")]
    Gateway(#[from] crate::errors::CompletionError),

    #[error("Planner response was not valid JSON: {0}")]
    Malformed(String),

    #[error("Planner response failed validation: {0}")]
    Invalid(String),
}

const PLANNER_SYSTEM_PROMPT: &str = r#"You are a software engineering planner on a scrum team. Break the given user story into small implementation tasks.

You MUST respond with valid JSON only (no markdown, no explanation) matching this schema:
{
  "tasks": [
    {
      "task_id": "1",
      "description": "Detailed task instruction for the developer",
      "files_to_create": ["routes/auth.py"]
    }
  ],
  "technical_notes": "Optional notes shared by all tasks"
}

Rules:
- Every task needs a unique task_id and a concrete description.
- List the files each task creates or modifies in files_to_create.
- Use relative paths only. Never touch files outside the project.
- For simple stories, return a single task - don't over-decompose.
"#;

pub struct Planner {
    gateway: Arc<dyn CompletionService>,
    model: String,
}

impl Planner {
    pub fn new(gateway: Arc<dyn CompletionService>, model: &str) -> Self {
        Self {
            gateway,
            model: model.to_string(),
        }
    }

    /// Request a breakdown for the story. An invalid response is retried
    /// once with an error hint; a second failure is the caller's story
    /// failure.
    pub async fn breakdown(&self, story: &StoryRequirement) -> Result<TaskBreakdown, BreakdownError> {
        let prompt = build_prompt(story);
        match self.request(&prompt).await {
            Ok(breakdown) => Ok(breakdown),
            Err(first) => {
                let hinted = format!(
                    "{}\n\nYour previous response was rejected: {}. \
                     Respond again with valid JSON only, matching the schema exactly.",
                    prompt, first
                );
                self.request(&hinted).await
            }
        }
    }

    async fn request(&self, prompt: &str) -> Result<TaskBreakdown, BreakdownError> {
        let messages = [
            ChatMessage::system(PLANNER_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ];
        let response = self.gateway.complete(&messages, &self.model).await?;

        let value: Value = serde_json::from_str(extract_json(&response))
            .map_err(|e| BreakdownError::Malformed(e.to_string()))?;
        TaskBreakdown::from_value(&value).ok_or_else(|| {
            BreakdownError::Invalid(
                "tasks must be a non-empty list with unique task_id and description".to_string(),
            )
        })
    }
}

fn build_prompt(story: &StoryRequirement) -> String {
    let criteria = if story.acceptance_criteria.is_empty() {
        "- (none given)".to_string()
    } else {
        story
            .acceptance_criteria
            .iter()
            .map(|c| format!("- {}", c))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "Break down this user story into implementation tasks.\n\n\
         ## Story {}\n\
         **Title:** {}\n\
         **User story:** {}\n\
         **Acceptance criteria:**\n{}\n\n\
         Respond with JSON only.",
        story.story_id, story.title, story.user_story, criteria,
    )
}
