//! Coder persona: implementation and fix patches via the completion
//! gateway, parsed and structurally validated before anything reaches disk.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::backlog::StoryRequirement;
use crate::breakdown::TaskItem;
use crate::issues::Issue;
use crate::llm::{ChatMessage, CompletionService, extract_json};
use crate::validators::{content_parses, is_safe_rel_path, normalize_files, validate_code_output};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeOutput {
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub content: String,
}

impl CodeOutput {
    /// Build from an already-validated payload; both the sequence and the
    /// mapping form of `files` normalize to the sequence form here.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !validate_code_output(value) {
            return None;
        }
        let files = normalize_files(value)?
            .into_iter()
            .map(|(path, content)| FileEntry { path, content })
            .collect();
        Some(Self { files })
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.path.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("Coder gateway call failed: {0}")]
    Gateway(#[from] crate::errors::CompletionError),

    #[error("Coder response was not valid JSON: {0}")]
    Malformed(String),

    #[error("Generated file {path} has a syntax error")]
    Syntax { path: String },

    #[error("Coder response failed validation: {0}")]
    Invalid(String),
}

const CODER_SYSTEM_PROMPT: &str = r#"You are a software developer on a scrum team. Implement the given task for its user story.

You MUST respond with valid JSON only (no markdown, no explanation) matching this schema:
{
  "files": [
    {"path": "routes/auth.py", "content": "...full file content..."}
  ]
}

Rules:
- Return complete file contents, never diffs or fragments.
- Use relative paths only. Never use absolute paths or "..".
- Python files must be syntactically valid.
"#;

const FIXER_SYSTEM_PROMPT: &str = r#"You are a software developer fixing a defect found by the test suite. Produce a corrected version of the affected files.

You MUST respond with valid JSON only (no markdown, no explanation) matching this schema:
{
  "files": [
    {"path": "routes/auth.py", "content": "...full corrected file content..."}
  ]
}

Rules:
- Only touch the files listed as in scope. Any other path will be rejected.
- Return complete file contents, never diffs or fragments.
- Do not modify the tests; make the implementation satisfy them.
"#;

pub struct Coder {
    gateway: Arc<dyn CompletionService>,
    model: String,
}

impl Coder {
    pub fn new(gateway: Arc<dyn CompletionService>, model: &str) -> Self {
        Self {
            gateway,
            model: model.to_string(),
        }
    }

    /// Generate code for one task. An invalid response is retried once with
    /// an error hint; a second failure is the caller's story failure.
    pub async fn implement(
        &self,
        story: &StoryRequirement,
        task: &TaskItem,
        technical_notes: Option<&str>,
    ) -> Result<CodeOutput, CodegenError> {
        let prompt = build_task_prompt(story, task, technical_notes);
        match self.request(CODER_SYSTEM_PROMPT, &prompt).await {
            Ok(output) => Ok(output),
            Err(first) => {
                let hinted = format!(
                    "{}\n\nYour previous response was rejected: {}. \
                     Respond again with valid JSON only, matching the schema exactly.",
                    prompt, first
                );
                self.request(CODER_SYSTEM_PROMPT, &hinted).await
            }
        }
    }

    /// One fix proposal for the issue. No internal retry — the fix loop owns
    /// the pass budget, so this makes exactly one gateway call.
    pub async fn propose_fix(
        &self,
        issue: &Issue,
        story: &StoryRequirement,
        scope_contents: &[(String, String)],
        attempt_history: &[String],
    ) -> Result<CodeOutput, CodegenError> {
        let prompt = build_fix_prompt(issue, story, scope_contents, attempt_history);
        self.request(FIXER_SYSTEM_PROMPT, &prompt).await
    }

    async fn request(&self, system: &str, prompt: &str) -> Result<CodeOutput, CodegenError> {
        let messages = [ChatMessage::system(system), ChatMessage::user(prompt)];
        let response = self.gateway.complete(&messages, &self.model).await?;

        let value: Value = serde_json::from_str(extract_json(&response))
            .map_err(|e| CodegenError::Malformed(e.to_string()))?;

        match CodeOutput::from_value(&value) {
            Some(output) => Ok(output),
            None => Err(classify_rejection(&value)),
        }
    }
}

/// Distinguish a syntax rejection from a shape rejection, so the caller can
/// record the right issue type.
fn classify_rejection(value: &Value) -> CodegenError {
    if let Some(files) = normalize_files(value) {
        if let Some((path, _)) = files
            .iter()
            .filter(|(path, _)| is_safe_rel_path(path))
            .find(|(path, content)| !content_parses(path, content))
        {
            return CodegenError::Syntax { path: path.clone() };
        }
    }
    CodegenError::Invalid(
        "files must be a non-empty list of relative, non-traversing path/content entries"
            .to_string(),
    )
}

fn build_task_prompt(
    story: &StoryRequirement,
    task: &TaskItem,
    technical_notes: Option<&str>,
) -> String {
    let files = if task.files_to_create.is_empty() {
        "(planner did not name files)".to_string()
    } else {
        task.files_to_create.join(", ")
    };
    format!(
        "Implement this task.\n\n\
         ## Story {}: {}\n\
         {}\n\n\
         ## Task {}\n\
         {}\n\
         Files: {}\n\
         Notes: {}\n\n\
         Respond with JSON only.",
        story.story_id,
        story.title,
        story.user_story,
        task.task_id,
        task.description,
        files,
        technical_notes.unwrap_or("(none)"),
    )
}

fn build_fix_prompt(
    issue: &Issue,
    story: &StoryRequirement,
    scope_contents: &[(String, String)],
    attempt_history: &[String],
) -> String {
    let mut prompt = format!(
        "Fix this defect.\n\n\
         ## Story {}: {}\n\
         {}\n\n\
         ## Issue ({})\n\
         {}\n\
         Error output:\n```\n{}\n```\n",
        story.story_id,
        story.title,
        story.user_story,
        issue.issue_type.as_str(),
        issue.description,
        issue.error_message,
    );

    prompt.push_str("\n## Files in scope\n");
    for (path, content) in scope_contents {
        prompt.push_str(&format!("### {}\n```\n{}\n```\n", path, content));
    }

    if !attempt_history.is_empty() {
        prompt.push_str("\n## Earlier attempts that did not work\n");
        for (i, note) in attempt_history.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, note));
        }
    }

    prompt.push_str("\nRespond with JSON only.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issues::IssueType;
    use crate::llm::testing::ScriptedCompletion;
    use serde_json::json;

    fn story() -> StoryRequirement {
        StoryRequirement {
            story_id: "US-1".to_string(),
            title: "Login".to_string(),
            user_story: "As a user I want to log in".to_string(),
            acceptance_criteria: vec![],
        }
    }

    fn task() -> TaskItem {
        TaskItem {
            task_id: "1".to_string(),
            description: "build the login route".to_string(),
            files_to_create: vec!["routes/auth.py".to_string()],
        }
    }

    #[test]
    fn test_from_value_sequence_and_mapping() {
        let seq = json!({"files": [{"path": "a.py", "content": "x = 1\n"}]});
        assert_eq!(CodeOutput::from_value(&seq).unwrap().files[0].path, "a.py");

        let map = json!({"files": {"b.py": "y = 2\n"}});
        let output = CodeOutput::from_value(&map).unwrap();
        assert_eq!(output.files.len(), 1);
        assert_eq!(output.files[0].content, "y = 2\n");
    }

    #[test]
    fn test_from_value_rejects_traversal() {
        let bad = json!({"files": [{"path": "../evil.py", "content": "x"}]});
        assert!(CodeOutput::from_value(&bad).is_none());
    }

    #[test]
    fn test_classify_rejection_syntax() {
        let bad = json!({"files": [{"path": "a.py", "content": "def f(: pass"}]});
        match classify_rejection(&bad) {
            CodegenError::Syntax { path } => assert_eq!(path, "a.py"),
            other => panic!("Expected Syntax, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_rejection_shape() {
        assert!(matches!(
            classify_rejection(&json!({"files": []})),
            CodegenError::Invalid(_)
        ));
    }

    #[tokio::test]
    async fn test_implement_retries_once() {
        let gateway = Arc::new(ScriptedCompletion::new(vec![
            Ok(r#"{"files": []}"#.to_string()),
            Ok(r#"{"files": [{"path": "routes/auth.py", "content": "def login():\n    pass\n"}]}"#
                .to_string()),
        ]));
        let coder = Coder::new(gateway.clone(), "m");

        let output = coder.implement(&story(), &task(), None).await.unwrap();
        assert_eq!(output.files[0].path, "routes/auth.py");
        assert_eq!(gateway.calls(), 2);
    }

    #[tokio::test]
    async fn test_implement_fails_after_second_rejection() {
        let gateway = Arc::new(ScriptedCompletion::new(vec![
            Ok("nonsense".to_string()),
            Ok("more nonsense".to_string()),
        ]));
        let coder = Coder::new(gateway.clone(), "m");

        assert!(coder.implement(&story(), &task(), None).await.is_err());
        assert_eq!(gateway.calls(), 2);
    }

    #[tokio::test]
    async fn test_propose_fix_single_call_no_retry() {
        let gateway = Arc::new(ScriptedCompletion::new(vec![
            Ok("garbage".to_string()),
            Ok("unused".to_string()),
        ]));
        let coder = Coder::new(gateway.clone(), "m");
        let issue = Issue::new("p", "US-1", IssueType::TestFailure, "test fails", "assert err");

        assert!(
            coder
                .propose_fix(&issue, &story(), &[], &[])
                .await
                .is_err()
        );
        assert_eq!(gateway.calls(), 1, "fix proposal must not retry internally");
    }

    #[test]
    fn test_fix_prompt_carries_scope_and_history() {
        let issue = Issue::new("p", "US-1", IssueType::TestFailure, "login 500s", "stacktrace");
        let prompt = build_fix_prompt(
            &issue,
            &story(),
            &[("routes/auth.py".to_string(), "def login(): ...".to_string())],
            &["pass 1 rejected: out of scope".to_string()],
        );
        assert!(prompt.contains("### routes/auth.py"));
        assert!(prompt.contains("Earlier attempts"));
        assert!(prompt.contains("login 500s"));
    }
}
