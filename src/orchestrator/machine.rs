//! Sprint state machine: drives every story of a plan through its phases,
//! journals each transition, and keeps the backlog current.
//!
//! Stories execute strictly sequentially — later stories may depend on files
//! earlier ones created, and the fix loop mutates shared project files. One
//! story's failure never aborts the sprint: errors are caught at the story
//! boundary, converted to a story_failed event, and the loop moves on.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::backlog::{BacklogStore, ExecutionStatus, StoryRequirement};
use crate::breakdown::Planner;
use crate::codegen::{Coder, CodegenError, FileEntry};
use crate::config::OrchestratorConfig;
use crate::events::{EventLog, EventType, ExecutionEvent};
use crate::issues::{Issue, IssueTracker, IssueType};
use crate::llm::CompletionService;
use crate::plan::{PlanStore, SprintStatus};
use crate::quality;
use crate::sandbox::ProjectSandbox;
use crate::testrun::{TestReport, TestRunner};

use super::fixloop::{FixLoop, FixOutcome};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SprintSummary {
    pub stories_completed: u32,
    pub stories_failed: u32,
    pub tasks_completed: u32,
    pub tests_passed: u32,
    pub tests_failed: u32,
}

/// Terminal state of one story, as decided inside the story boundary.
enum StoryVerdict {
    Done {
        tasks: u32,
        report: TestReport,
    },
    Failed {
        tasks: u32,
        report: Option<TestReport>,
        reason: String,
    },
}

pub struct SprintOrchestrator {
    plans: PlanStore,
    events: EventLog,
    backlog: BacklogStore,
    issues: IssueTracker,
    sandbox: ProjectSandbox,
    gateway: Arc<dyn CompletionService>,
    runner: Arc<dyn TestRunner>,
    config: OrchestratorConfig,
    project: String,
    cancel: Arc<AtomicBool>,
}

impl SprintOrchestrator {
    /// Wire the orchestrator to a workspace directory using the
    /// conventional layout: `.storyforge/` for plans, logs, and issues,
    /// `backlog.csv` for stories, `projects/` for generated code.
    pub fn new(
        workspace: &Path,
        project: &str,
        config: OrchestratorConfig,
        gateway: Arc<dyn CompletionService>,
        runner: Arc<dyn TestRunner>,
    ) -> Self {
        let storyforge = workspace.join(".storyforge");
        Self {
            plans: PlanStore::new(storyforge.join("sprints")),
            events: EventLog::new(storyforge.join("logs")),
            backlog: BacklogStore::new(workspace.join("backlog.csv")),
            issues: IssueTracker::new(
                storyforge.join("issues").join(format!("{}.jsonl", project)),
            ),
            sandbox: ProjectSandbox::new(workspace.join("projects")),
            gateway,
            runner,
            config,
            project: project.to_string(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Flag checked at the per-story loop boundary; setting it stops the
    /// run before the next story starts. A phase in flight is never
    /// abandoned mid-write.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Execute the sprint. Fatal only when the plan cannot be loaded;
    /// every other failure is scoped to a story or a fix pass.
    pub async fn run(&self, sprint_id: &str) -> Result<SprintSummary> {
        let mut plan = self.plans.load(sprint_id)?;
        plan.status = SprintStatus::Executing;
        self.plans.save(&plan)?;

        self.events.append(
            sprint_id,
            &ExecutionEvent::new(
                EventType::SprintStarted,
                json!({"sprint_id": sprint_id, "stories": plan.stories.len()}),
            ),
        )?;

        let mut summary = SprintSummary::default();
        let mut cancelled = false;

        for story_id in &plan.stories {
            if self.cancel.load(Ordering::Relaxed) {
                eprintln!(
                    "[sprint] sprint_id={}: cancellation requested, stopping before {}",
                    sprint_id, story_id
                );
                cancelled = true;
                break;
            }

            match self.run_story(sprint_id, story_id).await {
                Ok(StoryVerdict::Done { tasks, report }) => {
                    summary.stories_completed += 1;
                    summary.tasks_completed += tasks;
                    summary.tests_passed += report.passed;
                    summary.tests_failed += report.failed;
                    self.emit_or_warn(
                        sprint_id,
                        EventType::StoryCompleted,
                        json!({"story_id": story_id, "tests_passed": report.passed}),
                    );
                    self.backlog_set(
                        story_id,
                        ExecutionStatus::Done,
                        "story_completed",
                        &[("Execution_Completed_At", Utc::now().to_rfc3339())],
                    );
                }
                Ok(StoryVerdict::Failed {
                    tasks,
                    report,
                    reason,
                }) => {
                    summary.stories_failed += 1;
                    summary.tasks_completed += tasks;
                    if let Some(report) = &report {
                        summary.tests_passed += report.passed;
                        summary.tests_failed += report.failed;
                    }
                    eprintln!(
                        "[sprint] sprint_id={} story={}: failed: {}",
                        sprint_id, story_id, reason
                    );
                    self.emit_or_warn(
                        sprint_id,
                        EventType::StoryFailed,
                        json!({"story_id": story_id, "reason": reason}),
                    );
                    self.backlog_set(
                        story_id,
                        ExecutionStatus::Failed,
                        "story_failed",
                        &[("Execution_Completed_At", Utc::now().to_rfc3339())],
                    );
                }
                Err(e) => {
                    // Story boundary: an unexpected error fails this story
                    // only, never the sprint.
                    summary.stories_failed += 1;
                    eprintln!(
                        "[sprint] sprint_id={} story={}: unexpected error: {:#}",
                        sprint_id, story_id, e
                    );
                    self.emit_or_warn(
                        sprint_id,
                        EventType::StoryFailed,
                        json!({"story_id": story_id, "reason": format!("{:#}", e)}),
                    );
                    self.backlog_set(
                        story_id,
                        ExecutionStatus::Failed,
                        "story_failed",
                        &[("Execution_Completed_At", Utc::now().to_rfc3339())],
                    );
                }
            }
        }

        let quality_overall = if self.config.quality_review && !cancelled {
            let metrics =
                quality::review_project(&self.sandbox.project_dir(&self.project), &self.project);
            eprintln!(
                "[sprint] sprint_id={}: quality review overall={:.1}",
                sprint_id, metrics.overall_score
            );
            Some(metrics.overall_score)
        } else {
            None
        };

        self.events.append(
            sprint_id,
            &ExecutionEvent::new(
                EventType::SprintCompleted,
                json!({
                    "sprint_id": sprint_id,
                    "stories_completed": summary.stories_completed,
                    "stories_failed": summary.stories_failed,
                    "tasks_completed": summary.tasks_completed,
                    "tests_passed": summary.tests_passed,
                    "tests_failed": summary.tests_failed,
                    "cancelled": cancelled,
                    "quality_overall": quality_overall,
                }),
            ),
        )?;

        // Completed requires every story terminal; a cancelled run is not.
        plan.status = if cancelled {
            SprintStatus::Failed
        } else {
            SprintStatus::Completed
        };
        self.plans.save(&plan)?;

        Ok(summary)
    }

    async fn run_story(&self, sprint_id: &str, story_id: &str) -> Result<StoryVerdict> {
        self.events.append(
            sprint_id,
            &ExecutionEvent::new(EventType::StoryStarted, json!({"story_id": story_id})),
        )?;
        self.backlog_set(
            story_id,
            ExecutionStatus::InProgress,
            "story_started",
            &[("Execution_Started_At", Utc::now().to_rfc3339())],
        );

        let Some(story) = self.backlog.story(story_id)? else {
            return Ok(StoryVerdict::Failed {
                tasks: 0,
                report: None,
                reason: format!("story {} not found in backlog", story_id),
            });
        };

        // Acceptance-test stubs: one per criterion, one generic when none.
        let stub = generate_test_stub(&story);
        self.sandbox
            .write(&self.project, &stub.path, &stub.content)
            .with_context(|| format!("Failed to write test stub {}", stub.path))?;
        self.events.append(
            sprint_id,
            &ExecutionEvent::new(
                EventType::TestsGenerated,
                json!({
                    "story_id": story_id,
                    "path": stub.path,
                    "stubs": story.acceptance_criteria.len().max(1),
                }),
            ),
        )?;

        let planner = Planner::new(Arc::clone(&self.gateway), &self.config.model);
        let breakdown = match planner.breakdown(&story).await {
            Ok(breakdown) => breakdown,
            Err(e) => {
                return Ok(StoryVerdict::Failed {
                    tasks: 0,
                    report: None,
                    reason: format!("task breakdown rejected after retry: {}", e),
                });
            }
        };
        self.sandbox.advisory_write(
            &self.project,
            &format!(".artifacts/{}/breakdown.json", story_id),
            &serde_json::to_string_pretty(&breakdown).unwrap_or_default(),
        );
        self.events.append(
            sprint_id,
            &ExecutionEvent::new(
                EventType::BreakdownDone,
                json!({"story_id": story_id, "tasks": breakdown.tasks.len()}),
            ),
        )?;

        let coder = Coder::new(Arc::clone(&self.gateway), &self.config.model);
        let mut tasks_done: u32 = 0;
        let mut scope_files: HashSet<String> = HashSet::new();

        for task in &breakdown.tasks {
            let output = match coder
                .implement(&story, task, breakdown.technical_notes.as_deref())
                .await
            {
                Ok(output) => output,
                Err(e) => {
                    if let CodegenError::Syntax { path } = &e {
                        self.report_issue(
                            sprint_id,
                            &Issue::new(
                                &self.project,
                                story_id,
                                IssueType::SyntaxError,
                                &format!("generated code for task {} does not parse", task.task_id),
                                &e.to_string(),
                            )
                            .with_file(path),
                        );
                    }
                    return Ok(StoryVerdict::Failed {
                        tasks: tasks_done,
                        report: None,
                        reason: format!(
                            "code output for task {} rejected after retry: {}",
                            task.task_id, e
                        ),
                    });
                }
            };

            for file in &output.files {
                self.sandbox
                    .write(&self.project, &file.path, &file.content)
                    .with_context(|| format!("Failed to write {}", file.path))?;
                scope_files.insert(file.path.clone());
            }
            self.sandbox.advisory_write(
                &self.project,
                &format!(".artifacts/{}/task_{}.json", story_id, task.task_id),
                &serde_json::to_string_pretty(&output).unwrap_or_default(),
            );
            tasks_done += 1;
        }

        self.events.append(
            sprint_id,
            &ExecutionEvent::new(
                EventType::ImplementationDone,
                json!({
                    "story_id": story_id,
                    "tasks": tasks_done,
                    "files": scope_files.len(),
                }),
            ),
        )?;

        let test_scope = vec![stub.path.clone()];
        let report = match self
            .runner
            .run(&self.sandbox.project_dir(&self.project), Some(test_scope.as_slice()))
            .await
        {
            Ok(report) => report,
            Err(e) => {
                return Ok(StoryVerdict::Failed {
                    tasks: tasks_done,
                    report: None,
                    reason: format!("test run failed: {:#}", e),
                });
            }
        };
        self.events.append(
            sprint_id,
            &ExecutionEvent::new(
                EventType::TestsRun,
                json!({
                    "story_id": story_id,
                    "passed": report.passed,
                    "failed": report.failed,
                    "success": report.success,
                }),
            ),
        )?;

        if report.success {
            return Ok(StoryVerdict::Done {
                tasks: tasks_done,
                report,
            });
        }

        let issue = Issue::new(
            &self.project,
            story_id,
            IssueType::TestFailure,
            &format!("acceptance tests failed for story {}", story_id),
            report.error.as_deref().unwrap_or("tests failed"),
        );
        self.report_issue(sprint_id, &issue);

        let mut do_not_modify: HashSet<String> =
            self.config.protected_files.iter().cloned().collect();
        do_not_modify.insert(stub.path.clone());

        let fixloop = FixLoop {
            coder: &coder,
            runner: self.runner.as_ref(),
            sandbox: &self.sandbox,
            events: &self.events,
            sprint_id,
            project: &self.project,
            max_passes: self.config.max_fix_passes,
            test_scope: Some(test_scope),
        };

        match fixloop
            .run(&issue, &story, &scope_files, &do_not_modify)
            .await?
        {
            FixOutcome::Fixed { report, .. } => Ok(StoryVerdict::Done {
                tasks: tasks_done,
                report,
            }),
            FixOutcome::Exhausted {
                passes,
                last_report,
            } => Ok(StoryVerdict::Failed {
                tasks: tasks_done,
                report: last_report.or(Some(report)),
                reason: format!("fix loop exhausted after {} passes", passes),
            }),
        }
    }

    /// Record the issue and journal it. Both are diagnostics around an
    /// already-detected failure, so neither may mask it.
    fn report_issue(&self, sprint_id: &str, issue: &Issue) {
        if let Err(e) = self.issues.record(issue) {
            eprintln!(
                "[sprint] sprint_id={}: failed to record issue {}: {:#}",
                sprint_id, issue.issue_id, e
            );
        }
        self.emit_or_warn(
            sprint_id,
            EventType::IssueReported,
            json!({
                "story_id": issue.story_id,
                "issue_id": issue.issue_id,
                "issue_type": issue.issue_type.as_str(),
            }),
        );
    }

    fn emit_or_warn(&self, sprint_id: &str, event_type: EventType, data: serde_json::Value) {
        if let Err(e) = self
            .events
            .append(sprint_id, &ExecutionEvent::new(event_type, data))
        {
            eprintln!(
                "[sprint] sprint_id={}: failed to journal {}: {:#}",
                sprint_id,
                event_type.as_str(),
                e
            );
        }
    }

    /// Last-writer-wins field sets; a skipped update is logged, never fatal.
    fn backlog_set(
        &self,
        story_id: &str,
        status: ExecutionStatus,
        last_event: &str,
        extra: &[(&str, String)],
    ) {
        let mut updates: Vec<(&str, String)> = vec![
            ("Execution_Status", status.as_str().to_string()),
            ("Last_Event", last_event.to_string()),
            ("Last_Updated", Utc::now().to_rfc3339()),
        ];
        updates.extend(extra.iter().map(|(k, v)| (*k, v.clone())));

        if let crate::backlog::UpdateOutcome::Skipped(reason) =
            self.backlog.update_row(story_id, &updates)
        {
            eprintln!(
                "[sprint] story={}: backlog update skipped: {}",
                story_id, reason
            );
        }
    }
}

/// Build the acceptance-test stub file for a story: one test per criterion,
/// exactly one generic test when no criteria are given.
fn generate_test_stub(story: &StoryRequirement) -> FileEntry {
    let module = sanitize_ident(&story.story_id);
    let mut content = format!(
        "\"\"\"Acceptance tests for {}: {}.\"\"\"\n",
        story.story_id, story.title
    );

    let criteria: Vec<String> = if story.acceptance_criteria.is_empty() {
        vec![format!("{} behaves as described", story.title)]
    } else {
        story.acceptance_criteria.clone()
    };

    for (i, criterion) in criteria.iter().enumerate() {
        let safe = criterion.replace('"', "'");
        content.push_str(&format!(
            "\n\ndef test_{}_criterion_{}():\n    \"\"\"{}\"\"\"\n    assert True, \"pending: {}\"\n",
            module,
            i + 1,
            safe,
            safe
        ));
    }

    FileEntry {
        path: format!("tests/test_{}.py", module),
        content,
    }
}

fn sanitize_ident(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}
