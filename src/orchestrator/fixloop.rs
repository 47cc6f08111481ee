//! Autonomous fix loop: bounded self-repair for a failing story.
//!
//! Each pass asks the coder persona for a patch constrained to the story's
//! scope, validates it structurally and against the scope guard, and only
//! then writes and re-tests. One violating file rejects the entire patch —
//! partial trust in a generated patch is unsafe. The pass counter is the
//! only loop condition, so the loop always terminates and never makes more
//! completion calls than it has passes.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;

use crate::backlog::StoryRequirement;
use crate::codegen::{Coder, CodeOutput};
use crate::events::{EventLog, EventType, ExecutionEvent};
use crate::issues::Issue;
use crate::sandbox::ProjectSandbox;
use crate::scope::{check_scope, scope_violations};
use crate::testrun::{TestReport, TestRunner};

#[derive(Debug)]
pub enum FixOutcome {
    /// A patch was accepted and the re-test passed.
    Fixed {
        output: CodeOutput,
        report: TestReport,
    },
    /// All passes consumed without a green re-test.
    Exhausted {
        passes: u32,
        last_report: Option<TestReport>,
    },
}

pub struct FixLoop<'a> {
    pub coder: &'a Coder,
    pub runner: &'a dyn TestRunner,
    pub sandbox: &'a ProjectSandbox,
    pub events: &'a EventLog,
    pub sprint_id: &'a str,
    pub project: &'a str,
    pub max_passes: u32,
    /// Test paths passed to the runner, narrowing re-tests to the story.
    pub test_scope: Option<Vec<String>>,
}

impl<'a> FixLoop<'a> {
    pub async fn run(
        &self,
        issue: &Issue,
        story: &StoryRequirement,
        scope_files: &HashSet<String>,
        do_not_modify: &HashSet<String>,
    ) -> Result<FixOutcome> {
        let mut history: Vec<String> = Vec::new();
        let mut last_report: Option<TestReport> = None;

        for pass in 1..=self.max_passes {
            let scope_contents = self.collect_scope_contents(scope_files);

            let output = match self
                .coder
                .propose_fix(issue, story, &scope_contents, &history)
                .await
            {
                Ok(output) => output,
                Err(e) => {
                    eprintln!(
                        "[fixloop] story={} pass={}: proposal rejected: {}",
                        story.story_id, pass, e
                    );
                    self.log_attempt(issue, pass, false, &format!("proposal rejected: {}", e))?;
                    history.push(format!("pass {} produced an invalid patch: {}", pass, e));
                    continue;
                }
            };

            let touched: HashSet<String> = output.paths().map(str::to_string).collect();
            if !check_scope(&touched, scope_files, do_not_modify) {
                let violations = scope_violations(&touched, scope_files, do_not_modify);
                eprintln!(
                    "[fixloop] story={} pass={}: scope violation, rejecting whole patch: {}",
                    story.story_id,
                    pass,
                    violations.join(", ")
                );
                self.log_attempt(
                    issue,
                    pass,
                    false,
                    &format!("scope violation: {}", violations.join(", ")),
                )?;
                history.push(format!(
                    "pass {} touched files outside the allowed scope: {}",
                    pass,
                    violations.join(", ")
                ));
                continue;
            }

            for file in &output.files {
                self.sandbox
                    .write(self.project, &file.path, &file.content)
                    .with_context(|| format!("Failed to apply fix to {}", file.path))?;
            }

            let report = self
                .runner
                .run(&self.sandbox.project_dir(self.project), self.test_scope.as_deref())
                .await
                .context("Re-test after fix failed to run")?;

            self.log_attempt(
                issue,
                pass,
                report.success,
                &format!("{} passed, {} failed", report.passed, report.failed),
            )?;

            if report.success {
                return Ok(FixOutcome::Fixed { output, report });
            }

            history.push(format!(
                "pass {} patch applied but tests still failed: {}",
                pass,
                report.error.as_deref().unwrap_or("no diagnostics")
            ));
            last_report = Some(report);
        }

        Ok(FixOutcome::Exhausted {
            passes: self.max_passes,
            last_report,
        })
    }

    /// Current contents of every in-scope file that exists. Missing files
    /// are skipped; the coder may be creating them.
    fn collect_scope_contents(&self, scope_files: &HashSet<String>) -> Vec<(String, String)> {
        let mut paths: Vec<&String> = scope_files.iter().collect();
        paths.sort();
        paths
            .into_iter()
            .filter_map(|path| {
                self.sandbox
                    .read(self.project, path)
                    .ok()
                    .map(|content| (path.clone(), content))
            })
            .collect()
    }

    fn log_attempt(&self, issue: &Issue, pass: u32, accepted: bool, detail: &str) -> Result<()> {
        self.events.append(
            self.sprint_id,
            &ExecutionEvent::new(
                EventType::FixAttempted,
                json!({
                    "story_id": issue.story_id,
                    "issue_id": issue.issue_id,
                    "pass": pass,
                    "accepted": accepted,
                    "detail": detail,
                    "at": Utc::now().to_rfc3339(),
                }),
            ),
        )
    }
}
