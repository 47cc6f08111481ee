//! Test-runner collaborator: executes the generated project's test suite in
//! a subprocess and reports pass/fail counts plus diagnostics.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub success: bool,
    pub test_count: u32,
    pub passed: u32,
    pub failed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestReport {
    pub fn passing(count: u32) -> Self {
        Self {
            success: true,
            test_count: count,
            passed: count,
            failed: 0,
            error: None,
        }
    }

    pub fn failing(passed: u32, failed: u32, error: &str) -> Self {
        Self {
            success: false,
            test_count: passed + failed,
            passed,
            failed,
            error: Some(error.to_string()),
        }
    }
}

#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Run the project's tests, optionally narrowed to the given test paths.
    async fn run(&self, project_dir: &Path, scope: Option<&[String]>) -> Result<TestReport>;
}

/// Runs a configured test command (pytest by default) with a bounded timeout.
pub struct CommandTestRunner {
    command: Vec<String>,
    timeout_secs: u64,
}

impl CommandTestRunner {
    pub fn new(command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            command,
            timeout_secs,
        }
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run(&self, project_dir: &Path, scope: Option<&[String]>) -> Result<TestReport> {
        let Some((program, args)) = self.command.split_first() else {
            anyhow::bail!("Test command is empty");
        };

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .current_dir(project_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(paths) = scope {
            cmd.args(paths);
        }

        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), cmd.output())
            .await
            .map_err(|_| {
                anyhow::anyhow!("Test run timed out after {}s", self.timeout_secs)
            })?
            .context("Failed to spawn test command")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let (passed, failed) = parse_test_summary(&stdout);

        let success = output.status.success();
        let error = if success {
            None
        } else {
            Some(tail_chars(&format!("{}\n{}", stdout, stderr), 2000))
        };

        Ok(TestReport {
            success,
            test_count: passed + failed,
            passed,
            failed,
            error,
        })
    }
}

/// Pull `N passed` / `N failed` counts out of a pytest-style summary line.
/// Missing counts read as zero.
fn parse_test_summary(output: &str) -> (u32, u32) {
    let passed_re = Regex::new(r"(\d+) passed").expect("static regex");
    let failed_re = Regex::new(r"(\d+) failed").expect("static regex");

    let capture = |re: &Regex| {
        re.captures_iter(output)
            .last()
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(0)
    };

    (capture(&passed_re), capture(&failed_re))
}

fn tail_chars(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max {
        trimmed.to_string()
    } else {
        let skip = trimmed.chars().count() - max;
        trimmed.chars().skip(skip).collect()
    }
}
