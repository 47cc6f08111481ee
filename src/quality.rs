//! Advisory quality review of a generated project.
//!
//! Four independent scorers (architecture, performance, dependency,
//! documentation) each produce a clamped 0-100 score with issues and
//! recommendations; the overall score is their mean. A project that does
//! not exist on disk scores 0 with an issue describing the absence — a
//! defined edge case, not an error. The review never blocks sprint
//! completion and never mutates backlog or plan state.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionScore {
    pub score: f64,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

impl DimensionScore {
    fn new(score: f64) -> Self {
        Self {
            score: clamp_score(score),
            issues: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    fn absent(reason: &str) -> Self {
        Self {
            score: 0.0,
            issues: vec![reason.to_string()],
            recommendations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub project_name: String,
    pub timestamp: DateTime<Utc>,
    pub architecture_score: f64,
    pub performance_score: f64,
    pub dependency_score: f64,
    pub documentation_score: f64,
    pub overall_score: f64,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Run all four scorers and fold the result. A scorer that fails
/// internally contributes score 0 plus an issue note — advisory output is
/// never allowed to raise.
pub fn review_project(project_dir: &Path, project_name: &str) -> QualityMetrics {
    let dimensions = [
        ("architecture", score_architecture(project_dir)),
        ("performance", score_performance(project_dir)),
        ("dependency", score_dependency(project_dir)),
        ("documentation", score_documentation(project_dir)),
    ];

    let mut scores = Vec::with_capacity(4);
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();
    for (name, result) in dimensions {
        let dim = match result {
            Ok(dim) => dim,
            Err(e) => DimensionScore::absent(&format!("{} review failed: {:#}", name, e)),
        };
        scores.push(dim.score);
        issues.extend(dim.issues);
        recommendations.extend(dim.recommendations);
    }

    let overall = scores.iter().sum::<f64>() / scores.len() as f64;
    QualityMetrics {
        project_name: project_name.to_string(),
        timestamp: Utc::now(),
        architecture_score: scores[0],
        performance_score: scores[1],
        dependency_score: scores[2],
        documentation_score: scores[3],
        overall_score: clamp_score(overall),
        issues,
        recommendations,
    }
}

fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

fn source_files(project_dir: &Path) -> Vec<std::path::PathBuf> {
    WalkDir::new(project_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map(|x| x == "py").unwrap_or(false))
        .map(|e| e.path().to_path_buf())
        .collect()
}

fn score_architecture(project_dir: &Path) -> Result<DimensionScore> {
    if !project_dir.exists() {
        return Ok(DimensionScore::absent("project directory does not exist"));
    }
    let files = source_files(project_dir);
    if files.is_empty() {
        return Ok(DimensionScore::absent("project contains no source files"));
    }

    let mut dim = DimensionScore::new(100.0);
    for file in &files {
        let content = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let lines = content.lines().count();
        if lines > 400 {
            dim.score -= 15.0;
            dim.issues.push(format!(
                "{} is {} lines; split it into smaller modules",
                file.display(),
                lines
            ));
        }
    }

    let has_packages = files
        .iter()
        .any(|f| f.parent().map(|p| p != project_dir).unwrap_or(false));
    if !has_packages && files.len() > 3 {
        dim.score -= 10.0;
        dim.recommendations
            .push("group modules into packages instead of a flat layout".to_string());
    }

    dim.score = clamp_score(dim.score);
    Ok(dim)
}

fn score_performance(project_dir: &Path) -> Result<DimensionScore> {
    if !project_dir.exists() {
        return Ok(DimensionScore::absent("project directory does not exist"));
    }
    let files = source_files(project_dir);
    if files.is_empty() {
        return Ok(DimensionScore::absent("project contains no source files"));
    }

    let sleep_re = Regex::new(r"time\.sleep\(").expect("static regex");
    let select_all_re = Regex::new(r"(?i)select \* from").expect("static regex");

    let mut dim = DimensionScore::new(100.0);
    for file in &files {
        let content = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        if sleep_re.is_match(&content) {
            dim.score -= 10.0;
            dim.issues.push(format!(
                "{} sleeps on the request path",
                file.display()
            ));
        }
        if select_all_re.is_match(&content) {
            dim.score -= 10.0;
            dim.recommendations.push(format!(
                "{}: select explicit columns instead of SELECT *",
                file.display()
            ));
        }
    }

    dim.score = clamp_score(dim.score);
    Ok(dim)
}

fn score_dependency(project_dir: &Path) -> Result<DimensionScore> {
    if !project_dir.exists() {
        return Ok(DimensionScore::absent("project directory does not exist"));
    }

    let requirements = project_dir.join("requirements.txt");
    if !requirements.exists() {
        let mut dim = DimensionScore::new(50.0);
        dim.issues
            .push("requirements.txt is missing; dependencies are unpinned".to_string());
        return Ok(dim);
    }

    let content = std::fs::read_to_string(&requirements).context("Failed to read requirements")?;
    let mut dim = DimensionScore::new(100.0);
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !line.contains("==") {
            dim.score -= 10.0;
            dim.recommendations
                .push(format!("pin an exact version for '{}'", line));
        }
    }

    dim.score = clamp_score(dim.score);
    Ok(dim)
}

fn score_documentation(project_dir: &Path) -> Result<DimensionScore> {
    if !project_dir.exists() {
        return Ok(DimensionScore::absent("project directory does not exist"));
    }

    let has_readme = ["README.md", "README.rst", "README"]
        .iter()
        .any(|name| project_dir.join(name).exists());

    let files = source_files(project_dir);
    if files.is_empty() && !has_readme {
        return Ok(DimensionScore::absent("project has no documentation at all"));
    }

    let documented = files
        .iter()
        .filter(|f| {
            std::fs::read_to_string(f)
                .map(|c| c.contains("\"\"\""))
                .unwrap_or(false)
        })
        .count();
    let density = if files.is_empty() {
        0.0
    } else {
        documented as f64 / files.len() as f64
    };

    let mut dim = DimensionScore::new(if has_readme { 40.0 } else { 0.0 } + 60.0 * density);
    if !has_readme {
        dim.issues.push("README is missing".to_string());
    }
    if density < 0.5 && !files.is_empty() {
        dim.recommendations
            .push("add module docstrings to the undocumented files".to_string());
    }

    dim.score = clamp_score(dim.score);
    Ok(dim)
}
