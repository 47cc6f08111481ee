use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Orchestrator configuration for a project workspace.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Model identifier passed to the completion gateway.
    pub model: String,
    /// Base URL of the completion gateway.
    pub gateway_url: String,
    /// Per-request completion timeout in seconds.
    pub llm_timeout: u64,
    /// Command used to execute the project's tests.
    pub test_command: Vec<String>,
    /// Test-run timeout in seconds.
    pub test_timeout: u64,
    /// Maximum passes of the autonomous fix loop per story.
    pub max_fix_passes: u32,
    /// Heartbeat interval for live event streams, in milliseconds.
    pub heartbeat_ms: u64,
    /// Files an autonomous fix may never touch, relative to the project root.
    pub protected_files: Vec<String>,
    /// Run the advisory quality review after the sprint finishes.
    pub quality_review: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            gateway_url: "http://localhost:8080/v1/completions".to_string(),
            llm_timeout: 120,
            test_command: vec!["pytest".to_string(), "-q".to_string()],
            test_timeout: 300,
            max_fix_passes: 3,
            heartbeat_ms: 500,
            protected_files: vec![
                "app.py".to_string(),
                "requirements.txt".to_string(),
                "config.py".to_string(),
            ],
            quality_review: true,
        }
    }
}

/// Raw TOML structure for `.storyforge/config.toml`
#[derive(Debug, Deserialize)]
struct ConfigToml {
    orchestrator: Option<OrchestratorSection>,
}

#[derive(Debug, Deserialize)]
struct OrchestratorSection {
    model: Option<String>,
    gateway_url: Option<String>,
    llm_timeout: Option<u64>,
    test_command: Option<Vec<String>>,
    test_timeout: Option<u64>,
    max_fix_passes: Option<u32>,
    heartbeat_ms: Option<u64>,
    protected_files: Option<Vec<String>>,
    quality_review: Option<bool>,
}

impl OrchestratorConfig {
    /// Load config from `.storyforge/config.toml` in the workspace directory.
    /// Returns defaults if the file doesn't exist.
    pub fn load(workspace: &Path) -> Result<Self> {
        let config_path = workspace.join(".storyforge").join("config.toml");
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let toml: ConfigToml = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        let mut config = Self::default();
        if let Some(section) = toml.orchestrator {
            if let Some(model) = section.model {
                config.model = model;
            }
            if let Some(gateway_url) = section.gateway_url {
                config.gateway_url = gateway_url;
            }
            if let Some(llm_timeout) = section.llm_timeout {
                config.llm_timeout = llm_timeout;
            }
            if let Some(test_command) = section.test_command {
                config.test_command = test_command;
            }
            if let Some(test_timeout) = section.test_timeout {
                config.test_timeout = test_timeout;
            }
            if let Some(max_fix_passes) = section.max_fix_passes {
                config.max_fix_passes = max_fix_passes;
            }
            if let Some(heartbeat_ms) = section.heartbeat_ms {
                config.heartbeat_ms = heartbeat_ms;
            }
            if let Some(protected_files) = section.protected_files {
                config.protected_files = protected_files;
            }
            if let Some(quality_review) = section.quality_review {
                config.quality_review = quality_review;
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_config_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_fix_passes, 3);
        assert_eq!(config.heartbeat_ms, 500);
        assert_eq!(config.test_command, vec!["pytest", "-q"]);
        assert!(config.quality_review);
        assert!(config.protected_files.contains(&"app.py".to_string()));
    }

    #[test]
    fn test_config_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig::load(dir.path()).unwrap();
        assert_eq!(config.max_fix_passes, 3);
        assert_eq!(config.model, "gpt-4o-mini");
    }

    #[test]
    fn test_config_load_full() {
        let dir = tempfile::tempdir().unwrap();
        let sf_dir = dir.path().join(".storyforge");
        fs::create_dir_all(&sf_dir).unwrap();
        fs::write(
            sf_dir.join("config.toml"),
            r#"
[orchestrator]
model = "claude-sonnet-4"
gateway_url = "https://gateway.internal/v1/completions"
llm_timeout = 60
test_command = ["python", "-m", "pytest", "-x"]
test_timeout = 120
max_fix_passes = 5
heartbeat_ms = 250
protected_files = ["main.py"]
quality_review = false
"#,
        )
        .unwrap();

        let config = OrchestratorConfig::load(dir.path()).unwrap();
        assert_eq!(config.model, "claude-sonnet-4");
        assert_eq!(config.gateway_url, "https://gateway.internal/v1/completions");
        assert_eq!(config.llm_timeout, 60);
        assert_eq!(config.test_command, vec!["python", "-m", "pytest", "-x"]);
        assert_eq!(config.max_fix_passes, 5);
        assert_eq!(config.heartbeat_ms, 250);
        assert_eq!(config.protected_files, vec!["main.py"]);
        assert!(!config.quality_review);
    }

    #[test]
    fn test_config_load_partial() {
        let dir = tempfile::tempdir().unwrap();
        let sf_dir = dir.path().join(".storyforge");
        fs::create_dir_all(&sf_dir).unwrap();
        fs::write(
            sf_dir.join("config.toml"),
            r#"
[orchestrator]
max_fix_passes = 2
"#,
        )
        .unwrap();

        let config = OrchestratorConfig::load(dir.path()).unwrap();
        assert_eq!(config.max_fix_passes, 2);
        assert_eq!(config.heartbeat_ms, 500); // default
        assert_eq!(config.model, "gpt-4o-mini"); // default
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let sf_dir = dir.path().join(".storyforge");
        fs::create_dir_all(&sf_dir).unwrap();
        fs::write(sf_dir.join("config.toml"), "not valid toml {{{{").unwrap();

        assert!(OrchestratorConfig::load(dir.path()).is_err());
    }

    #[test]
    fn test_config_load_empty_section() {
        let dir = tempfile::tempdir().unwrap();
        let sf_dir = dir.path().join(".storyforge");
        fs::create_dir_all(&sf_dir).unwrap();
        fs::write(sf_dir.join("config.toml"), "[orchestrator]\n").unwrap();

        let config = OrchestratorConfig::load(dir.path()).unwrap();
        assert_eq!(config.max_fix_passes, 3);
    }
}
