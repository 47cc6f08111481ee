//! File sandbox rooted at a projects directory.
//!
//! All generated-project reads and writes go through here. Writes reject
//! absolute paths and `..` traversal with a typed error; advisory writes
//! additionally downgrade any failure to a logged warning for artifacts
//! that are observability rather than correctness-critical.

use std::path::{Path, PathBuf};

use crate::errors::SandboxError;
use crate::validators::is_safe_rel_path;

pub struct ProjectSandbox {
    root: PathBuf,
}

impl ProjectSandbox {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.root.join(project)
    }

    /// Read one project file.
    pub fn read(&self, project: &str, rel_path: &str) -> Result<String, SandboxError> {
        self.check_path(rel_path)?;
        let full = self.project_dir(project).join(rel_path);
        if !full.exists() {
            return Err(SandboxError::NotFound {
                project: project.to_string(),
                path: rel_path.to_string(),
            });
        }
        std::fs::read_to_string(&full).map_err(|source| SandboxError::Io {
            path: rel_path.to_string(),
            source,
        })
    }

    /// Write one project file, creating parent directories as needed.
    pub fn write(&self, project: &str, rel_path: &str, content: &str) -> Result<(), SandboxError> {
        self.check_path(rel_path)?;
        let full = self.project_dir(project).join(rel_path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SandboxError::Io {
                path: rel_path.to_string(),
                source,
            })?;
        }
        std::fs::write(&full, content).map_err(|source| SandboxError::Io {
            path: rel_path.to_string(),
            source,
        })
    }

    pub fn exists(&self, project: &str, rel_path: &str) -> bool {
        is_safe_rel_path(rel_path) && self.project_dir(project).join(rel_path).exists()
    }

    /// Best-effort write for observability artifacts. Failures are logged
    /// and swallowed — an artifact must never abort a story.
    pub fn advisory_write(&self, project: &str, rel_path: &str, content: &str) {
        if let Err(e) = self.write(project, rel_path, content) {
            eprintln!(
                "[sandbox] project={}: advisory write of {} failed: {}",
                project, rel_path, e
            );
        }
    }

    fn check_path(&self, rel_path: &str) -> Result<(), SandboxError> {
        if rel_path.starts_with('/') {
            return Err(SandboxError::PathRejected {
                path: rel_path.to_string(),
                reason: "absolute path",
            });
        }
        if !is_safe_rel_path(rel_path) {
            return Err(SandboxError::PathRejected {
                path: rel_path.to_string(),
                reason: "path traversal",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_sandbox() -> (ProjectSandbox, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        (ProjectSandbox::new(dir.path().to_path_buf()), dir)
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let (sandbox, _dir) = make_sandbox();
        sandbox
            .write("proj", "routes/auth.py", "def login():\n    pass\n")
            .unwrap();
        let content = sandbox.read("proj", "routes/auth.py").unwrap();
        assert_eq!(content, "def login():\n    pass\n");
        assert!(sandbox.exists("proj", "routes/auth.py"));
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let (sandbox, _dir) = make_sandbox();
        let err = sandbox.read("proj", "missing.py").unwrap_err();
        assert!(matches!(err, SandboxError::NotFound { .. }));
    }

    #[test]
    fn test_write_rejects_absolute_path() {
        let (sandbox, _dir) = make_sandbox();
        let err = sandbox.write("proj", "/etc/passwd", "x").unwrap_err();
        match err {
            SandboxError::PathRejected { reason, .. } => assert_eq!(reason, "absolute path"),
            other => panic!("Expected PathRejected, got {:?}", other),
        }
    }

    #[test]
    fn test_write_rejects_traversal() {
        let (sandbox, dir) = make_sandbox();
        let err = sandbox.write("proj", "../outside.py", "x").unwrap_err();
        assert!(matches!(err, SandboxError::PathRejected { .. }));
        assert!(!dir.path().join("outside.py").exists());
    }

    #[test]
    fn test_read_rejects_traversal() {
        let (sandbox, dir) = make_sandbox();
        std::fs::write(dir.path().join("secret.txt"), "s").unwrap();
        let err = sandbox.read("proj", "../secret.txt").unwrap_err();
        assert!(matches!(err, SandboxError::PathRejected { .. }));
    }

    #[test]
    fn test_advisory_write_swallows_failure() {
        let (sandbox, _dir) = make_sandbox();
        // Traversal would be an error from write(); advisory_write only logs.
        sandbox.advisory_write("proj", "../escape.txt", "x");
        sandbox.advisory_write("proj", "artifacts/breakdown.json", "{}");
        assert!(sandbox.exists("proj", "artifacts/breakdown.json"));
    }
}
