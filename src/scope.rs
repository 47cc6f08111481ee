//! Scope guard for autonomous fixes.
//!
//! The only enforcement point between an LLM-authored patch and the project
//! tree: every touched path must sit inside the story's allow-list and
//! outside the protected deny-list. One violating path rejects the whole
//! set — partial application of a generated patch is never allowed.

use std::collections::HashSet;

/// True when every touched path is in `scope_files` and none is in
/// `do_not_modify`. An empty touched set passes trivially.
pub fn check_scope(
    files_touched: &HashSet<String>,
    scope_files: &HashSet<String>,
    do_not_modify: &HashSet<String>,
) -> bool {
    files_touched
        .iter()
        .all(|path| scope_files.contains(path) && !do_not_modify.contains(path))
}

/// The paths that make `check_scope` fail, for diagnostics.
pub fn scope_violations(
    files_touched: &HashSet<String>,
    scope_files: &HashSet<String>,
    do_not_modify: &HashSet<String>,
) -> Vec<String> {
    let mut violations: Vec<String> = files_touched
        .iter()
        .filter(|path| !scope_files.contains(*path) || do_not_modify.contains(*path))
        .cloned()
        .collect();
    violations.sort();
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(paths: &[&str]) -> HashSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_in_scope_file_passes() {
        assert!(check_scope(
            &set(&["routes/auth.py"]),
            &set(&["routes/auth.py"]),
            &set(&[]),
        ));
    }

    #[test]
    fn test_protected_file_rejected() {
        assert!(!check_scope(
            &set(&["app.py"]),
            &set(&["routes/auth.py"]),
            &set(&["app.py"]),
        ));
    }

    #[test]
    fn test_out_of_scope_file_rejected() {
        assert!(!check_scope(
            &set(&["routes/users.py"]),
            &set(&["routes/auth.py"]),
            &set(&[]),
        ));
    }

    #[test]
    fn test_protected_wins_even_when_in_scope() {
        assert!(!check_scope(
            &set(&["app.py"]),
            &set(&["app.py"]),
            &set(&["app.py"]),
        ));
    }

    #[test]
    fn test_one_violation_rejects_whole_set() {
        assert!(!check_scope(
            &set(&["routes/auth.py", "routes/users.py"]),
            &set(&["routes/auth.py"]),
            &set(&[]),
        ));
    }

    #[test]
    fn test_empty_touched_set_passes() {
        assert!(check_scope(&set(&[]), &set(&["a.py"]), &set(&["b.py"])));
    }

    #[test]
    fn test_violations_are_reported_sorted() {
        let violations = scope_violations(
            &set(&["z.py", "a.py", "routes/auth.py"]),
            &set(&["routes/auth.py"]),
            &set(&[]),
        );
        assert_eq!(violations, vec!["a.py", "z.py"]);
    }
}
