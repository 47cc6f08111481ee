//! Structural validation of LLM-produced payloads.
//!
//! These are the sole gate before generated content is trusted enough to
//! write to disk or branch control flow. All functions are pure and return
//! booleans — the state machine branches on values, never on exceptions.
//! Payloads arrive as parsed JSON; shape errors upstream of these checks are
//! the gateway's `Malformed` error, not a validator concern.

use std::collections::HashSet;

use serde_json::Value;

/// True when the payload is a usable task breakdown: a `tasks` sequence,
/// non-empty, each entry carrying `task_id` and a non-blank `description`,
/// with ids pairwise distinct.
pub fn validate_task_breakdown(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    let Some(tasks) = obj.get("tasks").and_then(Value::as_array) else {
        return false;
    };
    if tasks.is_empty() {
        return false;
    }

    let mut seen = HashSet::new();
    for task in tasks {
        let Some(entry) = task.as_object() else {
            return false;
        };
        let id = match entry.get("task_id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return false,
        };
        match entry.get("description").and_then(Value::as_str) {
            Some(desc) if !desc.trim().is_empty() => {}
            _ => return false,
        }
        if !seen.insert(id) {
            return false;
        }
    }
    true
}

/// True when the payload is a writable code output: non-empty files, every
/// path relative and traversal-free, and grammar-checkable contents parse.
pub fn validate_code_output(value: &Value) -> bool {
    let Some(files) = normalize_files(value) else {
        return false;
    };
    if files.is_empty() {
        return false;
    }
    files
        .iter()
        .all(|(path, content)| is_safe_rel_path(path) && content_parses(path, content))
}

/// Normalize the `files` payload to `(path, content)` pairs. Accepts either
/// a sequence of `{path, content}` entries or a mapping from path to content.
/// Returns `None` when the shape is neither.
pub fn normalize_files(value: &Value) -> Option<Vec<(String, String)>> {
    let files = value.as_object()?.get("files")?;

    match files {
        Value::Array(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            for entry in entries {
                let obj = entry.as_object()?;
                let path = obj.get("path")?.as_str()?;
                let content = obj.get("content")?.as_str()?;
                if path.is_empty() {
                    return None;
                }
                out.push((path.to_string(), content.to_string()));
            }
            Some(out)
        }
        Value::Object(map) => {
            let mut out = Vec::with_capacity(map.len());
            for (path, content) in map {
                let content = content.as_str()?;
                if path.is_empty() {
                    return None;
                }
                out.push((path.clone(), content.to_string()));
            }
            Some(out)
        }
        _ => None,
    }
}

/// Relative, non-traversing paths only.
pub fn is_safe_rel_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') {
        return false;
    }
    !path.split(['/', '\\']).any(|segment| segment == "..")
}

/// Grammar check dispatch by extension. Unknown extensions always pass —
/// only checkable grammars can fail.
pub fn content_parses(path: &str, content: &str) -> bool {
    match path.rsplit('.').next() {
        Some("py") => python_syntax_ok(content),
        Some("json") => serde_json::from_str::<Value>(content).is_ok(),
        _ => true,
    }
}

/// Lightweight Python well-formedness scan: strings, comments, and bracket
/// nesting. Unbalanced or unclosed delimiters and unterminated string
/// literals are rejected. Not a full parser; indentation and keyword grammar
/// are left to the test run.
pub fn python_syntax_ok(source: &str) -> bool {
    let chars: Vec<char> = source.chars().collect();
    let n = chars.len();
    let mut stack: Vec<char> = Vec::new();
    let mut i = 0;

    while i < n {
        match chars[i] {
            '#' => {
                while i < n && chars[i] != '\n' {
                    i += 1;
                }
            }
            q @ ('\'' | '"') => {
                let triple = i + 2 < n && chars[i + 1] == q && chars[i + 2] == q;
                if triple {
                    i += 3;
                    let mut closed = false;
                    while i < n {
                        if chars[i] == '\\' {
                            i += 2;
                        } else if chars[i] == q && i + 2 < n && chars[i + 1] == q && chars[i + 2] == q
                        {
                            i += 3;
                            closed = true;
                            break;
                        } else {
                            i += 1;
                        }
                    }
                    if !closed {
                        return false;
                    }
                } else {
                    i += 1;
                    let mut closed = false;
                    while i < n {
                        if chars[i] == '\\' {
                            i += 2;
                        } else if chars[i] == q {
                            i += 1;
                            closed = true;
                            break;
                        } else if chars[i] == '\n' {
                            break;
                        } else {
                            i += 1;
                        }
                    }
                    if !closed {
                        return false;
                    }
                }
            }
            open @ ('(' | '[' | '{') => {
                stack.push(open);
                i += 1;
            }
            close @ (')' | ']' | '}') => {
                let expected = match close {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(expected) {
                    return false;
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    stack.is_empty()
}
