use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

/// Maximum length for response bodies echoed into error messages
const MAX_ERROR_BODY_LEN: usize = 400;

/// Truncate a string for display (Unicode-safe)
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// Truncate with an ellipsis marker when something was cut
pub fn truncate(s: &str, max_chars: usize) -> String {
    let cut = truncate_str(s, max_chars);
    if cut.len() == s.len() {
        s.to_string()
    } else {
        format!("{}... (truncated)", cut)
    }
}

fn secret_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)(sk-[a-z0-9_\-]{8,}|bearer\s+[a-z0-9_\-\.]{8,}|api[_-]?key[\x22']?\s*[:=]\s*[\x22']?[a-z0-9_\-]{8,})")
                .ok()
        })
        .as_ref()
}

/// Sanitize an engine response body before it lands in an error or a log line.
/// Truncates long bodies and masks anything that looks like a credential.
pub fn sanitize_api_response(body: &str) -> String {
    let truncated = truncate(body.trim(), MAX_ERROR_BODY_LEN);
    match secret_pattern() {
        Some(re) => re.replace_all(&truncated, "[redacted]").into_owned(),
        None => truncated,
    }
}

/// Normalize a path by removing `.` and resolving `..` lexically
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                result.pop();
            }
            Component::CurDir => {}
            _ => result.push(component),
        }
    }
    result
}

/// Collapse runs of whitespace to single spaces
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
