//! Unified-diff previews for dry runs.

use serde::Serialize;
use similar::TextDiff;

use upkeep_core::UpdateAction;

/// What a dry run would do to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePreview {
    pub file_path: String,
    pub action: UpdateAction,
    pub unified_diff: String,
}

/// `a/<path>` -> `b/<path>` unified diff with three lines of context.
/// Empty when the contents are identical.
pub fn unified_preview(path: &str, old: &str, new: &str) -> String {
    let old = normalize_line_endings(old);
    let new = normalize_line_endings(new);
    if old == new {
        return String::new();
    }
    TextDiff::from_lines(&old, &new)
        .unified_diff()
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .context_radius(3)
        .to_string()
}

fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shows_changed_lines_with_headers() {
        let diff = unified_preview("CLAUDE.md", "a\nb\n", "a\nc\n");
        assert!(diff.contains("--- a/CLAUDE.md"));
        assert!(diff.contains("+++ b/CLAUDE.md"));
        assert!(diff.contains("-b"));
        assert!(diff.contains("+c"));
    }

    #[test]
    fn identical_content_has_no_diff() {
        assert!(unified_preview("x", "same\r\n", "same\n").is_empty());
    }
}
