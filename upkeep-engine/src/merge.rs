//! Delimiter-bounded smart merge.
//!
//! User-authored regions live between marker lines:
//!
//! ```text
//! <!-- USER_CUSTOM_START -->
//! ...kept across updates...
//! <!-- USER_CUSTOM_END -->
//! ```
//!
//! The n-th region of the old file replaces the body of the n-th marker pair
//! in the new template. Regions with no matching pair in the template are
//! appended at the end, and the merge is reported as a conflict.

use thiserror::Error;

pub const CUSTOM_START: &str = "<!-- USER_CUSTOM_START -->";
pub const CUSTOM_END: &str = "<!-- USER_CUSTOM_END -->";
pub const CONFLICT_START: &str = "<<<<<<< CURRENT";
pub const CONFLICT_DIVIDER: &str = "=======";
pub const CONFLICT_END: &str = ">>>>>>> TEMPLATE";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkerError {
    #[error("customization start marker on line {0} is never closed")]
    Unclosed(usize),
    #[error("customization end marker on line {0} has no matching start")]
    Unopened(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub content: String,
    pub preserved_blocks: usize,
    /// Some user regions had to be appended instead of spliced in.
    pub conflict: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Marker {
    Start,
    End,
}

fn marker(line: &str) -> Option<Marker> {
    match line.trim() {
        CUSTOM_START => Some(Marker::Start),
        CUSTOM_END => Some(Marker::End),
        _ => None,
    }
}

/// Bodies of every marker pair, in order. Nested starts are rejected.
pub fn extract_custom_blocks(content: &str) -> Result<Vec<Vec<&str>>, MarkerError> {
    let mut blocks = Vec::new();
    let mut open: Option<(usize, Vec<&str>)> = None;
    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        match marker(line) {
            Some(Marker::Start) => {
                if let Some((start, _)) = &open {
                    return Err(MarkerError::Unclosed(*start));
                }
                open = Some((line_no, Vec::new()));
            }
            Some(Marker::End) => match open.take() {
                Some((_, body)) => blocks.push(body),
                None => return Err(MarkerError::Unopened(line_no)),
            },
            None => {
                if let Some((_, body)) = open.as_mut() {
                    body.push(line);
                }
            }
        }
    }
    match open {
        Some((start, _)) => Err(MarkerError::Unclosed(start)),
        None => Ok(blocks),
    }
}

pub fn has_custom_markers(content: &str) -> bool {
    content.lines().any(|l| marker(l).is_some())
}

/// At least one marker pair and no stray markers.
pub fn is_merge_capable(content: &str) -> bool {
    matches!(extract_custom_blocks(content), Ok(blocks) if !blocks.is_empty())
}

/// Leftover `<<<<<<< CURRENT` / `>>>>>>> TEMPLATE` conflict markers.
pub fn has_conflict_markers(content: &str) -> bool {
    content.lines().any(|l| {
        let t = l.trim_end();
        t.starts_with(CONFLICT_START) || t.starts_with(CONFLICT_END)
    })
}

fn line_ending(content: &str) -> &'static str {
    if content.contains("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}

/// Splice the user regions of `existing` into `template`.
///
/// The result uses the line ending of `existing`.
pub fn smart_merge(existing: &str, template: &str) -> Result<MergeOutcome, MarkerError> {
    let user_blocks = extract_custom_blocks(existing)?;
    extract_custom_blocks(template)?;

    let mut out: Vec<&str> = Vec::new();
    let mut next_block = 0usize;
    let mut skipping = false;
    for line in template.lines() {
        match marker(line) {
            Some(Marker::Start) => {
                out.push(line);
                if let Some(body) = user_blocks.get(next_block) {
                    out.extend(body.iter().copied());
                    skipping = true;
                }
                next_block += 1;
            }
            Some(Marker::End) => {
                skipping = false;
                out.push(line);
            }
            None if skipping => {}
            None => out.push(line),
        }
    }

    let spliced = next_block.min(user_blocks.len());
    let leftovers = &user_blocks[spliced..];
    for body in leftovers {
        out.push("");
        out.push(CUSTOM_START);
        out.extend(body.iter().copied());
        out.push(CUSTOM_END);
    }

    let eol = line_ending(existing);
    let mut content = out.join(eol);
    if template.ends_with('\n') || !leftovers.is_empty() {
        content.push_str(eol);
    }
    Ok(MergeOutcome {
        content,
        preserved_blocks: user_blocks.len(),
        conflict: !leftovers.is_empty(),
    })
}
