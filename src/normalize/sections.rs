use std::sync::LazyLock;

use regex::Regex;

/// Top-level chapter headers: `I.` … `XII.` numbering or a `【 … 】` bracket title.
static SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[IVX]{1,4}\.\s+|【\s*)(\S.*)$").unwrap());

/// Chapters without substantive content: audit opinion appendix, detail tables, expert sign-off.
pub const DEFAULT_BLOCKED_SECTIONS: &[&str] = &["회계감사인의 감사의견", "상세표", "전문가의 확인"];

/// Trim every line, squeeze runs of spaces into one, keep at most one blank line in a row.
pub fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_blank = false;

    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        out.push_str(&collapsed);
        pending_blank = false;
    }

    out
}

/// Title of a top-level section header line, if the line is one.
pub fn section_title(line: &str) -> Option<&str> {
    SECTION_RE
        .captures(line.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Drop the chapters whose header title starts with a blocked name.
///
/// Suppression starts at a blocked header and ends at the next header that is not blocked.
pub fn suppress_boilerplate<S: AsRef<str>>(text: &str, blocked: &[S]) -> String {
    let mut suppressing = false;
    let mut kept: Vec<&str> = Vec::new();

    for line in text.lines() {
        if let Some(title) = section_title(line) {
            suppressing = blocked.iter().any(|b| title.starts_with(b.as_ref()));
        }
        if !suppressing {
            kept.push(line);
        }
    }

    collapse_whitespace(&kept.join("\n"))
}
