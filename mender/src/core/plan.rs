//! Checklist parsing and line-preserving rewrites for the plan document.
//!
//! Recognized task lines (after leading whitespace):
//!
//! - `- [ ] text` / `* [ ] text`: open
//! - `- [x] text` / `- [X] text` (either bullet): done
//! - `- text` / `* text`: open (bare bullet)
//!
//! Everything else (headers, blank lines, prose) is structure and is never
//! modified.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Open,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    /// Normalized text: checklist markup and surrounding whitespace stripped.
    pub text: String,
    pub status: TaskStatus,
    /// Zero-based line index in the document.
    pub line: usize,
}

/// Parsed view of one task line.
struct TaskLine<'a> {
    indent: &'a str,
    bullet: char,
    status: TaskStatus,
    text: &'a str,
}

fn parse_task_line(line: &str) -> Option<TaskLine<'_>> {
    let body = line.trim_end_matches(['\n', '\r']);
    let trimmed = body.trim_start();
    let indent = &body[..body.len() - trimmed.len()];
    let mut chars = trimmed.chars();
    let bullet = chars.next()?;
    if bullet != '-' && bullet != '*' {
        return None;
    }
    let rest = chars.as_str();
    // Require whitespace after the bullet so `---` rules and `**bold**` stay prose.
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    let rest = rest.trim_start();
    let (status, text) = if let Some(after) = rest.strip_prefix("[ ]") {
        (TaskStatus::Open, after)
    } else if let Some(after) = rest
        .strip_prefix("[x]")
        .or_else(|| rest.strip_prefix("[X]"))
    {
        (TaskStatus::Done, after)
    } else {
        (TaskStatus::Open, rest)
    };
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(TaskLine {
        indent,
        bullet,
        status,
        text,
    })
}

/// Parse all task lines, in document order.
pub fn parse_tasks(document: &str) -> Vec<Task> {
    document
        .split_inclusive('\n')
        .enumerate()
        .filter_map(|(line, raw)| {
            parse_task_line(raw).map(|parsed| Task {
                text: parsed.text.to_string(),
                status: parsed.status,
                line,
            })
        })
        .collect()
}

/// Open tasks, in document order.
pub fn open_tasks(document: &str) -> Vec<Task> {
    parse_tasks(document)
        .into_iter()
        .filter(|task| task.status == TaskStatus::Open)
        .collect()
}

/// Rewrite the first open task whose normalized text equals `task` to its done
/// form. Returns `None` when no open task matches.
///
/// Only that line changes; its indentation, bullet and line ending are kept.
pub fn mark_done(document: &str, task: &str) -> Option<String> {
    let mut out = String::with_capacity(document.len() + 4);
    let mut changed = false;
    for raw in document.split_inclusive('\n') {
        if !changed
            && let Some(parsed) = parse_task_line(raw)
            && parsed.status == TaskStatus::Open
            && parsed.text == task
        {
            let ending = &raw[raw.trim_end_matches(['\n', '\r']).len()..];
            out.push_str(&format!(
                "{}{} [x] {}{}",
                parsed.indent, parsed.bullet, parsed.text, ending
            ));
            changed = true;
            continue;
        }
        out.push_str(raw);
    }
    changed.then_some(out)
}

/// Template written when the plan document does not exist yet.
pub const PLAN_TEMPLATE: &str = "# Feature Plan

Tasks are worked top to bottom. Mark a task done with `- [x]`.

- [ ] Describe the first feature you want implemented here.
- [ ] Describe the next feature here.
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_checkbox_bare_and_done_forms() {
        let doc = "# Plan\n\n- [ ] Add X\n- [x] Add Y\n* Add Z\n  - [X] Nested\nprose line\n---\n";
        let tasks = parse_tasks(doc);
        let summary: Vec<(&str, TaskStatus)> =
            tasks.iter().map(|t| (t.text.as_str(), t.status)).collect();
        assert_eq!(
            summary,
            vec![
                ("Add X", TaskStatus::Open),
                ("Add Y", TaskStatus::Done),
                ("Add Z", TaskStatus::Open),
                ("Nested", TaskStatus::Done),
            ]
        );
        assert_eq!(tasks[0].line, 2);
    }

    #[test]
    fn mark_done_rewrites_only_the_first_open_match() {
        let doc = "# Plan\n- [ ] Add X\n- [ ] Add Y\n";
        let updated = mark_done(doc, "Add X").expect("marked");
        assert_eq!(updated, "# Plan\n- [x] Add X\n- [ ] Add Y\n");
    }

    #[test]
    fn mark_done_keeps_bare_siblings_and_indentation() {
        let doc = "- Add X\n  * Add Y\n";
        let updated = mark_done(doc, "Add Y").expect("marked");
        assert_eq!(updated, "- Add X\n  * [x] Add Y\n");
    }

    #[test]
    fn mark_done_preserves_crlf_and_missing_trailing_newline() {
        let doc = "- [ ] A\r\n- [ ] B";
        assert_eq!(mark_done(doc, "A").expect("A"), "- [x] A\r\n- [ ] B");
        assert_eq!(mark_done(doc, "B").expect("B"), "- [ ] A\r\n- [x] B");
    }

    #[test]
    fn mark_done_skips_done_duplicates_and_changes_one_line() {
        let doc = "- [x] Same\n- [ ] Same\n- [ ] Same\n";
        let updated = mark_done(doc, "Same").expect("marked");
        let changed: Vec<usize> = doc
            .lines()
            .zip(updated.lines())
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(changed, vec![1]);
    }

    #[test]
    fn mark_done_is_exact_match_only() {
        assert_eq!(mark_done("- [ ] Add X please\n", "Add X"), None);
        assert_eq!(mark_done("- [x] Add X\n", "Add X"), None);
    }

    #[test]
    fn template_has_open_tasks() {
        assert_eq!(open_tasks(PLAN_TEMPLATE).len(), 2);
    }
}
