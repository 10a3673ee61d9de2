//! Pure edit resolution: decide how an edit transforms file content.

use crate::core::types::{Edit, EditStatus, SkipReason};

/// Result of resolving one edit against the current file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Write `content`; `status` records which policy produced it.
    Write { content: String, status: EditStatus },
    /// Leave the file alone.
    Skip(SkipReason),
}

/// Apply the resolution policy, in order:
///
/// 1. empty `before`: append `after`
/// 2. `before` found: replace the first occurrence only
/// 3. `before` missing in a markup file: skip
/// 4. `before` missing elsewhere: append as a fallback
pub fn resolve_edit(content: &str, edit: &Edit, is_markup: bool) -> Resolution {
    if edit.is_append() {
        return Resolution::Write {
            content: append_block(content, &edit.after),
            status: EditStatus::Appended,
        };
    }
    if content.contains(&edit.before) {
        return Resolution::Write {
            content: content.replacen(&edit.before, &edit.after, 1),
            status: EditStatus::Replaced,
        };
    }
    if is_markup {
        return Resolution::Skip(SkipReason::MarkupNoMatch);
    }
    Resolution::Write {
        content: append_block(content, &edit.after),
        status: EditStatus::AppendedFallback,
    }
}

/// Append `block` after exactly one newline separator, ending with a newline.
/// An empty block leaves `content` as it is.
pub fn append_block(content: &str, block: &str) -> String {
    if block.is_empty() {
        return content.to_string();
    }
    let mut out = String::with_capacity(content.len() + block.len() + 2);
    out.push_str(content);
    if !content.is_empty() && !content.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(block);
    if !block.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Whether `file` has one of the given extensions (case-insensitive, no dot).
pub fn is_markup_file(file: &str, markup_extensions: &[String]) -> bool {
    let Some((_, ext)) = file.rsplit_once('.') else {
        return false;
    };
    if ext.contains('/') {
        return false;
    }
    markup_extensions
        .iter()
        .any(|m| m.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(before: &str, after: &str) -> Edit {
        Edit {
            file: "lib/a.ts".to_string(),
            before: before.to_string(),
            after: after.to_string(),
        }
    }

    fn written(resolution: Resolution) -> (String, EditStatus) {
        match resolution {
            Resolution::Write { content, status } => (content, status),
            Resolution::Skip(reason) => panic!("unexpected skip: {reason:?}"),
        }
    }

    #[test]
    fn replaces_first_occurrence_only() {
        let (content, status) = written(resolve_edit(
            "x = 1;\nx = 1;\n",
            &edit("x = 1;", "x = 2;"),
            false,
        ));
        assert_eq!(content, "x = 2;\nx = 1;\n");
        assert_eq!(status, EditStatus::Replaced);
    }

    #[test]
    fn empty_before_always_appends_even_when_text_exists() {
        let (content, status) =
            written(resolve_edit("export {};\n", &edit("", "export {};"), false));
        assert_eq!(content, "export {};\nexport {};\n");
        assert_eq!(status, EditStatus::Appended);
    }

    #[test]
    fn empty_before_and_after_leaves_content_unchanged() {
        let (content, status) = written(resolve_edit("const a = 1;", &edit("", ""), false));
        assert_eq!(content, "const a = 1;");
        assert_eq!(status, EditStatus::Appended);
    }

    #[test]
    fn append_inserts_single_separator() {
        assert_eq!(append_block("a", "b"), "a\nb\n");
        assert_eq!(append_block("a\n", "b\n"), "a\nb\n");
        assert_eq!(append_block("", "b"), "b\n");
        assert_eq!(append_block("a", ""), "a");
    }

    #[test]
    fn missing_before_in_markup_is_skipped() {
        assert_eq!(
            resolve_edit("<div/>\n", &edit("<span/>", "<p/>"), true),
            Resolution::Skip(SkipReason::MarkupNoMatch)
        );
    }

    #[test]
    fn missing_before_elsewhere_falls_back_to_append() {
        let (content, status) = written(resolve_edit("a\n", &edit("zzz", "b"), false));
        assert_eq!(content, "a\nb\n");
        assert_eq!(status, EditStatus::AppendedFallback);
    }

    #[test]
    fn identical_before_and_after_leaves_content_unchanged() {
        let (content, status) = written(resolve_edit(
            "const a = 1;\n",
            &edit("const a = 1;", "const a = 1;"),
            false,
        ));
        assert_eq!(content, "const a = 1;\n");
        assert_eq!(status, EditStatus::Replaced);
    }

    #[test]
    fn markup_detection_uses_extension() {
        let exts = vec!["tsx".to_string(), ".jsx".to_string()];
        assert!(is_markup_file("app/page.tsx", &exts));
        assert!(is_markup_file("app/Page.JSX", &exts));
        assert!(!is_markup_file("lib/a.ts", &exts));
        assert!(!is_markup_file("app.tsx/README", &exts));
        assert!(!is_markup_file("Makefile", &exts));
    }
}
