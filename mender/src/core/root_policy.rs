//! Deterministic classification of edit targets against allow/deny roots.

use std::path::{Component, Path};

/// Classification of a relative path under the root policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathClass {
    Allowed,
    Denied,
    OutOfScope,
}

/// Allow/deny prefix lists bounding where edits may land.
///
/// Prefixes are compared against the normalized `/`-separated form of the
/// path, so `src/` matches `src/lib.rs` and `./src/lib.rs` but not `srcx/a`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootPolicy {
    allow: Vec<String>,
    deny: Vec<String>,
}

impl RootPolicy {
    pub fn new(allow: Vec<String>, deny: Vec<String>) -> Self {
        Self { allow, deny }
    }

    /// Classify `path`.
    ///
    /// - Absolute paths, drive prefixes, empty paths and `..` segments are
    ///   `Denied` regardless of the lists.
    /// - A deny prefix wins even when an allow prefix also matches.
    /// - Otherwise an allow prefix yields `Allowed`, and no match `OutOfScope`.
    pub fn classify(&self, path: &str) -> PathClass {
        let Some(normalized) = normalize(path) else {
            return PathClass::Denied;
        };
        if self.deny.iter().any(|p| matches_prefix(&normalized, p)) {
            return PathClass::Denied;
        }
        if self.allow.iter().any(|p| matches_prefix(&normalized, p)) {
            return PathClass::Allowed;
        }
        PathClass::OutOfScope
    }

    /// True when every path below directory `dir` is denied.
    pub fn denies_dir(&self, dir: &str) -> bool {
        let Some(normalized) = normalize(dir) else {
            return true;
        };
        let with_slash = format!("{normalized}/");
        self.deny.iter().any(|p| matches_prefix(&with_slash, p))
    }
}

/// Normalize to `a/b/c`, or `None` when the path could escape the root.
pub fn normalize(path: &str) -> Option<String> {
    if path.trim().is_empty() {
        return None;
    }
    // Backslashes are separators on Windows and never legitimate in a proposed
    // path elsewhere, so treat them the same everywhere.
    let unified = path.replace('\\', "/");
    let mut parts = Vec::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn matches_prefix(normalized: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_start_matches("./");
    if prefix.is_empty() {
        return false;
    }
    if prefix.ends_with('/') {
        return normalized.starts_with(prefix);
    }
    // A bare `src` behaves like `src/` but also matches the exact file `src`.
    normalized == prefix
        || normalized
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}
