//! Prompt builder for edit-batch proposals.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::text::tail_chars;
use crate::core::types::StepFailure;
use crate::io::context::RepoContext;

const FIX_TEMPLATE: &str = include_str!("prompts/fix.md");
const FEATURE_TEMPLATE: &str = include_str!("prompts/feature.md");

/// Droppable sections, least valuable first.
const DROP_ORDER: [&str; 5] = ["history", "previews", "listing", "previous", "memory"];

static SECTION_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").ok()
});

/// Failing step as shown to the template.
#[derive(Debug, Clone, Serialize)]
struct FailureContext {
    step: String,
    command: String,
    exit_code: String,
}

impl FailureContext {
    fn from_failure(failure: &StepFailure) -> Self {
        Self {
            step: failure.step.clone(),
            command: failure.command.join(" "),
            exit_code: failure
                .exit_code
                .map_or_else(|| "none (killed or timed out)".to_string(), |c| c.to_string()),
        }
    }
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("fix", FIX_TEMPLATE)
            .context("load fix template")?;
        env.add_template("feature", FEATURE_TEMPLATE)
            .context("load feature template")?;
        Ok(Self { env })
    }

    fn render(&self, input: &PromptInputs<'_>) -> Result<String> {
        let name = if input.task.is_some() { "feature" } else { "fix" };
        let failure = input.failure.map(FailureContext::from_failure);
        let log = input
            .failure
            .map(|f| tail_chars(f.output.trim_end(), input.log_tail_chars))
            .unwrap_or_default();
        let template = self.env.get_template(name)?;
        let rendered = template.render(context! {
            allow => input.allow,
            deny => input.deny,
            task => input.task.map(str::trim),
            failure => failure,
            log => log,
            log_chars => input.log_tail_chars,
            attempt => input.attempt,
            max_attempts => input.max_attempts,
            previous => input.previous.map(str::trim).filter(|s| !s.is_empty()),
            memory => (!input.memory.trim().is_empty()).then(|| input.memory.trim()),
            previews => input.repo.previews,
            listing => (!input.repo.listing.trim().is_empty()).then(|| input.repo.listing.trim()),
            history => input.repo.git_history.as_deref(),
        })?;
        Ok(rendered)
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let Some(re) = SECTION_RE.as_ref() else {
        return vec![ParsedSection {
            key: "all".to_string(),
            required: true,
            content: rendered.trim().to_string(),
        }];
    };
    let markers: Vec<(usize, usize, String, bool)> = re
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((
                whole.start(),
                whole.end(),
                caps.get(1)?.as_str().to_string(),
                caps.get(2)?.as_str() == "required",
            ))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (_, content_start, key, required)) in markers.iter().enumerate() {
        let end = markers
            .get(i + 1)
            .map_or(rendered.len(), |(next_start, ..)| *next_start);
        let content = rendered[*content_start..end].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

/// Drop droppable sections in [`DROP_ORDER`] until the prompt fits, then
/// truncate the last section if it still does not. The log loses its oldest
/// lines, every other section its end.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    if total_len(sections) <= budget {
        return;
    }
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let other_len: usize = sections
        .iter()
        .rev()
        .skip(1)
        .map(|s| s.content.len())
        .sum();
    if let Some(last) = sections.last_mut()
        && other_len + last.content.len() > budget
    {
        let allowed = budget.saturating_sub(other_len);
        let before_len = last.content.len();
        let marker = "\n[truncated]";
        if last.key == "log" {
            truncate_log_keeping_tail(&mut last.content, allowed);
        } else if allowed > marker.len() {
            truncate_on_char_boundary(&mut last.content, allowed - marker.len());
            last.content.push_str(marker);
        } else {
            truncate_on_char_boundary(&mut last.content, allowed);
        }
        debug!(
            section = %last.key,
            before_len,
            after_len = last.content.len(),
            "truncated section for budget"
        );
    }
}

fn truncate_on_char_boundary(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

/// Cut a log section to `max_bytes`, keeping its heading and the end of the
/// log where the error usually is.
fn truncate_log_keeping_tail(section: &mut String, max_bytes: usize) {
    const OPEN: &str = "<log>\n";
    const MARKER: &str = "[truncated]\n";
    if section.len() <= max_bytes {
        return;
    }
    let head_len = section.find(OPEN).map_or(0, |i| i + OPEN.len());
    let keep = max_bytes.saturating_sub(head_len + MARKER.len());
    if keep == 0 {
        let start = tail_start(section, max_bytes);
        section.replace_range(..start, "");
        return;
    }
    let tail = section[tail_start(section, keep)..].to_string();
    section.truncate(head_len);
    section.push_str(MARKER);
    section.push_str(&tail);
}

/// Byte offset of the last `max_bytes` of `text`, moved forward to a char
/// boundary.
fn tail_start(text: &str, max_bytes: usize) -> usize {
    let mut start = text.len().saturating_sub(max_bytes);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    start
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Everything a proposal prompt is rendered from.
///
/// `task` selects the feature template; without it the fix template is used
/// and `failure` must be set.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub task: Option<&'a str>,
    pub failure: Option<&'a StepFailure>,
    pub log_tail_chars: usize,
    pub attempt: u32,
    pub max_attempts: u32,
    /// Summary of the previous batch in this pass, when it did not help.
    pub previous: Option<&'a str>,
    pub memory: &'a str,
    pub repo: &'a RepoContext,
    pub allow: &'a [String],
    pub deny: &'a [String],
}

/// Renders prompts within a byte budget, dropping less critical sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, input: &PromptInputs<'_>) -> Result<String> {
        let rendered = PromptEngine::new()?
            .render(input)
            .context("render prompt template")?;
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        Ok(render_sections(&sections))
    }
}
