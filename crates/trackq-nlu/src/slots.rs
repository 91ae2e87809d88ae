//! Slot extraction: segment a free-text query into typed candidate values.
//!
//! Extraction is driven by an ordered table of [`SlotRule`]s. Within each
//! slot kind, rules run in table order: literal/quoted patterns first
//! (`project = "CCM"`), then contextual phrases ("assigned to X", "top 5",
//! "in the X project"), then dictionary and capitalized-token heuristics
//! filtered against the project-key allow-list and a stop-word set. The
//! first candidate becomes the slot value; later distinct candidates become
//! its `alternatives`.
//!
//! Extraction performs no I/O and depends only on the query and the
//! [`ExtractionContext`].

use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::trace;

use trackq_core::defaults::CONTEXT_CONFIDENCE;
use trackq_core::{ConversationContext, ExtractedSlots, SlotKind, SlotValue};

/// Assignee value for "my"/"me" queries.
pub const CURRENT_USER: &str = "currentUser()";

/// Assignee value for "unassigned" queries.
pub const NOBODY: &str = "EMPTY";

/// Inputs beyond the query text: known project keys and values carried
/// over from earlier turns.
#[derive(Debug, Clone, Default)]
pub struct ExtractionContext {
    /// Upper-cased project keys known to the tracker.
    pub project_keys: HashSet<String>,
    pub current_project: Option<String>,
    pub current_sprint: Option<String>,
}

impl ExtractionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.project_keys = keys
            .into_iter()
            .map(|k| k.as_ref().to_uppercase())
            .collect();
        self
    }

    pub fn with_conversation(mut self, conversation: &ConversationContext) -> Self {
        self.current_project = conversation.current_project.clone();
        self.current_sprint = conversation.current_sprint.clone();
        self
    }

    fn is_project_key(&self, token: &str) -> bool {
        self.project_keys.contains(&token.to_uppercase())
    }
}

type Extractor = fn(&Captures<'_>, &str, &ExtractionContext) -> Option<SlotValue>;

/// One pattern → extractor rule.
pub struct SlotRule {
    pub kind: SlotKind,
    /// Stable rule name, for tracing and tests.
    pub name: &'static str,
    pattern: Regex,
    extract: Extractor,
}

impl SlotRule {
    fn new(kind: SlotKind, name: &'static str, pattern: &str, extract: Extractor) -> Self {
        Self {
            kind,
            name,
            pattern: Regex::new(pattern).expect("slot rule pattern is valid"),
            extract,
        }
    }

    /// Every candidate this rule yields for `query`, in text order.
    pub fn apply(&self, query: &str, ctx: &ExtractionContext) -> Vec<SlotValue> {
        self.pattern
            .captures_iter(query)
            .filter_map(|caps| (self.extract)(&caps, query, ctx))
            .filter(|v| !v.raw_text.trim().is_empty() && !v.value.trim().is_empty())
            .collect()
    }
}

// =============================================================================
// WORD LISTS
// =============================================================================

/// Words that are never names or identifiers.
static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "about", "active", "all", "an", "and", "any", "anyone", "are", "assigned", "at",
        "backlog", "blocked", "board", "bug", "bugs", "by", "closed", "component", "count",
        "created", "critical", "current", "day", "days", "done", "each", "epic", "epics",
        "everyone", "every", "find", "first", "for", "from", "get", "give", "high", "highest",
        "how", "i", "in", "is", "issue", "issues", "it", "item", "items", "label", "labels",
        "last", "latest", "list", "low", "lowest", "many", "me", "medium", "mine", "month",
        "months", "my", "newest", "next", "nobody", "not", "now", "of", "oldest", "on", "open",
        "or", "our", "pending", "please", "previous", "priority", "progress", "project",
        "projects", "recent", "recently", "release", "resolved", "review", "show", "some",
        "someone", "sprint", "sprints", "status", "stories", "story", "subtask", "subtasks",
        "task", "tasks", "team", "that", "the", "these", "this", "those", "ticket", "tickets",
        "to", "today", "top", "type", "unassigned", "updated", "us", "version", "we", "week",
        "weeks", "what", "which", "who", "with", "work", "year", "yesterday", "you",
    ]
    .into_iter()
    .collect()
});

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(word.to_lowercase().as_str())
}

fn canonical_issuetype(word: &str) -> Option<&'static str> {
    let w = word.to_lowercase().replace(['-', ' '], "");
    match w.as_str() {
        "story" | "stories" | "userstory" | "userstories" => Some("Story"),
        "bug" | "bugs" | "defect" | "defects" => Some("Bug"),
        "task" | "tasks" => Some("Task"),
        "subtask" | "subtasks" => Some("Sub-task"),
        "epic" | "epics" => Some("Epic"),
        "incident" | "incidents" => Some("Incident"),
        _ => None,
    }
}

fn canonical_status(phrase: &str) -> Option<&'static str> {
    let p = phrase
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    match p.as_str() {
        "in progress" => Some("In Progress"),
        "in review" | "code review" | "review" => Some("In Review"),
        "to do" | "todo" => Some("To Do"),
        "blocked" => Some("Blocked"),
        "in qa" | "qa" | "in testing" | "testing" => Some("In QA"),
        "backlog" => Some("Backlog"),
        "done" => Some("Done"),
        _ => None,
    }
}

fn canonical_priority(word: &str) -> Option<&'static str> {
    match word.to_lowercase().as_str() {
        "highest" | "critical" | "blocker" | "urgent" | "p0" => Some("Highest"),
        "high" | "p1" => Some("High"),
        "medium" | "normal" | "p2" => Some("Medium"),
        "low" | "p3" => Some("Low"),
        "lowest" | "trivial" | "p4" => Some("Lowest"),
        _ => None,
    }
}

/// Text following the whole match, trimmed.
fn tail<'h>(caps: &Captures<'_>, haystack: &'h str) -> &'h str {
    caps.get(0)
        .map(|m| haystack[m.end()..].trim_start())
        .unwrap_or("")
}

/// Text preceding the whole match, trimmed.
fn head<'h>(caps: &Captures<'_>, haystack: &'h str) -> &'h str {
    caps.get(0)
        .map(|m| haystack[..m.start()].trim_end())
        .unwrap_or("")
}

fn starts_with_word(text: &str, words: &[&str]) -> bool {
    let first = text
        .split(|c: char| !c.is_alphanumeric())
        .next()
        .unwrap_or("")
        .to_lowercase();
    words.contains(&first.as_str())
}

fn group<'c>(caps: &'c Captures<'_>, i: usize) -> Option<&'c str> {
    caps.get(i).map(|m| m.as_str().trim())
}

// =============================================================================
// EXTRACTORS
// =============================================================================

fn project_literal(caps: &Captures<'_>, _q: &str, ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 1)?;
    if is_stop_word(raw) {
        return None;
    }
    if ctx.is_project_key(raw) {
        Some(SlotValue::new(raw.to_uppercase(), raw, 1.0))
    } else {
        // A project name; the resolver maps it to a key.
        Some(SlotValue::new(raw, raw, 0.9))
    }
}

/// `project = X`, `project is X`, or a bare `project X` when X is a known
/// key or a capitalized name.
fn project_named(caps: &Captures<'_>, _q: &str, ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 3)?;
    if is_stop_word(raw) {
        return None;
    }
    let has_operator = caps.get(1).is_some() || caps.get(2).is_some();
    let is_key = ctx.is_project_key(raw);
    if !has_operator && !is_key && !raw.starts_with(|c: char| c.is_uppercase()) {
        return None;
    }
    if is_key {
        Some(SlotValue::new(raw.to_uppercase(), raw, 1.0))
    } else {
        Some(SlotValue::new(raw, raw, 0.9))
    }
}

fn project_phrase(caps: &Captures<'_>, _q: &str, ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 1)?;
    if is_stop_word(raw) {
        return None;
    }
    let confidence = if ctx.is_project_key(raw) { 0.95 } else { 0.8 };
    Some(SlotValue::new(raw.to_uppercase(), raw, confidence))
}

fn project_allow_listed(
    caps: &Captures<'_>,
    _q: &str,
    ctx: &ExtractionContext,
) -> Option<SlotValue> {
    let raw = group(caps, 1)?;
    if !ctx.is_project_key(raw) {
        return None;
    }
    // Lower-case tokens must not be ordinary words ("bug" vs a BUG project).
    let all_caps = raw.chars().all(|c| !c.is_alphabetic() || c.is_uppercase());
    if !all_caps && is_stop_word(raw) {
        return None;
    }
    Some(SlotValue::new(raw.to_uppercase(), raw, 0.85))
}

fn project_capitalized(
    caps: &Captures<'_>,
    _q: &str,
    ctx: &ExtractionContext,
) -> Option<SlotValue> {
    // Only a guess when the directory gave us nothing to check against.
    if !ctx.project_keys.is_empty() {
        return None;
    }
    let raw = group(caps, 1)?;
    if is_stop_word(raw) || matches!(raw, "QA" | "PR" | "ID" | "API" | "UI" | "ASAP") {
        return None;
    }
    Some(SlotValue::new(raw, raw, 0.6))
}

fn assignee_literal(caps: &Captures<'_>, _q: &str, _ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 1)?;
    if raw.eq_ignore_ascii_case("me") || raw.eq_ignore_ascii_case("currentuser()") {
        return Some(SlotValue::new(CURRENT_USER, raw, 1.0).with_display("you"));
    }
    Some(SlotValue::new(raw, raw, 1.0))
}

fn assignee_phrase(caps: &Captures<'_>, _q: &str, ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 1)?.trim_end_matches("'s").trim_end_matches('\'');
    let mut tokens: Vec<&str> = raw.split_whitespace().collect();
    let first = *tokens.first()?;
    if is_stop_word(first) || first.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    if first.eq_ignore_ascii_case("me") {
        return Some(SlotValue::new(CURRENT_USER, first, 0.9).with_display("you"));
    }
    // All-caps tokens are identifiers (project keys), not people.
    let looks_like_key =
        |t: &str| t.len() >= 2 && t.chars().all(|c| !c.is_alphabetic() || c.is_uppercase());
    if looks_like_key(first) || ctx.is_project_key(first) {
        return None;
    }
    if let Some(second) = tokens.get(1) {
        if is_stop_word(second) || looks_like_key(second) || ctx.is_project_key(second) {
            tokens.truncate(1);
        }
    }
    let name = tokens.join(" ");
    Some(SlotValue::new(name.clone(), name, 0.85))
}

fn assignee_possessive(
    caps: &Captures<'_>,
    _q: &str,
    ctx: &ExtractionContext,
) -> Option<SlotValue> {
    let raw = group(caps, 1)?;
    let first = raw.split_whitespace().next()?;
    if is_stop_word(first) || ctx.is_project_key(first) {
        return None;
    }
    Some(SlotValue::new(raw, raw, 0.8))
}

fn assignee_self(caps: &Captures<'_>, _q: &str, _ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 1)?;
    Some(SlotValue::new(CURRENT_USER, raw, 0.9).with_display("you"))
}

fn assignee_nobody(caps: &Captures<'_>, _q: &str, _ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 0)?;
    Some(SlotValue::new(NOBODY, raw, 0.9).with_display("nobody"))
}

fn issuetype_literal(caps: &Captures<'_>, _q: &str, _ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 1)?;
    let value = canonical_issuetype(raw)
        .map(str::to_string)
        .unwrap_or_else(|| raw.to_string());
    Some(SlotValue::new(value, raw, 1.0))
}

fn issuetype_word(caps: &Captures<'_>, q: &str, _ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 1)?;
    let value = canonical_issuetype(raw)?;
    // "epic CCM-100" names a parent, not a type.
    if value == "Epic" && EPIC_KEY_AHEAD.is_match(tail(caps, q)) {
        return None;
    }
    Some(SlotValue::new(value, raw, 0.9))
}

static EPIC_KEY_AHEAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:link\s*)?[=:]?\s*"?[A-Za-z][A-Za-z0-9_]+-\d+"#)
        .expect("epic lookahead pattern is valid")
});

fn status_literal(caps: &Captures<'_>, _q: &str, _ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 1)?;
    let value = canonical_status(raw)
        .map(str::to_string)
        .unwrap_or_else(|| raw.to_string());
    Some(SlotValue::new(value, raw, 1.0))
}

fn status_word(caps: &Captures<'_>, q: &str, _ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 1)?;
    let value = canonical_status(raw)?;
    // "done" is a category word unless it follows "status".
    if value == "Done" {
        return None;
    }
    if starts_with_word(tail(caps, q), &["sprint", "sprints"]) {
        return None;
    }
    Some(SlotValue::new(value, raw, 0.85))
}

fn status_category_word(
    caps: &Captures<'_>,
    q: &str,
    _ctx: &ExtractionContext,
) -> Option<SlotValue> {
    let raw = group(caps, 1)?;
    if starts_with_word(tail(caps, q), &["sprint", "sprints"]) {
        return None;
    }
    let lower = raw.to_lowercase();
    let value = match lower.split_whitespace().collect::<Vec<_>>().join(" ").as_str() {
        "open" | "pending" | "unresolved" | "outstanding" | "incomplete" | "remaining"
        | "not done" | "unfinished" => "Open",
        "done" | "closed" | "completed" | "resolved" | "finished" => "Done",
        _ => return None,
    };
    Some(SlotValue::new(value, raw, 0.85))
}

fn priority_literal(caps: &Captures<'_>, _q: &str, _ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 1)?;
    let value = canonical_priority(raw)?;
    Some(SlotValue::new(value, raw, 0.95))
}

fn sprint_relative(caps: &Captures<'_>, _q: &str, _ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 0)?;
    let which = group(caps, 1)?.to_lowercase();
    let (value, display) = match which.as_str() {
        "current" | "this" | "active" | "open" => ("openSprints()", "the current sprint"),
        "last" | "previous" | "closed" => ("closedSprints()", "closed sprints"),
        "next" | "future" | "upcoming" => ("futureSprints()", "upcoming sprints"),
        _ => return None,
    };
    Some(SlotValue::new(value, raw, 0.9).with_display(display))
}

fn sprint_named(caps: &Captures<'_>, _q: &str, _ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 1)?;
    if is_stop_word(raw) {
        return None;
    }
    Some(SlotValue::new(raw, raw, 0.95))
}

fn date_last_n(caps: &Captures<'_>, _q: &str, _ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 0)?;
    let n: u32 = group(caps, 1)?.parse().ok()?;
    if n == 0 {
        return None;
    }
    let unit = group(caps, 2)?.to_lowercase();
    let (value, display) = if unit.starts_with("day") {
        (format!("-{}d", n), format!("the last {} days", n))
    } else if unit.starts_with("week") {
        (format!("-{}w", n), format!("the last {} weeks", n))
    } else {
        (format!("-{}d", n * 30), format!("the last {} months", n))
    };
    Some(SlotValue::new(value, raw, 0.95).with_display(display))
}

fn date_named(caps: &Captures<'_>, _q: &str, _ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 0)?;
    let phrase = raw
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let (value, display, confidence) = match phrase.as_str() {
        "today" => ("startOfDay()", "today", 0.9),
        "yesterday" => ("-1d", "yesterday", 0.9),
        "this week" | "current week" => ("startOfWeek()", "this week", 0.9),
        "last week" | "past week" => ("-7d", "the last week", 0.9),
        "this month" | "current month" => ("startOfMonth()", "this month", 0.9),
        "last month" | "past month" => ("-30d", "the last month", 0.9),
        "recently" | "recent" => ("-7d", "the last 7 days", 0.6),
        _ => return None,
    };
    Some(SlotValue::new(value, raw, confidence).with_display(display))
}

fn free_text_quoted(caps: &Captures<'_>, q: &str, _ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 1)?;
    let before = head(caps, q).to_lowercase();
    // Quoted values of explicit fields belong to those fields.
    if before.ends_with('=') || before.ends_with(':') {
        return None;
    }
    let field_words = [
        "project", "assignee", "status", "sprint", "component", "components", "label", "labels",
        "labelled", "labeled", "epic", "version", "release", "type", "issuetype", "is",
    ];
    let last_word = before.split_whitespace().last().unwrap_or("");
    if field_words.contains(&last_word) {
        return None;
    }
    Some(SlotValue::new(raw, raw, 0.95))
}

fn free_text_about(caps: &Captures<'_>, _q: &str, _ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 1)?;
    if raw.split_whitespace().all(is_stop_word) {
        return None;
    }
    Some(SlotValue::new(raw, raw, 0.75))
}

fn quantity_top(caps: &Captures<'_>, q: &str, _ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 1)?;
    // "last 5 days" is a time window.
    if starts_with_word(tail(caps, q), &["day", "days", "week", "weeks", "month", "months"]) {
        return None;
    }
    let n: usize = raw.parse().ok()?;
    if n == 0 {
        return None;
    }
    Some(SlotValue::new(n.to_string(), raw, 0.9))
}

fn order_named(caps: &Captures<'_>, _q: &str, _ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 0)?;
    let phrase = raw.to_lowercase();
    let value = if phrase.contains("oldest") {
        "created ASC"
    } else if phrase.contains("priority") {
        "priority DESC"
    } else if phrase.contains("newest") {
        "created DESC"
    } else {
        "updated DESC"
    };
    Some(SlotValue::new(value, raw, 0.8))
}

fn order_explicit(caps: &Captures<'_>, _q: &str, _ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 0)?;
    let field = group(caps, 1)?.to_lowercase().replace(' ', "");
    let field = match field.as_str() {
        "created" | "creation" => "created",
        "updated" => "updated",
        "priority" => "priority",
        "duedate" | "due" => "duedate",
        "key" => "key",
        _ => return None,
    };
    let direction = match group(caps, 2).map(str::to_lowercase).as_deref() {
        Some("asc") | Some("ascending") => "ASC",
        Some(_) => "DESC",
        None if field == "key" || field == "duedate" => "ASC",
        None => "DESC",
    };
    Some(SlotValue::new(format!("{} {}", field, direction), raw, 0.95))
}

fn plain_value(caps: &Captures<'_>, _q: &str, _ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 1)?;
    if is_stop_word(raw) {
        return None;
    }
    Some(SlotValue::new(raw, raw, 0.9))
}

fn hashtag_label(caps: &Captures<'_>, _q: &str, _ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 1)?;
    Some(SlotValue::new(raw, raw, 0.8))
}

fn epic_key(caps: &Captures<'_>, _q: &str, _ctx: &ExtractionContext) -> Option<SlotValue> {
    let raw = group(caps, 1)?;
    Some(SlotValue::new(raw.to_uppercase(), raw, 0.95))
}

// =============================================================================
// RULE TABLE
// =============================================================================

/// Name fragment: a word, optionally followed by a capitalized surname.
const NAME: &str = r"([A-Za-z][A-Za-z'.\-]*(?:\s+[A-Z][A-Za-z'\-]+)?)";

static RULES: Lazy<Vec<SlotRule>> = Lazy::new(|| {
    use SlotKind::*;
    vec![
        // ── project ──────────────────────────────────────────────────────
        SlotRule::new(Project, "project_quoted", r#"(?i)\bproject\s*(?:=|:|is)\s*"([^"]+)""#, project_literal),
        SlotRule::new(Project, "project_equals", r"(?i)\bproject(?:\s*([=:])\s*|\s+(is)\s+|\s+)([A-Za-z][A-Za-z0-9_]{1,9})\b", project_named),
        SlotRule::new(Project, "project_suffix", r"(?i)\b(?:in|for|from|on|of|under)\s+(?:the\s+)?([A-Za-z][A-Za-z0-9_]{1,9})\s+project\b", project_phrase),
        SlotRule::new(Project, "project_allow_list", r"\b([A-Za-z][A-Za-z0-9]{1,9})\b", project_allow_listed),
        SlotRule::new(Project, "project_capitalized", r"\b([A-Z][A-Z0-9]{1,9})\b", project_capitalized),
        // ── assignee ─────────────────────────────────────────────────────
        SlotRule::new(Assignee, "assignee_quoted", r#"(?i)\bassignee\s*(?:=|:|is)\s*"([^"]+)""#, assignee_literal),
        SlotRule::new(Assignee, "assignee_equals", r"(?i)\bassignee\s*(?:=|:|is)\s*([A-Za-z][\w.@()\-]*)", assignee_literal),
        SlotRule::new(Assignee, "assignee_unassigned", r"(?i)\bunassigned\b", assignee_nobody),
        SlotRule::new(Assignee, "assignee_phrase", &format!(r"\b(?i:assigned\s+to|owned\s+by|worked\s+on\s+by|for|by|from){}{}", r"\s+", NAME), assignee_phrase),
        SlotRule::new(Assignee, "assignee_possessive", r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)'s\s+(?i:work|issues|tickets|stories|bugs|tasks|items|backlog|open|epics)\b", assignee_possessive),
        SlotRule::new(Assignee, "assignee_self", r"(?i)\b(my|mine|me)\b", assignee_self),
        // ── issuetype ────────────────────────────────────────────────────
        SlotRule::new(Issuetype, "issuetype_equals", r#"(?i)\b(?:issue\s*type|issuetype|type)\s*(?:=|:|is)\s*"?([A-Za-z][A-Za-z\-]*)"?"#, issuetype_literal),
        SlotRule::new(Issuetype, "issuetype_word", r"(?i)\b(user\s+stor(?:y|ies)|stor(?:y|ies)|sub-?tasks?|bugs?|defects?|tasks?|epics?|incidents?)\b", issuetype_word),
        // ── status ───────────────────────────────────────────────────────
        SlotRule::new(Status, "status_quoted", r#"(?i)\bstatus\s*(?:=|:|is)\s*"([^"]+)""#, status_literal),
        SlotRule::new(Status, "status_equals", r"(?i)\bstatus\s*(?:=|:|is)\s*(in\s+(?:progress|review|qa|testing)|to\s+do|[A-Za-z]+)", status_literal),
        SlotRule::new(Status, "status_word", r"(?i)\b(in[\s\-]progress|in[\s\-]review|code\s+review|to[\s\-]?do|blocked|in\s+qa|in\s+testing|backlog)\b", status_word),
        // ── status category ──────────────────────────────────────────────
        SlotRule::new(StatusCategory, "status_category_word", r"(?i)\b(not\s+done|open|pending|unresolved|outstanding|incomplete|remaining|unfinished|done|closed|completed|resolved|finished)\b", status_category_word),
        // ── priority ─────────────────────────────────────────────────────
        SlotRule::new(Priority, "priority_equals", r#"(?i)\bpriority\s*(?:=|:|is)?\s*"?(highest|high|medium|normal|low|lowest|critical|blocker|trivial|p[0-4])\b"#, priority_literal),
        SlotRule::new(Priority, "priority_prefix", r"(?i)\b(highest|high|medium|low|lowest|critical|blocker|urgent|trivial|p[0-4])[\s\-]+priority\b", priority_literal),
        SlotRule::new(Priority, "priority_word", r"(?i)\b(critical|blocker|urgent|p[0-4])\b", priority_literal),
        // ── sprint ───────────────────────────────────────────────────────
        SlotRule::new(Sprint, "sprint_quoted", r#"(?i)\bsprint\s*(?:=|:|is)?\s*"([^"]+)""#, sprint_named),
        SlotRule::new(Sprint, "sprint_relative", r"(?i)\b(current|this|active|open|last|previous|closed|next|future|upcoming)\s+sprints?\b", sprint_relative),
        SlotRule::new(Sprint, "sprint_number", r"(?i)\bsprint\s*(?:=|:|#)?\s*(\d{1,5})\b", sprint_named),
        // ── date range ───────────────────────────────────────────────────
        SlotRule::new(DateRange, "date_last_n", r"(?i)\b(?:in\s+the\s+)?(?:last|past)\s+(\d{1,3})\s+(days?|weeks?|months?)\b", date_last_n),
        SlotRule::new(DateRange, "date_named", r"(?i)\b(?:today|yesterday|(?:this|current)\s+(?:week|month)|(?:last|past)\s+(?:week|month)|recently|recent)\b", date_named),
        // ── free text ────────────────────────────────────────────────────
        SlotRule::new(FreeText, "free_text_quoted", r#""([^"]{2,})""#, free_text_quoted),
        SlotRule::new(FreeText, "free_text_about", r"(?i)\b(?:about|mentioning|containing|regarding|related\s+to)\s+([A-Za-z0-9][\w\s\-]{1,40}?)(?:\s+(?:in|for|by|from|assigned|since|updated|created)\b|[?.!]?\s*$)", free_text_about),
        // ── quantity ─────────────────────────────────────────────────────
        SlotRule::new(Quantity, "quantity_top", r"(?i)\b(?:top|first|latest|last|newest|oldest)\s+(\d{1,3})\b", quantity_top),
        SlotRule::new(Quantity, "quantity_most_recent", r"(?i)\b(\d{1,3})\s+most\s+recent\b", quantity_top),
        // ── order ────────────────────────────────────────────────────────
        SlotRule::new(Order, "order_explicit", r"(?i)\b(?:sorted|ordered|order|sort)\s+by\s+(created|creation|updated|priority|due\s*date|key)\b(?:\s+(asc|ascending|desc|descending)\b)?", order_explicit),
        SlotRule::new(Order, "order_named", r"(?i)\b(?:most\s+recent(?:ly\s+updated)?|latest|newest|oldest|recently\s+updated|highest\s+priority\s+first|by\s+priority)\b", order_named),
        // ── component ────────────────────────────────────────────────────
        SlotRule::new(Component, "component_quoted", r#"(?i)\bcomponents?\s*(?:=|:|is)?\s*"([^"]+)""#, plain_value),
        SlotRule::new(Component, "component_equals", r"(?i)\bcomponents?\s*(?:=|:|is)\s*([\w\-]+)", plain_value),
        SlotRule::new(Component, "component_suffix", r"(?i)\b(?:in|for|of)\s+(?:the\s+)?([\w\-]+)\s+component\b", plain_value),
        // ── label ────────────────────────────────────────────────────────
        SlotRule::new(Label, "label_quoted", r#"(?i)\blabel(?:s|led)?\s*(?:=|:|is|with|as)?\s*"([^"]+)""#, plain_value),
        SlotRule::new(Label, "label_equals", r"(?i)\b(?:labell?ed|tagged|labels?)\s*(?:=|:|is|with|as)?\s*([\w\-]+)", plain_value),
        SlotRule::new(Label, "label_hashtag", r"(?:^|\s)#([A-Za-z][\w\-]*)", hashtag_label),
        // ── epic ─────────────────────────────────────────────────────────
        SlotRule::new(Epic, "epic_key", r#"(?i)\b(?:epic|parent)\s*(?:link\s*)?(?:=|:)?\s*"?([A-Za-z][A-Za-z0-9_]+-\d+)"?"#, epic_key),
        // ── version ──────────────────────────────────────────────────────
        SlotRule::new(Version, "version_number", r#"(?i)\b(?:fix\s*version|version|release)\s*(?:=|:|is)?\s*"?(v?\d+(?:\.\d+){0,3})"?"#, plain_value),
    ]
});

/// The rule table, in priority order.
pub fn rules() -> &'static [SlotRule] {
    &RULES
}

// =============================================================================
// EXTRACTOR
// =============================================================================

/// Rule-table driven slot extractor.
#[derive(Clone, Copy)]
pub struct SlotExtractor {
    rules: &'static [SlotRule],
}

impl Default for SlotExtractor {
    fn default() -> Self {
        Self { rules: rules() }
    }
}

impl SlotExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract slots from `query`.
    ///
    /// Only one primary value per kind is returned; other distinct
    /// candidates land in `alternatives`. Carried project/sprint context is
    /// used only when the query names none, at reduced confidence.
    pub fn extract(&self, query: &str, ctx: &ExtractionContext) -> ExtractedSlots {
        let mut found: BTreeMap<SlotKind, Vec<SlotValue>> = BTreeMap::new();

        for rule in self.rules {
            let candidates = rule.apply(query, ctx);
            if !candidates.is_empty() {
                trace!(
                    rule = rule.name,
                    slot = %rule.kind,
                    count = candidates.len(),
                    "Slot rule matched"
                );
                found.entry(rule.kind).or_default().extend(candidates);
            }
        }

        let mut slots = ExtractedSlots::default();
        for (kind, candidates) in found {
            let mut iter = candidates.into_iter();
            let Some(mut primary) = iter.next() else {
                continue;
            };
            for other in iter {
                let duplicate = other.value.eq_ignore_ascii_case(&primary.value)
                    || primary
                        .alternatives
                        .iter()
                        .any(|a| a.eq_ignore_ascii_case(&other.value));
                if !duplicate {
                    primary.alternatives.push(other.value);
                }
            }
            slots = slots.with_slot(kind, primary);
        }

        if slots.project.is_none() {
            if let Some(ref project) = ctx.current_project {
                slots = slots.with_slot(
                    SlotKind::Project,
                    SlotValue::new(project.clone(), project.clone(), CONTEXT_CONFIDENCE),
                );
            }
        }
        if slots.sprint.is_none() {
            if let Some(ref sprint) = ctx.current_sprint {
                slots = slots.with_slot(
                    SlotKind::Sprint,
                    SlotValue::new(sprint.clone(), sprint.clone(), CONTEXT_CONFIDENCE),
                );
            }
        }

        slots
    }
}

// =============================================================================
// RECORD KEYS
// =============================================================================

static RECORD_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z][A-Za-z0-9_]{1,9}-\d{1,7})\b").expect("record key pattern is valid")
});

/// Words allowed around a bare record key ("show me CCM-283").
const KEY_FILLERS: &[&str] = &[
    "about", "details", "detail", "for", "get", "info", "is", "issue", "me", "of", "on", "open",
    "please", "show", "status", "the", "ticket", "what", "whats", "what's", "s", "fetch", "look",
    "up", "at", "describe",
];

/// Detect a query that is just a record key, possibly wrapped in filler
/// ("CCM-283", "show me CCM-283"). Returns the upper-cased key.
pub fn detect_record_key(query: &str) -> Option<String> {
    let mut keys = RECORD_KEY.find_iter(query);
    let key = keys.next()?;
    if keys.next().is_some() {
        return None;
    }
    let rest = format!("{} {}", &query[..key.start()], &query[key.end()..]);
    let only_filler = rest
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .all(|w| KEY_FILLERS.contains(&w.to_lowercase().as_str()));
    only_filler.then(|| key.as_str().to_uppercase())
}
