//! Intent templates: corpus loading, trigger matching, and filter
//! composition.
//!
//! A template's filter is written in the tracker's filter language with
//! `${slot}` placeholders. Composition parses the WHERE part into clauses
//! joined by AND/OR (with parenthesized groups), substitutes slot values,
//! and drops every clause whose placeholder has no value. The result never
//! contains an unresolved placeholder, a dangling joiner, or an empty group.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::{Captures, NoExpand, Regex};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use trackq_core::defaults::TEMPLATE_MATCH_CUTOFF;
use trackq_core::{
    ComposedQuery, Error, ExtractedSlots, FallbackFilter, IntentTemplate, Result, SlotKind,
    SlotValue,
};

use crate::normalize::{coverage, matching_tokens, normalize, token_set_ratio};

const BUILTIN_CORPUS: &str = include_str!("../templates/default_templates.json");

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_]+)\}").expect("placeholder pattern is valid"));

static ORDER_BY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\border\s+by\b").expect("order-by pattern is valid"));

static OPTIONAL_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\[\]]*)\]").expect("optional segment pattern is valid"));

static BARE_OPERAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("bare operand pattern is valid"));

static RELATIVE_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d+[wdhmy]$").expect("relative date pattern is valid"));

static FUNCTION_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_]*\([^()]*\)$").expect("function call pattern is valid")
});

static ORDER_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[A-Za-z][A-Za-z0-9_]*(\s+(asc|desc))?$").expect("order item pattern is valid")
});

/// Words that must be quoted when used as values.
const RESERVED: &[&str] = &[
    "after", "and", "asc", "before", "by", "changed", "desc", "during", "empty", "from", "in",
    "is", "not", "null", "on", "or", "order", "to", "was",
];

// =============================================================================
// CORPUS
// =============================================================================

/// A validated set of intent templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateCorpus {
    /// Template used when no trigger matches but the query names concrete
    /// entities. Its filter should reference every slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_template: Option<String>,
    pub templates: Vec<IntentTemplate>,
}

impl TemplateCorpus {
    /// The corpus compiled into the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_CORPUS)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let corpus: Self = serde_json::from_str(content)?;
        corpus.validate()?;
        Ok(corpus)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read template corpus {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }

    /// Check ids, placeholders, parentheses, and the default template.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for t in &self.templates {
            if t.id.trim().is_empty() {
                return Err(Error::Config("template with empty id".to_string()));
            }
            if !ids.insert(t.id.as_str()) {
                return Err(Error::Config(format!("duplicate template id '{}'", t.id)));
            }
            let is_default = self.default_template.as_deref() == Some(t.id.as_str());
            if t.trigger_phrases.is_empty() && !is_default {
                return Err(Error::Config(format!(
                    "template '{}' has no trigger phrases",
                    t.id
                )));
            }
            check_placeholders(&t.id, &t.filter_template)?;
            check_placeholders(&t.id, &t.response_template)?;
            check_balanced(&t.id, &t.filter_template)?;
            for fallback in &t.fallbacks {
                check_placeholders(&t.id, &fallback.filter_template)?;
                check_balanced(&t.id, &fallback.filter_template)?;
            }
        }
        if let Some(ref id) = self.default_template {
            if self.get(id).is_none() {
                return Err(Error::Config(format!(
                    "default template '{}' is not in the corpus",
                    id
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&IntentTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    pub fn default_template(&self) -> Option<&IntentTemplate> {
        self.default_template.as_deref().and_then(|id| self.get(id))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

fn check_placeholders(id: &str, template: &str) -> Result<()> {
    for caps in PLACEHOLDER.captures_iter(template) {
        let name = &caps[1];
        if name.parse::<SlotKind>().is_err() {
            return Err(Error::Config(format!(
                "template '{}': unknown placeholder '${{{}}}'",
                id, name
            )));
        }
    }
    Ok(())
}

fn check_balanced(id: &str, template: &str) -> Result<()> {
    let mut depth = 0i32;
    let mut in_quote = false;
    for c in template.chars() {
        match c {
            '"' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth -= 1;
                if depth < 0 {
                    break;
                }
            }
            _ => {}
        }
    }
    if depth != 0 || in_quote {
        return Err(Error::Config(format!(
            "template '{}': unbalanced parentheses or quotes",
            id
        )));
    }
    Ok(())
}

/// Slot kinds a template references, in `SlotKind` order.
pub fn referenced_slots(template: &str) -> Vec<SlotKind> {
    PLACEHOLDER
        .captures_iter(template)
        .filter_map(|caps| caps[1].parse::<SlotKind>().ok())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

// =============================================================================
// MATCHING
// =============================================================================

/// Replace each slot's source text in `query` with its `{kind}` marker.
///
/// Longer spans are replaced first so "Ashwin Thyagarajan" is not split by
/// a shorter span.
pub fn mask_query(query: &str, slots: &ExtractedSlots) -> String {
    let mut spans: Vec<(SlotKind, &str)> = slots
        .iter()
        .map(|(kind, value)| (kind, value.raw_text.trim()))
        .filter(|(_, raw)| !raw.is_empty())
        .collect();
    spans.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    let mut masked = query.to_string();
    for (kind, raw) in spans {
        let word_start = raw.chars().next().is_some_and(char::is_alphanumeric);
        let word_end = raw.chars().last().is_some_and(char::is_alphanumeric);
        let pattern = format!(
            "(?i){}{}{}",
            if word_start { r"\b" } else { "" },
            regex::escape(raw),
            if word_end { r"\b" } else { "" },
        );
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        let marker = format!("{{{}}}", kind.as_str());
        masked = re.replace_all(&masked, NoExpand(&marker)).into_owned();
    }
    masked
}

/// A selected template and how it was selected.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMatch<'a> {
    pub template: &'a IntentTemplate,
    /// Trigger phrase that matched; `None` for the default template.
    pub trigger: Option<&'a str>,
    /// Similarity in `[0, 1]`; 1.0 for an exact trigger.
    pub score: f64,
}

impl TemplateMatch<'_> {
    pub fn is_default(&self) -> bool {
        self.trigger.is_none()
    }
}

struct PreparedTrigger {
    template: usize,
    phrase: usize,
    normalized: String,
    tokens: Vec<String>,
}

struct Candidate {
    trigger: usize,
    exact: bool,
    score: f64,
    specificity: f64,
    length: usize,
}

/// Selects the template for a query.
pub struct TemplateMatcher {
    corpus: TemplateCorpus,
    cutoff: f64,
    triggers: Vec<PreparedTrigger>,
    /// Slot kinds each template's filter references, by template index.
    references: Vec<Vec<SlotKind>>,
}

impl TemplateMatcher {
    pub fn new(corpus: TemplateCorpus) -> Self {
        Self::with_cutoff(corpus, TEMPLATE_MATCH_CUTOFF)
    }

    pub fn with_cutoff(corpus: TemplateCorpus, cutoff: f64) -> Self {
        let mut triggers = Vec::new();
        for (ti, template) in corpus.templates.iter().enumerate() {
            for (pi, phrase) in template.trigger_phrases.iter().enumerate() {
                triggers.push(PreparedTrigger {
                    template: ti,
                    phrase: pi,
                    normalized: normalize(phrase),
                    tokens: matching_tokens(phrase),
                });
            }
        }
        let references = corpus
            .templates
            .iter()
            .map(|t| referenced_slots(&t.filter_template))
            .collect();
        Self {
            corpus,
            cutoff,
            triggers,
            references,
        }
    }

    pub fn corpus(&self) -> &TemplateCorpus {
        &self.corpus
    }

    /// Pick the best template for `query`.
    ///
    /// Exact normalized trigger matches rank first, then token-set
    /// similarity at or above the cutoff, then the share of the query the
    /// trigger covers, then trigger length. A template whose filter ignores
    /// a concrete slot of the query is skipped. With no trigger match, the
    /// default template is used only when the query names a concrete slot.
    pub fn match_template(&self, query: &str, slots: &ExtractedSlots) -> Option<TemplateMatch<'_>> {
        let masked = mask_query(query, slots);
        let normalized = normalize(&masked);
        let tokens = matching_tokens(&masked);
        let concrete = slots.concrete_kinds();
        trace!(masked = %masked, "Masked query");

        let mut candidates: Vec<Candidate> = self
            .triggers
            .iter()
            .enumerate()
            .filter_map(|(i, t)| {
                let exact = t.normalized == normalized || (!tokens.is_empty() && t.tokens == tokens);
                let score = if exact {
                    1.0
                } else {
                    token_set_ratio(&tokens, &t.tokens)
                };
                (exact || score >= self.cutoff).then(|| Candidate {
                    trigger: i,
                    exact,
                    score,
                    specificity: coverage(&t.tokens, &tokens),
                    length: t.tokens.len(),
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.exact
                .cmp(&a.exact)
                .then(b.score.total_cmp(&a.score))
                .then(b.specificity.total_cmp(&a.specificity))
                .then(b.length.cmp(&a.length))
                .then(a.trigger.cmp(&b.trigger))
        });

        for candidate in candidates {
            let prepared = &self.triggers[candidate.trigger];
            let template = &self.corpus.templates[prepared.template];
            if !self.passes_gate(prepared.template, &concrete) {
                debug!(
                    template_id = %template.id,
                    "Template skipped: it ignores a concrete slot"
                );
                continue;
            }
            debug!(
                template_id = %template.id,
                score = candidate.score,
                exact = candidate.exact,
                "Template matched"
            );
            return Some(TemplateMatch {
                template,
                trigger: Some(template.trigger_phrases[prepared.phrase].as_str()),
                score: candidate.score,
            });
        }

        if concrete.is_empty() {
            return None;
        }
        let index = self
            .corpus
            .default_template
            .as_deref()
            .and_then(|id| self.corpus.templates.iter().position(|t| t.id == id))?;
        if !self.passes_gate(index, &concrete) {
            return None;
        }
        let template = &self.corpus.templates[index];
        debug!(template_id = %template.id, "Using default template");
        Some(TemplateMatch {
            template,
            trigger: None,
            score: 0.0,
        })
    }

    fn passes_gate(&self, template: usize, concrete: &[SlotKind]) -> bool {
        let references = &self.references[template];
        concrete.iter().all(|k| references.contains(k))
    }
}

// =============================================================================
// FILTER PARSING
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Joiner {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Clause(String),
    Group(Vec<Term>),
}

#[derive(Debug, Clone, PartialEq)]
struct Term {
    joiner: Option<Joiner>,
    negated: bool,
    expr: Expr,
}

/// Split on whitespace outside quotes and parentheses.
fn split_top_level(text: &str) -> Vec<String> {
    let mut atoms = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in text.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                quote = Some(c);
                current.push(c);
            }
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            c if c.is_whitespace() && depth <= 0 => {
                if !current.is_empty() {
                    atoms.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        atoms.push(current);
    }
    atoms
}

/// Whether the opening parenthesis at the start closes at the very end.
fn wraps_in_parens(atom: &str) -> bool {
    if !atom.starts_with('(') || !atom.ends_with(')') {
        return false;
    }
    let mut depth = 0i32;
    let mut in_quote = false;
    let last = atom.len() - 1;
    for (i, c) in atom.char_indices() {
        match c {
            '"' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth -= 1;
                if depth == 0 {
                    return i == last;
                }
            }
            _ => {}
        }
    }
    false
}

fn parse_terms(text: &str) -> Vec<Term> {
    let mut terms = Vec::new();
    let mut joiner = None;
    let mut negated = false;
    let mut parts: Vec<String> = Vec::new();

    let mut flush = |joiner: Option<Joiner>, negated: bool, parts: &mut Vec<String>| {
        if parts.is_empty() {
            return;
        }
        let expr = if parts.len() == 1 && wraps_in_parens(&parts[0]) {
            let inner = &parts[0][1..parts[0].len() - 1];
            Expr::Group(parse_terms(inner))
        } else {
            Expr::Clause(parts.join(" "))
        };
        terms.push(Term {
            joiner,
            negated,
            expr,
        });
        parts.clear();
    };

    for atom in split_top_level(text) {
        match atom.to_ascii_uppercase().as_str() {
            "AND" | "OR" => {
                let next = if atom.eq_ignore_ascii_case("or") {
                    Joiner::Or
                } else {
                    Joiner::And
                };
                flush(joiner, negated, &mut parts);
                joiner = Some(next);
                negated = false;
            }
            "NOT" if parts.is_empty() => negated = !negated,
            _ => parts.push(atom),
        }
    }
    flush(joiner, negated, &mut parts);
    terms
}

// =============================================================================
// RENDERING
// =============================================================================

/// Render a value as a filter operand, quoting unless it is a plain word,
/// a function call, `EMPTY`, or a relative date.
pub fn quote_operand(value: &str) -> String {
    let bare = value == "EMPTY"
        || FUNCTION_CALL.is_match(value)
        || RELATIVE_DATE.is_match(value)
        || (BARE_OPERAND.is_match(value) && !RESERVED.contains(&value.to_lowercase().as_str()));
    if bare {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

/// Filter-language rendering of a slot value. `status_category` and
/// `sprint` placeholders carry their own operator.
fn render_filter_value(kind: SlotKind, value: &SlotValue) -> Option<String> {
    let v = value.value.trim();
    match kind {
        SlotKind::StatusCategory => Some(match v.to_lowercase().as_str() {
            "open" => "!= Done".to_string(),
            "done" => "= Done".to_string(),
            _ => format!("= {}", quote_operand(v)),
        }),
        SlotKind::Sprint if FUNCTION_CALL.is_match(v) => Some(format!("in {}", v)),
        SlotKind::Sprint => Some(format!("= {}", quote_operand(v))),
        SlotKind::Order if ORDER_ITEM.is_match(v) => Some(v.to_string()),
        SlotKind::Order => None,
        _ => Some(quote_operand(v)),
    }
}

/// Substitute every placeholder in one clause, or `None` when any
/// placeholder has no value.
fn render_clause(
    clause: &str,
    slots: &ExtractedSlots,
    used: &mut BTreeSet<SlotKind>,
) -> Option<String> {
    let mut kinds = Vec::new();
    let mut missing = false;
    let rendered = PLACEHOLDER.replace_all(clause, |caps: &Captures<'_>| {
        let rendered = caps[1]
            .parse::<SlotKind>()
            .ok()
            .and_then(|kind| slots.get(kind).map(|value| (kind, value)))
            .and_then(|(kind, value)| render_filter_value(kind, value).map(|r| (kind, r)));
        match rendered {
            Some((kind, text)) => {
                kinds.push(kind);
                text
            }
            None => {
                missing = true;
                String::new()
            }
        }
    });
    if missing {
        return None;
    }
    let rendered = rendered.into_owned();
    used.extend(kinds);
    Some(rendered)
}

fn render_terms(
    terms: &[Term],
    slots: &ExtractedSlots,
    used: &mut BTreeSet<SlotKind>,
) -> Vec<(Option<Joiner>, String)> {
    let mut kept = Vec::new();
    for term in terms {
        let body = match &term.expr {
            Expr::Clause(clause) => render_clause(clause, slots, used),
            Expr::Group(inner) => {
                let rendered = render_terms(inner, slots, used);
                match rendered.len() {
                    0 => None,
                    1 => rendered.into_iter().next().map(|(_, body)| body),
                    _ => Some(format!("({})", join_terms(&rendered))),
                }
            }
        };
        if let Some(body) = body {
            let body = if term.negated {
                format!("NOT {}", body)
            } else {
                body
            };
            kept.push((term.joiner, body));
        }
    }
    kept
}

/// Join rendered terms. The first term's joiner is discarded.
fn join_terms(terms: &[(Option<Joiner>, String)]) -> String {
    let mut out = String::new();
    for (i, (joiner, body)) in terms.iter().enumerate() {
        if i > 0 {
            out.push_str(match joiner {
                Some(Joiner::Or) => " OR ",
                _ => " AND ",
            });
        }
        out.push_str(body);
    }
    out
}

fn render_order(
    order: &str,
    slots: &ExtractedSlots,
    used: &mut BTreeSet<SlotKind>,
) -> Vec<String> {
    let mut seen = HashSet::new();
    order
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| render_clause(item, slots, used))
        .filter(|item| {
            let field = item.split_whitespace().next().unwrap_or("").to_lowercase();
            !field.is_empty() && seen.insert(field)
        })
        .collect()
}

/// Compose one filter template against `slots`.
///
/// Returns `NoMatch` when every WHERE clause was dropped: an unconstrained
/// search is never issued in place of the user's request.
pub fn compose_filter(
    template: &str,
    slots: &ExtractedSlots,
    used: &mut BTreeSet<SlotKind>,
) -> Result<String> {
    let (where_part, order_part) = match ORDER_BY.find(template) {
        Some(m) => (&template[..m.start()], Some(&template[m.end()..])),
        None => (template, None),
    };

    let mut filter = join_terms(&render_terms(&parse_terms(where_part), slots, used));
    if filter.is_empty() {
        return Err(Error::NoMatch(
            "no filter clause could be composed from the request".to_string(),
        ));
    }

    if let Some(order) = order_part {
        let items = render_order(order, slots, used);
        if !items.is_empty() {
            filter.push_str(" ORDER BY ");
            filter.push_str(&items.join(", "));
        }
    }

    if filter.contains("${") {
        return Err(Error::Internal(format!(
            "unresolved placeholder in composed filter: {}",
            filter
        )));
    }
    Ok(filter)
}

fn prose_value(kind: SlotKind, value: &SlotValue) -> String {
    match kind {
        SlotKind::StatusCategory => value.label().to_lowercase(),
        _ => value.label().to_string(),
    }
}

/// Substitute placeholders in prose; `None` when any has no value.
fn render_prose(text: &str, slots: &ExtractedSlots) -> Option<String> {
    let mut missing = false;
    let rendered = PLACEHOLDER.replace_all(text, |caps: &Captures<'_>| {
        match caps[1]
            .parse::<SlotKind>()
            .ok()
            .and_then(|kind| slots.get(kind).map(|v| prose_value(kind, v)))
        {
            Some(text) => text,
            None => {
                missing = true;
                String::new()
            }
        }
    });
    let rendered = rendered.into_owned();
    (!missing).then_some(rendered)
}

/// Render a response template. `[ ... ]` segments whose placeholders lack
/// values are dropped; `{total}` and `{shown}` are left for the narrator.
pub fn render_response(template: &str, slots: &ExtractedSlots) -> String {
    let with_optionals = OPTIONAL_SEGMENT.replace_all(template, |caps: &Captures<'_>| {
        render_prose(&caps[1], slots).unwrap_or_default()
    });
    let text = PLACEHOLDER.replace_all(&with_optionals, |caps: &Captures<'_>| {
        caps[1]
            .parse::<SlotKind>()
            .ok()
            .and_then(|kind| slots.get(kind).map(|v| prose_value(kind, v)))
            .unwrap_or_default()
    });
    let collapsed = text.split(' ').filter(|w| !w.is_empty()).collect::<Vec<_>>().join(" ");
    collapsed
        .replace(" .", ".")
        .replace(" ,", ",")
        .replace(" ;", ";")
        .replace(" :", ":")
}

/// Compose `template` against `slots`: primary filter, response text, and
/// the applicable fallbacks (deduplicated against the primary and each
/// other).
pub fn compose(template: &IntentTemplate, slots: &ExtractedSlots) -> Result<ComposedQuery> {
    let mut used = BTreeSet::new();
    let filter = compose_filter(&template.filter_template, slots, &mut used)?;

    let mut fallbacks: Vec<FallbackFilter> = Vec::new();
    for fallback in &template.fallbacks {
        if !fallback.requires.iter().all(|k| slots.get(*k).is_some()) {
            continue;
        }
        if let Some(days) = fallback.window_days {
            let requested = slots.date_range.as_ref().and_then(|d| relative_days(&d.value));
            if requested.is_some_and(|r| r >= days) {
                debug!(
                    template_id = %template.id,
                    label = %fallback.label,
                    "Fallback window is not wider than the request, skipped"
                );
                continue;
            }
        }
        match compose_filter(&fallback.filter_template, slots, &mut BTreeSet::new()) {
            Ok(f) if f != filter && !fallbacks.iter().any(|x| x.filter == f) => {
                fallbacks.push(FallbackFilter {
                    label: fallback.label.clone(),
                    filter: f,
                });
            }
            Ok(_) => {}
            Err(e) => debug!(
                template_id = %template.id,
                label = %fallback.label,
                error = %e,
                "Fallback skipped"
            ),
        }
    }

    Ok(ComposedQuery {
        template_id: template.id.clone(),
        intent: template.intent,
        filter_expression: filter,
        response_template: render_response(&template.response_template, slots),
        slots_used: used.into_iter().collect(),
        fallbacks,
        limit: slots.limit(),
    })
}

/// Span in whole days of a relative date such as `-7d` or `-2w`. Calendar
/// functions (`startOfMonth()`) have no fixed span.
fn relative_days(value: &str) -> Option<u32> {
    let v = value.trim().trim_start_matches('-');
    let unit = v.chars().last()?;
    let n: u32 = v[..v.len() - unit.len_utf8()].parse().ok()?;
    match unit {
        'd' => Some(n),
        'w' => Some(n * 7),
        'm' => Some(n / (24 * 60)),
        'h' => Some(n / 24),
        'y' => Some(n * 365),
        _ => None,
    }
}
