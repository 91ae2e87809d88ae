//! Data model shared by extraction, execution, and aggregation.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};

// =============================================================================
// SLOTS
// =============================================================================

/// The kinds of information the extractor recognizes in free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Project,
    Assignee,
    Issuetype,
    Status,
    StatusCategory,
    Priority,
    Sprint,
    DateRange,
    FreeText,
    Quantity,
    Order,
    Component,
    Label,
    Epic,
    Version,
}

impl SlotKind {
    /// Every slot kind, in extraction order.
    pub const ALL: [SlotKind; 15] = [
        Self::Project,
        Self::Assignee,
        Self::Issuetype,
        Self::Status,
        Self::StatusCategory,
        Self::Priority,
        Self::Sprint,
        Self::DateRange,
        Self::FreeText,
        Self::Quantity,
        Self::Order,
        Self::Component,
        Self::Label,
        Self::Epic,
        Self::Version,
    ];

    /// Placeholder name used in templates (`${project}`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Assignee => "assignee",
            Self::Issuetype => "issuetype",
            Self::Status => "status",
            Self::StatusCategory => "status_category",
            Self::Priority => "priority",
            Self::Sprint => "sprint",
            Self::DateRange => "date_range",
            Self::FreeText => "free_text",
            Self::Quantity => "quantity",
            Self::Order => "order",
            Self::Component => "component",
            Self::Label => "label",
            Self::Epic => "epic",
            Self::Version => "version",
        }
    }

    /// Slots that narrow the result set to a specific entity. A template
    /// that ignores one of these would silently widen the user's request.
    pub fn is_concrete(&self) -> bool {
        matches!(self, Self::Assignee | Self::Project | Self::Issuetype)
    }
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown slot '{}'", s)))
    }
}

/// One recognized entity with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotValue {
    /// Canonical value substituted into filters.
    pub value: String,
    /// Extraction confidence in `[0, 1]`.
    pub confidence: f32,
    /// Other candidates seen for the same slot, in rule priority order.
    #[serde(default)]
    pub alternatives: Vec<String>,
    /// Text span the value came from.
    pub raw_text: String,
    /// Human label for prose when `value` is an internal identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl SlotValue {
    pub fn new(value: impl Into<String>, raw_text: impl Into<String>, confidence: f32) -> Self {
        Self {
            value: value.into(),
            confidence: confidence.clamp(0.0, 1.0),
            alternatives: Vec::new(),
            raw_text: raw_text.into(),
            display: None,
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    /// Label to show users: the display name if set, otherwise the value.
    pub fn label(&self) -> &str {
        self.display.as_deref().unwrap_or(&self.value)
    }
}

/// Fixed-shape record of extracted slots, one optional value per kind.
///
/// Built through `with_slot`, which refuses values with empty `raw_text`,
/// so every carried slot can be traced back to the text it came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedSlots {
    pub project: Option<SlotValue>,
    pub assignee: Option<SlotValue>,
    pub issuetype: Option<SlotValue>,
    pub status: Option<SlotValue>,
    pub status_category: Option<SlotValue>,
    pub priority: Option<SlotValue>,
    pub sprint: Option<SlotValue>,
    pub date_range: Option<SlotValue>,
    pub free_text: Option<SlotValue>,
    pub quantity: Option<SlotValue>,
    pub order: Option<SlotValue>,
    pub component: Option<SlotValue>,
    pub label: Option<SlotValue>,
    pub epic: Option<SlotValue>,
    pub version: Option<SlotValue>,
}

impl ExtractedSlots {
    pub fn get(&self, kind: SlotKind) -> Option<&SlotValue> {
        match kind {
            SlotKind::Project => self.project.as_ref(),
            SlotKind::Assignee => self.assignee.as_ref(),
            SlotKind::Issuetype => self.issuetype.as_ref(),
            SlotKind::Status => self.status.as_ref(),
            SlotKind::StatusCategory => self.status_category.as_ref(),
            SlotKind::Priority => self.priority.as_ref(),
            SlotKind::Sprint => self.sprint.as_ref(),
            SlotKind::DateRange => self.date_range.as_ref(),
            SlotKind::FreeText => self.free_text.as_ref(),
            SlotKind::Quantity => self.quantity.as_ref(),
            SlotKind::Order => self.order.as_ref(),
            SlotKind::Component => self.component.as_ref(),
            SlotKind::Label => self.label.as_ref(),
            SlotKind::Epic => self.epic.as_ref(),
            SlotKind::Version => self.version.as_ref(),
        }
    }

    fn slot_mut(&mut self, kind: SlotKind) -> &mut Option<SlotValue> {
        match kind {
            SlotKind::Project => &mut self.project,
            SlotKind::Assignee => &mut self.assignee,
            SlotKind::Issuetype => &mut self.issuetype,
            SlotKind::Status => &mut self.status,
            SlotKind::StatusCategory => &mut self.status_category,
            SlotKind::Priority => &mut self.priority,
            SlotKind::Sprint => &mut self.sprint,
            SlotKind::DateRange => &mut self.date_range,
            SlotKind::FreeText => &mut self.free_text,
            SlotKind::Quantity => &mut self.quantity,
            SlotKind::Order => &mut self.order,
            SlotKind::Component => &mut self.component,
            SlotKind::Label => &mut self.label,
            SlotKind::Epic => &mut self.epic,
            SlotKind::Version => &mut self.version,
        }
    }

    /// Return a copy with `kind` set to `value`.
    ///
    /// A value whose `raw_text` is blank is ignored and the slot keeps its
    /// previous content.
    pub fn with_slot(mut self, kind: SlotKind, value: SlotValue) -> Self {
        if !value.raw_text.trim().is_empty() {
            *self.slot_mut(kind) = Some(value);
        }
        self
    }

    /// Return a copy with `kind` cleared.
    pub fn without(mut self, kind: SlotKind) -> Self {
        *self.slot_mut(kind) = None;
        self
    }

    /// Present slots in `SlotKind::ALL` order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotKind, &SlotValue)> {
        SlotKind::ALL
            .iter()
            .filter_map(move |k| self.get(*k).map(|v| (*k, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Concrete slots (assignee/project/issuetype) present in the query.
    pub fn concrete_kinds(&self) -> Vec<SlotKind> {
        self.iter()
            .map(|(k, _)| k)
            .filter(SlotKind::is_concrete)
            .collect()
    }

    /// Requested number of records ("top 5"), if any.
    pub fn limit(&self) -> Option<usize> {
        self.quantity.as_ref().and_then(|q| q.value.parse().ok())
    }
}

// =============================================================================
// NAME RESOLUTION
// =============================================================================

/// Resolution tier that produced a `NameMatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Exact,
    Partial,
    Fuzzy,
    Alias,
}

/// One candidate resolution of a mention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameMatch {
    pub original_name: String,
    pub matched_name: String,
    /// Score in `[0, 100]`.
    pub score: f64,
    pub external_id: Option<String>,
    pub tier: MatchTier,
}

// =============================================================================
// TEMPLATES
// =============================================================================

/// What the user wants back from a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    /// Only the cardinality matters.
    Count,
    /// List matching records.
    #[default]
    List,
    /// List and summarize (breakdowns, risk flags).
    Analysis,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::List => "list",
            Self::Analysis => "analysis",
        }
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relaxed filter tried when the primary one returns nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackTemplate {
    /// Short description shown to users ("widened to the last 30 days").
    pub label: String,
    pub filter_template: String,
    /// Slots that must be present for this fallback to apply. A widened
    /// time window only relaxes a query that had a time window.
    #[serde(default)]
    pub requires: Vec<SlotKind>,
    /// Days covered by a widened time window. The fallback is skipped when
    /// the requested window already spans at least this many days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_days: Option<u32>,
}

/// A reusable mapping from phrasing to parametrized filter syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentTemplate {
    pub id: String,
    #[serde(default)]
    pub intent: IntentKind,
    pub trigger_phrases: Vec<String>,
    pub filter_template: String,
    pub response_template: String,
    /// Fallbacks in priority order.
    #[serde(default)]
    pub fallbacks: Vec<FallbackTemplate>,
}

/// A composed fallback filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackFilter {
    pub label: String,
    pub filter: String,
}

/// Output of composition, ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposedQuery {
    pub template_id: String,
    pub intent: IntentKind,
    pub filter_expression: String,
    pub response_template: String,
    pub slots_used: Vec<SlotKind>,
    pub fallbacks: Vec<FallbackFilter>,
    /// Requested record count ("top 5"), applied as a fetch cap.
    pub limit: Option<usize>,
}

// =============================================================================
// TRACKER RECORDS & DIRECTORY
// =============================================================================

/// A person as seen by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub account_id: String,
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// A project as seen by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub id: String,
    pub key: String,
    pub name: String,
}

/// Field metadata, used to discover custom fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub custom: bool,
    /// Schema type ("number", "array", ...).
    #[serde(default)]
    pub schema_type: Option<String>,
}

/// Assignee reference on a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRef {
    pub account_id: Option<String>,
    pub display_name: String,
}

/// Project reference on a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub key: String,
    pub name: String,
}

/// One tracker record (issue), flattened to the fields trackq uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub summary: String,
    pub status: String,
    /// Status category name ("To Do", "In Progress", "Done").
    pub status_category: Option<String>,
    pub assignee: Option<PersonRef>,
    pub project: Option<ProjectRef>,
    pub issuetype: Option<String>,
    pub priority: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub story_points: Option<f64>,
    pub sprint: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub components: Vec<String>,
}

impl Record {
    /// Whether the record's status category is anything but Done.
    pub fn is_open(&self) -> bool {
        !self
            .status_category
            .as_deref()
            .unwrap_or(&self.status)
            .eq_ignore_ascii_case("done")
    }
}

// =============================================================================
// SEARCH
// =============================================================================

/// Tracker search endpoints, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchEndpoint {
    /// Token-paginated enhanced search.
    Modern,
    /// Offset-paginated search, same capability.
    Legacy,
    /// Oldest stable API version.
    Oldest,
}

impl SearchEndpoint {
    /// Default ladder, tried in order until one succeeds.
    pub const LADDER: [SearchEndpoint; 3] = [Self::Modern, Self::Legacy, Self::Oldest];

    pub fn path(&self) -> &'static str {
        match self {
            Self::Modern => "/rest/api/3/search/jql",
            Self::Legacy => "/rest/api/3/search",
            Self::Oldest => "/rest/api/2/search",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Modern => "modern",
            Self::Legacy => "legacy",
            Self::Oldest => "oldest",
        }
    }
}

impl fmt::Display for SearchEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "modern" => Ok(Self::Modern),
            "legacy" => Ok(Self::Legacy),
            "oldest" => Ok(Self::Oldest),
            _ => Err(Error::InvalidInput(format!("unknown endpoint '{}'", s))),
        }
    }
}

/// One page request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchRequest {
    pub filter: String,
    /// Offset for offset-paginated endpoints.
    pub start_at: u32,
    pub max_results: u32,
    /// Extra fields to project beyond the standard set.
    pub extra_fields: Vec<String>,
    /// Continuation token for token-paginated endpoints.
    pub next_page_token: Option<String>,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchPage {
    pub records: Vec<Record>,
    /// Declared total, when the endpoint reports one.
    pub total: Option<u64>,
    pub next_page_token: Option<String>,
    /// Explicit last-page marker, when the endpoint reports one.
    pub is_last: Option<bool>,
    /// Non-fatal error messages the tracker attached to the page.
    pub warnings: Vec<String>,
}

/// Outcome of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub records: Vec<Record>,
    pub total_count: u64,
    pub filter_used: String,
    pub execution_time_ms: u64,
    #[serde(default)]
    pub errors: Vec<String>,
    pub endpoint: SearchEndpoint,
    /// Pagination stopped at the record cap before reaching `total_count`.
    #[serde(default)]
    pub truncated: bool,
    /// Upstream calls made, retries included.
    pub attempts: u32,
}

impl QueryResult {
    /// Whether the result holds any data, for count and list intents alike.
    pub fn is_empty(&self) -> bool {
        self.total_count == 0 && self.records.is_empty()
    }
}

// =============================================================================
// VALIDATION & AGGREGATION
// =============================================================================

/// An entity a filter was resolved against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEntity {
    /// Tracker id (account id), when known.
    pub id: Option<String>,
    pub name: String,
}

/// Entities the executed filter was built from, used to re-check records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedFilter {
    pub assignee: Option<ResolvedEntity>,
    pub project: Option<String>,
    pub issuetype: Option<String>,
}

impl ResolvedFilter {
    pub fn is_empty(&self) -> bool {
        self.assignee.is_none() && self.project.is_none() && self.issuetype.is_none()
    }
}

/// Heuristic risk indicators attached to a summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskFlag {
    /// Open item not updated for `days`.
    Stale { key: String, days: i64 },
    /// One assignee holds an outsized share of the items.
    Concentration { assignee: String, share: f64 },
    /// Items in a blocked status.
    Blocked { count: usize },
    /// Open items with nobody assigned.
    Unassigned { count: usize },
}

/// A record trimmed for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub key: String,
    pub summary: String,
    pub status: String,
    pub assignee: Option<String>,
    pub updated: Option<DateTime<Utc>>,
}

impl From<&Record> for SampleRecord {
    fn from(r: &Record) -> Self {
        Self {
            key: r.key.clone(),
            summary: r.summary.clone(),
            status: r.status.clone(),
            assignee: r.assignee.as_ref().map(|a| a.display_name.clone()),
            updated: r.updated,
        }
    }
}

/// Validation diagnostics carried into a summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationNote {
    /// Records dropped because they did not match the resolved filter.
    pub dropped: usize,
    /// Validation removed everything, so the raw records were used.
    pub used_raw_records: bool,
    pub warnings: Vec<String>,
}

/// Derived rendering view over a result set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSummary {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_assignee: BTreeMap<String, usize>,
    pub by_project: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    /// Sum of story points over records that carry them.
    pub total_points: Option<f64>,
    pub risk_flags: Vec<RiskFlag>,
    pub sample_records: Vec<SampleRecord>,
    pub validation: ValidationNote,
}

// =============================================================================
// PROCESS OUTPUT
// =============================================================================

/// Disclosure that a fallback filter produced the data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackDisclosure {
    /// Filter composed from the literal request.
    pub requested_filter: String,
    /// Filter that actually produced the data.
    pub used_filter: String,
    pub label: String,
}

/// Serializable summary handed to rendering/export layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredSummary {
    pub intent: IntentKind,
    pub total_count: u64,
    pub summary: Option<AggregatedSummary>,
    pub endpoint: SearchEndpoint,
    pub truncated: bool,
}

/// Answer to one natural-language query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub filter_used: Option<String>,
    pub response_text: String,
    pub structured_summary: Option<StructuredSummary>,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    /// Candidate labels when the request was ambiguous.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackDisclosure>,
}

impl ProcessResponse {
    /// A failed response with plain user-facing text.
    pub fn failure(kind: ErrorKind, text: impl Into<String>) -> Self {
        Self {
            filter_used: None,
            response_text: text.into(),
            structured_summary: None,
            success: false,
            error_kind: Some(kind),
            candidates: Vec::new(),
            fallback: None,
        }
    }
}

// =============================================================================
// CONVERSATION CONTEXT
// =============================================================================

/// Values carried between turns of one user's session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub current_project: Option<String>,
    pub current_sprint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_slot_refuses_blank_raw_text() {
        let slots = ExtractedSlots::default()
            .with_slot(SlotKind::Project, SlotValue::new("CCM", "", 1.0))
            .with_slot(SlotKind::Issuetype, SlotValue::new("Story", "   ", 1.0));
        assert!(slots.is_empty());
    }

    #[test]
    fn test_iter_follows_kind_order() {
        let slots = ExtractedSlots::default()
            .with_slot(SlotKind::Issuetype, SlotValue::new("Bug", "bugs", 0.9))
            .with_slot(SlotKind::Project, SlotValue::new("CCM", "CCM", 0.9));
        let kinds: Vec<_> = slots.iter().map(|(k, _)| k).collect();
        assert_eq!(kinds, vec![SlotKind::Project, SlotKind::Issuetype]);
        assert_eq!(
            slots.concrete_kinds(),
            vec![SlotKind::Project, SlotKind::Issuetype]
        );
    }

    #[test]
    fn test_without_clears_slot() {
        let slots = ExtractedSlots::default()
            .with_slot(SlotKind::Status, SlotValue::new("Blocked", "blocked", 0.8))
            .without(SlotKind::Status);
        assert!(slots.status.is_none());
    }

    #[test]
    fn test_slot_value_confidence_is_clamped() {
        assert_eq!(SlotValue::new("x", "x", 1.7).confidence, 1.0);
        assert_eq!(SlotValue::new("x", "x", -0.2).confidence, 0.0);
    }

    #[test]
    fn test_slot_value_label_prefers_display() {
        let v = SlotValue::new("5b10ac8d82e05b22cc7d4ef5", "Ashwin", 1.0)
            .with_display("Ashwin Thyagarajan");
        assert_eq!(v.label(), "Ashwin Thyagarajan");
        assert_eq!(SlotValue::new("CCM", "ccm", 1.0).label(), "CCM");
    }

    #[test]
    fn test_slot_kind_round_trips_through_str() {
        for kind in SlotKind::ALL {
            assert_eq!(kind.as_str().parse::<SlotKind>().unwrap(), kind);
        }
        assert!("nonsense".parse::<SlotKind>().is_err());
    }

    #[test]
    fn test_limit_parses_quantity() {
        let slots = ExtractedSlots::default()
            .with_slot(SlotKind::Quantity, SlotValue::new("5", "top 5", 0.9));
        assert_eq!(slots.limit(), Some(5));
    }

    #[test]
    fn test_record_is_open_uses_category_then_status() {
        let mut r = Record {
            key: "CCM-1".into(),
            summary: "s".into(),
            status: "Closed".into(),
            status_category: Some("Done".into()),
            assignee: None,
            project: None,
            issuetype: None,
            priority: None,
            created: None,
            updated: None,
            story_points: None,
            sprint: None,
            labels: vec![],
            components: vec![],
        };
        assert!(!r.is_open());
        r.status_category = Some("In Progress".into());
        assert!(r.is_open());
        r.status_category = None;
        r.status = "Done".into();
        assert!(!r.is_open());
    }

    #[test]
    fn test_endpoint_ladder_order() {
        assert_eq!(
            SearchEndpoint::LADDER,
            [
                SearchEndpoint::Modern,
                SearchEndpoint::Legacy,
                SearchEndpoint::Oldest
            ]
        );
        assert_eq!(SearchEndpoint::Oldest.path(), "/rest/api/2/search");
        assert_eq!("Legacy".parse::<SearchEndpoint>().unwrap(), SearchEndpoint::Legacy);
    }

    #[test]
    fn test_summary_serializes_without_loss() {
        let mut summary = AggregatedSummary {
            total: 2,
            ..Default::default()
        };
        summary.by_status.insert("To Do".into(), 2);
        summary.risk_flags.push(RiskFlag::Blocked { count: 1 });
        let json = serde_json::to_string(&summary).unwrap();
        let back: AggregatedSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, summary);
        assert!(json.contains("\"kind\":\"blocked\""));
    }
}
