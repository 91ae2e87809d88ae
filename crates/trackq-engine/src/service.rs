//! End-to-end handling of one natural-language query.
//!
//! ## Flow
//!
//! 1. A query that is only a record key is fetched directly.
//! 2. The directory snapshot supplies project keys, users, and projects.
//! 3. Slots are extracted, then assignee and project mentions are resolved.
//!    An ambiguous mention stops here and nothing is executed.
//! 4. A template is matched and composed into a filter plus fallbacks.
//! 5. The engine executes it; cancellation is honoured once it returns.
//! 6. Records are validated, aggregated, and narrated.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use trackq_client::{Directory, DirectorySnapshot};
use trackq_core::config::{AggregationSettings, TrackqConfig};
use trackq_core::logging::{component, subsystem};
use trackq_core::{
    ComposedQuery, ConversationContext, Error, ErrorKind, ExtractedSlots, FallbackDisclosure,
    IntentKind, ProcessResponse, Record, ResolvedEntity, ResolvedFilter, SearchEndpoint,
    SlotKind, SlotValue, StructuredSummary, TextGenerator, TrackerApi,
};
use trackq_nlu::slots::{CURRENT_USER, NOBODY};
use trackq_nlu::{
    compose, detect_record_key, ExtractionContext, Resolution, Resolver, SlotExtractor,
    TemplateCorpus, TemplateMatcher,
};

use crate::aggregate::{aggregate, AggregateOptions};
use crate::execution::{ExecutionEngine, ExecutionOutcome};
use crate::narrator::{NarrationInput, Narrator};
use crate::retry::RetryPolicy;
use crate::validate::validate;

pub const NOT_UNDERSTOOD: &str = "I couldn't understand that, try rephrasing.";
const REJECTED: &str = "The tracker rejected that query.";
const UNAVAILABLE: &str = "The tracker isn't responding right now, try again shortly.";
const CANCELLED: &str = "Request cancelled.";
const INTERNAL: &str = "Something went wrong while answering that.";

/// Outcome of resolving one mention.
enum Resolved {
    Slots(ExtractedSlots),
    Stop(ProcessResponse),
}

/// Answers natural-language questions against the tracker.
pub struct QueryService {
    tracker: Arc<dyn TrackerApi>,
    directory: Arc<Directory>,
    extractor: SlotExtractor,
    resolver: Resolver,
    matcher: TemplateMatcher,
    engine: ExecutionEngine,
    narrator: Narrator,
    aggregation: AggregationSettings,
}

impl QueryService {
    pub fn new(tracker: Arc<dyn TrackerApi>, config: &TrackqConfig, corpus: TemplateCorpus) -> Self {
        let directory = Arc::new(Directory::new(Arc::clone(&tracker), &config.directory));
        info!(
            subsystem = subsystem::ENGINE,
            component = component::SERVICE,
            templates = corpus.len(),
            endpoints = config.tracker.endpoints.len(),
            "Query service initialized"
        );
        Self {
            engine: ExecutionEngine::new(
                Arc::clone(&tracker),
                config.tracker.endpoints.clone(),
                config.execution.clone(),
            ),
            tracker,
            directory,
            extractor: SlotExtractor::new(),
            resolver: Resolver::from_settings(&config.resolver),
            matcher: TemplateMatcher::new(corpus),
            narrator: Narrator::new(),
            aggregation: config.aggregation.clone(),
        }
    }

    /// Polish narration with a text generator.
    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.narrator = self.narrator.with_generator(generator);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.engine = self.engine.with_retry_policy(policy);
        self
    }

    pub fn matcher(&self) -> &TemplateMatcher {
        &self.matcher
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Answer `query`, updating `context` for the next turn.
    ///
    /// Never fails: every error becomes a `ProcessResponse` with
    /// `success == false` and user-safe text.
    #[instrument(
        skip(self, context, cancel),
        fields(subsystem = subsystem::ENGINE, component = component::SERVICE, op = "process")
    )]
    pub async fn process(
        &self,
        query: &str,
        context: &mut ConversationContext,
        cancel: &CancellationToken,
    ) -> ProcessResponse {
        let start = Instant::now();
        let query = query.trim();
        if query.is_empty() {
            return ProcessResponse::failure(ErrorKind::NoMatch, NOT_UNDERSTOOD);
        }

        let response = match detect_record_key(query) {
            Some(key) => self.fetch_record(&key, context).await,
            None => self.answer(query, context, cancel).await,
        };

        info!(
            success = response.success,
            error_kind = response.error_kind.map(|k| k.as_str()),
            filter = response.filter_used.as_deref(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Query processed"
        );
        response
    }

    async fn fetch_record(&self, key: &str, context: &mut ConversationContext) -> ProcessResponse {
        let filter = format!("key = {}", key);
        debug!(key, "Record key shortcut");
        match self.tracker.get_record(key).await {
            Ok(Some(record)) => {
                if let Some(project) = &record.project {
                    context.current_project = Some(project.key.clone());
                }
                let summary = aggregate(
                    std::slice::from_ref(&record),
                    &ResolvedFilter::default(),
                    &AggregateOptions::from_settings(&self.aggregation, Utc::now()),
                );
                ProcessResponse {
                    filter_used: Some(filter),
                    response_text: describe_record(&record),
                    structured_summary: Some(StructuredSummary {
                        intent: IntentKind::List,
                        total_count: 1,
                        summary: Some(summary),
                        endpoint: SearchEndpoint::Modern,
                        truncated: false,
                    }),
                    success: true,
                    error_kind: None,
                    candidates: Vec::new(),
                    fallback: None,
                }
            }
            Ok(None) => ProcessResponse {
                filter_used: Some(filter),
                ..ProcessResponse::failure(ErrorKind::NoMatch, format!("I couldn't find {}.", key))
            },
            Err(e) => failure_for(&e, Some(filter)),
        }
    }

    async fn answer(
        &self,
        query: &str,
        context: &mut ConversationContext,
        cancel: &CancellationToken,
    ) -> ProcessResponse {
        let snapshot = match self.directory.snapshot().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Directory unavailable, continuing without it");
                Arc::new(DirectorySnapshot::default())
            }
        };

        let extraction = ExtractionContext::new()
            .with_project_keys(snapshot.project_keys())
            .with_conversation(context);
        let slots = self.extractor.extract(query, &extraction);
        debug!(slots = ?slots.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(), "Slots extracted");

        let slots = match self.resolve_assignee(slots, &snapshot) {
            Resolved::Slots(s) => s,
            Resolved::Stop(response) => return response,
        };
        let slots = match self.resolve_project(slots, &snapshot) {
            Resolved::Slots(s) => s,
            Resolved::Stop(response) => return response,
        };

        let Some(matched) = self.matcher.match_template(query, &slots) else {
            debug!("No template matched");
            return ProcessResponse::failure(ErrorKind::NoMatch, NOT_UNDERSTOOD);
        };
        let composed = match compose(matched.template, &slots) {
            Ok(c) => c,
            Err(e) => {
                debug!(template_id = %matched.template.id, error = %e, "Composition failed");
                return ProcessResponse::failure(ErrorKind::NoMatch, NOT_UNDERSTOOD);
            }
        };
        debug!(
            template_id = %composed.template_id,
            intent = %composed.intent,
            filter = %composed.filter_expression,
            fallbacks = composed.fallbacks.len(),
            "Query composed"
        );

        let outcome = match self.engine.execute_composed(&composed).await {
            Ok(o) => o,
            Err(e) => return failure_for(&e, Some(composed.filter_expression.clone())),
        };

        if cancel.is_cancelled() {
            debug!(filter = %outcome.result.filter_used, "Cancelled after execution");
            return failure_for(&Error::Cancelled, Some(outcome.result.filter_used.clone()));
        }

        let response = self.respond(&composed, &slots, outcome).await;
        if response.success {
            remember(context, &slots);
        }
        response
    }

    async fn respond(
        &self,
        composed: &ComposedQuery,
        slots: &ExtractedSlots,
        mut outcome: ExecutionOutcome,
    ) -> ProcessResponse {
        let mut error_kind = None;
        let summary = if composed.intent == IntentKind::Count {
            None
        } else {
            let filter = resolved_filter(slots, &outcome.result.filter_used);
            let report = validate(std::mem::take(&mut outcome.result.records), &filter);
            if report.mismatch {
                warn!(
                    filter = %outcome.result.filter_used,
                    entity = filter.assignee.as_ref().map(|a| a.name.as_str()),
                    "Returned records do not match the filter"
                );
                error_kind = Some(ErrorKind::ValidationMismatch);
            }
            outcome.result.records = report.records;
            let mut summary = aggregate(
                &outcome.result.records,
                &filter,
                &AggregateOptions::from_settings(&self.aggregation, Utc::now()),
            );
            summary.validation = report.note;
            Some(summary)
        };

        let labels = id_labels(slots);
        let response_text = self
            .narrator
            .narrate(NarrationInput {
                composed,
                outcome: &outcome,
                summary: summary.as_ref(),
                labels: &labels,
            })
            .await;

        let result = &outcome.result;
        let empty = composed.intent != IntentKind::Count && result.is_empty();
        if empty {
            error_kind = Some(ErrorKind::NoMatch);
        }

        ProcessResponse {
            filter_used: Some(result.filter_used.clone()),
            response_text,
            structured_summary: Some(StructuredSummary {
                intent: composed.intent,
                total_count: result.total_count,
                summary,
                endpoint: result.endpoint,
                truncated: result.truncated,
            }),
            success: !empty,
            error_kind,
            candidates: Vec::new(),
            fallback: outcome.fallback.as_ref().map(|fb| FallbackDisclosure {
                requested_filter: outcome.requested_filter.clone(),
                used_filter: fb.filter.clone(),
                label: fb.label.clone(),
            }),
        }
    }

    fn resolve_assignee(&self, slots: ExtractedSlots, snapshot: &DirectorySnapshot) -> Resolved {
        let Some(mention) = slots.assignee.clone() else {
            return Resolved::Slots(slots);
        };
        if mention.value == CURRENT_USER || mention.value == NOBODY {
            return Resolved::Slots(slots);
        }
        if snapshot.users.is_empty() {
            return Resolved::Slots(slots);
        }
        if snapshot.user_by_id(&mention.value).is_some() {
            return Resolved::Slots(slots);
        }

        let matches = self.resolver.resolve(&mention.value, &snapshot.users);
        match Resolution::classify(matches) {
            Resolution::Unique(m) => {
                debug!(mention = %mention.value, entity = %m.matched_name, tier = ?m.tier, "Assignee resolved");
                let Some(account_id) = m.external_id else {
                    return Resolved::Slots(slots);
                };
                let value = SlotValue {
                    value: account_id,
                    display: Some(m.matched_name),
                    ..mention
                };
                Resolved::Slots(slots.with_slot(SlotKind::Assignee, value))
            }
            Resolution::Ambiguous(candidates) => {
                Resolved::Stop(ambiguous(&mention.value, candidates.into_iter().map(|m| m.matched_name)))
            }
            Resolution::NotFound => {
                debug!(mention = %mention.value, "Assignee not found");
                Resolved::Stop(ProcessResponse::failure(
                    ErrorKind::NoMatch,
                    format!("I couldn't find anyone called {}.", mention.value),
                ))
            }
        }
    }

    fn resolve_project(&self, slots: ExtractedSlots, snapshot: &DirectorySnapshot) -> Resolved {
        let Some(mention) = slots.project.clone() else {
            return Resolved::Slots(slots);
        };
        if snapshot.projects.is_empty() {
            return Resolved::Slots(slots);
        }
        if let Some(project) = snapshot.project_by_key(&mention.value) {
            let value = SlotValue {
                value: project.key.clone(),
                ..mention
            };
            return Resolved::Slots(slots.with_slot(SlotKind::Project, value));
        }

        let matches = self.resolver.resolve(&mention.raw_text, &snapshot.projects);
        match Resolution::classify(matches) {
            Resolution::Unique(m) => {
                debug!(mention = %mention.raw_text, entity = %m.matched_name, "Project resolved");
                let Some(key) = m.external_id else {
                    return Resolved::Slots(slots);
                };
                let value = SlotValue {
                    value: key,
                    ..mention
                };
                Resolved::Slots(slots.with_slot(SlotKind::Project, value))
            }
            Resolution::Ambiguous(candidates) => Resolved::Stop(ambiguous(
                &mention.raw_text,
                candidates.into_iter().map(|m| m.matched_name),
            )),
            Resolution::NotFound => {
                debug!(mention = %mention.raw_text, "Project not found");
                Resolved::Stop(ProcessResponse::failure(
                    ErrorKind::NoMatch,
                    format!("I couldn't find a project called {}.", mention.raw_text),
                ))
            }
        }
    }
}

fn ambiguous(mention: &str, names: impl Iterator<Item = String>) -> ProcessResponse {
    let candidates: Vec<String> = names.collect();
    warn!(mention, candidates = candidates.len(), "Ambiguous mention, nothing executed");
    ProcessResponse {
        candidates: candidates.clone(),
        ..ProcessResponse::failure(
            ErrorKind::AmbiguousEntity,
            format!(
                "\"{}\" could mean {}. Which one did you mean?",
                mention,
                candidates.join(" or ")
            ),
        )
    }
}

/// Resolved account ids paired with the names they were resolved from.
fn id_labels(slots: &ExtractedSlots) -> Vec<(String, String)> {
    slots
        .assignee
        .iter()
        .filter(|a| a.value != CURRENT_USER && a.value != NOBODY)
        .filter_map(|a| {
            a.display
                .as_ref()
                .filter(|d| **d != a.value)
                .map(|d| (a.value.clone(), d.clone()))
        })
        .collect()
}

/// Entities the executed filter still constrains.
fn resolved_filter(slots: &ExtractedSlots, filter_used: &str) -> ResolvedFilter {
    let filter = filter_used.to_lowercase();
    let constrains = |field: &str| filter.contains(field);

    let assignee = slots
        .assignee
        .as_ref()
        .filter(|a| a.value != CURRENT_USER && a.value != NOBODY)
        .filter(|_| constrains("assignee"))
        // Only a resolved mention carries a display name next to its account id.
        .map(|a| ResolvedEntity {
            id: a.display.as_ref().map(|_| a.value.clone()),
            name: a.label().to_string(),
        });
    let project = slots
        .project
        .as_ref()
        .filter(|_| constrains("project"))
        .map(|p| p.value.clone());
    let issuetype = slots
        .issuetype
        .as_ref()
        .filter(|_| constrains("issuetype"))
        .map(|t| t.value.clone());

    ResolvedFilter {
        assignee,
        project,
        issuetype,
    }
}

/// Carry project and sprint into the next turn.
fn remember(context: &mut ConversationContext, slots: &ExtractedSlots) {
    if let Some(project) = &slots.project {
        context.current_project = Some(project.value.clone());
    }
    if let Some(sprint) = &slots.sprint {
        context.current_sprint = Some(sprint.value.clone());
    }
}

fn describe_record(record: &Record) -> String {
    let mut text = format!("{}: {} ({}", record.key, record.summary, record.status);
    match &record.assignee {
        Some(a) => text.push_str(&format!(", assigned to {}", a.display_name)),
        None => text.push_str(", unassigned"),
    }
    text.push(')');
    if let Some(points) = record.story_points {
        text.push_str(&format!(". Story points: {}", points));
    }
    if let Some(sprint) = &record.sprint {
        text.push_str(&format!(". Sprint: {}", sprint));
    }
    text.push('.');
    text
}

/// Map an error to a response that carries no upstream detail.
fn failure_for(error: &Error, filter: Option<String>) -> ProcessResponse {
    let text = match error.kind() {
        Some(ErrorKind::UpstreamRejected) => REJECTED,
        Some(ErrorKind::UpstreamUnavailable) => UNAVAILABLE,
        Some(ErrorKind::NoMatch) => NOT_UNDERSTOOD,
        _ if matches!(error, Error::Cancelled) => CANCELLED,
        _ => INTERNAL,
    };
    if matches!(error, Error::Cancelled) {
        debug!("Request cancelled");
    } else {
        warn!(filter = filter.as_deref(), error = %error, "Query failed");
    }
    ProcessResponse {
        filter_used: filter,
        response_text: text.to_string(),
        structured_summary: None,
        success: false,
        error_kind: error.kind(),
        candidates: Vec::new(),
        fallback: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackq_core::{PersonRef, ProjectRef};

    fn slot(value: &str, raw: &str) -> SlotValue {
        SlotValue::new(value, raw, 0.9)
    }

    #[test]
    fn test_resolved_filter_follows_used_filter() {
        let slots = ExtractedSlots::default()
            .with_slot(
                SlotKind::Assignee,
                slot("acc-ashwin-t", "Ashwin").with_display("Ashwin Thyagarajan"),
            )
            .with_slot(SlotKind::Project, slot("CCM", "CCM"))
            .with_slot(SlotKind::Issuetype, slot("Story", "stories"));

        let full = resolved_filter(
            &slots,
            "project = CCM AND issuetype = Story AND assignee = \"acc-ashwin-t\"",
        );
        let assignee = full.assignee.unwrap();
        assert_eq!(assignee.id.as_deref(), Some("acc-ashwin-t"));
        assert_eq!(assignee.name, "Ashwin Thyagarajan");
        assert_eq!(full.issuetype.as_deref(), Some("Story"));

        let widened = resolved_filter(&slots, "project = CCM AND assignee = \"acc-ashwin-t\"");
        assert!(widened.issuetype.is_none());
        assert_eq!(widened.project.as_deref(), Some("CCM"));
    }

    #[test]
    fn test_id_labels_cover_resolved_accounts_only() {
        let resolved = ExtractedSlots::default().with_slot(
            SlotKind::Assignee,
            slot("acc-ashwin-t", "Ashwin").with_display("Ashwin Thyagarajan"),
        );
        assert_eq!(
            id_labels(&resolved),
            vec![("acc-ashwin-t".to_string(), "Ashwin Thyagarajan".to_string())]
        );

        let me = ExtractedSlots::default().with_slot(
            SlotKind::Assignee,
            SlotValue::new(CURRENT_USER, "my", 1.0).with_display("you"),
        );
        assert!(id_labels(&me).is_empty());
        let unresolved = ExtractedSlots::default().with_slot(SlotKind::Assignee, slot("Zed", "Zed"));
        assert!(id_labels(&unresolved).is_empty());
    }

    #[test]
    fn test_current_user_is_not_validated_by_name() {
        let slots = ExtractedSlots::default().with_slot(
            SlotKind::Assignee,
            SlotValue::new(CURRENT_USER, "my", 1.0).with_display("you"),
        );
        assert!(resolved_filter(&slots, "assignee = currentUser()").assignee.is_none());
    }

    #[test]
    fn test_failure_text_hides_upstream_body() {
        let err = Error::UpstreamRejected {
            status: 400,
            body: "{\"errorMessages\":[\"Field 'x' does not exist\"]}".into(),
        };
        let response = failure_for(&err, Some("x = 1".into()));
        assert!(!response.success);
        assert_eq!(response.error_kind, Some(ErrorKind::UpstreamRejected));
        assert_eq!(response.response_text, REJECTED);
        assert!(!response.response_text.contains("errorMessages"));

        let cancelled = failure_for(&Error::Cancelled, None);
        assert_eq!(cancelled.response_text, CANCELLED);
        assert_eq!(cancelled.error_kind, None);
    }

    #[test]
    fn test_describe_record() {
        let record = Record {
            key: "CCM-283".into(),
            summary: "Checkout times out".into(),
            status: "In Progress".into(),
            status_category: Some("In Progress".into()),
            assignee: Some(PersonRef {
                account_id: Some("acc-priya".into()),
                display_name: "Priya Raman".into(),
            }),
            project: Some(ProjectRef {
                key: "CCM".into(),
                name: "Commerce".into(),
            }),
            issuetype: Some("Bug".into()),
            priority: None,
            created: None,
            updated: None,
            story_points: Some(3.0),
            sprint: None,
            labels: vec![],
            components: vec![],
        };
        assert_eq!(
            describe_record(&record),
            "CCM-283: Checkout times out (In Progress, assigned to Priya Raman). Story points: 3."
        );
    }

    #[test]
    fn test_remember_carries_project_and_sprint() {
        let mut context = ConversationContext::default();
        let slots = ExtractedSlots::default()
            .with_slot(SlotKind::Project, slot("OPS", "OPS"))
            .with_slot(SlotKind::Sprint, slot("openSprints()", "this sprint"));
        remember(&mut context, &slots);
        assert_eq!(context.current_project.as_deref(), Some("OPS"));
        assert_eq!(context.current_sprint.as_deref(), Some("openSprints()"));
    }
}
