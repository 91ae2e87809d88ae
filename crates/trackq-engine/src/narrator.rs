//! Turns execution results into user-facing prose.
//!
//! The text is built deterministically from the composed response template
//! and the aggregated summary. An optional text generator may rephrase the
//! body; the fallback disclosure is never handed to it. Disclosed filters
//! show resolved account ids as the names they were resolved from.

use std::sync::Arc;

use tracing::{debug, warn};

use trackq_core::{
    AggregatedSummary, ComposedQuery, FallbackFilter, IntentKind, RiskFlag, TextGenerator,
};

use crate::execution::ExecutionOutcome;

const STATUS_HIGHLIGHTS: usize = 4;

/// Everything needed to describe one answer.
#[derive(Debug, Clone, Copy)]
pub struct NarrationInput<'a> {
    pub composed: &'a ComposedQuery,
    pub outcome: &'a ExecutionOutcome,
    pub summary: Option<&'a AggregatedSummary>,
    /// (id, display name) pairs substituted into disclosed filters.
    pub labels: &'a [(String, String)],
}

#[derive(Clone, Default)]
pub struct Narrator {
    generator: Option<Arc<dyn TextGenerator>>,
}

impl Narrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Deterministic rendering, disclosure first.
    pub fn render(&self, input: NarrationInput<'_>) -> String {
        join_parts(disclosure(input), body(input))
    }

    /// Render, then let the generator rephrase the body when one is set.
    /// Any generator failure keeps the deterministic text.
    pub async fn narrate(&self, input: NarrationInput<'_>) -> String {
        let body = body(input);
        let Some(generator) = &self.generator else {
            return join_parts(disclosure(input), body);
        };

        let prompt = format!(
            "Rewrite this project status answer as one short, friendly paragraph. \
             Keep every number and record key.\n\n{}",
            body
        );
        let total = input.outcome.result.total_count.to_string();
        let body = match generator.generate(&prompt).await {
            Ok(polished) if polished.contains(&total) => {
                debug!(model = generator.model_name(), "Narration polished");
                polished
            }
            Ok(_) => {
                warn!(model = generator.model_name(), "Polished text dropped the total, using plain text");
                body
            }
            Err(e) => {
                warn!(model = generator.model_name(), error = %e, "Narration polish failed, using plain text");
                body
            }
        };
        join_parts(disclosure(input), body)
    }
}

fn join_parts(disclosure: Option<String>, body: String) -> String {
    match disclosure {
        Some(d) => format!("{}\n{}", d, body),
        None => body,
    }
}

/// Fallback statement naming the filter that produced the data.
pub fn disclosure_text(requested: &str, fallback: &FallbackFilter) -> String {
    format!(
        "Your exact request (`{}`) returned nothing, so these results come from a broader filter, {}: `{}`.",
        requested, fallback.label, fallback.filter
    )
}

fn disclosure(input: NarrationInput<'_>) -> Option<String> {
    input.outcome.fallback.as_ref().map(|fb| {
        let shown = FallbackFilter {
            label: fb.label.clone(),
            filter: display_filter(&fb.filter, input.labels),
        };
        disclosure_text(
            &display_filter(&input.outcome.requested_filter, input.labels),
            &shown,
        )
    })
}

/// Filter text with each id operand replaced by its quoted display name.
pub fn display_filter(filter: &str, labels: &[(String, String)]) -> String {
    labels
        .iter()
        .filter(|(id, _)| !id.is_empty())
        .fold(filter.to_string(), |text, (id, name)| {
            replace_operand(&text, id, name)
        })
}

fn replace_operand(text: &str, id: &str, name: &str) -> String {
    let shown = format!("\"{}\"", name.replace('"', "\\\""));
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(id) {
        let end = pos + id.len();
        let before = rest[..pos].chars().next_back();
        let after = rest[end..].chars().next();
        if before == Some('"') && after == Some('"') {
            out.push_str(&rest[..pos - 1]);
            out.push_str(&shown);
            rest = &rest[end + 1..];
        } else if !before.is_some_and(is_operand_char) && !after.is_some_and(is_operand_char) {
            out.push_str(&rest[..pos]);
            out.push_str(&shown);
            rest = &rest[end..];
        } else {
            out.push_str(&rest[..end]);
            rest = &rest[end..];
        }
    }
    out.push_str(rest);
    out
}

fn is_operand_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn headline(input: NarrationInput<'_>) -> String {
    let result = &input.outcome.result;
    let shown = result.records.len();
    let mut template = input.composed.response_template.clone();
    if shown == 0 {
        template = template.replace("; showing {shown}", "");
    }
    let mut text = template
        .replace("{total}", &result.total_count.to_string())
        .replace("{shown}", &shown.to_string());
    if result.truncated && input.composed.intent != IntentKind::Count {
        text.push_str(&format!(
            " Only the first {} of {} were fetched.",
            shown, result.total_count
        ));
    }
    text
}

fn body(input: NarrationInput<'_>) -> String {
    let mut lines = vec![headline(input)];
    if input.composed.intent == IntentKind::Count {
        return lines.join("\n");
    }
    let Some(summary) = input.summary else {
        return lines.join("\n");
    };

    if summary.validation.used_raw_records {
        lines.push(
            "Note: the tracker returned items that don't match the request exactly; they are shown unfiltered."
                .to_string(),
        );
    } else if summary.validation.dropped > 0 {
        lines.push(format!(
            "{} returned item(s) didn't match the request and were left out.",
            summary.validation.dropped
        ));
    }

    if input.composed.intent == IntentKind::Analysis {
        lines.extend(highlights(summary));
    }

    for sample in &summary.sample_records {
        let mut line = format!("- {} {} ({}", sample.key, sample.summary, sample.status);
        if let Some(assignee) = &sample.assignee {
            line.push_str(&format!(", {}", assignee));
        }
        line.push(')');
        lines.push(line);
    }
    lines.join("\n")
}

fn highlights(summary: &AggregatedSummary) -> Vec<String> {
    let mut lines = Vec::new();

    let mut statuses: Vec<(&String, &usize)> = summary.by_status.iter().collect();
    statuses.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    if !statuses.is_empty() {
        let parts: Vec<String> = statuses
            .iter()
            .take(STATUS_HIGHLIGHTS)
            .map(|(status, n)| format!("{} {}", status, n))
            .collect();
        lines.push(format!("By status: {}.", parts.join(", ")));
    }
    if let Some(points) = summary.total_points {
        lines.push(format!("Story points: {}.", points));
    }
    for flag in &summary.risk_flags {
        lines.push(match flag {
            RiskFlag::Stale { key, days } => format!("{} has not moved in {} days.", key, days),
            RiskFlag::Concentration { assignee, share } => format!(
                "{} holds {:.0}% of these items.",
                assignee,
                share * 100.0
            ),
            RiskFlag::Blocked { count } => format!("{} item(s) are blocked.", count),
            RiskFlag::Unassigned { count } => {
                format!("{} open item(s) have no assignee.", count)
            }
        });
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use trackq_core::{Error, QueryResult, Result, SampleRecord, SearchEndpoint};

    struct Fixed(Result<String>);

    #[async_trait]
    impl TextGenerator for Fixed {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            match &self.0 {
                Ok(s) => Ok(s.clone()),
                Err(_) => Err(Error::Generation("down".into())),
            }
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn composed(intent: IntentKind, template: &str) -> ComposedQuery {
        ComposedQuery {
            template_id: "t".into(),
            intent,
            filter_expression: "project = CCM AND updated >= -7d".into(),
            response_template: template.into(),
            slots_used: vec![],
            fallbacks: vec![],
            limit: None,
        }
    }

    fn outcome(total: u64, shown: usize, fallback: Option<FallbackFilter>) -> ExecutionOutcome {
        let records = (0..shown)
            .map(|i| bare_record(&format!("CCM-{}", i + 1)))
            .collect();
        ExecutionOutcome {
            result: QueryResult {
                records,
                total_count: total,
                filter_used: fallback
                    .as_ref()
                    .map_or("project = CCM AND updated >= -7d".into(), |f| f.filter.clone()),
                execution_time_ms: 3,
                errors: vec![],
                endpoint: SearchEndpoint::Modern,
                truncated: false,
                attempts: 1,
            },
            requested_filter: "project = CCM AND updated >= -7d".into(),
            fallback,
        }
    }

    fn bare_record(key: &str) -> trackq_core::Record {
        trackq_core::Record {
            key: key.into(),
            summary: "x".into(),
            status: "To Do".into(),
            status_category: None,
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
        }
    }

    #[test]
    fn test_count_headline() {
        let c = composed(IntentKind::Count, "There are {total} Bug items in OPS.");
        let o = outcome(17, 0, None);
        let text = Narrator::new().render(NarrationInput {
            composed: &c,
            outcome: &o,
            summary: None,
            labels: &[],
        });
        assert_eq!(text, "There are 17 Bug items in OPS.");
    }

    #[test]
    fn test_zero_results_drop_showing_clause() {
        let c = composed(IntentKind::List, "Found {total} items in CCM; showing {shown}.");
        let o = outcome(0, 0, None);
        let text = Narrator::new().render(NarrationInput {
            composed: &c,
            outcome: &o,
            summary: None,
            labels: &[],
        });
        assert_eq!(text, "Found 0 items in CCM.");
    }

    #[test]
    fn test_fallback_is_disclosed_with_filter() {
        let fb = FallbackFilter {
            label: "widened to the last 30 days".into(),
            filter: "project = CCM AND updated >= -30d".into(),
        };
        let c = composed(IntentKind::List, "Found {total} items in CCM; showing {shown}.");
        let o = outcome(4, 4, Some(fb));
        let text = Narrator::new().render(NarrationInput {
            composed: &c,
            outcome: &o,
            summary: None,
            labels: &[],
        });
        assert!(text.starts_with("Your exact request (`project = CCM AND updated >= -7d`) returned nothing"));
        assert!(text.contains("widened to the last 30 days"));
        assert!(text.contains("`project = CCM AND updated >= -30d`"));
    }

    #[test]
    fn test_disclosed_filters_show_names_not_account_ids() {
        let fb = FallbackFilter {
            label: "widened to the last 30 days".into(),
            filter: "project = CCM AND assignee = 5b10ac8d82e05b22cc7d4ef5 AND updated >= -30d"
                .into(),
        };
        let c = composed(IntentKind::List, "Found {total} items; showing {shown}.");
        let mut o = outcome(3, 3, Some(fb));
        o.requested_filter =
            "project = CCM AND assignee = 5b10ac8d82e05b22cc7d4ef5 AND updated >= -7d".into();
        let labels = vec![("5b10ac8d82e05b22cc7d4ef5".to_string(), "Ashwin Thyagarajan".to_string())];
        let text = Narrator::new().render(NarrationInput {
            composed: &c,
            outcome: &o,
            summary: None,
            labels: &labels,
        });
        assert!(!text.contains("5b10ac8d82e05b22cc7d4ef5"));
        assert!(text.contains("`project = CCM AND assignee = \"Ashwin Thyagarajan\" AND updated >= -7d`"));
        assert!(text.contains("assignee = \"Ashwin Thyagarajan\" AND updated >= -30d"));
    }

    #[test]
    fn test_display_filter_replaces_whole_operands_only() {
        let labels = vec![("acc-1".to_string(), "Priya Raman".to_string())];
        assert_eq!(
            display_filter(r#"assignee = "acc-1" OR reporter = acc-1"#, &labels),
            r#"assignee = "Priya Raman" OR reporter = "Priya Raman""#
        );
        assert_eq!(display_filter("assignee = acc-12", &labels), "assignee = acc-12");
        assert_eq!(display_filter("project = CCM", &[]), "project = CCM");
    }

    #[test]
    fn test_analysis_highlights_and_samples() {
        let c = composed(IntentKind::Analysis, "Health of CCM: {total} open items.");
        let o = outcome(3, 3, None);
        let mut summary = AggregatedSummary {
            total: 3,
            total_points: Some(8.0),
            risk_flags: vec![
                RiskFlag::Blocked { count: 1 },
                RiskFlag::Concentration {
                    assignee: "Priya".into(),
                    share: 0.75,
                },
            ],
            sample_records: vec![SampleRecord {
                key: "CCM-1".into(),
                summary: "Fix login".into(),
                status: "In Progress".into(),
                assignee: Some("Priya".into()),
                updated: None,
            }],
            ..Default::default()
        };
        summary.by_status.insert("In Progress".into(), 2);
        summary.by_status.insert("To Do".into(), 1);

        let text = Narrator::new().render(NarrationInput {
            composed: &c,
            outcome: &o,
            summary: Some(&summary),
            labels: &[],
        });
        assert!(text.contains("By status: In Progress 2, To Do 1."));
        assert!(text.contains("Story points: 8."));
        assert!(text.contains("Priya holds 75% of these items."));
        assert!(text.contains("- CCM-1 Fix login (In Progress, Priya)"));
    }

    #[tokio::test]
    async fn test_polish_keeps_disclosure_and_degrades_on_failure() {
        let fb = FallbackFilter {
            label: "any status".into(),
            filter: "project = CCM".into(),
        };
        let c = composed(IntentKind::List, "Found {total} items; showing {shown}.");
        let o = outcome(2, 2, Some(fb));
        let input = NarrationInput {
            composed: &c,
            outcome: &o,
            summary: None,
            labels: &[],
        };

        let polished = Narrator::new()
            .with_generator(Arc::new(Fixed(Ok("You have 2 items to look at.".into()))))
            .narrate(input)
            .await;
        assert!(polished.contains("`project = CCM`"));
        assert!(polished.ends_with("You have 2 items to look at."));

        let plain = Narrator::new()
            .with_generator(Arc::new(Fixed(Err(Error::Generation("x".into())))))
            .narrate(input)
            .await;
        assert_eq!(plain, Narrator::new().render(input));

        let dropped_total = Narrator::new()
            .with_generator(Arc::new(Fixed(Ok("A couple of items.".into()))))
            .narrate(input)
            .await;
        assert_eq!(dropped_total, Narrator::new().render(input));
    }
}
