//! Execution engine against the in-memory tracker: retries, the endpoint
//! ladder, pagination, and the result cache.

use std::sync::Arc;

use async_trait::async_trait;
use trackq_client::mock::{record, MockFailure, MockTracker};
use trackq_core::config::ExecutionSettings;
use trackq_core::{
    ComposedQuery, DirectoryUser, Error, FallbackFilter, FieldMeta, IntentKind, ProjectInfo,
    Record, Result, SearchEndpoint, SearchPage, SearchRequest, TrackerApi,
};
use trackq_engine::{ExecutionEngine, RetryPolicy};

fn records(prefix: &str, n: usize) -> Vec<Record> {
    (1..=n)
        .map(|i| record(&format!("{}-{}", prefix, i), "item"))
        .collect()
}

fn engine(tracker: &MockTracker) -> ExecutionEngine {
    ExecutionEngine::new(
        Arc::new(tracker.clone()),
        SearchEndpoint::LADDER.to_vec(),
        ExecutionSettings::default(),
    )
}

fn composed(filter: &str, intent: IntentKind, fallbacks: Vec<FallbackFilter>) -> ComposedQuery {
    ComposedQuery {
        template_id: "test".into(),
        intent,
        filter_expression: filter.into(),
        response_template: "Found {total}; showing {shown}.".into(),
        slots_used: vec![],
        fallbacks,
        limit: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_retries_503_three_times_then_succeeds() {
    let tracker = MockTracker::new()
        .with_default_records(records("OPS", 3))
        .with_failures(vec![
            MockFailure::Status(503),
            MockFailure::Status(503),
            MockFailure::Status(503),
        ]);
    let settings = ExecutionSettings::default();
    let result = engine(&tracker)
        .execute("project = OPS AND issuetype = Bug", IntentKind::Count)
        .await
        .unwrap();

    assert_eq!(result.total_count, 3);
    assert_eq!(result.endpoint, SearchEndpoint::Modern);
    assert_eq!(result.attempts, 4);
    assert!(result.attempts <= settings.max_retries + 1);
    assert_eq!(tracker.call_count("count"), 4);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_move_down_the_ladder() {
    let tracker = MockTracker::new()
        .with_default_records(records("OPS", 2))
        .with_failures(vec![MockFailure::Network; 4]);
    let result = engine(&tracker)
        .execute("project = OPS", IntentKind::List)
        .await
        .unwrap();

    assert_eq!(result.endpoint, SearchEndpoint::Legacy);
    assert_eq!(result.records.len(), 2);
    assert_eq!(result.attempts, 5);
}

#[tokio::test]
async fn test_unsupported_endpoint_is_remembered() {
    let tracker = MockTracker::new()
        .with_default_records(records("CCM", 2))
        .with_unsupported(SearchEndpoint::Modern);
    let engine = engine(&tracker).with_retry_policy(RetryPolicy::none());

    let first = engine.execute("project = CCM", IntentKind::List).await.unwrap();
    assert_eq!(first.endpoint, SearchEndpoint::Legacy);

    tracker.clear_calls();
    let second = engine.execute("project = OPS", IntentKind::List).await.unwrap();
    assert_eq!(second.endpoint, SearchEndpoint::Legacy);
    assert!(tracker
        .get_calls()
        .iter()
        .all(|c| c.endpoint != Some(SearchEndpoint::Modern)));
}

#[tokio::test]
async fn test_rejected_filter_is_not_retried() {
    let tracker = MockTracker::new().with_rejected_filter("project = NOPE", 400);
    let err = engine(&tracker)
        .execute("project = NOPE", IntentKind::List)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UpstreamRejected { status: 400, .. }));
    assert_eq!(tracker.call_count("search"), 1);
}

#[tokio::test]
async fn test_zero_results_use_first_fallback_with_data() {
    let primary = "project = CCM AND issuetype = Bug AND updated >= -7d";
    let widened = "project = CCM AND issuetype = Bug AND updated >= -30d";
    let tracker = MockTracker::new()
        .with_records(primary, vec![])
        .with_records(widened, records("CCM", 12));
    let query = composed(
        primary,
        IntentKind::List,
        vec![FallbackFilter {
            label: "widened to the last 30 days".into(),
            filter: widened.into(),
        }],
    );

    let outcome = engine(&tracker).execute_composed(&query).await.unwrap();
    assert_eq!(outcome.result.total_count, 12);
    assert_eq!(outcome.result.filter_used, widened);
    assert_eq!(outcome.requested_filter, primary);
    assert_eq!(
        outcome.fallback.as_ref().map(|f| f.label.as_str()),
        Some("widened to the last 30 days")
    );
    assert_eq!(tracker.filters_seen(), vec![primary.to_string(), widened.to_string()]);
}

#[tokio::test]
async fn test_all_filters_empty_returns_primary_zero() {
    let tracker = MockTracker::new();
    let query = composed(
        "project = CCM AND status = Blocked",
        IntentKind::List,
        vec![FallbackFilter {
            label: "any status".into(),
            filter: "project = CCM".into(),
        }],
    );
    let outcome = engine(&tracker).execute_composed(&query).await.unwrap();
    assert!(outcome.result.is_empty());
    assert_eq!(outcome.result.filter_used, "project = CCM AND status = Blocked");
    assert!(outcome.fallback.is_none());
}

#[tokio::test]
async fn test_modern_pagination_follows_tokens() {
    let tracker = MockTracker::new().with_default_records(records("CCM", 120));
    let result = engine(&tracker)
        .execute("project = CCM", IntentKind::List)
        .await
        .unwrap();

    assert_eq!(result.records.len(), 120);
    assert_eq!(result.total_count, 120);
    assert!(!result.truncated);
    assert_eq!(tracker.call_count("search"), 3);
    assert_eq!(result.records[119].key, "CCM-120");
}

#[tokio::test]
async fn test_legacy_pagination_uses_offsets_and_total() {
    let tracker = MockTracker::new()
        .with_default_records(records("CCM", 75))
        .with_unsupported(SearchEndpoint::Modern);
    let result = engine(&tracker)
        .execute("project = CCM", IntentKind::List)
        .await
        .unwrap();

    assert_eq!(result.endpoint, SearchEndpoint::Legacy);
    assert_eq!(result.records.len(), 75);
    assert_eq!(result.total_count, 75);
    assert!(!result.truncated);
}

#[tokio::test]
async fn test_limit_caps_records_and_counts_the_rest() {
    let tracker = MockTracker::new().with_default_records(records("CCM", 120));
    let mut query = composed("project = CCM", IntentKind::List, vec![]);
    query.limit = Some(10);

    let outcome = engine(&tracker).execute_composed(&query).await.unwrap();
    assert_eq!(outcome.result.records.len(), 10);
    assert_eq!(outcome.result.total_count, 120);
    assert!(outcome.result.truncated);
    assert_eq!(tracker.call_count("count"), 1);
}

#[tokio::test]
async fn test_results_are_cached() {
    let tracker = MockTracker::new().with_default_records(records("CCM", 2));
    let engine = engine(&tracker);

    engine.execute("project = CCM", IntentKind::List).await.unwrap();
    engine.execute("project = CCM", IntentKind::List).await.unwrap();
    assert_eq!(tracker.call_count("search"), 1);

    engine.execute("project = CCM", IntentKind::Count).await.unwrap();
    assert_eq!(tracker.call_count("count"), 1);

    engine.clear_cache().await;
    engine.execute("project = CCM", IntentKind::List).await.unwrap();
    assert_eq!(tracker.call_count("search"), 2);
}

/// Serves the first page, then fails every follow-up page.
struct FirstPageOnly(MockTracker);

#[async_trait]
impl TrackerApi for FirstPageOnly {
    async fn search(&self, endpoint: SearchEndpoint, request: &SearchRequest) -> Result<SearchPage> {
        if request.next_page_token.is_some() {
            return Err(Error::UpstreamUnavailable("connection reset".into()));
        }
        self.0.search(endpoint, request).await
    }

    async fn count(&self, endpoint: SearchEndpoint, filter: &str) -> Result<u64> {
        self.0.count(endpoint, filter).await
    }

    async fn get_record(&self, key: &str) -> Result<Option<Record>> {
        self.0.get_record(key).await
    }

    async fn search_users(&self, query: &str) -> Result<Vec<DirectoryUser>> {
        self.0.search_users(query).await
    }

    async fn list_projects(&self) -> Result<Vec<ProjectInfo>> {
        self.0.list_projects().await
    }

    async fn list_fields(&self) -> Result<Vec<FieldMeta>> {
        self.0.list_fields().await
    }
}

#[tokio::test]
async fn test_pagination_failure_keeps_partial_results() {
    let tracker = MockTracker::new().with_default_records(records("CCM", 80));
    let engine = ExecutionEngine::new(
        Arc::new(FirstPageOnly(tracker)),
        SearchEndpoint::LADDER.to_vec(),
        ExecutionSettings::default(),
    )
    .with_retry_policy(RetryPolicy::none());

    let result = engine.execute("project = CCM", IntentKind::List).await.unwrap();
    assert_eq!(result.records.len(), 50);
    assert!(result.truncated);
    assert_eq!(result.total_count, 80);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("after 50 records"));
}

/// Reports a total smaller than the records it actually returns.
struct UnderCounted(MockTracker);

#[async_trait]
impl TrackerApi for UnderCounted {
    async fn search(&self, endpoint: SearchEndpoint, request: &SearchRequest) -> Result<SearchPage> {
        let mut page = self.0.search(endpoint, request).await?;
        page.total = Some(1);
        Ok(page)
    }

    async fn count(&self, endpoint: SearchEndpoint, filter: &str) -> Result<u64> {
        self.0.count(endpoint, filter).await
    }

    async fn get_record(&self, key: &str) -> Result<Option<Record>> {
        self.0.get_record(key).await
    }

    async fn search_users(&self, query: &str) -> Result<Vec<DirectoryUser>> {
        self.0.search_users(query).await
    }

    async fn list_projects(&self) -> Result<Vec<ProjectInfo>> {
        self.0.list_projects().await
    }

    async fn list_fields(&self) -> Result<Vec<FieldMeta>> {
        self.0.list_fields().await
    }
}

#[tokio::test]
async fn test_total_never_below_returned_records() {
    let tracker = MockTracker::new().with_default_records(records("CCM", 3));
    let engine = ExecutionEngine::new(
        Arc::new(UnderCounted(tracker)),
        SearchEndpoint::LADDER.to_vec(),
        ExecutionSettings::default(),
    );

    let result = engine.execute("project = CCM", IntentKind::List).await.unwrap();
    assert_eq!(result.records.len(), 3);
    assert!(!result.truncated);
    assert!(result.total_count >= result.records.len() as u64);
    assert_eq!(result.total_count, 3);
}
