//! In-memory tracker and text generator for deterministic testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use trackq_client::mock::{record, MockFailure, MockTracker};
//! use trackq_core::SearchEndpoint;
//!
//! let tracker = MockTracker::new()
//!     .with_records("project = CCM", vec![record("CCM-1", "Fix login")])
//!     .with_unsupported(SearchEndpoint::Modern)
//!     .with_failures(vec![MockFailure::Status(429)]);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use trackq_core::{
    DirectoryUser, Error, FieldMeta, PersonRef, ProjectInfo, ProjectRef, Record, Result,
    SearchEndpoint, SearchPage, SearchRequest, TextGenerator, TrackerApi,
};

use crate::error::{to_trackq_error, TrackerErrorCode};
use crate::tracker::strip_order_by;

/// A record with only key, summary, and an open status set.
pub fn record(key: &str, summary: &str) -> Record {
    let project = key.split('-').next().unwrap_or(key);
    Record {
        key: key.to_string(),
        summary: summary.to_string(),
        status: "To Do".to_string(),
        status_category: Some("To Do".to_string()),
        assignee: None,
        project: Some(ProjectRef {
            key: project.to_string(),
            name: project.to_string(),
        }),
        issuetype: Some("Task".to_string()),
        priority: None,
        created: None,
        updated: None,
        story_points: None,
        sprint: None,
        labels: Vec::new(),
        components: Vec::new(),
    }
}

/// Assign a record to a person.
pub fn assigned(mut record: Record, account_id: &str, display_name: &str) -> Record {
    record.assignee = Some(PersonRef {
        account_id: Some(account_id.to_string()),
        display_name: display_name.to_string(),
    });
    record
}

/// Set a record's last update time.
pub fn updated_at(mut record: Record, at: DateTime<Utc>) -> Record {
    record.updated = Some(at);
    record
}

/// A scripted upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Respond with this HTTP status.
    Status(u16),
    /// Fail before any response arrives.
    Network,
}

#[derive(Debug, Clone, Default)]
struct MockConfig {
    records: HashMap<String, Vec<Record>>,
    default_records: Vec<Record>,
    users: Vec<DirectoryUser>,
    projects: Vec<ProjectInfo>,
    fields: Vec<FieldMeta>,
    unsupported: HashSet<SearchEndpoint>,
    rejected_filters: HashMap<String, u16>,
    latency_ms: u64,
}

#[derive(Debug, Clone)]
pub struct MockCall {
    pub operation: String,
    pub endpoint: Option<SearchEndpoint>,
    pub input: String,
}

/// In-memory `TrackerApi`.
#[derive(Clone, Default)]
pub struct MockTracker {
    config: Arc<MockConfig>,
    failures: Arc<Mutex<VecDeque<MockFailure>>>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

impl MockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records returned for an exact filter (ORDER BY ignored).
    pub fn with_records(mut self, filter: impl AsRef<str>, records: Vec<Record>) -> Self {
        Arc::make_mut(&mut self.config)
            .records
            .insert(strip_order_by(filter.as_ref()).to_string(), records);
        self
    }

    /// Records returned for any filter without its own mapping.
    pub fn with_default_records(mut self, records: Vec<Record>) -> Self {
        Arc::make_mut(&mut self.config).default_records = records;
        self
    }

    pub fn with_users(mut self, users: Vec<DirectoryUser>) -> Self {
        Arc::make_mut(&mut self.config).users = users;
        self
    }

    pub fn with_projects(mut self, projects: Vec<ProjectInfo>) -> Self {
        Arc::make_mut(&mut self.config).projects = projects;
        self
    }

    pub fn with_fields(mut self, fields: Vec<FieldMeta>) -> Self {
        Arc::make_mut(&mut self.config).fields = fields;
        self
    }

    /// Make an endpoint answer 404 to searches and counts.
    pub fn with_unsupported(mut self, endpoint: SearchEndpoint) -> Self {
        Arc::make_mut(&mut self.config).unsupported.insert(endpoint);
        self
    }

    /// Make a filter answer with a non-retryable status.
    pub fn with_rejected_filter(mut self, filter: impl AsRef<str>, status: u16) -> Self {
        Arc::make_mut(&mut self.config)
            .rejected_filters
            .insert(strip_order_by(filter.as_ref()).to_string(), status);
        self
    }

    /// Failures consumed in order by the next searches and counts.
    pub fn with_failures(self, failures: Vec<MockFailure>) -> Self {
        self.failures.lock().unwrap().extend(failures);
        self
    }

    /// Set simulated latency for every operation.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).latency_ms = latency_ms;
        self
    }

    /// Get all logged calls for assertion.
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.call_log.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.call_log.lock().unwrap().clear()
    }

    /// Number of calls to one operation ("search", "count", ...).
    pub fn call_count(&self, operation: &str) -> usize {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Filters that reached the tracker, in order.
    pub fn filters_seen(&self) -> Vec<String> {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.endpoint.is_some())
            .map(|c| c.input.clone())
            .collect()
    }

    fn log_call(&self, operation: &str, endpoint: Option<SearchEndpoint>, input: &str) {
        self.call_log.lock().unwrap().push(MockCall {
            operation: operation.to_string(),
            endpoint,
            input: input.to_string(),
        });
    }

    async fn simulate_latency(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.config.latency_ms)).await;
        }
    }

    /// Apply scripted failures and endpoint/filter rules, in that order.
    fn check(&self, endpoint: SearchEndpoint, filter: &str) -> Result<()> {
        let path = endpoint.path();
        if self.config.unsupported.contains(&endpoint) {
            return Err(to_trackq_error(
                TrackerErrorCode::EndpointUnsupported,
                404,
                path,
                "",
            ));
        }
        if let Some(failure) = self.failures.lock().unwrap().pop_front() {
            return Err(match failure {
                MockFailure::Status(status) => to_trackq_error(
                    TrackerErrorCode::from_status(status),
                    status,
                    path,
                    "simulated failure",
                ),
                MockFailure::Network => {
                    Error::UpstreamUnavailable(format!("Request to {} failed: simulated", path))
                }
            });
        }
        if let Some(&status) = self.config.rejected_filters.get(filter) {
            return Err(to_trackq_error(
                TrackerErrorCode::from_status(status),
                status,
                path,
                r#"{"errorMessages":["simulated rejection"]}"#,
            ));
        }
        Ok(())
    }

    fn records_for(&self, filter: &str) -> &[Record] {
        self.config
            .records
            .get(filter)
            .unwrap_or(&self.config.default_records)
    }
}

#[async_trait]
impl TrackerApi for MockTracker {
    async fn search(&self, endpoint: SearchEndpoint, request: &SearchRequest) -> Result<SearchPage> {
        let filter = strip_order_by(&request.filter);
        self.log_call("search", Some(endpoint), filter);
        self.simulate_latency().await;
        self.check(endpoint, filter)?;

        let all = self.records_for(filter);
        let start = match endpoint {
            SearchEndpoint::Modern => request
                .next_page_token
                .as_deref()
                .and_then(|t| t.parse::<usize>().ok())
                .unwrap_or(0),
            SearchEndpoint::Legacy | SearchEndpoint::Oldest => request.start_at as usize,
        };
        let start = start.min(all.len());
        let end = (start + request.max_results as usize).min(all.len());
        let records = all[start..end].to_vec();

        Ok(match endpoint {
            SearchEndpoint::Modern => SearchPage {
                records,
                total: None,
                next_page_token: (end < all.len()).then(|| end.to_string()),
                is_last: Some(end >= all.len()),
                warnings: Vec::new(),
            },
            SearchEndpoint::Legacy | SearchEndpoint::Oldest => SearchPage {
                records,
                total: Some(all.len() as u64),
                next_page_token: None,
                is_last: None,
                warnings: Vec::new(),
            },
        })
    }

    async fn count(&self, endpoint: SearchEndpoint, filter: &str) -> Result<u64> {
        let filter = strip_order_by(filter);
        self.log_call("count", Some(endpoint), filter);
        self.simulate_latency().await;
        self.check(endpoint, filter)?;
        Ok(self.records_for(filter).len() as u64)
    }

    async fn get_record(&self, key: &str) -> Result<Option<Record>> {
        self.log_call("get_record", None, key);
        self.simulate_latency().await;
        Ok(self
            .config
            .records
            .values()
            .flatten()
            .chain(self.config.default_records.iter())
            .find(|r| r.key.eq_ignore_ascii_case(key))
            .cloned())
    }

    async fn search_users(&self, query: &str) -> Result<Vec<DirectoryUser>> {
        self.log_call("search_users", None, query);
        self.simulate_latency().await;
        let q = query.trim().to_lowercase();
        Ok(self
            .config
            .users
            .iter()
            .filter(|u| q.is_empty() || u.display_name.to_lowercase().contains(&q))
            .cloned()
            .collect())
    }

    async fn list_projects(&self) -> Result<Vec<ProjectInfo>> {
        self.log_call("list_projects", None, "");
        self.simulate_latency().await;
        Ok(self.config.projects.clone())
    }

    async fn list_fields(&self) -> Result<Vec<FieldMeta>> {
        self.log_call("list_fields", None, "");
        self.simulate_latency().await;
        Ok(self.config.fields.clone())
    }
}

/// Text generator returning a fixed reply, or failing.
#[derive(Clone)]
pub struct MockGenerator {
    reply: Option<String>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockGenerator {
    /// Always answer with `reply`.
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            prompts: Arc::default(),
        }
    }

    /// Always fail.
    pub fn failing() -> Self {
        Self {
            reply: None,
            prompts: Arc::default(),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply
            .clone()
            .ok_or_else(|| Error::Generation("simulated failure".to_string()))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(filter: &str, max: u32) -> SearchRequest {
        SearchRequest {
            filter: filter.to_string(),
            start_at: 0,
            max_results: max,
            extra_fields: Vec::new(),
            next_page_token: None,
        }
    }

    #[tokio::test]
    async fn test_modern_pages_by_token() {
        let records = (1..=5).map(|i| record(&format!("CCM-{}", i), "x")).collect();
        let tracker = MockTracker::new().with_records("project = CCM", records);

        let first = tracker
            .search(SearchEndpoint::Modern, &request("project = CCM", 2))
            .await
            .unwrap();
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.next_page_token.as_deref(), Some("2"));
        assert_eq!(first.is_last, Some(false));

        let mut next = request("project = CCM", 10);
        next.next_page_token = first.next_page_token;
        let second = tracker.search(SearchEndpoint::Modern, &next).await.unwrap();
        assert_eq!(second.records.len(), 3);
        assert_eq!(second.is_last, Some(true));
    }

    #[tokio::test]
    async fn test_failures_consumed_in_order() {
        let tracker = MockTracker::new().with_failures(vec![
            MockFailure::Status(429),
            MockFailure::Network,
        ]);
        let r = request("x", 10);
        assert!(matches!(
            tracker.search(SearchEndpoint::Legacy, &r).await,
            Err(Error::RateLimited(_))
        ));
        assert!(matches!(
            tracker.search(SearchEndpoint::Legacy, &r).await,
            Err(Error::UpstreamUnavailable(_))
        ));
        assert!(tracker.search(SearchEndpoint::Legacy, &r).await.is_ok());
        assert_eq!(tracker.call_count("search"), 3);
    }

    #[tokio::test]
    async fn test_unsupported_endpoint_and_order_by_ignored() {
        let tracker = MockTracker::new()
            .with_records("project = OPS", vec![record("OPS-1", "x")])
            .with_unsupported(SearchEndpoint::Modern);
        assert!(matches!(
            tracker.count(SearchEndpoint::Modern, "project = OPS").await,
            Err(Error::EndpointUnsupported { status: 404, .. })
        ));
        let n = tracker
            .count(SearchEndpoint::Legacy, "project = OPS ORDER BY updated DESC")
            .await
            .unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn test_mock_generator() {
        let ok = MockGenerator::replying("polished");
        assert_eq!(ok.generate("p").await.unwrap(), "polished");
        assert_eq!(ok.prompts(), vec!["p".to_string()]);
        assert!(MockGenerator::failing().generate("p").await.is_err());
    }
}
