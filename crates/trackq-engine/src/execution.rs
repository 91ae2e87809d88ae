//! Filter execution against the tracker.
//!
//! Count intents only ask for cardinality. List and analysis intents probe
//! the first page through the fallback chain, then page on the endpoint that
//! answered until the total is reached, a short page arrives, or the record
//! cap is hit.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use trackq_core::config::ExecutionSettings;
use trackq_core::logging::{component, subsystem};
use trackq_core::{
    ComposedQuery, FallbackFilter, IntentKind, QueryResult, Result, SearchEndpoint,
    SearchPage, SearchRequest, TrackerApi,
};

use crate::cache::{cache_key, ResultCache};
use crate::chain::{EndpointMemory, FallbackChain};
use crate::retry::{retry_with_backoff, RetryPolicy};

/// Result of executing a composed query with its fallbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub result: QueryResult,
    /// Filter composed from the literal request.
    pub requested_filter: String,
    /// Set when a fallback, not the requested filter, produced the data.
    pub fallback: Option<FallbackFilter>,
}

/// Runs filters with retries, endpoint fallback, pagination, and caching.
pub struct ExecutionEngine {
    tracker: Arc<dyn TrackerApi>,
    settings: ExecutionSettings,
    ladder: Vec<SearchEndpoint>,
    policy: RetryPolicy,
    memory: EndpointMemory,
    cache: ResultCache<ExecutionOutcome>,
}

impl ExecutionEngine {
    pub fn new(
        tracker: Arc<dyn TrackerApi>,
        ladder: Vec<SearchEndpoint>,
        settings: ExecutionSettings,
    ) -> Self {
        let ladder = if ladder.is_empty() {
            SearchEndpoint::LADDER.to_vec()
        } else {
            ladder
        };
        Self {
            tracker,
            policy: RetryPolicy::from_settings(&settings),
            cache: ResultCache::new(
                settings.cache_size,
                Duration::from_secs(settings.cache_ttl_secs),
            ),
            memory: EndpointMemory::default(),
            ladder,
            settings,
        }
    }

    /// Override the retry policy (tests use `RetryPolicy::none()`).
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Drop every memoized result.
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    /// Execute a single filter, no fallbacks.
    pub async fn execute(&self, filter: &str, intent: IntentKind) -> Result<QueryResult> {
        let outcome = self
            .run(filter, intent, &[], self.settings.max_records)
            .await?;
        Ok(outcome.result)
    }

    /// Execute a composed query, falling back when the primary is empty.
    pub async fn execute_composed(&self, composed: &ComposedQuery) -> Result<ExecutionOutcome> {
        let cap = composed
            .limit
            .unwrap_or(self.settings.max_records)
            .clamp(1, self.settings.max_records);
        self.run(
            &composed.filter_expression,
            composed.intent,
            &composed.fallbacks,
            cap,
        )
        .await
    }

    #[instrument(
        skip(self, intent, fallbacks),
        fields(subsystem = subsystem::ENGINE, component = component::EXECUTION, op = "execute", intent = %intent)
    )]
    async fn run(
        &self,
        filter: &str,
        intent: IntentKind,
        fallbacks: &[FallbackFilter],
        cap: usize,
    ) -> Result<ExecutionOutcome> {
        let key = cache_key(intent, &cache_material(filter, fallbacks, cap));
        if let Some(hit) = self.cache.get(&key).await {
            debug!(filter = %filter, "Result cache hit");
            return Ok(hit);
        }

        let start = Instant::now();
        let filters: Vec<String> = std::iter::once(filter.to_string())
            .chain(fallbacks.iter().map(|f| f.filter.clone()))
            .collect();
        let chain = FallbackChain::new(&self.ladder, self.policy, &self.memory);

        let mut result = match intent {
            IntentKind::Count => self.count(&chain, &filters).await?,
            IntentKind::List | IntentKind::Analysis => {
                self.search(&chain, &filters, cap).await?
            }
        };
        result.execution_time_ms = start.elapsed().as_millis() as u64;

        let fallback = filters
            .iter()
            .position(|f| *f == result.filter_used)
            .filter(|i| *i > 0)
            .map(|i| fallbacks[i - 1].clone());

        info!(
            filter = %result.filter_used,
            endpoint = %result.endpoint,
            result_count = result.records.len(),
            total = result.total_count,
            attempts = result.attempts,
            truncated = result.truncated,
            duration_ms = result.execution_time_ms,
            fallback = fallback.as_ref().map(|f| f.label.as_str()),
            "Query executed"
        );

        let outcome = ExecutionOutcome {
            result,
            requested_filter: filter.to_string(),
            fallback,
        };
        self.cache.insert(key, outcome.clone()).await;
        Ok(outcome)
    }

    async fn count(&self, chain: &FallbackChain<'_>, filters: &[String]) -> Result<QueryResult> {
        let outcome = chain
            .run(filters, |n: &u64| *n == 0, |endpoint, filter| {
                let tracker = Arc::clone(&self.tracker);
                async move { tracker.count(endpoint, &filter).await }
            })
            .await?;

        Ok(QueryResult {
            records: Vec::new(),
            total_count: outcome.value,
            filter_used: filters[outcome.filter_index].clone(),
            execution_time_ms: 0,
            errors: outcome.errors,
            endpoint: outcome.endpoint,
            truncated: false,
            attempts: outcome.attempts,
        })
    }

    async fn search(
        &self,
        chain: &FallbackChain<'_>,
        filters: &[String],
        cap: usize,
    ) -> Result<QueryResult> {
        let page_size = (self.settings.page_size as usize).min(cap).max(1) as u32;
        let outcome = chain
            .run(
                filters,
                |page: &SearchPage| page.records.is_empty() && page.total.unwrap_or(0) == 0,
                |endpoint, filter| {
                    let tracker = Arc::clone(&self.tracker);
                    let request = first_page(filter, page_size);
                    async move { tracker.search(endpoint, &request).await }
                },
            )
            .await?;

        let filter = filters[outcome.filter_index].clone();
        let endpoint = outcome.endpoint;
        let mut attempts = outcome.attempts;
        let mut errors = outcome.errors;
        let mut page = outcome.value;
        let mut total = page.total;
        let mut more = has_more(endpoint, &page, page.records.len(), page_size, total);
        let mut records = std::mem::take(&mut page.records);
        let mut interrupted = false;

        while more && records.len() < cap {
            let request = SearchRequest {
                filter: filter.clone(),
                start_at: records.len() as u32,
                max_results: page_size.min((cap - records.len()) as u32),
                extra_fields: Vec::new(),
                next_page_token: page.next_page_token.clone(),
            };
            let retried =
                retry_with_backoff(&self.policy, || self.tracker.search(endpoint, &request)).await;
            attempts += retried.attempts;

            page = match retried.result {
                Ok(page) => page,
                Err(e) => {
                    warn!(filter = %filter, error = %e, fetched = records.len(), "Pagination stopped early");
                    errors.push(format!("pagination stopped after {} records: {}", records.len(), e));
                    interrupted = true;
                    break;
                }
            };
            total = total.or(page.total);
            let got = page.records.len();
            more = got > 0 && has_more(endpoint, &page, records.len() + got, page_size, total);
            records.append(&mut page.records);
            if got < request.max_results as usize && endpoint != SearchEndpoint::Modern {
                more = false;
            }
        }

        let fetched = records.len() as u64;
        let reached_cap = records.len() >= cap;
        records.truncate(cap);
        let truncated = (reached_cap && more)
            || fetched > records.len() as u64
            || total.is_some_and(|t| t > records.len() as u64)
            || interrupted;

        // An upstream total never undercounts what was actually returned.
        let total_count = match total {
            Some(t) => t.max(fetched),
            None if truncated => {
                let retried =
                    retry_with_backoff(&self.policy, || self.tracker.count(endpoint, &filter))
                        .await;
                attempts += retried.attempts;
                retried.result.map_or(fetched, |n| n.max(fetched))
            }
            None => fetched,
        };

        Ok(QueryResult {
            records,
            total_count,
            filter_used: filter,
            execution_time_ms: 0,
            errors,
            endpoint,
            truncated,
            attempts,
        })
    }
}

fn first_page(filter: String, page_size: u32) -> SearchRequest {
    SearchRequest {
        filter,
        start_at: 0,
        max_results: page_size,
        extra_fields: Vec::new(),
        next_page_token: None,
    }
}

/// Whether another page should be requested after `fetched` records.
///
/// Offset endpoints without a total keep going while pages come back full.
fn has_more(
    endpoint: SearchEndpoint,
    page: &SearchPage,
    fetched: usize,
    page_size: u32,
    total: Option<u64>,
) -> bool {
    match endpoint {
        SearchEndpoint::Modern => {
            page.next_page_token.is_some() && page.is_last != Some(true)
        }
        SearchEndpoint::Legacy | SearchEndpoint::Oldest => match total {
            Some(t) => (fetched as u64) < t,
            None => page.records.len() >= page_size as usize,
        },
    }
}

/// Everything that changes the outcome, folded into one string for hashing.
fn cache_material(filter: &str, fallbacks: &[FallbackFilter], cap: usize) -> String {
    let mut material = filter.trim().to_string();
    for f in fallbacks {
        material.push('\u{1f}');
        material.push_str(f.filter.trim());
    }
    material.push('\u{1f}');
    material.push_str(&cap.to_string());
    material
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_material_separates_fallbacks_and_cap() {
        let fb = vec![FallbackFilter {
            label: "any status".into(),
            filter: "project = CCM".into(),
        }];
        assert_ne!(
            cache_material("project = CCM AND x", &fb, 10),
            cache_material("project = CCM AND x", &[], 10)
        );
        assert_ne!(
            cache_material("project = CCM", &[], 10),
            cache_material("project = CCM", &[], 20)
        );
    }

    #[test]
    fn test_has_more_modern_follows_token() {
        let mut page = SearchPage::default();
        assert!(!has_more(SearchEndpoint::Modern, &page, 50, 50, None));
        page.next_page_token = Some("t".into());
        assert!(has_more(SearchEndpoint::Modern, &page, 50, 50, None));
        page.is_last = Some(true);
        assert!(!has_more(SearchEndpoint::Modern, &page, 50, 50, None));
    }

    #[test]
    fn test_has_more_offset_follows_total() {
        let page = SearchPage::default();
        assert!(has_more(SearchEndpoint::Legacy, &page, 50, 50, Some(120)));
        assert!(!has_more(SearchEndpoint::Legacy, &page, 120, 50, Some(120)));
    }
}
