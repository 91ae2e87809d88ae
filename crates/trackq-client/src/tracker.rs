//! HTTP client for the tracker REST API.
//!
//! One `HttpTrackerClient` serves every endpoint on the search ladder. The
//! client never retries or falls back by itself: each call maps its outcome
//! to a `trackq_core::Error` so the execution engine can decide.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use trackq_core::config::TrackerConfig;
use trackq_core::defaults;
use trackq_core::logging::{component, subsystem};
use trackq_core::{
    DirectoryUser, Error, FieldMeta, ProjectInfo, Record, Result, SearchEndpoint, SearchPage,
    SearchRequest, TrackerApi,
};

use crate::error::{to_trackq_error, transport_error, TrackerErrorCode};
use crate::types::*;

const COUNT_PATH: &str = "/rest/api/3/search/approximate-count";
const ISSUE_PATH: &str = "/rest/api/3/issue";
const USER_SEARCH_PATH: &str = "/rest/api/3/user/search";
const USER_LIST_PATH: &str = "/rest/api/3/users/search";
const PROJECT_SEARCH_PATH: &str = "/rest/api/3/project/search";
const FIELD_PATH: &str = "/rest/api/3/field";
const PROJECT_PAGE_SIZE: u32 = 50;

/// Drop a trailing `ORDER BY` clause; counting endpoints reject or ignore it.
/// Text inside quoted operands is never treated as the clause.
pub fn strip_order_by(filter: &str) -> &str {
    let lower = filter.to_ascii_lowercase();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut prev: Option<char> = None;

    for (idx, c) in filter.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
        } else if c == '"' || c == '\'' {
            quote = Some(c);
        } else if lower[idx..].starts_with("order by")
            && prev.map_or(true, |p| p.is_whitespace() || p == ')')
        {
            return filter[..idx].trim();
        }
        prev = Some(c);
    }
    filter.trim()
}

/// Tracker client over reqwest.
pub struct HttpTrackerClient {
    client: Client,
    config: TrackerConfig,
    user_limit: usize,
    fields: RwLock<FieldIds>,
}

impl HttpTrackerClient {
    /// Create a new client with the given configuration.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            base_url = %config.base_url,
            authenticated = config.api_token.is_some(),
            "Initializing tracker client"
        );

        Ok(Self {
            client,
            config,
            user_limit: defaults::DIRECTORY_USER_LIMIT,
            fields: RwLock::new(FieldIds::default()),
        })
    }

    /// Cap on users returned by one directory search.
    pub fn with_user_limit(mut self, limit: usize) -> Self {
        self.user_limit = limit.max(1);
        self
    }

    /// Use known custom field ids instead of discovering them.
    pub fn with_field_ids(self, ids: FieldIds) -> Self {
        self.set_field_ids(ids);
        self
    }

    /// Get the current configuration.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Custom field ids currently in use.
    pub fn field_ids(&self) -> FieldIds {
        self.fields
            .read()
            .map(|f| f.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn set_field_ids(&self, ids: FieldIds) {
        match self.fields.write() {
            Ok(mut guard) => *guard = ids,
            Err(poisoned) => *poisoned.into_inner() = ids,
        }
    }

    /// Look up story-point and sprint field ids from field metadata.
    pub async fn discover_fields(&self) -> Result<FieldIds> {
        let fields = self.list_fields().await?;
        let ids = FieldIds::from_fields(&fields);
        debug!(
            story_points = ?ids.story_points,
            sprint = ?ids.sprint,
            "Discovered custom fields"
        );
        self.set_field_ids(ids.clone());
        Ok(ids)
    }

    /// Build a request with authentication if configured.
    fn build_request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let mut req = self
            .client
            .request(method, &url)
            .header("Accept", "application/json");

        match (&self.config.email, &self.config.api_token) {
            (Some(email), Some(token)) => req = req.basic_auth(email, Some(token)),
            (None, Some(token)) => req = req.bearer_auth(token),
            _ => {}
        }

        req
    }

    /// Send and turn any non-success status into a classified error.
    async fn send(&self, path: &str, req: RequestBuilder) -> Result<Response> {
        let response = req.send().await.map_err(|e| transport_error(path, e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let code = TrackerErrorCode::from_status(status.as_u16());
        if matches!(
            code,
            TrackerErrorCode::Rejected | TrackerErrorCode::Unauthorized
        ) {
            warn!(endpoint = path, status = status.as_u16(), body = %body, "Tracker rejected request");
        } else {
            debug!(endpoint = path, status = status.as_u16(), ?code, "Tracker request failed");
        }
        Err(to_trackq_error(code, status.as_u16(), path, &body))
    }

    async fn parse<T: DeserializeOwned>(path: &str, response: Response) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse {} response: {}", path, e)))
    }

    fn projected_fields(&self, extra: &[String]) -> Vec<String> {
        let ids = self.field_ids();
        let mut fields: Vec<String> = STANDARD_FIELDS.iter().map(|f| f.to_string()).collect();
        for f in ids.projected().map(str::to_string).chain(extra.iter().cloned()) {
            if !fields.contains(&f) {
                fields.push(f);
            }
        }
        fields
    }

    fn into_page(&self, response: SearchResponse) -> SearchPage {
        let ids = self.field_ids();
        SearchPage {
            records: response
                .issues
                .into_iter()
                .map(|i| i.into_record(&ids))
                .collect(),
            total: response.total,
            next_page_token: response.next_page_token,
            is_last: response.is_last,
            warnings: response.warning_messages,
        }
    }
}

#[async_trait]
impl TrackerApi for HttpTrackerClient {
    #[instrument(
        skip(self, endpoint, request),
        fields(subsystem = subsystem::CLIENT, component = component::TRACKER, op = "search", endpoint = %endpoint)
    )]
    async fn search(&self, endpoint: SearchEndpoint, request: &SearchRequest) -> Result<SearchPage> {
        let path = endpoint.path();
        let fields = self.projected_fields(&request.extra_fields);
        let max_results = request.max_results.min(defaults::PAGE_SIZE_MAX);

        let req = self.build_request(Method::POST, path);
        let req = match endpoint {
            SearchEndpoint::Modern => req.json(&TokenSearchRequest {
                jql: &request.filter,
                max_results,
                fields,
                next_page_token: request.next_page_token.as_deref(),
            }),
            SearchEndpoint::Legacy | SearchEndpoint::Oldest => req.json(&OffsetSearchRequest {
                jql: &request.filter,
                start_at: request.start_at,
                max_results,
                fields,
            }),
        };

        let response = self.send(path, req).await?;
        let page = self.into_page(Self::parse(path, response).await?);
        debug!(
            result_count = page.records.len(),
            total = ?page.total,
            "Search page received"
        );
        Ok(page)
    }

    #[instrument(
        skip(self, endpoint, filter),
        fields(subsystem = subsystem::CLIENT, component = component::TRACKER, op = "count", endpoint = %endpoint)
    )]
    async fn count(&self, endpoint: SearchEndpoint, filter: &str) -> Result<u64> {
        let jql = strip_order_by(filter);
        match endpoint {
            SearchEndpoint::Modern => {
                let req = self
                    .build_request(Method::POST, COUNT_PATH)
                    .json(&CountRequest { jql });
                let response = self.send(COUNT_PATH, req).await?;
                let count: CountResponse = Self::parse(COUNT_PATH, response).await?;
                Ok(count.count)
            }
            SearchEndpoint::Legacy | SearchEndpoint::Oldest => {
                let path = endpoint.path();
                let req = self
                    .build_request(Method::POST, path)
                    .json(&OffsetSearchRequest {
                        jql,
                        start_at: 0,
                        max_results: 0,
                        fields: Vec::new(),
                    });
                let response = self.send(path, req).await?;
                let page: SearchResponse = Self::parse(path, response).await?;
                page.total.ok_or_else(|| {
                    Error::Serialization(format!("{} response carried no total", path))
                })
            }
        }
    }

    #[instrument(skip(self), fields(subsystem = subsystem::CLIENT, component = component::TRACKER, op = "get_record"))]
    async fn get_record(&self, key: &str) -> Result<Option<Record>> {
        let path = format!("{}/{}", ISSUE_PATH, key);
        let fields = self.projected_fields(&[]).join(",");
        let req = self
            .build_request(Method::GET, &path)
            .query(&[("fields", fields.as_str())]);

        match self.send(&path, req).await {
            Ok(response) => {
                let issue: IssueDto = Self::parse(&path, response).await?;
                Ok(Some(issue.into_record(&self.field_ids())))
            }
            Err(Error::EndpointUnsupported { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(subsystem = subsystem::CLIENT, component = component::TRACKER, op = "search_users"))]
    async fn search_users(&self, query: &str) -> Result<Vec<DirectoryUser>> {
        let limit = self.user_limit.to_string();
        // An empty query lists the whole directory.
        let (path, req) = if query.trim().is_empty() {
            let req = self
                .build_request(Method::GET, USER_LIST_PATH)
                .query(&[("startAt", "0"), ("maxResults", limit.as_str())]);
            (USER_LIST_PATH, req)
        } else {
            let req = self
                .build_request(Method::GET, USER_SEARCH_PATH)
                .query(&[("query", query.trim()), ("maxResults", limit.as_str())]);
            (USER_SEARCH_PATH, req)
        };
        let response = self.send(path, req).await?;
        let users: Vec<UserDto> = Self::parse(path, response).await?;

        let users: Vec<DirectoryUser> = users
            .into_iter()
            .filter(UserDto::is_person)
            .take(self.user_limit)
            .map(DirectoryUser::from)
            .collect();
        debug!(result_count = users.len(), "Users loaded");
        Ok(users)
    }

    #[instrument(skip(self), fields(subsystem = subsystem::CLIENT, component = component::TRACKER, op = "list_projects"))]
    async fn list_projects(&self) -> Result<Vec<ProjectInfo>> {
        let mut projects = Vec::new();
        let mut start_at = 0u32;
        loop {
            let req = self.build_request(Method::GET, PROJECT_SEARCH_PATH).query(&[
                ("startAt", start_at.to_string()),
                ("maxResults", PROJECT_PAGE_SIZE.to_string()),
            ]);
            let response = self.send(PROJECT_SEARCH_PATH, req).await?;
            let page: ProjectPage = Self::parse(PROJECT_SEARCH_PATH, response).await?;
            let received = page.values.len() as u32;
            projects.extend(page.values.into_iter().map(ProjectInfo::from));

            if received == 0 || page.is_last.unwrap_or(received < PROJECT_PAGE_SIZE) {
                break;
            }
            start_at += received;
        }
        debug!(result_count = projects.len(), "Projects loaded");
        Ok(projects)
    }

    #[instrument(skip(self), fields(subsystem = subsystem::CLIENT, component = component::TRACKER, op = "list_fields"))]
    async fn list_fields(&self) -> Result<Vec<FieldMeta>> {
        let req = self.build_request(Method::GET, FIELD_PATH);
        let response = self.send(FIELD_PATH, req).await?;
        let fields: Vec<FieldDto> = Self::parse(FIELD_PATH, response).await?;
        Ok(fields.into_iter().map(FieldMeta::from).collect())
    }
}
