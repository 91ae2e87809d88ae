//! Tracker REST API request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use trackq_core::{DirectoryUser, FieldMeta, PersonRef, ProjectInfo, ProjectRef, Record};

/// Fields requested on every search.
pub const STANDARD_FIELDS: &[&str] = &[
    "summary",
    "status",
    "assignee",
    "project",
    "issuetype",
    "priority",
    "created",
    "updated",
    "labels",
    "components",
];

// =============================================================================
// SEARCH TYPES
// =============================================================================

/// Request body for the token-paginated search endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSearchRequest<'a> {
    pub jql: &'a str,
    pub max_results: u32,
    pub fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<&'a str>,
}

/// Request body for the offset-paginated search endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OffsetSearchRequest<'a> {
    pub jql: &'a str,
    pub start_at: u32,
    pub max_results: u32,
    pub fields: Vec<String>,
}

/// Request body for the approximate-count endpoint.
#[derive(Debug, Serialize)]
pub struct CountRequest<'a> {
    pub jql: &'a str,
}

/// Response from the approximate-count endpoint.
#[derive(Debug, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

/// Response from any search endpoint. Token-paginated responses carry
/// `nextPageToken`/`isLast`; offset-paginated ones carry `total`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default)]
    pub issues: Vec<IssueDto>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub is_last: Option<bool>,
    #[serde(default)]
    pub warning_messages: Vec<String>,
}

/// A single issue as returned by the tracker.
#[derive(Debug, Deserialize)]
pub struct IssueDto {
    pub key: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

// =============================================================================
// CUSTOM FIELDS
// =============================================================================

/// Ids of custom fields that vary per deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldIds {
    pub story_points: Option<String>,
    pub sprint: Option<String>,
}

impl FieldIds {
    /// Discover custom field ids from field metadata by name.
    pub fn from_fields(fields: &[FieldMeta]) -> Self {
        let find = |names: &[&str]| {
            fields
                .iter()
                .filter(|f| f.custom)
                .find(|f| names.iter().any(|n| f.name.eq_ignore_ascii_case(n)))
                .map(|f| f.id.clone())
        };
        Self {
            story_points: find(&["Story Points", "Story point estimate"]),
            sprint: find(&["Sprint"]),
        }
    }

    /// Field ids to request in addition to the standard set.
    pub fn projected(&self) -> impl Iterator<Item = &str> {
        self.story_points
            .as_deref()
            .into_iter()
            .chain(self.sprint.as_deref())
    }
}

// =============================================================================
// RECORD MAPPING
// =============================================================================

fn name_of(value: Option<&Value>) -> Option<String> {
    value
        .and_then(|v| v.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn string_of(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

/// Parse tracker timestamps ("2024-03-01T10:15:30.000+0000" or RFC 3339).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Sprint field values are arrays of sprint objects; prefer the active one.
fn sprint_of(value: Option<&Value>) -> Option<String> {
    let sprints = value?.as_array()?;
    let active = sprints
        .iter()
        .find(|s| s.get("state").and_then(Value::as_str) == Some("active"));
    name_of(active.or_else(|| sprints.last()))
}

impl IssueDto {
    /// Flatten into a `Record`, reading custom fields through `ids`.
    pub fn into_record(self, ids: &FieldIds) -> Record {
        let f = &self.fields;
        let status = f.get("status");
        Record {
            key: self.key.clone(),
            summary: string_of(f.get("summary")).unwrap_or_default(),
            status: name_of(status).unwrap_or_default(),
            status_category: status.and_then(|s| name_of(s.get("statusCategory"))),
            assignee: f.get("assignee").filter(|v| !v.is_null()).map(|a| PersonRef {
                account_id: string_of(a.get("accountId")),
                display_name: string_of(a.get("displayName")).unwrap_or_default(),
            }),
            project: f.get("project").and_then(|p| {
                Some(ProjectRef {
                    key: string_of(p.get("key"))?,
                    name: string_of(p.get("name")).unwrap_or_default(),
                })
            }),
            issuetype: name_of(f.get("issuetype")),
            priority: name_of(f.get("priority")),
            created: string_of(f.get("created")).and_then(|s| parse_timestamp(&s)),
            updated: string_of(f.get("updated")).and_then(|s| parse_timestamp(&s)),
            story_points: ids
                .story_points
                .as_deref()
                .and_then(|id| f.get(id))
                .and_then(Value::as_f64),
            sprint: ids.sprint.as_deref().and_then(|id| sprint_of(f.get(id))),
            labels: f
                .get("labels")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(|l| l.as_str().map(str::to_string)).collect())
                .unwrap_or_default(),
            components: f
                .get("components")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(|c| name_of(Some(c))).collect())
                .unwrap_or_default(),
        }
    }
}

// =============================================================================
// DIRECTORY TYPES
// =============================================================================

/// A user from the user search endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub account_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub account_type: Option<String>,
}

fn default_active() -> bool {
    true
}

impl UserDto {
    /// App and bot accounts are not people.
    pub fn is_person(&self) -> bool {
        self.account_type
            .as_deref()
            .map_or(true, |t| t.eq_ignore_ascii_case("atlassian"))
    }
}

impl From<UserDto> for DirectoryUser {
    fn from(u: UserDto) -> Self {
        Self {
            account_id: u.account_id,
            display_name: u.display_name,
            email: u.email_address,
            active: u.active,
        }
    }
}

/// One page of the project search endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPage {
    #[serde(default)]
    pub values: Vec<ProjectDto>,
    #[serde(default)]
    pub is_last: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ProjectDto {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub name: String,
}

impl From<ProjectDto> for ProjectInfo {
    fn from(p: ProjectDto) -> Self {
        Self {
            id: p.id,
            key: p.key,
            name: p.name,
        }
    }
}

/// Field metadata entry.
#[derive(Debug, Deserialize)]
pub struct FieldDto {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub custom: bool,
    #[serde(default)]
    pub schema: Option<FieldSchema>,
}

#[derive(Debug, Deserialize)]
pub struct FieldSchema {
    #[serde(rename = "type", default)]
    pub schema_type: Option<String>,
}

impl From<FieldDto> for FieldMeta {
    fn from(f: FieldDto) -> Self {
        Self {
            id: f.id,
            name: f.name,
            custom: f.custom,
            schema_type: f.schema.and_then(|s| s.schema_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids() -> FieldIds {
        FieldIds {
            story_points: Some("customfield_10016".into()),
            sprint: Some("customfield_10020".into()),
        }
    }

    #[test]
    fn test_issue_maps_to_record() {
        let issue: IssueDto = serde_json::from_value(json!({
            "key": "CCM-283",
            "fields": {
                "summary": "Checkout times out",
                "status": {"name": "In Progress", "statusCategory": {"name": "In Progress"}},
                "assignee": {"accountId": "acc-1", "displayName": "Ashwin Thyagarajan"},
                "project": {"key": "CCM", "name": "Core Commerce"},
                "issuetype": {"name": "Story"},
                "priority": {"name": "High"},
                "created": "2024-03-01T10:15:30.000+0000",
                "updated": "2024-03-05T08:00:00.000+0000",
                "labels": ["checkout"],
                "components": [{"name": "payments"}],
                "customfield_10016": 5.0,
                "customfield_10020": [
                    {"name": "Sprint 11", "state": "closed"},
                    {"name": "Sprint 12", "state": "active"}
                ]
            }
        }))
        .unwrap();

        let record = issue.into_record(&ids());
        assert_eq!(record.key, "CCM-283");
        assert_eq!(record.status, "In Progress");
        assert_eq!(record.status_category.as_deref(), Some("In Progress"));
        assert_eq!(record.assignee.unwrap().account_id.as_deref(), Some("acc-1"));
        assert_eq!(record.project.unwrap().key, "CCM");
        assert_eq!(record.story_points, Some(5.0));
        assert_eq!(record.sprint.as_deref(), Some("Sprint 12"));
        assert_eq!(record.components, vec!["payments".to_string()]);
        assert!(record.updated.unwrap() > record.created.unwrap());
    }

    #[test]
    fn test_null_assignee_and_missing_custom_fields() {
        let issue: IssueDto = serde_json::from_value(json!({
            "key": "OPS-1",
            "fields": {"summary": "x", "assignee": null, "status": {"name": "To Do"}}
        }))
        .unwrap();
        let record = issue.into_record(&FieldIds::default());
        assert!(record.assignee.is_none());
        assert!(record.story_points.is_none());
        assert!(record.status_category.is_none());
    }

    #[test]
    fn test_field_ids_discovered_by_name() {
        let fields = vec![
            FieldMeta {
                id: "summary".into(),
                name: "Summary".into(),
                custom: false,
                schema_type: None,
            },
            FieldMeta {
                id: "customfield_10016".into(),
                name: "Story point estimate".into(),
                custom: true,
                schema_type: Some("number".into()),
            },
            FieldMeta {
                id: "customfield_10020".into(),
                name: "Sprint".into(),
                custom: true,
                schema_type: Some("array".into()),
            },
        ];
        assert_eq!(FieldIds::from_fields(&fields), ids());
        assert_eq!(ids().projected().count(), 2);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2024-03-01T10:15:30.000+0000").is_some());
        assert!(parse_timestamp("2024-03-01T10:15:30Z").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_app_accounts_are_not_people() {
        let bot: UserDto = serde_json::from_value(json!({
            "accountId": "bot", "displayName": "Automation", "accountType": "app"
        }))
        .unwrap();
        assert!(!bot.is_person());
        let human: UserDto =
            serde_json::from_value(json!({"accountId": "a", "displayName": "A"})).unwrap();
        assert!(human.is_person());
    }
}
