//! Result aggregation: breakdowns, story points, risk flags, samples.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use trackq_core::config::AggregationSettings;
use trackq_core::{AggregatedSummary, Record, ResolvedFilter, RiskFlag, SampleRecord};

const UNASSIGNED: &str = "Unassigned";
const UNKNOWN: &str = "Unknown";

/// Aggregation thresholds. `now` is explicit so summaries are reproducible.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateOptions {
    pub sample_size: usize,
    pub stale_days: i64,
    pub concentration_share: f64,
    pub concentration_min_records: usize,
    pub now: DateTime<Utc>,
}

impl AggregateOptions {
    pub fn from_settings(settings: &AggregationSettings, now: DateTime<Utc>) -> Self {
        Self {
            sample_size: settings.sample_size,
            stale_days: settings.stale_days,
            concentration_share: settings.concentration_share,
            concentration_min_records: settings.concentration_min_records,
            now,
        }
    }
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self::from_settings(&AggregationSettings::default(), Utc::now())
    }
}

fn is_blocked(record: &Record) -> bool {
    record.status.to_lowercase().contains("blocked")
        || record
            .labels
            .iter()
            .any(|l| l.eq_ignore_ascii_case("blocked"))
}

fn bump(map: &mut BTreeMap<String, usize>, key: &str) {
    *map.entry(key.to_string()).or_default() += 1;
}

/// Summarize `records`. An empty slice yields a zero summary.
pub fn aggregate(
    records: &[Record],
    filter: &ResolvedFilter,
    options: &AggregateOptions,
) -> AggregatedSummary {
    let mut summary = AggregatedSummary {
        total: records.len(),
        ..Default::default()
    };
    if records.is_empty() {
        return summary;
    }

    for r in records {
        bump(&mut summary.by_status, &r.status);
        bump(
            &mut summary.by_assignee,
            r.assignee.as_ref().map_or(UNASSIGNED, |a| a.display_name.as_str()),
        );
        bump(
            &mut summary.by_project,
            r.project.as_ref().map_or(UNKNOWN, |p| p.key.as_str()),
        );
        bump(&mut summary.by_type, r.issuetype.as_deref().unwrap_or(UNKNOWN));
    }

    let points: Vec<f64> = records.iter().filter_map(|r| r.story_points).collect();
    if !points.is_empty() {
        summary.total_points = Some(points.iter().sum());
    }

    summary.risk_flags = risk_flags(records, &summary, filter, options);

    let mut sorted: Vec<&Record> = records.iter().collect();
    sorted.sort_by(|a, b| {
        b.updated
            .cmp(&a.updated)
            .then_with(|| a.key.cmp(&b.key))
    });
    summary.sample_records = sorted
        .into_iter()
        .take(options.sample_size)
        .map(SampleRecord::from)
        .collect();

    summary
}

fn risk_flags(
    records: &[Record],
    summary: &AggregatedSummary,
    filter: &ResolvedFilter,
    options: &AggregateOptions,
) -> Vec<RiskFlag> {
    let mut flags = Vec::new();

    let mut stale: Vec<(i64, &str)> = records
        .iter()
        .filter(|r| r.is_open())
        .filter_map(|r| {
            let days = (options.now - r.updated?).num_days();
            (days > options.stale_days).then_some((days, r.key.as_str()))
        })
        .collect();
    stale.sort_by_key(|(days, key)| (Reverse(*days), *key));
    flags.extend(
        stale
            .into_iter()
            .take(options.sample_size.max(1))
            .map(|(days, key)| RiskFlag::Stale {
                key: key.to_string(),
                days,
            }),
    );

    // A filter pinned to one assignee is concentrated by construction.
    if filter.assignee.is_none() && records.len() >= options.concentration_min_records {
        let top = summary
            .by_assignee
            .iter()
            .filter(|(name, _)| name.as_str() != UNASSIGNED)
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)));
        if let Some((name, count)) = top {
            let share = *count as f64 / records.len() as f64;
            if share >= options.concentration_share {
                flags.push(RiskFlag::Concentration {
                    assignee: name.clone(),
                    share,
                });
            }
        }
    }

    let blocked = records.iter().filter(|r| is_blocked(r)).count();
    if blocked > 0 {
        flags.push(RiskFlag::Blocked { count: blocked });
    }

    if filter.assignee.is_none() {
        let unassigned = records
            .iter()
            .filter(|r| r.is_open() && r.assignee.is_none())
            .count();
        if unassigned > 0 {
            flags.push(RiskFlag::Unassigned { count: unassigned });
        }
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use trackq_core::{PersonRef, ResolvedEntity};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn options() -> AggregateOptions {
        AggregateOptions {
            sample_size: 3,
            stale_days: 14,
            concentration_share: 0.5,
            concentration_min_records: 4,
            now: now(),
        }
    }

    fn record(key: &str, status: &str, assignee: Option<&str>, days_ago: i64) -> Record {
        Record {
            key: key.into(),
            summary: format!("{} summary", key),
            status: status.into(),
            status_category: Some(
                if status == "Done" {
                    "Done".to_string()
                } else {
                    "In Progress".to_string()
                },
            ),
            assignee: assignee.map(|n| PersonRef {
                account_id: None,
                display_name: n.into(),
            }),
            project: None,
            issuetype: Some("Story".into()),
            priority: None,
            created: None,
            updated: Some(now() - Duration::days(days_ago)),
            story_points: None,
            sprint: None,
            labels: vec![],
            components: vec![],
        }
    }

    #[test]
    fn test_empty_input_is_zero_summary() {
        let s = aggregate(&[], &ResolvedFilter::default(), &options());
        assert_eq!(s.total, 0);
        assert!(s.risk_flags.is_empty());
        assert!(s.sample_records.is_empty());
        assert!(s.total_points.is_none());
    }

    #[test]
    fn test_breakdowns_and_points() {
        let mut a = record("A-1", "In Progress", Some("Priya"), 1);
        a.story_points = Some(3.0);
        let mut b = record("A-2", "Done", Some("Priya"), 2);
        b.story_points = Some(5.0);
        let c = record("A-3", "In Progress", None, 3);
        let s = aggregate(&[a, b, c], &ResolvedFilter::default(), &options());

        assert_eq!(s.total, 3);
        assert_eq!(s.by_status["In Progress"], 2);
        assert_eq!(s.by_assignee["Priya"], 2);
        assert_eq!(s.by_assignee[UNASSIGNED], 1);
        assert_eq!(s.by_project[UNKNOWN], 3);
        assert_eq!(s.total_points, Some(8.0));
    }

    #[test]
    fn test_stale_only_for_open_records() {
        let records = vec![
            record("A-1", "In Progress", Some("Priya"), 30),
            record("A-2", "Done", Some("Priya"), 60),
            record("A-3", "In Progress", Some("Priya"), 2),
        ];
        let s = aggregate(&records, &ResolvedFilter::default(), &options());
        let stale: Vec<_> = s
            .risk_flags
            .iter()
            .filter_map(|f| match f {
                RiskFlag::Stale { key, days } => Some((key.as_str(), *days)),
                _ => None,
            })
            .collect();
        assert_eq!(stale, vec![("A-1", 30)]);
    }

    #[test]
    fn test_concentration_flag() {
        let records = vec![
            record("A-1", "To Do", Some("Priya"), 1),
            record("A-2", "To Do", Some("Priya"), 1),
            record("A-3", "To Do", Some("Priya"), 1),
            record("A-4", "To Do", Some("Marco"), 1),
        ];
        let s = aggregate(&records, &ResolvedFilter::default(), &options());
        assert!(s.risk_flags.iter().any(|f| matches!(
            f,
            RiskFlag::Concentration { assignee, share } if assignee == "Priya" && (*share - 0.75).abs() < 1e-9
        )));

        let pinned = ResolvedFilter {
            assignee: Some(ResolvedEntity {
                id: None,
                name: "Priya".into(),
            }),
            ..Default::default()
        };
        let s = aggregate(&records, &pinned, &options());
        assert!(!s
            .risk_flags
            .iter()
            .any(|f| matches!(f, RiskFlag::Concentration { .. })));
    }

    #[test]
    fn test_blocked_and_unassigned() {
        let mut labelled = record("A-2", "In Progress", Some("Priya"), 1);
        labelled.labels = vec!["blocked".into()];
        let records = vec![
            record("A-1", "Blocked", None, 1),
            labelled,
            record("A-3", "Done", None, 1),
        ];
        let s = aggregate(&records, &ResolvedFilter::default(), &options());
        assert!(s.risk_flags.contains(&RiskFlag::Blocked { count: 2 }));
        assert!(s.risk_flags.contains(&RiskFlag::Unassigned { count: 1 }));
    }

    #[test]
    fn test_samples_most_recent_first() {
        let records = vec![
            record("A-1", "To Do", None, 5),
            record("A-2", "To Do", None, 1),
            record("A-3", "To Do", None, 3),
            record("A-4", "To Do", None, 9),
        ];
        let s = aggregate(&records, &ResolvedFilter::default(), &options());
        let keys: Vec<_> = s.sample_records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["A-2", "A-3", "A-1"]);
    }
}
