//! Re-check returned records against the entities the filter was built from.

use tracing::{debug, warn};

use trackq_core::{Record, ResolvedEntity, ResolvedFilter, ValidationNote};

/// Records that survived validation, plus what was dropped and why.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub records: Vec<Record>,
    pub note: ValidationNote,
    /// Every record failed validation, so the raw set was kept.
    pub mismatch: bool,
}

/// Case-insensitive equality or containment in either direction.
fn loosely_matches(actual: &str, expected: &str) -> bool {
    let a = actual.trim().to_lowercase();
    let e = expected.trim().to_lowercase();
    if a.is_empty() || e.is_empty() {
        return false;
    }
    a == e || a.contains(&e) || e.contains(&a)
}

fn assignee_matches(record: &Record, expected: &ResolvedEntity) -> bool {
    let Some(person) = &record.assignee else {
        return false;
    };
    match (&person.account_id, &expected.id) {
        (Some(actual), Some(wanted)) if actual == wanted => true,
        _ => loosely_matches(&person.display_name, &expected.name),
    }
}

/// Why `record` does not satisfy `filter`, if it doesn't.
fn mismatch_reason(record: &Record, filter: &ResolvedFilter) -> Option<String> {
    if let Some(expected) = &filter.assignee {
        if !assignee_matches(record, expected) {
            let actual = record
                .assignee
                .as_ref()
                .map_or("nobody", |a| a.display_name.as_str());
            return Some(format!(
                "{} is assigned to {}, not {}",
                record.key, actual, expected.name
            ));
        }
    }
    if let Some(expected) = &filter.project {
        let ok = record.project.as_ref().is_some_and(|p| {
            p.key.eq_ignore_ascii_case(expected) || loosely_matches(&p.name, expected)
        });
        if !ok {
            return Some(format!("{} is not in project {}", record.key, expected));
        }
    }
    if let Some(expected) = &filter.issuetype {
        let ok = record
            .issuetype
            .as_deref()
            .is_some_and(|t| loosely_matches(t, expected));
        if !ok {
            return Some(format!("{} is not a {}", record.key, expected));
        }
    }
    None
}

/// Drop records that disagree with `filter`.
///
/// When that would drop every record of a non-empty set, the raw set is
/// returned instead and `mismatch` is set.
pub fn validate(records: Vec<Record>, filter: &ResolvedFilter) -> ValidationReport {
    if filter.is_empty() || records.is_empty() {
        return ValidationReport {
            records,
            note: ValidationNote::default(),
            mismatch: false,
        };
    }

    let mut kept = Vec::with_capacity(records.len());
    let mut warnings = Vec::new();
    for record in &records {
        match mismatch_reason(record, filter) {
            Some(reason) => warnings.push(reason),
            None => kept.push(record.clone()),
        }
    }
    let dropped = records.len() - kept.len();

    if kept.is_empty() {
        warn!(
            records = records.len(),
            "Every record failed validation, keeping raw results"
        );
        return ValidationReport {
            records,
            note: ValidationNote {
                dropped: 0,
                used_raw_records: true,
                warnings,
            },
            mismatch: true,
        };
    }

    if dropped > 0 {
        debug!(dropped, kept = kept.len(), "Validation dropped records");
    }
    ValidationReport {
        records: kept,
        note: ValidationNote {
            dropped,
            used_raw_records: false,
            warnings,
        },
        mismatch: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackq_core::{PersonRef, ProjectRef};

    fn record(key: &str, assignee: Option<(&str, &str)>, project: &str, kind: &str) -> Record {
        Record {
            key: key.into(),
            summary: String::new(),
            status: "To Do".into(),
            status_category: None,
            assignee: assignee.map(|(id, name)| PersonRef {
                account_id: Some(id.into()),
                display_name: name.into(),
            }),
            project: Some(ProjectRef {
                key: project.into(),
                name: format!("{} project", project),
            }),
            issuetype: Some(kind.into()),
            priority: None,
            created: None,
            updated: None,
            story_points: None,
            sprint: None,
            labels: vec![],
            components: vec![],
        }
    }

    fn ashwin() -> ResolvedFilter {
        ResolvedFilter {
            assignee: Some(ResolvedEntity {
                id: Some("acc-ashwin-t".into()),
                name: "Ashwin Thyagarajan".into(),
            }),
            project: Some("CCM".into()),
            issuetype: None,
        }
    }

    #[test]
    fn test_matching_records_kept() {
        let records = vec![
            record("CCM-1", Some(("acc-ashwin-t", "Ashwin Thyagarajan")), "CCM", "Story"),
            record("CCM-2", Some(("other", "Ashwin T.")), "CCM", "Story"),
        ];
        let report = validate(records, &ashwin());
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.note.dropped, 1);
        assert!(!report.mismatch);
        assert!(report.note.warnings[0].contains("CCM-2"));
    }

    #[test]
    fn test_name_containment_counts_without_ids() {
        let mut r = record("CCM-3", None, "CCM", "Story");
        r.assignee = Some(PersonRef {
            account_id: None,
            display_name: "ashwin thyagarajan".into(),
        });
        assert!(validate(vec![r], &ashwin()).note.warnings.is_empty());
    }

    #[test]
    fn test_all_dropped_falls_back_to_raw() {
        let records = vec![
            record("OPS-1", Some(("x", "Someone Else")), "OPS", "Bug"),
            record("OPS-2", None, "OPS", "Bug"),
        ];
        let report = validate(records, &ashwin());
        assert!(report.mismatch);
        assert!(report.note.used_raw_records);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.note.warnings.len(), 2);
    }

    #[test]
    fn test_issuetype_checked_loosely() {
        let filter = ResolvedFilter {
            issuetype: Some("Bug".into()),
            ..Default::default()
        };
        let records = vec![
            record("A-1", None, "A", "Bug"),
            record("A-2", None, "A", "Story"),
        ];
        let report = validate(records, &filter);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].key, "A-1");
    }

    #[test]
    fn test_empty_filter_or_records_is_a_no_op() {
        let report = validate(vec![record("A-1", None, "A", "Bug")], &ResolvedFilter::default());
        assert_eq!(report.records.len(), 1);
        let report = validate(Vec::new(), &ashwin());
        assert!(report.records.is_empty());
        assert!(!report.mismatch);
    }
}
