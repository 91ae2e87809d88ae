//! Extraction → resolution → composition, end to end, without I/O.

use trackq_core::{DirectoryUser, ExtractedSlots, SlotKind, SlotValue};
use trackq_nlu::{
    compose, ExtractionContext, Resolution, Resolver, SlotExtractor, TemplateCorpus,
    TemplateMatcher,
};

fn users() -> Vec<DirectoryUser> {
    vec![
        DirectoryUser {
            account_id: "acc-ashwin-t".into(),
            display_name: "Ashwin Thyagarajan".into(),
            email: None,
            active: true,
        },
        DirectoryUser {
            account_id: "acc-priya".into(),
            display_name: "Priya Raman".into(),
            email: None,
            active: true,
        },
    ]
}

fn context() -> ExtractionContext {
    ExtractionContext::new().with_project_keys(["CCM", "OPS"])
}

/// Replace the assignee mention with its resolved account id.
fn resolve_assignee(slots: ExtractedSlots, users: &[DirectoryUser]) -> ExtractedSlots {
    let Some(mention) = slots.assignee.clone() else {
        return slots;
    };
    match Resolution::classify(Resolver::default().resolve(&mention.raw_text, users)) {
        Resolution::Unique(m) => slots.with_slot(
            SlotKind::Assignee,
            SlotValue::new(m.external_id.unwrap(), mention.raw_text, 1.0)
                .with_display(m.matched_name),
        ),
        other => panic!("expected a unique match, got {:?}", other),
    }
}

#[test]
fn test_scenario_a_open_stories_for_ashwin_in_ccm() {
    let query = "open stories for Ashwin in CCM";
    let slots = SlotExtractor::new().extract(query, &context());
    let matcher = TemplateMatcher::new(TemplateCorpus::builtin().unwrap());
    let template = matcher.match_template(query, &slots).unwrap().template;
    let slots = resolve_assignee(slots, &users());

    let composed = compose(template, &slots).unwrap();
    let filter = &composed.filter_expression;
    assert!(filter.contains("project = CCM"));
    assert!(filter.contains("issuetype = Story"));
    assert!(filter.contains("assignee = \"acc-ashwin-t\""));
    assert!(filter.contains("statusCategory != Done"));
    assert!(!filter.contains("${"));
    assert!(composed.response_template.contains("Ashwin Thyagarajan"));
    assert!(!composed.response_template.contains("acc-ashwin-t"));
}

#[test]
fn test_scenario_b_two_ashwins_is_ambiguous() {
    let mut directory = users();
    directory.push(DirectoryUser {
        account_id: "acc-ashwin-k".into(),
        display_name: "Ashwin Kumar".into(),
        email: None,
        active: true,
    });
    let slots = SlotExtractor::new().extract("stories by Ashwin", &context());
    let mention = slots.assignee.unwrap();
    match Resolution::classify(Resolver::default().resolve(&mention.raw_text, &directory)) {
        Resolution::Ambiguous(candidates) => {
            let mut names: Vec<_> = candidates.iter().map(|c| c.matched_name.as_str()).collect();
            names.sort_unstable();
            assert_eq!(names, vec!["Ashwin Kumar", "Ashwin Thyagarajan"]);
        }
        other => panic!("expected ambiguity, got {:?}", other),
    }
}

#[test]
fn test_every_builtin_template_composes_without_placeholders() {
    let corpus = TemplateCorpus::builtin().unwrap();
    let full = SlotKind::ALL.iter().fold(ExtractedSlots::default(), |acc, kind| {
        let value = match kind {
            SlotKind::Quantity => "5",
            SlotKind::Order => "created DESC",
            SlotKind::Sprint => "openSprints()",
            SlotKind::StatusCategory => "Open",
            SlotKind::DateRange => "-7d",
            _ => "value",
        };
        acc.with_slot(*kind, SlotValue::new(value, "raw", 0.9))
    });
    let partial = ExtractedSlots::default()
        .with_slot(SlotKind::Project, SlotValue::new("CCM", "CCM", 0.9))
        .with_slot(SlotKind::Sprint, SlotValue::new("openSprints()", "current sprint", 0.9))
        .with_slot(SlotKind::Version, SlotValue::new("2.4", "2.4", 0.9))
        .with_slot(SlotKind::Epic, SlotValue::new("CCM-1", "CCM-1", 0.9))
        .with_slot(SlotKind::FreeText, SlotValue::new("login", "login", 0.9));

    for template in &corpus.templates {
        for slots in [&full, &partial] {
            let composed = compose(template, slots).unwrap();
            assert!(!composed.filter_expression.contains("${"), "{}", template.id);
            assert!(!composed.filter_expression.contains("AND AND"), "{}", template.id);
            assert!(!composed.filter_expression.starts_with(" AND"), "{}", template.id);
            assert!(!composed.response_template.contains("${"), "{}", template.id);
            for fallback in &composed.fallbacks {
                assert!(!fallback.filter.contains("${"), "{}", template.id);
                assert_ne!(fallback.filter, composed.filter_expression);
            }
        }
    }
}

#[test]
fn test_pipeline_is_deterministic() {
    let matcher = TemplateMatcher::new(TemplateCorpus::builtin().unwrap());
    let run = |q: &str| {
        let slots = SlotExtractor::new().extract(q, &context());
        let m = matcher.match_template(q, &slots).map(|m| m.template.id.clone());
        let filter = m
            .as_deref()
            .and_then(|id| matcher.corpus().get(id))
            .and_then(|t| compose(t, &slots).ok())
            .map(|c| c.filter_expression);
        (slots, m, filter)
    };
    for q in [
        "open stories for Ashwin in CCM",
        "how many bugs in OPS",
        "blocked tasks in CCM",
        "status of the current sprint in CCM",
    ] {
        let first = run(q);
        for _ in 0..5 {
            assert_eq!(run(q), first);
        }
    }
}

#[test]
fn test_count_intent_selected_for_how_many() {
    let query = "how many bugs in OPS";
    let slots = SlotExtractor::new().extract(query, &context());
    let matcher = TemplateMatcher::new(TemplateCorpus::builtin().unwrap());
    let m = matcher.match_template(query, &slots).unwrap();
    assert_eq!(m.template.id, "count_items");
    let composed = compose(m.template, &slots).unwrap();
    assert_eq!(composed.filter_expression, "project = OPS AND issuetype = Bug");
}
