//! Rule catalog, configuration scoping, and resolution against the SQLite
//! store.

use std::sync::Arc;

use chrono::{Duration, Utc};

use acadra_core::rule_value::{RuleConstraints, RuleValue, ValueType};
use acadra_core::EngineError;
use acadra_engine::{
    seed_default_rules, AcademicSession, NewAcademicRule, NewRuleConfiguration, ResolutionContext,
    ResolverCache, RuleCategory, RuleFilter, RuleRepository, RuleResolver, SessionRepository,
    SqliteAcademicStore,
};

fn store() -> Arc<SqliteAcademicStore> {
    let store = SqliteAcademicStore::in_memory().expect("open in-memory store");
    seed_default_rules(&store).expect("seed rule catalog");
    Arc::new(store)
}

fn resolver(store: &Arc<SqliteAcademicStore>) -> RuleResolver<SqliteAcademicStore> {
    RuleResolver::new(store.clone(), ResolverCache::new())
}

fn configuration(
    rule_code: &str,
    value: &str,
    session: Option<&str>,
    program: Option<&str>,
    department: Option<&str>,
) -> NewRuleConfiguration {
    NewRuleConfiguration {
        rule_code: rule_code.to_string(),
        academic_session_id: session.map(str::to_string),
        program_id: program.map(str::to_string),
        department_id: department.map(str::to_string),
        value: value.to_string(),
        is_override: false,
        override_reason: None,
        effective_from: None,
        effective_to: None,
    }
}

#[test]
fn specificity_ordering_across_scopes() {
    let store = store();
    let resolver = resolver(&store);
    store
        .insert_configuration(&configuration("ATTENDANCE_MIN_PERCENT", "70", Some("s1"), None, None))
        .expect("session config");
    store
        .insert_configuration(&configuration(
            "ATTENDANCE_MIN_PERCENT",
            "65",
            Some("s1"),
            Some("p1"),
            Some("d1"),
        ))
        .expect("full-scope config");

    let now = Utc::now();
    let full = ResolutionContext::new()
        .with_session("s1")
        .with_program("p1")
        .with_department("d1");
    assert_eq!(
        resolver.resolve("ATTENDANCE_MIN_PERCENT", now, &full).expect("resolve full"),
        RuleValue::Decimal(65.0)
    );

    let session_only = ResolutionContext::new().with_session("s1");
    assert_eq!(
        resolver
            .resolve("ATTENDANCE_MIN_PERCENT", now, &session_only)
            .expect("resolve session"),
        RuleValue::Decimal(70.0)
    );

    // No context: only the seeded catalog value applies.
    assert_eq!(
        resolver
            .resolve("ATTENDANCE_MIN_PERCENT", now, &ResolutionContext::new())
            .expect("resolve global"),
        RuleValue::Decimal(75.0)
    );
}

#[test]
fn duplicate_active_scope_is_a_conflict() {
    let store = store();
    store
        .insert_configuration(&configuration("ATKT_MAX_SUBJECTS", "3", Some("s1"), None, None))
        .expect("first config");
    let err = store
        .insert_configuration(&configuration("ATKT_MAX_SUBJECTS", "5", Some("s1"), None, None))
        .expect_err("same scope must conflict");
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[test]
fn soft_deleted_configuration_stops_resolving_but_stays_in_history() {
    let store = store();
    let resolver = resolver(&store);
    let config = store
        .insert_configuration(&configuration("ATKT_MAX_SUBJECTS", "2", Some("s1"), None, None))
        .expect("config");

    let now = Utc::now();
    let ctx = ResolutionContext::new().with_session("s1");
    assert_eq!(
        resolver.resolve("ATKT_MAX_SUBJECTS", now, &ctx).expect("resolve"),
        RuleValue::Int(2)
    );

    store
        .soft_delete_configuration(&config.configuration_id)
        .expect("soft delete");
    resolver.cache().invalidate_rule("ATKT_MAX_SUBJECTS");
    assert_eq!(
        resolver.resolve("ATKT_MAX_SUBJECTS", now, &ctx).expect("resolve after delete"),
        RuleValue::Int(4)
    );

    let history = store
        .configurations_with_deleted("ATKT_MAX_SUBJECTS")
        .expect("history");
    assert_eq!(history.len(), 1);
    assert!(history[0].deleted_at.is_some());

    // The freed scope accepts a replacement configuration.
    store
        .insert_configuration(&configuration("ATKT_MAX_SUBJECTS", "6", Some("s1"), None, None))
        .expect("replacement config");
}

#[test]
fn override_takes_effect_only_after_approval() {
    let store = store();
    let resolver = resolver(&store);
    let mut pending = configuration("FEE_CLEARANCE_REQUIRED", "false", Some("s1"), None, None);
    pending.is_override = true;
    pending.override_reason = Some("strike-period fee waiver".to_string());
    let config = store.insert_configuration(&pending).expect("insert override");

    let now = Utc::now();
    let ctx = ResolutionContext::new().with_session("s1");
    assert_eq!(
        resolver
            .resolve("FEE_CLEARANCE_REQUIRED", now, &ctx)
            .expect("resolve before approval"),
        RuleValue::Bool(true)
    );

    let approved = store
        .approve_override("FEE_CLEARANCE_REQUIRED", &config.configuration_id, "principal-1")
        .expect("approve");
    assert_eq!(approved.override_approved_by.as_deref(), Some("principal-1"));

    resolver.cache().invalidate_rule("FEE_CLEARANCE_REQUIRED");
    assert_eq!(
        resolver
            .resolve("FEE_CLEARANCE_REQUIRED", now, &ctx)
            .expect("resolve after approval"),
        RuleValue::Bool(false)
    );

    // Approval is one-shot; a plain configuration cannot be approved at all.
    assert!(matches!(
        store.approve_override("FEE_CLEARANCE_REQUIRED", &config.configuration_id, "principal-2"),
        Err(EngineError::Conflict(_))
    ));
    let plain = store
        .insert_configuration(&configuration("ATKT_MAX_SUBJECTS", "5", Some("s9"), None, None))
        .expect("plain config");
    assert!(matches!(
        store.approve_override("ATKT_MAX_SUBJECTS", &plain.configuration_id, "principal-1"),
        Err(EngineError::InvalidState(_))
    ));
}

#[test]
fn expired_configurations_are_filtered_by_the_store() {
    let store = store();
    let resolver = resolver(&store);
    let now = Utc::now();
    let mut expired = configuration("ATTENDANCE_MIN_PERCENT", "50", Some("s1"), None, None);
    expired.effective_from = Some(now - Duration::days(30));
    expired.effective_to = Some(now - Duration::days(1));
    store.insert_configuration(&expired).expect("expired config");

    let ctx = ResolutionContext::new().with_session("s1");
    assert_eq!(
        resolver.resolve("ATTENDANCE_MIN_PERCENT", now, &ctx).expect("resolve"),
        RuleValue::Decimal(75.0)
    );
    // As of a date inside the window, the same configuration wins.
    assert_eq!(
        resolver
            .resolve("ATTENDANCE_MIN_PERCENT", now - Duration::days(10), &ctx)
            .expect("resolve in window"),
        RuleValue::Decimal(50.0)
    );
}

#[test]
fn configured_values_are_checked_against_rule_constraints() {
    let store = store();
    let err = store
        .insert_configuration(&configuration("ATTENDANCE_MIN_PERCENT", "140", Some("s1"), None, None))
        .expect_err("out-of-bounds value must fail");
    assert!(matches!(err, EngineError::RuleValue(_)));

    let err = store
        .insert_configuration(&configuration("ATKT_MAX_SUBJECTS", "many", Some("s1"), None, None))
        .expect_err("non-integer value must fail");
    assert!(matches!(err, EngineError::RuleValue(_)));
}

#[test]
fn rule_catalog_listing_and_soft_delete() {
    let store = store();
    store
        .create_rule(&NewAcademicRule {
            rule_code: "GRACE_MARKS_LIMIT".to_string(),
            name: "Grace marks limit".to_string(),
            category: RuleCategory::Examination,
            value_type: ValueType::Integer,
            value: Some("5".to_string()),
            default_value: Some("3".to_string()),
            constraints: RuleConstraints {
                min_value: Some(0.0),
                max_value: Some(10.0),
                ..Default::default()
            },
            effective_from: None,
            effective_to: None,
            is_active: true,
            is_mandatory: false,
            priority: 100,
            parent_rule_id: None,
        })
        .expect("create rule");

    let listed = store
        .list_rules(&RuleFilter {
            category: Some(RuleCategory::Examination),
            active: Some(true),
            search: None,
            limit: 10,
            offset: 0,
        })
        .expect("list rules");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].rule_code, "GRACE_MARKS_LIMIT");

    let searched = store
        .list_rules(&RuleFilter {
            category: None,
            active: None,
            search: Some("attendance".to_string()),
            limit: 10,
            offset: 0,
        })
        .expect("search rules");
    assert_eq!(searched.len(), 1);
    assert_eq!(searched[0].rule_code, "ATTENDANCE_MIN_PERCENT");

    store.soft_delete_rule("GRACE_MARKS_LIMIT").expect("soft delete");
    assert!(store.get_rule("GRACE_MARKS_LIMIT").expect("get").is_none());
    assert!(matches!(
        store.soft_delete_rule("GRACE_MARKS_LIMIT"),
        Err(EngineError::NotFound(_))
    ));
}

#[test]
fn duplicate_rule_code_is_a_conflict() {
    let store = store();
    let rule = NewAcademicRule {
        rule_code: "ATTENDANCE_MIN_PERCENT".to_string(),
        name: "Duplicate".to_string(),
        category: RuleCategory::Attendance,
        value_type: ValueType::Decimal,
        value: Some("80".to_string()),
        default_value: None,
        constraints: RuleConstraints::default(),
        effective_from: None,
        effective_to: None,
        is_active: true,
        is_mandatory: false,
        priority: 100,
        parent_rule_id: None,
    };
    assert!(matches!(
        store.create_rule(&rule),
        Err(EngineError::Conflict(_))
    ));
}

#[test]
fn exactly_one_session_is_active_after_activation() {
    let store = store();
    let now = Utc::now();
    for (id, name) in [("2025-26", "AY 2025-26"), ("2026-27", "AY 2026-27")] {
        store
            .create_session(&AcademicSession {
                session_id: id.to_string(),
                name: name.to_string(),
                starts_on: now,
                ends_on: now + Duration::days(365),
                is_active: false,
            })
            .expect("create session");
    }

    let activated = store.activate_session("2025-26").expect("activate first");
    assert!(activated.is_active);

    let activated = store.activate_session("2026-27").expect("activate second");
    assert!(activated.is_active);
    let first = store
        .get_session("2025-26")
        .expect("get session")
        .expect("present");
    assert!(!first.is_active);

    assert!(matches!(
        store.activate_session("2099-00"),
        Err(EngineError::NotFound(_))
    ));
}
