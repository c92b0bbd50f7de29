//! Default rule catalog.
//!
//! Seeds the rule codes the eligibility evaluator consumes, so a fresh store
//! resolves sensible institution-wide values before any administrator has
//! configured anything. Existing rules are left untouched.

use acadra_core::rule_value::{RuleConstraints, ValueType};
use acadra_core::EngineError;

use super::eligibility::rule_codes;
use super::models::{NewAcademicRule, RuleCategory};
use super::repository::RuleRepository;

pub fn seed_default_rules<R: RuleRepository>(store: &R) -> Result<usize, EngineError> {
    let defaults = [
        NewAcademicRule {
            rule_code: rule_codes::ATTENDANCE_MIN_PERCENT.to_string(),
            name: "Minimum attendance percentage".to_string(),
            category: RuleCategory::Attendance,
            value_type: ValueType::Decimal,
            value: Some("75".to_string()),
            default_value: Some("75".to_string()),
            constraints: RuleConstraints {
                min_value: Some(0.0),
                max_value: Some(100.0),
                ..Default::default()
            },
            effective_from: None,
            effective_to: None,
            is_active: true,
            is_mandatory: true,
            priority: 10,
            parent_rule_id: None,
        },
        NewAcademicRule {
            rule_code: rule_codes::ATKT_MAX_SUBJECTS.to_string(),
            name: "Maximum backlog subjects under ATKT".to_string(),
            category: RuleCategory::Atkt,
            value_type: ValueType::Integer,
            value: Some("4".to_string()),
            default_value: Some("4".to_string()),
            constraints: RuleConstraints {
                min_value: Some(0.0),
                max_value: Some(12.0),
                ..Default::default()
            },
            effective_from: None,
            effective_to: None,
            is_active: true,
            is_mandatory: true,
            priority: 20,
            parent_rule_id: None,
        },
        NewAcademicRule {
            rule_code: rule_codes::FEE_CLEARANCE_REQUIRED.to_string(),
            name: "Fee clearance required for promotion".to_string(),
            category: RuleCategory::Fee,
            value_type: ValueType::Boolean,
            value: Some("true".to_string()),
            default_value: Some("true".to_string()),
            constraints: RuleConstraints::default(),
            effective_from: None,
            effective_to: None,
            is_active: true,
            is_mandatory: true,
            priority: 30,
            parent_rule_id: None,
        },
        NewAcademicRule {
            rule_code: rule_codes::PASS_RESULT_STATUSES.to_string(),
            name: "Result statuses accepted as a pass".to_string(),
            category: RuleCategory::Result,
            value_type: ValueType::Array,
            value: Some(r#"["pass","completed"]"#.to_string()),
            default_value: Some(r#"["pass","completed"]"#.to_string()),
            constraints: RuleConstraints {
                allowed_values: Some(vec![
                    "prospect".to_string(),
                    "active".to_string(),
                    "exam_pending".to_string(),
                    "pass".to_string(),
                    "atkt".to_string(),
                    "completed".to_string(),
                ]),
                ..Default::default()
            },
            effective_from: None,
            effective_to: None,
            is_active: true,
            is_mandatory: false,
            priority: 40,
            parent_rule_id: None,
        },
    ];

    let mut seeded = 0;
    for rule in defaults {
        if store.get_rule(&rule.rule_code)?.is_none() {
            store.create_rule(&rule)?;
            seeded += 1;
        }
    }
    if seeded > 0 {
        log::info!("rule_catalog_seeded count={}", seeded);
    }
    Ok(seeded)
}
