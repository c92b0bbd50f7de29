//! Promotion eligibility evaluation.
//!
//! Combines the resolved rule values for a record's context with the
//! record's academic snapshot. Every failed check lands in the verdict's
//! reason list so the caller can present a complete explanation and an
//! override approval records the full justification trail.

use chrono::{DateTime, Utc};
use serde::Serialize;

use acadra_core::rule_value::RuleValue;
use acadra_core::EngineError;

use super::models::{AttendanceStatus, ResultStatus, StudentAcademicRecord};
use super::repository::RuleRepository;
use super::resolver::{ResolutionContext, RuleResolver};

/// Rule codes the evaluator consumes. Seeded as catalog defaults at startup;
/// institutions reconfigure them per scope.
pub mod rule_codes {
    /// Minimum attendance percentage for promotion (decimal).
    pub const ATTENDANCE_MIN_PERCENT: &str = "ATTENDANCE_MIN_PERCENT";
    /// Maximum backlog subjects carryable under ATKT (integer).
    pub const ATKT_MAX_SUBJECTS: &str = "ATKT_MAX_SUBJECTS";
    /// Whether fee clearance is mandatory for promotion (boolean).
    pub const FEE_CLEARANCE_REQUIRED: &str = "FEE_CLEARANCE_REQUIRED";
    /// Result statuses accepted as a straight pass (array).
    pub const PASS_RESULT_STATUSES: &str = "PASS_RESULT_STATUSES";
}

const DEFAULT_ATTENDANCE_MIN: f64 = 75.0;
const DEFAULT_ATKT_CEILING: i64 = 4;
const DEFAULT_FEE_REQUIRED: bool = true;

/// Outcome of an eligibility evaluation.
#[derive(Clone, Debug, Serialize)]
pub struct EligibilityVerdict {
    pub eligible: bool,
    /// Promotable only under ATKT (backlogs carried forward).
    pub conditional: bool,
    pub reasons: Vec<String>,
}

impl EligibilityVerdict {
    pub fn eligible() -> Self {
        Self {
            eligible: true,
            conditional: false,
            reasons: Vec::new(),
        }
    }
}

/// Evaluates a student record against the resolved rules of its context.
pub struct EligibilityEvaluator<R: RuleRepository> {
    resolver: RuleResolver<R>,
}

impl<R: RuleRepository> EligibilityEvaluator<R> {
    pub fn new(resolver: RuleResolver<R>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &RuleResolver<R> {
        &self.resolver
    }

    /// Pure evaluation; never mutates the record.
    pub fn evaluate(
        &self,
        record: &StudentAcademicRecord,
        as_of: DateTime<Utc>,
    ) -> Result<EligibilityVerdict, EngineError> {
        let context = ResolutionContext::new()
            .with_session(record.academic_session_id.clone())
            .with_program(record.program_id.clone());

        let attendance_min = self
            .resolver
            .resolve_with_default(
                rule_codes::ATTENDANCE_MIN_PERCENT,
                as_of,
                &context,
                RuleValue::Decimal(DEFAULT_ATTENDANCE_MIN),
            )?
            .as_f64()
            .ok_or_else(|| {
                EngineError::RuleValue(format!(
                    "{} must resolve to a numeric value",
                    rule_codes::ATTENDANCE_MIN_PERCENT
                ))
            })?;
        let atkt_ceiling = self
            .resolver
            .resolve_with_default(
                rule_codes::ATKT_MAX_SUBJECTS,
                as_of,
                &context,
                RuleValue::Int(DEFAULT_ATKT_CEILING),
            )?
            .as_i64()
            .ok_or_else(|| {
                EngineError::RuleValue(format!(
                    "{} must resolve to an integer",
                    rule_codes::ATKT_MAX_SUBJECTS
                ))
            })?;
        let fee_required = self
            .resolver
            .resolve_with_default(
                rule_codes::FEE_CLEARANCE_REQUIRED,
                as_of,
                &context,
                RuleValue::Bool(DEFAULT_FEE_REQUIRED),
            )?
            .as_bool()
            .ok_or_else(|| {
                EngineError::RuleValue(format!(
                    "{} must resolve to a boolean",
                    rule_codes::FEE_CLEARANCE_REQUIRED
                ))
            })?;
        let pass_statuses = match self.resolver.resolve_with_default(
            rule_codes::PASS_RESULT_STATUSES,
            as_of,
            &context,
            RuleValue::StringArray(vec!["pass".into(), "completed".into()]),
        )? {
            RuleValue::StringArray(items) => items,
            _ => {
                return Err(EngineError::RuleValue(format!(
                    "{} must resolve to a string array",
                    rule_codes::PASS_RESULT_STATUSES
                )))
            }
        };

        let mut reasons = Vec::new();
        let mut conditional = false;
        let backlogs = i64::from(record.backlog_count);

        if record.attendance_status == AttendanceStatus::NotEligible {
            reasons.push(format!(
                "attendance {:.1}% is below the required minimum of {:.1}%",
                record.attendance_percentage, attendance_min
            ));
        }

        if fee_required && !record.fee_cleared {
            reasons.push(format!(
                "fees are not cleared (outstanding amount {:.2})",
                record.outstanding_amount
            ));
        }

        match record.result_status {
            ResultStatus::Fail => {
                if backlogs > atkt_ceiling {
                    reasons.push(format!(
                        "result status 'fail' with {} backlogs exceeds the ATKT limit of {}",
                        record.backlog_count, atkt_ceiling
                    ));
                } else {
                    reasons.push("result status 'fail' is not promotable".to_string());
                }
            }
            ResultStatus::Atkt => {
                if backlogs > atkt_ceiling {
                    reasons.push(format!(
                        "{} backlogs exceed the ATKT limit of {}",
                        record.backlog_count, atkt_ceiling
                    ));
                } else if record.current_atkt_attempt >= record.max_atkt_attempts {
                    reasons.push(format!(
                        "ATKT attempt limit reached ({} of {})",
                        record.current_atkt_attempt, record.max_atkt_attempts
                    ));
                } else {
                    conditional = true;
                }
            }
            other => {
                if !pass_statuses.iter().any(|s| s == other.as_str()) {
                    reasons.push(format!(
                        "result status '{}' is not promotable",
                        other.as_str()
                    ));
                }
            }
        }

        let eligible = reasons.is_empty();
        Ok(EligibilityVerdict {
            eligible,
            conditional: conditional && eligible,
            reasons,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use acadra_core::rule_value::{RuleConstraints, ValueType};

    use super::super::models::{
        AcademicRule, NewAcademicRule, NewRuleConfiguration, PromotionStatus, RuleCategory,
        RuleConfiguration, RuleFilter,
    };
    use super::super::resolver::ResolverCache;
    use super::*;

    struct FakeRuleRepository {
        rules: Vec<AcademicRule>,
    }

    impl RuleRepository for FakeRuleRepository {
        fn get_rule(&self, rule_code: &str) -> Result<Option<AcademicRule>, EngineError> {
            Ok(self.rules.iter().find(|r| r.rule_code == rule_code).cloned())
        }

        fn list_rules(&self, _filter: &RuleFilter) -> Result<Vec<AcademicRule>, EngineError> {
            Ok(self.rules.clone())
        }

        fn create_rule(&self, _rule: &NewAcademicRule) -> Result<AcademicRule, EngineError> {
            Err(EngineError::Internal("not supported by fake".into()))
        }

        fn soft_delete_rule(&self, _rule_code: &str) -> Result<(), EngineError> {
            Ok(())
        }

        fn active_configurations(
            &self,
            _rule_code: &str,
            _as_of: DateTime<Utc>,
        ) -> Result<Vec<RuleConfiguration>, EngineError> {
            Ok(Vec::new())
        }

        fn configurations_with_deleted(
            &self,
            _rule_code: &str,
        ) -> Result<Vec<RuleConfiguration>, EngineError> {
            Ok(Vec::new())
        }

        fn insert_configuration(
            &self,
            _config: &NewRuleConfiguration,
        ) -> Result<RuleConfiguration, EngineError> {
            Err(EngineError::Internal("not supported by fake".into()))
        }

        fn approve_override(
            &self,
            _rule_code: &str,
            _configuration_id: &str,
            _approver: &str,
        ) -> Result<RuleConfiguration, EngineError> {
            Err(EngineError::Internal("not supported by fake".into()))
        }

        fn soft_delete_configuration(&self, _configuration_id: &str) -> Result<(), EngineError> {
            Ok(())
        }
    }

    fn decimal_rule(code: &str, value: &str) -> AcademicRule {
        let now = Utc::now();
        AcademicRule {
            rule_code: code.into(),
            name: code.into(),
            category: RuleCategory::Attendance,
            value_type: ValueType::Decimal,
            value: Some(value.into()),
            default_value: None,
            constraints: RuleConstraints::default(),
            effective_from: None,
            effective_to: None,
            is_active: true,
            is_mandatory: true,
            priority: 100,
            parent_rule_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn evaluator(rules: Vec<AcademicRule>) -> EligibilityEvaluator<FakeRuleRepository> {
        let resolver = RuleResolver::new(Arc::new(FakeRuleRepository { rules }), ResolverCache::new());
        EligibilityEvaluator::new(resolver)
    }

    fn record() -> StudentAcademicRecord {
        let now = Utc::now();
        StudentAcademicRecord {
            record_id: "rec-1".into(),
            student_id: "stu-1".into(),
            academic_session_id: "s1".into(),
            program_id: "p1".into(),
            academic_year: "FY".into(),
            division_id: None,
            result_status: ResultStatus::Pass,
            promotion_status: PromotionStatus::NotEligible,
            backlog_count: 0,
            max_atkt_attempts: 2,
            current_atkt_attempt: 0,
            attendance_percentage: 82.0,
            attendance_status: AttendanceStatus::Eligible,
            fee_cleared: true,
            outstanding_amount: 0.0,
            is_locked: false,
            locked_at: None,
            locked_by: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn clean_pass_is_eligible() {
        let verdict = evaluator(vec![]).evaluate(&record(), Utc::now()).unwrap();
        assert!(verdict.eligible);
        assert!(!verdict.conditional);
        assert!(verdict.reasons.is_empty());
    }

    #[test]
    fn low_attendance_blocks_with_attendance_reason() {
        let mut rec = record();
        rec.attendance_percentage = 70.0;
        rec.attendance_status = AttendanceStatus::NotEligible;
        let verdict = evaluator(vec![decimal_rule(rule_codes::ATTENDANCE_MIN_PERCENT, "75")])
            .evaluate(&rec, Utc::now())
            .unwrap();
        assert!(!verdict.eligible);
        assert!(verdict.reasons.iter().any(|r| r.contains("attendance")));
        assert!(verdict.reasons.iter().any(|r| r.contains("75.0")));
    }

    #[test]
    fn condonable_attendance_does_not_block() {
        let mut rec = record();
        rec.attendance_percentage = 72.0;
        rec.attendance_status = AttendanceStatus::Condonable;
        let verdict = evaluator(vec![]).evaluate(&rec, Utc::now()).unwrap();
        assert!(verdict.eligible);
    }

    #[test]
    fn atkt_within_ceiling_is_conditional() {
        let mut rec = record();
        rec.result_status = ResultStatus::Atkt;
        rec.backlog_count = 2;
        let verdict = evaluator(vec![]).evaluate(&rec, Utc::now()).unwrap();
        assert!(verdict.eligible);
        assert!(verdict.conditional);
    }

    #[test]
    fn atkt_over_ceiling_is_rejected() {
        let mut rec = record();
        rec.result_status = ResultStatus::Atkt;
        rec.backlog_count = 6;
        let verdict = evaluator(vec![]).evaluate(&rec, Utc::now()).unwrap();
        assert!(!verdict.eligible);
        assert!(verdict.reasons.iter().any(|r| r.contains("ATKT limit")));
    }

    #[test]
    fn exhausted_atkt_attempts_are_rejected() {
        let mut rec = record();
        rec.result_status = ResultStatus::Atkt;
        rec.backlog_count = 1;
        rec.current_atkt_attempt = 2;
        rec.max_atkt_attempts = 2;
        let verdict = evaluator(vec![]).evaluate(&rec, Utc::now()).unwrap();
        assert!(!verdict.eligible);
        assert!(verdict.reasons.iter().any(|r| r.contains("attempt limit")));
    }

    #[test]
    fn every_failed_check_is_enumerated() {
        let mut rec = record();
        rec.result_status = ResultStatus::Fail;
        rec.backlog_count = 7;
        rec.attendance_status = AttendanceStatus::NotEligible;
        rec.attendance_percentage = 40.0;
        rec.fee_cleared = false;
        rec.outstanding_amount = 1200.0;
        let verdict = evaluator(vec![]).evaluate(&rec, Utc::now()).unwrap();
        assert!(!verdict.eligible);
        assert_eq!(verdict.reasons.len(), 3);
    }

    #[test]
    fn fee_clearance_requirement_can_be_switched_off() {
        let now = Utc::now();
        let mut fee_rule = decimal_rule(rule_codes::FEE_CLEARANCE_REQUIRED, "false");
        fee_rule.value_type = ValueType::Boolean;
        fee_rule.category = RuleCategory::Fee;
        let mut rec = record();
        rec.fee_cleared = false;
        rec.outstanding_amount = 900.0;
        let verdict = evaluator(vec![fee_rule]).evaluate(&rec, now).unwrap();
        assert!(verdict.eligible);
    }
}
