//! Promotion state machine.
//!
//! A promotion consumes the student's current record, locks it with the
//! decided status, creates the successor record in the target session, and
//! appends one completed audit log entry. The store performs those writes in
//! a single transaction; this engine owns the decision.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use acadra_core::EngineError;

use super::eligibility::{EligibilityEvaluator, EligibilityVerdict};
use super::models::{PromotionLog, PromotionType, StudentAcademicRecord};
use super::repository::{PromotionRepository, RuleRepository};
use super::resolver::{ResolverCache, RuleResolver};

/// Caller intent for a single promotion.
#[derive(Clone, Debug)]
pub struct PromoteCommand {
    pub student_id: String,
    pub to_session_id: String,
    pub to_program_id: String,
    pub to_academic_year: String,
    pub to_division_id: Option<String>,
    pub actor: String,
    pub actor_role: Option<String>,
    pub is_override: bool,
    pub override_reason: Option<String>,
    pub override_approved_by: Option<String>,
}

/// Fully decided promotion, handed to the store for the atomic write set.
#[derive(Clone, Debug)]
pub struct PromotionPlan {
    pub from_record: StudentAcademicRecord,
    pub to_session_id: String,
    pub to_program_id: String,
    pub to_academic_year: String,
    pub to_division_id: Option<String>,
    pub promotion_type: PromotionType,
    pub verdict: EligibilityVerdict,
    /// ATKT attempt counter carried onto the successor record.
    pub next_atkt_attempt: u32,
    /// Backlogs carried onto the successor record (conditional only).
    pub carry_backlogs: u32,
    pub actor: String,
    pub actor_role: Option<String>,
    pub is_override: bool,
    pub override_reason: Option<String>,
    pub override_approved_by: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Ids produced by a committed promotion.
#[derive(Clone, Debug, Serialize)]
pub struct PromotionOutcome {
    pub new_record_id: String,
    pub log_id: String,
    pub promotion_type: PromotionType,
}

/// Dry-run result; nothing is written.
#[derive(Clone, Debug, Serialize)]
pub struct PromotionPreview {
    pub student_id: String,
    pub from_session_id: String,
    pub to_session_id: String,
    pub promotion_type: PromotionType,
    pub verdict: EligibilityVerdict,
}

/// Per-student failure inside a bulk run.
#[derive(Clone, Debug, Serialize)]
pub struct BulkPromotionError {
    pub student_id: String,
    pub reason: String,
}

/// Aggregate accounting for a bulk promotion. Each student commits (or
/// fails) independently; one failure never rolls back another's success.
#[derive(Clone, Debug, Default, Serialize)]
pub struct BulkPromotionReport {
    pub total: usize,
    pub successful: usize,
    pub conditional: usize,
    pub failed: usize,
    pub errors: Vec<BulkPromotionError>,
}

impl BulkPromotionReport {
    pub fn is_partial(&self) -> bool {
        self.failed > 0 && self.successful > 0
    }
}

/// Orchestrates eligibility, single/bulk promotion, and rollback.
pub struct PromotionEngine<S: RuleRepository + PromotionRepository> {
    store: Arc<S>,
    evaluator: EligibilityEvaluator<S>,
}

impl<S: RuleRepository + PromotionRepository> PromotionEngine<S> {
    pub fn new(store: Arc<S>, cache: ResolverCache) -> Self {
        let evaluator = EligibilityEvaluator::new(RuleResolver::new(store.clone(), cache));
        Self { store, evaluator }
    }

    /// Pure evaluation of the student's current record; no mutation.
    pub fn check_eligibility(
        &self,
        student_id: &str,
    ) -> Result<(StudentAcademicRecord, EligibilityVerdict), EngineError> {
        let record = self.load_current(student_id)?;
        let verdict = self.evaluator.evaluate(&record, Utc::now())?;
        Ok((record, verdict))
    }

    /// Dry-run of `promote`: the verdict and the promotion type it would
    /// record, without requiring eligibility and without writing.
    pub fn preview(&self, command: &PromoteCommand) -> Result<PromotionPreview, EngineError> {
        let record = self.load_current(command.student_id.as_str())?;
        let verdict = self.evaluator.evaluate(&record, Utc::now())?;
        let promotion_type = decide_promotion_type(&record, command, &verdict);
        Ok(PromotionPreview {
            student_id: command.student_id.clone(),
            from_session_id: record.academic_session_id,
            to_session_id: command.to_session_id.clone(),
            promotion_type,
            verdict,
        })
    }

    /// Promote one student. Ineligible students fail unless the command
    /// carries an override with a non-empty reason; the override is recorded
    /// on the audit log either way.
    pub fn promote(&self, command: &PromoteCommand) -> Result<PromotionOutcome, EngineError> {
        let record = self.load_current(command.student_id.as_str())?;
        if record.is_locked {
            return Err(EngineError::LockedRecord(format!(
                "record '{}' is locked by a completed promotion",
                record.record_id
            )));
        }
        if command.to_session_id == record.academic_session_id {
            return Err(EngineError::Validation(
                "target session must differ from the student's current session".into(),
            ));
        }

        let now = Utc::now();
        let verdict = self.evaluator.evaluate(&record, now)?;
        if !verdict.eligible && !command.is_override {
            return Err(EngineError::NotEligible {
                reasons: verdict.reasons,
            });
        }
        if command.is_override
            && command
                .override_reason
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
        {
            return Err(EngineError::Validation(
                "an override promotion requires a non-empty override_reason".into(),
            ));
        }

        let promotion_type = decide_promotion_type(&record, command, &verdict);
        let next_atkt_attempt = if verdict.conditional {
            record.current_atkt_attempt + 1
        } else {
            record.current_atkt_attempt
        };
        let carry_backlogs = if verdict.conditional {
            record.backlog_count
        } else {
            0
        };

        let plan = PromotionPlan {
            from_record: record,
            to_session_id: command.to_session_id.clone(),
            to_program_id: command.to_program_id.clone(),
            to_academic_year: command.to_academic_year.clone(),
            to_division_id: command.to_division_id.clone(),
            promotion_type,
            verdict,
            next_atkt_attempt,
            carry_backlogs,
            actor: command.actor.clone(),
            actor_role: command.actor_role.clone(),
            is_override: command.is_override,
            override_reason: command.override_reason.clone(),
            override_approved_by: command.override_approved_by.clone(),
            decided_at: now,
        };
        let outcome = self.store.commit_promotion(&plan)?;
        log::info!(
            "promotion_committed student_id={} type={} log_id={} override={}",
            command.student_id,
            outcome.promotion_type.as_str(),
            outcome.log_id,
            command.is_override
        );
        Ok(outcome)
    }

    /// Promote a batch into one target. Every student runs through its own
    /// transaction; the report aggregates successes, conditional promotions,
    /// and per-student failures.
    #[allow(clippy::too_many_arguments)]
    pub fn bulk_promote(
        &self,
        student_ids: &[String],
        to_session_id: &str,
        to_program_id: &str,
        to_academic_year: &str,
        to_division_id: Option<&str>,
        actor: &str,
        actor_role: Option<&str>,
    ) -> Result<BulkPromotionReport, EngineError> {
        let mut report = BulkPromotionReport {
            total: student_ids.len(),
            ..Default::default()
        };
        for student_id in student_ids {
            let command = PromoteCommand {
                student_id: student_id.clone(),
                to_session_id: to_session_id.to_string(),
                to_program_id: to_program_id.to_string(),
                to_academic_year: to_academic_year.to_string(),
                to_division_id: to_division_id.map(str::to_string),
                actor: actor.to_string(),
                actor_role: actor_role.map(str::to_string),
                is_override: false,
                override_reason: None,
                override_approved_by: None,
            };
            match self.promote(&command) {
                Ok(outcome) => {
                    report.successful += 1;
                    if outcome.promotion_type == PromotionType::ConditionallyPromoted {
                        report.conditional += 1;
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    report.errors.push(BulkPromotionError {
                        student_id: student_id.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        log::info!(
            "bulk_promotion_finished total={} successful={} conditional={} failed={}",
            report.total,
            report.successful,
            report.conditional,
            report.failed
        );
        Ok(report)
    }

    /// Reverse one completed promotion. Only the most recent promotion of a
    /// student can be reversed; a successor promotion locks it in place.
    pub fn rollback(&self, log_id: &str, actor: &str) -> Result<PromotionLog, EngineError> {
        let log = self.store.rollback_promotion(log_id, actor)?;
        log::info!(
            "promotion_rolled_back log_id={} student_id={} actor={}",
            log.log_id,
            log.student_id,
            actor
        );
        Ok(log)
    }

    pub fn promotion_history(&self, student_id: &str) -> Result<Vec<PromotionLog>, EngineError> {
        self.store.promotion_history(student_id)
    }

    fn load_current(&self, student_id: &str) -> Result<StudentAcademicRecord, EngineError> {
        self.store.current_record(student_id)?.ok_or_else(|| {
            EngineError::NotFound(format!(
                "student '{}' has no active academic record",
                student_id
            ))
        })
    }
}

/// Conditional verdicts always record as conditionally promoted; repeating
/// the same year in the same program records as repeated; everything else is
/// a straight promotion.
fn decide_promotion_type(
    record: &StudentAcademicRecord,
    command: &PromoteCommand,
    verdict: &EligibilityVerdict,
) -> PromotionType {
    if verdict.conditional {
        PromotionType::ConditionallyPromoted
    } else if command.to_academic_year == record.academic_year
        && command.to_program_id == record.program_id
    {
        PromotionType::Repeated
    } else {
        PromotionType::Promoted
    }
}
