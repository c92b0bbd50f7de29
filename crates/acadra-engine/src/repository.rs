//! Storage contracts for rules, records, promotion audit, and transfers.
//!
//! Implementations back every engine decision, so their atomicity contract is
//! strict:
//! - `commit_promotion` must re-check the source record's lock state inside
//!   the same transaction that writes the new record and the log, so that
//!   concurrent promotions of one student serialize on the row, not on the
//!   engine.
//! - `rollback_promotion` must validate the log status and the produced
//!   record's lock state inside its transaction; it is the only path allowed
//!   to mutate a completed log or unlock a locked record.
//! - `create_transfer` must assign the TC number inside the insert
//!   transaction and surface a duplicate as a conflict, never as a silent
//!   reuse.
//! - Soft deletion is a `deleted_at` stamp; default reads exclude deleted
//!   rows and the `*_with_deleted` accessors include them for history reads.

use chrono::{DateTime, Utc};

use acadra_core::EngineError;

use super::models::{
    AcademicRule, AcademicSession, NewAcademicRule, NewRuleConfiguration, NewStudentAdmission,
    NewTransferRequest, PromotionLog, RecordSignals, RuleConfiguration, RuleFilter,
    StudentAcademicRecord, TransferRecord, TransferStatus,
};
use super::promotion::{PromotionOutcome, PromotionPlan};

/// Catalog of rule definitions and their scoped configurations.
pub trait RuleRepository: Send + Sync {
    fn get_rule(&self, rule_code: &str) -> Result<Option<AcademicRule>, EngineError>;

    fn list_rules(&self, filter: &RuleFilter) -> Result<Vec<AcademicRule>, EngineError>;

    /// Insert a new rule definition. Duplicate `rule_code` is a conflict.
    fn create_rule(&self, rule: &NewAcademicRule) -> Result<AcademicRule, EngineError>;

    /// Stamp `deleted_at` on a rule; historical resolution stays intact.
    fn soft_delete_rule(&self, rule_code: &str) -> Result<(), EngineError>;

    /// Active, non-deleted configurations for a rule whose effective interval
    /// contains `as_of`. Scope filtering and ranking happen in the resolver.
    fn active_configurations(
        &self,
        rule_code: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<RuleConfiguration>, EngineError>;

    /// Every configuration ever written for a rule, soft-deleted included.
    fn configurations_with_deleted(
        &self,
        rule_code: &str,
    ) -> Result<Vec<RuleConfiguration>, EngineError>;

    /// Insert a scoped configuration. A second active configuration for the
    /// same (rule, session, program, department) tuple is a conflict.
    fn insert_configuration(
        &self,
        config: &NewRuleConfiguration,
    ) -> Result<RuleConfiguration, EngineError>;

    /// Record override approval. Fails if the configuration is not an
    /// override or is already approved.
    fn approve_override(
        &self,
        rule_code: &str,
        configuration_id: &str,
        approver: &str,
    ) -> Result<RuleConfiguration, EngineError>;

    /// Stamp `deleted_at` on a configuration.
    fn soft_delete_configuration(&self, configuration_id: &str) -> Result<(), EngineError>;
}

/// Student academic records and the promotion audit trail.
pub trait PromotionRepository: Send + Sync {
    /// The student's most recent non-deleted record, locked or not. The
    /// caller decides whether a locked record is an error for its operation.
    fn current_record(&self, student_id: &str) -> Result<Option<StudentAcademicRecord>, EngineError>;

    fn record_by_id(&self, record_id: &str) -> Result<Option<StudentAcademicRecord>, EngineError>;

    /// Seed the session-1 record at admission. Duplicate
    /// (student, session) is a conflict.
    fn create_admission_record(
        &self,
        admission: &NewStudentAdmission,
    ) -> Result<StudentAcademicRecord, EngineError>;

    /// Apply externally owned signals (result, attendance, fees) onto the
    /// student's current record. Locked records reject the write.
    fn apply_academic_signals(
        &self,
        student_id: &str,
        signals: &RecordSignals,
    ) -> Result<StudentAcademicRecord, EngineError>;

    /// Atomically: verify the source record is still unlocked, create the
    /// target-session record, lock the source record with the decided
    /// promotion status, and append a completed log entry.
    fn commit_promotion(&self, plan: &PromotionPlan) -> Result<PromotionOutcome, EngineError>;

    /// Atomically reverse one completed promotion: soft-delete the record it
    /// produced, unlock the source record, restore its pre-decision promotion
    /// status, and move the log to rolled_back.
    fn rollback_promotion(&self, log_id: &str, actor: &str) -> Result<PromotionLog, EngineError>;

    fn promotion_log(&self, log_id: &str) -> Result<Option<PromotionLog>, EngineError>;

    fn promotion_history(&self, student_id: &str) -> Result<Vec<PromotionLog>, EngineError>;

    /// Terminal transition used when a transfer certificate is issued:
    /// atomically set the active record's result status to tc_issued, mark it
    /// transferred and locked, and append a tc_issued log entry with no
    /// successor record.
    fn mark_record_transferred(
        &self,
        student_id: &str,
        actor: &str,
    ) -> Result<StudentAcademicRecord, EngineError>;
}

/// Transfer certificate records.
pub trait TransferRepository: Send + Sync {
    fn transfer_by_id(&self, transfer_id: &str) -> Result<Option<TransferRecord>, EngineError>;

    /// The student's non-cancelled transfer, if any.
    fn active_transfer(&self, student_id: &str) -> Result<Option<TransferRecord>, EngineError>;

    /// Insert a pending transfer with a freshly assigned TC number. A second
    /// active transfer for the student is a conflict.
    fn create_transfer(&self, request: &NewTransferRequest) -> Result<TransferRecord, EngineError>;

    /// Guarded status transition; fails with an invalid-state error when the
    /// record is not in `expected_from`.
    fn transition_transfer(
        &self,
        transfer_id: &str,
        expected_from: &[TransferStatus],
        to: TransferStatus,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<TransferRecord, EngineError>;
}

/// Academic session catalog and the single-active invariant.
pub trait SessionRepository: Send + Sync {
    fn get_session(&self, session_id: &str) -> Result<Option<AcademicSession>, EngineError>;

    fn create_session(&self, session: &AcademicSession) -> Result<(), EngineError>;

    /// Activate one session and deactivate every other inside one
    /// transaction.
    fn activate_session(&self, session_id: &str) -> Result<AcademicSession, EngineError>;
}
