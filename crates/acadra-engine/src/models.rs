//! Domain records for rules, student standing, promotion audit, and transfer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use acadra_core::identity::{
    ActorId, ConfigurationId, DepartmentId, DivisionId, LogId, ProgramId, RecordId, SessionId,
    StudentId, TransferId,
};
use acadra_core::rule_value::{RuleConstraints, ValueType};
use acadra_core::EngineError;

/// Functional grouping of an academic rule.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Result,
    Attendance,
    Promotion,
    Fee,
    Atkt,
    Examination,
    General,
}

impl RuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::Result => "result",
            RuleCategory::Attendance => "attendance",
            RuleCategory::Promotion => "promotion",
            RuleCategory::Fee => "fee",
            RuleCategory::Atkt => "atkt",
            RuleCategory::Examination => "examination",
            RuleCategory::General => "general",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EngineError> {
        match value {
            "result" => Ok(RuleCategory::Result),
            "attendance" => Ok(RuleCategory::Attendance),
            "promotion" => Ok(RuleCategory::Promotion),
            "fee" => Ok(RuleCategory::Fee),
            "atkt" => Ok(RuleCategory::Atkt),
            "examination" => Ok(RuleCategory::Examination),
            "general" => Ok(RuleCategory::General),
            other => Err(EngineError::Validation(format!(
                "unknown rule category '{}'",
                other
            ))),
        }
    }
}

/// Exam-result standing of a student in one session.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Prospect,
    Active,
    ExamPending,
    Pass,
    Atkt,
    Fail,
    TcIssued,
    Completed,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Prospect => "prospect",
            ResultStatus::Active => "active",
            ResultStatus::ExamPending => "exam_pending",
            ResultStatus::Pass => "pass",
            ResultStatus::Atkt => "atkt",
            ResultStatus::Fail => "fail",
            ResultStatus::TcIssued => "tc_issued",
            ResultStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EngineError> {
        match value {
            "prospect" => Ok(ResultStatus::Prospect),
            "active" => Ok(ResultStatus::Active),
            "exam_pending" => Ok(ResultStatus::ExamPending),
            "pass" => Ok(ResultStatus::Pass),
            "atkt" => Ok(ResultStatus::Atkt),
            "fail" => Ok(ResultStatus::Fail),
            "tc_issued" => Ok(ResultStatus::TcIssued),
            "completed" => Ok(ResultStatus::Completed),
            other => Err(EngineError::Validation(format!(
                "unknown result status '{}'",
                other
            ))),
        }
    }
}

/// Promotion state of a student-session record.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromotionStatus {
    NotEligible,
    Eligible,
    Promoted,
    ConditionallyPromoted,
    Repeated,
    Transferred,
}

impl PromotionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionStatus::NotEligible => "not_eligible",
            PromotionStatus::Eligible => "eligible",
            PromotionStatus::Promoted => "promoted",
            PromotionStatus::ConditionallyPromoted => "conditionally_promoted",
            PromotionStatus::Repeated => "repeated",
            PromotionStatus::Transferred => "transferred",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EngineError> {
        match value {
            "not_eligible" => Ok(PromotionStatus::NotEligible),
            "eligible" => Ok(PromotionStatus::Eligible),
            "promoted" => Ok(PromotionStatus::Promoted),
            "conditionally_promoted" => Ok(PromotionStatus::ConditionallyPromoted),
            "repeated" => Ok(PromotionStatus::Repeated),
            "transferred" => Ok(PromotionStatus::Transferred),
            other => Err(EngineError::Validation(format!(
                "unknown promotion status '{}'",
                other
            ))),
        }
    }
}

/// Attendance verdict carried on the record by the attendance subsystem.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Eligible,
    NotEligible,
    Condonable,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Eligible => "eligible",
            AttendanceStatus::NotEligible => "not_eligible",
            AttendanceStatus::Condonable => "condonable",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EngineError> {
        match value {
            "eligible" => Ok(AttendanceStatus::Eligible),
            "not_eligible" => Ok(AttendanceStatus::NotEligible),
            "condonable" => Ok(AttendanceStatus::Condonable),
            other => Err(EngineError::Validation(format!(
                "unknown attendance status '{}'",
                other
            ))),
        }
    }
}

/// Kind of decision recorded in a promotion log entry.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromotionType {
    Promoted,
    ConditionallyPromoted,
    Repeated,
    Demoted,
    Transferred,
    TcIssued,
}

impl PromotionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionType::Promoted => "promoted",
            PromotionType::ConditionallyPromoted => "conditionally_promoted",
            PromotionType::Repeated => "repeated",
            PromotionType::Demoted => "demoted",
            PromotionType::Transferred => "transferred",
            PromotionType::TcIssued => "tc_issued",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EngineError> {
        match value {
            "promoted" => Ok(PromotionType::Promoted),
            "conditionally_promoted" => Ok(PromotionType::ConditionallyPromoted),
            "repeated" => Ok(PromotionType::Repeated),
            "demoted" => Ok(PromotionType::Demoted),
            "transferred" => Ok(PromotionType::Transferred),
            "tc_issued" => Ok(PromotionType::TcIssued),
            other => Err(EngineError::Validation(format!(
                "unknown promotion type '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle state of a promotion log entry.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromotionLogStatus {
    Pending,
    Completed,
    Cancelled,
    RolledBack,
}

impl PromotionLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionLogStatus::Pending => "pending",
            PromotionLogStatus::Completed => "completed",
            PromotionLogStatus::Cancelled => "cancelled",
            PromotionLogStatus::RolledBack => "rolled_back",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EngineError> {
        match value {
            "pending" => Ok(PromotionLogStatus::Pending),
            "completed" => Ok(PromotionLogStatus::Completed),
            "cancelled" => Ok(PromotionLogStatus::Cancelled),
            "rolled_back" => Ok(PromotionLogStatus::RolledBack),
            other => Err(EngineError::Validation(format!(
                "unknown promotion log status '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle state of a transfer record.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Approved,
    Issued,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Approved => "approved",
            TransferStatus::Issued => "issued",
            TransferStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EngineError> {
        match value {
            "pending" => Ok(TransferStatus::Pending),
            "approved" => Ok(TransferStatus::Approved),
            "issued" => Ok(TransferStatus::Issued),
            "cancelled" => Ok(TransferStatus::Cancelled),
            other => Err(EngineError::Validation(format!(
                "unknown transfer status '{}'",
                other
            ))),
        }
    }
}

/// Stated reason for an institutional exit.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    ParentRelocation,
    AdmissionElsewhere,
    Financial,
    Medical,
    Disciplinary,
    CourseCompleted,
    Personal,
    Other,
}

impl TransferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferType::ParentRelocation => "parent_relocation",
            TransferType::AdmissionElsewhere => "admission_elsewhere",
            TransferType::Financial => "financial",
            TransferType::Medical => "medical",
            TransferType::Disciplinary => "disciplinary",
            TransferType::CourseCompleted => "course_completed",
            TransferType::Personal => "personal",
            TransferType::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EngineError> {
        match value {
            "parent_relocation" => Ok(TransferType::ParentRelocation),
            "admission_elsewhere" => Ok(TransferType::AdmissionElsewhere),
            "financial" => Ok(TransferType::Financial),
            "medical" => Ok(TransferType::Medical),
            "disciplinary" => Ok(TransferType::Disciplinary),
            "course_completed" => Ok(TransferType::CourseCompleted),
            "personal" => Ok(TransferType::Personal),
            "other" => Ok(TransferType::Other),
            other => Err(EngineError::Validation(format!(
                "unknown transfer type '{}'",
                other
            ))),
        }
    }
}

/// A named, typed, versionable institutional setting.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AcademicRule {
    pub rule_code: String,
    pub name: String,
    pub category: RuleCategory,
    pub value_type: ValueType,
    pub value: Option<String>,
    pub default_value: Option<String>,
    pub constraints: RuleConstraints,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_to: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_mandatory: bool,
    pub priority: i64,
    pub parent_rule_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Payload for creating a rule.
#[derive(Clone, Debug, Deserialize)]
pub struct NewAcademicRule {
    pub rule_code: String,
    pub name: String,
    pub category: RuleCategory,
    pub value_type: ValueType,
    pub value: Option<String>,
    pub default_value: Option<String>,
    #[serde(default)]
    pub constraints: RuleConstraints,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_to: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_mandatory: bool,
    #[serde(default = "default_priority")]
    pub priority: i64,
    pub parent_rule_id: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_priority() -> i64 {
    100
}

impl NewAcademicRule {
    /// Validate the payload against its own declared type and constraints.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.rule_code.trim().is_empty() {
            return Err(EngineError::Validation("rule_code must not be empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation("name must not be empty".into()));
        }
        if let (Some(from), Some(to)) = (self.effective_from, self.effective_to) {
            if from > to {
                return Err(EngineError::Validation(
                    "effective_from must not be after effective_to".into(),
                ));
            }
        }
        for raw in [self.value.as_deref(), self.default_value.as_deref()]
            .into_iter()
            .flatten()
        {
            let cast = acadra_core::cast_value(raw, self.value_type)?;
            self.constraints.check(&cast)?;
        }
        Ok(())
    }
}

/// A context-scoped value or override for one rule.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuleConfiguration {
    pub configuration_id: ConfigurationId,
    pub rule_code: String,
    pub academic_session_id: Option<SessionId>,
    pub program_id: Option<ProgramId>,
    pub department_id: Option<DepartmentId>,
    pub value: String,
    pub is_override: bool,
    pub override_reason: Option<String>,
    pub override_approved_by: Option<String>,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_to: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RuleConfiguration {
    /// Count of non-null scope fields; higher is more specific.
    pub fn specificity(&self) -> u32 {
        [
            self.academic_session_id.is_some(),
            self.program_id.is_some(),
            self.department_id.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count() as u32
    }

    /// True when the effective interval contains `as_of` (open ends pass).
    pub fn effective_at(&self, as_of: DateTime<Utc>) -> bool {
        if let Some(from) = self.effective_from {
            if as_of < from {
                return false;
            }
        }
        if let Some(to) = self.effective_to {
            if as_of > to {
                return false;
            }
        }
        true
    }
}

/// Payload for creating a scoped configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct NewRuleConfiguration {
    pub rule_code: String,
    pub academic_session_id: Option<String>,
    pub program_id: Option<String>,
    pub department_id: Option<String>,
    pub value: String,
    #[serde(default)]
    pub is_override: bool,
    pub override_reason: Option<String>,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_to: Option<DateTime<Utc>>,
}

impl NewRuleConfiguration {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.value.trim().is_empty() {
            return Err(EngineError::Validation("value must not be empty".into()));
        }
        if self.is_override
            && self
                .override_reason
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
        {
            return Err(EngineError::Validation(
                "an override configuration requires a non-empty override_reason".into(),
            ));
        }
        if let (Some(from), Some(to)) = (self.effective_from, self.effective_to) {
            if from > to {
                return Err(EngineError::Validation(
                    "effective_from must not be after effective_to".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Filter for rule catalog listings.
#[derive(Clone, Debug, Default)]
pub struct RuleFilter {
    pub category: Option<RuleCategory>,
    pub active: Option<bool>,
    pub search: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

/// One student's standing in exactly one academic session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StudentAcademicRecord {
    pub record_id: RecordId,
    pub student_id: StudentId,
    pub academic_session_id: SessionId,
    pub program_id: ProgramId,
    pub academic_year: String,
    pub division_id: Option<DivisionId>,
    pub result_status: ResultStatus,
    pub promotion_status: PromotionStatus,
    pub backlog_count: u32,
    pub max_atkt_attempts: u32,
    pub current_atkt_attempt: u32,
    pub attendance_percentage: f64,
    pub attendance_status: AttendanceStatus,
    pub fee_cleared: bool,
    pub outstanding_amount: f64,
    pub is_locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Payload for seeding a session-1 record at admission.
#[derive(Clone, Debug, Deserialize)]
pub struct NewStudentAdmission {
    pub student_id: String,
    pub academic_session_id: String,
    pub program_id: String,
    pub academic_year: String,
    pub division_id: Option<String>,
    #[serde(default = "default_max_atkt")]
    pub max_atkt_attempts: u32,
}

fn default_max_atkt() -> u32 {
    2
}

/// Signals owned by external collaborators (exam results, attendance, fee
/// ledger), applied onto the student's current unlocked record.
#[derive(Clone, Debug, Deserialize)]
pub struct RecordSignals {
    pub result_status: ResultStatus,
    pub backlog_count: u32,
    pub attendance_percentage: f64,
    pub attendance_status: AttendanceStatus,
    pub fee_cleared: bool,
    pub outstanding_amount: f64,
}

/// Append-only audit entry for one promotion/repeat/transfer decision.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromotionLog {
    pub log_id: LogId,
    pub student_id: StudentId,
    pub from_record_id: RecordId,
    pub from_session_id: SessionId,
    pub from_program_id: ProgramId,
    pub from_academic_year: String,
    pub from_division_id: Option<DivisionId>,
    pub from_result_status: ResultStatus,
    pub to_session_id: Option<SessionId>,
    pub to_program_id: Option<ProgramId>,
    pub to_academic_year: Option<String>,
    pub to_division_id: Option<String>,
    pub promotion_type: PromotionType,
    pub was_eligible: bool,
    pub attendance_percentage: f64,
    pub fee_cleared: bool,
    pub backlog_count: u32,
    pub promoted_by: ActorId,
    pub promoted_by_role: Option<String>,
    pub is_override: bool,
    pub override_reason: Option<String>,
    pub override_approved_by: Option<ActorId>,
    pub new_academic_record_id: Option<RecordId>,
    pub status: PromotionLogStatus,
    pub rolled_back_by: Option<String>,
    pub rolled_back_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Terminal exit record for a student leaving the institution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferRecord {
    pub transfer_id: TransferId,
    pub student_id: StudentId,
    pub academic_session_id: SessionId,
    pub program_id: ProgramId,
    pub academic_year: String,
    pub tc_number: String,
    pub transfer_type: TransferType,
    pub status: TransferStatus,
    pub result_status: ResultStatus,
    pub attendance_percentage: f64,
    pub backlog_count: u32,
    pub fee_cleared: bool,
    pub conduct_rating: Option<String>,
    pub readmission_eligible: bool,
    pub destination_institution: Option<String>,
    pub destination_address: Option<String>,
    pub requested_by: String,
    pub approved_by: Option<String>,
    pub issued_by: Option<String>,
    pub document_path: Option<String>,
    pub is_override: bool,
    pub override_reason: Option<String>,
    pub cancel_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub issued_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Store-level payload for inserting a transfer request. The TC number is
/// assigned inside the insert transaction, not by the caller.
#[derive(Clone, Debug)]
pub struct NewTransferRequest {
    pub student_id: String,
    pub academic_session_id: String,
    pub program_id: String,
    pub academic_year: String,
    pub transfer_type: TransferType,
    pub result_status: ResultStatus,
    pub attendance_percentage: f64,
    pub backlog_count: u32,
    pub fee_cleared: bool,
    pub conduct_rating: Option<String>,
    pub readmission_eligible: bool,
    pub destination_institution: Option<String>,
    pub destination_address: Option<String>,
    pub requested_by: String,
    pub document_path: Option<String>,
    pub is_override: bool,
    pub override_reason: Option<String>,
}

/// One academic session. Exactly one session is active at a time; activation
/// is enforced at the write boundary, never read from ambient state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AcademicSession {
    pub session_id: SessionId,
    pub name: String,
    pub starts_on: DateTime<Utc>,
    pub ends_on: DateTime<Utc>,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn config(session: Option<&str>, program: Option<&str>, department: Option<&str>) -> RuleConfiguration {
        let now = Utc::now();
        RuleConfiguration {
            configuration_id: "cfg-test".into(),
            rule_code: "ATTENDANCE_MIN_PERCENT".into(),
            academic_session_id: session.map(str::to_string),
            program_id: program.map(str::to_string),
            department_id: department.map(str::to_string),
            value: "75".into(),
            is_override: false,
            override_reason: None,
            override_approved_by: None,
            effective_from: None,
            effective_to: None,
            is_active: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn specificity_counts_non_null_scope_fields() {
        assert_eq!(config(None, None, None).specificity(), 0);
        assert_eq!(config(Some("s1"), None, None).specificity(), 1);
        assert_eq!(config(Some("s1"), Some("p1"), None).specificity(), 2);
        assert_eq!(config(Some("s1"), Some("p1"), Some("d1")).specificity(), 3);
    }

    #[test]
    fn effective_interval_is_inclusive_with_open_ends() {
        let now = Utc::now();
        let mut cfg = config(None, None, None);
        assert!(cfg.effective_at(now));

        cfg.effective_from = Some(now - Duration::days(1));
        cfg.effective_to = Some(now + Duration::days(1));
        assert!(cfg.effective_at(now));

        cfg.effective_to = Some(now - Duration::hours(1));
        assert!(!cfg.effective_at(now));

        cfg.effective_from = Some(now + Duration::hours(1));
        cfg.effective_to = None;
        assert!(!cfg.effective_at(now));
    }

    #[test]
    fn override_configuration_requires_reason() {
        let cfg = NewRuleConfiguration {
            rule_code: "FEE_CLEARANCE_REQUIRED".into(),
            academic_session_id: None,
            program_id: None,
            department_id: None,
            value: "false".into(),
            is_override: true,
            override_reason: Some("  ".into()),
            effective_from: None,
            effective_to: None,
        };
        assert!(matches!(cfg.validate(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn new_rule_validates_value_against_declared_type() {
        let rule = NewAcademicRule {
            rule_code: "ATKT_MAX_SUBJECTS".into(),
            name: "Maximum ATKT subjects".into(),
            category: RuleCategory::Atkt,
            value_type: ValueType::Integer,
            value: Some("not-a-number".into()),
            default_value: None,
            constraints: RuleConstraints::default(),
            effective_from: None,
            effective_to: None,
            is_active: true,
            is_mandatory: false,
            priority: 100,
            parent_rule_id: None,
        };
        assert!(matches!(rule.validate(), Err(EngineError::RuleValue(_))));
    }

    #[test]
    fn status_codecs_round_trip() {
        for status in [
            ResultStatus::Prospect,
            ResultStatus::Active,
            ResultStatus::ExamPending,
            ResultStatus::Pass,
            ResultStatus::Atkt,
            ResultStatus::Fail,
            ResultStatus::TcIssued,
            ResultStatus::Completed,
        ] {
            assert_eq!(ResultStatus::parse(status.as_str()).unwrap(), status);
        }
        for status in [
            TransferStatus::Pending,
            TransferStatus::Approved,
            TransferStatus::Issued,
            TransferStatus::Cancelled,
        ] {
            assert_eq!(TransferStatus::parse(status.as_str()).unwrap(), status);
        }
    }
}
