//! API DTOs for the academic lifecycle surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use acadra_core::rule_value::RuleValue;
use acadra_engine::{
    AcademicRule, BulkPromotionReport, EligibilityVerdict, PromotionLog, PromotionType,
    RuleConfiguration, StudentAcademicRecord, TransferType,
};

#[derive(Clone, Debug, Serialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub request_id: String,
    pub data: T,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(request_id: String, data: T) -> Self {
        Self {
            success: true,
            request_id,
            data,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RuleListQuery {
    pub category: Option<String>,
    pub active: Option<bool>,
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RuleDetailResponse {
    pub rule: AcademicRule,
    pub configurations: Vec<RuleConfiguration>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ConfigureRuleRequest {
    pub value: String,
    pub academic_session_id: Option<String>,
    pub program_id: Option<String>,
    pub department_id: Option<String>,
    #[serde(default)]
    pub is_override: bool,
    pub override_reason: Option<String>,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_to: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ApproveOverrideRequest {
    pub approved_by: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ResolveQuery {
    pub session_id: Option<String>,
    pub program_id: Option<String>,
    pub department_id: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResolveResponse {
    pub rule_code: String,
    pub value: RuleValue,
}

#[derive(Clone, Debug, Serialize)]
pub struct EligibilityResponse {
    pub student_id: String,
    pub record_id: String,
    pub academic_session_id: String,
    pub verdict: EligibilityVerdict,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PromoteRequest {
    pub to_session_id: String,
    pub to_program_id: String,
    pub to_academic_year: String,
    pub to_division_id: Option<String>,
    pub actor: String,
    pub actor_role: Option<String>,
    #[serde(default)]
    pub is_override: bool,
    pub override_reason: Option<String>,
    pub override_approved_by: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromoteResponse {
    pub student_id: String,
    pub new_record_id: String,
    pub log_id: String,
    pub promotion_type: PromotionType,
    pub idempotent_replay: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BulkPromoteRequest {
    pub student_ids: Vec<String>,
    pub to_session_id: String,
    pub to_program_id: String,
    pub to_academic_year: String,
    pub to_division_id: Option<String>,
    pub actor: String,
    pub actor_role: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct BulkPromoteResponse {
    #[serde(flatten)]
    pub report: BulkPromotionReport,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RollbackRequest {
    pub actor: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct RollbackResponse {
    pub log: PromotionLog,
}

#[derive(Clone, Debug, Serialize)]
pub struct PromotionHistoryResponse {
    pub student_id: String,
    pub history: Vec<PromotionLog>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TransferRequestBody {
    pub transfer_type: TransferType,
    pub conduct_rating: Option<String>,
    #[serde(default = "default_true")]
    pub readmission_eligible: bool,
    pub destination_institution: Option<String>,
    pub destination_address: Option<String>,
    pub requested_by: String,
    pub document_path: Option<String>,
    #[serde(default)]
    pub is_override: bool,
    pub override_reason: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize)]
pub struct TransferActionRequest {
    pub actor: String,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub session_id: String,
    pub name: String,
    pub starts_on: DateTime<Utc>,
    pub ends_on: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RecordResponse {
    pub record: StudentAcademicRecord,
}
