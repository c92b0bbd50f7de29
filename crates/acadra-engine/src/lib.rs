//! Academic lifecycle engine: rule resolution, eligibility, promotion, and
//! transfer workflows over a relational store.
//!
//! All components are stateless request-scoped logic; the only shared mutable
//! resource is the store behind the repository traits. Multi-step mutations
//! run as single store transactions and either fully commit or leave no trace.

pub mod backend_config;
pub mod catalog;
pub mod eligibility;
pub mod idempotency;
pub mod models;
pub mod promotion;
pub mod repository;
pub mod resolver;
pub mod sqlite_store;
pub mod transfer;

pub use backend_config::StorageConfig;
pub use catalog::seed_default_rules;
pub use eligibility::{rule_codes, EligibilityEvaluator, EligibilityVerdict};
pub use idempotency::{IdempotencyRecord, PromotionIdempotencyStore};
pub use models::{
    AcademicRule, AcademicSession, AttendanceStatus, NewAcademicRule, NewRuleConfiguration,
    NewStudentAdmission, NewTransferRequest, PromotionLog, PromotionLogStatus, PromotionStatus,
    PromotionType, RecordSignals, ResultStatus, RuleCategory, RuleConfiguration, RuleFilter,
    StudentAcademicRecord, TransferRecord, TransferStatus, TransferType,
};
pub use promotion::{
    BulkPromotionError, BulkPromotionReport, PromoteCommand, PromotionEngine, PromotionOutcome,
    PromotionPlan, PromotionPreview,
};
pub use repository::{
    PromotionRepository, RuleRepository, SessionRepository, TransferRepository,
};
pub use resolver::{ResolutionContext, ResolverCache, RuleResolver};
pub use sqlite_store::SqliteAcademicStore;
pub use transfer::{TransferAdvisory, TransferCommand, TransferWorkflow};
