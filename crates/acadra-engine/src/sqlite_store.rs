//! SQLite-backed store for rules, records, promotion audit, and transfers.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use acadra_core::rule_value::{cast_value, RuleConstraints, ValueType};
use acadra_core::{new_id, EngineError};

use super::models::{
    AcademicRule, AcademicSession, AttendanceStatus, NewAcademicRule, NewRuleConfiguration,
    NewStudentAdmission, NewTransferRequest, PromotionLog, PromotionLogStatus, PromotionStatus,
    PromotionType, RecordSignals, ResultStatus, RuleCategory, RuleConfiguration, RuleFilter,
    StudentAcademicRecord, TransferRecord, TransferStatus, TransferType,
};
use super::promotion::{PromotionOutcome, PromotionPlan};
use super::repository::{
    PromotionRepository, RuleRepository, SessionRepository, TransferRepository,
};

const RULE_COLUMNS: &str = "rule_code, name, category, value_type, value, default_value, \
     min_value, max_value, allowed_values_json, pattern, effective_from_ms, effective_to_ms, \
     is_active, is_mandatory, priority, parent_rule_id, created_at_ms, updated_at_ms, deleted_at_ms";

const CONFIG_COLUMNS: &str = "configuration_id, rule_code, academic_session_id, program_id, \
     department_id, value, is_override, override_reason, override_approved_by, \
     effective_from_ms, effective_to_ms, is_active, created_at_ms, updated_at_ms, deleted_at_ms";

const RECORD_COLUMNS: &str = "record_id, student_id, academic_session_id, program_id, \
     academic_year, division_id, result_status, promotion_status, backlog_count, \
     max_atkt_attempts, current_atkt_attempt, attendance_percentage, attendance_status, \
     fee_cleared, outstanding_amount, is_locked, locked_at_ms, locked_by, created_at_ms, \
     updated_at_ms, deleted_at_ms";

const LOG_COLUMNS: &str = "log_id, student_id, from_record_id, from_session_id, from_program_id, \
     from_academic_year, from_division_id, from_result_status, to_session_id, to_program_id, \
     to_academic_year, to_division_id, promotion_type, was_eligible, attendance_percentage, \
     fee_cleared, backlog_count, promoted_by, promoted_by_role, is_override, override_reason, \
     override_approved_by, new_academic_record_id, status, rolled_back_by, rolled_back_at_ms, \
     created_at_ms, updated_at_ms";

const TRANSFER_COLUMNS: &str = "transfer_id, student_id, academic_session_id, program_id, \
     academic_year, tc_number, transfer_type, status, result_status, attendance_percentage, \
     backlog_count, fee_cleared, conduct_rating, readmission_eligible, destination_institution, \
     destination_address, requested_by, approved_by, issued_by, document_path, is_override, \
     override_reason, cancel_reason, requested_at_ms, approved_at_ms, issued_at_ms, \
     cancelled_at_ms, updated_at_ms, deleted_at_ms";

const TC_NUMBER_ATTEMPTS: usize = 5;

/// SQLite store implementing every repository contract. One connection,
/// shared behind a mutex; multi-step operations run as transactions on it.
#[derive(Clone)]
pub struct SqliteAcademicStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAcademicStore {
    pub fn new(db_path: &str) -> Result<Self, EngineError> {
        let conn = Connection::open(db_path)
            .map_err(|e| EngineError::Internal(format!("open academic store: {}", e)))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Private in-memory store, used by tests and the startup health check.
    pub fn in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Internal(format!("open in-memory academic store: {}", e)))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, EngineError> {
        self.conn
            .lock()
            .map_err(|_| EngineError::Internal("academic store lock poisoned".to_string()))
    }

    fn ensure_schema(&self) -> Result<(), EngineError> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS academic_sessions (
              session_id TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              starts_on_ms INTEGER NOT NULL,
              ends_on_ms INTEGER NOT NULL,
              is_active INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS academic_rules (
              rule_code TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              category TEXT NOT NULL,
              value_type TEXT NOT NULL,
              value TEXT NULL,
              default_value TEXT NULL,
              min_value REAL NULL,
              max_value REAL NULL,
              allowed_values_json TEXT NULL,
              pattern TEXT NULL,
              effective_from_ms INTEGER NULL,
              effective_to_ms INTEGER NULL,
              is_active INTEGER NOT NULL DEFAULT 1,
              is_mandatory INTEGER NOT NULL DEFAULT 0,
              priority INTEGER NOT NULL DEFAULT 100,
              parent_rule_id TEXT NULL,
              created_at_ms INTEGER NOT NULL,
              updated_at_ms INTEGER NOT NULL,
              deleted_at_ms INTEGER NULL
            );
            CREATE TABLE IF NOT EXISTS rule_configurations (
              configuration_id TEXT PRIMARY KEY,
              rule_code TEXT NOT NULL,
              academic_session_id TEXT NULL,
              program_id TEXT NULL,
              department_id TEXT NULL,
              scope_key TEXT NOT NULL,
              value TEXT NOT NULL,
              is_override INTEGER NOT NULL DEFAULT 0,
              override_reason TEXT NULL,
              override_approved_by TEXT NULL,
              effective_from_ms INTEGER NULL,
              effective_to_ms INTEGER NULL,
              is_active INTEGER NOT NULL DEFAULT 1,
              created_at_ms INTEGER NOT NULL,
              updated_at_ms INTEGER NOT NULL,
              deleted_at_ms INTEGER NULL
            );
            CREATE TABLE IF NOT EXISTS student_academic_records (
              record_id TEXT PRIMARY KEY,
              student_id TEXT NOT NULL,
              academic_session_id TEXT NOT NULL,
              program_id TEXT NOT NULL,
              academic_year TEXT NOT NULL,
              division_id TEXT NULL,
              result_status TEXT NOT NULL,
              promotion_status TEXT NOT NULL,
              backlog_count INTEGER NOT NULL DEFAULT 0,
              max_atkt_attempts INTEGER NOT NULL DEFAULT 2,
              current_atkt_attempt INTEGER NOT NULL DEFAULT 0,
              attendance_percentage REAL NOT NULL DEFAULT 0,
              attendance_status TEXT NOT NULL,
              fee_cleared INTEGER NOT NULL DEFAULT 0,
              outstanding_amount REAL NOT NULL DEFAULT 0,
              is_locked INTEGER NOT NULL DEFAULT 0,
              locked_at_ms INTEGER NULL,
              locked_by TEXT NULL,
              created_at_ms INTEGER NOT NULL,
              updated_at_ms INTEGER NOT NULL,
              deleted_at_ms INTEGER NULL
            );
            CREATE TABLE IF NOT EXISTS promotion_logs (
              log_id TEXT PRIMARY KEY,
              student_id TEXT NOT NULL,
              from_record_id TEXT NOT NULL,
              from_session_id TEXT NOT NULL,
              from_program_id TEXT NOT NULL,
              from_academic_year TEXT NOT NULL,
              from_division_id TEXT NULL,
              from_result_status TEXT NOT NULL,
              to_session_id TEXT NULL,
              to_program_id TEXT NULL,
              to_academic_year TEXT NULL,
              to_division_id TEXT NULL,
              promotion_type TEXT NOT NULL,
              was_eligible INTEGER NOT NULL,
              attendance_percentage REAL NOT NULL,
              fee_cleared INTEGER NOT NULL,
              backlog_count INTEGER NOT NULL,
              promoted_by TEXT NOT NULL,
              promoted_by_role TEXT NULL,
              is_override INTEGER NOT NULL,
              override_reason TEXT NULL,
              override_approved_by TEXT NULL,
              new_academic_record_id TEXT NULL,
              status TEXT NOT NULL,
              rolled_back_by TEXT NULL,
              rolled_back_at_ms INTEGER NULL,
              created_at_ms INTEGER NOT NULL,
              updated_at_ms INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS transfer_records (
              transfer_id TEXT PRIMARY KEY,
              student_id TEXT NOT NULL,
              academic_session_id TEXT NOT NULL,
              program_id TEXT NOT NULL,
              academic_year TEXT NOT NULL,
              tc_number TEXT NOT NULL,
              transfer_type TEXT NOT NULL,
              status TEXT NOT NULL,
              result_status TEXT NOT NULL,
              attendance_percentage REAL NOT NULL,
              backlog_count INTEGER NOT NULL,
              fee_cleared INTEGER NOT NULL,
              conduct_rating TEXT NULL,
              readmission_eligible INTEGER NOT NULL DEFAULT 1,
              destination_institution TEXT NULL,
              destination_address TEXT NULL,
              requested_by TEXT NOT NULL,
              approved_by TEXT NULL,
              issued_by TEXT NULL,
              document_path TEXT NULL,
              is_override INTEGER NOT NULL DEFAULT 0,
              override_reason TEXT NULL,
              cancel_reason TEXT NULL,
              requested_at_ms INTEGER NOT NULL,
              approved_at_ms INTEGER NULL,
              issued_at_ms INTEGER NULL,
              cancelled_at_ms INTEGER NULL,
              updated_at_ms INTEGER NOT NULL,
              deleted_at_ms INTEGER NULL
            );
            CREATE INDEX IF NOT EXISTS idx_academic_rules_category
              ON academic_rules(category, is_active, priority);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_rule_configurations_active_scope
              ON rule_configurations(rule_code, scope_key)
              WHERE is_active = 1 AND deleted_at_ms IS NULL;
            CREATE INDEX IF NOT EXISTS idx_rule_configurations_rule
              ON rule_configurations(rule_code, is_active);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_student_records_student_session
              ON student_academic_records(student_id, academic_session_id)
              WHERE deleted_at_ms IS NULL;
            CREATE INDEX IF NOT EXISTS idx_student_records_student
              ON student_academic_records(student_id, created_at_ms DESC);
            CREATE INDEX IF NOT EXISTS idx_promotion_logs_student
              ON promotion_logs(student_id, created_at_ms DESC);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_transfer_records_tc_number
              ON transfer_records(tc_number);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_transfer_records_active_student
              ON transfer_records(student_id)
              WHERE status != 'cancelled' AND deleted_at_ms IS NULL;
            "#,
        )
        .map_err(|e| EngineError::Internal(format!("init academic store schema: {}", e)))?;
        Ok(())
    }
}

impl RuleRepository for SqliteAcademicStore {
    fn get_rule(&self, rule_code: &str) -> Result<Option<AcademicRule>, EngineError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM academic_rules WHERE rule_code = ?1 AND deleted_at_ms IS NULL",
                RULE_COLUMNS
            ))
            .map_err(|e| map_sqlite_err("prepare get rule", e))?;
        stmt.query_row(params![rule_code], map_row_to_rule)
            .optional()
            .map_err(|e| map_sqlite_err("query get rule", e))
    }

    fn list_rules(&self, filter: &RuleFilter) -> Result<Vec<AcademicRule>, EngineError> {
        let conn = self.conn()?;
        let mut sql = format!(
            "SELECT {} FROM academic_rules WHERE deleted_at_ms IS NULL",
            RULE_COLUMNS
        );
        let mut values: Vec<SqlValue> = Vec::new();
        if let Some(category) = filter.category {
            sql.push_str(&format!(" AND category = ?{}", values.len() + 1));
            values.push(SqlValue::Text(category.as_str().to_string()));
        }
        if let Some(active) = filter.active {
            sql.push_str(&format!(" AND is_active = ?{}", values.len() + 1));
            values.push(SqlValue::Integer(i64::from(active)));
        }
        if let Some(search) = &filter.search {
            sql.push_str(&format!(
                " AND (rule_code LIKE ?{n} OR name LIKE ?{n})",
                n = values.len() + 1
            ));
            values.push(SqlValue::Text(format!("%{}%", search)));
        }
        sql.push_str(" ORDER BY priority ASC, rule_code ASC");
        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, filter.offset));

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| map_sqlite_err("prepare list rules", e))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values), map_row_to_rule)
            .map_err(|e| map_sqlite_err("query list rules", e))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| map_sqlite_err("scan list rules", e))?);
        }
        Ok(out)
    }

    fn create_rule(&self, rule: &NewAcademicRule) -> Result<AcademicRule, EngineError> {
        rule.validate()?;
        let now = Utc::now();
        let allowed_values_json = rule
            .constraints
            .allowed_values
            .as_ref()
            .map(|values| {
                serde_json::to_string(values)
                    .map_err(|e| EngineError::Internal(format!("encode allowed values: {}", e)))
            })
            .transpose()?;

        let conn = self.conn()?;
        if let Some(parent) = rule.parent_rule_id.as_deref() {
            let exists: Option<String> = conn
                .query_row(
                    "SELECT rule_code FROM academic_rules WHERE rule_code = ?1 AND deleted_at_ms IS NULL",
                    params![parent],
                    |r| r.get(0),
                )
                .optional()
                .map_err(|e| map_sqlite_err("query parent rule", e))?;
            if exists.is_none() {
                return Err(EngineError::Validation(format!(
                    "parent_rule_id '{}' does not name an existing rule",
                    parent
                )));
            }
        }
        let insert = conn.execute(
            "INSERT INTO academic_rules
             (rule_code, name, category, value_type, value, default_value, min_value, max_value,
              allowed_values_json, pattern, effective_from_ms, effective_to_ms, is_active,
              is_mandatory, priority, parent_rule_id, created_at_ms, updated_at_ms, deleted_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17, NULL)",
            params![
                rule.rule_code,
                rule.name,
                rule.category.as_str(),
                rule.value_type.as_str(),
                rule.value,
                rule.default_value,
                rule.constraints.min_value,
                rule.constraints.max_value,
                allowed_values_json,
                rule.constraints.pattern,
                rule.effective_from.map(dt_to_ms),
                rule.effective_to.map(dt_to_ms),
                rule.is_active,
                rule.is_mandatory,
                rule.priority,
                rule.parent_rule_id,
                dt_to_ms(now),
            ],
        );
        match insert {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                return Err(EngineError::Conflict(format!(
                    "rule '{}' already exists",
                    rule.rule_code
                )));
            }
            Err(e) => return Err(map_sqlite_err("insert rule", e)),
        }
        drop(conn);
        self.get_rule(&rule.rule_code)?
            .ok_or_else(|| EngineError::Internal("rule vanished after insert".to_string()))
    }

    fn soft_delete_rule(&self, rule_code: &str) -> Result<(), EngineError> {
        let conn = self.conn()?;
        let now = dt_to_ms(Utc::now());
        let updated = conn
            .execute(
                "UPDATE academic_rules
                 SET deleted_at_ms = ?2, is_active = 0, updated_at_ms = ?2
                 WHERE rule_code = ?1 AND deleted_at_ms IS NULL",
                params![rule_code, now],
            )
            .map_err(|e| map_sqlite_err("soft delete rule", e))?;
        if updated == 0 {
            return Err(EngineError::NotFound(format!(
                "unknown rule '{}'",
                rule_code
            )));
        }
        Ok(())
    }

    fn active_configurations(
        &self,
        rule_code: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<RuleConfiguration>, EngineError> {
        let conn = self.conn()?;
        let as_of_ms = dt_to_ms(as_of);
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM rule_configurations
                 WHERE rule_code = ?1 AND is_active = 1 AND deleted_at_ms IS NULL
                   AND (effective_from_ms IS NULL OR effective_from_ms <= ?2)
                   AND (effective_to_ms IS NULL OR effective_to_ms >= ?2)
                 ORDER BY updated_at_ms DESC",
                CONFIG_COLUMNS
            ))
            .map_err(|e| map_sqlite_err("prepare active configurations", e))?;
        let rows = stmt
            .query_map(params![rule_code, as_of_ms], map_row_to_configuration)
            .map_err(|e| map_sqlite_err("query active configurations", e))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| map_sqlite_err("scan active configurations", e))?);
        }
        Ok(out)
    }

    fn configurations_with_deleted(
        &self,
        rule_code: &str,
    ) -> Result<Vec<RuleConfiguration>, EngineError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM rule_configurations WHERE rule_code = ?1
                 ORDER BY created_at_ms DESC",
                CONFIG_COLUMNS
            ))
            .map_err(|e| map_sqlite_err("prepare configuration history", e))?;
        let rows = stmt
            .query_map(params![rule_code], map_row_to_configuration)
            .map_err(|e| map_sqlite_err("query configuration history", e))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| map_sqlite_err("scan configuration history", e))?);
        }
        Ok(out)
    }

    fn insert_configuration(
        &self,
        config: &NewRuleConfiguration,
    ) -> Result<RuleConfiguration, EngineError> {
        config.validate()?;
        let rule = self
            .get_rule(&config.rule_code)?
            .ok_or_else(|| EngineError::NotFound(format!("unknown rule '{}'", config.rule_code)))?;
        // The configured value must satisfy the rule's own type and constraints.
        let cast = cast_value(&config.value, rule.value_type)?;
        rule.constraints.check(&cast)?;

        let configuration_id = new_id("cfg");
        let now = dt_to_ms(Utc::now());
        let scope = scope_key(
            config.academic_session_id.as_deref(),
            config.program_id.as_deref(),
            config.department_id.as_deref(),
        );
        let conn = self.conn()?;
        let insert = conn.execute(
            "INSERT INTO rule_configurations
             (configuration_id, rule_code, academic_session_id, program_id, department_id,
              scope_key, value, is_override, override_reason, override_approved_by,
              effective_from_ms, effective_to_ms, is_active, created_at_ms, updated_at_ms, deleted_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10, ?11, 1, ?12, ?12, NULL)",
            params![
                configuration_id,
                config.rule_code,
                config.academic_session_id,
                config.program_id,
                config.department_id,
                scope,
                config.value,
                config.is_override,
                config.override_reason,
                config.effective_from.map(dt_to_ms),
                config.effective_to.map(dt_to_ms),
                now,
            ],
        );
        match insert {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                return Err(EngineError::Conflict(format!(
                    "an active configuration already exists for rule '{}' in this scope",
                    config.rule_code
                )));
            }
            Err(e) => return Err(map_sqlite_err("insert configuration", e)),
        }
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM rule_configurations WHERE configuration_id = ?1",
                CONFIG_COLUMNS
            ))
            .map_err(|e| map_sqlite_err("prepare read configuration", e))?;
        stmt.query_row(params![configuration_id], map_row_to_configuration)
            .map_err(|e| map_sqlite_err("read configuration after insert", e))
    }

    fn approve_override(
        &self,
        rule_code: &str,
        configuration_id: &str,
        approver: &str,
    ) -> Result<RuleConfiguration, EngineError> {
        if approver.trim().is_empty() {
            return Err(EngineError::Validation("approver must not be empty".into()));
        }
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM rule_configurations
                 WHERE configuration_id = ?1 AND rule_code = ?2 AND deleted_at_ms IS NULL",
                CONFIG_COLUMNS
            ))
            .map_err(|e| map_sqlite_err("prepare read override", e))?;
        let existing = stmt
            .query_row(params![configuration_id, rule_code], map_row_to_configuration)
            .optional()
            .map_err(|e| map_sqlite_err("query read override", e))?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "configuration '{}' not found for rule '{}'",
                    configuration_id, rule_code
                ))
            })?;
        if !existing.is_override {
            return Err(EngineError::InvalidState(format!(
                "configuration '{}' is not an override",
                configuration_id
            )));
        }
        if existing.override_approved_by.is_some() {
            return Err(EngineError::Conflict(format!(
                "configuration '{}' is already approved",
                configuration_id
            )));
        }
        conn.execute(
            "UPDATE rule_configurations
             SET override_approved_by = ?2, updated_at_ms = ?3
             WHERE configuration_id = ?1",
            params![configuration_id, approver, dt_to_ms(Utc::now())],
        )
        .map_err(|e| map_sqlite_err("approve override", e))?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM rule_configurations WHERE configuration_id = ?1",
                CONFIG_COLUMNS
            ))
            .map_err(|e| map_sqlite_err("prepare reread override", e))?;
        stmt.query_row(params![configuration_id], map_row_to_configuration)
            .map_err(|e| map_sqlite_err("reread override", e))
    }

    fn soft_delete_configuration(&self, configuration_id: &str) -> Result<(), EngineError> {
        let conn = self.conn()?;
        let now = dt_to_ms(Utc::now());
        let updated = conn
            .execute(
                "UPDATE rule_configurations
                 SET deleted_at_ms = ?2, is_active = 0, updated_at_ms = ?2
                 WHERE configuration_id = ?1 AND deleted_at_ms IS NULL",
                params![configuration_id, now],
            )
            .map_err(|e| map_sqlite_err("soft delete configuration", e))?;
        if updated == 0 {
            return Err(EngineError::NotFound(format!(
                "configuration '{}' not found",
                configuration_id
            )));
        }
        Ok(())
    }
}

impl PromotionRepository for SqliteAcademicStore {
    fn current_record(
        &self,
        student_id: &str,
    ) -> Result<Option<StudentAcademicRecord>, EngineError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM student_academic_records
                 WHERE student_id = ?1 AND deleted_at_ms IS NULL
                 ORDER BY created_at_ms DESC LIMIT 1",
                RECORD_COLUMNS
            ))
            .map_err(|e| map_sqlite_err("prepare current record", e))?;
        stmt.query_row(params![student_id], map_row_to_record)
            .optional()
            .map_err(|e| map_sqlite_err("query current record", e))
    }

    fn record_by_id(&self, record_id: &str) -> Result<Option<StudentAcademicRecord>, EngineError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM student_academic_records WHERE record_id = ?1",
                RECORD_COLUMNS
            ))
            .map_err(|e| map_sqlite_err("prepare record by id", e))?;
        stmt.query_row(params![record_id], map_row_to_record)
            .optional()
            .map_err(|e| map_sqlite_err("query record by id", e))
    }

    fn create_admission_record(
        &self,
        admission: &NewStudentAdmission,
    ) -> Result<StudentAcademicRecord, EngineError> {
        if admission.student_id.trim().is_empty() {
            return Err(EngineError::Validation("student_id must not be empty".into()));
        }
        let record_id = new_id("rec");
        let now = dt_to_ms(Utc::now());
        let conn = self.conn()?;
        let insert = conn.execute(
            "INSERT INTO student_academic_records
             (record_id, student_id, academic_session_id, program_id, academic_year, division_id,
              result_status, promotion_status, backlog_count, max_atkt_attempts,
              current_atkt_attempt, attendance_percentage, attendance_status, fee_cleared,
              outstanding_amount, is_locked, locked_at_ms, locked_by, created_at_ms, updated_at_ms,
              deleted_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', 'not_eligible', 0, ?7, 0, 0, 'eligible',
                     0, 0, 0, NULL, NULL, ?8, ?8, NULL)",
            params![
                record_id,
                admission.student_id,
                admission.academic_session_id,
                admission.program_id,
                admission.academic_year,
                admission.division_id,
                admission.max_atkt_attempts,
                now,
            ],
        );
        match insert {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                return Err(EngineError::Conflict(format!(
                    "student '{}' already has a record in session '{}'",
                    admission.student_id, admission.academic_session_id
                )));
            }
            Err(e) => return Err(map_sqlite_err("insert admission record", e)),
        }
        drop(conn);
        self.record_by_id(&record_id)?
            .ok_or_else(|| EngineError::Internal("record vanished after insert".to_string()))
    }

    fn apply_academic_signals(
        &self,
        student_id: &str,
        signals: &RecordSignals,
    ) -> Result<StudentAcademicRecord, EngineError> {
        let record = self.current_record(student_id)?.ok_or_else(|| {
            EngineError::NotFound(format!(
                "student '{}' has no active academic record",
                student_id
            ))
        })?;
        if record.is_locked {
            return Err(EngineError::LockedRecord(format!(
                "record '{}' is locked and no longer accepts signals",
                record.record_id
            )));
        }
        let conn = self.conn()?;
        conn.execute(
            "UPDATE student_academic_records
             SET result_status = ?2, backlog_count = ?3, attendance_percentage = ?4,
                 attendance_status = ?5, fee_cleared = ?6, outstanding_amount = ?7,
                 updated_at_ms = ?8
             WHERE record_id = ?1 AND is_locked = 0",
            params![
                record.record_id,
                signals.result_status.as_str(),
                signals.backlog_count,
                signals.attendance_percentage,
                signals.attendance_status.as_str(),
                signals.fee_cleared,
                signals.outstanding_amount,
                dt_to_ms(Utc::now()),
            ],
        )
        .map_err(|e| map_sqlite_err("apply academic signals", e))?;
        drop(conn);
        self.record_by_id(&record.record_id)?
            .ok_or_else(|| EngineError::Internal("record vanished after signal update".to_string()))
    }

    fn commit_promotion(&self, plan: &PromotionPlan) -> Result<PromotionOutcome, EngineError> {
        let locked_status = match plan.promotion_type {
            PromotionType::Promoted => PromotionStatus::Promoted,
            PromotionType::ConditionallyPromoted => PromotionStatus::ConditionallyPromoted,
            PromotionType::Repeated | PromotionType::Demoted => PromotionStatus::Repeated,
            PromotionType::Transferred | PromotionType::TcIssued => {
                return Err(EngineError::Validation(
                    "terminal transfer decisions do not go through commit_promotion".into(),
                ))
            }
        };

        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| map_sqlite_err("begin promotion tx", e))?;

        // Re-check the source row inside the transaction: this is the
        // serialization point for concurrent promotions of one student.
        let source: Option<(bool, Option<i64>)> = tx
            .query_row(
                "SELECT is_locked, deleted_at_ms FROM student_academic_records WHERE record_id = ?1",
                params![plan.from_record.record_id],
                |r| Ok((r.get::<_, bool>(0)?, r.get::<_, Option<i64>>(1)?)),
            )
            .optional()
            .map_err(|e| map_sqlite_err("query source record", e))?;
        match source {
            None => {
                return Err(EngineError::NotFound(format!(
                    "record '{}' not found",
                    plan.from_record.record_id
                )))
            }
            Some((_, Some(_))) => {
                return Err(EngineError::NotFound(format!(
                    "record '{}' has been deleted",
                    plan.from_record.record_id
                )))
            }
            Some((true, None)) => {
                return Err(EngineError::LockedRecord(format!(
                    "record '{}' is locked by a completed promotion",
                    plan.from_record.record_id
                )))
            }
            Some((false, None)) => {}
        }

        let new_record_id = new_id("rec");
        let log_id = new_id("log");
        let now_ms = dt_to_ms(plan.decided_at);
        let insert = tx.execute(
            "INSERT INTO student_academic_records
             (record_id, student_id, academic_session_id, program_id, academic_year, division_id,
              result_status, promotion_status, backlog_count, max_atkt_attempts,
              current_atkt_attempt, attendance_percentage, attendance_status, fee_cleared,
              outstanding_amount, is_locked, locked_at_ms, locked_by, created_at_ms, updated_at_ms,
              deleted_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', 'not_eligible', ?7, ?8, ?9, 0, 'eligible',
                     0, 0, 0, NULL, NULL, ?10, ?10, NULL)",
            params![
                new_record_id,
                plan.from_record.student_id,
                plan.to_session_id,
                plan.to_program_id,
                plan.to_academic_year,
                plan.to_division_id,
                plan.carry_backlogs,
                plan.from_record.max_atkt_attempts,
                plan.next_atkt_attempt,
                now_ms,
            ],
        );
        match insert {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                return Err(EngineError::Conflict(format!(
                    "student '{}' already has a record in session '{}'",
                    plan.from_record.student_id, plan.to_session_id
                )));
            }
            Err(e) => return Err(map_sqlite_err("insert promoted record", e)),
        }

        let locked = tx
            .execute(
                "UPDATE student_academic_records
                 SET promotion_status = ?2, is_locked = 1, locked_at_ms = ?3, locked_by = ?4,
                     updated_at_ms = ?3
                 WHERE record_id = ?1 AND is_locked = 0 AND deleted_at_ms IS NULL",
                params![
                    plan.from_record.record_id,
                    locked_status.as_str(),
                    now_ms,
                    plan.actor
                ],
            )
            .map_err(|e| map_sqlite_err("lock source record", e))?;
        if locked == 0 {
            return Err(EngineError::LockedRecord(format!(
                "record '{}' was locked concurrently",
                plan.from_record.record_id
            )));
        }

        tx.execute(
            "INSERT INTO promotion_logs
             (log_id, student_id, from_record_id, from_session_id, from_program_id,
              from_academic_year, from_division_id, from_result_status, to_session_id,
              to_program_id, to_academic_year, to_division_id, promotion_type, was_eligible,
              attendance_percentage, fee_cleared, backlog_count, promoted_by, promoted_by_role,
              is_override, override_reason, override_approved_by, new_academic_record_id, status,
              rolled_back_by, rolled_back_at_ms, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                     ?18, ?19, ?20, ?21, ?22, ?23, 'completed', NULL, NULL, ?24, ?24)",
            params![
                log_id,
                plan.from_record.student_id,
                plan.from_record.record_id,
                plan.from_record.academic_session_id,
                plan.from_record.program_id,
                plan.from_record.academic_year,
                plan.from_record.division_id,
                plan.from_record.result_status.as_str(),
                plan.to_session_id,
                plan.to_program_id,
                plan.to_academic_year,
                plan.to_division_id,
                plan.promotion_type.as_str(),
                plan.verdict.eligible,
                plan.from_record.attendance_percentage,
                plan.from_record.fee_cleared,
                plan.from_record.backlog_count,
                plan.actor,
                plan.actor_role,
                plan.is_override,
                plan.override_reason,
                plan.override_approved_by,
                new_record_id,
                now_ms,
            ],
        )
        .map_err(|e| map_sqlite_err("insert promotion log", e))?;

        tx.commit()
            .map_err(|e| map_sqlite_err("commit promotion tx", e))?;
        Ok(PromotionOutcome {
            new_record_id,
            log_id,
            promotion_type: plan.promotion_type,
        })
    }

    fn rollback_promotion(&self, log_id: &str, actor: &str) -> Result<PromotionLog, EngineError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| map_sqlite_err("begin rollback tx", e))?;

        let log = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {} FROM promotion_logs WHERE log_id = ?1",
                    LOG_COLUMNS
                ))
                .map_err(|e| map_sqlite_err("prepare rollback log read", e))?;
            stmt.query_row(params![log_id], map_row_to_log)
                .optional()
                .map_err(|e| map_sqlite_err("query rollback log", e))?
        }
        .ok_or_else(|| EngineError::NotFound(format!("promotion log '{}' not found", log_id)))?;

        if log.status != PromotionLogStatus::Completed {
            return Err(EngineError::NotFound(format!(
                "promotion log '{}' is {} and cannot be rolled back",
                log_id,
                log.status.as_str()
            )));
        }
        let new_record_id = log.new_academic_record_id.clone().ok_or_else(|| {
            EngineError::InvalidState(format!(
                "promotion log '{}' records a terminal decision with no successor record",
                log_id
            ))
        })?;

        let successor: Option<(bool, Option<i64>)> = tx
            .query_row(
                "SELECT is_locked, deleted_at_ms FROM student_academic_records WHERE record_id = ?1",
                params![new_record_id],
                |r| Ok((r.get::<_, bool>(0)?, r.get::<_, Option<i64>>(1)?)),
            )
            .optional()
            .map_err(|e| map_sqlite_err("query successor record", e))?;
        match successor {
            None | Some((_, Some(_))) => {
                return Err(EngineError::NotFound(format!(
                    "record '{}' produced by log '{}' no longer exists",
                    new_record_id, log_id
                )))
            }
            Some((true, None)) => {
                return Err(EngineError::LockedRecord(format!(
                    "record '{}' is locked by a subsequent promotion; roll that back first",
                    new_record_id
                )))
            }
            Some((false, None)) => {}
        }

        let now_ms = dt_to_ms(Utc::now());
        tx.execute(
            "UPDATE student_academic_records SET deleted_at_ms = ?2, updated_at_ms = ?2
             WHERE record_id = ?1",
            params![new_record_id, now_ms],
        )
        .map_err(|e| map_sqlite_err("soft delete successor record", e))?;

        let restored_status = if log.was_eligible {
            PromotionStatus::Eligible
        } else {
            PromotionStatus::NotEligible
        };
        tx.execute(
            "UPDATE student_academic_records
             SET is_locked = 0, locked_at_ms = NULL, locked_by = NULL, promotion_status = ?2,
                 updated_at_ms = ?3
             WHERE record_id = ?1",
            params![log.from_record_id, restored_status.as_str(), now_ms],
        )
        .map_err(|e| map_sqlite_err("unlock source record", e))?;

        tx.execute(
            "UPDATE promotion_logs
             SET status = 'rolled_back', rolled_back_by = ?2, rolled_back_at_ms = ?3,
                 updated_at_ms = ?3
             WHERE log_id = ?1",
            params![log_id, actor, now_ms],
        )
        .map_err(|e| map_sqlite_err("mark log rolled back", e))?;

        let rolled_back = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {} FROM promotion_logs WHERE log_id = ?1",
                    LOG_COLUMNS
                ))
                .map_err(|e| map_sqlite_err("prepare reread rollback log", e))?;
            stmt.query_row(params![log_id], map_row_to_log)
                .map_err(|e| map_sqlite_err("reread rollback log", e))?
        };
        tx.commit()
            .map_err(|e| map_sqlite_err("commit rollback tx", e))?;
        Ok(rolled_back)
    }

    fn promotion_log(&self, log_id: &str) -> Result<Option<PromotionLog>, EngineError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM promotion_logs WHERE log_id = ?1",
                LOG_COLUMNS
            ))
            .map_err(|e| map_sqlite_err("prepare promotion log", e))?;
        stmt.query_row(params![log_id], map_row_to_log)
            .optional()
            .map_err(|e| map_sqlite_err("query promotion log", e))
    }

    fn promotion_history(&self, student_id: &str) -> Result<Vec<PromotionLog>, EngineError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM promotion_logs WHERE student_id = ?1 ORDER BY created_at_ms DESC",
                LOG_COLUMNS
            ))
            .map_err(|e| map_sqlite_err("prepare promotion history", e))?;
        let rows = stmt
            .query_map(params![student_id], map_row_to_log)
            .map_err(|e| map_sqlite_err("query promotion history", e))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| map_sqlite_err("scan promotion history", e))?);
        }
        Ok(out)
    }

    fn mark_record_transferred(
        &self,
        student_id: &str,
        actor: &str,
    ) -> Result<StudentAcademicRecord, EngineError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| map_sqlite_err("begin transfer mark tx", e))?;

        let record = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {} FROM student_academic_records
                     WHERE student_id = ?1 AND deleted_at_ms IS NULL
                     ORDER BY created_at_ms DESC LIMIT 1",
                    RECORD_COLUMNS
                ))
                .map_err(|e| map_sqlite_err("prepare transfer mark read", e))?;
            stmt.query_row(params![student_id], map_row_to_record)
                .optional()
                .map_err(|e| map_sqlite_err("query transfer mark read", e))?
        }
        .ok_or_else(|| {
            EngineError::NotFound(format!(
                "student '{}' has no active academic record",
                student_id
            ))
        })?;
        if record.result_status == ResultStatus::TcIssued {
            return Err(EngineError::Conflict(format!(
                "student '{}' is already marked as transferred",
                student_id
            )));
        }
        if record.is_locked {
            return Err(EngineError::LockedRecord(format!(
                "record '{}' is locked by a completed promotion",
                record.record_id
            )));
        }

        let now_ms = dt_to_ms(Utc::now());
        tx.execute(
            "UPDATE student_academic_records
             SET result_status = 'tc_issued', promotion_status = 'transferred', is_locked = 1,
                 locked_at_ms = ?2, locked_by = ?3, updated_at_ms = ?2
             WHERE record_id = ?1",
            params![record.record_id, now_ms, actor],
        )
        .map_err(|e| map_sqlite_err("mark record transferred", e))?;

        let was_eligible = record.fee_cleared && record.backlog_count == 0;
        tx.execute(
            "INSERT INTO promotion_logs
             (log_id, student_id, from_record_id, from_session_id, from_program_id,
              from_academic_year, from_division_id, from_result_status, to_session_id,
              to_program_id, to_academic_year, to_division_id, promotion_type, was_eligible,
              attendance_percentage, fee_cleared, backlog_count, promoted_by, promoted_by_role,
              is_override, override_reason, override_approved_by, new_academic_record_id, status,
              rolled_back_by, rolled_back_at_ms, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, NULL, NULL, NULL, 'tc_issued', ?9,
                     ?10, ?11, ?12, ?13, NULL, 0, NULL, NULL, NULL, 'completed', NULL, NULL,
                     ?14, ?14)",
            params![
                new_id("log"),
                record.student_id,
                record.record_id,
                record.academic_session_id,
                record.program_id,
                record.academic_year,
                record.division_id,
                record.result_status.as_str(),
                was_eligible,
                record.attendance_percentage,
                record.fee_cleared,
                record.backlog_count,
                actor,
                now_ms,
            ],
        )
        .map_err(|e| map_sqlite_err("insert tc_issued log", e))?;

        tx.commit()
            .map_err(|e| map_sqlite_err("commit transfer mark tx", e))?;
        drop(conn);
        self.record_by_id(&record.record_id)?
            .ok_or_else(|| EngineError::Internal("record vanished after transfer mark".to_string()))
    }
}

impl TransferRepository for SqliteAcademicStore {
    fn transfer_by_id(&self, transfer_id: &str) -> Result<Option<TransferRecord>, EngineError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM transfer_records WHERE transfer_id = ?1 AND deleted_at_ms IS NULL",
                TRANSFER_COLUMNS
            ))
            .map_err(|e| map_sqlite_err("prepare transfer by id", e))?;
        stmt.query_row(params![transfer_id], map_row_to_transfer)
            .optional()
            .map_err(|e| map_sqlite_err("query transfer by id", e))
    }

    fn active_transfer(&self, student_id: &str) -> Result<Option<TransferRecord>, EngineError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM transfer_records
                 WHERE student_id = ?1 AND status != 'cancelled' AND deleted_at_ms IS NULL",
                TRANSFER_COLUMNS
            ))
            .map_err(|e| map_sqlite_err("prepare active transfer", e))?;
        stmt.query_row(params![student_id], map_row_to_transfer)
            .optional()
            .map_err(|e| map_sqlite_err("query active transfer", e))
    }

    fn create_transfer(&self, request: &NewTransferRequest) -> Result<TransferRecord, EngineError> {
        let requested_at = Utc::now();
        let year = requested_at.format("%Y").to_string();
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| map_sqlite_err("begin transfer tx", e))?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT tc_number FROM transfer_records
                 WHERE student_id = ?1 AND status != 'cancelled' AND deleted_at_ms IS NULL",
                params![request.student_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| map_sqlite_err("query existing transfer", e))?;
        if let Some(tc_number) = existing {
            return Err(EngineError::Conflict(format!(
                "student '{}' already has an active transfer '{}'",
                request.student_id, tc_number
            )));
        }

        let seed: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM transfer_records WHERE tc_number LIKE ?1",
                params![format!("TC{}%", year)],
                |r| r.get(0),
            )
            .map_err(|e| map_sqlite_err("count tc numbers", e))?;

        let transfer_id = new_id("tr");
        let now_ms = dt_to_ms(requested_at);
        let mut inserted = false;
        // Collision-checked assignment: the unique index arbitrates, we retry
        // with the next sequence number.
        for attempt in 0..TC_NUMBER_ATTEMPTS {
            let tc_number = format!("TC{}{:05}", year, seed + 1 + attempt as i64);
            let insert = tx.execute(
                "INSERT INTO transfer_records
                 (transfer_id, student_id, academic_session_id, program_id, academic_year,
                  tc_number, transfer_type, status, result_status, attendance_percentage,
                  backlog_count, fee_cleared, conduct_rating, readmission_eligible,
                  destination_institution, destination_address, requested_by, approved_by,
                  issued_by, document_path, is_override, override_reason, cancel_reason,
                  requested_at_ms, approved_at_ms, issued_at_ms, cancelled_at_ms, updated_at_ms,
                  deleted_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                         ?15, ?16, NULL, NULL, ?17, ?18, ?19, NULL, ?20, NULL, NULL, NULL, ?20,
                         NULL)",
                params![
                    transfer_id,
                    request.student_id,
                    request.academic_session_id,
                    request.program_id,
                    request.academic_year,
                    tc_number,
                    request.transfer_type.as_str(),
                    request.result_status.as_str(),
                    request.attendance_percentage,
                    request.backlog_count,
                    request.fee_cleared,
                    request.conduct_rating,
                    request.readmission_eligible,
                    request.destination_institution,
                    request.destination_address,
                    request.requested_by,
                    request.document_path,
                    request.is_override,
                    request.override_reason,
                    now_ms,
                ],
            );
            match insert {
                Ok(_) => {
                    inserted = true;
                    break;
                }
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    continue;
                }
                Err(e) => return Err(map_sqlite_err("insert transfer", e)),
            }
        }
        if !inserted {
            return Err(EngineError::Conflict(format!(
                "could not assign a unique TC number for year {}",
                year
            )));
        }

        let transfer = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {} FROM transfer_records WHERE transfer_id = ?1",
                    TRANSFER_COLUMNS
                ))
                .map_err(|e| map_sqlite_err("prepare read transfer", e))?;
            stmt.query_row(params![transfer_id], map_row_to_transfer)
                .map_err(|e| map_sqlite_err("read transfer after insert", e))?
        };
        tx.commit()
            .map_err(|e| map_sqlite_err("commit transfer tx", e))?;
        Ok(transfer)
    }

    fn transition_transfer(
        &self,
        transfer_id: &str,
        expected_from: &[TransferStatus],
        to: TransferStatus,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<TransferRecord, EngineError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| map_sqlite_err("begin transfer transition tx", e))?;

        let current = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {} FROM transfer_records WHERE transfer_id = ?1 AND deleted_at_ms IS NULL",
                    TRANSFER_COLUMNS
                ))
                .map_err(|e| map_sqlite_err("prepare transition read", e))?;
            stmt.query_row(params![transfer_id], map_row_to_transfer)
                .optional()
                .map_err(|e| map_sqlite_err("query transition read", e))?
        }
        .ok_or_else(|| EngineError::NotFound(format!("transfer '{}' not found", transfer_id)))?;

        if !expected_from.contains(&current.status) {
            return Err(EngineError::InvalidState(format!(
                "transfer '{}' is {} and cannot move to {}",
                transfer_id,
                current.status.as_str(),
                to.as_str()
            )));
        }

        let now_ms = dt_to_ms(Utc::now());
        match to {
            TransferStatus::Approved => tx.execute(
                "UPDATE transfer_records
                 SET status = 'approved', approved_by = ?2, approved_at_ms = ?3, updated_at_ms = ?3
                 WHERE transfer_id = ?1",
                params![transfer_id, actor, now_ms],
            ),
            TransferStatus::Issued => tx.execute(
                "UPDATE transfer_records
                 SET status = 'issued', issued_by = ?2, issued_at_ms = ?3, updated_at_ms = ?3
                 WHERE transfer_id = ?1",
                params![transfer_id, actor, now_ms],
            ),
            TransferStatus::Cancelled => tx.execute(
                "UPDATE transfer_records
                 SET status = 'cancelled', cancel_reason = ?2, cancelled_at_ms = ?3,
                     updated_at_ms = ?3
                 WHERE transfer_id = ?1",
                params![transfer_id, reason, now_ms],
            ),
            TransferStatus::Pending => {
                return Err(EngineError::InvalidState(
                    "a transfer never returns to pending".into(),
                ))
            }
        }
        .map_err(|e| map_sqlite_err("apply transfer transition", e))?;

        let updated = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {} FROM transfer_records WHERE transfer_id = ?1",
                    TRANSFER_COLUMNS
                ))
                .map_err(|e| map_sqlite_err("prepare reread transfer", e))?;
            stmt.query_row(params![transfer_id], map_row_to_transfer)
                .map_err(|e| map_sqlite_err("reread transfer", e))?
        };
        tx.commit()
            .map_err(|e| map_sqlite_err("commit transfer transition tx", e))?;
        Ok(updated)
    }
}

impl SessionRepository for SqliteAcademicStore {
    fn get_session(&self, session_id: &str) -> Result<Option<AcademicSession>, EngineError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT session_id, name, starts_on_ms, ends_on_ms, is_active
                 FROM academic_sessions WHERE session_id = ?1",
            )
            .map_err(|e| map_sqlite_err("prepare get session", e))?;
        stmt.query_row(params![session_id], map_row_to_session)
            .optional()
            .map_err(|e| map_sqlite_err("query get session", e))
    }

    fn create_session(&self, session: &AcademicSession) -> Result<(), EngineError> {
        let conn = self.conn()?;
        let insert = conn.execute(
            "INSERT INTO academic_sessions (session_id, name, starts_on_ms, ends_on_ms, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.session_id,
                session.name,
                dt_to_ms(session.starts_on),
                dt_to_ms(session.ends_on),
                session.is_active,
            ],
        );
        match insert {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(EngineError::Conflict(format!(
                    "session '{}' already exists",
                    session.session_id
                )))
            }
            Err(e) => Err(map_sqlite_err("insert session", e)),
        }
    }

    fn activate_session(&self, session_id: &str) -> Result<AcademicSession, EngineError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| map_sqlite_err("begin session activation tx", e))?;
        let activated = tx
            .execute(
                "UPDATE academic_sessions SET is_active = 1 WHERE session_id = ?1",
                params![session_id],
            )
            .map_err(|e| map_sqlite_err("activate session", e))?;
        if activated == 0 {
            return Err(EngineError::NotFound(format!(
                "session '{}' not found",
                session_id
            )));
        }
        tx.execute(
            "UPDATE academic_sessions SET is_active = 0 WHERE session_id != ?1",
            params![session_id],
        )
        .map_err(|e| map_sqlite_err("deactivate other sessions", e))?;
        let session = tx
            .query_row(
                "SELECT session_id, name, starts_on_ms, ends_on_ms, is_active
                 FROM academic_sessions WHERE session_id = ?1",
                params![session_id],
                map_row_to_session,
            )
            .map_err(|e| map_sqlite_err("reread session", e))?;
        tx.commit()
            .map_err(|e| map_sqlite_err("commit session activation tx", e))?;
        Ok(session)
    }
}

fn map_row_to_rule(row: &rusqlite::Row) -> rusqlite::Result<AcademicRule> {
    let allowed_values_json: Option<String> = row.get(8)?;
    let allowed_values = match allowed_values_json {
        Some(json) => Some(serde_json::from_str(&json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?),
        None => None,
    };
    Ok(AcademicRule {
        rule_code: row.get(0)?,
        name: row.get(1)?,
        category: sql_enum(row, 2, RuleCategory::parse)?,
        value_type: sql_enum(row, 3, ValueType::parse)?,
        value: row.get(4)?,
        default_value: row.get(5)?,
        constraints: RuleConstraints {
            min_value: row.get(6)?,
            max_value: row.get(7)?,
            allowed_values,
            pattern: row.get(9)?,
        },
        effective_from: row.get::<_, Option<i64>>(10)?.map(ms_to_dt),
        effective_to: row.get::<_, Option<i64>>(11)?.map(ms_to_dt),
        is_active: row.get(12)?,
        is_mandatory: row.get(13)?,
        priority: row.get(14)?,
        parent_rule_id: row.get(15)?,
        created_at: ms_to_dt(row.get(16)?),
        updated_at: ms_to_dt(row.get(17)?),
        deleted_at: row.get::<_, Option<i64>>(18)?.map(ms_to_dt),
    })
}

fn map_row_to_configuration(row: &rusqlite::Row) -> rusqlite::Result<RuleConfiguration> {
    Ok(RuleConfiguration {
        configuration_id: row.get(0)?,
        rule_code: row.get(1)?,
        academic_session_id: row.get(2)?,
        program_id: row.get(3)?,
        department_id: row.get(4)?,
        value: row.get(5)?,
        is_override: row.get(6)?,
        override_reason: row.get(7)?,
        override_approved_by: row.get(8)?,
        effective_from: row.get::<_, Option<i64>>(9)?.map(ms_to_dt),
        effective_to: row.get::<_, Option<i64>>(10)?.map(ms_to_dt),
        is_active: row.get(11)?,
        created_at: ms_to_dt(row.get(12)?),
        updated_at: ms_to_dt(row.get(13)?),
        deleted_at: row.get::<_, Option<i64>>(14)?.map(ms_to_dt),
    })
}

fn map_row_to_record(row: &rusqlite::Row) -> rusqlite::Result<StudentAcademicRecord> {
    Ok(StudentAcademicRecord {
        record_id: row.get(0)?,
        student_id: row.get(1)?,
        academic_session_id: row.get(2)?,
        program_id: row.get(3)?,
        academic_year: row.get(4)?,
        division_id: row.get(5)?,
        result_status: sql_enum(row, 6, ResultStatus::parse)?,
        promotion_status: sql_enum(row, 7, PromotionStatus::parse)?,
        backlog_count: row.get::<_, i64>(8)? as u32,
        max_atkt_attempts: row.get::<_, i64>(9)? as u32,
        current_atkt_attempt: row.get::<_, i64>(10)? as u32,
        attendance_percentage: row.get(11)?,
        attendance_status: sql_enum(row, 12, AttendanceStatus::parse)?,
        fee_cleared: row.get(13)?,
        outstanding_amount: row.get(14)?,
        is_locked: row.get(15)?,
        locked_at: row.get::<_, Option<i64>>(16)?.map(ms_to_dt),
        locked_by: row.get(17)?,
        created_at: ms_to_dt(row.get(18)?),
        updated_at: ms_to_dt(row.get(19)?),
        deleted_at: row.get::<_, Option<i64>>(20)?.map(ms_to_dt),
    })
}

fn map_row_to_log(row: &rusqlite::Row) -> rusqlite::Result<PromotionLog> {
    Ok(PromotionLog {
        log_id: row.get(0)?,
        student_id: row.get(1)?,
        from_record_id: row.get(2)?,
        from_session_id: row.get(3)?,
        from_program_id: row.get(4)?,
        from_academic_year: row.get(5)?,
        from_division_id: row.get(6)?,
        from_result_status: sql_enum(row, 7, ResultStatus::parse)?,
        to_session_id: row.get(8)?,
        to_program_id: row.get(9)?,
        to_academic_year: row.get(10)?,
        to_division_id: row.get(11)?,
        promotion_type: sql_enum(row, 12, PromotionType::parse)?,
        was_eligible: row.get(13)?,
        attendance_percentage: row.get(14)?,
        fee_cleared: row.get(15)?,
        backlog_count: row.get::<_, i64>(16)? as u32,
        promoted_by: row.get(17)?,
        promoted_by_role: row.get(18)?,
        is_override: row.get(19)?,
        override_reason: row.get(20)?,
        override_approved_by: row.get(21)?,
        new_academic_record_id: row.get(22)?,
        status: sql_enum(row, 23, PromotionLogStatus::parse)?,
        rolled_back_by: row.get(24)?,
        rolled_back_at: row.get::<_, Option<i64>>(25)?.map(ms_to_dt),
        created_at: ms_to_dt(row.get(26)?),
        updated_at: ms_to_dt(row.get(27)?),
    })
}

fn map_row_to_transfer(row: &rusqlite::Row) -> rusqlite::Result<TransferRecord> {
    Ok(TransferRecord {
        transfer_id: row.get(0)?,
        student_id: row.get(1)?,
        academic_session_id: row.get(2)?,
        program_id: row.get(3)?,
        academic_year: row.get(4)?,
        tc_number: row.get(5)?,
        transfer_type: sql_enum(row, 6, TransferType::parse)?,
        status: sql_enum(row, 7, TransferStatus::parse)?,
        result_status: sql_enum(row, 8, ResultStatus::parse)?,
        attendance_percentage: row.get(9)?,
        backlog_count: row.get::<_, i64>(10)? as u32,
        fee_cleared: row.get(11)?,
        conduct_rating: row.get(12)?,
        readmission_eligible: row.get(13)?,
        destination_institution: row.get(14)?,
        destination_address: row.get(15)?,
        requested_by: row.get(16)?,
        approved_by: row.get(17)?,
        issued_by: row.get(18)?,
        document_path: row.get(19)?,
        is_override: row.get(20)?,
        override_reason: row.get(21)?,
        cancel_reason: row.get(22)?,
        requested_at: ms_to_dt(row.get(23)?),
        approved_at: row.get::<_, Option<i64>>(24)?.map(ms_to_dt),
        issued_at: row.get::<_, Option<i64>>(25)?.map(ms_to_dt),
        cancelled_at: row.get::<_, Option<i64>>(26)?.map(ms_to_dt),
        updated_at: ms_to_dt(row.get(27)?),
        deleted_at: row.get::<_, Option<i64>>(28)?.map(ms_to_dt),
    })
}

fn map_row_to_session(row: &rusqlite::Row) -> rusqlite::Result<AcademicSession> {
    Ok(AcademicSession {
        session_id: row.get(0)?,
        name: row.get(1)?,
        starts_on: ms_to_dt(row.get(2)?),
        ends_on: ms_to_dt(row.get(3)?),
        is_active: row.get(4)?,
    })
}

fn sql_enum<T>(
    row: &rusqlite::Row,
    index: usize,
    parse: fn(&str) -> Result<T, EngineError>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    parse(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Scope tuple encoded for the partial unique index; '*' stands for "all".
fn scope_key(session: Option<&str>, program: Option<&str>, department: Option<&str>) -> String {
    format!(
        "{}|{}|{}",
        session.unwrap_or("*"),
        program.unwrap_or("*"),
        department.unwrap_or("*")
    )
}

fn map_sqlite_err(context: &str, err: rusqlite::Error) -> EngineError {
    EngineError::Internal(format!("{}: {}", context, err))
}

fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}
