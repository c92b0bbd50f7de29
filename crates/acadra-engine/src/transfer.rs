//! Transfer certificate workflow.
//!
//! A smaller state machine than promotion: pending → approved → issued, with
//! cancellation allowed from pending/approved only. Issuing delegates the
//! student record's terminal transition to the record layer instead of
//! duplicating it here.

use std::sync::Arc;

use serde::Serialize;

use acadra_core::EngineError;

use super::models::{
    NewTransferRequest, ResultStatus, StudentAcademicRecord, TransferRecord, TransferStatus,
    TransferType,
};
use super::repository::{PromotionRepository, TransferRepository};

/// Caller intent for a transfer request.
#[derive(Clone, Debug)]
pub struct TransferCommand {
    pub student_id: String,
    pub transfer_type: TransferType,
    pub conduct_rating: Option<String>,
    pub readmission_eligible: bool,
    pub destination_institution: Option<String>,
    pub destination_address: Option<String>,
    pub requested_by: String,
    pub document_path: Option<String>,
    pub is_override: bool,
    pub override_reason: Option<String>,
}

/// Advisory verdict for a transfer. Warnings do not cancel anything already
/// recorded; they block a new request unless it carries an override.
#[derive(Clone, Debug, Serialize)]
pub struct TransferAdvisory {
    pub clear: bool,
    pub warnings: Vec<String>,
}

/// Drives the transfer state machine over the store.
pub struct TransferWorkflow<S: TransferRepository + PromotionRepository> {
    store: Arc<S>,
}

impl<S: TransferRepository + PromotionRepository> TransferWorkflow<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Rule-of-thumb exit check: outstanding dues and live backlogs.
    pub fn verify_eligibility(&self, student_id: &str) -> Result<TransferAdvisory, EngineError> {
        let record = self.load_current(student_id)?;
        Ok(advisory_for(&record))
    }

    /// Create a pending transfer with a freshly assigned TC number and a
    /// snapshot of the student's standing at request time.
    pub fn create_request(&self, command: &TransferCommand) -> Result<TransferRecord, EngineError> {
        let record = self.load_current(&command.student_id)?;
        if record.result_status == ResultStatus::TcIssued {
            return Err(EngineError::Conflict(format!(
                "student '{}' has already been issued a transfer certificate",
                command.student_id
            )));
        }
        if let Some(existing) = self.store.active_transfer(&command.student_id)? {
            return Err(EngineError::Conflict(format!(
                "student '{}' already has an active transfer '{}'",
                command.student_id, existing.tc_number
            )));
        }

        let advisory = advisory_for(&record);
        if !advisory.clear && !command.is_override {
            return Err(EngineError::NotEligible {
                reasons: advisory.warnings,
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
                "an override transfer requires a non-empty override_reason".into(),
            ));
        }

        let request = NewTransferRequest {
            student_id: command.student_id.clone(),
            academic_session_id: record.academic_session_id.clone(),
            program_id: record.program_id.clone(),
            academic_year: record.academic_year.clone(),
            transfer_type: command.transfer_type,
            result_status: record.result_status,
            attendance_percentage: record.attendance_percentage,
            backlog_count: record.backlog_count,
            fee_cleared: record.fee_cleared,
            conduct_rating: command.conduct_rating.clone(),
            readmission_eligible: command.readmission_eligible,
            destination_institution: command.destination_institution.clone(),
            destination_address: command.destination_address.clone(),
            requested_by: command.requested_by.clone(),
            document_path: command.document_path.clone(),
            is_override: command.is_override,
            override_reason: command.override_reason.clone(),
        };
        let transfer = self.store.create_transfer(&request)?;
        log::info!(
            "transfer_requested student_id={} tc_number={} type={}",
            transfer.student_id,
            transfer.tc_number,
            transfer.transfer_type.as_str()
        );
        Ok(transfer)
    }

    /// pending → approved.
    pub fn approve(&self, transfer_id: &str, approver: &str) -> Result<TransferRecord, EngineError> {
        let transfer = self.store.transition_transfer(
            transfer_id,
            &[TransferStatus::Pending],
            TransferStatus::Approved,
            approver,
            None,
        )?;
        log::info!(
            "transfer_approved transfer_id={} tc_number={} approver={}",
            transfer.transfer_id,
            transfer.tc_number,
            approver
        );
        Ok(transfer)
    }

    /// approved → issued, then the record layer moves the student's active
    /// record to tc_issued and appends the terminal audit entry.
    pub fn issue(&self, transfer_id: &str, issuer: &str) -> Result<TransferRecord, EngineError> {
        let transfer = self.store.transition_transfer(
            transfer_id,
            &[TransferStatus::Approved],
            TransferStatus::Issued,
            issuer,
            None,
        )?;
        self.store
            .mark_record_transferred(&transfer.student_id, issuer)?;
        log::info!(
            "transfer_issued transfer_id={} tc_number={} issuer={}",
            transfer.transfer_id,
            transfer.tc_number,
            issuer
        );
        Ok(transfer)
    }

    /// pending/approved → cancelled. Issued certificates are immutable.
    pub fn cancel(
        &self,
        transfer_id: &str,
        actor: &str,
        reason: &str,
    ) -> Result<TransferRecord, EngineError> {
        if reason.trim().is_empty() {
            return Err(EngineError::Validation(
                "a cancellation reason is required".into(),
            ));
        }
        let transfer = self.store.transition_transfer(
            transfer_id,
            &[TransferStatus::Pending, TransferStatus::Approved],
            TransferStatus::Cancelled,
            actor,
            Some(reason),
        )?;
        log::info!(
            "transfer_cancelled transfer_id={} tc_number={} actor={}",
            transfer.transfer_id,
            transfer.tc_number,
            actor
        );
        Ok(transfer)
    }

    pub fn get(&self, transfer_id: &str) -> Result<TransferRecord, EngineError> {
        self.store.transfer_by_id(transfer_id)?.ok_or_else(|| {
            EngineError::NotFound(format!("transfer '{}' not found", transfer_id))
        })
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

fn advisory_for(record: &StudentAcademicRecord) -> TransferAdvisory {
    let mut warnings = Vec::new();
    if !record.fee_cleared {
        warnings.push(format!(
            "fees are not cleared (outstanding amount {:.2})",
            record.outstanding_amount
        ));
    }
    if record.backlog_count > 0 {
        warnings.push(format!(
            "{} backlog subject(s) are still open",
            record.backlog_count
        ));
    }
    TransferAdvisory {
        clear: warnings.is_empty(),
        warnings,
    }
}
