//! Transfer certificate lifecycle against the SQLite store.

use std::sync::Arc;

use acadra_core::EngineError;
use acadra_engine::{
    seed_default_rules, AttendanceStatus, NewStudentAdmission, PromotionEngine,
    PromotionRepository, PromotionStatus, PromotionType, RecordSignals, ResolverCache,
    ResultStatus, SqliteAcademicStore, TransferCommand, TransferStatus, TransferType,
    TransferWorkflow,
};

fn store() -> Arc<SqliteAcademicStore> {
    let store = SqliteAcademicStore::in_memory().expect("open in-memory store");
    seed_default_rules(&store).expect("seed rule catalog");
    Arc::new(store)
}

fn admit(store: &SqliteAcademicStore, student_id: &str) {
    store
        .create_admission_record(&NewStudentAdmission {
            student_id: student_id.to_string(),
            academic_session_id: "2025-26".to_string(),
            program_id: "bsc-cs".to_string(),
            academic_year: "FY".to_string(),
            division_id: None,
            max_atkt_attempts: 2,
        })
        .expect("admission record");
    store
        .apply_academic_signals(
            student_id,
            &RecordSignals {
                result_status: ResultStatus::Pass,
                backlog_count: 0,
                attendance_percentage: 86.0,
                attendance_status: AttendanceStatus::Eligible,
                fee_cleared: true,
                outstanding_amount: 0.0,
            },
        )
        .expect("apply signals");
}

fn command(student_id: &str) -> TransferCommand {
    TransferCommand {
        student_id: student_id.to_string(),
        transfer_type: TransferType::ParentRelocation,
        conduct_rating: Some("good".to_string()),
        readmission_eligible: true,
        destination_institution: Some("Northside College".to_string()),
        destination_address: None,
        requested_by: "clerk-1".to_string(),
        document_path: None,
        is_override: false,
        override_reason: None,
    }
}

#[test]
fn full_lifecycle_marks_the_student_record_terminal() {
    let store = store();
    let workflow = TransferWorkflow::new(store.clone());
    admit(&store, "stu-1");

    let transfer = workflow.create_request(&command("stu-1")).expect("request");
    assert_eq!(transfer.status, TransferStatus::Pending);
    assert_eq!(transfer.result_status, ResultStatus::Pass);

    let approved = workflow
        .approve(&transfer.transfer_id, "principal-1")
        .expect("approve");
    assert_eq!(approved.status, TransferStatus::Approved);
    assert_eq!(approved.approved_by.as_deref(), Some("principal-1"));
    assert!(approved.approved_at.is_some());

    let issued = workflow
        .issue(&transfer.transfer_id, "registrar-1")
        .expect("issue");
    assert_eq!(issued.status, TransferStatus::Issued);

    let record = store
        .current_record("stu-1")
        .expect("current record")
        .expect("present");
    assert_eq!(record.result_status, ResultStatus::TcIssued);
    assert_eq!(record.promotion_status, PromotionStatus::Transferred);
    assert!(record.is_locked);

    let history = store.promotion_history("stu-1").expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].promotion_type, PromotionType::TcIssued);
    assert!(history[0].new_academic_record_id.is_none());
}

#[test]
fn tc_numbers_are_unique_across_students() {
    let store = store();
    let workflow = TransferWorkflow::new(store.clone());
    admit(&store, "stu-1");
    admit(&store, "stu-2");

    let first = workflow.create_request(&command("stu-1")).expect("first request");
    let second = workflow.create_request(&command("stu-2")).expect("second request");
    assert_ne!(first.tc_number, second.tc_number);
    assert!(first.tc_number.starts_with("TC"));
    assert!(second.tc_number.starts_with("TC"));
}

#[test]
fn one_active_transfer_per_student_until_cancelled() {
    let store = store();
    let workflow = TransferWorkflow::new(store.clone());
    admit(&store, "stu-1");

    let transfer = workflow.create_request(&command("stu-1")).expect("request");
    let err = workflow
        .create_request(&command("stu-1"))
        .expect_err("duplicate must conflict");
    assert!(matches!(err, EngineError::Conflict(_)));

    workflow
        .cancel(&transfer.transfer_id, "clerk-1", "entered for the wrong student")
        .expect("cancel");
    workflow
        .create_request(&command("stu-1"))
        .expect("a cancelled transfer frees the slot");
}

#[test]
fn issue_and_cancel_respect_the_state_machine() {
    let store = store();
    let workflow = TransferWorkflow::new(store.clone());
    admit(&store, "stu-1");

    let transfer = workflow.create_request(&command("stu-1")).expect("request");
    assert!(matches!(
        workflow.issue(&transfer.transfer_id, "registrar-1"),
        Err(EngineError::InvalidState(_))
    ));

    workflow.approve(&transfer.transfer_id, "principal-1").expect("approve");
    workflow.issue(&transfer.transfer_id, "registrar-1").expect("issue");

    assert!(matches!(
        workflow.cancel(&transfer.transfer_id, "clerk-1", "late change of mind"),
        Err(EngineError::InvalidState(_))
    ));
    assert!(matches!(
        workflow.approve(&transfer.transfer_id, "principal-1"),
        Err(EngineError::InvalidState(_))
    ));
}

#[test]
fn outstanding_dues_block_the_request_unless_overridden() {
    let store = store();
    let workflow = TransferWorkflow::new(store.clone());
    admit(&store, "stu-1");
    store
        .apply_academic_signals(
            "stu-1",
            &RecordSignals {
                result_status: ResultStatus::Atkt,
                backlog_count: 2,
                attendance_percentage: 80.0,
                attendance_status: AttendanceStatus::Eligible,
                fee_cleared: false,
                outstanding_amount: 2300.0,
            },
        )
        .expect("apply signals");

    let advisory = workflow.verify_eligibility("stu-1").expect("advisory");
    assert!(!advisory.clear);
    assert_eq!(advisory.warnings.len(), 2);

    let err = workflow
        .create_request(&command("stu-1"))
        .expect_err("dues must block");
    assert!(matches!(err, EngineError::NotEligible { .. }));

    let mut cmd = command("stu-1");
    cmd.is_override = true;
    cmd.override_reason = Some("dues recovery handled by accounts".to_string());
    let transfer = workflow.create_request(&cmd).expect("override proceeds");
    assert!(transfer.is_override);
    assert_eq!(transfer.backlog_count, 2);
    assert!(!transfer.fee_cleared);
}

#[test]
fn tc_issuance_is_terminal_for_promotion_and_rollback() {
    let store = store();
    let workflow = TransferWorkflow::new(store.clone());
    let promotions = PromotionEngine::new(store.clone(), ResolverCache::new());
    admit(&store, "stu-1");

    let transfer = workflow.create_request(&command("stu-1")).expect("request");
    workflow.approve(&transfer.transfer_id, "principal-1").expect("approve");
    workflow.issue(&transfer.transfer_id, "registrar-1").expect("issue");

    // The locked terminal record cannot be promoted.
    let err = promotions
        .promote(&acadra_engine::PromoteCommand {
            student_id: "stu-1".to_string(),
            to_session_id: "2026-27".to_string(),
            to_program_id: "bsc-cs".to_string(),
            to_academic_year: "SY".to_string(),
            to_division_id: None,
            actor: "registrar-1".to_string(),
            actor_role: None,
            is_override: false,
            override_reason: None,
            override_approved_by: None,
        })
        .expect_err("terminal record must not promote");
    assert!(matches!(err, EngineError::LockedRecord(_)));

    // The tc_issued audit entry has no successor record to roll back.
    let history = store.promotion_history("stu-1").expect("history");
    let rollback_err = promotions
        .rollback(&history[0].log_id, "registrar-1")
        .expect_err("terminal log must not roll back");
    assert!(matches!(rollback_err, EngineError::InvalidState(_)));
}
