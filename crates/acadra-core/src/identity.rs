//! Identity types for the academic lifecycle engine.
//!
//! Ids are plain strings assigned by the admission system or generated here
//! with a short kind prefix. Keeping them as aliases (rather than newtypes)
//! matches how they travel through the HTTP surface and the store.

/// Identifies a student across their whole institutional lifetime.
pub type StudentId = String;

/// Identifies one academic session (e.g. "2025-26").
pub type SessionId = String;

/// Identifies a program of study.
pub type ProgramId = String;

/// Identifies a department.
pub type DepartmentId = String;

/// Identifies a division/section within a program year.
pub type DivisionId = String;

/// Identifies one student-session academic record.
pub type RecordId = String;

/// Identifies one promotion log entry.
pub type LogId = String;

/// Identifies one rule configuration row.
pub type ConfigurationId = String;

/// Identifies one transfer record.
pub type TransferId = String;

/// Identifies the acting user (admission clerk, registrar, admin).
pub type ActorId = String;

/// Generates a fresh id with a short kind prefix, e.g. `rec-6f0c…`.
pub fn new_id(kind: &str) -> String {
    format!("{}-{}", kind, uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::new_id;

    #[test]
    fn new_id_carries_kind_prefix() {
        let id = new_id("rec");
        assert!(id.starts_with("rec-"));
        assert!(id.len() > 8);
    }

    #[test]
    fn new_id_is_unique_per_call() {
        assert_ne!(new_id("log"), new_id("log"));
    }
}
