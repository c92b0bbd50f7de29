//! Core types for the academic lifecycle engine.
//!
//! Identity aliases, the engine error taxonomy, and the typed rule value
//! boundary. No I/O lives here; everything is consumed by the engine and
//! server crates.

pub mod error;
pub mod identity;
pub mod rule_value;

pub use error::EngineError;
pub use identity::{
    new_id, ActorId, ConfigurationId, DepartmentId, DivisionId, LogId, ProgramId, RecordId,
    SessionId, StudentId, TransferId,
};
pub use rule_value::{cast_value, RuleConstraints, RuleValue, ValueType};
