//! HTTP surface for the academic lifecycle engine.
//!
//! Thin axum layer over the engine crate: DTOs, the error envelope, and the
//! router. All decision logic stays in the engine; handlers validate input,
//! translate errors, and keep the resolver cache honest on writes.

pub mod api_errors;
pub mod api_handlers;
pub mod api_models;

pub use api_errors::ApiError;
pub use api_handlers::{build_router, AcademicApiState};
pub use api_models::ApiEnvelope;
