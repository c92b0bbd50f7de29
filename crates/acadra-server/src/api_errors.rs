//! HTTP error mapping for academic API handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use acadra_core::EngineError;

#[derive(Clone, Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(ErrorState),
    NotFound(ErrorState),
    Conflict(ErrorState),
    Unprocessable(ErrorState),
    Internal(ErrorState),
}

#[derive(Clone, Debug)]
pub struct ErrorState {
    pub code: &'static str,
    pub message: String,
    pub request_id: Option<String>,
    pub details: Option<Value>,
}

impl ErrorState {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: None,
            details: None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
struct ErrorEnvelope {
    success: bool,
    request_id: String,
    error: ErrorBody,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(ErrorState::new("invalid_argument", message))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(ErrorState::new("not_found", message))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(ErrorState::new("conflict", message))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(ErrorState::new("internal", message))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        let request_id = Some(request_id.into());
        match &mut self {
            Self::BadRequest(s)
            | Self::NotFound(s)
            | Self::Conflict(s)
            | Self::Unprocessable(s)
            | Self::Internal(s) => s.request_id = request_id,
        }
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        match &mut self {
            Self::BadRequest(s)
            | Self::NotFound(s)
            | Self::Conflict(s)
            | Self::Unprocessable(s)
            | Self::Internal(s) => s.details = Some(details),
        }
        self
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let code = err.code();
        match err {
            EngineError::Validation(message) => Self::BadRequest(ErrorState::new(code, message)),
            EngineError::NotEligible { reasons } => {
                let state = ErrorState {
                    code,
                    message: "the student does not meet the promotion criteria".to_string(),
                    request_id: None,
                    details: Some(serde_json::json!({ "reasons": reasons })),
                };
                Self::BadRequest(state)
            }
            EngineError::NotFound(message) => Self::NotFound(ErrorState::new(code, message)),
            EngineError::Conflict(message)
            | EngineError::LockedRecord(message)
            | EngineError::InvalidState(message) => {
                Self::Conflict(ErrorState::new(code, message))
            }
            EngineError::RuleValue(message) => {
                Self::Unprocessable(ErrorState::new(code, message))
            }
            EngineError::Internal(message) => Self::Internal(ErrorState::new(code, message)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, state) = match self {
            Self::BadRequest(s) => (StatusCode::BAD_REQUEST, s),
            Self::NotFound(s) => (StatusCode::NOT_FOUND, s),
            Self::Conflict(s) => (StatusCode::CONFLICT, s),
            Self::Unprocessable(s) => (StatusCode::UNPROCESSABLE_ENTITY, s),
            Self::Internal(s) => (StatusCode::INTERNAL_SERVER_ERROR, s),
        };
        let request_id = state
            .request_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let body = ErrorEnvelope {
            success: false,
            request_id,
            error: ErrorBody {
                code: state.code,
                message: state.message,
                details: state.details,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_stable_codes() {
        let api: ApiError = EngineError::Validation("bad input".into()).into();
        assert!(matches!(api, ApiError::BadRequest(ref s) if s.code == "invalid_argument"));

        let api: ApiError = EngineError::LockedRecord("locked".into()).into();
        assert!(matches!(api, ApiError::Conflict(ref s) if s.code == "locked_record"));

        let api: ApiError = EngineError::RuleValue("not a number".into()).into();
        assert!(matches!(api, ApiError::Unprocessable(ref s) if s.code == "rule_value"));
    }

    #[test]
    fn not_eligible_carries_reasons_in_details() {
        let api: ApiError = EngineError::NotEligible {
            reasons: vec!["attendance below minimum".into()],
        }
        .into();
        match api {
            ApiError::BadRequest(state) => {
                let details = state.details.expect("details present");
                assert_eq!(details["reasons"][0], "attendance below minimum");
            }
            other => panic!("expected BadRequest, got {:?}", other),
        }
    }
}
