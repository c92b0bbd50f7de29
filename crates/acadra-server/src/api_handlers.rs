//! Axum handlers for the academic lifecycle API.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{from_fn, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use sha2::{Digest, Sha256};

use acadra_core::EngineError;
use acadra_engine::{
    AcademicSession, IdempotencyRecord, NewRuleConfiguration, NewStudentAdmission,
    PromoteCommand, PromotionEngine, PromotionIdempotencyStore, PromotionRepository,
    RecordSignals, ResolutionContext, ResolverCache, RuleCategory, RuleFilter, RuleRepository,
    RuleResolver, SessionRepository, SqliteAcademicStore, TransferCommand, TransferWorkflow,
};

use super::api_errors::ApiError;
use super::api_models::{
    ApiEnvelope, ApproveOverrideRequest, BulkPromoteRequest, BulkPromoteResponse,
    ConfigureRuleRequest, CreateSessionRequest, EligibilityResponse, PromoteRequest,
    PromoteResponse, PromotionHistoryResponse, RecordResponse, ResolveQuery, ResolveResponse,
    RollbackRequest, RollbackResponse, RuleDetailResponse, RuleListQuery, TransferActionRequest,
    TransferRequestBody,
};

#[derive(Clone)]
pub struct AcademicApiState {
    pub store: Arc<SqliteAcademicStore>,
    pub cache: ResolverCache,
    pub resolver: Arc<RuleResolver<SqliteAcademicStore>>,
    pub promotions: Arc<PromotionEngine<SqliteAcademicStore>>,
    pub transfers: Arc<TransferWorkflow<SqliteAcademicStore>>,
    pub idempotency: Option<PromotionIdempotencyStore>,
}

impl AcademicApiState {
    pub fn new(store: Arc<SqliteAcademicStore>) -> Self {
        let cache = ResolverCache::new();
        let resolver = Arc::new(RuleResolver::new(store.clone(), cache.clone()));
        let promotions = Arc::new(PromotionEngine::new(store.clone(), cache.clone()));
        let transfers = Arc::new(TransferWorkflow::new(store.clone()));
        Self {
            store,
            cache,
            resolver,
            promotions,
            transfers,
            idempotency: None,
        }
    }

    pub fn with_sqlite_idempotency(store: Arc<SqliteAcademicStore>, db_path: &str) -> Self {
        let mut state = Self::new(store);
        if let Ok(idempotency) = PromotionIdempotencyStore::new(db_path) {
            state.idempotency = Some(idempotency);
        }
        state
    }
}

pub fn build_router(state: AcademicApiState) -> Router {
    Router::new()
        .route("/v1/rules", get(list_rules).post(create_rule))
        .route("/v1/rules/:rule_code", get(get_rule))
        .route("/v1/rules/:rule_code/configure", post(configure_rule))
        .route(
            "/v1/rules/:rule_code/configurations/:configuration_id/approve",
            post(approve_override),
        )
        .route("/v1/rules/:rule_code/history", get(rule_history))
        .route("/v1/rules/:rule_code/resolve", get(resolve_rule))
        .route("/v1/admissions", post(create_admission))
        .route("/v1/students/:student_id/record/signals", post(apply_signals))
        .route(
            "/v1/students/:student_id/promotion/eligibility",
            get(check_eligibility),
        )
        .route(
            "/v1/students/:student_id/promotion/preview",
            post(preview_promotion),
        )
        .route("/v1/students/:student_id/promotion", post(promote_student))
        .route(
            "/v1/students/:student_id/promotion/history",
            get(promotion_history),
        )
        .route("/v1/promotion/bulk", post(bulk_promote))
        .route("/v1/promotion/:log_id/rollback", post(rollback_promotion))
        .route("/v1/students/:student_id/transfer", post(create_transfer))
        .route("/v1/transfers/:transfer_id", get(get_transfer))
        .route("/v1/transfers/:transfer_id/approve", post(approve_transfer))
        .route("/v1/transfers/:transfer_id/issue", post(issue_transfer))
        .route("/v1/transfers/:transfer_id/cancel", post(cancel_transfer))
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/:session_id/activate", post(activate_session))
        .layer(from_fn(request_log_middleware))
        .with_state(state)
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn api_error(err: EngineError, rid: &str) -> ApiError {
    ApiError::from(err).with_request_id(rid.to_string())
}

fn payload_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"|");
    }
    format!("{:x}", hasher.finalize())
}

async fn request_log_middleware(
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let rid = request_id(&headers);
    log::info!(
        "academic_api_request request_id={} method={} path={}",
        rid,
        request.method(),
        request.uri().path()
    );
    next.run(request).await
}

fn validate_id(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::bad_request(format!("{} must not be empty", field)));
    }
    Ok(())
}

async fn list_rules(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Query(query): Query<RuleListQuery>,
) -> Result<Json<ApiEnvelope<Vec<acadra_engine::AcademicRule>>>, ApiError> {
    let rid = request_id(&headers);
    let category = query
        .category
        .as_deref()
        .map(RuleCategory::parse)
        .transpose()
        .map_err(|e| api_error(e, &rid))?;
    let filter = RuleFilter {
        category,
        active: query.active,
        search: query.search,
        limit: query.limit.unwrap_or(50).min(200),
        offset: query.offset.unwrap_or(0),
    };
    let rules = state
        .store
        .list_rules(&filter)
        .map_err(|e| api_error(e, &rid))?;
    Ok(Json(ApiEnvelope::ok(rid, rules)))
}

async fn create_rule(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Json(req): Json<acadra_engine::NewAcademicRule>,
) -> Result<(StatusCode, Json<ApiEnvelope<acadra_engine::AcademicRule>>), ApiError> {
    let rid = request_id(&headers);
    let rule = state
        .store
        .create_rule(&req)
        .map_err(|e| api_error(e, &rid))?;
    state.cache.invalidate_rule(&rule.rule_code);
    Ok((StatusCode::CREATED, Json(ApiEnvelope::ok(rid, rule))))
}

async fn get_rule(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Path(rule_code): Path<String>,
) -> Result<Json<ApiEnvelope<RuleDetailResponse>>, ApiError> {
    let rid = request_id(&headers);
    let rule = state
        .store
        .get_rule(&rule_code)
        .map_err(|e| api_error(e, &rid))?
        .ok_or_else(|| {
            ApiError::not_found(format!("unknown rule '{}'", rule_code)).with_request_id(rid.clone())
        })?;
    let configurations = state
        .store
        .active_configurations(&rule_code, chrono::Utc::now())
        .map_err(|e| api_error(e, &rid))?;
    Ok(Json(ApiEnvelope::ok(
        rid,
        RuleDetailResponse {
            rule,
            configurations,
        },
    )))
}

async fn configure_rule(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Path(rule_code): Path<String>,
    Json(req): Json<ConfigureRuleRequest>,
) -> Result<(StatusCode, Json<ApiEnvelope<acadra_engine::RuleConfiguration>>), ApiError> {
    let rid = request_id(&headers);
    let config = NewRuleConfiguration {
        rule_code: rule_code.clone(),
        academic_session_id: req.academic_session_id,
        program_id: req.program_id,
        department_id: req.department_id,
        value: req.value,
        is_override: req.is_override,
        override_reason: req.override_reason,
        effective_from: req.effective_from,
        effective_to: req.effective_to,
    };
    let created = state
        .store
        .insert_configuration(&config)
        .map_err(|e| api_error(e, &rid))?;
    state.cache.invalidate_rule(&rule_code);
    Ok((StatusCode::CREATED, Json(ApiEnvelope::ok(rid, created))))
}

async fn approve_override(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Path((rule_code, configuration_id)): Path<(String, String)>,
    Json(req): Json<ApproveOverrideRequest>,
) -> Result<Json<ApiEnvelope<acadra_engine::RuleConfiguration>>, ApiError> {
    let rid = request_id(&headers);
    validate_id(&req.approved_by, "approved_by").map_err(|e| e.with_request_id(rid.clone()))?;
    let approved = state
        .store
        .approve_override(&rule_code, &configuration_id, &req.approved_by)
        .map_err(|e| api_error(e, &rid))?;
    state.cache.invalidate_rule(&rule_code);
    Ok(Json(ApiEnvelope::ok(rid, approved)))
}

async fn rule_history(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Path(rule_code): Path<String>,
) -> Result<Json<ApiEnvelope<Vec<acadra_engine::RuleConfiguration>>>, ApiError> {
    let rid = request_id(&headers);
    let history = state
        .store
        .configurations_with_deleted(&rule_code)
        .map_err(|e| api_error(e, &rid))?;
    Ok(Json(ApiEnvelope::ok(rid, history)))
}

async fn resolve_rule(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Path(rule_code): Path<String>,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<ApiEnvelope<ResolveResponse>>, ApiError> {
    let rid = request_id(&headers);
    let mut context = ResolutionContext::new();
    if let Some(session_id) = query.session_id {
        context = context.with_session(session_id);
    }
    if let Some(program_id) = query.program_id {
        context = context.with_program(program_id);
    }
    if let Some(department_id) = query.department_id {
        context = context.with_department(department_id);
    }
    let value = state
        .resolver
        .resolve(&rule_code, chrono::Utc::now(), &context)
        .map_err(|e| api_error(e, &rid))?;
    Ok(Json(ApiEnvelope::ok(
        rid,
        ResolveResponse { rule_code, value },
    )))
}

async fn create_admission(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Json(req): Json<NewStudentAdmission>,
) -> Result<(StatusCode, Json<ApiEnvelope<RecordResponse>>), ApiError> {
    let rid = request_id(&headers);
    let record = state
        .store
        .create_admission_record(&req)
        .map_err(|e| api_error(e, &rid))?;
    Ok((
        StatusCode::CREATED,
        Json(ApiEnvelope::ok(rid, RecordResponse { record })),
    ))
}

async fn apply_signals(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Path(student_id): Path<String>,
    Json(req): Json<RecordSignals>,
) -> Result<Json<ApiEnvelope<RecordResponse>>, ApiError> {
    let rid = request_id(&headers);
    validate_id(&student_id, "student_id").map_err(|e| e.with_request_id(rid.clone()))?;
    let record = state
        .store
        .apply_academic_signals(&student_id, &req)
        .map_err(|e| api_error(e, &rid))?;
    Ok(Json(ApiEnvelope::ok(rid, RecordResponse { record })))
}

async fn check_eligibility(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Path(student_id): Path<String>,
) -> Result<Json<ApiEnvelope<EligibilityResponse>>, ApiError> {
    let rid = request_id(&headers);
    let (record, verdict) = state
        .promotions
        .check_eligibility(&student_id)
        .map_err(|e| api_error(e, &rid))?;
    Ok(Json(ApiEnvelope::ok(
        rid,
        EligibilityResponse {
            student_id,
            record_id: record.record_id,
            academic_session_id: record.academic_session_id,
            verdict,
        },
    )))
}

async fn preview_promotion(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Path(student_id): Path<String>,
    Json(req): Json<PromoteRequest>,
) -> Result<Json<ApiEnvelope<acadra_engine::PromotionPreview>>, ApiError> {
    let rid = request_id(&headers);
    let command = promote_command(&student_id, &req);
    let preview = state
        .promotions
        .preview(&command)
        .map_err(|e| api_error(e, &rid))?;
    Ok(Json(ApiEnvelope::ok(rid, preview)))
}

async fn promote_student(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Path(student_id): Path<String>,
    Json(req): Json<PromoteRequest>,
) -> Result<(StatusCode, Json<ApiEnvelope<PromoteResponse>>), ApiError> {
    let rid = request_id(&headers);
    validate_id(&student_id, "student_id").map_err(|e| e.with_request_id(rid.clone()))?;

    let request_payload_hash = payload_hash(&[
        student_id.as_str(),
        req.to_session_id.as_str(),
        req.to_program_id.as_str(),
        req.to_academic_year.as_str(),
    ]);
    if let (Some(key), Some(idempotency)) = (req.idempotency_key.as_deref(), &state.idempotency) {
        if key.trim().is_empty() {
            return Err(ApiError::bad_request("idempotency_key must not be empty")
                .with_request_id(rid.clone()));
        }
        if let Some(existing) = idempotency
            .get(key)
            .map_err(|e| ApiError::internal(e).with_request_id(rid.clone()))?
        {
            if existing.operation == "promote"
                && existing.student_id == student_id
                && existing.payload_hash == request_payload_hash
            {
                let mut response: PromoteResponse = serde_json::from_str(&existing.response_json)
                    .map_err(|e| {
                        ApiError::internal(format!("decode idempotent response failed: {}", e))
                            .with_request_id(rid.clone())
                    })?;
                response.idempotent_replay = true;
                return Ok((StatusCode::OK, Json(ApiEnvelope::ok(rid, response))));
            }
            return Err(ApiError::conflict(
                "idempotency_key already exists with different request payload",
            )
            .with_request_id(rid.clone()));
        }
    }

    let command = promote_command(&student_id, &req);
    let outcome = state
        .promotions
        .promote(&command)
        .map_err(|e| api_error(e, &rid))?;
    let response = PromoteResponse {
        student_id: student_id.clone(),
        new_record_id: outcome.new_record_id,
        log_id: outcome.log_id,
        promotion_type: outcome.promotion_type,
        idempotent_replay: false,
    };

    if let (Some(key), Some(idempotency)) = (req.idempotency_key.as_deref(), &state.idempotency) {
        let response_json = serde_json::to_string(&response)
            .map_err(|e| ApiError::internal(format!("encode idempotent response: {}", e)))?;
        idempotency
            .put(
                key,
                &IdempotencyRecord {
                    operation: "promote".to_string(),
                    student_id: student_id.clone(),
                    payload_hash: request_payload_hash,
                    response_json,
                },
            )
            .map_err(|e| ApiError::internal(e).with_request_id(rid.clone()))?;
    }

    Ok((StatusCode::CREATED, Json(ApiEnvelope::ok(rid, response))))
}

async fn bulk_promote(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Json(req): Json<BulkPromoteRequest>,
) -> Result<Response, ApiError> {
    let rid = request_id(&headers);
    if req.student_ids.is_empty() {
        return Err(
            ApiError::bad_request("student_ids must not be empty").with_request_id(rid.clone())
        );
    }
    let report = state
        .promotions
        .bulk_promote(
            &req.student_ids,
            &req.to_session_id,
            &req.to_program_id,
            &req.to_academic_year,
            req.to_division_id.as_deref(),
            &req.actor,
            req.actor_role.as_deref(),
        )
        .map_err(|e| api_error(e, &rid))?;
    let status = if report.failed > 0 {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::OK
    };
    let body = Json(ApiEnvelope::ok(rid, BulkPromoteResponse { report }));
    Ok((status, body).into_response())
}

async fn rollback_promotion(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Path(log_id): Path<String>,
    Json(req): Json<RollbackRequest>,
) -> Result<Json<ApiEnvelope<RollbackResponse>>, ApiError> {
    let rid = request_id(&headers);
    validate_id(&req.actor, "actor").map_err(|e| e.with_request_id(rid.clone()))?;
    let log = state
        .promotions
        .rollback(&log_id, &req.actor)
        .map_err(|e| api_error(e, &rid))?;
    Ok(Json(ApiEnvelope::ok(rid, RollbackResponse { log })))
}

async fn promotion_history(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Path(student_id): Path<String>,
) -> Result<Json<ApiEnvelope<PromotionHistoryResponse>>, ApiError> {
    let rid = request_id(&headers);
    let history = state
        .promotions
        .promotion_history(&student_id)
        .map_err(|e| api_error(e, &rid))?;
    Ok(Json(ApiEnvelope::ok(
        rid,
        PromotionHistoryResponse {
            student_id,
            history,
        },
    )))
}

async fn create_transfer(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Path(student_id): Path<String>,
    Json(req): Json<TransferRequestBody>,
) -> Result<(StatusCode, Json<ApiEnvelope<acadra_engine::TransferRecord>>), ApiError> {
    let rid = request_id(&headers);
    validate_id(&student_id, "student_id").map_err(|e| e.with_request_id(rid.clone()))?;
    validate_id(&req.requested_by, "requested_by").map_err(|e| e.with_request_id(rid.clone()))?;
    let command = TransferCommand {
        student_id,
        transfer_type: req.transfer_type,
        conduct_rating: req.conduct_rating,
        readmission_eligible: req.readmission_eligible,
        destination_institution: req.destination_institution,
        destination_address: req.destination_address,
        requested_by: req.requested_by,
        document_path: req.document_path,
        is_override: req.is_override,
        override_reason: req.override_reason,
    };
    let transfer = state
        .transfers
        .create_request(&command)
        .map_err(|e| api_error(e, &rid))?;
    Ok((StatusCode::CREATED, Json(ApiEnvelope::ok(rid, transfer))))
}

async fn get_transfer(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Path(transfer_id): Path<String>,
) -> Result<Json<ApiEnvelope<acadra_engine::TransferRecord>>, ApiError> {
    let rid = request_id(&headers);
    let transfer = state
        .transfers
        .get(&transfer_id)
        .map_err(|e| api_error(e, &rid))?;
    Ok(Json(ApiEnvelope::ok(rid, transfer)))
}

async fn approve_transfer(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Path(transfer_id): Path<String>,
    Json(req): Json<TransferActionRequest>,
) -> Result<Json<ApiEnvelope<acadra_engine::TransferRecord>>, ApiError> {
    let rid = request_id(&headers);
    validate_id(&req.actor, "actor").map_err(|e| e.with_request_id(rid.clone()))?;
    let transfer = state
        .transfers
        .approve(&transfer_id, &req.actor)
        .map_err(|e| api_error(e, &rid))?;
    Ok(Json(ApiEnvelope::ok(rid, transfer)))
}

async fn issue_transfer(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Path(transfer_id): Path<String>,
    Json(req): Json<TransferActionRequest>,
) -> Result<Json<ApiEnvelope<acadra_engine::TransferRecord>>, ApiError> {
    let rid = request_id(&headers);
    validate_id(&req.actor, "actor").map_err(|e| e.with_request_id(rid.clone()))?;
    let transfer = state
        .transfers
        .issue(&transfer_id, &req.actor)
        .map_err(|e| api_error(e, &rid))?;
    Ok(Json(ApiEnvelope::ok(rid, transfer)))
}

async fn cancel_transfer(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Path(transfer_id): Path<String>,
    Json(req): Json<TransferActionRequest>,
) -> Result<Json<ApiEnvelope<acadra_engine::TransferRecord>>, ApiError> {
    let rid = request_id(&headers);
    validate_id(&req.actor, "actor").map_err(|e| e.with_request_id(rid.clone()))?;
    let reason = req.reason.as_deref().unwrap_or("");
    let transfer = state
        .transfers
        .cancel(&transfer_id, &req.actor, reason)
        .map_err(|e| api_error(e, &rid))?;
    Ok(Json(ApiEnvelope::ok(rid, transfer)))
}

async fn create_session(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<ApiEnvelope<AcademicSession>>), ApiError> {
    let rid = request_id(&headers);
    validate_id(&req.session_id, "session_id").map_err(|e| e.with_request_id(rid.clone()))?;
    let session = AcademicSession {
        session_id: req.session_id,
        name: req.name,
        starts_on: req.starts_on,
        ends_on: req.ends_on,
        is_active: false,
    };
    state
        .store
        .create_session(&session)
        .map_err(|e| api_error(e, &rid))?;
    Ok((StatusCode::CREATED, Json(ApiEnvelope::ok(rid, session))))
}

async fn activate_session(
    State(state): State<AcademicApiState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<ApiEnvelope<AcademicSession>>, ApiError> {
    let rid = request_id(&headers);
    let session = state
        .store
        .activate_session(&session_id)
        .map_err(|e| api_error(e, &rid))?;
    Ok(Json(ApiEnvelope::ok(rid, session)))
}

fn promote_command(student_id: &str, req: &PromoteRequest) -> PromoteCommand {
    PromoteCommand {
        student_id: student_id.to_string(),
        to_session_id: req.to_session_id.clone(),
        to_program_id: req.to_program_id.clone(),
        to_academic_year: req.to_academic_year.clone(),
        to_division_id: req.to_division_id.clone(),
        actor: req.actor.clone(),
        actor_role: req.actor_role.clone(),
        is_override: req.is_override,
        override_reason: req.override_reason.clone(),
        override_approved_by: req.override_approved_by.clone(),
    }
}
