//! HTTP API for scoring, accounts and prediction history

use crate::auth::{AccessToken, AuthError, AuthService, LoginRequest, SignupRequest};
use crate::error::PipelineError;
use crate::metrics::{MetricsSnapshot, ServiceMetrics};
use crate::models::inference::InferenceEngine;
use crate::store::{NewPrediction, PredictionRecord, Store, UserRecord};
use crate::types::application::{FeatureRecord, LoanApplication};
use crate::types::assessment::RiskAssessment;
use anyhow::Context;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 200;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<InferenceEngine>,
    pub store: Store,
    pub auth: AuthService,
    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    pub fn new(engine: Arc<InferenceEngine>, store: Store, auth: AuthService, metrics: Arc<ServiceMetrics>) -> Self {
        Self {
            engine,
            store,
            auth,
            metrics,
        }
    }
}

/// Error returned by handlers, rendered as `{"detail": ...}`
#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    Auth(AuthError),
    /// Request body or query could not be parsed
    Rejected(StatusCode, String),
    Unauthorized(String),
    Internal(anyhow::Error),
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::Pipeline(e)
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Internal(e) => ApiError::Internal(e),
            other => ApiError::Auth(other),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Rejected(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Pipeline(e) => {
                let status = match &e {
                    PipelineError::SchemaMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    PipelineError::FeatureVectorError { .. } | PipelineError::Inference(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.to_string())
            }
            ApiError::Auth(e) => {
                let status = match &e {
                    AuthError::InvalidSignup(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    AuthError::UsernameTaken | AuthError::EmailTaken => StatusCode::CONFLICT,
                    AuthError::InvalidCredentials | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
                    AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
            ApiError::Rejected(status, detail) => (status, detail),
            ApiError::Unauthorized(detail) => (StatusCode::UNAUTHORIZED, detail),
            ApiError::Internal(e) => {
                error!(error = %format!("{:#}", e), "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let mut response = (status, Json(json!({ "detail": detail }))).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// Build the API router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(health))
        .route("/api/auth/signup", post(signup))
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
        .route("/api/auth/logout", post(logout))
        .route("/api/predict", post(predict))
        .route("/api/history", get(history))
        .route("/api/model-info", get(model_info))
        .route("/api/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().context("Listener has no local address")?;
    info!(addr = %addr, "Loan risk API listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")
}

/// Extract a bearer token. A missing header is `None`; a malformed one is rejected.
fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, ApiError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ApiError::Unauthorized("Invalid authorization header".to_string()))?;

    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(Some(token.trim()))
        }
        _ => Err(ApiError::Unauthorized("Invalid authorization header".to_string())),
    }
}

async fn optional_user(state: &AppState, headers: &HeaderMap) -> Result<Option<UserRecord>, ApiError> {
    match bearer_token(headers)? {
        Some(token) => Ok(Some(state.auth.authenticate(token).await?)),
        None => Ok(None),
    }
}

async fn required_user(state: &AppState, headers: &HeaderMap) -> Result<UserRecord, ApiError> {
    optional_user(state, headers)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "message": "Loan API Running", "status": "healthy" }))
}

async fn signup(
    State(state): State<AppState>,
    body: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserRecord>), ApiError> {
    let Json(request) = body?;
    let user = state.auth.signup(request).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AccessToken>, ApiError> {
    let Json(request) = body?;
    Ok(Json(state.auth.login(request).await?))
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<UserRecord>, ApiError> {
    Ok(Json(required_user(&state, &headers).await?))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&headers)?
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))?;
    state.auth.logout(token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn predict(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<FeatureRecord>, JsonRejection>,
) -> Result<Json<RiskAssessment>, ApiError> {
    let user = optional_user(&state, &headers).await?;
    let Json(record) = body.inspect_err(|_| state.metrics.record_failure())?;

    let start = Instant::now();
    let assessment = match state.engine.score(&record) {
        Ok(assessment) => assessment,
        Err(e) => {
            state.metrics.record_failure();
            if e.is_client_error() {
                debug!(error = %e, "Rejected application");
            }
            return Err(e.into());
        }
    };
    state
        .metrics
        .record_prediction(start.elapsed(), assessment.probability, assessment.risk_level);

    let user_id = user.map(|u| u.id);
    info!(
        user_id = ?user_id,
        probability = assessment.probability,
        risk_level = %assessment.risk_level,
        latency_us = start.elapsed().as_micros() as u64,
        "Prediction served"
    );

    persist_prediction(&state, user_id, &record, assessment);
    Ok(Json(assessment))
}

/// Store the prediction in the background; failures never reach the caller
fn persist_prediction(state: &AppState, user_id: Option<i64>, record: &FeatureRecord, assessment: RiskAssessment) {
    let application = match LoanApplication::try_from(record) {
        Ok(app) => app,
        Err(e) => {
            warn!(error = %e, "Prediction not stored: record does not fit the history table");
            state.metrics.record_persistence_failure();
            return;
        }
    };

    let store = state.store.clone();
    let metrics = state.metrics.clone();
    tokio::spawn(async move {
        let prediction = NewPrediction {
            user_id,
            application,
            assessment,
            created_at: Utc::now(),
        };
        match store.insert_prediction(prediction).await {
            Ok(id) => debug!(prediction_id = id, "Prediction stored"),
            Err(e) => {
                metrics.record_persistence_failure();
                error!(error = %format!("{:#}", e), "Failed to store prediction");
            }
        }
    });
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<Vec<PredictionRecord>>, ApiError> {
    let user = required_user(&state, &headers).await?;
    let Query(params) = params?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let records = state.store.recent_predictions(user.id, limit).await?;
    Ok(Json(records))
}

/// Summary of the loaded model
#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub accuracy: String,
    pub auc: String,
    pub training_samples: usize,
    pub features: Vec<String>,
    pub top_feature: Option<String>,
    pub classifier: String,
}

async fn model_info(State(state): State<AppState>) -> Json<ModelInfo> {
    let artifact = state.engine.artifact();
    let report = artifact.report();

    Json(ModelInfo {
        accuracy: format!("{:.2}%", report.accuracy * 100.0),
        auc: format!("{:.4}", report.auc),
        training_samples: report.training_samples,
        features: artifact
            .extractor()
            .feature_names()
            .into_iter()
            .map(String::from)
            .collect(),
        top_feature: report
            .top_feature()
            .map(|f| format!("{} ({:.1}% importance)", f.feature, f.importance * 100.0)),
        classifier: artifact.classifier().name().to_string(),
    })
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_extractor::{CategoryVocabulary, FeatureExtractor, CATEGORICAL_FEATURES, NUMERIC_FEATURES};
    use crate::models::ensemble::{Tree, TreeEnsemble};
    use crate::models::{ModelArtifact, TrainingReport};
    use crate::types::assessment::RiskLevel;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&HeaderMap::new()).unwrap(), None);
        assert_eq!(bearer_token(&headers("Bearer abc")).unwrap(), Some("abc"));
        assert_eq!(bearer_token(&headers("bearer  abc ")).unwrap(), Some("abc"));
        assert!(bearer_token(&headers("Basic abc")).is_err());
        assert!(bearer_token(&headers("Bearer")).is_err());
    }

    #[test]
    fn test_error_status_mapping() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (PipelineError::missing_field("credit_score").into(), StatusCode::UNPROCESSABLE_ENTITY),
            (
                PipelineError::FeatureVectorError {
                    expected: 11,
                    actual: 10,
                }
                .into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                PipelineError::Inference(anyhow::anyhow!("boom")).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (AuthError::UsernameTaken.into(), StatusCode::CONFLICT),
            (AuthError::InvalidSignup("bad".to_string()).into(), StatusCode::UNPROCESSABLE_ENTITY),
            (AuthError::InvalidCredentials.into(), StatusCode::UNAUTHORIZED),
            (AuthError::Internal(anyhow::anyhow!("db")).into(), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, status) in cases {
            let response = error.into_response();
            assert_eq!(response.status(), status);
        }
    }

    #[test]
    fn test_unauthorized_sets_challenge() {
        let response = ApiError::Unauthorized("Not authenticated".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }

    /// State around a single-leaf ensemble that scores every record at sigmoid(2.0)
    fn state_with_schema(numeric: &[&str], categorical: &[&str]) -> AppState {
        let vocabularies = categorical
            .iter()
            .map(|field| CategoryVocabulary::fit(*field, ["A1", "B1"]))
            .collect();
        let extractor =
            FeatureExtractor::new(numeric.iter().map(|s| s.to_string()).collect(), vocabularies).unwrap();
        let ensemble = TreeEnsemble::new(extractor.feature_count(), 0.0, 0.5, vec![Tree::leaf(2.0)]).unwrap();
        let artifact = ModelArtifact::new(extractor, Box::new(ensemble), TrainingReport::default()).unwrap();

        let store = Store::in_memory().unwrap();
        AppState::new(
            Arc::new(InferenceEngine::new(artifact)),
            store.clone(),
            AuthService::new(store, 30),
            Arc::new(ServiceMetrics::new()),
        )
    }

    fn full_record() -> FeatureRecord {
        FeatureRecord::new()
            .with_number("annual_income", 85000.0)
            .with_number("debt_to_income_ratio", 0.21)
            .with_number("credit_score", 720.0)
            .with_number("loan_amount", 15000.0)
            .with_number("interest_rate", 6.5)
            .with_text("gender", "F")
            .with_text("marital_status", "Married")
            .with_text("education_level", "Bachelor")
            .with_text("employment_status", "Employed")
            .with_text("loan_purpose", "Car")
            .with_text("grade_subgrade", "B1")
    }

    async fn wait_for_persistence_failures(metrics: &ServiceMetrics, expected: u64) -> u64 {
        for _ in 0..100 {
            let count = metrics.persistence_failures.load(Ordering::Relaxed);
            if count >= expected {
                return count;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        metrics.persistence_failures.load(Ordering::Relaxed)
    }

    #[tokio::test]
    async fn test_record_outside_history_table_still_scores() {
        // The model only needs credit_score, the history table needs every canonical field
        let state = state_with_schema(&["credit_score"], &[]);
        let record = FeatureRecord::new().with_number("credit_score", 640.0);

        let Json(assessment) = predict(State(state.clone()), HeaderMap::new(), Ok(Json(record)))
            .await
            .unwrap();
        assert_eq!(assessment.risk_level, RiskLevel::VeryLow);

        let snapshot = state.metrics.snapshot();
        assert_eq!(snapshot.predictions_served, 1);
        assert_eq!(snapshot.predictions_failed, 0);
        assert_eq!(snapshot.persistence_failures, 1);
    }

    #[tokio::test]
    async fn test_store_failure_never_fails_prediction() {
        let state = state_with_schema(&NUMERIC_FEATURES, &CATEGORICAL_FEATURES);
        state.store.execute_batch("DROP TABLE loan_applications;").await.unwrap();

        let response = predict(State(state.clone()), HeaderMap::new(), Ok(Json(full_record())))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);

        assert_eq!(wait_for_persistence_failures(&state.metrics, 1).await, 1);
        assert_eq!(state.metrics.snapshot().predictions_served, 1);
    }

    #[tokio::test]
    async fn test_prediction_is_stored_for_user() {
        let state = state_with_schema(&NUMERIC_FEATURES, &CATEGORICAL_FEATURES);
        state
            .auth
            .signup(SignupRequest {
                email: "dana@example.com".to_string(),
                username: "dana".to_string(),
                password: "correct horse".to_string(),
            })
            .await
            .unwrap();
        let token = state
            .auth
            .login(LoginRequest {
                username: "dana".to_string(),
                password: "correct horse".to_string(),
            })
            .await
            .unwrap();
        let user = state.auth.authenticate(&token.access_token).await.unwrap();

        let auth_headers = headers(&format!("Bearer {}", token.access_token));
        predict(State(state.clone()), auth_headers, Ok(Json(full_record())))
            .await
            .unwrap();

        let mut stored = Vec::new();
        for _ in 0..100 {
            stored = state.store.recent_predictions(user.id, 10).await.unwrap();
            if !stored.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].application.credit_score, 720.0);
        assert_eq!(state.metrics.persistence_failures.load(Ordering::Relaxed), 0);
    }
}
