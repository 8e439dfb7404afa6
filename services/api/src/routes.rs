use crate::infra::AppState;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use serde_json::json;
use std::sync::Arc;

use piqi_engine::error::AppError;
use piqi_engine::evaluation::EvaluationEngine;
use piqi_engine::message::PatientMessage;
use piqi_engine::scorecard::PiqiScorecard;

pub(crate) fn with_evaluation_routes(engine: Arc<EvaluationEngine>) -> axum::Router {
    axum::Router::new()
        .route(
            "/api/v1/evaluations",
            axum::routing::post(evaluation_endpoint),
        )
        .with_state(engine)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub(crate) async fn evaluation_endpoint(
    State(engine): State<Arc<EvaluationEngine>>,
    Json(message): Json<PatientMessage>,
) -> Result<Json<PiqiScorecard>, AppError> {
    let scorecard = engine.evaluate(&message).await?;
    Ok(Json(scorecard))
}
