//! Test control endpoints

use axum::{
    Form, Json,
    extract::{State, rejection::FormRejection},
};

use crate::actors::ClientSummary;
use crate::api::{ApiError, ApiResult, ApiState};
use crate::model::{StartRequest, StatusResponse, TestStatus};

/// POST /start_test
pub async fn start_test(
    State(state): State<ApiState>,
    form: Result<Form<StartRequest>, FormRejection>,
) -> ApiResult<Json<StatusResponse>> {
    let Form(request) = form.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;

    state.session.start(request).await?;
    Ok(Json(TestStatus::Running.into()))
}

/// POST /stop_test
///
/// Succeeds even when no test is running.
pub async fn stop_test(State(state): State<ApiState>) -> ApiResult<Json<StatusResponse>> {
    state.session.stop().await?;
    Ok(Json(TestStatus::Ready.into()))
}

/// GET /status
pub async fn get_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(state.session.status().await.into())
}

/// GET /clients
pub async fn list_clients(State(state): State<ApiState>) -> ApiResult<Json<Vec<ClientSummary>>> {
    Ok(Json(state.session.clients().await?))
}
