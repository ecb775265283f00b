//! Report endpoint

use axum::{Json, extract::State};

use crate::api::ApiState;
use crate::model::Report;

/// GET /report
pub async fn get_report(State(state): State<ApiState>) -> Json<Report> {
    Json(state.session.report().await)
}
