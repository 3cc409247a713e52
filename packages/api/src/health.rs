use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

use crate::ctx::ApiCtx;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
	pub status: String,
	pub node_id: String,
	/// Members in this node's view, including itself.
	pub nodes: usize,
	pub active_workflows: usize,
}

#[utoipa::path(
	get,
	operation_id = "health",
	path = "/health",
	responses((status = 200, body = HealthResponse)),
)]
#[tracing::instrument(skip_all)]
pub async fn health(State(ctx): State<ApiCtx>) -> impl IntoResponse {
	Json(HealthResponse {
		status: "ok".to_string(),
		node_id: ctx.cluster.node_id().to_string(),
		nodes: ctx.cluster.membership().len(),
		active_workflows: ctx.runtime.active_count(),
	})
}
