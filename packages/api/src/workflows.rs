use std::time::Duration;

use axum::{
	Json,
	extract::{Path, Query, State},
	http::StatusCode,
	response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use utoipa::ToSchema;

use flywheel_storage::{JournalEntry, WorkflowMetadata, WorkflowStatus};

use crate::{ctx::ApiCtx, error::ApiError};

/// How long `GET /workflows/{id}/result` waits for a terminal state.
const RESULT_POLL_DEADLINE: Duration = Duration::from_secs(30);
const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitRequest {
	pub workflow_name: String,
	pub workflow_id: Option<String>,
	#[schema(value_type = Object)]
	pub input: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitResponse {
	pub workflow_id: String,
	#[schema(value_type = String)]
	pub status: WorkflowStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WorkflowResponse {
	pub workflow_id: String,
	pub workflow_type: String,
	#[schema(value_type = String)]
	pub status: WorkflowStatus,
	pub owner_id: Option<String>,
	#[schema(value_type = Object)]
	pub input: serde_json::Value,
	#[schema(value_type = Option<Object>)]
	pub output: Option<serde_json::Value>,
	pub error_message: Option<String>,
	pub create_ts: i64,
	pub update_ts: i64,
	pub suspended_until: Option<i64>,
	pub retry_count: u32,
	pub max_retries: u32,
}

impl From<WorkflowMetadata> for WorkflowResponse {
	fn from(metadata: WorkflowMetadata) -> Self {
		WorkflowResponse {
			workflow_id: metadata.workflow_id,
			workflow_type: metadata.workflow_type,
			status: metadata.status,
			owner_id: metadata.owner_id,
			input: raw_to_value(&metadata.input),
			output: metadata.output.as_deref().map(raw_to_value),
			error_message: metadata.error_message,
			create_ts: metadata.create_ts,
			update_ts: metadata.update_ts,
			suspended_until: metadata.suspended_until,
			retry_count: metadata.retry_count,
			max_retries: metadata.max_retries,
		}
	}
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EventResponse {
	pub sequence: u64,
	#[schema(value_type = String)]
	pub kind: flywheel_storage::JournalEntryKind,
	pub name: String,
	#[schema(value_type = Option<Object>)]
	pub input: Option<serde_json::Value>,
	#[schema(value_type = Option<Object>)]
	pub output: Option<serde_json::Value>,
	pub create_ts: i64,
	pub completed: bool,
}

impl From<JournalEntry> for EventResponse {
	fn from(entry: JournalEntry) -> Self {
		EventResponse {
			sequence: entry.sequence,
			kind: entry.kind,
			name: entry.name,
			input: entry.input.as_deref().map(raw_to_value),
			output: entry.output.as_deref().map(raw_to_value),
			create_ts: entry.create_ts,
			completed: entry.completed,
		}
	}
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
	pub after: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
	pub status: Option<String>,
	pub name: Option<String>,
	pub limit: Option<usize>,
	pub offset: Option<usize>,
}

fn raw_to_value(raw: &RawValue) -> serde_json::Value {
	serde_json::from_str(raw.get()).unwrap_or(serde_json::Value::Null)
}

fn value_to_raw(value: &serde_json::Value) -> Result<Box<RawValue>, ApiError> {
	serde_json::value::to_raw_value(value).map_err(|err| anyhow::Error::from(err).into())
}

#[utoipa::path(
	post,
	operation_id = "workflows_submit",
	path = "/workflows/submit",
	request_body = SubmitRequest,
	responses((status = 200, body = SubmitResponse)),
)]
#[tracing::instrument(skip_all)]
pub async fn submit(
	State(ctx): State<ApiCtx>,
	Json(request): Json<SubmitRequest>,
) -> Response {
	match submit_inner(ctx, request).await {
		Ok(response) => Json(response).into_response(),
		Err(err) => err.into_response(),
	}
}

async fn submit_inner(ctx: ApiCtx, request: SubmitRequest) -> Result<SubmitResponse, ApiError> {
	let input = value_to_raw(&request.input.unwrap_or(serde_json::Value::Null))?;

	let metadata = ctx
		.cluster
		.submit(&request.workflow_name, request.workflow_id, input)
		.await?;

	Ok(SubmitResponse {
		workflow_id: metadata.workflow_id,
		status: metadata.status,
	})
}

#[utoipa::path(
	get,
	operation_id = "workflows_get",
	path = "/workflows/{id}",
	responses((status = 200, body = WorkflowResponse), (status = 404)),
)]
#[tracing::instrument(skip_all, fields(workflow_id=%id))]
pub async fn get(State(ctx): State<ApiCtx>, Path(id): Path<String>) -> Response {
	match get_inner(ctx, &id).await {
		Ok(response) => Json(response).into_response(),
		Err(err) => err.into_response(),
	}
}

async fn get_inner(ctx: ApiCtx, id: &str) -> Result<WorkflowResponse, ApiError> {
	let metadata = ctx
		.cluster
		.get_status(id)
		.await?
		.ok_or_else(|| ApiError::not_found(format!("workflow {id} not found")))?;

	Ok(metadata.into())
}

#[utoipa::path(
	get,
	operation_id = "workflows_result",
	path = "/workflows/{id}/result",
	responses((status = 200, body = WorkflowResponse), (status = 404), (status = 408)),
)]
#[tracing::instrument(skip_all, fields(workflow_id=%id))]
pub async fn result(State(ctx): State<ApiCtx>, Path(id): Path<String>) -> Response {
	match result_inner(ctx, &id).await {
		Ok(response) => Json(response).into_response(),
		Err(err) => err.into_response(),
	}
}

/// Long-polls until the workflow reaches a terminal state.
async fn result_inner(ctx: ApiCtx, id: &str) -> Result<WorkflowResponse, ApiError> {
	let deadline = tokio::time::Instant::now() + RESULT_POLL_DEADLINE;

	loop {
		let metadata = ctx
			.cluster
			.get_status(id)
			.await?
			.ok_or_else(|| ApiError::not_found(format!("workflow {id} not found")))?;

		if metadata.status.is_terminal() {
			return Ok(metadata.into());
		}

		if tokio::time::Instant::now() >= deadline {
			return Err(ApiError::timeout(format!(
				"workflow {id} did not finish within the poll window"
			)));
		}

		tokio::time::sleep(RESULT_POLL_INTERVAL).await;
	}
}

#[utoipa::path(
	get,
	operation_id = "workflows_events",
	path = "/workflows/{id}/events",
	responses((status = 200, body = Vec<EventResponse>)),
)]
#[tracing::instrument(skip_all, fields(workflow_id=%id))]
pub async fn events(
	State(ctx): State<ApiCtx>,
	Path(id): Path<String>,
	Query(query): Query<EventsQuery>,
) -> Response {
	match ctx.runtime.events(&id, query.after).await {
		Ok(entries) => Json(
			entries
				.into_iter()
				.map(EventResponse::from)
				.collect::<Vec<_>>(),
		)
		.into_response(),
		Err(err) => ApiError::from(err).into_response(),
	}
}

#[utoipa::path(
	post,
	operation_id = "workflows_signal",
	path = "/workflows/{id}/signal/{signal}",
	responses((status = 200, body = WorkflowResponse), (status = 409)),
)]
#[tracing::instrument(skip_all, fields(workflow_id=%id, signal=%signal))]
pub async fn signal(
	State(ctx): State<ApiCtx>,
	Path((id, signal)): Path<(String, String)>,
	payload: Option<Json<serde_json::Value>>,
) -> Response {
	match signal_inner(ctx, &id, &signal, payload.map(|Json(v)| v)).await {
		Ok(response) => Json(response).into_response(),
		Err(err) => err.into_response(),
	}
}

async fn signal_inner(
	ctx: ApiCtx,
	id: &str,
	signal: &str,
	payload: Option<serde_json::Value>,
) -> Result<WorkflowResponse, ApiError> {
	let payload = payload.as_ref().map(value_to_raw).transpose()?;
	let metadata = ctx.cluster.signal(id, signal, payload).await?;
	Ok(metadata.into())
}

#[utoipa::path(
	post,
	operation_id = "workflows_cancel",
	path = "/workflows/{id}/cancel",
	responses((status = 204), (status = 404)),
)]
#[tracing::instrument(skip_all, fields(workflow_id=%id))]
pub async fn cancel(State(ctx): State<ApiCtx>, Path(id): Path<String>) -> Response {
	match ctx.cluster.cancel(&id).await {
		// Accepted either way; cancelling a terminal workflow is a no-op
		Ok(_) => StatusCode::NO_CONTENT.into_response(),
		Err(err) => ApiError::from(err).into_response(),
	}
}

#[utoipa::path(
	get,
	operation_id = "workflows_list",
	path = "/workflows",
	responses((status = 200, body = Vec<WorkflowResponse>)),
)]
#[tracing::instrument(skip_all)]
pub async fn list(State(ctx): State<ApiCtx>, Query(query): Query<ListQuery>) -> Response {
	match list_inner(ctx, query).await {
		Ok(response) => Json(response).into_response(),
		Err(err) => err.into_response(),
	}
}

async fn list_inner(ctx: ApiCtx, query: ListQuery) -> Result<Vec<WorkflowResponse>, ApiError> {
	let status = query
		.status
		.as_deref()
		.map(|raw| {
			raw.parse::<WorkflowStatus>().map_err(|_| {
				ApiError::new(
					StatusCode::BAD_REQUEST,
					"invalid_request",
					format!("unknown status filter: {raw}"),
				)
			})
		})
		.transpose()?;

	let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
	let offset = query.offset.unwrap_or(0);

	let workflows = ctx
		.runtime
		.storage()
		.workflows
		.list(status, query.name.as_deref(), limit, offset)
		.await?;

	Ok(workflows.into_iter().map(WorkflowResponse::from).collect())
}
