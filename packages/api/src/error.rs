use axum::{
	Json,
	http::StatusCode,
	response::{IntoResponse, Response},
};
use serde::Serialize;

use flywheel_cluster::ClusterError;
use flywheel_runtime::WorkflowError;

/// JSON error envelope returned by every endpoint on failure.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
	pub error: String,
	pub code: String,
}

#[derive(Debug)]
pub struct ApiError {
	pub status: StatusCode,
	pub code: &'static str,
	pub message: String,
}

impl ApiError {
	pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
		ApiError {
			status,
			code,
			message: message.into(),
		}
	}

	pub fn not_found(message: impl Into<String>) -> Self {
		ApiError::new(StatusCode::NOT_FOUND, "not_found", message)
	}

	pub fn timeout(message: impl Into<String>) -> Self {
		ApiError::new(StatusCode::REQUEST_TIMEOUT, "timeout", message)
	}
}

impl From<anyhow::Error> for ApiError {
	fn from(err: anyhow::Error) -> Self {
		let (status, code) = if let Some(workflow_err) = WorkflowError::from_chain(&err) {
			match workflow_err {
				WorkflowError::UnknownWorkflow(_) => (StatusCode::NOT_FOUND, "unknown_workflow"),
				WorkflowError::WorkflowNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
				WorkflowError::WorkflowAlreadyExists(_) => {
					(StatusCode::CONFLICT, "already_exists")
				}
				WorkflowError::NotWaitingForSignal(_, _) => {
					(StatusCode::CONFLICT, "not_waiting_for_signal")
				}
				WorkflowError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
				WorkflowError::UnknownFunction(_) => {
					(StatusCode::BAD_REQUEST, "unknown_function")
				}
				WorkflowError::Saturated => (StatusCode::TOO_MANY_REQUESTS, "saturated"),
				WorkflowError::Cancelled(_) => (StatusCode::CONFLICT, "cancelled"),
				_ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
			}
		} else if let Some(cluster_err) = err.chain().find_map(|e| e.downcast_ref::<ClusterError>())
		{
			match cluster_err {
				ClusterError::Unavailable(_)
				| ClusterError::RpcTimeout(_)
				| ClusterError::RingEmpty
				| ClusterError::UnknownNode(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
				_ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
			}
		} else {
			(StatusCode::INTERNAL_SERVER_ERROR, "internal")
		};

		ApiError::new(status, code, err.to_string())
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		if self.status.is_server_error() {
			tracing::warn!(code=%self.code, message=%self.message, "request failed");
		}

		(
			self.status,
			Json(ErrorBody {
				error: self.message,
				code: self.code.to_string(),
			}),
		)
			.into_response()
	}
}
