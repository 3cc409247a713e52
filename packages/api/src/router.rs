use axum::Router;
use utoipa::OpenApi;

use crate::{ctx::ApiCtx, health, workflows};

#[derive(OpenApi)]
#[openapi(paths(
	workflows::submit,
	workflows::get,
	workflows::result,
	workflows::events,
	workflows::signal,
	workflows::cancel,
	workflows::list,
	health::health,
))]
pub struct ApiDoc;

pub fn router(ctx: ApiCtx) -> Router {
	Router::new()
		// MARK: Workflows
		.route("/workflows/submit", axum::routing::post(workflows::submit))
		.route("/workflows", axum::routing::get(workflows::list))
		.route("/workflows/{id}", axum::routing::get(workflows::get))
		.route(
			"/workflows/{id}/result",
			axum::routing::get(workflows::result),
		)
		.route(
			"/workflows/{id}/events",
			axum::routing::get(workflows::events),
		)
		.route(
			"/workflows/{id}/signal/{signal}",
			axum::routing::post(workflows::signal),
		)
		.route(
			"/workflows/{id}/cancel",
			axum::routing::post(workflows::cancel),
		)
		// MARK: Health
		.route("/health", axum::routing::get(health::health))
		.with_state(ctx)
}
