use std::{sync::Arc, time::Duration};

use axum::{
	Router,
	body::Body,
	http::{Request, StatusCode},
};
use flywheel_api::{ApiCtx, RuntimeExecutor, router};
use flywheel_cluster::{ClusterNode, MemoryHub, MemoryTransport};
use flywheel_config::NodeConfig;
use flywheel_kv::{Kv, MemoryKvDriver};
use flywheel_runtime::{Registry, Runtime, RuntimeConfig};
use flywheel_storage::Storage;
use tower::ServiceExt;

fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter("debug")
		.with_test_writer()
		.try_init();
}

fn test_router() -> Router {
	let mut registry = Registry::new();
	registry.register_workflow("echo", |_ctx, input: String| async move {
		Ok(format!("Echo: {input}"))
	});
	registry.register_workflow("approval", |mut ctx, _input: ()| async move {
		let decision = ctx.await_signal::<String>("approve").await?;
		Ok(decision)
	});
	registry.register_workflow("sleeper", |mut ctx, _input: ()| async move {
		ctx.sleep(Duration::from_secs(3600)).await?;
		Ok(())
	});

	let runtime = Runtime::new(
		"n1",
		Storage::new(Kv::new(Arc::new(MemoryKvDriver::new()))),
		registry.handle(),
		RuntimeConfig::default(),
	);

	let hub = MemoryHub::new();
	let transport = Arc::new(MemoryTransport::new(hub, "n1"));
	let cluster = ClusterNode::new(
		"n1",
		NodeConfig::default(),
		transport,
		Arc::new(RuntimeExecutor::new(runtime.clone())),
	);

	router(ApiCtx::new(cluster, runtime))
}

async fn request(
	router: &Router,
	method: &str,
	uri: &str,
	body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
	let mut builder = Request::builder().method(method).uri(uri);
	let body = match body {
		Some(value) => {
			builder = builder.header("content-type", "application/json");
			Body::from(value.to_string())
		}
		None => Body::empty(),
	};

	let response = router
		.clone()
		.oneshot(builder.body(body).unwrap())
		.await
		.unwrap();

	let status = response.status();
	let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
		.await
		.unwrap();
	let value = if bytes.is_empty() {
		serde_json::Value::Null
	} else {
		serde_json::from_slice(&bytes).unwrap()
	};

	(status, value)
}

#[tokio::test]
async fn submit_then_fetch() {
	init_tracing();

	let router = test_router();

	let (status, body) = request(
		&router,
		"POST",
		"/workflows/submit",
		Some(serde_json::json!({
			"workflow_name": "echo",
			"workflow_id": "w1",
			"input": "Hello",
		})),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["workflow_id"], "w1");
	assert_eq!(body["status"], "completed");

	let (status, body) = request(&router, "GET", "/workflows/w1", None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["workflow_type"], "echo");
	assert_eq!(body["output"], "Echo: Hello");

	// The long-poll result endpoint returns immediately for terminal
	// workflows
	let (status, body) = request(&router, "GET", "/workflows/w1/result", None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["status"], "completed");
}

#[tokio::test]
async fn missing_workflow_is_404() {
	init_tracing();

	let router = test_router();

	let (status, body) = request(&router, "GET", "/workflows/ghost", None).await;
	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(body["code"], "not_found");

	let (status, body) = request(
		&router,
		"POST",
		"/workflows/submit",
		Some(serde_json::json!({ "workflow_name": "nope" })),
	)
	.await;
	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(body["code"], "unknown_workflow");
}

#[tokio::test]
async fn duplicate_submit_conflicts() {
	init_tracing();

	let router = test_router();
	let submit = serde_json::json!({
		"workflow_name": "echo",
		"workflow_id": "dup",
		"input": "x",
	});

	let (status, _) = request(&router, "POST", "/workflows/submit", Some(submit.clone())).await;
	assert_eq!(status, StatusCode::OK);

	let (status, body) = request(&router, "POST", "/workflows/submit", Some(submit)).await;
	assert_eq!(status, StatusCode::CONFLICT);
	assert_eq!(body["code"], "already_exists");
}

#[tokio::test]
async fn signal_completes_waiting_workflow() {
	init_tracing();

	let router = test_router();

	let (status, body) = request(
		&router,
		"POST",
		"/workflows/submit",
		Some(serde_json::json!({
			"workflow_name": "approval",
			"workflow_id": "a1",
		})),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["status"], "suspended");

	// Signalling a name nothing waits for conflicts
	let (status, body) = request(
		&router,
		"POST",
		"/workflows/a1/signal/reject",
		Some(serde_json::json!("no")),
	)
	.await;
	assert_eq!(status, StatusCode::CONFLICT);
	assert_eq!(body["code"], "not_waiting_for_signal");

	let (status, body) = request(
		&router,
		"POST",
		"/workflows/a1/signal/approve",
		Some(serde_json::json!("yes")),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["status"], "completed");
	assert_eq!(body["output"], "yes");

	// The journal is visible through the events endpoint
	let (status, body) = request(&router, "GET", "/workflows/a1/events", None).await;
	assert_eq!(status, StatusCode::OK);
	let events = body.as_array().unwrap();
	assert_eq!(events.len(), 1);
	assert_eq!(events[0]["kind"], "signal");
	assert_eq!(events[0]["completed"], true);

	// after= filters by sequence
	let (_, body) = request(&router, "GET", "/workflows/a1/events?after=0", None).await;
	assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn cancel_returns_no_content() {
	init_tracing();

	let router = test_router();

	request(
		&router,
		"POST",
		"/workflows/submit",
		Some(serde_json::json!({
			"workflow_name": "sleeper",
			"workflow_id": "s1",
		})),
	)
	.await;

	let (status, _) = request(&router, "POST", "/workflows/s1/cancel", None).await;
	assert_eq!(status, StatusCode::NO_CONTENT);

	let (_, body) = request(&router, "GET", "/workflows/s1", None).await;
	assert_eq!(body["status"], "cancelled");
}

#[tokio::test]
async fn list_filters_by_status_and_name() {
	init_tracing();

	let router = test_router();

	for i in 0..3 {
		request(
			&router,
			"POST",
			"/workflows/submit",
			Some(serde_json::json!({
				"workflow_name": "echo",
				"workflow_id": format!("e{i}"),
				"input": "x",
			})),
		)
		.await;
	}
	request(
		&router,
		"POST",
		"/workflows/submit",
		Some(serde_json::json!({
			"workflow_name": "sleeper",
			"workflow_id": "s1",
		})),
	)
	.await;

	let (status, body) = request(&router, "GET", "/workflows?status=completed", None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body.as_array().unwrap().len(), 3);

	let (_, body) = request(&router, "GET", "/workflows?name=sleeper", None).await;
	assert_eq!(body.as_array().unwrap().len(), 1);

	let (_, body) = request(&router, "GET", "/workflows?status=completed&limit=2", None).await;
	assert_eq!(body.as_array().unwrap().len(), 2);

	let (status, body) = request(&router, "GET", "/workflows?status=bogus", None).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn health_reports_node_view() {
	init_tracing();

	let router = test_router();

	let (status, body) = request(&router, "GET", "/health", None).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["status"], "ok");
	assert_eq!(body["node_id"], "n1");
	assert_eq!(body["nodes"], 1);
	assert_eq!(body["active_workflows"], 0);
}
