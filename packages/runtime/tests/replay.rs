use std::{
	sync::{
		Arc,
		atomic::{AtomicU32, Ordering},
	},
	time::Duration,
};

use flywheel_kv::{Kv, MemoryKvDriver};
use flywheel_runtime::{Registry, RetryPolicy, Runtime, RuntimeConfig, WorkflowError};
use flywheel_storage::{JournalEntryKind, Storage, WorkflowStatus};
use serde_json::value::RawValue;

fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter("debug")
		.with_test_writer()
		.try_init();
}

fn storage() -> Storage {
	Storage::new(Kv::new(Arc::new(MemoryKvDriver::new())))
}

fn runtime(registry: Registry) -> Runtime {
	Runtime::new(
		"node-test",
		storage(),
		registry.handle(),
		RuntimeConfig::default(),
	)
}

fn raw(json: &str) -> Box<RawValue> {
	RawValue::from_string(json.to_string()).unwrap()
}

#[tokio::test]
async fn echo_workflow_completes_without_journaling() {
	init_tracing();

	let mut registry = Registry::new();
	registry.register_workflow("echo", |_ctx, input: String| async move {
		Ok(format!("Echo: {input}"))
	});
	let runtime = runtime(registry);

	let metadata = runtime
		.submit("echo", Some("w1".to_string()), raw("\"Hello\""))
		.await
		.unwrap();

	assert_eq!(metadata.status, WorkflowStatus::Completed);
	assert_eq!(metadata.output.as_ref().unwrap().get(), "\"Echo: Hello\"");
	assert!(runtime.events("w1", None).await.unwrap().is_empty());
}

#[tokio::test]
async fn side_effect_runs_exactly_once_across_resume() {
	init_tracing();

	let counter = Arc::new(AtomicU32::new(0));
	let mut registry = Registry::new();
	{
		let counter = counter.clone();
		registry.register_workflow("count", move |mut ctx, _input: ()| {
			let counter = counter.clone();
			async move {
				let value = ctx
					.side_effect("inc", || async { Ok(counter.fetch_add(1, Ordering::SeqCst)) })
					.await?;
				ctx.sleep(Duration::from_millis(30)).await?;
				Ok(value)
			}
		});
	}
	let runtime = runtime(registry);

	let metadata = runtime
		.submit("count", Some("wf".to_string()), raw("null"))
		.await
		.unwrap();
	assert_eq!(metadata.status, WorkflowStatus::Suspended);
	assert_eq!(counter.load(Ordering::SeqCst), 1);

	tokio::time::sleep(Duration::from_millis(50)).await;

	// Replay: the cached side effect output is returned, the block is not
	// re-run
	let metadata = runtime.resume("wf").await.unwrap();
	assert_eq!(metadata.status, WorkflowStatus::Completed);
	assert_eq!(metadata.output.as_ref().unwrap().get(), "0");
	assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn flaky_call_retries_until_success() {
	init_tracing();

	let attempts = Arc::new(AtomicU32::new(0));
	let mut registry = Registry::new();
	{
		let attempts = attempts.clone();
		registry.register_function("flaky", move |_req: u32| {
			let attempts = attempts.clone();
			async move {
				if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
					anyhow::bail!("flaky failure");
				}
				Ok(3u32)
			}
		});
	}
	registry.register_workflow("caller", |mut ctx, _input: ()| async move {
		ctx.call::<_, u32>(
			"flaky",
			&0u32,
			RetryPolicy::new(5).with_initial_delay(Duration::from_millis(1)),
		)
		.await
	});
	let runtime = runtime(registry);

	let metadata = runtime
		.submit("caller", Some("wf".to_string()), raw("null"))
		.await
		.unwrap();

	assert_eq!(metadata.status, WorkflowStatus::Completed);
	assert_eq!(metadata.output.as_ref().unwrap().get(), "3");
	assert_eq!(attempts.load(Ordering::SeqCst), 3);

	let entries = runtime.events("wf", None).await.unwrap();
	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0].kind, JournalEntryKind::Call);
	assert!(entries[0].completed);
}

#[tokio::test]
async fn exhausted_retries_fail_the_workflow() {
	init_tracing();

	let mut registry = Registry::new();
	registry.register_function("broken", |_req: ()| async move {
		Err::<(), _>(anyhow::anyhow!("always fails"))
	});
	registry.register_workflow("caller", |mut ctx, _input: ()| async move {
		ctx.call::<_, ()>(
			"broken",
			&(),
			RetryPolicy::new(2).with_initial_delay(Duration::from_millis(1)),
		)
		.await
	});
	let runtime = runtime(registry);

	let metadata = runtime
		.submit("caller", Some("wf".to_string()), raw("null"))
		.await
		.unwrap();

	assert_eq!(metadata.status, WorkflowStatus::Failed);
	assert!(metadata.error_message.unwrap().contains("broken"));
}

#[tokio::test]
async fn sequences_are_dense_after_completion() {
	init_tracing();

	let mut registry = Registry::new();
	registry.register_function("double", |req: u32| async move { Ok(req * 2) });
	registry.register_workflow("multi", |mut ctx, _input: ()| async move {
		let a = ctx
			.call::<_, u32>("double", &2u32, RetryPolicy::no_retries())
			.await?;
		let b = ctx.side_effect("b", || async { Ok(10u32) }).await?;
		ctx.set_state("sum", &(a + b)).await?;
		ctx.sleep(Duration::from_millis(10)).await?;
		let sum = ctx.get_state::<u32>("sum").await?.unwrap_or(0);
		Ok(sum)
	});
	let runtime = runtime(registry);

	runtime
		.submit("multi", Some("wf".to_string()), raw("null"))
		.await
		.unwrap();
	tokio::time::sleep(Duration::from_millis(20)).await;
	let metadata = runtime.resume("wf").await.unwrap();

	assert_eq!(metadata.status, WorkflowStatus::Completed);
	assert_eq!(metadata.output.as_ref().unwrap().get(), "14");

	let entries = runtime.events("wf", None).await.unwrap();
	let seqs = entries.iter().map(|e| e.sequence).collect::<Vec<_>>();
	assert_eq!(seqs, vec![0, 1, 2, 3]);
	assert!(entries.iter().all(|e| e.completed));
}

#[tokio::test]
async fn uuid_is_stable_across_replay() {
	init_tracing();

	let mut registry = Registry::new();
	registry.register_workflow("ident", |mut ctx, _input: ()| async move {
		let id = ctx.uuid().await?;
		ctx.sleep(Duration::from_millis(10)).await?;
		Ok(id)
	});
	let runtime = runtime(registry);

	runtime
		.submit("ident", Some("wf".to_string()), raw("null"))
		.await
		.unwrap();
	tokio::time::sleep(Duration::from_millis(20)).await;
	let metadata = runtime.resume("wf").await.unwrap();

	// The handler's return value is the journaled side-effect output
	let entries = runtime.events("wf", None).await.unwrap();
	let journaled = entries
		.iter()
		.find(|e| e.kind == JournalEntryKind::SideEffect)
		.unwrap();
	assert_eq!(
		metadata.output.as_ref().unwrap().get(),
		journaled.output.as_ref().unwrap().get()
	);
}

#[tokio::test]
async fn signal_resumes_waiting_workflow() {
	init_tracing();

	let mut registry = Registry::new();
	registry.register_workflow("approval", |mut ctx, _input: ()| async move {
		let decision = ctx.await_signal::<String>("approve").await?;
		Ok(format!("decision: {decision}"))
	});
	let runtime = runtime(registry);

	let metadata = runtime
		.submit("approval", Some("wf".to_string()), raw("null"))
		.await
		.unwrap();
	assert_eq!(metadata.status, WorkflowStatus::Suspended);
	assert_eq!(metadata.suspended_until, None);

	// Wrong signal name is rejected without touching the journal
	let err = runtime
		.signal("wf", "reject", Some(raw("\"no\"")))
		.await
		.unwrap_err();
	assert!(matches!(
		WorkflowError::from_chain(&err),
		Some(WorkflowError::NotWaitingForSignal(_, _))
	));

	let metadata = runtime
		.signal("wf", "approve", Some(raw("\"yes\"")))
		.await
		.unwrap();
	assert_eq!(metadata.status, WorkflowStatus::Completed);
	assert_eq!(metadata.output.as_ref().unwrap().get(), "\"decision: yes\"");
}

#[tokio::test]
async fn cancel_is_terminal() {
	init_tracing();

	let mut registry = Registry::new();
	registry.register_workflow("sleeper", |mut ctx, _input: ()| async move {
		ctx.sleep(Duration::from_secs(3600)).await?;
		Ok(())
	});
	let runtime = runtime(registry);

	runtime
		.submit("sleeper", Some("wf".to_string()), raw("null"))
		.await
		.unwrap();

	assert!(runtime.cancel("wf").await.unwrap());
	let metadata = runtime.get("wf").await.unwrap().unwrap();
	assert_eq!(metadata.status, WorkflowStatus::Cancelled);

	// Timers are gone and the state is sticky
	let far_future = flywheel_util::timestamp::now() + 10_000_000;
	assert!(runtime
		.storage()
		.timers
		.find_ready(far_future, 10)
		.await
		.unwrap()
		.is_empty());

	let metadata = runtime.resume("wf").await.unwrap();
	assert_eq!(metadata.status, WorkflowStatus::Cancelled);
	assert!(!runtime.cancel("wf").await.unwrap());
}

#[tokio::test]
async fn duplicate_submit_is_rejected() {
	init_tracing();

	let mut registry = Registry::new();
	registry.register_workflow("echo", |_ctx, input: String| async move { Ok(input) });
	let runtime = runtime(registry);

	runtime
		.submit("echo", Some("wf".to_string()), raw("\"a\""))
		.await
		.unwrap();
	let err = runtime
		.submit("echo", Some("wf".to_string()), raw("\"b\""))
		.await
		.unwrap_err();

	assert!(matches!(
		WorkflowError::from_chain(&err),
		Some(WorkflowError::WorkflowAlreadyExists(_))
	));
}

#[tokio::test]
async fn unknown_names_are_rejected() {
	init_tracing();

	let mut registry = Registry::new();
	registry.register_workflow("caller", |mut ctx, _input: ()| async move {
		ctx.call::<_, ()>("missing", &(), RetryPolicy::no_retries())
			.await
	});
	let runtime = runtime(registry);

	let err = runtime.submit("nope", None, raw("null")).await.unwrap_err();
	assert!(matches!(
		WorkflowError::from_chain(&err),
		Some(WorkflowError::UnknownWorkflow(_))
	));

	// Unknown function fails the workflow
	let metadata = runtime
		.submit("caller", Some("wf".to_string()), raw("null"))
		.await
		.unwrap();
	assert_eq!(metadata.status, WorkflowStatus::Failed);
	assert!(metadata
		.error_message
		.unwrap()
		.contains("unknown function"));
}

#[tokio::test]
async fn saturated_runtime_rejects_submits() {
	init_tracing();

	let mut registry = Registry::new();
	registry.register_workflow("echo", |_ctx, input: String| async move { Ok(input) });
	let runtime = Runtime::new(
		"node-test",
		storage(),
		registry.handle(),
		RuntimeConfig {
			max_concurrent_workflows: 0,
			..Default::default()
		},
	);

	let err = runtime
		.submit("echo", Some("wf".to_string()), raw("\"x\""))
		.await
		.unwrap_err();
	assert!(matches!(
		WorkflowError::from_chain(&err),
		Some(WorkflowError::Saturated)
	));
}
