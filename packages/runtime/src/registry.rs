use std::{collections::HashMap, future::Future, sync::Arc};

use anyhow::Result;
use futures_util::{FutureExt, future::BoxFuture};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::value::RawValue;

use crate::{ctx::WorkflowCtx, error::WorkflowError};

pub type RegistryHandle = Arc<Registry>;

/// Adapter from journaled JSON to a typed function and back. The codec is
/// applied at registration, so the journal stays opaque bytes.
pub type FunctionHandler =
	Arc<dyn Fn(Box<RawValue>) -> BoxFuture<'static, Result<Box<RawValue>>> + Send + Sync>;

pub type WorkflowHandler = Arc<
	dyn Fn(WorkflowCtx, Box<RawValue>) -> BoxFuture<'static, Result<Box<RawValue>>> + Send + Sync,
>;

/// Process-wide mapping from names to handlers. Built once at startup and
/// shared behind an `Arc`.
#[derive(Default)]
pub struct Registry {
	functions: HashMap<String, FunctionHandler>,
	workflows: HashMap<String, WorkflowHandler>,
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn handle(self) -> RegistryHandle {
		Arc::new(self)
	}

	/// Registers a callable function. `call` operations resolve against this
	/// table.
	pub fn register_function<Req, Res, F, Fut>(&mut self, name: impl Into<String>, function: F)
	where
		Req: DeserializeOwned + Send + 'static,
		Res: Serialize + Send + 'static,
		F: Fn(Req) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Res>> + Send + 'static,
	{
		let function = Arc::new(function);
		self.functions.insert(
			name.into(),
			Arc::new(move |raw: Box<RawValue>| {
				let function = function.clone();
				async move {
					let req = serde_json::from_str::<Req>(raw.get())
						.map_err(|err| WorkflowError::InvalidRequest(err.to_string()))?;
					let res = function(req).await?;
					Ok(serde_json::value::to_raw_value(&res)?)
				}
				.boxed()
			}),
		);
	}

	/// Registers a workflow handler. The handler owns its context for the
	/// duration of one execution and is re-invoked from the top on every
	/// resume.
	pub fn register_workflow<In, Out, F, Fut>(&mut self, name: impl Into<String>, handler: F)
	where
		In: DeserializeOwned + Send + 'static,
		Out: Serialize + Send + 'static,
		F: Fn(WorkflowCtx, In) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Out>> + Send + 'static,
	{
		let handler = Arc::new(handler);
		self.workflows.insert(
			name.into(),
			Arc::new(move |ctx: WorkflowCtx, raw: Box<RawValue>| {
				let handler = handler.clone();
				async move {
					let input = serde_json::from_str::<In>(raw.get())
						.map_err(|err| WorkflowError::InvalidRequest(err.to_string()))?;
					let out = handler(ctx, input).await?;
					Ok(serde_json::value::to_raw_value(&out)?)
				}
				.boxed()
			}),
		);
	}

	pub fn get_function(&self, name: &str) -> Result<FunctionHandler> {
		self.functions
			.get(name)
			.cloned()
			.ok_or_else(|| WorkflowError::UnknownFunction(name.to_string()).into())
	}

	pub fn get_workflow(&self, name: &str) -> Result<WorkflowHandler> {
		self.workflows
			.get(name)
			.cloned()
			.ok_or_else(|| WorkflowError::UnknownWorkflow(name.to_string()).into())
	}

	pub fn has_workflow(&self, name: &str) -> bool {
		self.workflows.contains_key(name)
	}

	pub fn size(&self) -> usize {
		self.workflows.len() + self.functions.len()
	}
}
