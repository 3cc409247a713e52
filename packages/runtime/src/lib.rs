pub mod ctx;
pub mod error;
pub mod recovery;
pub mod registry;
pub mod retry;
pub mod runtime;
pub mod timer;

pub use crate::{
	ctx::WorkflowCtx,
	error::WorkflowError,
	recovery::RecoveryProcessor,
	registry::{Registry, RegistryHandle},
	retry::RetryPolicy,
	runtime::{Runtime, RuntimeConfig},
	timer::TimerProcessor,
};
