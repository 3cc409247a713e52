pub mod ctx;
pub mod error;
pub mod executor;
pub mod health;
pub mod router;
pub mod workflows;

pub use crate::{
	ctx::ApiCtx,
	error::ApiError,
	executor::RuntimeExecutor,
	router::{ApiDoc, router},
};
