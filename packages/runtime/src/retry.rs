use std::{sync::Arc, time::Duration};

/// Retry behavior for `WorkflowCtx::call`. Exponential backoff with a
/// multiplier and cap; the predicate selects which errors are retried.
#[derive(Clone)]
pub struct RetryPolicy {
	pub max_attempts: u32,
	pub initial_delay: Duration,
	pub multiplier: f64,
	pub max_delay: Duration,
	retryable: Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		RetryPolicy {
			max_attempts: 3,
			initial_delay: Duration::from_millis(100),
			multiplier: 2.0,
			max_delay: Duration::from_secs(10),
			retryable: Arc::new(|_| true),
		}
	}
}

impl RetryPolicy {
	pub fn new(max_attempts: u32) -> Self {
		RetryPolicy {
			max_attempts,
			..Default::default()
		}
	}

	/// A single attempt, no backoff.
	pub fn no_retries() -> Self {
		RetryPolicy::new(1)
	}

	pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
		self.initial_delay = initial_delay;
		self
	}

	pub fn with_multiplier(mut self, multiplier: f64) -> Self {
		self.multiplier = multiplier;
		self
	}

	pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
		self.max_delay = max_delay;
		self
	}

	pub fn retry_if(
		mut self,
		predicate: impl Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
	) -> Self {
		self.retryable = Arc::new(predicate);
		self
	}

	pub fn should_retry(&self, err: &anyhow::Error) -> bool {
		(self.retryable)(err)
	}

	/// Delay before retrying after the given zero-based failed attempt.
	pub fn delay_for(&self, attempt: usize) -> Duration {
		flywheel_util::backoff::calculate_backoff(
			attempt,
			self.initial_delay,
			self.multiplier,
			self.max_delay,
		)
	}
}

#[cfg(test)]
mod tests {
	use anyhow::anyhow;

	use super::*;

	#[test]
	fn delays_grow_to_cap() {
		let policy = RetryPolicy::new(10)
			.with_initial_delay(Duration::from_millis(100))
			.with_multiplier(2.0)
			.with_max_delay(Duration::from_millis(300));

		assert_eq!(policy.delay_for(0), Duration::from_millis(100));
		assert_eq!(policy.delay_for(1), Duration::from_millis(200));
		assert_eq!(policy.delay_for(2), Duration::from_millis(300));
		assert_eq!(policy.delay_for(9), Duration::from_millis(300));
	}

	#[test]
	fn predicate_gates_retries() {
		let policy = RetryPolicy::new(5).retry_if(|err| err.to_string().contains("transient"));

		assert!(policy.should_retry(&anyhow!("transient glitch")));
		assert!(!policy.should_retry(&anyhow!("bad input")));
	}
}
