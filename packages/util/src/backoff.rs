use std::time::Duration;

/// Exponential backoff with a multiplier, capped.
pub fn calculate_backoff(
	attempt: usize,
	initial: Duration,
	multiplier: f64,
	cap: Duration,
) -> Duration {
	let base = initial.as_millis() as f64 * multiplier.powi(attempt as i32);
	let capped = base.min(cap.as_millis() as f64);
	Duration::from_millis(capped as u64)
}
