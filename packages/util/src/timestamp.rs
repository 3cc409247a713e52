use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix timestamp in milliseconds.
pub fn now() -> i64 {
	time_since_epoch(SystemTime::now())
}

pub fn time_since_epoch(ts: SystemTime) -> i64 {
	ts.duration_since(UNIX_EPOCH)
		.expect("system clock before unix epoch")
		.as_millis() as i64
}
