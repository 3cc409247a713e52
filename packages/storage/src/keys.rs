//! Key layouts for the shared ordered key space.
//!
//! Every namespace is a single tag byte followed by `0x00`-delimited
//! components. Numeric components are big-endian so lexicographic byte order
//! matches numeric order (journal entries sort by sequence, timers by wake
//! time). Identifiers are opaque strings and must not contain `0x00`.

use anyhow::{Context, Result, bail};

use crate::types::WorkflowStatus;

pub const JOURNAL: u8 = b'j';
pub const STATE: u8 = b's';
pub const WORKFLOW: u8 = b'w';
pub const STATUS_IDX: u8 = b'x';
pub const TIMER: u8 = b't';

const SEP: u8 = 0x00;

fn push_component(buf: &mut Vec<u8>, component: &str) {
	debug_assert!(!component.as_bytes().contains(&SEP));
	buf.extend_from_slice(component.as_bytes());
}

fn subspace(tag: u8, components: &[&str]) -> Vec<u8> {
	let mut buf = vec![tag, SEP];
	for component in components {
		push_component(&mut buf, component);
		buf.push(SEP);
	}
	buf
}

/// `j/<workflow_id>/<seq be u64>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalKey {
	pub workflow_id: String,
	pub sequence: u64,
}

impl JournalKey {
	pub fn new(workflow_id: impl Into<String>, sequence: u64) -> Self {
		JournalKey {
			workflow_id: workflow_id.into(),
			sequence,
		}
	}

	pub fn pack(&self) -> Vec<u8> {
		let mut buf = subspace(JOURNAL, &[&self.workflow_id]);
		buf.extend_from_slice(&self.sequence.to_be_bytes());
		buf
	}

	pub fn unpack(raw: &[u8]) -> Result<Self> {
		let (tag, components, tail) = split_key(raw, 1, 8)?;
		if tag != JOURNAL {
			bail!("not a journal key");
		}
		Ok(JournalKey {
			workflow_id: components.into_iter().next().context("missing workflow id")?,
			sequence: u64::from_be_bytes(tail.try_into().ok().context("bad sequence")?),
		})
	}

	pub fn subspace(workflow_id: &str) -> Vec<u8> {
		subspace(JOURNAL, &[workflow_id])
	}
}

/// `s/<workflow_id>/<state_key>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateKey {
	pub workflow_id: String,
	pub state_key: String,
}

impl StateKey {
	pub fn new(workflow_id: impl Into<String>, state_key: impl Into<String>) -> Self {
		StateKey {
			workflow_id: workflow_id.into(),
			state_key: state_key.into(),
		}
	}

	pub fn pack(&self) -> Vec<u8> {
		let mut buf = subspace(STATE, &[&self.workflow_id]);
		push_component(&mut buf, &self.state_key);
		buf
	}

	pub fn subspace(workflow_id: &str) -> Vec<u8> {
		subspace(STATE, &[workflow_id])
	}
}

/// `w/<workflow_id>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowKey {
	pub workflow_id: String,
}

impl WorkflowKey {
	pub fn new(workflow_id: impl Into<String>) -> Self {
		WorkflowKey {
			workflow_id: workflow_id.into(),
		}
	}

	pub fn pack(&self) -> Vec<u8> {
		let mut buf = vec![WORKFLOW, SEP];
		push_component(&mut buf, &self.workflow_id);
		buf
	}

	pub fn entire_subspace() -> Vec<u8> {
		vec![WORKFLOW, SEP]
	}
}

/// `x/<status>/<workflow_id>`, value is empty. Secondary index for
/// `find_by_status` scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusIdxKey {
	pub status: WorkflowStatus,
	pub workflow_id: String,
}

impl StatusIdxKey {
	pub fn new(status: WorkflowStatus, workflow_id: impl Into<String>) -> Self {
		StatusIdxKey {
			status,
			workflow_id: workflow_id.into(),
		}
	}

	pub fn pack(&self) -> Vec<u8> {
		let mut buf = subspace(STATUS_IDX, &[self.status.as_ref()]);
		push_component(&mut buf, &self.workflow_id);
		buf
	}

	pub fn unpack(raw: &[u8]) -> Result<Self> {
		let (tag, components, tail) = split_key(raw, 1, 0)?;
		if tag != STATUS_IDX {
			bail!("not a status index key");
		}
		let status = components
			.into_iter()
			.next()
			.context("missing status")?
			.parse::<WorkflowStatus>()
			.context("unknown status in index key")?;
		Ok(StatusIdxKey {
			status,
			workflow_id: String::from_utf8(tail.to_vec()).context("bad workflow id")?,
		})
	}

	pub fn subspace(status: WorkflowStatus) -> Vec<u8> {
		subspace(STATUS_IDX, &[status.as_ref()])
	}
}

/// `t/<wake_ts be u64>/<timer_id>`. Ordered by wake time for ready scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerKey {
	pub wake_ts: i64,
	pub timer_id: String,
}

impl TimerKey {
	pub fn new(wake_ts: i64, timer_id: impl Into<String>) -> Self {
		TimerKey {
			wake_ts,
			timer_id: timer_id.into(),
		}
	}

	pub fn pack(&self) -> Vec<u8> {
		let mut buf = vec![TIMER, SEP];
		buf.extend_from_slice(&(self.wake_ts as u64).to_be_bytes());
		buf.push(SEP);
		push_component(&mut buf, &self.timer_id);
		buf
	}

	pub fn unpack(raw: &[u8]) -> Result<Self> {
		if raw.len() < 11 || raw[0] != TIMER || raw[1] != SEP || raw[10] != SEP {
			bail!("not a timer key");
		}
		let wake_ts = u64::from_be_bytes(raw[2..10].try_into().ok().context("bad wake ts")?) as i64;
		Ok(TimerKey {
			wake_ts,
			timer_id: String::from_utf8(raw[11..].to_vec()).context("bad timer id")?,
		})
	}

	pub fn entire_subspace() -> Vec<u8> {
		vec![TIMER, SEP]
	}

	/// Exclusive upper bound covering every timer with `wake_ts <= now`.
	pub fn ready_range_end(now: i64) -> Vec<u8> {
		let mut buf = vec![TIMER, SEP];
		buf.extend_from_slice(&((now + 1) as u64).to_be_bytes());
		buf
	}
}

/// Splits `tag, SEP, c0, SEP, c1, SEP, ..., tail` where `fixed_tail` is the
/// byte length of a fixed-width trailing component (0 for string tails).
fn split_key(raw: &[u8], components: usize, fixed_tail: usize) -> Result<(u8, Vec<String>, Vec<u8>)> {
	if raw.len() < 2 + fixed_tail || raw[1] != SEP {
		bail!("malformed key");
	}
	let tag = raw[0];
	let (body, fixed) = raw[2..].split_at(raw.len() - 2 - fixed_tail);

	let mut out = Vec::with_capacity(components);
	let mut rest = body;
	for _ in 0..components {
		let sep = rest
			.iter()
			.position(|&b| b == SEP)
			.context("missing component separator")?;
		out.push(String::from_utf8(rest[..sep].to_vec()).context("non-utf8 key component")?);
		rest = &rest[sep + 1..];
	}

	let tail = if fixed_tail > 0 { fixed } else { rest };
	Ok((tag, out, tail.to_vec()))
}
