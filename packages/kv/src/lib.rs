pub mod driver;
pub mod error;

use std::sync::Arc;

use anyhow::Result;

pub use crate::{
	driver::{KvDriver, memory::MemoryKvDriver, rocksdb::RocksDbKvDriver},
	error::KvError,
};

/// A single entry yielded by a scan, in ascending key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
	pub key: Vec<u8>,
	pub value: Vec<u8>,
}

/// One operation inside an atomic batch.
#[derive(Debug, Clone)]
pub enum WriteOp {
	Put { key: Vec<u8>, value: Vec<u8> },
	Delete { key: Vec<u8> },
}

impl WriteOp {
	pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
		WriteOp::Put {
			key: key.into(),
			value: value.into(),
		}
	}

	pub fn delete(key: impl Into<Vec<u8>>) -> Self {
		WriteOp::Delete { key: key.into() }
	}
}

/// Handle to an ordered byte-keyed store. Cheap to clone; all clones share
/// the same underlying driver.
#[derive(Clone)]
pub struct Kv {
	driver: Arc<dyn KvDriver>,
}

impl Kv {
	pub fn new(driver: Arc<dyn KvDriver>) -> Self {
		Kv { driver }
	}

	pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
		self.driver.get(key).await
	}

	pub async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
		self.driver.put(key, value).await
	}

	pub async fn delete(&self, key: &[u8]) -> Result<()> {
		self.driver.delete(key).await
	}

	/// Returns entries whose key starts with `prefix`, ascending.
	pub async fn scan(&self, prefix: &[u8], limit: Option<usize>) -> Result<Vec<KvEntry>> {
		self.driver.scan(prefix, limit).await
	}

	/// Returns entries in `[start, end)`, ascending.
	pub async fn scan_range(
		&self,
		start: &[u8],
		end: &[u8],
		limit: Option<usize>,
	) -> Result<Vec<KvEntry>> {
		self.driver.scan_range(start, end, limit).await
	}

	/// Applies all ops atomically. Observers and crash recovery never see a
	/// partially applied batch.
	pub async fn batch(&self, ops: Vec<WriteOp>) -> Result<()> {
		self.driver.batch(ops).await
	}

	pub async fn close(&self) -> Result<()> {
		self.driver.close().await
	}
}

/// The exclusive upper bound of the key range covered by `prefix`.
pub fn end_of_prefix_range(prefix: &[u8]) -> Vec<u8> {
	let mut end = prefix.to_vec();
	while let Some(last) = end.last_mut() {
		if *last < 0xff {
			*last += 1;
			return end;
		}
		end.pop();
	}
	// All 0xff bytes, scan to the end of the key space
	vec![0xff; prefix.len() + 1]
}
