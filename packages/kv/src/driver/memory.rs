use std::{
	collections::BTreeMap,
	ops::Bound,
	sync::{
		RwLock,
		atomic::{AtomicBool, Ordering},
	},
};

use anyhow::Result;
use async_trait::async_trait;

use crate::{KvEntry, KvError, WriteOp, driver::KvDriver, end_of_prefix_range};

/// In-memory driver for tests and ephemeral nodes. A single `RwLock` around
/// the tree makes every batch atomic with respect to readers.
#[derive(Default)]
pub struct MemoryKvDriver {
	data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
	closed: AtomicBool,
}

impl MemoryKvDriver {
	pub fn new() -> Self {
		Self::default()
	}

	fn check_open(&self) -> Result<()> {
		if self.closed.load(Ordering::SeqCst) {
			Err(KvError::Closed.into())
		} else {
			Ok(())
		}
	}
}

#[async_trait]
impl KvDriver for MemoryKvDriver {
	async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
		self.check_open()?;
		let data = self.data.read().map_err(|_| KvError::Io("lock poisoned".into()))?;
		Ok(data.get(key).cloned())
	}

	async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
		self.check_open()?;
		let mut data = self.data.write().map_err(|_| KvError::Io("lock poisoned".into()))?;
		data.insert(key.to_vec(), value.to_vec());
		Ok(())
	}

	async fn delete(&self, key: &[u8]) -> Result<()> {
		self.check_open()?;
		let mut data = self.data.write().map_err(|_| KvError::Io("lock poisoned".into()))?;
		data.remove(key);
		Ok(())
	}

	async fn scan(&self, prefix: &[u8], limit: Option<usize>) -> Result<Vec<KvEntry>> {
		let end = end_of_prefix_range(prefix);
		self.scan_range(prefix, &end, limit).await
	}

	async fn scan_range(
		&self,
		start: &[u8],
		end: &[u8],
		limit: Option<usize>,
	) -> Result<Vec<KvEntry>> {
		self.check_open()?;
		let data = self.data.read().map_err(|_| KvError::Io("lock poisoned".into()))?;
		let iter = data
			.range::<[u8], _>((Bound::Included(start), Bound::Excluded(end)))
			.map(|(k, v)| KvEntry {
				key: k.clone(),
				value: v.clone(),
			});

		Ok(match limit {
			Some(limit) => iter.take(limit).collect(),
			None => iter.collect(),
		})
	}

	async fn batch(&self, ops: Vec<WriteOp>) -> Result<()> {
		self.check_open()?;
		let mut data = self.data.write().map_err(|_| KvError::Io("lock poisoned".into()))?;
		for op in ops {
			match op {
				WriteOp::Put { key, value } => {
					data.insert(key, value);
				}
				WriteOp::Delete { key } => {
					data.remove(&key);
				}
			}
		}
		Ok(())
	}

	async fn close(&self) -> Result<()> {
		self.closed.store(true, Ordering::SeqCst);
		Ok(())
	}
}
