pub mod memory;
pub mod rocksdb;

use anyhow::Result;
use async_trait::async_trait;

use crate::{KvEntry, WriteOp};

/// Ordered byte-keyed map. Ordering is lexicographic over bytes. `batch`
/// applies all ops atomically with respect to crash and concurrent readers.
#[async_trait]
pub trait KvDriver: Send + Sync {
	async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

	async fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

	async fn delete(&self, key: &[u8]) -> Result<()>;

	async fn scan(&self, prefix: &[u8], limit: Option<usize>) -> Result<Vec<KvEntry>>;

	async fn scan_range(
		&self,
		start: &[u8],
		end: &[u8],
		limit: Option<usize>,
	) -> Result<Vec<KvEntry>>;

	async fn batch(&self, ops: Vec<WriteOp>) -> Result<()>;

	async fn close(&self) -> Result<()>;
}
