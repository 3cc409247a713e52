use std::{
	path::PathBuf,
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use rocksdb::{DB, Direction, IteratorMode, Options, WriteBatch};

use crate::{KvEntry, KvError, WriteOp, driver::KvDriver, end_of_prefix_range};

/// On-disk driver backed by RocksDB. Batches go through `WriteBatch` so they
/// hit the WAL as a single atomic record.
pub struct RocksDbKvDriver {
	db: Arc<DB>,
	closed: AtomicBool,
}

impl RocksDbKvDriver {
	pub fn open(db_path: PathBuf) -> Result<Self> {
		tracing::info!(path=%db_path.display(), "opening rocksdb");

		std::fs::create_dir_all(&db_path).context("failed to create database directory")?;

		let mut opts = Options::default();
		opts.create_if_missing(true);
		opts.set_max_open_files(10000);
		opts.set_keep_log_file_num(10);
		opts.set_max_total_wal_size(64 * 1024 * 1024); // 64MiB

		let db = DB::open(&opts, db_path).context("failed to open rocksdb")?;

		Ok(RocksDbKvDriver {
			db: Arc::new(db),
			closed: AtomicBool::new(false),
		})
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
impl KvDriver for RocksDbKvDriver {
	async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
		self.check_open()?;
		self.db
			.get(key)
			.map_err(|err| KvError::Io(err.to_string()).into())
	}

	async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
		self.check_open()?;
		self.db
			.put(key, value)
			.map_err(|err| KvError::Io(err.to_string()).into())
	}

	async fn delete(&self, key: &[u8]) -> Result<()> {
		self.check_open()?;
		self.db
			.delete(key)
			.map_err(|err| KvError::Io(err.to_string()).into())
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

		let mut entries = Vec::new();
		let iter = self
			.db
			.iterator(IteratorMode::From(start, Direction::Forward));

		for item in iter {
			let (key, value) = item.map_err(|err| KvError::Io(err.to_string()))?;

			if &*key >= end {
				break;
			}

			entries.push(KvEntry {
				key: key.into_vec(),
				value: value.into_vec(),
			});

			if let Some(limit) = limit {
				if entries.len() >= limit {
					break;
				}
			}
		}

		Ok(entries)
	}

	async fn batch(&self, ops: Vec<WriteOp>) -> Result<()> {
		self.check_open()?;

		let mut batch = WriteBatch::default();
		for op in ops {
			match op {
				WriteOp::Put { key, value } => batch.put(key, value),
				WriteOp::Delete { key } => batch.delete(key),
			}
		}

		self.db
			.write(batch)
			.map_err(|err| KvError::Io(err.to_string()).into())
	}

	async fn close(&self) -> Result<()> {
		self.closed.store(true, Ordering::SeqCst);
		self.db.flush().map_err(|err| KvError::Io(err.to_string()))?;
		Ok(())
	}
}

impl Drop for RocksDbKvDriver {
	fn drop(&mut self) {
		self.db.cancel_all_background_work(true);
	}
}
