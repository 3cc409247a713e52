use std::sync::Arc;

use flywheel_kv::{Kv, MemoryKvDriver, RocksDbKvDriver, WriteOp};

fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter("debug")
		.with_test_writer()
		.try_init();
}

fn memory_kv() -> Kv {
	Kv::new(Arc::new(MemoryKvDriver::new()))
}

fn rocksdb_kv(dir: &tempfile::TempDir) -> Kv {
	let driver = RocksDbKvDriver::open(dir.path().join("db")).unwrap();
	Kv::new(Arc::new(driver))
}

async fn roundtrip(kv: &Kv) {
	assert_eq!(kv.get(b"a").await.unwrap(), None);

	kv.put(b"a", b"1").await.unwrap();
	kv.put(b"b", b"2").await.unwrap();
	assert_eq!(kv.get(b"a").await.unwrap(), Some(b"1".to_vec()));

	kv.delete(b"a").await.unwrap();
	assert_eq!(kv.get(b"a").await.unwrap(), None);
	assert_eq!(kv.get(b"b").await.unwrap(), Some(b"2".to_vec()));
}

async fn prefix_scan_is_ordered(kv: &Kv) {
	// Inserted out of order on purpose
	kv.put(b"j/wf1/\x00\x00\x00\x00\x00\x00\x00\x02", b"two")
		.await
		.unwrap();
	kv.put(b"j/wf1/\x00\x00\x00\x00\x00\x00\x00\x00", b"zero")
		.await
		.unwrap();
	kv.put(b"j/wf1/\x00\x00\x00\x00\x00\x00\x00\x01", b"one")
		.await
		.unwrap();
	kv.put(b"j/wf2/\x00\x00\x00\x00\x00\x00\x00\x00", b"other")
		.await
		.unwrap();

	let entries = kv.scan(b"j/wf1/", None).await.unwrap();
	assert_eq!(entries.len(), 3);
	let values = entries
		.iter()
		.map(|e| e.value.clone())
		.collect::<Vec<_>>();
	assert_eq!(values, vec![b"zero".to_vec(), b"one".to_vec(), b"two".to_vec()]);

	let limited = kv.scan(b"j/wf1/", Some(2)).await.unwrap();
	assert_eq!(limited.len(), 2);
}

async fn range_scan_excludes_end(kv: &Kv) {
	for i in 0u8..10 {
		kv.put(&[b't', i], &[i]).await.unwrap();
	}

	let entries = kv.scan_range(&[b't', 2], &[b't', 5], None).await.unwrap();
	let keys = entries.iter().map(|e| e.key[1]).collect::<Vec<_>>();
	assert_eq!(keys, vec![2, 3, 4]);
}

async fn batch_applies_all_ops(kv: &Kv) {
	kv.put(b"victim", b"x").await.unwrap();

	kv.batch(vec![
		WriteOp::put(b"k1".to_vec(), b"v1".to_vec()),
		WriteOp::put(b"k2".to_vec(), b"v2".to_vec()),
		WriteOp::delete(b"victim".to_vec()),
	])
	.await
	.unwrap();

	assert_eq!(kv.get(b"k1").await.unwrap(), Some(b"v1".to_vec()));
	assert_eq!(kv.get(b"k2").await.unwrap(), Some(b"v2".to_vec()));
	assert_eq!(kv.get(b"victim").await.unwrap(), None);
}

async fn closed_store_rejects_ops(kv: &Kv) {
	kv.close().await.unwrap();
	assert!(kv.get(b"x").await.is_err());
	assert!(kv.put(b"x", b"y").await.is_err());
}

#[tokio::test]
async fn memory_driver() {
	init_tracing();

	let kv = memory_kv();
	roundtrip(&kv).await;
	prefix_scan_is_ordered(&kv).await;
	range_scan_excludes_end(&kv).await;
	batch_applies_all_ops(&kv).await;
	closed_store_rejects_ops(&kv).await;
}

#[tokio::test]
async fn rocksdb_driver() {
	init_tracing();

	let dir = tempfile::tempdir().unwrap();
	let kv = rocksdb_kv(&dir);
	roundtrip(&kv).await;
	prefix_scan_is_ordered(&kv).await;
	range_scan_excludes_end(&kv).await;
	batch_applies_all_ops(&kv).await;
	closed_store_rejects_ops(&kv).await;
}

#[tokio::test]
async fn rocksdb_persists_across_reopen() {
	init_tracing();

	let dir = tempfile::tempdir().unwrap();
	{
		let kv = rocksdb_kv(&dir);
		kv.put(b"persisted", b"yes").await.unwrap();
		kv.close().await.unwrap();
	}

	let kv = rocksdb_kv(&dir);
	assert_eq!(kv.get(b"persisted").await.unwrap(), Some(b"yes".to_vec()));
}
