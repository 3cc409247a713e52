#[derive(thiserror::Error, Debug)]
pub enum KvError {
	#[error("kv store closed")]
	Closed,

	#[error("io: {0}")]
	Io(String),
}
