use std::{
	collections::{BTreeMap, HashMap},
	sync::{Arc, RwLock},
};

/// Consistent-hash ring. Each node occupies `virtual_nodes` positions
/// derived from hashing `"{node_id}#{i}"`. Lookups run against an immutable
/// snapshot that is swapped atomically on every membership change, so
/// concurrent readers always see one consistent view.
pub struct HashRing {
	virtual_nodes: usize,
	inner: RwLock<RingInner>,
}

struct RingInner {
	positions: Arc<BTreeMap<u64, String>>,
	by_node: HashMap<String, Vec<u64>>,
}

/// First 8 bytes of the md5 digest, big-endian. md5 is used for uniformity,
/// not security.
pub fn hash_key(key: &str) -> u64 {
	let digest = md5::compute(key.as_bytes());
	u64::from_be_bytes(
		digest.0[..8]
			.try_into()
			.expect("md5 digest is 16 bytes"),
	)
}

impl HashRing {
	pub fn new(virtual_nodes: usize) -> Self {
		HashRing {
			virtual_nodes,
			inner: RwLock::new(RingInner {
				positions: Arc::new(BTreeMap::new()),
				by_node: HashMap::new(),
			}),
		}
	}

	fn snapshot(&self) -> Arc<BTreeMap<u64, String>> {
		self.inner
			.read()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.positions
			.clone()
	}

	pub fn add_node(&self, node_id: &str) {
		let mut inner = self
			.inner
			.write()
			.unwrap_or_else(|poisoned| poisoned.into_inner());

		if inner.by_node.contains_key(node_id) {
			return;
		}

		let mut positions = (*inner.positions).clone();
		let mut owned = Vec::with_capacity(self.virtual_nodes);
		for i in 0..self.virtual_nodes {
			let position = hash_key(&format!("{node_id}#{i}"));
			positions.insert(position, node_id.to_string());
			owned.push(position);
		}

		inner.by_node.insert(node_id.to_string(), owned);
		inner.positions = Arc::new(positions);
	}

	pub fn remove_node(&self, node_id: &str) {
		let mut inner = self
			.inner
			.write()
			.unwrap_or_else(|poisoned| poisoned.into_inner());

		let Some(owned) = inner.by_node.remove(node_id) else {
			return;
		};

		let mut positions = (*inner.positions).clone();
		for position in owned {
			// A colliding position may have been claimed by another node
			if positions.get(&position).map(String::as_str) == Some(node_id) {
				positions.remove(&position);
			}
		}

		inner.positions = Arc::new(positions);
	}

	/// The node owning `key`: the first position at or after `hash(key)`,
	/// wrapping to the first position. `None` iff the ring is empty.
	pub fn get_node(&self, key: &str) -> Option<String> {
		let positions = self.snapshot();
		if positions.is_empty() {
			return None;
		}

		let hash = hash_key(key);
		positions
			.range(hash..)
			.next()
			.or_else(|| positions.iter().next())
			.map(|(_, node_id)| node_id.clone())
	}

	/// Up to `n` distinct nodes in ring order starting at `hash(key)`.
	pub fn get_nodes(&self, key: &str, n: usize) -> Vec<String> {
		let positions = self.snapshot();
		let hash = hash_key(key);

		let mut out = Vec::with_capacity(n);
		for (_, node_id) in positions.range(hash..).chain(positions.range(..hash)) {
			if out.len() >= n {
				break;
			}
			if !out.contains(node_id) {
				out.push(node_id.clone());
			}
		}
		out
	}

	pub fn contains_node(&self, node_id: &str) -> bool {
		self.inner
			.read()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.by_node
			.contains_key(node_id)
	}

	pub fn node_count(&self) -> usize {
		self.inner
			.read()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.by_node
			.len()
	}

	pub fn is_empty(&self) -> bool {
		self.node_count() == 0
	}
}
