use std::{
	collections::HashMap,
	sync::Mutex,
};

use crate::member::MemberUpdate;

struct BufferedUpdate {
	update: MemberUpdate,
	transmissions: u32,
}

/// Bounded table of recent membership updates piggybacked on outgoing
/// gossip. Each entry is transmitted a limited number of times, scaling with
/// cluster size as `ceil(2 * ln N)`.
pub struct DisseminationBuffer {
	entries: Mutex<HashMap<String, BufferedUpdate>>,
	max_updates: usize,
}

pub fn max_transmissions(cluster_size: usize) -> u32 {
	((2.0 * (cluster_size.max(1) as f64).ln()).ceil() as u32).max(1)
}

impl DisseminationBuffer {
	pub fn new(max_updates: usize) -> Self {
		DisseminationBuffer {
			entries: Mutex::new(HashMap::new()),
			max_updates,
		}
	}

	/// Queues an update, replacing any buffered entry for the same node
	/// whose incarnation does not exceed the incoming one.
	pub fn add(&self, update: MemberUpdate) {
		let mut entries = self
			.entries
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner());

		match entries.get(&update.node_id) {
			Some(existing) if existing.update.incarnation > update.incarnation => {}
			_ => {
				entries.insert(
					update.node_id.clone(),
					BufferedUpdate {
						update,
						transmissions: 0,
					},
				);
			}
		}
	}

	/// Up to `max_updates` entries prioritised by highest incarnation. Each
	/// returned entry's transmission count is incremented; entries that
	/// reach the transmission limit for the given cluster size are evicted.
	pub fn get_updates(&self, cluster_size: usize) -> Vec<MemberUpdate> {
		let limit = max_transmissions(cluster_size);
		let mut entries = self
			.entries
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner());

		let mut selected = entries
			.values()
			.map(|e| (e.update.incarnation, e.update.node_id.clone()))
			.collect::<Vec<_>>();
		selected.sort_by(|a, b| b.0.cmp(&a.0));
		selected.truncate(self.max_updates);

		let mut out = Vec::with_capacity(selected.len());
		for (_, node_id) in selected {
			if let Some(entry) = entries.get_mut(&node_id) {
				out.push(entry.update.clone());
				entry.transmissions += 1;
				if entry.transmissions >= limit {
					entries.remove(&node_id);
				}
			}
		}

		out
	}

	pub fn len(&self) -> usize {
		self.entries
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::member::NodeState;

	fn update(node_id: &str, incarnation: u64) -> MemberUpdate {
		MemberUpdate {
			node_id: node_id.to_string(),
			address: format!("{node_id}:7400"),
			state: NodeState::Alive,
			incarnation,
		}
	}

	#[test]
	fn transmission_limit_scales_with_cluster_size() {
		assert_eq!(max_transmissions(1), 1);
		assert_eq!(max_transmissions(3), 3);
		assert_eq!(max_transmissions(10), 5);
		assert_eq!(max_transmissions(100), 10);
	}

	#[test]
	fn newer_incarnation_replaces_buffered_entry() {
		let buffer = DisseminationBuffer::new(8);
		buffer.add(update("n1", 3));
		buffer.add(update("n1", 5));
		buffer.add(update("n1", 4)); // stale, kept out

		let updates = buffer.get_updates(10);
		assert_eq!(updates.len(), 1);
		assert_eq!(updates[0].incarnation, 5);
	}

	#[test]
	fn updates_are_prioritised_by_incarnation() {
		let buffer = DisseminationBuffer::new(2);
		buffer.add(update("n1", 1));
		buffer.add(update("n2", 9));
		buffer.add(update("n3", 4));

		let updates = buffer.get_updates(10);
		let incarnations = updates.iter().map(|u| u.incarnation).collect::<Vec<_>>();
		assert_eq!(incarnations, vec![9, 4]);
	}

	#[test]
	fn entries_are_evicted_after_transmission_limit() {
		let buffer = DisseminationBuffer::new(8);
		buffer.add(update("n1", 1));

		// cluster_size 3 allows 3 transmissions
		for _ in 0..3 {
			assert_eq!(buffer.get_updates(3).len(), 1);
		}
		assert!(buffer.get_updates(3).is_empty());
		assert!(buffer.is_empty());
	}
}
