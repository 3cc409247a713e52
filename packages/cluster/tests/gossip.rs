mod common;

use std::time::Duration;

use flywheel_cluster::{MemoryHub, NodeState};

use common::{init_tracing, shutdown_node, start_node, wait_until};

#[tokio::test]
async fn three_nodes_converge_via_seed() {
	init_tracing();

	let hub = MemoryHub::new();
	let n1 = start_node(&hub, "n1", &["n1"]).await;
	let n2 = start_node(&hub, "n2", &["n1"]).await;
	let n3 = start_node(&hub, "n3", &["n1"]).await;

	for node in [&n1.node, &n2.node, &n3.node] {
		let node = node.clone();
		wait_until("full membership", Duration::from_secs(5), || {
			let node = node.clone();
			async move {
				node.membership().len() == 3 && node.ring().node_count() == 3
			}
		})
		.await;
	}

	// All views agree on the owner of any key
	let owner1 = n1.node.ring().get_node("some-key").unwrap();
	let owner2 = n2.node.ring().get_node("some-key").unwrap();
	let owner3 = n3.node.ring().get_node("some-key").unwrap();
	assert_eq!(owner1, owner2);
	assert_eq!(owner2, owner3);

	shutdown_node(n3).await;
	shutdown_node(n2).await;
	shutdown_node(n1).await;
}

#[tokio::test]
async fn partition_marks_unreachable_nodes_dead_then_heals() {
	init_tracing();

	let hub = MemoryHub::new();
	let n1 = start_node(&hub, "n1", &["n1"]).await;
	let n2 = start_node(&hub, "n2", &["n1"]).await;
	let n3 = start_node(&hub, "n3", &["n1"]).await;

	for node in [&n1.node, &n2.node, &n3.node] {
		let node = node.clone();
		wait_until("full membership", Duration::from_secs(5), || {
			let node = node.clone();
			async move { node.membership().len() == 3 }
		})
		.await;
	}

	// Cut n3 off
	hub.partition(vec![vec!["n1", "n2"], vec!["n3"]]);

	// Majority side: n3 goes suspect, then dead, and drops off the ring
	for node in [&n1.node, &n2.node] {
		let node = node.clone();
		wait_until("n3 marked dead", Duration::from_secs(10), || {
			let node = node.clone();
			async move {
				matches!(
					node.membership().get("n3").await,
					Some(info) if info.state == NodeState::Dead
				) && !node.ring().contains_node("n3")
			}
		})
		.await;
	}

	// Minority side: n3 sees both peers dead and shrinks to a ring of one
	{
		let node = n3.node.clone();
		wait_until("n3 isolates", Duration::from_secs(10), || {
			let node = node.clone();
			async move { node.ring().node_count() == 1 }
		})
		.await;
	}

	hub.heal_partition();

	// Re-join through the seed plus refutation restores everyone Alive with
	// higher incarnations
	for node in [&n1.node, &n2.node, &n3.node] {
		let node = node.clone();
		wait_until("cluster heals", Duration::from_secs(10), || {
			let node = node.clone();
			async move {
				let members = node.membership().snapshot().await;
				members.len() == 3
					&& members.iter().all(|m| m.state == NodeState::Alive)
					&& node.ring().node_count() == 3
			}
		})
		.await;
	}

	let n3_view = n1.node.membership().get("n3").await.unwrap();
	assert!(
		n3_view.incarnation > 0,
		"revived node must carry a higher incarnation"
	);

	shutdown_node(n3).await;
	shutdown_node(n2).await;
	shutdown_node(n1).await;
}

#[tokio::test]
async fn graceful_leave_marks_node_left() {
	init_tracing();

	let hub = MemoryHub::new();
	let n1 = start_node(&hub, "n1", &["n1"]).await;
	let n2 = start_node(&hub, "n2", &["n1"]).await;

	{
		let node = n1.node.clone();
		wait_until("two members", Duration::from_secs(5), || {
			let node = node.clone();
			async move { node.membership().len() == 2 }
		})
		.await;
	}

	n2.node.stop().await.unwrap();
	let _ = n2.shutdown.send(());

	{
		let node = n1.node.clone();
		wait_until("n2 left", Duration::from_secs(5), || {
			let node = node.clone();
			async move {
				matches!(
					node.membership().get("n2").await,
					Some(info) if info.state == NodeState::Left
				) && !node.ring().contains_node("n2")
			}
		})
		.await;
	}

	shutdown_node(n1).await;
}
