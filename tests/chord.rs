mod common;

use std::{collections::HashSet, sync::Arc};

use chord_kvs::{
	associate::{AssociateRequest, AssociateResponse},
	Chord, ChordError, Directory, GetOutcome, TOMBSTONE,
};
use tokio::time::Duration;

use common::{address, converge, eventually, expected_owner, make_nodes, ring_is_closed, start_node, test_config, ticking_config};


const RING: [u64; 8] = [5, 30, 64, 90, 128, 170, 200, 240];


#[tokio::test]
async fn lone_node_owns_everything() {
	let config = test_config(8, 3);
	let (_directory, v) = make_nodes(&[42], &config).await;

	assert!(v[0].global_put("7", "seven").await);
	assert!(v[0].global_put("200", "two hundred").await);
	assert_eq!(v[0].global_get("7").await, GetOutcome::Found("seven".to_string()));
	assert_eq!(v[0].find_successor(0).await.unwrap().node_id, 42);
	assert_eq!(v[0].find_successor(43).await.unwrap().node_id, 42);

	let info = v[0].node_info().await.unwrap();
	assert!(info.is_lone());
	assert_eq!(info.predecessor.map(|node| node.node_id), Some(42));
}

#[tokio::test]
async fn ring_closes_after_stabilization() {
	let config = test_config(8, 3);
	let (_directory, v) = make_nodes(&RING, &config).await;
	converge(&v, 4).await;

	let mut successors = HashSet::new();
	let mut predecessors = HashSet::new();
	for (i, handle) in v.iter().enumerate() {
		let info = handle.node_info().await.unwrap();
		let next = RING[(i + 1) % RING.len()];
		let prev = RING[(i + RING.len() - 1) % RING.len()];

		let succ_ids: Vec<u64> = info.successor_list.iter().map(|node| node.node_id).collect();
		assert_eq!(succ_ids, vec![next, RING[(i + 2) % RING.len()], RING[(i + 3) % RING.len()]], "successor list of {}", handle.id());
		assert_eq!(info.predecessor.as_ref().map(|node| node.node_id), Some(prev), "predecessor of {}", handle.id());
		assert_eq!(info.finger_table[0].as_ref().map(|node| node.node_id), Some(next));

		assert!(successors.insert(next), "successor {} seen twice", next);
		assert!(predecessors.insert(prev), "predecessor {} seen twice", prev);
	}
}

#[tokio::test]
async fn every_node_agrees_on_the_owner() {
	let config = test_config(8, 3);
	let (_directory, v) = make_nodes(&RING, &config).await;
	converge(&v, 4).await;

	for data_id in (0..256u64).step_by(7).chain([5, 6, 240, 241, 255]) {
		let expected = expected_owner(&RING, data_id);
		for handle in &v {
			let owner = handle.find_successor(data_id).await.unwrap();
			assert_eq!(owner.node_id, expected, "owner of {} as seen from {}", data_id, handle.id());
			assert_eq!(owner.address, address(expected));
		}
	}
}

#[tokio::test]
async fn fingers_point_at_the_successor_of_their_start() {
	let config = test_config(8, 3);
	let (_directory, v) = make_nodes(&RING, &config).await;
	converge(&v, 4).await;

	for handle in &v {
		let info = handle.node_info().await.unwrap();
		for (index, finger) in info.finger_table.iter().enumerate() {
			let start = (handle.id() + (1u64 << index)) % 256;
			let finger = finger.as_ref().expect("every finger is set after convergence");
			assert_eq!(finger.node_id, expected_owner(&RING, start), "finger {} of {}", index, handle.id());
		}
	}
}

#[tokio::test]
async fn values_round_trip_through_any_node() {
	// a wide ring keeps hashed keys from colliding
	let config = test_config(32, 3);
	let (_directory, v) = make_nodes(&RING, &config).await;
	converge(&v, 3).await;

	for (i, key) in ["alpha", "beta", "gamma", "delta", "epsilon", "17", "129", "250"].iter().enumerate() {
		let writer = &v[i % v.len()];
		assert!(writer.global_put(key, format!("value of {}", key)).await, "put of {}", key);
	}
	for (i, key) in ["alpha", "beta", "gamma", "delta", "epsilon", "17", "129", "250"].iter().enumerate() {
		let reader = &v[(i + 3) % v.len()];
		assert_eq!(reader.global_get(key).await, GetOutcome::Found(format!("value of {}", key)));
	}
	assert_eq!(v[0].global_get("99").await, GetOutcome::NotFound);

	// a later write replaces the value
	assert!(v[2].global_put("alpha", "second").await);
	assert_eq!(v[5].global_get("alpha").await, GetOutcome::Found("second".to_string()));
}

#[tokio::test]
async fn master_data_is_replicated_on_the_successor_list() {
	let config = test_config(8, 2);
	let (_directory, v) = make_nodes(&[10, 100, 200], &config).await;
	converge(&v, 3).await;

	assert!(v[0].global_put_id(150, "v").await);

	let on_master = v[2].stored_entries().await.unwrap();
	assert_eq!(on_master.len(), 1);
	assert_eq!(on_master[0].master.node_id, 200);

	for holder in [&v[0], &v[1]] {
		let entries = holder.stored_entries().await.unwrap();
		let replica = entries.iter().find(|entry| entry.data_id == 150).expect("replica present");
		assert_eq!(replica.value, "v");
		assert_eq!(replica.master.node_id, 200);
	}

	// replicas are never served outside of recovery
	assert!(matches!(v[0].get(150).await, Err(ChordError::NotFound{ .. })));
	assert_eq!(v[2].get(150).await.unwrap(), "v");
}

#[tokio::test]
async fn joining_node_takes_over_its_range() {
	let config = test_config(8, 2);
	let (directory, mut v) = make_nodes(&[10], &config).await;
	for data_id in [50u64, 150, 250] {
		assert!(v[0].global_put_id(data_id, format!("d{}", data_id)).await);
	}

	v.push(start_node(&directory, 100, &config, Some(address(10))).await);
	assert_eq!(v[1].get(50).await.unwrap(), "d50");
	assert!(v[0].get(50).await.is_err());
	assert_eq!(v[0].get(150).await.unwrap(), "d150");

	converge(&v, 2).await;

	for handle in &v {
		let entries = handle.stored_entries().await.unwrap();
		let masters: Vec<(u64, u64)> = entries.iter().map(|entry| (entry.data_id, entry.master.node_id)).collect();
		assert_eq!(masters, vec![(50, 100), (150, 10), (250, 10)], "store of {}", handle.id());
	}
	assert_eq!(v[0].global_get_id(50).await, GetOutcome::Found("d50".to_string()));
}

#[tokio::test]
async fn stabilization_is_idempotent() {
	let config = test_config(8, 3);
	let (_directory, v) = make_nodes(&RING, &config).await;
	converge(&v, 4).await;

	let mut before = Vec::new();
	for handle in &v {
		before.push(handle.node_info().await.unwrap());
	}
	converge(&v, 2).await;
	for (handle, old) in v.iter().zip(before) {
		assert_eq!(handle.node_info().await.unwrap(), old);
	}
}

#[tokio::test]
async fn value_survives_its_master() {
	let config = test_config(8, 2);
	let (directory, v) = make_nodes(&[10, 100, 200], &config).await;
	converge(&v, 3).await;
	assert!(v[0].global_put_id(150, "v").await);

	v[2].kill().await;
	assert!(!directory.is_live(&address(200)).await);

	// the owner lookup lands on 10, which cannot confirm ownership yet, so
	// the value comes from a replica
	assert_eq!(v[0].global_get_id(150).await, GetOutcome::Found("v".to_string()));
	assert_eq!(v[1].global_get_id(150).await, GetOutcome::Found("v".to_string()));

	converge(&v, 2).await;
	let info = v[0].node_info().await.unwrap();
	assert_eq!(info.predecessor.map(|node| node.node_id), Some(100));
	assert_eq!(info.successor_list.iter().map(|node| node.node_id).collect::<Vec<_>>(), vec![100]);

	// 10 masters the orphaned entry now
	assert_eq!(v[0].get(150).await.unwrap(), "v");
	let entries = v[1].stored_entries().await.unwrap();
	let replica = entries.iter().find(|entry| entry.data_id == 150).expect("re-replicated");
	assert_eq!(replica.master.node_id, 10);
}

#[tokio::test]
async fn deleted_keys_read_as_missing() {
	let config = test_config(8, 2);
	let (_directory, v) = make_nodes(&[10, 100, 200], &config).await;
	converge(&v, 3).await;

	assert!(v[0].global_put("42", "answer").await);
	assert_eq!(v[1].global_get("42").await, GetOutcome::Found("answer".to_string()));

	assert!(v[2].global_delete("42").await);
	assert_eq!(v[1].global_get("42").await, GetOutcome::NotFound);
	// the tombstone itself is what the owner keeps
	assert_eq!(v[1].get(42).await.unwrap(), TOMBSTONE);
}

#[tokio::test]
async fn failed_writes_are_kept_for_retry() {
	let config = test_config(8, 2);
	let (_directory, v) = make_nodes(&[10, 100, 200], &config).await;
	converge(&v, 3).await;

	v[0].kill().await;
	v[2].kill().await;

	assert!(!v[1].global_put_id(150, "first").await);
	assert!(!v[1].global_put_id(150, "second").await);
	assert_eq!(v[1].global_get_id(150).await, GetOutcome::RouteFailed);

	let state = v[1].retry_state().await.unwrap();
	let puts: Vec<_> = state.pending_puts().collect();
	assert_eq!(puts.len(), 1);
	assert_eq!(puts[0].data_id, 150);
	assert_eq!(puts[0].value, "second");
	assert!(puts[0].attempts >= 2);
	assert_eq!(state.pending_gets().count(), 1);
}

#[tokio::test]
async fn lost_successors_stop_the_node() {
	let config = test_config(8, 2);
	let (_directory, v) = make_nodes(&[10, 100], &config).await;
	converge(&v, 2).await;

	v[1].kill().await;
	let err = v[0].stabilize().await.unwrap_err();
	assert!(matches!(err, ChordError::SuccessorsExhausted{ id: 10 }));
	assert!(err.is_fatal());
	assert!(!v[0].is_alive());
}

#[tokio::test]
async fn join_is_retried_until_the_contact_appears() {
	let config = test_config(8, 2);
	let (directory, v) = make_nodes(&[60], &config).await;

	let late = start_node(&directory, 180, &config, Some(address(7))).await;
	let pending = late.retry_state().await.unwrap();
	assert_eq!(pending.pending_join().map(|join| join.contact.clone()), Some(address(7)));

	// the contact shows up under the address the join was aimed at
	let contact = start_node(&directory, 7, &config, Some(address(60))).await;
	let v = vec![v.into_iter().next().unwrap(), contact, late];
	converge(&v, 3).await;

	assert!(v[2].retry_state().await.unwrap().pending_join().is_none());
	let info = v[2].node_info().await.unwrap();
	assert_eq!(info.successor().map(|node| node.node_id), Some(7));
	assert_eq!(info.predecessor.map(|node| node.node_id), Some(60));
	assert_eq!(v[0].find_successor(100).await.unwrap().node_id, 180);
}

#[tokio::test]
async fn associate_channel_answers() {
	let config = test_config(8, 2);
	let (_directory, v) = make_nodes(&[10, 100, 200], &config).await;
	converge(&v, 3).await;

	let assoc = v[1].get_associate();
	assert_eq!(assoc.send_op(AssociateRequest::GetId).await, Some(AssociateResponse::Id{ id: 100 }));

	match assoc.send_op(AssociateRequest::GetPredecessor).await {
		Some(AssociateResponse::Predecessor{ node: Some(node) }) => assert_eq!(node.node_id, 10),
		other => panic!("Invalid response: {:?}", other),
	}
	match assoc.send_op(AssociateRequest::GetSuccessorList).await {
		Some(AssociateResponse::SuccessorList{ nodes }) => {
			assert_eq!(nodes.iter().map(|node| node.node_id).collect::<Vec<_>>(), vec![200, 10]);
		},
		other => panic!("Invalid response: {:?}", other),
	}
	match assoc.send_op(AssociateRequest::GetSuccessorOf{ id: 150 }).await {
		Some(AssociateResponse::SuccessorOf{ id, node }) => {
			assert_eq!(id, 150);
			assert_eq!(node.node_id, 200);
		},
		other => panic!("Invalid response: {:?}", other),
	}

	let other = assoc.duplicate();
	assert_eq!(
		other.send_op(AssociateRequest::GlobalPut{ key: "77".to_string(), value: "x".to_string() }).await,
		Some(AssociateResponse::Stored{ ok: true }),
	);
	assert_eq!(
		assoc.send_op(AssociateRequest::GlobalGet{ key: "77".to_string() }).await,
		Some(AssociateResponse::Value{ outcome: GetOutcome::Found("x".to_string()) }),
	);
	assert_eq!(
		assoc.send_op(AssociateRequest::GlobalDelete{ key: "77".to_string() }).await,
		Some(AssociateResponse::Deleted{ ok: true }),
	);
	match assoc.send_op(AssociateRequest::Debug).await {
		Some(AssociateResponse::Debug{ msg }) => assert!(msg.contains("Id: 100@node-100")),
		other => panic!("Invalid response: {:?}", other),
	}

	v[1].kill().await;
	assert_eq!(assoc.send_op(AssociateRequest::GetId).await, None);
}

#[tokio::test]
async fn splice_join_moves_master_and_replicas() {
	let config = test_config(8, 2);
	let (directory, mut v) = make_nodes(&[10, 100, 200], &config).await;
	converge(&v, 3).await;
	assert!(v[0].global_put_id(60, "sixty").await);

	let holders = |entries: &[chord_kvs::StoredEntry]| entries.iter().find(|entry| entry.data_id == 60).map(|entry| entry.master.node_id);
	assert_eq!(holders(&v[1].stored_entries().await.unwrap()), Some(100));
	assert_eq!(holders(&v[2].stored_entries().await.unwrap()), Some(100));
	assert_eq!(holders(&v[0].stored_entries().await.unwrap()), Some(100));

	// 10 is not alone, so 70 is spliced in between 10 and 100
	v.push(start_node(&directory, 70, &config, Some(address(10))).await);
	converge(&v, 3).await;

	let mut copies = Vec::new();
	for handle in &v {
		if let Some(master) = holders(&handle.stored_entries().await.unwrap()) {
			copies.push((handle.id(), master));
		}
	}
	copies.sort_unstable();
	assert_eq!(copies, vec![(70, 70), (100, 70), (200, 70)]);

	assert_eq!(v[3].get(60).await.unwrap(), "sixty");
	assert!(v[1].get(60).await.is_err());
	assert_eq!(v[0].find_successor(60).await.unwrap().node_id, 70);
	assert_eq!(v[0].global_get_id(60).await, GetOutcome::Found("sixty".to_string()));
}

#[tokio::test]
async fn value_survives_a_non_adjacent_failure() {
	let config = test_config(8, 3);
	let (_directory, v) = make_nodes(&RING, &config).await;
	converge(&v, 4).await;
	assert!(v[0].global_put_id(150, "v").await);

	// 30 is neither the master (170) nor next to it
	v[1].kill().await;
	for handle in v.iter().filter(|handle| handle.is_alive()) {
		assert_eq!(handle.global_get_id(150).await, GetOutcome::Found("v".to_string()), "read from {}", handle.id());
	}

	converge(&v, 3).await;
	let mut copies = 0;
	for handle in v.iter().filter(|handle| handle.is_alive()) {
		if handle.stored_entries().await.unwrap().iter().any(|entry| entry.data_id == 150) {
			copies += 1;
		}
		assert_eq!(handle.global_get_id(150).await, GetOutcome::Found("v".to_string()));
	}
	assert_eq!(copies, 4);
}

#[tokio::test]
async fn recovered_values_are_cached_only_by_replica_holders() {
	let config = test_config(8, 2);
	let (_directory, v) = make_nodes(&[10, 60, 100, 200, 230], &config).await;
	converge(&v, 4).await;
	assert!(v[0].global_put_id(180, "v").await);

	v[3].kill().await;

	// 230 owns 180 now but does not know it yet; 10 serves its replica
	assert_eq!(v[2].global_get_id(180).await, GetOutcome::Found("v".to_string()));
	assert!(v[2].stored_entries().await.unwrap().iter().all(|entry| entry.data_id != 180));

	// 60 follows 230 within two hops, so it keeps a copy
	assert_eq!(v[1].global_get_id(180).await, GetOutcome::Found("v".to_string()));
	let entries = v[1].stored_entries().await.unwrap();
	let cached = entries.iter().find(|entry| entry.data_id == 180).expect("cached on a holder");
	assert_eq!(cached.master.node_id, 230);
}

#[tokio::test]
async fn random_ids_start_on_the_ring() {
	let config = test_config(8, 2);
	let directory = Arc::new(Directory::from_config(&config));
	let chord = Chord::with_random_id("node-random", config, directory.clone());
	let id = chord.id();
	assert!(id < 256);

	let handle = chord.start(None).await.unwrap();
	assert_eq!(handle.id(), id);
	assert_eq!(directory.live_addresses().await, vec!["node-random".to_string()]);
	assert_eq!(handle.find_successor(id.wrapping_add(1) % 256).await.unwrap().node_id, id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ring_heals_under_live_maintenance() {
	let config = ticking_config(8, 3);
	let (_directory, v) = make_nodes(&RING, &config).await;
	let limit = Duration::from_secs(10);

	let handles = &v[..];
	assert!(eventually(limit, move || ring_is_closed(handles, &RING)).await, "ring never closed");

	for i in 0..50u64 {
		let writer = &v[i as usize % v.len()];
		let value = format!("value {}", i);
		assert!(eventually(limit, move || writer.global_put_id(i * 5, value.clone())).await, "put of {}", i * 5);
	}

	v[2].kill().await;
	v[5].kill().await;
	let survivors: Vec<u64> = RING.iter().copied().filter(|id| *id != 64 && *id != 170).collect();
	let ids = &survivors[..];
	assert!(eventually(limit, move || ring_is_closed(handles, ids)).await, "ring did not heal");

	let alive: Vec<_> = v.iter().filter(|handle| handle.is_alive()).collect();
	for i in 0..50u64 {
		let reader = alive[i as usize % alive.len()];
		let expected = GetOutcome::Found(format!("value {}", i));
		let found = eventually(limit, || {
			let expected = expected.clone();
			async move { reader.global_get_id(i * 5).await == expected }
		}).await;
		assert!(found, "lost {}", i * 5);
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ticks_replay_pending_writes_after_a_late_join() {
	let config = ticking_config(8, 2);
	let directory = Arc::new(Directory::from_config(&config));

	let late = start_node(&directory, 180, &config, Some(address(7))).await;
	assert!(late.retry_state().await.unwrap().pending_join().is_some());
	assert!(!late.global_put_id(100, "late").await);

	// nothing else writes 100, so only the replayed put can store it
	let contact = start_node(&directory, 7, &config, None).await;
	let limit = Duration::from_secs(10);
	let node = &late;
	let stored = eventually(limit, move || async move {
		matches!(node.get(100).await, Ok(value) if value == "late")
	}).await;
	assert!(stored, "pending write never replayed");

	let state = late.retry_state().await.unwrap();
	assert!(state.pending_join().is_none());
	assert_eq!(state.pending_puts().count(), 0);
	assert_eq!(contact.global_get_id(100).await, GetOutcome::Found("late".to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fatal_error_stops_maintenance() {
	let config = ticking_config(8, 2);
	let (_directory, v) = make_nodes(&[10, 100], &config).await;
	let limit = Duration::from_secs(10);
	let handles = &v[..];
	assert!(eventually(limit, move || ring_is_closed(handles, &[10, 100])).await);
	assert!(v[0].is_maintaining());

	v[1].kill().await;
	let node = &v[0];
	assert!(eventually(limit, move || async move { !node.is_alive() }).await, "node kept running without successors");
	assert!(eventually(limit, move || async move { !node.is_maintaining() }).await, "maintenance outlived the node");
}
