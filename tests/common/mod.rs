#![allow(dead_code)]

use std::{future::Future, sync::Arc};

use chord_kvs::{Chord, ChordConfig, ChordHandle, ChordId, DefaultKeyHasher, Directory, IdSpace, KeyHasher};
use tokio::time::{sleep, Duration, Instant};


/// Keys that parse as numbers land on that ring position, which keeps
/// ownership predictable in tests. Anything else is hashed as usual.
#[derive(Debug, Default)]
pub struct NumericHasher;

impl KeyHasher for NumericHasher{
	fn hash_key(&self, key: &str, space: &IdSpace) -> ChordId {
		match key.parse::<u64>() {
			Ok(id) => space.wrap(id as u128),
			Err(_) => DefaultKeyHasher.hash_key(key, space),
		}
	}
}

pub fn init_tracing(){
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

/// Short timeouts, and a maintenance tick long enough that it never fires:
/// tests drive stabilization by hand.
pub fn test_config(bits: u32, successors: usize) -> ChordConfig {
	ChordConfig{
		id_bits: bits,
		successor_list_len: successors,
		recovery_hops: 3,
		rpc_timeout_ms: 500,
		lock_timeout_ms: 1000,
		stabilize_interval_ms: 3_600_000,
		..ChordConfig::default()
	}
}

/// Same as `test_config` but with the maintenance task ticking every 20ms.
pub fn ticking_config(bits: u32, successors: usize) -> ChordConfig {
	ChordConfig{
		stabilize_interval_ms: 20,
		fingers_per_tick: 2,
		..test_config(bits, successors)
	}
}

pub fn address(id: ChordId) -> String {
	format!("node-{}", id)
}

pub async fn start_node(directory: &Arc<Directory>, id: ChordId, config: &ChordConfig, contact: Option<String>) -> ChordHandle {
	let mut chord = Chord::new(address(id), id, config.clone(), directory.clone());
	chord.set_hasher(Arc::new(NumericHasher));
	chord.start(contact).await.expect("Chords should be able to start")
}

/// Start one node per id. The first forms the ring, the others join through it.
pub async fn make_nodes(ids: &[ChordId], config: &ChordConfig) -> (Arc<Directory>, Vec<ChordHandle>) {
	init_tracing();
	let directory = Arc::new(Directory::from_config(config));
	let mut handles = Vec::new();
	for (i, id) in ids.iter().enumerate() {
		let contact = if i == 0 { None } else { Some(address(ids[0])) };
		handles.push(start_node(&directory, *id, config, contact).await);
	}
	(directory, handles)
}

/// Run `rounds` maintenance rounds on every live node.
pub async fn converge(handles: &[ChordHandle], rounds: usize){
	for _ in 0..rounds {
		for handle in handles {
			if handle.is_alive() {
				let _ = handle.stabilize().await;
			}
		}
	}
}

/// The id of the node that owns `data_id` on a ring made of `ids`.
pub fn expected_owner(ids: &[ChordId], data_id: ChordId) -> ChordId {
	let mut sorted = ids.to_vec();
	sorted.sort_unstable();
	sorted.iter().copied().find(|id| *id >= data_id).unwrap_or(sorted[0])
}

/// Poll `check` until it holds or `limit` runs out.
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
	F: FnMut() -> Fut,
	Fut: Future<Output = bool>,
{
	let deadline = Instant::now() + limit;
	loop {
		if check().await {
			return true;
		}
		if Instant::now() >= deadline {
			return false;
		}
		sleep(Duration::from_millis(25)).await;
	}
}

/// Every live handle points at its live neighbours on a ring made of `ids`.
pub async fn ring_is_closed(handles: &[ChordHandle], ids: &[ChordId]) -> bool {
	let mut sorted = ids.to_vec();
	sorted.sort_unstable();
	for handle in handles.iter().filter(|handle| handle.is_alive()) {
		let Ok(info) = handle.node_info().await else {
			return false;
		};
		let Some(pos) = sorted.iter().position(|id| *id == handle.id()) else {
			return false;
		};
		let next = sorted[(pos + 1) % sorted.len()];
		let prev = sorted[(pos + sorted.len() - 1) % sorted.len()];
		if info.successor().map(|node| node.node_id) != Some(next) {
			return false;
		}
		if info.predecessor.as_ref().map(|node| node.node_id) != Some(prev) {
			return false;
		}
	}
	true
}
