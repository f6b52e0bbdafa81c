use serde::{Serialize, Deserialize};
use tracing::{debug, info, instrument, warn};

use crate::{
	associate::{AssociateRequest, AssociateResponse},
	chord_id::ChordId,
	error::Result,
	node_info::NodeRef,
};

use super::{data_store::TOMBSTONE, ChordNode};


/// Result of a network wide read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GetOutcome{
	Found(String),
	/// The key is absent or was deleted.
	NotFound,
	/// No owner could be resolved at all. Try again later.
	RouteFailed,
}

impl GetOutcome{
	pub fn value(&self) -> Option<&str> {
		match self {
			GetOutcome::Found(value) => Some(value),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Copy)]
enum Direction{
	Predecessor,
	Successor,
}


impl ChordNode{

	pub(crate) async fn global_put(&self, key: &str, value: String) -> bool {
		let data_id = self.hasher.hash_key(key, &self.space);
		self.global_put_id(data_id, value).await
	}

	/// Route `value` to the owner of `data_id`. A failure is remembered and
	/// replayed ahead of the next write and on the maintenance tick.
	#[instrument(skip(self, value), fields(node = self.me.node_id))]
	pub(crate) async fn global_put_id(&self, data_id: ChordId, value: String) -> bool {
		self.replay_pending_puts().await;
		match self.put_once(data_id, value.clone()).await {
			Ok(owner) => {
				debug!("stored {} on {}", data_id, owner);
				if let Ok(mut retries) = self.lock_retries().await {
					retries.clear_put(data_id);
				}
				true
			},
			Err(err) => {
				warn!(%err, "global_put of {} failed, retry recorded", data_id);
				if let Ok(mut retries) = self.lock_retries().await {
					retries.record_put(data_id, value);
				}
				false
			},
		}
	}

	async fn put_once(&self, data_id: ChordId, value: String) -> Result<NodeRef> {
		let owner = self.find_successor(data_id).await?;
		let peer = self.directory.resolve(&owner.address).await?;
		peer.put(data_id, value).await?;
		Ok(owner)
	}

	/// Attempt every recorded write once more. Returns how many went through.
	pub(crate) async fn replay_pending_puts(&self) -> usize {
		let pending = match self.lock_retries().await {
			Ok(mut retries) => retries.take_puts(),
			Err(_) => return 0,
		};
		let mut done = 0;
		for put in pending {
			match self.put_once(put.data_id, put.value.clone()).await {
				Ok(_) => {
					info!(node = self.me.node_id, "retry of global_put for {} succeeded after {} attempts", put.data_id, put.attempts);
					done += 1;
				},
				Err(err) => {
					debug!(node = self.me.node_id, %err, "retry of global_put for {} failed", put.data_id);
					if let Ok(mut retries) = self.lock_retries().await {
						retries.requeue_put(put);
					}
				},
			}
		}
		done
	}

	pub(crate) async fn global_get(&self, key: &str) -> GetOutcome {
		let data_id = self.hasher.hash_key(key, &self.space);
		self.global_get_id(data_id).await
	}

	/// Read `data_id` from its owner, falling back to the owner's
	/// neighbourhood in recovery mode. A value found that way is cached here
	/// when this node is the owner or one of its replica holders.
	#[instrument(skip(self), fields(node = self.me.node_id))]
	pub(crate) async fn global_get_id(&self, data_id: ChordId) -> GetOutcome {
		let owner = match self.find_successor(data_id).await {
			Ok(owner) => owner,
			Err(err) => {
				warn!(%err, "no owner found for {}", data_id);
				self.note_get(data_id, false).await;
				return GetOutcome::RouteFailed;
			},
		};

		let direct = match self.directory.resolve(&owner.address).await {
			Ok(peer) => peer.get(data_id, false).await,
			Err(err) => Err(err),
		};
		let value = match direct {
			Ok(value) => Some(value),
			Err(err) => {
				debug!(%err, "owner {} could not serve {}, asking its neighbours", owner, data_id);
				let recovered = self.recover(data_id, &owner).await;
				if let Some(value) = &recovered {
					if self.holds_copies_of(&owner).await {
						match self.lock_store().await {
							Ok(mut store) => store.store(data_id, value.clone(), &owner),
							Err(err) => debug!(%err, "could not cache recovered value"),
						}
					}
				}
				recovered
			},
		};

		match value {
			Some(value) => {
				self.note_get(data_id, true).await;
				if value == TOMBSTONE {
					GetOutcome::NotFound
				}else{
					GetOutcome::Found(value)
				}
			},
			None => {
				self.note_get(data_id, false).await;
				GetOutcome::NotFound
			},
		}
	}

	/// Up to K predecessors, then up to K successors of `owner`, each asked
	/// in recovery mode.
	async fn recover(&self, data_id: ChordId, owner: &NodeRef) -> Option<String> {
		for direction in [Direction::Predecessor, Direction::Successor] {
			let mut cur = owner.clone();
			for _ in 0..self.config.recovery_hops {
				let next = match self.neighbour(&cur, direction).await {
					Some(next) if next.node_id != owner.node_id => next,
					_ => break,
				};
				if let Ok(peer) = self.directory.resolve(&next.address).await {
					if let Ok(value) = peer.get(data_id, true).await {
						info!("recovered {} from {}", data_id, next);
						return Some(value);
					}
				}
				cur = next;
			}
		}
		None
	}

	/// True when this node is `owner` or one of its replica holders, the only
	/// places a copy stays fresh.
	async fn holds_copies_of(&self, owner: &NodeRef) -> bool {
		if owner.node_id == self.me.node_id {
			return true;
		}
		let Ok(peer) = self.directory.resolve(&owner.address).await else {
			return false;
		};
		match peer.pass_successor_list().await {
			Ok(holders) => holders.iter().any(|node| node.node_id == self.me.node_id),
			Err(_) => false,
		}
	}

	async fn neighbour(&self, node: &NodeRef, direction: Direction) -> Option<NodeRef> {
		let peer = self.directory.resolve(&node.address).await.ok()?;
		match direction {
			Direction::Predecessor => peer.pass_predecessor_info().await.ok().flatten(),
			Direction::Successor => {
				for succ in peer.pass_successor_list().await.ok()? {
					if self.directory.is_live(&succ.address).await {
						return Some(succ);
					}
				}
				None
			},
		}
	}

	async fn note_get(&self, data_id: ChordId, succeeded: bool){
		let Ok(mut retries) = self.lock_retries().await else {
			return;
		};
		if succeeded {
			if let Some(pending) = retries.clear_get(data_id) {
				info!(node = self.me.node_id, "retry of global_get for {} succeeded after {} failures", data_id, pending.attempts);
			}
		}else{
			let attempts = retries.record_get(data_id);
			debug!(node = self.me.node_id, "global_get for {} failed {} times", data_id, attempts);
		}
	}

	pub(crate) async fn global_delete(&self, key: &str) -> bool {
		self.global_put(key, TOMBSTONE.to_string()).await
	}

	pub(crate) async fn global_delete_id(&self, data_id: ChordId) -> bool {
		self.global_put_id(data_id, TOMBSTONE.to_string()).await
	}


	pub(crate) async fn process_associate(&self, request: AssociateRequest) -> AssociateResponse {
		match request {
			AssociateRequest::GetId => AssociateResponse::Id{ id: self.me.node_id },
			AssociateRequest::GetPredecessor => match self.predecessor().await {
				Ok(node) => AssociateResponse::Predecessor{ node },
				Err(err) => AssociateResponse::Error{ msg: err.to_string() },
			},
			AssociateRequest::GetSuccessorList => match self.successor_list().await {
				Ok(nodes) => AssociateResponse::SuccessorList{ nodes },
				Err(err) => AssociateResponse::Error{ msg: err.to_string() },
			},
			AssociateRequest::GetSuccessorOf{ id } => match self.find_successor(id).await {
				Ok(node) => AssociateResponse::SuccessorOf{ id, node },
				Err(err) => AssociateResponse::Error{ msg: err.to_string() },
			},
			AssociateRequest::GlobalPut{ key, value } => AssociateResponse::Stored{ ok: self.global_put(&key, value).await },
			AssociateRequest::GlobalGet{ key } => AssociateResponse::Value{ outcome: self.global_get(&key).await },
			AssociateRequest::GlobalDelete{ key } => AssociateResponse::Deleted{ ok: self.global_delete(&key).await },
			AssociateRequest::Debug => AssociateResponse::Debug{ msg: self.debug_report().await },
		}
	}

	async fn debug_report(&self) -> String {
		let mut msg = String::new();
		match self.node_info().await {
			Ok(info) => {
				msg += &format!("Id: {} Predecessor: {:?} Successors: {:?}\n",
					self.me,
					info.predecessor.map(|node| node.node_id),
					info.successor_list.iter().map(|node| node.node_id).collect::<Vec<_>>());
				for (index, finger) in info.finger_table.iter().enumerate() {
					if let Some(finger) = finger {
						msg += &format!("finger {}: {}\n", index, finger);
					}
				}
			},
			Err(err) => msg += &format!("Id: {} unavailable: {}\n", self.me, err),
		}
		if let Ok(store) = self.lock_store().await {
			msg += &format!("Stored entries: {} ({} mastered)\n", store.len(), store.count_of(self.me.node_id));
		}
		msg
	}
}
