use tracing::{debug, info, instrument};

use crate::{chord_id::ChordId, error::{ChordError, Result}, node_info::NodeRef};

use super::{data_store::DataIdAndValue, ChordNode};


impl ChordNode{

	/// Master write. Refused unless this node owns `data_id`, so the caller
	/// can look the owner up again.
	#[instrument(skip(self, value), fields(node = self.me.node_id))]
	pub(crate) async fn put(&self, data_id: ChordId, value: String) -> Result<()> {
		if !self.owns(data_id).await? {
			debug!("refusing write of {}, not the owner", data_id);
			return Err(ChordError::NotOwner{ id: data_id });
		}
		let held = {
			let mut store = self.lock_store().await?;
			store.store(data_id, value.clone(), &self.me);
			store.count_of(self.me.node_id)
		};
		self.distribute_replica(DataIdAndValue{ data_id, value }, held).await;
		Ok(())
	}

	/// Local lookup. Outside recovery mode only data this node owns is served.
	pub(crate) async fn get(&self, data_id: ChordId, for_recovery: bool) -> Result<String> {
		let permitted = for_recovery || self.owns(data_id).await?;
		let store = self.lock_store().await?;
		match store.get(data_id) {
			Some(value) if permitted => Ok(value.to_string()),
			_ => Err(ChordError::NotFound{ id: data_id }),
		}
	}

	/// Hand a joining node the entries that are its own now, and tell our
	/// replica holders to drop them.
	#[instrument(skip(self), fields(node = self.me.node_id))]
	pub(crate) async fn delegate_tantou_data(&self, node_id: ChordId) -> Result<Vec<DataIdAndValue>> {
		let moved = self.lock_store().await?.delegate_tantou_data(&self.space, node_id, true);
		if moved.is_empty() {
			return Ok(moved);
		}
		info!("delegated {} entries to {}", moved.len(), node_id);

		for holder in self.successor_list().await? {
			if holder.node_id == self.me.node_id || holder.node_id == node_id {
				continue;
			}
			if let Ok(peer) = self.directory.resolve(&holder.address).await {
				// everything outside (node_id, me] is what just moved
				if let Err(err) = peer.delete_replica(self.me.node_id, Some((self.me.node_id, node_id))).await {
					debug!(%err, "{} kept stale replicas", holder);
				}
			}
		}
		Ok(moved)
	}

	pub(crate) async fn get_all_tantou_data(&self) -> Result<Vec<DataIdAndValue>> {
		self.tantou_data().await
	}

	pub(crate) async fn receive_replica(&self, master: NodeRef, entries: Vec<DataIdAndValue>, replace_all: bool) -> Result<usize> {
		let count = entries.len();
		let held = self.lock_store().await?.receive_replica(&master, entries, replace_all);
		debug!(node = self.me.node_id, "received {} replicas from {}, holding {}", count, master, held);
		Ok(held)
	}

	pub(crate) async fn delete_replica(&self, master_id: ChordId, range: Option<(ChordId, ChordId)>) -> Result<usize> {
		Ok(self.lock_store().await?.delete_replica(&self.space, master_id, range))
	}

	/// Push one fresh entry to every successor. A holder whose count for us
	/// differs from `expected` has missed something and gets the full set.
	async fn distribute_replica(&self, entry: DataIdAndValue, expected: usize){
		let successors = match self.successor_list().await {
			Ok(list) => list,
			Err(err) => {
				debug!(%err, "skipping replica push");
				return;
			},
		};
		for succ in successors {
			if succ.node_id == self.me.node_id {
				continue;
			}
			let peer = match self.directory.resolve(&succ.address).await {
				Ok(peer) => peer,
				Err(err) => {
					debug!(%err, "replica holder {} unavailable", succ);
					continue;
				},
			};
			match peer.receive_replica(self.me.clone(), vec![entry.clone()], false).await {
				Ok(held) if held == expected => {},
				Ok(held) => {
					debug!("{} holds {} of our {} entries, resending all", succ, held, expected);
					if let Ok(all) = self.tantou_data().await {
						if let Err(err) = peer.receive_replica(self.me.clone(), all, true).await {
							debug!(%err, "full replica push to {} failed", succ);
						}
					}
				},
				Err(err) => debug!(%err, "replica push to {} failed", succ),
			}
		}
	}

	/// Replace our replicas on every successor with `entries`.
	pub(crate) async fn push_replicas(&self, entries: Vec<DataIdAndValue>, replace_all: bool){
		let successors = match self.successor_list().await {
			Ok(list) => list,
			Err(err) => {
				debug!(%err, "skipping replica push");
				return;
			},
		};
		for succ in successors {
			if succ.node_id == self.me.node_id {
				continue;
			}
			match self.directory.resolve(&succ.address).await {
				Ok(peer) => {
					if let Err(err) = peer.receive_replica(self.me.clone(), entries.clone(), replace_all).await {
						debug!(%err, "replica push to {} failed", succ);
					}
				},
				Err(err) => debug!(%err, "replica holder {} unavailable", succ),
			}
		}
	}
}
