use tracing::{debug, instrument, warn};

use crate::{chord_id::ChordId, error::{ChordError, Result}, node_info::{NodeInfo, NodeRef}};

use super::ChordNode;


impl ChordNode{

	/// The node currently responsible for `id`.
	///
	/// When the predecessor's immediate successor is down, the next live
	/// entry of its successor list takes over the range.
	#[instrument(skip(self), fields(node = self.me.node_id))]
	pub(crate) async fn find_successor(&self, id: ChordId) -> Result<NodeRef> {
		let predecessor = self.find_predecessor(id).await?;
		for successor in &predecessor.successor_list {
			if self.directory.is_live(&successor.address).await {
				return Ok(successor.clone());
			}
			debug!("successor {} of {} is down", successor, predecessor.node);
		}
		warn!("no live successor of {} for {}", predecessor.node, id);
		Err(ChordError::RouteNotFound{ id })
	}

	/// Narrow from this node towards the node whose successor owns `id`.
	///
	/// Stops early on two signs of racing finger tables: the hop made no
	/// progress, or the new candidate lies behind the old one while the old
	/// one has not passed `id` yet. Both return the current candidate.
	pub(crate) async fn find_predecessor(&self, id: ChordId) -> Result<NodeInfo> {
		let me = self.me.node_id;
		let mut n_dash = self.node_info().await?;

		for _ in 0..self.config.lookup_hop_limit() {
			let succ_id = match n_dash.successor() {
				Some(succ) => succ.node_id,
				None => return Ok(n_dash),
			};
			if self.space.is_between(n_dash.node_id(), succ_id, id) {
				return Ok(n_dash);
			}

			let found = if n_dash.node_id() == me {
				self.closest_preceding_finger(id).await?
			}else{
				let peer = self.directory.resolve(n_dash.address()).await
					.map_err(|err| self.route_error(id, err))?;
				peer.closest_preceding_finger(id).await
					.map_err(|err| self.route_error(id, err))?
			};

			if found.node_id == n_dash.node_id() {
				return Ok(n_dash);
			}
			let distance_old = self.space.distance_cw(me, n_dash.node_id());
			let distance_found = self.space.distance_cw(me, found.node_id);
			let distance_data = self.space.distance_cw(me, id);
			if distance_found < distance_old && distance_old < distance_data {
				debug!("candidate {} moved backwards from {}", found, n_dash.node);
				return Ok(n_dash);
			}

			n_dash = if found.node_id == me {
				self.node_info().await?
			}else{
				let peer = self.directory.resolve(&found.address).await
					.map_err(|err| self.route_error(id, err))?;
				peer.pass_node_info().await
					.map_err(|err| self.route_error(id, err))?
			};
		}

		warn!(node = me, id, "lookup hop limit reached");
		Ok(n_dash)
	}

	/// The live finger closest to `id` without passing it, or this node.
	pub(crate) async fn closest_preceding_finger(&self, id: ChordId) -> Result<NodeRef> {
		let fingers = self.lock_routing().await?.finger_table.clone();
		for entry in fingers.iter().rev().flatten() {
			if !self.space.between_cw(self.me.node_id, id, entry.node_id) {
				continue;
			}
			if self.directory.is_live(&entry.address).await {
				return Ok(entry.clone());
			}
			debug!("skipping dead finger {}", entry);
		}
		Ok(self.me.clone())
	}

	fn route_error(&self, id: ChordId, err: ChordError) -> ChordError {
		match err {
			ChordError::LockTimeout{ .. } => err,
			err => {
				debug!(node = self.me.node_id, %err, "lookup hop failed");
				ChordError::RouteNotFound{ id }
			},
		}
	}
}
