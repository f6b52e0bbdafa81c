use std::sync::atomic::Ordering;

use tracing::{debug, error, info, instrument, warn};

use crate::{error::{ChordError, Result}, node_info::NodeRef};

use super::{task_queue::Task, ChordNode};


impl ChordNode{

	/// A node started without a contact is a ring of one.
	pub(crate) async fn init_lone_ring(&self) -> Result<()> {
		*self.lock_predecessor().await? = Some(self.me.clone());
		self.lock_routing().await?.set_successors(vec![self.me.clone()]);
		Ok(())
	}

	/// Join through `contact`, recording the contact for a later attempt on failure.
	pub(crate) async fn join_or_schedule(&self, contact: &str){
		if let Err(err) = self.join(contact).await {
			warn!(node = self.me.node_id, %err, "join through {} failed, will retry", contact);
			match self.lock_retries().await {
				Ok(mut retries) => retries.record_join(contact),
				Err(err) => error!(node = self.me.node_id, %err, "could not record join retry"),
			}
		}
	}

	#[instrument(skip(self), fields(node = self.me.node_id))]
	pub(crate) async fn join(&self, contact_address: &str) -> Result<()> {
		let contact = self.directory.resolve(contact_address).await?;
		let successor = contact.find_successor(self.me.node_id).await?;
		if successor.node_id == self.me.node_id {
			if successor.address != self.me.address {
				return Err(ChordError::Config(format!("node id {} is already taken by {}", self.me.node_id, successor.address)));
			}
			// an earlier attempt already spliced us in
			self.enqueue(Task::JoinPartial).await;
			return Ok(());
		}

		self.lock_routing().await?.set_successors(vec![successor.clone()]);

		let contact_info = contact.pass_node_info().await?;
		if contact_info.is_lone() {
			// two node ring, wire both ends directly
			*self.lock_predecessor().await? = Some(contact_info.node.clone());
			contact.set_routing_infos_force(self.me.clone(), self.me.clone(), self.me.clone()).await?;
		}else{
			let successor_peer = self.directory.resolve(&successor.address).await?;
			let predecessor = successor_peer.pass_predecessor_info().await?;
			*self.lock_predecessor().await? = predecessor.clone();
			if let Some(predecessor) = predecessor {
				match self.directory.resolve(&predecessor.address).await {
					Ok(peer) => {
						if let Err(err) = peer.register_successor(self.me.clone()).await {
							debug!(%err, "predecessor {} did not take us in", predecessor);
						}
					},
					Err(err) => debug!(%err, "predecessor {} is not reachable", predecessor),
				}
			}
			successor_peer.check_predecessor(self.me.clone()).await?;
		}

		// take over the part of the successor's range that is ours now
		match self.pull_delegated(&successor).await {
			Ok(count) => info!("took over {} entries from {}", count, successor),
			Err(err) => debug!(%err, "pulling data from {} failed, the join task will retry", successor),
		}
		self.enqueue(Task::JoinPartial).await;
		info!("joined the ring in front of {}", successor);
		Ok(())
	}

	async fn pull_delegated(&self, successor: &NodeRef) -> Result<usize> {
		if successor.node_id == self.me.node_id {
			return Ok(0);
		}
		let peer = self.directory.resolve(&successor.address).await?;
		let delegated = peer.delegate_tantou_data(self.me.node_id).await?;
		let count = delegated.len();
		let mut store = self.lock_store().await?;
		for entry in delegated {
			store.store(entry.data_id, entry.value, &self.me);
		}
		Ok(count)
	}

	/// Deferred half of a join. Every step is idempotent, so a failed run is
	/// simply queued again.
	pub(crate) async fn partial_join_op(&self) -> Result<()> {
		let successor = self.successor_list().await?.first().cloned()
			.ok_or(ChordError::RouteNotFound{ id: self.me.node_id })?;
		self.pull_delegated(&successor).await?;

		let tantou = self.tantou_data().await?;
		self.push_replicas(tantou, true).await;

		let predecessor = match self.predecessor().await? {
			Some(pred) if pred.node_id != self.me.node_id => pred,
			_ => return Ok(()),
		};
		let peer = self.directory.resolve(&predecessor.address).await?;
		let entries = peer.get_all_tantou_data().await?;
		let held = self.lock_store().await?.receive_replica(&predecessor, entries, true);
		debug!("holding {} replicas of {}", held, predecessor);

		// the predecessor now has one replica holder too many
		peer.stabilize_successor().await
	}

	/// Set the routing pointers of a node directly. Only used while two
	/// nodes form a ring.
	pub(crate) async fn set_routing_infos_force(&self, predecessor: NodeRef, successor: NodeRef, finger: NodeRef) -> Result<()> {
		*self.lock_predecessor().await? = Some(predecessor);
		let mut routing = self.lock_routing().await?;
		routing.set_successors(vec![successor]);
		if let Some(first) = routing.finger_table.first_mut() {
			*first = Some(finger);
		}
		Ok(())
	}

	/// A joining node announces itself to its new predecessor.
	pub(crate) async fn register_successor(&self, node: NodeRef) -> Result<()> {
		let accepted = {
			let mut routing = self.lock_routing().await?;
			let closer = match routing.successor_list.first() {
				Some(first) => first.node_id == self.me.node_id
					|| self.space.between_cw(self.me.node_id, first.node_id, node.node_id),
				None => true,
			};
			if closer {
				routing.push_front(node.clone());
			}
			closer
		};
		if accepted {
			info!(node = self.me.node_id, "{} registered as successor", node);
		}
		Ok(())
	}

	/// Accept `candidate` as predecessor if the current one is dead or
	/// `candidate` sits closer counter-clockwise.
	#[instrument(skip(self), fields(node = self.me.node_id, candidate = candidate.node_id))]
	pub(crate) async fn check_predecessor(&self, candidate: NodeRef) -> Result<()> {
		if candidate.node_id == self.me.node_id {
			return Ok(());
		}
		let current = self.predecessor().await?;
		let (accept, took_over) = match &current {
			None => (true, false),
			Some(pred) if pred.node_id == candidate.node_id => (false, false),
			Some(pred) => {
				if pred.node_id != self.me.node_id && !self.directory.is_live(&pred.address).await {
					(true, true)
				}else{
					let closer = self.space.distance_ccw(self.me.node_id, candidate.node_id)
						< self.space.distance_ccw(self.me.node_id, pred.node_id);
					(closer, false)
				}
			},
		};
		if !accept {
			return Ok(());
		}

		{
			let mut predecessor = self.lock_predecessor().await?;
			// someone else moved it while we were looking
			if *predecessor != current {
				return Ok(());
			}
			*predecessor = Some(candidate.clone());
		}
		info!("predecessor is now {}", candidate);
		if took_over {
			self.enqueue(Task::PromoteReplicas).await;
		}
		Ok(())
	}

	/// Claim entries whose master sat strictly between the predecessor and
	/// this node and is no longer live, then replicate them.
	pub(crate) async fn promote_replicas(&self) -> Result<()> {
		let predecessor = match self.predecessor().await? {
			Some(pred) => pred,
			None => return Ok(()),
		};
		let masters = self.lock_store().await?.masters();
		let mut orphaned = Vec::new();
		for master in masters {
			if master.node_id == self.me.node_id {
				continue;
			}
			if self.space.between_cw(predecessor.node_id, self.me.node_id, master.node_id)
				&& !self.directory.is_live(&master.address).await {
				orphaned.push(master);
			}
		}
		if orphaned.is_empty() {
			return Ok(());
		}

		{
			let mut store = self.lock_store().await?;
			for master in &orphaned {
				store.notify_master_change(master.node_id, &self.me);
			}
		}
		info!(node = self.me.node_id, "took over data of {} dead masters", orphaned.len());
		let tantou = self.tantou_data().await?;
		self.push_replicas(tantou, true).await;
		Ok(())
	}

	/// Repair successor[0] and return it.
	///
	/// Dead entries at the head of the list are dropped. If the successor
	/// knows of a node between us, that node is spliced in front and handed
	/// our replicas. Otherwise the successor is offered us as predecessor.
	/// A list with no live entry at all is fatal.
	#[instrument(skip(self), fields(node = self.me.node_id))]
	pub(crate) async fn stabilize_successor_inner(&self) -> Result<NodeRef> {
		let me = self.me.node_id;
		let successors = self.successor_list().await?;
		if successors.is_empty() {
			return Err(ChordError::RouteNotFound{ id: me });
		}

		let mut alive = None;
		for (index, succ) in successors.iter().enumerate() {
			if succ.node_id == me {
				alive = Some((index, None));
				break;
			}
			match self.directory.resolve(&succ.address).await {
				Ok(peer) => {
					alive = Some((index, Some(peer)));
					break;
				},
				Err(err) => debug!(%err, "successor {} is down", succ),
			}
		}
		let Some((index, peer)) = alive else {
			error!("every entry of the successor list is down");
			return Err(ChordError::SuccessorsExhausted{ id: me });
		};

		if index > 0 {
			let mut routing = self.lock_routing().await?;
			if routing.successor_list.starts_with(&successors[..index]) {
				let rest = routing.successor_list.split_off(index);
				routing.set_successors(rest);
			}
		}
		let successor = successors[index].clone();

		let Some(peer) = peer else {
			// we are our own successor; adopt the predecessor once one shows up
			let predecessor = self.predecessor().await?;
			if let Some(pred) = predecessor.filter(|pred| pred.node_id != me) {
				if let Ok(pred_peer) = self.directory.resolve(&pred.address).await {
					{
						let mut routing = self.lock_routing().await?;
						if routing.successor_list.first() == Some(&successor) {
							routing.push_front(pred.clone());
						}
					}
					if let Err(err) = pred_peer.check_predecessor(self.me.clone()).await {
						debug!(%err, "{} did not answer", pred);
					}
					return Ok(pred);
				}
			}
			return Ok(successor);
		};

		let info = peer.pass_node_info().await?;
		match info.predecessor {
			Some(pred) if pred.node_id == me => {},
			Some(pred) if pred.node_id != successor.node_id && self.space.between_cw(me, successor.node_id, pred.node_id) => {
				match self.directory.resolve(&pred.address).await {
					Ok(pred_peer) => {
						{
							let mut routing = self.lock_routing().await?;
							if routing.successor_list.first() == Some(&successor) {
								routing.push_front(pred.clone());
							}
						}
						info!("{} spliced in before {}", pred, successor);
						if let Err(err) = pred_peer.check_predecessor(self.me.clone()).await {
							debug!(%err, "{} did not acknowledge us", pred);
						}
						let tantou = self.tantou_data().await?;
						if let Err(err) = pred_peer.receive_replica(self.me.clone(), tantou, true).await {
							debug!(%err, "handing replicas to {} failed", pred);
						}
						return Ok(pred);
					},
					// the node in between is gone, the successor will accept us instead
					Err(_) => peer.check_predecessor(self.me.clone()).await?,
				}
			},
			_ => peer.check_predecessor(self.me.clone()).await?,
		}
		Ok(successor)
	}

	/// Walk the successor chain, rebuilding the successor list up to `R`
	/// entries. Nodes that fall off the list drop our replicas, nodes that
	/// join it receive them.
	#[instrument(skip(self), fields(node = self.me.node_id))]
	pub(crate) async fn stabilize_successor(&self) -> Result<()> {
		let me = self.me.node_id;
		let limit = self.config.successor_list_len;
		if self.successor_list().await?.is_empty() {
			// not part of a ring yet
			return Ok(());
		}

		let first = self.stabilize_successor_inner().await?;
		if first.node_id == me {
			return Ok(());
		}
		let before = self.successor_list().await?;

		let mut updated = vec![first.clone()];
		let mut cur = first;
		let mut cut_short = false;
		while updated.len() < limit {
			let next = match self.directory.resolve(&cur.address).await {
				Ok(peer) => peer.stabilize_successor_inner().await,
				Err(err) => Err(err),
			};
			let next = match next {
				Ok(next) => next,
				Err(err) => {
					debug!(%err, "could not walk past {}", cur);
					cut_short = true;
					break;
				},
			};
			if next.node_id == me || updated.iter().any(|node| node.node_id == next.node_id) {
				break;
			}
			updated.push(next.clone());
			cur = next;
		}

		if cut_short {
			// keep what we knew beyond the break rather than shedding live holders
			for node in &before {
				if updated.len() >= limit {
					break;
				}
				if node.node_id != me && !updated.contains(node) && self.directory.is_live(&node.address).await {
					updated.push(node.clone());
				}
			}
		}

		let (added, trimmed) = {
			let mut routing = self.lock_routing().await?;
			if routing.successor_list != before {
				debug!("successor list changed during stabilization, retrying next round");
				return Ok(());
			}
			let added: Vec<NodeRef> = updated.iter().filter(|node| !before.contains(node)).cloned().collect();
			let trimmed: Vec<NodeRef> = before.iter()
				.filter(|node| node.node_id != me && !updated.contains(node))
				.cloned()
				.collect();
			routing.set_successors(updated);
			(added, trimmed)
		};

		if !added.is_empty() {
			info!("new replica holders: {:?}", added.iter().map(|n| n.node_id).collect::<Vec<_>>());
			let tantou = self.tantou_data().await?;
			for node in &added {
				match self.directory.resolve(&node.address).await {
					Ok(peer) => {
						if let Err(err) = peer.receive_replica(self.me.clone(), tantou.clone(), true).await {
							debug!(%err, "replica push to {} failed", node);
						}
					},
					Err(err) => debug!(%err, "replica holder {} is gone", node),
				}
			}
		}
		for node in &trimmed {
			if let Ok(peer) = self.directory.resolve(&node.address).await {
				match peer.delete_replica(me, None).await {
					Ok(count) => debug!("{} dropped {} of our replicas", node, count),
					Err(err) => debug!(%err, "{} could not drop our replicas", node),
				}
			}
		}
		Ok(())
	}

	/// Recompute finger `index`. A failed lookup clears the slot so the next
	/// cycle tries again instead of routing through stale data.
	pub(crate) async fn stabilize_finger_table(&self, index: u32) -> Result<()> {
		if index == 0 || index >= self.space.bits() {
			return Ok(());
		}
		let start = self.space.calculate_finger(self.me.node_id, index);
		let found = self.find_successor(start).await;
		let mut routing = self.lock_routing().await?;
		match found {
			Ok(node) => {
				routing.set_finger(index as usize, Some(node));
				Ok(())
			},
			Err(err) => {
				routing.set_finger(index as usize, None);
				Err(err)
			},
		}
	}

	/// Refresh the next `fingers_per_tick` fingers in turn.
	pub(crate) async fn fix_fingers(&self) -> Result<()> {
		for _ in 0..self.config.fingers_per_tick.max(1) {
			let prev = self.finger_index.load(Ordering::SeqCst);
			let next_index = self.space.next_index(prev);
			self.finger_index.store(next_index, Ordering::SeqCst);
			if let Err(err) = self.stabilize_finger_table(next_index).await {
				debug!(node = self.me.node_id, %err, next_index, "finger refresh failed");
			}
		}
		Ok(())
	}

	/// Timed stabilization: finish a pending join first, then repair the
	/// successor list.
	pub(crate) async fn stabilize(&self) -> Result<()> {
		self.retry_join().await?;
		self.stabilize_successor().await
	}

	async fn retry_join(&self) -> Result<()> {
		let pending = self.lock_retries().await?.pending_join().cloned();
		let Some(pending) = pending else {
			return Ok(());
		};
		match self.join(&pending.contact).await {
			Ok(()) => {
				self.lock_retries().await?.clear_join();
				info!(node = self.me.node_id, "join succeeded after {} failed attempts", pending.attempts);
			},
			Err(err) => {
				warn!(node = self.me.node_id, %err, "join through {} failed again", pending.contact);
				self.lock_retries().await?.record_join(&pending.contact);
			},
		}
		Ok(())
	}
}
