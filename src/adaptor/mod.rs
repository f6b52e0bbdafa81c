use std::time::Duration;

use tokio::{sync::{mpsc::Sender, oneshot}, time::timeout};
use tracing::debug;

use crate::{
	chord::{data_store::DataIdAndValue, message::{Message, PublicMessage, Reply}},
	chord_id::ChordId,
	error::{ChordError, Result},
	node_info::{NodeInfo, NodeRef},
};


/// A resolved connection to a live node.
///
/// Calls go over the node's operation channel and wait on a oneshot for the
/// answer. Both halves are bounded by the call timeout; a closed channel,
/// a dropped reply or a timeout all surface as `PeerUnreachable`.
#[derive(Debug, Clone)]
pub struct Peer{
	node: NodeRef,
	to: Sender<Message>,
	limit: Duration,
}

impl Peer{
	pub(crate) fn new(node: NodeRef, to: Sender<Message>, limit: Duration) -> Self{
		Peer{ node, to, limit }
	}

	pub fn node(&self) -> &NodeRef {
		&self.node
	}

	async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> PublicMessage) -> Result<T> {
		let (reply, response) = oneshot::channel();
		let message = Message::Public(build(reply));
		match timeout(self.limit, self.to.send(message)).await {
			Ok(Ok(())) => {},
			_ => {
				debug!("could not deliver request to {}", self.node);
				return Err(ChordError::unreachable(&self.node.address));
			},
		}
		match timeout(self.limit, response).await {
			Ok(Ok(result)) => result,
			_ => {
				debug!("no answer from {}", self.node);
				Err(ChordError::unreachable(&self.node.address))
			},
		}
	}

	pub async fn find_successor(&self, id: ChordId) -> Result<NodeRef> {
		self.call(|reply| PublicMessage::FindSuccessor{ id, reply }).await
	}

	pub async fn closest_preceding_finger(&self, id: ChordId) -> Result<NodeRef> {
		self.call(|reply| PublicMessage::ClosestPrecedingFinger{ id, reply }).await
	}

	pub async fn pass_node_info(&self) -> Result<NodeInfo> {
		self.call(|reply| PublicMessage::PassNodeInfo{ reply }).await
	}

	pub async fn pass_successor_list(&self) -> Result<Vec<NodeRef>> {
		self.call(|reply| PublicMessage::PassSuccessorList{ reply }).await
	}

	pub async fn pass_predecessor_info(&self) -> Result<Option<NodeRef>> {
		self.call(|reply| PublicMessage::PassPredecessorInfo{ reply }).await
	}

	pub async fn check_predecessor(&self, candidate: NodeRef) -> Result<()> {
		self.call(|reply| PublicMessage::CheckPredecessor{ candidate, reply }).await
	}

	pub async fn register_successor(&self, node: NodeRef) -> Result<()> {
		self.call(|reply| PublicMessage::RegisterSuccessor{ node, reply }).await
	}

	pub async fn set_routing_infos_force(&self, predecessor: NodeRef, successor: NodeRef, finger: NodeRef) -> Result<()> {
		self.call(|reply| PublicMessage::SetRoutingInfosForce{ predecessor, successor, finger, reply }).await
	}

	pub async fn stabilize_successor_inner(&self) -> Result<NodeRef> {
		self.call(|reply| PublicMessage::StabilizeSuccessorInner{ reply }).await
	}

	pub async fn stabilize_successor(&self) -> Result<()> {
		self.call(|reply| PublicMessage::StabilizeSuccessor{ reply }).await
	}

	pub async fn put(&self, id: ChordId, value: String) -> Result<()> {
		self.call(|reply| PublicMessage::Put{ id, value, reply }).await
	}

	pub async fn get(&self, id: ChordId, for_recovery: bool) -> Result<String> {
		self.call(|reply| PublicMessage::Get{ id, for_recovery, reply }).await
	}

	pub async fn delegate_tantou_data(&self, node_id: ChordId) -> Result<Vec<DataIdAndValue>> {
		self.call(|reply| PublicMessage::DelegateTantouData{ node_id, reply }).await
	}

	pub async fn get_all_tantou_data(&self) -> Result<Vec<DataIdAndValue>> {
		self.call(|reply| PublicMessage::GetAllTantouData{ reply }).await
	}

	pub async fn receive_replica(&self, master: NodeRef, entries: Vec<DataIdAndValue>, replace_all: bool) -> Result<usize> {
		self.call(|reply| PublicMessage::ReceiveReplica{ master, entries, replace_all, reply }).await
	}

	pub async fn delete_replica(&self, master_id: ChordId, range: Option<(ChordId, ChordId)>) -> Result<usize> {
		self.call(|reply| PublicMessage::DeleteReplica{ master_id, range, reply }).await
	}
}
