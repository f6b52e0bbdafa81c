use super::{message::PublicMessage, ChordNode};


impl ChordNode{

	/// Answer a request from another node. A reply nobody waits for any
	/// more is dropped silently.
	pub(crate) async fn process_public(&self, operation: PublicMessage){
		match operation{
			// Routing
			PublicMessage::FindSuccessor{ id, reply } => {
				let _ = reply.send(self.find_successor(id).await);
			},
			PublicMessage::ClosestPrecedingFinger{ id, reply } => {
				let _ = reply.send(self.closest_preceding_finger(id).await);
			},

			// State Operations
			PublicMessage::PassNodeInfo{ reply } => {
				let _ = reply.send(self.node_info().await);
			},
			PublicMessage::PassSuccessorList{ reply } => {
				let _ = reply.send(self.successor_list().await);
			},
			PublicMessage::PassPredecessorInfo{ reply } => {
				let _ = reply.send(self.predecessor().await);
			},

			// Stabilization
			PublicMessage::CheckPredecessor{ candidate, reply } => {
				let _ = reply.send(self.check_predecessor(candidate).await);
			},
			PublicMessage::RegisterSuccessor{ node, reply } => {
				let _ = reply.send(self.register_successor(node).await);
			},
			PublicMessage::SetRoutingInfosForce{ predecessor, successor, finger, reply } => {
				let _ = reply.send(self.set_routing_infos_force(predecessor, successor, finger).await);
			},
			PublicMessage::StabilizeSuccessorInner{ reply } => {
				match self.stabilize_successor_inner().await {
					Ok(node) => {
						let _ = reply.send(Ok(node));
					},
					Err(err) => {
						let _ = reply.send(self.guard_fatal(Err(err)).await.map(|_| self.me.clone()));
					},
				}
			},
			PublicMessage::StabilizeSuccessor{ reply } => {
				let result = self.stabilize_successor().await;
				let _ = reply.send(self.guard_fatal(result).await);
			},

			// Data
			PublicMessage::Put{ id, value, reply } => {
				let _ = reply.send(self.put(id, value).await);
			},
			PublicMessage::Get{ id, for_recovery, reply } => {
				let _ = reply.send(self.get(id, for_recovery).await);
			},
			PublicMessage::DelegateTantouData{ node_id, reply } => {
				let _ = reply.send(self.delegate_tantou_data(node_id).await);
			},
			PublicMessage::GetAllTantouData{ reply } => {
				let _ = reply.send(self.get_all_tantou_data().await);
			},
			PublicMessage::ReceiveReplica{ master, entries, replace_all, reply } => {
				let _ = reply.send(self.receive_replica(master, entries, replace_all).await);
			},
			PublicMessage::DeleteReplica{ master_id, range, reply } => {
				let _ = reply.send(self.delete_replica(master_id, range).await);
			},
		}
	}
}
