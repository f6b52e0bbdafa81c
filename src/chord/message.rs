use tokio::sync::oneshot;

use crate::{associate::{AssociateRequest, AssociateResponse}, chord_id::ChordId, error::Result, node_info::{NodeInfo, NodeRef}};

use super::data_store::DataIdAndValue;


pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

#[derive(Debug)]
pub enum Message{
	Private(PrivateMessage),
	Public(PublicMessage),
	Associate{request: AssociateRequest, reply: oneshot::Sender<AssociateResponse>},
}

#[derive(Debug)]
pub enum PrivateMessage{
	// Timed Operation Triggers
	Stabilize,
	FixFingers,
	RunTasks,
}

impl From<PrivateMessage> for Message {
	fn from(msg: PrivateMessage) -> Self {
		Message::Private(msg)
	}
}


/// Requests one node makes of another. Every variant carries the channel
/// its answer goes back on.
#[derive(Debug)]
pub enum PublicMessage{
	// Routing
	FindSuccessor{id: ChordId, reply: Reply<NodeRef>},
	ClosestPrecedingFinger{id: ChordId, reply: Reply<NodeRef>},

	// State Operations
	PassNodeInfo{reply: Reply<NodeInfo>},
	PassSuccessorList{reply: Reply<Vec<NodeRef>>},
	PassPredecessorInfo{reply: Reply<Option<NodeRef>>},

	// Stabilization
	CheckPredecessor{candidate: NodeRef, reply: Reply<()>},
	RegisterSuccessor{node: NodeRef, reply: Reply<()>},
	SetRoutingInfosForce{predecessor: NodeRef, successor: NodeRef, finger: NodeRef, reply: Reply<()>},
	StabilizeSuccessorInner{reply: Reply<NodeRef>},
	StabilizeSuccessor{reply: Reply<()>},

	// Data
	Put{id: ChordId, value: String, reply: Reply<()>},
	Get{id: ChordId, for_recovery: bool, reply: Reply<String>},
	DelegateTantouData{node_id: ChordId, reply: Reply<Vec<DataIdAndValue>>},
	GetAllTantouData{reply: Reply<Vec<DataIdAndValue>>},
	ReceiveReplica{master: NodeRef, entries: Vec<DataIdAndValue>, replace_all: bool, reply: Reply<usize>},
	DeleteReplica{master_id: ChordId, range: Option<(ChordId, ChordId)>, reply: Reply<usize>},
}

impl From<PublicMessage> for Message {
	fn from(msg: PublicMessage) -> Self {
		Message::Public(msg)
	}
}
