use tokio::{sync::{mpsc::Sender, oneshot}, time::{timeout, Duration}};
use tracing::{debug, instrument};

use crate::{chord::{message::Message, GetOutcome}, chord_id::ChordId, node_info::NodeRef};


/// A client connection to one node. Requests are answered in order of
/// completion, each on its own reply channel.
#[derive(Debug)]
pub struct AssociateChannel{
	to: Sender<Message>,
}


impl AssociateChannel {

	pub(crate) fn new(to: Sender<Message>) -> Self{
		AssociateChannel {
			to,
		}
	}

	pub fn duplicate(&self) -> Self {
		Self {
			to: self.to.clone(),
		}
	}

	/// Send `msg` to the node and wait up to ten seconds for the answer.
	/// `None` means the node is gone or did not answer in time.
	#[instrument(skip(self))]
	pub async fn send_op(&self, msg: AssociateRequest) -> Option<AssociateResponse>{
		let (reply, rx) = oneshot::channel();
		if self.to.send(Message::Associate{ request: msg, reply }).await.is_err() {
			debug!("node channel closed");
			return None;
		}
		let limit = Duration::from_secs(10);
		match timeout(limit, rx).await {
			Ok(Ok(response)) => Some(response),
			_ => None,
		}
	}
}


#[derive(Debug, Clone)]
pub enum AssociateRequest{
	GetId,
	GetPredecessor,
	GetSuccessorList,

	GetSuccessorOf{id: ChordId},

	GlobalPut{key: String, value: String},
	GlobalGet{key: String},
	GlobalDelete{key: String},

	Debug,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociateResponse{
	Id{id: ChordId},
	Predecessor{node: Option<NodeRef>},
	SuccessorList{nodes: Vec<NodeRef>},

	SuccessorOf{id: ChordId, node: NodeRef},

	Stored{ok: bool},
	Value{outcome: GetOutcome},
	Deleted{ok: bool},

	Error{msg: String},
	Debug{msg: String},
}
