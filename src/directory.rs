use std::{collections::HashMap, time::Duration};

use tokio::sync::{mpsc::Sender, RwLock};
use tracing::info;

use crate::{adaptor::Peer, chord::message::Message, config::ChordConfig, error::{ChordError, Result}, node_info::NodeRef};


/// What the Directory knows about an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus{
	Live,
	Down,
	Unknown,
}

#[derive(Debug, Clone)]
enum Entry{
	Live{node: NodeRef, to: Sender<Message>},
	Down{node: NodeRef},
}

/// Address keyed registry of every node in the process. Nodes never hold
/// references to each other; they hold addresses and resolve them here.
#[derive(Debug)]
pub struct Directory{
	entries: RwLock<HashMap<String, Entry>>,
	rpc_timeout: Duration,
}

impl Directory{
	pub fn new(rpc_timeout: Duration) -> Self{
		Directory{
			entries: RwLock::new(HashMap::new()),
			rpc_timeout,
		}
	}

	pub fn from_config(config: &ChordConfig) -> Self{
		Directory::new(config.rpc_timeout())
	}

	/// Register a node as live, replacing whatever was known at its address.
	pub(crate) async fn register(&self, node: NodeRef, to: Sender<Message>){
		info!("registering {}", node);
		self.entries.write().await.insert(node.address.clone(), Entry::Live{ node, to });
	}

	pub async fn mark_down(&self, address: &str){
		let mut entries = self.entries.write().await;
		if let Some(Entry::Live{ node, .. }) = entries.get(address) {
			info!("marking {} down", node);
			let node = node.clone();
			entries.insert(address.to_string(), Entry::Down{ node });
		}
	}

	pub async fn resolve(&self, address: &str) -> Result<Peer> {
		match self.entries.read().await.get(address) {
			Some(Entry::Live{ node, to }) if !to.is_closed() => Ok(Peer::new(node.clone(), to.clone(), self.rpc_timeout)),
			Some(_) => Err(ChordError::unreachable(address)),
			None => Err(ChordError::UnknownPeer{ address: address.to_string() }),
		}
	}

	pub async fn status(&self, address: &str) -> PeerStatus {
		match self.entries.read().await.get(address) {
			Some(Entry::Live{ to, .. }) if !to.is_closed() => PeerStatus::Live,
			Some(_) => PeerStatus::Down,
			None => PeerStatus::Unknown,
		}
	}

	pub async fn is_live(&self, address: &str) -> bool {
		self.status(address).await == PeerStatus::Live
	}

	/// Every live node, ordered by ring position.
	pub async fn live_nodes(&self) -> Vec<NodeRef> {
		let mut nodes: Vec<NodeRef> = self.entries.read().await.values()
			.filter_map(|entry| match entry {
				Entry::Live{ node, to } if !to.is_closed() => Some(node.clone()),
				_ => None,
			})
			.collect();
		nodes.sort_by_key(|node| node.node_id);
		nodes
	}

	pub async fn live_addresses(&self) -> Vec<String> {
		self.live_nodes().await.into_iter().map(|node| node.address).collect()
	}

	/// Every node that was registered and has since gone down.
	pub async fn down_nodes(&self) -> Vec<NodeRef> {
		let mut nodes: Vec<NodeRef> = self.entries.read().await.values()
			.filter_map(|entry| match entry {
				Entry::Down{ node } => Some(node.clone()),
				Entry::Live{ node, to } if to.is_closed() => Some(node.clone()),
				_ => None,
			})
			.collect();
		nodes.sort_by_key(|node| node.node_id);
		nodes
	}
}
