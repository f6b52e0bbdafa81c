use std::fmt;

use serde::{Serialize, Deserialize};

use crate::chord_id::ChordId;


/// Identity of a node: its ring position and the address the Directory
/// resolves it by. This is all a node ever keeps about its peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef{
	pub node_id: ChordId,
	pub address: String,
}

impl NodeRef{
	pub fn new(node_id: ChordId, address: impl Into<String>) -> Self{
		NodeRef{ node_id, address: address.into() }
	}
}

impl fmt::Display for NodeRef{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}@{}", self.node_id, self.address)
	}
}


/// Snapshot of a node's routing pointers as seen at the time it was taken.
///
/// Pointers are plain `NodeRef`s, so the snapshot is shallow: following a
/// chain further means resolving the referenced address again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo{
	pub node: NodeRef,
	/// Index 0 is the immediate successor.
	pub successor_list: Vec<NodeRef>,
	pub predecessor: Option<NodeRef>,
	pub finger_table: Vec<Option<NodeRef>>,
}

impl NodeInfo{
	pub fn node_id(&self) -> ChordId {
		self.node.node_id
	}

	pub fn address(&self) -> &str {
		&self.node.address
	}

	pub fn successor(&self) -> Option<&NodeRef> {
		self.successor_list.first()
	}

	/// True when the node is its own successor.
	pub fn is_lone(&self) -> bool {
		match self.successor() {
			Some(succ) => succ.node_id == self.node.node_id,
			None => true,
		}
	}
}


/// Successor list plus finger table. They share a lock because
/// `finger_table[0]` always mirrors `successor_list[0]`.
#[derive(Debug, Clone)]
pub(crate) struct RoutingTable{
	pub successor_list: Vec<NodeRef>,
	pub finger_table: Vec<Option<NodeRef>>,
}

impl RoutingTable{
	pub fn new(fingers: usize) -> Self{
		RoutingTable{
			successor_list: Vec::new(),
			finger_table: vec![None; fingers],
		}
	}

	/// Replace the whole successor list and keep finger 0 in step.
	pub fn set_successors(&mut self, list: Vec<NodeRef>){
		if let Some(first) = self.finger_table.first_mut() {
			*first = list.first().cloned();
		}
		self.successor_list = list;
	}

	/// Put `node` at the front of the list, dropping any older copy of it.
	/// The list may grow past its target length until the next stabilization
	/// trims it and tells the dropped nodes.
	pub fn push_front(&mut self, node: NodeRef){
		let mut list = Vec::with_capacity(self.successor_list.len() + 1);
		list.push(node.clone());
		list.extend(self.successor_list.iter().filter(|n| n.node_id != node.node_id).cloned());
		self.set_successors(list);
	}

	pub fn set_finger(&mut self, index: usize, node: Option<NodeRef>){
		if index == 0 {
			// finger 0 follows the successor list
			return;
		}
		if let Some(slot) = self.finger_table.get_mut(index) {
			*slot = node;
		}
	}
}
