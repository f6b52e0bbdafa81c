use std::collections::{BTreeSet, HashMap};

use serde::{Serialize, Deserialize};

use crate::{chord_id::{ChordId, IdSpace}, node_info::NodeRef};


/// Value written by `global_delete` in place of the deleted data.
pub const TOMBSTONE: &str = "THIS_KEY_IS_DELETED";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataIdAndValue{
	pub data_id: ChordId,
	pub value: String,
}

impl DataIdAndValue{
	pub fn new(data_id: ChordId, value: impl Into<String>) -> Self{
		DataIdAndValue{ data_id, value: value.into() }
	}
}

/// A stored entry together with the node currently recorded as its master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry{
	pub data_id: ChordId,
	pub value: String,
	pub master: NodeRef,
}

/// Slot in the master side table. Every entry received from the same master
/// shares one slot, so a failover repoints them all at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MasterRef(u64);

#[derive(Debug, Clone)]
struct StoredValueEntry{
	value: String,
	master: MasterRef,
}


/// Per node storage for mastered data and replicas.
#[derive(Debug)]
pub struct DataStore{
	owner: ChordId,
	stored_data: HashMap<ChordId, StoredValueEntry>,
	// the shared master cells
	masters: HashMap<MasterRef, NodeRef>,
	// master node id -> cells currently pointing at it
	master_index: HashMap<ChordId, Vec<MasterRef>>,
	members: HashMap<MasterRef, BTreeSet<ChordId>>,
	next_ref: u64,
}

impl DataStore{
	pub fn new(owner: ChordId) -> Self{
		DataStore{
			owner,
			stored_data: HashMap::new(),
			masters: HashMap::new(),
			master_index: HashMap::new(),
			members: HashMap::new(),
			next_ref: 0,
		}
	}

	pub fn len(&self) -> usize {
		self.stored_data.len()
	}

	pub fn is_empty(&self) -> bool {
		self.stored_data.is_empty()
	}

	pub fn get(&self, data_id: ChordId) -> Option<&str> {
		self.stored_data.get(&data_id).map(|entry| entry.value.as_str())
	}

	pub fn master_of(&self, data_id: ChordId) -> Option<&NodeRef> {
		let entry = self.stored_data.get(&data_id)?;
		self.masters.get(&entry.master)
	}

	/// Store or overwrite `data_id`, recording `master` as its master.
	pub fn store(&mut self, data_id: ChordId, value: String, master: &NodeRef){
		let cell = self.cell_for(master);
		if let Some(old) = self.stored_data.get(&data_id) {
			let old_cell = old.master;
			if old_cell != cell {
				self.detach(old_cell, data_id);
			}
		}
		self.stored_data.insert(data_id, StoredValueEntry{ value, master: cell });
		self.members.entry(cell).or_default().insert(data_id);
	}

	pub fn remove(&mut self, data_id: ChordId) -> Option<String> {
		let entry = self.stored_data.remove(&data_id)?;
		self.detach(entry.master, data_id);
		Some(entry.value)
	}

	/// Entries whose master is `master_id`, ordered by id.
	pub fn entries_of(&self, master_id: ChordId) -> Vec<DataIdAndValue> {
		let mut ids: Vec<ChordId> = self.ids_of(master_id);
		ids.sort_unstable();
		ids.into_iter()
			.filter_map(|data_id| {
				self.stored_data.get(&data_id).map(|entry| DataIdAndValue{ data_id, value: entry.value.clone() })
			})
			.collect()
	}

	pub fn count_of(&self, master_id: ChordId) -> usize {
		self.master_index.get(&master_id)
			.map(|cells| cells.iter().filter_map(|cell| self.members.get(cell)).map(|ids| ids.len()).sum())
			.unwrap_or(0)
	}

	/// Every distinct master this store holds entries for.
	pub fn masters(&self) -> Vec<NodeRef> {
		let mut masters: Vec<NodeRef> = self.master_index.iter()
			.filter_map(|(_, cells)| cells.first())
			.filter_map(|cell| self.masters.get(cell))
			.cloned()
			.collect();
		masters.sort_by_key(|node| node.node_id);
		masters
	}

	/// Locally mastered entries that no longer fall in `(new_node_id, owner]`.
	/// With `destructive` they are removed as well.
	pub fn delegate_tantou_data(&mut self, space: &IdSpace, new_node_id: ChordId, destructive: bool) -> Vec<DataIdAndValue> {
		let owner = self.owner;
		let moving: Vec<DataIdAndValue> = self.entries_of(owner).into_iter()
			.filter(|entry| !space.is_between(new_node_id, owner, entry.data_id))
			.collect();
		if destructive {
			for entry in &moving {
				self.remove(entry.data_id);
			}
		}
		moving
	}

	/// Take in replicas from `master`. With `replace_all` anything previously
	/// held for that master is dropped first. Entries this node masters
	/// itself are never overwritten by a replica. Returns how many entries
	/// are now held for `master`.
	pub fn receive_replica(&mut self, master: &NodeRef, entries: Vec<DataIdAndValue>, replace_all: bool) -> usize {
		if master.node_id == self.owner {
			return self.count_of(master.node_id);
		}
		if replace_all {
			for data_id in self.ids_of(master.node_id) {
				self.remove(data_id);
			}
		}
		for entry in entries {
			if self.is_own(entry.data_id) {
				continue;
			}
			self.store(entry.data_id, entry.value, master);
		}
		self.count_of(master.node_id)
	}

	/// Drop replicas held for `master_id`, limited to ids in `(from, to]` when a
	/// range is given. Returns the number of removed entries.
	pub fn delete_replica(&mut self, space: &IdSpace, master_id: ChordId, range: Option<(ChordId, ChordId)>) -> usize {
		if master_id == self.owner {
			return 0;
		}
		let doomed: Vec<ChordId> = self.ids_of(master_id).into_iter()
			.filter(|data_id| match range {
				Some((from, to)) => space.is_between(from, to, *data_id),
				None => true,
			})
			.collect();
		for data_id in &doomed {
			self.remove(*data_id);
		}
		doomed.len()
	}

	/// Repoint every entry mastered by `old_id` to `new_master`. This touches
	/// the shared cells only, never the entries. Returns false when nothing
	/// was held for `old_id`.
	pub fn notify_master_change(&mut self, old_id: ChordId, new_master: &NodeRef) -> bool {
		if old_id == new_master.node_id {
			return false;
		}
		let Some(cells) = self.master_index.remove(&old_id) else {
			return false;
		};
		for cell in &cells {
			self.masters.insert(*cell, new_master.clone());
		}
		self.master_index.entry(new_master.node_id).or_default().extend(cells);
		true
	}

	pub fn snapshot(&self) -> Vec<StoredEntry> {
		let mut entries: Vec<StoredEntry> = self.stored_data.iter()
			.filter_map(|(data_id, entry)| {
				self.masters.get(&entry.master).map(|master| StoredEntry{
					data_id: *data_id,
					value: entry.value.clone(),
					master: master.clone(),
				})
			})
			.collect();
		entries.sort_by_key(|entry| entry.data_id);
		entries
	}


	fn is_own(&self, data_id: ChordId) -> bool {
		self.master_of(data_id).map(|master| master.node_id == self.owner).unwrap_or(false)
	}

	fn ids_of(&self, master_id: ChordId) -> Vec<ChordId> {
		self.master_index.get(&master_id)
			.map(|cells| {
				cells.iter()
					.filter_map(|cell| self.members.get(cell))
					.flat_map(|ids| ids.iter().copied())
					.collect()
			})
			.unwrap_or_default()
	}

	fn cell_for(&mut self, master: &NodeRef) -> MasterRef {
		if let Some(cell) = self.master_index.get(&master.node_id).and_then(|cells| cells.first()) {
			return *cell;
		}
		let cell = MasterRef(self.next_ref);
		self.next_ref += 1;
		self.masters.insert(cell, master.clone());
		self.master_index.entry(master.node_id).or_default().push(cell);
		cell
	}

	// Forget `data_id` in `cell`, releasing the cell once it is empty.
	fn detach(&mut self, cell: MasterRef, data_id: ChordId){
		let empty = match self.members.get_mut(&cell) {
			Some(ids) => {
				ids.remove(&data_id);
				ids.is_empty()
			},
			None => false,
		};
		if !empty {
			return;
		}
		self.members.remove(&cell);
		if let Some(master) = self.masters.remove(&cell) {
			if let Some(cells) = self.master_index.get_mut(&master.node_id) {
				cells.retain(|c| *c != cell);
				if cells.is_empty() {
					self.master_index.remove(&master.node_id);
				}
			}
		}
	}
}
