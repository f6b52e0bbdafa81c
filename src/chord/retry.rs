use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::chord_id::ChordId;


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPut{
	pub data_id: ChordId,
	pub value: String,
	pub attempts: u32,
	pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingGet{
	pub data_id: ChordId,
	pub attempts: u32,
	pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingJoin{
	pub contact: String,
	pub attempts: u32,
	pub recorded_at: DateTime<Utc>,
}


/// Operations of one node that failed for infrastructure reasons and are
/// waiting to be attempted again. Keyed by data id, so callers working on
/// different keys never displace each other.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryState{
	puts: BTreeMap<ChordId, PendingPut>,
	gets: BTreeMap<ChordId, PendingGet>,
	join: Option<PendingJoin>,
}

impl RetryState{
	pub fn is_empty(&self) -> bool {
		self.puts.is_empty() && self.gets.is_empty() && self.join.is_none()
	}

	/// Remember a failed write. A newer value for the same id replaces the older one.
	pub fn record_put(&mut self, data_id: ChordId, value: String){
		let now = Utc::now();
		let entry = self.puts.entry(data_id).or_insert_with(|| PendingPut{
			data_id,
			value: String::new(),
			attempts: 0,
			recorded_at: now,
		});
		entry.value = value;
		entry.attempts += 1;
		entry.recorded_at = now;
	}

	/// Put back a replayed write that failed again, unless a newer write for
	/// the same id was recorded meanwhile.
	pub fn requeue_put(&mut self, mut pending: PendingPut){
		if self.puts.contains_key(&pending.data_id) {
			return;
		}
		pending.attempts += 1;
		pending.recorded_at = Utc::now();
		self.puts.insert(pending.data_id, pending);
	}

	pub fn take_puts(&mut self) -> Vec<PendingPut> {
		std::mem::take(&mut self.puts).into_values().collect()
	}

	pub fn clear_put(&mut self, data_id: ChordId) -> Option<PendingPut> {
		self.puts.remove(&data_id)
	}

	pub fn pending_puts(&self) -> impl Iterator<Item = &PendingPut> {
		self.puts.values()
	}

	/// Count a failed read and return how many times it has failed so far.
	pub fn record_get(&mut self, data_id: ChordId) -> u32 {
		let now = Utc::now();
		let entry = self.gets.entry(data_id).or_insert_with(|| PendingGet{ data_id, attempts: 0, recorded_at: now });
		entry.attempts += 1;
		entry.recorded_at = now;
		entry.attempts
	}

	pub fn clear_get(&mut self, data_id: ChordId) -> Option<PendingGet> {
		self.gets.remove(&data_id)
	}

	pub fn pending_gets(&self) -> impl Iterator<Item = &PendingGet> {
		self.gets.values()
	}

	pub fn record_join(&mut self, contact: &str){
		let attempts = self.join.as_ref().map(|join| join.attempts).unwrap_or(0) + 1;
		self.join = Some(PendingJoin{
			contact: contact.to_string(),
			attempts,
			recorded_at: Utc::now(),
		});
	}

	pub fn pending_join(&self) -> Option<&PendingJoin> {
		self.join.as_ref()
	}

	pub fn clear_join(&mut self) -> Option<PendingJoin> {
		self.join.take()
	}
}
