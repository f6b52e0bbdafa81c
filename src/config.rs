use std::{path::Path, time::Duration};

use serde::{Serialize, Deserialize};
use tokio::fs;

use crate::{chord_id::IdSpace, error::{ChordError, Result}};


/// Tunables shared by every node of a ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChordConfig{
	/// Identifier bit width `m`; the ring has `2^m` points.
	pub id_bits: u32,
	/// Successor list length `R`, which is also the replication factor.
	pub successor_list_len: usize,
	/// How many predecessors, then successors, a failed read is retried on.
	pub recovery_hops: usize,
	pub rpc_timeout_ms: u64,
	pub lock_timeout_ms: u64,
	pub stabilize_interval_ms: u64,
	pub fingers_per_tick: u32,
	/// Hard cap on lookup iterations. Defaults to `2 * m + R`.
	pub lookup_hop_limit: Option<usize>,
	pub task_retry_limit: u32,
	pub channel_capacity: usize,
}

impl Default for ChordConfig {
	fn default() -> Self {
		ChordConfig {
			id_bits: 32,
			successor_list_len: 3,
			recovery_hops: 5,
			rpc_timeout_ms: 1000,
			lock_timeout_ms: 3000,
			stabilize_interval_ms: 1000,
			fingers_per_tick: 1,
			lookup_hop_limit: None,
			task_retry_limit: 3,
			channel_capacity: 50,
		}
	}
}


impl ChordConfig {
	pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
		let raw = fs::read_to_string(&path).await?;
		let config: ChordConfig = serde_json::from_str(&raw)?;
		config.validate()?;
		Ok(config)
	}

	pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
		let s = serde_json::to_string_pretty(self)?;
		fs::write(path, s).await?;
		Ok(())
	}

	pub fn validate(&self) -> Result<()> {
		if self.id_bits == 0 || self.id_bits > IdSpace::MAX_BITS {
			return Err(ChordError::Config(format!("id_bits must be within 1..={}, got {}", IdSpace::MAX_BITS, self.id_bits)));
		}
		if self.successor_list_len == 0 {
			return Err(ChordError::Config("successor_list_len must be at least 1".to_string()));
		}
		if self.recovery_hops == 0 {
			return Err(ChordError::Config("recovery_hops must be at least 1".to_string()));
		}
		if self.rpc_timeout_ms == 0 || self.lock_timeout_ms == 0 || self.stabilize_interval_ms == 0 {
			return Err(ChordError::Config("timeouts and intervals must be non-zero".to_string()));
		}
		if self.channel_capacity == 0 {
			return Err(ChordError::Config("channel_capacity must be non-zero".to_string()));
		}
		Ok(())
	}

	pub fn id_space(&self) -> IdSpace {
		IdSpace::new(self.id_bits)
	}

	pub fn rpc_timeout(&self) -> Duration {
		Duration::from_millis(self.rpc_timeout_ms)
	}

	pub fn lock_timeout(&self) -> Duration {
		Duration::from_millis(self.lock_timeout_ms)
	}

	pub fn stabilize_interval(&self) -> Duration {
		Duration::from_millis(self.stabilize_interval_ms)
	}

	pub fn lookup_hop_limit(&self) -> usize {
		self.lookup_hop_limit
			.unwrap_or(2 * self.id_bits as usize + self.successor_list_len)
	}
}
