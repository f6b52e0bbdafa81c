use std::{collections::hash_map::DefaultHasher, fmt::Debug, hash::{Hash, Hasher}};
use serde::{Serialize, Deserialize};

/// A point around the chord ring. Node ids and data ids share this space.
pub type ChordId = u64;

/// The modular identifier space `[0, 2^bits)`.
///
/// All distances are computed in `u128` so that a full 64 bit ring does not
/// overflow. A distance from a point to itself is a full lap, which makes
/// `between_cw(a, a, x)` true for every `x` other than `a`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdSpace{
	bits: u32,
}

impl IdSpace{
	pub const MAX_BITS: u32 = 64;

	/// Creates a ring of `2^bits` points. `bits` is clamped into `1..=64`.
	pub fn new(bits: u32) -> Self{
		IdSpace{ bits: bits.clamp(1, Self::MAX_BITS) }
	}

	pub fn bits(&self) -> u32 {
		self.bits
	}

	/// Number of points on the ring.
	pub fn size(&self) -> u128 {
		1u128 << self.bits
	}

	/// The largest id before the ring wraps back to zero.
	pub fn wrap_point(&self) -> ChordId {
		(self.size() - 1) as ChordId
	}

	pub fn contains(&self, id: ChordId) -> bool {
		(id as u128) < self.size()
	}

	/// Reduce an arbitrary value onto the ring.
	pub fn wrap(&self, value: u128) -> ChordId {
		(value % self.size()) as ChordId
	}

	/// Clockwise steps from `from` to `to`.
	pub fn distance_cw(&self, from: ChordId, to: ChordId) -> u128 {
		let size = self.size();
		let from = from as u128 % size;
		let to = to as u128 % size;
		match (to + size - from) % size {
			0 => size,
			steps => steps,
		}
	}

	/// Counter-clockwise steps from `from` to `to`.
	pub fn distance_ccw(&self, from: ChordId, to: ChordId) -> u128 {
		self.distance_cw(to, from)
	}

	/// Walking clockwise from `from`, `x` is reached strictly before `to`.
	pub fn between_cw(&self, from: ChordId, to: ChordId, x: ChordId) -> bool {
		self.distance_cw(from, x) < self.distance_cw(from, to)
	}

	/// Tests if `x` is in the range (lower, upper]. Equal bounds cover the whole ring.
	pub fn is_between(&self, lower: ChordId, upper: ChordId, x: ChordId) -> bool {
		x == upper || self.between_cw(lower, upper, x)
	}

	/// Calculate the start of finger `index`, `id + 2^index mod 2^bits`.
	pub fn calculate_finger(&self, id: ChordId, index: u32) -> ChordId {
		self.wrap(id as u128 + (1u128 << index.min(self.bits - 1)))
	}

	/// Calculate the next finger index, given the previous index.
	/// This wraps back to one after the last finger. Finger zero mirrors the
	/// successor list and is not refreshed through lookups.
	pub fn next_index(&self, prev_index: u32) -> u32 {
		if self.bits == 1 {
			return 0;
		}
		let next_index = prev_index + 1;
		if next_index >= self.bits {
			1
		}else{
			next_index
		}
	}
}

impl Default for IdSpace{
	fn default() -> Self {
		IdSpace::new(32)
	}
}


/// Maps opaque client keys onto the ring.
pub trait KeyHasher: Send + Sync + Debug{
	fn hash_key(&self, key: &str, space: &IdSpace) -> ChordId;
}

/// SipHash from the standard library, reduced onto the ring.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultKeyHasher;

impl KeyHasher for DefaultKeyHasher{
	fn hash_key(&self, key: &str, space: &IdSpace) -> ChordId {
		let mut hasher = DefaultHasher::new();
		key.hash(&mut hasher);
		space.wrap(hasher.finish() as u128)
	}
}
