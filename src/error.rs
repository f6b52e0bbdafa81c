use thiserror::Error;

use crate::chord_id::ChordId;

#[derive(Error, Debug)]
pub enum ChordError {
	#[error("Peer unreachable: {address}")]
	PeerUnreachable { address: String },

	#[error("Unknown peer: {address}")]
	UnknownPeer { address: String },

	#[error("No route to the owner of {id}")]
	RouteNotFound { id: ChordId },

	#[error("Data not found: {id}")]
	NotFound { id: ChordId },

	#[error("Not the owner of {id}")]
	NotOwner { id: ChordId },

	#[error("Timed out acquiring the {lock} lock")]
	LockTimeout { lock: &'static str },

	#[error("Every successor of node {id} is down")]
	SuccessorsExhausted { id: ChordId },

	#[error("Configuration error: {0}")]
	Config(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Serialization error: {0}")]
	Json(#[from] serde_json::Error),
}

impl ChordError {
	/// Infrastructure failures that a later attempt may clear.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			ChordError::PeerUnreachable { .. }
				| ChordError::UnknownPeer { .. }
				| ChordError::RouteNotFound { .. }
				| ChordError::NotOwner { .. }
				| ChordError::LockTimeout { .. }
		)
	}

	/// The node can no longer answer correctly and has to stop.
	pub fn is_fatal(&self) -> bool {
		matches!(self, ChordError::SuccessorsExhausted { .. })
	}

	pub(crate) fn unreachable(address: &str) -> Self {
		ChordError::PeerUnreachable { address: address.to_string() }
	}
}

pub type Result<T> = std::result::Result<T, ChordError>;
