//! A Chord distributed hash table run as a set of in-process nodes.
//!
//! Every node is an actor on the tokio runtime. Nodes find each other by
//! address through a shared [`Directory`] and talk over message channels,
//! so a crashed node is simply one whose channel no longer answers.

pub mod chord;
pub use chord::{Chord, ChordHandle, GetOutcome};
pub use chord::data_store::{DataIdAndValue, StoredEntry, TOMBSTONE};
pub use chord::retry::RetryState;

pub mod adaptor;
pub use adaptor::Peer;

pub mod associate;
pub use associate::{AssociateChannel, AssociateRequest, AssociateResponse};

pub mod chord_id;
pub use chord_id::{ChordId, DefaultKeyHasher, IdSpace, KeyHasher};

pub mod config;
pub use config::ChordConfig;

pub mod directory;
pub use directory::{Directory, PeerStatus};

pub mod error;
pub use error::{ChordError, Result};

pub mod node_info;
pub use node_info::{NodeInfo, NodeRef};
