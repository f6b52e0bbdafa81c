use crate::{
	associate::AssociateChannel,
	chord_id::{ChordId, DefaultKeyHasher, IdSpace, KeyHasher},
	config::ChordConfig,
	directory::Directory,
	error::{ChordError, Result},
	node_info::{NodeInfo, NodeRef, RoutingTable},
};

use std::sync::{atomic::{AtomicBool, AtomicU32, Ordering}, Arc};

use rand::Rng;
use tokio::sync::{mpsc::{channel, Sender, Receiver}, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, error, info, instrument, warn};


pub(crate) mod message;
pub mod data_store;
pub mod retry;
pub(crate) mod task_queue;

mod router;
mod stabilizer;
mod data_ops;
mod client_ops;
mod private_ops;
mod public_ops;

use message::{Message, PrivateMessage};
use data_store::{DataIdAndValue, DataStore, StoredEntry};
use retry::RetryState;
use task_queue::{Task, TaskQueue};

pub use client_ops::GetOutcome;


/// The Chord itself. This struct acts like a builder in that it is created
/// and modified before being consumed by the start method which then
/// returns another type, ChordHandle.
#[derive(Debug)]
pub struct Chord{
	node: NodeRef,
	config: ChordConfig,
	directory: Arc<Directory>,
	hasher: Arc<dyn KeyHasher>,

	// Operations channel
	channel_rx: Receiver<Message>,
	channel_tx: Sender<Message>,
}

impl Chord{

	/// Creates a new Chord instance with the provided address and id.
	/// The address is what other nodes resolve this node by.
	pub fn new(address: impl Into<String>, node_id: ChordId, config: ChordConfig, directory: Arc<Directory>) -> Self{
		let (channel_tx, channel_rx) = channel(config.channel_capacity.max(1));
		Chord{
			node: NodeRef::new(node_id, address),
			config,
			directory,
			hasher: Arc::new(DefaultKeyHasher),
			channel_rx,
			channel_tx,
		}
	}

	/// Creates a new Chord instance at a random point of the ring.
	pub fn with_random_id(address: impl Into<String>, config: ChordConfig, directory: Arc<Directory>) -> Self{
		let space = config.id_space();
		let node_id = rand::thread_rng().gen_range(0..=space.wrap_point());
		Chord::new(address, node_id, config, directory)
	}

	/// Replace the function mapping client keys onto the ring.
	pub fn set_hasher(&mut self, hasher: Arc<dyn KeyHasher>){
		self.hasher = hasher;
	}

	pub fn id(&self) -> ChordId {
		self.node.node_id
	}

	/// Gets an AssociateChannel connected to this node. The channel will not
	/// return any results until the node is started.
	pub fn get_associate(&self) -> AssociateChannel{
		AssociateChannel::new(self.channel_tx.clone())
	}

	/// Starts the node. This will take ownership of the Chord and return a ChordHandle.
	///
	/// Without a join address the node forms a ring of its own. With one,
	/// the node joins through that contact. A join that fails is not fatal:
	/// the node still starts and retries the join on every maintenance tick.
	pub async fn start(self, join_addr: Option<String>) -> Result<ChordHandle> {
		self.config.validate()?;
		let space = self.config.id_space();
		if !space.contains(self.node.node_id) {
			return Err(ChordError::Config(format!("node id {} is outside the {} bit ring", self.node.node_id, space.bits())));
		}

		let Chord{ node: me, config, directory, hasher, mut channel_rx, channel_tx } = self;
		let node = Arc::new(ChordNode::new(me.clone(), config, directory.clone(), hasher));
		if join_addr.is_none() {
			node.init_lone_ring().await?;
		}
		directory.register(me.clone(), channel_tx.clone()).await;

		// Spawn operation task
		let processor_node = node.clone();
		let processor_handle = tokio::spawn(async move{
			while let Some(operation) = channel_rx.recv().await{
				if !processor_node.is_alive() {
					break;
				}
				let node = processor_node.clone();
				tokio::spawn(async move{
					node.process(operation).await;
				});
			}
			info!("processor task terminating");
		});

		// Start maintenance task
		let stabilizer_channel = channel_tx.clone();
		let maintenance_node = node.clone();
		let period = node.config.stabilize_interval();
		let maintenance_handle = tokio::spawn(async move{
			let mut interval = interval_at(Instant::now() + period, period);
			loop{
				interval.tick().await;
				if !maintenance_node.is_alive() {
					info!("maintenance task terminating");
					return;
				}
				for trigger in [PrivateMessage::Stabilize, PrivateMessage::FixFingers, PrivateMessage::RunTasks] {
					if stabilizer_channel.send(trigger.into()).await.is_err() {
						return;
					}
				}
			}
		});

		if let Some(contact) = join_addr {
			node.join_or_schedule(&contact).await;
		}

		info!("node {} started", me);
		Ok(ChordHandle{
			node,
			maintenance_handle,
			processor_handle,
			associate_channel: AssociateChannel::new(channel_tx),
		})
	}
}


/// Shared state of a running node. Every inbound message is handled on its
/// own task against this state.
///
/// Lock order: predecessor, then routing, with the data store always
/// innermost. No lock is held across a call to another node.
#[derive(Debug)]
pub(crate) struct ChordNode{
	me: NodeRef,
	space: IdSpace,
	config: ChordConfig,
	directory: Arc<Directory>,
	hasher: Arc<dyn KeyHasher>,

	predecessor: Mutex<Option<NodeRef>>,
	routing: Mutex<RoutingTable>,
	store: Mutex<DataStore>,

	retries: Mutex<RetryState>,
	tasks: Mutex<TaskQueue>,
	finger_index: AtomicU32,
	alive: AtomicBool,
}

impl ChordNode{
	fn new(me: NodeRef, config: ChordConfig, directory: Arc<Directory>, hasher: Arc<dyn KeyHasher>) -> Self{
		let space = config.id_space();
		ChordNode{
			store: Mutex::new(DataStore::new(me.node_id)),
			me,
			space,
			predecessor: Mutex::new(None),
			routing: Mutex::new(RoutingTable::new(space.bits() as usize)),
			config,
			directory,
			hasher,
			retries: Mutex::new(RetryState::default()),
			tasks: Mutex::new(TaskQueue::default()),
			finger_index: AtomicU32::new(0),
			alive: AtomicBool::new(true),
		}
	}

	async fn process(&self, operation: Message){
		// a dead node drops the reply channel, which callers see as unreachable
		if !self.is_alive() {
			return;
		}
		match operation{
			Message::Private(operation) => {
				self.process_private(operation).await;
			},
			Message::Public(operation) => {
				self.process_public(operation).await;
			},
			Message::Associate{ request, reply } => {
				let response = self.process_associate(request).await;
				let _ = reply.send(response);
			},
		}
	}

	pub(crate) fn is_alive(&self) -> bool {
		self.alive.load(Ordering::SeqCst)
	}

	/// Stop answering and tell the Directory this node is gone.
	pub(crate) async fn shutdown(&self){
		self.alive.store(false, Ordering::SeqCst);
		self.directory.mark_down(&self.me.address).await;
	}

	/// Shut the node down when `result` carries a fatal error.
	async fn guard_fatal(&self, result: Result<()>) -> Result<()> {
		if let Err(err) = &result {
			if err.is_fatal() {
				error!(node = self.me.node_id, %err, "fatal error, shutting node down");
				self.shutdown().await;
			}
		}
		result
	}


	// Lock acquisition, bounded by the configured lock timeout

	async fn acquire<'a, T>(&self, lock: &'a Mutex<T>, name: &'static str) -> Result<MutexGuard<'a, T>> {
		timeout(self.config.lock_timeout(), lock.lock()).await
			.map_err(|_| ChordError::LockTimeout{ lock: name })
	}

	pub(crate) async fn lock_predecessor(&self) -> Result<MutexGuard<'_, Option<NodeRef>>> {
		self.acquire(&self.predecessor, "predecessor").await
	}

	pub(crate) async fn lock_routing(&self) -> Result<MutexGuard<'_, RoutingTable>> {
		self.acquire(&self.routing, "successor list").await
	}

	pub(crate) async fn lock_store(&self) -> Result<MutexGuard<'_, DataStore>> {
		self.acquire(&self.store, "data store").await
	}

	pub(crate) async fn lock_retries(&self) -> Result<MutexGuard<'_, RetryState>> {
		self.acquire(&self.retries, "retry state").await
	}

	async fn enqueue(&self, task: Task){
		match self.acquire(&self.tasks, "task queue").await {
			Ok(mut tasks) => tasks.push(task),
			Err(err) => warn!(node = self.me.node_id, %err, ?task, "could not queue task"),
		}
	}


	// Snapshots

	pub(crate) async fn predecessor(&self) -> Result<Option<NodeRef>> {
		Ok(self.lock_predecessor().await?.clone())
	}

	pub(crate) async fn successor_list(&self) -> Result<Vec<NodeRef>> {
		Ok(self.lock_routing().await?.successor_list.clone())
	}

	pub(crate) async fn node_info(&self) -> Result<NodeInfo> {
		let predecessor = self.lock_predecessor().await?;
		let routing = self.lock_routing().await?;
		Ok(NodeInfo{
			node: self.me.clone(),
			successor_list: routing.successor_list.clone(),
			predecessor: predecessor.clone(),
			finger_table: routing.finger_table.clone(),
		})
	}

	/// Entries this node is master of.
	pub(crate) async fn tantou_data(&self) -> Result<Vec<DataIdAndValue>> {
		Ok(self.lock_store().await?.entries_of(self.me.node_id))
	}

	/// True when `data_id` falls in `(predecessor, self]`. Without a known
	/// predecessor ownership cannot be confirmed.
	pub(crate) async fn owns(&self, data_id: ChordId) -> Result<bool> {
		let predecessor = self.lock_predecessor().await?;
		Ok(match predecessor.as_ref() {
			Some(pred) => self.space.is_between(pred.node_id, self.me.node_id, data_id),
			None => false,
		})
	}


	/// One full maintenance round: pending join, successor list, every
	/// finger, deferred tasks and pending writes.
	#[instrument(skip(self), fields(node = self.me.node_id))]
	pub(crate) async fn maintenance_round(&self) -> Result<()> {
		let result = self.stabilize().await;
		if let Err(err) = self.guard_fatal(result).await {
			if err.is_fatal() {
				return Err(err);
			}
			debug!(%err, "stabilization step failed");
		}
		for index in 1..self.space.bits() {
			if let Err(err) = self.stabilize_finger_table(index).await {
				debug!(%err, index, "finger refresh failed");
			}
		}
		self.run_tasks().await;
		self.replay_pending_puts().await;
		Ok(())
	}
}



/// A ChordHandle represents a connection to a started Chord.
pub struct ChordHandle{
	node: Arc<ChordNode>,
	maintenance_handle: JoinHandle<()>,
	processor_handle: JoinHandle<()>,

	associate_channel: AssociateChannel,
}

impl ChordHandle {
	pub fn id(&self) -> ChordId {
		self.node.me.node_id
	}

	pub fn address(&self) -> &str {
		&self.node.me.address
	}

	pub fn node_ref(&self) -> NodeRef {
		self.node.me.clone()
	}

	pub fn is_alive(&self) -> bool {
		self.node.is_alive()
	}

	/// True while the timed maintenance task is still ticking.
	pub fn is_maintaining(&self) -> bool {
		!self.maintenance_handle.is_finished()
	}

	/// Get a new AssociateChannel connected to the underlying node.
	pub fn get_associate(&self) -> AssociateChannel{
		self.associate_channel.duplicate()
	}

	/// Store `value` under `key` on whichever node owns it.
	pub async fn global_put(&self, key: &str, value: impl Into<String>) -> bool {
		self.node.global_put(key, value.into()).await
	}

	pub async fn global_put_id(&self, data_id: ChordId, value: impl Into<String>) -> bool {
		self.node.global_put_id(data_id, value.into()).await
	}

	pub async fn global_get(&self, key: &str) -> GetOutcome {
		self.node.global_get(key).await
	}

	pub async fn global_get_id(&self, data_id: ChordId) -> GetOutcome {
		self.node.global_get_id(data_id).await
	}

	pub async fn global_delete(&self, key: &str) -> bool {
		self.node.global_delete(key).await
	}

	pub async fn global_delete_id(&self, data_id: ChordId) -> bool {
		self.node.global_delete_id(data_id).await
	}

	/// Local master write. Fails with `NotOwner` unless this node owns `data_id`.
	pub async fn put(&self, data_id: ChordId, value: impl Into<String>) -> Result<()> {
		self.node.put(data_id, value.into()).await
	}

	/// Local read under normal ownership rules.
	pub async fn get(&self, data_id: ChordId) -> Result<String> {
		self.node.get(data_id, false).await
	}

	pub async fn find_successor(&self, id: ChordId) -> Result<NodeRef> {
		self.node.find_successor(id).await
	}

	pub async fn node_info(&self) -> Result<NodeInfo> {
		self.node.node_info().await
	}

	/// Everything stored on this node, mastered and replicated.
	pub async fn stored_entries(&self) -> Result<Vec<StoredEntry>> {
		Ok(self.node.lock_store().await?.snapshot())
	}

	pub async fn retry_state(&self) -> Result<RetryState> {
		Ok(self.node.lock_retries().await?.clone())
	}

	/// Run one maintenance round right away instead of waiting for the tick.
	pub async fn stabilize(&self) -> Result<()> {
		if !self.node.is_alive() {
			return Err(ChordError::unreachable(&self.node.me.address));
		}
		self.node.maintenance_round().await
	}

	/// Simulate a crash: the node stops answering at once and the Directory
	/// reports it down.
	pub async fn kill(&self){
		self.node.shutdown().await;
		self.maintenance_handle.abort();
		self.processor_handle.abort();
	}

	/// Force the chord to stop
	pub async fn stop(self){
		self.kill().await;
		let _ = self.maintenance_handle.await;
		let _ = self.processor_handle.await;
	}
}

impl std::fmt::Debug for ChordHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ChordHandle").field("node", &self.node.me).finish()
	}
}
