use tracing::{debug, warn};

use super::{message::PrivateMessage, task_queue::Task, ChordNode};


impl ChordNode{

	pub(crate) async fn process_private(&self, operation: PrivateMessage){
		match operation{
			PrivateMessage::Stabilize => {
				let result = self.stabilize().await;
				if let Err(err) = self.guard_fatal(result).await {
					debug!(node = self.me.node_id, %err, "stabilize failed");
				}
			},
			PrivateMessage::FixFingers => {
				if let Err(err) = self.fix_fingers().await {
					debug!(node = self.me.node_id, %err, "fix_fingers failed");
				}
			},
			PrivateMessage::RunTasks => {
				self.run_tasks().await;
				let replayed = self.replay_pending_puts().await;
				if replayed > 0 {
					debug!(node = self.me.node_id, "replayed {} pending writes", replayed);
				}
			},
		}
	}

	/// Run every queued task once. A failed task goes back on the queue
	/// until it has used up its attempts.
	pub(crate) async fn run_tasks(&self){
		let drained = match self.acquire(&self.tasks, "task queue").await {
			Ok(mut tasks) => tasks.drain(),
			Err(err) => {
				debug!(node = self.me.node_id, %err, "task queue busy");
				return;
			},
		};
		for (task, attempts) in drained {
			let result = match task {
				Task::JoinPartial => self.partial_join_op().await,
				Task::PromoteReplicas => self.promote_replicas().await,
			};
			let Err(err) = result else {
				debug!(node = self.me.node_id, ?task, "task done");
				continue;
			};
			let attempts = attempts + 1;
			if attempts < self.config.task_retry_limit {
				debug!(node = self.me.node_id, %err, ?task, attempts, "task failed, requeued");
				if let Ok(mut tasks) = self.acquire(&self.tasks, "task queue").await {
					tasks.requeue(task, attempts);
				}
			}else{
				warn!(node = self.me.node_id, %err, ?task, "task abandoned after {} attempts", attempts);
			}
		}
	}
}
