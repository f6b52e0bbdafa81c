use std::collections::VecDeque;


/// Deferred work a node runs on its maintenance tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task{
	/// Follow up of a join: pull leftover data from the successor, push
	/// replicas to the successor list, pull the predecessor's replicas and
	/// have the predecessor trim its replica holders.
	JoinPartial,
	/// Take over entries whose master sat between the new predecessor and
	/// this node and push them out as replicas.
	PromoteReplicas,
}

#[derive(Debug, Default)]
pub struct TaskQueue{
	queue: VecDeque<(Task, u32)>,
}

impl TaskQueue{
	/// Queue `task` unless it is already waiting.
	pub fn push(&mut self, task: Task){
		if !self.queue.iter().any(|(queued, _)| *queued == task) {
			self.queue.push_back((task, 0));
		}
	}

	pub fn requeue(&mut self, task: Task, attempts: u32){
		if !self.queue.iter().any(|(queued, _)| *queued == task) {
			self.queue.push_back((task, attempts));
		}
	}

	pub fn drain(&mut self) -> Vec<(Task, u32)> {
		self.queue.drain(..).collect()
	}

	#[cfg(test)]
	pub fn len(&self) -> usize {
		self.queue.len()
	}

	#[cfg(test)]
	pub fn is_empty(&self) -> bool {
		self.queue.is_empty()
	}
}
