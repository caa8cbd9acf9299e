use super::event::Event;
use std::collections::VecDeque;

/// Priority event queue with 4 priority levels, FIFO within a level
pub struct EventQueue {
	queues: [VecDeque<Event>; 4],
}

impl EventQueue {
	pub fn new() -> Self {
		Self {
			queues: [
				VecDeque::new(), // Critical: controller requests
				VecDeque::new(), // High: phase machine
				VecDeque::new(), // Normal: audio, notifications
				VecDeque::new(), // Low: progress
			],
		}
	}

	pub fn push(&mut self, event: Event) {
		let priority = event.priority();
		self.queues[priority.as_index()].push_back(event);
	}

	/// Pop the highest priority event available
	pub fn pop(&mut self) -> Option<Event> {
		for queue in &mut self.queues {
			if let Some(event) = queue.pop_front() {
				return Some(event);
			}
		}
		None
	}
}

impl Default for EventQueue {
	fn default() -> Self {
		Self::new()
	}
}
