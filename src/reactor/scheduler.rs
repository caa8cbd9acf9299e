use super::event::Event;
use super::queue::EventQueue;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

struct ScheduledEvent {
	emit_at: Instant,
	/// Insertion order, so equal deadlines fire first-in first-out
	seq: u64,
	event: Event,
}

impl PartialEq for ScheduledEvent {
	fn eq(&self, other: &Self) -> bool {
		self.emit_at == other.emit_at && self.seq == other.seq
	}
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for ScheduledEvent {
	fn cmp(&self, other: &Self) -> Ordering {
		other
			.emit_at
			.cmp(&self.emit_at)
			.then_with(|| other.seq.cmp(&self.seq))
	}
}

/// Deadline heap. Time only moves when the owner calls `advance`.
pub struct Scheduler {
	pending: BinaryHeap<ScheduledEvent>,
	now: Instant,
	seq: u64,
}

impl Scheduler {
	pub fn new(now: Instant) -> Self {
		Self {
			pending: BinaryHeap::new(),
			now,
			seq: 0,
		}
	}

	pub fn advance(&mut self, now: Instant) {
		if now > self.now {
			self.now = now;
		}
	}

	/// Schedule an event to fire `delay` after the current time
	pub fn schedule(&mut self, event: Event, delay: Duration) {
		self.seq += 1;
		self.pending.push(ScheduledEvent {
			emit_at: self.now + delay,
			seq: self.seq,
			event,
		});
	}

	/// Drain events that are due into the queue
	pub fn tick(&mut self, queue: &mut EventQueue) {
		while self.pending.peek().is_some_and(|s| s.emit_at <= self.now) {
			if let Some(scheduled) = self.pending.pop() {
				queue.push(scheduled.event);
			}
		}
	}

	pub fn next_deadline(&self) -> Option<Instant> {
		self.pending.peek().map(|s| s.emit_at)
	}
}
