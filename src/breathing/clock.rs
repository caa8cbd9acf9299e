use std::time::{Duration, Instant};

/// Wall-clock progress through the current phase.
///
/// Progress is derived from the entry timestamp, not accumulated per frame.
/// The clock only observes; the countdown lives in the state machine.
#[derive(Debug, Clone, Default)]
pub struct PhaseClock {
	entered_at: Option<Instant>,
	duration: Duration,
	paused_at: Option<Instant>,
	last: f32,
}

impl PhaseClock {
	pub fn new() -> Self {
		Self::default()
	}

	/// New reference point for a freshly entered phase
	pub fn restart(&mut self, now: Instant, duration_secs: u32) {
		self.entered_at = Some(now);
		self.duration = Duration::from_secs(duration_secs as u64);
		self.paused_at = None;
		self.last = 0.0;
	}

	pub fn stop(&mut self) {
		*self = Self::default();
	}

	pub fn pause(&mut self, now: Instant) {
		if self.entered_at.is_some() && self.paused_at.is_none() {
			self.paused_at = Some(now);
		}
	}

	/// Shift the entry point forward by the time spent paused
	pub fn resume(&mut self, now: Instant) {
		if let (Some(paused_at), Some(entered_at)) = (self.paused_at.take(), self.entered_at.as_mut())
		{
			*entered_at += now.saturating_duration_since(paused_at);
		}
	}

	pub fn elapsed(&self, now: Instant) -> Duration {
		match self.entered_at {
			Some(entered_at) => self
				.paused_at
				.unwrap_or(now)
				.saturating_duration_since(entered_at),
			None => Duration::ZERO,
		}
	}

	/// Fraction in `[0, 1]`, never decreasing until the next restart
	pub fn progress(&mut self, now: Instant) -> f32 {
		if self.entered_at.is_none() {
			return self.last;
		}
		let fraction = if self.duration.is_zero() {
			1.0
		} else {
			(self.elapsed(now).as_secs_f32() / self.duration.as_secs_f32()).min(1.0)
		};
		self.last = self.last.max(fraction).clamp(0.0, 1.0);
		self.last
	}
}
