use std::time::{Duration, Instant};

/// Linear volume handoff from the playing track to the preloaded one
#[derive(Debug, Clone)]
pub struct Crossfade {
	pub fade_id: u64,
	pub started_at: Instant,
	pub window: Duration,
	/// Outgoing track position when the fade began; seeking before it cancels
	pub start_position: Duration,
}

impl Crossfade {
	pub fn new(fade_id: u64, started_at: Instant, window: Duration, start_position: Duration) -> Self {
		Self {
			fade_id,
			started_at,
			window,
			start_position,
		}
	}

	pub fn fraction(&self, now: Instant) -> f32 {
		if self.window.is_zero() {
			return 1.0;
		}
		let elapsed = now.saturating_duration_since(self.started_at);
		(elapsed.as_secs_f32() / self.window.as_secs_f32()).clamp(0.0, 1.0)
	}

	/// (outgoing, incoming), both within [0, target]
	pub fn volumes(&self, now: Instant, target: f32) -> (f32, f32) {
		let target = target.clamp(0.0, 1.0);
		let t = self.fraction(now);
		let outgoing = (target * (1.0 - t)).clamp(0.0, target);
		let incoming = (target * t).clamp(0.0, target);
		(outgoing, incoming)
	}

	pub fn is_done(&self, now: Instant) -> bool {
		self.fraction(now) >= 1.0
	}
}

/// Track position at which a crossfade should begin, if the track allows one.
///
/// The track must be at least two windows long and still have more than a
/// window left to play once the next track is ready.
pub fn plan(duration: Duration, position: Duration, window: Duration) -> Option<Duration> {
	if window.is_zero() || duration < window * 2 {
		return None;
	}
	let remaining = duration.saturating_sub(position);
	if remaining <= window {
		return None;
	}
	Some(duration - window)
}
