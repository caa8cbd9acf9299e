pub mod clock;
pub mod machine;

pub use clock::PhaseClock;
pub use machine::{Action, Effect, SessionState, Step, reduce, successor};

use crate::cue;
use crate::pattern::{BreathingPattern, VoiceSelection};
use crate::reactor::{
	AudioEvent, BreathingEvent, ComponentResponse, Event, Notification, PhaseChange,
	PhaseProgress, SessionSummary,
};
use crate::types::{AudioChannel, BreathingPhase};
use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_secs(1);

/// Drives the phase machine from scheduler ticks and asks for one cue per
/// phase entry.
pub struct BreathingEngine {
	pattern: Option<BreathingPattern>,
	state: SessionState,
	clock: PhaseClock,
	/// Bumped on start/pause/reset so ticks already scheduled go stale
	generation: u64,
	next_tick_at: Option<Instant>,
	paused_remaining: Option<Duration>,
	/// Voice changed while paused; the phase cue restarts on resume
	recue_on_resume: bool,
}

impl BreathingEngine {
	pub fn new() -> Self {
		Self {
			pattern: None,
			state: SessionState::initial(None, VoiceSelection::default()),
			clock: PhaseClock::new(),
			generation: 0,
			next_tick_at: None,
			paused_remaining: None,
			recue_on_resume: false,
		}
	}

	pub fn handle(&mut self, event: &Event, now: Instant) -> ComponentResponse {
		match event {
			Event::Breathing(BreathingEvent::Start { pattern, voice }) => {
				self.start(pattern, voice, now)
			}
			Event::Breathing(BreathingEvent::Tick { generation }) => {
				if *generation != self.generation {
					log::trace!("[Breathing] Dropping stale tick {}", generation);
					return ComponentResponse::none();
				}
				self.tick(now)
			}
			Event::Breathing(BreathingEvent::Pause) => self.pause(now),
			Event::Breathing(BreathingEvent::Resume) => self.resume(now),
			Event::Breathing(BreathingEvent::Reset) => {
				log::info!("[Breathing] Reset");
				self.reset_to(self.pattern.clone());
				ComponentResponse::emit(release_narration())
			}
			Event::Breathing(BreathingEvent::SelectVoice { voice }) => self.select_voice(voice),
			Event::Breathing(BreathingEvent::SetPattern { pattern }) => {
				log::info!("[Breathing] Pattern changed to '{}'", pattern.id);
				self.reset_to(Some(pattern.clone()));
				ComponentResponse::emit(release_narration())
			}
			Event::Breathing(BreathingEvent::ClearAudioError) => {
				self.state.last_audio_error = false;
				ComponentResponse::none()
			}
			_ => ComponentResponse::none(),
		}
	}

	/// Observe notifications produced by other components
	pub fn observe(&mut self, notification: &Notification) {
		if let Notification::AudioError(report) = notification {
			if report.channel == AudioChannel::Narration {
				self.state.last_audio_error = true;
			}
		}
	}

	/// Sample the phase clock; called once per frame
	pub fn poll(&mut self, now: Instant) -> ComponentResponse {
		if !self.state.phase.is_timed() || self.paused_remaining.is_some() {
			return ComponentResponse::none();
		}
		let fraction = self.clock.progress(now);
		if fraction == self.state.phase_progress {
			return ComponentResponse::none();
		}
		self.state.phase_progress = fraction;
		ComponentResponse::emit(Event::Notify(Notification::Progress(PhaseProgress {
			phase: self.state.phase,
			fraction,
			seconds_remaining: self.state.seconds_remaining,
		})))
	}

	fn start(
		&mut self,
		pattern: &BreathingPattern,
		voice: &VoiceSelection,
		now: Instant,
	) -> ComponentResponse {
		if let Err(e) = pattern.validate().and_then(|_| voice.validate()) {
			// The controller validates first; reaching here is a caller bug
			log::warn!("[Breathing] Ignoring invalid start: {}", e);
			return ComponentResponse::none();
		}
		log::info!(
			"[Breathing] Starting '{}' ({} cycles, voice={})",
			pattern.id,
			pattern.cycles,
			voice.label()
		);

		self.generation += 1;
		self.pattern = Some(pattern.clone());
		self.paused_remaining = None;
		self.recue_on_resume = false;
		let idle = SessionState::initial(Some(pattern), voice.clone());
		let (state, _) = reduce(&idle, pattern, Action::Start);
		self.state = state;

		let mut events = vec![release_narration()];
		events.extend(self.on_entry(now, true));
		let mut response = ComponentResponse::emit_many(events);
		self.next_tick_at = Some(now + TICK);
		response.scheduled.push((self.tick_event(), TICK));
		response
	}

	fn tick(&mut self, now: Instant) -> ComponentResponse {
		let Some(pattern) = self.pattern.as_ref() else {
			log::warn!("[Breathing] Tick with no active pattern, ignoring");
			return ComponentResponse::none();
		};
		if self.paused_remaining.is_some() || !self.state.phase.is_timed() {
			log::warn!("[Breathing] Tick in {:?} while not running, ignoring", self.state.phase);
			return ComponentResponse::none();
		}

		let (state, effect) = reduce(&self.state, pattern, Action::Tick);
		self.state = state;

		let mut response = match effect {
			Some(Effect::Entered(_)) => ComponentResponse::emit_many(self.on_entry(now, false)),
			Some(Effect::Completed) => return self.complete(),
			None => ComponentResponse::none(),
		};

		// Anchored to the previous deadline, not to `now`
		let at = self.next_tick_at.unwrap_or(now) + TICK;
		self.next_tick_at = Some(at);
		response
			.scheduled
			.push((self.tick_event(), at.saturating_duration_since(now)));
		response
	}

	/// Every phase entry: restart the clock, report, request the cue
	fn on_entry(&mut self, now: Instant, session_start: bool) -> Vec<Event> {
		let Some(pattern) = self.pattern.as_ref() else {
			return vec![];
		};
		let phase = self.state.phase;
		self.clock.restart(now, self.state.seconds_remaining);
		log::info!(
			"[Breathing] {:?} ({}s), cycle {}/{}",
			phase,
			self.state.seconds_remaining,
			self.state.cycle_index,
			pattern.cycles
		);

		let mut events = vec![Event::Notify(Notification::PhaseChanged(PhaseChange {
			phase,
			cycle_index: self.state.cycle_index,
			cycles: pattern.cycles,
			duration_secs: self.state.seconds_remaining,
		}))];

		let voice = &self.state.selected_voice;
		let phase_cue = cue::resolve(phase, voice, pattern);
		let start_cue = if session_start {
			cue::resolve_session_start(voice, pattern)
		} else {
			None
		};
		match (start_cue, phase_cue) {
			(Some(start), Some(url)) => {
				log::debug!("[Breathing] Start cue {}, then {:?} cue {}", start, phase, url);
				events.push(play_narration(start));
				events.push(queue_narration(url));
			}
			(Some(url), None) | (None, Some(url)) => {
				log::debug!("[Breathing] Cue for {:?}: {}", phase, url);
				events.push(play_narration(url));
			}
			(None, None) => log::debug!("[Breathing] No cue for {:?}", phase),
		}
		events
	}

	fn complete(&mut self) -> ComponentResponse {
		self.clock.stop();
		self.next_tick_at = None;
		let Some(pattern) = self.pattern.as_ref() else {
			return ComponentResponse::none();
		};
		log::info!("[Breathing] Session '{}' completed", pattern.id);

		let mut events = vec![Event::Notify(Notification::Completed(SessionSummary {
			pattern_id: pattern.id.clone(),
			cycles: pattern.cycles,
		}))];
		if let Some(url) = cue::resolve_session_end(&self.state.selected_voice, pattern) {
			events.push(play_narration(url));
		}
		ComponentResponse::emit_many(events)
	}

	fn pause(&mut self, now: Instant) -> ComponentResponse {
		if !self.is_running() {
			log::debug!("[Breathing] Pause ignored: not running");
			return ComponentResponse::none();
		}
		self.generation += 1;
		let remaining = self
			.next_tick_at
			.map_or(TICK, |at| at.saturating_duration_since(now));
		self.paused_remaining = Some(remaining);
		self.clock.pause(now);
		log::info!(
			"[Breathing] Paused in {:?} with {}s left",
			self.state.phase,
			self.state.seconds_remaining
		);
		ComponentResponse::emit(Event::Audio(AudioEvent::SetPaused {
			channel: AudioChannel::Narration,
			paused: true,
		}))
	}

	fn resume(&mut self, now: Instant) -> ComponentResponse {
		let Some(remaining) = self.paused_remaining.take() else {
			log::debug!("[Breathing] Resume ignored: not paused");
			return ComponentResponse::none();
		};
		self.clock.resume(now);
		self.next_tick_at = Some(now + remaining);
		log::info!(
			"[Breathing] Resumed {:?} with {}s left",
			self.state.phase,
			self.state.seconds_remaining
		);
		let mut response = ComponentResponse::emit(Event::Audio(AudioEvent::SetPaused {
			channel: AudioChannel::Narration,
			paused: false,
		}));
		if std::mem::take(&mut self.recue_on_resume) {
			if let Some(url) = self.phase_cue() {
				log::debug!("[Breathing] Restarting {:?} cue in new voice", self.state.phase);
				response.events.push(play_narration(&url));
			}
		}
		response.scheduled.push((self.tick_event(), remaining));
		response
	}

	fn phase_cue(&self) -> Option<String> {
		let pattern = self.pattern.as_ref()?;
		cue::resolve(self.state.phase, &self.state.selected_voice, pattern).map(str::to_owned)
	}

	fn select_voice(&mut self, voice: &VoiceSelection) -> ComponentResponse {
		log::info!("[Breathing] Voice set to {}", voice.label());
		self.state.selected_voice = voice.clone();

		// Rebuild narration for the phase in progress
		let mut events = vec![release_narration()];
		if self.is_running() {
			if let Some(url) = self.phase_cue() {
				events.push(play_narration(&url));
			}
		} else if self.is_paused() {
			self.recue_on_resume = true;
		}
		ComponentResponse::emit_many(events)
	}

	fn reset_to(&mut self, pattern: Option<BreathingPattern>) {
		self.generation += 1;
		self.state = SessionState::initial(pattern.as_ref(), self.state.selected_voice.clone());
		self.pattern = pattern;
		self.clock.stop();
		self.next_tick_at = None;
		self.paused_remaining = None;
		self.recue_on_resume = false;
	}

	fn tick_event(&self) -> Event {
		Event::Breathing(BreathingEvent::Tick {
			generation: self.generation,
		})
	}

	/// Inside a timed phase and not paused
	pub fn is_running(&self) -> bool {
		self.state.phase.is_timed() && self.paused_remaining.is_none()
	}

	pub fn is_paused(&self) -> bool {
		self.paused_remaining.is_some()
	}

	pub fn state(&self) -> &SessionState {
		&self.state
	}

	pub fn pattern(&self) -> Option<&BreathingPattern> {
		self.pattern.as_ref()
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	pub fn phase(&self) -> BreathingPhase {
		self.state.phase
	}
}

impl Default for BreathingEngine {
	fn default() -> Self {
		Self::new()
	}
}

fn play_narration(url: &str) -> Event {
	Event::Audio(AudioEvent::PlayCue {
		channel: AudioChannel::Narration,
		url: url.to_owned(),
	})
}

fn queue_narration(url: &str) -> Event {
	Event::Audio(AudioEvent::QueueCue {
		channel: AudioChannel::Narration,
		url: url.to_owned(),
	})
}

fn release_narration() -> Event {
	Event::Audio(AudioEvent::Release {
		channel: AudioChannel::Narration,
	})
}
