pub mod event;
pub mod queue;
pub mod scheduler;

pub use event::{
	AudioEvent, BreathingEvent, ComponentResponse, ControlEvent, Event, MusicCommand,
	Notification, PhaseChange, PhaseProgress, Priority, SessionSummary,
};
pub use queue::EventQueue;
pub use scheduler::Scheduler;

use crate::audio::AudioDelivery;
use crate::breathing::BreathingEngine;
use crate::types::AudioChannel;
use std::time::Instant;

const MAX_ITERATIONS: usize = 1000;

/// Owns the components and moves events between them
pub struct Reactor {
	queue: EventQueue,
	scheduler: Scheduler,
	outbox: Vec<Notification>,

	pub breathing: BreathingEngine,
	pub audio: AudioDelivery,
}

impl Reactor {
	pub fn new(audio: AudioDelivery, now: Instant) -> Self {
		log::info!("[Reactor] Initializing components");
		Self {
			queue: EventQueue::new(),
			scheduler: Scheduler::new(now),
			outbox: Vec::new(),
			breathing: BreathingEngine::new(),
			audio,
		}
	}

	fn process_response(&mut self, response: ComponentResponse) {
		for e in response.events {
			self.queue.push(e);
		}
		for (e, d) in response.scheduled {
			self.scheduler.schedule(e, d);
		}
	}

	/// Handle an event and everything it triggers right away
	pub fn submit(&mut self, event: Event, now: Instant) {
		self.scheduler.advance(now);
		self.queue.push(event);
		self.drain(now);
	}

	/// One frame: due timers, background results, clock sampling
	pub fn tick(&mut self, now: Instant) {
		self.scheduler.advance(now);
		self.scheduler.tick(&mut self.queue);

		let audio_response = self.audio.poll(now);
		self.process_response(audio_response);
		let breathing_response = self.breathing.poll(now);
		self.process_response(breathing_response);

		self.drain(now);
	}

	/// Restart the timeline at `now`, dropping anything scheduled
	pub fn rebase(&mut self, now: Instant) {
		self.scheduler = Scheduler::new(now);
	}

	/// Notifications produced since the last call, in order
	pub fn take_notifications(&mut self) -> Vec<Notification> {
		std::mem::take(&mut self.outbox)
	}

	fn drain(&mut self, now: Instant) {
		let mut iterations = 0;
		while let Some(event) = self.queue.pop() {
			log::trace!("[Reactor] Processing event: {:?}", event);
			let response = self.route(&event, now);
			self.process_response(response);

			iterations += 1;
			if iterations > MAX_ITERATIONS {
				log::warn!(
					"[Reactor] Event loop exceeded {} iterations, breaking",
					MAX_ITERATIONS
				);
				break;
			}
		}
	}

	fn route(&mut self, event: &Event, now: Instant) -> ComponentResponse {
		match event {
			Event::Control(e) => self.handle_control(e),
			Event::Breathing(_) => self.breathing.handle(event, now),
			Event::Audio(_) => self.audio.handle(event, now),
			Event::Notify(n) => {
				self.breathing.observe(n);
				self.outbox.push(n.clone());
				ComponentResponse::none()
			}
		}
	}

	fn handle_control(&mut self, event: &ControlEvent) -> ComponentResponse {
		match event {
			ControlEvent::Start { pattern, voice } => {
				ComponentResponse::emit(Event::Breathing(BreathingEvent::Start {
					pattern: pattern.clone(),
					voice: voice.clone(),
				}))
			}
			ControlEvent::Pause => ComponentResponse::emit(Event::Breathing(BreathingEvent::Pause)),
			ControlEvent::Resume => {
				ComponentResponse::emit(Event::Breathing(BreathingEvent::Resume))
			}
			ControlEvent::Reset => ComponentResponse::emit(Event::Breathing(BreathingEvent::Reset)),
			ControlEvent::Stop => {
				log::info!("[Reactor] Stop: resetting and releasing all audio");
				ComponentResponse::emit_many(vec![
					Event::Breathing(BreathingEvent::Reset),
					Event::Audio(AudioEvent::Release {
						channel: AudioChannel::Music,
					}),
				])
			}
			ControlEvent::SelectVoice { voice } => {
				ComponentResponse::emit(Event::Breathing(BreathingEvent::SelectVoice {
					voice: voice.clone(),
				}))
			}
			ControlEvent::SetPattern { pattern } => {
				ComponentResponse::emit(Event::Breathing(BreathingEvent::SetPattern {
					pattern: pattern.clone(),
				}))
			}
			ControlEvent::RetryAudio => ComponentResponse::emit_many(vec![
				Event::Breathing(BreathingEvent::ClearAudioError),
				Event::Audio(AudioEvent::RetryFailed),
			]),
			ControlEvent::Music(command) => {
				ComponentResponse::emit(Event::Audio(AudioEvent::Music(command.clone())))
			}
		}
	}
}
