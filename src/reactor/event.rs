use crate::audio::AudioErrorReport;
use crate::pattern::{BreathingPattern, VoiceSelection};
use crate::types::{AudioChannel, BreathingPhase, HandleRole};
use std::time::Duration;

#[derive(Clone, Debug)]
pub enum Event {
	Control(ControlEvent),
	Breathing(BreathingEvent),
	Audio(AudioEvent),
	Notify(Notification),
}

impl Event {
	pub fn priority(&self) -> Priority {
		match self {
			Event::Control(_) => Priority::Critical,
			Event::Breathing(_) => Priority::High,
			Event::Audio(_) => Priority::Normal,
			Event::Notify(Notification::Progress(_)) => Priority::Low,
			Event::Notify(_) => Priority::Normal,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
	Critical = 0,
	High = 1,
	Normal = 2,
	Low = 3,
}

impl Priority {
	pub fn as_index(&self) -> usize {
		*self as usize
	}
}

/// Requests coming from the session controller
#[derive(Clone, Debug)]
pub enum ControlEvent {
	Start {
		pattern: BreathingPattern,
		voice: VoiceSelection,
	},
	Pause,
	Resume,
	/// Back to the initial state, narration released
	Reset,
	/// Reset plus both channels released
	Stop,
	SelectVoice {
		voice: VoiceSelection,
	},
	SetPattern {
		pattern: BreathingPattern,
	},
	RetryAudio,
	Music(MusicCommand),
}

#[derive(Clone, Debug)]
pub enum BreathingEvent {
	Start {
		pattern: BreathingPattern,
		voice: VoiceSelection,
	},
	Pause,
	Resume,
	Reset,
	SelectVoice {
		voice: VoiceSelection,
	},
	SetPattern {
		pattern: BreathingPattern,
	},
	/// One-second countdown tick. Stale generations are dropped.
	Tick {
		generation: u64,
	},
	ClearAudioError,
}

#[derive(Clone, Debug)]
pub enum AudioEvent {
	/// Stop whatever the channel plays and replace it with `url`
	PlayCue {
		channel: AudioChannel,
		url: String,
	},
	/// Play `url` once the channel's current cue is done
	QueueCue {
		channel: AudioChannel,
		url: String,
	},
	/// Cancel in-flight work and release every handle on the channel
	Release {
		channel: AudioChannel,
	},
	SetPaused {
		channel: AudioChannel,
		paused: bool,
	},
	/// Scheduled re-attempt after a transient failure
	Retry {
		channel: AudioChannel,
		role: HandleRole,
		request_id: u64,
	},
	/// User asked to try failed handles again
	RetryFailed,
	CrossfadeStep {
		channel: AudioChannel,
		fade_id: u64,
	},
	Music(MusicCommand),
}

#[derive(Clone, Debug)]
pub enum MusicCommand {
	Play { url: String },
	/// Preload the track that follows the current one
	Queue { url: String },
	Playlist { urls: Vec<String>, shuffle: bool },
	Stop,
	Seek { position: Duration },
	SetLoop { enabled: bool },
	SetVolume { volume: f32 },
	SetRate { rate: f32 },
}

/// Fire-and-forget notifications delivered to observers
#[derive(Clone, Debug)]
pub enum Notification {
	PhaseChanged(PhaseChange),
	Progress(PhaseProgress),
	Completed(SessionSummary),
	AudioError(AudioErrorReport),
}

#[derive(Clone, Debug, PartialEq)]
pub struct PhaseChange {
	pub phase: BreathingPhase,
	pub cycle_index: u32,
	pub cycles: u32,
	pub duration_secs: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PhaseProgress {
	pub phase: BreathingPhase,
	pub fraction: f32,
	pub seconds_remaining: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionSummary {
	pub pattern_id: String,
	pub cycles: u32,
}

/// Response from component.handle()
#[derive(Default)]
pub struct ComponentResponse {
	/// Events to dispatch immediately
	pub events: Vec<Event>,
	/// Events to schedule (event, delay)
	pub scheduled: Vec<(Event, Duration)>,
}

impl ComponentResponse {
	pub fn none() -> Self {
		Self::default()
	}

	pub fn emit(event: Event) -> Self {
		Self {
			events: vec![event],
			scheduled: vec![],
		}
	}

	pub fn emit_many(events: Vec<Event>) -> Self {
		Self {
			events,
			scheduled: vec![],
		}
	}

	pub fn schedule(event: Event, delay: Duration) -> Self {
		Self {
			events: vec![],
			scheduled: vec![(event, delay)],
		}
	}

	pub fn merge(&mut self, other: ComponentResponse) {
		self.events.extend(other.events);
		self.scheduled.extend(other.scheduled);
	}

	pub fn is_empty(&self) -> bool {
		self.events.is_empty() && self.scheduled.is_empty()
	}
}
