pub mod observers;

pub use observers::Observers;

use crate::audio::{AudioDelivery, AudioErrorReport, AudioOutput, ClipLoader};
use crate::breathing::SessionState;
use crate::pattern::{BreathingPattern, ConfigError, VoiceProfile, VoiceSelection};
use crate::reactor::{
	ControlEvent, Event, MusicCommand, PhaseChange, PhaseProgress, Reactor, SessionSummary,
};
use crate::settings::Settings;
use crate::store::{PatternRepository, VoiceProfileRepository};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error("no saved pattern '{0}'")]
	UnknownPattern(String),
	#[error("no saved voice '{0}'")]
	UnknownVoice(String),
}

/// UI-facing surface over the breathing engine and audio delivery.
///
/// Every request is checked up front; once accepted it is applied before
/// the call returns and observers hear about it in the same call.
pub struct SessionController {
	reactor: Reactor,
	observers: Observers,
	patterns: Arc<dyn PatternRepository>,
	voices: Arc<dyn VoiceProfileRepository>,
	clock: Box<dyn Fn() -> Instant>,
}

impl SessionController {
	pub fn new(
		settings: &Settings,
		loader: Arc<dyn ClipLoader>,
		output: Box<dyn AudioOutput>,
		patterns: Arc<dyn PatternRepository>,
		voices: Arc<dyn VoiceProfileRepository>,
	) -> Self {
		let audio = AudioDelivery::new(settings, loader, output);
		Self {
			reactor: Reactor::new(audio, Instant::now()),
			observers: Observers::default(),
			patterns,
			voices,
			clock: Box::new(Instant::now),
		}
	}

	/// Replace the time source before the first request
	pub fn with_clock(mut self, clock: impl Fn() -> Instant + 'static) -> Self {
		self.reactor.rebase(clock());
		self.clock = Box::new(clock);
		self
	}

	pub fn start(
		&mut self,
		pattern: &BreathingPattern,
		voice: Option<VoiceProfile>,
	) -> Result<(), ConfigError> {
		self.start_with(pattern, VoiceSelection::from(voice))
	}

	pub fn start_with(
		&mut self,
		pattern: &BreathingPattern,
		voice: VoiceSelection,
	) -> Result<(), ConfigError> {
		pattern.validate()?;
		voice.validate()?;
		self.submit(ControlEvent::Start {
			pattern: pattern.clone(),
			voice,
		});
		Ok(())
	}

	/// Start from the library; no voice name means pattern-native cues
	pub fn start_saved(
		&mut self,
		pattern_id: &str,
		voice_name: Option<&str>,
	) -> Result<(), SessionError> {
		let pattern = self
			.patterns
			.pattern(pattern_id)
			.ok_or_else(|| SessionError::UnknownPattern(pattern_id.to_owned()))?;
		let voice = match voice_name {
			Some(name) => Some(
				self.voices
					.voice(name)
					.ok_or_else(|| SessionError::UnknownVoice(name.to_owned()))?,
			),
			None => None,
		};
		self.start(&pattern, voice)?;
		Ok(())
	}

	pub fn pause(&mut self) {
		self.submit(ControlEvent::Pause);
	}

	pub fn resume(&mut self) {
		self.submit(ControlEvent::Resume);
	}

	pub fn reset(&mut self) {
		self.submit(ControlEvent::Reset);
	}

	/// Reset and silence both channels
	pub fn stop(&mut self) {
		self.submit(ControlEvent::Stop);
	}

	pub fn select_voice(&mut self, voice: VoiceSelection) -> Result<(), ConfigError> {
		voice.validate()?;
		self.submit(ControlEvent::SelectVoice { voice });
		Ok(())
	}

	pub fn set_pattern(&mut self, pattern: &BreathingPattern) -> Result<(), ConfigError> {
		pattern.validate()?;
		self.submit(ControlEvent::SetPattern {
			pattern: pattern.clone(),
		});
		Ok(())
	}

	pub fn retry_audio(&mut self) {
		self.submit(ControlEvent::RetryAudio);
	}

	pub fn play_music(&mut self, url: &str) {
		self.music(MusicCommand::Play { url: url.to_owned() });
	}

	pub fn queue_music(&mut self, url: &str) {
		self.music(MusicCommand::Queue { url: url.to_owned() });
	}

	pub fn play_playlist(&mut self, urls: Vec<String>, shuffle: bool) {
		self.music(MusicCommand::Playlist { urls, shuffle });
	}

	pub fn seek_music(&mut self, position: Duration) {
		self.music(MusicCommand::Seek { position });
	}

	pub fn set_music_loop(&mut self, enabled: bool) {
		self.music(MusicCommand::SetLoop { enabled });
	}

	pub fn set_music_volume(&mut self, volume: f32) {
		self.music(MusicCommand::SetVolume { volume });
	}

	pub fn set_music_rate(&mut self, rate: f32) {
		self.music(MusicCommand::SetRate { rate });
	}

	pub fn stop_music(&mut self) {
		self.music(MusicCommand::Stop);
	}

	pub fn on_phase_change(&mut self, callback: impl FnMut(&PhaseChange) + 'static) {
		self.observers.on_phase_change(callback);
	}

	pub fn on_progress(&mut self, callback: impl FnMut(&PhaseProgress) + 'static) {
		self.observers.on_progress(callback);
	}

	pub fn on_completed(&mut self, callback: impl FnMut(&SessionSummary) + 'static) {
		self.observers.on_completed(callback);
	}

	pub fn on_audio_error(&mut self, callback: impl FnMut(&AudioErrorReport) + 'static) {
		self.observers.on_audio_error(callback);
	}

	/// Advance timers and collect audio results; call every frame
	pub fn tick(&mut self) {
		let now = (self.clock)();
		self.reactor.tick(now);
		self.flush();
	}

	pub fn state(&self) -> &SessionState {
		self.reactor.breathing.state()
	}

	pub fn pattern(&self) -> Option<&BreathingPattern> {
		self.reactor.breathing.pattern()
	}

	pub fn is_running(&self) -> bool {
		self.reactor.breathing.is_running()
	}

	pub fn is_paused(&self) -> bool {
		self.reactor.breathing.is_paused()
	}

	pub fn audio(&self) -> &AudioDelivery {
		&self.reactor.audio
	}

	pub fn patterns(&self) -> &dyn PatternRepository {
		self.patterns.as_ref()
	}

	pub fn voices(&self) -> &dyn VoiceProfileRepository {
		self.voices.as_ref()
	}

	fn music(&mut self, command: MusicCommand) {
		self.submit(ControlEvent::Music(command));
	}

	fn submit(&mut self, event: ControlEvent) {
		let now = (self.clock)();
		self.reactor.submit(Event::Control(event), now);
		self.flush();
	}

	fn flush(&mut self) {
		for notification in self.reactor.take_notifications() {
			self.observers.notify(&notification);
		}
	}
}
