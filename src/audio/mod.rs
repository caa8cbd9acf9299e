pub mod crossfade;
pub mod error;
pub mod loader;
pub mod output;
pub mod playlist;
pub mod url;

pub use error::{AudioError, AudioErrorKind, AudioErrorReport};
pub use loader::{ClipLoader, HttpLoader, LoadedClip, PendingClip};
pub use output::{AudioOutput, RodioOutput, SinkId, output_device_names};

use crate::reactor::{AudioEvent, ComponentResponse, Event, MusicCommand, Notification};
use crate::settings::{AudioSettings, Settings};
use crate::types::{AudioChannel, HandleRole, LoadState};
use crossfade::Crossfade;
use playlist::Playlist;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use self::url::UrlNormalizer;

const MIN_RATE: f32 = 0.25;
const MAX_RATE: f32 = 4.0;

/// Result of a background probe, tagged so late arrivals can be discarded
struct LoadMessage {
	channel: AudioChannel,
	role: HandleRole,
	request_id: u64,
	result: Result<LoadedClip, AudioError>,
}

/// One URL on its way to (or already at) the output device
#[derive(Debug)]
pub struct PlaybackHandle {
	pub requested_url: String,
	pub resolved_url: Option<String>,
	pub load_state: LoadState,
	pub retry_count: u32,
	request_id: u64,
	task: Option<JoinHandle<()>>,
	sink: Option<SinkId>,
	clip: Option<LoadedClip>,
	/// Failed with no retry left
	gave_up: bool,
}

impl PlaybackHandle {
	fn new(url: &str, request_id: u64) -> Self {
		Self {
			requested_url: url.to_owned(),
			resolved_url: None,
			load_state: LoadState::Idle,
			retry_count: 0,
			request_id,
			task: None,
			sink: None,
			clip: None,
			gave_up: false,
		}
	}

	pub fn duration(&self) -> Option<Duration> {
		self.clip.as_ref().and_then(|c| c.duration)
	}

	fn release(&mut self, output: &mut dyn AudioOutput) {
		if let Some(task) = self.task.take() {
			task.abort();
		}
		if let Some(sink) = self.sink.take() {
			output.release(sink);
		}
		self.clip = None;
		self.load_state = LoadState::Idle;
	}
}

struct Channel {
	kind: AudioChannel,
	volume: f32,
	rate: f32,
	looping: bool,
	paused: bool,
	primary: Option<PlaybackHandle>,
	/// Preloaded successor, silent until a crossfade or handoff
	next: Option<PlaybackHandle>,
	/// Primary position at which the crossfade to `next` begins
	fade_at: Option<Duration>,
	crossfade: Option<Crossfade>,
	playlist: Option<Playlist>,
	/// `next` was queued by hand and does not move the playlist cursor
	next_is_manual: bool,
	/// Cue that starts once the primary has played out or given up
	queued_cue: Option<String>,
}

impl Channel {
	fn new(kind: AudioChannel, volume: f32) -> Self {
		Self {
			kind,
			volume: volume.clamp(0.0, 1.0),
			rate: 1.0,
			looping: false,
			paused: false,
			primary: None,
			next: None,
			fade_at: None,
			crossfade: None,
			playlist: None,
			next_is_manual: false,
			queued_cue: None,
		}
	}

	fn get(&self, role: HandleRole) -> Option<&PlaybackHandle> {
		match role {
			HandleRole::Primary => self.primary.as_ref(),
			HandleRole::Next => self.next.as_ref(),
		}
	}

	fn slot(&mut self, role: HandleRole) -> &mut Option<PlaybackHandle> {
		match role {
			HandleRole::Primary => &mut self.primary,
			HandleRole::Next => &mut self.next,
		}
	}

	fn sink(&self, role: HandleRole) -> Option<SinkId> {
		self.get(role).and_then(|h| h.sink)
	}

	fn primary_done(&self) -> bool {
		self.primary
			.as_ref()
			.map_or(true, |h| h.load_state == LoadState::Idle || h.gave_up)
	}

	fn release_all(&mut self, output: &mut dyn AudioOutput) {
		for role in [HandleRole::Primary, HandleRole::Next] {
			if let Some(mut handle) = self.slot(role).take() {
				handle.release(output);
			}
		}
		self.crossfade = None;
		self.fade_at = None;
		self.playlist = None;
		self.next_is_manual = false;
		self.queued_cue = None;
	}
}

/// Validates, retries and plays narration cues and background music.
///
/// Every URL is probed off-thread and only handed to the output device once
/// it is known to decode. Results come back through `poll`.
pub struct AudioDelivery {
	settings: AudioSettings,
	normalizer: UrlNormalizer,
	loader: Arc<dyn ClipLoader>,
	output: Box<dyn AudioOutput>,
	narration: Channel,
	music: Channel,
	sender: mpsc::UnboundedSender<LoadMessage>,
	receiver: mpsc::UnboundedReceiver<LoadMessage>,
	next_request: u64,
	next_fade: u64,
}

impl AudioDelivery {
	pub fn new(
		settings: &Settings,
		loader: Arc<dyn ClipLoader>,
		output: Box<dyn AudioOutput>,
	) -> Self {
		let (sender, receiver) = mpsc::unbounded_channel();
		Self {
			normalizer: UrlNormalizer::new(&settings.storage),
			narration: Channel::new(AudioChannel::Narration, settings.audio.narration_volume),
			music: Channel::new(AudioChannel::Music, settings.audio.music_volume),
			settings: settings.audio.clone(),
			loader,
			output,
			sender,
			receiver,
			next_request: 0,
			next_fade: 0,
		}
	}

	pub fn handle(&mut self, event: &Event, now: Instant) -> ComponentResponse {
		match event {
			Event::Audio(AudioEvent::PlayCue { channel, url }) => {
				self.release_channel(*channel);
				self.load(*channel, HandleRole::Primary, url)
			}
			Event::Audio(AudioEvent::QueueCue { channel, url }) => {
				self.parts(*channel).0.queued_cue = Some(url.clone());
				self.start_queued_cue(*channel)
			}
			Event::Audio(AudioEvent::Release { channel }) => {
				self.release_channel(*channel);
				self.parts(*channel).0.paused = false;
				ComponentResponse::none()
			}
			Event::Audio(AudioEvent::SetPaused { channel, paused }) => {
				self.set_paused(*channel, *paused)
			}
			Event::Audio(AudioEvent::Retry {
				channel,
				role,
				request_id,
			}) => self.retry(*channel, *role, *request_id),
			Event::Audio(AudioEvent::RetryFailed) => self.retry_failed(),
			Event::Audio(AudioEvent::CrossfadeStep { channel, fade_id }) => {
				self.step_crossfade(*channel, *fade_id, now)
			}
			Event::Audio(AudioEvent::Music(command)) => self.music(command),
			_ => ComponentResponse::none(),
		}
	}

	/// Collect finished probes and watch playing tracks; called once per frame
	pub fn poll(&mut self, now: Instant) -> ComponentResponse {
		let mut response = ComponentResponse::none();
		while let Ok(message) = self.receiver.try_recv() {
			response.merge(self.on_loaded(message));
		}
		response.merge(self.monitor_narration());
		response.merge(self.monitor_music(now));
		response
	}

	pub fn playback(&self, channel: AudioChannel, role: HandleRole) -> Option<&PlaybackHandle> {
		self.channel(channel).get(role)
	}

	pub fn is_crossfading(&self) -> bool {
		self.music.crossfade.is_some()
	}

	pub fn music_volume(&self) -> f32 {
		self.music.volume
	}

	pub fn is_music_looping(&self) -> bool {
		self.music.looping
	}

	fn channel(&self, kind: AudioChannel) -> &Channel {
		match kind {
			AudioChannel::Narration => &self.narration,
			AudioChannel::Music => &self.music,
		}
	}

	fn parts(&mut self, kind: AudioChannel) -> (&mut Channel, &mut dyn AudioOutput) {
		let channel = match kind {
			AudioChannel::Narration => &mut self.narration,
			AudioChannel::Music => &mut self.music,
		};
		(channel, self.output.as_mut())
	}

	fn release_channel(&mut self, kind: AudioChannel) {
		let (channel, output) = self.parts(kind);
		if channel.primary.is_some() || channel.next.is_some() {
			log::debug!("[Audio] Releasing {} channel", channel.kind.as_str());
		}
		channel.release_all(output);
	}

	fn start_queued_cue(&mut self, kind: AudioChannel) -> ComponentResponse {
		let channel = self.parts(kind).0;
		if !channel.primary_done() {
			return ComponentResponse::none();
		}
		let Some(url) = channel.queued_cue.take() else {
			return ComponentResponse::none();
		};
		log::debug!("[Audio] Starting queued cue {}", url);
		self.load(kind, HandleRole::Primary, &url)
	}

	/// Replace whatever occupies `role` with a fresh handle for `url`
	fn load(&mut self, kind: AudioChannel, role: HandleRole, url: &str) -> ComponentResponse {
		self.next_request += 1;
		let request_id = self.next_request;
		let (channel, output) = self.parts(kind);
		let slot = channel.slot(role);
		if let Some(mut old) = slot.take() {
			old.release(output);
		}
		*slot = Some(PlaybackHandle::new(url, request_id));
		self.attempt(kind, role)
	}

	fn attempt(&mut self, kind: AudioChannel, role: HandleRole) -> ComponentResponse {
		let Some((requested, request_id)) = self
			.channel(kind)
			.get(role)
			.map(|h| (h.requested_url.clone(), h.request_id))
		else {
			return ComponentResponse::none();
		};

		let resolved = match self.normalizer.normalize(&requested) {
			Ok(url) => url,
			Err(e) => return self.fail(kind, role, e),
		};

		let loader = Arc::clone(&self.loader);
		let sender = self.sender.clone();
		let probe_timeout = self.settings.probe_timeout();
		let fetch_timeout = self.settings.fetch_timeout();
		let url = resolved.clone();
		let task = tokio::spawn(async move {
			let probed = match tokio::time::timeout(probe_timeout, loader.probe(&url)).await {
				Ok(probed) => probed,
				Err(_) => Err(AudioError::unreachable(
					&url,
					format!("not playable within {:?}", probe_timeout),
				)),
			};
			let result = match probed {
				Ok(pending) => match tokio::time::timeout(fetch_timeout, pending.finish()).await {
					Ok(result) => result,
					Err(_) => Err(AudioError::unreachable(
						&url,
						format!("not fully fetched within {:?}", fetch_timeout),
					)),
				},
				Err(e) => Err(e),
			};
			let _ = sender.send(LoadMessage {
				channel: kind,
				role,
				request_id,
				result,
			});
		});

		let (channel, _) = self.parts(kind);
		if let Some(handle) = channel.slot(role).as_mut() {
			log::debug!(
				"[Audio] Validating {} {:?} (attempt {}): {}",
				kind.as_str(),
				role,
				handle.retry_count + 1,
				resolved
			);
			handle.resolved_url = Some(resolved);
			handle.load_state = LoadState::Validating;
			handle.gave_up = false;
			handle.task = Some(task);
		}
		ComponentResponse::none()
	}

	fn on_loaded(&mut self, message: LoadMessage) -> ComponentResponse {
		let current = self
			.channel(message.channel)
			.get(message.role)
			.map(|h| h.request_id);
		if current != Some(message.request_id) {
			log::debug!(
				"[Audio] Dropping stale result for {} request {}",
				message.channel.as_str(),
				message.request_id
			);
			return ComponentResponse::none();
		}
		match message.result {
			Ok(clip) => self.commit(message.channel, message.role, clip),
			Err(e) => self.fail(message.channel, message.role, e),
		}
	}

	/// Validated clip: hand it to the device
	fn commit(&mut self, kind: AudioChannel, role: HandleRole, clip: LoadedClip) -> ComponentResponse {
		let sink = match self.output.open(&clip) {
			Ok(sink) => sink,
			Err(e) => return self.fail(kind, role, e),
		};

		let (channel, output) = self.parts(kind);
		let (volume, rate, paused) = (channel.volume, channel.rate, channel.paused);
		let Some(handle) = channel.slot(role).as_mut() else {
			output.release(sink);
			return ComponentResponse::none();
		};
		handle.task = None;
		handle.sink = Some(sink);
		output.set_speed(sink, rate);

		let started = match role {
			HandleRole::Primary => {
				output.set_volume(sink, volume);
				if paused {
					handle.load_state = LoadState::Ready;
					Ok(())
				} else {
					output
						.play(sink)
						.map(|_| handle.load_state = LoadState::Playing)
				}
			}
			HandleRole::Next => {
				output.set_volume(sink, 0.0);
				handle.load_state = LoadState::Ready;
				Ok(())
			}
		};
		log::info!(
			"[Audio] {} {:?} ready: {} ({:?})",
			kind.as_str(),
			role,
			clip.url,
			clip.duration
		);
		handle.clip = Some(clip);

		if let Err(e) = started {
			return self.fail(kind, role, e);
		}
		self.plan_fade(kind);
		ComponentResponse::none()
	}

	fn fail(&mut self, kind: AudioChannel, role: HandleRole, error: AudioError) -> ComponentResponse {
		let max_retries = self.settings.max_retries;
		let backoff = self.settings.retry_backoff();
		let (channel, output) = self.parts(kind);
		if role == HandleRole::Next {
			channel.fade_at = None;
		}
		let Some(handle) = channel.slot(role).as_mut() else {
			return ComponentResponse::none();
		};
		handle.task = None;
		if let Some(sink) = handle.sink.take() {
			output.release(sink);
		}
		handle.clip = None;
		handle.load_state = LoadState::Error;

		if error.is_retryable() && handle.retry_count < max_retries {
			handle.retry_count += 1;
			log::warn!(
				"[Audio] {} load failed ({}), retry {}/{} in {:?}",
				kind.as_str(),
				error,
				handle.retry_count,
				max_retries,
				backoff
			);
			return ComponentResponse::schedule(
				Event::Audio(AudioEvent::Retry {
					channel: kind,
					role,
					request_id: handle.request_id,
				}),
				backoff,
			);
		}

		log::error!(
			"[Audio] Giving up on {} after {} attempt(s): {}",
			handle.requested_url,
			handle.retry_count + 1,
			error
		);
		handle.gave_up = true;
		let mut response = ComponentResponse::emit(Event::Notify(Notification::AudioError(
			AudioErrorReport::new(kind, &handle.requested_url, &error),
		)));
		if role == HandleRole::Primary {
			response.merge(self.start_queued_cue(kind));
		}
		response
	}

	fn retry(&mut self, kind: AudioChannel, role: HandleRole, request_id: u64) -> ComponentResponse {
		match self.channel(kind).get(role) {
			Some(h) if h.request_id == request_id && h.load_state == LoadState::Error => {
				self.attempt(kind, role)
			}
			_ => {
				log::trace!("[Audio] Dropping stale retry {}", request_id);
				ComponentResponse::none()
			}
		}
	}

	/// Manual retry: failed handles start over with a fresh budget
	fn retry_failed(&mut self) -> ComponentResponse {
		let mut response = ComponentResponse::none();
		for kind in [AudioChannel::Narration, AudioChannel::Music] {
			for role in [HandleRole::Primary, HandleRole::Next] {
				let failed = self
					.channel(kind)
					.get(role)
					.is_some_and(|h| h.load_state == LoadState::Error);
				if !failed {
					continue;
				}
				self.next_request += 1;
				let request_id = self.next_request;
				let (channel, _) = self.parts(kind);
				if let Some(handle) = channel.slot(role).as_mut() {
					log::info!("[Audio] Retrying {}", handle.requested_url);
					handle.retry_count = 0;
					handle.request_id = request_id;
				}
				response.merge(self.attempt(kind, role));
			}
		}
		response
	}

	fn set_paused(&mut self, kind: AudioChannel, paused: bool) -> ComponentResponse {
		let mut failures = vec![];
		{
			let (channel, output) = self.parts(kind);
			if channel.paused == paused {
				return ComponentResponse::none();
			}
			channel.paused = paused;
			let fading = channel.crossfade.is_some();
			for role in [HandleRole::Primary, HandleRole::Next] {
				if role == HandleRole::Next && !fading {
					continue;
				}
				let Some(handle) = channel.slot(role).as_mut() else {
					continue;
				};
				let Some(sink) = handle.sink else {
					continue;
				};
				if paused {
					if handle.load_state == LoadState::Playing {
						output.pause(sink);
					}
				} else if matches!(handle.load_state, LoadState::Playing | LoadState::Ready) {
					match output.play(sink) {
						Ok(()) => handle.load_state = LoadState::Playing,
						Err(e) => failures.push((role, e)),
					}
				}
			}
			log::debug!(
				"[Audio] {} {}",
				kind.as_str(),
				if paused { "paused" } else { "resumed" }
			);
		}
		let mut response = ComponentResponse::none();
		for (role, e) in failures {
			response.merge(self.fail(kind, role, e));
		}
		response
	}

	/// Decide when the primary should start fading into the preloaded track
	fn plan_fade(&mut self, kind: AudioChannel) {
		if kind != AudioChannel::Music {
			return;
		}
		let window = self.settings.crossfade_window();
		let (channel, output) = self.parts(kind);
		if channel.crossfade.is_some() {
			return;
		}
		let next_ready = channel
			.next
			.as_ref()
			.is_some_and(|h| h.load_state == LoadState::Ready);
		let Some(primary) = channel.primary.as_ref() else {
			return;
		};
		channel.fade_at = match (next_ready, primary.duration(), primary.sink) {
			(true, Some(duration), Some(sink)) => {
				let position = output.position(sink).unwrap_or_default();
				crossfade::plan(duration, position, window)
			}
			_ => None,
		};
		if let Some(at) = channel.fade_at {
			log::debug!("[Audio] Crossfade planned at {:?}", at);
		}
	}

	fn monitor_narration(&mut self) -> ComponentResponse {
		let kind = AudioChannel::Narration;
		let (channel, output) = self.parts(kind);
		if channel.paused {
			return ComponentResponse::none();
		}
		let Some(handle) = channel.primary.as_mut() else {
			return self.start_queued_cue(kind);
		};
		if handle.load_state != LoadState::Playing {
			return ComponentResponse::none();
		}
		let Some(sink) = handle.sink else {
			return ComponentResponse::none();
		};
		if !output.is_finished(sink) {
			return ComponentResponse::none();
		}
		log::debug!("[Audio] Cue finished: {}", handle.requested_url);
		output.release(sink);
		handle.sink = None;
		handle.clip = None;
		handle.load_state = LoadState::Idle;
		self.start_queued_cue(kind)
	}

	fn monitor_music(&mut self, now: Instant) -> ComponentResponse {
		let lead = self.settings.loop_lead();
		let (channel, output) = self.parts(AudioChannel::Music);
		if channel.paused {
			return ComponentResponse::none();
		}
		let Some(primary) = channel.primary.as_ref() else {
			return ComponentResponse::none();
		};
		if primary.load_state != LoadState::Playing {
			return ComponentResponse::none();
		}
		let Some(sink) = primary.sink else {
			return ComponentResponse::none();
		};
		let duration = primary.duration();
		let position = output.position(sink).unwrap_or_default();
		let next_ready = channel
			.next
			.as_ref()
			.is_some_and(|h| h.load_state == LoadState::Ready);
		let fading = channel.crossfade.is_some();

		if output.is_finished(sink) {
			if fading || next_ready {
				return self.promote(AudioChannel::Music);
			}
			if channel.looping {
				return self.restart_loop();
			}
			log::info!("[Audio] Music finished");
			output.release(sink);
			if let Some(primary) = channel.primary.as_mut() {
				primary.sink = None;
				primary.load_state = LoadState::Idle;
			}
			return ComponentResponse::none();
		}

		if !fading && next_ready && channel.fade_at.is_some_and(|at| position >= at) {
			return self.begin_crossfade(now, position);
		}

		if channel.looping && channel.next.is_none() && !fading {
			if let Some(duration) = duration {
				if duration > lead && position + lead >= duration {
					match output.seek(sink, Duration::ZERO) {
						Ok(()) => log::debug!("[Audio] Looping music"),
						Err(e) => log::warn!("[Audio] Loop seek failed: {}", e),
					}
				}
			}
		}
		ComponentResponse::none()
	}

	/// Loop fallback when the track ran out before the near-end seek
	fn restart_loop(&mut self) -> ComponentResponse {
		let (channel, output) = self.parts(AudioChannel::Music);
		let (volume, rate) = (channel.volume, channel.rate);
		let Some(handle) = channel.primary.as_mut() else {
			return ComponentResponse::none();
		};
		let Some(clip) = handle.clip.clone() else {
			return ComponentResponse::none();
		};
		if let Some(old) = handle.sink.take() {
			output.release(old);
		}
		let restarted = output.open(&clip).and_then(|sink| {
			handle.sink = Some(sink);
			output.set_speed(sink, rate);
			output.set_volume(sink, volume);
			output.play(sink)
		});
		match restarted {
			Ok(()) => {
				log::debug!("[Audio] Restarted loop: {}", clip.url);
				ComponentResponse::none()
			}
			Err(e) => self.fail(AudioChannel::Music, HandleRole::Primary, e),
		}
	}

	fn begin_crossfade(&mut self, now: Instant, position: Duration) -> ComponentResponse {
		self.next_fade += 1;
		let fade_id = self.next_fade;
		let window = self.settings.crossfade_window();
		let step = self.settings.crossfade_step();
		let (channel, output) = self.parts(AudioChannel::Music);
		let Some(next) = channel.next.as_mut() else {
			return ComponentResponse::none();
		};
		let Some(sink) = next.sink else {
			return ComponentResponse::none();
		};
		output.set_volume(sink, 0.0);
		if let Err(e) = output.play(sink) {
			return self.fail(AudioChannel::Music, HandleRole::Next, e);
		}
		next.load_state = LoadState::Playing;
		log::info!("[Audio] Crossfading into {}", next.requested_url);
		channel.crossfade = Some(Crossfade::new(fade_id, now, window, position));
		ComponentResponse::schedule(
			Event::Audio(AudioEvent::CrossfadeStep {
				channel: AudioChannel::Music,
				fade_id,
			}),
			step,
		)
	}

	fn step_crossfade(&mut self, kind: AudioChannel, fade_id: u64, now: Instant) -> ComponentResponse {
		let step = self.settings.crossfade_step();
		let (channel, output) = self.parts(kind);
		let Some(fade) = channel.crossfade.as_ref().filter(|f| f.fade_id == fade_id) else {
			log::trace!("[Audio] Dropping stale crossfade step {}", fade_id);
			return ComponentResponse::none();
		};
		let (outgoing, incoming) = fade.volumes(now, channel.volume);
		let done = fade.is_done(now);
		if let Some(sink) = channel.sink(HandleRole::Primary) {
			output.set_volume(sink, outgoing);
		}
		if let Some(sink) = channel.sink(HandleRole::Next) {
			output.set_volume(sink, incoming);
		}
		if done {
			return self.promote(kind);
		}
		ComponentResponse::schedule(
			Event::Audio(AudioEvent::CrossfadeStep {
				channel: kind,
				fade_id,
			}),
			step,
		)
	}

	/// Retire the primary and let the preloaded track take over
	fn promote(&mut self, kind: AudioChannel) -> ComponentResponse {
		let (channel, output) = self.parts(kind);
		if let Some(mut old) = channel.primary.take() {
			old.release(output);
		}
		channel.crossfade = None;
		channel.fade_at = None;

		let mut failure = None;
		if let Some(mut next) = channel.next.take() {
			if let Some(sink) = next.sink {
				output.set_volume(sink, channel.volume);
				output.set_speed(sink, channel.rate);
				if next.load_state == LoadState::Ready {
					match output.play(sink) {
						Ok(()) => next.load_state = LoadState::Playing,
						Err(e) => failure = Some(e),
					}
				}
			}
			log::info!("[Audio] Now playing {}", next.requested_url);
			channel.primary = Some(next);
		}
		if let Some(e) = failure {
			return self.fail(kind, HandleRole::Primary, e);
		}

		let manual = std::mem::take(&mut channel.next_is_manual);
		let upcoming = channel.playlist.as_mut().and_then(|p| {
			// A hand-queued track plays between playlist entries
			if !manual {
				p.advance();
			}
			p.peek_next().map(str::to_owned)
		});
		match upcoming {
			Some(url) => self.load(kind, HandleRole::Next, &url),
			None => ComponentResponse::none(),
		}
	}

	fn cancel_crossfade(&mut self, kind: AudioChannel) {
		let (channel, output) = self.parts(kind);
		let Some(fade) = channel.crossfade.take() else {
			return;
		};
		if let Some(sink) = channel.sink(HandleRole::Primary) {
			output.set_volume(sink, channel.volume);
		}
		if let Some(next) = channel.next.as_mut() {
			if let Some(sink) = next.sink {
				output.pause(sink);
				output.set_volume(sink, 0.0);
				if let Err(e) = output.seek(sink, Duration::ZERO) {
					log::warn!("[Audio] Could not rewind {}: {}", next.requested_url, e);
				}
				next.load_state = LoadState::Ready;
			}
		}
		log::info!("[Audio] Crossfade {} cancelled", fade.fade_id);
	}

	fn music(&mut self, command: &MusicCommand) -> ComponentResponse {
		let kind = AudioChannel::Music;
		match command {
			MusicCommand::Play { url } => {
				log::info!("[Audio] Play music {}", url);
				self.release_channel(kind);
				self.load(kind, HandleRole::Primary, url)
			}
			MusicCommand::Queue { url } => {
				log::info!("[Audio] Queue music {}", url);
				self.cancel_crossfade(kind);
				self.music.fade_at = None;
				self.music.next_is_manual = true;
				self.load(kind, HandleRole::Next, url)
			}
			MusicCommand::Playlist { urls, shuffle } => {
				self.release_channel(kind);
				let playlist = Playlist::new(urls.clone(), *shuffle);
				if playlist.is_empty() {
					log::warn!("[Audio] Playlist is empty");
					return ComponentResponse::none();
				}
				log::info!(
					"[Audio] Playlist of {} track(s), shuffle={}",
					playlist.len(),
					shuffle
				);
				let first = playlist.current().map(str::to_owned);
				let second = playlist.peek_next().map(str::to_owned);
				self.music.playlist = Some(playlist);
				let mut response = ComponentResponse::none();
				if let Some(first) = first {
					response.merge(self.load(kind, HandleRole::Primary, &first));
				}
				if let Some(second) = second {
					response.merge(self.load(kind, HandleRole::Next, &second));
				}
				response
			}
			MusicCommand::Stop => {
				log::info!("[Audio] Stop music");
				self.cancel_crossfade(kind);
				self.release_channel(kind);
				ComponentResponse::none()
			}
			MusicCommand::Seek { position } => {
				self.seek_music(*position);
				ComponentResponse::none()
			}
			MusicCommand::SetLoop { enabled } => {
				log::info!("[Audio] Music loop {}", if *enabled { "on" } else { "off" });
				self.music.looping = *enabled;
				ComponentResponse::none()
			}
			MusicCommand::SetVolume { volume } => {
				let volume = volume.clamp(0.0, 1.0);
				self.music.volume = volume;
				// A running fade picks the new target up on its next step
				if self.music.crossfade.is_none() {
					if let Some(sink) = self.music.sink(HandleRole::Primary) {
						self.output.set_volume(sink, volume);
					}
				}
				ComponentResponse::none()
			}
			MusicCommand::SetRate { rate } => {
				let rate = rate.clamp(MIN_RATE, MAX_RATE);
				self.music.rate = rate;
				for role in [HandleRole::Primary, HandleRole::Next] {
					if let Some(sink) = self.music.sink(role) {
						self.output.set_speed(sink, rate);
					}
				}
				ComponentResponse::none()
			}
		}
	}

	fn seek_music(&mut self, position: Duration) {
		let backward = self
			.music
			.crossfade
			.as_ref()
			.is_some_and(|f| position < f.start_position);
		if backward {
			self.cancel_crossfade(AudioChannel::Music);
		}
		let Some(sink) = self.music.sink(HandleRole::Primary) else {
			log::debug!("[Audio] Seek ignored: no music playing");
			return;
		};
		if let Err(e) = self.output.seek(sink, position) {
			log::warn!("[Audio] {}", e);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{RecordingOutput, Script, ScriptedLoader};

	const CUE: &str = "https://cdn.test/in.mp3";
	const CUE_B: &str = "https://cdn.test/out.mp3";
	const SONG_A: &str = "https://music.test/a.mp3";
	const SONG_B: &str = "https://music.test/b.mp3";
	const SONG_C: &str = "https://music.test/c.mp3";

	struct Rig {
		audio: AudioDelivery,
		loader: Arc<ScriptedLoader>,
		out: RecordingOutput,
	}

	fn rig() -> Rig {
		let loader = ScriptedLoader::new();
		let out = RecordingOutput::default();
		let audio = AudioDelivery::new(&Settings::default(), loader.clone(), Box::new(out.clone()));
		Rig { audio, loader, out }
	}

	impl Rig {
		fn send(&mut self, event: AudioEvent, now: Instant) -> ComponentResponse {
			self.audio.handle(&Event::Audio(event), now)
		}

		fn music(&mut self, command: MusicCommand, now: Instant) -> ComponentResponse {
			self.send(AudioEvent::Music(command), now)
		}

		/// Let spawned probes finish, then collect their results
		async fn settle(&mut self, now: Instant) -> ComponentResponse {
			tokio::time::sleep(Duration::from_millis(5)).await;
			self.audio.poll(now)
		}

		fn volume_of(&self, url: &str) -> f32 {
			self.out.log.borrow().sink_for(url).map(|(_, s)| s.volume).unwrap()
		}

		fn set_position(&self, url: &str, position: Duration) {
			self.out.log.borrow_mut().sink_mut(url).unwrap().position = position;
		}
	}

	fn reports(response: &ComponentResponse) -> Vec<AudioErrorReport> {
		response
			.events
			.iter()
			.filter_map(|e| match e {
				Event::Notify(Notification::AudioError(report)) => Some(report.clone()),
				_ => None,
			})
			.collect()
	}

	fn cue(url: &str) -> AudioEvent {
		AudioEvent::PlayCue {
			channel: AudioChannel::Narration,
			url: url.into(),
		}
	}

	#[tokio::test(start_paused = true)]
	async fn validated_cue_plays_at_channel_volume() {
		let mut rig = rig();
		let now = Instant::now();
		rig.send(cue(CUE), now);
		let handle = rig.audio.playback(AudioChannel::Narration, HandleRole::Primary).unwrap();
		assert_eq!(handle.load_state, LoadState::Validating);
		assert!(rig.out.log.borrow().sinks.is_empty());

		let response = rig.settle(now).await;
		assert!(reports(&response).is_empty());
		assert_eq!(rig.out.log.borrow().playing(), vec![CUE]);
		assert_eq!(rig.volume_of(CUE), 1.0);
		let handle = rig.audio.playback(AudioChannel::Narration, HandleRole::Primary).unwrap();
		assert_eq!(handle.load_state, LoadState::Playing);
		assert_eq!(handle.resolved_url.as_deref(), Some(CUE));
	}

	fn queue_cue(url: &str) -> AudioEvent {
		AudioEvent::QueueCue {
			channel: AudioChannel::Narration,
			url: url.into(),
		}
	}

	#[tokio::test(start_paused = true)]
	async fn queued_cue_waits_for_the_current_one_to_finish() {
		let mut rig = rig();
		let now = Instant::now();
		rig.send(cue(CUE), now);
		rig.send(queue_cue(CUE_B), now);
		rig.settle(now).await;
		assert_eq!(rig.out.log.borrow().playing(), vec![CUE]);
		assert_eq!(rig.loader.calls_for(CUE_B), 0);

		rig.out.log.borrow_mut().sink_mut(CUE).unwrap().finished = true;
		rig.audio.poll(now);
		rig.settle(now).await;
		assert_eq!(rig.out.log.borrow().playing(), vec![CUE_B]);
		let handle = rig.audio.playback(AudioChannel::Narration, HandleRole::Primary).unwrap();
		assert_eq!(handle.requested_url, CUE_B);
		assert_eq!(handle.load_state, LoadState::Playing);
	}

	#[tokio::test(start_paused = true)]
	async fn queued_cue_starts_at_once_on_a_quiet_channel() {
		let mut rig = rig();
		let now = Instant::now();
		rig.send(queue_cue(CUE_B), now);
		rig.settle(now).await;
		assert_eq!(rig.out.log.borrow().playing(), vec![CUE_B]);
	}

	#[tokio::test(start_paused = true)]
	async fn queued_cue_follows_a_cue_that_gave_up() {
		let mut rig = rig();
		let now = Instant::now();
		rig.loader.script(CUE, Script::Fail(AudioError::invalid(CUE, "bad")));
		rig.send(cue(CUE), now);
		rig.send(queue_cue(CUE_B), now);
		let response = rig.settle(now).await;
		assert_eq!(reports(&response).len(), 1);
		rig.settle(now).await;
		assert_eq!(rig.out.log.borrow().playing(), vec![CUE_B]);
	}

	#[tokio::test(start_paused = true)]
	async fn new_cue_drops_the_queued_one() {
		let mut rig = rig();
		let now = Instant::now();
		rig.send(cue(CUE), now);
		rig.send(queue_cue(CUE_B), now);
		rig.send(cue(CUE), now);
		rig.settle(now).await;
		rig.out.log.borrow_mut().sink_mut(CUE).unwrap().finished = true;
		rig.audio.poll(now);
		rig.settle(now).await;
		assert_eq!(rig.loader.calls_for(CUE_B), 0);
		assert!(rig.out.log.borrow().playing().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn hanging_probe_is_retried_then_reported_once() {
		let mut rig = rig();
		let now = Instant::now();
		rig.loader.script(CUE, Script::Hang);
		let mut seen = reports(&rig.send(cue(CUE), now));

		for _ in 0..5 {
			tokio::time::sleep(Duration::from_secs(9)).await;
			let polled = rig.audio.poll(now);
			seen.extend(reports(&polled));
			for (event, delay) in polled.scheduled {
				assert_eq!(delay, Duration::from_secs(1));
				seen.extend(reports(&rig.audio.handle(&event, now)));
			}
		}

		assert_eq!(rig.loader.calls_for(CUE), 3);
		assert_eq!(seen.len(), 1);
		assert_eq!(seen[0].kind, AudioErrorKind::Unreachable);
		assert_eq!(seen[0].channel, AudioChannel::Narration);
		let handle = rig.audio.playback(AudioChannel::Narration, HandleRole::Primary).unwrap();
		assert_eq!(handle.load_state, LoadState::Error);
		assert_eq!(handle.retry_count, 2);
		assert!(rig.out.log.borrow().sinks.is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn transient_failure_recovers_on_retry() {
		let mut rig = rig();
		let now = Instant::now();
		rig.loader.script(CUE, Script::FailTimes(1, None));
		rig.send(cue(CUE), now);
		let failed = rig.settle(now).await;
		assert!(reports(&failed).is_empty());
		assert_eq!(failed.scheduled.len(), 1);

		rig.audio.handle(&failed.scheduled[0].0, now);
		rig.settle(now).await;
		let handle = rig.audio.playback(AudioChannel::Narration, HandleRole::Primary).unwrap();
		assert_eq!(handle.load_state, LoadState::Playing);
		assert_eq!(handle.retry_count, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn long_download_is_not_held_to_the_probe_timeout() {
		let mut rig = rig();
		let now = Instant::now();
		let minutes = Some(Duration::from_secs(240));
		rig.loader.script(SONG_A, Script::SlowBody(Duration::from_secs(30), minutes));
		rig.music(MusicCommand::Play { url: SONG_A.into() }, now);

		tokio::time::sleep(Duration::from_secs(29)).await;
		let pending = rig.audio.poll(now);
		assert!(pending.is_empty());
		let handle = rig.audio.playback(AudioChannel::Music, HandleRole::Primary).unwrap();
		assert_eq!(handle.load_state, LoadState::Validating);

		tokio::time::sleep(Duration::from_secs(2)).await;
		let response = rig.audio.poll(now);
		assert!(reports(&response).is_empty());
		assert!(response.scheduled.is_empty());
		assert_eq!(rig.loader.calls_for(SONG_A), 1);
		let handle = rig.audio.playback(AudioChannel::Music, HandleRole::Primary).unwrap();
		assert_eq!(handle.load_state, LoadState::Playing);
		assert_eq!(handle.duration(), minutes);
	}

	#[tokio::test(start_paused = true)]
	async fn stalled_download_fails_after_the_fetch_budget() {
		let mut rig = rig();
		let now = Instant::now();
		rig.loader.script(SONG_A, Script::SlowBody(Duration::from_secs(600), None));
		rig.music(MusicCommand::Play { url: SONG_A.into() }, now);

		tokio::time::sleep(Duration::from_secs(121)).await;
		let response = rig.audio.poll(now);
		assert_eq!(response.scheduled.len(), 1);
		let handle = rig.audio.playback(AudioChannel::Music, HandleRole::Primary).unwrap();
		assert_eq!(handle.load_state, LoadState::Error);
		assert_eq!(handle.retry_count, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn new_cue_replaces_the_old_one() {
		let mut rig = rig();
		let now = Instant::now();
		rig.loader.script(CUE, Script::Hang);
		rig.send(cue(CUE), now);
		rig.send(cue(CUE_B), now);
		tokio::time::sleep(Duration::from_secs(20)).await;
		let response = rig.audio.poll(now);

		assert!(reports(&response).is_empty());
		assert!(response.scheduled.is_empty());
		assert_eq!(rig.out.log.borrow().playing(), vec![CUE_B]);
		let handle = rig.audio.playback(AudioChannel::Narration, HandleRole::Primary).unwrap();
		assert_eq!(handle.requested_url, CUE_B);
	}

	#[tokio::test(start_paused = true)]
	async fn release_cancels_in_flight_probe() {
		let mut rig = rig();
		let now = Instant::now();
		rig.loader.script(CUE, Script::Hang);
		rig.send(cue(CUE), now);
		rig.send(
			AudioEvent::Release {
				channel: AudioChannel::Narration,
			},
			now,
		);
		tokio::time::sleep(Duration::from_secs(20)).await;
		let response = rig.audio.poll(now);
		assert!(response.is_empty());
		assert!(rig.audio.playback(AudioChannel::Narration, HandleRole::Primary).is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn rejection_is_reported_without_retry_and_retry_audio_recovers() {
		let mut rig = rig();
		let now = Instant::now();
		rig.out.log.borrow_mut().reject = true;
		rig.send(cue(CUE), now);
		let response = rig.settle(now).await;
		let seen = reports(&response);
		assert_eq!(seen.len(), 1);
		assert_eq!(seen[0].kind, AudioErrorKind::PlaybackRejected);
		assert!(response.scheduled.is_empty());
		assert_eq!(rig.loader.calls_for(CUE), 1);

		rig.out.log.borrow_mut().reject = false;
		rig.send(AudioEvent::RetryFailed, now);
		rig.settle(now).await;
		let handle = rig.audio.playback(AudioChannel::Narration, HandleRole::Primary).unwrap();
		assert_eq!(handle.load_state, LoadState::Playing);
		assert_eq!(handle.retry_count, 0);
		assert_eq!(rig.loader.calls_for(CUE), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn invalid_url_exhausts_retries() {
		let mut rig = rig();
		let now = Instant::now();
		let mut response = rig.send(cue("ftp://cdn.test/in.mp3"), now);
		let mut seen = vec![];
		while let Some((event, _)) = response.scheduled.pop() {
			response = rig.audio.handle(&event, now);
			seen.extend(reports(&response));
		}
		assert_eq!(seen.len(), 1);
		assert_eq!(seen[0].kind, AudioErrorKind::InvalidUrl);
		assert!(rig.loader.calls().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn paused_narration_waits_for_resume() {
		let mut rig = rig();
		let now = Instant::now();
		let pause = |paused| AudioEvent::SetPaused {
			channel: AudioChannel::Narration,
			paused,
		};
		rig.send(pause(true), now);
		rig.send(cue(CUE), now);
		rig.settle(now).await;
		assert!(rig.out.log.borrow().playing().is_empty());
		assert_eq!(
			rig.audio
				.playback(AudioChannel::Narration, HandleRole::Primary)
				.unwrap()
				.load_state,
			LoadState::Ready
		);

		rig.send(pause(false), now);
		assert_eq!(rig.out.log.borrow().playing(), vec![CUE]);
	}

	#[tokio::test(start_paused = true)]
	async fn narration_release_leaves_music_alone() {
		let mut rig = rig();
		let now = Instant::now();
		rig.music(MusicCommand::Play { url: SONG_A.into() }, now);
		rig.send(cue(CUE), now);
		rig.settle(now).await;
		assert_eq!(rig.out.log.borrow().playing().len(), 2);

		rig.send(
			AudioEvent::Release {
				channel: AudioChannel::Narration,
			},
			now,
		);
		assert_eq!(rig.out.log.borrow().playing(), vec![SONG_A]);
		assert_eq!(rig.volume_of(SONG_A), 0.6);
	}

	/// Two 60s songs, the first at its fade point
	async fn fading_rig(t0: Instant) -> (Rig, ComponentResponse) {
		let mut rig = rig();
		let minute = Some(Duration::from_secs(60));
		rig.loader.script(SONG_A, Script::Ok(minute));
		rig.loader.script(SONG_B, Script::Ok(minute));
		rig.music(MusicCommand::Play { url: SONG_A.into() }, t0);
		rig.music(MusicCommand::Queue { url: SONG_B.into() }, t0);
		rig.settle(t0).await;
		assert_eq!(rig.out.log.borrow().playing(), vec![SONG_A]);

		rig.set_position(SONG_A, Duration::from_secs(54));
		assert!(rig.audio.poll(t0).is_empty());
		rig.set_position(SONG_A, Duration::from_secs(55));
		let response = rig.audio.poll(t0);
		assert!(rig.audio.is_crossfading());
		(rig, response)
	}

	#[tokio::test(start_paused = true)]
	async fn crossfade_keeps_volumes_in_range_and_hands_over() {
		let t0 = Instant::now();
		let (mut rig, mut response) = fading_rig(t0).await;
		assert_eq!(rig.out.log.borrow().playing(), vec![SONG_A, SONG_B]);

		let mut now = t0;
		let mut steps = 0;
		while let Some((event, delay)) = response.scheduled.pop() {
			assert_eq!(delay, Duration::from_millis(100));
			now += delay;
			response = rig.audio.handle(&event, now);
			steps += 1;
			assert!(steps <= 60);
		}
		assert_eq!(steps, 50);

		for (_, volume) in &rig.out.log.borrow().volumes {
			assert!((0.0..=0.6).contains(volume), "volume {}", volume);
		}
		assert!(!rig.audio.is_crossfading());
		assert_eq!(rig.out.log.borrow().playing(), vec![SONG_B]);
		assert_eq!(rig.volume_of(SONG_B), 0.6);
		let primary = rig.audio.playback(AudioChannel::Music, HandleRole::Primary).unwrap();
		assert_eq!(primary.requested_url, SONG_B);
		assert!(rig.audio.playback(AudioChannel::Music, HandleRole::Next).is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn seeking_back_cancels_the_crossfade() {
		let t0 = Instant::now();
		let (mut rig, response) = fading_rig(t0).await;
		let (step, _) = response.scheduled[0].clone();
		for i in 1..=10 {
			rig.audio.handle(&step, t0 + Duration::from_millis(100 * i));
		}
		assert!(rig.volume_of(SONG_A) < 0.6);

		rig.music(
			MusicCommand::Seek {
				position: Duration::from_secs(20),
			},
			t0,
		);
		assert!(!rig.audio.is_crossfading());
		assert_eq!(rig.volume_of(SONG_A), 0.6);
		assert_eq!(rig.volume_of(SONG_B), 0.0);
		assert_eq!(rig.out.log.borrow().playing(), vec![SONG_A]);
		let next = rig.audio.playback(AudioChannel::Music, HandleRole::Next).unwrap();
		assert_eq!(next.load_state, LoadState::Ready);

		// Steps from the cancelled fade are ignored
		let late = rig.audio.handle(&step, t0 + Duration::from_secs(2));
		assert!(late.is_empty());
		assert_eq!(rig.volume_of(SONG_A), 0.6);
	}

	#[tokio::test(start_paused = true)]
	async fn loop_restart_preserves_volume_and_rate() {
		let mut rig = rig();
		let now = Instant::now();
		rig.loader.script(SONG_A, Script::Ok(Some(Duration::from_secs(30))));
		rig.music(MusicCommand::SetLoop { enabled: true }, now);
		rig.music(MusicCommand::SetVolume { volume: 0.4 }, now);
		rig.music(MusicCommand::SetRate { rate: 1.5 }, now);
		rig.music(MusicCommand::Play { url: SONG_A.into() }, now);
		rig.settle(now).await;

		rig.set_position(SONG_A, Duration::from_millis(29_900));
		rig.audio.poll(now);
		{
			let log = rig.out.log.borrow();
			assert_eq!(log.seeks.last().map(|(_, p)| *p), Some(Duration::ZERO));
			let (_, sink) = log.sink_for(SONG_A).unwrap();
			assert_eq!(sink.volume, 0.4);
			assert_eq!(sink.speed, 1.5);
			assert!(sink.playing);
		}

		// Ran out anyway: reopen from the buffered clip
		rig.out.log.borrow_mut().sink_mut(SONG_A).unwrap().finished = true;
		rig.audio.poll(now);
		let log = rig.out.log.borrow();
		assert_eq!(log.released.len(), 1);
		let (_, sink) = log.sink_for(SONG_A).unwrap();
		assert_eq!((sink.volume, sink.speed, sink.playing), (0.4, 1.5, true));
		assert_eq!(rig.loader.calls_for(SONG_A), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn playlist_hands_off_and_preloads_the_following_track() {
		let mut rig = rig();
		let now = Instant::now();
		rig.music(
			MusicCommand::Playlist {
				urls: vec![SONG_A.into(), SONG_B.into(), SONG_C.into()],
				shuffle: false,
			},
			now,
		);
		rig.settle(now).await;
		assert_eq!(rig.out.log.borrow().playing(), vec![SONG_A]);
		assert_eq!(
			rig.audio
				.playback(AudioChannel::Music, HandleRole::Next)
				.unwrap()
				.load_state,
			LoadState::Ready
		);

		// Durations unknown: no crossfade, hard handoff at the end
		rig.out.log.borrow_mut().sink_mut(SONG_A).unwrap().finished = true;
		rig.audio.poll(now);
		assert_eq!(rig.out.log.borrow().playing(), vec![SONG_B]);
		rig.settle(now).await;
		assert_eq!(rig.loader.calls_for(SONG_C), 1);
		let next = rig.audio.playback(AudioChannel::Music, HandleRole::Next).unwrap();
		assert_eq!(next.requested_url, SONG_C);
	}

	#[tokio::test(start_paused = true)]
	async fn queued_track_plays_between_playlist_entries() {
		const EXTRA: &str = "https://cdn.test/extra.mp3";
		let mut rig = rig();
		let now = Instant::now();
		rig.music(
			MusicCommand::Playlist {
				urls: vec![SONG_A.into(), SONG_B.into(), SONG_C.into()],
				shuffle: false,
			},
			now,
		);
		rig.settle(now).await;
		rig.music(MusicCommand::Queue { url: EXTRA.into() }, now);
		rig.settle(now).await;

		rig.out.log.borrow_mut().sink_mut(SONG_A).unwrap().finished = true;
		rig.audio.poll(now);
		assert_eq!(rig.out.log.borrow().playing(), vec![EXTRA]);
		rig.settle(now).await;
		// The displaced entry comes back instead of being skipped
		let next = rig.audio.playback(AudioChannel::Music, HandleRole::Next).unwrap();
		assert_eq!(next.requested_url, SONG_B);

		rig.out.log.borrow_mut().sink_mut(EXTRA).unwrap().finished = true;
		rig.audio.poll(now);
		assert_eq!(rig.out.log.borrow().playing(), vec![SONG_B]);
		rig.settle(now).await;
		let next = rig.audio.playback(AudioChannel::Music, HandleRole::Next).unwrap();
		assert_eq!(next.requested_url, SONG_C);
	}

	#[tokio::test(start_paused = true)]
	async fn stop_music_releases_everything() {
		let t0 = Instant::now();
		let (mut rig, response) = fading_rig(t0).await;
		rig.music(MusicCommand::Stop, t0);
		assert!(rig.out.log.borrow().sinks.is_empty());
		assert!(rig.audio.playback(AudioChannel::Music, HandleRole::Primary).is_none());
		let (step, _) = response.scheduled[0].clone();
		assert!(rig.audio.handle(&step, t0 + Duration::from_secs(1)).is_empty());
	}
}
