//! Test doubles for the network probe and the output device.

use crate::audio::loader::{ClipLoader, LoadedClip, PendingClip};
use crate::audio::output::{AudioOutput, SinkId};
use crate::audio::AudioError;
use async_trait::async_trait;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug)]
pub(crate) enum Script {
	Ok(Option<Duration>),
	Fail(AudioError),
	/// Never resolves; only the caller's timeout ends it
	Hang,
	/// Fail this many times, then succeed
	FailTimes(u32, Option<Duration>),
	/// Probe succeeds at once, the body takes this long to arrive
	SlowBody(Duration, Option<Duration>),
}

#[derive(Default)]
pub(crate) struct ScriptedLoader {
	scripts: Mutex<HashMap<String, Script>>,
	calls: Mutex<Vec<String>>,
}

impl ScriptedLoader {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn script(&self, url: &str, script: Script) {
		self.scripts.lock().unwrap().insert(url.to_owned(), script);
	}

	pub fn calls(&self) -> Vec<String> {
		self.calls.lock().unwrap().clone()
	}

	pub fn calls_for(&self, url: &str) -> usize {
		self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
	}
}

#[async_trait]
impl ClipLoader for ScriptedLoader {
	async fn probe(&self, url: &str) -> Result<Box<dyn PendingClip>, AudioError> {
		self.calls.lock().unwrap().push(url.to_owned());
		let outcome = {
			let mut scripts = self.scripts.lock().unwrap();
			match scripts.get_mut(url) {
				None => Script::Ok(None),
				Some(Script::FailTimes(n, _)) if *n > 0 => {
					*n -= 1;
					Script::Fail(AudioError::unreachable(url, "scripted failure"))
				}
				Some(Script::FailTimes(_, duration)) => Script::Ok(*duration),
				Some(other) => other.clone(),
			}
		};
		let (delay, duration) = match outcome {
			Script::Ok(duration) => (Duration::ZERO, duration),
			Script::SlowBody(delay, duration) => (delay, duration),
			Script::Fail(e) => return Err(e),
			Script::Hang => std::future::pending().await,
			Script::FailTimes(..) => unreachable!(),
		};
		Ok(Box::new(ScriptedClip {
			clip: LoadedClip::new(url, vec![0; 16], duration),
			delay,
		}))
	}
}

struct ScriptedClip {
	clip: LoadedClip,
	delay: Duration,
}

#[async_trait]
impl PendingClip for ScriptedClip {
	async fn finish(self: Box<Self>) -> Result<LoadedClip, AudioError> {
		if !self.delay.is_zero() {
			tokio::time::sleep(self.delay).await;
		}
		Ok(self.clip)
	}
}

#[derive(Debug, Clone)]
pub(crate) struct FakeSink {
	pub url: String,
	pub volume: f32,
	pub speed: f32,
	pub playing: bool,
	pub position: Duration,
	pub finished: bool,
}

#[derive(Default)]
pub(crate) struct OutputLog {
	pub sinks: HashMap<SinkId, FakeSink>,
	pub released: Vec<SinkId>,
	/// Every volume change, in order
	pub volumes: Vec<(SinkId, f32)>,
	pub seeks: Vec<(SinkId, Duration)>,
	/// Refuse to open, like a host that blocks autoplay
	pub reject: bool,
	next_id: SinkId,
}

impl OutputLog {
	pub fn sink_for(&self, url: &str) -> Option<(SinkId, &FakeSink)> {
		self.sinks
			.iter()
			.filter(|(_, s)| s.url == url)
			.max_by_key(|(id, _)| **id)
			.map(|(id, s)| (*id, s))
	}

	pub fn sink_mut(&mut self, url: &str) -> Option<&mut FakeSink> {
		let id = self.sink_for(url)?.0;
		self.sinks.get_mut(&id)
	}

	pub fn playing(&self) -> Vec<String> {
		let mut urls: Vec<_> = self
			.sinks
			.values()
			.filter(|s| s.playing)
			.map(|s| s.url.clone())
			.collect();
		urls.sort();
		urls
	}
}

#[derive(Clone, Default)]
pub(crate) struct RecordingOutput {
	pub log: Rc<RefCell<OutputLog>>,
}

impl AudioOutput for RecordingOutput {
	fn open(&mut self, clip: &LoadedClip) -> Result<SinkId, AudioError> {
		let mut log = self.log.borrow_mut();
		if log.reject {
			return Err(AudioError::rejected("output blocked"));
		}
		log.next_id += 1;
		let id = log.next_id;
		log.sinks.insert(
			id,
			FakeSink {
				url: clip.url.clone(),
				volume: 0.0,
				speed: 1.0,
				playing: false,
				position: Duration::ZERO,
				finished: false,
			},
		);
		Ok(id)
	}

	fn play(&mut self, sink: SinkId) -> Result<(), AudioError> {
		let mut log = self.log.borrow_mut();
		if log.reject {
			return Err(AudioError::rejected("output blocked"));
		}
		match log.sinks.get_mut(&sink) {
			Some(s) => {
				s.playing = true;
				Ok(())
			}
			None => Err(AudioError::rejected("gone")),
		}
	}

	fn pause(&mut self, sink: SinkId) {
		if let Some(s) = self.log.borrow_mut().sinks.get_mut(&sink) {
			s.playing = false;
		}
	}

	fn release(&mut self, sink: SinkId) {
		let mut log = self.log.borrow_mut();
		log.sinks.remove(&sink);
		log.released.push(sink);
	}

	fn set_volume(&mut self, sink: SinkId, volume: f32) {
		let mut log = self.log.borrow_mut();
		if let Some(s) = log.sinks.get_mut(&sink) {
			s.volume = volume;
			log.volumes.push((sink, volume));
		}
	}

	fn set_speed(&mut self, sink: SinkId, speed: f32) {
		if let Some(s) = self.log.borrow_mut().sinks.get_mut(&sink) {
			s.speed = speed;
		}
	}

	fn position(&self, sink: SinkId) -> Option<Duration> {
		self.log.borrow().sinks.get(&sink).map(|s| s.position)
	}

	fn seek(&mut self, sink: SinkId, position: Duration) -> Result<(), AudioError> {
		let mut log = self.log.borrow_mut();
		match log.sinks.get_mut(&sink) {
			Some(s) => {
				s.position = position;
				s.finished = false;
				log.seeks.push((sink, position));
				Ok(())
			}
			None => Err(AudioError::rejected("gone")),
		}
	}

	fn is_finished(&self, sink: SinkId) -> bool {
		self.log.borrow().sinks.get(&sink).is_none_or(|s| s.finished)
	}
}
