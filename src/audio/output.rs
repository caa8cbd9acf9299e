use super::error::AudioError;
use super::loader::LoadedClip;
use cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use std::collections::HashMap;
use std::io::Cursor;
use std::time::Duration;

pub type SinkId = u64;

/// Device-facing side of audio delivery. Clips are opened paused and silent;
/// the caller decides when they become audible.
pub trait AudioOutput {
	fn open(&mut self, clip: &LoadedClip) -> Result<SinkId, AudioError>;
	fn play(&mut self, sink: SinkId) -> Result<(), AudioError>;
	fn pause(&mut self, sink: SinkId);
	fn release(&mut self, sink: SinkId);
	fn set_volume(&mut self, sink: SinkId, volume: f32);
	fn set_speed(&mut self, sink: SinkId, speed: f32);
	fn position(&self, sink: SinkId) -> Option<Duration>;
	fn seek(&mut self, sink: SinkId, position: Duration) -> Result<(), AudioError>;
	fn is_finished(&self, sink: SinkId) -> bool;
}

/// Enumerate all available output devices
pub fn output_device_names() -> Vec<String> {
	let host = cpal::default_host();
	let mut names = Vec::new();
	if let Ok(devices) = host.output_devices() {
		for device in devices {
			if let Ok(name) = device.name() {
				names.push(name);
			}
		}
	}
	log::info!("[Output] Enumerated {} audio output devices", names.len());
	for name in &names {
		log::debug!("[Output]   device: {}", name);
	}
	names
}

struct SinkEntry {
	sink: Sink,
	url: String,
}

pub struct RodioOutput {
	device_name: Option<String>,
	/// Stream must outlive every sink created from its handle
	stream: Option<(OutputStream, OutputStreamHandle)>,
	sinks: HashMap<SinkId, SinkEntry>,
	next_id: SinkId,
}

impl RodioOutput {
	pub fn new(device_name: Option<String>) -> Self {
		let mut output = Self {
			device_name,
			stream: None,
			sinks: HashMap::new(),
			next_id: 1,
		};
		output.stream = output.open_stream();
		output
	}

	pub fn is_active(&self) -> bool {
		self.stream.is_some()
	}

	fn open_stream(&self) -> Option<(OutputStream, OutputStreamHandle)> {
		match self.device_name.as_deref() {
			Some(name) => Self::open_named(name),
			None => Self::open_default(),
		}
	}

	fn open_default() -> Option<(OutputStream, OutputStreamHandle)> {
		match OutputStream::try_default() {
			Ok(stream) => {
				log::info!("[Output] Using default audio output");
				Some(stream)
			}
			Err(e) => {
				log::warn!("[Output] No default audio output: {}", e);
				None
			}
		}
	}

	fn open_named(name: &str) -> Option<(OutputStream, OutputStreamHandle)> {
		let host = cpal::default_host();
		let devices = match host.output_devices() {
			Ok(d) => d,
			Err(e) => {
				log::error!("[Output] Failed to enumerate devices: {}", e);
				return None;
			}
		};
		for device in devices {
			if device.name().is_ok_and(|n| n == name) {
				match OutputStream::try_from_device(&device) {
					Ok(stream) => {
						log::info!("[Output] Using audio device: {}", name);
						return Some(stream);
					}
					Err(e) => {
						log::error!("[Output] Failed to open '{}': {}", name, e);
						break;
					}
				}
			}
		}
		log::warn!("[Output] Device '{}' unavailable, falling back to default", name);
		Self::open_default()
	}

	fn entry(&self, sink: SinkId) -> Option<&SinkEntry> {
		self.sinks.get(&sink)
	}
}

impl AudioOutput for RodioOutput {
	fn open(&mut self, clip: &LoadedClip) -> Result<SinkId, AudioError> {
		if self.stream.is_none() {
			// Device may have appeared since the last attempt
			self.stream = self.open_stream();
		}
		let Some((_, handle)) = self.stream.as_ref() else {
			return Err(AudioError::rejected("no audio output device available"));
		};

		let sink = Sink::try_new(handle).map_err(|e| AudioError::rejected(e.to_string()))?;
		let source = Decoder::new(Cursor::new(clip.bytes.clone()))
			.map_err(|e| AudioError::unreachable(&clip.url, format!("undecodable audio: {}", e)))?;
		sink.pause();
		sink.set_volume(0.0);
		sink.append(source);

		let id = self.next_id;
		self.next_id += 1;
		self.sinks.insert(
			id,
			SinkEntry {
				sink,
				url: clip.url.clone(),
			},
		);
		log::debug!("[Output] Opened sink {} for {}", id, clip.url);
		Ok(id)
	}

	fn play(&mut self, sink: SinkId) -> Result<(), AudioError> {
		if self.stream.is_none() {
			return Err(AudioError::rejected("audio output device went away"));
		}
		let entry = self
			.entry(sink)
			.ok_or_else(|| AudioError::rejected(format!("sink {} is gone", sink)))?;
		entry.sink.play();
		Ok(())
	}

	fn pause(&mut self, sink: SinkId) {
		if let Some(entry) = self.entry(sink) {
			entry.sink.pause();
		}
	}

	fn release(&mut self, sink: SinkId) {
		if let Some(entry) = self.sinks.remove(&sink) {
			entry.sink.stop();
			log::debug!("[Output] Released sink {} ({})", sink, entry.url);
		}
	}

	fn set_volume(&mut self, sink: SinkId, volume: f32) {
		if let Some(entry) = self.entry(sink) {
			entry.sink.set_volume(volume.clamp(0.0, 1.0));
		}
	}

	fn set_speed(&mut self, sink: SinkId, speed: f32) {
		if let Some(entry) = self.entry(sink) {
			entry.sink.set_speed(speed);
		}
	}

	fn position(&self, sink: SinkId) -> Option<Duration> {
		self.entry(sink).map(|e| e.sink.get_pos())
	}

	fn seek(&mut self, sink: SinkId, position: Duration) -> Result<(), AudioError> {
		let entry = self
			.entry(sink)
			.ok_or_else(|| AudioError::rejected(format!("sink {} is gone", sink)))?;
		entry
			.sink
			.try_seek(position)
			.map_err(|e| AudioError::unreachable(&entry.url, format!("seek failed: {}", e)))
	}

	fn is_finished(&self, sink: SinkId) -> bool {
		self.entry(sink).is_none_or(|e| e.sink.empty())
	}
}
