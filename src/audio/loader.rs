use super::error::AudioError;
use async_trait::async_trait;
use rodio::Source;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

/// Largest clip we are willing to buffer in memory
const MAX_CLIP_BYTES: usize = 64 * 1024 * 1024;
/// How much of the body the probe waits for before trying to decode
const PROBE_BYTES: usize = 256 * 1024;

/// Fully fetched audio that decoded successfully
#[derive(Clone)]
pub struct LoadedClip {
	pub url: String,
	pub bytes: Arc<[u8]>,
	pub duration: Option<Duration>,
}

impl LoadedClip {
	pub fn new(url: &str, bytes: Vec<u8>, duration: Option<Duration>) -> Self {
		Self {
			url: url.to_owned(),
			bytes: bytes.into(),
			duration,
		}
	}
}

impl fmt::Debug for LoadedClip {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LoadedClip")
			.field("url", &self.url)
			.field("bytes", &self.bytes.len())
			.field("duration", &self.duration)
			.finish()
	}
}

/// A clip whose head is known to decode; the rest may still be in flight
#[async_trait]
pub trait PendingClip: Send {
	async fn finish(self: Box<Self>) -> Result<LoadedClip, AudioError>;
}

/// Turns a normalized URL into a playable clip in two stages.
///
/// `probe` must not succeed until enough data arrived to start playback.
/// The caller bounds `probe` with the probe timeout and `finish` with the
/// separate fetch budget.
#[async_trait]
pub trait ClipLoader: Send + Sync {
	async fn probe(&self, url: &str) -> Result<Box<dyn PendingClip>, AudioError>;
}

pub struct HttpLoader {
	client: reqwest::Client,
}

impl HttpLoader {
	pub fn new(user_agent: &str) -> anyhow::Result<Self> {
		let client = reqwest::Client::builder().user_agent(user_agent).build()?;
		Ok(Self { client })
	}
}

#[async_trait]
impl ClipLoader for HttpLoader {
	async fn probe(&self, url: &str) -> Result<Box<dyn PendingClip>, AudioError> {
		log::debug!("[Audio] Probing {}", url);
		let response = self
			.client
			.get(url)
			.send()
			.await
			.map_err(|e| AudioError::unreachable(url, e.to_string()))?;

		let status = response.status();
		if !status.is_success() {
			return Err(AudioError::unreachable(url, format!("HTTP status {}", status)));
		}
		if response
			.content_length()
			.is_some_and(|len| len > MAX_CLIP_BYTES as u64)
		{
			return Err(AudioError::unreachable(url, "clip exceeds size limit"));
		}

		let mut pending = HttpPendingClip {
			url: url.to_owned(),
			response: Some(response),
			bytes: Vec::new(),
		};
		while pending.bytes.len() < PROBE_BYTES && pending.read_chunk().await? {}

		let head = pending.bytes.clone();
		let probe_url = url.to_owned();
		tokio::task::spawn_blocking(move || check_playable(&probe_url, head))
			.await
			.map_err(|e| AudioError::unreachable(url, e.to_string()))??;
		log::debug!(
			"[Audio] Playable after {} bytes: {}",
			pending.bytes.len(),
			url
		);
		Ok(Box::new(pending))
	}
}

struct HttpPendingClip {
	url: String,
	/// `None` once the body has been read to the end
	response: Option<reqwest::Response>,
	bytes: Vec<u8>,
}

impl HttpPendingClip {
	/// `Ok(false)` at end of body
	async fn read_chunk(&mut self) -> Result<bool, AudioError> {
		let Some(response) = self.response.as_mut() else {
			return Ok(false);
		};
		let chunk = response
			.chunk()
			.await
			.map_err(|e| AudioError::unreachable(&self.url, e.to_string()))?;
		let Some(chunk) = chunk else {
			self.response = None;
			return Ok(false);
		};
		if self.bytes.len() + chunk.len() > MAX_CLIP_BYTES {
			return Err(AudioError::unreachable(&self.url, "clip exceeds size limit"));
		}
		self.bytes.extend_from_slice(&chunk);
		Ok(true)
	}
}

#[async_trait]
impl PendingClip for HttpPendingClip {
	async fn finish(self: Box<Self>) -> Result<LoadedClip, AudioError> {
		let mut pending = *self;
		while pending.read_chunk().await? {}
		log::debug!("[Audio] Fetched {} bytes from {}", pending.bytes.len(), pending.url);

		let HttpPendingClip { url, bytes, .. } = pending;
		let bytes: Arc<[u8]> = bytes.into();
		let probe_url = url.clone();
		let probe_bytes = bytes.clone();
		let duration = tokio::task::spawn_blocking(move || decode_probe(&probe_url, probe_bytes))
			.await
			.map_err(|e| AudioError::unreachable(&url, e.to_string()))??;

		Ok(LoadedClip {
			url,
			bytes,
			duration,
		})
	}
}

/// The head decodes and yields at least one sample
pub fn check_playable(url: &str, head: Vec<u8>) -> Result<(), AudioError> {
	let mut decoder = rodio::Decoder::new(Cursor::new(head))
		.map_err(|e| AudioError::unreachable(url, format!("undecodable audio: {}", e)))?;
	match decoder.next() {
		Some(_) => Ok(()),
		None => Err(AudioError::unreachable(url, "audio contains no samples")),
	}
}

/// Check the whole clip decodes and work out how long it plays
pub fn decode_probe(url: &str, bytes: Arc<[u8]>) -> Result<Option<Duration>, AudioError> {
	let decoder = rodio::Decoder::new(Cursor::new(bytes))
		.map_err(|e| AudioError::unreachable(url, format!("undecodable audio: {}", e)))?;
	let duration = match decoder.total_duration() {
		Some(duration) => duration,
		None => {
			// Containers without a length header: count samples instead
			let channels = decoder.channels();
			let rate = decoder.sample_rate();
			samples_duration(decoder.count() as u64, channels, rate)
		}
	};
	if duration.is_zero() {
		return Err(AudioError::unreachable(url, "audio contains no samples"));
	}
	Ok(Some(duration))
}

fn samples_duration(samples: u64, channels: u16, rate: u32) -> Duration {
	let per_second = channels.max(1) as u64 * rate.max(1) as u64;
	Duration::from_secs_f64(samples as f64 / per_second as f64)
}
