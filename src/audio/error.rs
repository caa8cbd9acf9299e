use crate::types::AudioChannel;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioErrorKind {
	InvalidUrl,
	/// Timeout, network failure or undecodable data
	Unreachable,
	/// The host refused to start output; needs user action, not a retry
	PlaybackRejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioError {
	#[error("invalid audio URL '{url}': {reason}")]
	InvalidUrl { url: String, reason: String },
	#[error("audio at '{url}' is unreachable: {reason}")]
	Unreachable { url: String, reason: String },
	#[error("playback rejected: {0}")]
	PlaybackRejected(String),
}

impl AudioError {
	pub fn invalid(url: &str, reason: impl Into<String>) -> Self {
		AudioError::InvalidUrl {
			url: url.to_owned(),
			reason: reason.into(),
		}
	}

	pub fn unreachable(url: &str, reason: impl Into<String>) -> Self {
		AudioError::Unreachable {
			url: url.to_owned(),
			reason: reason.into(),
		}
	}

	pub fn rejected(reason: impl Into<String>) -> Self {
		AudioError::PlaybackRejected(reason.into())
	}

	pub fn kind(&self) -> AudioErrorKind {
		match self {
			AudioError::InvalidUrl { .. } => AudioErrorKind::InvalidUrl,
			AudioError::Unreachable { .. } => AudioErrorKind::Unreachable,
			AudioError::PlaybackRejected(_) => AudioErrorKind::PlaybackRejected,
		}
	}

	/// Automatic retries only make sense when the next attempt could differ
	pub fn is_retryable(&self) -> bool {
		!matches!(self, AudioError::PlaybackRejected(_))
	}
}

/// Terminal failure as seen by observers. One per failed cue attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioErrorReport {
	pub channel: AudioChannel,
	pub url: String,
	pub kind: AudioErrorKind,
	pub detail: String,
}

impl AudioErrorReport {
	pub fn new(channel: AudioChannel, url: &str, error: &AudioError) -> Self {
		Self {
			channel,
			url: url.to_owned(),
			kind: error.kind(),
			detail: error.to_string(),
		}
	}

	/// Actionable text for the UI, one per category
	pub fn user_message(&self) -> &'static str {
		match self.kind {
			AudioErrorKind::InvalidUrl => "This audio file has an invalid address.",
			AudioErrorKind::Unreachable => {
				"Audio could not be loaded. Check your connection and tap retry."
			}
			AudioErrorKind::PlaybackRejected => "Tap anywhere to enable sound.",
		}
	}
}
