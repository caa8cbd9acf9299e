use crate::types::BreathingPhase;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected configuration. Always raised before a session starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
	#[error("pattern '{0}' has no inhale duration")]
	ZeroInhale(String),
	#[error("pattern '{0}' has no exhale duration")]
	ZeroExhale(String),
	#[error("pattern '{0}' must run at least one cycle")]
	ZeroCycles(String),
	#[error("voice profile '{0}' has no inhale cue")]
	MissingInhaleCue(String),
	#[error("voice profile '{0}' has no exhale cue")]
	MissingExhaleCue(String),
	#[error("voice profile has no name")]
	UnnamedVoice,
}

/// Durations in whole seconds. A hold of 0 means the hold phase is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreathingPattern {
	pub id: String,
	#[serde(default)]
	pub name: String,
	pub inhale: u32,
	#[serde(default)]
	pub hold1: u32,
	pub exhale: u32,
	#[serde(default)]
	pub hold2: u32,
	pub cycles: u32,
	#[serde(default)]
	pub inhale_url: Option<String>,
	#[serde(default)]
	pub hold1_url: Option<String>,
	#[serde(default)]
	pub exhale_url: Option<String>,
	#[serde(default)]
	pub hold2_url: Option<String>,
	#[serde(default)]
	pub start_url: Option<String>,
	#[serde(default)]
	pub end_url: Option<String>,
}

impl BreathingPattern {
	pub fn new(id: &str, inhale: u32, hold1: u32, exhale: u32, hold2: u32, cycles: u32) -> Self {
		Self {
			id: id.to_owned(),
			name: id.to_owned(),
			inhale,
			hold1,
			exhale,
			hold2,
			cycles,
			inhale_url: None,
			hold1_url: None,
			exhale_url: None,
			hold2_url: None,
			start_url: None,
			end_url: None,
		}
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.inhale == 0 {
			return Err(ConfigError::ZeroInhale(self.id.clone()));
		}
		if self.exhale == 0 {
			return Err(ConfigError::ZeroExhale(self.id.clone()));
		}
		if self.cycles == 0 {
			return Err(ConfigError::ZeroCycles(self.id.clone()));
		}
		Ok(())
	}

	/// Configured length of a phase in seconds
	pub fn duration(&self, phase: BreathingPhase) -> u32 {
		match phase {
			BreathingPhase::Inhale => self.inhale,
			BreathingPhase::Hold1 => self.hold1,
			BreathingPhase::Exhale => self.exhale,
			BreathingPhase::Hold2 => self.hold2,
			BreathingPhase::Idle | BreathingPhase::Completed => 0,
		}
	}

	/// Pattern-native cue URL for a phase, as stored
	pub fn phase_url(&self, phase: BreathingPhase) -> Option<&String> {
		match phase {
			BreathingPhase::Inhale => self.inhale_url.as_ref(),
			BreathingPhase::Hold1 => self.hold1_url.as_ref(),
			BreathingPhase::Exhale => self.exhale_url.as_ref(),
			BreathingPhase::Hold2 => self.hold2_url.as_ref(),
			BreathingPhase::Idle | BreathingPhase::Completed => None,
		}
	}
}

/// Named narrator mapping cue slots to URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceProfile {
	pub name: String,
	#[serde(default)]
	pub inhale: Option<String>,
	#[serde(default)]
	pub hold: Option<String>,
	#[serde(default)]
	pub exhale: Option<String>,
	#[serde(default)]
	pub start: Option<String>,
	#[serde(default)]
	pub end: Option<String>,
}

impl VoiceProfile {
	/// A missing hold cue is legitimate; inhale and exhale are required.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if is_blank(Some(&self.name)) {
			return Err(ConfigError::UnnamedVoice);
		}
		if is_blank(self.inhale.as_ref()) {
			return Err(ConfigError::MissingInhaleCue(self.name.clone()));
		}
		if is_blank(self.exhale.as_ref()) {
			return Err(ConfigError::MissingExhaleCue(self.name.clone()));
		}
		Ok(())
	}
}

/// Which narration source a session uses
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VoiceSelection {
	#[default]
	PatternNative,
	Profile(VoiceProfile),
	Silent,
}

impl VoiceSelection {
	pub fn validate(&self) -> Result<(), ConfigError> {
		match self {
			VoiceSelection::Profile(profile) => profile.validate(),
			VoiceSelection::PatternNative | VoiceSelection::Silent => Ok(()),
		}
	}

	pub fn label(&self) -> &str {
		match self {
			VoiceSelection::PatternNative => "pattern",
			VoiceSelection::Profile(profile) => &profile.name,
			VoiceSelection::Silent => "silent",
		}
	}
}

impl From<Option<VoiceProfile>> for VoiceSelection {
	fn from(profile: Option<VoiceProfile>) -> Self {
		match profile {
			Some(profile) => VoiceSelection::Profile(profile),
			None => VoiceSelection::PatternNative,
		}
	}
}

/// Absent and whitespace-only URLs both mean "no cue"
pub fn is_blank(url: Option<&String>) -> bool {
	url.is_none_or(|u| u.trim().is_empty())
}

/// Patterns seeded into a fresh library
pub fn presets() -> Vec<BreathingPattern> {
	let mut relax = BreathingPattern::new("4-7-8", 4, 7, 8, 0, 4);
	relax.name = "Relaxing 4-7-8".into();
	let mut box_breathing = BreathingPattern::new("box", 4, 4, 4, 4, 6);
	box_breathing.name = "Box breathing".into();
	let mut coherent = BreathingPattern::new("coherent", 5, 0, 5, 0, 12);
	coherent.name = "Coherent breathing".into();
	vec![relax, box_breathing, coherent]
}
