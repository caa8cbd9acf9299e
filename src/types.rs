use serde::{Deserialize, Serialize};

/// Breathing session phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BreathingPhase {
	#[default]
	Idle,
	Inhale,
	Hold1,
	Exhale,
	Hold2,
	Completed,
}

impl BreathingPhase {
	/// Phases that count down and carry a cue
	pub fn is_timed(&self) -> bool {
		matches!(
			self,
			BreathingPhase::Inhale
				| BreathingPhase::Hold1
				| BreathingPhase::Exhale
				| BreathingPhase::Hold2
		)
	}

	/// Voice-profile slot a phase maps onto. Both holds share one slot.
	pub fn cue_slot(&self) -> Option<CueSlot> {
		match self {
			BreathingPhase::Inhale => Some(CueSlot::Inhale),
			BreathingPhase::Hold1 | BreathingPhase::Hold2 => Some(CueSlot::Hold),
			BreathingPhase::Exhale => Some(CueSlot::Exhale),
			BreathingPhase::Idle | BreathingPhase::Completed => None,
		}
	}

	pub fn label(&self) -> &'static str {
		match self {
			BreathingPhase::Idle => "Ready",
			BreathingPhase::Inhale => "Breathe in",
			BreathingPhase::Hold1 | BreathingPhase::Hold2 => "Hold",
			BreathingPhase::Exhale => "Breathe out",
			BreathingPhase::Completed => "Done",
		}
	}
}

/// Abstract narration slots of a voice profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CueSlot {
	Inhale,
	Hold,
	Exhale,
}

/// Independent audio channels. Never crossfaded against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioChannel {
	Narration,
	Music,
}

impl AudioChannel {
	pub fn as_str(&self) -> &'static str {
		match self {
			AudioChannel::Narration => "narration",
			AudioChannel::Music => "music",
		}
	}
}

/// Logical role of a playback handle within a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleRole {
	Primary,
	Next,
}

/// Lifecycle of a playback handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
	#[default]
	Idle,
	Validating,
	Ready,
	Playing,
	Error,
}
