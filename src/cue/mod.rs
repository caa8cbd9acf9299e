//! Phase to cue URL mapping.
//!
//! Everything here is a pure function of its inputs. `None` means
//! "play nothing" and is never an error.

use crate::pattern::{BreathingPattern, VoiceSelection, is_blank};
use crate::types::{BreathingPhase, CueSlot};

fn usable(url: Option<&String>) -> Option<&str> {
	if is_blank(url) {
		None
	} else {
		url.map(|u| u.trim())
	}
}

/// Cue for entering `phase`.
///
/// A voice profile collapses both holds onto its single `hold` slot, while
/// pattern-native URLs keep `hold1` and `hold2` apart.
pub fn resolve<'a>(
	phase: BreathingPhase,
	voice: &'a VoiceSelection,
	pattern: &'a BreathingPattern,
) -> Option<&'a str> {
	match voice {
		VoiceSelection::Silent => None,
		VoiceSelection::Profile(profile) => {
			let url = match phase.cue_slot()? {
				CueSlot::Inhale => profile.inhale.as_ref(),
				CueSlot::Hold => profile.hold.as_ref(),
				CueSlot::Exhale => profile.exhale.as_ref(),
			};
			usable(url)
		}
		VoiceSelection::PatternNative => usable(pattern.phase_url(phase)),
	}
}

/// Cue announcing the session start: profile first, then pattern.
pub fn resolve_session_start<'a>(
	voice: &'a VoiceSelection,
	pattern: &'a BreathingPattern,
) -> Option<&'a str> {
	match voice {
		VoiceSelection::Silent => None,
		VoiceSelection::Profile(profile) => {
			usable(profile.start.as_ref()).or_else(|| usable(pattern.start_url.as_ref()))
		}
		VoiceSelection::PatternNative => usable(pattern.start_url.as_ref()),
	}
}

/// Cue played once the last cycle completes: profile first, then pattern.
pub fn resolve_session_end<'a>(
	voice: &'a VoiceSelection,
	pattern: &'a BreathingPattern,
) -> Option<&'a str> {
	match voice {
		VoiceSelection::Silent => None,
		VoiceSelection::Profile(profile) => {
			usable(profile.end.as_ref()).or_else(|| usable(pattern.end_url.as_ref()))
		}
		VoiceSelection::PatternNative => usable(pattern.end_url.as_ref()),
	}
}
