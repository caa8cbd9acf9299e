//! Single authoritative transition table for a breathing session.

use crate::pattern::{BreathingPattern, VoiceSelection};
use crate::types::BreathingPhase;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
	pub phase: BreathingPhase,
	/// 1-based, never above `pattern.cycles`
	pub cycle_index: u32,
	pub seconds_remaining: u32,
	pub phase_progress: f32,
	pub selected_voice: VoiceSelection,
	pub completed: bool,
	pub last_audio_error: bool,
}

impl SessionState {
	pub fn initial(pattern: Option<&BreathingPattern>, voice: VoiceSelection) -> Self {
		Self {
			phase: BreathingPhase::Idle,
			cycle_index: 1,
			seconds_remaining: pattern.map_or(0, |p| p.inhale),
			phase_progress: 0.0,
			selected_voice: voice,
			completed: false,
			last_audio_error: false,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
	Start,
	Tick,
	Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
	Entered(BreathingPhase),
	Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
	Enter {
		phase: BreathingPhase,
		cycle_index: u32,
	},
	Complete,
}

/// Where a phase leads once its countdown hits zero.
///
/// Zero-length holds are omitted outright, never entered and left.
pub fn successor(phase: BreathingPhase, cycle_index: u32, pattern: &BreathingPattern) -> Option<Step> {
	let boundary = || {
		if cycle_index < pattern.cycles {
			Step::Enter {
				phase: BreathingPhase::Inhale,
				cycle_index: cycle_index + 1,
			}
		} else {
			Step::Complete
		}
	};
	let within = |phase| Step::Enter { phase, cycle_index };

	match phase {
		BreathingPhase::Idle => Some(Step::Enter {
			phase: BreathingPhase::Inhale,
			cycle_index: 1,
		}),
		BreathingPhase::Inhale if pattern.hold1 > 0 => Some(within(BreathingPhase::Hold1)),
		BreathingPhase::Inhale | BreathingPhase::Hold1 => Some(within(BreathingPhase::Exhale)),
		BreathingPhase::Exhale if pattern.hold2 > 0 => Some(within(BreathingPhase::Hold2)),
		BreathingPhase::Exhale | BreathingPhase::Hold2 => Some(boundary()),
		BreathingPhase::Completed => None,
	}
}

fn enter(
	mut state: SessionState,
	pattern: &BreathingPattern,
	phase: BreathingPhase,
	cycle_index: u32,
) -> (SessionState, Option<Effect>) {
	state.phase = phase;
	state.cycle_index = cycle_index;
	state.seconds_remaining = pattern.duration(phase);
	state.phase_progress = 0.0;
	(state, Some(Effect::Entered(phase)))
}

/// Pure reducer: same inputs, same outputs, no side effects
pub fn reduce(
	state: &SessionState,
	pattern: &BreathingPattern,
	action: Action,
) -> (SessionState, Option<Effect>) {
	match action {
		Action::Reset => (
			SessionState::initial(Some(pattern), state.selected_voice.clone()),
			None,
		),
		Action::Start => {
			let fresh = SessionState::initial(Some(pattern), state.selected_voice.clone());
			enter(fresh, pattern, BreathingPhase::Inhale, 1)
		}
		Action::Tick => {
			if !state.phase.is_timed() {
				return (state.clone(), None);
			}
			let mut next = state.clone();
			next.seconds_remaining = next.seconds_remaining.saturating_sub(1);
			if next.seconds_remaining > 0 {
				return (next, None);
			}
			match successor(next.phase, next.cycle_index, pattern) {
				Some(Step::Enter { phase, cycle_index }) => enter(next, pattern, phase, cycle_index),
				Some(Step::Complete) => {
					next.phase = BreathingPhase::Completed;
					next.completed = true;
					next.phase_progress = 1.0;
					(next, Some(Effect::Completed))
				}
				None => (next, None),
			}
		}
	}
}
