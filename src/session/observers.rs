use crate::audio::AudioErrorReport;
use crate::reactor::{Notification, PhaseChange, PhaseProgress, SessionSummary};

type Callback<T> = Box<dyn FnMut(&T)>;

/// Registered listeners, called in registration order
#[derive(Default)]
pub struct Observers {
	phase_change: Vec<Callback<PhaseChange>>,
	progress: Vec<Callback<PhaseProgress>>,
	completed: Vec<Callback<SessionSummary>>,
	audio_error: Vec<Callback<AudioErrorReport>>,
}

impl Observers {
	pub fn on_phase_change(&mut self, callback: impl FnMut(&PhaseChange) + 'static) {
		self.phase_change.push(Box::new(callback));
	}

	pub fn on_progress(&mut self, callback: impl FnMut(&PhaseProgress) + 'static) {
		self.progress.push(Box::new(callback));
	}

	pub fn on_completed(&mut self, callback: impl FnMut(&SessionSummary) + 'static) {
		self.completed.push(Box::new(callback));
	}

	pub fn on_audio_error(&mut self, callback: impl FnMut(&AudioErrorReport) + 'static) {
		self.audio_error.push(Box::new(callback));
	}

	pub fn notify(&mut self, notification: &Notification) {
		match notification {
			Notification::PhaseChanged(change) => fan_out(&mut self.phase_change, change),
			Notification::Progress(progress) => fan_out(&mut self.progress, progress),
			Notification::Completed(summary) => fan_out(&mut self.completed, summary),
			Notification::AudioError(report) => {
				log::warn!("[Session] {} ({})", report.user_message(), report.detail);
				fan_out(&mut self.audio_error, report)
			}
		}
	}
}

fn fan_out<T>(callbacks: &mut [Callback<T>], value: &T) {
	for callback in callbacks.iter_mut() {
		callback(value);
	}
}
