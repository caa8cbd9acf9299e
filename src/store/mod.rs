use crate::pattern::{self, BreathingPattern, ConfigError, VoiceProfile};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
	#[error(transparent)]
	Invalid(#[from] ConfigError),
	#[error("library I/O failed: {0}")]
	Io(#[from] std::io::Error),
	#[error("library file is malformed: {0}")]
	Format(#[from] serde_json::Error),
}

pub trait PatternRepository: Send + Sync {
	fn patterns(&self) -> Vec<BreathingPattern>;
	fn pattern(&self, id: &str) -> Option<BreathingPattern>;
	/// Insert or replace by id
	fn save_pattern(&self, pattern: BreathingPattern) -> Result<(), StoreError>;
	/// `Ok(false)` when nothing had that id
	fn delete_pattern(&self, id: &str) -> Result<bool, StoreError>;
}

pub trait VoiceProfileRepository: Send + Sync {
	fn voices(&self) -> Vec<VoiceProfile>;
	fn voice(&self, name: &str) -> Option<VoiceProfile>;
	fn save_voice(&self, voice: VoiceProfile) -> Result<(), StoreError>;
	fn delete_voice(&self, name: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Library {
	#[serde(default)]
	patterns: IndexMap<String, BreathingPattern>,
	#[serde(default)]
	voices: IndexMap<String, VoiceProfile>,
}

impl Library {
	fn seeded() -> Self {
		let mut library = Self::default();
		for preset in pattern::presets() {
			library.patterns.insert(preset.id.clone(), preset);
		}
		library
	}
}

/// Patterns and voice profiles in one pretty-printed JSON file
pub struct JsonStore {
	path: PathBuf,
	library: Mutex<Library>,
}

impl JsonStore {
	/// A missing file starts from the built-in presets
	pub fn open(path: &Path) -> Result<Self, StoreError> {
		let library = if path.exists() {
			let text = std::fs::read_to_string(path)?;
			let library: Library = serde_json::from_str(&text)?;
			log::info!(
				"[Store] Loaded {} pattern(s) and {} voice(s) from {}",
				library.patterns.len(),
				library.voices.len(),
				path.display()
			);
			library
		} else {
			log::info!("[Store] {} not found, seeding presets", path.display());
			Library::seeded()
		};
		Ok(Self {
			path: path.to_owned(),
			library: Mutex::new(library),
		})
	}

	/// Presets only, never written to disk
	pub fn in_memory() -> Self {
		Self {
			path: PathBuf::new(),
			library: Mutex::new(Library::seeded()),
		}
	}

	fn lock(&self) -> MutexGuard<'_, Library> {
		self.library.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// Apply `change` to a copy, write it, and only then make it visible.
	/// `change` returns whether anything changed; nothing is written if not.
	fn update(&self, change: impl FnOnce(&mut Library) -> bool) -> Result<bool, StoreError> {
		let mut library = self.lock();
		let mut updated = library.clone();
		if !change(&mut updated) {
			return Ok(false);
		}
		self.persist(&updated)?;
		*library = updated;
		Ok(true)
	}

	fn persist(&self, library: &Library) -> Result<(), StoreError> {
		if self.path.as_os_str().is_empty() {
			return Ok(());
		}
		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(&self.path, serde_json::to_string_pretty(library)?)?;
		log::debug!("[Store] Wrote {}", self.path.display());
		Ok(())
	}
}

impl PatternRepository for JsonStore {
	fn patterns(&self) -> Vec<BreathingPattern> {
		self.lock().patterns.values().cloned().collect()
	}

	fn pattern(&self, id: &str) -> Option<BreathingPattern> {
		self.lock().patterns.get(id).cloned()
	}

	fn save_pattern(&self, pattern: BreathingPattern) -> Result<(), StoreError> {
		pattern.validate()?;
		log::info!("[Store] Saving pattern '{}'", pattern.id);
		self.update(|library| {
			library.patterns.insert(pattern.id.clone(), pattern);
			true
		})?;
		Ok(())
	}

	fn delete_pattern(&self, id: &str) -> Result<bool, StoreError> {
		let deleted = self.update(|library| library.patterns.shift_remove(id).is_some())?;
		if deleted {
			log::info!("[Store] Deleted pattern '{}'", id);
		}
		Ok(deleted)
	}
}

impl VoiceProfileRepository for JsonStore {
	fn voices(&self) -> Vec<VoiceProfile> {
		self.lock().voices.values().cloned().collect()
	}

	fn voice(&self, name: &str) -> Option<VoiceProfile> {
		self.lock().voices.get(name).cloned()
	}

	fn save_voice(&self, voice: VoiceProfile) -> Result<(), StoreError> {
		voice.validate()?;
		log::info!("[Store] Saving voice '{}'", voice.name);
		self.update(|library| {
			library.voices.insert(voice.name.clone(), voice);
			true
		})?;
		Ok(())
	}

	fn delete_voice(&self, name: &str) -> Result<bool, StoreError> {
		let deleted = self.update(|library| library.voices.shift_remove(name).is_some())?;
		if deleted {
			log::info!("[Store] Deleted voice '{}'", name);
		}
		Ok(deleted)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn voice(name: &str) -> VoiceProfile {
		VoiceProfile {
			name: name.into(),
			inhale: Some("https://voice.test/in.mp3".into()),
			hold: None,
			exhale: Some("https://voice.test/out.mp3".into()),
			start: None,
			end: None,
		}
	}

	#[test]
	fn missing_file_is_seeded_with_presets() {
		let dir = tempfile::tempdir().unwrap();
		let store = JsonStore::open(&dir.path().join("library.json")).unwrap();
		let ids: Vec<_> = store.patterns().into_iter().map(|p| p.id).collect();
		assert_eq!(ids, vec!["4-7-8", "box", "coherent"]);
		assert!(store.voices().is_empty());
	}

	#[test]
	fn saved_entries_survive_reopen_in_order() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested").join("library.json");
		{
			let store = JsonStore::open(&path).unwrap();
			store
				.save_pattern(BreathingPattern::new("slow", 6, 2, 8, 2, 3))
				.unwrap();
			store.save_voice(voice("Noor")).unwrap();
			store.save_voice(voice("Ava")).unwrap();
			assert!(store.delete_pattern("box").unwrap());
			assert!(!store.delete_pattern("box").unwrap());
		}
		let store = JsonStore::open(&path).unwrap();
		let ids: Vec<_> = store.patterns().into_iter().map(|p| p.id).collect();
		assert_eq!(ids, vec!["4-7-8", "coherent", "slow"]);
		let names: Vec<_> = store.voices().into_iter().map(|v| v.name).collect();
		assert_eq!(names, vec!["Noor", "Ava"]);
		assert_eq!(store.pattern("slow").unwrap().exhale, 8);
	}

	#[test]
	fn invalid_entries_are_refused() {
		let store = JsonStore::in_memory();
		let err = store
			.save_pattern(BreathingPattern::new("bad", 4, 0, 0, 0, 1))
			.unwrap_err();
		assert!(matches!(err, StoreError::Invalid(ConfigError::ZeroExhale(_))));
		assert!(store.pattern("bad").is_none());

		let mut nameless = voice("x");
		nameless.name = "  ".into();
		assert!(store.save_voice(nameless).is_err());
	}

	#[test]
	fn failed_write_leaves_the_library_untouched() {
		let dir = tempfile::tempdir().unwrap();
		let blocker = dir.path().join("not-a-dir");
		std::fs::write(&blocker, "").unwrap();
		let store = JsonStore::open(&blocker.join("library.json")).unwrap();

		let err = store
			.save_pattern(BreathingPattern::new("new", 4, 0, 4, 0, 2))
			.unwrap_err();
		assert!(matches!(err, StoreError::Io(_)));
		assert!(store.pattern("new").is_none());

		assert!(store.save_voice(voice("Noor")).is_err());
		assert!(store.voices().is_empty());

		assert!(store.delete_pattern("box").is_err());
		assert!(store.pattern("box").is_some());
	}

	#[test]
	fn malformed_file_is_an_error() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("library.json");
		std::fs::write(&path, "{ not json").unwrap();
		assert!(matches!(JsonStore::open(&path), Err(StoreError::Format(_))));
	}
}
