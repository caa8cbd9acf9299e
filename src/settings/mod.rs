use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
	/// Pattern and voice library; defaults to the data directory
	#[serde(default)]
	pub store_path: Option<PathBuf>,
	#[serde(default)]
	pub audio: AudioSettings,
	#[serde(default)]
	pub storage: StorageSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
	#[serde(default = "default_probe_timeout_ms")]
	pub probe_timeout_ms: u64,
	/// Budget for the rest of the body once the probe succeeded
	#[serde(default = "default_fetch_timeout_ms")]
	pub fetch_timeout_ms: u64,
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
	#[serde(default = "default_retry_backoff_ms")]
	pub retry_backoff_ms: u64,
	#[serde(default = "default_crossfade_ms")]
	pub crossfade_ms: u64,
	#[serde(default = "default_crossfade_step_ms")]
	pub crossfade_step_ms: u64,
	#[serde(default = "default_loop_lead_ms")]
	pub loop_lead_ms: u64,
	#[serde(default = "default_narration_volume")]
	pub narration_volume: f32,
	#[serde(default = "default_music_volume")]
	pub music_volume: f32,
	#[serde(default)]
	pub output_device: Option<String>,
	#[serde(default = "default_user_agent")]
	pub user_agent: String,
}

fn default_probe_timeout_ms() -> u64 {
	8_000
}

fn default_fetch_timeout_ms() -> u64 {
	120_000
}

fn default_max_retries() -> u32 {
	2
}

fn default_retry_backoff_ms() -> u64 {
	1_000
}

fn default_crossfade_ms() -> u64 {
	5_000
}

fn default_crossfade_step_ms() -> u64 {
	100
}

fn default_loop_lead_ms() -> u64 {
	200
}

fn default_narration_volume() -> f32 {
	1.0
}

fn default_music_volume() -> f32 {
	0.6
}

fn default_user_agent() -> String {
	format!("Breathwork/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for AudioSettings {
	fn default() -> Self {
		Self {
			probe_timeout_ms: default_probe_timeout_ms(),
			fetch_timeout_ms: default_fetch_timeout_ms(),
			max_retries: default_max_retries(),
			retry_backoff_ms: default_retry_backoff_ms(),
			crossfade_ms: default_crossfade_ms(),
			crossfade_step_ms: default_crossfade_step_ms(),
			loop_lead_ms: default_loop_lead_ms(),
			narration_volume: default_narration_volume(),
			music_volume: default_music_volume(),
			output_device: None,
			user_agent: default_user_agent(),
		}
	}
}

impl AudioSettings {
	pub fn probe_timeout(&self) -> Duration {
		Duration::from_millis(self.probe_timeout_ms)
	}

	pub fn fetch_timeout(&self) -> Duration {
		Duration::from_millis(self.fetch_timeout_ms)
	}

	pub fn retry_backoff(&self) -> Duration {
		Duration::from_millis(self.retry_backoff_ms)
	}

	pub fn crossfade_window(&self) -> Duration {
		Duration::from_millis(self.crossfade_ms)
	}

	pub fn crossfade_step(&self) -> Duration {
		Duration::from_millis(self.crossfade_step_ms.max(1))
	}

	pub fn loop_lead(&self) -> Duration {
		Duration::from_millis(self.loop_lead_ms)
	}
}

/// Object storage whose URLs need rewriting to their public form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
	#[serde(default)]
	pub base_url: Option<String>,
	#[serde(default = "default_object_prefix")]
	pub object_prefix: String,
	#[serde(default = "default_public_segment")]
	pub public_segment: String,
}

fn default_object_prefix() -> String {
	"/storage/v1/object/".into()
}

fn default_public_segment() -> String {
	"public".into()
}

impl Default for StorageSettings {
	fn default() -> Self {
		Self {
			base_url: None,
			object_prefix: default_object_prefix(),
			public_segment: default_public_segment(),
		}
	}
}

fn project_dirs() -> Option<ProjectDirs> {
	ProjectDirs::from("", "", "breathwork")
}

impl Settings {
	pub fn default_path() -> Option<PathBuf> {
		project_dirs().map(|dirs| dirs.config_dir().join("settings.toml"))
	}

	/// Missing file means defaults; a malformed one is an error
	pub fn load(path: &Path) -> anyhow::Result<Self> {
		if !path.exists() {
			log::info!("[Settings] {} not found, using defaults", path.display());
			return Ok(Self::default());
		}
		let text = std::fs::read_to_string(path)
			.with_context(|| format!("reading {}", path.display()))?;
		let settings: Settings =
			toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
		log::info!("[Settings] Loaded {}", path.display());
		Ok(settings)
	}

	pub fn load_default() -> anyhow::Result<Self> {
		match Self::default_path() {
			Some(path) => Self::load(&path),
			None => {
				log::warn!("[Settings] No config directory available, using defaults");
				Ok(Self::default())
			}
		}
	}

	pub fn save(&self, path: &Path) -> anyhow::Result<()> {
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(path, toml::to_string_pretty(self)?)?;
		Ok(())
	}

	pub fn store_path(&self) -> PathBuf {
		self.store_path.clone().unwrap_or_else(|| {
			project_dirs()
				.map(|dirs| dirs.data_dir().join("library.json"))
				.unwrap_or_else(|| PathBuf::from("library.json"))
		})
	}
}
