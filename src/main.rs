use anyhow::Context;
use breathwork::audio::{HttpLoader, RodioOutput, output_device_names};
use breathwork::settings::Settings;
use breathwork::store::{JsonStore, PatternRepository, VoiceProfileRepository};
use breathwork::types::{AudioChannel, HandleRole, LoadState};
use breathwork::SessionController;
use clap::Parser;
use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;

const FRAME: Duration = Duration::from_millis(16);
/// How long the closing cue may keep the process alive
const END_CUE_GRACE: Duration = Duration::from_secs(15);

#[derive(Parser)]
#[command(version, about = "Guided breathing sessions with narrated cues")]
struct Cli {
	/// Saved pattern id
	#[arg(short, long, default_value = "4-7-8")]
	pattern: String,
	/// Saved voice profile name; pattern cues are used when omitted
	#[arg(short, long)]
	voice: Option<String>,
	/// Background music URL; repeat for a playlist
	#[arg(short, long)]
	music: Vec<String>,
	#[arg(long)]
	shuffle: bool,
	#[arg(long)]
	loop_music: bool,
	#[arg(short, long)]
	config: Option<PathBuf>,
	/// Output device name (see --list-devices)
	#[arg(short, long)]
	device: Option<String>,
	/// Print saved patterns and voices, then exit
	#[arg(long)]
	list: bool,
	#[arg(long)]
	list_devices: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
	let cli = Cli::parse();

	if cli.list_devices {
		for name in output_device_names() {
			println!("{}", name);
		}
		return Ok(());
	}

	let mut settings = match &cli.config {
		Some(path) => Settings::load(path)?,
		None => Settings::load_default()?,
	};
	if cli.device.is_some() {
		settings.audio.output_device = cli.device.clone();
	}

	let store_path = settings.store_path();
	let store = Arc::new(
		JsonStore::open(&store_path)
			.with_context(|| format!("opening library {}", store_path.display()))?,
	);
	if cli.list {
		for p in store.patterns() {
			println!(
				"{:<12} {:<22} {}-{}-{}-{} x{}",
				p.id, p.name, p.inhale, p.hold1, p.exhale, p.hold2, p.cycles
			);
		}
		for v in store.voices() {
			println!("voice: {}", v.name);
		}
		return Ok(());
	}

	let loader = Arc::new(HttpLoader::new(&settings.audio.user_agent)?);
	let output = Box::new(RodioOutput::new(settings.audio.output_device.clone()));
	let mut session = SessionController::new(&settings, loader, output, store.clone(), store);

	let done = Rc::new(Cell::new(false));
	let finished = done.clone();
	session.on_phase_change(|c| {
		log::info!(
			"[Main] {} for {}s (cycle {}/{})",
			c.phase.label(),
			c.duration_secs,
			c.cycle_index,
			c.cycles
		)
	});
	session.on_completed(move |s| {
		log::info!("[Main] Finished '{}' after {} cycles", s.pattern_id, s.cycles);
		finished.set(true);
	});
	session.on_audio_error(|r| log::error!("[Main] {}", r.user_message()));

	match cli.music.as_slice() {
		[] => {}
		[url] => session.play_music(url),
		urls => session.play_playlist(urls.to_vec(), cli.shuffle),
	}
	if cli.loop_music {
		session.set_music_loop(true);
	}

	session.start_saved(&cli.pattern, cli.voice.as_deref())?;

	let mut interval = tokio::time::interval(FRAME);
	interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
	let ctrl_c = tokio::signal::ctrl_c();
	tokio::pin!(ctrl_c);

	let mut closing_until = None;
	loop {
		tokio::select! {
			_ = interval.tick() => {
				session.tick();
				if done.get() {
					let deadline = *closing_until.get_or_insert_with(|| Instant::now() + END_CUE_GRACE);
					if !narration_busy(&session) || Instant::now() >= deadline {
						break;
					}
				}
			}
			_ = &mut ctrl_c => {
				log::info!("[Main] Interrupted");
				break;
			}
		}
	}

	session.stop();
	Ok(())
}

fn narration_busy(session: &SessionController) -> bool {
	session
		.audio()
		.playback(AudioChannel::Narration, HandleRole::Primary)
		.is_some_and(|h| matches!(h.load_state, LoadState::Validating | LoadState::Playing))
}
