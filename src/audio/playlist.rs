use rand::seq::SliceRandom;

/// Ordered track list for the music channel; wraps around at the end
#[derive(Debug, Clone)]
pub struct Playlist {
	tracks: Vec<String>,
	cursor: usize,
}

impl Playlist {
	pub fn new(mut tracks: Vec<String>, shuffle: bool) -> Self {
		tracks.retain(|t| !t.trim().is_empty());
		if shuffle {
			tracks.shuffle(&mut rand::rng());
		}
		Self { tracks, cursor: 0 }
	}

	pub fn len(&self) -> usize {
		self.tracks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tracks.is_empty()
	}

	pub fn current(&self) -> Option<&str> {
		self.tracks.get(self.cursor).map(String::as_str)
	}

	/// Track that follows the current one. A single track has no successor.
	pub fn peek_next(&self) -> Option<&str> {
		if self.tracks.len() < 2 {
			return None;
		}
		self.tracks
			.get((self.cursor + 1) % self.tracks.len())
			.map(String::as_str)
	}

	pub fn advance(&mut self) -> Option<&str> {
		if self.tracks.is_empty() {
			return None;
		}
		self.cursor = (self.cursor + 1) % self.tracks.len();
		self.current()
	}
}
