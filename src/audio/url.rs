use super::error::AudioError;
use crate::settings::StorageSettings;
use reqwest::Url;

const STORAGE_SCHEME: &str = "storage://";

/// Rewrites object-storage and protocol-less URLs into fetchable public ones.
///
/// Idempotent: feeding the output back in returns it unchanged.
#[derive(Debug, Clone)]
pub struct UrlNormalizer {
	base_url: Option<String>,
	object_prefix: String,
	public_segment: String,
}

impl UrlNormalizer {
	pub fn new(settings: &StorageSettings) -> Self {
		let mut object_prefix = settings.object_prefix.trim().to_owned();
		if !object_prefix.starts_with('/') {
			object_prefix.insert(0, '/');
		}
		if !object_prefix.ends_with('/') {
			object_prefix.push('/');
		}
		Self {
			base_url: settings
				.base_url
				.as_ref()
				.map(|b| b.trim().trim_end_matches('/').to_owned())
				.filter(|b| !b.is_empty()),
			object_prefix,
			public_segment: settings.public_segment.trim_matches('/').to_owned(),
		}
	}

	pub fn normalize(&self, raw: &str) -> Result<String, AudioError> {
		let trimmed = raw.trim();
		if trimmed.is_empty() {
			return Err(AudioError::invalid(raw, "empty URL"));
		}

		let candidate = if let Some(path) = trimmed.strip_prefix(STORAGE_SCHEME) {
			let Some(base) = self.base_url.as_ref() else {
				return Err(AudioError::invalid(raw, "no storage base URL configured"));
			};
			format!(
				"{}{}{}",
				with_scheme(base),
				self.object_prefix,
				path.trim_start_matches('/')
			)
		} else {
			with_scheme(trimmed)
		};

		let mut url = Url::parse(&candidate).map_err(|e| AudioError::invalid(raw, e.to_string()))?;
		if !matches!(url.scheme(), "http" | "https") {
			return Err(AudioError::invalid(
				raw,
				format!("unsupported scheme '{}'", url.scheme()),
			));
		}
		if url.host_str().is_none_or(str::is_empty) {
			return Err(AudioError::invalid(raw, "missing host"));
		}

		if let Some(rest) = url.path().strip_prefix(&self.object_prefix) {
			let first = rest.split('/').next().unwrap_or_default();
			if !rest.is_empty() && first != self.public_segment {
				let public = format!("{}{}/{}", self.object_prefix, self.public_segment, rest);
				url.set_path(&public);
			}
		}

		Ok(url.to_string())
	}
}

fn with_scheme(url: &str) -> String {
	if let Some(rest) = url.strip_prefix("//") {
		format!("https://{}", rest)
	} else if has_scheme(url) {
		url.to_owned()
	} else {
		format!("https://{}", url)
	}
}

/// Leading `scheme://`, not a `://` buried in the path or query
fn has_scheme(url: &str) -> bool {
	let Some((scheme, _)) = url.split_once("://") else {
		return false;
	};
	let mut chars = scheme.chars();
	chars.next().is_some_and(|c| c.is_ascii_alphabetic())
		&& chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
