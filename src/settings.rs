//! Queue-wide settings supplied by the embedding client

use serde::{Deserialize, Serialize};

/// Placeholder understood by download-directory templates: when present, the
/// client resolves a per-volume temp directory instead of a single shared one.
pub const TARGET_DRIVE_TOKEN: &str = "%[targetdrive]";

/// Settings consulted by the registry and the search scheduler.
///
/// These mirror the subset of client settings the queue core reads; the
/// embedder owns loading/saving them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
	/// Floor for the auto-search interval, in minutes. Values below 1 are
	/// treated as 1.
	pub search_time_min: u32,
	/// Temp download directory template. May contain [`TARGET_DRIVE_TOKEN`].
	pub temp_download_directory: String,
}

impl Default for SearchSettings {
	fn default() -> Self {
		Self {
			search_time_min: 5,
			temp_download_directory: String::new(),
		}
	}
}

impl SearchSettings {
	/// Effective search-time floor in minutes.
	pub fn search_time(&self) -> u64 {
		u64::from(self.search_time_min.max(1))
	}

	/// Whether one shared temp directory serves every download, regardless of
	/// the target volume.
	pub fn uses_single_temp_dir(&self) -> bool {
		!self.temp_download_directory.contains(TARGET_DRIVE_TOKEN)
	}
}
