//! Bundle registry: the authoritative index of all non-completed bundles
//!
//! Bundles are keyed two ways: by unique token for direct lookup, and by the
//! case-folded last segment of every directory registered on their behalf
//! (the bundle root plus each queued item's containing directory). The
//! second index answers "does any bundle live at / under / above this path?"
//! without walking the whole set, and drives the remote-directory matcher
//! used to attribute peer listings to local bundles.
//!
//! The registry owns the scheduler queues; they mutate together under the
//! embedder's registry lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{info, warn};

use crate::bundle::{Bundle, BundleMap, Priority, QueueItem, Token};
use crate::error::PersistResult;
use crate::events::{EventBus, QueueEvent};
use crate::paths;
use crate::rng::{BandPicker, WeightedRng};
use crate::search::SearchQueues;
use crate::settings::SearchSettings;

/// Persistence collaborator: writes and unlinks on-disk bundle descriptors.
/// The format is opaque to the registry.
pub trait DescriptorStore: Send + Sync {
	fn save(&self, bundle: &Bundle) -> PersistResult<()>;
	fn remove(&self, bundle: &Bundle) -> PersistResult<()>;
}

/// Store that persists nothing. For tests and embedders that persist through
/// other means.
pub struct NullStore;

impl DescriptorStore for NullStore {
	fn save(&self, _bundle: &Bundle) -> PersistResult<()> {
		Ok(())
	}

	fn remove(&self, _bundle: &Bundle) -> PersistResult<()> {
		Ok(())
	}
}

/// Per-mount-point queued byte total, filled in by [`BundleQueue::get_disk_info`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TargetInfo {
	pub queued: u64,
}

/// Bundles matched against a source directory by [`BundleQueue::get_info`].
pub struct SourceInfo<'a> {
	pub bundles: Vec<&'a Bundle>,
	pub finished_files: usize,
	pub file_bundles: usize,
}

type DirIndex = HashMap<String, Vec<(String, Token)>>;

/// The registry.
pub struct BundleQueue {
	/// token -> bundle, ordered so multi-match queries resolve deterministically
	bundles: BundleMap,
	/// case-folded last segment -> (full path, owning bundle)
	bundle_dirs: DirIndex,
	searches: SearchQueues,
	settings: SearchSettings,
	store: Arc<dyn DescriptorStore>,
	bus: Option<Arc<EventBus>>,
}

impl BundleQueue {
	pub fn new(settings: SearchSettings, store: Arc<dyn DescriptorStore>) -> Self {
		Self::with_picker(settings, store, Box::new(WeightedRng::new()))
	}

	/// Inject the band picker (deterministic in tests).
	pub fn with_picker(
		settings: SearchSettings,
		store: Arc<dyn DescriptorStore>,
		picker: Box<dyn BandPicker>,
	) -> Self {
		Self {
			bundles: BundleMap::new(),
			bundle_dirs: HashMap::new(),
			searches: SearchQueues::new(picker),
			settings,
			store,
			bus: None,
		}
	}

	/// Attach an event bus; registry mutations broadcast on it.
	pub fn set_bus(&mut self, bus: Arc<EventBus>) {
		self.bus = Some(bus);
	}

	pub fn settings(&self) -> &SearchSettings {
		&self.settings
	}

	pub fn set_settings(&mut self, settings: SearchSettings) {
		self.settings = settings;
	}

	fn emit(&self, event: QueueEvent) {
		if let Some(bus) = &self.bus {
			bus.emit(event);
		}
	}

	/// Accept a bundle into the registry: clears NEW, resets the downloaded
	/// counter, enqueues for scheduling, and indexes the root directory.
	pub fn add_bundle(&mut self, mut bundle: Bundle, now_ms: u64) {
		bundle.clear_new();
		// counter restarts from verified segments as downloads resume
		bundle.set_downloaded_bytes(0);

		self.searches.add(&mut bundle, now_ms);

		if !bundle.is_file_bundle() && self.find_local_dir(bundle.target()).is_none() {
			let target = bundle.target().to_string();
			bundle.inc_dir(target.clone());
			Self::index_insert(&mut self.bundle_dirs, target, bundle.token().clone());
		}

		let token = bundle.token().clone();
		info!(%token, target = bundle.target(), "bundle added to queue");
		debug_assert!(!self.bundles.contains_key(&token));
		self.bundles.insert(token.clone(), bundle);
		self.emit(QueueEvent::BundleAdded { token });
	}

	/// Drop a bundle. The caller must have drained its items first. Returns
	/// the removed bundle, if any.
	pub fn remove_bundle(&mut self, token: &str) -> Option<Bundle> {
		let bundle = self.bundles.remove(token)?;
		debug_assert!(!bundle.is_new());
		debug_assert!(
			bundle.queued_items().is_empty() && bundle.finished_items().is_empty(),
			"bundle removed with items still attached"
		);

		for dir in bundle.registered_dirs() {
			Self::index_remove(&mut self.bundle_dirs, dir, bundle.token());
		}

		self.searches.remove(&bundle);

		if let Err(e) = self.store.remove(&bundle) {
			warn!(token = %bundle.token(), error = %e, "failed to delete bundle descriptor");
		}

		info!(token = %bundle.token(), "bundle removed from queue");
		self.emit(QueueEvent::BundleRemoved { token: bundle.token().clone() });
		Some(bundle)
	}

	/// Relocate a directory bundle: the old target leaves the path index and
	/// the new one enters it atomically.
	pub fn move_bundle(&mut self, token: &str, new_target: &str) -> bool {
		let Some(bundle) = self.bundles.get_mut(token) else {
			return false;
		};

		let old_target = bundle.target().to_string();
		let file_bundle = bundle.is_file_bundle();
		if !file_bundle {
			bundle.dec_dir(&old_target);
		}
		bundle.set_target(new_target);
		let new_target = bundle.target().to_string();
		if !file_bundle {
			bundle.inc_dir(new_target.clone());
		}
		let token = bundle.token().clone();

		if !file_bundle {
			Self::index_remove(&mut self.bundle_dirs, &old_target, &token);
			Self::index_insert(&mut self.bundle_dirs, new_target.clone(), token.clone());
		}

		info!(%token, from = %old_target, to = %new_target, "bundle moved");
		self.emit(QueueEvent::BundleMoved { token, target: new_target });
		true
	}

	/// Attach a queued item; a directory bundle registers the item's
	/// containing directory when it is new.
	pub fn add_bundle_item(&mut self, item: QueueItem, token: &str) {
		let Some(bundle) = self.bundles.get_mut(token) else {
			return;
		};
		let dir = paths::containing_dir(&item.target).to_string();
		let new_dir = bundle.add_queued(item);
		if new_dir && !bundle.is_file_bundle() {
			let token = bundle.token().clone();
			Self::index_insert(&mut self.bundle_dirs, dir, token);
		}
	}

	/// Detach a queued item. With `finished` the item transitions to the
	/// finished list and its directory stays registered.
	pub fn remove_bundle_item(&mut self, target: &str, token: &str, finished: bool) {
		let Some(bundle) = self.bundles.get_mut(token) else {
			return;
		};
		let dir_gone = bundle.remove_queued(target, finished);
		if dir_gone && !finished && !bundle.is_file_bundle() {
			let token = bundle.token().clone();
			Self::index_remove(&mut self.bundle_dirs, paths::containing_dir(target), &token);
		}
	}

	/// Record an item finished in an earlier session.
	pub fn add_finished_item(&mut self, item: QueueItem, token: &str) {
		let Some(bundle) = self.bundles.get_mut(token) else {
			return;
		};
		let dir = paths::containing_dir(&item.target).to_string();
		let new_dir = bundle.add_finished(item);
		if new_dir && !bundle.is_file_bundle() {
			let token = bundle.token().clone();
			Self::index_insert(&mut self.bundle_dirs, dir, token);
		}
	}

	/// Forget a finished item, retiring its directory when unreferenced.
	pub fn remove_finished_item(&mut self, target: &str, token: &str) {
		let Some(bundle) = self.bundles.get_mut(token) else {
			return;
		};
		let dir_gone = bundle.remove_finished(target);
		if dir_gone && !bundle.is_file_bundle() {
			let token = bundle.token().clone();
			Self::index_remove(&mut self.bundle_dirs, paths::containing_dir(target), &token);
		}
	}

	pub fn find_bundle(&self, token: &str) -> Option<&Bundle> {
		self.bundles.get(token)
	}

	pub fn find_bundle_mut(&mut self, token: &str) -> Option<&mut Bundle> {
		self.bundles.get_mut(token)
	}

	pub fn bundles(&self) -> impl Iterator<Item = &Bundle> {
		self.bundles.values()
	}

	pub fn len(&self) -> usize {
		self.bundles.len()
	}

	pub fn is_empty(&self) -> bool {
		self.bundles.is_empty()
	}

	/// Exact probe of the path index: the (full path, bundle) entry whose path
	/// equals `path`.
	pub fn find_local_dir(&self, path: &str) -> Option<(&str, &Token)> {
		let path = paths::strip_trailing_sep(path);
		self.bundle_dirs
			.get(&Self::fold(paths::last_segment(path)))?
			.iter()
			.find(|(p, _)| p.eq_ignore_ascii_case(path))
			.map(|(p, t)| (p.as_str(), t))
	}

	/// Match a directory observed on a peer against the local path index.
	///
	/// The last segment selects candidates. When it looks like a release
	/// sub-directory (`CD1`, `Sample`, ...), parent segments of both paths are
	/// compared case-insensitively, continuing up while they match further
	/// sub-directory names, until a regular segment matches (accept) or a
	/// mismatch / exhausted local path rejects the candidate.
	pub fn find_remote_dir(&self, remote_path: &str) -> Option<(String, Token)> {
		if remote_path.len() < 3 {
			return None;
		}

		let remote = paths::strip_trailing_sep(remote_path);
		let last = paths::last_segment(remote);
		let candidates = self.bundle_dirs.get(&Self::fold(last))?;
		if candidates.is_empty() {
			return None;
		}

		let remote_segments = paths::segments(remote);
		if paths::is_sub_dir_name(last) && remote_segments.len() >= 2 {
			for (local_path, token) in candidates {
				let local_segments = paths::segments(local_path);

				// start from the parents, the last segments already matched
				let mut ri = remote_segments.len() as isize - 2;
				let mut li = local_segments.len() as isize - 2;
				let mut found = false;
				while ri >= 0 && li >= 0 {
					let rs = remote_segments[ri as usize];
					let ls = local_segments[li as usize];
					if !rs.eq_ignore_ascii_case(ls) {
						// something different, try the next candidate
						break;
					}
					if !paths::is_sub_dir_name(rs) {
						found = true;
						break;
					}
					ri -= 1;
					li -= 1;
				}

				if found {
					return Some((local_path.clone(), token.clone()));
				}
			}
			return None;
		}

		candidates.first().map(|(p, t)| (p.clone(), t.clone()))
	}

	/// A directory bundle whose target is an ancestor of, equal to, or inside
	/// `target` — the bundle a new download at `target` should merge into.
	pub fn get_merge_bundle(&self, target: &str) -> Option<&Bundle> {
		self.bundles.values().find(|b| {
			!b.is_file_bundle()
				&& (paths::is_sub(target, b.target()) || paths::is_parent_or_exact(target, b.target()))
		})
	}

	/// Every bundle strictly inside `target`.
	pub fn get_sub_bundles(&self, target: &str) -> Vec<&Bundle> {
		self.bundles
			.values()
			.filter(|b| paths::is_sub(b.target(), target))
			.collect()
	}

	/// Bundles matching a source directory, with finished-file accounting:
	/// either every non-finished bundle living at or under `source`, or the
	/// single bundle wrapping `source` as a sub-folder.
	pub fn get_info(&self, source: &str) -> SourceInfo<'_> {
		let mut ret = SourceInfo {
			bundles: Vec::new(),
			finished_files: 0,
			file_bundles: 0,
		};
		let mut sub_of: Option<&Bundle> = None;

		for bundle in self.bundles.values() {
			if bundle.is_finished() {
				// don't modify those
				continue;
			}

			if paths::is_parent_or_exact(source, bundle.target()) {
				ret.bundles.push(bundle);
				if bundle.is_file_bundle() {
					ret.file_bundles += 1;
				}
			} else if !bundle.is_file_bundle() && paths::is_sub(source, bundle.target()) {
				ret.bundles.push(bundle);
				sub_of = Some(bundle);
				break;
			}
		}

		match sub_of {
			Some(bundle) => {
				ret.finished_files = bundle
					.finished_items()
					.iter()
					.filter(|qi| paths::is_sub(&qi.target, source))
					.count();
			}
			None => {
				ret.finished_files = ret.bundles.iter().map(|b| b.finished_items().len()).sum();
			}
		}

		ret
	}

	/// Aggregate queued bytes per mount point. With one shared temp directory,
	/// bundles targeting another volume contribute their full queued size;
	/// otherwise only the share not yet staged in temp counts.
	pub fn get_disk_info(&self, dir_map: &mut HashMap<String, TargetInfo>, volumes: &HashSet<String>) {
		let single_temp = self.settings.uses_single_temp_dir();
		let temp_vol = if single_temp {
			paths::get_mount_path(&self.settings.temp_download_directory, volumes).unwrap_or_default()
		} else {
			String::new()
		};

		for bundle in self.bundles.values() {
			let Some(mount) = paths::get_mount_path(bundle.target(), volumes) else {
				continue;
			};
			if let Some(info) = dir_map.get_mut(&mount) {
				let count_all = single_temp && mount != temp_vol;
				info.queued += bundle.disk_use(count_all);
			}
		}
	}

	/// Persist every non-finished bundle that is dirty (or all with `force`).
	/// Store failures are logged and swallowed.
	pub fn save_queue(&mut self, force: bool) {
		let store = self.store.clone();
		for bundle in self.bundles.values_mut() {
			if !bundle.is_finished() && (bundle.get_dirty() || force) {
				match store.save(bundle) {
					Ok(()) => bundle.set_dirty(false),
					Err(e) => warn!(token = %bundle.token(), error = %e, "failed to save bundle descriptor"),
				}
			}
		}
	}

	/// Change a bundle's priority, re-banding it in the scheduler. The next
	/// search can only move earlier as a result.
	pub fn set_bundle_priority(&mut self, token: &str, priority: Priority, now_ms: u64) {
		let token_owned;
		{
			let Some(bundle) = self.bundles.get_mut(token) else {
				return;
			};
			if bundle.priority() == priority {
				return;
			}
			bundle.set_priority(priority);
			token_owned = bundle.token().clone();
		}
		self.searches
			.priority_changed(&token_owned, &mut self.bundles, &self.settings, now_ms);
	}

	/// Ask the scheduler for the next bundle to search for.
	pub fn pick_next_search(&mut self, now_ms: u64, force: bool) -> Option<Token> {
		self.searches
			.pick_next_search(&mut self.bundles, &self.settings, now_ms, force)
	}

	pub fn searches(&self) -> &SearchQueues {
		&self.searches
	}

	/// Every (folded key, full path, owning token) entry in the path index.
	pub fn indexed_dirs(&self) -> impl Iterator<Item = (&str, &str, &Token)> {
		self.bundle_dirs
			.iter()
			.flat_map(|(key, entries)| entries.iter().map(move |(p, t)| (key.as_str(), p.as_str(), t)))
	}

	fn fold(segment: &str) -> String {
		segment.to_ascii_lowercase()
	}

	fn index_insert(dirs: &mut DirIndex, path: String, token: Token) {
		let key = Self::fold(paths::last_segment(&path));
		dirs.entry(key).or_default().push((path, token));
	}

	fn index_remove(dirs: &mut DirIndex, path: &str, token: &Token) {
		let path = paths::strip_trailing_sep(path);
		let key = Self::fold(paths::last_segment(path));
		if let Some(entries) = dirs.get_mut(&key) {
			if let Some(pos) = entries
				.iter()
				.position(|(p, t)| t == token && p.eq_ignore_ascii_case(path))
			{
				entries.remove(pos);
			}
			if entries.is_empty() {
				dirs.remove(&key);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bundle::RECENT_AGE_MS;
	use crate::error::PersistError;
	use std::sync::Mutex;

	// clock far enough along that freshly made bundles are past recency
	const NOW: u64 = RECENT_AGE_MS * 2;

	fn queue() -> BundleQueue {
		BundleQueue::new(SearchSettings::default(), Arc::new(NullStore))
	}

	fn dir_bundle(token: &str, target: &str) -> Bundle {
		Bundle::directory(token, target, Priority::Normal, 0)
	}

	fn assert_index_consistent(q: &BundleQueue) {
		let mut expected: Vec<(String, Token)> = q
			.bundles()
			.flat_map(|b| b.registered_dirs().map(|d| (d.clone(), b.token().clone())))
			.collect();
		let mut actual: Vec<(String, Token)> = q
			.indexed_dirs()
			.map(|(_, p, t)| (p.to_string(), t.clone()))
			.collect();
		expected.sort();
		actual.sort();
		assert_eq!(expected, actual, "path index out of sync with bundle state");
	}

	#[test]
	fn test_merge_and_sub_lookup() {
		let mut q = queue();
		q.add_bundle(dir_bundle("a", "/a/b"), NOW);
		q.add_bundle(dir_bundle("b", "/a/b/c/d"), NOW);

		// both bundles qualify; the ancestor resolves first in token order
		let merge = q.get_merge_bundle("/a/b/c").expect("merge target exists");
		assert_eq!(merge.token(), "a");

		let subs = q.get_sub_bundles("/a");
		assert_eq!(subs.len(), 2);
		assert!(q.get_sub_bundles("/a/b").iter().any(|b| b.token() == "b"));
		assert!(q.get_merge_bundle("/elsewhere").is_none());
	}

	#[test]
	fn test_find_bundle_by_token() {
		let mut q = queue();
		q.add_bundle(dir_bundle("t", "/dl/x"), NOW);
		assert!(q.find_bundle("t").is_some());
		assert!(!q.find_bundle("t").unwrap().is_new(), "NEW cleared on add");
		assert!(q.find_bundle("other").is_none());
	}

	#[test]
	fn test_path_index_follows_item_lifecycle() {
		let mut q = queue();
		q.add_bundle(dir_bundle("t", "/dl/Show"), NOW);
		q.add_bundle_item(QueueItem::new("/dl/Show/S01/e1.mkv", 100), "t");
		q.add_bundle_item(QueueItem::new("/dl/Show/S01/e2.mkv", 100), "t");
		assert_index_consistent(&q);
		assert!(q.find_local_dir("/dl/Show/S01").is_some());

		// removing one of two items keeps the directory registered
		q.remove_bundle_item("/dl/Show/S01/e1.mkv", "t", false);
		assert!(q.find_local_dir("/dl/Show/S01").is_some());

		// finishing the last one keeps it as well
		q.remove_bundle_item("/dl/Show/S01/e2.mkv", "t", true);
		assert!(q.find_local_dir("/dl/Show/S01").is_some());
		assert_index_consistent(&q);

		// only dropping the finished item retires the directory
		q.remove_finished_item("/dl/Show/S01/e2.mkv", "t");
		assert!(q.find_local_dir("/dl/Show/S01").is_none());
		assert!(q.find_local_dir("/dl/Show").is_some(), "root entry stays");
		assert_index_consistent(&q);
	}

	#[test]
	fn test_file_bundles_stay_out_of_the_index() {
		let mut q = queue();
		q.add_bundle(
			Bundle::file("f", "/dl/iso/disk.iso", 4096, Priority::Normal, 0),
			NOW,
		);
		assert_eq!(q.indexed_dirs().count(), 0);
		assert_index_consistent(&q);
	}

	#[test]
	fn test_find_remote_dir_subdir_walk() {
		let mut q = queue();
		q.add_bundle(dir_bundle("t", "/downloads/Movie.2020"), NOW);
		q.add_bundle_item(QueueItem::new("/downloads/Movie.2020/CD1/a.avi", 100), "t");

		// CD1 alone is not trusted; the parent walk must line up Movie.2020
		let (path, token) = q
			.find_remote_dir("/share/Movie.2020/CD1")
			.expect("parent walk matches");
		assert_eq!(path, "/downloads/Movie.2020/CD1");
		assert_eq!(token, "t");

		assert!(q.find_remote_dir("/share/Other.Movie/CD1").is_none());
	}

	#[test]
	fn test_find_remote_dir_plain_match() {
		let mut q = queue();
		q.add_bundle(dir_bundle("t", "/downloads/Movie.2020"), NOW);
		let (path, _) = q
			.find_remote_dir("/peer/share/MOVIE.2020/")
			.expect("case-insensitive last segment match");
		assert_eq!(path, "/downloads/Movie.2020");
		assert!(q.find_remote_dir("/x").is_none(), "too short");
	}

	#[test]
	fn test_find_remote_dir_nested_subdirs() {
		let mut q = queue();
		q.add_bundle(dir_bundle("t", "/dl/Movie.2020"), NOW);
		q.add_bundle_item(QueueItem::new("/dl/Movie.2020/Subs/CD1/subs.rar", 10), "t");

		// the walk continues through Subs (another sub-dir name) up to the
		// release directory
		let (path, _) = q
			.find_remote_dir("/peer/Movie.2020/Subs/CD1")
			.expect("walk continues through nested sub-dirs");
		assert_eq!(path, "/dl/Movie.2020/Subs/CD1");
	}

	#[test]
	fn test_move_bundle_reindexes() {
		let mut q = queue();
		q.add_bundle(dir_bundle("t", "/dl/Old.Name"), NOW);
		assert!(q.move_bundle("t", "/dl/New.Name"));

		assert!(q.find_local_dir("/dl/Old.Name").is_none());
		assert!(q.find_local_dir("/dl/New.Name").is_some());
		assert_eq!(q.find_bundle("t").unwrap().target(), "/dl/New.Name");
		assert_index_consistent(&q);
		assert!(!q.move_bundle("missing", "/dl/x"));
	}

	#[test]
	fn test_get_info_parent_collection() {
		let mut q = queue();
		q.add_bundle(dir_bundle("a", "/dl/A"), NOW);
		q.add_bundle_item(QueueItem::new("/dl/A/one.bin", 10), "a");
		q.add_bundle_item(QueueItem::new("/dl/A/two.bin", 10), "a");
		q.remove_bundle_item("/dl/A/one.bin", "a", true);
		q.add_bundle(Bundle::file("f", "/dl/file.iso", 10, Priority::Normal, 0), NOW);

		let info = q.get_info("/dl");
		assert_eq!(info.bundles.len(), 2);
		assert_eq!(info.file_bundles, 1);
		assert_eq!(info.finished_files, 1);
	}

	#[test]
	fn test_get_info_subfolder_counts_scoped_finished() {
		let mut q = queue();
		q.add_bundle(dir_bundle("a", "/dl/A"), NOW);
		q.add_bundle_item(QueueItem::new("/dl/A/Sub/one.bin", 10), "a");
		q.add_bundle_item(QueueItem::new("/dl/A/other.bin", 10), "a");
		q.add_bundle_item(QueueItem::new("/dl/A/keep.bin", 10), "a");
		q.remove_bundle_item("/dl/A/Sub/one.bin", "a", true);
		q.remove_bundle_item("/dl/A/other.bin", "a", true);

		let info = q.get_info("/dl/A/Sub");
		assert_eq!(info.bundles.len(), 1);
		// only the finished file inside the queried subfolder counts
		assert_eq!(info.finished_files, 1);
	}

	#[test]
	fn test_get_disk_info_single_temp_dir() {
		let mut settings = SearchSettings::default();
		settings.temp_download_directory = "/incomplete/".into();
		let mut q = BundleQueue::new(settings, Arc::new(NullStore));

		let mut other = dir_bundle("other", "/mnt/dl/X");
		other.add_queued(QueueItem::new("/mnt/dl/X/a.bin", 1000));
		q.add_bundle(other, NOW);

		let mut same = dir_bundle("same", "/home/dl/Y");
		same.add_queued(QueueItem::new("/home/dl/Y/b.bin", 1000));
		q.add_bundle(same, NOW);

		// the counter resets on add; record progress afterwards
		q.find_bundle_mut("other").unwrap().add_downloaded(300);
		q.find_bundle_mut("same").unwrap().add_downloaded(300);

		let volumes: HashSet<String> =
			["/".to_string(), "/mnt".to_string()].into_iter().collect();
		let mut dir_map: HashMap<String, TargetInfo> = volumes
			.iter()
			.map(|v| (v.clone(), TargetInfo::default()))
			.collect();
		q.get_disk_info(&mut dir_map, &volumes);

		// temp lives on "/": the "/mnt" bundle counts in full, the local one
		// only its undownloaded share
		assert_eq!(dir_map["/mnt"].queued, 1000);
		assert_eq!(dir_map["/"].queued, 700);
	}

	#[test]
	fn test_get_disk_info_per_drive_temp() {
		let mut settings = SearchSettings::default();
		settings.temp_download_directory =
			format!("{}/incomplete/", crate::settings::TARGET_DRIVE_TOKEN);
		let mut q = BundleQueue::new(settings, Arc::new(NullStore));

		let mut b = dir_bundle("b", "/mnt/dl/X");
		b.add_queued(QueueItem::new("/mnt/dl/X/a.bin", 1000));
		q.add_bundle(b, NOW);
		q.find_bundle_mut("b").unwrap().add_downloaded(250);

		let volumes: HashSet<String> = ["/mnt".to_string()].into_iter().collect();
		let mut dir_map: HashMap<String, TargetInfo> =
			[("/mnt".to_string(), TargetInfo::default())].into_iter().collect();
		q.get_disk_info(&mut dir_map, &volumes);

		assert_eq!(dir_map["/mnt"].queued, 750);
	}

	struct RecordingStore {
		saved: Mutex<Vec<Token>>,
	}

	impl DescriptorStore for RecordingStore {
		fn save(&self, bundle: &Bundle) -> PersistResult<()> {
			self.saved.lock().unwrap().push(bundle.token().clone());
			Ok(())
		}

		fn remove(&self, _bundle: &Bundle) -> PersistResult<()> {
			Ok(())
		}
	}

	struct FailingStore;

	impl DescriptorStore for FailingStore {
		fn save(&self, _bundle: &Bundle) -> PersistResult<()> {
			Err(PersistError::Rejected("descriptor dir missing".into()))
		}

		fn remove(&self, _bundle: &Bundle) -> PersistResult<()> {
			Err(PersistError::Rejected("descriptor dir missing".into()))
		}
	}

	#[test]
	fn test_save_queue_dirty_tracking() {
		let store = Arc::new(RecordingStore { saved: Mutex::new(Vec::new()) });
		let mut q = BundleQueue::new(SearchSettings::default(), store.clone());
		q.add_bundle(dir_bundle("t", "/dl/x"), NOW);
		q.add_bundle_item(QueueItem::new("/dl/x/a.bin", 10), "t");

		q.save_queue(false);
		assert_eq!(store.saved.lock().unwrap().len(), 1);

		// clean now; nothing to do without force
		q.save_queue(false);
		assert_eq!(store.saved.lock().unwrap().len(), 1);

		q.save_queue(true);
		assert_eq!(store.saved.lock().unwrap().len(), 2);
	}

	#[test_log::test]
	fn test_save_queue_skips_finished_and_swallows_errors() {
		let mut q = BundleQueue::new(SearchSettings::default(), Arc::new(FailingStore));
		// finished bundle (no queued items): never saved
		q.add_bundle(dir_bundle("done", "/dl/done"), NOW);
		// failing saves must not panic or propagate
		q.add_bundle(dir_bundle("live", "/dl/live"), NOW);
		q.add_bundle_item(QueueItem::new("/dl/live/a.bin", 10), "live");
		q.save_queue(true);
		assert!(q.find_bundle("live").unwrap().get_dirty(), "stays dirty on failure");
	}

	struct FileStore {
		dir: std::path::PathBuf,
	}

	impl FileStore {
		fn descriptor(&self, bundle: &Bundle) -> std::path::PathBuf {
			self.dir.join(format!("{}.xml", bundle.token()))
		}
	}

	impl DescriptorStore for FileStore {
		fn save(&self, bundle: &Bundle) -> PersistResult<()> {
			std::fs::write(self.descriptor(bundle), bundle.target())?;
			Ok(())
		}

		fn remove(&self, bundle: &Bundle) -> PersistResult<()> {
			std::fs::remove_file(self.descriptor(bundle))?;
			Ok(())
		}
	}

	#[test_log::test]
	fn test_descriptor_files_follow_bundle_lifecycle() {
		let tmp = tempfile::TempDir::new().unwrap();
		let store = Arc::new(FileStore { dir: tmp.path().to_path_buf() });
		let mut q = BundleQueue::new(SearchSettings::default(), store.clone());

		q.add_bundle(dir_bundle("t", "/dl/x"), NOW);
		q.add_bundle_item(QueueItem::new("/dl/x/a.bin", 10), "t");
		q.save_queue(false);
		let descriptor = tmp.path().join("t.xml");
		assert!(descriptor.exists());

		q.remove_bundle_item("/dl/x/a.bin", "t", false);
		q.remove_bundle("t");
		assert!(!descriptor.exists(), "descriptor unlinked with the bundle");
	}

	#[test]
	fn test_remove_bundle_clears_everything() {
		let mut q = queue();
		q.add_bundle(dir_bundle("t", "/dl/x"), NOW);
		q.add_bundle_item(QueueItem::new("/dl/x/a.bin", 10), "t");
		q.remove_bundle_item("/dl/x/a.bin", "t", false);

		let removed = q.remove_bundle("t").expect("was present");
		assert_eq!(removed.token(), "t");
		assert!(q.find_bundle("t").is_none());
		assert_eq!(q.indexed_dirs().count(), 0);
		assert_eq!(q.searches().queued_tokens().count(), 0);
		assert!(q.remove_bundle("t").is_none());
	}

	#[test]
	fn test_priority_change_rebands() {
		let mut q = queue();
		let mut b = dir_bundle("t", "/dl/x");
		b.add_queued(QueueItem::new("/dl/x/a.bin", 10));
		q.add_bundle(b, NOW);
		assert_eq!(q.searches().band_len(Priority::Normal), 1);

		q.set_bundle_priority("t", Priority::High, NOW);
		assert_eq!(q.searches().band_len(Priority::Normal), 0);
		assert_eq!(q.searches().band_len(Priority::High), 1);

		// pausing takes it out of scheduling entirely
		q.set_bundle_priority("t", Priority::Paused, NOW);
		assert_eq!(q.searches().queued_tokens().count(), 0);
	}

	#[test]
	fn test_registry_emits_events() {
		let bus = EventBus::new();
		let rx = bus.subscribe();
		let mut q = queue();
		q.set_bus(bus);

		q.add_bundle(dir_bundle("t", "/dl/x"), NOW);
		q.move_bundle("t", "/dl/y");
		q.remove_bundle("t");

		assert!(matches!(rx.try_recv(), Ok(QueueEvent::BundleAdded { .. })));
		assert!(matches!(rx.try_recv(), Ok(QueueEvent::BundleMoved { .. })));
		assert!(matches!(rx.try_recv(), Ok(QueueEvent::BundleRemoved { .. })));
	}

	#[test_log::test]
	fn test_index_consistency_under_random_ops() {
		use rand::rngs::StdRng;
		use rand::{Rng, SeedableRng};

		let mut rng = StdRng::seed_from_u64(7);
		let mut q = queue();
		for i in 0..8 {
			q.add_bundle(dir_bundle(&format!("b{i}"), &format!("/dl/b{i}")), NOW);
		}

		let mut live_items: Vec<(String, String)> = Vec::new();
		for step in 0..200 {
			let roll: u8 = rng.gen_range(0..10);
			if roll < 6 || live_items.is_empty() {
				let owner = format!("b{}", rng.gen_range(0..8));
				let target = format!("/dl/{}/d{}/f{}.bin", owner, rng.gen_range(0..3), step);
				q.add_bundle_item(QueueItem::new(target.clone(), 100), &owner);
				live_items.push((target, owner));
			} else {
				let idx = rng.gen_range(0..live_items.len());
				let (target, owner) = live_items.swap_remove(idx);
				q.remove_bundle_item(&target, &owner, false);
			}
			assert_index_consistent(&q);

			// token uniqueness across scheduler queues
			let mut tokens: Vec<&Token> = q.searches().queued_tokens().collect();
			tokens.sort();
			let before = tokens.len();
			tokens.dedup();
			assert_eq!(before, tokens.len(), "bundle queued twice");
		}
	}
}
