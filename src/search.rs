//! Auto-search scheduler: decides which bundle to search the network for next
//!
//! Two cooperating queues feed the pick. Bundles at [`Priority::Low`] and
//! above sit in per-priority bands; bundles still inside their recency window
//! ride a separate queue with a faster cadence. A weighted random draw selects
//! the band (weight `(p - 1) × searchable-count`, so higher priorities win
//! more often while Low keeps a positive share), then the first searchable
//! bundle in that band rotates to the back and becomes the pick.
//!
//! The queues hold tokens only; callers pass the registry's bundle map so the
//! scheduler can consult live bundle state.

use std::collections::VecDeque;

use tracing::debug;

use crate::bundle::{Bundle, BundleMap, Priority, Token};
use crate::rng::BandPicker;
use crate::settings::SearchSettings;

/// Recent-queue cadence by searchable-recent population.
const RECENT_INTERVAL_ONE_MS: u64 = 15 * 60 * 1000;
const RECENT_INTERVAL_TWO_MS: u64 = 8 * 60 * 1000;
const RECENT_INTERVAL_MANY_MS: u64 = 5 * 60 * 1000;

/// The scheduler's queue state.
pub struct SearchQueues {
	/// One band per priority ordinal; only Low..=Highest are ever populated.
	prio_queues: [VecDeque<Token>; Priority::COUNT],
	recent: VecDeque<Token>,
	next_search_ms: u64,
	next_recent_search_ms: u64,
	picker: Box<dyn BandPicker>,
}

impl SearchQueues {
	pub fn new(picker: Box<dyn BandPicker>) -> Self {
		Self {
			prio_queues: std::array::from_fn(|_| VecDeque::new()),
			recent: VecDeque::new(),
			next_search_ms: 0,
			next_recent_search_ms: 0,
			picker,
		}
	}

	/// Enqueue a bundle for scheduling. Priorities below Low are never
	/// scheduled; recent bundles go to the recent queue regardless of band.
	pub fn add(&mut self, bundle: &mut Bundle, now_ms: u64) {
		if bundle.priority() < Priority::Low {
			return;
		}
		let token = bundle.token().clone();
		if bundle.check_recent(now_ms) {
			debug_assert!(!self.recent.contains(&token));
			self.recent.push_back(token);
		} else {
			let band = &mut self.prio_queues[bundle.priority().ordinal()];
			debug_assert!(!band.contains(&token));
			band.push_back(token);
		}
	}

	/// Drop a bundle from whichever queue holds it.
	pub fn remove(&mut self, bundle: &Bundle) {
		let token = bundle.token();
		self.recent.retain(|t| t != token);
		for band in &mut self.prio_queues {
			band.retain(|t| t != token);
		}
	}

	/// Re-band a bundle after its priority changed and pull the next due time
	/// forward if the change warrants it.
	pub fn priority_changed(
		&mut self,
		token: &Token,
		bundles: &mut BundleMap,
		settings: &SearchSettings,
		now_ms: u64,
	) {
		let recent;
		{
			let Some(bundle) = bundles.get_mut(token) else {
				return;
			};
			self.remove(bundle);
			recent = bundle.check_recent(now_ms);
			self.add(bundle, now_ms);
		}
		self.recalculate_search_times(bundles, settings, recent, true, now_ms);
	}

	/// Return at most one bundle to search for, advancing the due timestamp of
	/// the queue it came from. Never returns a bundle below Low priority or
	/// with auto-search disallowed.
	pub fn pick_next_search(
		&mut self,
		bundles: &mut BundleMap,
		settings: &SearchSettings,
		now_ms: u64,
		force: bool,
	) -> Option<Token> {
		let mut picked = None;
		if force || now_ms >= self.next_search_ms {
			picked = self.find_auto_search(bundles);
			if picked.is_some() {
				self.recalculate_search_times(bundles, settings, false, false, now_ms);
			}
		}
		if picked.is_none() && (force || now_ms >= self.next_recent_search_ms) {
			picked = self.find_recent(bundles, now_ms);
			if picked.is_some() {
				self.recalculate_search_times(bundles, settings, true, false, now_ms);
			}
		}
		if let Some(token) = &picked {
			debug!(%token, "scheduler picked bundle for auto search");
		}
		picked
	}

	/// Weighted pick over the priority bands. A sampled band whose members all
	/// refuse auto-search yields nothing; the sampler already reflects
	/// relative population, so there is no fallthrough to another band.
	pub fn find_auto_search(&mut self, bundles: &BundleMap) -> Option<Token> {
		let (weights, searchable) = self.prio_weights(bundles);
		if searchable == 0 {
			return None;
		}

		// weights start at Low; skip Paused and Lowest when indexing back
		let band = self.picker.pick(&weights)? + Priority::Low.ordinal();
		let queue = &mut self.prio_queues[band];

		let pos = queue
			.iter()
			.position(|t| bundles.get(t).is_some_and(|b| b.allow_auto_search()))?;
		let token = queue.remove(pos).expect("position came from this queue");
		queue.push_back(token.clone());
		Some(token)
	}

	/// Rotate the recent queue looking for a searchable bundle. Bundles whose
	/// recency expired migrate back to their priority band as they pass the
	/// front. Terminates after at most one full rotation.
	pub fn find_recent(&mut self, bundles: &mut BundleMap, now_ms: u64) -> Option<Token> {
		if self.recent.is_empty() {
			return None;
		}

		let mut count = 0;
		loop {
			let token = self.recent.pop_front()?;

			match bundles.get_mut(&token) {
				Some(b) => {
					if b.check_recent(now_ms) {
						self.recent.push_back(token.clone());
					} else {
						// back to the ordinary cadence
						self.prio_queues[b.priority().ordinal()].push_back(token.clone());
					}
					if b.allow_auto_search() {
						return Some(token);
					}
				}
				// stale token, drop it
				None => {}
			}

			if count >= self.recent.len() {
				break;
			}
			count += 1;
		}

		None
	}

	/// Recompute the next due timestamp for one of the queues. With
	/// `prio_change`, an already-set due time can only move earlier.
	pub fn recalculate_search_times(
		&mut self,
		bundles: &BundleMap,
		settings: &SearchSettings,
		recent: bool,
		prio_change: bool,
		now_ms: u64,
	) -> u64 {
		if !recent {
			let (_, searchable) = self.prio_weights(bundles);
			let interval_min = if searchable > 0 {
				(60 / searchable).max(settings.search_time())
			} else {
				settings.search_time()
			};

			let due = now_ms + interval_min * 60_000;
			self.next_search_ms = if self.next_search_ms > 0 && prio_change {
				self.next_search_ms.min(due)
			} else {
				due
			};
			self.next_search_ms
		} else {
			let due = now_ms + self.recent_interval_ms(bundles);
			self.next_recent_search_ms = if self.next_recent_search_ms > 0 && prio_change {
				self.next_recent_search_ms.min(due)
			} else {
				due
			};
			self.next_recent_search_ms
		}
	}

	/// Recent-queue cadence: one searchable recent bundle searches every 15
	/// minutes, two every 8, more every 5.
	pub fn recent_interval_ms(&self, bundles: &BundleMap) -> u64 {
		let searchable = self
			.recent
			.iter()
			.filter(|t| bundles.get(*t).is_some_and(|b| b.allow_auto_search()))
			.count();
		match searchable {
			1 => RECENT_INTERVAL_ONE_MS,
			2 => RECENT_INTERVAL_TWO_MS,
			_ => RECENT_INTERVAL_MANY_MS,
		}
	}

	/// Weight vector over the schedulable bands (Low..=Highest) and the total
	/// searchable count feeding the interval computation.
	fn prio_weights(&self, bundles: &BundleMap) -> (Vec<u64>, u64) {
		let mut weights = Vec::with_capacity(Priority::COUNT - Priority::Low.ordinal());
		let mut searchable = 0u64;
		for p in Priority::Low.ordinal()..Priority::COUNT {
			let count = self.prio_queues[p]
				.iter()
				.filter(|t| bundles.get(*t).is_some_and(|b| b.allow_auto_search()))
				.count() as u64;
			weights.push((p as u64 - 1) * count);
			searchable += count;
		}
		(weights, searchable)
	}

	pub fn next_search_due(&self) -> u64 {
		self.next_search_ms
	}

	pub fn next_recent_search_due(&self) -> u64 {
		self.next_recent_search_ms
	}

	/// Tokens currently queued, across every band and the recent queue.
	pub fn queued_tokens(&self) -> impl Iterator<Item = &Token> {
		self.prio_queues.iter().flatten().chain(self.recent.iter())
	}

	pub fn band_len(&self, priority: Priority) -> usize {
		self.prio_queues[priority.ordinal()].len()
	}

	pub fn recent_len(&self) -> usize {
		self.recent.len()
	}
}
