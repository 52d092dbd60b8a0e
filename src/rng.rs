//! Discrete weighted sampling for the search scheduler
//!
//! The scheduler picks a priority band by sampling a discrete distribution
//! over per-band weights. The sampler is injected so tests can force a
//! deterministic sequence of draws.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A source of draws over an integer weight vector.
pub trait BandPicker: Send {
	/// Sample an index with probability proportional to `weights[i]`.
	/// Returns `None` when every weight is zero.
	fn pick(&mut self, weights: &[u64]) -> Option<usize>;
}

/// Production picker backed by one process-lifetime PRNG.
pub struct WeightedRng {
	rng: StdRng,
}

impl WeightedRng {
	/// Seed from system entropy.
	pub fn new() -> Self {
		Self { rng: StdRng::from_entropy() }
	}

	/// Fixed seed, for reproducible sampling in tests.
	pub fn seeded(seed: u64) -> Self {
		Self { rng: StdRng::seed_from_u64(seed) }
	}
}

impl Default for WeightedRng {
	fn default() -> Self {
		Self::new()
	}
}

impl BandPicker for WeightedRng {
	fn pick(&mut self, weights: &[u64]) -> Option<usize> {
		let total: u64 = weights.iter().sum();
		if total == 0 {
			return None;
		}
		let mut x = self.rng.gen_range(0..total);
		for (i, &w) in weights.iter().enumerate() {
			if x < w {
				return Some(i);
			}
			x -= w;
		}
		unreachable!("draw exceeded total weight")
	}
}

/// Deterministic picker that replays a preset index sequence. Panics when the
/// sequence runs dry or the scripted index has zero weight.
pub struct SequencePicker {
	draws: std::collections::VecDeque<usize>,
}

impl SequencePicker {
	pub fn new(draws: impl IntoIterator<Item = usize>) -> Self {
		Self {
			draws: draws.into_iter().collect(),
		}
	}
}

impl BandPicker for SequencePicker {
	fn pick(&mut self, weights: &[u64]) -> Option<usize> {
		if weights.iter().all(|&w| w == 0) {
			return None;
		}
		let i = self.draws.pop_front().expect("scripted draws exhausted");
		assert!(weights[i] > 0, "scripted draw {i} has zero weight");
		Some(i)
	}
}
