//! Process-monotonic tick source
//!
//! Every time-dependent operation in the crate takes an explicit `now_ms`
//! argument so tests can drive a virtual clock; production callers feed them
//! from [`now_ms`].

use std::sync::LazyLock;
use std::time::Instant;

static START: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Milliseconds elapsed since the first call in this process. Monotonic.
pub fn now_ms() -> u64 {
	START.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_now_ms_monotonic() {
		let a = now_ms();
		let b = now_ms();
		assert!(b >= a);
	}
}
