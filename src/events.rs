//! Queue lifecycle notifications
//!
//! Registry mutations publish [`QueueEvent`]s to any number of subscribers
//! over unbounded channels. Delivery is best-effort: a subscriber whose
//! receiver has gone away is pruned on the next publish.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_channel::{Receiver, Sender};

use crate::bundle::Token;

/// Events published by the bundle registry.
#[derive(Debug, Clone)]
pub enum QueueEvent {
	/// A bundle was accepted into the registry
	BundleAdded { token: Token },
	/// A bundle left the registry
	BundleRemoved { token: Token },
	/// A bundle's target moved on disk
	BundleMoved { token: Token, target: String },
}

/// Broadcast hub connecting the registry to UI layers and view controllers.
#[derive(Default)]
pub struct EventBus {
	outlets: Mutex<Vec<Sender<QueueEvent>>>,
}

impl EventBus {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	// A poisoned mutex only means a publisher panicked mid-send; the
	// subscriber list itself is still intact, so keep using it.
	fn outlets(&self) -> MutexGuard<'_, Vec<Sender<QueueEvent>>> {
		self.outlets.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Open a channel observing every event published after this call.
	pub fn subscribe(&self) -> Receiver<QueueEvent> {
		let (tx, rx) = async_channel::unbounded();
		self.outlets().push(tx);
		rx
	}

	/// Publish to every live subscriber. Channels refusing the send (their
	/// receiver was dropped) leave the list here.
	pub fn emit(&self, event: QueueEvent) {
		self.outlets()
			.retain(|outlet| outlet.try_send(event.clone()).is_ok());
	}

	pub fn subscriber_count(&self) -> usize {
		self.outlets().len()
	}
}
