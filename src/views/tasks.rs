//! Pending item-event queue with per-item merging
//!
//! Event ingress never blocks on a running tick: events land here under a
//! narrow mutex and the tick swaps the whole map out. Multiple events for the
//! same item merge by precedence (REMOVE > ADD > UPDATE); the stored snapshot
//! always tracks the newest event.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use super::property::PropertyId;

pub type PropertyIdSet = BTreeSet<PropertyId>;

/// Merge order: higher replaces lower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskType {
	Update = 0,
	Add = 1,
	Remove = 2,
}

#[derive(Debug, Clone)]
pub struct MergeTask {
	pub kind: TaskType,
	pub updated_properties: PropertyIdSet,
}

impl MergeTask {
	fn new(kind: TaskType, updated_properties: PropertyIdSet) -> Self {
		Self { kind, updated_properties }
	}

	fn merge(&mut self, incoming: MergeTask) {
		if incoming.kind > self.kind {
			*self = incoming;
		} else if incoming.kind == self.kind
			|| (self.kind == TaskType::Add && incoming.kind == TaskType::Update)
		{
			// an ADD absorbs later update property sets; equal kinds union
			self.updated_properties.extend(incoming.updated_properties);
		}
		// otherwise the existing task wins
	}
}

struct Inner<T> {
	tasks: HashMap<String, (T, MergeTask)>,
	/// Union of every UPDATE's property set since the last take; feeds the
	/// tick's sort decision.
	updated_properties: PropertyIdSet,
}

pub struct ViewTasks<T> {
	inner: Mutex<Inner<T>>,
}

impl<T> ViewTasks<T> {
	pub fn new() -> Self {
		Self {
			inner: Mutex::new(Inner {
				tasks: HashMap::new(),
				updated_properties: PropertyIdSet::new(),
			}),
		}
	}

	pub fn add_item(&self, id: String, item: T) {
		self.push(id, item, MergeTask::new(TaskType::Add, PropertyIdSet::new()));
	}

	pub fn remove_item(&self, id: String, item: T) {
		self.push(id, item, MergeTask::new(TaskType::Remove, PropertyIdSet::new()));
	}

	pub fn update_item(&self, id: String, item: T, updated: PropertyIdSet) {
		let mut inner = self.inner.lock().unwrap();
		inner.updated_properties.extend(updated.iter().copied());
		Self::push_locked(&mut inner, id, item, MergeTask::new(TaskType::Update, updated));
	}

	fn push(&self, id: String, item: T, task: MergeTask) {
		let mut inner = self.inner.lock().unwrap();
		Self::push_locked(&mut inner, id, item, task);
	}

	fn push_locked(inner: &mut Inner<T>, id: String, item: T, task: MergeTask) {
		match inner.tasks.get_mut(&id) {
			Some((snapshot, existing)) => {
				existing.merge(task);
				*snapshot = item;
			}
			None => {
				inner.tasks.insert(id, (item, task));
			}
		}
	}

	/// Atomically take everything accumulated since the last tick.
	pub fn take(&self) -> (HashMap<String, (T, MergeTask)>, PropertyIdSet) {
		let mut inner = self.inner.lock().unwrap();
		(
			std::mem::take(&mut inner.tasks),
			std::mem::take(&mut inner.updated_properties),
		)
	}

	pub fn clear(&self) {
		let mut inner = self.inner.lock().unwrap();
		inner.tasks.clear();
		inner.updated_properties.clear();
	}

	pub fn is_empty(&self) -> bool {
		self.inner.lock().unwrap().tasks.is_empty()
	}
}

impl<T> Default for ViewTasks<T> {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn props(ids: &[PropertyId]) -> PropertyIdSet {
		ids.iter().copied().collect()
	}

	#[test]
	fn test_remove_wins_over_add() {
		let tasks: ViewTasks<u32> = ViewTasks::new();
		tasks.add_item("x".into(), 1);
		tasks.remove_item("x".into(), 1);

		let (map, _) = tasks.take();
		assert_eq!(map["x"].1.kind, TaskType::Remove);
	}

	#[test]
	fn test_add_survives_later_update_with_union() {
		let tasks: ViewTasks<u32> = ViewTasks::new();
		tasks.add_item("x".into(), 1);
		tasks.update_item("x".into(), 2, props(&[3]));

		let (map, updated) = tasks.take();
		let (snapshot, task) = &map["x"];
		assert_eq!(task.kind, TaskType::Add);
		assert_eq!(task.updated_properties, props(&[3]));
		assert_eq!(*snapshot, 2, "snapshot tracks the newest event");
		assert_eq!(updated, props(&[3]));
	}

	#[test]
	fn test_equal_updates_union_their_properties() {
		let tasks: ViewTasks<u32> = ViewTasks::new();
		tasks.update_item("x".into(), 1, props(&[0]));
		tasks.update_item("x".into(), 2, props(&[2]));

		let (map, updated) = tasks.take();
		assert_eq!(map["x"].1.kind, TaskType::Update);
		assert_eq!(map["x"].1.updated_properties, props(&[0, 2]));
		assert_eq!(updated, props(&[0, 2]));
	}

	#[test]
	fn test_lower_kind_after_remove_is_ignored() {
		let tasks: ViewTasks<u32> = ViewTasks::new();
		tasks.remove_item("x".into(), 1);
		tasks.update_item("x".into(), 2, props(&[1]));

		let (map, _) = tasks.take();
		assert_eq!(map["x"].1.kind, TaskType::Remove);
		assert!(map["x"].1.updated_properties.is_empty());
	}

	#[test]
	fn test_take_drains() {
		let tasks: ViewTasks<u32> = ViewTasks::new();
		tasks.add_item("x".into(), 1);
		let _ = tasks.take();
		assert!(tasks.is_empty());
		let (map, updated) = tasks.take();
		assert!(map.is_empty() && updated.is_empty());
	}
}
