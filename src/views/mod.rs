//! Windowed list views: filterable, sortable projections streamed to sessions
//!
//! A [`ListView`] mirrors a live item collection for one client session. The
//! client posts settings (sort, window, filters); item events queue up in a
//! merge map and a periodic tick folds them into the filtered, sorted
//! projection, emitting an incremental JSON diff of the visible window.
//!
//! The tick runs on a dedicated ticker thread with non-overlapping
//! executions; `stop` joins it, so an in-flight tick always finishes before
//! state clears.

pub mod filter;
pub mod property;
pub mod tasks;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use futures_lite::future;
use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::error::{ApiError, ApiResult};

use filter::{matches_all, FilterMethod, FilterToken, PropertyFilter};
use property::{compare_items, find_property_by_name, PropertyHandler, PropertyId};
use tasks::{PropertyIdSet, TaskType, ViewTasks};

/// Destination for view payloads; the embedder bridges this to its session
/// transport (WebSocket, test channel, ...).
pub trait SessionSink: Send + Sync {
	fn send(&self, event: &str, payload: Value);
}

/// Channel-backed sink for tests and in-process consumers.
pub struct ChannelSink {
	tx: async_channel::Sender<(String, Value)>,
}

impl ChannelSink {
	pub fn new() -> (Self, async_channel::Receiver<(String, Value)>) {
		let (tx, rx) = async_channel::unbounded();
		(Self { tx }, rx)
	}
}

impl SessionSink for ChannelSink {
	fn send(&self, event: &str, payload: Value) {
		let _ = self.tx.try_send((event.to_string(), payload));
	}
}

/// Produces the full item set when a view activates.
pub type ItemListFn<T> = Box<dyn Fn() -> Vec<T> + Send + Sync>;

/// Short default for lists the user edits directly; bulkier views should pass
/// something longer.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
struct ViewSettings {
	range_start: usize,
	max_count: usize,
	sort_property: Option<PropertyId>,
	sort_ascending: bool,
	changed: bool,
}

impl Default for ViewSettings {
	fn default() -> Self {
		Self {
			range_start: 0,
			max_count: 0,
			sort_property: None,
			sort_ascending: true,
			changed: true,
		}
	}
}

struct ViewState<T> {
	all_items: HashMap<String, T>,
	matching_items: Vec<T>,
	/// ids of the window last sent to the client
	current_view: Vec<String>,
	filters: Vec<PropertyFilter>,
	settings: ViewSettings,
	prev_sort: Option<(PropertyId, bool)>,
	item_list_changed: bool,
	prev_matching_count: i64,
	prev_total_count: i64,
}

impl<T> ViewState<T> {
	fn new() -> Self {
		Self {
			all_items: HashMap::new(),
			matching_items: Vec::new(),
			current_view: Vec::new(),
			filters: Vec::new(),
			settings: ViewSettings::default(),
			prev_sort: None,
			item_list_changed: false,
			prev_matching_count: -1,
			prev_total_count: -1,
		}
	}
}

struct ViewInner<T, H> {
	view_name: String,
	handler: H,
	item_list_f: ItemListFn<T>,
	sink: Arc<dyn SessionSink>,
	state: RwLock<ViewState<T>>,
	tasks: ViewTasks<T>,
	active: AtomicBool,
	paused: AtomicBool,
	next_filter_id: AtomicU32,
	update_interval: Duration,
	ticker: Mutex<Option<JoinHandle<()>>>,
}

/// One client's view over a live item collection.
pub struct ListView<T, H> {
	inner: Arc<ViewInner<T, H>>,
}

impl<T, H> ListView<T, H>
where
	T: Clone + Send + Sync + 'static,
	H: PropertyHandler<T> + Send + Sync + 'static,
{
	pub fn new(
		view_name: impl Into<String>,
		handler: H,
		item_list_f: ItemListFn<T>,
		sink: Arc<dyn SessionSink>,
		update_interval: Option<Duration>,
	) -> Self {
		Self {
			inner: Arc::new(ViewInner {
				view_name: view_name.into(),
				handler,
				item_list_f,
				sink,
				state: RwLock::new(ViewState::new()),
				tasks: ViewTasks::new(),
				active: AtomicBool::new(false),
				paused: AtomicBool::new(false),
				next_filter_id: AtomicU32::new(1),
				update_interval: update_interval.unwrap_or(DEFAULT_UPDATE_INTERVAL),
				ticker: Mutex::new(None),
			}),
		}
	}

	pub fn is_active(&self) -> bool {
		self.inner.active.load(Ordering::SeqCst)
	}

	// EVENT INGRESS

	pub fn on_item_added(&self, item: T) {
		if !self.is_active() {
			return;
		}
		let id = self.inner.handler.item_id(&item);
		self.inner.tasks.add_item(id, item);
	}

	pub fn on_item_removed(&self, item: T) {
		if !self.is_active() {
			return;
		}
		let id = self.inner.handler.item_id(&item);
		self.inner.tasks.remove_item(id, item);
	}

	pub fn on_item_updated(&self, item: T, updated: PropertyIdSet) {
		if !self.is_active() {
			return;
		}
		let id = self.inner.handler.item_id(&item);
		self.inner.tasks.update_item(id, item, updated);
	}

	// REQUEST HANDLERS

	/// `POST <view>/settings`: activates on first call, starts the ticker.
	pub fn post_settings(&self, body: &Value) -> ApiResult<()> {
		self.parse_settings(body)?;
		if !self.is_active() {
			self.inner.active.store(true, Ordering::SeqCst);
			self.inner.update_list();
			self.start_ticker();
		}
		Ok(())
	}

	/// `DELETE <view>`: deactivates and clears all state.
	pub fn reset(&self) -> ApiResult<()> {
		if !self.is_active() {
			return Err(ApiError::InactiveView);
		}
		self.stop();
		Ok(())
	}

	/// `POST <view>/filter`: adds a filter, returning its token. An empty
	/// body adds an inert filter the client fills in later.
	pub fn post_filter(&self, body: &Value) -> ApiResult<FilterToken> {
		let id = self.inner.next_filter_id.fetch_add(1, Ordering::Relaxed);
		let mut filter = PropertyFilter::new(id);
		if !body.is_null() {
			let (method, property, pattern) = self.parse_filter_body(body)?;
			filter.prepare(&pattern, method, property)?;
		}
		self.inner.state.write().unwrap().filters.push(filter);
		self.inner.on_filter_updated();
		Ok(id)
	}

	/// `PUT <view>/filter/{id}`
	pub fn put_filter(&self, id: FilterToken, body: &Value) -> ApiResult<()> {
		let (method, property, pattern) = self.parse_filter_body(body)?;
		{
			let mut state = self.inner.state.write().unwrap();
			let filter = state
				.filters
				.iter_mut()
				.find(|f| f.id() == id)
				.ok_or(ApiError::NotFound("filter"))?;
			filter.prepare(&pattern, method, property)?;
		}
		self.inner.on_filter_updated();
		Ok(())
	}

	/// `DELETE <view>/filter/{id}`
	pub fn delete_filter(&self, id: FilterToken) -> ApiResult<()> {
		{
			let mut state = self.inner.state.write().unwrap();
			let pos = state
				.filters
				.iter()
				.position(|f| f.id() == id)
				.ok_or(ApiError::NotFound("filter"))?;
			state.filters.remove(pos);
		}
		self.inner.on_filter_updated();
		Ok(())
	}

	/// `GET <view>/items/{start}/{end}`: snapshot of `[start, end)` of the
	/// matching list, fully serialized.
	pub fn get_items(&self, start: usize, end: usize) -> ApiResult<Value> {
		if start > end {
			return Err(ApiError::InvalidArgument(format!(
				"range start {start} past end {end}"
			)));
		}
		let state = self.inner.state.read().unwrap();
		let upper = end.min(state.matching_items.len());
		let items: Vec<Value> = state
			.matching_items
			.get(start..upper)
			.unwrap_or(&[])
			.iter()
			.enumerate()
			.map(|(offset, item)| self.inner.serialize_item(item, start + offset, None))
			.collect();
		Ok(Value::Array(items))
	}

	/// Deactivate and clear every piece of view state.
	pub fn stop(&self) {
		self.inner.active.store(false, Ordering::SeqCst);
		let handle = self.inner.ticker.lock().unwrap().take();
		if let Some(handle) = handle {
			// wait out an in-flight tick
			let _ = handle.join();
		}
		self.inner.paused.store(false, Ordering::SeqCst);
		self.inner.tasks.clear();
		*self.inner.state.write().unwrap() = ViewState::new();
	}

	/// Run one tick inline. The ticker thread calls this on its cadence;
	/// tests drive it directly.
	pub fn run_tasks(&self) {
		self.inner.run_tasks();
	}

	fn start_ticker(&self) {
		let inner = self.inner.clone();
		let handle = std::thread::spawn(move || {
			future::block_on(async move {
				while inner.active.load(Ordering::SeqCst) {
					smol::Timer::after(inner.update_interval).await;
					if !inner.active.load(Ordering::SeqCst) {
						break;
					}
					if !inner.paused.load(Ordering::SeqCst) {
						inner.run_tasks();
					}
				}
			})
		});
		*self.inner.ticker.lock().unwrap() = Some(handle);
	}

	fn parse_settings(&self, body: &Value) -> ApiResult<()> {
		let mut state = self.inner.state.write().unwrap();
		let mut changed = false;

		if let Some(v) = body.get("range_start") {
			let start = v
				.as_i64()
				.ok_or_else(|| ApiError::InvalidArgument("range_start must be an integer".into()))?;
			if start < 0 {
				return Err(ApiError::InvalidArgument("negative range start not allowed".into()));
			}
			state.settings.range_start = start as usize;
			changed = true;
		}

		if let Some(v) = body.get("max_count") {
			let count = v
				.as_u64()
				.ok_or_else(|| ApiError::InvalidArgument("max_count must be an integer".into()))?;
			state.settings.max_count = count as usize;
			changed = true;
		}

		if let Some(v) = body.get("sort_property") {
			let name = v
				.as_str()
				.ok_or_else(|| ApiError::InvalidArgument("sort_property must be a string".into()))?;
			let property = find_property_by_name(name, self.inner.handler.properties())
				.ok_or_else(|| ApiError::InvalidArgument(format!("invalid sort property '{name}'")))?;
			state.settings.sort_property = Some(property);
			changed = true;
		}

		if let Some(v) = body.get("sort_ascending") {
			let asc = v
				.as_bool()
				.ok_or_else(|| ApiError::InvalidArgument("sort_ascending must be a boolean".into()))?;
			state.settings.sort_ascending = asc;
			changed = true;
		}

		if let Some(v) = body.get("paused") {
			let paused = v
				.as_bool()
				.ok_or_else(|| ApiError::InvalidArgument("paused must be a boolean".into()))?;
			self.inner.paused.store(paused, Ordering::SeqCst);
		}

		if changed {
			state.settings.changed = true;
		}
		Ok(())
	}

	fn parse_filter_body(&self, body: &Value) -> ApiResult<(FilterMethod, PropertyId, String)> {
		let method = body
			.get("method")
			.and_then(Value::as_i64)
			.and_then(FilterMethod::from_wire)
			.ok_or_else(|| ApiError::InvalidArgument("unknown filter method".into()))?;

		let name = body
			.get("property")
			.and_then(Value::as_str)
			.ok_or_else(|| ApiError::InvalidArgument("missing filter property".into()))?;
		let property = find_property_by_name(name, self.inner.handler.properties())
			.ok_or_else(|| ApiError::InvalidArgument(format!("invalid filter property '{name}'")))?;

		// pattern can be a string or a bare number
		let pattern = match body.get("pattern") {
			Some(Value::String(s)) => s.clone(),
			Some(Value::Number(n)) => n.to_string(),
			_ => return Err(ApiError::InvalidArgument("missing filter pattern".into())),
		};

		Ok((method, property, pattern))
	}
}

impl<T, H> Drop for ListView<T, H> {
	fn drop(&mut self) {
		self.inner.active.store(false, Ordering::SeqCst);
		if let Ok(mut guard) = self.inner.ticker.lock() {
			if let Some(handle) = guard.take() {
				let _ = handle.join();
			}
		}
	}
}

impl<T, H> ViewInner<T, H>
where
	T: Clone + Send + Sync + 'static,
	H: PropertyHandler<T> + Send + Sync + 'static,
{
	/// Full materialisation on activation.
	fn update_list(&self) {
		let items = (self.item_list_f)();
		let mut guard = self.state.write().unwrap();
		let state = &mut *guard;
		state.all_items = items
			.iter()
			.map(|i| (self.handler.item_id(i), i.clone()))
			.collect();
		state.matching_items = items
			.into_iter()
			.filter(|i| matches_all(&state.filters, &self.handler, i))
			.collect();
		state.item_list_changed = true;
	}

	/// Rebuild the matching projection after the filter set changed.
	fn on_filter_updated(&self) {
		let mut state = self.state.write().unwrap();
		let state = &mut *state;
		state.matching_items = state
			.all_items
			.values()
			.filter(|i| matches_all(&state.filters, &self.handler, i))
			.cloned()
			.collect();
		state.item_list_changed = true;
		state.settings.range_start = 0;
		state.settings.changed = true;
	}

	/// One tick: drain the task map, fold it into the projection, and emit
	/// the window diff.
	fn run_tasks(&self) {
		// no projection is defined until the client posts a sort property;
		// leave queued events in place until one arrives
		if self.state.read().unwrap().settings.sort_property.is_none() {
			return;
		}

		let (current_tasks, updated_properties) = self.tasks.take();

		let mut state = self.state.write().unwrap();
		// anything to update?
		if current_tasks.is_empty() && !state.settings.changed && !state.item_list_changed {
			return;
		}

		// the view may have been torn down between the probe and the lock;
		// its tasks were cleared with it
		let Some(sort_property) = state.settings.sort_property else {
			return;
		};
		let sort_ascending = state.settings.sort_ascending;
		let posted_start = state.settings.range_start;
		state.settings.changed = false;

		let need_sort = updated_properties.contains(&sort_property)
			|| state.prev_sort != Some((sort_property, sort_ascending))
			|| state.item_list_changed;
		state.item_list_changed = false;
		state.prev_sort = Some((sort_property, sort_ascending));

		let mut range_start = posted_start;
		let mut updated_items: HashMap<String, PropertyIdSet> = HashMap::new();

		for (id, (item, task)) in current_tasks {
			match task.kind {
				TaskType::Add => {
					self.handle_add(&mut state, item, sort_property, sort_ascending, &mut range_start);
				}
				TaskType::Remove => {
					self.handle_remove(&mut state, &id, &mut range_start);
				}
				TaskType::Update => {
					if self.handle_update(&mut state, &id, item, sort_property, sort_ascending, &mut range_start) {
						updated_items.insert(id, task.updated_properties);
					}
				}
			}
		}

		if need_sort {
			let handler = &self.handler;
			state
				.matching_items
				.sort_by(|a, b| compare_items(handler, a, b, sort_property, sort_ascending));
			trace!(view = %self.view_name, "matching items re-sorted");
		}

		// window
		if range_start >= state.all_items.len() {
			range_start = 0;
		}
		let count = state
			.matching_items
			.len()
			.saturating_sub(range_start)
			.min(state.settings.max_count);

		let mut new_view = Vec::with_capacity(count);
		let mut items_json = Vec::with_capacity(count);
		let window = state
			.matching_items
			.get(range_start..range_start + count)
			.unwrap_or(&[]);
		for (offset, item) in window.iter().enumerate() {
			let id = self.handler.item_id(item);
			let value = if !state.current_view.contains(&id) {
				// new to the window: all properties
				self.serialize_item(item, offset, None)
			} else if let Some(props) = updated_items.get(&id) {
				self.serialize_item(item, offset, Some(props))
			} else {
				json!({ "id": id, "pos": offset })
			};
			items_json.push(value);
			new_view.push(id);
		}

		let mut payload = json!({ "items": items_json, "range_start": range_start });
		let offset = range_start as i64 - posted_start as i64;
		if offset != 0 {
			payload["range_offset"] = json!(offset);
		}
		state.settings.range_start = range_start;

		// counts go out only when they changed
		let matching_count = state.matching_items.len() as i64;
		let total_count = state.all_items.len() as i64;
		if matching_count != state.prev_matching_count {
			state.prev_matching_count = matching_count;
			payload["matching_items"] = json!(matching_count);
		}
		if total_count != state.prev_total_count {
			state.prev_total_count = total_count;
			payload["total_items"] = json!(total_count);
		}

		state.current_view = new_view;
		drop(state);

		debug!(view = %self.view_name, "view tick emitted");
		self.sink.send(&format!("{}_updated", self.view_name), payload);
	}

	fn handle_add(
		&self,
		state: &mut ViewState<T>,
		item: T,
		sort_property: PropertyId,
		sort_ascending: bool,
		range_start: &mut usize,
	) {
		let id = self.handler.item_id(&item);
		let matches = matches_all(&state.filters, &self.handler, &item);
		state.all_items.insert(id.clone(), item.clone());
		if !matches || self.position_of(state, &id).is_some() {
			return;
		}

		let handler = &self.handler;
		let pos = state
			.matching_items
			.binary_search_by(|probe| compare_items(handler, probe, &item, sort_property, sort_ascending))
			.unwrap_or_else(|insert_at| insert_at);
		state.matching_items.insert(pos, item);
		if pos < *range_start {
			*range_start += 1;
		}
	}

	fn handle_remove(&self, state: &mut ViewState<T>, id: &str, range_start: &mut usize) {
		if let Some(pos) = self.position_of(state, id) {
			state.matching_items.remove(pos);
			if pos < *range_start {
				*range_start -= 1;
			}
		}
		state.all_items.remove(id);
	}

	/// Returns true when the item stays in the list and should serialize its
	/// updated properties.
	fn handle_update(
		&self,
		state: &mut ViewState<T>,
		id: &str,
		item: T,
		sort_property: PropertyId,
		sort_ascending: bool,
		range_start: &mut usize,
	) -> bool {
		let matches = matches_all(&state.filters, &self.handler, &item);
		let in_list = self.position_of(state, id);
		state.all_items.insert(id.to_string(), item.clone());

		match (matches, in_list) {
			(false, Some(pos)) => {
				// leaves the projection but stays known
				state.matching_items.remove(pos);
				if pos < *range_start {
					*range_start -= 1;
				}
				false
			}
			(false, None) => false,
			(true, None) => {
				let handler = &self.handler;
				let pos = state
					.matching_items
					.binary_search_by(|probe| {
						compare_items(handler, probe, &item, sort_property, sort_ascending)
					})
					.unwrap_or_else(|insert_at| insert_at);
				state.matching_items.insert(pos, item);
				if pos < *range_start {
					*range_start += 1;
				}
				false
			}
			(true, Some(pos)) => {
				state.matching_items[pos] = item;
				true
			}
		}
	}

	fn position_of(&self, state: &ViewState<T>, id: &str) -> Option<usize> {
		state
			.matching_items
			.iter()
			.position(|i| self.handler.item_id(i) == id)
	}

	fn serialize_item(&self, item: &T, pos: usize, subset: Option<&PropertyIdSet>) -> Value {
		let properties: serde_json::Map<String, Value> = match subset {
			Some(ids) => ids
				.iter()
				.map(|&p| {
					(
						self.handler.properties()[p].name.to_string(),
						self.handler.serialize_property(item, p),
					)
				})
				.collect(),
			None => (0..self.handler.properties().len())
				.map(|p| {
					(
						self.handler.properties()[p].name.to_string(),
						self.handler.serialize_property(item, p),
					)
				})
				.collect(),
		};
		json!({
			"id": self.handler.item_id(item),
			"pos": pos,
			"properties": properties,
		})
	}
}

#[cfg(test)]
impl<T, H> ListView<T, H>
where
	T: Clone + Send + Sync + 'static,
	H: PropertyHandler<T> + Send + Sync + 'static,
{
	/// Test hook: ids of (matching, all, current window) items.
	fn snapshot_ids(&self) -> (Vec<String>, Vec<String>, Vec<String>) {
		let state = self.inner.state.read().unwrap();
		let matching = state
			.matching_items
			.iter()
			.map(|i| self.inner.handler.item_id(i))
			.collect();
		let mut all: Vec<String> = state.all_items.keys().cloned().collect();
		all.sort();
		(matching, all, state.current_view.clone())
	}

	fn range_start(&self) -> usize {
		self.inner.state.read().unwrap().settings.range_start
	}
}
