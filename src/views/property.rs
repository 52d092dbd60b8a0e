//! Property tables for view items
//!
//! A view's item type exposes a fixed table of named properties. The handler
//! supplies typed accessors; sorting, filtering, and serialization all work
//! through it, so the view controller itself stays generic.

use std::cmp::Ordering;

use serde_json::{json, Value};

/// Index into a handler's property table.
pub type PropertyId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMethod {
	Numeric,
	/// Case-insensitive lexicographic
	Text,
	/// Delegated to [`PropertyHandler::compare_custom`]
	Custom,
}

/// Which accessor a filter applies against this property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
	Text,
	Number,
}

#[derive(Debug, Clone, Copy)]
pub struct Property {
	pub name: &'static str,
	pub sort: SortMethod,
	pub column: ColumnType,
}

/// Typed access to a view item's properties.
pub trait PropertyHandler<T>: Send + Sync {
	fn properties(&self) -> &[Property];

	/// Stable item identity; serialized as `id` in every payload.
	fn item_id(&self, item: &T) -> String;

	fn number(&self, item: &T, property: PropertyId) -> f64;

	fn text(&self, item: &T, property: PropertyId) -> String;

	/// Comparator for [`SortMethod::Custom`] properties.
	fn compare_custom(&self, _a: &T, _b: &T, _property: PropertyId) -> Ordering {
		Ordering::Equal
	}

	fn serialize_property(&self, item: &T, property: PropertyId) -> Value {
		match self.properties()[property].column {
			ColumnType::Number => json!(self.number(item, property)),
			ColumnType::Text => json!(self.text(item, property)),
		}
	}
}

pub fn find_property_by_name(name: &str, properties: &[Property]) -> Option<PropertyId> {
	properties.iter().position(|p| p.name == name)
}

/// Ordering of two items under the given sort settings.
pub fn compare_items<T, H: PropertyHandler<T> + ?Sized>(
	handler: &H,
	a: &T,
	b: &T,
	property: PropertyId,
	ascending: bool,
) -> Ordering {
	let ord = match handler.properties()[property].sort {
		SortMethod::Numeric => handler
			.number(a, property)
			.partial_cmp(&handler.number(b, property))
			.unwrap_or(Ordering::Equal),
		SortMethod::Text => {
			let left = handler.text(a, property).to_ascii_lowercase();
			let right = handler.text(b, property).to_ascii_lowercase();
			left.cmp(&right)
		}
		SortMethod::Custom => handler.compare_custom(a, b, property),
	};
	if ascending {
		ord
	} else {
		ord.reverse()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Clone)]
	struct Item {
		name: &'static str,
		size: f64,
	}

	struct Handler;

	const PROPS: &[Property] = &[
		Property { name: "name", sort: SortMethod::Text, column: ColumnType::Text },
		Property { name: "size", sort: SortMethod::Numeric, column: ColumnType::Number },
	];

	impl PropertyHandler<Item> for Handler {
		fn properties(&self) -> &[Property] {
			PROPS
		}

		fn item_id(&self, item: &Item) -> String {
			item.name.to_string()
		}

		fn number(&self, item: &Item, _property: PropertyId) -> f64 {
			item.size
		}

		fn text(&self, item: &Item, property: PropertyId) -> String {
			match property {
				0 => item.name.to_string(),
				_ => item.size.to_string(),
			}
		}
	}

	#[test]
	fn test_find_property_by_name() {
		assert_eq!(find_property_by_name("size", PROPS), Some(1));
		assert_eq!(find_property_by_name("missing", PROPS), None);
	}

	#[test]
	fn test_text_sort_is_case_insensitive() {
		let a = Item { name: "Alpha", size: 1.0 };
		let b = Item { name: "beta", size: 2.0 };
		assert_eq!(compare_items(&Handler, &a, &b, 0, true), Ordering::Less);
		assert_eq!(compare_items(&Handler, &a, &b, 0, false), Ordering::Greater);
	}

	#[test]
	fn test_numeric_sort() {
		let a = Item { name: "a", size: 10.0 };
		let b = Item { name: "b", size: 2.0 };
		assert_eq!(compare_items(&Handler, &a, &b, 1, true), Ordering::Greater);
	}
}
