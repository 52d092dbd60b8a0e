//! Property filters: compiled per-request matchers for view items
//!
//! A filter pairs a property with a match method and a pattern. String
//! methods are case-insensitive; a numeric-looking pattern additionally
//! compiles a numeric matcher, and the property's column type picks which
//! one applies. A filter with an empty pattern is inert.

use regex::Regex;

use crate::error::{ApiError, ApiResult};

use super::property::{ColumnType, PropertyHandler, PropertyId};

/// Per-view filter identifier handed back to the client.
pub type FilterToken = u32;

/// Wire encoding of filter methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMethod {
	PartialMatch = 0,
	Exact = 1,
	StartsWith = 2,
	Regex = 3,
	Equal = 4,
	NotEqual = 5,
	Less = 6,
	LessEqual = 7,
	Greater = 8,
	GreaterEqual = 9,
}

impl FilterMethod {
	pub fn from_wire(value: i64) -> Option<Self> {
		match value {
			0 => Some(Self::PartialMatch),
			1 => Some(Self::Exact),
			2 => Some(Self::StartsWith),
			3 => Some(Self::Regex),
			4 => Some(Self::Equal),
			5 => Some(Self::NotEqual),
			6 => Some(Self::Less),
			7 => Some(Self::LessEqual),
			8 => Some(Self::Greater),
			9 => Some(Self::GreaterEqual),
			_ => None,
		}
	}

	pub fn is_numeric(self) -> bool {
		matches!(
			self,
			Self::Equal | Self::NotEqual | Self::Less | Self::LessEqual | Self::Greater | Self::GreaterEqual
		)
	}
}

#[derive(Debug)]
enum StringMatcher {
	/// Lowercased needle
	Partial(String),
	Exact(String),
	StartsWith(String),
	Regex(Regex),
}

impl StringMatcher {
	fn matches(&self, value: &str) -> bool {
		match self {
			Self::Partial(needle) => value.to_ascii_lowercase().contains(needle),
			Self::Exact(pattern) => value.eq_ignore_ascii_case(pattern),
			Self::StartsWith(prefix) => value.to_ascii_lowercase().starts_with(prefix),
			Self::Regex(re) => re.is_match(value),
		}
	}
}

#[derive(Debug, Clone, Copy)]
struct NumericMatcher {
	method: FilterMethod,
	value: f64,
}

impl NumericMatcher {
	fn matches(&self, value: f64) -> bool {
		match self.method {
			FilterMethod::Equal => value == self.value,
			FilterMethod::NotEqual => value != self.value,
			FilterMethod::Less => value < self.value,
			FilterMethod::LessEqual => value <= self.value,
			FilterMethod::Greater => value > self.value,
			FilterMethod::GreaterEqual => value >= self.value,
			_ => value == self.value,
		}
	}
}

/// One compiled filter.
#[derive(Debug)]
pub struct PropertyFilter {
	id: FilterToken,
	property: Option<PropertyId>,
	pattern: String,
	string_matcher: Option<StringMatcher>,
	numeric_matcher: Option<NumericMatcher>,
}

impl PropertyFilter {
	pub fn new(id: FilterToken) -> Self {
		Self {
			id,
			property: None,
			pattern: String::new(),
			string_matcher: None,
			numeric_matcher: None,
		}
	}

	pub fn id(&self) -> FilterToken {
		self.id
	}

	/// Compile the matchers for a new pattern.
	pub fn prepare(&mut self, pattern: &str, method: FilterMethod, property: PropertyId) -> ApiResult<()> {
		self.property = Some(property);
		self.pattern = pattern.to_string();

		self.numeric_matcher = pattern.parse::<f64>().ok().map(|value| NumericMatcher {
			method: if method.is_numeric() { method } else { FilterMethod::Equal },
			value,
		});
		if method.is_numeric() && self.numeric_matcher.is_none() && !pattern.is_empty() {
			return Err(ApiError::InvalidArgument(format!(
				"numeric filter pattern expected, got '{pattern}'"
			)));
		}

		self.string_matcher = if method.is_numeric() || pattern.is_empty() {
			None
		} else {
			Some(match method {
				FilterMethod::PartialMatch => StringMatcher::Partial(pattern.to_ascii_lowercase()),
				FilterMethod::Exact => StringMatcher::Exact(pattern.to_string()),
				FilterMethod::StartsWith => StringMatcher::StartsWith(pattern.to_ascii_lowercase()),
				FilterMethod::Regex => StringMatcher::Regex(
					Regex::new(&format!("(?i){pattern}"))
						.map_err(|e| ApiError::InvalidArgument(format!("invalid filter regex: {e}")))?,
				),
				_ => unreachable!("string method expected"),
			})
		};

		Ok(())
	}

	/// Inert: no pattern posted yet, or an empty one.
	pub fn empty(&self) -> bool {
		self.pattern.is_empty() || self.property.is_none()
	}

	/// Apply against one item; the property's column picks the matcher.
	pub fn matches<T, H: PropertyHandler<T> + ?Sized>(&self, handler: &H, item: &T) -> bool {
		let Some(property) = self.property else {
			return true;
		};
		match handler.properties()[property].column {
			ColumnType::Number => match (&self.numeric_matcher, &self.string_matcher) {
				(Some(nm), _) => nm.matches(handler.number(item, property)),
				(None, Some(sm)) => sm.matches(&handler.text(item, property)),
				(None, None) => true,
			},
			ColumnType::Text => match (&self.string_matcher, &self.numeric_matcher) {
				(Some(sm), _) => sm.matches(&handler.text(item, property)),
				(None, Some(nm)) => nm.matches(handler.number(item, property)),
				(None, None) => true,
			},
		}
	}
}

/// Conjunction over all non-inert filters.
pub fn matches_all<T, H: PropertyHandler<T> + ?Sized>(
	filters: &[PropertyFilter],
	handler: &H,
	item: &T,
) -> bool {
	filters
		.iter()
		.filter(|f| !f.empty())
		.all(|f| f.matches(handler, item))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::views::property::{Property, SortMethod};

	#[derive(Clone)]
	struct Item {
		name: String,
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
			item.name.clone()
		}

		fn number(&self, item: &Item, _property: PropertyId) -> f64 {
			item.size
		}

		fn text(&self, item: &Item, property: PropertyId) -> String {
			match property {
				0 => item.name.clone(),
				_ => item.size.to_string(),
			}
		}
	}

	fn item(name: &str, size: f64) -> Item {
		Item { name: name.to_string(), size }
	}

	#[test]
	fn test_string_methods_case_insensitive() {
		let mut f = PropertyFilter::new(1);
		f.prepare("Foo", FilterMethod::PartialMatch, 0).unwrap();
		assert!(f.matches(&Handler, &item("FOOBAR", 0.0)));
		assert!(!f.matches(&Handler, &item("bar", 0.0)));

		f.prepare("foo", FilterMethod::Exact, 0).unwrap();
		assert!(f.matches(&Handler, &item("FOO", 0.0)));
		assert!(!f.matches(&Handler, &item("foobar", 0.0)));

		f.prepare("Foo", FilterMethod::StartsWith, 0).unwrap();
		assert!(f.matches(&Handler, &item("football", 0.0)));
		assert!(!f.matches(&Handler, &item("afoot", 0.0)));

		f.prepare("^f.o$", FilterMethod::Regex, 0).unwrap();
		assert!(f.matches(&Handler, &item("F_O", 0.0)));
		assert!(!f.matches(&Handler, &item("foo2", 0.0)));
	}

	#[test]
	fn test_invalid_regex_rejected() {
		let mut f = PropertyFilter::new(1);
		assert!(matches!(
			f.prepare("([", FilterMethod::Regex, 0),
			Err(ApiError::InvalidArgument(_))
		));
	}

	#[test]
	fn test_numeric_comparisons() {
		let mut f = PropertyFilter::new(1);
		for (method, size, expected) in [
			(FilterMethod::Equal, 100.0, true),
			(FilterMethod::NotEqual, 100.0, false),
			(FilterMethod::Less, 99.0, true),
			(FilterMethod::LessEqual, 100.0, true),
			(FilterMethod::Greater, 100.0, false),
			(FilterMethod::GreaterEqual, 100.0, true),
		] {
			f.prepare("100", method, 1).unwrap();
			assert_eq!(f.matches(&Handler, &item("x", size)), expected, "{method:?}");
		}
	}

	#[test]
	fn test_numeric_method_requires_numeric_pattern() {
		let mut f = PropertyFilter::new(1);
		assert!(matches!(
			f.prepare("abc", FilterMethod::Greater, 1),
			Err(ApiError::InvalidArgument(_))
		));
	}

	#[test]
	fn test_numeric_pattern_on_numeric_property() {
		// a string method with a numeric pattern still compares numerically
		// on a numeric column
		let mut f = PropertyFilter::new(1);
		f.prepare("100", FilterMethod::PartialMatch, 1).unwrap();
		assert!(f.matches(&Handler, &item("x", 100.0)));
		assert!(!f.matches(&Handler, &item("x", 1000.0)));
	}

	#[test]
	fn test_empty_filter_is_inert() {
		let f = PropertyFilter::new(1);
		assert!(f.empty());
		let mut prepared = PropertyFilter::new(2);
		prepared.prepare("", FilterMethod::PartialMatch, 0).unwrap();
		assert!(prepared.empty());
	}

	#[test]
	fn test_matches_all_conjunction() {
		let mut by_name = PropertyFilter::new(1);
		by_name.prepare("foo", FilterMethod::PartialMatch, 0).unwrap();
		let mut by_size = PropertyFilter::new(2);
		by_size.prepare("50", FilterMethod::Greater, 1).unwrap();
		let inert = PropertyFilter::new(3);
		let filters = vec![by_name, by_size, inert];

		assert!(matches_all(&filters, &Handler, &item("foobar", 60.0)));
		assert!(!matches_all(&filters, &Handler, &item("foobar", 40.0)));
		assert!(!matches_all(&filters, &Handler, &item("bar", 60.0)));
	}
}
