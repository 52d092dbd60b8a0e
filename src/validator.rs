//! Share-path validation: skiplist matching and excluded paths
//!
//! The non-I/O core of the client's share validator. Embedders run new bundle
//! targets and shared directories through it before handing them to the
//! registry; filesystem checks stay outside.

use regex::Regex;
use std::collections::BTreeSet;

use crate::error::{ValidationError, ValidationResult};
use crate::paths;

#[derive(Default)]
pub struct SharePathValidator {
	skiplist: Option<Regex>,
	/// Excluded real paths, exact casing preserved.
	excluded: BTreeSet<String>,
}

impl SharePathValidator {
	pub fn new() -> Self {
		Self::default()
	}

	/// Compile a new skiplist pattern; an empty pattern clears it.
	pub fn reload_skiplist(&mut self, pattern: &str) -> ValidationResult<()> {
		if pattern.is_empty() {
			self.skiplist = None;
		} else {
			self.skiplist = Some(Regex::new(&format!("(?i)^({pattern})$"))?);
		}
		Ok(())
	}

	/// Whether a directory or file name hits the skiplist.
	pub fn match_skip_list(&self, name: &str) -> bool {
		self.skiplist.as_ref().is_some_and(|re| re.is_match(name))
	}

	/// Register an excluded path. Rejects paths already covered by an
	/// existing exclude.
	pub fn add_excluded_path(&mut self, path: &str) -> ValidationResult<()> {
		let path = paths::strip_trailing_sep(path);
		if let Some(covering) = self
			.excluded
			.iter()
			.find(|e| paths::is_parent_or_exact(e, path))
		{
			return Err(ValidationError::AlreadyExcluded(covering.clone()));
		}
		self.excluded.insert(path.to_string());
		Ok(())
	}

	/// Remove an exact exclude; true when one was present.
	pub fn remove_excluded_path(&mut self, path: &str) -> bool {
		self.excluded.remove(paths::strip_trailing_sep(path))
	}

	pub fn excluded_paths(&self) -> impl Iterator<Item = &String> {
		self.excluded.iter()
	}

	/// Whether a real path falls under any exclude.
	pub fn is_excluded(&self, path: &str) -> bool {
		self.excluded
			.iter()
			.any(|e| paths::is_parent_or_exact(e, path))
	}

	/// Validate directory tokens relative to a base path: every token must
	/// clear the skiplist and the assembled path must not be excluded.
	pub fn validate_path_tokens(&self, base: &str, tokens: &[&str]) -> ValidationResult<()> {
		let mut current = paths::strip_trailing_sep(base).to_string();
		for token in tokens {
			if self.match_skip_list(token) {
				return Err(ValidationError::SkipListMatch((*token).to_string()));
			}
			current.push('/');
			current.push_str(token);
			if self.is_excluded(&current) {
				return Err(ValidationError::AlreadyExcluded(current));
			}
		}
		Ok(())
	}
}
