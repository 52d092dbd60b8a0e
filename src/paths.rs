//! Path helpers for bundle targets and the remote-dir matcher
//!
//! Bundle targets are exchanged as plain strings with `/` separators; these
//! helpers implement the segment predicates the registry and scheduler build
//! on. Comparisons are ASCII-case-insensitive, matching how Direct Connect
//! clients compare paths across platforms.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Release sub-directory names (`CD1`, `DISC2`, `Sample`, `Subs`, ...) that
/// must not be trusted as a match on their own; the remote-dir matcher walks
/// up to a parent segment before accepting one of these.
static SUB_DIR_RE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"(?i)^(((S(eason)?|DVD|CD|D|DIS[KC]).?[0-9][0-9]?)|Sample.?|Proof.?|Cover.?|.{0,5}Sub(s)?)$")
		.expect("sub-dir pattern is valid")
});

/// Whether a directory name looks like a release sub-directory.
pub fn is_sub_dir_name(name: &str) -> bool {
	SUB_DIR_RE.is_match(name)
}

/// Remove one trailing separator, if present.
pub fn strip_trailing_sep(path: &str) -> &str {
	path.strip_suffix('/').unwrap_or(path)
}

/// Last path segment, ignoring a trailing separator. Empty input yields "".
pub fn last_segment(path: &str) -> &str {
	let path = strip_trailing_sep(path);
	match path.rfind('/') {
		Some(i) => &path[i + 1..],
		None => path,
	}
}

/// Directory part of a file path, without the trailing separator.
pub fn containing_dir(path: &str) -> &str {
	let path = strip_trailing_sep(path);
	match path.rfind('/') {
		Some(i) => &path[..i],
		None => "",
	}
}

/// Non-empty segments of a path, root to leaf.
pub fn segments(path: &str) -> Vec<&str> {
	path.split('/').filter(|s| !s.is_empty()).collect()
}

/// `path` is strictly inside `parent`.
pub fn is_sub(path: &str, parent: &str) -> bool {
	let path = strip_trailing_sep(path);
	let parent = strip_trailing_sep(parent);
	if path.len() <= parent.len() {
		return false;
	}
	path.as_bytes()[parent.len()] == b'/' && path[..parent.len()].eq_ignore_ascii_case(parent)
}

/// `path` equals `parent` or is strictly inside it.
pub fn is_parent_or_exact(parent: &str, path: &str) -> bool {
	strip_trailing_sep(parent).eq_ignore_ascii_case(strip_trailing_sep(path)) || is_sub(path, parent)
}

/// Resolve the mount point governing `path`: the longest volume root that is
/// a parent of (or exactly) `path`.
pub fn get_mount_path(path: &str, volumes: &HashSet<String>) -> Option<String> {
	volumes
		.iter()
		.filter(|v| is_parent_or_exact(v, path))
		.max_by_key(|v| strip_trailing_sep(v).len())
		.cloned()
}
