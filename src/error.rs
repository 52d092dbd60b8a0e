//! Error types for the bundle queue core
//!
//! Three error families cover the crate's failure modes:
//!
//! - [`ApiError`]: request-level failures surfaced by the view controller
//!   (unknown filter tokens, malformed settings, operations on an inactive
//!   view). Embedders map these to HTTP 400 responses.
//! - [`PersistError`]: descriptor-store failures. The registry swallows these
//!   at the save boundary after logging; they never propagate past
//!   `save_queue`.
//! - [`ValidationError`]: share-path validation failures (skiplist hits,
//!   overlapping excludes, bad patterns).
//!
//! Scheduler and registry queries never error; absence is expressed with
//! `Option`.

use thiserror::Error;

/// Request-level errors from the view controller API surface.
#[derive(Debug, Error)]
pub enum ApiError {
	/// Referenced entity (filter token, sort property, bundle token) does not exist
	#[error("{0} not found")]
	NotFound(&'static str),

	/// Malformed request field
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// Operation requires an active view
	#[error("the view isn't active")]
	InactiveView,
}

/// Errors from the bundle descriptor store.
#[derive(Debug, Error)]
pub enum PersistError {
	#[error("descriptor I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// The store refused the bundle (e.g. descriptor directory missing)
	#[error("descriptor rejected: {0}")]
	Rejected(String),
}

/// Share-path validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
	#[error("path matches the share skiplist: {0}")]
	SkipListMatch(String),

	#[error("path is already excluded by {0}")]
	AlreadyExcluded(String),

	#[error("invalid skiplist pattern: {0}")]
	BadPattern(#[from] regex::Error),
}

/// Convenience alias for view controller API results.
pub type ApiResult<T> = Result<T, ApiError>;

/// Convenience alias for descriptor store results.
pub type PersistResult<T> = Result<T, PersistError>;

/// Convenience alias for share-path validation results.
pub type ValidationResult<T> = Result<T, ValidationError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_api_error_display() {
		assert_eq!(ApiError::NotFound("filter").to_string(), "filter not found");
		assert_eq!(
			ApiError::InvalidArgument("negative range start".into()).to_string(),
			"invalid argument: negative range start"
		);
		assert_eq!(ApiError::InactiveView.to_string(), "the view isn't active");
	}

	#[test]
	fn test_persist_error_conversion() {
		let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no descriptor dir");
		let err: PersistError = io.into();
		assert!(matches!(err, PersistError::Io(_)));
	}
}
