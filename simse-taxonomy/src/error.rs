use std::time::Duration;

use thiserror::Error;

/// Failures raised by the SQLite-backed store layer.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("SQLite error: {0}")]
	Sqlite(#[from] rusqlite::Error),
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
	#[error("Invalid database value: {0}")]
	InvalidDbValue(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
	#[error("Invalid input: {0}")]
	InvalidInput(String),
	#[error("Dimension mismatch: expected {expected}, got {actual}")]
	DimensionMismatch { expected: usize, actual: usize },
	#[error("Taxonomy write failed: {0}")]
	TaxonomyWrite(#[source] StoreError),
	#[error("Search failed: {0}")]
	Search(#[source] StoreError),
	#[error("Search deadline exceeded after {elapsed:?} (limit {limit:?})")]
	DeadlineExceeded { elapsed: Duration, limit: Duration },
	#[error("Embedding not found for entity: {0}")]
	NotFound(String),
	#[error("Embedding already exists for entity: {0}")]
	AlreadyExists(String),
	#[error("Store error: {0}")]
	Store(#[from] StoreError),
}

impl IndexError {
	pub fn code(&self) -> &str {
		match self {
			Self::InvalidInput(_) => "TAXONOMY_INVALID_INPUT",
			Self::DimensionMismatch { .. } => "TAXONOMY_DIMENSION_MISMATCH",
			Self::TaxonomyWrite(_) => "TAXONOMY_WRITE",
			Self::Search(_) => "TAXONOMY_SEARCH",
			Self::DeadlineExceeded { .. } => "TAXONOMY_SEARCH_DEADLINE",
			Self::NotFound(_) => "TAXONOMY_EMBEDDING_NOT_FOUND",
			Self::AlreadyExists(_) => "TAXONOMY_EMBEDDING_EXISTS",
			Self::Store(_) => "TAXONOMY_STORE",
		}
	}

	/// Input validation failures, including a vector of the wrong dimension.
	pub fn is_input_validation(&self) -> bool {
		matches!(self, Self::InvalidInput(_) | Self::DimensionMismatch { .. })
	}

	pub fn is_search_failure(&self) -> bool {
		matches!(self, Self::Search(_) | Self::DeadlineExceeded { .. })
	}

	pub fn to_json(&self) -> serde_json::Value {
		serde_json::json!({
			"code": self.code(),
			"message": self.to_string(),
		})
	}

	pub(crate) fn invalid(message: impl Into<String>) -> Self {
		Self::InvalidInput(message.into())
	}
}

impl From<rusqlite::Error> for IndexError {
	fn from(err: rusqlite::Error) -> Self {
		Self::Store(StoreError::Sqlite(err))
	}
}

impl From<serde_json::Error> for IndexError {
	fn from(err: serde_json::Error) -> Self {
		Self::Store(StoreError::Json(err))
	}
}

pub type Result<T> = std::result::Result<T, IndexError>;
