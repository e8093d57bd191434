// ---------------------------------------------------------------------------
// Vectors: one embedding per entity, fixed dimensionality
// ---------------------------------------------------------------------------
//
// Vectors are stored as little-endian f32 BLOBs next to their dimension.
// The index dimension is either configured or fixed by the first stored
// vector and persisted in `meta`.
// ---------------------------------------------------------------------------

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{IndexError, Result, StoreError};
use crate::store::{datetime_column, now_ms, read_meta, uuid_column, write_meta, META_VECTOR_DIMENSION};
use crate::types::{EmbeddingUpdate, VectorEmbedding};

const SELECT_COLUMNS: &str =
	"id, entity_id, dimension, vector, taxonomy_snapshot, created_at_ms, updated_at_ms";

// ---------------------------------------------------------------------------
// Validation and dimension bookkeeping
// ---------------------------------------------------------------------------

pub(crate) fn validate_vector(vector: &[f32]) -> Result<()> {
	if vector.is_empty() {
		return Err(IndexError::invalid("vector must not be empty"));
	}
	if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
		return Err(IndexError::invalid(format!(
			"vector contains a non-finite value at index {pos}"
		)));
	}
	Ok(())
}

/// Dimension persisted by the first stored vector, if any.
pub(crate) fn stored_dimension(conn: &Connection) -> std::result::Result<Option<usize>, StoreError> {
	match read_meta(conn, META_VECTOR_DIMENSION)? {
		Some(raw) => raw
			.parse::<usize>()
			.map(Some)
			.map_err(|_| StoreError::InvalidDbValue(format!("invalid vector dimension in meta: {raw}"))),
		None => Ok(None),
	}
}

/// Check `actual` against the configured or persisted dimension, persisting
/// it when this is the first vector the index sees.
pub(crate) fn ensure_dimension(
	conn: &Connection,
	actual: usize,
	configured: Option<usize>,
) -> Result<usize> {
	let stored = stored_dimension(conn)?;
	if let Some(expected) = configured.or(stored) {
		if expected != actual {
			return Err(IndexError::DimensionMismatch { expected, actual });
		}
	}
	if stored.is_none() {
		write_meta(conn, META_VECTOR_DIMENSION, &actual.to_string())?;
		tracing::info!(dimension = actual, "vector dimension fixed");
	}
	Ok(actual)
}

// ---------------------------------------------------------------------------
// CRUD
// ---------------------------------------------------------------------------

/// Insert a new embedding; fails with `AlreadyExists` when the entity has one.
pub(crate) fn create(
	conn: &Connection,
	entity_id: &str,
	vector: &[f32],
	snapshot: Option<&Value>,
	configured_dimension: Option<usize>,
) -> Result<VectorEmbedding> {
	validate_vector(vector)?;
	ensure_dimension(conn, vector.len(), configured_dimension)?;

	let now = now_ms();
	let inserted = conn.execute(
		r#"
		INSERT OR IGNORE INTO vector_embeddings(
		  id, entity_id, dimension, vector, taxonomy_snapshot, created_at_ms, updated_at_ms
		) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
		"#,
		params![
			Uuid::new_v4().to_string(),
			entity_id,
			vector.len() as i64,
			encode_vector_blob(vector),
			encode_snapshot(snapshot)?,
			now
		],
	)?;
	if inserted == 0 {
		return Err(IndexError::AlreadyExists(entity_id.to_string()));
	}
	fetch_existing(conn, entity_id)
}

/// Create or replace the embedding of `entity_id`. Both the vector and the
/// snapshot are replaced; the row id and `created_at` are kept.
pub(crate) fn put(
	conn: &Connection,
	entity_id: &str,
	vector: &[f32],
	snapshot: Option<&Value>,
	configured_dimension: Option<usize>,
) -> Result<VectorEmbedding> {
	validate_vector(vector)?;
	ensure_dimension(conn, vector.len(), configured_dimension)?;

	let now = now_ms();
	conn.execute(
		r#"
		INSERT INTO vector_embeddings(
		  id, entity_id, dimension, vector, taxonomy_snapshot, created_at_ms, updated_at_ms
		) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
		ON CONFLICT(entity_id) DO UPDATE SET
		  dimension=excluded.dimension,
		  vector=excluded.vector,
		  taxonomy_snapshot=excluded.taxonomy_snapshot,
		  updated_at_ms=excluded.updated_at_ms
		"#,
		params![
			Uuid::new_v4().to_string(),
			entity_id,
			vector.len() as i64,
			encode_vector_blob(vector),
			encode_snapshot(snapshot)?,
			now
		],
	)?;
	fetch_existing(conn, entity_id)
}

pub(crate) fn get(conn: &Connection, entity_id: &str) -> Result<Option<VectorEmbedding>> {
	let sql = format!("SELECT {SELECT_COLUMNS} FROM vector_embeddings WHERE entity_id = ?1");
	let raw = conn
		.prepare_cached(&sql)?
		.query_row(params![entity_id], RawEmbedding::from_row)
		.optional()?;
	match raw {
		Some(raw) => Ok(Some(raw.into_embedding()?)),
		None => Ok(None),
	}
}

/// Apply the present fields of `update`; absent fields keep their value.
pub(crate) fn update(
	conn: &Connection,
	entity_id: &str,
	update: &EmbeddingUpdate,
	configured_dimension: Option<usize>,
) -> Result<VectorEmbedding> {
	if update.is_empty() {
		return Err(IndexError::invalid("update must set a vector or a taxonomy snapshot"));
	}
	if let Some(vector) = &update.vector {
		validate_vector(vector)?;
		ensure_dimension(conn, vector.len(), configured_dimension)?;
	}

	let updated = conn.execute(
		r#"
		UPDATE vector_embeddings SET
		  vector = COALESCE(?2, vector),
		  dimension = COALESCE(?3, dimension),
		  taxonomy_snapshot = COALESCE(?4, taxonomy_snapshot),
		  updated_at_ms = ?5
		WHERE entity_id = ?1
		"#,
		params![
			entity_id,
			update.vector.as_deref().map(encode_vector_blob),
			update.vector.as_ref().map(|v| v.len() as i64),
			encode_snapshot(update.taxonomy_snapshot.as_ref())?,
			now_ms()
		],
	)?;
	if updated == 0 {
		return Err(IndexError::NotFound(entity_id.to_string()));
	}
	fetch_existing(conn, entity_id)
}

pub(crate) fn delete(conn: &Connection, entity_id: &str) -> Result<bool> {
	let removed = conn.execute(
		"DELETE FROM vector_embeddings WHERE entity_id = ?1",
		params![entity_id],
	)?;
	Ok(removed > 0)
}

pub(crate) fn count(conn: &Connection) -> std::result::Result<usize, StoreError> {
	let n: i64 = conn.query_row("SELECT COUNT(*) FROM vector_embeddings", [], |row| row.get(0))?;
	usize::try_from(n).map_err(|_| StoreError::InvalidDbValue(format!("invalid row count: {n}")))
}

fn fetch_existing(conn: &Connection, entity_id: &str) -> Result<VectorEmbedding> {
	get(conn, entity_id)?.ok_or_else(|| IndexError::NotFound(entity_id.to_string()))
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

struct RawEmbedding {
	id: Uuid,
	entity_id: String,
	dimension: i64,
	vector: Vec<u8>,
	snapshot: Option<String>,
	created_at: chrono::DateTime<chrono::Utc>,
	updated_at: chrono::DateTime<chrono::Utc>,
}

impl RawEmbedding {
	fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
		Ok(Self {
			id: uuid_column(row, 0)?,
			entity_id: row.get(1)?,
			dimension: row.get(2)?,
			vector: row.get(3)?,
			snapshot: row.get(4)?,
			created_at: datetime_column(row, 5)?,
			updated_at: datetime_column(row, 6)?,
		})
	}

	fn into_embedding(self) -> std::result::Result<VectorEmbedding, StoreError> {
		let dimension = usize::try_from(self.dimension)
			.map_err(|_| StoreError::InvalidDbValue(format!("invalid dimension: {}", self.dimension)))?;
		let taxonomy_snapshot = match self.snapshot {
			Some(raw) => Some(serde_json::from_str(&raw)?),
			None => None,
		};
		Ok(VectorEmbedding {
			id: self.id,
			entity_id: self.entity_id,
			vector: decode_vector_blob(&self.vector, dimension)?,
			taxonomy_snapshot,
			created_at: self.created_at,
			updated_at: self.updated_at,
		})
	}
}

fn encode_snapshot(snapshot: Option<&Value>) -> std::result::Result<Option<String>, StoreError> {
	Ok(snapshot.map(serde_json::to_string).transpose()?)
}

pub(crate) fn encode_vector_blob(vector: &[f32]) -> Vec<u8> {
	let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
	for &value in vector {
		bytes.extend_from_slice(&value.to_le_bytes());
	}
	bytes
}

pub(crate) fn decode_vector_blob(
	blob: &[u8],
	dimension: usize,
) -> std::result::Result<Vec<f32>, StoreError> {
	let expected_len = dimension
		.checked_mul(std::mem::size_of::<f32>())
		.ok_or_else(|| StoreError::InvalidDbValue(format!("dimension overflow: {dimension}")))?;
	if blob.len() != expected_len {
		return Err(StoreError::InvalidDbValue(format!(
			"invalid vector byte length: expected {expected_len}, got {}",
			blob.len()
		)));
	}

	let mut out = Vec::with_capacity(dimension);
	for chunk in blob.chunks_exact(4) {
		out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
	}
	Ok(out)
}
