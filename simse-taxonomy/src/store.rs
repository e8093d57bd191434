// ---------------------------------------------------------------------------
// Store: SQLite connection, schema and row helpers
// ---------------------------------------------------------------------------
//
// Uniqueness of categories, associations and embeddings is enforced by the
// schema; every write path relies on those constraints plus conditional
// inserts rather than on in-process locking.
// ---------------------------------------------------------------------------

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use uuid::Uuid;

use crate::error::StoreError;

/// SQLite bound-parameter budget per `IN (...)` clause.
pub(crate) const MAX_BOUND_PARAMS: usize = 500;

pub(crate) const META_VECTOR_DIMENSION: &str = "vector_dimension";

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode=WAL;
PRAGMA synchronous=NORMAL;
PRAGMA foreign_keys=ON;

CREATE TABLE IF NOT EXISTS meta (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS categories (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  parent_id TEXT REFERENCES categories(id),
  created_at_ms INTEGER NOT NULL,
  updated_at_ms INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_categories_name_parent
  ON categories(name, IFNULL(parent_id, ''));
CREATE INDEX IF NOT EXISTS idx_categories_parent ON categories(parent_id);

CREATE TABLE IF NOT EXISTS entity_categories (
  id TEXT PRIMARY KEY,
  entity_id TEXT NOT NULL,
  category_id TEXT NOT NULL REFERENCES categories(id),
  created_at_ms INTEGER NOT NULL,
  UNIQUE (entity_id, category_id)
);

CREATE INDEX IF NOT EXISTS idx_entity_categories_category
  ON entity_categories(category_id);

CREATE TABLE IF NOT EXISTS vector_embeddings (
  id TEXT PRIMARY KEY,
  entity_id TEXT NOT NULL UNIQUE,
  dimension INTEGER NOT NULL,
  vector BLOB NOT NULL,
  taxonomy_snapshot TEXT,
  created_at_ms INTEGER NOT NULL,
  updated_at_ms INTEGER NOT NULL
);
"#;

#[derive(Debug)]
pub struct Store {
	path: Option<PathBuf>,
	conn: Connection,
}

impl Store {
	/// Open or create the database file at `path`.
	pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
		let path = path.as_ref().to_path_buf();
		if let Some(parent) = path.parent() {
			if !parent.as_os_str().is_empty() {
				std::fs::create_dir_all(parent)?;
			}
		}
		let conn = Connection::open(&path)?;
		conn.busy_timeout(busy_timeout)?;
		let store = Self {
			path: Some(path),
			conn,
		};
		store.migrate()?;
		Ok(store)
	}

	pub fn open_in_memory() -> Result<Self, StoreError> {
		let conn = Connection::open_in_memory()?;
		let store = Self { path: None, conn };
		store.migrate()?;
		Ok(store)
	}

	pub fn path(&self) -> Option<&Path> {
		self.path.as_deref()
	}

	pub fn conn(&self) -> &Connection {
		&self.conn
	}

	fn migrate(&self) -> Result<(), StoreError> {
		self.conn.execute_batch(SCHEMA_SQL)?;
		self.conn.execute(
			"INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
			params!["schema_version", "v1"],
		)?;
		Ok(())
	}

	/// Start a write transaction that takes the database write lock up
	/// front, so concurrent writers queue on `busy_timeout` instead of
	/// failing on lock upgrade.
	pub fn begin(&mut self) -> Result<Transaction<'_>, StoreError> {
		Ok(self
			.conn
			.transaction_with_behavior(TransactionBehavior::Immediate)?)
	}

	/// Start a read-only snapshot. Rolled back on drop.
	pub fn read(&self) -> Result<Transaction<'_>, StoreError> {
		Ok(self.conn.unchecked_transaction()?)
	}
}

// ---------------------------------------------------------------------------
// Meta
// ---------------------------------------------------------------------------

pub(crate) fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
	Ok(conn
		.query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
			row.get(0)
		})
		.optional()?)
}

pub(crate) fn write_meta(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
	conn.execute(
		r#"
		INSERT INTO meta(key, value) VALUES (?1, ?2)
		ON CONFLICT(key) DO UPDATE SET value=excluded.value
		"#,
		params![key, value],
	)?;
	Ok(())
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

pub(crate) fn now_ms() -> i64 {
	Utc::now().timestamp_millis()
}

pub(crate) fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
	let raw: String = row.get(idx)?;
	Uuid::parse_str(&raw)
		.map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

pub(crate) fn opt_uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
	let raw: Option<String> = row.get(idx)?;
	raw.map(|value| {
		Uuid::parse_str(&value).map_err(|err| {
			rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
		})
	})
	.transpose()
}

pub(crate) fn datetime_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
	let ms: i64 = row.get(idx)?;
	DateTime::<Utc>::from_timestamp_millis(ms)
		.ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

/// `?,?,?` for `count` positional parameters.
pub(crate) fn placeholders(count: usize) -> String {
	vec!["?"; count].join(",")
}
